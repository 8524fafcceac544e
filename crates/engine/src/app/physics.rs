use super::math::{step_angle_toward_degrees, Vec3};

pub const GRAVITY_PER_TICK: f32 = 0.3;
pub const FRICTION_MAGNITUDE: f32 = 0.1;
pub const AIR_RESISTANCE_MAGNITUDE: f32 = 0.02;
pub const FACING_TURN_STEP_DEGREES: f32 = 12.0;

const DEFAULT_MAX_SPEED: f32 = 2.0;
const DEFAULT_MAX_ACCEL: f32 = 0.5;

/// Per-entity integrator with two velocity accumulators: internal motion is
/// self-driven and capped at `max_speed`; external motion (impulses, forces)
/// is uncapped and only ever decays under drag. Both are summed for the
/// final displacement each tick.
#[derive(Debug, Clone)]
pub struct PhysicsBody {
    position: Vec3,
    facing_degrees: f32,
    internal_velocity: Vec3,
    internal_accel: Vec3,
    external_velocity: Vec3,
    external_accel: Vec3,
    seek_target: Option<Vec3>,
    max_speed: f32,
    max_accel: f32,
    affected_by_gravity: bool,
    affected_by_friction: bool,
    face_velocity: bool,
}

impl PhysicsBody {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            facing_degrees: 0.0,
            internal_velocity: Vec3::ZERO,
            internal_accel: Vec3::ZERO,
            external_velocity: Vec3::ZERO,
            external_accel: Vec3::ZERO,
            seek_target: None,
            max_speed: DEFAULT_MAX_SPEED,
            max_accel: DEFAULT_MAX_ACCEL,
            affected_by_gravity: false,
            affected_by_friction: true,
            face_velocity: false,
        }
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed.max(0.0);
        self
    }

    pub fn with_max_accel(mut self, max_accel: f32) -> Self {
        self.max_accel = max_accel.max(0.0);
        self
    }

    pub fn with_gravity(mut self, affected: bool) -> Self {
        self.affected_by_gravity = affected;
        self
    }

    pub fn with_friction(mut self, affected: bool) -> Self {
        self.affected_by_friction = affected;
        self
    }

    pub fn with_face_velocity(mut self, face_velocity: bool) -> Self {
        self.face_velocity = face_velocity;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn facing_degrees(&self) -> f32 {
        self.facing_degrees
    }

    pub fn set_facing_degrees(&mut self, facing_degrees: f32) {
        self.facing_degrees = facing_degrees;
    }

    pub fn internal_velocity(&self) -> Vec3 {
        self.internal_velocity
    }

    pub fn external_velocity(&self) -> Vec3 {
        self.external_velocity
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    pub fn is_seeking(&self) -> bool {
        self.seek_target.is_some()
    }

    /// Self-driven motion. Clamped to `max_accel` and capped at `max_speed`
    /// during the tick.
    pub fn accelerate(&mut self, accel: Vec3) {
        self.internal_accel += accel;
    }

    /// Externally-imposed acceleration; never speed-capped.
    pub fn apply_force(&mut self, force: Vec3) {
        self.external_accel += force;
    }

    /// Instantaneous external velocity change; never speed-capped.
    pub fn apply_impulse(&mut self, impulse: Vec3) {
        self.external_velocity += impulse;
    }

    /// Starts autonomous seeking toward `target`. Seeking ends once the
    /// remaining distance drops below the kinematic braking distance, so
    /// friction carries the body to rest instead of overshooting.
    pub fn move_to_target(&mut self, target: Vec3) {
        self.seek_target = Some(target);
    }

    pub fn stop_seeking(&mut self) {
        self.seek_target = None;
    }

    /// "Moving" means self-driven horizontal motion only. Knockback from an
    /// external impulse does not count.
    pub fn is_moving(&self) -> bool {
        self.internal_velocity.horizontal_length() != 0.0
    }

    /// Advances one tick. The step order below affects the numeric outcome
    /// and is load-bearing; reorder nothing.
    pub fn update(&mut self) {
        // 1. Seek: accelerate toward the target, then stop seeking inside
        //    the braking distance v^2 / (2 * friction).
        if let Some(target) = self.seek_target {
            let to_target = (target - self.position).horizontal();
            let direction = to_target.normalized_or_zero();
            self.internal_accel += direction * self.max_accel;

            let speed = self.internal_velocity.horizontal_length();
            let braking_distance = speed * speed / (2.0 * FRICTION_MAGNITUDE);
            if to_target.length() < braking_distance {
                self.seek_target = None;
            }
        }

        // 2. Clamp self-driven acceleration. Zero-length input stays zero.
        self.internal_accel = self.internal_accel.clamped_to_length(self.max_accel);

        // 3. Gravity is an external downward force.
        if self.affected_by_gravity {
            self.external_accel += Vec3::new(0.0, 0.0, -GRAVITY_PER_TICK);
        }

        // 4. Drag on internal velocity: air resistance in 3D, plus ground
        //    friction on the horizontal plane while on the ground.
        if self.affected_by_friction {
            apply_drag(&mut self.internal_velocity, self.position.z == 0.0);
        }

        // 5. Integrate internal velocity, capped at max speed.
        self.internal_velocity += self.internal_accel;
        self.internal_velocity = self.internal_velocity.clamped_to_length(self.max_speed);

        // 6. External velocity decays under the same drag but is never
        //    magnitude-clamped.
        if self.affected_by_friction {
            apply_drag(&mut self.external_velocity, self.position.z == 0.0);
        }

        // 7. Integrate external velocity.
        self.external_velocity += self.external_accel;

        // 8. Displace by the sum of both accumulators.
        self.position += self.internal_velocity + self.external_velocity;

        // 9. Ground contact: clamp height and kill vertical motion.
        if self.position.z < 0.0 {
            self.position.z = 0.0;
            self.internal_velocity.z = 0.0;
            self.external_velocity.z = 0.0;
        }

        // 10. Accelerations accumulate per tick only.
        self.internal_accel = Vec3::ZERO;
        self.external_accel = Vec3::ZERO;

        // 11. Turn toward the internal-velocity heading by a fixed step.
        if self.face_velocity {
            if let Some(heading) = self.internal_velocity.horizontal_heading_degrees() {
                self.facing_degrees = step_angle_toward_degrees(
                    self.facing_degrees,
                    heading,
                    FACING_TURN_STEP_DEGREES,
                );
            }
        }
    }
}

/// Subtracts a drag vector capped at the air-resistance magnitude from the
/// full velocity, then a ground-friction drag from the horizontal component
/// while grounded. Degenerate (zero) velocities are left untouched.
fn apply_drag(velocity: &mut Vec3, grounded: bool) {
    let speed = velocity.length();
    if speed > 0.0 {
        let drag = speed.min(AIR_RESISTANCE_MAGNITUDE);
        *velocity = *velocity - velocity.normalized_or_zero() * drag;
    }

    if grounded {
        let horizontal = velocity.horizontal();
        let horizontal_speed = horizontal.length();
        if horizontal_speed > 0.0 {
            let drag = horizontal_speed.min(FRICTION_MAGNITUDE);
            *velocity = *velocity - horizontal.normalized_or_zero() * drag;
        }
    }
}
