#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// World-space vector: `x`/`y` span the ground plane, `z` is height above it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn horizontal_length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn horizontal(self) -> Self {
        Self {
            x: self.x,
            y: self.y,
            z: 0.0,
        }
    }

    /// Scales the vector down to `max` if it is longer. A zero-length vector
    /// is returned unchanged rather than normalized.
    pub fn clamped_to_length(self, max: f32) -> Self {
        let len = self.length();
        if len <= max || len == 0.0 {
            return self;
        }
        self * (max / len)
    }

    /// Unit vector in the same direction, or zero if the input is degenerate.
    pub fn normalized_or_zero(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return Self::ZERO;
        }
        self * (1.0 / len)
    }

    /// Heading of the horizontal component in degrees, measured from +x
    /// toward +y. `None` when the horizontal component is zero.
    pub fn horizontal_heading_degrees(self) -> Option<f32> {
        if self.x == 0.0 && self.y == 0.0 {
            return None;
        }
        Some(normalize_degrees(self.y.atan2(self.x).to_degrees()))
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in `[-180, 180)`.
pub fn shortest_angle_delta_degrees(from: f32, to: f32) -> f32 {
    let delta = (to - from).rem_euclid(360.0);
    if delta >= 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Rotates `to` toward a target heading by at most `max_step` degrees along
/// the shortest arc.
pub fn step_angle_toward_degrees(current: f32, target: f32, max_step: f32) -> f32 {
    let delta = shortest_angle_delta_degrees(current, target);
    let step = delta.clamp(-max_step, max_step);
    normalize_degrees(current + step)
}
