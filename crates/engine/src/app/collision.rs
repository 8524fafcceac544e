use super::math::Vec3;
use super::scene::{EntityId, SceneWorld};

/// Contact shell and tuning for one entity. `pushout` is how strongly this
/// body displaces others; `resistance` is how strongly it resists being
/// displaced (1.0 = immovable). Both live in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBody {
    pub radius: f32,
    pub pushout: f32,
    pub resistance: f32,
}

impl CollisionBody {
    pub fn new(radius: f32, pushout: f32, resistance: f32) -> Self {
        Self {
            radius: radius.max(0.0),
            pushout: pushout.clamp(0.0, 1.0),
            resistance: resistance.clamp(0.0, 1.0),
        }
    }

    pub fn immovable(radius: f32) -> Self {
        Self::new(radius, 1.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct RegisteredBody {
    entity: EntityId,
    body: CollisionBody,
    removed: bool,
}

/// All-pairs radial overlap resolution in the horizontal plane. O(n^2) per
/// pass over the registered bodies; correctness at tens of bodies matters
/// here, not asymptotics.
#[derive(Debug, Default)]
pub struct CollisionSolver {
    registered: Vec<RegisteredBody>,
}

impl CollisionSolver {
    pub fn register(&mut self, entity: EntityId, body: CollisionBody) {
        if let Some(existing) = self
            .registered
            .iter_mut()
            .find(|entry| entry.entity == entity)
        {
            existing.body = body;
            existing.removed = false;
            return;
        }
        self.registered.push(RegisteredBody {
            entity,
            body,
            removed: false,
        });
    }

    /// Flags the entry for purge after the next pass, mirroring the scene's
    /// deferred-removal discipline.
    pub fn unregister(&mut self, entity: EntityId) {
        if let Some(entry) = self
            .registered
            .iter_mut()
            .find(|entry| entry.entity == entity)
        {
            entry.removed = true;
        }
    }

    pub fn registered_count(&self) -> usize {
        self.registered.iter().filter(|entry| !entry.removed).count()
    }

    /// Resolves every overlapping ordered pair once. For pair (A, B), A is
    /// displaced along the B-to-A separation by the missing distance scaled
    /// by `B.pushout * (1 - A.resistance)`. Deliberately asymmetric and not
    /// momentum-conserving.
    pub fn update(&mut self, world: &mut SceneWorld) {
        for entry in &mut self.registered {
            if world.find_entity(entry.entity).is_none() {
                entry.removed = true;
            }
        }

        let count = self.registered.len();
        for a in 0..count {
            if self.registered[a].removed {
                continue;
            }
            for b in 0..count {
                if a == b || self.registered[b].removed {
                    continue;
                }

                let (Some(pos_a), Some(pos_b)) = (
                    entity_position(world, self.registered[a].entity),
                    entity_position(world, self.registered[b].entity),
                ) else {
                    continue;
                };

                let radius_sum = self.registered[a].body.radius + self.registered[b].body.radius;
                let separation = (pos_a - pos_b).horizontal();
                let distance = separation.length();
                if distance >= radius_sum {
                    continue;
                }

                // Coincident centers have no direction; substitute a fixed
                // unit nudge instead of normalizing a zero vector.
                let direction = if distance == 0.0 {
                    Vec3::new(1.0, 0.0, 0.0)
                } else {
                    separation * (1.0 / distance)
                };
                let missing = radius_sum - distance;
                let fraction =
                    self.registered[b].body.pushout * (1.0 - self.registered[a].body.resistance);
                if fraction <= 0.0 {
                    continue;
                }

                if let Some(entity) = world.find_entity_mut(self.registered[a].entity) {
                    let corrected = pos_a + direction * (missing * fraction);
                    entity.body.set_position(corrected);
                }
            }
        }

        self.registered.retain(|entry| !entry.removed);
    }
}

fn entity_position(world: &SceneWorld, id: EntityId) -> Option<Vec3> {
    world.find_entity(id).map(|entity| entity.body.position())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::physics::PhysicsBody;
    use crate::app::scene::{EntityKind, RenderLayer, RenderableKind};

    const EPSILON: f32 = 1e-3;

    fn spawn_body(world: &mut SceneWorld, position: Vec3, body: CollisionBody) -> EntityId {
        let id = world.spawn(
            EntityKind::Feature,
            RenderLayer::Objects,
            PhysicsBody::new(position),
            RenderableKind::Hidden,
        );
        world.register_collision(id, body);
        id
    }

    fn distance_between(world: &SceneWorld, a: EntityId, b: EntityId) -> f32 {
        let pos_a = world.find_entity(a).expect("a").body.position();
        let pos_b = world.find_entity(b).expect("b").body.position();
        (pos_a - pos_b).horizontal_length()
    }

    #[test]
    fn overlapping_pair_converges_to_radius_sum() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(10.0, 1.0, 0.0);
        let a = spawn_body(&mut world, Vec3::ZERO, shell);
        let b = spawn_body(&mut world, Vec3::new(5.0, 0.0, 0.0), shell);
        world.apply_pending();

        for _ in 0..50 {
            world.resolve_collisions();
        }
        assert!((distance_between(&world, a, b) - 20.0).abs() < EPSILON);
    }

    #[test]
    fn immovable_body_stands_still_and_pushes() {
        let mut world = SceneWorld::default();
        let anchor = spawn_body(&mut world, Vec3::ZERO, CollisionBody::immovable(5.0));
        let light = spawn_body(
            &mut world,
            Vec3::new(3.0, 0.0, 0.0),
            CollisionBody::new(5.0, 1.0, 0.0),
        );
        world.apply_pending();

        for _ in 0..50 {
            world.resolve_collisions();
        }

        let anchor_pos = world.find_entity(anchor).expect("anchor").body.position();
        assert_eq!(anchor_pos, Vec3::ZERO);
        assert!((distance_between(&world, anchor, light) - 10.0).abs() < EPSILON);
    }

    #[test]
    fn coincident_centers_get_a_deterministic_nudge() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(4.0, 1.0, 0.0);
        let a = spawn_body(&mut world, Vec3::new(1.0, 1.0, 0.0), shell);
        let b = spawn_body(&mut world, Vec3::new(1.0, 1.0, 0.0), shell);
        world.apply_pending();

        for _ in 0..50 {
            world.resolve_collisions();
        }
        assert!((distance_between(&world, a, b) - 8.0).abs() < EPSILON);
    }

    #[test]
    fn no_pair_closer_than_radius_sum_after_convergence() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(3.0, 1.0, 0.0);
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(spawn_body(
                &mut world,
                Vec3::new(i as f32 * 0.5, 0.1 * i as f32, 0.0),
                shell,
            ));
        }
        world.apply_pending();

        for _ in 0..400 {
            world.resolve_collisions();
        }

        for (index, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(index + 1) {
                assert!(distance_between(&world, *a, *b) >= 6.0 - 0.01);
            }
        }
    }

    #[test]
    fn separated_bodies_are_untouched() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(1.0, 1.0, 0.0);
        let a = spawn_body(&mut world, Vec3::ZERO, shell);
        let b = spawn_body(&mut world, Vec3::new(10.0, 0.0, 0.0), shell);
        world.apply_pending();

        world.resolve_collisions();
        assert_eq!(
            world.find_entity(a).expect("a").body.position(),
            Vec3::ZERO
        );
        assert_eq!(
            world.find_entity(b).expect("b").body.position(),
            Vec3::new(10.0, 0.0, 0.0)
        );
    }

    #[test]
    fn bodies_of_despawned_entities_are_purged_after_the_pass() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(1.0, 1.0, 0.0);
        let keep = spawn_body(&mut world, Vec3::ZERO, shell);
        let doomed = spawn_body(&mut world, Vec3::new(0.5, 0.0, 0.0), shell);
        world.apply_pending();
        assert_eq!(world.collision_body_count(), 2);

        world.remove(doomed);
        world.apply_pending();
        world.resolve_collisions();
        assert_eq!(world.collision_body_count(), 1);

        let _ = keep;
    }

    #[test]
    fn unregister_keeps_the_entity_but_drops_its_shell() {
        let mut world = SceneWorld::default();
        let shell = CollisionBody::new(5.0, 1.0, 0.0);
        let a = spawn_body(&mut world, Vec3::ZERO, shell);
        let b = spawn_body(&mut world, Vec3::new(1.0, 0.0, 0.0), shell);
        world.apply_pending();

        world.unregister_collision(b);
        world.resolve_collisions();
        world.resolve_collisions();

        // Only the still-registered body could have been pushed, and with
        // its partner gone nothing moves at all.
        assert_eq!(world.collision_body_count(), 1);
        assert!(world.find_entity(b).is_some());
        let _ = a;
    }
}
