use std::collections::HashMap;

use super::camera::Camera;
use super::collision::{CollisionBody, CollisionSolver};
use super::input::InputSnapshot;
use super::math::Vec3;
use super::physics::PhysicsBody;
use super::save::SaveState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

/// Coarse entity categories used by the kind index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Feature,
    Creature,
    Effect,
}

/// Declared update and draw order, back to front. Later layers draw on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderLayer {
    GroundDecor,
    Objects,
    Overlay,
    Ui,
}

pub const LAYER_ORDER: [RenderLayer; 4] = [
    RenderLayer::GroundDecor,
    RenderLayer::Objects,
    RenderLayer::Overlay,
    RenderLayer::Ui,
];

impl RenderLayer {
    const fn index(self) -> usize {
        match self {
            RenderLayer::GroundDecor => 0,
            RenderLayer::Objects => 1,
            RenderLayer::Overlay => 2,
            RenderLayer::Ui => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderableKind {
    /// Pre-rendered sprite stack, drawn through the rotation cache.
    Stack { key: String },
    /// Simulated but not drawn.
    Hidden,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub layer: RenderLayer,
    pub body: PhysicsBody,
    pub renderable: RenderableKind,
    pub(crate) removed: bool,
}

impl Entity {
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

#[derive(Debug, Default)]
struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Entity storage and per-frame dispatch. Entities live in stable arena
/// slots and are indexed both by layer (update/draw order) and by kind
/// (queries). Removal only marks a tombstone; `apply_pending` is the one
/// purge point per frame, so iteration never invalidates mid-update.
#[derive(Default)]
pub struct SceneWorld {
    allocator: EntityIdAllocator,
    slots: Vec<Option<Entity>>,
    free_slots: Vec<usize>,
    slot_by_id: HashMap<u64, usize>,
    layer_members: [Vec<EntityId>; 4],
    pending_spawns: Vec<Entity>,
    camera: Camera,
    solver: CollisionSolver,
}

impl SceneWorld {
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        layer: RenderLayer,
        body: PhysicsBody,
        renderable: RenderableKind,
    ) -> EntityId {
        let id = self.allocator.allocate();
        self.pending_spawns.push(Entity {
            id,
            kind,
            layer,
            body,
            renderable,
            removed: false,
        });
        id
    }

    /// Marks the entity for removal at the next purge point. Returns false
    /// for ids that are unknown or already marked.
    pub fn remove(&mut self, id: EntityId) -> bool {
        if let Some(entity) = self.find_entity_mut(id) {
            if entity.removed {
                return false;
            }
            entity.removed = true;
            return true;
        }
        if let Some(pending) = self
            .pending_spawns
            .iter_mut()
            .find(|entity| entity.id == id && !entity.removed)
        {
            pending.removed = true;
            return true;
        }
        false
    }

    /// The fixed end-of-frame point: purges tombstones, then applies
    /// pending spawns into stable slots.
    pub fn apply_pending(&mut self) {
        for slot_index in 0..self.slots.len() {
            let purge = matches!(&self.slots[slot_index], Some(entity) if entity.removed);
            if !purge {
                continue;
            }
            if let Some(entity) = self.slots[slot_index].take() {
                self.slot_by_id.remove(&entity.id.0);
                self.layer_members[entity.layer.index()].retain(|member| *member != entity.id);
                self.free_slots.push(slot_index);
            }
        }

        let spawns: Vec<Entity> = self.pending_spawns.drain(..).collect();
        for entity in spawns {
            if entity.removed {
                continue;
            }
            let id = entity.id;
            let layer = entity.layer;
            let slot_index = match self.free_slots.pop() {
                Some(index) => {
                    self.slots[index] = Some(entity);
                    index
                }
                None => {
                    self.slots.push(Some(entity));
                    self.slots.len() - 1
                }
            };
            self.slot_by_id.insert(id.0, slot_index);
            self.layer_members[layer.index()].push(id);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.slot_by_id.clear();
        for members in &mut self.layer_members {
            members.clear();
        }
        self.pending_spawns.clear();
        self.camera = Camera::default();
        self.solver = CollisionSolver::default();
    }

    pub fn entity_count(&self) -> usize {
        self.slot_by_id.len()
    }

    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        let slot_index = *self.slot_by_id.get(&id.0)?;
        self.slots.get(slot_index)?.as_ref()
    }

    pub fn find_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot_index = *self.slot_by_id.get(&id.0)?;
        self.slots.get_mut(slot_index)?.as_mut()
    }

    /// Live (non-tombstoned) entities of one layer, in spawn order.
    pub fn by_layer(&self, layer: RenderLayer) -> impl Iterator<Item = &Entity> + '_ {
        self.layer_members[layer.index()]
            .iter()
            .filter_map(|id| self.find_entity(*id))
            .filter(|entity| !entity.removed)
    }

    pub fn by_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(move |entity| entity.kind == kind && !entity.removed)
    }

    /// Ids of every applied entity in layer order. Snapshot-safe: callers
    /// may remove entities while walking the returned list.
    pub fn entity_ids_in_layer_order(&self) -> Vec<EntityId> {
        LAYER_ORDER
            .iter()
            .flat_map(|layer| self.layer_members[layer.index()].iter().copied())
            .collect()
    }

    /// Live entities within `radius` of `center`, horizontal distance.
    pub fn entities_in_range(&self, center: Vec3, radius: f32) -> Vec<EntityId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|entity| !entity.removed)
            .filter(|entity| (entity.body.position() - center).horizontal_length() <= radius)
            .map(|entity| entity.id)
            .collect()
    }

    /// Like `entities_in_range`, restricted to stack-rendered entities.
    pub fn stacks_in_range(&self, center: Vec3, radius: f32) -> Vec<EntityId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|entity| !entity.removed)
            .filter(|entity| matches!(entity.renderable, RenderableKind::Stack { .. }))
            .filter(|entity| (entity.body.position() - center).horizontal_length() <= radius)
            .map(|entity| entity.id)
            .collect()
    }

    /// Advances every applied entity's physics body once, iterating layers
    /// in declared order. Tombstoned entities still tick; they disappear at
    /// the purge point, never mid-frame.
    pub fn update_bodies(&mut self) {
        for id in self.entity_ids_in_layer_order() {
            if let Some(entity) = self.find_entity_mut(id) {
                entity.body.update();
            }
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn register_collision(&mut self, id: EntityId, body: CollisionBody) {
        self.solver.register(id, body);
    }

    pub fn unregister_collision(&mut self, id: EntityId) {
        self.solver.unregister(id);
    }

    pub fn collision_body_count(&self) -> usize {
        self.solver.registered_count()
    }

    /// Runs one all-pairs separation pass over the registered bodies.
    pub fn resolve_collisions(&mut self) {
        let mut solver = std::mem::take(&mut self.solver);
        solver.update(self);
        self.solver = solver;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    None,
    Quit,
}

/// Seam between the engine loop and game content. The loop calls `update`
/// once per fixed tick, then body updates, collision, and the purge point,
/// in that order.
pub trait Scene {
    fn load(&mut self, world: &mut SceneWorld);
    fn update(
        &mut self,
        fixed_dt_seconds: f32,
        input: &InputSnapshot,
        world: &mut SceneWorld,
    ) -> SceneCommand;
    fn unload(&mut self, world: &mut SceneWorld);

    /// Snapshot of persistent state for autosave and shutdown saves. Scenes
    /// with nothing worth persisting keep the default.
    fn capture_save(&self, _world: &SceneWorld) -> Option<SaveState> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_at(world: &mut SceneWorld, kind: EntityKind, layer: RenderLayer, x: f32) -> EntityId {
        world.spawn(
            kind,
            layer,
            PhysicsBody::new(Vec3::new(x, 0.0, 0.0)),
            RenderableKind::Hidden,
        )
    }

    #[test]
    fn spawn_is_deferred_until_apply_pending() {
        let mut world = SceneWorld::default();
        let id = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        assert_eq!(world.entity_count(), 0);
        assert!(world.find_entity(id).is_none());

        world.apply_pending();
        assert_eq!(world.entity_count(), 1);
        assert!(world.find_entity(id).is_some());
    }

    #[test]
    fn remove_tombstones_and_purges_at_apply_pending() {
        let mut world = SceneWorld::default();
        let id = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        world.apply_pending();

        assert!(world.remove(id));
        assert!(!world.remove(id));
        // Tombstoned but still present until the purge point.
        assert!(world.find_entity(id).is_some());
        assert!(world.find_entity(id).map(Entity::is_removed).unwrap_or(false));

        world.apply_pending();
        assert!(world.find_entity(id).is_none());
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn removing_a_pending_spawn_cancels_it() {
        let mut world = SceneWorld::default();
        let id = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        assert!(world.remove(id));
        world.apply_pending();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn slots_are_reused_but_ids_never_are() {
        let mut world = SceneWorld::default();
        let first = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        world.apply_pending();
        world.remove(first);
        world.apply_pending();

        let second = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 1.0);
        world.apply_pending();
        assert_ne!(first, second);
        assert!(world.find_entity(first).is_none());
        assert!(world.find_entity(second).is_some());
    }

    #[test]
    fn by_layer_respects_declared_order_and_skips_tombstones() {
        let mut world = SceneWorld::default();
        let ground = spawn_at(&mut world, EntityKind::Feature, RenderLayer::GroundDecor, 0.0);
        let object = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 1.0);
        let overlay = spawn_at(&mut world, EntityKind::Effect, RenderLayer::Overlay, 2.0);
        world.apply_pending();

        let ordered = world.entity_ids_in_layer_order();
        assert_eq!(ordered, vec![ground, object, overlay]);

        world.remove(object);
        let visible: Vec<EntityId> = world
            .by_layer(RenderLayer::Objects)
            .map(|entity| entity.id)
            .collect();
        assert!(visible.is_empty());
    }

    #[test]
    fn by_kind_filters_on_kind() {
        let mut world = SceneWorld::default();
        spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        spawn_at(&mut world, EntityKind::Player, RenderLayer::Objects, 1.0);
        spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 2.0);
        world.apply_pending();

        assert_eq!(world.by_kind(EntityKind::Feature).count(), 2);
        assert_eq!(world.by_kind(EntityKind::Player).count(), 1);
        assert_eq!(world.by_kind(EntityKind::Creature).count(), 0);
    }

    #[test]
    fn entities_in_range_uses_horizontal_distance() {
        let mut world = SceneWorld::default();
        let near = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 3.0);
        let far = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 30.0);
        let tall = world.spawn(
            EntityKind::Feature,
            RenderLayer::Objects,
            PhysicsBody::new(Vec3::new(0.0, 0.0, 100.0)),
            RenderableKind::Hidden,
        );
        world.apply_pending();

        let found = world.entities_in_range(Vec3::ZERO, 5.0);
        assert!(found.contains(&near));
        assert!(!found.contains(&far));
        // Height is ignored by the contact/query plane.
        assert!(found.contains(&tall));
    }

    #[test]
    fn stacks_in_range_only_returns_stack_renderables() {
        let mut world = SceneWorld::default();
        let hidden = spawn_at(&mut world, EntityKind::Feature, RenderLayer::Objects, 0.0);
        let stack = world.spawn(
            EntityKind::Feature,
            RenderLayer::Objects,
            PhysicsBody::new(Vec3::new(1.0, 0.0, 0.0)),
            RenderableKind::Stack {
                key: "props/tree".to_string(),
            },
        );
        world.apply_pending();

        let found = world.stacks_in_range(Vec3::ZERO, 5.0);
        assert_eq!(found, vec![stack]);
        assert!(!found.contains(&hidden));
    }

    #[test]
    fn update_bodies_gives_every_entity_exactly_one_tick() {
        let mut world = SceneWorld::default();
        let mover = spawn_at(&mut world, EntityKind::Creature, RenderLayer::Objects, 0.0);
        let doomed = spawn_at(&mut world, EntityKind::Creature, RenderLayer::Objects, 5.0);
        world.apply_pending();

        if let Some(entity) = world.find_entity_mut(mover) {
            entity.body.apply_impulse(Vec3::new(1.0, 0.0, 0.0));
        }
        // Removing mid-frame must not skip anyone's tick.
        world.remove(doomed);
        if let Some(entity) = world.find_entity_mut(doomed) {
            entity.body.apply_impulse(Vec3::new(1.0, 0.0, 0.0));
        }
        world.update_bodies();

        let mover_x = world.find_entity(mover).expect("mover").body.position().x;
        let doomed_x = world.find_entity(doomed).expect("doomed").body.position().x;
        assert!(mover_x > 0.0);
        assert!(doomed_x > 5.0);

        world.apply_pending();
        assert!(world.find_entity(doomed).is_none());
    }
}
