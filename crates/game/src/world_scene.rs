use std::collections::HashMap;
use std::path::PathBuf;

use engine::{
    chunk_center_world, chunk_of_position, read_save, save_path, write_save, ChunkKey,
    ChunkModification, CollisionBody, EntityId, EntityKind, Feature, FeatureKind, InputAction,
    InputSnapshot, PhysicsBody, PlayerState, RenderLayer, RenderableKind, ResourceTally, SaveState,
    Scene, SceneCommand, SceneWorld, StackAssetSpec, Vec3, WorldStream,
};
use tracing::{info, warn};

pub const DEFAULT_SEED: u64 = 1;

const STREAM_RADIUS_CHUNKS: i32 = 6;
const PLAYER_MAX_SPEED: f32 = 1.6;
const PLAYER_MAX_ACCEL: f32 = 0.4;
const PLAYER_COLLISION_RADIUS: f32 = 0.5;
const PLAYER_MAX_HEALTH: f32 = 100.0;
const HEALTH_REGEN_PER_SECOND: f32 = 0.5;
const HARVEST_RADIUS: f32 = 3.0;
const CAMERA_ROTATE_DEGREES_PER_SECOND: f32 = 90.0;

const PLAYER_STACK_KEY: &str = "actors/villager";
const PLAYER_LAYER_COUNT: u32 = 8;

/// What a chunk feature yields when harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HarvestYield {
    Wood(u32),
    Stone(u32),
    Fiber(u32),
}

/// Capability table entry for one feature kind: how it is drawn, whether it
/// blocks movement, and what harvesting it grants.
struct FeatureSpec {
    stack_key: &'static str,
    layer_count: u32,
    collision_radius: Option<f32>,
    harvest: Option<HarvestYield>,
}

fn feature_spec(kind: FeatureKind) -> Option<&'static FeatureSpec> {
    match kind {
        FeatureKind::Empty => None,
        FeatureKind::Tree => Some(&FeatureSpec {
            stack_key: "props/tree",
            layer_count: 12,
            collision_radius: Some(0.9),
            harvest: Some(HarvestYield::Wood(2)),
        }),
        FeatureKind::Rock => Some(&FeatureSpec {
            stack_key: "props/rock",
            layer_count: 6,
            collision_radius: Some(0.7),
            harvest: Some(HarvestYield::Stone(1)),
        }),
        FeatureKind::Bush => Some(&FeatureSpec {
            stack_key: "props/bush",
            layer_count: 5,
            collision_radius: None,
            harvest: Some(HarvestYield::Fiber(1)),
        }),
    }
}

/// Every stack sheet the app loads up front.
pub fn stack_asset_specs() -> Vec<StackAssetSpec> {
    let mut specs = vec![StackAssetSpec::new(PLAYER_STACK_KEY, PLAYER_LAYER_COUNT)];
    for kind in [FeatureKind::Tree, FeatureKind::Rock, FeatureKind::Bush] {
        if let Some(spec) = feature_spec(kind) {
            specs.push(StackAssetSpec::new(spec.stack_key, spec.layer_count));
        }
    }
    specs
}

/// The playable overworld: a streamed chunk window around the player, a
/// following camera, and harvestable features.
pub struct WorldScene {
    seed: u64,
    saves_dir: PathBuf,
    stream: WorldStream,
    player_id: Option<EntityId>,
    chunk_entities: HashMap<ChunkKey, EntityId>,
    camera_rotation_target: f32,
    health: f32,
    resources: ResourceTally,
    restore: Option<SaveState>,
}

impl WorldScene {
    pub fn new(seed: u64, saves_dir: PathBuf) -> Self {
        Self {
            seed,
            saves_dir,
            stream: WorldStream::new(seed, STREAM_RADIUS_CHUNKS),
            player_id: None,
            chunk_entities: HashMap::new(),
            camera_rotation_target: 0.0,
            health: PLAYER_MAX_HEALTH,
            resources: ResourceTally::default(),
            restore: None,
        }
    }

    /// Resumes a previous session from its save state.
    pub fn restored(save: SaveState, saves_dir: PathBuf) -> Self {
        let mut scene = Self::new(save.seed, saves_dir);
        scene.restore = Some(save);
        scene
    }

    fn spawn_player(&mut self, world: &mut SceneWorld, position: Vec3, facing_degrees: f32) {
        let mut body = PhysicsBody::new(position)
            .with_max_speed(PLAYER_MAX_SPEED)
            .with_max_accel(PLAYER_MAX_ACCEL)
            .with_face_velocity(true);
        body.set_facing_degrees(facing_degrees);
        let id = world.spawn(
            EntityKind::Player,
            RenderLayer::Objects,
            body,
            RenderableKind::Stack {
                key: PLAYER_STACK_KEY.to_string(),
            },
        );
        world.register_collision(id, CollisionBody::new(PLAYER_COLLISION_RADIUS, 0.0, 0.0));
        self.player_id = Some(id);
    }

    fn spawn_feature(&mut self, world: &mut SceneWorld, key: ChunkKey, feature: Feature) {
        let Some(spec) = feature_spec(feature.kind) else {
            return;
        };
        let mut body =
            PhysicsBody::new(feature_position(key, feature.variant)).with_friction(false);
        body.set_facing_degrees(feature.rotation_degrees);
        let id = world.spawn(
            EntityKind::Feature,
            RenderLayer::Objects,
            body,
            RenderableKind::Stack {
                key: spec.stack_key.to_string(),
            },
        );
        if let Some(radius) = spec.collision_radius {
            world.register_collision(id, CollisionBody::immovable(radius));
        }
        self.chunk_entities.insert(key, id);
    }

    fn despawn_chunk(&mut self, world: &mut SceneWorld, key: ChunkKey) {
        if let Some(id) = self.chunk_entities.remove(&key) {
            world.unregister_collision(id);
            world.remove(id);
        }
    }

    /// Recenters the stream on the player's chunk and mirrors the window
    /// diff into the entity world.
    fn sync_stream(&mut self, world: &mut SceneWorld) {
        let Some(player_position) = self.player_position(world) else {
            return;
        };
        let center = chunk_of_position(player_position);
        let Some(diff) = self.stream.set_center(center) else {
            return;
        };
        for key in diff.left {
            self.despawn_chunk(world, key);
        }
        for (key, feature) in diff.entered {
            self.spawn_feature(world, key, feature);
        }
    }

    fn player_position(&self, world: &SceneWorld) -> Option<Vec3> {
        let id = self.player_id?;
        world.find_entity(id).map(|entity| entity.body.position())
    }

    /// Harvests the closest harvestable feature within reach. Returns false
    /// when nothing is in range.
    fn harvest_nearest(&mut self, world: &mut SceneWorld) -> bool {
        let Some(player_position) = self.player_position(world) else {
            return false;
        };

        let mut best: Option<(ChunkKey, f32, HarvestYield)> = None;
        for (key, id) in &self.chunk_entities {
            let Some(entity) = world.find_entity(*id) else {
                continue;
            };
            let feature = self.stream.feature_at(*key);
            let Some(harvest) = feature_spec(feature.kind).and_then(|spec| spec.harvest) else {
                continue;
            };
            let distance = (entity.body.position() - player_position).horizontal_length();
            if distance > HARVEST_RADIUS {
                continue;
            }
            if best.map(|(_, best_distance, _)| distance < best_distance).unwrap_or(true) {
                best = Some((*key, distance, harvest));
            }
        }

        let Some((key, _, harvest)) = best else {
            return false;
        };
        match harvest {
            HarvestYield::Wood(amount) => self.resources.wood += amount,
            HarvestYield::Stone(amount) => self.resources.stone += amount,
            HarvestYield::Fiber(amount) => self.resources.fiber += amount,
        }
        self.despawn_chunk(world, key);
        self.stream.mark_modified(key, ChunkModification::Cleared);
        info!(
            chunk_x = key.x,
            chunk_y = key.y,
            wood = self.resources.wood,
            stone = self.resources.stone,
            fiber = self.resources.fiber,
            "feature_harvested"
        );
        true
    }

    fn save_to_disk(&self, world: &SceneWorld) {
        let Some(state) = self.capture_save(world) else {
            return;
        };
        let path = save_path(&self.saves_dir, self.seed);
        if let Err(error) = write_save(&path, &state) {
            warn!(error = %error, "manual_save_failed");
        }
    }

    /// Reloads the session from disk, rebuilding the stream window and the
    /// player from the stored state.
    fn load_from_disk(&mut self, world: &mut SceneWorld) {
        let path = save_path(&self.saves_dir, self.seed);
        let state = match read_save(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!(path = %path.display(), "no_save_to_load");
                return;
            }
            Err(error) => {
                warn!(error = %error, "manual_load_failed");
                return;
            }
        };

        let keys: Vec<ChunkKey> = self.chunk_entities.keys().copied().collect();
        for key in keys {
            self.despawn_chunk(world, key);
        }
        self.stream = WorldStream::new(state.seed, STREAM_RADIUS_CHUNKS);
        self.stream.restore_modified(state.modified_chunk_map());
        self.seed = state.seed;
        self.apply_player_state(world, &state.player);
        self.sync_stream(world);
        info!(seed = state.seed, "session_loaded");
    }

    fn apply_player_state(&mut self, world: &mut SceneWorld, player: &PlayerState) {
        self.health = player.health;
        self.resources = player.resources;
        let position = Vec3::new(player.position[0], player.position[1], player.position[2]);
        if let Some(id) = self.player_id {
            if let Some(entity) = world.find_entity_mut(id) {
                entity.body.set_position(position);
                entity.body.set_facing_degrees(player.facing_degrees);
            }
        }
        self.camera_rotation_target = player.facing_degrees;
        let zoom = world.camera().zoom();
        world
            .camera_mut()
            .reset_to(position, player.facing_degrees, zoom);
    }
}

impl Scene for WorldScene {
    fn load(&mut self, world: &mut SceneWorld) {
        let restore = self.restore.take();
        let (position, facing) = restore
            .as_ref()
            .map(|state| {
                (
                    Vec3::new(
                        state.player.position[0],
                        state.player.position[1],
                        state.player.position[2],
                    ),
                    state.player.facing_degrees,
                )
            })
            .unwrap_or((Vec3::ZERO, 0.0));

        self.spawn_player(world, position, facing);
        world.apply_pending();
        if let Some(state) = restore {
            self.stream.restore_modified(state.modified_chunk_map());
            self.apply_player_state(world, &state.player);
        } else {
            let zoom = world.camera().zoom();
            world.camera_mut().reset_to(position, facing, zoom);
        }
        self.sync_stream(world);
        world.apply_pending();
        info!(
            seed = self.seed,
            entity_count = world.entity_count(),
            "world_scene_loaded"
        );
    }

    fn update(
        &mut self,
        fixed_dt_seconds: f32,
        input: &InputSnapshot,
        world: &mut SceneWorld,
    ) -> SceneCommand {
        if input.quit_requested() {
            return SceneCommand::Quit;
        }

        world
            .camera_mut()
            .apply_zoom_steps(input.zoom_delta_steps());

        if input.is_down(InputAction::RotateCameraLeft) {
            self.camera_rotation_target -= CAMERA_ROTATE_DEGREES_PER_SECOND * fixed_dt_seconds;
        }
        if input.is_down(InputAction::RotateCameraRight) {
            self.camera_rotation_target += CAMERA_ROTATE_DEGREES_PER_SECOND * fixed_dt_seconds;
        }

        let camera_rotation = world.camera().rotation_degrees();
        let direction = move_direction(input, camera_rotation);
        if let Some(id) = self.player_id {
            if let Some(entity) = world.find_entity_mut(id) {
                if direction.length() > 0.0 {
                    entity.body.accelerate(direction * PLAYER_MAX_ACCEL);
                }
            }
        }

        if input.interact_pressed() {
            self.harvest_nearest(world);
        }
        if input.save_pressed() {
            self.save_to_disk(world);
        }
        if input.load_pressed() {
            self.load_from_disk(world);
        }

        self.sync_stream(world);

        if let Some(position) = self.player_position(world) {
            world.camera_mut().target_position(position);
        }
        world.camera_mut().target_rotation(self.camera_rotation_target);

        self.health = (self.health + HEALTH_REGEN_PER_SECOND * fixed_dt_seconds)
            .min(PLAYER_MAX_HEALTH);

        SceneCommand::None
    }

    fn unload(&mut self, world: &mut SceneWorld) {
        info!(
            seed = self.seed,
            entity_count = world.entity_count(),
            "world_scene_unload"
        );
        let keys: Vec<ChunkKey> = self.chunk_entities.keys().copied().collect();
        for key in keys {
            self.despawn_chunk(world, key);
        }
        if let Some(id) = self.player_id.take() {
            world.unregister_collision(id);
            world.remove(id);
        }
    }

    fn capture_save(&self, world: &SceneWorld) -> Option<SaveState> {
        let id = self.player_id?;
        let entity = world.find_entity(id)?;
        let position = entity.body.position();
        Some(SaveState {
            seed: self.seed,
            player: PlayerState {
                position: [position.x, position.y, position.z],
                facing_degrees: entity.body.facing_degrees(),
                health: self.health,
                resources: self.resources,
            },
            modified_chunks: self
                .stream
                .modified_chunks()
                .iter()
                .map(|(key, modification)| (*key, *modification))
                .collect(),
        })
    }
}

/// Placement for a chunk's feature. The generated sub-variant nudges the
/// feature off the chunk center so the world does not read as a grid; the
/// offsets stay well inside the chunk.
fn feature_position(key: ChunkKey, variant: u8) -> Vec3 {
    const VARIANT_OFFSETS: [(f32, f32); 3] = [(0.0, 0.0), (-1.5, 1.0), (1.5, -1.0)];
    let (dx, dy) = VARIANT_OFFSETS[variant as usize % VARIANT_OFFSETS.len()];
    chunk_center_world(key) + Vec3::new(dx, dy, 0.0)
}

/// Screen-relative movement: "up" always moves away from the camera, so the
/// input axes rotate with the current camera rotation.
fn move_direction(input: &InputSnapshot, camera_rotation_degrees: f32) -> Vec3 {
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    if input.is_down(InputAction::MoveRight) {
        x += 1.0;
    }
    if input.is_down(InputAction::MoveLeft) {
        x -= 1.0;
    }
    if input.is_down(InputAction::MoveUp) {
        y += 1.0;
    }
    if input.is_down(InputAction::MoveDown) {
        y -= 1.0;
    }
    if x == 0.0 && y == 0.0 {
        return Vec3::ZERO;
    }

    let radians = camera_rotation_degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    Vec3::new(x * cos - y * sin, x * sin + y * cos, 0.0).normalized_or_zero()
}
