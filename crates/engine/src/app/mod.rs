mod camera;
mod collision;
mod input;
mod loop_runner;
mod math;
mod physics;
mod rendering;
mod save;
mod scene;
mod stack;
mod world;

pub use camera::{
    screen_to_world_px, world_to_screen_px, Camera, CameraError, CAMERA_CLOSENESS_DEFAULT,
    CAMERA_ZOOM_DEFAULT, CAMERA_ZOOM_MAX, CAMERA_ZOOM_MIN, CAMERA_ZOOM_STEP,
};
pub use collision::{CollisionBody, CollisionSolver};
pub use input::{InputAction, InputSnapshot};
pub use loop_runner::{run_app, AppError, LoopConfig};
pub use math::{
    normalize_degrees, shortest_angle_delta_degrees, step_angle_toward_degrees, Vec2, Vec3,
};
pub use physics::{
    PhysicsBody, AIR_RESISTANCE_MAGNITUDE, FACING_TURN_STEP_DEGREES, FRICTION_MAGNITUDE,
    GRAVITY_PER_TICK,
};
pub use rendering::{Renderer, Viewport};
pub use save::{
    read_save, save_path, write_save, PlayerState, ResourceTally, SaveError, SaveState,
};
pub use scene::{
    Entity, EntityId, EntityKind, RenderLayer, RenderableKind, Scene, SceneCommand, SceneWorld,
    LAYER_ORDER,
};
pub use stack::{
    load_stack_library, LayeredSprite, LoadError, LoadProgressHandle, RotationCache, StackAssetSpec,
    StackError, StackLibrary, StackView, ANGLE_BUCKETS,
};
pub use world::{
    chunk_center_world, chunk_of_position, ChunkKey, ChunkModification, Feature, FeatureKind,
    WindowDiff, WorldStream, CHUNK_SIZE_WORLD,
};
