mod world_scene;

use std::time::Duration;

use engine::{read_save, resolve_app_paths, run_app, save_path, LoopConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use world_scene::{stack_asset_specs, WorldScene, DEFAULT_SEED};

const SEED_ENV_VAR: &str = "STACKVALE_SEED";
const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(120);

fn main() {
    init_tracing();
    info!("=== Stackvale Startup ===");

    let seed = seed_from_env();
    let scene = match bootstrap_scene(seed) {
        Ok(scene) => scene,
        Err(error) => {
            error!(error = %error, "startup_failed");
            std::process::exit(1);
        }
    };

    let config = LoopConfig {
        window_title: "Stackvale".to_string(),
        autosave_interval: Some(AUTOSAVE_INTERVAL),
        stack_assets: stack_asset_specs(),
        ..LoopConfig::default()
    };

    if let Err(error) = run_app(config, Box::new(scene)) {
        error!(error = %error, "app_exited_with_error");
        std::process::exit(1);
    }
    info!("=== Stackvale Shutdown ===");
}

/// Resolves the app paths and resumes the save for this seed when one
/// exists. An unreadable save is logged and skipped, not fatal.
fn bootstrap_scene(seed: u64) -> Result<WorldScene, engine::StartupError> {
    let paths = resolve_app_paths()?;
    let path = save_path(&paths.saves_dir, seed);
    match read_save(&path) {
        Ok(Some(state)) => {
            info!(seed = state.seed, path = %path.display(), "resuming_saved_session");
            Ok(WorldScene::restored(state, paths.saves_dir))
        }
        Ok(None) => {
            info!(seed, "starting_fresh_session");
            Ok(WorldScene::new(seed, paths.saves_dir))
        }
        Err(error) => {
            warn!(error = %error, "save_unreadable_starting_fresh");
            Ok(WorldScene::new(seed, paths.saves_dir))
        }
    }
}

fn seed_from_env() -> u64 {
    match std::env::var(SEED_ENV_VAR) {
        Ok(raw) => match raw.trim().parse() {
            Ok(seed) => seed,
            Err(_) => {
                warn!(raw = raw.as_str(), "invalid_seed_env_using_default");
                DEFAULT_SEED
            }
        },
        Err(_) => DEFAULT_SEED,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
