use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;
use tracing::{debug, info};

use super::{validate_asset_key, LayeredSprite, RotationCache, StackError};

/// One stack asset to load: the library key (also the sheet path relative to
/// the stacks directory, without extension) and how many layers the sheet
/// holds.
#[derive(Debug, Clone)]
pub struct StackAssetSpec {
    pub key: String,
    pub layer_count: u32,
}

impl StackAssetSpec {
    pub fn new(key: impl Into<String>, layer_count: u32) -> Self {
        Self {
            key: key.into(),
            layer_count,
        }
    }
}

/// All rotation caches for the running app, keyed by asset key. Built once
/// during the load phase; read-only afterwards.
#[derive(Debug, Default)]
pub struct StackLibrary {
    caches: HashMap<String, RotationCache>,
}

impl StackLibrary {
    pub fn get(&self, key: &str) -> Option<&RotationCache> {
        self.caches.get(key)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("stack asset worker panicked while building rotation caches")]
    WorkerPanicked,
    #[error(transparent)]
    Stack(#[from] StackError),
}

#[derive(Default)]
struct LoadProgressState {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicBool,
    finished: AtomicBool,
}

/// Cloneable handle the loading screen polls while workers fill the library
/// on other threads.
#[derive(Clone, Default)]
pub struct LoadProgressHandle {
    state: Arc<LoadProgressState>,
}

impl LoadProgressHandle {
    pub fn total(&self) -> usize {
        self.state.total.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::Relaxed)
    }

    pub fn has_failed(&self) -> bool {
        self.state.failed.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Relaxed)
    }

    fn begin(&self, total: usize) {
        self.state.total.store(total, Ordering::Relaxed);
        self.state.completed.store(0, Ordering::Relaxed);
        self.state.failed.store(false, Ordering::Relaxed);
        self.state.finished.store(false, Ordering::Relaxed);
    }

    fn mark_completed(&self) {
        self.state.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_failed(&self) {
        self.state.failed.store(true, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.state.finished.store(true, Ordering::Relaxed);
    }
}

/// Builds rotation caches for every spec using a bounded worker pool.
/// Workers pull indexes from a shared cursor; the first failure raises an
/// abort flag so the remaining workers wind down instead of loading assets
/// nobody will use. A panicked worker surfaces as `LoadError::WorkerPanicked`
/// rather than a hang.
pub fn load_stack_library(
    stacks_dir: &Path,
    specs: &[StackAssetSpec],
    progress: &LoadProgressHandle,
) -> Result<StackLibrary, LoadError> {
    progress.begin(specs.len());

    for spec in specs {
        if let Err(error) = validate_asset_key(&spec.key) {
            progress.mark_failed();
            progress.finish();
            return Err(error.into());
        }
    }

    let worker_count = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(specs.len().max(1));
    let cursor = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let results: Mutex<Vec<(String, Result<RotationCache, StackError>)>> =
        Mutex::new(Vec::with_capacity(specs.len()));

    let mut panicked = false;
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            handles.push(scope.spawn(|| {
                loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(spec) = specs.get(index) else {
                        break;
                    };

                    let outcome = build_one(stacks_dir, spec);
                    match &outcome {
                        Ok(_) => progress.mark_completed(),
                        Err(_) => {
                            progress.mark_failed();
                            abort.store(true, Ordering::Relaxed);
                        }
                    }
                    if let Ok(mut guard) = results.lock() {
                        guard.push((spec.key.clone(), outcome));
                    }
                }
            }));
        }
        for handle in handles {
            if handle.join().is_err() {
                panicked = true;
            }
        }
    });
    progress.finish();

    if panicked {
        progress.mark_failed();
        return Err(LoadError::WorkerPanicked);
    }

    let collected = match results.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut library = StackLibrary::default();
    for (key, outcome) in collected {
        let cache = outcome?;
        debug!(key = key.as_str(), "stack_cache_built");
        library.caches.insert(key, cache);
    }

    info!(
        assets = library.len(),
        workers = worker_count,
        "stack_library_loaded"
    );
    Ok(library)
}

fn build_one(stacks_dir: &Path, spec: &StackAssetSpec) -> Result<RotationCache, StackError> {
    let path = sheet_path(stacks_dir, &spec.key);
    let sprite = LayeredSprite::load(&path, spec.layer_count)?;
    Ok(RotationCache::build(&sprite))
}

fn sheet_path(stacks_dir: &Path, key: &str) -> PathBuf {
    let mut path = stacks_dir.to_path_buf();
    for part in key.split('/') {
        path.push(part);
    }
    path.set_extension("png");
    path
}
