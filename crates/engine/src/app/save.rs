use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::world::{ChunkKey, ChunkModification};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to write save file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read save file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode save state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode save file at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: [f32; 3],
    pub facing_degrees: f32,
    pub health: f32,
    pub resources: ResourceTally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceTally {
    pub wood: u32,
    pub stone: u32,
    pub fiber: u32,
}

/// Everything needed to rebuild a session: the generation seed, the player,
/// and the chunk modification overlay. Chunk features themselves are never
/// stored; they regenerate from the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub seed: u64,
    pub player: PlayerState,
    pub modified_chunks: Vec<(ChunkKey, ChunkModification)>,
}

impl SaveState {
    pub fn modified_chunk_map(&self) -> HashMap<ChunkKey, ChunkModification> {
        self.modified_chunks.iter().copied().collect()
    }
}

pub fn save_path(saves_dir: &Path, seed: u64) -> PathBuf {
    saves_dir.join(format!("world_{seed}.json"))
}

pub fn write_save(path: &Path, state: &SaveState) -> Result<(), SaveError> {
    let text = serde_json::to_string_pretty(state).map_err(SaveError::Encode)?;
    write_text_atomic(path, &text).map_err(|source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        seed = state.seed,
        modified_chunks = state.modified_chunks.len(),
        "save_written"
    );
    Ok(())
}

/// `Ok(None)` when no save exists at `path`; any other failure is an error.
pub fn read_save(path: &Path) -> Result<Option<SaveState>, SaveError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SaveError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let state = serde_json::from_str(&text).map_err(|source| SaveError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(state))
}

/// Write-to-temp-then-rename so a crash mid-write never leaves a truncated
/// save in place of a good one.
fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, text)?;
    replace_file(&tmp_path, path)
}

fn replace_file(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    match fs::remove_file(final_path) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(tmp_path);
            return Err(error);
        }
    }

    if let Err(error) = fs::rename(tmp_path, final_path) {
        let _ = fs::remove_file(tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("save.tmp");
    let tmp_name = format!("{file_name}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(seed: u64) -> SaveState {
        SaveState {
            seed,
            player: PlayerState {
                position: [3.5, -2.0, 0.0],
                facing_degrees: 90.0,
                health: 80.0,
                resources: ResourceTally {
                    wood: 4,
                    stone: 1,
                    fiber: 0,
                },
            },
            modified_chunks: vec![
                (ChunkKey { x: 0, y: 0 }, ChunkModification::Cleared),
                (ChunkKey { x: -3, y: 7 }, ChunkModification::Cleared),
            ],
        }
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_path(dir.path(), 42);
        let state = sample_state(42);

        write_save(&path, &state).expect("write");
        let loaded = read_save(&path).expect("read").expect("present");
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_save_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_path(dir.path(), 7);
        assert!(read_save(&path).expect("read").is_none());
    }

    #[test]
    fn corrupt_save_surfaces_a_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_path(dir.path(), 9);
        fs::write(&path, "{ not json").expect("write corrupt");

        assert!(matches!(read_save(&path), Err(SaveError::Decode { .. })));
    }

    #[test]
    fn rewrite_replaces_the_previous_save_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_path(dir.path(), 42);

        write_save(&path, &sample_state(42)).expect("first write");
        let mut updated = sample_state(42);
        updated.player.resources.wood = 99;
        write_save(&path, &updated).expect("second write");

        let loaded = read_save(&path).expect("read").expect("present");
        assert_eq!(loaded.player.resources.wood, 99);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_path_encodes_the_seed() {
        let path = save_path(Path::new("saves"), 1234);
        assert_eq!(path, Path::new("saves/world_1234.json"));
    }

    #[test]
    fn modified_chunk_map_preserves_all_entries() {
        let state = sample_state(1);
        let map = state.modified_chunk_map();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&ChunkKey { x: -3, y: 7 }),
            Some(&ChunkModification::Cleared)
        );
    }
}
