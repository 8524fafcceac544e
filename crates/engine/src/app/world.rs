use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::math::Vec3;

/// Edge length of one chunk in world units.
pub const CHUNK_SIZE_WORLD: f32 = 8.0;

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub y: i32,
}

impl ChunkKey {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Empty,
    Tree,
    Rock,
    Bush,
}

/// One generated chunk content. For a fixed (seed, key) the instance is
/// always identical, sub-variant parameters included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub kind: FeatureKind,
    pub rotation_degrees: f32,
    pub variant: u8,
}

impl Feature {
    pub const EMPTY: Self = Self {
        kind: FeatureKind::Empty,
        rotation_degrees: 0.0,
        variant: 0,
    };
}

/// Persistent, chunk-local world edit. Applied as an overlay after the
/// deterministic base generation; neighbours are never perturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkModification {
    /// The feature was harvested/destroyed; the chunk regenerates empty.
    Cleared,
}

impl ChunkModification {
    fn apply(self, feature: &mut Feature) {
        match self {
            ChunkModification::Cleared => *feature = Feature::EMPTY,
        }
    }
}

/// Chunks entering and leaving the streaming window after a recenter.
#[derive(Debug, Clone, Default)]
pub struct WindowDiff {
    pub entered: Vec<(ChunkKey, Feature)>,
    pub left: Vec<ChunkKey>,
}

/// Deterministic chunk streamer. Content is a pure function of
/// (seed, chunk key); the streaming window is a square of `radius` chunks
/// around the current center, recomputed whenever the center changes.
pub struct WorldStream {
    seed: u64,
    radius: i32,
    center: Option<ChunkKey>,
    window: HashMap<ChunkKey, Feature>,
    modified: HashMap<ChunkKey, ChunkModification>,
}

impl WorldStream {
    pub fn new(seed: u64, radius: i32) -> Self {
        Self {
            seed,
            radius: radius.max(0),
            center: None,
            window: HashMap::new(),
            modified: HashMap::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn center(&self) -> Option<ChunkKey> {
        self.center
    }

    pub fn window(&self) -> &HashMap<ChunkKey, Feature> {
        &self.window
    }

    /// Recomputes the window around `center`. `None` when the center did
    /// not change; otherwise the spawn/despawn diff against the previous
    /// window. Chunks that leave remain re-derivable; chunks that enter are
    /// regenerated (with any recorded modification re-applied).
    pub fn set_center(&mut self, center: ChunkKey) -> Option<WindowDiff> {
        if self.center == Some(center) {
            return None;
        }
        self.center = Some(center);

        let mut diff = WindowDiff::default();
        self.window.retain(|key, _| {
            let keep = chunk_in_window(center, *key, self.radius);
            if !keep {
                diff.left.push(*key);
            }
            keep
        });

        for dy in -self.radius..=self.radius {
            for dx in -self.radius..=self.radius {
                let key = ChunkKey::new(center.x + dx, center.y + dy);
                if self.window.contains_key(&key) {
                    continue;
                }
                let feature = self.feature_at(key);
                self.window.insert(key, feature);
                diff.entered.push((key, feature));
            }
        }

        debug!(
            center_x = center.x,
            center_y = center.y,
            entered = diff.entered.len(),
            left = diff.left.len(),
            "stream_window_recentered"
        );
        Some(diff)
    }

    /// Deterministic content of a chunk, modification overlay included.
    /// Pure in (seed, key, modified set); does not touch the window.
    pub fn feature_at(&self, key: ChunkKey) -> Feature {
        let mut feature = generate_feature(self.seed, key);
        if let Some(modification) = self.modified.get(&key) {
            modification.apply(&mut feature);
        }
        feature
    }

    /// Records a persistent chunk edit and refreshes the live window entry
    /// if the chunk is currently streamed in.
    pub fn mark_modified(&mut self, key: ChunkKey, modification: ChunkModification) {
        self.modified.insert(key, modification);
        if let Some(entry) = self.window.get_mut(&key) {
            modification.apply(entry);
        }
    }

    pub fn modified_chunks(&self) -> &HashMap<ChunkKey, ChunkModification> {
        &self.modified
    }

    /// Replaces the modification overlay wholesale (save-file restore).
    pub fn restore_modified(&mut self, modified: HashMap<ChunkKey, ChunkModification>) {
        self.modified = modified;
        let keys: Vec<ChunkKey> = self.window.keys().copied().collect();
        for key in keys {
            let feature = self.feature_at(key);
            self.window.insert(key, feature);
        }
    }
}

fn chunk_in_window(center: ChunkKey, key: ChunkKey, radius: i32) -> bool {
    (key.x - center.x).abs() <= radius && (key.y - center.y).abs() <= radius
}

/// Chunk containing a world position.
pub fn chunk_of_position(position: Vec3) -> ChunkKey {
    ChunkKey::new(
        (position.x / CHUNK_SIZE_WORLD).floor() as i32,
        (position.y / CHUNK_SIZE_WORLD).floor() as i32,
    )
}

/// World position of a chunk's center, on the ground plane.
pub fn chunk_center_world(key: ChunkKey) -> Vec3 {
    Vec3::new(
        (key.x as f32 + 0.5) * CHUNK_SIZE_WORLD,
        (key.y as f32 + 0.5) * CHUNK_SIZE_WORLD,
        0.0,
    )
}

/// Per-chunk generator seeded purely from (seed, key): zigzag both
/// coordinates, pair them Szudzik-style into one integer, mix with the
/// world seed. Never seeded from wall-clock time.
fn chunk_rng(seed: u64, key: ChunkKey) -> StdRng {
    let paired = szudzik_pair(zigzag(key.x), zigzag(key.y));
    StdRng::seed_from_u64(seed ^ paired.wrapping_mul(SEED_MIX))
}

fn zigzag(value: i32) -> u64 {
    (((value << 1) ^ (value >> 31)) as u32) as u64
}

fn szudzik_pair(a: u64, b: u64) -> u64 {
    if a >= b {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    } else {
        b.wrapping_mul(b).wrapping_add(a)
    }
}

// Weighted feature table, first draw of the per-chunk generator.
const EMPTY_WEIGHT: u32 = 60;
const TREE_WEIGHT: u32 = 20;
const ROCK_WEIGHT: u32 = 12;
const BUSH_WEIGHT: u32 = 8;
const WEIGHT_TOTAL: u32 = EMPTY_WEIGHT + TREE_WEIGHT + ROCK_WEIGHT + BUSH_WEIGHT;

fn generate_feature(seed: u64, key: ChunkKey) -> Feature {
    let mut rng = chunk_rng(seed, key);
    let roll = rng.gen_range(0..WEIGHT_TOTAL);
    let kind = if roll < EMPTY_WEIGHT {
        FeatureKind::Empty
    } else if roll < EMPTY_WEIGHT + TREE_WEIGHT {
        FeatureKind::Tree
    } else if roll < EMPTY_WEIGHT + TREE_WEIGHT + ROCK_WEIGHT {
        FeatureKind::Rock
    } else {
        FeatureKind::Bush
    };
    if kind == FeatureKind::Empty {
        return Feature::EMPTY;
    }

    // Sub-variant draws come from the same per-chunk generator so the
    // identical chunk key always reproduces the identical instance.
    let rotation_degrees = rng.gen_range(0.0..360.0);
    let variant = rng.gen_range(0..3u8);
    Feature {
        kind,
        rotation_degrees,
        variant,
    }
}
