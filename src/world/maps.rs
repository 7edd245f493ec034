//! Map asset loading
//!
//! Maps are Tiled JSON documents. Each one is hashed, its collision layers are
//! compressed into an [`RleMask`], and the mask is decoded once into the grid
//! the movement engine consults. Everything here is immutable after startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::collision::{CodecError, CollisionGrid, RleMask, TileLayer};

/// Tile size used when a map does not declare one
pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Raw map document plus its content hash
#[derive(Debug, Clone)]
pub struct MapAsset {
    /// Map name without the `.json` suffix
    pub name: String,
    pub raw_data: Arc<serde_json::Value>,
    /// SHA-256 of the serialized document, hex encoded
    pub content_hash: String,
}

/// A fully prepared map
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub asset: MapAsset,
    pub collision: RleMask,
    pub grid: CollisionGrid,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl LoadedMap {
    /// Prepare a map from its parsed document
    pub fn from_document(name: &str, raw: serde_json::Value) -> Result<Self, MapLoadError> {
        let document: TiledMap = serde_json::from_value(raw.clone())
            .map_err(|e| MapLoadError::Parse(name.to_string(), e))?;

        let first = document
            .layers
            .first()
            .ok_or_else(|| MapLoadError::NoLayers(name.to_string()))?;
        let width = first.width.or(document.width).unwrap_or(0);
        let height = first.height.or(document.height).unwrap_or(0);

        let grid = CollisionGrid::from_layers(width, height, &document.layers)
            .map_err(|e| MapLoadError::Codec(name.to_string(), e))?;
        let collision = grid
            .compress()
            .map_err(|e| MapLoadError::Codec(name.to_string(), e))?;

        let raw_len = grid.raw_len();
        let encoded_len = collision.byte_len();
        info!(
            map = %name,
            raw_bytes = raw_len,
            compressed_bytes = encoded_len,
            ratio = raw_len as f64 / encoded_len as f64,
            "Generated compressed collision map"
        );

        // The cached grid is the one reconstructed from the persisted form
        let grid = collision
            .decode()
            .map_err(|e| MapLoadError::Codec(name.to_string(), e))?;

        let content_hash = hex::encode(Sha256::digest(raw.to_string().as_bytes()));

        Ok(Self {
            asset: MapAsset {
                name: name.to_string(),
                raw_data: Arc::new(raw),
                content_hash,
            },
            collision,
            grid,
            tile_width: document.tilewidth.unwrap_or(DEFAULT_TILE_SIZE).max(1),
            tile_height: document.tileheight.unwrap_or(DEFAULT_TILE_SIZE).max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.asset.name
    }
}

/// Every map that loaded successfully, keyed by name
#[derive(Debug, Default)]
pub struct MapRegistry {
    maps: HashMap<String, Arc<LoadedMap>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` map under `dir`.
    ///
    /// Files that fail to parse or fail the compression gate are logged and
    /// skipped; they never abort the other maps.
    pub fn load_dir(dir: &Path) -> Result<Self, MapLoadError> {
        let mut registry = Self::new();
        if !dir.exists() {
            warn!(dir = %dir.display(), "Map directory does not exist");
            return Ok(registry);
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| MapLoadError::Io(dir.to_path_buf(), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            match load_file(&path) {
                Ok(map) => {
                    debug!(map = %map.name(), hash = %map.asset.content_hash, "Loaded map");
                    registry.insert(map);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load map");
                }
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, map: LoadedMap) {
        self.maps.insert(map.name().to_string(), Arc::new(map));
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedMap>> {
        self.maps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.maps.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

fn load_file(path: &Path) -> Result<LoadedMap, MapLoadError> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| MapLoadError::Io(path.to_path_buf(), std::io::ErrorKind::InvalidInput.into()))?
        .to_string();
    let text =
        std::fs::read_to_string(path).map_err(|e| MapLoadError::Io(path.to_path_buf(), e))?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| MapLoadError::Parse(name.clone(), e))?;
    LoadedMap::from_document(&name, raw)
}

/// The subset of a Tiled map document the server reads
#[derive(Debug, Deserialize)]
struct TiledMap {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    tilewidth: Option<u32>,
    #[serde(default)]
    tileheight: Option<u32>,
    #[serde(default)]
    layers: Vec<TileLayer>,
}

/// Map loading errors
#[derive(Debug, thiserror::Error)]
pub enum MapLoadError {
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Failed to parse map {0}: {1}")]
    Parse(String, serde_json::Error),

    #[error("Map {0} has no layers")]
    NoLayers(String),

    #[error("Collision map for {0} rejected: {1}")]
    Codec(String, CodecError),
}


#[cfg(test)]
mod tests {
    use super::test_maps::map_with_walls;
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_document_and_caches_decoded_grid() {
        let map = map_with_walls("main", 10, 10, &[(3, 4)]);
        assert_eq!(map.name(), "main");
        assert_eq!(map.grid.get(3, 4), Some(true));
        assert_eq!(map.grid.get(4, 4), Some(false));
        assert_eq!(map.collision.decode().unwrap(), map.grid);
        assert_eq!(map.asset.content_hash.len(), 64);
        assert_eq!(map.tile_width, 32);
    }

    #[test]
    fn identical_documents_hash_identically() {
        let a = map_with_walls("a", 10, 10, &[]);
        let b = map_with_walls("b", 10, 10, &[]);
        let c = map_with_walls("c", 10, 10, &[(0, 0)]);
        assert_eq!(a.asset.content_hash, b.asset.content_hash);
        assert_ne!(a.asset.content_hash, c.asset.content_hash);
    }

    #[test]
    fn incompressible_map_is_rejected() {
        let data: Vec<u32> = (0..16).map(|i| i % 2).collect();
        let document = json!({
            "layers": [{ "name": "walls", "width": 4, "height": 4, "data": data,
                         "properties": [{ "name": "collision", "value": true }] }]
        });
        let err = LoadedMap::from_document("checker", document).unwrap_err();
        assert!(matches!(
            err,
            MapLoadError::Codec(_, CodecError::Incompressible { .. })
        ));
    }

    #[test]
    fn map_without_layers_is_rejected() {
        let err = LoadedMap::from_document("void", json!({ "layers": [] })).unwrap_err();
        assert!(matches!(err, MapLoadError::NoLayers(_)));
    }

    #[test]
    fn load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = json!({
            "width": 8, "height": 8,
            "layers": [{ "name": "ground", "data": vec![1u32; 64] }]
        });
        std::fs::write(dir.path().join("main.json"), good.to_string()).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = MapRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("main"));
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn missing_dir_yields_empty_registry() {
        let registry = MapRegistry::load_dir(Path::new("/definitely/not/here")).unwrap();
        assert!(registry.is_empty());
    }
}
