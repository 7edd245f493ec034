//! Collision grid construction and run-length codec
//!
//! Persisted form is a flat integer sequence `[width, height, v0, c0, v1, c1, ...]`
//! where every `v` is 0 or 1, consecutive values alternate, and the counts sum
//! to `width * height`.

use serde::Deserialize;

/// Boolean passability grid, row-major, `true` = impassable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionGrid {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl CollisionGrid {
    /// Build a grid from explicit cells
    pub fn new(width: u32, height: u32, cells: Vec<bool>) -> Result<Self, CodecError> {
        let expected = cell_count(width, height);
        if cells.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// An all-passable grid
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![false; cell_count(width, height)],
        }
    }

    /// Merge every collision-flagged layer by logical OR.
    ///
    /// A layer counts when any of its properties is named `collision`
    /// (case-insensitive) with the boolean value `true`. Any non-zero tile id
    /// in such a layer marks its cell impassable.
    pub fn from_layers(width: u32, height: u32, layers: &[TileLayer]) -> Result<Self, CodecError> {
        let mut grid = Self::empty(width, height);

        for layer in layers.iter().filter(|layer| layer.is_collision()) {
            let Some(data) = layer.data.as_ref() else {
                continue;
            };
            if data.len() != grid.cells.len() {
                return Err(CodecError::LayerSize {
                    layer: layer.name.clone(),
                    expected: grid.cells.len(),
                    actual: data.len(),
                });
            }
            for (cell, tile) in grid.cells.iter_mut().zip(data) {
                if *tile != 0 {
                    *cell = true;
                }
            }
        }

        Ok(grid)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cell lookup; `None` when out of bounds
    pub fn get(&self, col: i64, row: i64) -> Option<bool> {
        if col < 0 || row < 0 || col >= self.width as i64 || row >= self.height as i64 {
            return None;
        }
        self.cells
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    /// Size of the uncompressed grid in bytes (one byte per cell)
    pub fn raw_len(&self) -> usize {
        self.cells.len()
    }

    /// Run-length encode without the compression gate
    pub fn encode(&self) -> RleMask {
        let mut values = Vec::with_capacity(4);
        values.push(self.width);
        values.push(self.height);

        let mut cells = self.cells.iter().copied();
        if let Some(first) = cells.next() {
            let mut current = first;
            let mut count: u32 = 1;
            for cell in cells {
                if cell == current {
                    count += 1;
                } else {
                    values.push(current as u32);
                    values.push(count);
                    current = cell;
                    count = 1;
                }
            }
            values.push(current as u32);
            values.push(count);
        }

        RleMask(values)
    }

    /// Encode and enforce that the result is strictly smaller than the raw grid
    pub fn compress(&self) -> Result<RleMask, CodecError> {
        let encoded = self.encode();
        if encoded.byte_len() >= self.raw_len() {
            return Err(CodecError::Incompressible {
                raw: self.raw_len(),
                encoded: encoded.byte_len(),
            });
        }
        Ok(encoded)
    }
}

/// Persisted run-length collision mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RleMask(Vec<u32>);

impl RleMask {
    pub fn from_values(values: Vec<u32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Encoded size in bytes (one byte per element, matching `raw_len`)
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }

    /// Reconstruct the grid; fails unless the runs cover exactly `width * height` cells
    pub fn decode(&self) -> Result<CollisionGrid, CodecError> {
        let (header, runs) = match self.0.as_slice() {
            [width, height, runs @ ..] => ((*width, *height), runs),
            _ => return Err(CodecError::MissingHeader),
        };
        if runs.len() % 2 != 0 {
            return Err(CodecError::DanglingRun);
        }

        let (width, height) = header;
        let expected = u64::from(width) * u64::from(height);

        // Runs must cover the header exactly before anything is allocated
        let mut covered: u64 = 0;
        for pair in runs.chunks_exact(2) {
            if pair[0] > 1 {
                return Err(CodecError::InvalidValue(pair[0]));
            }
            covered += u64::from(pair[1]);
            if covered > expected {
                break;
            }
        }
        if covered != expected {
            return Err(CodecError::LengthMismatch {
                expected: to_usize(expected),
                actual: to_usize(covered),
            });
        }

        let mut cells = Vec::with_capacity(to_usize(expected));
        for pair in runs.chunks_exact(2) {
            cells.resize(cells.len() + pair[1] as usize, pair[0] == 1);
        }

        CollisionGrid::new(width, height, cells)
    }
}

/// The subset of a Tiled layer the codec needs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TileLayer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub data: Option<Vec<u32>>,
    #[serde(default)]
    pub properties: Vec<LayerProperty>,
}

impl TileLayer {
    pub fn is_collision(&self) -> bool {
        self.properties.iter().any(|property| {
            property.name.eq_ignore_ascii_case("collision")
                && property.value == serde_json::Value::Bool(true)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerProperty {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

fn cell_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encoded mask ({encoded} bytes) is not smaller than the raw grid ({raw} bytes)")]
    Incompressible { raw: usize, encoded: usize },

    #[error("Mask covers {actual} cells, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Collision layer {layer:?} has {actual} tiles, expected {expected}")]
    LayerSize {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("Mask is missing its width/height header")]
    MissingHeader,

    #[error("Mask ends with a value that has no count")]
    DanglingRun,

    #[error("Mask value {0} is not 0 or 1")]
    InvalidValue(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collision_layer(name: &str, data: Vec<u32>) -> TileLayer {
        TileLayer {
            name: name.to_string(),
            data: Some(data),
            properties: vec![LayerProperty {
                name: "Collision".to_string(),
                value: serde_json::Value::Bool(true),
            }],
            ..TileLayer::default()
        }
    }

    #[test]
    fn encodes_runs_with_header() {
        let grid = CollisionGrid::new(
            4,
            2,
            vec![false, false, false, true, true, false, false, false],
        )
        .unwrap();
        assert_eq!(grid.encode().as_slice(), &[4, 2, 0, 3, 1, 2, 0, 3]);
    }

    #[test]
    fn decode_inverts_encode() {
        let patterns: [&[bool]; 4] = [
            &[false; 12],
            &[true; 12],
            &[true, true, false, false, false, true, true, true, false, true, false, false],
            &[false, true, true, true, true, true, true, true, true, true, true, false],
        ];
        for cells in patterns {
            let grid = CollisionGrid::new(4, 3, cells.to_vec()).unwrap();
            assert_eq!(grid.encode().decode().unwrap(), grid);
        }
    }

    #[test]
    fn alternating_grid_fails_compression_gate() {
        let cells = (0..64).map(|i| i % 2 == 1).collect();
        let grid = CollisionGrid::new(8, 8, cells).unwrap();
        let err = grid.compress().unwrap_err();
        assert!(matches!(err, CodecError::Incompressible { raw: 64, .. }));
    }

    #[test]
    fn uniform_grid_compresses() {
        let grid = CollisionGrid::empty(16, 16);
        let mask = grid.compress().unwrap();
        assert_eq!(mask.as_slice(), &[16, 16, 0, 256]);
    }

    #[test]
    fn decode_rejects_short_and_long_masks() {
        let short = RleMask::from_values(vec![2, 2, 0, 3]);
        assert!(matches!(
            short.decode(),
            Err(CodecError::LengthMismatch { expected: 4, actual: 3 })
        ));

        let long = RleMask::from_values(vec![2, 2, 0, 3, 1, 2]);
        assert!(matches!(long.decode(), Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn decode_rejects_header_larger_than_runs() {
        let mask = RleMask::from_values(vec![u32::MAX, u32::MAX, 0, 1]);
        assert!(matches!(
            mask.decode(),
            Err(CodecError::LengthMismatch { actual: 1, .. })
        ));

        let mask = RleMask::from_values(vec![u32::MAX, 1, 1, u32::MAX, 0, u32::MAX]);
        assert!(matches!(mask.decode(), Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn decode_rejects_malformed_masks() {
        assert!(matches!(
            RleMask::from_values(vec![3]).decode(),
            Err(CodecError::MissingHeader)
        ));
        assert!(matches!(
            RleMask::from_values(vec![1, 1, 0]).decode(),
            Err(CodecError::DanglingRun)
        ));
        assert!(matches!(
            RleMask::from_values(vec![1, 1, 2, 1]).decode(),
            Err(CodecError::InvalidValue(2))
        ));
    }

    #[test]
    fn merges_flagged_layers_by_or() {
        let ground = TileLayer {
            name: "ground".to_string(),
            data: Some(vec![5, 5, 5, 5]),
            ..TileLayer::default()
        };
        let walls = collision_layer("walls", vec![1, 0, 0, 0]);
        let trees = collision_layer("trees", vec![0, 0, 0, 9]);

        let grid = CollisionGrid::from_layers(2, 2, &[ground, walls, trees]).unwrap();
        assert_eq!(grid.get(0, 0), Some(true));
        assert_eq!(grid.get(1, 0), Some(false));
        assert_eq!(grid.get(0, 1), Some(false));
        assert_eq!(grid.get(1, 1), Some(true));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.get(-1, 0), None);
    }

    #[test]
    fn collision_flag_must_be_true() {
        let mut layer = collision_layer("walls", vec![1]);
        layer.properties[0].value = serde_json::Value::Bool(false);
        assert!(!layer.is_collision());
        layer.properties[0].name = "COLLISION".to_string();
        layer.properties[0].value = serde_json::Value::Bool(true);
        assert!(layer.is_collision());
    }

    #[test]
    fn rejects_mis_sized_layer() {
        let walls = collision_layer("walls", vec![1, 0, 0]);
        assert!(matches!(
            CollisionGrid::from_layers(2, 2, &[walls]),
            Err(CodecError::LayerSize { .. })
        ));
    }
}
