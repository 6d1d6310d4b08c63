//! Placement hints for tiling
//!
//! A [`MappingTable`] is produced by an external mapper and keyed by operator
//! name. Variants with a fixed tiling policy ignore it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tile sizes (and optionally a core) chosen for one operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mapping {
    pub tile_m: u32,
    pub tile_k: u32,
    pub tile_n: u32,
    #[serde(default)]
    pub core: Option<u32>,
}

impl Mapping {
    pub fn new(tile_m: u32, tile_k: u32, tile_n: u32) -> Self {
        Self {
            tile_m,
            tile_k,
            tile_n,
            core: None,
        }
    }
}

/// Mappings by operator name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    entries: HashMap<String, Mapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, op_name: impl Into<String>, mapping: Mapping) -> Option<Mapping> {
        self.entries.insert(op_name.into(), mapping)
    }

    pub fn get(&self, op_name: &str) -> Option<&Mapping> {
        self.entries.get(op_name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
