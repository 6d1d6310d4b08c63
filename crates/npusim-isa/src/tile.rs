//! Tiles: independently schedulable units of an operator's work.

use super::instruction::{Instruction, Opcode};
use super::types::Addr;
use std::collections::HashSet;

/// Errors reported by [`Tile::validate`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TileError {
    /// A compute source or MOVOUT source was never written earlier in the tile
    #[error("instruction {index} reads scratchpad address {addr:#x} before any instruction writes it")]
    UnwrittenSource { addr: Addr, index: usize },

    /// A dependency id does not name an earlier instruction
    #[error("instruction {index} depends on unknown id '{id}'")]
    UnknownDependency { id: String, index: usize },

    /// Skip tiles are identity pass-throughs
    #[error("skip tile carries {0} instructions")]
    SkipWithInstructions(usize),
}

pub type TileResult<T> = std::result::Result<T, TileError>;

/// Tile lifecycle state owned by this crate.
///
/// Later states (issued, executing, done) belong to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum TileStatus {
    #[default]
    Initialized,
}

/// A unit of work with geometric coordinates and an ordered instruction list.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Tile {
    pub status: TileStatus,

    /// The tile performs no work (identity pass-through).
    pub skip: bool,

    pub optype: String,

    /// Id of the operator that owns this tile.
    pub layer_id: u32,

    pub batch: u32,
    pub channel: u32,
    pub row: u32,
    pub col: u32,

    /// Reduction step for GEMM tiles.
    pub k: u32,

    /// Accumulates into results left by an earlier tile.
    pub accum: bool,

    pub instructions: Vec<Instruction>,
}

impl Tile {
    pub fn new(optype: impl Into<String>, layer_id: u32) -> Self {
        Self {
            optype: optype.into(),
            layer_id,
            ..Self::default()
        }
    }

    /// Identity pass-through tile with no instructions.
    pub fn skipped(optype: impl Into<String>, layer_id: u32) -> Self {
        Self {
            skip: true,
            ..Self::new(optype, layer_id)
        }
    }

    /// Set the (batch, channel, row, col) coordinates.
    pub fn at(mut self, batch: u32, channel: u32, row: u32, col: u32) -> Self {
        self.batch = batch;
        self.channel = channel;
        self.row = row;
        self.col = col;
        self
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterate over instructions with the given opcode.
    pub fn instructions_with(&self, opcode: Opcode) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().filter(move |inst| inst.opcode == opcode)
    }

    /// Check the issue-order invariants of the instruction list.
    ///
    /// - every scratchpad operand of a compute instruction, and the scratchpad
    ///   source of every MOVOUT, was written by an earlier MOVIN or compute
    ///   instruction of this tile
    /// - every dependency id names an earlier instruction of this tile
    /// - skip tiles carry no instructions
    pub fn validate(&self) -> TileResult<()> {
        if self.skip && !self.instructions.is_empty() {
            return Err(TileError::SkipWithInstructions(self.instructions.len()));
        }

        let mut written: HashSet<Addr> = HashSet::new();
        let mut ids: HashSet<&str> = HashSet::new();

        for (index, inst) in self.instructions.iter().enumerate() {
            if let Some(id) = inst.dependent_ids.iter().find(|id| !ids.contains(id.as_str())) {
                return Err(TileError::UnknownDependency { id: id.clone(), index });
            }

            match inst.opcode {
                Opcode::MOVIN => {
                    written.insert(inst.dest_addr);
                }
                Opcode::MOVOUT => {
                    if !written.contains(&inst.dest_addr) {
                        return Err(TileError::UnwrittenSource {
                            addr: inst.dest_addr,
                            index,
                        });
                    }
                }
                Opcode::GEMM | Opcode::SOFTMAX | Opcode::COMP => {
                    if let Some(&addr) = inst.src_addrs.iter().find(|addr| !written.contains(*addr)) {
                        return Err(TileError::UnwrittenSource { addr, index });
                    }
                    written.insert(inst.dest_addr);
                }
            }

            if let Some(id) = &inst.id {
                ids.insert(id.as_str());
            }
        }

        Ok(())
    }

    /// Serialize an ordered tile stream for the timing engine.
    pub fn encode_stream(tiles: &[Tile]) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(tiles)
    }

    /// Deserialize a tile stream produced by [`Tile::encode_stream`].
    pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Tile>, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperandTag, ACCUM_SPAD_BASE, SPAD_BASE};

    fn attention_like_tile() -> Tile {
        let mut tile = Tile::new("Attention", 7);
        tile.push(Instruction::movin(SPAD_BASE, vec![0x0], OperandTag::Input(0)));
        tile.push(Instruction::movin(SPAD_BASE + 0x100, vec![0x100], OperandTag::Input(1)));
        tile.push(Instruction::compute(
            Opcode::GEMM,
            ACCUM_SPAD_BASE,
            16,
            vec![SPAD_BASE, SPAD_BASE + 0x100],
        ));
        tile.push(Instruction::movout(ACCUM_SPAD_BASE, 32, vec![0x200]));
        tile
    }

    #[test]
    fn test_well_ordered_tile_validates() {
        assert_eq!(attention_like_tile().validate(), Ok(()));
    }

    #[test]
    fn test_compute_before_load_is_rejected() {
        let mut tile = Tile::new("Attention", 7);
        tile.push(Instruction::compute(Opcode::SOFTMAX, ACCUM_SPAD_BASE, 16, vec![SPAD_BASE]));
        assert_eq!(
            tile.validate(),
            Err(TileError::UnwrittenSource {
                addr: SPAD_BASE,
                index: 0
            })
        );
    }

    #[test]
    fn test_movout_of_unwritten_buffer_is_rejected() {
        let mut tile = Tile::new("Gemm", 1);
        tile.push(Instruction::movout(ACCUM_SPAD_BASE, 32, vec![0x0]));
        assert!(matches!(tile.validate(), Err(TileError::UnwrittenSource { index: 0, .. })));
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let mut tile = Tile::new("AdaptiveAvgPool", 2);
        tile.push(
            Instruction::movin(SPAD_BASE, vec![0x0], OperandTag::Input(0)).with_id("INPUT-2-0-0-0-0"),
        );
        tile.push(Instruction::compute(Opcode::COMP, ACCUM_SPAD_BASE, 16, vec![SPAD_BASE]).depends_on("INPUT-9"));
        assert_eq!(
            tile.validate(),
            Err(TileError::UnknownDependency {
                id: "INPUT-9".to_string(),
                index: 1
            })
        );
    }

    #[test]
    fn test_skip_tile_must_be_empty() {
        let mut tile = Tile::skipped("AdaptiveAvgPool", 3);
        assert!(tile.validate().is_ok());
        tile.push(Instruction::new(Opcode::COMP, ACCUM_SPAD_BASE, 1));
        assert_eq!(tile.validate(), Err(TileError::SkipWithInstructions(1)));
    }

    #[test]
    fn test_stream_survives_encoding() {
        let tiles = vec![attention_like_tile(), Tile::skipped("AdaptiveAvgPool", 3).at(0, 1, 2, 3)];
        let bytes = Tile::encode_stream(&tiles).unwrap();
        assert_eq!(Tile::decode_stream(&bytes).unwrap(), tiles);
    }

    #[test]
    fn test_tile_serializes_to_json() {
        let json = serde_json::to_value(attention_like_tile()).unwrap();
        assert_eq!(json["optype"], "Attention");
        assert_eq!(json["instructions"][0]["opcode"], "MOVIN");
        assert_eq!(json["instructions"][0]["operand"]["Input"], 0);
    }
}
