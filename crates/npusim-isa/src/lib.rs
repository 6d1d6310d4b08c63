//! Tile/instruction data model for the npusim operator compiler.
//!
//! Operators in `npusim-core` decompose their work into [`Tile`]s. Each tile
//! carries an ordered list of [`Instruction`]s whose addresses are fully
//! resolved, ready to be replayed by the timing engine:
//!
//! ```text
//! Operator ──initialize_tiles──▶ Tile ──initialize_instructions──▶ [Instruction]
//!                                  │
//!                                  ▼
//!                       scheduler / timing engine (external)
//! ```
//!
//! # Address spaces
//!
//! - DRAM addresses come from the session's bump allocator (256-byte aligned).
//! - Operand scratchpad addresses start at [`SPAD_BASE`].
//! - Accumulation scratchpad addresses start at [`ACCUM_SPAD_BASE`].
//!
//! # Example
//!
//! ```rust
//! use npusim_isa::{Instruction, OperandTag, Opcode, Tile, SPAD_BASE, ACCUM_SPAD_BASE};
//!
//! let mut tile = Tile::new("Example", 0);
//! tile.push(Instruction::movin(SPAD_BASE, vec![0x0, 0x20], OperandTag::Input(0)));
//! tile.push(Instruction::compute(Opcode::SOFTMAX, ACCUM_SPAD_BASE, 32, vec![SPAD_BASE]));
//! tile.push(Instruction::movout(ACCUM_SPAD_BASE, 64, vec![0x100]));
//! assert!(tile.validate().is_ok());
//! ```

mod instruction;
mod tile;
mod types;

pub use instruction::{Instruction, InstructionCategory, Opcode};
pub use tile::{Tile, TileError, TileResult, TileStatus};
pub use types::{Addr, OperandTag, ACCUM_SPAD_BASE, SPAD_BASE};
