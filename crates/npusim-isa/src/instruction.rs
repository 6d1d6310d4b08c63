//! Hardware-level instructions emitted per tile
//!
//! - Data movement: MOVIN (DRAM → scratchpad), MOVOUT (scratchpad → DRAM)
//! - Compute: GEMM, SOFTMAX, COMP (vector-unit elementwise/compare)
//!
//! Field conventions:
//! - `dest_addr` is always the scratchpad-side address.
//! - `src_addrs` holds DRAM addresses for MOVIN/MOVOUT and scratchpad
//!   operand addresses for compute opcodes.
//! - `size` counts elements for compute opcodes, bytes for MOVOUT and
//!   DRAM requests (one per address) for MOVIN.

use super::types::{Addr, OperandTag};
use std::fmt;

/// Instruction opcodes understood by the timing engine.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Opcode {
    /// Load from DRAM into the scratchpad
    MOVIN,
    /// Store from the scratchpad to DRAM
    MOVOUT,
    /// Matrix multiply on the systolic array
    GEMM,
    /// Row-wise softmax on the vector unit
    SOFTMAX,
    /// Elementwise compare/accumulate on the vector unit
    COMP,
}

impl Opcode {
    pub const fn category(self) -> InstructionCategory {
        match self {
            Opcode::MOVIN | Opcode::MOVOUT => InstructionCategory::DataMovement,
            Opcode::GEMM => InstructionCategory::Matrix,
            Opcode::SOFTMAX | Opcode::COMP => InstructionCategory::Vector,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            Opcode::MOVIN => "movin",
            Opcode::MOVOUT => "movout",
            Opcode::GEMM => "gemm",
            Opcode::SOFTMAX => "softmax",
            Opcode::COMP => "comp",
        };
        f.write_str(mnemonic)
    }
}

/// Functional unit an instruction occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionCategory {
    DataMovement,
    Matrix,
    Vector,
}

/// One address-resolved hardware action.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,

    /// Scratchpad-side address written (MOVIN, compute) or read (MOVOUT).
    pub dest_addr: Addr,

    pub size: u32,

    pub src_addrs: Vec<Addr>,

    pub operand: OperandTag,

    /// Self identifier, referenced by `dependent_ids` of later instructions.
    pub id: Option<String>,

    /// Identifiers this instruction must wait on.
    pub dependent_ids: Vec<String>,

    /// Identifier of the value this instruction contributes to.
    pub dest_id: Option<String>,

    /// Memory-access event id for DRAM traffic (MOVIN/MOVOUT only).
    pub access_id: Option<u32>,
}

impl Instruction {
    /// Bare instruction with no sources, tags or ids.
    pub fn new(opcode: Opcode, dest_addr: Addr, size: u32) -> Self {
        Self {
            opcode,
            dest_addr,
            size,
            src_addrs: Vec::new(),
            operand: OperandTag::None,
            id: None,
            dependent_ids: Vec::new(),
            dest_id: None,
            access_id: None,
        }
    }

    /// Load `dram_addrs` into the scratchpad at `dest_addr`.
    ///
    /// `size` is the number of DRAM requests, i.e. `dram_addrs.len()`.
    pub fn movin(dest_addr: Addr, dram_addrs: Vec<Addr>, operand: OperandTag) -> Self {
        let size = u32::try_from(dram_addrs.len()).unwrap_or(u32::MAX);
        Self {
            src_addrs: dram_addrs,
            operand,
            ..Self::new(Opcode::MOVIN, dest_addr, size)
        }
    }

    /// Store `size_bytes` from the scratchpad at `spad_addr` to `dram_addrs`.
    pub fn movout(spad_addr: Addr, size_bytes: u32, dram_addrs: Vec<Addr>) -> Self {
        Self {
            src_addrs: dram_addrs,
            operand: OperandTag::Output,
            ..Self::new(Opcode::MOVOUT, spad_addr, size_bytes)
        }
    }

    /// Compute instruction reading scratchpad `operands` and writing `dest_addr`.
    pub fn compute(opcode: Opcode, dest_addr: Addr, elements: u32, operands: Vec<Addr>) -> Self {
        Self {
            src_addrs: operands,
            ..Self::new(opcode, dest_addr, elements)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependent_ids.push(id.into());
        self
    }

    pub fn with_dest_id(mut self, id: impl Into<String>) -> Self {
        self.dest_id = Some(id.into());
        self
    }

    pub fn with_access_id(mut self, access_id: u32) -> Self {
        self.access_id = Some(access_id);
        self
    }

    pub fn category(&self) -> InstructionCategory {
        self.opcode.category()
    }

    /// Does this instruction touch DRAM?
    pub fn is_dram_access(&self) -> bool {
        self.category() == InstructionCategory::DataMovement
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x}, size={}", self.opcode, self.dest_addr, self.size)?;
        if self.operand != OperandTag::None {
            write!(f, " [{}]", self.operand)?;
        }
        match self.opcode {
            Opcode::MOVIN | Opcode::MOVOUT => write!(f, " ({} dram addrs)", self.src_addrs.len())?,
            _ => {
                for src in &self.src_addrs {
                    write!(f, " {:#x}", src)?;
                }
            }
        }
        if let Some(id) = &self.id {
            write!(f, " #{}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ACCUM_SPAD_BASE, SPAD_BASE};

    #[test]
    fn test_movin_size_counts_requests() {
        let inst = Instruction::movin(SPAD_BASE, vec![0, 32, 64], OperandTag::Input(1));
        assert_eq!(inst.opcode, Opcode::MOVIN);
        assert_eq!(inst.size, 3);
        assert_eq!(inst.operand, OperandTag::Input(1));
        assert!(inst.is_dram_access());
    }

    #[test]
    fn test_movout_is_tagged_output() {
        let inst = Instruction::movout(ACCUM_SPAD_BASE, 128, vec![0x400]);
        assert_eq!(inst.operand, OperandTag::Output);
        assert_eq!(inst.size, 128);
        assert_eq!(inst.dest_addr, ACCUM_SPAD_BASE);
    }

    #[test]
    fn test_builder_sets_dependencies() {
        let inst = Instruction::compute(Opcode::COMP, ACCUM_SPAD_BASE, 16, vec![SPAD_BASE])
            .with_id("COMP-1")
            .depends_on("INPUT-1")
            .with_dest_id("OUT-1");
        assert_eq!(inst.dependent_ids, vec!["INPUT-1".to_string()]);
        assert_eq!(inst.dest_id.as_deref(), Some("OUT-1"));
        assert_eq!(inst.category(), InstructionCategory::Vector);
        assert!(!inst.is_dram_access());
    }

    #[test]
    fn test_display_is_readable() {
        let inst = Instruction::compute(Opcode::GEMM, ACCUM_SPAD_BASE, 64, vec![SPAD_BASE]);
        assert_eq!(inst.to_string(), "gemm 0x20000000, size=64 0x10000000");
    }
}
