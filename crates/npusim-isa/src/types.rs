//! Address and operand types shared by every instruction.

use std::fmt;

/// A byte address in DRAM or in one of the scratchpad regions.
pub type Addr = u64;

/// Base of the operand scratchpad region.
pub const SPAD_BASE: Addr = 0x1000_0000;

/// Base of the accumulation scratchpad region.
pub const ACCUM_SPAD_BASE: Addr = 0x2000_0000;

/// Marks which logical operand a data-movement instruction serves.
///
/// Attention, for instance, issues three MOVINs tagged `Input(0)` (query),
/// `Input(1)` (key) and `Input(2)` (value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum OperandTag {
    /// Compute instructions and untagged moves.
    #[default]
    None,
    /// The n-th logical input of the owning operator.
    Input(u8),
    /// The operator's output.
    Output,
}

impl OperandTag {
    pub const fn is_input(self) -> bool {
        matches!(self, OperandTag::Input(_))
    }
}

impl fmt::Display for OperandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandTag::None => write!(f, "-"),
            OperandTag::Input(index) => write!(f, "in{}", index),
            OperandTag::Output => write!(f, "out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratchpad_regions_are_disjoint() {
        assert!(SPAD_BASE < ACCUM_SPAD_BASE);
        assert_eq!(SPAD_BASE % 256, 0);
        assert_eq!(ACCUM_SPAD_BASE % 256, 0);
    }

    #[test]
    fn test_operand_tag_display() {
        assert_eq!(OperandTag::Input(2).to_string(), "in2");
        assert_eq!(OperandTag::Output.to_string(), "out");
        assert_eq!(OperandTag::default(), OperandTag::None);
        assert!(OperandTag::Input(0).is_input());
        assert!(!OperandTag::Output.is_input());
    }
}
