//! # npusim-core - operator compilation for the npusim accelerator simulator
//!
//! Turns graph-level operators into ordered streams of [`Tile`]s, each
//! carrying an address-resolved instruction trace for the timing engine.
//!
//! ## Pipeline
//!
//! ```text
//! SimulationConfig ─┐
//! OperatorDescriptor ┼─▶ Operation::new ─▶ initialize_tiles ─▶ [Tile] ─▶ timing engine
//! TensorRegistry ───┘   (shape inference,   (capacity-aware
//!                        output tensor)      batching)
//! ```
//!
//! ## Modules
//!
//! - `allocator` - id counters and the 256-byte aligned DRAM bump allocator
//! - `config` - hardware configuration parsed from JSON
//! - `tensor` - tensor registry and the in-memory [`Model`]
//! - `address` - coordinate to DRAM address resolution
//! - `descriptor` - operator and model descriptors
//! - `mapping` - optional tile-size hints per operator
//! - `ops` - the [`Operation`] contract and its variants
//! - `session` - [`CompileSession`], one compile pass with its own state
//!
//! ## Example
//!
//! ```
//! use npusim_core::{CompileSession, MappingTable, OperatorDescriptor, SimulationConfig};
//!
//! let mut session = CompileSession::new(SimulationConfig::default());
//! session.declare_tensor("x", vec![1, 3, 8, 8])?;
//! session.add_operation(
//!     &OperatorDescriptor::new("pool", "AdaptiveAvgPool")
//!         .with_inputs(["x"])
//!         .with_outputs(["y"])
//!         .with_attribute("kernel_shape", vec![2i64, 2])
//!         .with_attribute("strides", vec![2i64, 2]),
//! )?;
//!
//! let tiles = session.compile(&MappingTable::new())?;
//! assert_eq!(tiles.len(), 3 * 4 * 4);
//! # Ok::<(), npusim_core::Error>(())
//! ```
//!
//! [`Tile`]: npusim_isa::Tile

pub mod address;
pub mod allocator;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod mapping;
pub mod ops;
pub mod session;
pub mod tensor;

pub use allocator::{AddressAllocator, CompileContext, IdGenerator, DRAM_ALIGNMENT};
pub use config::{CoreType, DramType, IcntType, Layout, SimulationConfig};
pub use descriptor::{AttributeValue, ModelDescriptor, OperatorDescriptor, TensorDescriptor};
pub use error::{ConfigError, Error, Result};
pub use mapping::{Mapping, MappingTable};
pub use ops::{create_operation, AdaptiveAvgPool, Attention, GemmWs, Operation, OperationBase};
pub use session::CompileSession;
pub use tensor::{Model, Tensor, TensorId, TensorRegistry};

pub use npusim_isa::{Addr, Instruction, Opcode, OperandTag, Tile};
