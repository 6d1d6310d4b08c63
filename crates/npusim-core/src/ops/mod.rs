//! Operator contract and variants
//!
//! Every graph operator is compiled through the same two steps:
//!
//! 1. construction: parse attributes, infer shapes and register the output
//!    tensor (exactly once)
//! 2. [`Operation::initialize_tiles`]: split the work into [`Tile`]s and fill
//!    each one through [`Operation::initialize_instructions`]
//!
//! ## Modules
//!
//! - `pool` - windowed average pooling (`AdaptiveAvgPool`)
//! - `attention` - multi-head attention with a projection GEMM (`Attention`)
//! - `gemm` - weight-stationary GEMM helper used by attention

pub mod attention;
pub mod gemm;
pub mod pool;

pub use attention::{Attention, HeadAddressSets};
pub use gemm::{GemmOperand, GemmWs};
pub use pool::AdaptiveAvgPool;

use crate::allocator::CompileContext;
use crate::config::SimulationConfig;
use crate::descriptor::OperatorDescriptor;
use crate::error::{Error, Result};
use crate::mapping::{Mapping, MappingTable};
use crate::tensor::{TensorId, TensorRegistry};
use npusim_isa::Tile;
use std::fmt;

/// State shared by every operator variant
#[derive(Debug, Clone)]
pub struct OperationBase {
    pub id: u32,
    pub name: String,
    pub optype: &'static str,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub tiles: Vec<Tile>,
    pub config: SimulationConfig,
}

impl OperationBase {
    /// Assign an id and resolve every input tensor named by `desc`
    pub fn new(
        optype: &'static str,
        config: &SimulationConfig,
        registry: &dyn TensorRegistry,
        desc: &OperatorDescriptor,
        ctx: &mut CompileContext,
    ) -> Result<Self> {
        let inputs = desc
            .inputs
            .iter()
            .map(|name| registry.require_tensor(name).map(|t| t.id()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: ctx.ids.generate_id(),
            name: desc.name.clone(),
            optype,
            inputs,
            outputs: Vec::new(),
            tiles: Vec::new(),
            config: config.clone(),
        })
    }

    /// Tensor id of input `index`
    pub fn input(&self, index: usize) -> Result<TensorId> {
        self.inputs.get(index).copied().ok_or_else(|| Error::MissingInput {
            op: self.name.clone(),
            index,
        })
    }

    pub fn precondition(&self, reason: impl Into<String>) -> Error {
        Error::precondition(&self.name, reason)
    }
}

/// A graph operator that compiles into tiles of address-resolved instructions
pub trait Operation: fmt::Debug {
    fn base(&self) -> &OperationBase;

    fn base_mut(&mut self) -> &mut OperationBase;

    fn id(&self) -> u32 {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn optype(&self) -> &str {
        self.base().optype
    }

    fn inputs(&self) -> &[TensorId] {
        &self.base().inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.base().outputs
    }

    /// Re-read cached tensor addresses from `registry` before tiling
    ///
    /// A producer declared after this operator may have redefined one of its
    /// tensors and moved the region.
    fn bind_tensors(&mut self, registry: &dyn TensorRegistry) -> Result<()>;

    /// Decompose the operator into tiles, appending them to the tile queue
    fn initialize_tiles(&mut self, ctx: &mut CompileContext, mapping_table: &MappingTable) -> Result<()>;

    /// Fill `tile` with its instruction trace
    fn initialize_instructions(&mut self, ctx: &mut CompileContext, tile: &mut Tile, mapping: &Mapping) -> Result<()>;

    /// Tiles produced so far, in issue order
    fn tiles(&self) -> &[Tile] {
        &self.base().tiles
    }

    /// Drain the tile queue
    fn take_tiles(&mut self) -> Vec<Tile> {
        std::mem::take(&mut self.base_mut().tiles)
    }
}

/// Construct the operator variant named by `desc.op_type`
pub fn create_operation(
    config: &SimulationConfig,
    registry: &mut dyn TensorRegistry,
    desc: &OperatorDescriptor,
    ctx: &mut CompileContext,
) -> Result<Box<dyn Operation>> {
    match desc.op_type.as_str() {
        AdaptiveAvgPool::OPTYPE => Ok(Box::new(AdaptiveAvgPool::new(config, registry, desc, ctx)?)),
        Attention::OPTYPE => Ok(Box::new(Attention::new(config, registry, desc, ctx)?)),
        other => Err(Error::UnsupportedOperator(other.to_string())),
    }
}
