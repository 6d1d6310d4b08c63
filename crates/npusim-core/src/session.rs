//! One compile pass over a model
//!
//! The session owns everything that was global state in a classic
//! simulator frontend: id counters, the DRAM allocator, the configuration
//! and the tensor registry. Operators are constructed in declaration order
//! and compiled in the same order into a single tile stream.

use crate::allocator::CompileContext;
use crate::config::SimulationConfig;
use crate::descriptor::{ModelDescriptor, OperatorDescriptor};
use crate::error::{Error, Result};
use crate::mapping::MappingTable;
use crate::ops::{create_operation, Operation};
use crate::tensor::{Model, TensorId, TensorRegistry};
use npusim_isa::Tile;
use npusim_tracing::perf_span;

#[derive(Debug)]
pub struct CompileSession {
    config: SimulationConfig,
    model: Model,
    ctx: CompileContext,
    operations: Vec<Box<dyn Operation>>,
}

impl CompileSession {
    pub fn new(config: SimulationConfig) -> Self {
        let model = Model::new(config.precision);
        Self {
            config,
            model,
            ctx: CompileContext::new(),
            operations: Vec::new(),
        }
    }

    /// Declare every tensor and operator of `descriptor`
    #[tracing::instrument(skip_all, fields(tensors = descriptor.tensors.len(), operators = descriptor.operators.len()))]
    pub fn from_descriptor(config: SimulationConfig, descriptor: &ModelDescriptor) -> Result<Self> {
        let mut session = Self::new(config);
        for tensor in &descriptor.tensors {
            session.declare_tensor(&tensor.name, tensor.shape.clone())?;
        }
        for op in &descriptor.operators {
            session.add_operation(op)?;
        }
        Ok(session)
    }

    /// Register a graph input, weight or placeholder tensor
    pub fn declare_tensor(&mut self, name: &str, shape: Vec<u32>) -> Result<TensorId> {
        self.model.add_tensor(&mut self.ctx, None, name, shape)
    }

    /// Construct an operator; its output tensor is registered immediately
    pub fn add_operation(&mut self, desc: &OperatorDescriptor) -> Result<u32> {
        let op = create_operation(&self.config, &mut self.model, desc, &mut self.ctx)?;
        let id = op.id();
        tracing::debug!(id, name = op.name(), optype = op.optype(), "added operation");
        self.operations.push(op);
        Ok(id)
    }

    /// Tile every operator and return the combined stream in issue order
    ///
    /// Any error aborts the pass and no tiles are returned.
    pub fn compile(&mut self, mapping_table: &MappingTable) -> Result<Vec<Tile>> {
        let _span = perf_span!("compile_pass", operators = self.operations.len());
        let mut stream = Vec::new();

        for op in &mut self.operations {
            op.bind_tensors(&self.model)?;
            op.initialize_tiles(&mut self.ctx, mapping_table)?;
            let tiles = op.take_tiles();
            for tile in &tiles {
                tile.validate().map_err(|source| Error::InvalidTile {
                    op: op.name().to_string(),
                    source,
                })?;
            }
            stream.extend(tiles);
        }

        tracing::info!(tiles = stream.len(), "compile pass complete");
        Ok(stream)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn operations(&self) -> &[Box<dyn Operation>] {
        &self.operations
    }

    /// Find an operator by graph name
    pub fn operation(&self, name: &str) -> Option<&dyn Operation> {
        self.operations.iter().find(|op| op.name() == name).map(|op| op.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, input: &str, output: &str, kernel: i64) -> OperatorDescriptor {
        OperatorDescriptor::new(name, "AdaptiveAvgPool")
            .with_inputs([input])
            .with_outputs([output])
            .with_attribute("kernel_shape", vec![kernel, kernel])
            .with_attribute("strides", vec![kernel, kernel])
    }

    #[test]
    fn test_operators_compile_in_declaration_order() {
        let mut session = CompileSession::new(SimulationConfig::default());
        session.declare_tensor("x", vec![1, 1, 8, 8]).unwrap();
        let first = session.add_operation(&pool("p0", "x", "y", 2)).unwrap();
        let second = session.add_operation(&pool("p1", "y", "z", 2)).unwrap();

        let tiles = session.compile(&MappingTable::new()).unwrap();
        assert_eq!(tiles.len(), 16 + 4);
        assert!(tiles[..16].iter().all(|t| t.layer_id == first));
        assert!(tiles[16..].iter().all(|t| t.layer_id == second));
        assert_eq!(session.model().find_tensor("z").unwrap().shape(), &[1, 1, 2, 2]);
    }

    #[test]
    fn test_memory_access_ids_are_unique() {
        let mut session = CompileSession::new(SimulationConfig::default());
        session.declare_tensor("x", vec![1, 2, 4, 4]).unwrap();
        session.add_operation(&pool("p0", "x", "y", 2)).unwrap();
        let tiles = session.compile(&MappingTable::new()).unwrap();

        let ids: Vec<u32> = tiles
            .iter()
            .flat_map(|t| &t.instructions)
            .filter(|i| i.is_dram_access())
            .map(|i| i.access_id.unwrap())
            .collect();
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids.len(), 8 * 2);
    }

    #[test]
    fn test_errors_abort_construction() {
        let mut session = CompileSession::new(SimulationConfig::default());
        session.declare_tensor("x", vec![1, 1, 6, 6]).unwrap();
        assert!(session.add_operation(&pool("p0", "x", "y", 4)).is_err());
        assert!(session.operations().is_empty());
    }
}
