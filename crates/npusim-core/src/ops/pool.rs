//! Windowed average pooling
//!
//! One tile per output element. Each tile loads the input window, folds it
//! through the vector unit in `COMP` steps and stores the single result.

use super::{Operation, OperationBase};
use crate::address::activation_address;
use crate::allocator::CompileContext;
use crate::config::SimulationConfig;
use crate::descriptor::OperatorDescriptor;
use crate::error::Result;
use crate::mapping::{Mapping, MappingTable};
use crate::tensor::TensorRegistry;
use npusim_isa::{Addr, Instruction, OperandTag, Opcode, Tile, ACCUM_SPAD_BASE, SPAD_BASE};
use npusim_tracing::performance::record_tiling;
use std::collections::BTreeSet;

/// Number of vector-unit steps that reduce `elements` values `width` at a time
///
/// Each step reduces one full vector to a single value; partial results are
/// folded again until one final step remains.
pub fn reduction_steps(elements: u32, width: u32) -> u32 {
    debug_assert!(width >= 2);
    let mut total = 0;
    let mut remaining = elements;
    while remaining > width {
        let quotient = remaining / width;
        let remainder = remaining % width;
        total += quotient;
        remaining = quotient + remainder;
    }
    total + 1
}

#[derive(Debug, Clone)]
pub struct AdaptiveAvgPool {
    base: OperationBase,
    kernel: [u32; 2],
    strides: [u32; 2],
    skip: bool,
    input_address: Addr,
    input_shape: [u32; 4],
    output_address: Addr,
    output_shape: [u32; 4],
}

impl AdaptiveAvgPool {
    pub const OPTYPE: &'static str = "AdaptiveAvgPool";

    #[tracing::instrument(skip_all, fields(op = %desc.name))]
    pub fn new(
        config: &SimulationConfig,
        registry: &mut dyn TensorRegistry,
        desc: &OperatorDescriptor,
        ctx: &mut CompileContext,
    ) -> Result<Self> {
        let mut base = OperationBase::new(Self::OPTYPE, config, registry, desc, ctx)?;

        let kernel = spatial_pair(&base, desc, "kernel_shape")?;
        let strides = spatial_pair(&base, desc, "strides")?;
        tracing::trace!(?kernel, ?strides, "pooling window");

        let input = registry.require_tensor(desc.input(0)?)?;
        let input_shape = input
            .dims4()
            .ok_or_else(|| base.precondition(format!("input must be rank 4, got {:?}", input.shape())))?;
        let (input_id, input_address) = (input.id(), input.address());

        let [_, _, in_h, in_w] = input_shape;
        if kernel.contains(&0) || strides.contains(&0) {
            return Err(base.precondition("kernel and stride must be non-zero"));
        }
        if in_h < kernel[0] || in_w < kernel[1] {
            return Err(base.precondition(format!(
                "input spatial dims {in_h}x{in_w} are smaller than kernel {}x{}",
                kernel[0], kernel[1]
            )));
        }
        if in_h % kernel[0] != 0 || in_w % kernel[1] != 0 {
            return Err(base.precondition(format!(
                "input spatial dims {in_h}x{in_w} are not divisible by kernel {}x{}",
                kernel[0], kernel[1]
            )));
        }

        let mut output_shape = input_shape;
        output_shape[2] = (in_h - kernel[0]) / strides[0] + 1;
        output_shape[3] = (in_w - kernel[1]) / strides[1] + 1;
        let output_name = desc.output(0)?;
        tracing::trace!(output = output_name, ?output_shape, "inferred output shape");

        let skip = output_shape == input_shape;
        let (output_id, output_address) = if skip {
            registry.alias(output_name, input_id)?;
            (input_id, input_address)
        } else {
            if config.elements_per_vector() < 2 {
                return Err(base.precondition(format!(
                    "vector unit processes {} elements per op, need at least 2",
                    config.elements_per_vector()
                )));
            }
            let id = registry.define_output(ctx, base.id, output_name, output_shape.to_vec())?;
            let address = registry.tensor(id).map(|t| t.address()).unwrap_or_default();
            (id, address)
        };
        base.outputs.push(output_id);

        Ok(Self {
            base,
            kernel,
            strides,
            skip,
            input_address,
            input_shape,
            output_address,
            output_shape,
        })
    }

    /// Does this operator reduce to an identity pass-through?
    pub fn is_skip(&self) -> bool {
        self.skip
    }

    pub fn output_shape(&self) -> [u32; 4] {
        self.output_shape
    }
}

fn spatial_pair(base: &OperationBase, desc: &OperatorDescriptor, attribute: &str) -> Result<[u32; 2]> {
    let values = desc.ints(attribute)?;
    <[u32; 2]>::try_from(values.as_slice()).map_err(|_| {
        base.precondition(format!(
            "'{attribute}' must have exactly two spatial dims, got {}",
            values.len()
        ))
    })
}

impl Operation for AdaptiveAvgPool {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn bind_tensors(&mut self, registry: &dyn TensorRegistry) -> Result<()> {
        let input = registry.require_id(self.base.input(0)?)?;
        let input_shape = input
            .dims4()
            .ok_or_else(|| self.base.precondition(format!("input redefined to rank {}", input.shape().len())))?;

        // every window of the inferred output must still lie inside the input
        let [_, _, rows, cols] = self.output_shape;
        let needed_h = rows.saturating_sub(1) * self.strides[0] + self.kernel[0];
        let needed_w = cols.saturating_sub(1) * self.strides[1] + self.kernel[1];
        if input_shape[2] < needed_h || input_shape[3] < needed_w {
            return Err(self.base.precondition(format!(
                "input redefined to {input_shape:?}, windows need {needed_h}x{needed_w}"
            )));
        }
        self.input_address = input.address();
        self.input_shape = input_shape;

        if let Some(&output) = self.base.outputs.first() {
            self.output_address = registry.require_id(output)?.address();
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(op = %self.base.name))]
    fn initialize_tiles(&mut self, ctx: &mut CompileContext, _mapping_table: &MappingTable) -> Result<()> {
        if self.skip {
            self.base.tiles.push(Tile::skipped(Self::OPTYPE, self.base.id));
            record_tiling(Self::OPTYPE, self.base.id, 1, 0);
            return Ok(());
        }

        let [batches, channels, rows, cols] = self.output_shape;
        let mapping = Mapping::default();
        let mut instructions = 0;
        for n in 0..batches {
            for c in 0..channels {
                for row in 0..rows {
                    for col in 0..cols {
                        let mut tile = Tile::new(Self::OPTYPE, self.base.id).at(n, c, row, col);
                        self.initialize_instructions(ctx, &mut tile, &mapping)?;
                        instructions += tile.len();
                        self.base.tiles.push(tile);
                    }
                }
            }
        }

        record_tiling(Self::OPTYPE, self.base.id, self.base.tiles.len(), instructions);
        Ok(())
    }

    fn initialize_instructions(&mut self, ctx: &mut CompileContext, tile: &mut Tile, _mapping: &Mapping) -> Result<()> {
        let config = &self.base.config;
        let width = config.elements_per_vector();
        let [kernel_h, kernel_w] = self.kernel;
        let steps = reduction_steps(kernel_h * kernel_w, width);

        let (n, c) = (tile.batch, tile.channel);
        let row0 = tile.row * self.strides[0];
        let col0 = tile.col * self.strides[1];

        let window: BTreeSet<Addr> = (0..kernel_h)
            .flat_map(|dh| (0..kernel_w).map(move |dw| (dh, dw)))
            .map(|(dh, dw)| {
                activation_address(self.input_address, [n, c, row0 + dh, col0 + dw], self.input_shape, config)
            })
            .collect();
        let output = activation_address(self.output_address, [n, c, tile.row, tile.col], self.output_shape, config);

        let layer = tile.layer_id;
        let input_id = format!("INPUT-{layer}-{n}-{row0}-{col0}-{c}");
        let comp_id = format!("COMP-{layer}-{n}-{row0}-{col0}-{c}");
        let output_id = format!("OUT-{layer}-{n}-{row0}-{col0}-{c}");

        tile.push(
            Instruction::movin(SPAD_BASE, window.into_iter().collect(), OperandTag::Input(0))
                .with_id(&input_id)
                .with_access_id(ctx.ids.generate_mem_access_id()),
        );
        for _ in 0..steps {
            tile.push(
                Instruction::compute(Opcode::COMP, ACCUM_SPAD_BASE, width, vec![SPAD_BASE])
                    .with_id(&comp_id)
                    .depends_on(&input_id)
                    .with_dest_id(&output_id),
            );
        }
        tile.push(
            Instruction::movout(ACCUM_SPAD_BASE, config.precision, vec![output])
                .with_id(output_id)
                .with_access_id(ctx.ids.generate_mem_access_id()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tensor::Model;

    fn pool_desc(kernel: [i64; 2], strides: [i64; 2]) -> OperatorDescriptor {
        OperatorDescriptor::new("pool0", "AdaptiveAvgPool")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_attribute("kernel_shape", kernel.to_vec())
            .with_attribute("strides", strides.to_vec())
    }

    fn setup(shape: Vec<u32>) -> (SimulationConfig, CompileContext, Model) {
        let config = SimulationConfig::default();
        let mut ctx = CompileContext::new();
        let mut model = Model::new(config.precision);
        model.add_tensor(&mut ctx, None, "x", shape).unwrap();
        (config, ctx, model)
    }

    #[test]
    fn test_reduction_steps() {
        assert_eq!(reduction_steps(4, 16), 1);
        assert_eq!(reduction_steps(16, 16), 1);
        // 17 -> 1 full vector + 1 leftover -> 2 values -> final step
        assert_eq!(reduction_steps(17, 16), 2);
        // 49 over 4: 12 + 1 -> 13: 3 + 1 -> 4: final
        assert_eq!(reduction_steps(49, 4), 16);
    }

    #[test]
    fn test_output_shape() {
        let (config, mut ctx, mut model) = setup(vec![2, 3, 8, 4]);
        let op = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([4, 2], [2, 2]), &mut ctx).unwrap();
        assert_eq!(op.output_shape(), [2, 3, 3, 2]);
        assert!(!op.is_skip());
        assert_eq!(model.find_tensor("y").map(|t| t.shape().to_vec()), Some(vec![2, 3, 3, 2]));
    }

    #[test]
    fn test_indivisible_window_rejected() {
        let (config, mut ctx, mut model) = setup(vec![1, 1, 7, 8]);
        let err = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([2, 2], [2, 2]), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn test_empty_spatial_input_rejected() {
        let (config, mut ctx, mut model) = setup(vec![1, 1, 0, 0]);
        let err = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([2, 2], [2, 2]), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Precondition { ref reason, .. } if reason.contains("smaller than kernel")));
    }

    #[test]
    fn test_bind_tensors_follows_relocated_input() {
        let (config, mut ctx, mut model) = setup(vec![1, 1, 2, 2]);
        let mut op = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([2, 2], [2, 2]), &mut ctx).unwrap();
        let x = model.find_tensor("x").unwrap().id();
        model.redefine_tensor(&mut ctx, x, 99, vec![1, 1, 8, 8]).unwrap();
        let moved = model.tensor(x).unwrap().address();

        op.bind_tensors(&model).unwrap();
        op.initialize_tiles(&mut ctx, &MappingTable::new()).unwrap();
        let reads = &op.tiles()[0].instructions[0].src_addrs;
        assert!(reads.iter().all(|&a| a >= moved && a < moved + 128));
    }

    #[test]
    fn test_kernel_arity_checked() {
        let (config, mut ctx, mut model) = setup(vec![1, 1, 8, 8]);
        let desc = pool_desc([2, 2], [2, 2]).with_attribute("kernel_shape", vec![2i64, 2, 2]);
        let err = AdaptiveAvgPool::new(&config, &mut model, &desc, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Precondition { ref reason, .. } if reason.contains("kernel_shape")));
    }

    #[test]
    fn test_tile_instruction_shape() {
        let (config, mut ctx, mut model) = setup(vec![1, 1, 4, 4]);
        let mut op = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([2, 2], [2, 2]), &mut ctx).unwrap();
        op.initialize_tiles(&mut ctx, &MappingTable::new()).unwrap();

        let tiles = op.tiles();
        assert_eq!(tiles.len(), 4);
        let last = &tiles[3];
        assert_eq!((last.row, last.col), (1, 1));
        let opcodes: Vec<Opcode> = last.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::MOVIN, Opcode::COMP, Opcode::MOVOUT]);

        let comp = &last.instructions[1];
        assert_eq!(comp.size, config.elements_per_vector());
        assert_eq!(comp.dependent_ids, vec![format!("INPUT-{}-0-2-2-0", op.id())]);
        assert_eq!(comp.dest_id.as_deref(), Some(format!("OUT-{}-0-2-2-0", op.id()).as_str()));
        assert_eq!(last.instructions[2].operand, OperandTag::Output);
        assert!(tiles.iter().all(|t| t.validate().is_ok()));
    }

    #[test]
    fn test_window_anchored_at_strided_origin() {
        let config = SimulationConfig {
            precision: 1,
            dram_req_size: 1,
            ..SimulationConfig::default()
        };
        let mut ctx = CompileContext::new();
        let mut model = Model::new(config.precision);
        let x = model.add_tensor(&mut ctx, None, "x", vec![1, 1, 4, 4]).unwrap();
        let base = model.tensor(x).unwrap().address();

        let mut op = AdaptiveAvgPool::new(&config, &mut model, &pool_desc([2, 2], [2, 2]), &mut ctx).unwrap();
        let mut tile = Tile::new(AdaptiveAvgPool::OPTYPE, op.id()).at(0, 0, 1, 0);
        op.initialize_instructions(&mut ctx, &mut tile, &Mapping::default()).unwrap();

        assert_eq!(tile.instructions[0].src_addrs, vec![base + 8, base + 9, base + 12, base + 13]);
        assert_eq!(tile.instructions[0].size, 4);
    }
}
