//! Multi-head attention
//!
//! The input is first projected through a weight-stationary GEMM, then heads
//! are batched into tiles sized against half of the operand scratchpad.
//! Every head in a tile runs the same seven-instruction sequence:
//!
//! ```text
//! MOVIN Q, MOVIN K, MOVIN V          DRAM -> operand scratchpad
//! GEMM    logits = Q x K             -> accumulation scratchpad
//! SOFTMAX logits                     -> accumulation slot of the head
//! GEMM    out = softmax x V          -> past the softmax output
//! MOVOUT  out                        -> DRAM
//! ```
//!
//! Batch size is fixed at 1.

use super::gemm::{GemmOperand, GemmWs};
use super::{Operation, OperationBase};
use crate::address::make_address;
use crate::allocator::CompileContext;
use crate::config::SimulationConfig;
use crate::descriptor::OperatorDescriptor;
use crate::error::Result;
use crate::mapping::{Mapping, MappingTable};
use crate::tensor::{numel, TensorRegistry};
use npusim_isa::{Addr, Instruction, OperandTag, Opcode, Tile, ACCUM_SPAD_BASE, SPAD_BASE};
use npusim_tracing::performance::record_tiling;
use std::collections::BTreeSet;

/// Input slot of the optional KV cache
const KV_CACHE_INPUT: usize = 4;

/// Deduplicated DRAM request addresses of one head, with raw visit counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadAddressSets {
    pub query: BTreeSet<Addr>,
    pub key: BTreeSet<Addr>,
    pub value: BTreeSet<Addr>,
    pub query_visits: usize,
    pub key_visits: usize,
    pub value_visits: usize,
}

/// A DRAM buffer addressed as `[heads, rows, cols]`
#[derive(Debug, Clone, Copy)]
struct HeadBuffer {
    address: Addr,
    dims: [u32; 3],
}

impl HeadBuffer {
    fn allocate(ctx: &mut CompileContext, dims: [u32; 3], precision: u32) -> Result<Self> {
        let size = numel(&dims) * u64::from(precision);
        Ok(Self {
            address: ctx.allocator.allocate(size)?,
            dims,
        })
    }

    fn address_of(&self, index: [u32; 3], config: &SimulationConfig) -> Addr {
        self.address + make_address(index, self.dims, config)
    }
}

#[derive(Debug, Clone)]
pub struct Attention {
    base: OperationBase,
    num_heads: u32,
    dk: u32,
    q_len: u32,
    seq_len: u32,
    heads_per_tile: u32,
    per_head_bytes: u64,
    input: GemmOperand,
    weight: GemmOperand,
    projection: GemmOperand,
    query: HeadBuffer,
    key: HeadBuffer,
    value: HeadBuffer,
    output: GemmOperand,
}

impl Attention {
    pub const OPTYPE: &'static str = "Attention";

    #[tracing::instrument(skip_all, fields(op = %desc.name))]
    pub fn new(
        config: &SimulationConfig,
        registry: &mut dyn TensorRegistry,
        desc: &OperatorDescriptor,
        ctx: &mut CompileContext,
    ) -> Result<Self> {
        let mut base = OperationBase::new(Self::OPTYPE, config, registry, desc, ctx)?;
        let num_heads = desc.int("num_heads")?;
        if num_heads == 0 {
            return Err(base.precondition("num_heads must be at least 1"));
        }

        let input = registry.require_tensor(desc.input(0)?)?;
        let weight = registry.require_tensor(desc.input(1)?)?;
        let (q_len, dk, proj_cols) = match (input.shape().first(), weight.shape()) {
            (Some(&q_len), &[dk, proj_cols]) => (q_len, dk, proj_cols),
            _ => {
                return Err(base.precondition(format!(
                    "expected input [seq, dk] and weight [dk, n], got {:?} and {:?}",
                    input.shape(),
                    weight.shape()
                )))
            }
        };
        let input_operand = GemmOperand::new(input.address(), q_len, dk);
        let weight_operand = GemmOperand::new(weight.address(), dk, proj_cols);

        let past_len = match desc.inputs.get(KV_CACHE_INPUT) {
            Some(name) => {
                let cache = registry.require_tensor(name)?;
                let shape = cache.shape();
                if shape.len() < 2 || shape[shape.len() - 1] != dk {
                    return Err(base.precondition(format!(
                        "kv cache must be [.., past_len, {dk}], got {shape:?}"
                    )));
                }
                shape[shape.len() - 2]
            }
            None => 0,
        };
        let seq_len = past_len + q_len;

        let output_id = registry.define_output(ctx, base.id, desc.output(0)?, vec![q_len, dk])?;
        let output = GemmOperand::new(registry.require_id(output_id)?.address(), q_len, dk);
        base.outputs.push(output_id);

        let precision = config.precision;
        let query = HeadBuffer::allocate(ctx, [num_heads, q_len, dk], precision)?;
        let key = HeadBuffer::allocate(ctx, [num_heads, dk, seq_len], precision)?;
        let value = HeadBuffer::allocate(ctx, [num_heads, seq_len, dk], precision)?;
        let projection_bytes = u64::from(q_len) * u64::from(proj_cols) * u64::from(precision);
        let projection = GemmOperand::new(ctx.allocator.allocate(projection_bytes)?, q_len, proj_cols);

        let mut attention = Self {
            base,
            num_heads,
            dk,
            q_len,
            seq_len,
            heads_per_tile: 0,
            per_head_bytes: 0,
            input: input_operand,
            weight: weight_operand,
            projection,
            query,
            key,
            value,
            output,
        };
        attention.calculate_loops()?;
        Ok(attention)
    }

    /// Size head batches against half of the operand scratchpad
    fn calculate_loops(&mut self) -> Result<()> {
        let (q, seq, dk) = (u64::from(self.q_len), u64::from(self.seq_len), u64::from(self.dk));
        let per_head = (2 * q * dk + 2 * dk * seq + seq * q) * u64::from(self.base.config.precision);
        let capacity = self.base.config.spad_bytes() / 2;

        let fitting = capacity.checked_div(per_head).unwrap_or(u64::MAX);
        if fitting == 0 {
            return Err(self.base.precondition(format!(
                "one head needs {per_head} bytes but only {capacity} bytes of scratchpad are available"
            )));
        }
        self.heads_per_tile = u32::try_from(fitting).unwrap_or(u32::MAX).min(self.num_heads);
        self.per_head_bytes = per_head;

        tracing::info!(heads_per_tile = self.heads_per_tile, "attention head batching");
        tracing::info!(q_len = self.q_len, seq_len = self.seq_len, dk = self.dk, "attention shape");
        tracing::info!(sram_capacity = capacity, head_bytes = per_head, "attention footprint");
        Ok(())
    }

    pub fn num_heads(&self) -> u32 {
        self.num_heads
    }

    pub fn heads_per_tile(&self) -> u32 {
        self.heads_per_tile
    }

    /// Scratchpad bytes one head occupies
    pub fn per_head_bytes(&self) -> u64 {
        self.per_head_bytes
    }

    pub fn seq_len(&self) -> u32 {
        self.seq_len
    }

    /// DRAM request addresses for the Q, K and V slices of `head`
    ///
    /// With a single query position only the current position is loaded.
    pub fn head_addresses(&self, head: u32) -> HeadAddressSets {
        let config = &self.base.config;
        let mut sets = HeadAddressSets::default();

        for i in 0..self.dk {
            for s in 0..self.seq_len {
                sets.key.insert(self.key.address_of([head, i, s], config));
                sets.key_visits += 1;
                sets.value.insert(self.value.address_of([head, s, i], config));
                sets.value_visits += 1;

                let wanted = if self.q_len == 1 { s == 0 && i == 0 } else { s < self.q_len };
                if wanted {
                    sets.query.insert(self.query.address_of([head, s, i], config));
                    sets.query_visits += 1;
                }
            }
        }

        tracing::debug!(
            head,
            query = sets.query.len(),
            key = sets.key.len(),
            value = sets.value.len(),
            "dram address sets"
        );
        sets
    }

    /// DRAM request addresses of the `[q_len, dk]` output tensor
    ///
    /// Every head stores its result into the same output region.
    pub fn output_addresses(&self) -> Vec<Addr> {
        self.output.block_addresses(0, self.q_len, 0, self.dk, &self.base.config)
    }
}

impl Operation for Attention {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn bind_tensors(&mut self, registry: &dyn TensorRegistry) -> Result<()> {
        self.input.address = registry.require_id(self.base.input(0)?)?.address();
        self.weight.address = registry.require_id(self.base.input(1)?)?.address();
        if let Some(&output) = self.base.outputs.first() {
            self.output.address = registry.require_id(output)?.address();
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(op = %self.base.name))]
    fn initialize_tiles(&mut self, ctx: &mut CompileContext, mapping_table: &MappingTable) -> Result<()> {
        // The projection is planned as its own GEMM, then its tiles are
        // claimed by this operator
        let projection_id = ctx.ids.generate_id();
        let mut projection = GemmWs::new(
            &self.base.config,
            &self.base.name,
            projection_id,
            self.input,
            self.weight,
            self.projection,
            mapping_table.get(&self.base.name),
        )?;
        projection.initialize_tiles(ctx)?;
        let mut instructions = 0;
        for mut tile in projection.take_tiles() {
            tile.layer_id = self.base.id;
            instructions += tile.len();
            self.base.tiles.push(tile);
        }

        let mapping = Mapping::default();
        for first_head in (0..self.num_heads).step_by(self.heads_per_tile as usize) {
            let mut tile = Tile::new(Self::OPTYPE, self.base.id).at(0, first_head, 0, 0);
            self.initialize_instructions(ctx, &mut tile, &mapping)?;
            instructions += tile.len();
            self.base.tiles.push(tile);
        }

        record_tiling(Self::OPTYPE, self.base.id, self.base.tiles.len(), instructions);
        Ok(())
    }

    /// Emit the head sequence for heads `tile.channel..` up to one batch
    fn initialize_instructions(&mut self, ctx: &mut CompileContext, tile: &mut Tile, _mapping: &Mapping) -> Result<()> {
        let first_head = tile.channel;
        let heads = self.heads_per_tile.min(self.num_heads.saturating_sub(first_head));
        if heads == 0 {
            return Err(self.base.precondition(format!("tile starts at head {first_head} past the last head")));
        }

        let precision = u64::from(self.base.config.precision);
        let (q, seq, dk) = (u64::from(self.q_len), u64::from(self.seq_len), u64::from(self.dk));
        let n = u64::from(heads);
        let output_addresses = self.output_addresses();

        let query_base = SPAD_BASE;
        let key_base = query_base + q * dk * n * precision;
        let value_base = key_base + dk * seq * n * precision;
        let logit_base = ACCUM_SPAD_BASE;
        let accumulation_base = logit_base + q * seq * n * precision;

        // Accumulation slot per head: softmax output, then attention output
        let softmax_bytes = q * seq * precision;
        let slot_bytes = softmax_bytes + q * dk * precision;

        let logits = self.q_len * self.seq_len;
        let out_elements = self.q_len * self.dk;

        for offset in 0..heads {
            let head = first_head + offset;
            let h = u64::from(offset);
            let q_ofs = query_base + h * q * dk * precision;
            let k_ofs = key_base + h * dk * seq * precision;
            let v_ofs = value_base + h * dk * seq * precision;
            let l_ofs = logit_base + h * q * seq * precision;
            let acc_ofs = accumulation_base + h * slot_bytes;
            let out_ofs = acc_ofs + softmax_bytes;

            let sets = self.head_addresses(head);

            for (spad, addrs, operand) in [
                (q_ofs, sets.query, 0u8),
                (k_ofs, sets.key, 1),
                (v_ofs, sets.value, 2),
            ] {
                tile.push(
                    Instruction::movin(spad, addrs.into_iter().collect(), OperandTag::Input(operand))
                        .with_access_id(ctx.ids.generate_mem_access_id()),
                );
            }
            tile.push(Instruction::compute(Opcode::GEMM, l_ofs, logits, vec![q_ofs, k_ofs]));
            tile.push(Instruction::compute(Opcode::SOFTMAX, acc_ofs, logits, vec![l_ofs]));
            tile.push(Instruction::compute(Opcode::GEMM, out_ofs, out_elements, vec![acc_ofs, v_ofs]));
            tile.push(
                Instruction::movout(
                    out_ofs,
                    out_elements * self.base.config.precision,
                    output_addresses.clone(),
                )
                .with_access_id(ctx.ids.generate_mem_access_id()),
            );
        }
        Ok(())
    }
}
