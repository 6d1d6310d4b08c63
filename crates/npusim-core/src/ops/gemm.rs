//! Weight-stationary GEMM tiling
//!
//! `output[M, N] = input[M, K] · weight[K, N]`, split into
//! `tile_m × tile_n` output blocks reduced over `tile_k` slices. The weight
//! slice is loaded first and stays resident while the input rows stream in.
//! This is not a graph operator on its own; attention uses it for its
//! linear projection.

use crate::address::flat_offset;
use crate::allocator::CompileContext;
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::mapping::Mapping;
use npusim_isa::{Addr, Instruction, OperandTag, Opcode, Tile, ACCUM_SPAD_BASE, SPAD_BASE};
use std::collections::BTreeSet;

/// A row-major matrix in DRAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmOperand {
    pub address: Addr,
    pub rows: u32,
    pub cols: u32,
}

impl GemmOperand {
    pub fn new(address: Addr, rows: u32, cols: u32) -> Self {
        Self { address, rows, cols }
    }

    /// Deduplicated request addresses of the block `[row0, row0+rows) × [col0, col0+cols)`
    pub(crate) fn block_addresses(&self, row0: u32, rows: u32, col0: u32, cols: u32, config: &SimulationConfig) -> Vec<Addr> {
        let precision = u64::from(config.precision);
        let set: BTreeSet<Addr> = (row0..row0 + rows)
            .flat_map(|r| (col0..col0 + cols).map(move |c| (r, c)))
            .map(|(r, c)| {
                let offset = flat_offset(&[r, c], &[self.rows, self.cols]);
                config.align_address(self.address + offset * precision)
            })
            .collect();
        set.into_iter().collect()
    }
}

#[derive(Debug, Clone)]
pub struct GemmWs {
    name: String,
    layer_id: u32,
    config: SimulationConfig,
    input: GemmOperand,
    weight: GemmOperand,
    output: GemmOperand,
    mapping: Mapping,
    tiles: Vec<Tile>,
}

impl GemmWs {
    pub const OPTYPE: &'static str = "GemmWS";

    /// Plan a GEMM over `input[M, K] · weight[K, N] -> output[M, N]`
    ///
    /// Tile sizes come from `mapping` when given, otherwise from the systolic
    /// array dimensions and the scratchpad budget.
    #[tracing::instrument(skip(config, mapping), fields(m = input.rows, k = input.cols, n = weight.cols))]
    pub fn new(
        config: &SimulationConfig,
        name: &str,
        layer_id: u32,
        input: GemmOperand,
        weight: GemmOperand,
        output: GemmOperand,
        mapping: Option<&Mapping>,
    ) -> Result<Self> {
        if input.cols != weight.rows || output.rows != input.rows || output.cols != weight.cols {
            return Err(Error::precondition(
                name,
                format!(
                    "GEMM shapes do not agree: [{}, {}] x [{}, {}] -> [{}, {}]",
                    input.rows, input.cols, weight.rows, weight.cols, output.rows, output.cols
                ),
            ));
        }

        let mapping = match mapping {
            Some(hint) => Self::clamp_mapping(config, hint, &input, &weight),
            None => Self::default_mapping(config, name, &input, &weight)?,
        };
        tracing::debug!(tile_m = mapping.tile_m, tile_k = mapping.tile_k, tile_n = mapping.tile_n, "gemm tile sizes");

        Ok(Self {
            name: name.to_string(),
            layer_id,
            config: config.clone(),
            input,
            weight,
            output,
            mapping,
            tiles: Vec::new(),
        })
    }

    fn default_mapping(
        config: &SimulationConfig,
        name: &str,
        input: &GemmOperand,
        weight: &GemmOperand,
    ) -> Result<Mapping> {
        let precision = u64::from(config.precision);
        let tile_k = config.core_height.clamp(1, input.cols.max(1));
        let tile_n = config.core_width.clamp(1, weight.cols.max(1));

        let budget = config.spad_bytes() / 2;
        let weight_bytes = u64::from(tile_k) * u64::from(tile_n) * precision;
        if weight_bytes > budget {
            return Err(Error::precondition(
                name,
                format!("weight slice of {weight_bytes} bytes exceeds scratchpad budget of {budget} bytes"),
            ));
        }

        let row_bytes = (u64::from(tile_k) + u64::from(tile_n)) * precision;
        let fitting_rows = (budget - weight_bytes) / row_bytes.max(1);
        let tile_m = u32::try_from(fitting_rows)
            .unwrap_or(u32::MAX)
            .clamp(1, input.rows.max(1));

        Ok(Mapping::new(tile_m, tile_k, tile_n))
    }

    fn clamp_mapping(config: &SimulationConfig, hint: &Mapping, input: &GemmOperand, weight: &GemmOperand) -> Mapping {
        let pick = |hinted: u32, fallback: u32, limit: u32| {
            let size = if hinted == 0 { fallback } else { hinted };
            size.clamp(1, limit.max(1))
        };
        Mapping {
            tile_m: pick(hint.tile_m, input.rows, input.rows),
            tile_k: pick(hint.tile_k, config.core_height, input.cols),
            tile_n: pick(hint.tile_n, config.core_width, weight.cols),
            core: hint.core,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Emit tiles in m, n, k order
    #[tracing::instrument(skip_all, fields(op = %self.name))]
    pub fn initialize_tiles(&mut self, ctx: &mut CompileContext) -> Result<()> {
        let Mapping { tile_m, tile_k, tile_n, .. } = self.mapping;
        let m_steps = self.input.rows.div_ceil(tile_m);
        let n_steps = self.weight.cols.div_ceil(tile_n);
        let k_steps = self.input.cols.div_ceil(tile_k);

        for m in 0..m_steps {
            for n in 0..n_steps {
                for k in 0..k_steps {
                    let mut tile = Tile::new(Self::OPTYPE, self.layer_id).at(0, 0, m, n);
                    tile.k = k;
                    tile.accum = k > 0;
                    self.initialize_instructions(ctx, &mut tile, k + 1 == k_steps);
                    self.tiles.push(tile);
                }
            }
        }
        Ok(())
    }

    fn initialize_instructions(&self, ctx: &mut CompileContext, tile: &mut Tile, last_k: bool) {
        let Mapping { tile_m, tile_k, tile_n, .. } = self.mapping;
        let (m0, n0, k0) = (tile.row * tile_m, tile.col * tile_n, tile.k * tile_k);
        let rows = tile_m.min(self.input.rows - m0);
        let cols = tile_n.min(self.weight.cols - n0);
        let depth = tile_k.min(self.input.cols - k0);

        let weight_spad = SPAD_BASE;
        let input_spad = SPAD_BASE + u64::from(depth) * u64::from(cols) * u64::from(self.config.precision);

        tile.push(
            Instruction::movin(
                weight_spad,
                self.weight.block_addresses(k0, depth, n0, cols, &self.config),
                OperandTag::Input(1),
            )
            .with_access_id(ctx.ids.generate_mem_access_id()),
        );
        tile.push(
            Instruction::movin(
                input_spad,
                self.input.block_addresses(m0, rows, k0, depth, &self.config),
                OperandTag::Input(0),
            )
            .with_access_id(ctx.ids.generate_mem_access_id()),
        );
        tile.push(Instruction::compute(
            Opcode::GEMM,
            ACCUM_SPAD_BASE,
            rows * cols,
            vec![weight_spad, input_spad],
        ));

        if last_k {
            tile.push(
                Instruction::movout(
                    ACCUM_SPAD_BASE,
                    rows * cols * self.config.precision,
                    self.output.block_addresses(m0, rows, n0, cols, &self.config),
                )
                .with_access_id(ctx.ids.generate_mem_access_id()),
            );
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn take_tiles(&mut self) -> Vec<Tile> {
        std::mem::take(&mut self.tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            core_width: 4,
            core_height: 4,
            sram_size: 1,
            spad_size: 1,
            accum_spad_size: 1,
            precision: 2,
            dram_req_size: 2,
            ..SimulationConfig::default()
        }
    }

    fn operands(m: u32, k: u32, n: u32) -> (GemmOperand, GemmOperand, GemmOperand) {
        (
            GemmOperand::new(0, m, k),
            GemmOperand::new(0x1_0000, k, n),
            GemmOperand::new(0x2_0000, m, n),
        )
    }

    #[test]
    fn test_default_tile_sizes_fit_half_the_scratchpad() {
        let config = config();
        let (input, weight, output) = operands(100, 8, 8);
        let gemm = GemmWs::new(&config, "fc", 0, input, weight, output, None).unwrap();
        let Mapping { tile_m, tile_k, tile_n, .. } = *gemm.mapping();
        assert_eq!((tile_k, tile_n), (4, 4));
        // 512 byte budget, 32 byte weight slice, 16 bytes per row
        assert_eq!(tile_m, 30);
        let footprint = (tile_k * tile_n + tile_m * (tile_k + tile_n)) * config.precision;
        assert!(u64::from(footprint) <= config.spad_bytes() / 2);
    }

    #[test]
    fn test_tiles_iterate_m_n_k() {
        let config = config();
        let (input, weight, output) = operands(8, 8, 8);
        let mut gemm =
            GemmWs::new(&config, "fc", 3, input, weight, output, Some(&Mapping::new(4, 4, 4))).unwrap();
        let mut ctx = CompileContext::new();
        gemm.initialize_tiles(&mut ctx).unwrap();

        let tiles = gemm.tiles();
        assert_eq!(tiles.len(), 8);
        let coords: Vec<(u32, u32, u32)> = tiles.iter().map(|t| (t.row, t.col, t.k)).collect();
        assert_eq!(coords[..3], [(0, 0, 0), (0, 0, 1), (0, 1, 0)]);

        for tile in tiles {
            assert_eq!(tile.optype, "GemmWS");
            assert_eq!(tile.layer_id, 3);
            assert_eq!(tile.accum, tile.k > 0);
            let opcodes: Vec<Opcode> = tile.instructions.iter().map(|i| i.opcode).collect();
            if tile.k == 1 {
                assert_eq!(opcodes, [Opcode::MOVIN, Opcode::MOVIN, Opcode::GEMM, Opcode::MOVOUT]);
                assert_eq!(tile.instructions[3].size, 4 * 4 * 2);
            } else {
                assert_eq!(opcodes, [Opcode::MOVIN, Opcode::MOVIN, Opcode::GEMM]);
            }
            assert_eq!(tile.instructions[0].operand, OperandTag::Input(1));
            assert_eq!(tile.instructions[1].operand, OperandTag::Input(0));
            assert_eq!(tile.instructions[0].size, 16);
            assert_eq!(tile.instructions[2].size, 16);
            assert!(tile.validate().is_ok());
        }
    }

    #[test]
    fn test_ragged_edges() {
        let config = config();
        let (input, weight, output) = operands(5, 6, 3);
        let mut gemm =
            GemmWs::new(&config, "fc", 0, input, weight, output, Some(&Mapping::new(4, 4, 4))).unwrap();
        gemm.initialize_tiles(&mut CompileContext::new()).unwrap();

        // m: 4 + 1, n: 3, k: 4 + 2
        assert_eq!(gemm.tiles().len(), 4);
        let last = gemm.tiles().last().unwrap();
        assert_eq!((last.row, last.k), (1, 1));
        assert_eq!(last.instructions[2].size, 3);
        assert_eq!(last.instructions[1].size, 2);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let config = config();
        let err = GemmWs::new(
            &config,
            "fc",
            0,
            GemmOperand::new(0, 4, 4),
            GemmOperand::new(0, 5, 4),
            GemmOperand::new(0, 4, 4),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn test_oversized_weight_slice_rejected() {
        let config = SimulationConfig {
            core_width: 64,
            core_height: 64,
            ..config()
        };
        let (input, weight, output) = operands(64, 64, 64);
        let err = GemmWs::new(&config, "fc", 0, input, weight, output, None).unwrap_err();
        assert!(matches!(err, Error::Precondition { ref reason, .. } if reason.contains("weight slice")));
    }
}
