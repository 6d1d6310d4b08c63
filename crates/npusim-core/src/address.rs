//! Logical tensor coordinates to DRAM byte offsets
//!
//! Operators resolve every element they touch through these helpers and add
//! the owning tensor's base address. Offsets are aligned down to the DRAM
//! request granularity, so neighbouring elements that share a request
//! collapse to the same address once collected into a set.
//!
//! # Example
//!
//! ```
//! use npusim_core::address::{flat_offset, make_address};
//! use npusim_core::SimulationConfig;
//!
//! assert_eq!(flat_offset(&[1, 2, 3], &[4, 5, 6]), 1 * 30 + 2 * 6 + 3);
//!
//! let config = SimulationConfig::default(); // precision 2, 32-byte requests
//! assert_eq!(make_address([0, 0, 15], [1, 1, 64], &config), 0);
//! assert_eq!(make_address([0, 0, 16], [1, 1, 64], &config), 32);
//! ```

use crate::config::{Layout, SimulationConfig};
use npusim_isa::Addr;

/// Row-major element offset of `index` within `dims`
///
/// Both slices must have the same rank; extra trailing entries of the longer
/// one are ignored.
pub fn flat_offset(index: &[u32], dims: &[u32]) -> u64 {
    index
        .iter()
        .zip(dims)
        .fold(0u64, |acc, (&i, &d)| acc * u64::from(d) + u64::from(i))
}

/// Aligned byte offset of a 3D coordinate
///
/// # Arguments
///
/// * `index` - coordinate, outermost dimension first
/// * `dims` - extent of each dimension
/// * `config` - supplies the element precision and request granularity
pub fn make_address(index: [u32; 3], dims: [u32; 3], config: &SimulationConfig) -> Addr {
    let elements = flat_offset(&index, &dims);
    config.align_address(elements * u64::from(config.precision))
}

/// Element offset of an activation coordinate
///
/// `coord` and `shape` are both given in logical (N, C, H, W) order; the
/// layout decides how they are laid out in memory.
pub fn activation_offset(coord: [u32; 4], shape: [u32; 4], layout: Layout) -> u64 {
    let [n, c, h, w] = coord;
    let [dn, dc, dh, dw] = shape;
    match layout {
        Layout::Nchw => flat_offset(&[n, c, h, w], &[dn, dc, dh, dw]),
        Layout::Nhwc => flat_offset(&[n, h, w, c], &[dn, dh, dw, dc]),
    }
}

/// Aligned byte address of an activation coordinate within a tensor at `base`
pub fn activation_address(
    base: Addr,
    coord: [u32; 4],
    shape: [u32; 4],
    config: &SimulationConfig,
) -> Addr {
    let elements = activation_offset(coord, shape, config.activation_layout());
    config.align_address(base + elements * u64::from(config.precision))
}
