//! Pre-launch geometry validation.
//!
//! The kernels themselves never check their preconditions; a bad launch
//! produces garbage, not an error. These validators are the boundary
//! where the orchestration layer rejects malformed configurations
//! before anything is launched. The CUDA dispatch functions call them;
//! host code composing CPU kernels can call them directly.

use strand_core::{View, STRIDE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("block size {0} is not a power of two (tree reduction halves unconditionally)")]
    BlockNotPowerOfTwo(usize),

    #[error("block size {block} is not a multiple of pool size {pool}")]
    BlockNotPoolMultiple { block: usize, pool: usize },

    #[error("pool size {pool} exceeds block size {block}")]
    PoolExceedsBlock { pool: usize, block: usize },

    #[error("filter width {fw} exceeds tile capacity {cap}")]
    FilterExceedsTile { fw: usize, cap: usize },

    #[error("filter width must be nonzero")]
    EmptyFilter,

    #[error("pool size must be nonzero")]
    EmptyPool,

    #[error("height mismatch: {a} vs {b}")]
    HeightMismatch { a: usize, b: usize },

    #[error("width mismatch: {a} vs {b}")]
    WidthMismatch { a: usize, b: usize },

    #[error("{what}: {msg}")]
    ViewOutOfBounds { what: &'static str, msg: String },
}

pub fn check_power_of_two(block_size: usize) -> Result<(), GeometryError> {
    if block_size < 2 || !block_size.is_power_of_two() {
        return Err(GeometryError::BlockNotPowerOfTwo(block_size));
    }
    Ok(())
}

pub fn check_view(
    view: &View,
    buf_len: usize,
    planes: usize,
    what: &'static str,
) -> Result<(), GeometryError> {
    view.check_fits(buf_len, planes)
        .map_err(|e| GeometryError::ViewOutOfBounds { what, msg: e.to_string() })
}

pub fn check_same_height(a: &View, b: &View) -> Result<(), GeometryError> {
    if a.height != b.height {
        return Err(GeometryError::HeightMismatch { a: a.height, b: b.height });
    }
    Ok(())
}

pub fn check_same_width(a: &View, b: &View) -> Result<(), GeometryError> {
    if a.width != b.width {
        return Err(GeometryError::WidthMismatch { a: a.width, b: b.width });
    }
    Ok(())
}

/// Convolution forward/backward tile constraint: the halo loader uses
/// one thread per halo element, so the filter must fit the block.
pub fn check_filter_tile(filter_width: usize, block_size: usize) -> Result<(), GeometryError> {
    if filter_width == 0 {
        return Err(GeometryError::EmptyFilter);
    }
    if filter_width > block_size {
        return Err(GeometryError::FilterExceedsTile { fw: filter_width, cap: block_size });
    }
    Ok(())
}

/// Max-pool backward covers each input element with one thread and each
/// pooled window with a whole number of them.
pub fn check_pool_block(block_size: usize, pool_size: usize) -> Result<(), GeometryError> {
    if pool_size == 0 {
        return Err(GeometryError::EmptyPool);
    }
    if block_size % pool_size != 0 {
        return Err(GeometryError::BlockNotPoolMultiple { block: block_size, pool: pool_size });
    }
    Ok(())
}

/// Sum-pool forward reduces one window per block.
pub fn check_pool_fits_block(pool_size: usize, block_size: usize) -> Result<(), GeometryError> {
    if pool_size == 0 {
        return Err(GeometryError::EmptyPool);
    }
    if pool_size > block_size {
        return Err(GeometryError::PoolExceedsBlock { pool: pool_size, block: block_size });
    }
    Ok(())
}

/// Filter bank length for `n_filters` filters of `filter_width` positions.
pub fn filter_bank_len(n_filters: usize, filter_width: usize) -> usize {
    n_filters * filter_width * STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two() {
        assert!(check_power_of_two(256).is_ok());
        assert!(check_power_of_two(2).is_ok());
        assert!(check_power_of_two(1).is_err());
        assert!(check_power_of_two(0).is_err());
        assert!(check_power_of_two(96).is_err());
    }

    #[test]
    fn test_pool_block_divisibility() {
        assert!(check_pool_block(256, 4).is_ok());
        assert!(check_pool_block(256, 6).is_err());
        assert!(check_pool_block(256, 0).is_err());
        assert!(check_pool_fits_block(4, 256).is_ok());
        assert!(check_pool_fits_block(300, 256).is_err());
    }

    #[test]
    fn test_filter_tile() {
        assert!(check_filter_tile(12, 256).is_ok());
        assert!(check_filter_tile(0, 256).is_err());
        assert!(check_filter_tile(257, 256).is_err());
    }

    #[test]
    fn test_view_checks() {
        let a = View::contiguous(8, 4);
        let b = View::contiguous(8, 5);
        assert!(check_same_height(&a, &a).is_ok());
        assert!(check_same_height(&a, &b).is_err());
        assert!(check_view(&a, 32, 1, "seq").is_ok());
        assert!(check_view(&a, 31, 1, "seq").is_err());
    }
}
