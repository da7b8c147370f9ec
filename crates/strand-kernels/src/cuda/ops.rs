//! Kernel dispatch: one function per operation.
//!
//! Each dispatch function validates the launch geometry (the kernels
//! themselves never do), allocates the output buffer, computes the
//! dynamic shared-memory size with its colocated `*_shared_bytes`
//! companion, and launches the instantiation matching `T`. The
//! two-phase weight gradients are the one place two launches are
//! chained here; everything else composes at the caller.

use cudarc::driver::{DeviceRepr, LaunchAsync, ValidAsZeroBits};

use strand_core::{ceil_div, Scalar, View, STRIDE};

use super::context::CudaError;
use super::launch::{get_or_load_func, grid_2d_block_2d, grid_3d};
use super::memory::DeviceBuffer;
use crate::geometry::{
    check_filter_tile, check_pool_block, check_pool_fits_block, check_power_of_two,
    check_same_height, check_same_width, check_view, filter_bank_len,
};
use crate::{cpu_pool, BLOCK_SIZE};

/// Scalar types with a device-side kernel instantiation.
pub trait DeviceScalar: Scalar + DeviceRepr + ValidAsZeroBits + Clone {}
impl DeviceScalar for f32 {}
impl DeviceScalar for f64 {}

/// Hardware ceiling on threads per block; fully-connected forward pads
/// the width up to a power of two and must stay below it.
const MAX_BLOCK_THREADS: usize = 1024;

// ============================================================================
// CUDA sources (embedded at compile time; encoding header prepended)
// ============================================================================

const CONVOLUTION_CU: &str =
    concat!(include_str!("kernels/nucleotide.cuh"), "\n", include_str!("kernels/convolution.cu"));
const POOLING_CU: &str =
    concat!(include_str!("kernels/nucleotide.cuh"), "\n", include_str!("kernels/pooling.cu"));
const FULLY_CONNECTED_CU: &str = concat!(
    include_str!("kernels/nucleotide.cuh"),
    "\n",
    include_str!("kernels/fully_connected.cu")
);

const CONVOLUTION_FUNCS: &[&str] = &[
    "convolve_sequence_f32",
    "convolve_sequence_f64",
    "convolve_sequence_grad_f32",
    "convolve_sequence_grad_f64",
    "gradient_reduce_f32",
    "gradient_reduce_f64",
];
const POOLING_FUNCS: &[&str] = &[
    "max_pool_f32",
    "max_pool_f64",
    "max_pool_grad_f32",
    "max_pool_grad_f64",
    "sum_pool_f32",
    "sum_pool_f64",
    "sum_pool_grad_f32",
    "sum_pool_grad_f64",
];
const FULLY_CONNECTED_FUNCS: &[&str] = &[
    "fully_connected_f32",
    "fully_connected_f64",
    "fully_connected_grad_f32",
    "fully_connected_grad_f64",
];

fn kernel_name<T: DeviceScalar>(base: &str) -> String {
    format!("{}_{}", base, T::KERNEL_SUFFIX)
}

// ============================================================================
// Convolution
// ============================================================================

/// Dynamic shared memory for `convolve_sequence`: the staged filter
/// followed by the sequence tile plus its right halo (one byte each).
pub fn convolve_sequence_shared_bytes<T: Scalar>(block_size: usize, filter_width: usize) -> u32 {
    (filter_width * STRIDE * std::mem::size_of::<T>() + block_size + filter_width - 1) as u32
}

/// Convolution forward: activation = filters ⊛ sequence + bias.
///
/// Output layout: `out[row][f * width + pos]` through `out_view`.
#[allow(clippy::too_many_arguments)]
pub fn convolve_sequence_fwd<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    filters: &DeviceBuffer<T>,
    bias: &DeviceBuffer<T>,
    filter_width: usize,
    n_filters: usize,
    out_view: View,
    block_size: usize,
) -> Result<DeviceBuffer<T>, CudaError> {
    check_filter_tile(filter_width, block_size)?;
    check_same_height(&seq_view, &out_view)?;
    check_same_width(&seq_view, &out_view)?;
    check_view(&seq_view, seq.len(), 1, "sequence")?;
    debug_assert_eq!(filters.len(), filter_bank_len(n_filters, filter_width));

    let width = seq_view.width;
    let height = seq_view.height;
    let out = DeviceBuffer::<T>::zeros(device_idx, out_view.min_len(n_filters))?;

    let dev = out.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "convolution",
        &kernel_name::<T>("convolve_sequence"),
        CONVOLUTION_CU,
        CONVOLUTION_FUNCS,
    )?;
    let cfg = grid_3d(
        ceil_div(width, block_size),
        height,
        n_filters,
        block_size,
        convolve_sequence_shared_bytes::<T>(block_size, filter_width),
    );
    unsafe {
        f.launch(
            cfg,
            (
                seq.as_cuda_slice(),
                filters.as_cuda_slice(),
                bias.as_cuda_slice(),
                out.as_cuda_slice(),
                seq_view.offset as u32,
                seq_view.row_stride as u32,
                out_view.offset as u32,
                out_view.row_stride as u32,
                width as u32,
                height as u32,
                filter_width as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(out)
}

/// Dynamic shared memory for `convolve_sequence_grad`: the upstream
/// gradient tile with left halo, then four per-base reduction planes.
pub fn convolve_sequence_grad_shared_bytes<T: Scalar>(
    block_size: usize,
    filter_width: usize,
) -> u32 {
    ((block_size + filter_width - 1 + STRIDE * block_size) * std::mem::size_of::<T>()) as u32
}

/// Convolution backward, phase one: per-block partial weight gradients.
///
/// Returns the partial tensor
/// `[(f * filter_width + k) * n_blocks + block][STRIDE]` together with
/// `n_blocks`; feed it to [`gradient_reduce`].
#[allow(clippy::too_many_arguments)]
pub fn convolve_sequence_grad<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    df_output: &DeviceBuffer<T>,
    df_view: View,
    filter_width: usize,
    n_filters: usize,
    block_size: usize,
) -> Result<(DeviceBuffer<T>, usize), CudaError> {
    check_power_of_two(block_size)?;
    check_filter_tile(filter_width, block_size)?;
    check_same_height(&seq_view, &df_view)?;
    check_same_width(&seq_view, &df_view)?;
    check_view(&seq_view, seq.len(), 1, "sequence")?;
    check_view(&df_view, df_output.len(), n_filters, "upstream gradient")?;

    let width = seq_view.width;
    let height = seq_view.height;
    let n_blocks = ceil_div(width, block_size);
    let partial =
        DeviceBuffer::<T>::zeros(device_idx, n_filters * filter_width * n_blocks * STRIDE)?;

    let dev = partial.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "convolution",
        &kernel_name::<T>("convolve_sequence_grad"),
        CONVOLUTION_CU,
        CONVOLUTION_FUNCS,
    )?;
    let cfg = grid_3d(
        n_blocks,
        filter_width,
        n_filters,
        block_size,
        convolve_sequence_grad_shared_bytes::<T>(block_size, filter_width),
    );
    unsafe {
        f.launch(
            cfg,
            (
                seq.as_cuda_slice(),
                df_output.as_cuda_slice(),
                partial.as_cuda_slice(),
                seq_view.offset as u32,
                seq_view.row_stride as u32,
                df_view.offset as u32,
                df_view.row_stride as u32,
                width as u32,
                height as u32,
                filter_width as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok((partial, n_blocks))
}

/// Dynamic shared memory for `gradient_reduce`: four per-base planes.
pub fn gradient_reduce_shared_bytes<T: Scalar>(block_size: usize) -> u32 {
    (STRIDE * block_size * std::mem::size_of::<T>()) as u32
}

/// Phase two: fold per-block partials into the final weight gradient
/// `[(f * filter_width + k)][STRIDE]`. Also serves the fully-connected
/// backward pass with `filter_width := width`.
pub fn gradient_reduce<T: DeviceScalar>(
    device_idx: usize,
    partial: &DeviceBuffer<T>,
    n_filters: usize,
    filter_width: usize,
    n_partial: usize,
    block_size: usize,
) -> Result<DeviceBuffer<T>, CudaError> {
    check_power_of_two(block_size)?;
    debug_assert_eq!(partial.len(), n_filters * filter_width * n_partial * STRIDE);

    let grad = DeviceBuffer::<T>::zeros(device_idx, n_filters * filter_width * STRIDE)?;
    let dev = grad.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "convolution",
        &kernel_name::<T>("gradient_reduce"),
        CONVOLUTION_CU,
        CONVOLUTION_FUNCS,
    )?;
    let cfg = grid_3d(
        filter_width,
        n_filters,
        1,
        block_size,
        gradient_reduce_shared_bytes::<T>(block_size),
    );
    unsafe {
        f.launch(cfg, (partial.as_cuda_slice(), grad.as_cuda_slice(), n_partial as u32))
            .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(grad)
}

/// Both gradient phases chained, returning the reduced
/// `[n_filters][filter_width][STRIDE]` weight gradient.
#[allow(clippy::too_many_arguments)]
pub fn convolve_sequence_bwd<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    df_output: &DeviceBuffer<T>,
    df_view: View,
    filter_width: usize,
    n_filters: usize,
    block_size: usize,
) -> Result<DeviceBuffer<T>, CudaError> {
    let (partial, n_blocks) = convolve_sequence_grad(
        device_idx, seq, seq_view, df_output, df_view, filter_width, n_filters, block_size,
    )?;
    gradient_reduce(device_idx, &partial, n_filters, filter_width, n_blocks, BLOCK_SIZE)
}

// ============================================================================
// Max-pooling
// ============================================================================

/// Dynamic shared memory for `max_pool`: the staged input windows.
pub fn max_pool_shared_bytes<T: Scalar>(block_size: usize, pool_size: usize) -> u32 {
    (block_size * pool_size * std::mem::size_of::<T>()) as u32
}

/// Max-pool forward. Returns the pooled values and the argmax tensor
/// (one winning in-window offset per pooled element), both through
/// `out_view` with `n_filters` planes of `width / pool_size`.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_fwd<T: DeviceScalar>(
    device_idx: usize,
    input: &DeviceBuffer<T>,
    in_view: View,
    n_filters: usize,
    pool_size: usize,
    out_view: View,
    block_size: usize,
) -> Result<(DeviceBuffer<T>, DeviceBuffer<u32>), CudaError> {
    check_pool_fits_block(pool_size, block_size * pool_size)?;
    check_same_height(&in_view, &out_view)?;
    check_view(&in_view, input.len(), n_filters, "pool input")?;

    let width = in_view.width;
    let height = in_view.height;
    let width_pooled = cpu_pool::max_pooled_width(width, pool_size);
    debug_assert_eq!(out_view.width, width_pooled);

    let pooled = DeviceBuffer::<T>::zeros(device_idx, out_view.min_len(n_filters))?;
    let argmax = DeviceBuffer::<u32>::zeros(device_idx, out_view.min_len(n_filters))?;

    let dev = pooled.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "pooling",
        &kernel_name::<T>("max_pool"),
        POOLING_CU,
        POOLING_FUNCS,
    )?;
    let cfg = grid_3d(
        ceil_div(width_pooled.max(1), block_size),
        height,
        n_filters,
        block_size,
        max_pool_shared_bytes::<T>(block_size, pool_size),
    );
    unsafe {
        f.launch(
            cfg,
            (
                input.as_cuda_slice(),
                pooled.as_cuda_slice(),
                argmax.as_cuda_slice(),
                in_view.offset as u32,
                in_view.row_stride as u32,
                out_view.offset as u32,
                out_view.row_stride as u32,
                width as u32,
                height as u32,
                pool_size as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok((pooled, argmax))
}

/// Dynamic shared memory for `max_pool_grad`: the pooled gradients and
/// argmax entries the block's windows touch.
pub fn max_pool_grad_shared_bytes<T: Scalar>(block_size: usize, pool_size: usize) -> u32 {
    let n_win = block_size / pool_size;
    (n_win * (std::mem::size_of::<T>() + std::mem::size_of::<u32>())) as u32
}

/// Max-pool backward: scatter each pooled gradient to its argmax
/// position; everything else (including the tail beyond the last full
/// window) is zeroed.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_bwd<T: DeviceScalar>(
    device_idx: usize,
    argmax: &DeviceBuffer<u32>,
    df_pooled: &DeviceBuffer<T>,
    df_view: View,
    n_filters: usize,
    pool_size: usize,
    grad_view: View,
    block_size: usize,
) -> Result<DeviceBuffer<T>, CudaError> {
    check_pool_block(block_size, pool_size)?;
    check_same_height(&df_view, &grad_view)?;
    check_view(&df_view, df_pooled.len(), n_filters, "pooled gradient")?;

    let width = grad_view.width;
    let height = grad_view.height;
    debug_assert_eq!(df_view.width, cpu_pool::max_pooled_width(width, pool_size));

    let grad = DeviceBuffer::<T>::zeros(device_idx, grad_view.min_len(n_filters))?;
    let dev = grad.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "pooling",
        &kernel_name::<T>("max_pool_grad"),
        POOLING_CU,
        POOLING_FUNCS,
    )?;
    let cfg = grid_3d(
        ceil_div(width, block_size),
        height,
        n_filters,
        block_size,
        max_pool_grad_shared_bytes::<T>(block_size, pool_size),
    );
    unsafe {
        f.launch(
            cfg,
            (
                argmax.as_cuda_slice(),
                df_pooled.as_cuda_slice(),
                grad.as_cuda_slice(),
                df_view.offset as u32,
                df_view.row_stride as u32,
                grad_view.offset as u32,
                grad_view.row_stride as u32,
                width as u32,
                height as u32,
                pool_size as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(grad)
}

// ============================================================================
// Sum-pooling
// ============================================================================

/// Dynamic shared memory for `sum_pool`: one reduction slot per thread.
pub fn sum_pool_shared_bytes<T: Scalar>(block_size: usize) -> u32 {
    (block_size * std::mem::size_of::<T>()) as u32
}

/// Sum-pool forward. One block reduces one window; the block size is
/// the pool size padded to a power of two.
pub fn sum_pool_fwd<T: DeviceScalar>(
    device_idx: usize,
    input: &DeviceBuffer<T>,
    in_view: View,
    n_filters: usize,
    pool_size: usize,
    out_view: View,
) -> Result<DeviceBuffer<T>, CudaError> {
    check_pool_fits_block(pool_size, MAX_BLOCK_THREADS)?;
    let block_size = pool_size.next_power_of_two().max(2);
    check_power_of_two(block_size)?;
    check_same_height(&in_view, &out_view)?;
    check_view(&in_view, input.len(), n_filters, "pool input")?;

    let width = in_view.width;
    let height = in_view.height;
    let width_pooled = cpu_pool::sum_pooled_width(width, pool_size);
    debug_assert_eq!(out_view.width, width_pooled);

    let pooled = DeviceBuffer::<T>::zeros(device_idx, out_view.min_len(n_filters))?;
    let dev = pooled.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "pooling",
        &kernel_name::<T>("sum_pool"),
        POOLING_CU,
        POOLING_FUNCS,
    )?;
    let cfg = grid_3d(
        width_pooled,
        height,
        n_filters,
        block_size,
        sum_pool_shared_bytes::<T>(block_size),
    );
    unsafe {
        f.launch(
            cfg,
            (
                input.as_cuda_slice(),
                pooled.as_cuda_slice(),
                in_view.offset as u32,
                in_view.row_stride as u32,
                out_view.offset as u32,
                out_view.row_stride as u32,
                width as u32,
                pool_size as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(pooled)
}

/// Dynamic shared memory for `sum_pool_grad`: the one staged upstream
/// value a block broadcasts.
pub fn sum_pool_grad_shared_bytes<T: Scalar>() -> u32 {
    std::mem::size_of::<T>() as u32
}

/// Sum-pool backward: broadcast each pooled gradient unchanged into its
/// window.
pub fn sum_pool_bwd<T: DeviceScalar>(
    device_idx: usize,
    df_pooled: &DeviceBuffer<T>,
    df_view: View,
    n_filters: usize,
    pool_size: usize,
    grad_view: View,
) -> Result<DeviceBuffer<T>, CudaError> {
    check_pool_fits_block(pool_size, MAX_BLOCK_THREADS)?;
    check_same_height(&df_view, &grad_view)?;
    check_view(&df_view, df_pooled.len(), n_filters, "pooled gradient")?;

    let width = grad_view.width;
    let height = grad_view.height;
    let width_pooled = cpu_pool::sum_pooled_width(width, pool_size);
    debug_assert_eq!(df_view.width, width_pooled);

    let grad = DeviceBuffer::<T>::zeros(device_idx, grad_view.min_len(n_filters))?;
    let dev = grad.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "pooling",
        &kernel_name::<T>("sum_pool_grad"),
        POOLING_CU,
        POOLING_FUNCS,
    )?;
    // Grid (window, filter, row), one thread per window element.
    let cfg = grid_3d(width_pooled, n_filters, height, pool_size, sum_pool_grad_shared_bytes::<T>());
    unsafe {
        f.launch(
            cfg,
            (
                df_pooled.as_cuda_slice(),
                grad.as_cuda_slice(),
                df_view.offset as u32,
                df_view.row_stride as u32,
                grad_view.offset as u32,
                grad_view.row_stride as u32,
                width as u32,
                pool_size as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(grad)
}

// ============================================================================
// Fully-connected
// ============================================================================

/// Dynamic shared memory for `fully_connected`: the staged filter plus
/// the per-row product buffer.
pub fn fully_connected_shared_bytes<T: Scalar>(
    width: usize,
    padded_width: usize,
    rows_per_block: usize,
) -> u32 {
    ((width * STRIDE + rows_per_block * padded_width) * std::mem::size_of::<T>()) as u32
}

/// Fully-connected forward: one output scalar per (row, filter), bias
/// added once. `out_view.width == n_filters`.
pub fn fully_connected_fwd<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    filters: &DeviceBuffer<T>,
    bias: &DeviceBuffer<T>,
    n_filters: usize,
    out_view: View,
) -> Result<DeviceBuffer<T>, CudaError> {
    let width = seq_view.width;
    let padded_width = width.next_power_of_two().max(2);
    check_filter_tile(width, MAX_BLOCK_THREADS)?;
    check_same_height(&seq_view, &out_view)?;
    check_view(&seq_view, seq.len(), 1, "sequence")?;
    debug_assert_eq!(out_view.width, n_filters);
    debug_assert_eq!(filters.len(), filter_bank_len(n_filters, width));

    let height = seq_view.height;
    let rows_per_block = (BLOCK_SIZE / padded_width).max(1);

    let out = DeviceBuffer::<T>::zeros(device_idx, out_view.min_len(1))?;
    let dev = out.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "fully_connected",
        &kernel_name::<T>("fully_connected"),
        FULLY_CONNECTED_CU,
        FULLY_CONNECTED_FUNCS,
    )?;
    let cfg = grid_2d_block_2d(
        ceil_div(height, rows_per_block),
        n_filters,
        padded_width,
        rows_per_block,
        fully_connected_shared_bytes::<T>(width, padded_width, rows_per_block),
    );
    unsafe {
        f.launch(
            cfg,
            (
                seq.as_cuda_slice(),
                filters.as_cuda_slice(),
                bias.as_cuda_slice(),
                out.as_cuda_slice(),
                seq_view.offset as u32,
                seq_view.row_stride as u32,
                out_view.offset as u32,
                out_view.row_stride as u32,
                width as u32,
                height as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok(out)
}

/// Dynamic shared memory for `fully_connected_grad`: four per-base
/// reduction planes.
pub fn fully_connected_grad_shared_bytes<T: Scalar>(block_size: usize) -> u32 {
    (STRIDE * block_size * std::mem::size_of::<T>()) as u32
}

/// Fully-connected backward, phase one: per-row-block partial weight
/// gradients `[(f * width + col) * n_blocks + block][STRIDE]`; fold
/// with [`gradient_reduce`] (`filter_width := width`).
pub fn fully_connected_grad<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    df_output: &DeviceBuffer<T>,
    df_view: View,
    n_filters: usize,
    block_size: usize,
) -> Result<(DeviceBuffer<T>, usize), CudaError> {
    check_power_of_two(block_size)?;
    check_same_height(&seq_view, &df_view)?;
    check_view(&seq_view, seq.len(), 1, "sequence")?;
    check_view(&df_view, df_output.len(), 1, "upstream gradient")?;
    debug_assert_eq!(df_view.width, n_filters);

    let width = seq_view.width;
    let height = seq_view.height;
    let n_blocks = ceil_div(height, block_size);
    let partial = DeviceBuffer::<T>::zeros(device_idx, n_filters * width * n_blocks * STRIDE)?;

    let dev = partial.device()?;
    let f = get_or_load_func(
        &dev,
        device_idx,
        "fully_connected",
        &kernel_name::<T>("fully_connected_grad"),
        FULLY_CONNECTED_CU,
        FULLY_CONNECTED_FUNCS,
    )?;
    let cfg = grid_3d(
        n_blocks,
        width,
        n_filters,
        block_size,
        fully_connected_grad_shared_bytes::<T>(block_size),
    );
    unsafe {
        f.launch(
            cfg,
            (
                seq.as_cuda_slice(),
                df_output.as_cuda_slice(),
                partial.as_cuda_slice(),
                seq_view.offset as u32,
                seq_view.row_stride as u32,
                df_view.offset as u32,
                df_view.row_stride as u32,
                width as u32,
                height as u32,
            ),
        )
        .map_err(|e| CudaError::LaunchError(e.to_string()))?;
    }
    Ok((partial, n_blocks))
}

/// Both fully-connected gradient phases chained.
pub fn fully_connected_bwd<T: DeviceScalar>(
    device_idx: usize,
    seq: &DeviceBuffer<u8>,
    seq_view: View,
    df_output: &DeviceBuffer<T>,
    df_view: View,
    n_filters: usize,
    block_size: usize,
) -> Result<DeviceBuffer<T>, CudaError> {
    let (partial, n_blocks) = fully_connected_grad(
        device_idx, seq, seq_view, df_output, df_view, n_filters, block_size,
    )?;
    gradient_reduce(device_idx, &partial, n_filters, seq_view.width, n_blocks, BLOCK_SIZE)
}
