//! CPU reference kernels for max-pooling and sum-pooling.
//!
//! Pooling runs along the position axis independently per (row, filter)
//! plane. Max-pool keeps only full windows (floor division) and records
//! the winning in-window offset for gradient routing; sum-pool keeps a
//! partial final window (ceiling division) and its backward pass
//! broadcasts the upstream gradient unchanged.

use rayon::prelude::*;

use strand_core::{ceil_div, Scalar, View};

const MIN_PAR_ROWS: usize = 8;

/// Pooled width of a max-pool output: full windows only.
pub fn max_pooled_width(width: usize, pool_size: usize) -> usize {
    width / pool_size
}

/// Pooled width of a sum-pool output: a trailing partial window counts.
pub fn sum_pooled_width(width: usize, pool_size: usize) -> usize {
    ceil_div(width, pool_size)
}

/// Max-pool forward: per (row, filter, window) writes the window maximum
/// and the winning in-window offset. Ties resolve to the lowest offset.
///
/// `input` has `n_filters` planes of `in_view.width`; `pooled` and
/// `argmax` share `out_view` with planes of `max_pooled_width(..)`.
pub fn max_pool_fwd<T: Scalar>(
    input: &[T],
    in_view: View,
    n_filters: usize,
    pool_size: usize,
    pooled: &mut [T],
    argmax: &mut [u32],
    out_view: View,
) {
    debug_assert_eq!(in_view.height, out_view.height);
    debug_assert_eq!(out_view.width, max_pooled_width(in_view.width, pool_size));
    let width = in_view.width;
    let width_pooled = out_view.width;
    let height = in_view.height;

    let row_op = |row: usize, pooled_row: &mut [T], argmax_row: &mut [u32]| {
        for f in 0..n_filters {
            for w in 0..width_pooled {
                let first = in_view.idx(row, f * width + w * pool_size);
                let mut best = input[first];
                let mut best_off = 0u32;
                for j in 1..pool_size {
                    let v = input[first + j];
                    if v > best {
                        best = v;
                        best_off = j as u32;
                    }
                }
                pooled_row[out_view.offset + f * width_pooled + w] = best;
                argmax_row[out_view.offset + f * width_pooled + w] = best_off;
            }
        }
    };

    if height >= MIN_PAR_ROWS {
        pooled
            .par_chunks_mut(out_view.row_stride)
            .zip(argmax.par_chunks_mut(out_view.row_stride))
            .take(height)
            .enumerate()
            .for_each(|(row, (p, a))| row_op(row, p, a));
    } else {
        for (row, (p, a)) in pooled
            .chunks_mut(out_view.row_stride)
            .zip(argmax.chunks_mut(out_view.row_stride))
            .take(height)
            .enumerate()
        {
            row_op(row, p, a);
        }
    }
}

/// Max-pool backward: routes each pooled element's upstream gradient to
/// exactly the input position its argmax recorded; every other position
/// in the window (and any tail positions beyond the last full window)
/// receives zero.
pub fn max_pool_bwd<T: Scalar>(
    argmax: &[u32],
    df_pooled: &[T],
    df_view: View,
    n_filters: usize,
    pool_size: usize,
    grad: &mut [T],
    grad_view: View,
) {
    debug_assert_eq!(df_view.height, grad_view.height);
    debug_assert_eq!(df_view.width, max_pooled_width(grad_view.width, pool_size));
    let width = grad_view.width;
    let width_pooled = df_view.width;
    let height = grad_view.height;

    let row_op = |row: usize, grad_row: &mut [T]| {
        for f in 0..n_filters {
            for pos in 0..width {
                let w = pos / pool_size;
                let off = (pos % pool_size) as u32;
                let g = if w < width_pooled && argmax[df_view.idx(row, f * width_pooled + w)] == off
                {
                    df_pooled[df_view.idx(row, f * width_pooled + w)]
                } else {
                    T::ZERO
                };
                grad_row[grad_view.offset + f * width + pos] = g;
            }
        }
    };

    if height >= MIN_PAR_ROWS {
        grad.par_chunks_mut(grad_view.row_stride)
            .take(height)
            .enumerate()
            .for_each(|(row, grad_row)| row_op(row, grad_row));
    } else {
        for (row, grad_row) in grad.chunks_mut(grad_view.row_stride).take(height).enumerate() {
            row_op(row, grad_row);
        }
    }
}

/// Sum-pool forward: per (row, filter, window) sums the window; the
/// trailing partial window sums only the elements present.
pub fn sum_pool_fwd<T: Scalar>(
    input: &[T],
    in_view: View,
    n_filters: usize,
    pool_size: usize,
    pooled: &mut [T],
    out_view: View,
) {
    debug_assert_eq!(in_view.height, out_view.height);
    debug_assert_eq!(out_view.width, sum_pooled_width(in_view.width, pool_size));
    let width = in_view.width;
    let width_pooled = out_view.width;
    let height = in_view.height;

    let row_op = |row: usize, pooled_row: &mut [T]| {
        for f in 0..n_filters {
            for w in 0..width_pooled {
                let mut acc = T::ZERO;
                for j in 0..pool_size {
                    let pos = w * pool_size + j;
                    if pos < width {
                        acc += input[in_view.idx(row, f * width + pos)];
                    }
                }
                pooled_row[out_view.offset + f * width_pooled + w] = acc;
            }
        }
    };

    if height >= MIN_PAR_ROWS {
        pooled
            .par_chunks_mut(out_view.row_stride)
            .take(height)
            .enumerate()
            .for_each(|(row, p)| row_op(row, p));
    } else {
        for (row, p) in pooled.chunks_mut(out_view.row_stride).take(height).enumerate() {
            row_op(row, p);
        }
    }
}

/// Sum-pool backward: the derivative of a sum is uniform, so the
/// upstream gradient is broadcast unchanged to every input position of
/// its window. No argmax bookkeeping, no division.
pub fn sum_pool_bwd<T: Scalar>(
    df_pooled: &[T],
    df_view: View,
    n_filters: usize,
    pool_size: usize,
    grad: &mut [T],
    grad_view: View,
) {
    debug_assert_eq!(df_view.height, grad_view.height);
    debug_assert_eq!(df_view.width, sum_pooled_width(grad_view.width, pool_size));
    let width = grad_view.width;
    let width_pooled = df_view.width;
    let height = grad_view.height;

    let row_op = |row: usize, grad_row: &mut [T]| {
        for f in 0..n_filters {
            for pos in 0..width {
                let w = pos / pool_size;
                grad_row[grad_view.offset + f * width + pos] =
                    df_pooled[df_view.idx(row, f * width_pooled + w)];
            }
        }
    };

    if height >= MIN_PAR_ROWS {
        grad.par_chunks_mut(grad_view.row_stride)
            .take(height)
            .enumerate()
            .for_each(|(row, g)| row_op(row, g));
    } else {
        for (row, g) in grad.chunks_mut(grad_view.row_stride).take(height).enumerate() {
            row_op(row, g);
        }
    }
}
