//! CPU reference kernels for the fully-connected layer.
//!
//! Convolution specialized to `filter_width == width`: each filter spans
//! the whole input and produces one value per row, so the sliding window
//! disappears and the backward pass reduces over rows instead of
//! positions. The cross-block fold reuses `cpu_conv::gradient_reduce`
//! with `filter_width := width`.

use rayon::prelude::*;

use strand_core::{accumulate_bases, ceil_div, score_position, Scalar, View, STRIDE};

use crate::cpu_conv::gradient_reduce;

const MIN_PAR_ROWS: usize = 8;

/// Fully-connected forward: `out[row][f] = bias[f] + Σ_c
/// score(filter[f][c], seq[row][c])`.
///
/// `out_view.width` is `n_filters` (one value per filter per row).
pub fn fully_connected_fwd<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    filters: &[T],
    bias: &[T],
    n_filters: usize,
    out: &mut [T],
    out_view: View,
) {
    debug_assert_eq!(seq_view.height, out_view.height);
    debug_assert_eq!(out_view.width, n_filters);
    debug_assert_eq!(filters.len(), n_filters * seq_view.width * STRIDE);
    let width = seq_view.width;
    let height = seq_view.height;

    let row_op = |row: usize, out_row: &mut [T]| {
        for f in 0..n_filters {
            let filter = &filters[f * width * STRIDE..(f + 1) * width * STRIDE];
            let mut acc = bias[f];
            for c in 0..width {
                acc += score_position(seq[seq_view.idx(row, c)], &filter[c * STRIDE..]);
            }
            out_row[out_view.offset + f] = acc;
        }
    };

    if height >= MIN_PAR_ROWS {
        out.par_chunks_mut(out_view.row_stride)
            .take(height)
            .enumerate()
            .for_each(|(row, out_row)| row_op(row, out_row));
    } else {
        for (row, out_row) in out.chunks_mut(out_view.row_stride).take(height).enumerate() {
            row_op(row, out_row);
        }
    }
}

/// Row blocks the backward pass partitions the batch into.
pub fn grad_row_block_count(height: usize, block_size: usize) -> usize {
    ceil_div(height, block_size)
}

/// Fully-connected backward, phase one: per-row-block partial weight
/// gradients. Layout mirrors the convolution partials with
/// `filter_width := width`:
/// `[(f * width + col) * n_row_blocks + block][STRIDE]`.
pub fn fully_connected_grad<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    df_output: &[T],
    df_view: View,
    n_filters: usize,
    block_size: usize,
    partial: &mut [T],
) {
    debug_assert_eq!(seq_view.height, df_view.height);
    debug_assert_eq!(df_view.width, n_filters);
    let width = seq_view.width;
    let height = seq_view.height;
    let n_blocks = grad_row_block_count(height, block_size);
    debug_assert_eq!(partial.len(), n_filters * width * n_blocks * STRIDE);

    partial
        .par_chunks_mut(STRIDE)
        .enumerate()
        .for_each(|(chunk, out4)| {
            let blk = chunk % n_blocks;
            let fc = chunk / n_blocks;
            let col = fc % width;
            let f = fc / width;

            let mut acc = [T::ZERO; STRIDE];
            for row in (blk * block_size)..(((blk + 1) * block_size).min(height)) {
                let code = seq[seq_view.idx(row, col)];
                let g = df_output[df_view.idx(row, f)];
                accumulate_bases(code, g, &mut acc);
            }
            out4.copy_from_slice(&acc);
        });
}

/// Both gradient phases chained; returns the reduced
/// `[n_filters][width][STRIDE]` weight gradient.
pub fn fully_connected_bwd<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    df_output: &[T],
    df_view: View,
    n_filters: usize,
    block_size: usize,
) -> Vec<T> {
    let width = seq_view.width;
    let n_blocks = grad_row_block_count(seq_view.height, block_size);
    tracing::debug!(n_blocks, width, n_filters, "fully-connected weight-gradient partials");
    let mut partial = vec![T::ZERO; n_filters * width * n_blocks * STRIDE];
    fully_connected_grad(seq, seq_view, df_output, df_view, n_filters, block_size, &mut partial);
    let mut grad = vec![T::ZERO; n_filters * width * STRIDE];
    gradient_reduce(&partial, n_filters, width, n_blocks, &mut grad);
    grad
}
