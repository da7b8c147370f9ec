//! CPU reference kernels for 1D sequence convolution.
//!
//! Same semantics as the CUDA kernels, written as plain loops: these are
//! the ground truth the GPU path is tested against and the fallback when
//! no device is present. The weight gradient keeps the GPU's two-phase
//! shape (per-block partial sums, then a cross-block fold) so both paths
//! produce bit-comparable intermediate tensors.

use rayon::prelude::*;

use strand_core::{accumulate_bases, ceil_div, score_position, Scalar, View, STRIDE};

/// Minimum rows before we use rayon parallelism.
const MIN_PAR_ROWS: usize = 8;

/// Convolution forward: `out[row][f * width + pos] = bias[f] + Σ_k
/// score(filter[f][k], seq[row][pos + k])`, windows clipped at the
/// sequence end.
///
/// `filters` is `[n_filters][filter_width][STRIDE]` row-major; `out` is
/// addressed through `out_view` with `n_filters` interleaved planes.
pub fn convolve_sequence_fwd<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    filters: &[T],
    bias: &[T],
    filter_width: usize,
    n_filters: usize,
    out: &mut [T],
    out_view: View,
) {
    debug_assert_eq!(seq_view.height, out_view.height);
    debug_assert_eq!(seq_view.width, out_view.width);
    debug_assert_eq!(filters.len(), n_filters * filter_width * STRIDE);
    let width = seq_view.width;
    let height = seq_view.height;

    let row_op = |row: usize, out_row: &mut [T]| {
        for f in 0..n_filters {
            let filter = &filters[f * filter_width * STRIDE..(f + 1) * filter_width * STRIDE];
            for pos in 0..width {
                let mut acc = bias[f];
                for k in 0..filter_width {
                    if pos + k < width {
                        let code = seq[seq_view.idx(row, pos + k)];
                        acc += score_position(code, &filter[k * STRIDE..]);
                    }
                }
                out_row[out_view.offset + f * width + pos] = acc;
            }
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

/// Number of position blocks the weight-gradient kernel partitions the
/// sequence into; also the extra axis of the partial tensor.
pub fn grad_block_count(width: usize, block_size: usize) -> usize {
    ceil_div(width, block_size)
}

/// Convolution backward, phase one: per-block partial weight gradients.
///
/// Each (filter, filter-offset, position-block) triple sums, over all
/// rows and its span of input positions `p`, the upstream gradient at
/// output position `p - k` weighted by the base membership of the input
/// nucleotide at `p`. Layout of `partial`:
/// `[(f * filter_width + k) * n_blocks + block][STRIDE]`.
pub fn convolve_sequence_grad<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    df_output: &[T],
    df_view: View,
    filter_width: usize,
    n_filters: usize,
    block_size: usize,
    partial: &mut [T],
) {
    debug_assert_eq!(seq_view.height, df_view.height);
    debug_assert_eq!(seq_view.width, df_view.width);
    let width = seq_view.width;
    let height = seq_view.height;
    let n_blocks = grad_block_count(width, block_size);
    debug_assert_eq!(partial.len(), n_filters * filter_width * n_blocks * STRIDE);

    partial
        .par_chunks_mut(STRIDE)
        .enumerate()
        .for_each(|(chunk, out4)| {
            let blk = chunk % n_blocks;
            let fk = chunk / n_blocks;
            let k = fk % filter_width;
            let f = fk / filter_width;

            let mut acc = [T::ZERO; STRIDE];
            for row in 0..height {
                let span = (blk * block_size)..(((blk + 1) * block_size).min(width));
                for p in span {
                    if p < k {
                        continue;
                    }
                    let code = seq[seq_view.idx(row, p)];
                    let g = df_output[df_view.idx(row, f * width + (p - k))];
                    accumulate_bases(code, g, &mut acc);
                }
            }
            out4.copy_from_slice(&acc);
        });
}

/// Phase two: fold per-block partials into the final weight gradient.
///
/// `grad[(f * filter_width + k) * STRIDE + b] = Σ_block partial[..]`.
/// Shared with the fully-connected backward pass, which calls it with
/// `filter_width == width` and `n_partial` = number of row blocks.
pub fn gradient_reduce<T: Scalar>(
    partial: &[T],
    n_filters: usize,
    filter_width: usize,
    n_partial: usize,
    grad: &mut [T],
) {
    debug_assert_eq!(partial.len(), n_filters * filter_width * n_partial * STRIDE);
    debug_assert_eq!(grad.len(), n_filters * filter_width * STRIDE);

    grad.par_chunks_mut(STRIDE).enumerate().for_each(|(fk, out4)| {
        let mut acc = [T::ZERO; STRIDE];
        for blk in 0..n_partial {
            let base = (fk * n_partial + blk) * STRIDE;
            for b in 0..STRIDE {
                acc[b] += partial[base + b];
            }
        }
        out4.copy_from_slice(&acc);
    });
}

/// Both gradient phases chained: allocates the intermediate partial
/// tensor and returns the reduced `[n_filters][filter_width][STRIDE]`
/// weight gradient. Convenience for hosts that do not stage buffers
/// themselves.
pub fn convolve_sequence_bwd<T: Scalar>(
    seq: &[u8],
    seq_view: View,
    df_output: &[T],
    df_view: View,
    filter_width: usize,
    n_filters: usize,
    block_size: usize,
) -> Vec<T> {
    let n_blocks = grad_block_count(seq_view.width, block_size);
    tracing::debug!(n_blocks, filter_width, n_filters, "convolution weight-gradient partials");
    let mut partial = vec![T::ZERO; n_filters * filter_width * n_blocks * STRIDE];
    convolve_sequence_grad(
        seq, seq_view, df_output, df_view, filter_width, n_filters, block_size, &mut partial,
    );
    let mut grad = vec![T::ZERO; n_filters * filter_width * STRIDE];
    gradient_reduce(&partial, n_filters, filter_width, n_blocks, &mut grad);
    grad
}
