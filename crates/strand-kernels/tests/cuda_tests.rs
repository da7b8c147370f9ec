//! GPU integration tests: every CUDA dispatch against its CPU
//! reference on randomized inputs. Each test is a no-op on machines
//! without a CUDA device.
#![cfg(feature = "cuda")]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strand_core::{Nucleotide, Scalar, View, STRIDE};
use strand_kernels::cuda::{self, is_cuda_available, DeviceBuffer};
use strand_kernels::{cpu_conv, cpu_fc, cpu_pool};

const DEV: usize = 0;

macro_rules! require_cuda {
    () => {
        if !is_cuda_available() {
            eprintln!("no CUDA device, skipping");
            return;
        }
    };
}

fn assert_close<T: Scalar>(got: &[T], want: &[T], tol: f64, what: &str) {
    assert_eq!(got.len(), want.len(), "{}: length mismatch", what);
    for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
        let diff = (g.to_f64() - w.to_f64()).abs();
        let scale = w.to_f64().abs().max(1.0);
        assert!(
            diff / scale <= tol,
            "{}: index {} got {} want {}",
            what,
            i,
            g.to_f64(),
            w.to_f64()
        );
    }
}

/// Random encoded sequence with canonical bases, ambiguity codes and
/// the occasional wildcard.
fn random_seq(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let codes = [
        Nucleotide::A.code(),
        Nucleotide::C.code(),
        Nucleotide::G.code(),
        Nucleotide::T.code(),
        Nucleotide::R.code(),
        Nucleotide::Y.code(),
        Nucleotide::N.code(),
    ];
    (0..len).map(|_| codes[rng.gen_range(0..codes.len())]).collect()
}

fn random_vals(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

#[test]
fn conv_fwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(11);
    let (width, height, fw, nf) = (130, 5, 4, 3);
    let view = View::contiguous(width, height);
    let out_view = View::new(0, nf * width, width, height);

    let seq = random_seq(&mut rng, view.min_len(1));
    let filters = random_vals(&mut rng, nf * fw * STRIDE);
    let bias = random_vals(&mut rng, nf);

    let mut want = vec![0.0f32; out_view.min_len(nf)];
    cpu_conv::convolve_sequence_fwd(&seq, view, &filters, &bias, fw, nf, &mut want, out_view);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_filters = DeviceBuffer::from_host(DEV, &filters).unwrap();
    let d_bias = DeviceBuffer::from_host(DEV, &bias).unwrap();
    let out = cuda::convolve_sequence_fwd(
        DEV, &d_seq, view, &d_filters, &d_bias, fw, nf, out_view, 64,
    )
    .unwrap();
    assert_close(&out.to_host().unwrap(), &want, 1e-5, "conv fwd");
}

#[test]
fn conv_fwd_respects_subregion_views() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(12);
    let (width, height, fw, nf) = (40, 3, 3, 2);
    // Sub-columns of a wider buffer on both sides.
    let seq_view = View::new(5, 64, width, height);
    let out_view = View::new(7, 100, width, height);

    let seq = random_seq(&mut rng, seq_view.min_len(1));
    let filters = random_vals(&mut rng, nf * fw * STRIDE);
    let bias = random_vals(&mut rng, nf);

    let mut want = vec![0.0f32; out_view.min_len(nf)];
    cpu_conv::convolve_sequence_fwd(&seq, seq_view, &filters, &bias, fw, nf, &mut want, out_view);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_filters = DeviceBuffer::from_host(DEV, &filters).unwrap();
    let d_bias = DeviceBuffer::from_host(DEV, &bias).unwrap();
    let out = cuda::convolve_sequence_fwd(
        DEV, &d_seq, seq_view, &d_filters, &d_bias, fw, nf, out_view, 32,
    )
    .unwrap();
    let host = out.to_host().unwrap();

    for row in 0..height {
        for col in 0..nf * width {
            let i = out_view.idx(row, col);
            let diff = (host[i] - want[i]).abs();
            assert!(diff <= 1e-5, "row {} col {}: {} vs {}", row, col, host[i], want[i]);
        }
        // Columns outside the view stay zero.
        assert_eq!(host[row * out_view.row_stride], 0.0);
    }
}

#[test]
fn conv_bwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(13);
    let (width, height, fw, nf) = (70, 4, 5, 2);
    let view = View::contiguous(width, height);
    let df_view = View::new(0, nf * width, width, height);

    let seq = random_seq(&mut rng, view.min_len(1));
    let df = random_vals(&mut rng, df_view.min_len(nf));

    let want = cpu_conv::convolve_sequence_bwd(&seq, view, &df, df_view, fw, nf, 16);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_df = DeviceBuffer::from_host(DEV, &df).unwrap();
    let grad =
        cuda::convolve_sequence_bwd(DEV, &d_seq, view, &d_df, df_view, fw, nf, 16).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-4, "conv bwd");
}

#[test]
fn conv_bwd_matches_cpu_f64() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(14);
    let (width, height, fw, nf) = (50, 3, 4, 2);
    let view = View::contiguous(width, height);
    let df_view = View::new(0, nf * width, width, height);

    let seq = random_seq(&mut rng, view.min_len(1));
    let df: Vec<f64> = (0..df_view.min_len(nf)).map(|_| rng.gen_range(-1.0f64..1.0)).collect();

    let want = cpu_conv::convolve_sequence_bwd(&seq, view, &df, df_view, fw, nf, 8);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_df = DeviceBuffer::from_host(DEV, &df).unwrap();
    let grad = cuda::convolve_sequence_bwd(DEV, &d_seq, view, &d_df, df_view, fw, nf, 8).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-10, "conv bwd f64");
}

#[test]
fn gradient_reduce_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(15);
    let (nf, fw, n_partial) = (3, 4, 9);
    let partial = random_vals(&mut rng, nf * fw * n_partial * STRIDE);

    let mut want = vec![0.0f32; nf * fw * STRIDE];
    cpu_conv::gradient_reduce(&partial, nf, fw, n_partial, &mut want);

    let d_partial = DeviceBuffer::from_host(DEV, &partial).unwrap();
    let grad = cuda::gradient_reduce(DEV, &d_partial, nf, fw, n_partial, 8).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-5, "gradient reduce");
}

#[test]
fn max_pool_fwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(16);
    let (width, height, nf, pool) = (101, 4, 3, 4);
    let wp = cpu_pool::max_pooled_width(width, pool);
    // Plane count lives in the row stride; width is per plane.
    let in_view = View::new(0, nf * width, width, height);
    let out_view = View::new(0, nf * wp, wp, height);

    let input = random_vals(&mut rng, in_view.min_len(nf));
    let mut want = vec![0.0f32; out_view.min_len(nf)];
    let mut want_arg = vec![0u32; out_view.min_len(nf)];
    cpu_pool::max_pool_fwd(&input, in_view, nf, pool, &mut want, &mut want_arg, out_view);

    let d_in = DeviceBuffer::from_host(DEV, &input).unwrap();
    let (pooled, argmax) = cuda::max_pool_fwd(DEV, &d_in, in_view, nf, pool, out_view, 32).unwrap();
    assert_close(&pooled.to_host().unwrap(), &want, 1e-6, "max pool fwd");
    assert_eq!(argmax.to_host().unwrap(), want_arg, "max pool argmax");
}

#[test]
fn max_pool_bwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(17);
    let (width, height, nf, pool) = (66, 3, 2, 4);
    let wp = cpu_pool::max_pooled_width(width, pool);
    let grad_view = View::new(0, nf * width, width, height);
    let df_view = View::new(0, nf * wp, wp, height);

    let input = random_vals(&mut rng, grad_view.min_len(nf));
    let mut pooled = vec![0.0f32; df_view.min_len(nf)];
    let mut argmax = vec![0u32; df_view.min_len(nf)];
    cpu_pool::max_pool_fwd(&input, grad_view, nf, pool, &mut pooled, &mut argmax, df_view);

    let df = random_vals(&mut rng, df_view.min_len(nf));
    let mut want = vec![0.0f32; grad_view.min_len(nf)];
    cpu_pool::max_pool_bwd(&argmax, &df, df_view, nf, pool, &mut want, grad_view);

    let d_arg = DeviceBuffer::from_host(DEV, &argmax).unwrap();
    let d_df = DeviceBuffer::from_host(DEV, &df).unwrap();
    let grad = cuda::max_pool_bwd(DEV, &d_arg, &d_df, df_view, nf, pool, grad_view, 32).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-6, "max pool bwd");
}

#[test]
fn sum_pool_fwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(18);
    // Width not a pool multiple, so the last window is partial.
    let (width, height, nf, pool) = (103, 4, 2, 5);
    let wp = cpu_pool::sum_pooled_width(width, pool);
    let in_view = View::new(0, nf * width, width, height);
    let out_view = View::new(0, nf * wp, wp, height);

    let input = random_vals(&mut rng, in_view.min_len(nf));
    let mut want = vec![0.0f32; out_view.min_len(nf)];
    cpu_pool::sum_pool_fwd(&input, in_view, nf, pool, &mut want, out_view);

    let d_in = DeviceBuffer::from_host(DEV, &input).unwrap();
    let pooled = cuda::sum_pool_fwd(DEV, &d_in, in_view, nf, pool, out_view).unwrap();
    assert_close(&pooled.to_host().unwrap(), &want, 1e-5, "sum pool fwd");
}

#[test]
fn sum_pool_bwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(19);
    let (width, height, nf, pool) = (47, 3, 3, 4);
    let wp = cpu_pool::sum_pooled_width(width, pool);
    let grad_view = View::new(0, nf * width, width, height);
    let df_view = View::new(0, nf * wp, wp, height);

    let df = random_vals(&mut rng, df_view.min_len(nf));
    let mut want = vec![0.0f32; grad_view.min_len(nf)];
    cpu_pool::sum_pool_bwd(&df, df_view, nf, pool, &mut want, grad_view);

    let d_df = DeviceBuffer::from_host(DEV, &df).unwrap();
    let grad = cuda::sum_pool_bwd(DEV, &d_df, df_view, nf, pool, grad_view).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-6, "sum pool bwd");
}

#[test]
fn fully_connected_fwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(20);
    // Width off a power of two to exercise the padded reduction.
    let (width, height, nf) = (23, 17, 4);
    let view = View::contiguous(width, height);
    let out_view = View::contiguous(nf, height);

    let seq = random_seq(&mut rng, view.min_len(1));
    let filters = random_vals(&mut rng, nf * width * STRIDE);
    let bias = random_vals(&mut rng, nf);

    let mut want = vec![0.0f32; out_view.min_len(1)];
    cpu_fc::fully_connected_fwd(&seq, view, &filters, &bias, nf, &mut want, out_view);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_filters = DeviceBuffer::from_host(DEV, &filters).unwrap();
    let d_bias = DeviceBuffer::from_host(DEV, &bias).unwrap();
    let out =
        cuda::fully_connected_fwd(DEV, &d_seq, view, &d_filters, &d_bias, nf, out_view).unwrap();
    assert_close(&out.to_host().unwrap(), &want, 1e-5, "fc fwd");
}

#[test]
fn fully_connected_bwd_matches_cpu() {
    require_cuda!();
    let mut rng = StdRng::seed_from_u64(21);
    let (width, height, nf) = (19, 37, 3);
    let view = View::contiguous(width, height);
    let df_view = View::contiguous(nf, height);

    let seq = random_seq(&mut rng, view.min_len(1));
    let df = random_vals(&mut rng, df_view.min_len(1));

    let want = cpu_fc::fully_connected_bwd(&seq, view, &df, df_view, nf, 8);

    let d_seq = DeviceBuffer::from_host(DEV, &seq).unwrap();
    let d_df = DeviceBuffer::from_host(DEV, &df).unwrap();
    let grad = cuda::fully_connected_bwd(DEV, &d_seq, view, &d_df, df_view, nf, 8).unwrap();
    assert_close(&grad.to_host().unwrap(), &want, 1e-4, "fc bwd");
}
