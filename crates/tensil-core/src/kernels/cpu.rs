//! Host math kernels over raw f32 slices.
//!
//! These are the CPU counterparts of the device kernel programs. GEMM uses
//! cache-friendly tiling for the untransposed fast path; 64x64 f32 tiles
//! fit comfortably in L1.

const TILE_M: usize = 64;
const TILE_N: usize = 64;
const TILE_K: usize = 64;

pub fn fill(dst: &mut [f32], value: f32) {
    for d in dst.iter_mut() {
        *d = value;
    }
}

pub fn scale(dst: &mut [f32], factor: f32) {
    for d in dst.iter_mut() {
        *d *= factor;
    }
}

/// `dst += factor * src`
pub fn axpy(dst: &mut [f32], factor: f32, src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += factor * *s;
    }
}

/// `dst *= src` element-wise.
pub fn hadamard(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d *= *s;
    }
}

/// `dst[cols x rows] = src[rows x cols]^T`, both row-major.
pub fn transpose(dst: &mut [f32], src: &[f32], rows: usize, cols: usize) {
    for i in 0..rows {
        for j in 0..cols {
            dst[j * rows + i] = src[i * cols + j];
        }
    }
}

pub fn sum(src: &[f32]) -> f32 {
    src.iter().sum()
}

pub fn sum_squares(src: &[f32]) -> f32 {
    src.iter().map(|v| v * v).sum()
}

/// Flat index of the maximum element. Ties resolve to the first occurrence.
pub fn index_of_max(src: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in src.iter().enumerate() {
        if *v > src[best] {
            best = i;
        }
    }
    best
}

/// General matrix multiply: `c[m x n] = alpha * op(A) * op(B) + beta * c`.
///
/// `a` is stored row-major as `m x k` (or `k x m` when `trans_a`), `b` as
/// `k x n` (or `n x k` when `trans_b`).
pub fn gemm(
    c: &mut [f32],
    beta: f32,
    alpha: f32,
    a: &[f32],
    trans_a: bool,
    b: &[f32],
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
) {
    if beta == 0.0 {
        fill(&mut c[..m * n], 0.0);
    } else if beta != 1.0 {
        scale(&mut c[..m * n], beta);
    }

    if !trans_a && !trans_b {
        gemm_tiled_nn(c, alpha, a, b, m, n, k);
        return;
    }

    for i in 0..m {
        for p in 0..k {
            let a_ip = if trans_a { a[p * m + i] } else { a[i * k + p] };
            let scaled = alpha * a_ip;
            for j in 0..n {
                let b_pj = if trans_b { b[j * k + p] } else { b[p * n + j] };
                c[i * n + j] += scaled * b_pj;
            }
        }
    }
}

/// Tiled accumulating multiply for the untransposed case.
fn gemm_tiled_nn(c: &mut [f32], alpha: f32, a: &[f32], b: &[f32], m: usize, n: usize, k: usize) {
    for i0 in (0..m).step_by(TILE_M) {
        let i_end = (i0 + TILE_M).min(m);
        for j0 in (0..n).step_by(TILE_N) {
            let j_end = (j0 + TILE_N).min(n);
            for p0 in (0..k).step_by(TILE_K) {
                let p_end = (p0 + TILE_K).min(k);

                for i in i0..i_end {
                    for p in p0..p_end {
                        let a_val = alpha * a[i * k + p];
                        for j in j0..j_end {
                            c[i * n + j] += a_val * b[p * n + j];
                        }
                    }
                }
            }
        }
    }
}

/// Batched GEMM: one call over per-matrix offset windows.
///
/// For each z, `c[c_offsets[z]..] = alpha * op(A_z) * op(B_z) + beta * c`,
/// where the operand windows start at `a_offsets[z]` / `b_offsets[z]`. The
/// offset arrays replace a loop of individual dispatches; the device
/// counterpart issues a single batched kernel with the same arrays.
#[allow(clippy::too_many_arguments)]
pub fn batched_gemm(
    c: &mut [f32],
    c_offsets: &[usize],
    beta: f32,
    alpha: f32,
    a: &[f32],
    a_offsets: &[usize],
    trans_a: bool,
    b: &[f32],
    b_offsets: &[usize],
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
) {
    let a_len = m * k;
    let b_len = k * n;
    for z in 0..c_offsets.len() {
        let c_off = c_offsets[z];
        let a_off = a_offsets[z];
        let b_off = b_offsets[z];
        gemm(
            &mut c[c_off..c_off + m * n],
            beta,
            alpha,
            &a[a_off..a_off + a_len],
            trans_a,
            &b[b_off..b_off + b_len],
            trans_b,
            m,
            n,
            k,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_scale_axpy() {
        let mut v = vec![0.0; 4];
        fill(&mut v, 2.0);
        assert_eq!(v, vec![2.0; 4]);
        scale(&mut v, 0.5);
        assert_eq!(v, vec![1.0; 4]);
        axpy(&mut v, 3.0, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(v, vec![4.0, 7.0, 10.0, 13.0]);
    }

    #[test]
    fn test_transpose() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let mut dst = [0.0; 6];
        transpose(&mut dst, &src, 2, 3);
        assert_eq!(dst, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_reductions() {
        assert_eq!(sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(sum_squares(&[3.0, 4.0]), 25.0);
        assert_eq!(index_of_max(&[1.0, 5.0, 5.0, 2.0]), 1);
    }

    #[test]
    fn test_gemm_literal() {
        // [[1,2],[3,4]] * [[5,6],[7,8]] = [[19,22],[43,50]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        gemm(&mut c, 0.0, 1.0, &a, false, &b, false, 2, 2, 2);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_gemm_transposed_matches_naive() {
        let m = 3;
        let n = 4;
        let k = 5;
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 5) as f32 * 0.5).collect();

        let mut c_ref = vec![0.0; m * n];
        gemm(&mut c_ref, 0.0, 1.0, &a, false, &b, false, m, n, k);

        // A^T stored as k x m, B^T stored as n x k.
        let mut at = vec![0.0; m * k];
        transpose(&mut at, &a, m, k);
        let mut bt = vec![0.0; k * n];
        transpose(&mut bt, &b, k, n);

        let mut c = vec![0.0; m * n];
        gemm(&mut c, 0.0, 1.0, &at, true, &bt, true, m, n, k);
        for (x, y) in c.iter().zip(&c_ref) {
            assert!((x - y).abs() < 1e-5, "{x} vs {y}");
        }
    }

    #[test]
    fn test_gemm_beta_accumulates() {
        let a = [1.0, 0.0, 0.0, 1.0]; // identity
        let b = [1.0, 2.0, 3.0, 4.0];
        let mut c = [10.0, 10.0, 10.0, 10.0];
        gemm(&mut c, 0.5, 2.0, &a, false, &b, false, 2, 2, 2);
        // 2*B + 0.5*10
        assert_eq!(c, [7.0, 9.0, 11.0, 13.0]);
    }

    #[test]
    fn test_gemm_tiled_large_matches_plain() {
        let m = 97;
        let n = 70;
        let k = 65; // deliberately off tile boundaries
        let a: Vec<f32> = (0..m * k).map(|i| ((i * 13) % 11) as f32 * 0.1).collect();
        let b: Vec<f32> = (0..k * n).map(|i| ((i * 7) % 13) as f32 * 0.1).collect();

        let mut c_tiled = vec![0.0; m * n];
        gemm(&mut c_tiled, 0.0, 1.0, &a, false, &b, false, m, n, k);

        let mut c_naive = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += a[i * k + p] * b[p * n + j];
                }
                c_naive[i * n + j] = acc;
            }
        }
        for (x, y) in c_tiled.iter().zip(&c_naive) {
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
    }

    #[test]
    fn test_batched_gemm_offsets() {
        // Two 2x2 multiplications against a shared left matrix.
        let a = [1.0, 0.0, 0.0, 1.0];
        let b = [
            1.0, 2.0, 3.0, 4.0, // z = 0
            5.0, 6.0, 7.0, 8.0, // z = 1
        ];
        let mut c = [0.0; 8];
        batched_gemm(
            &mut c,
            &[0, 4],
            0.0,
            1.0,
            &a,
            &[0, 0],
            false,
            &b,
            &[0, 4],
            false,
            2,
            2,
            2,
        );
        assert_eq!(c, b);
    }
}
