//! PSF-matching convolution kernels.
//!
//! Given a source stamp `R` (reference PSF seen in the current frame) and a
//! target stamp `T` (current PSF), find the kernel `K` of half size `h` that
//! minimizes `Σ_p (T(p) − Σ_k K(k) R(p − k))²` subject to `Σ_k K(k) = 1`.
//!
//! The constraint is built into the parametrization: `K = δ + Σ_{k≠0} c_k (e_k − e_0)`,
//! so that
//!
//! ```text
//! T(p) − R(p) ≈ Σ_{k≠0} c_k (R(p − k) − R(p))
//! ```
//!
//! Well-sampled PSFs make this deconvolution ill-posed at high spatial
//! frequencies; the truncated SVD returns the minimum-norm `c`, i.e. the
//! kernel closest to a delta among the acceptable ones.

use nalgebra::{DMatrix, DVector};

use crate::domain::IntPoint;
use crate::image::PixelBlock;
use crate::math::solve_truncated;

/// Relative singular-value cutoff of the kernel solve.
const KERNEL_SVD_CUTOFF: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct KernelFit {
    pub kernel: PixelBlock,
    /// `Σ(T − R⊛K)² / ΣT²` over the target stamp.
    pub residual: f64,
}

/// Fit a unit-sum kernel mapping `source` onto `target`.
///
/// `source` should cover the target extent enlarged by `half` on each side;
/// missing source pixels count as zero. `None` when the solve fails or the
/// target is empty.
pub fn fit_kernel(source: &PixelBlock, target: &PixelBlock, half: i64) -> Option<KernelFit> {
    let mut kernel = PixelBlock::centered(IntPoint::new(0, 0), half);
    let n_k = kernel.len();
    let n_p = target.len();
    let target_norm: f64 = target.data().iter().map(|v| v * v).sum();
    if n_k == 0 || n_p == 0 || !(target_norm > 0.0) {
        return None;
    }
    let center = kernel.index_of(0, 0)?;
    let free: Vec<usize> = (0..n_k).filter(|&k| k != center).collect();

    let base = DVector::from_fn(n_p, |ip, _| {
        let (i, j) = target.coords_of(ip);
        source.value_or_zero(i, j)
    });
    let t = DVector::from_column_slice(target.data());

    let mut c = DVector::zeros(free.len());
    if !free.is_empty() {
        // Column m holds R(p − k_m) − R(p).
        let design = DMatrix::from_fn(n_p, free.len(), |ip, m| {
            let (i, j) = target.coords_of(ip);
            let (ki, kj) = kernel.coords_of(free[m]);
            source.value_or_zero(i - ki, j - kj) - base[ip]
        });
        c = solve_truncated(&design, &(&t - &base), KERNEL_SVD_CUTOFF)?;
    }

    let data = kernel.data_mut();
    data[center] = 1.0 - c.sum();
    for (m, &k) in free.iter().enumerate() {
        data[k] = c[m];
    }

    let mut convolved = PixelBlock::like(target);
    source.convolve_into(&kernel, &mut convolved);
    let residual = target
        .data()
        .iter()
        .zip(convolved.data())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        / target_norm;
    Some(KernelFit { kernel, residual })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Point;
    use crate::image::{PsfModel, compute_psf_pixels};
    use approx::assert_abs_diff_eq;

    fn stamps(source_psf: PsfModel, target_psf: PsfModel, half: i64) -> (PixelBlock, PixelBlock) {
        let center = IntPoint::new(20, 20);
        let pos = Point::new(20.2, 19.9);
        let mut source = PixelBlock::centered(center, 10 + half);
        compute_psf_pixels(&source_psf, pos, &mut source, None);
        let mut target = PixelBlock::centered(center, 10);
        compute_psf_pixels(&target_psf, pos, &mut target, None);
        (source, target)
    }

    #[test]
    fn identical_psfs_give_a_delta_kernel() {
        let psf = PsfModel::gaussian(1.5);
        let (source, target) = stamps(psf, psf, 2);
        let fit = fit_kernel(&source, &target, 2).unwrap();
        assert_abs_diff_eq!(fit.kernel[(0, 0)], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.kernel.sum(), 1.0, epsilon = 1e-8);
        assert!(fit.residual < 1e-8);
    }

    #[test]
    fn broader_target_gives_a_gaussian_like_kernel() {
        let (source, target) = stamps(PsfModel::gaussian(1.5), PsfModel::gaussian(2.0), 4);
        let fit = fit_kernel(&source, &target, 4).unwrap();
        assert_abs_diff_eq!(fit.kernel.sum(), 1.0, epsilon = 1e-8);
        assert!(fit.residual < 1e-3, "residual {}", fit.residual);

        let peak = fit.kernel.data().iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(peak, fit.kernel[(0, 0)]);

        // Expected width √(2.0² − 1.5²) ≈ 1.32.
        let second_moment: f64 = fit
            .kernel
            .iter()
            .map(|(i, j, v)| v * (i * i + j * j) as f64)
            .sum::<f64>()
            / 2.0;
        assert!((second_moment.sqrt() - 1.32).abs() < 0.2, "width {}", second_moment.sqrt());
    }

    #[test]
    fn empty_target_has_no_kernel() {
        let source = PixelBlock::centered(IntPoint::new(0, 0), 5);
        let target = PixelBlock::centered(IntPoint::new(0, 0), 3);
        assert!(fit_kernel(&source, &target, 1).is_none());
    }
}
