use crate::types::{ComplexMatrix, RealMatrix, SarComplex, SarError, SarResult};
use ndarray::Array2;
use num_traits::Zero;
use rustfft::{FftDirection, FftPlanner};
use std::cell::RefCell;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

thread_local! {
    // Plans are cached by the planner, one per worker thread
    static PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Forward 2D FFT, in place (rows then columns), unnormalised
pub fn fft2d_inplace(data: &mut ComplexMatrix) {
    transform_2d(data, FftDirection::Forward);
}

/// Inverse 2D FFT, in place, normalised by 1/(lines*pixels)
pub fn ifft2d_inplace(data: &mut ComplexMatrix) {
    transform_2d(data, FftDirection::Inverse);
    let n = data.len();
    if n > 0 {
        let scale = 1.0 / n as f64;
        data.mapv_inplace(|v| v * scale);
    }
}

fn transform_2d(data: &mut ComplexMatrix, direction: FftDirection) {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return;
    }

    let (row_fft, col_fft) = PLANNER.with(|planner| {
        let mut planner = planner.borrow_mut();
        (
            planner.plan_fft(cols, direction),
            planner.plan_fft(rows, direction),
        )
    });

    // Rows: contiguous in standard layout, rustfft handles the whole buffer in chunks
    match data.as_slice_mut() {
        Some(buffer) => row_fft.process(buffer),
        None => {
            let mut buffer = vec![SarComplex::zero(); cols];
            for mut row in data.rows_mut() {
                for (dst, src) in buffer.iter_mut().zip(row.iter()) {
                    *dst = *src;
                }
                row_fft.process(&mut buffer);
                for (dst, src) in row.iter_mut().zip(buffer.iter()) {
                    *dst = *src;
                }
            }
        }
    }

    // Columns: transpose into a contiguous copy, transform, write back
    let mut transposed = data.t().as_standard_layout().into_owned();
    if let Some(buffer) = transposed.as_slice_mut() {
        col_fft.process(buffer);
    }
    data.assign(&transposed.t());
}

/// Magnitude of complex samples
pub fn magnitude(data: &ComplexMatrix) -> RealMatrix {
    data.mapv(|v| v.norm())
}

/// Subtract the mean of the matrix from every element
pub fn demean(data: &mut RealMatrix) {
    if let Some(mean) = data.mean() {
        data.mapv_inplace(|v| v - mean);
    }
}

pub fn to_complex(data: &RealMatrix) -> ComplexMatrix {
    data.mapv(|v| SarComplex::new(v, 0.0))
}

/// Oversample a matrix by zero padding its 2D spectrum.
///
/// The Nyquist bin of an even-length axis is split over both halves of the padded
/// spectrum, so samples at multiples of the factor reproduce the input. Factors must be
/// powers of two, and an axis that is oversampled must have a power-of-two length.
pub fn oversample(data: &ComplexMatrix, factor_line: usize, factor_pixel: usize) -> SarResult<ComplexMatrix> {
    let (lines, pixels) = data.dim();

    if !factor_line.is_power_of_two() || !factor_pixel.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "oversampling factors must be powers of 2, got {}x{}",
            factor_line, factor_pixel
        )));
    }
    if factor_line > 1 && !lines.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "oversample: number of lines {} is not a power of 2",
            lines
        )));
    }
    if factor_pixel > 1 && !pixels.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "oversample: number of pixels {} is not a power of 2",
            pixels
        )));
    }
    if factor_line == 1 && factor_pixel == 1 {
        return Ok(data.clone());
    }

    let out_lines = lines * factor_line;
    let out_pixels = pixels * factor_pixel;

    let mut spectrum = data.clone();
    fft2d_inplace(&mut spectrum);

    let line_bins = padded_bins(lines, out_lines);
    let pixel_bins = padded_bins(pixels, out_pixels);

    let mut padded = Array2::<SarComplex>::zeros((out_lines, out_pixels));
    for &(src_l, dst_l, w_l) in &line_bins {
        for &(src_p, dst_p, w_p) in &pixel_bins {
            padded[[dst_l, dst_p]] += spectrum[[src_l, src_p]] * (w_l * w_p);
        }
    }

    ifft2d_inplace(&mut padded);
    let gain = (factor_line * factor_pixel) as f64;
    padded.mapv_inplace(|v| v * gain);
    Ok(padded)
}

/// Oversample a real surface; the imaginary part of the interpolated result is dropped
pub fn oversample_real(data: &RealMatrix, factor_line: usize, factor_pixel: usize) -> SarResult<RealMatrix> {
    let interpolated = oversample(&to_complex(data), factor_line, factor_pixel)?;
    Ok(interpolated.mapv(|v| v.re))
}

/// (source bin, destination bin, weight) for placing an `n`-point spectrum into `n_out` bins
fn padded_bins(n: usize, n_out: usize) -> Vec<(usize, usize, f64)> {
    if n_out == n {
        return (0..n).map(|k| (k, k, 1.0)).collect();
    }

    let positive = (n + 1) / 2;
    let mut bins: Vec<(usize, usize, f64)> = (0..positive).map(|k| (k, k, 1.0)).collect();
    if n % 2 == 0 {
        let nyquist = n / 2;
        bins.push((nyquist, nyquist, 0.5));
        bins.push((nyquist, n_out - nyquist, 0.5));
    }
    for k in (n / 2 + 1)..n {
        bins.push((k, n_out - n + k, 1.0));
    }
    bins
}

/// Shift the azimuth spectrum of a chip between the Doppler centroid and zero.
///
/// `shift < 0` moves the spectrum from fDC to zero, `shift > 0` from zero back to fDC;
/// `|shift|` is the first range pixel of the chip (1-based) for evaluating
/// `fDC(col) = a0 + a1*t + a2*t^2` with `t = col / (rsr2x/2)`. The chip is multiplied by
/// the phase trend `exp(±i*2*pi*line*fDC(col)/prf)`. Nothing happens if all Doppler
/// coefficients are zero.
pub fn shift_azimuth_spectrum(data: &mut ComplexMatrix, prf: f64, rsr2x: f64, doppler: &[f64; 3], shift: f64) {
    if doppler.iter().all(|&c| c == 0.0) {
        return;
    }

    let sign = if shift < 0.0 { -1.0 } else { 1.0 };
    let pix_lo = shift.abs() - 1.0;
    let cols = data.ncols();

    let fdc: Vec<f64> = (0..cols)
        .map(|col| {
            let t = (pix_lo + col as f64) / (rsr2x / 2.0);
            doppler[0] + doppler[1] * t + doppler[2] * t * t
        })
        .collect();

    log::debug!("fDC of first pixel: {}", fdc.first().copied().unwrap_or(0.0));
    if sign > 0.0 {
        log::debug!("Shifting from zero to fDC.");
    } else {
        log::debug!("Shifting from fDC to zero.");
    }

    for ((line, col), value) in data.indexed_iter_mut() {
        let phase = 2.0 * PI * line as f64 / prf * fdc[col];
        *value *= SarComplex::from_polar(1.0, sign * phase);
    }
}

/// Lazily built normalisation blocks for FFT-based correlation, one per chip size.
///
/// A block is the conjugated spectrum of a `2L x 2P` zero matrix holding an `L x P`
/// patch of ones at `(L/2, P/2)`. It depends only on the chip size, so each size is
/// built once and then shared read-only by all estimator calls.
#[derive(Debug, Default)]
pub struct NormBlockCache {
    blocks: Mutex<HashMap<(usize, usize), Arc<OnceLock<Arc<ComplexMatrix>>>>>,
}

impl NormBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block for chips of `lines x pixels`
    pub fn block(&self, lines: usize, pixels: usize) -> Arc<ComplexMatrix> {
        let slot = {
            let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(blocks.entry((lines, pixels)).or_default())
        };

        Arc::clone(slot.get_or_init(|| {
            log::debug!(
                "Building normalisation block of size [{}, {}]",
                2 * lines,
                2 * pixels
            );
            Arc::new(build_norm_block(lines, pixels))
        }))
    }

    /// Number of chip sizes cached so far
    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_norm_block(lines: usize, pixels: usize) -> ComplexMatrix {
    let half_l = lines / 2;
    let half_p = pixels / 2;
    let mut block = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
    block
        .slice_mut(ndarray::s![half_l..half_l + lines, half_p..half_p + pixels])
        .fill(SarComplex::new(1.0, 0.0));
    fft2d_inplace(&mut block);
    block.mapv_inplace(|v| v.conj());
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn test_matrix(lines: usize, pixels: usize) -> ComplexMatrix {
        Array2::from_shape_fn((lines, pixels), |(l, p)| {
            SarComplex::new(((l * 7 + p * 3) % 11) as f64 - 4.0, ((l + 2 * p) % 5) as f64)
        })
    }

    #[test]
    fn test_fft_inverse_restores_input() {
        let original = test_matrix(8, 16);
        let mut data = original.clone();
        fft2d_inplace(&mut data);
        ifft2d_inplace(&mut data);
        for (a, b) in data.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_fft_dc_bin_is_sum() {
        let data = Array2::from_elem((4, 8), SarComplex::new(1.0, 0.0));
        let mut spectrum = data.clone();
        fft2d_inplace(&mut spectrum);
        assert_abs_diff_eq!(spectrum[[0, 0]].re, 32.0, epsilon = 1e-12);
        assert_abs_diff_eq!(spectrum[[1, 3]].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_oversample_keeps_original_samples() {
        let original = test_matrix(8, 8);
        let ovs = oversample(&original, 4, 2).unwrap();
        assert_eq!(ovs.dim(), (32, 16));
        for l in 0..8 {
            for p in 0..8 {
                let a = ovs[[4 * l, 2 * p]];
                let b = original[[l, p]];
                assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-9);
                assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_oversample_rejects_bad_factor() {
        let original = test_matrix(8, 8);
        assert!(oversample(&original, 3, 1).is_err());
        let odd = test_matrix(6, 8);
        assert!(oversample(&odd, 2, 2).is_err());
        // Axis that is not oversampled may have any length
        assert!(oversample(&odd, 1, 2).is_ok());
    }

    #[test]
    fn test_shift_azimuth_spectrum_roundtrip() {
        let original = test_matrix(8, 8);
        let doppler = [120.0, 15.0, -2.0];
        let mut data = original.clone();
        shift_azimuth_spectrum(&mut data, 1679.9, 37.5e6, &doppler, -11.0);
        assert!((data[[3, 3]] - original[[3, 3]]).norm() > 1e-6);
        shift_azimuth_spectrum(&mut data, 1679.9, 37.5e6, &doppler, 11.0);
        for (a, b) in data.iter().zip(original.iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_doppler_leaves_data() {
        let original = test_matrix(4, 4);
        let mut data = original.clone();
        shift_azimuth_spectrum(&mut data, 1679.9, 37.5e6, &[0.0, 0.0, 0.0], -1.0);
        assert_eq!(data, original);
    }

    #[test]
    fn test_norm_block_is_cached_per_size() {
        let cache = NormBlockCache::new();
        let a = cache.block(8, 8);
        let b = cache.block(8, 8);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.dim(), (16, 16));
        // DC term of the conjugated spectrum is the number of ones
        assert_abs_diff_eq!(a[[0, 0]].re, 64.0, epsilon = 1e-9);
        cache.block(16, 8);
        assert_eq!(cache.len(), 2);
    }
}
