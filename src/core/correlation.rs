//! Correlation estimators for chip pairs.
//!
//! All estimators work on de-meaned magnitude and return the offset of the slave
//! (mask) chip relative to the master chip: a feature at master position `x` appears
//! at `x + offset` in the mask. Chips without usable signal give a result whose
//! correlation is [`NO_CORRELATION`](crate::types::NO_CORRELATION).

use crate::core::spectral::{demean, fft2d_inplace, ifft2d_inplace, magnitude, oversample_real, NormBlockCache};
use crate::types::{ComplexMatrix, CorrelationResult, RealMatrix, SarComplex, SarError, SarResult, NO_CORRELATION};
use ndarray::{s, Array2, Zip};

/// FFT-based correlators sharing a cache of normalisation blocks.
///
/// One instance can serve any number of threads; the blocks for a chip size are
/// built on first use and read-only afterwards.
#[derive(Debug, Default)]
pub struct ChipCorrelator {
    blocks: NormBlockCache,
}

impl ChipCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chip sizes with a cached normalisation block
    pub fn cached_block_sizes(&self) -> usize {
        self.blocks.len()
    }

    /// Normalised cross-correlation of magnitudes in the frequency domain.
    ///
    /// The pixel-level peak is searched over shifts in `[-acc, acc)` on each axis. With
    /// `ovs_factor > 1` a `2*acc` chip of the correlation surface centred on that peak is
    /// oversampled for the sub-pixel offset. The reported correlation is kept in `[-1, 1]`.
    pub fn coherence_fft(
        &self,
        master: &ComplexMatrix,
        mask: &ComplexMatrix,
        ovs_factor: usize,
        acc_l: usize,
        acc_p: usize,
    ) -> SarResult<CorrelationResult> {
        log::trace!("coherence_fft");
        let (lines, pixels) = check_chip_pair(master, mask)?;
        check_factor(ovs_factor)?;
        check_accuracy(acc_l, lines, "line")?;
        check_accuracy(acc_p, pixels, "pixel")?;
        if ovs_factor > 1 && (!(2 * acc_l).is_power_of_two() || !(2 * acc_p).is_power_of_two()) {
            return Err(SarError::InvalidParameter(format!(
                "search range 2*acc ({}, {}) must be a power of 2 for oversampling",
                2 * acc_l,
                2 * acc_p
            )));
        }

        let mut mag_master = magnitude(master);
        let mut mag_mask = magnitude(mask);
        demean(&mut mag_master);
        demean(&mut mag_mask);

        let cross = self.cross_products(&mag_master, &mag_mask);
        let block = self.blocks.block(lines, pixels);

        // Energy of the master under the mask footprint for every shift
        let mut energy = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
        energy
            .slice_mut(s![..lines, ..pixels])
            .assign(&mag_master.mapv(|v| SarComplex::new(v * v, 0.0)));
        fft2d_inplace(&mut energy);
        Zip::from(&mut energy).and(&*block).for_each(|e, b| *e = (*e * b).conj());
        ifft2d_inplace(&mut energy);
        let norm_master = energy.mapv(|v| v.re);

        // Energy of the mask inside the master footprint
        let mut energy = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
        energy
            .slice_mut(s![lines.., pixels..])
            .assign(&mag_mask.mapv(|v| SarComplex::new(v * v, 0.0)));
        fft2d_inplace(&mut energy);
        Zip::from(&mut energy).and(&*block).for_each(|e, b| *e *= b);
        ifft2d_inplace(&mut energy);
        let norm_mask = energy.mapv(|v| v.re);

        // The padded grids hold every shift |d| < L once, at (L/2 + d) modulo 2L
        let correlation_at = |d_l: i64, d_p: i64| {
            let l = (lines as i64 / 2 + d_l).rem_euclid(2 * lines as i64) as usize;
            let p = (pixels as i64 / 2 + d_p).rem_euclid(2 * pixels as i64) as usize;
            normalized(cross[[l, p]].re, norm_master[[l, p]] * norm_mask[[l, p]])
        };

        let (acc_li, acc_pi) = (acc_l as i64, acc_p as i64);
        let corr = Array2::from_shape_fn((2 * acc_l, 2 * acc_p), |(i, j)| {
            correlation_at(i as i64 - acc_li, j as i64 - acc_pi)
        });
        let Some((idx_l, idx_p, max_corr)) = surface_peak(&corr) else {
            log::debug!("coherence_fft: no finite correlation, chip without signal");
            return Ok(CorrelationResult::no_correlation(0.0, 0.0));
        };
        let peak_l = idx_l as i64 - acc_li;
        let peak_p = idx_p as i64 - acc_pi;
        if ovs_factor == 1 {
            return Ok(CorrelationResult::new(bounded(max_corr), peak_l as f64, peak_p as f64));
        }

        // Sub-pixel: 2*acc chip centred on the pixel-level peak, taken from the full
        // surface so that shifts near the search limit keep their neighbours
        let chip = Array2::from_shape_fn((2 * acc_l, 2 * acc_p), |(i, j)| {
            correlation_at(peak_l - acc_li + i as i64, peak_p - acc_pi + j as i64)
        });
        let refined = oversample_real(&finite_or_zero(&chip), ovs_factor, ovs_factor)?;
        let Some((off_l, off_p, value)) = surface_peak(&refined) else {
            return Ok(CorrelationResult::new(bounded(max_corr), peak_l as f64, peak_p as f64));
        };

        let factor = ovs_factor as f64;
        Ok(CorrelationResult::new(
            bounded(value),
            (peak_l - acc_li) as f64 + off_l as f64 / factor,
            (peak_p - acc_pi) as f64 + off_p as f64 / factor,
        ))
    }

    /// Normalised cross-correlation of magnitudes with pixel-level peak search over all
    /// shifts in `[-L/2, L/2]`, refined by oversampling a `2*acc` chip of the correlation
    /// surface around the peak when `ovs_factor > 1`.
    ///
    /// Both normalisation surfaces come from one FFT pass: the flipped master energy in
    /// the real part and the mask energy in the imaginary part.
    pub fn cross_correlate(
        &self,
        master: &ComplexMatrix,
        mask: &ComplexMatrix,
        ovs_factor: usize,
        acc_l: usize,
        acc_p: usize,
    ) -> SarResult<CorrelationResult> {
        log::trace!("cross_correlate");
        let (lines, pixels) = check_chip_pair(master, mask)?;
        check_factor(ovs_factor)?;
        if ovs_factor > 1 {
            check_accuracy(acc_l, lines, "line")?;
            check_accuracy(acc_p, pixels, "pixel")?;
            if !(2 * acc_l).is_power_of_two() || !(2 * acc_p).is_power_of_two() {
                return Err(SarError::InvalidParameter(format!(
                    "refinement chip 2*acc ({}, {}) must be a power of 2",
                    2 * acc_l,
                    2 * acc_p
                )));
            }
        }

        let half_l = lines / 2;
        let half_p = pixels / 2;

        let mut mag_master = magnitude(master);
        let mut mag_mask = magnitude(mask);
        demean(&mut mag_master);
        demean(&mut mag_mask);

        let cross = self.cross_products(&mag_master, &mag_mask);

        let mut energy = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
        for l in lines..2 * lines {
            for p in pixels..2 * pixels {
                let flipped = mag_master[[2 * lines - 1 - l, 2 * pixels - 1 - p]];
                let shifted = mag_mask[[l - lines, p - pixels]];
                energy[[l, p]] = SarComplex::new(flipped * flipped, shifted * shifted);
            }
        }
        let block = self.blocks.block(lines, pixels);
        fft2d_inplace(&mut energy);
        Zip::from(&mut energy).and(&*block).for_each(|e, b| *e *= b);
        ifft2d_inplace(&mut energy);

        // Pixel level: correlation for each shift
        let covar = Array2::from_shape_fn((lines + 1, pixels + 1), |(l, p)| {
            let norms = energy[[l, p]];
            normalized(cross[[l, p]].re, norms.re * norms.im)
        });

        let mut max_corr = NO_CORRELATION;
        let mut peak: Option<(usize, usize)> = None;
        for ((l, p), &value) in covar.indexed_iter() {
            if value.is_finite() && value > max_corr {
                max_corr = value;
                peak = Some((l, p));
            }
        }

        let Some((mut max_l, mut max_p)) = peak else {
            log::debug!("cross_correlate: no finite correlation, chip without signal");
            return Ok(CorrelationResult::no_correlation(0.0, 0.0));
        };

        let mut offset_l = max_l as f64 - half_l as f64;
        let mut offset_p = max_p as f64 - half_p as f64;
        log::debug!(
            "Pixel level offset:     {}, {} (corr={:.4})",
            offset_l,
            offset_p,
            max_corr
        );

        if ovs_factor > 1 {
            if max_l < acc_l || max_l > lines - acc_l {
                log::debug!("Careful, decrease AccL or increase window lines");
                max_l = max_l.clamp(acc_l, lines - acc_l);
            }
            if max_p < acc_p || max_p > pixels - acc_p {
                log::debug!("Careful, decrease AccP or increase window pixels");
                max_p = max_p.clamp(acc_p, pixels - acc_p);
            }

            let chip = finite_or_zero(
                &covar
                    .slice(s![max_l - acc_l..max_l + acc_l, max_p - acc_p..max_p + acc_p])
                    .to_owned(),
            );
            let refined = oversample_real(&chip, ovs_factor, ovs_factor)?;
            if let Some((off_l, off_p, value)) = surface_peak(&refined) {
                let factor = ovs_factor as f64;
                max_corr = value;
                offset_l = max_l as f64 - half_l as f64 - acc_l as f64 + off_l as f64 / factor;
                offset_p = max_p as f64 - half_p as f64 - acc_p as f64 + off_p as f64 / factor;
                log::debug!(
                    "Sub-pixel level offset: {:.3}, {:.3} (corr={:.4})",
                    offset_l,
                    offset_p,
                    max_corr
                );
            }
        }

        Ok(CorrelationResult::new(bounded(max_corr), offset_l, offset_p))
    }

    /// Cross products of two de-meaned magnitude chips for all shifts.
    ///
    /// Master at the origin, mask at (L/2, P/2) of a `2L x 2P` zero-padded grid, so
    /// element `(L/2 + d_l, P/2 + d_p)` holds the covariance for offset `(d_l, d_p)`.
    fn cross_products(&self, mag_master: &RealMatrix, mag_mask: &RealMatrix) -> ComplexMatrix {
        let (lines, pixels) = mag_master.dim();
        let half_l = lines / 2;
        let half_p = pixels / 2;

        let mut master2 = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
        let mut mask2 = Array2::<SarComplex>::zeros((2 * lines, 2 * pixels));
        master2
            .slice_mut(s![..lines, ..pixels])
            .assign(&mag_master.mapv(|v| SarComplex::new(v, 0.0)));
        mask2
            .slice_mut(s![half_l..half_l + lines, half_p..half_p + pixels])
            .assign(&mag_mask.mapv(|v| SarComplex::new(v, 0.0)));

        fft2d_inplace(&mut master2);
        fft2d_inplace(&mut mask2);
        Zip::from(&mut mask2).and(&master2).for_each(|s, m| *s *= m.conj());
        ifft2d_inplace(&mut mask2);
        mask2
    }
}

/// Space-domain normalised cross-correlation of a mask sliding over a search area.
///
/// The result has the size of `search`; element `(i, j)` holds the Pearson correlation
/// of the mask with the search patch centred at `(i, j)`. Positions where the mask does
/// not fit stay zero, patches without variance give NaN.
pub fn correlate(search: &RealMatrix, mask: &RealMatrix) -> SarResult<RealMatrix> {
    let (rows, cols) = search.dim();
    let (mask_l, mask_p) = mask.dim();
    if mask_l == 0 || mask_p == 0 || mask_l > rows || mask_p > cols {
        return Err(SarError::InvalidParameter(format!(
            "mask {}x{} does not fit search area {}x{}",
            mask_l, mask_p, rows, cols
        )));
    }

    let mut centred_mask = mask.clone();
    demean(&mut centred_mask);
    let var_mask: f64 = centred_mask.iter().map(|v| v * v).sum();

    let begin_l = (mask_l - 1) / 2;
    let begin_p = (mask_p - 1) / 2;
    let count = (mask_l * mask_p) as f64;

    let mut result = RealMatrix::zeros((rows, cols));
    for start_l in 0..=rows - mask_l {
        for start_p in 0..=cols - mask_p {
            let patch = search.slice(s![start_l..start_l + mask_l, start_p..start_p + mask_p]);
            let mean = patch.sum() / count;
            let mut cov = 0.0;
            let mut var_patch = 0.0;
            Zip::from(&patch).and(&centred_mask).for_each(|&a, &m| {
                let a = a - mean;
                cov += a * m;
                var_patch += a * a;
            });
            result[[start_l + begin_l, start_p + begin_p]] = normalized(cov, var_mask * var_patch);
        }
    }
    Ok(result)
}

/// Coherence of magnitudes by direct summation over all `2*acc` integer shifts.
///
/// The central `(L - 2*acc_l) x (P - 2*acc_p)` part of the mask is slid over the
/// master; the coherence surface is oversampled by `osfactor` for the sub-pixel peak.
///
/// The surface covers exactly the `2*acc` shifts, so its oversampling wraps at the
/// search limits. Sub-pixel offsets are reliable for shifts within `acc/2` of zero;
/// larger shifts still find the right pixel, with a sub-pixel part that may be biased.
pub fn coherence_space(
    acc_l: usize,
    acc_p: usize,
    osfactor: usize,
    master: &ComplexMatrix,
    mask: &ComplexMatrix,
) -> SarResult<CorrelationResult> {
    log::trace!("coherence_space");
    if master.dim() != mask.dim() {
        return Err(SarError::DimensionMismatch {
            expected: master.dim(),
            found: mask.dim(),
        });
    }
    if !acc_l.is_power_of_two() || !acc_p.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "acc ({}, {}) must be a power of 2 for oversampling",
            acc_l, acc_p
        )));
    }
    check_factor(osfactor)?;

    let (lines, pixels) = master.dim();
    let window_l = lines as i64 - 2 * acc_l as i64;
    let window_p = pixels as i64 - 2 * acc_p as i64;
    if window_l < 4 || window_p < 4 {
        return Err(SarError::InvalidParameter(format!(
            "correlation window {}x{} too small (< 4; size = window - 2*acc)",
            window_l, window_p
        )));
    }
    let (window_l, window_p) = (window_l as usize, window_p as usize);

    let mut mag_mask = magnitude(mask);
    demean(&mut mag_mask);
    let centre = mag_mask.slice(s![acc_l..acc_l + window_l, acc_p..acc_p + window_p]);
    let norm_mask: f64 = centre.iter().map(|v| v * v).sum();

    let mut mag_master = magnitude(master);
    demean(&mut mag_master);

    let coher = Array2::from_shape_fn((2 * acc_l, 2 * acc_p), |(i, j)| {
        let part = mag_master.slice(s![i..i + window_l, j..j + window_p]);
        let mut s1s2 = 0.0;
        let mut s1s1 = 0.0;
        Zip::from(&part).and(&centre).for_each(|&m, &k| {
            s1s2 += m * k;
            s1s1 += m * m;
        });
        normalized(s1s2, s1s1 * norm_mask)
    });

    let Some((pix_l, pix_p, _)) = surface_peak(&coher) else {
        log::debug!("coherence_space: no finite coherence, chip without signal");
        return Ok(CorrelationResult::no_correlation(0.0, 0.0));
    };
    let shift_l = acc_l as i64 - pix_l as i64;
    let shift_p = acc_p as i64 - pix_p as i64;
    if shift_l.unsigned_abs() as usize > acc_l / 2 || shift_p.unsigned_abs() as usize > acc_p / 2 {
        log::debug!(
            "coherence_space: peak ({}, {}) outside +-acc/2, sub-pixel offset may be biased",
            shift_l,
            shift_p
        );
    }

    let oversampled = oversample_real(&finite_or_zero(&coher), osfactor, osfactor)?;
    let Some((idx_l, idx_p, max_corr)) = surface_peak(&oversampled) else {
        return Ok(CorrelationResult::no_correlation(0.0, 0.0));
    };

    let factor = osfactor as f64;
    Ok(CorrelationResult::new(
        bounded(max_corr),
        acc_l as f64 - idx_l as f64 / factor,
        acc_p as f64 - idx_p as f64 / factor,
    ))
}

/// Position and value of the largest finite element (first in row-major order on ties)
pub fn surface_peak(surface: &RealMatrix) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for ((l, p), &value) in surface.indexed_iter() {
        if !value.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, _, max)| value > max) {
            best = Some((l, p, value));
        }
    }
    best
}

fn normalized(covariance: f64, norm_product: f64) -> f64 {
    if norm_product > 0.0 {
        covariance / norm_product.sqrt()
    } else {
        f64::NAN
    }
}

/// Interpolated surfaces overshoot their samples; correlations stay in [-1, 1]
fn bounded(correlation: f64) -> f64 {
    correlation.clamp(-1.0, 1.0)
}

fn finite_or_zero(surface: &RealMatrix) -> RealMatrix {
    surface.mapv(|v| if v.is_finite() { v } else { 0.0 })
}

fn check_chip_pair(master: &ComplexMatrix, mask: &ComplexMatrix) -> SarResult<(usize, usize)> {
    if master.dim() != mask.dim() {
        return Err(SarError::DimensionMismatch {
            expected: master.dim(),
            found: mask.dim(),
        });
    }
    let (lines, pixels) = master.dim();
    if !lines.is_power_of_two() || !pixels.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "chip size {}x{} is not a power of 2",
            lines, pixels
        )));
    }
    Ok((lines, pixels))
}

fn check_factor(factor: usize) -> SarResult<()> {
    if !factor.is_power_of_two() {
        return Err(SarError::InvalidParameter(format!(
            "oversampling factor {} is not a power of 2",
            factor
        )));
    }
    Ok(())
}

fn check_accuracy(acc: usize, size: usize, axis: &str) -> SarResult<()> {
    if acc == 0 || acc > size / 2 {
        return Err(SarError::InvalidParameter(format!(
            "{} accuracy {} must be in [1, {}]",
            axis,
            acc,
            size / 2
        )));
    }
    Ok(())
}
