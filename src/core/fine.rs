use crate::core::cancel::CancelToken;
use crate::core::consensus::{get_offset, ConsensusOffset};
use crate::core::correlation::{coherence_space, ChipCorrelator};
use crate::core::estimate_windows;
use crate::core::geometry::{sample_positions, BORDER};
use crate::core::spectral::{oversample, shift_azimuth_spectrum};
use crate::io::ImageSource;
use crate::types::{ComplexMatrix, CorrelationResult, SarError, SarResult, Window, WindowEstimate};
use serde::{Deserialize, Serialize};

/// Fine correlation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FineMethod {
    /// Cross-correlation of magnitude chips in the frequency domain
    MagFft,
    /// Chips brought to zero Doppler and oversampled by 2 before cross-correlation
    Oversample,
    /// Space-domain coherence on chips enlarged by the search range
    MagSpace,
}

/// Fine coregistration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineCorrParams {
    /// Number of correlation windows distributed over the overlap
    pub num_windows: usize,
    /// Correlation window size (lines), power of 2
    pub mask_size_l: usize,
    /// Correlation window size (pixels), power of 2
    pub mask_size_p: usize,
    /// Search range (lines)
    pub acc_l: usize,
    /// Search range (pixels)
    pub acc_p: usize,
    /// Oversampling factor of the correlation surface, power of 2
    pub osfactor: usize,
    /// Initial offset, usually the coarse result (lines)
    pub init_offset_l: i64,
    /// Initial offset (pixels)
    pub init_offset_p: i64,
    /// Window centres (master system) to use instead of distributed points
    pub positions: Option<Vec<(i64, i64)>>,
    pub method: FineMethod,
}

impl Default for FineCorrParams {
    fn default() -> Self {
        Self {
            num_windows: 601,
            mask_size_l: 64,
            mask_size_p: 64,
            acc_l: 8,
            acc_p: 8,
            osfactor: 32,
            init_offset_l: 0,
            init_offset_p: 0,
            positions: None,
            method: FineMethod::MagFft,
        }
    }
}

impl FineCorrParams {
    pub fn validate(&self) -> SarResult<()> {
        let has_positions = self.positions.as_ref().map_or(false, |p| !p.is_empty());
        if self.num_windows == 0 && !has_positions {
            return Err(SarError::InvalidParameter(
                "fine correlation needs at least one window".to_string(),
            ));
        }
        if !self.mask_size_l.is_power_of_two() || !self.mask_size_p.is_power_of_two() {
            return Err(SarError::InvalidParameter(format!(
                "fine correlation window size {}x{} should be 2^n",
                self.mask_size_l, self.mask_size_p
            )));
        }
        if !self.osfactor.is_power_of_two() {
            return Err(SarError::InvalidParameter(format!(
                "oversampling factor {} should be 2^n",
                self.osfactor
            )));
        }
        if self.acc_l == 0 || self.acc_p == 0 {
            return Err(SarError::InvalidParameter(format!(
                "search range ({}, {}) must be at least one pixel",
                self.acc_l, self.acc_p
            )));
        }
        let refined = self.osfactor > 1 || self.method == FineMethod::MagSpace;
        if refined && (!self.acc_l.is_power_of_two() || !self.acc_p.is_power_of_two()) {
            return Err(SarError::InvalidParameter(format!(
                "search range ({}, {}) should be 2^n for oversampling",
                self.acc_l, self.acc_p
            )));
        }
        Ok(())
    }
}

/// Per-window fine offsets (initial offset included)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineCoregResult {
    pub method: FineMethod,
    /// Region (master system) the window corners were drawn from
    pub overlap: Window,
    /// Search range after clamping to the window size
    pub acc_l: usize,
    pub acc_p: usize,
    pub estimates: Vec<WindowEstimate>,
}

impl FineCoregResult {
    pub fn valid_windows(&self) -> usize {
        self.estimates.iter().filter(|e| e.result.is_valid()).count()
    }

    /// Reduce the table to one integer offset
    pub fn consensus(&self) -> SarResult<ConsensusOffset> {
        let table: Vec<CorrelationResult> = self.estimates.iter().map(|e| e.result).collect();
        get_offset(&table)
    }
}

/// Sub-pixel offset estimation at many windows
#[derive(Debug)]
pub struct FineCoregistration {
    params: FineCorrParams,
    correlator: ChipCorrelator,
    cancel: CancelToken,
}

impl FineCoregistration {
    pub fn new(params: FineCorrParams) -> Self {
        Self {
            params,
            correlator: ChipCorrelator::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Fine coregistration with default parameters
    pub fn standard() -> Self {
        Self::new(FineCorrParams::default())
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &FineCorrParams {
        &self.params
    }

    pub fn run(&self, master: &dyn ImageSource, slave: &dyn ImageSource) -> SarResult<FineCoregResult> {
        let p = &self.params;
        log::info!("Starting fine coregistration ({:?})", p.method);
        p.validate()?;
        self.cancel.check()?;

        let acc_l = clamp_accuracy(p.acc_l, p.mask_size_l, "lines");
        let acc_p = clamp_accuracy(p.acc_p, p.mask_size_p, "pixels");

        // MagSpace correlates the window inside a chip enlarged by the search range
        let (chip_l, chip_p) = match p.method {
            FineMethod::MagSpace => (p.mask_size_l + 2 * acc_l, p.mask_size_p + 2 * acc_p),
            _ => (p.mask_size_l, p.mask_size_p),
        };

        let slave_in_master = slave
            .info()
            .current_window
            .translate(-p.init_offset_l, -p.init_offset_p);
        let common = master.info().current_window.intersect(&slave_in_master);
        let overlap = Window::new(
            common.line_lo + BORDER,
            common.line_hi - chip_l as i64 - BORDER,
            common.pix_lo + BORDER,
            common.pix_hi - chip_p as i64 - BORDER,
        );
        log::debug!("Overlap for window corners: {}", overlap);

        let half_l = (chip_l / 2) as i64;
        let half_p = (chip_p / 2) as i64;
        let corners = sample_positions(p.positions.as_deref(), p.num_windows, &overlap, (half_l, half_p))?;
        log::debug!(
            "Correlating {} windows of {}x{} (search range {}, {}, oversampling {})",
            corners.len(),
            chip_l,
            chip_p,
            acc_l,
            acc_p,
            p.osfactor
        );

        let estimates = estimate_windows(&corners, |line, pixel| {
            self.cancel.check()?;

            let master_win = Window::from_corner(line, pixel, chip_l as i64, chip_p as i64);
            let slave_win = master_win.translate(p.init_offset_l, p.init_offset_p);
            let master_chip = master.read_window(&master_win)?;
            let slave_chip = slave.read_window(&slave_win)?;

            let estimate = self
                .estimate(master, slave, master_chip, slave_chip, (&master_win, &slave_win), acc_l, acc_p)
                .unwrap_or_else(|e| {
                    log::warn!("Window ({}, {}) skipped: {}", line, pixel, e);
                    CorrelationResult::no_correlation(0.0, 0.0)
                });

            Ok(WindowEstimate {
                line: line + half_l,
                pixel: pixel + half_p,
                result: estimate.shifted(p.init_offset_l as f64, p.init_offset_p as f64),
            })
        })?;

        let result = FineCoregResult {
            method: p.method,
            overlap,
            acc_l,
            acc_p,
            estimates,
        };
        log::debug!("Number  posl  posp  offsetl  offsetp  correlation");
        for (i, e) in result.estimates.iter().enumerate() {
            log::debug!(
                "{:6}  {:5}  {:5}  {:8.3}  {:8.3}  {:.4}",
                i,
                e.line,
                e.pixel,
                e.result.offset_line,
                e.result.offset_pixel,
                e.result.correlation
            );
        }
        log::info!(
            "Fine coregistration completed: {} of {} windows correlated",
            result.valid_windows(),
            result.estimates.len()
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn estimate(
        &self,
        master: &dyn ImageSource,
        slave: &dyn ImageSource,
        mut master_chip: ComplexMatrix,
        mut slave_chip: ComplexMatrix,
        windows: (&Window, &Window),
        acc_l: usize,
        acc_p: usize,
    ) -> SarResult<CorrelationResult> {
        let osfactor = self.params.osfactor;
        match self.params.method {
            FineMethod::MagFft => self
                .correlator
                .cross_correlate(&master_chip, &slave_chip, osfactor, acc_l, acc_p),
            FineMethod::Oversample => {
                for (chip, info, window) in [
                    (&mut master_chip, master.info(), windows.0),
                    (&mut slave_chip, slave.info(), windows.1),
                ] {
                    // Shift is the 1-based first pixel; negative moves fDC to zero
                    let shift = -((window.pix_lo + 1) as f64);
                    shift_azimuth_spectrum(chip, info.prf, info.rsr2x, &info.doppler, shift);
                }
                let master_ovs = oversample(&master_chip, 2, 2)?;
                let slave_ovs = oversample(&slave_chip, 2, 2)?;
                let result = self.correlator.cross_correlate(
                    &master_ovs,
                    &slave_ovs,
                    (osfactor / 2).max(1),
                    2 * acc_l,
                    2 * acc_p,
                )?;
                if !result.is_valid() {
                    return Ok(result);
                }
                Ok(CorrelationResult::new(
                    result.correlation,
                    result.offset_line / 2.0,
                    result.offset_pixel / 2.0,
                ))
            }
            FineMethod::MagSpace => coherence_space(acc_l, acc_p, osfactor, &master_chip, &slave_chip),
        }
    }
}

/// Search range limited to half the window
fn clamp_accuracy(acc: usize, mask_size: usize, axis: &str) -> usize {
    let max = mask_size / 2;
    if acc > max {
        log::warn!(
            "Search range {} ({}) larger than half the window, using {}",
            axis,
            acc,
            max
        );
        max
    } else {
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_clamped_per_axis() {
        assert_eq!(clamp_accuracy(40, 64, "lines"), 32);
        assert_eq!(clamp_accuracy(8, 16, "pixels"), 8);
    }

    #[test]
    fn test_params_validation() {
        assert!(FineCorrParams::default().validate().is_ok());
        let bad_size = FineCorrParams {
            mask_size_p: 48,
            ..Default::default()
        };
        assert!(bad_size.validate().is_err());
        let bad_factor = FineCorrParams {
            osfactor: 6,
            ..Default::default()
        };
        assert!(bad_factor.validate().is_err());
        let no_search = FineCorrParams {
            acc_l: 0,
            ..Default::default()
        };
        assert!(no_search.validate().is_err());
    }
}
