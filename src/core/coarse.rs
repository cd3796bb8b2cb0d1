use crate::core::cancel::CancelToken;
use crate::core::consensus::{get_offset, ConsensusOffset};
use crate::core::correlation::{correlate, surface_peak, ChipCorrelator};
use crate::core::estimate_windows;
use crate::core::geometry::{sample_positions, BORDER};
use crate::core::spectral::magnitude;
use crate::io::ImageSource;
use crate::types::{CorrelationResult, RealMatrix, SarError, SarResult, Window, WindowEstimate};
use ndarray::s;
use serde::{Deserialize, Serialize};

/// Coarse correlation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoarseMethod {
    /// Space-domain correlation of magnitude, mask sizes forced odd
    MagSpace,
    /// Frequency-domain correlation of magnitude, mask sizes power of 2
    MagFft,
}

/// Coarse coregistration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseCorrParams {
    /// Number of correlation windows distributed over the overlap
    pub num_windows: usize,
    /// Correlation window size (lines)
    pub mask_size_l: usize,
    /// Correlation window size (pixels)
    pub mask_size_p: usize,
    /// Accuracy of the initial offset (lines), search range of the space method
    pub acc_l: usize,
    /// Accuracy of the initial offset (pixels)
    pub acc_p: usize,
    /// Initial offset, slave minus master (lines)
    pub init_offset_l: i64,
    /// Initial offset, slave minus master (pixels)
    pub init_offset_p: i64,
    /// Window centres (master system) to use instead of distributed points
    pub positions: Option<Vec<(i64, i64)>>,
    pub method: CoarseMethod,
}

impl Default for CoarseCorrParams {
    fn default() -> Self {
        Self {
            num_windows: 11,
            mask_size_l: 64,
            mask_size_p: 64,
            acc_l: 8,
            acc_p: 8,
            init_offset_l: 0,
            init_offset_p: 0,
            positions: None,
            method: CoarseMethod::MagFft,
        }
    }
}

impl CoarseCorrParams {
    pub fn validate(&self) -> SarResult<()> {
        let has_positions = self.positions.as_ref().map_or(false, |p| !p.is_empty());
        if self.num_windows == 0 && !has_positions {
            return Err(SarError::InvalidParameter(
                "coarse correlation needs at least one window".to_string(),
            ));
        }
        if self.mask_size_l == 0 || self.mask_size_p == 0 {
            return Err(SarError::InvalidParameter(format!(
                "correlation window size {}x{} is empty",
                self.mask_size_l, self.mask_size_p
            )));
        }
        if self.method == CoarseMethod::MagFft
            && (!self.mask_size_l.is_power_of_two() || !self.mask_size_p.is_power_of_two())
        {
            return Err(SarError::InvalidParameter(format!(
                "coarse correlation fft: window size {}x{} should be 2^n",
                self.mask_size_l, self.mask_size_p
            )));
        }
        Ok(())
    }
}

/// Outcome of a coarse coregistration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseCoregResult {
    pub method: CoarseMethod,
    /// Region (master system) the window positions were drawn from
    pub overlap: Window,
    /// Correlation window size actually used
    pub mask_size_l: usize,
    pub mask_size_p: usize,
    pub estimates: Vec<WindowEstimate>,
    pub consensus: ConsensusOffset,
}

impl CoarseCoregResult {
    /// Consensus offset (lines, pixels), slave minus master
    pub fn offset(&self) -> (i64, i64) {
        (self.consensus.offset_lines, self.consensus.offset_pixels)
    }

    pub fn valid_windows(&self) -> usize {
        self.estimates.iter().filter(|e| e.result.is_valid()).count()
    }
}

/// Coarse coregistration by correlation of magnitude chips at many windows
#[derive(Debug)]
pub struct CoarseCoregistration {
    params: CoarseCorrParams,
    correlator: ChipCorrelator,
    cancel: CancelToken,
}

impl CoarseCoregistration {
    pub fn new(params: CoarseCorrParams) -> Self {
        Self {
            params,
            correlator: ChipCorrelator::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Coarse coregistration with default parameters
    pub fn standard() -> Self {
        Self::new(CoarseCorrParams::default())
    }

    /// Use a caller-owned token to stop the run between windows
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &CoarseCorrParams {
        &self.params
    }

    /// Estimate the offset of `slave` with respect to `master`.
    ///
    /// Windows whose chips carry no signal, or whose estimator rejects them, become
    /// sentinel rows; a failing chip read aborts the run.
    pub fn run(&self, master: &dyn ImageSource, slave: &dyn ImageSource) -> SarResult<CoarseCoregResult> {
        log::info!("Starting coarse coregistration ({:?})", self.params.method);
        self.params.validate()?;
        self.cancel.check()?;

        let result = match self.params.method {
            CoarseMethod::MagSpace => self.run_space(master, slave)?,
            CoarseMethod::MagFft => self.run_fft(master, slave)?,
        };

        self.report(&result);
        log::info!(
            "Coarse coregistration completed: offset ({}, {}) from {} of {} windows",
            result.consensus.offset_lines,
            result.consensus.offset_pixels,
            result.valid_windows(),
            result.estimates.len()
        );
        Ok(result)
    }

    /// Slave window translated into the master system, intersected with the master
    fn common_window(&self, master: &dyn ImageSource, slave: &dyn ImageSource) -> Window {
        let slave_in_master = slave
            .info()
            .current_window
            .translate(-self.params.init_offset_l, -self.params.init_offset_p);
        master.info().current_window.intersect(&slave_in_master)
    }

    fn run_space(&self, master: &dyn ImageSource, slave: &dyn ImageSource) -> SarResult<CoarseCoregResult> {
        let p = &self.params;
        let mask_l = force_odd(p.mask_size_l, "lines");
        let mask_p = force_odd(p.mask_size_p, "pixels");
        let acc_l = p.acc_l as i64;
        let acc_p = p.acc_p as i64;
        let (init_l, init_p) = (p.init_offset_l, p.init_offset_p);

        let common = self.common_window(master, slave);
        let half_l = (mask_l / 2) as i64;
        let half_p = (mask_p / 2) as i64;
        let overlap = Window::new(
            common.line_lo + half_l + acc_l + BORDER,
            common.line_hi - (mask_l as i64 - half_l) - acc_l - BORDER,
            common.pix_lo + half_p + acc_p + BORDER,
            common.pix_hi - (mask_p as i64 - half_p) - acc_p - BORDER,
        );
        log::debug!("Overlap for window centres: {}", overlap);

        let centres = sample_positions(p.positions.as_deref(), p.num_windows, &overlap, (0, 0))?;
        log::debug!(
            "Searching {} windows of {}x{} over +/-({}, {})",
            centres.len(),
            mask_l,
            mask_p,
            acc_l,
            acc_p
        );

        // Mask centre relative to the search chip origin
        let begin_l = ((mask_l - 1) / 2) as i64;
        let begin_p = ((mask_p - 1) / 2) as i64;
        let rel_l = begin_l + acc_l;
        let rel_p = begin_p + acc_p;

        let estimates = estimate_windows(&centres, |line, pixel| {
            self.cancel.check()?;

            let master_win = Window::from_corner(
                line - rel_l,
                pixel - rel_p,
                mask_l as i64 + 2 * acc_l,
                mask_p as i64 + 2 * acc_p,
            );
            let slave_win = Window::from_corner(
                line + init_l - begin_l,
                pixel + init_p - begin_p,
                mask_l as i64,
                mask_p as i64,
            );

            let search = magnitude(&master.read_window(&master_win)?);
            let mask = magnitude(&slave.read_window(&slave_win)?);

            let result = match correlate(&search, &mask) {
                Ok(surface) => match fitted_peak(&surface, mask.dim()) {
                    Some((peak_l, peak_p, corr)) => CorrelationResult::new(
                        corr,
                        (init_l + rel_l - peak_l as i64) as f64,
                        (init_p + rel_p - peak_p as i64) as f64,
                    ),
                    _ => CorrelationResult::no_correlation(init_l as f64, init_p as f64),
                },
                Err(e) => {
                    log::warn!("Window ({}, {}) skipped: {}", line, pixel, e);
                    CorrelationResult::no_correlation(init_l as f64, init_p as f64)
                }
            };
            Ok(WindowEstimate { line, pixel, result })
        })?;

        let consensus = self.consensus(&estimates)?;
        Ok(CoarseCoregResult {
            method: CoarseMethod::MagSpace,
            overlap,
            mask_size_l: mask_l,
            mask_size_p: mask_p,
            estimates,
            consensus,
        })
    }

    fn run_fft(&self, master: &dyn ImageSource, slave: &dyn ImageSource) -> SarResult<CoarseCoregResult> {
        let p = &self.params;
        let (mask_l, mask_p) = (p.mask_size_l, p.mask_size_p);
        let (init_l, init_p) = (p.init_offset_l, p.init_offset_p);

        // Windows are placed by their upper-left corner
        let common = self.common_window(master, slave);
        let overlap = Window::new(
            common.line_lo + BORDER,
            common.line_hi - mask_l as i64 - BORDER,
            common.pix_lo + BORDER,
            common.pix_hi - mask_p as i64 - BORDER,
        );
        log::debug!("Overlap for window corners: {}", overlap);

        let half_l = (mask_l / 2) as i64;
        let half_p = (mask_p / 2) as i64;
        let corners = sample_positions(p.positions.as_deref(), p.num_windows, &overlap, (half_l, half_p))?;

        let estimates = estimate_windows(&corners, |line, pixel| {
            self.cancel.check()?;

            let master_win = Window::from_corner(line, pixel, mask_l as i64, mask_p as i64);
            let slave_win = master_win.translate(init_l, init_p);
            let master_chip = master.read_window(&master_win)?;
            let slave_chip = slave.read_window(&slave_win)?;

            let estimate = self
                .correlator
                .cross_correlate(&master_chip, &slave_chip, 1, mask_l / 2, mask_p / 2)
                .unwrap_or_else(|e| {
                    log::warn!("Window ({}, {}) skipped: {}", line, pixel, e);
                    CorrelationResult::no_correlation(0.0, 0.0)
                });

            Ok(WindowEstimate {
                line: line + half_l,
                pixel: pixel + half_p,
                result: estimate.shifted(init_l as f64, init_p as f64),
            })
        })?;

        let consensus = self.consensus(&estimates)?;
        Ok(CoarseCoregResult {
            method: CoarseMethod::MagFft,
            overlap,
            mask_size_l: mask_l,
            mask_size_p: mask_p,
            estimates,
            consensus,
        })
    }

    fn consensus(&self, estimates: &[WindowEstimate]) -> SarResult<ConsensusOffset> {
        let table: Vec<CorrelationResult> = estimates.iter().map(|e| e.result).collect();
        get_offset(&table)
    }

    fn report(&self, result: &CoarseCoregResult) {
        log::debug!("Number of correlation windows: {}", result.estimates.len());
        log::debug!(
            "Correlation window size (l,p): {}, {}",
            result.mask_size_l,
            result.mask_size_p
        );
        log::debug!("Number  posl  posp  offsetl  offsetp  correlation");
        for (i, e) in result.estimates.iter().enumerate() {
            log::debug!(
                "{:6}  {:5}  {:5}  {:7.2}  {:7.2}  {:.4}",
                i,
                e.line,
                e.pixel,
                e.result.offset_line,
                e.result.offset_pixel,
                e.result.correlation
            );
        }
        log::info!(
            "Estimated translation slave w.r.t. master: {} lines, {} pixels",
            result.consensus.offset_lines,
            result.consensus.offset_pixels
        );
        log::info!(
            "Number of correlation windows: {} of {}",
            result.valid_windows(),
            result.estimates.len()
        );
    }
}

/// Odd window size for the space-domain correlator (even sizes grow by one)
fn force_odd(size: usize, axis: &str) -> usize {
    if size % 2 == 0 {
        log::info!("Correlation window {} forced odd: {} -> {}", axis, size, size + 1);
        size + 1
    } else {
        size
    }
}

/// Peak of a [`correlate`] surface over the positions where the mask fits in the
/// search chip, so the zero border never wins.
///
/// A search without any positive correlation has no match and gives `None`.
fn fitted_peak(surface: &RealMatrix, mask: (usize, usize)) -> Option<(usize, usize, f64)> {
    let (rows, cols) = surface.dim();
    if mask.0 == 0 || mask.1 == 0 || mask.0 > rows || mask.1 > cols {
        return None;
    }
    let begin_l = (mask.0 - 1) / 2;
    let begin_p = (mask.1 - 1) / 2;
    let fitted = surface
        .slice(s![begin_l..=begin_l + rows - mask.0, begin_p..=begin_p + cols - mask.1])
        .to_owned();
    surface_peak(&fitted)
        .filter(|&(_, _, corr)| corr > 0.0)
        .map(|(l, p, corr)| (l + begin_l, p + begin_p, corr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_odd() {
        assert_eq!(force_odd(32, "lines"), 33);
        assert_eq!(force_odd(33, "lines"), 33);
    }

    #[test]
    fn test_fitted_peak_ignores_unfitted_border() {
        // 7x7 search, 3x3 mask: the mask fits with its centre in rows/cols 1..=5
        let mut surface = RealMatrix::zeros((7, 7));
        surface.slice_mut(s![1..=5, 1..=5]).fill(-0.3);
        surface[[2, 4]] = -0.1;
        assert_eq!(fitted_peak(&surface, (3, 3)), None);

        surface[[3, 2]] = 0.4;
        surface[[0, 0]] = 0.9;
        surface[[6, 6]] = f64::NAN;
        assert_eq!(fitted_peak(&surface, (3, 3)), Some((3, 2, 0.4)));
        assert_eq!(fitted_peak(&surface, (9, 3)), None);
    }

    #[test]
    fn test_fitted_peak_on_correlated_search() {
        let search = RealMatrix::from_shape_fn((15, 17), |(l, p)| {
            let h = ((l * 17 + p) as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            (h >> 40) as f64
        });
        // 5x5 mask cut at upper-left (6, 4) is centred at (8, 6)
        let mask = search.slice(s![6..11, 4..9]).to_owned();
        let surface = correlate(&search, &mask).unwrap();
        let (l, p, corr) = fitted_peak(&surface, mask.dim()).unwrap();
        assert_eq!((l, p), (8, 6));
        assert!((corr - 1.0).abs() < 1e-12);

        let inverted = mask.mapv(|v| -v);
        let surface = correlate(&search, &inverted).unwrap();
        if let Some((_, _, corr)) = fitted_peak(&surface, inverted.dim()) {
            assert!(corr > 0.0 && corr < 1.0);
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(CoarseCorrParams::default().validate().is_ok());

        let params = CoarseCorrParams {
            mask_size_l: 48,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        // Space method accepts any size
        let params = CoarseCorrParams {
            mask_size_l: 48,
            method: CoarseMethod::MagSpace,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        let params = CoarseCorrParams {
            num_windows: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
