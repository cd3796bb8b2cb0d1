use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Complex-valued SAR sample (I + jQ)
pub type SarComplex = Complex64;

/// 2D complex chip or image block (lines x pixels), row-major
pub type ComplexMatrix = Array2<SarComplex>;

/// 2D real surface (magnitudes, correlation surfaces)
pub type RealMatrix = Array2<f64>;

/// Correlation value reported for chips without usable signal (water, constant, no data).
/// Never a valid correlation; consumers must exclude it from statistics.
pub const NO_CORRELATION: f64 = -999.0;

/// Axis-aligned pixel region with inclusive bounds.
///
/// A window carries no coordinate-system tag: whether it lives in the master or the
/// slave system is fixed by the function that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Window {
    pub line_lo: i64,
    pub line_hi: i64,
    pub pix_lo: i64,
    pub pix_hi: i64,
}

impl Window {
    pub fn new(line_lo: i64, line_hi: i64, pix_lo: i64, pix_hi: i64) -> Self {
        Self {
            line_lo,
            line_hi,
            pix_lo,
            pix_hi,
        }
    }

    /// Window of `lines` x `pixels` starting at the given upper-left corner
    pub fn from_corner(line_lo: i64, pix_lo: i64, lines: i64, pixels: i64) -> Self {
        Self::new(line_lo, line_lo + lines - 1, pix_lo, pix_lo + pixels - 1)
    }

    pub fn lines(&self) -> i64 {
        self.line_hi - self.line_lo + 1
    }

    pub fn pixels(&self) -> i64 {
        self.pix_hi - self.pix_lo + 1
    }

    /// True when the window has no lines or no pixels
    pub fn is_empty(&self) -> bool {
        self.lines() <= 0 || self.pixels() <= 0
    }

    /// Reject degenerate windows before they reach an estimator
    pub fn validate(&self) -> SarResult<()> {
        if self.is_empty() {
            return Err(SarError::DegenerateWindow(*self));
        }
        Ok(())
    }

    /// Shift by an offset (e.g. master -> slave system)
    pub fn translate(&self, d_line: i64, d_pix: i64) -> Self {
        Self::new(
            self.line_lo + d_line,
            self.line_hi + d_line,
            self.pix_lo + d_pix,
            self.pix_hi + d_pix,
        )
    }

    /// Shrink (or grow, for negative margins) on both sides
    pub fn shrink(&self, margin_line: i64, margin_pix: i64) -> Self {
        Self::new(
            self.line_lo + margin_line,
            self.line_hi - margin_line,
            self.pix_lo + margin_pix,
            self.pix_hi - margin_pix,
        )
    }

    /// Intersection of two windows in the same coordinate system.
    /// The result may be empty; check `is_empty` before use.
    pub fn intersect(&self, other: &Window) -> Self {
        Self::new(
            self.line_lo.max(other.line_lo),
            self.line_hi.min(other.line_hi),
            self.pix_lo.max(other.pix_lo),
            self.pix_hi.min(other.pix_hi),
        )
    }

    pub fn contains(&self, other: &Window) -> bool {
        other.line_lo >= self.line_lo
            && other.line_hi <= self.line_hi
            && other.pix_lo >= self.pix_lo
            && other.pix_hi <= self.pix_hi
    }

    pub fn contains_point(&self, line: i64, pixel: i64) -> bool {
        line >= self.line_lo && line <= self.line_hi && pixel >= self.pix_lo && pixel <= self.pix_hi
    }

    /// Matrix dimensions (rows, cols) of a chip covering this window
    pub fn shape(&self) -> (usize, usize) {
        (self.lines().max(0) as usize, self.pixels().max(0) as usize)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}]",
            self.line_lo, self.line_hi, self.pix_lo, self.pix_hi
        )
    }
}

/// Outcome of one correlation estimate.
///
/// Estimators report offsets of the slave chip relative to the master chip; batch
/// drivers add the initial offset so table rows hold total image offsets.
/// Positive offsets mean a master feature appears at a larger slave line/pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub correlation: f64,
    pub offset_line: f64,
    pub offset_pixel: f64,
}

impl CorrelationResult {
    pub fn new(correlation: f64, offset_line: f64, offset_pixel: f64) -> Self {
        Self {
            correlation,
            offset_line,
            offset_pixel,
        }
    }

    /// Sentinel row for a chip without signal
    pub fn no_correlation(offset_line: f64, offset_pixel: f64) -> Self {
        Self::new(NO_CORRELATION, offset_line, offset_pixel)
    }

    pub fn is_valid(&self) -> bool {
        self.correlation != NO_CORRELATION && self.correlation.is_finite()
    }

    /// Same estimate with an offset added (chip-relative -> image offset)
    pub fn shifted(&self, d_line: f64, d_pixel: f64) -> Self {
        Self::new(
            self.correlation,
            self.offset_line + d_line,
            self.offset_pixel + d_pixel,
        )
    }
}

/// One row of a correlation result table: window centre in the master system and the
/// estimate for that window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEstimate {
    pub line: i64,
    pub pixel: i64,
    pub result: CorrelationResult,
}

/// Error types for coregistration processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Degenerate window {0}: no lines or pixels")]
    DegenerateWindow(Window),

    #[error("Failed to read chip {window}: {reason}")]
    ChipRead { window: Window, reason: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing cancelled")]
    Cancelled,
}

/// Result type for coregistration operations
pub type SarResult<T> = Result<T, SarError>;
