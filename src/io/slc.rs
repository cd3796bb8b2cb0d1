use crate::types::{ComplexMatrix, SarError, SarResult, Window};
use serde::{Deserialize, Serialize};

/// Image metadata needed by the coregistration core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlcInfo {
    /// Part of the image that is available for reading
    pub current_window: Window,
    /// Full image extent; reference for polynomial normalisation
    pub original_window: Window,
    /// Pulse repetition frequency (Hz)
    pub prf: f64,
    /// Two times the range sampling rate (Hz)
    pub rsr2x: f64,
    /// Doppler centroid polynomial coefficients in two-way range time
    pub doppler: [f64; 3],
}

impl SlcInfo {
    /// Metadata for an image covering `window` entirely, without Doppler
    pub fn new(window: Window, prf: f64, rsr2x: f64) -> Self {
        Self {
            current_window: window,
            original_window: window,
            prf,
            rsr2x,
            doppler: [0.0; 3],
        }
    }

    pub fn with_doppler(mut self, doppler: [f64; 3]) -> Self {
        self.doppler = doppler;
        self
    }

    /// Doppler centroid (Hz) at a 1-based range pixel
    pub fn doppler_centroid(&self, pixel: f64) -> f64 {
        let tau = (pixel - 1.0) / (self.rsr2x / 2.0);
        self.doppler[0] + self.doppler[1] * tau + self.doppler[2] * tau * tau
    }

    pub fn has_doppler(&self) -> bool {
        self.doppler.iter().any(|&c| c != 0.0)
    }
}

/// Provider of complex image samples.
///
/// `read_chip` must return a matrix of exactly `window.lines() x window.pixels()` and
/// fail for windows that are not inside the current window. Implementations are
/// shared read-only between worker threads.
pub trait ImageSource: Sync {
    fn info(&self) -> &SlcInfo;

    fn read_chip(&self, window: &Window) -> SarResult<ComplexMatrix>;

    /// `read_chip` with the returned shape checked against the window
    fn read_window(&self, window: &Window) -> SarResult<ComplexMatrix> {
        let chip = self.read_chip(window)?;
        if chip.dim() != window.shape() {
            return Err(SarError::DimensionMismatch {
                expected: window.shape(),
                found: chip.dim(),
            });
        }
        Ok(chip)
    }
}

/// Image held in memory; the array covers the current window
#[derive(Debug, Clone)]
pub struct MemorySlc {
    info: SlcInfo,
    data: ComplexMatrix,
}

impl MemorySlc {
    pub fn new(info: SlcInfo, data: ComplexMatrix) -> SarResult<Self> {
        let expected = info.current_window.shape();
        if data.dim() != expected {
            return Err(SarError::DimensionMismatch {
                expected,
                found: data.dim(),
            });
        }
        Ok(Self { info, data })
    }

    pub fn data(&self) -> &ComplexMatrix {
        &self.data
    }
}

impl ImageSource for MemorySlc {
    fn info(&self) -> &SlcInfo {
        &self.info
    }

    fn read_chip(&self, window: &Window) -> SarResult<ComplexMatrix> {
        window.validate()?;
        let current = &self.info.current_window;
        if !current.contains(window) {
            return Err(SarError::ChipRead {
                window: *window,
                reason: format!("outside image window {}", current),
            });
        }

        let l0 = (window.line_lo - current.line_lo) as usize;
        let p0 = (window.pix_lo - current.pix_lo) as usize;
        let (lines, pixels) = window.shape();
        Ok(self
            .data
            .slice(ndarray::s![l0..l0 + lines, p0..p0 + pixels])
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SarComplex;
    use ndarray::Array2;

    fn image() -> MemorySlc {
        let window = Window::new(100, 109, 200, 219);
        let data = Array2::from_shape_fn(window.shape(), |(l, p)| SarComplex::new(l as f64, p as f64));
        MemorySlc::new(SlcInfo::new(window, 1679.9, 37.5e6), data).unwrap()
    }

    #[test]
    fn test_read_chip_uses_image_coordinates() {
        let slc = image();
        let chip = slc.read_chip(&Window::new(102, 104, 210, 214)).unwrap();
        assert_eq!(chip.dim(), (3, 5));
        assert_eq!(chip[[0, 0]], SarComplex::new(2.0, 10.0));
    }

    #[test]
    fn test_read_outside_fails() {
        let slc = image();
        assert!(matches!(
            slc.read_chip(&Window::new(95, 104, 210, 214)),
            Err(SarError::ChipRead { .. })
        ));
        assert!(slc.read_chip(&Window::new(104, 102, 210, 214)).is_err());
    }

    #[test]
    fn test_data_must_match_window() {
        let window = Window::new(0, 9, 0, 9);
        let data = Array2::zeros((10, 8));
        assert!(MemorySlc::new(SlcInfo::new(window, 1.0, 1.0), data).is_err());
    }

    #[test]
    fn test_doppler_centroid() {
        let info = SlcInfo::new(Window::new(0, 9, 0, 9), 1679.9, 4.0).with_doppler([100.0, 2.0, 0.5]);
        // tau = (5 - 1) / 2 = 2
        assert_eq!(info.doppler_centroid(5.0), 100.0 + 4.0 + 2.0);
        assert!(info.has_doppler());
    }
}
