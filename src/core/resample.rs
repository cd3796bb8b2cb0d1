//! Resampling of the slave image onto the master grid.
//!
//! Every output sample is interpolated at the slave position given by the
//! coregistration polynomial with a separable kernel from the interpolation table.
//! Slave data is read in blocks of output lines; the slave buffer of a block spans the
//! polynomial's line range at the block corners plus the kernel length and a margin of
//! [`FORSURE`] lines on both sides.

use crate::core::cancel::CancelToken;
use crate::core::geometry::polynomial_overlap;
use crate::core::lut::{InterpolationLut, KernelType};
use crate::core::polynomial::CoregPolynomial;
use crate::io::{ImageSource, SlcInfo};
use crate::types::{ComplexMatrix, SarComplex, SarError, SarResult, Window};
use ndarray::{s, Array2};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Extra slave lines buffered on each side of a block
pub const FORSURE: i64 = 25;

/// Resampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleParams {
    /// Interpolation kernel
    pub kernel: KernelType,
    /// Kernel length; `None` uses the kernel's default
    pub kernel_length: Option<usize>,
    /// Modulate the azimuth kernel with the slave Doppler centroid
    pub shift_azimuth_spectrum: bool,
    /// Output lines per slave read
    pub block_lines: usize,
    /// Output window (master system); defaults to the polynomial overlap
    pub output_window: Option<Window>,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            kernel: KernelType::CubicConv6,
            kernel_length: None,
            shift_azimuth_spectrum: true,
            block_lines: 256,
            output_window: None,
        }
    }
}

/// Slave image resampled onto a master window
#[derive(Debug, Clone)]
pub struct ResampledImage {
    /// Master-system window covered by `data`
    pub window: Window,
    /// Part of `window` where samples were interpolated; zero elsewhere
    pub overlap: Window,
    pub data: ComplexMatrix,
}

/// Polynomial resampler sharing one interpolation table
#[derive(Debug, Clone)]
pub struct Resampler {
    params: ResampleParams,
    lut: Arc<InterpolationLut>,
    cancel: CancelToken,
}

impl Resampler {
    pub fn new(params: ResampleParams) -> SarResult<Self> {
        let lut = match params.kernel_length {
            Some(length) => InterpolationLut::with_length(params.kernel, length)?,
            None => InterpolationLut::new(params.kernel)?,
        };
        Self::with_lut(params, Arc::new(lut))
    }

    /// Resampler with default parameters
    pub fn standard() -> SarResult<Self> {
        Self::new(ResampleParams::default())
    }

    /// Reuse an existing table; its kernel overrides the one in `params`
    pub fn with_lut(mut params: ResampleParams, lut: Arc<InterpolationLut>) -> SarResult<Self> {
        if params.block_lines == 0 {
            return Err(SarError::InvalidParameter(
                "resampling block must hold at least one line".to_string(),
            ));
        }
        params.kernel = lut.kernel_type();
        params.kernel_length = Some(lut.npoints());
        Ok(Self {
            params,
            lut,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &ResampleParams {
        &self.params
    }

    pub fn lut(&self) -> &Arc<InterpolationLut> {
        &self.lut
    }

    /// Resample `slave` onto the master grid described by `master_window`
    pub fn resample(
        &self,
        polynomial: &CoregPolynomial,
        master_window: &Window,
        slave: &dyn ImageSource,
    ) -> SarResult<ResampledImage> {
        log::info!(
            "Starting resampling with {} kernel ({} points)",
            self.lut.kernel_type(),
            self.lut.npoints()
        );
        self.lut.overview();
        self.cancel.check()?;

        let slave_info = slave.info();
        let overlap = polynomial_overlap(master_window, &slave_info.current_window, polynomial);
        log::info!("Overlap of master with resampled slave: {}", overlap);

        let window = match self.params.output_window {
            Some(requested) => {
                requested.validate()?;
                requested
            }
            None => {
                overlap.validate()?;
                overlap
            }
        };
        let compute = window.intersect(&overlap);

        let mut data = Array2::<SarComplex>::zeros(window.shape());
        if compute.is_empty() {
            log::warn!("Output window {} does not overlap the slave image", window);
            return Ok(ResampledImage {
                window,
                overlap: compute,
                data,
            });
        }

        let doppler = self.params.shift_azimuth_spectrum && slave_info.has_doppler();
        if self.params.shift_azimuth_spectrum && !doppler {
            log::debug!("Doppler centroid is zero, azimuth spectrum not shifted");
        }

        let block_lines = self.params.block_lines as i64;
        let mut block_lo = compute.line_lo;
        while block_lo <= compute.line_hi {
            self.cancel.check()?;
            let block_hi = (block_lo + block_lines - 1).min(compute.line_hi);
            let block = Window::new(block_lo, block_hi, compute.pix_lo, compute.pix_hi);

            let buffer = self.read_buffer(polynomial, &block, slave)?;
            let rows = self.interpolate_block(polynomial, &block, &buffer, slave_info, doppler)?;

            let row0 = (block_lo - window.line_lo) as usize;
            let col0 = (compute.pix_lo - window.pix_lo) as usize;
            let cols = compute.pixels() as usize;
            for (i, row) in rows.into_iter().enumerate() {
                data.slice_mut(s![row0 + i, col0..col0 + cols])
                    .iter_mut()
                    .zip(row)
                    .for_each(|(dst, value)| *dst = value);
            }
            log::debug!("Resampled lines {} to {}", block_lo, block_hi);
            block_lo = block_hi + 1;
        }

        log::info!("Resampling completed: {} lines x {} pixels", window.lines(), window.pixels());
        Ok(ResampledImage {
            window,
            overlap: compute,
            data,
        })
    }

    /// One slave read covering all lines the block can touch
    fn read_buffer(
        &self,
        polynomial: &CoregPolynomial,
        block: &Window,
        slave: &dyn ImageSource,
    ) -> SarResult<SlaveBuffer> {
        let corners = [
            (block.line_lo, block.pix_lo),
            (block.line_lo, block.pix_hi),
            (block.line_hi, block.pix_lo),
            (block.line_hi, block.pix_hi),
        ];
        let (min_line, max_line) = corners.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(l, p)| {
            let (line, _) = polynomial.transform(l as f64, p as f64);
            (lo.min(line), hi.max(line))
        });

        let npoints = self.lut.npoints() as i64;
        let current = slave.info().current_window;
        let window = Window::new(
            (min_line.floor() as i64 - npoints - FORSURE).max(current.line_lo),
            (max_line.ceil() as i64 + npoints + FORSURE).min(current.line_hi),
            current.pix_lo,
            current.pix_hi,
        );
        if window.is_empty() {
            log::debug!("Block {} maps outside the slave image", block);
            return Ok(SlaveBuffer {
                window,
                data: Array2::zeros((0, 0)),
            });
        }
        log::trace!("Reading slave buffer {}", window);
        Ok(SlaveBuffer {
            window,
            data: slave.read_window(&window)?,
        })
    }

    #[cfg(feature = "parallel")]
    fn interpolate_block(
        &self,
        polynomial: &CoregPolynomial,
        block: &Window,
        buffer: &SlaveBuffer,
        slave: &SlcInfo,
        doppler: bool,
    ) -> SarResult<Vec<Vec<SarComplex>>> {
        use rayon::prelude::*;

        (block.line_lo..=block.line_hi)
            .into_par_iter()
            .map(|line| {
                self.cancel.check()?;
                Ok(self.interpolate_line(polynomial, line, block, buffer, slave, doppler))
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn interpolate_block(
        &self,
        polynomial: &CoregPolynomial,
        block: &Window,
        buffer: &SlaveBuffer,
        slave: &SlcInfo,
        doppler: bool,
    ) -> SarResult<Vec<Vec<SarComplex>>> {
        (block.line_lo..=block.line_hi)
            .map(|line| {
                self.cancel.check()?;
                Ok(self.interpolate_line(polynomial, line, block, buffer, slave, doppler))
            })
            .collect()
    }

    fn interpolate_line(
        &self,
        polynomial: &CoregPolynomial,
        line: i64,
        block: &Window,
        buffer: &SlaveBuffer,
        slave: &SlcInfo,
        doppler: bool,
    ) -> Vec<SarComplex> {
        let npoints = self.lut.npoints();
        let half = (npoints / 2) as i64 - 1;
        let mut kernel_l = vec![SarComplex::zero(); npoints];

        (block.pix_lo..=block.pix_hi)
            .map(|pixel| {
                let (interp_l, interp_p) = polynomial.transform(line as f64, pixel as f64);
                let floor_l = interp_l.floor();
                let floor_p = interp_p.floor();
                let index_l = InterpolationLut::index(interp_l - floor_l);
                let index_p = InterpolationLut::index(interp_p - floor_p);

                kernel_l
                    .iter_mut()
                    .zip(self.lut.kernel(index_l))
                    .for_each(|(dst, &w)| *dst = w);
                if doppler {
                    // Kernel modulated to the Doppler centroid at this range position
                    let fdc = slave.doppler_centroid(interp_p + 1.0);
                    for (w, &x) in kernel_l.iter_mut().zip(self.lut.axis(index_l)) {
                        let t = x * 2.0 * PI * fdc / slave.prf;
                        *w *= SarComplex::new(t.cos(), -t.sin());
                    }
                }
                let kernel_p = self.lut.kernel(index_p);

                let first_l = floor_l as i64 - half;
                let first_p = floor_p as i64 - half;
                let mut value = SarComplex::zero();
                for (i, &wl) in kernel_l.iter().enumerate() {
                    let l = first_l + i as i64;
                    let mut row = SarComplex::zero();
                    for (j, &wp) in kernel_p.iter().enumerate() {
                        if let Some(sample) = buffer.sample(l, first_p + j as i64) {
                            row += wp * sample;
                        }
                    }
                    value += wl * row;
                }
                value
            })
            .collect()
    }
}

/// Slave lines read for one output block, in slave coordinates
struct SlaveBuffer {
    window: Window,
    data: ComplexMatrix,
}

impl SlaveBuffer {
    /// Sample at a slave position; `None` outside the buffer
    fn sample(&self, line: i64, pixel: i64) -> Option<SarComplex> {
        if self.window.is_empty() || !self.window.contains_point(line, pixel) {
            return None;
        }
        let row = (line - self.window.line_lo) as usize;
        let col = (pixel - self.window.pix_lo) as usize;
        self.data.get((row, col)).copied()
    }
}
