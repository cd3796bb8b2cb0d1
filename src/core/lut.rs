use crate::types::{RealMatrix, SarComplex, SarError, SarResult};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of sub-pixel intervals; the table holds `INTERVAL + 1` kernels
pub const INTERVAL: usize = 127;

/// Available interpolation kernels for resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    /// Nearest neighbour, 2 points
    Rect,
    /// Piecewise linear, 2 points
    Tri,
    /// Cubic convolution, 4 points (alpha = -1)
    CubicConv4,
    /// Cubic convolution, 6 points (alpha = -0.5, beta = 0.5)
    CubicConv6,
    /// Truncated sinc, 6 points
    TruncSinc6,
    /// Truncated sinc, 8 points
    TruncSinc8,
    /// Truncated sinc, 16 points
    TruncSinc16,
    /// Raised cosine (roll-off 0.5), 6 points
    RaisedCosine6,
    /// Raised cosine (roll-off 0.5), 12 points
    RaisedCosine12,
}

impl KernelType {
    /// Default kernel length
    pub fn npoints(&self) -> usize {
        match self {
            KernelType::Rect | KernelType::Tri => 2,
            KernelType::CubicConv4 => 4,
            KernelType::CubicConv6 | KernelType::TruncSinc6 | KernelType::RaisedCosine6 => 6,
            KernelType::TruncSinc8 => 8,
            KernelType::RaisedCosine12 => 12,
            KernelType::TruncSinc16 => 16,
        }
    }

    /// Kernel value at distance `x` from the interpolation point
    pub fn weight(&self, x: f64) -> f64 {
        match self {
            KernelType::Rect => rect(x),
            KernelType::Tri => tri(x),
            KernelType::CubicConv4 => cubic_conv4(x, -1.0),
            KernelType::CubicConv6 => cubic_conv6(x, -0.5, 0.5),
            KernelType::TruncSinc6 | KernelType::TruncSinc8 | KernelType::TruncSinc16 => sinc(x),
            KernelType::RaisedCosine6 | KernelType::RaisedCosine12 => raised_cosine(x, 0.5),
        }
    }
}

impl std::fmt::Display for KernelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KernelType::Rect => "rect",
            KernelType::Tri => "tri",
            KernelType::CubicConv4 => "cc4p",
            KernelType::CubicConv6 => "cc6p",
            KernelType::TruncSinc6 => "ts6p",
            KernelType::TruncSinc8 => "ts8p",
            KernelType::TruncSinc16 => "ts16p",
            KernelType::RaisedCosine6 => "rc6p",
            KernelType::RaisedCosine12 => "rc12p",
        };
        write!(f, "{}", name)
    }
}

fn rect(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 0.5 {
        1.0
    } else if ax == 0.5 {
        0.5
    } else {
        0.0
    }
}

fn tri(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        1.0 - ax
    } else {
        0.0
    }
}

fn cubic_conv4(x: f64, alpha: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        (alpha + 2.0) * ax.powi(3) - (alpha + 3.0) * ax.powi(2) + 1.0
    } else if ax < 2.0 {
        alpha * ax.powi(3) - 5.0 * alpha * ax.powi(2) + 8.0 * alpha * ax - 4.0 * alpha
    } else {
        0.0
    }
}

fn cubic_conv6(x: f64, alpha: f64, beta: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        (alpha - beta + 2.0) * ax.powi(3) - (alpha - beta + 3.0) * ax.powi(2) + 1.0
    } else if ax < 2.0 {
        alpha * ax.powi(3) - (5.0 * alpha - beta) * ax.powi(2) + (8.0 * alpha - 3.0 * beta) * ax
            - (4.0 * alpha - 2.0 * beta)
    } else if ax < 3.0 {
        beta * ax.powi(3) - 8.0 * beta * ax.powi(2) + 21.0 * beta * ax - 18.0 * beta
    } else {
        0.0
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn raised_cosine(x: f64, beta: f64) -> f64 {
    let denominator = 1.0 - (2.0 * beta * x).powi(2);
    if denominator.abs() < 1e-12 {
        // limit at |x| = 1/(2 beta)
        PI / 4.0 * sinc(x)
    } else {
        sinc(x) * (beta * PI * x).cos() / denominator
    }
}

/// Precomputed interpolation kernels, one per quantised sub-pixel position.
///
/// Kernel `k` interpolates at fractional position `k / INTERVAL`; its samples sit at
/// distances `i - (N/2 - 1) - k/INTERVAL`, `i = 0..N`, from the interpolation point.
/// Built once, then shared read-only between resampling workers.
#[derive(Debug, Clone)]
pub struct InterpolationLut {
    kernel_type: KernelType,
    npoints: usize,
    kernels: Array2<SarComplex>,
    axis: RealMatrix,
}

impl InterpolationLut {
    /// Table for a kernel type at its default length
    pub fn new(kernel_type: KernelType) -> SarResult<Self> {
        Self::with_length(kernel_type, kernel_type.npoints())
    }

    /// Table for a kernel type with an explicit (even) number of points
    pub fn with_length(kernel_type: KernelType, npoints: usize) -> SarResult<Self> {
        if npoints == 0 || npoints % 2 != 0 {
            return Err(SarError::InvalidParameter(format!(
                "interpolation kernel length must be even and positive, got {}",
                npoints
            )));
        }

        log::debug!("Building {} interpolation table with {} points", kernel_type, npoints);

        let half = (npoints / 2) as f64 - 1.0;
        let axis = Array2::from_shape_fn((INTERVAL + 1, npoints), |(k, i)| {
            i as f64 - half - k as f64 / INTERVAL as f64
        });

        let mut kernels = Array2::<SarComplex>::zeros((INTERVAL + 1, npoints));
        for (mut kernel, x) in kernels.rows_mut().into_iter().zip(axis.rows()) {
            let weights: Vec<f64> = x.iter().map(|&xi| kernel_type.weight(xi)).collect();
            let sum: f64 = weights.iter().sum();
            let scale = if sum.abs() > f64::EPSILON { 1.0 / sum } else { 1.0 };
            for (dst, w) in kernel.iter_mut().zip(weights) {
                *dst = SarComplex::new(w * scale, 0.0);
            }
        }

        Ok(Self {
            kernel_type,
            npoints,
            kernels,
            axis,
        })
    }

    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Table index for a fractional position in [0, 1)
    pub fn index(fraction: f64) -> usize {
        ((fraction * INTERVAL as f64 + 0.5) as usize).min(INTERVAL)
    }

    pub fn kernel(&self, index: usize) -> ArrayView1<'_, SarComplex> {
        self.kernels.row(index)
    }

    /// Sample distances of kernel `index`
    pub fn axis(&self, index: usize) -> ArrayView1<'_, f64> {
        self.axis.row(index)
    }

    /// Log a short overview of the table
    pub fn overview(&self) {
        log::debug!("Interpolation kernel {} ({} points)", self.kernel_type, self.npoints);
        for index in [0, INTERVAL / 2, INTERVAL] {
            let weights: Vec<String> = self
                .kernel(index)
                .iter()
                .map(|w| format!("{:.4}", w.re))
                .collect();
            log::debug!("  kernel {:3}: [{}]", index, weights.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const ALL: [KernelType; 9] = [
        KernelType::Rect,
        KernelType::Tri,
        KernelType::CubicConv4,
        KernelType::CubicConv6,
        KernelType::TruncSinc6,
        KernelType::TruncSinc8,
        KernelType::TruncSinc16,
        KernelType::RaisedCosine6,
        KernelType::RaisedCosine12,
    ];

    #[test]
    fn test_kernels_have_unit_sum() {
        for kernel_type in ALL {
            let lut = InterpolationLut::new(kernel_type).unwrap();
            for k in [0, 1, 63, 64, INTERVAL] {
                let sum: f64 = lut.kernel(k).iter().map(|w| w.re).sum();
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_fraction_selects_centre_sample() {
        for kernel_type in ALL {
            let lut = InterpolationLut::new(kernel_type).unwrap();
            let centre = lut.npoints() / 2 - 1;
            for (i, w) in lut.kernel(0).iter().enumerate() {
                let expected = if i == centre { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(w.re, expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_axis_layout() {
        let lut = InterpolationLut::new(KernelType::TruncSinc6).unwrap();
        assert_abs_diff_eq!(lut.axis(0)[0], -2.0);
        assert_abs_diff_eq!(lut.axis(0)[5], 3.0);
        assert_abs_diff_eq!(lut.axis(INTERVAL)[2], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_index_rounding() {
        assert_eq!(InterpolationLut::index(0.0), 0);
        assert_eq!(InterpolationLut::index(0.5), 64);
        assert_eq!(InterpolationLut::index(0.999), INTERVAL);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(InterpolationLut::with_length(KernelType::TruncSinc6, 7).is_err());
        assert!(InterpolationLut::with_length(KernelType::TruncSinc6, 10).is_ok());
    }
}
