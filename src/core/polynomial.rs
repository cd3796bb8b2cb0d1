//! Bivariate coregistration polynomials
//!
//! Coefficients are ordered by total degree, and within one degree by decreasing power
//! of the line coordinate: `c00, c10, c01, c20, c11, c02, ...` where `cij` multiplies
//! `line^i * pixel^j`. Coordinates are normalised into [-2, 2] over a reference window
//! before evaluation.

use crate::types::{SarError, SarResult, Window};
use serde::{Deserialize, Serialize};

/// Map `value` from [min, max] onto [-2, 2]
pub fn normalize2(value: f64, min: f64, max: f64) -> f64 {
    (value - 0.5 * (min + max)) / (0.25 * (max - min))
}

/// Polynomial degree for a coefficient count (inverse triangular number)
pub fn degree_from_coefficients(num_coefficients: usize) -> i64 {
    let root = ((1 + 8 * num_coefficients) as f64).sqrt().floor();
    (0.5 * (root - 1.0)).floor() as i64 - 1
}

/// Number of coefficients of a full 2D polynomial of the given degree
pub fn number_of_coefficients(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Evaluate a 2D polynomial at normalised (line, pixel).
///
/// Trailing coefficients beyond the last complete degree are ignored.
pub fn polyval(line: f64, pixel: f64, coefficients: &[f64]) -> f64 {
    let degree = degree_from_coefficients(coefficients.len());
    if degree < 0 {
        return 0.0;
    }

    let mut sum = coefficients[0];
    let mut index = 1;
    for d in 1..=degree as i32 {
        for k in 0..=d {
            sum += coefficients[index] * line.powi(d - k) * pixel.powi(k);
            index += 1;
        }
    }
    sum
}

/// Coregistration polynomial pair mapping master (line, pixel) to slave coordinates.
///
/// `slave_line = line + polyval(norm(line), norm(pixel), cpm_l)`, likewise for pixels.
/// The normalisation window is the master window the coefficients were estimated on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoregPolynomial {
    pub cpm_l: Vec<f64>,
    pub cpm_p: Vec<f64>,
    pub normalization: Window,
}

impl CoregPolynomial {
    pub fn new(cpm_l: Vec<f64>, cpm_p: Vec<f64>, normalization: Window) -> SarResult<Self> {
        for (name, coefficients) in [("line", &cpm_l), ("pixel", &cpm_p)] {
            let degree = degree_from_coefficients(coefficients.len());
            if degree < 0 || number_of_coefficients(degree as usize) != coefficients.len() {
                return Err(SarError::InvalidParameter(format!(
                    "{} coregistration polynomial has {} coefficients, not a full 2D polynomial",
                    name,
                    coefficients.len()
                )));
            }
        }
        if normalization.line_hi == normalization.line_lo || normalization.pix_hi == normalization.pix_lo {
            return Err(SarError::InvalidParameter(format!(
                "normalisation window {} has zero extent",
                normalization
            )));
        }
        Ok(Self {
            cpm_l,
            cpm_p,
            normalization,
        })
    }

    /// Pure translation: slave = master + (offset_l, offset_p)
    pub fn constant(offset_l: f64, offset_p: f64, normalization: Window) -> SarResult<Self> {
        Self::new(vec![offset_l], vec![offset_p], normalization)
    }

    pub fn degree_l(&self) -> i64 {
        degree_from_coefficients(self.cpm_l.len())
    }

    pub fn degree_p(&self) -> i64 {
        degree_from_coefficients(self.cpm_p.len())
    }

    /// Constant terms (line, pixel); zero for a polynomial without coefficients
    pub fn zero_order(&self) -> (f64, f64) {
        (
            self.cpm_l.first().copied().unwrap_or(0.0),
            self.cpm_p.first().copied().unwrap_or(0.0),
        )
    }

    /// Normalised coordinates of a master pixel
    pub fn normalize(&self, line: f64, pixel: f64) -> (f64, f64) {
        let win = &self.normalization;
        (
            normalize2(line, win.line_lo as f64, win.line_hi as f64),
            normalize2(pixel, win.pix_lo as f64, win.pix_hi as f64),
        )
    }

    /// Offset (slave - master) at a master pixel
    pub fn offset(&self, line: f64, pixel: f64) -> (f64, f64) {
        let (norm_l, norm_p) = self.normalize(line, pixel);
        (
            polyval(norm_l, norm_p, &self.cpm_l),
            polyval(norm_l, norm_p, &self.cpm_p),
        )
    }

    /// Slave position of a master pixel
    pub fn transform(&self, line: f64, pixel: f64) -> (f64, f64) {
        let (d_line, d_pixel) = self.offset(line, pixel);
        (line + d_line, pixel + d_pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize2_range() {
        assert_abs_diff_eq!(normalize2(0.0, 0.0, 100.0), -2.0);
        assert_abs_diff_eq!(normalize2(50.0, 0.0, 100.0), 0.0);
        assert_abs_diff_eq!(normalize2(100.0, 0.0, 100.0), 2.0);
    }

    #[test]
    fn test_degree_from_coefficients() {
        assert_eq!(degree_from_coefficients(1), 0);
        assert_eq!(degree_from_coefficients(3), 1);
        assert_eq!(degree_from_coefficients(6), 2);
        assert_eq!(degree_from_coefficients(10), 3);
        assert_eq!(degree_from_coefficients(0), -1);
        for degree in 0..6 {
            assert_eq!(
                degree_from_coefficients(number_of_coefficients(degree)),
                degree as i64
            );
        }
    }

    #[test]
    fn test_polyval_term_order() {
        // 1 + 2x + 3y + 4x^2 + 5xy + 6y^2
        let coefficients = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (x, y) = (0.5, -1.5);
        let expected = 1.0 + 2.0 * x + 3.0 * y + 4.0 * x * x + 5.0 * x * y + 6.0 * y * y;
        assert_abs_diff_eq!(polyval(x, y, &coefficients), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_polynomial_is_translation() {
        let poly = CoregPolynomial::constant(2.0, -3.5, Window::new(0, 999, 0, 499)).unwrap();
        assert_eq!(poly.degree_l(), 0);
        assert_eq!(poly.transform(10.0, 20.0), (12.0, 16.5));
    }

    #[test]
    fn test_zero_order_of_literal_without_coefficients() {
        let empty = CoregPolynomial {
            cpm_l: vec![],
            cpm_p: vec![],
            normalization: Window::new(0, 99, 0, 99),
        };
        assert_eq!(empty.zero_order(), (0.0, 0.0));
        assert_eq!(empty.offset(10.0, 20.0), (0.0, 0.0));
        let poly = CoregPolynomial::new(vec![1.5, 0.1, 0.2], vec![-2.0], Window::new(0, 99, 0, 99)).unwrap();
        assert_eq!(poly.zero_order(), (1.5, -2.0));
    }

    #[test]
    fn test_rejects_incomplete_coefficient_set() {
        let win = Window::new(0, 99, 0, 99);
        assert!(CoregPolynomial::new(vec![1.0, 2.0], vec![0.0], win).is_err());
        assert!(CoregPolynomial::new(vec![], vec![0.0], win).is_err());
        assert!(CoregPolynomial::new(vec![0.0], vec![0.0], Window::new(5, 5, 0, 99)).is_err());
    }
}
