//! Overlap geometry between master and slave images and sample-point placement.
//!
//! All overlap windows are expressed in the master coordinate system.

use crate::core::polynomial::{normalize2, polyval, CoregPolynomial};
use crate::types::{SarResult, Window};
use serde::{Deserialize, Serialize};

/// Margin kept free along overlap edges during offset estimation
pub const BORDER: i64 = 20;

/// Overlap of the master window with the slave window mapped into master coordinates,
/// shrunk by [`BORDER`] on every side.
///
/// `offset_l`/`offset_p` are slave minus master positions, so the slave window is
/// translated by `-offset` first. The result may be empty; callers validate it.
pub fn estimation_overlap(master: &Window, slave: &Window, offset_l: i64, offset_p: i64) -> Window {
    let slave_in_master = slave.translate(-offset_l, -offset_p);
    master.intersect(&slave_in_master).shrink(BORDER, BORDER)
}

/// Approximate rectangular overlap in master coordinates using the coregistration
/// polynomial to map the slave corners back into the master system.
///
/// The polynomial is evaluated at the slave corner minus its zero-order offset, which
/// is close enough to the master position for low-order polynomials. Lower bounds are
/// rounded up and upper bounds rounded down, so the overlap never extends past the
/// mapped slave edges.
pub fn polynomial_overlap(master: &Window, slave: &Window, polynomial: &CoregPolynomial) -> Window {
    let norm = &polynomial.normalization;
    log::info!(
        "Polynomial normalised by factors: {} {} {} {} to [-2,2]",
        norm.line_lo,
        norm.line_hi,
        norm.pix_lo,
        norm.pix_hi
    );

    let (approx_off_l, approx_off_p) = polynomial.zero_order();

    let to_master = |line: i64, pixel: i64| -> (f64, f64) {
        let norm_l = normalize2(line as f64 - approx_off_l, norm.line_lo as f64, norm.line_hi as f64);
        let norm_p = normalize2(pixel as f64 - approx_off_p, norm.pix_lo as f64, norm.pix_hi as f64);
        (
            line as f64 - polyval(norm_l, norm_p, &polynomial.cpm_l),
            pixel as f64 - polyval(norm_l, norm_p, &polynomial.cpm_p),
        )
    };

    let (l00, p00) = to_master(slave.line_lo, slave.pix_lo);
    let (l0n, p0n) = to_master(slave.line_lo, slave.pix_hi);
    let (ln0, pn0) = to_master(slave.line_hi, slave.pix_lo);
    let (lnn, pnn) = to_master(slave.line_hi, slave.pix_hi);

    Window::new(
        master.line_lo.max(l00.max(l0n).ceil() as i64),
        master.line_hi.min(ln0.min(lnn).floor() as i64),
        master.pix_lo.max(p00.max(pn0).ceil() as i64),
        master.pix_hi.min(p0n.min(pnn).floor() as i64),
    )
}

/// Slave-to-master offsets at the four slave corners (master = slave + offset)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CornerOffsets {
    pub l00: f64,
    pub p00: f64,
    pub l0n: f64,
    pub p0n: f64,
    pub ln0: f64,
    pub pn0: f64,
    pub lnn: f64,
    pub pnn: f64,
}

impl CornerOffsets {
    /// Same offset at every corner
    pub fn uniform(offset_l: f64, offset_p: f64) -> Self {
        Self {
            l00: offset_l,
            p00: offset_p,
            l0n: offset_l,
            p0n: offset_p,
            ln0: offset_l,
            pn0: offset_p,
            lnn: offset_l,
            pnn: offset_p,
        }
    }

    /// Corner offsets implied by a coregistration polynomial for the given slave window
    pub fn from_polynomial(slave: &Window, polynomial: &CoregPolynomial) -> Self {
        let (approx_off_l, approx_off_p) = polynomial.zero_order();
        let back = |line: i64, pixel: i64| -> (f64, f64) {
            let (d_l, d_p) = polynomial.offset(line as f64 - approx_off_l, pixel as f64 - approx_off_p);
            (-d_l, -d_p)
        };

        let (l00, p00) = back(slave.line_lo, slave.pix_lo);
        let (l0n, p0n) = back(slave.line_lo, slave.pix_hi);
        let (ln0, pn0) = back(slave.line_hi, slave.pix_lo);
        let (lnn, pnn) = back(slave.line_hi, slave.pix_hi);
        Self {
            l00,
            p00,
            l0n,
            p0n,
            ln0,
            pn0,
            lnn,
            pnn,
        }
    }
}

/// Intersection of the line through (a, b) with the line through (c, d).
///
/// Points are (line, pixel). Returns `None` for parallel lines.
pub fn line_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> Option<(f64, f64)> {
    let (u1, u2) = (b.0 - a.0, b.1 - a.1);
    let (v1, v2) = (d.0 - c.0, d.1 - c.1);
    let (w1, w2) = (a.0 - c.0, a.1 - c.1);

    let denominator = v1 * u2 - v2 * u1;
    if denominator == 0.0 {
        return None;
    }
    let s = (v2 * w1 - v1 * w2) / denominator;
    Some((a.0 + s * u1, a.1 + s * u2))
}

/// Overlap in master coordinates from the slave corners mapped with per-corner offsets.
///
/// The slave quadrilateral is shrunk by half the interpolator length and corrected for
/// timing errors; the overlap bounds are the tightest of the corners and the
/// intersections between master edges and slave edges.
pub fn corner_overlap(
    master: &Window,
    slave: &Window,
    corners: &CornerOffsets,
    npoints_half: f64,
    timing_l: f64,
    timing_p: f64,
) -> Window {
    let ml0 = master.line_lo as f64;
    let mln = master.line_hi as f64;
    let mp0 = master.pix_lo as f64;
    let mpn = master.pix_hi as f64;

    let s00 = (
        slave.line_lo as f64 + corners.l00 + npoints_half - timing_l,
        slave.pix_lo as f64 + corners.p00 + npoints_half - timing_p,
    );
    let s0n = (
        slave.line_lo as f64 + corners.l0n + npoints_half - timing_l,
        slave.pix_hi as f64 + corners.p0n - npoints_half - timing_p,
    );
    let sn0 = (
        slave.line_hi as f64 + corners.ln0 - npoints_half - timing_l,
        slave.pix_lo as f64 + corners.pn0 + npoints_half - timing_p,
    );
    let snn = (
        slave.line_hi as f64 + corners.lnn - npoints_half - timing_l,
        slave.pix_hi as f64 + corners.pnn - npoints_half - timing_p,
    );

    // master top/bottom edges against slave left/right edges, and vice versa
    let top_left = line_intersect((ml0, mp0), (ml0, mpn), s00, sn0);
    let top_right = line_intersect((ml0, mp0), (ml0, mpn), s0n, snn);
    let bottom_left = line_intersect((mln, mp0), (mln, mpn), s00, sn0);
    let bottom_right = line_intersect((mln, mp0), (mln, mpn), s0n, snn);
    let left_top = line_intersect((ml0, mp0), (mln, mp0), s00, s0n);
    let left_bottom = line_intersect((ml0, mp0), (mln, mp0), sn0, snn);
    let right_top = line_intersect((ml0, mpn), (mln, mpn), s00, s0n);
    let right_bottom = line_intersect((ml0, mpn), (mln, mpn), sn0, snn);

    let line_of = |p: Option<(f64, f64)>| p.map(|(l, _)| l);
    let pixel_of = |p: Option<(f64, f64)>| p.map(|(_, p)| p);

    let line_lo = [line_of(top_left), line_of(top_right), line_of(left_top), line_of(right_top)]
        .into_iter()
        .flatten()
        .fold(ml0.max(s00.0).max(s0n.0), f64::max);
    let pix_lo = [pixel_of(top_left), pixel_of(bottom_left), pixel_of(left_top), pixel_of(left_bottom)]
        .into_iter()
        .flatten()
        .fold(mp0.max(s00.1).max(sn0.1), f64::max);
    let line_hi = [line_of(bottom_left), line_of(bottom_right), line_of(left_bottom), line_of(right_bottom)]
        .into_iter()
        .flatten()
        .fold(mln.min(sn0.0).min(snn.0), f64::min);
    let pix_hi = [pixel_of(top_right), pixel_of(bottom_right), pixel_of(right_top), pixel_of(right_bottom)]
        .into_iter()
        .flatten()
        .fold(mpn.min(s0n.1).min(snn.1), f64::min);

    Window::new(
        line_lo.ceil() as i64,
        line_hi.floor() as i64,
        pix_lo.ceil() as i64,
        pix_hi.floor() as i64,
    )
}

/// Spread `n` points evenly over a window, line-major.
///
/// The number of rows follows the aspect ratio of the window so that the line and
/// pixel spacing are about equal. Points are absolute (line, pixel) positions.
pub fn distribute_points(n: usize, window: &Window) -> Vec<(i64, i64)> {
    if n == 0 || window.is_empty() {
        return Vec::new();
    }
    if n == 1 {
        return vec![(
            window.line_lo + (window.lines() - 1) / 2,
            window.pix_lo + (window.pixels() - 1) / 2,
        )];
    }

    let lines = window.lines() as f64;
    let pixels = window.pixels() as f64;

    let win_p = (n as f64 / (lines / pixels)).sqrt();
    let win_l = (n as f64 / win_p).max(win_p);

    let win_l_int = (win_l.floor() as i64).max(1);
    let total_pix = (pixels * win_l_int as f64).floor();
    let delta_pix = (total_pix - 1.0) / (n - 1) as f64;

    let mut points = Vec::with_capacity(n);
    let mut pix = -delta_pix;
    let mut row = 0i64;
    for _ in 0..n {
        pix += delta_pix;
        while pix.floor() >= pixels {
            pix -= pixels;
            row += 1;
        }
        // row spacing (lines - 1) / (rows - 1), floored
        let lin = if win_l_int > 1 {
            row * (window.lines() - 1) / (win_l_int - 1)
        } else {
            0
        };
        let line = (window.line_lo + lin).min(window.line_hi);
        let pixel = (window.pix_lo + pix.floor() as i64).min(window.pix_hi);
        points.push((line, pixel));
    }
    points
}

/// Mirror caller-supplied points that fall outside the window back inside it
pub fn reflect_points(points: &[(i64, i64)], window: &Window) -> SarResult<Vec<(i64, i64)>> {
    window.validate()?;

    let reflect = |value: i64, lo: i64, hi: i64| -> i64 {
        let mirrored = if value < lo {
            lo + lo - value
        } else if value > hi {
            hi + hi - value
        } else {
            value
        };
        mirrored.clamp(lo, hi)
    };

    Ok(points
        .iter()
        .map(|&(line, pixel)| {
            let moved = (
                reflect(line, window.line_lo, window.line_hi),
                reflect(pixel, window.pix_lo, window.pix_hi),
            );
            if moved != (line, pixel) {
                log::warn!(
                    "Point ({}, {}) outside overlap {}, using ({}, {})",
                    line,
                    pixel,
                    window,
                    moved.0,
                    moved.1
                );
            }
            moved
        })
        .collect())
}

/// Positions of the correlation windows inside `overlap`.
///
/// Caller-supplied points are window centres; `corner_shift` converts them to the
/// reference point the driver places windows by (zero for centred windows, half the
/// window size for windows placed by their upper-left corner). Without points, `n`
/// positions are distributed over the overlap.
pub fn sample_positions(
    points: Option<&[(i64, i64)]>,
    n: usize,
    overlap: &Window,
    corner_shift: (i64, i64),
) -> SarResult<Vec<(i64, i64)>> {
    overlap.validate()?;
    match points {
        Some(points) if !points.is_empty() => {
            let shifted: Vec<(i64, i64)> = points
                .iter()
                .map(|&(line, pixel)| (line - corner_shift.0, pixel - corner_shift.1))
                .collect();
            reflect_points(&shifted, overlap)
        }
        _ => Ok(distribute_points(n, overlap)),
    }
}
