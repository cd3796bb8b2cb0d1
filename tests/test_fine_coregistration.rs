use approx::assert_abs_diff_eq;
use ndarray::Array2;
use sarcoreg::core::{CancelToken, FineCoregistration, FineCorrParams, FineMethod};
use sarcoreg::io::{MemorySlc, SlcInfo};
use sarcoreg::types::{ComplexMatrix, SarComplex, SarError, Window};
use std::f64::consts::PI;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn noise(l: i64, p: i64) -> f64 {
    let mut h = (l as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (p as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Smooth scene of randomly placed Gaussian blobs, defined at any position
fn blobs(l: f64, p: f64) -> f64 {
    const CELL: f64 = 8.0;
    const SIGMA: f64 = 2.5;
    let (cl, cp) = ((l / CELL).floor() as i64, (p / CELL).floor() as i64);
    let mut value = 1.0;
    for i in cl - 2..=cl + 2 {
        for j in cp - 2..=cp + 2 {
            let centre_l = i as f64 * CELL + CELL * noise(i, j);
            let centre_p = j as f64 * CELL + CELL * noise(j + 101, i + 57);
            let amplitude = 0.5 + noise(j + 3, i + 5);
            let d2 = (l - centre_l).powi(2) + (p - centre_p).powi(2);
            value += amplitude * (-d2 / (2.0 * SIGMA * SIGMA)).exp();
        }
    }
    value
}

fn speckle(window: Window, origin: (i64, i64)) -> ComplexMatrix {
    Array2::from_shape_fn(window.shape(), |(l, p)| {
        let l = window.line_lo + l as i64 - origin.0;
        let p = window.pix_lo + p as i64 - origin.1;
        SarComplex::from_polar(0.5 + noise(l, p), 2.0 * PI * noise(p + 7, l + 13))
    })
}

fn image(window: Window, data: ComplexMatrix) -> MemorySlc {
    MemorySlc::new(SlcInfo::new(window, 1679.9, 37.5e6), data).unwrap()
}

/// Master and slave on (0,255,0,255); slave content moved by (+2, +3)
fn integer_pair() -> (MemorySlc, MemorySlc) {
    let window = Window::new(0, 255, 0, 255);
    (
        image(window, speckle(window, (0, 0))),
        image(window, speckle(window, (2, 3))),
    )
}

/// Smooth pair with the slave content moved by (+1.5, +0.25)
fn fractional_pair() -> (MemorySlc, MemorySlc) {
    let window = Window::new(0, 255, 0, 255);
    let master = Array2::from_shape_fn(window.shape(), |(l, p)| SarComplex::new(blobs(l as f64, p as f64), 0.0));
    let slave = Array2::from_shape_fn(window.shape(), |(l, p)| {
        SarComplex::new(blobs(l as f64 - 1.5, p as f64 - 0.25), 0.0)
    });
    (image(window, master), image(window, slave))
}

fn params(method: FineMethod) -> FineCorrParams {
    FineCorrParams {
        num_windows: 9,
        mask_size_l: 32,
        mask_size_p: 32,
        acc_l: 8,
        acc_p: 8,
        osfactor: 16,
        method,
        ..Default::default()
    }
}

#[test]
fn test_integer_shift_all_methods() {
    init_logging();
    let (master, slave) = integer_pair();
    for method in [FineMethod::MagFft, FineMethod::Oversample, FineMethod::MagSpace] {
        let result = FineCoregistration::new(params(method)).run(&master, &slave).unwrap();
        assert_eq!(result.estimates.len(), 9);
        assert_eq!(result.valid_windows(), 9, "method {:?}", method);
        for estimate in &result.estimates {
            assert_abs_diff_eq!(estimate.result.offset_line, 2.0, epsilon = 0.1);
            assert_abs_diff_eq!(estimate.result.offset_pixel, 3.0, epsilon = 0.1);
        }
        let consensus = result.consensus().unwrap();
        assert_eq!((consensus.offset_lines, consensus.offset_pixels), (2, 3));
    }
}

#[test]
fn test_fractional_shift_with_initial_offset() {
    init_logging();
    let (master, slave) = fractional_pair();
    for method in [FineMethod::MagFft, FineMethod::Oversample, FineMethod::MagSpace] {
        let fine_params = FineCorrParams {
            init_offset_l: 1,
            ..params(method)
        };
        let result = FineCoregistration::new(fine_params).run(&master, &slave).unwrap();
        for estimate in &result.estimates {
            assert!(estimate.result.correlation > 0.9, "method {:?}", method);
            assert_abs_diff_eq!(estimate.result.offset_line, 1.5, epsilon = 0.2);
            assert_abs_diff_eq!(estimate.result.offset_pixel, 0.25, epsilon = 0.2);
        }
    }
}

#[test]
fn test_oversample_with_doppler() {
    init_logging();
    let window = Window::new(0, 255, 0, 255);
    let info = SlcInfo::new(window, 1679.9, 37.5e6).with_doppler([300.0, 0.0, 0.0]);
    let master = MemorySlc::new(info.clone(), speckle(window, (0, 0))).unwrap();
    let slave = MemorySlc::new(info, speckle(window, (2, 3))).unwrap();

    let result = FineCoregistration::new(params(FineMethod::Oversample))
        .run(&master, &slave)
        .unwrap();
    let consensus = result.consensus().unwrap();
    assert_eq!((consensus.offset_lines, consensus.offset_pixels), (2, 3));
}

#[test]
fn test_search_range_clamped() {
    init_logging();
    let (master, slave) = integer_pair();
    let fine_params = FineCorrParams {
        mask_size_l: 16,
        mask_size_p: 32,
        acc_l: 16,
        acc_p: 8,
        osfactor: 1,
        ..params(FineMethod::MagFft)
    };
    let result = FineCoregistration::new(fine_params).run(&master, &slave).unwrap();
    assert_eq!((result.acc_l, result.acc_p), (8, 8));
}

#[test]
fn test_window_centres_inside_image() {
    init_logging();
    let (master, slave) = integer_pair();
    let result = FineCoregistration::new(params(FineMethod::MagSpace))
        .run(&master, &slave)
        .unwrap();
    // MagSpace chips are 48x48, placed by corner inside the overlap
    assert_eq!(result.overlap, Window::new(20, 187, 20, 187));
    for estimate in &result.estimates {
        assert!(estimate.line >= 20 + 24 && estimate.line <= 187 + 24);
    }
}

#[test]
fn test_cancelled_run() {
    init_logging();
    let (master, slave) = integer_pair();
    let token = CancelToken::new();
    let fine = FineCoregistration::new(params(FineMethod::MagFft)).with_cancel_token(token.clone());
    token.cancel();
    assert!(matches!(fine.run(&master, &slave), Err(SarError::Cancelled)));
}
