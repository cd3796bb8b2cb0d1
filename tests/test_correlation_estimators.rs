use approx::assert_abs_diff_eq;
use ndarray::Array2;
use sarcoreg::core::{coherence_space, get_offset, ChipCorrelator};
use sarcoreg::types::{ComplexMatrix, CorrelationResult, SarComplex, NO_CORRELATION};
use std::f64::consts::PI;

fn noise(l: i64, p: i64) -> f64 {
    let mut h = (l as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (p as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

fn chip(l0: i64, p0: i64, size: usize) -> ComplexMatrix {
    Array2::from_shape_fn((size, size), |(l, p)| {
        let (l, p) = (l0 + l as i64, p0 + p as i64);
        SarComplex::from_polar(0.5 + noise(l, p), 2.0 * PI * noise(p + 7, l + 13))
    })
}

#[test]
fn test_estimators_agree_on_integer_shifts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let correlator = ChipCorrelator::new();

    for &(d_l, d_p) in &[(0i64, 0i64), (1, 3), (-4, 2), (5, -5)] {
        let master = chip(500, 700, 64);
        let mask = chip(500 - d_l, 700 - d_p, 64);

        let fft = correlator.coherence_fft(&master, &mask, 4, 8, 8).unwrap();
        let cross = correlator.cross_correlate(&master, &mask, 4, 8, 8).unwrap();
        let space = coherence_space(8, 8, 4, &master, &mask).unwrap();

        for result in [fft, cross, space] {
            assert!(result.is_valid());
            assert!(result.correlation > 0.8, "corr {}", result.correlation);
            assert_abs_diff_eq!(result.offset_line, d_l as f64, epsilon = 0.25);
            assert_abs_diff_eq!(result.offset_pixel, d_p as f64, epsilon = 0.25);
        }
    }
    // One normalisation block per chip size, shared by both FFT estimators
    assert_eq!(correlator.cached_block_sizes(), 1);
}

#[test]
fn test_shared_correlator_across_threads() {
    let correlator = ChipCorrelator::new();
    let results: Vec<CorrelationResult> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let correlator = &correlator;
                scope.spawn(move || {
                    let master = chip(100 * i, 50, 32);
                    let mask = chip(100 * i - 2, 51, 32);
                    correlator.cross_correlate(&master, &mask, 1, 4, 4).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for result in &results {
        assert_eq!((result.offset_line, result.offset_pixel), (2.0, -1.0));
    }
    let consensus = get_offset(&results).unwrap();
    assert_eq!((consensus.offset_lines, consensus.offset_pixels), (2, -1));
}

#[test]
fn test_water_chips_do_not_enter_consensus() {
    let correlator = ChipCorrelator::new();
    let water = Array2::from_elem((32, 32), SarComplex::new(0.0, 0.0));
    let mut table = vec![correlator.cross_correlate(&water, &water, 1, 4, 4).unwrap()];
    assert_eq!(table[0].correlation, NO_CORRELATION);

    for i in 0..6 {
        let master = chip(10 * i, 0, 32);
        let mask = chip(10 * i + 1, 2, 32);
        table.push(correlator.cross_correlate(&master, &mask, 1, 4, 4).unwrap());
    }
    let consensus = get_offset(&table).unwrap();
    assert_eq!((consensus.offset_lines, consensus.offset_pixels), (-1, -2));
    assert!(consensus.mean_correlation > 0.5);
}
