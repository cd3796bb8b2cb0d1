use crate::types::{CorrelationResult, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Mean correlation of contributing windows below which the offset is suspect
pub const MIN_MEAN_CORRELATION: f64 = 0.2;
/// Fewer contributing windows than this is statistically thin
pub const MIN_WINDOWS: usize = 6;
/// Offset spread (pixels) above which the estimate is unreliable
pub const MAX_OFFSET_STD: f64 = 6.0;

/// Advisory signals raised while reducing a result table; the offset is still returned
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConsensusWarning {
    /// Mean correlation of the contributing windows is below [`MIN_MEAN_CORRELATION`]
    LowCorrelation { mean: f64 },
    /// Fewer than [`MIN_WINDOWS`] windows contributed
    FewWindows { count: usize },
    /// Standard deviation of contributing offsets exceeds [`MAX_OFFSET_STD`]
    UnreliableOffsets { std_lines: f64, std_pixels: f64 },
}

/// Consensus offset of a correlation result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOffset {
    pub offset_lines: i64,
    pub offset_pixels: i64,
    /// Mean correlation over all valid windows
    pub mean_correlation: f64,
    /// Standard deviation of correlation over all valid windows
    pub std_correlation: f64,
    /// Correlation threshold for contributing windows
    pub threshold: f64,
    /// Mean correlation of the contributing windows
    pub contributing_correlation: f64,
    /// Number of windows averaged into the offset
    pub contributing: usize,
    pub warnings: Vec<ConsensusWarning>,
}

impl ConsensusOffset {
    pub fn is_reliable(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Half-up rounding (`floor(x + 0.5)`) used for all offset rounding
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Reduce a table of per-window estimates to one integer offset.
///
/// The table is sorted on correlation (ascending). The highest-correlation row seeds
/// the sums; every other valid row with correlation at or above the mean correlation
/// of all valid rows is added, walking the sorted table from low to high. Offsets are
/// rounded per row and the final offset is the rounded mean. Sentinel rows never
/// enter the statistics. If no row is valid, the first row is returned as is.
pub fn get_offset(results: &[CorrelationResult]) -> SarResult<ConsensusOffset> {
    if results.is_empty() {
        return Err(SarError::InvalidParameter(
            "cannot compute consensus offset of an empty result table".to_string(),
        ));
    }

    log::debug!("Sorting {} estimates on correlation", results.len());
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| results[a].correlation.total_cmp(&results[b].correlation));

    // Highest correlation; the earliest row wins ties, row 0 if nothing is valid
    let mut seed = 0;
    let mut seed_valid = false;
    for (i, row) in results.iter().enumerate() {
        if row.is_valid() && (!seed_valid || row.correlation > results[seed].correlation) {
            seed = i;
            seed_valid = true;
        }
    }
    let seed_row = results[seed];

    let valid: Vec<f64> = results
        .iter()
        .filter(|r| r.is_valid())
        .map(|r| r.correlation)
        .collect();

    let mut consensus = ConsensusOffset {
        offset_lines: round_half_up(seed_row.offset_line),
        offset_pixels: round_half_up(seed_row.offset_pixel),
        mean_correlation: seed_row.correlation,
        std_correlation: 0.0,
        threshold: seed_row.correlation,
        contributing_correlation: seed_row.correlation,
        contributing: 1,
        warnings: Vec::new(),
    };

    if results.len() == 1 || valid.is_empty() {
        if valid.is_empty() {
            log::warn!("No valid correlation estimates, using first window offset");
        }
        consensus.warnings = collect_warnings(consensus.contributing_correlation, 1, None);
        report_warnings(&consensus.warnings);
        return Ok(consensus);
    }

    let n_valid = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n_valid;
    let std = if valid.len() > 1 {
        (valid.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n_valid - 1.0)).sqrt()
    } else {
        0.0
    };
    let threshold = mean;
    log::info!("Mean correlation at estimated positions: {:.4}", mean);
    log::info!("Standard deviation correlation:          {:.4}", std);
    log::info!("Using as threshold:                      {:.4}", threshold);

    log::debug!("Estimates used for the offset:");
    log::debug!("correlation    offset_L    offset_P");
    log::debug!("{:.4}      {:.3}        {:.3}", seed_row.correlation, seed_row.offset_line, seed_row.offset_pixel);

    let mut sum_lines = round_half_up(seed_row.offset_line);
    let mut sum_pixels = round_half_up(seed_row.offset_pixel);
    let mut sum_corr = seed_row.correlation;
    let mut used = vec![seed_row];

    for &i in &order {
        if i == seed {
            continue;
        }
        let row = &results[i];
        if row.is_valid() && row.correlation >= threshold {
            sum_lines += round_half_up(row.offset_line);
            sum_pixels += round_half_up(row.offset_pixel);
            sum_corr += row.correlation;
            used.push(*row);
            log::debug!("{:.4}      {:.3}        {:.3}", row.correlation, row.offset_line, row.offset_pixel);
        }
    }

    let count = used.len();
    let spread = if count > 1 {
        let n = count as f64;
        let mean_l = sum_lines as f64 / n;
        let mean_p = sum_pixels as f64 / n;
        let var_l = used.iter().map(|r| (r.offset_line - mean_l).powi(2)).sum::<f64>() / (n - 1.0);
        let var_p = used.iter().map(|r| (r.offset_pixel - mean_p).powi(2)).sum::<f64>() / (n - 1.0);
        log::info!("Standard deviation offset L = {:.3}", var_l.sqrt());
        log::info!("Standard deviation offset P = {:.3}", var_p.sqrt());
        Some((var_l.sqrt(), var_p.sqrt()))
    } else {
        None
    };

    consensus.offset_lines = round_half_up(sum_lines as f64 / count as f64);
    consensus.offset_pixels = round_half_up(sum_pixels as f64 / count as f64);
    consensus.mean_correlation = mean;
    consensus.std_correlation = std;
    consensus.threshold = threshold;
    consensus.contributing_correlation = sum_corr / count as f64;
    consensus.contributing = count;
    consensus.warnings = collect_warnings(consensus.contributing_correlation, count, spread);
    report_warnings(&consensus.warnings);

    Ok(consensus)
}

fn collect_warnings(mean_corr: f64, count: usize, spread: Option<(f64, f64)>) -> Vec<ConsensusWarning> {
    let mut warnings = Vec::new();
    if let Some((std_lines, std_pixels)) = spread {
        if std_lines > MAX_OFFSET_STD || std_pixels > MAX_OFFSET_STD {
            warnings.push(ConsensusWarning::UnreliableOffsets {
                std_lines,
                std_pixels,
            });
        }
    }
    if mean_corr < MIN_MEAN_CORRELATION {
        warnings.push(ConsensusWarning::LowCorrelation { mean: mean_corr });
    }
    if count < MIN_WINDOWS {
        warnings.push(ConsensusWarning::FewWindows { count });
    }
    warnings
}

fn report_warnings(warnings: &[ConsensusWarning]) {
    for warning in warnings {
        match warning {
            ConsensusWarning::UnreliableOffsets {
                std_lines,
                std_pixels,
            } => log::warn!(
                "Check estimated offset: it seems unreliable (std {:.2}, {:.2})",
                std_lines,
                std_pixels
            ),
            ConsensusWarning::LowCorrelation { mean } => {
                log::warn!("Mean correlation of estimates used < {} ({:.3})", MIN_MEAN_CORRELATION, mean)
            }
            ConsensusWarning::FewWindows { count } => {
                log::warn!("Number of windows used to estimate offset < {} ({})", MIN_WINDOWS, count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_CORRELATION;

    #[test]
    fn test_identical_offsets_give_common_value() {
        let table: Vec<CorrelationResult> = (0..10)
            .map(|i| CorrelationResult::new(0.3 + 0.05 * i as f64, 2.0, 3.0))
            .collect();
        let consensus = get_offset(&table).unwrap();
        assert_eq!((consensus.offset_lines, consensus.offset_pixels), (2, 3));
        assert!(consensus.contributing >= 1);
    }

    #[test]
    fn test_all_sentinel_returns_first_row() {
        let table = vec![
            CorrelationResult::no_correlation(4.0, -7.0),
            CorrelationResult::no_correlation(1.0, 1.0),
            CorrelationResult::no_correlation(9.0, 9.0),
        ];
        let consensus = get_offset(&table).unwrap();
        assert_eq!((consensus.offset_lines, consensus.offset_pixels), (4, -7));
        assert_eq!(consensus.contributing, 1);
        assert!(consensus
            .warnings
            .iter()
            .any(|w| matches!(w, ConsensusWarning::LowCorrelation { .. })));
    }

    #[test]
    fn test_threshold_excludes_low_and_sentinel_rows() {
        let mut table = vec![
            CorrelationResult::new(0.95, 10.0, 20.0),
            CorrelationResult::new(0.90, 10.0, 21.0),
            CorrelationResult::new(0.85, 11.0, 20.0),
            CorrelationResult::new(0.10, -50.0, 80.0),
            CorrelationResult::new(0.12, 60.0, -40.0),
        ];
        table.push(CorrelationResult::new(NO_CORRELATION, 500.0, 500.0));
        let consensus = get_offset(&table).unwrap();
        // mean of valid rows is 0.584: only 0.95, 0.90 and 0.85 contribute
        assert_eq!(consensus.contributing, 3);
        assert_eq!((consensus.offset_lines, consensus.offset_pixels), (10, 20));
        assert!(consensus
            .warnings
            .iter()
            .any(|w| matches!(w, ConsensusWarning::FewWindows { count: 3 })));
    }

    #[test]
    fn test_rounding_is_half_up() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_half_up(-2.6), -3);
        let table = vec![
            CorrelationResult::new(0.9, -0.5, 1.5),
            CorrelationResult::new(0.9, -0.5, 1.5),
        ];
        let consensus = get_offset(&table).unwrap();
        assert_eq!((consensus.offset_lines, consensus.offset_pixels), (0, 2));
    }

    #[test]
    fn test_spread_warning() {
        let mut table: Vec<CorrelationResult> = (0..8)
            .map(|i| CorrelationResult::new(0.9, if i % 2 == 0 { 0.0 } else { 20.0 }, 0.0))
            .collect();
        table.extend((0..8).map(|_| CorrelationResult::new(0.5, 0.0, 0.0)));
        let consensus = get_offset(&table).unwrap();
        assert_eq!(consensus.contributing, 8);
        assert_eq!(consensus.offset_lines, 10);
        assert!(consensus
            .warnings
            .iter()
            .any(|w| matches!(w, ConsensusWarning::UnreliableOffsets { .. })));
    }

    #[test]
    fn test_empty_table_is_error() {
        assert!(get_offset(&[]).is_err());
    }
}
