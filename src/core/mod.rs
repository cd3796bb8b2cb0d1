//! Core coregistration modules

pub mod cancel;
pub mod coarse;
pub mod consensus;
pub mod correlation;
pub mod fine;
pub mod geometry;
pub mod lut;
pub mod polynomial;
pub mod resample;
pub mod spectral;

// Re-export main types
pub use cancel::CancelToken;
pub use coarse::{CoarseCoregResult, CoarseCoregistration, CoarseCorrParams, CoarseMethod};
pub use consensus::{get_offset, ConsensusOffset, ConsensusWarning};
pub use correlation::{coherence_space, correlate, ChipCorrelator};
pub use fine::{FineCoregResult, FineCoregistration, FineCorrParams, FineMethod};
pub use lut::{InterpolationLut, KernelType};
pub use polynomial::CoregPolynomial;
pub use resample::{ResampleParams, ResampledImage, Resampler};

use crate::types::{SarResult, WindowEstimate};

/// Evaluate one correlation window per position, in parallel when enabled.
///
/// Row order follows `positions`; the first error aborts the batch.
#[cfg(feature = "parallel")]
pub(crate) fn estimate_windows<F>(positions: &[(i64, i64)], estimate: F) -> SarResult<Vec<WindowEstimate>>
where
    F: Fn(i64, i64) -> SarResult<WindowEstimate> + Sync + Send,
{
    use rayon::prelude::*;

    log::debug!("Correlating {} windows in parallel", positions.len());
    positions
        .par_iter()
        .map(|&(line, pixel)| estimate(line, pixel))
        .collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn estimate_windows<F>(positions: &[(i64, i64)], estimate: F) -> SarResult<Vec<WindowEstimate>>
where
    F: Fn(i64, i64) -> SarResult<WindowEstimate>,
{
    positions
        .iter()
        .map(|&(line, pixel)| estimate(line, pixel))
        .collect()
}
