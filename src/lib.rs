//! sarcoreg: SAR image co-registration core
//!
//! Aligns a slave SAR image to a master image: coarse and fine offset estimation by
//! correlation of image chips at many windows, consensus of the per-window offsets,
//! and resampling of the slave through a coregistration polynomial with tabulated
//! interpolation kernels.
//!
//! Image data comes from an [`ImageSource`]; the crate reads no file formats itself.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    ComplexMatrix, CorrelationResult, RealMatrix, SarComplex, SarError, SarResult, Window, WindowEstimate,
    NO_CORRELATION,
};

pub use io::{ImageSource, MemorySlc, SlcInfo};

pub use crate::core::{
    get_offset, CancelToken, ChipCorrelator, CoarseCoregResult, CoarseCoregistration, CoarseCorrParams,
    CoarseMethod, ConsensusOffset, ConsensusWarning, CoregPolynomial, FineCoregResult, FineCoregistration,
    FineCorrParams, FineMethod, InterpolationLut, KernelType, ResampleParams, ResampledImage, Resampler,
};
