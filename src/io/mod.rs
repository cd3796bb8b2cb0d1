pub mod slc;

pub use slc::{ImageSource, MemorySlc, SlcInfo};
