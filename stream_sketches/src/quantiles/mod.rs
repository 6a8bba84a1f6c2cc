//! Quantile estimation: compact-levels and relative-error sketches

mod buffer;
mod classic;
mod req;

pub use buffer::SortedBuffer;
pub use classic::{QuantilesSketch, QuantilesUnion};
pub use req::{ReqMode, ReqSketch};
