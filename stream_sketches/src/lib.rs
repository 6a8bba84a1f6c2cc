//! stream_sketches: mergeable streaming sketches
//!
//! Compact summaries answering approximate queries over data streams far
//! larger than memory, with worst-case error guarantees and a bit-exact
//! serialized form: frequent items, two quantile sketches, and the HLL
//! distinct-count bucket family.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cardinality;
pub mod codec;
pub mod common;
pub mod frequency;
pub mod quantiles;

// Re-export core types for convenience
pub use common::{hash, ItemSerde, Mergeable, Result, Sketch, SketchError, StringSerde, U64Serde};

/// Error types and result aliases for sketch operations
pub mod error {
    pub use crate::common::{Result, SketchError};
}

// Re-export commonly used sketches
pub use cardinality::{BucketDelta, DenseBuckets, HllSketch};
pub use frequency::{ErrorType, FrequentItemsSketch, ReversePurgeHashMap, Row};
pub use quantiles::{QuantilesSketch, QuantilesUnion, ReqMode, ReqSketch, SortedBuffer};
