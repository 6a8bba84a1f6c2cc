//! Cardinality estimation: the HLL bucket family

mod buckets;
mod hll;

pub use buckets::{compute_inv_pow2_sum, inv_pow2, BucketDelta, BucketIter, DenseBuckets};
pub use hll::HllSketch;
