//! Hash functions for data sketches
//!
//! Provides high-quality, non-cryptographic hashing for the hash map and
//! the HLL bucket family.

use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// XXHash 64-bit implementation
///
/// XXHash is an extremely fast non-cryptographic hash function designed by Yann Collet.
/// It offers excellent speed and distribution properties.
///
/// # Arguments
/// * `data` - The data to hash
/// * `seed` - The hash seed for independent hash functions
///
/// # Returns
/// A 64-bit hash value
///
/// # Examples
/// ```
/// use stream_sketches::common::hash::xxhash;
///
/// let hash = xxhash(b"hello world", 0);
/// assert_ne!(hash, xxhash(b"hello world", 1));
/// ```
pub fn xxhash(data: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(data);
    hasher.finish()
}

/// Hash any value that implements the `Hash` trait to a 64-bit value
///
/// The item routes its own bytes through a seeded `XxHash64`, so primitive
/// keys and structured keys share one code path.
///
/// # Arguments
/// * `item` - The value to hash
/// * `seed` - The hash seed
///
/// # Returns
/// A 64-bit hash value
pub fn hash_item<T: Hash + ?Sized>(item: &T, seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    item.hash(&mut hasher);
    hasher.finish()
}
