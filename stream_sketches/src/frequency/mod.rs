//! Frequency estimation: heavy hitters over a reverse-purge hash map

mod frequent;
mod reverse_purge_map;

pub use frequent::{ErrorType, FrequentItemsSketch, Row};
pub use reverse_purge_map::{ActiveEntries, ReversePurgeHashMap, LG_MIN_MAP_SIZE};
