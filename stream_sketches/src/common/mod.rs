//! Common utilities, traits, and errors

mod error;
pub mod hash;
mod item_serde;
mod traits;
pub mod validation;

pub use error::{Result, SketchError};
pub use item_serde::{ItemSerde, StringSerde, U64Serde};
pub use traits::{Mergeable, Sketch};
