//! Validation utilities for sketch deserialization and parameter bounds checking

use crate::common::{Result, SketchError};

/// Maximum serialized sketch size (256MB) to prevent resource exhaustion
pub const MAX_BYTE_SIZE: usize = 256 * 1024 * 1024; // 256MB

/// Validate that precision is within acceptable range (4-18)
/// Used by the HLL bucket family
pub fn validate_precision(precision: u8) -> Result<()> {
    if !(4..=18).contains(&precision) {
        return Err(SketchError::InvalidParameter {
            param: "precision".to_string(),
            value: precision.to_string(),
            constraint: "must be in range [4, 18]".to_string(),
        });
    }
    Ok(())
}

/// Validate that a value is a positive power of two
pub fn validate_power_of_two(value: usize, param_name: &str) -> Result<()> {
    if value == 0 || !value.is_power_of_two() {
        return Err(SketchError::InvalidParameter {
            param: param_name.to_string(),
            value: value.to_string(),
            constraint: "must be a positive power of 2".to_string(),
        });
    }
    Ok(())
}

/// Validate the accuracy parameter of the compact-levels quantiles sketch:
/// a power of two in [2, 32768]
pub fn validate_quantiles_k(k: usize) -> Result<()> {
    validate_power_of_two(k, "k")?;
    if !(2..=32768).contains(&k) {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: "must be in range [2, 32768]".to_string(),
        });
    }
    Ok(())
}

/// Validate the accuracy parameter of the relative-error quantiles sketch:
/// an even value in [4, 1024]
pub fn validate_req_k(k: usize) -> Result<()> {
    if !(4..=1024).contains(&k) || k % 2 != 0 {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: "must be even and in range [4, 1024]".to_string(),
        });
    }
    Ok(())
}

/// Validate the maximum map size of the frequent-items sketch:
/// a power of two, at least 4
pub fn validate_max_map_size(max_map_size: usize) -> Result<()> {
    validate_power_of_two(max_map_size, "max_map_size")?;
    if max_map_size < 4 {
        return Err(SketchError::InvalidParameter {
            param: "max_map_size".to_string(),
            value: max_map_size.to_string(),
            constraint: "must be at least 4".to_string(),
        });
    }
    Ok(())
}

/// Validate that a deserialized byte size doesn't exceed safety limits
pub fn validate_byte_size(size: usize) -> Result<()> {
    if size > MAX_BYTE_SIZE {
        return Err(SketchError::DeserializationError(format!(
            "Deserialized sketch size {} exceeds maximum allowed size {}",
            size, MAX_BYTE_SIZE
        )));
    }
    Ok(())
}

/// Validate minimum required bytes for deserialization header
pub fn validate_min_size(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(SketchError::DeserializationError(format!(
            "Insufficient data: need at least {} bytes, got {}",
            required, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_precision_valid() {
        assert!(validate_precision(4).is_ok());
        assert!(validate_precision(10).is_ok());
        assert!(validate_precision(18).is_ok());
    }

    #[test]
    fn test_validate_precision_invalid() {
        assert!(validate_precision(3).is_err());
        assert!(validate_precision(19).is_err());
    }

    #[test]
    fn test_validate_power_of_two() {
        assert!(validate_power_of_two(4, "len").is_ok());
        assert!(validate_power_of_two(1024, "len").is_ok());
        assert!(validate_power_of_two(0, "len").is_err());
        assert!(validate_power_of_two(12, "len").is_err());
    }

    #[test]
    fn test_validate_quantiles_k() {
        assert!(validate_quantiles_k(2).is_ok());
        assert!(validate_quantiles_k(128).is_ok());
        assert!(validate_quantiles_k(32768).is_ok());
        assert!(validate_quantiles_k(1).is_err());
        assert!(validate_quantiles_k(100).is_err());
        assert!(validate_quantiles_k(65536).is_err());
    }

    #[test]
    fn test_validate_req_k() {
        assert!(validate_req_k(4).is_ok());
        assert!(validate_req_k(12).is_ok());
        assert!(validate_req_k(1024).is_ok());
        assert!(validate_req_k(3).is_err());
        assert!(validate_req_k(7).is_err());
        assert!(validate_req_k(1026).is_err());
    }

    #[test]
    fn test_validate_max_map_size() {
        assert!(validate_max_map_size(4).is_ok());
        assert!(validate_max_map_size(1024).is_ok());
        assert!(validate_max_map_size(2).is_err());
        assert!(validate_max_map_size(24).is_err());
    }

    #[test]
    fn test_validate_min_size() {
        assert!(validate_min_size(8, 8).is_ok());
        assert!(validate_min_size(7, 8).is_err());
    }
}
