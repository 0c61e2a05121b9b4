//! Checked numeric conversions for values read from data files.
//!
//! Both CSV tables and MAT matrices carry ids, codes and status flags as
//! floating point numbers. These helpers reject NaN, infinities, negative
//! and fractional values instead of silently truncating them with `as`.

use anyhow::{anyhow, Result};

/// Convert an f64 holding a non-negative integer to usize.
///
/// # Examples
/// ```
/// use gridscen_io::conversions::safe_f64_to_usize;
///
/// assert_eq!(safe_f64_to_usize(42.0).unwrap(), 42);
/// assert!(safe_f64_to_usize(-1.0).is_err());
/// assert!(safe_f64_to_usize(2.5).is_err());
/// assert!(safe_f64_to_usize(f64::NAN).is_err());
/// ```
pub fn safe_f64_to_usize(value: f64) -> Result<usize> {
    if !value.is_finite() {
        return Err(anyhow!(
            "Cannot convert non-finite value to usize: {}",
            value
        ));
    }
    if value < 0.0 {
        return Err(anyhow!("Cannot convert negative value to usize: {}", value));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!("Expected an integer, found {}", value));
    }
    // any f64 > usize::MAX is also > usize::MAX as f64
    if value > usize::MAX as f64 {
        return Err(anyhow!(
            "Value {} exceeds maximum usize ({})",
            value,
            usize::MAX
        ));
    }
    Ok(value as usize)
}

/// Convert an f64 code (bus type, gencost model) to u8.
pub fn safe_f64_to_u8(value: f64) -> Result<u8> {
    let wide = safe_f64_to_usize(value)?;
    u8::try_from(wide).map_err(|_| anyhow!("Value {} exceeds maximum u8 ({})", value, u8::MAX))
}

/// Convert an on/off flag. Any positive value counts as in service.
pub fn status_flag(value: f64) -> Result<u8> {
    if !value.is_finite() {
        return Err(anyhow!("Status must be finite, found {}", value));
    }
    Ok(u8::from(value > 0.0))
}

/// Convert an f64 id into one of the typed ids.
pub fn id_from_f64<I: From<usize>>(value: f64) -> Result<I> {
    safe_f64_to_usize(value).map(I::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::BusId;

    #[test]
    fn test_usize_rejects_bad_values() {
        assert_eq!(safe_f64_to_usize(0.0).unwrap(), 0);
        assert!(safe_f64_to_usize(f64::INFINITY).is_err());
        assert!(safe_f64_to_usize(-0.5).is_err());
        assert!(safe_f64_to_usize(1.000001).is_err());
    }

    #[test]
    fn test_u8_bounds() {
        assert_eq!(safe_f64_to_u8(2.0).unwrap(), 2);
        assert!(safe_f64_to_u8(256.0).is_err());
    }

    #[test]
    fn test_status_flag() {
        assert_eq!(status_flag(1.0).unwrap(), 1);
        assert_eq!(status_flag(0.0).unwrap(), 0);
        assert_eq!(status_flag(-1.0).unwrap(), 0);
        assert!(status_flag(f64::NAN).is_err());
    }

    #[test]
    fn test_typed_ids() {
        let id: BusId = id_from_f64(301.0).unwrap();
        assert_eq!(id, BusId::new(301));
        assert!(id_from_f64::<BusId>(-3.0).is_err());
    }
}
