use crate::{ProviderError, Result};

/// Validate that `[offset, offset + len)` lies within `capacity` bytes.
pub fn checked_range(offset: u64, len: usize, capacity: u64) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(ProviderError::OffsetOverflow)?;
    if end > capacity {
        return Err(ProviderError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

/// Clamp a request starting at `offset` to the remaining extent, allowing a
/// short transfer at end-of-extent but rejecting reads past it entirely.
pub fn clamped_len(offset: u64, len: usize, capacity: u64) -> Result<usize> {
    if offset > capacity {
        return Err(ProviderError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(((capacity - offset).min(len as u64)) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_range_rejects_overflow_and_oob() {
        assert!(checked_range(0, 10, 10).is_ok());
        assert!(matches!(
            checked_range(u64::MAX, 2, 10).unwrap_err(),
            ProviderError::OffsetOverflow
        ));
        assert!(matches!(
            checked_range(8, 4, 10).unwrap_err(),
            ProviderError::OutOfBounds { .. }
        ));
    }

    #[test]
    fn clamped_len_shortens_at_end_of_extent() {
        assert_eq!(clamped_len(8, 4, 10).unwrap(), 2);
        assert_eq!(clamped_len(10, 4, 10).unwrap(), 0);
        assert!(matches!(
            clamped_len(11, 4, 10).unwrap_err(),
            ProviderError::OutOfBounds { .. }
        ));
    }
}
