use crate::TransferError;
use crate::types::Slice;

/// Checks the structural invariants of a slice before it touches disk.
///
/// Rejects:
/// - Zero-sized slices
/// - `content.len() != size`
/// - Slices extending past `total` (or whose end overflows)
pub fn validate_slice(slice: &Slice) -> Result<(), TransferError> {
    if slice.size == 0 {
        return Err(TransferError::InvalidSlice(format!(
            "empty slice at offset {}",
            slice.offset
        )));
    }

    if slice.content.len() as u64 != slice.size {
        return Err(TransferError::InvalidSlice(format!(
            "content length {} does not match size {}",
            slice.content.len(),
            slice.size
        )));
    }

    match slice.offset.checked_add(slice.size) {
        Some(end) if end <= slice.total => Ok(()),
        _ => Err(TransferError::InvalidSlice(format!(
            "range {}+{} exceeds total {}",
            slice.offset, slice.size, slice.total
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn slice(total: u64, offset: u64, content: &[u8]) -> Slice {
        Slice {
            identity: Identity::new("id"),
            total,
            size: content.len() as u64,
            offset,
            content: content.to_vec(),
        }
    }

    #[test]
    fn accepts_first_slice() {
        assert!(validate_slice(&slice(10, 0, b"abcd")).is_ok());
    }

    #[test]
    fn accepts_last_slice_ending_at_total() {
        assert!(validate_slice(&slice(10, 8, b"ij")).is_ok());
    }

    #[test]
    fn rejects_empty_slice() {
        assert!(validate_slice(&slice(10, 0, b"")).is_err());
    }

    #[test]
    fn rejects_past_total() {
        assert!(validate_slice(&slice(10, 8, b"ijk")).is_err());
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut s = slice(10, 0, b"abcd");
        s.size = 3;
        assert!(matches!(
            validate_slice(&s),
            Err(TransferError::InvalidSlice(_))
        ));
    }

    #[test]
    fn rejects_overflowing_offset() {
        let s = slice(u64::MAX, u64::MAX - 1, b"ab");
        assert!(validate_slice(&s).is_err());
    }
}
