//! Little-endian field access for binary spreadsheet structures.
//! Readers return `None` past the end of the slice instead of panicking.

#[inline]
pub(crate) fn u8_at(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

#[inline]
pub(crate) fn u16_at(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset.checked_add(2)?)?
        .try_into()
        .ok()
        .map(u16::from_le_bytes)
}

#[inline]
pub(crate) fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?)?
        .try_into()
        .ok()
        .map(u32::from_le_bytes)
}

#[inline]
pub(crate) fn f64_at(data: &[u8], offset: usize) -> Option<f64> {
    data.get(offset..offset.checked_add(8)?)?
        .try_into()
        .ok()
        .map(f64::from_le_bytes)
}

/// Overwrites two bytes in place; the caller guarantees the range exists.
#[inline]
pub(crate) fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Overwrites four bytes in place; the caller guarantees the range exists.
#[inline]
pub(crate) fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Iterates the little-endian `u32` values of a slice, ignoring a ragged tail.
pub(crate) fn u32_iter(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

#[cfg(test)]
mod tests {
    use super::{f64_at, put_u16, u16_at, u32_at, u32_iter};

    #[test]
    fn reads_stop_at_the_end_of_the_slice() {
        let data = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(u16_at(&data, 0), Some(0x1234));
        assert_eq!(u32_at(&data, 0), Some(0x5678_1234));
        assert_eq!(u16_at(&data, 3), None);
        assert_eq!(u32_at(&data, usize::MAX), None);
        assert_eq!(f64_at(&data, 0), None);
    }

    #[test]
    fn writes_in_place() {
        let mut data = [0u8; 4];
        put_u16(&mut data, 2, 0xBEEF);
        assert_eq!(data, [0, 0, 0xEF, 0xBE]);
        assert_eq!(u32_iter(&[1, 0, 0, 0, 2, 0, 0, 0, 9]).collect::<Vec<_>>(), vec![1, 2]);
    }
}
