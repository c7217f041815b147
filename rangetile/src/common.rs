use crate::quantize::BitDepth;
use crate::{Result, TileError, TileErrorCode};

pub(crate) fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32> {
    let arr: [u8; 4] = read_array(bytes, offset, "u32")?;
    Ok(u32::from_le_bytes(arr))
}

pub(crate) fn read_u64_le(bytes: &[u8], offset: usize) -> Result<u64> {
    let arr: [u8; 8] = read_array(bytes, offset, "u64")?;
    Ok(u64::from_le_bytes(arr))
}

pub(crate) fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32> {
    let arr: [u8; 4] = read_array(bytes, offset, "u32")?;
    Ok(u32::from_be_bytes(arr))
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize, what: &str) -> Result<[u8; N]> {
    let value_bytes = offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| {
            TileError::new(
                TileErrorCode::InvalidHeaderLength,
                format!("Could not read {what} field at offset {offset}."),
            )
        })?;
    value_bytes.try_into().map_err(|_| {
        TileError::new(
            TileErrorCode::InvalidHeaderLength,
            format!("Could not parse {what} field bytes."),
        )
    })
}

pub(crate) fn wrap_residual(depth: BitDepth, current: i32, previous: i32) -> u32 {
    (current.wrapping_sub(previous) as u32) & depth.mask()
}

pub(crate) fn unwrap_residual(depth: BitDepth, residual: u32, previous: i32) -> i32 {
    let raw = (previous as u32).wrapping_add(residual) & depth.mask();
    sign_extend(depth, raw)
}

fn sign_extend(depth: BitDepth, raw: u32) -> i32 {
    let shift = 32 - depth.bits();
    ((raw << shift) as i32) >> shift
}

pub(crate) fn write_packed(depth: BitDepth, value: u32, out: &mut Vec<u8>) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..depth.byte_size()]);
}

pub(crate) fn read_packed(depth: BitDepth, bytes: &[u8]) -> u32 {
    let mut arr = [0_u8; 4];
    arr[..depth.byte_size()].copy_from_slice(&bytes[..depth.byte_size()]);
    u32::from_le_bytes(arr)
}

pub(crate) fn validate_sample_range(depth: BitDepth, sample: i32) -> Result<()> {
    if sample < depth.min_sample() || sample > depth.max_sample() {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            format!(
                "Sample {sample} does not fit in {} bits per sample.",
                depth.bits()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residuals_wrap_within_sample_width() {
        for depth in [BitDepth::Sixteen, BitDepth::TwentyFour] {
            let pairs = [
                (depth.max_sample(), depth.min_sample()),
                (depth.min_sample(), depth.max_sample()),
                (0, 0),
                (-1, 1),
            ];
            for (current, previous) in pairs {
                let residual = wrap_residual(depth, current, previous);
                assert!(residual <= depth.mask());
                assert_eq!(unwrap_residual(depth, residual, previous), current);
            }
        }
    }

    #[test]
    fn packs_24_bit_values_in_three_bytes() {
        let mut out = Vec::new();
        write_packed(BitDepth::TwentyFour, 0x00ab_cdef, &mut out);
        assert_eq!(out, vec![0xef, 0xcd, 0xab]);
        assert_eq!(read_packed(BitDepth::TwentyFour, &out), 0x00ab_cdef);
    }

    #[test]
    fn reads_big_endian_length_prefix() {
        let bytes = [0_u8, 0, 1, 2, 9];
        assert_eq!(read_u32_be(&bytes, 0).expect("read prefix"), 258);
        let err = read_u32_be(&bytes, 2).expect_err("short read");
        assert_eq!(err.code, TileErrorCode::InvalidHeaderLength);
    }
}
