use strata_common::{error::ErrorKind, verify_data};

pub const CHECKSUM_SIZE: usize = 4;

/// Validates a buffer by comparing its computed checksum with the provided one.
pub fn validate_buffer(buf: &[u8], checksum: u32, name: Option<&str>) -> strata_common::Result<()> {
    let actual = compute(buf);
    if actual == checksum {
        Ok(())
    } else {
        Err(ErrorKind::ChecksumMismatch {
            element: name.unwrap_or_default().to_string(),
        }
        .into())
    }
}

/// Computes a 32-bit checksum for the buffer using xxh3.
pub fn compute(buf: &[u8]) -> u32 {
    let h = xxhash_rust::xxh3::xxh3_64(buf);
    (h as u32) ^ ((h >> 32) as u32)
}

/// Appends the little-endian checksum of the current buffer content.
pub fn append_checksum(buf: &mut Vec<u8>) {
    let checksum = compute(buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
}

/// Verifies the trailing checksum written by [`append_checksum`] and returns the body.
pub fn strip_checksum<'a>(buf: &'a [u8], name: &str) -> strata_common::Result<&'a [u8]> {
    verify_data!(name, buf.len() >= CHECKSUM_SIZE);
    let (body, tail) = buf.split_at(buf.len() - CHECKSUM_SIZE);
    let checksum = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    validate_buffer(body, checksum, Some(name))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_trailer() {
        let mut buf = b"deletion map words".to_vec();
        append_checksum(&mut buf);
        assert_eq!(strip_checksum(&buf, "dm").unwrap(), b"deletion map words");

        buf[3] ^= 0x40;
        let err = strip_checksum(&buf, "dm").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ChecksumMismatch { element } if element == "dm"));
    }

    #[test]
    fn test_short_buffer_is_corrupt() {
        let err = strip_checksum(&[1, 2], "patch").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CorruptData { .. }));
    }
}
