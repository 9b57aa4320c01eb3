//! Confluent framing: magic byte, big-endian schema id, then the Avro datum.

use crate::DecodingError;

pub const MAGIC_BYTE: u8 = 0;
pub const HEADER_LEN: usize = 5;

pub fn frame(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.push(MAGIC_BYTE);
    bytes.extend_from_slice(&schema_id.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Splits a framed value into its schema id and the remaining payload.
pub fn unframe(bytes: &[u8]) -> Result<(u32, &[u8]), DecodingError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodingError::Truncated(bytes.len()));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(DecodingError::UnknownMagicByte(bytes[0]));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((id, &bytes[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_magic_byte_and_big_endian_id() {
        let framed = frame(258, &[6]);
        assert_eq!(framed, vec![0, 0, 0, 1, 2, 6]);

        let (id, payload) = unframe(&framed).unwrap();
        assert_eq!(id, 258);
        assert_eq!(payload, &[6]);
    }

    #[test]
    fn short_input_is_truncated() {
        assert!(matches!(
            unframe(&[0, 0, 1]),
            Err(DecodingError::Truncated(3))
        ));
        assert!(matches!(unframe(&[]), Err(DecodingError::Truncated(0))));
    }

    #[test]
    fn wrong_magic_byte_is_rejected() {
        assert!(matches!(
            unframe(&[1, 0, 0, 0, 7, 6]),
            Err(DecodingError::UnknownMagicByte(1))
        ));
    }
}
