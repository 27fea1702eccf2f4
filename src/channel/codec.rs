use crate::error::ChannelError;

/// Decode a notification payload into a message.
///
/// Each byte maps to the char with the same code point and the chars are
/// concatenated. This keeps the wire format trivial for the UART-style
/// peripherals the channel targets; byte values above 0x7f come out as the
/// corresponding Latin-1 char, so multi-byte encodings are not preserved.
pub fn decode_notification(payload: &[u8]) -> Result<String, ChannelError> {
    if payload.is_empty() {
        return Err(ChannelError::NotificationDecodeError);
    }

    Ok(payload.iter().map(|&byte| char::from(byte)).collect())
}

/// Frame a payload for transmission: a little-endian u16 length prefix
/// followed by the payload bytes.
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii_payload() {
        assert_eq!(decode_notification(&[72, 105]).unwrap(), "Hi");
    }

    #[test]
    fn decoding_is_deterministic() {
        let payload = [0x41, 0x00, 0xff, 0x7f];
        assert_eq!(
            decode_notification(&payload).unwrap(),
            decode_notification(&payload).unwrap(),
        );
    }

    #[test]
    fn high_bytes_decode_as_latin1() {
        assert_eq!(decode_notification(&[0xe9]).unwrap(), "é");
    }

    #[test]
    fn empty_payload_is_an_error() {
        let err = decode_notification(&[]).unwrap_err();
        assert!(matches!(err, ChannelError::NotificationDecodeError));
    }

    #[test]
    fn frame_prefixes_little_endian_length() {
        let framed = frame_payload(&[0x01, 0x02, 0x03]);
        assert_eq!(framed[0], 0x03);
        assert_eq!(framed[1], 0x00);
        assert_eq!(&framed[2..], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn frame_of_empty_payload_is_just_the_prefix() {
        assert_eq!(frame_payload(&[]), vec![0, 0]);
    }
}
