//! Hex encoding utility
//! Uppercase encoding plus a strict decoder, as used by ASCII line protocols

use std::fmt::Write;

use crate::error::{Error, Result};

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Decode a hex string (either case) into bytes
pub fn decode(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(Error::Parse(format!(
            "hex string has odd length {}",
            text.len()
        )));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| Error::Parse("hex string is not ASCII".to_string()))?;
            u8::from_str_radix(digits, 16)
                .map_err(|e| Error::Parse(format!("invalid hex digits '{digits}': {e}")))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper_basic() {
        assert_eq!(encode_upper(&[0x12, 0x34, 0xAB]), "1234AB");
        assert_eq!(encode_upper(&[]), "");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("1234ab").unwrap(), vec![0x12, 0x34, 0xAB]);
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
        assert!(decode("123").is_err());
        assert!(decode("zz").is_err());
    }
}
