//! DSDL Bit Codec
//!
//! Bit-level serialization used by UAVCAN v0 data types. Fields are packed without
//! padding; a field wider than one byte is emitted low byte first, the last (partial)
//! byte carrying the remaining high bits. Within the stream, bits are filled MSB first.

use crate::error::StackError;

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Bit-packed output buffer
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Append the `count` low bits of `value` (count <= 8), most significant first
    fn push_bits(&mut self, value: u8, count: u32) {
        for index in (0..count).rev() {
            let bit = (value >> index) & 1;
            let byte = self.bit_len / 8;
            if byte == self.buffer.len() {
                self.buffer.push(0);
            }
            if bit != 0 {
                self.buffer[byte] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    pub fn write_unsigned(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        let mut value = value & mask(bits);
        let mut remaining = bits;
        while remaining > 0 {
            let count = remaining.min(8);
            self.push_bits((value & mask(count)) as u8, count);
            value >>= 8;
            remaining -= count;
        }
    }

    /// Two's complement, truncated to `bits`
    pub fn write_signed(&mut self, value: i64, bits: u32) {
        self.write_unsigned(value as u64, bits);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_unsigned(u64::from(value), 1);
    }

    /// Half-precision float, saturated to the finite range
    pub fn write_f16(&mut self, value: f32) {
        self.write_unsigned(u64::from(f32_to_f16(value)), 16);
    }

    /// Padding bits
    pub fn write_void(&mut self, bits: u32) {
        self.write_unsigned(0, bits);
    }

    /// Finish, zero-padding the last byte
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bit-packed input cursor
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    bit_offset: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bit_offset: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.bit_offset)
    }

    fn pull_bits(&mut self, count: u32) -> u8 {
        let mut value = 0u8;
        for _ in 0..count {
            let byte = self.buffer[self.bit_offset / 8];
            let bit = (byte >> (7 - self.bit_offset % 8)) & 1;
            value = (value << 1) | bit;
            self.bit_offset += 1;
        }
        value
    }

    pub fn read_unsigned(&mut self, bits: u32) -> Result<u64, StackError> {
        if (bits as usize) > self.remaining_bits() {
            return Err(StackError::transfer(format!(
                "payload truncated: need {bits} bits, {} left",
                self.remaining_bits()
            )));
        }
        let mut value = 0u64;
        let mut shift = 0;
        let mut remaining = bits;
        while remaining > 0 {
            let count = remaining.min(8);
            value |= u64::from(self.pull_bits(count)) << shift;
            shift += 8;
            remaining -= count;
        }
        Ok(value)
    }

    pub fn read_signed(&mut self, bits: u32) -> Result<i64, StackError> {
        let raw = self.read_unsigned(bits)?;
        if bits == 0 || bits >= 64 {
            return Ok(raw as i64);
        }
        let sign_bit = 1u64 << (bits - 1);
        Ok(if raw & sign_bit != 0 {
            (raw | !mask(bits)) as i64
        } else {
            raw as i64
        })
    }

    pub fn read_bool(&mut self) -> Result<bool, StackError> {
        Ok(self.read_unsigned(1)? != 0)
    }

    pub fn read_f16(&mut self) -> Result<f32, StackError> {
        Ok(f16_to_f32(self.read_unsigned(16)? as u16))
    }

    pub fn skip(&mut self, bits: u32) -> Result<(), StackError> {
        self.read_unsigned(bits).map(|_| ())
    }
}

/// f32 to IEEE 754 binary16, round to nearest even. Finite values beyond the half
/// range saturate to the largest finite half.
pub fn f32_to_f16(value: f32) -> u16 {
    const MAX_HALF: f32 = 65504.0;

    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    if value.is_nan() {
        return sign | 0x7E00;
    }
    if value.is_infinite() {
        return sign | 0x7C00;
    }
    if value.abs() >= MAX_HALF {
        return sign | 0x7BFF;
    }

    let exponent = ((bits >> 23) & 0xFF) as i32 - 127;
    let mantissa = bits & 0x7F_FFFF;

    if exponent < -25 {
        return sign;
    }

    let round = |value: u32, shift: u32| -> u32 {
        let truncated = value >> shift;
        let remainder = value & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        if remainder > halfway || (remainder == halfway && truncated & 1 == 1) {
            truncated + 1
        } else {
            truncated
        }
    };

    if exponent < -14 {
        // subnormal half: value in units of 2^-24
        let shift = (-1 - exponent) as u32;
        return sign | round(mantissa | 0x80_0000, shift) as u16;
    }

    let biased = ((exponent + 15) as u32) << 10;
    let half = round(biased << 13 | mantissa, 13);
    sign | half.min(0x7BFF) as u16
}

pub fn f16_to_f32(half: u16) -> f32 {
    let sign = if half & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((half >> 10) & 0x1F);
    let mantissa = f32::from(half & 0x3FF);
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        31 if mantissa == 0.0 => sign * f32::INFINITY,
        31 => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_aligned_values_are_little_endian() {
        let mut writer = BitWriter::new();
        writer.write_unsigned(0x1234_5678, 32);
        assert_eq!(writer.into_bytes(), vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_sub_byte_fields_are_msb_first() {
        let mut writer = BitWriter::new();
        writer.write_unsigned(0b10, 2); // health
        writer.write_unsigned(0b011, 3); // mode
        writer.write_unsigned(0b001, 3); // sub mode
        assert_eq!(writer.bit_len(), 8);
        assert_eq!(writer.into_bytes(), vec![0b1001_1001]);
    }

    #[test]
    fn test_unaligned_wide_field() {
        let mut writer = BitWriter::new();
        writer.write_unsigned(0, 3);
        writer.write_unsigned(0x5A5, 12);
        let bytes = writer.into_bytes();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_unsigned(3).unwrap(), 0);
        assert_eq!(reader.read_unsigned(12).unwrap(), 0x5A5);
    }

    #[test]
    fn test_signed_values() {
        let mut writer = BitWriter::new();
        writer.write_signed(-6500, 27);
        writer.write_signed(5_575_444_260, 37);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 8);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_signed(27).unwrap(), -6500);
        assert_eq!(reader.read_signed(37).unwrap(), 5_575_444_260);
    }

    #[test]
    fn test_truncated_payload() {
        let mut reader = BitReader::new(&[0xFF]);
        assert!(reader.read_unsigned(6).is_ok());
        assert!(matches!(
            reader.read_unsigned(3),
            Err(StackError::Transfer(_))
        ));
    }

    #[test]
    fn test_half_float_conversion() {
        assert_eq!(f32_to_f16(0.0), 0x0000);
        assert_eq!(f32_to_f16(1.0), 0x3C00);
        assert_eq!(f32_to_f16(-2.0), 0xC000);
        assert_eq!(f32_to_f16(99.0), 0x5630);
        assert_eq!(f32_to_f16(65504.0), 0x7BFF);
        assert_eq!(f32_to_f16(1.0e6), 0x7BFF);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7C00);
        assert_eq!(f32_to_f16(2f32.powi(-24)), 0x0001);

        assert_eq!(f16_to_f32(0x5630), 99.0);
        assert_eq!(f16_to_f32(0x3555), 0.333_251_95);
        assert!(f16_to_f32(0x7E00).is_nan());
    }
}
