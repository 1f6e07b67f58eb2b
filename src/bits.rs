//! Bit-level helpers for Gen2 command framing.
//!
//! Gen2 fields go over the air most significant bit first. Commands are built with the
//! [`BitWriter`] below and read back with `bitreader::BitReader`, which consumes bits in the
//! same order.
use bitreader::BitReader;
use bitvec::prelude::*;

use crate::error::{Error, Result};

/// Largest value an EBV with a single 7-bit group can carry.
pub const EBV_7_MAX: u32 = (1 << 7) - 1;
/// Largest value an EBV with two 7-bit groups can carry.
pub const EBV_14_MAX: u32 = (1 << 14) - 1;
/// Largest value an EBV with three 7-bit groups can carry.
pub const EBV_21_MAX: u32 = (1 << 21) - 1;

/// Append-only MSB-first bit buffer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter::default()
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Append the low `count` bits of `value`.
    pub fn write(&mut self, value: u32, count: u8) -> Result<()> {
        if count > 32 || (count < 32 && value >> count != 0) {
            return Err(Error::Encode(format!(
                "Value {:#x} does not fit in {} bits",
                value, count
            )));
        }
        let field = value.view_bits::<Msb0>();
        self.bits
            .extend_from_bitslice(&field[32 - usize::from(count)..]);
        Ok(())
    }

    pub fn write_bool(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Append the first `count` bits of `bytes`, starting at the top bit of the first byte.
    pub fn write_bits(&mut self, bytes: &[u8], count: usize) -> Result<()> {
        let span = bytes.view_bits::<Msb0>();
        if count > span.len() {
            return Err(Error::Encode(format!(
                "{} bits requested from a {} byte span",
                count,
                bytes.len()
            )));
        }
        self.bits.extend_from_bitslice(&span[..count]);
        Ok(())
    }

    /// Append an extensible bit vector: 7-bit groups, most significant group first, with the
    /// top bit of every group except the last set.
    pub fn write_ebv(&mut self, value: u32, max: u32) -> Result<()> {
        if value > max {
            return Err(Error::Encode(format!(
                "EBV value {} exceeds maximum {}",
                value, max
            )));
        }
        let mut groups = vec![(value & 0x7F) as u8];
        let mut rest = value >> 7;
        while rest > 0 {
            groups.push(0x80 | (rest & 0x7F) as u8);
            rest >>= 7;
        }
        for group in groups.iter().rev() {
            self.write(u32::from(*group), 8)?;
        }
        Ok(())
    }

    /// Consume the writer, returning the packed bytes and the bit length. Unused low bits of
    /// the final byte are zero.
    pub fn into_parts(self) -> (Vec<u8>, usize) {
        let len = self.bits.len();
        let mut bytes = vec![0u8; (len + 7) / 8];
        bytes.view_bits_mut::<Msb0>()[..len].copy_from_bitslice(&self.bits);
        (bytes, len)
    }
}

/// Encoded bit length of `value` as an EBV.
pub fn ebv_bit_len(value: u32) -> usize {
    let mut groups = 1;
    let mut rest = value >> 7;
    while rest > 0 {
        groups += 1;
        rest >>= 7;
    }
    groups * 8
}

/// Read an EBV of at most three groups.
pub fn read_ebv(reader: &mut BitReader<'_>) -> Result<u32> {
    let mut value: u32 = 0;
    for _ in 0..3 {
        let group = reader.read_u8(8)?;
        value = (value << 7) | u32::from(group & 0x7F);
        if group & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::Decode("EBV longer than 21 bits".to_string()))
}

/// Read `count` bits into bytes, MSB first. The unused low bits of the final byte are zero.
pub fn read_bits(reader: &mut BitReader<'_>, count: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; (count + 7) / 8];
    let bits = out.view_bits_mut::<Msb0>();
    for i in 0..count {
        bits.set(i, reader.read_bool()?);
    }
    Ok(out)
}

#[test]
fn test_write_crosses_byte_boundary() {
    let mut w = BitWriter::new();
    w.write(0xA, 4).unwrap();
    w.write(0b101, 3).unwrap();
    w.write(0x1FF, 9).unwrap();
    let (bytes, len) = w.into_parts();
    assert_eq!(len, 16);
    assert_eq!(bytes, vec![0xAB, 0xFF]);
}

#[test]
fn test_write_rejects_oversized_value() {
    let mut w = BitWriter::new();
    assert!(w.write(4, 2).is_err());
    assert_eq!(w.bit_len(), 0);
}

#[test]
fn test_ebv_encoding() {
    let mut w = BitWriter::new();
    w.write_ebv(0x7F, EBV_21_MAX).unwrap();
    w.write_ebv(0x80, EBV_21_MAX).unwrap();
    w.write_ebv(16384, EBV_21_MAX).unwrap();
    let (bytes, len) = w.into_parts();
    assert_eq!(len, 48);
    assert_eq!(bytes, vec![0x7F, 0x81, 0x00, 0x81, 0x80, 0x00]);

    let mut reader = BitReader::new(&bytes);
    assert_eq!(read_ebv(&mut reader).unwrap(), 0x7F);
    assert_eq!(read_ebv(&mut reader).unwrap(), 0x80);
    assert_eq!(read_ebv(&mut reader).unwrap(), 16384);
}

#[test]
fn test_ebv_limit() {
    let mut w = BitWriter::new();
    assert!(w.write_ebv(EBV_7_MAX + 1, EBV_7_MAX).is_err());
    assert!(w.write_ebv(EBV_14_MAX, EBV_14_MAX).is_ok());
    assert_eq!(ebv_bit_len(EBV_14_MAX), 16);
    assert_eq!(ebv_bit_len(EBV_21_MAX), 24);
}

#[test]
fn test_partial_byte_spans() {
    let mut w = BitWriter::new();
    w.write_bool(true);
    w.write_bits(&[0xF0, 0xC0], 10).unwrap();
    let (bytes, len) = w.into_parts();
    assert_eq!(len, 11);
    assert_eq!(bytes, vec![0xF8, 0x60]);

    let mut reader = BitReader::new(&bytes);
    reader.skip(1).unwrap();
    assert_eq!(read_bits(&mut reader, 10).unwrap(), vec![0xF0, 0xC0]);
}

#[test]
fn test_full_width_write_and_tail_padding() {
    let mut w = BitWriter::new();
    w.write(0xDEAD_BEEF, 32).unwrap();
    w.write(0, 0).unwrap();
    w.write(0b11, 2).unwrap();
    let (bytes, len) = w.into_parts();
    assert_eq!(len, 34);
    assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF, 0xC0]);
}
