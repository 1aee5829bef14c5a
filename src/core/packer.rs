use byteorder::{BigEndian, ByteOrder};

use crate::core::types::{DeclaredType, RegisterValue};

/// Converts a [`RegisterValue`] to and from an ordered list of 16-bit
/// registers, and reports the register width a [`DeclaredType`] occupies.
///
/// Mirrors the teacher's per-type `DataType::bytes` (`num::traits::ToBytes`),
/// generalized to the full set of declared types `spec.md` §4.2 names,
/// including the multi-register `float64` and `string` cases.
pub struct TypePacker;

impl TypePacker {
    /// Register width, in 16-bit words, for `declared`.
    pub fn width(declared: &DeclaredType) -> u16 {
        match declared {
            DeclaredType::Int16
            | DeclaredType::Uint16
            | DeclaredType::Bool => 1,
            DeclaredType::Int32 | DeclaredType::Uint32 | DeclaredType::Float32 => 2,
            DeclaredType::Float64 => 4,
            DeclaredType::String { len } => (*len).min(125) as u16,
        }
    }

    /// Pack `value` into big-endian-ordered 16-bit registers, most
    /// significant word first.
    pub fn pack(value: &RegisterValue, declared: &DeclaredType) -> Vec<u16> {
        match (value, declared) {
            (RegisterValue::Int16(v), _) => vec![*v as u16],
            (RegisterValue::Uint16(v), _) => vec![*v],
            (RegisterValue::Int32(v), _) => {
                let bytes = v.to_be_bytes();
                vec![
                    BigEndian::read_u16(&bytes[0..2]),
                    BigEndian::read_u16(&bytes[2..4]),
                ]
            }
            (RegisterValue::Uint32(v), _) => {
                let bytes = v.to_be_bytes();
                vec![
                    BigEndian::read_u16(&bytes[0..2]),
                    BigEndian::read_u16(&bytes[2..4]),
                ]
            }
            (RegisterValue::Float32(v), _) => {
                let bytes = v.to_be_bytes();
                vec![
                    BigEndian::read_u16(&bytes[0..2]),
                    BigEndian::read_u16(&bytes[2..4]),
                ]
            }
            (RegisterValue::Float64(v), _) => {
                let bytes = v.to_be_bytes();
                vec![
                    BigEndian::read_u16(&bytes[0..2]),
                    BigEndian::read_u16(&bytes[2..4]),
                    BigEndian::read_u16(&bytes[4..6]),
                    BigEndian::read_u16(&bytes[6..8]),
                ]
            }
            (RegisterValue::Bool(v), _) => vec![if *v { 1 } else { 0 }],
            (RegisterValue::String(s), DeclaredType::String { len }) => {
                let width = (*len).min(125);
                let mut words: Vec<u16> = s.encode_utf16().take(width).collect();
                words.resize(width, 0);
                words
            }
            (RegisterValue::String(s), _) => {
                // Entry installed with a non-string declared type but a
                // string value slipped through; fall back to the natural
                // register width of the declared type, zero-padded.
                let width = Self::width(declared) as usize;
                let mut words: Vec<u16> = s.encode_utf16().take(width).collect();
                words.resize(width, 0);
                words
            }
        }
    }

    /// Reverse of [`pack`]: interpret `words` (at least `width(declared)` long)
    /// as `declared`.
    pub fn unpack(words: &[u16], declared: &DeclaredType) -> RegisterValue {
        match declared {
            DeclaredType::Int16 => RegisterValue::Int16(words[0] as i16),
            DeclaredType::Uint16 => RegisterValue::Uint16(words[0]),
            DeclaredType::Int32 => {
                let mut bytes = [0u8; 4];
                BigEndian::write_u16(&mut bytes[0..2], words[0]);
                BigEndian::write_u16(&mut bytes[2..4], words[1]);
                RegisterValue::Int32(i32::from_be_bytes(bytes))
            }
            DeclaredType::Uint32 => {
                let mut bytes = [0u8; 4];
                BigEndian::write_u16(&mut bytes[0..2], words[0]);
                BigEndian::write_u16(&mut bytes[2..4], words[1]);
                RegisterValue::Uint32(u32::from_be_bytes(bytes))
            }
            DeclaredType::Float32 => {
                let mut bytes = [0u8; 4];
                BigEndian::write_u16(&mut bytes[0..2], words[0]);
                BigEndian::write_u16(&mut bytes[2..4], words[1]);
                RegisterValue::Float32(f32::from_be_bytes(bytes))
            }
            DeclaredType::Float64 => {
                let mut bytes = [0u8; 8];
                BigEndian::write_u16(&mut bytes[0..2], words[0]);
                BigEndian::write_u16(&mut bytes[2..4], words[1]);
                BigEndian::write_u16(&mut bytes[4..6], words[2]);
                BigEndian::write_u16(&mut bytes[6..8], words[3]);
                RegisterValue::Float64(f64::from_be_bytes(bytes))
            }
            DeclaredType::Bool => RegisterValue::Bool(words[0] != 0),
            DeclaredType::String { len } => {
                let width = (*len).min(125);
                RegisterValue::String(String::from_utf16_lossy(&words[..width.min(words.len())]))
            }
        }
    }

    /// Convenience used by [`crate::core::store::RegisterStore`] to zero an
    /// entry for a fresh `width(declared)`-sized window, used by property
    /// tests (`P2`) to assert `pack(unpack_zeroed(t)).len() == width(t)`.
    pub fn zeroed(declared: &DeclaredType) -> Vec<u16> {
        vec![0u16; Self::width(declared) as usize]
    }
}
