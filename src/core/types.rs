use serde::{Deserialize, Serialize};

/// One of the four disjoint Modbus address universes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSpace {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl AddressSpace {
    /// Only these two spaces may carry a [`crate::core::register::BitOverlay`].
    pub fn supports_bit_overlay(&self) -> bool {
        matches!(
            self,
            AddressSpace::HoldingRegisters | AddressSpace::InputRegisters
        )
    }

    /// Coils and discrete inputs are always single-bit `bool`.
    pub fn is_bit_space(&self) -> bool {
        matches!(self, AddressSpace::Coils | AddressSpace::DiscreteInputs)
    }
}

/// The declared type of a register entry. Controls width (via
/// [`crate::core::packer::TypePacker`]) and how a generator's raw output is
/// coerced before packing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclaredType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    Bool,
    /// `len` is the declared character count, clamped to 125 at install time.
    String { len: usize },
}

/// A concrete, already-coerced value ready for packing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegisterValue {
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(String),
}

impl RegisterValue {
    /// Coerce to `f64` for use by range-based generators (ramp, sine, ...).
    pub fn as_f64(&self) -> f64 {
        match *self {
            RegisterValue::Int16(v) => v as f64,
            RegisterValue::Uint16(v) => v as f64,
            RegisterValue::Int32(v) => v as f64,
            RegisterValue::Uint32(v) => v as f64,
            RegisterValue::Float32(v) => v as f64,
            RegisterValue::Float64(v) => v,
            RegisterValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            RegisterValue::String(_) => 0.0,
        }
    }

    /// Coerce a raw `f64` producer output into `declared`, masking/truncating
    /// out-of-range inputs the way `spec.md` §4.2 requires.
    pub fn coerce(raw: f64, declared: &DeclaredType) -> RegisterValue {
        match declared {
            DeclaredType::Int16 => RegisterValue::Int16(raw as i64 as i16),
            DeclaredType::Uint16 => RegisterValue::Uint16((raw as i64 as u32 & 0xFFFF) as u16),
            DeclaredType::Int32 => RegisterValue::Int32(raw as i64 as i32),
            DeclaredType::Uint32 => RegisterValue::Uint32(raw as i64 as u32),
            DeclaredType::Float32 => RegisterValue::Float32(raw as f32),
            DeclaredType::Float64 => RegisterValue::Float64(raw),
            DeclaredType::Bool => RegisterValue::Bool(raw != 0.0),
            DeclaredType::String { len } => {
                RegisterValue::String(format!("{:.*}", *len, raw))
            }
        }
    }
}
