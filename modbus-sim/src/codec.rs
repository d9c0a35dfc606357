use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use tokio_modbus::{Address, Quantity};

/// 16-bit value stored in a Modbus register.
pub type Word = u16;

/// Wire representation of a register point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
    /// Raw-bit display mode. Not a wire encoding: the buffer is rendered as
    /// grouped bits instead of going through numeric conversion.
    Binary,
}

impl DataType {
    /// Buffer width in bytes, or `None` for [`DataType::Binary`] which takes
    /// whatever span the point occupies.
    pub fn width(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Uint16 | DataType::Int16 => Some(2),
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Float64 => Some(8),
            DataType::Binary => None,
        }
    }

    /// Number of consecutive 16-bit registers the type occupies.
    pub fn registers(&self) -> Option<u16> {
        self.width().map(|w| (w / 2) as u16)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Uint16
                | DataType::Int16
                | DataType::Uint32
                | DataType::Int32
                | DataType::Float32
                | DataType::Float64
        )
    }
}

/// Byte order used to assemble multi-byte fields from register bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Engineering-facing value decoded from a raw buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported data type {data_type:?}")]
    UnsupportedType { data_type: DataType },
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Decode a numeric value from a byte buffer in either byte order.
trait FromRegisterBytes: Sized {
    fn from_register_bytes(buf: &[u8], byte_order: ByteOrder) -> Result<Self, CodecError>;
}

macro_rules! impl_from_register_bytes {
    ($num_type:ty) => {
        impl FromRegisterBytes for $num_type {
            fn from_register_bytes(buf: &[u8], byte_order: ByteOrder) -> Result<Self, CodecError> {
                let array = buf.try_into().map_err(|_| CodecError::SizeMismatch {
                    expected: std::mem::size_of::<$num_type>(),
                    actual: buf.len(),
                })?;
                Ok(match byte_order {
                    ByteOrder::BigEndian => <$num_type>::from_be_bytes(array),
                    ByteOrder::LittleEndian => <$num_type>::from_le_bytes(array),
                })
            }
        }
    };
}

impl_from_register_bytes!(i16);
impl_from_register_bytes!(i32);
impl_from_register_bytes!(u16);
impl_from_register_bytes!(u32);
impl_from_register_bytes!(f32);
impl_from_register_bytes!(f64);

/// Encode a numeric value into a byte buffer in either byte order.
trait ToRegisterBytes {
    fn to_register_bytes(self, byte_order: ByteOrder) -> Vec<u8>;
}

macro_rules! impl_to_register_bytes {
    ($num_type:ty) => {
        impl ToRegisterBytes for $num_type {
            fn to_register_bytes(self, byte_order: ByteOrder) -> Vec<u8> {
                match byte_order {
                    ByteOrder::BigEndian => self.to_be_bytes().to_vec(),
                    ByteOrder::LittleEndian => self.to_le_bytes().to_vec(),
                }
            }
        }
    };
}

impl_to_register_bytes!(i16);
impl_to_register_bytes!(i32);
impl_to_register_bytes!(u16);
impl_to_register_bytes!(u32);
impl_to_register_bytes!(f32);
impl_to_register_bytes!(f64);

fn expect_len(buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() != expected {
        return Err(CodecError::SizeMismatch {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Decode a raw buffer into its typed value.
///
/// The buffer length must match the width implied by `data_type`. A `Bool`
/// is true when any bit across its two bytes is set, regardless of byte
/// order. `Binary` has no numeric form and is rejected; render it with
/// [`binary_groups`] instead.
pub fn decode(buf: &[u8], byte_order: ByteOrder, data_type: DataType) -> Result<Value, CodecError> {
    match data_type {
        DataType::Bool => {
            expect_len(buf, 2)?;
            Ok(Value::Bool(buf.iter().any(|b| *b != 0)))
        }
        DataType::Uint16 => Ok(Value::Number(
            u16::from_register_bytes(buf, byte_order)?.into(),
        )),
        DataType::Int16 => Ok(Value::Number(
            i16::from_register_bytes(buf, byte_order)?.into(),
        )),
        DataType::Uint32 => Ok(Value::Number(
            u32::from_register_bytes(buf, byte_order)?.into(),
        )),
        DataType::Int32 => Ok(Value::Number(
            i32::from_register_bytes(buf, byte_order)?.into(),
        )),
        DataType::Float32 => Ok(Value::Number(
            f32::from_register_bytes(buf, byte_order)?.into(),
        )),
        DataType::Float64 => Ok(Value::Number(f64::from_register_bytes(buf, byte_order)?)),
        DataType::Binary => Err(CodecError::UnsupportedType { data_type }),
    }
}

/// Encode a typed value into its raw buffer.
///
/// A true `Bool` encodes as the register word 0xFF00 and false as 0x0000,
/// the Modbus convention for coil-style writes carried in a 16-bit register.
/// Integer types truncate non-integral input toward zero and wrap on
/// overflow via two's-complement truncation; they never fail on range.
pub fn encode(
    value: Value,
    byte_order: ByteOrder,
    data_type: DataType,
) -> Result<Vec<u8>, CodecError> {
    if data_type == DataType::Bool {
        let on = match value {
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0,
        };
        let word: u16 = if on { 0xFF00 } else { 0x0000 };
        return Ok(word.to_register_bytes(byte_order));
    }

    let number = value.as_f64();
    match data_type {
        DataType::Uint16 => Ok((number.trunc() as i64 as u16).to_register_bytes(byte_order)),
        DataType::Int16 => Ok((number.trunc() as i64 as i16).to_register_bytes(byte_order)),
        DataType::Uint32 => Ok((number.trunc() as i64 as u32).to_register_bytes(byte_order)),
        DataType::Int32 => Ok((number.trunc() as i64 as i32).to_register_bytes(byte_order)),
        DataType::Float32 => Ok((number as f32).to_register_bytes(byte_order)),
        DataType::Float64 => Ok(number.to_register_bytes(byte_order)),
        DataType::Binary => Err(CodecError::UnsupportedType { data_type }),
        DataType::Bool => unreachable!("handled above"),
    }
}

/// Convert register words into the raw byte buffer as it travels on the
/// wire, high byte first per register.
pub fn words_to_bytes(words: &[Word]) -> Vec<u8> {
    words.iter().copied().flat_map(u16::to_be_bytes).collect()
}

/// Convert a raw byte buffer back into register words. A trailing odd byte
/// is padded with a zero low byte.
pub fn bytes_to_words(buf: &[u8]) -> Vec<Word> {
    buf.chunks(2)
        .map(|chunk| {
            let hi = chunk[0];
            let lo = chunk.get(1).copied().unwrap_or(0);
            u16::from_be_bytes([hi, lo])
        })
        .collect()
}

/// Render a raw buffer as space-separated 2-digit uppercase hex pairs.
pub fn hex_bytes(buf: &[u8]) -> String {
    buf.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a raw buffer as 4-bit groups separated by spaces.
pub fn binary_groups(buf: &[u8]) -> String {
    buf.iter()
        .flat_map(|b| [b >> 4, b & 0x0F])
        .map(|nibble| format!("{nibble:04b}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value, byte_order: ByteOrder, data_type: DataType) {
        let buf = encode(value, byte_order, data_type).unwrap();
        assert_eq!(buf.len(), data_type.width().unwrap());
        assert_eq!(decode(&buf, byte_order, data_type).unwrap(), value);
    }

    #[test]
    fn numeric_round_trips() {
        for byte_order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            round_trip(Value::Number(0.0), byte_order, DataType::Uint16);
            round_trip(Value::Number(65535.0), byte_order, DataType::Uint16);
            round_trip(Value::Number(-1.0), byte_order, DataType::Int16);
            round_trip(Value::Number(-32768.0), byte_order, DataType::Int16);
            round_trip(Value::Number(32767.0), byte_order, DataType::Int16);
            round_trip(Value::Number(0.0), byte_order, DataType::Uint32);
            round_trip(Value::Number(4294967295.0), byte_order, DataType::Uint32);
            round_trip(Value::Number(-2147483648.0), byte_order, DataType::Int32);
            round_trip(Value::Number(2147483647.0), byte_order, DataType::Int32);
            round_trip(Value::Number(-1.0), byte_order, DataType::Int32);
            round_trip(Value::Number(0.5), byte_order, DataType::Float32);
            round_trip(Value::Number(f32::MAX as f64), byte_order, DataType::Float32);
            round_trip(Value::Number(0.0), byte_order, DataType::Float64);
            round_trip(Value::Number(f64::MIN), byte_order, DataType::Float64);
            round_trip(Value::Number(1.000000000001), byte_order, DataType::Float64);
        }
    }

    #[test]
    fn float_round_trip_is_bit_exact() {
        let value = std::f64::consts::PI;
        let buf = encode(Value::Number(value), ByteOrder::BigEndian, DataType::Float64).unwrap();
        let decoded = decode(&buf, ByteOrder::BigEndian, DataType::Float64).unwrap();
        assert_eq!(decoded.as_f64().to_bits(), value.to_bits());
    }

    #[test]
    fn byte_order_changes_layout() {
        let be = encode(
            Value::Number(0x1234 as f64),
            ByteOrder::BigEndian,
            DataType::Uint16,
        )
        .unwrap();
        let le = encode(
            Value::Number(0x1234 as f64),
            ByteOrder::LittleEndian,
            DataType::Uint16,
        )
        .unwrap();
        assert_eq!(be, vec![0x12, 0x34]);
        assert_eq!(le, vec![0x34, 0x12]);
    }

    #[test]
    fn bool_decodes_any_set_bit() {
        for byte_order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            assert_eq!(
                decode(&[0x00, 0x00], byte_order, DataType::Bool).unwrap(),
                Value::Bool(false)
            );
            assert_eq!(
                decode(&[0x00, 0x01], byte_order, DataType::Bool).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                decode(&[0xFF, 0x00], byte_order, DataType::Bool).unwrap(),
                Value::Bool(true)
            );
        }
    }

    #[test]
    fn bool_encodes_coil_convention() {
        assert_eq!(
            encode(Value::Bool(true), ByteOrder::BigEndian, DataType::Bool).unwrap(),
            vec![0xFF, 0x00]
        );
        assert_eq!(
            encode(Value::Bool(true), ByteOrder::LittleEndian, DataType::Bool).unwrap(),
            vec![0x00, 0xFF]
        );
        assert_eq!(
            encode(Value::Bool(false), ByteOrder::BigEndian, DataType::Bool).unwrap(),
            vec![0x00, 0x00]
        );
    }

    #[test]
    fn integer_encode_truncates_toward_zero() {
        let buf = encode(Value::Number(9.9), ByteOrder::BigEndian, DataType::Uint16).unwrap();
        assert_eq!(buf, vec![0x00, 0x09]);
        let buf = encode(Value::Number(-9.9), ByteOrder::BigEndian, DataType::Int16).unwrap();
        assert_eq!(buf, i16::to_be_bytes(-9).to_vec());
    }

    #[test]
    fn integer_encode_wraps_out_of_range() {
        let buf = encode(Value::Number(-1.0), ByteOrder::BigEndian, DataType::Uint16).unwrap();
        assert_eq!(buf, vec![0xFF, 0xFF]);
        let buf = encode(Value::Number(65536.0), ByteOrder::BigEndian, DataType::Uint16).unwrap();
        assert_eq!(buf, vec![0x00, 0x00]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        assert_eq!(
            decode(&[0x00], ByteOrder::BigEndian, DataType::Uint16),
            Err(CodecError::SizeMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode(&[0x00; 4], ByteOrder::BigEndian, DataType::Float64),
            Err(CodecError::SizeMismatch {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn binary_has_no_numeric_form() {
        assert_eq!(
            decode(&[0x01, 0xF4], ByteOrder::BigEndian, DataType::Binary),
            Err(CodecError::UnsupportedType {
                data_type: DataType::Binary
            })
        );
        assert_eq!(
            encode(Value::Number(1.0), ByteOrder::BigEndian, DataType::Binary),
            Err(CodecError::UnsupportedType {
                data_type: DataType::Binary
            })
        );
    }

    #[test]
    fn word_buffer_conversions() {
        assert_eq!(
            words_to_bytes(&[0x01F4, 0xABCD]),
            vec![0x01, 0xF4, 0xAB, 0xCD]
        );
        assert_eq!(bytes_to_words(&[0x01, 0xF4, 0xAB, 0xCD]), vec![0x01F4, 0xABCD]);
        assert_eq!(bytes_to_words(&[0x01, 0xF4, 0xAB]), vec![0x01F4, 0xAB00]);
    }

    #[test]
    fn raw_display_renderings() {
        assert_eq!(hex_bytes(&[0x01, 0xF4]), "01 F4");
        assert_eq!(binary_groups(&[0x01, 0xF4]), "0000 0001 1111 0100");
    }

    #[test]
    fn data_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&DataType::Float32).unwrap(),
            "\"float32\""
        );
        assert_eq!(
            serde_json::to_string(&ByteOrder::LittleEndian).unwrap(),
            "\"littleEndian\""
        );
        let ty: DataType = serde_json::from_str("\"uint16\"").unwrap();
        assert_eq!(ty, DataType::Uint16);
    }
}
