use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{self, ByteOrder, CodecError, DataType, Value};

/// Highest valid register address.
pub const ADDR_MAX: u32 = 0xFFFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("scale must be greater than zero")]
    InvalidScale,
    #[error("delta must be greater than zero")]
    InvalidDelta,
    #[error("address size must be at least one register")]
    InvalidAddrSize,
    #[error("address {addr} is outside 0000-FFFF")]
    AddressOutOfRange { addr: u32 },
    #[error("{input:?} is not a valid hexadecimal address")]
    InvalidHexAddress { input: String },
}

/// One simulated register point: a span of consecutive 16-bit registers
/// interpreted as a typed value under a linear scale/offset transform.
///
/// Serialized field names match the portable JSON document; `initValue`
/// travels as base64 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterPoint {
    /// Stable opaque identity, unique within a store.
    pub id: String,
    /// Disabled points stay in the store but are excluded from backend
    /// synchronization.
    pub enabled: bool,
    pub description: String,
    pub start_addr: u16,
    /// Count of consecutive registers; the raw buffer is `addr_size * 2`
    /// bytes long.
    pub addr_size: u16,
    #[serde(with = "base64_bytes")]
    pub init_value: Vec<u8>,
    pub value_type: DataType,
    pub byte_order: ByteOrder,
    pub scale: f64,
    pub offset: f64,
    /// Step size in engineering units for increment/decrement.
    pub delta: f64,
}

impl RegisterPoint {
    /// Create a point with a fresh id and the editor's defaults for the
    /// given type: identity transform, unit delta, zeroed initial registers.
    pub fn new(description: impl Into<String>, start_addr: u16, value_type: DataType) -> Self {
        let addr_size = value_type.registers().unwrap_or(1);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            enabled: true,
            description: description.into(),
            start_addr,
            addr_size,
            init_value: vec![0; usize::from(addr_size) * 2],
            value_type,
            byte_order: ByteOrder::BigEndian,
            scale: 1.0,
            offset: 0.0,
            delta: 1.0,
        }
    }

    /// Raw buffer length in bytes for this point.
    pub fn raw_len(&self) -> usize {
        usize::from(self.addr_size) * 2
    }

    /// Exclusive end of the register span.
    pub fn end_addr(&self) -> u32 {
        u32::from(self.start_addr) + u32::from(self.addr_size)
    }

    /// Whether two points claim any register in common.
    pub fn overlaps(&self, other: &RegisterPoint) -> bool {
        u32::from(self.start_addr) < other.end_addr() && u32::from(other.start_addr) < self.end_addr()
    }

    /// Check the edit-time invariants. Rules are independent; the first
    /// violated one is reported.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        if self.scale <= 0.0 {
            return Err(ValidationError::InvalidScale);
        }
        if self.delta <= 0.0 {
            return Err(ValidationError::InvalidDelta);
        }
        if self.addr_size == 0 {
            return Err(ValidationError::InvalidAddrSize);
        }
        if self.end_addr() > ADDR_MAX + 1 {
            return Err(ValidationError::AddressOutOfRange {
                addr: self.end_addr() - 1,
            });
        }
        Ok(())
    }

    /// Decode a raw buffer into the engineering value: `raw * scale + offset`
    /// for numbers, pass-through for booleans.
    pub fn to_engineering(&self, raw: &[u8]) -> Result<Value, CodecError> {
        match codec::decode(raw, self.byte_order, self.value_type)? {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Number(n) => Ok(Value::Number(n * self.scale + self.offset)),
        }
    }

    /// Encode an engineering value into a raw buffer via the inverse
    /// transform `(engineering - offset) / scale`. Integer types truncate
    /// toward zero on the raw scale, matching the direct set-value path.
    pub fn from_engineering(&self, value: Value) -> Result<Vec<u8>, CodecError> {
        let raw = match value {
            Value::Bool(b) => Value::Bool(b),
            Value::Number(n) => Value::Number((n - self.offset) / self.scale),
        };
        codec::encode(raw, self.byte_order, self.value_type)
    }

    /// Render a raw buffer the way the operator sees it: booleans as
    /// true/false, numbers on the engineering scale, binary points as
    /// grouped bits.
    pub fn display_value(&self, raw: &[u8]) -> Result<String, CodecError> {
        if self.value_type == DataType::Binary {
            return Ok(codec::binary_groups(raw));
        }
        match self.to_engineering(raw)? {
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
        }
    }
}

/// Canonical display form of a register address: 4-digit uppercase hex.
pub fn format_addr(addr: u16) -> String {
    format!("{addr:04X}")
}

/// Parse textual address entry back from its hex form. Case-insensitive;
/// a non-hex string is rejected as [`ValidationError::InvalidHexAddress`]
/// and a hex value beyond 0xFFFF as [`ValidationError::AddressOutOfRange`].
pub fn parse_addr(text: &str) -> Result<u16, ValidationError> {
    let trimmed = text.trim();
    let addr = u32::from_str_radix(trimmed, 16).map_err(|_| ValidationError::InvalidHexAddress {
        input: text.to_string(),
    })?;
    if addr > ADDR_MAX {
        return Err(ValidationError::AddressOutOfRange { addr });
    }
    Ok(addr as u16)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> RegisterPoint {
        RegisterPoint::new("flow rate", 0x0010, DataType::Uint16)
    }

    #[test]
    fn new_point_sizes_span_from_type() {
        assert_eq!(point().addr_size, 1);
        assert_eq!(point().raw_len(), 2);
        let wide = RegisterPoint::new("total", 0, DataType::Float64);
        assert_eq!(wide.addr_size, 4);
        assert_eq!(wide.init_value.len(), 8);
    }

    #[test]
    fn validation_rejects_each_rule_independently() {
        let mut p = point();
        p.description = "   ".into();
        assert_eq!(p.validate(), Err(ValidationError::EmptyDescription));

        let mut p = point();
        p.scale = 0.0;
        assert_eq!(p.validate(), Err(ValidationError::InvalidScale));

        let mut p = point();
        p.delta = -1.0;
        assert_eq!(p.validate(), Err(ValidationError::InvalidDelta));

        let mut p = point();
        p.addr_size = 0;
        assert_eq!(p.validate(), Err(ValidationError::InvalidAddrSize));

        let mut p = point();
        p.start_addr = 0xFFFF;
        p.addr_size = 2;
        assert_eq!(
            p.validate(),
            Err(ValidationError::AddressOutOfRange { addr: 0x10000 })
        );

        assert_eq!(point().validate(), Ok(()));
    }

    #[test]
    fn address_formatting_round_trip() {
        assert_eq!(format_addr(0x1F36), "1F36");
        assert_eq!(parse_addr("1f36"), Ok(0x1F36));
        assert_eq!(parse_addr("1F36"), Ok(0x1F36));
        assert_eq!(format_addr(0x000A), "000A");
    }

    #[test]
    fn address_parsing_failures_are_distinct() {
        assert_eq!(
            parse_addr("zz"),
            Err(ValidationError::InvalidHexAddress { input: "zz".into() })
        );
        // 70000 decimal entered as hex digits overflows the address space
        assert_eq!(
            parse_addr("11170"),
            Err(ValidationError::AddressOutOfRange { addr: 0x11170 })
        );
    }

    #[test]
    fn linear_transform() {
        let mut p = point();
        p.scale = 0.1;
        p.offset = 0.0;
        let raw = 500u16.to_be_bytes();
        assert_eq!(p.to_engineering(&raw).unwrap(), Value::Number(50.0));
    }

    #[test]
    fn from_engineering_inverts_transform() {
        let mut p = point();
        p.scale = 0.1;
        p.offset = 5.0;
        let raw = p.from_engineering(Value::Number(55.0)).unwrap();
        assert_eq!(raw, 500u16.to_be_bytes().to_vec());
    }

    #[test]
    fn bool_points_surface_bool_values() {
        let p = RegisterPoint::new("pump on", 0, DataType::Bool);
        assert_eq!(p.to_engineering(&[0xFF, 0x00]).unwrap(), Value::Bool(true));
        assert_eq!(p.to_engineering(&[0x00, 0x00]).unwrap(), Value::Bool(false));
        assert_eq!(
            p.from_engineering(Value::Bool(true)).unwrap(),
            vec![0xFF, 0x00]
        );
    }

    #[test]
    fn display_value_per_type() {
        let mut p = point();
        p.scale = 0.1;
        assert_eq!(p.display_value(&500u16.to_be_bytes()).unwrap(), "50");

        let mut p = point();
        p.value_type = DataType::Binary;
        assert_eq!(p.display_value(&[0x01, 0xF4]).unwrap(), "0000 0001 1111 0100");

        let b = RegisterPoint::new("valve", 0, DataType::Bool);
        assert_eq!(b.display_value(&[0x00, 0x01]).unwrap(), "true");
    }

    #[test]
    fn overlap_detection() {
        let mut a = point();
        a.start_addr = 10;
        a.addr_size = 2;
        let mut b = point();
        b.start_addr = 11;
        b.addr_size = 1;
        let mut c = point();
        c.start_addr = 12;
        c.addr_size = 4;
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn portable_field_names_round_trip() {
        let p = point();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"startAddr\""));
        assert!(json.contains("\"valueType\""));
        assert!(json.contains("\"initValue\":\"AAA=\""));
        let back: RegisterPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
