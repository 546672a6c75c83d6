//! Encoding of attribute values into flat byte buffers.
//!
//! Fixed-width values are stored as their little-endian representation. Variable-length
//! values start with a count header:
//!
//! ```text
//! 0xxxxxxx                              count <= 0x7F
//! 10xxxxxx xxxxxxxx                     count <= 0x3FFF
//! 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx   count <= 0x3FFF_FFFE, 0x3FFF_FFFF is null
//! ```
//!
//! The header bytes are big-endian so that the first byte carries the width tag.
//!
//! A multi-string value is laid out as
//! `[count][offset_item_len: u8][offsets: count x offset_item_len][items]`, where each item
//! is `[count header(len)][bytes]` and offsets are relative to the first item.

use std::sync::Arc;

use strata_common::{Result, error::Error, verify_data};
use strata_format::{FieldConfig, FieldType};

/// Largest element count a count header can carry.
pub const MAX_COUNT: u32 = 0x3FFF_FFFE;

/// Count header value reserved for null.
pub const NULL_COUNT: u32 = 0x3FFF_FFFF;

/// Encoded length of the count header starting with `first`.
#[inline]
pub fn count_header_len(first: u8) -> usize {
    match first >> 6 {
        0 | 1 => 1,
        2 => 2,
        _ => 4,
    }
}

pub fn encode_count(count: u32, out: &mut Vec<u8>) -> Result<()> {
    if count > MAX_COUNT {
        return Err(Error::invalid_arg(
            "count",
            format!("{count} exceeds the maximum of {MAX_COUNT}"),
        ));
    }
    write_count_header(count, out);
    Ok(())
}

pub fn encode_null(out: &mut Vec<u8>) {
    write_count_header(NULL_COUNT, out);
}

fn write_count_header(count: u32, out: &mut Vec<u8>) {
    if count <= 0x7F {
        out.push(count as u8);
    } else if count <= 0x3FFF {
        out.extend_from_slice(&(count as u16 | 0x8000).to_be_bytes());
    } else {
        out.extend_from_slice(&(count | 0xC000_0000).to_be_bytes());
    }
}

/// Decodes a count header, returning the count (`None` for null) and the header length.
pub fn decode_count(buf: &[u8]) -> Result<(Option<u32>, usize)> {
    verify_data!(count_header, !buf.is_empty());
    let len = count_header_len(buf[0]);
    verify_data!(count_header, buf.len() >= len);
    let count = match len {
        1 => buf[0] as u32,
        2 => (u16::from_be_bytes([buf[0], buf[1]]) & 0x3FFF) as u32,
        _ => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) & 0x3FFF_FFFF,
    };
    if count == NULL_COUNT {
        Ok((None, len))
    } else {
        Ok((Some(count), len))
    }
}

/// Plain numeric type with a fixed-size little-endian encoding.
pub trait FixedValue: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const SIZE: usize;
    const FIELD_TYPE: FieldType;

    fn put(self, out: &mut Vec<u8>);

    /// Reads the value from the first `SIZE` bytes of `buf`.
    fn get(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_value {
    ($t:ty, $ft:ident) => {
        impl FixedValue for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            const FIELD_TYPE: FieldType = FieldType::$ft;

            #[inline]
            fn put(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn get(buf: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$t>()];
                bytes.copy_from_slice(&buf[..Self::SIZE]);
                <$t>::from_le_bytes(bytes)
            }
        }
    };
}

impl_fixed_value!(i8, Int8);
impl_fixed_value!(u8, UInt8);
impl_fixed_value!(i16, Int16);
impl_fixed_value!(u16, UInt16);
impl_fixed_value!(i32, Int32);
impl_fixed_value!(u32, UInt32);
impl_fixed_value!(i64, Int64);
impl_fixed_value!(u64, UInt64);
impl_fixed_value!(f32, Float);
impl_fixed_value!(f64, Double);

pub fn encode_fixed<T: FixedValue>(value: T) -> Vec<u8> {
    let mut out = Vec::with_capacity(T::SIZE);
    value.put(&mut out);
    out
}

pub fn decode_fixed<T: FixedValue>(buf: &[u8]) -> Result<T> {
    verify_data!(fixed_value, buf.len() >= T::SIZE);
    Ok(T::get(buf))
}

/// Single numeric value tagged with its type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
}

macro_rules! scalar_dispatch {
    ($scalar:expr, $v:ident => $body:expr) => {
        match $scalar {
            Scalar::Int8($v) => $body,
            Scalar::UInt8($v) => $body,
            Scalar::Int16($v) => $body,
            Scalar::UInt16($v) => $body,
            Scalar::Int32($v) => $body,
            Scalar::UInt32($v) => $body,
            Scalar::Int64($v) => $body,
            Scalar::UInt64($v) => $body,
            Scalar::Float($v) => $body,
            Scalar::Double($v) => $body,
        }
    };
}

impl Scalar {
    pub fn field_type(&self) -> FieldType {
        match self {
            Scalar::Int8(_) => FieldType::Int8,
            Scalar::UInt8(_) => FieldType::UInt8,
            Scalar::Int16(_) => FieldType::Int16,
            Scalar::UInt16(_) => FieldType::UInt16,
            Scalar::Int32(_) => FieldType::Int32,
            Scalar::UInt32(_) => FieldType::UInt32,
            Scalar::Int64(_) => FieldType::Int64,
            Scalar::UInt64(_) => FieldType::UInt64,
            Scalar::Float(_) => FieldType::Float,
            Scalar::Double(_) => FieldType::Double,
        }
    }

    pub fn put(&self, out: &mut Vec<u8>) {
        scalar_dispatch!(*self, v => v.put(out))
    }

    /// Reads a value of type `ty` from the beginning of `buf`.
    pub fn read(ty: FieldType, buf: &[u8]) -> Result<Scalar> {
        Ok(match ty {
            FieldType::Int8 => Scalar::Int8(decode_fixed(buf)?),
            FieldType::UInt8 => Scalar::UInt8(decode_fixed(buf)?),
            FieldType::Int16 => Scalar::Int16(decode_fixed(buf)?),
            FieldType::UInt16 => Scalar::UInt16(decode_fixed(buf)?),
            FieldType::Int32 => Scalar::Int32(decode_fixed(buf)?),
            FieldType::UInt32 => Scalar::UInt32(decode_fixed(buf)?),
            FieldType::Int64 => Scalar::Int64(decode_fixed(buf)?),
            FieldType::UInt64 => Scalar::UInt64(decode_fixed(buf)?),
            FieldType::Float => Scalar::Float(decode_fixed(buf)?),
            FieldType::Double => Scalar::Double(decode_fixed(buf)?),
            FieldType::String => {
                return Err(Error::invalid_arg("ty", "string is not a scalar type"));
            }
        })
    }

    pub fn zero(ty: FieldType) -> Option<Scalar> {
        Scalar::Int64(0).cast(ty)
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            Scalar::Float(_) | Scalar::Double(_) => None,
            Scalar::Int8(v) => Some(v as i128),
            Scalar::UInt8(v) => Some(v as i128),
            Scalar::Int16(v) => Some(v as i128),
            Scalar::UInt16(v) => Some(v as i128),
            Scalar::Int32(v) => Some(v as i128),
            Scalar::UInt32(v) => Some(v as i128),
            Scalar::Int64(v) => Some(v as i128),
            Scalar::UInt64(v) => Some(v as i128),
        }
    }

    /// Integer value as `i64`; `None` for floats and out-of-range `u64` values.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> f64 {
        scalar_dispatch!(*self, v => v as f64)
    }

    /// Converts the value to `ty`. Integers convert when in range; any number
    /// converts to a float type. Floats never convert to integers.
    pub fn cast(self, ty: FieldType) -> Option<Scalar> {
        if self.field_type() == ty {
            return Some(self);
        }
        match ty {
            FieldType::Float => Some(Scalar::Float(self.as_f64() as f32)),
            FieldType::Double => Some(Scalar::Double(self.as_f64())),
            FieldType::String => None,
            _ => {
                let v = self.as_i128()?;
                Some(match ty {
                    FieldType::Int8 => Scalar::Int8(v.try_into().ok()?),
                    FieldType::UInt8 => Scalar::UInt8(v.try_into().ok()?),
                    FieldType::Int16 => Scalar::Int16(v.try_into().ok()?),
                    FieldType::UInt16 => Scalar::UInt16(v.try_into().ok()?),
                    FieldType::Int32 => Scalar::Int32(v.try_into().ok()?),
                    FieldType::UInt32 => Scalar::UInt32(v.try_into().ok()?),
                    FieldType::Int64 => Scalar::Int64(v.try_into().ok()?),
                    _ => Scalar::UInt64(v.try_into().ok()?),
                })
            }
        }
    }
}

macro_rules! impl_scalar_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Scalar {
            fn from(v: $t) -> Scalar {
                Scalar::$variant(v)
            }
        }

        impl From<$t> for AttrValue {
            fn from(v: $t) -> AttrValue {
                AttrValue::Scalar(Scalar::$variant(v))
            }
        }
    };
}

impl_scalar_from!(i8, Int8);
impl_scalar_from!(u8, UInt8);
impl_scalar_from!(i16, Int16);
impl_scalar_from!(u16, UInt16);
impl_scalar_from!(i32, Int32);
impl_scalar_from!(u32, UInt32);
impl_scalar_from!(i64, Int64);
impl_scalar_from!(u64, UInt64);
impl_scalar_from!(f32, Float);
impl_scalar_from!(f64, Double);

/// Decoded value of one attribute of one document.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Scalar(Scalar),
    String(String),
    Multi(Vec<Scalar>),
    MultiString(Vec<String>),
}

impl AttrValue {
    pub fn multi<T: Into<Scalar>>(values: impl IntoIterator<Item = T>) -> AttrValue {
        AttrValue::Multi(values.into_iter().map(Into::into).collect())
    }

    pub fn strings<S: Into<String>>(values: impl IntoIterator<Item = S>) -> AttrValue {
        AttrValue::MultiString(values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            AttrValue::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(|s| s.as_i64())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Scalar(_) => "scalar",
            AttrValue::String(_) => "string",
            AttrValue::Multi(_) => "multi-value",
            AttrValue::MultiString(_) => "multi-string",
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> AttrValue {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> AttrValue {
        AttrValue::String(s)
    }
}

/// Encoder/decoder for the values of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCodec {
    name: Arc<str>,
    field_type: FieldType,
    multi_value: bool,
    fixed_value_count: Option<u32>,
    supports_null: bool,
}

impl ValueCodec {
    pub fn new(field: &FieldConfig) -> ValueCodec {
        ValueCodec {
            name: field.name.as_str().into(),
            field_type: field.field_type,
            multi_value: field.multi_value,
            fixed_value_count: if field.multi_value {
                field.fixed_value_count
            } else {
                None
            },
            supports_null: field.supports_null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }

    pub fn supports_null(&self) -> bool {
        self.supports_null
    }

    /// Encoded size of every value, `None` for variable-length fields.
    pub fn fixed_width(&self) -> Option<usize> {
        let elem = self.field_type.fixed_size()?;
        match (self.multi_value, self.fixed_value_count) {
            (false, _) => Some(elem),
            (true, Some(count)) => Some(elem * count as usize),
            (true, None) => None,
        }
    }

    /// Value stored for documents that do not provide the field.
    pub fn default_value(&self) -> AttrValue {
        if self.supports_null {
            return AttrValue::Null;
        }
        match (self.field_type, self.multi_value) {
            (FieldType::String, false) => AttrValue::String(String::new()),
            (FieldType::String, true) => AttrValue::MultiString(Vec::new()),
            (ty, false) => AttrValue::Scalar(Scalar::zero(ty).unwrap_or(Scalar::Int64(0))),
            (ty, true) => {
                let count = self.fixed_value_count.unwrap_or(0) as usize;
                AttrValue::Multi(vec![Scalar::zero(ty).unwrap_or(Scalar::Int64(0)); count])
            }
        }
    }

    pub fn encode(&self, value: &AttrValue) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.fixed_width().unwrap_or(16));
        self.encode_into(value, &mut out)?;
        Ok(out)
    }

    pub fn encode_into(&self, value: &AttrValue, out: &mut Vec<u8>) -> Result<()> {
        match (value, self.multi_value) {
            (AttrValue::Null, _) => {
                if !self.supports_null {
                    return Err(Error::schema_violation(
                        self.name.as_ref(),
                        "null value for a field without null support",
                    ));
                }
                encode_null(out);
            }
            (AttrValue::Scalar(s), false) if !self.field_type.is_string() => {
                self.cast(*s)?.put(out);
            }
            (AttrValue::String(s), false) if self.field_type.is_string() => {
                encode_count(self.len_to_count(s.len())?, out)?;
                out.extend_from_slice(s.as_bytes());
            }
            (AttrValue::Multi(values), true) if !self.field_type.is_string() => {
                match self.fixed_value_count {
                    Some(count) => {
                        if values.len() != count as usize {
                            return Err(Error::invalid_arg(
                                self.name.as_ref(),
                                format!("expected {count} values, got {}", values.len()),
                            ));
                        }
                    }
                    None => encode_count(self.len_to_count(values.len())?, out)?,
                }
                for v in values {
                    self.cast(*v)?.put(out);
                }
            }
            (AttrValue::MultiString(items), true) if self.field_type.is_string() => {
                encode_multi_string(items, out)?;
            }
            (value, _) => {
                return Err(Error::invalid_arg(
                    self.name.as_ref(),
                    format!(
                        "{} value does not match field type {:?}{}",
                        value.kind_name(),
                        self.field_type,
                        if self.multi_value { " (multi-value)" } else { "" }
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Computes the encoded length of the value starting at `buf[0]` without decoding it.
    pub fn decode_length(&self, buf: &[u8]) -> Result<usize> {
        if let Some(width) = self.fixed_width() {
            verify_data!(fixed_value, buf.len() >= width);
            return Ok(width);
        }
        let (count, header_len) = decode_count(buf)?;
        let Some(count) = count else {
            return Ok(header_len);
        };
        let count = count as usize;
        let len = if self.field_type.is_string() && self.multi_value {
            multi_string_length(buf, count, header_len)?
        } else {
            let elem = self.field_type.fixed_size().unwrap_or(1);
            header_len + count * elem
        };
        verify_data!(encoded_value, len <= buf.len());
        Ok(len)
    }

    /// Returns `true` if the encoded value is the null sentinel.
    pub fn is_null(&self, buf: &[u8]) -> bool {
        self.fixed_width().is_none() && matches!(decode_count(buf), Ok((None, _)))
    }

    /// Decodes exactly one encoded value occupying the whole of `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<AttrValue> {
        let len = self.decode_length(buf)?;
        verify_data!(encoded_value, len == buf.len());

        if let Some(width) = self.fixed_width() {
            if !self.multi_value {
                return Ok(AttrValue::Scalar(Scalar::read(self.field_type, buf)?));
            }
            let elem = self.field_type.fixed_size().unwrap_or(width);
            let values = buf[..width]
                .chunks_exact(elem)
                .map(|chunk| Scalar::read(self.field_type, chunk))
                .collect::<Result<Vec<_>>>()?;
            return Ok(AttrValue::Multi(values));
        }

        let (count, header_len) = decode_count(buf)?;
        let Some(count) = count else {
            verify_data!(null_value, self.supports_null);
            return Ok(AttrValue::Null);
        };
        let body = &buf[header_len..];
        match (self.field_type, self.multi_value) {
            (FieldType::String, false) => Ok(AttrValue::String(utf8(body)?)),
            (FieldType::String, true) => {
                let mut items = Vec::with_capacity(count as usize);
                if count != 0 {
                    let item_len = body[0] as usize;
                    let offsets = &body[1..1 + count as usize * item_len];
                    let items_base = &body[1 + offsets.len()..];
                    for off in offsets.chunks_exact(item_len) {
                        let off = read_offset(off);
                        verify_data!(item_offset, off < items_base.len());
                        let (len, h) = decode_count(&items_base[off..])?;
                        let len = len.ok_or_else(|| {
                            Error::corrupt_data("multi_string", "null item length")
                        })? as usize;
                        verify_data!(item_len, off + h + len <= items_base.len());
                        items.push(utf8(&items_base[off + h..off + h + len])?);
                    }
                }
                Ok(AttrValue::MultiString(items))
            }
            (ty, _) => {
                let elem = ty.fixed_size().unwrap_or(1);
                let values = body
                    .chunks_exact(elem)
                    .map(|chunk| Scalar::read(ty, chunk))
                    .collect::<Result<Vec<_>>>()?;
                Ok(AttrValue::Multi(values))
            }
        }
    }

    fn cast(&self, s: Scalar) -> Result<Scalar> {
        s.cast(self.field_type).ok_or_else(|| {
            Error::invalid_arg(
                self.name.as_ref(),
                format!("{s:?} is not representable as {:?}", self.field_type),
            )
        })
    }

    fn len_to_count(&self, len: usize) -> Result<u32> {
        u32::try_from(len)
            .ok()
            .filter(|&c| c <= MAX_COUNT)
            .ok_or_else(|| Error::invalid_arg(self.name.as_ref(), "value too long"))
    }
}

pub fn encode_multi_string<S: AsRef<str>>(items: &[S], out: &mut Vec<u8>) -> Result<()> {
    let count = u32::try_from(items.len())
        .map_err(|_| Error::invalid_arg("items", "too many items"))?;
    encode_count(count, out)?;
    if items.is_empty() {
        return Ok(());
    }
    let mut payload = Vec::new();
    let mut offsets = Vec::with_capacity(items.len());
    for item in items {
        let item = item.as_ref().as_bytes();
        offsets.push(payload.len());
        let len = u32::try_from(item.len())
            .map_err(|_| Error::invalid_arg("items", "item too long"))?;
        encode_count(len, &mut payload)?;
        payload.extend_from_slice(item);
    }
    if payload.len() > u32::MAX as usize {
        return Err(Error::invalid_arg("items", "multi-string payload too long"));
    }
    let item_len = offset_item_len(payload.len());
    out.push(item_len as u8);
    for off in offsets {
        out.extend_from_slice(&(off as u32).to_le_bytes()[..item_len]);
    }
    out.extend_from_slice(&payload);
    Ok(())
}

/// Smallest offset width able to address a payload of `total` bytes.
pub fn offset_item_len(total: usize) -> usize {
    if total <= u8::MAX as usize {
        1
    } else if total <= u16::MAX as usize {
        2
    } else {
        4
    }
}

fn read_offset(bytes: &[u8]) -> usize {
    let mut buf = [0u8; 4];
    buf[..bytes.len()].copy_from_slice(bytes);
    u32::from_le_bytes(buf) as usize
}

/// Length of a multi-string value computed from its last item only.
fn multi_string_length(buf: &[u8], count: usize, header_len: usize) -> Result<usize> {
    if count == 0 {
        return Ok(header_len);
    }
    verify_data!(multi_string, buf.len() > header_len);
    let item_len = buf[header_len] as usize;
    verify_data!(offset_item_len, matches!(item_len, 1 | 2 | 4));
    let offsets_end = header_len + 1 + count * item_len;
    verify_data!(multi_string, buf.len() >= offsets_end);
    let last = read_offset(&buf[offsets_end - item_len..offsets_end]);
    let last_start = offsets_end + last;
    verify_data!(multi_string, buf.len() > last_start);
    let (len, h) = decode_count(&buf[last_start..])?;
    let len = len.ok_or_else(|| Error::corrupt_data("multi_string", "null item length"))?;
    Ok(last_start + h + len as usize)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::corrupt_data("string_value", e.to_string()))
}

#[cfg(test)]
mod tests {
    use strata_common::error::ErrorKind;

    use super::*;

    fn codec(field: FieldConfig) -> ValueCodec {
        ValueCodec::new(&field)
    }

    #[test]
    fn test_count_header_boundaries() {
        for (count, len) in [
            (0u32, 1usize),
            (127, 1),
            (128, 2),
            (0x3FFF, 2),
            (0x4000, 4),
            (MAX_COUNT, 4),
        ] {
            let mut out = Vec::new();
            encode_count(count, &mut out).unwrap();
            assert_eq!(out.len(), len, "count {count}");
            assert_eq!(count_header_len(out[0]), len);
            assert_eq!(decode_count(&out).unwrap(), (Some(count), len));
        }
        assert!(encode_count(NULL_COUNT, &mut Vec::new()).is_err());

        let mut out = Vec::new();
        encode_null(&mut out);
        assert_eq!(out, [0xFF; 4]);
        assert_eq!(decode_count(&out).unwrap(), (None, 4));
    }

    #[test]
    fn test_truncated_count_is_corrupt() {
        let err = decode_count(&[0x81]).unwrap_err();
        assert!(err.is_corruption());
        assert!(decode_count(&[]).unwrap_err().is_corruption());
        assert!(decode_count(&[0xC0, 0, 1]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_fixed_encoding_is_little_endian() {
        assert_eq!(encode_fixed(0x0102_0304u32), [4, 3, 2, 1]);
        assert_eq!(decode_fixed::<i16>(&[0xFE, 0xFF]).unwrap(), -2);
        assert_eq!(decode_fixed::<f64>(&encode_fixed(1.5f64)).unwrap(), 1.5);
        assert!(decode_fixed::<u64>(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_scalar_cast() {
        assert_eq!(Scalar::Int64(5).cast(FieldType::Int8), Some(Scalar::Int8(5)));
        assert_eq!(Scalar::Int64(300).cast(FieldType::UInt8), None);
        assert_eq!(Scalar::Int32(-1).cast(FieldType::UInt32), None);
        assert_eq!(Scalar::Int32(2).cast(FieldType::Double), Some(Scalar::Double(2.0)));
        assert_eq!(Scalar::Float(2.5).cast(FieldType::Int32), None);
        assert_eq!(Scalar::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Scalar::zero(FieldType::Float), Some(Scalar::Float(0.0)));
    }

    #[test]
    fn test_single_values() {
        let c = codec(FieldConfig::new(0, "price", FieldType::Int32));
        let buf = c.encode(&AttrValue::from(7i64)).unwrap();
        assert_eq!(buf, [7, 0, 0, 0]);
        assert_eq!(c.decode_length(&buf).unwrap(), 4);
        assert_eq!(c.decode(&buf).unwrap(), AttrValue::from(7i32));
        assert!(!c.is_null(&buf));

        let err = c.encode(&AttrValue::from("x")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
        let err = c.encode(&AttrValue::Null).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SchemaViolation { .. }));
    }

    #[test]
    fn test_string_values() {
        let c = codec(FieldConfig::new(0, "title", FieldType::String).nullable());
        let long = "a".repeat(200);
        let buf = c.encode(&AttrValue::from(long.as_str())).unwrap();
        assert_eq!(buf.len(), 202);
        assert_eq!(c.decode_length(&buf).unwrap(), 202);
        assert_eq!(c.decode(&buf).unwrap(), AttrValue::String(long));

        let null = c.encode(&AttrValue::Null).unwrap();
        assert!(c.is_null(&null));
        assert_eq!(c.decode(&null).unwrap(), AttrValue::Null);

        let empty = c.encode(&AttrValue::from("")).unwrap();
        assert_eq!(empty, [0]);
        assert!(!c.is_null(&empty));
        assert_eq!(c.default_value(), AttrValue::Null);
    }

    #[test]
    fn test_multi_value_counts_around_header_boundary() {
        let c = codec(FieldConfig::new(0, "ids", FieldType::UInt16).multi_value());
        for n in [0usize, 1, 127, 128, 129] {
            let value = AttrValue::multi((0..n).map(|i| i as u16));
            let buf = c.encode(&value).unwrap();
            let header = if n <= 127 { 1 } else { 2 };
            assert_eq!(buf.len(), header + 2 * n);
            assert_eq!(c.decode_length(&buf).unwrap(), buf.len());
            assert_eq!(c.decode(&buf).unwrap(), value);
        }
    }

    #[test]
    fn test_fixed_value_count() {
        let c = codec(FieldConfig::new(0, "vec", FieldType::Float).with_fixed_value_count(3));
        assert_eq!(c.fixed_width(), Some(12));
        let value = AttrValue::multi([1.0f32, 2.0, 3.0]);
        let buf = c.encode(&value).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(c.decode(&buf).unwrap(), value);
        assert!(c.encode(&AttrValue::multi([1.0f32])).is_err());
        assert_eq!(c.default_value(), AttrValue::multi([0.0f32, 0.0, 0.0]));
    }

    #[test]
    fn test_multi_string_layout() {
        let c = codec(FieldConfig::new(0, "tags", FieldType::String).multi_value());
        let buf = c.encode(&AttrValue::strings(["ab", "", "cde"])).unwrap();
        // count, offset width, offsets, then items with their own length headers.
        assert_eq!(
            buf,
            [3, 1, 0, 3, 4, 2, b'a', b'b', 0, 3, b'c', b'd', b'e']
        );
        assert_eq!(c.decode_length(&buf).unwrap(), buf.len());
        assert_eq!(
            c.decode(&buf).unwrap(),
            AttrValue::strings(["ab", "", "cde"])
        );

        let empty = c.encode(&AttrValue::strings(Vec::<String>::new())).unwrap();
        assert_eq!(empty, [0]);
        assert_eq!(c.decode_length(&empty).unwrap(), 1);
    }

    #[test]
    fn test_multi_string_wide_offsets() {
        let c = codec(FieldConfig::new(0, "docs", FieldType::String).multi_value());
        let items = vec!["x".repeat(300), "y".repeat(70_000), "z".to_string()];
        let buf = c.encode(&AttrValue::strings(items.clone())).unwrap();
        assert_eq!(buf[1], 4);
        assert_eq!(c.decode_length(&buf).unwrap(), buf.len());
        assert_eq!(c.decode(&buf).unwrap(), AttrValue::MultiString(items));
    }

    #[test]
    fn test_decode_length_ignores_following_values() {
        let c = codec(FieldConfig::new(0, "tags", FieldType::String).multi_value());
        let mut packed = c.encode(&AttrValue::strings(["one", "two"])).unwrap();
        let first_len = packed.len();
        packed.extend(c.encode(&AttrValue::strings(["three"])).unwrap());
        assert_eq!(c.decode_length(&packed).unwrap(), first_len);
        assert_eq!(c.decode_length(&packed[first_len..]).unwrap(), packed.len() - first_len);
    }

    #[test]
    fn test_truncated_values_are_corrupt() {
        let c = codec(FieldConfig::new(0, "tags", FieldType::String).multi_value());
        let buf = c.encode(&AttrValue::strings(["abc", "def"])).unwrap();
        for cut in 1..buf.len() {
            let err = c.decode_length(&buf[..cut]).unwrap_err();
            assert!(err.is_corruption(), "cut at {cut}");
        }

        let s = codec(FieldConfig::new(0, "title", FieldType::String));
        assert!(s.decode(&[2, 0xFF, 0xFE]).unwrap_err().is_corruption());
        // Null header for a field without null support.
        assert!(s.decode(&[0xFF; 4]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_random_multi_values_decode_to_input() {
        let mut rng = fastrand::Rng::with_seed(17);
        let c = codec(FieldConfig::new(0, "scores", FieldType::Int64).multi_value());
        for _ in 0..50 {
            let n = rng.usize(0..300);
            let value = AttrValue::multi((0..n).map(|_| rng.i64(..)));
            let buf = c.encode(&value).unwrap();
            assert_eq!(c.decode(&buf).unwrap(), value);
        }
    }
}
