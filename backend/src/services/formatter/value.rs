//! Canonical JSON rendering for values serde_json has no native form for.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use serde::ser::{
    Error as _, SerializeSeq, SerializeStruct, SerializeTuple, SerializeTupleStruct,
};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::cell::Cell;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Debug, Display};
use uuid::Uuid;

/// Conversion into the value written to an audit record.
pub trait ToAuditValue {
    fn to_audit_value(&self) -> Value;
}

impl<Tz> ToAuditValue for DateTime<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    fn to_audit_value(&self) -> Value {
        Value::String(self.to_rfc3339_opts(SecondsFormat::AutoSi, false))
    }
}

impl ToAuditValue for NaiveDateTime {
    fn to_audit_value(&self) -> Value {
        Value::String(self.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }
}

impl ToAuditValue for NaiveDate {
    fn to_audit_value(&self) -> Value {
        Value::String(self.format("%Y-%m-%d").to_string())
    }
}

impl ToAuditValue for NaiveTime {
    fn to_audit_value(&self) -> Value {
        Value::String(self.format("%H:%M:%S%.f").to_string())
    }
}

impl ToAuditValue for BigDecimal {
    fn to_audit_value(&self) -> Value {
        self.to_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(self.to_string()))
    }
}

impl ToAuditValue for Uuid {
    fn to_audit_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToAuditValue for [u8] {
    fn to_audit_value(&self) -> Value {
        Value::String(String::from_utf8_lossy(self).into_owned())
    }
}

impl ToAuditValue for Vec<u8> {
    fn to_audit_value(&self) -> Value {
        self.as_slice().to_audit_value()
    }
}

impl<T: ToAuditValue, S> ToAuditValue for HashSet<T, S> {
    fn to_audit_value(&self) -> Value {
        Value::Array(self.iter().map(ToAuditValue::to_audit_value).collect())
    }
}

impl<T: ToAuditValue> ToAuditValue for BTreeSet<T> {
    fn to_audit_value(&self) -> Value {
        Value::Array(self.iter().map(ToAuditValue::to_audit_value).collect())
    }
}

impl<T: ToAuditValue> ToAuditValue for Option<T> {
    fn to_audit_value(&self) -> Value {
        self.as_ref()
            .map(ToAuditValue::to_audit_value)
            .unwrap_or(Value::Null)
    }
}

impl ToAuditValue for str {
    fn to_audit_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToAuditValue for String {
    fn to_audit_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToAuditValue for bool {
    fn to_audit_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToAuditValue for i64 {
    fn to_audit_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToAuditValue for u64 {
    fn to_audit_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToAuditValue for f64 {
    fn to_audit_value(&self) -> Value {
        Number::from_f64(*self)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(self.to_string()))
    }
}

impl ToAuditValue for Value {
    fn to_audit_value(&self) -> Value {
        self.clone()
    }
}

/// Writes any displayable value as its string representation.
pub struct Displayed<T>(pub T);

impl<T: Display> ToAuditValue for Displayed<T> {
    fn to_audit_value(&self) -> Value {
        Value::String(self.0.to_string())
    }
}

impl<T: Display> Debug for Displayed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `serialize_with` helper for fields whose audit form differs from their
/// serde form, such as decimals.
pub fn serialize_audit<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: ToAuditValue + ?Sized,
    S: Serializer,
{
    value.to_audit_value().serialize(serializer)
}

/// Serializes `value` into its audit representation.
///
/// Byte sequences become text, and a field or map entry that fails to
/// serialize is replaced by a string while its siblings are kept. Only when
/// the value as a whole is rejected does this fall back to its debug string.
pub fn to_value_lossy<T>(value: &T) -> Value
where
    T: Serialize + Debug + ?Sized,
{
    value
        .serialize(AuditValueSerializer::new())
        .unwrap_or_else(|err| {
            tracing::debug!(error = %err, "Falling back to string form for audit value");
            Value::String(format!("{:?}", value))
        })
}

fn field_value_lossy<T>(value: &T) -> Value
where
    T: Serialize + ?Sized,
{
    value
        .serialize(AuditValueSerializer::new())
        .unwrap_or_else(|err| {
            tracing::debug!(error = %err, "Falling back to string form for audit field");
            Value::String(format!("<unserializable: {}>", err))
        })
}

/// Builds a [`Value`] the way `serde_json::to_value` does, with the audit
/// conversions applied.
struct AuditValueSerializer<'a> {
    saw_byte: Option<&'a Cell<bool>>,
}

impl AuditValueSerializer<'_> {
    fn new() -> Self {
        Self { saw_byte: None }
    }
}

fn bytes_to_text(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl<'a> Serializer for AuditValueSerializer<'a> {
    type Ok = Value;
    type Error = serde_json::Error;

    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeMap;
    type SerializeStruct = SerializeMap;
    type SerializeStructVariant = SerializeStructVariant;

    fn serialize_bool(self, v: bool) -> Result<Value, Self::Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, Self::Error> {
        if let Some(saw_byte) = self.saw_byte {
            saw_byte.set(true);
        }
        Ok(Value::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, Self::Error> {
        Ok(Value::from(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, Self::Error> {
        Ok(float_value(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, Self::Error> {
        Ok(float_value(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, Self::Error> {
        Ok(bytes_to_text(v))
    }

    fn serialize_none(self) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value, Self::Error> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let mut object = Map::new();
        object.insert(variant.to_string(), field_value_lossy(value));
        Ok(Value::Object(object))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec, Self::Error> {
        Ok(SerializeVec::new(len, true))
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeVec, Self::Error> {
        Ok(SerializeVec::new(Some(len), false))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeVec, Self::Error> {
        Ok(SerializeVec::new(Some(len), false))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeTupleVariant, Self::Error> {
        Ok(SerializeTupleVariant {
            variant,
            items: SerializeVec::new(Some(len), false),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<SerializeMap, Self::Error> {
        Ok(SerializeMap::new(len))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<SerializeMap, Self::Error> {
        Ok(SerializeMap::new(Some(len)))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeStructVariant, Self::Error> {
        Ok(SerializeStructVariant {
            variant,
            fields: SerializeMap::new(Some(len)),
        })
    }
}

/// Sequence under construction; a non-empty sequence made only of `u8`
/// elements is written as text.
struct SerializeVec {
    items: Vec<Value>,
    detect_bytes: bool,
    all_bytes: bool,
}

impl SerializeVec {
    fn new(len: Option<usize>, detect_bytes: bool) -> Self {
        Self {
            items: Vec::with_capacity(len.unwrap_or(0)),
            detect_bytes,
            all_bytes: detect_bytes,
        }
    }

    fn push<T>(&mut self, value: &T) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        let saw_byte = Cell::new(false);
        let item = value.serialize(AuditValueSerializer {
            saw_byte: self.detect_bytes.then_some(&saw_byte),
        })?;
        self.all_bytes &= saw_byte.get() && item.is_u64();
        self.items.push(item);
        Ok(())
    }

    fn finish(self) -> Value {
        if self.all_bytes && !self.items.is_empty() {
            let bytes: Vec<u8> = self
                .items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|byte| u8::try_from(byte).ok())
                .collect();
            return bytes_to_text(&bytes);
        }
        Value::Array(self.items)
    }
}

impl SerializeSeq for SerializeVec {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(self.finish())
    }
}

impl SerializeTuple for SerializeVec {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(self.finish())
    }
}

impl SerializeTupleStruct for SerializeVec {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(self.finish())
    }
}

struct SerializeTupleVariant {
    variant: &'static str,
    items: SerializeVec,
}

impl serde::ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.items.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        let mut object = Map::new();
        object.insert(self.variant.to_string(), self.items.finish());
        Ok(Value::Object(object))
    }
}

/// Map or struct under construction. Entries are serialized one at a time so
/// a failing entry only degrades itself.
struct SerializeMap {
    map: Map<String, Value>,
    next_key: Option<String>,
}

impl SerializeMap {
    fn new(_len: Option<usize>) -> Self {
        Self {
            map: Map::new(),
            next_key: None,
        }
    }
}

fn map_key(key: Value) -> Result<String, serde_json::Error> {
    match key {
        Value::String(key) => Ok(key),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(serde_json::Error::custom("audit map keys must be scalars")),
    }
}

impl serde::ser::SerializeMap for SerializeMap {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.next_key = Some(map_key(key.serialize(AuditValueSerializer::new())?)?);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| serde_json::Error::custom("map value without a key"))?;
        self.map.insert(key, field_value_lossy(value));
        Ok(())
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Value::Object(self.map))
    }
}

impl SerializeStruct for SerializeMap {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.map.insert(key.to_string(), field_value_lossy(value));
        Ok(())
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Value::Object(self.map))
    }
}

struct SerializeStructVariant {
    variant: &'static str,
    fields: SerializeMap,
}

impl serde::ser::SerializeStructVariant for SerializeStructVariant {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        SerializeStruct::serialize_field(&mut self.fields, key, value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        let mut object = Map::new();
        object.insert(self.variant.to_string(), Value::Object(self.fields.map));
        Ok(Value::Object(object))
    }
}

/// Re-parses a JSON-encoded string into a structured value; anything else is
/// returned unchanged.
pub fn reparse_json_string(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}
