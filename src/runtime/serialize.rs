//! Value serialization
//!
//! Values cross process boundaries as JSON through [`WireValue`], a serde
//! mirror of [`Value`]. Objects, blocks and chains are live references and
//! have no wire form.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::error::{SerializeError, SerializeResult};
use super::value::{Audio, Color, EnumValue, Image, Table, Value, ValueSet};

/// Serializable mirror of [`Value`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireValue {
    /// No value
    None,
    /// Wildcard marker
    Any,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Two integer lanes
    Int2([i64; 2]),
    /// Three integer lanes
    Int3([i32; 3]),
    /// Four integer lanes
    Int4([i32; 4]),
    /// Eight integer lanes
    Int8([i16; 8]),
    /// Sixteen integer lanes
    Int16(Vec<i8>),
    /// Float
    Float(f64),
    /// Two float lanes
    Float2([f64; 2]),
    /// Three float lanes
    Float3([f32; 3]),
    /// Four float lanes
    Float4([f32; 4]),
    /// RGBA color
    Color([u8; 4]),
    /// String
    String(String),
    /// Byte buffer
    Bytes(Vec<u8>),
    /// Filesystem path
    Path(String),
    /// Sequence
    Seq(Vec<WireValue>),
    /// Table, keys sorted
    Table(BTreeMap<String, WireValue>),
    /// Set
    Set(Vec<WireValue>),
    /// Image blob
    Image {
        /// Width in pixels
        width: u16,
        /// Height in pixels
        height: u16,
        /// Channels per pixel
        channels: u8,
        /// Pixel format flags
        flags: u8,
        /// Pixel data
        data: Vec<u8>,
    },
    /// Audio blob
    Audio {
        /// Samples per second
        sample_rate: u32,
        /// Interleaved channels
        channels: u16,
        /// Sample data
        samples: Vec<f32>,
    },
    /// Vendor enumeration
    Enum {
        /// Vendor id
        vendor_id: i32,
        /// Type id
        type_id: i32,
        /// Enumerated value
        value: i32,
    },
}

impl WireValue {
    /// Convert a runtime value into its wire form
    pub fn from_value(value: &Value) -> SerializeResult<Self> {
        Ok(match value {
            Value::None => WireValue::None,
            Value::Any => WireValue::Any,
            Value::Bool(v) => WireValue::Bool(*v),
            Value::Int(v) => WireValue::Int(*v),
            Value::Int2(v) => WireValue::Int2(*v),
            Value::Int3(v) => WireValue::Int3(*v),
            Value::Int4(v) => WireValue::Int4(*v),
            Value::Int8(v) => WireValue::Int8(*v),
            Value::Int16(v) => WireValue::Int16(v.to_vec()),
            Value::Float(v) => WireValue::Float(*v),
            Value::Float2(v) => WireValue::Float2(*v),
            Value::Float3(v) => WireValue::Float3(*v),
            Value::Float4(v) => WireValue::Float4(*v),
            Value::Color(c) => WireValue::Color([c.r, c.g, c.b, c.a]),
            Value::String(v) => WireValue::String(v.clone()),
            Value::Bytes(v) => WireValue::Bytes(v.clone()),
            Value::Path(v) => WireValue::Path(v.clone()),
            Value::Seq(items) => {
                WireValue::Seq(items.iter().map(WireValue::from_value).collect::<SerializeResult<_>>()?)
            }
            Value::Table(table) => WireValue::Table(
                table
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), WireValue::from_value(value)?)))
                    .collect::<SerializeResult<_>>()?,
            ),
            Value::Set(set) => {
                WireValue::Set(set.iter().map(WireValue::from_value).collect::<SerializeResult<_>>()?)
            }
            Value::Image(img) => WireValue::Image {
                width: img.width,
                height: img.height,
                channels: img.channels,
                flags: img.flags,
                data: img.data.clone(),
            },
            Value::Audio(audio) => WireValue::Audio {
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                samples: audio.samples.clone(),
            },
            Value::Enum(e) => WireValue::Enum {
                vendor_id: e.vendor_id,
                type_id: e.type_id,
                value: e.value,
            },
            Value::Object(_) | Value::Block(_) | Value::Chain(_) => {
                return Err(SerializeError::Unsupported(value.basic_type().to_string()));
            }
        })
    }

    /// Convert back into a runtime value
    pub fn into_value(self) -> SerializeResult<Value> {
        Ok(match self {
            WireValue::None => Value::None,
            WireValue::Any => Value::Any,
            WireValue::Bool(v) => Value::Bool(v),
            WireValue::Int(v) => Value::Int(v),
            WireValue::Int2(v) => Value::Int2(v),
            WireValue::Int3(v) => Value::Int3(v),
            WireValue::Int4(v) => Value::Int4(v),
            WireValue::Int8(v) => Value::Int8(v),
            WireValue::Int16(v) => {
                let lanes: [i8; 16] = v.try_into().map_err(|v: Vec<i8>| {
                    SerializeError::Invalid(format!("Int16 needs 16 lanes, got {}", v.len()))
                })?;
                Value::Int16(lanes)
            }
            WireValue::Float(v) => Value::Float(v),
            WireValue::Float2(v) => Value::Float2(v),
            WireValue::Float3(v) => Value::Float3(v),
            WireValue::Float4(v) => Value::Float4(v),
            WireValue::Color([r, g, b, a]) => Value::Color(Color::new(r, g, b, a)),
            WireValue::String(v) => Value::String(v),
            WireValue::Bytes(v) => Value::Bytes(v),
            WireValue::Path(v) => Value::Path(v),
            WireValue::Seq(items) => Value::Seq(
                items
                    .into_iter()
                    .map(WireValue::into_value)
                    .collect::<SerializeResult<_>>()?,
            ),
            WireValue::Table(entries) => Value::Table(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((key, value.into_value()?)))
                    .collect::<SerializeResult<Table>>()?,
            ),
            WireValue::Set(items) => Value::Set(
                items
                    .into_iter()
                    .map(WireValue::into_value)
                    .collect::<SerializeResult<ValueSet>>()?,
            ),
            WireValue::Image {
                width,
                height,
                channels,
                flags,
                data,
            } => Value::Image(Image {
                width,
                height,
                channels,
                flags,
                data,
            }),
            WireValue::Audio {
                sample_rate,
                channels,
                samples,
            } => Value::Audio(Audio {
                sample_rate,
                channels,
                samples,
            }),
            WireValue::Enum {
                vendor_id,
                type_id,
                value,
            } => Value::Enum(EnumValue {
                vendor_id,
                type_id,
                value,
            }),
        })
    }
}

/// Write a value as JSON
pub fn serialize(value: &Value, writer: impl Write) -> SerializeResult<()> {
    let wire = WireValue::from_value(value)?;
    serde_json::to_writer(writer, &wire)?;
    Ok(())
}

/// Read a value written by [`serialize`]
pub fn deserialize(reader: impl Read) -> SerializeResult<Value> {
    let wire: WireValue = serde_json::from_reader(reader)?;
    wire.into_value()
}

/// Convert plain JSON into a value: integers become `Int`, other numbers
/// `Float`, arrays `Seq` and objects `Table`
pub fn value_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Seq(items.iter().map(value_from_json).collect()),
        serde_json::Value::Object(map) => Value::Table(
            map.iter()
                .map(|(key, value)| (key.clone(), value_from_json(value)))
                .collect(),
        ),
    }
}
