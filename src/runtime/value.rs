//! Runtime values
//!
//! [`Value`] is the closed tagged union every block consumes and produces.
//! Heap payloads (strings, bytes, sequences, tables, sets, images, audio)
//! are exclusively owned by the slot holding them. `Clone::clone_from` is
//! the deep-copy primitive: it reuses the destination's existing capacity
//! whenever the shapes line up, which is what variable assignment relies on
//! to avoid reallocating every activation.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::block::BlockRef;
use super::chain::ChainRef;
use super::error::{ValueError, ValueResult};
use super::types::BasicType;

/// Tolerance used by float equality (single precision epsilon, as floats
/// frequently round-trip through f32 lanes)
pub const FLOAT_EPSILON: f64 = f32::EPSILON as f64;

/// Image flag: 16-bit integer channels
pub const IMAGE_FLAGS_16BITS_INT: u8 = 1 << 1;
/// Image flag: 32-bit float channels
pub const IMAGE_FLAGS_32BITS_FLOAT: u8 = 1 << 2;

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Color {
    /// Create a color from components
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    fn lanes(&self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// String-keyed map of values; insertion order is irrelevant
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: HashMap<String, Value>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Look up a value mutably
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Keys in sorted order (used wherever a deterministic order matters)
    pub fn sorted_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    /// Remove every entry, keeping the allocation
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn clone_entries_from(&mut self, source: &Table) {
        self.entries.retain(|key, _| source.entries.contains_key(key));
        for (key, value) in &source.entries {
            match self.entries.get_mut(key) {
                Some(existing) => existing.clone_from(value),
                None => {
                    self.entries.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(key, value)| other.entries.get(key) == Some(value))
    }
}

impl FromIterator<(String, Value)> for Table {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Set of values, unique under structural equality
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    items: Vec<Value>,
}

impl ValueSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; returns false if an equal value was already present
    pub fn insert(&mut self, value: Value) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    /// Whether an equal value is present
    pub fn contains(&self, value: &Value) -> bool {
        self.items.iter().any(|item| item == value)
    }

    /// Remove an equal value
    pub fn remove(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|item| item == value) {
            Some(idx) => {
                self.items.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over elements in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len() && self.items.iter().all(|item| other.contains(item))
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Raw image blob
#[derive(Debug, Clone, Default)]
pub struct Image {
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    /// Channels per pixel
    pub channels: u8,
    /// Pixel format flags
    pub flags: u8,
    /// Pixel data
    pub data: Vec<u8>,
}

impl Image {
    /// Bytes per channel, derived from the flags
    pub fn pixel_size(&self) -> usize {
        if self.flags & IMAGE_FLAGS_16BITS_INT == IMAGE_FLAGS_16BITS_INT {
            2
        } else if self.flags & IMAGE_FLAGS_32BITS_FLOAT == IMAGE_FLAGS_32BITS_FLOAT {
            4
        } else {
            1
        }
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize * self.pixel_size()
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        let len = self.byte_len();
        self.pixel_size() == other.pixel_size()
            && self.channels == other.channels
            && self.width == other.width
            && self.height == other.height
            && self.data.get(..len) == other.data.get(..len)
    }
}

/// Raw audio blob (interleaved samples)
#[derive(Debug, Clone, Default)]
pub struct Audio {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channels
    pub channels: u16,
    /// Sample data
    pub samples: Vec<f32>,
}

impl Audio {
    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

impl PartialEq for Audio {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.samples.len() == other.samples.len()
            && self
                .samples
                .iter()
                .zip(&other.samples)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Optional behaviour attached to an object type
///
/// `reference` and `release` fire when an object value is cloned and
/// dropped, mirroring the lifetime of the slot that holds it.
pub trait ObjectInfo {
    /// Display name of the object type
    fn name(&self) -> &str;

    /// Called when a new value slot starts referencing the object
    fn reference(&self, _object: &Rc<dyn Any>) {}

    /// Called when a value slot stops referencing the object
    fn release(&self, _object: &Rc<dyn Any>) {}

    /// Custom structural hash; `None` falls back to identity
    fn hash(&self, _object: &dyn Any) -> Option<u64> {
        None
    }
}

/// Opaque object tagged by vendor and type id
pub struct ObjectValue {
    /// Vendor id
    pub vendor_id: i32,
    /// Type id within the vendor
    pub type_id: i32,
    payload: Rc<dyn Any>,
    info: Option<Rc<dyn ObjectInfo>>,
}

impl ObjectValue {
    /// Wrap a payload with no lifetime hooks
    pub fn new(vendor_id: i32, type_id: i32, payload: Rc<dyn Any>) -> Self {
        Self {
            vendor_id,
            type_id,
            payload,
            info: None,
        }
    }

    /// Wrap a payload with reference/release/hash hooks
    pub fn with_info(
        vendor_id: i32,
        type_id: i32,
        payload: Rc<dyn Any>,
        info: Rc<dyn ObjectInfo>,
    ) -> Self {
        info.reference(&payload);
        Self {
            vendor_id,
            type_id,
            payload,
            info: Some(info),
        }
    }

    /// Downcast the payload
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// The attached hooks, if any
    pub fn info(&self) -> Option<&Rc<dyn ObjectInfo>> {
        self.info.as_ref()
    }

    /// Whether both values point at the same payload
    pub fn same_payload(&self, other: &ObjectValue) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }

    pub(crate) fn payload(&self) -> &Rc<dyn Any> {
        &self.payload
    }
}

impl Clone for ObjectValue {
    fn clone(&self) -> Self {
        if let Some(info) = &self.info {
            info.reference(&self.payload);
        }
        Self {
            vendor_id: self.vendor_id,
            type_id: self.type_id,
            payload: Rc::clone(&self.payload),
            info: self.info.clone(),
        }
    }
}

impl Drop for ObjectValue {
    fn drop(&mut self) {
        if let Some(info) = &self.info {
            info.release(&self.payload);
        }
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("vendor_id", &self.vendor_id)
            .field("type_id", &self.type_id)
            .field("info", &self.info.as_ref().map(|info| info.name().to_string()))
            .finish()
    }
}

/// Integer enumeration tagged by vendor and type id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue {
    /// Vendor id
    pub vendor_id: i32,
    /// Type id within the vendor
    pub type_id: i32,
    /// The enumerated value
    pub value: i32,
}

/// Dynamically typed runtime value
#[derive(Debug, Default)]
pub enum Value {
    /// No value; also the output of pure flow-control blocks
    #[default]
    None,
    /// Wildcard marker
    Any,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// Two 64-bit lanes
    Int2([i64; 2]),
    /// Three 32-bit lanes
    Int3([i32; 3]),
    /// Four 32-bit lanes
    Int4([i32; 4]),
    /// Eight 16-bit lanes
    Int8([i16; 8]),
    /// Sixteen 8-bit lanes
    Int16([i8; 16]),
    /// 64-bit float
    Float(f64),
    /// Two 64-bit float lanes
    Float2([f64; 2]),
    /// Three 32-bit float lanes
    Float3([f32; 3]),
    /// Four 32-bit float lanes
    Float4([f32; 4]),
    /// RGBA color
    Color(Color),
    /// UTF-8 string
    String(String),
    /// Byte buffer
    Bytes(Vec<u8>),
    /// Filesystem path
    Path(String),
    /// Ordered heterogeneous sequence
    Seq(Vec<Value>),
    /// String-keyed map
    Table(Table),
    /// Value-keyed set
    Set(ValueSet),
    /// Image blob
    Image(Image),
    /// Audio blob
    Audio(Audio),
    /// Opaque vendor object
    Object(ObjectValue),
    /// Vendor enumeration
    Enum(EnumValue),
    /// A block instance
    Block(BlockRef),
    /// A chain handle
    Chain(ChainRef),
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::None => Value::None,
            Value::Any => Value::Any,
            Value::Bool(v) => Value::Bool(*v),
            Value::Int(v) => Value::Int(*v),
            Value::Int2(v) => Value::Int2(*v),
            Value::Int3(v) => Value::Int3(*v),
            Value::Int4(v) => Value::Int4(*v),
            Value::Int8(v) => Value::Int8(*v),
            Value::Int16(v) => Value::Int16(*v),
            Value::Float(v) => Value::Float(*v),
            Value::Float2(v) => Value::Float2(*v),
            Value::Float3(v) => Value::Float3(*v),
            Value::Float4(v) => Value::Float4(*v),
            Value::Color(v) => Value::Color(*v),
            Value::String(v) => Value::String(v.clone()),
            Value::Bytes(v) => Value::Bytes(v.clone()),
            Value::Path(v) => Value::Path(v.clone()),
            Value::Seq(v) => Value::Seq(v.clone()),
            Value::Table(v) => Value::Table(v.clone()),
            Value::Set(v) => Value::Set(v.clone()),
            Value::Image(v) => Value::Image(v.clone()),
            Value::Audio(v) => Value::Audio(v.clone()),
            Value::Object(v) => Value::Object(v.clone()),
            Value::Enum(v) => Value::Enum(*v),
            Value::Block(v) => Value::Block(v.clone()),
            Value::Chain(v) => Value::Chain(v.clone()),
        }
    }

    /// Deep copy reusing this slot's heap capacity when the shape matches.
    fn clone_from(&mut self, source: &Self) {
        match (self, source) {
            (Value::String(dst), Value::String(src)) => dst.clone_from(src),
            (Value::Path(dst), Value::Path(src)) => dst.clone_from(src),
            (Value::Bytes(dst), Value::Bytes(src)) => dst.clone_from(src),
            (Value::Seq(dst), Value::Seq(src)) => clone_seq_into(dst, src),
            (Value::Table(dst), Value::Table(src)) => dst.clone_entries_from(src),
            (Value::Image(dst), Value::Image(src)) => {
                dst.width = src.width;
                dst.height = src.height;
                dst.channels = src.channels;
                dst.flags = src.flags;
                dst.data.clone_from(&src.data);
            }
            (Value::Audio(dst), Value::Audio(src)) => {
                dst.sample_rate = src.sample_rate;
                dst.channels = src.channels;
                dst.samples.clone_from(&src.samples);
            }
            (dst, src) => *dst = src.clone(),
        }
    }
}

fn clone_seq_into(dst: &mut Vec<Value>, src: &[Value]) {
    dst.truncate(src.len());
    let reused = dst.len();
    for (slot, value) in dst.iter_mut().zip(src) {
        slot.clone_from(value);
    }
    dst.extend_from_slice(&src[reused..]);
}

impl Value {
    /// Create a string value
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// The basic type tag of this value
    pub fn basic_type(&self) -> BasicType {
        match self {
            Value::None => BasicType::None,
            Value::Any => BasicType::Any,
            Value::Bool(_) => BasicType::Bool,
            Value::Int(_) => BasicType::Int,
            Value::Int2(_) => BasicType::Int2,
            Value::Int3(_) => BasicType::Int3,
            Value::Int4(_) => BasicType::Int4,
            Value::Int8(_) => BasicType::Int8,
            Value::Int16(_) => BasicType::Int16,
            Value::Float(_) => BasicType::Float,
            Value::Float2(_) => BasicType::Float2,
            Value::Float3(_) => BasicType::Float3,
            Value::Float4(_) => BasicType::Float4,
            Value::Color(_) => BasicType::Color,
            Value::String(_) => BasicType::String,
            Value::Bytes(_) => BasicType::Bytes,
            Value::Path(_) => BasicType::Path,
            Value::Seq(_) => BasicType::Seq,
            Value::Table(_) => BasicType::Table,
            Value::Set(_) => BasicType::Set,
            Value::Image(_) => BasicType::Image,
            Value::Audio(_) => BasicType::Audio,
            Value::Object(_) => BasicType::Object,
            Value::Enum(_) => BasicType::Enum,
            Value::Block(_) => BasicType::Block,
            Value::Chain(_) => BasicType::Chain,
        }
    }

    /// Free any owned payload and reset the slot to `None`. Idempotent.
    pub fn destroy(&mut self) {
        *self = Value::None;
    }

    /// Whether this is `None`
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String or path payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) | Value::Path(v) => Some(v),
            _ => None,
        }
    }

    /// Sequence payload
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(v) => Some(v),
            _ => None,
        }
    }

    /// Table payload
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(v) => Some(v),
            _ => None,
        }
    }

    /// Chain payload
    pub fn as_chain(&self) -> Option<&ChainRef> {
        match self {
            Value::Chain(v) => Some(v),
            _ => None,
        }
    }

    /// Block payload
    pub fn as_block(&self) -> Option<&BlockRef> {
        match self {
            Value::Block(v) => Some(v),
            _ => None,
        }
    }

    fn mismatch(&self, other: &Value) -> ValueError {
        ValueError::ComparisonTypeMismatch {
            left: self.basic_type().to_string(),
            right: other.basic_type().to_string(),
        }
    }

    /// Strict `<`. Values of different tags cannot be ordered.
    pub fn less(&self, other: &Value) -> ValueResult<bool> {
        self.ordering(other, false)
    }

    /// `<=`. Values of different tags cannot be ordered.
    pub fn less_equal(&self, other: &Value) -> ValueResult<bool> {
        self.ordering(other, true)
    }

    /// Strict `>`
    pub fn greater(&self, other: &Value) -> ValueResult<bool> {
        other.less(self)
    }

    /// `>=`
    pub fn greater_equal(&self, other: &Value) -> ValueResult<bool> {
        other.less_equal(self)
    }

    /// Three-way comparison built from `==` and `<`
    pub fn compare(&self, other: &Value) -> ValueResult<Ordering> {
        if self.basic_type() != other.basic_type() {
            return Err(self.mismatch(other));
        }
        if self == other {
            Ok(Ordering::Equal)
        } else if self.less(other)? {
            Ok(Ordering::Less)
        } else {
            Ok(Ordering::Greater)
        }
    }

    fn ordering(&self, other: &Value, or_equal: bool) -> ValueResult<bool> {
        let ord = |a: bool, b: bool| if or_equal { b } else { a };
        match (self, other) {
            (Value::Enum(a), Value::Enum(b)) => {
                if a.vendor_id != b.vendor_id || a.type_id != b.type_id {
                    return Err(ValueError::EnumKindMismatch);
                }
                Ok(ord(a.value < b.value, a.value <= b.value))
            }
            (Value::Bool(a), Value::Bool(b)) => Ok(ord(a < b, a <= b)),
            (Value::Int(a), Value::Int(b)) => Ok(ord(a < b, a <= b)),
            (Value::Float(a), Value::Float(b)) => Ok(ord(a < b, a <= b)),
            (Value::Int2(a), Value::Int2(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Int3(a), Value::Int3(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Int4(a), Value::Int4(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Int8(a), Value::Int8(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Int16(a), Value::Int16(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Float2(a), Value::Float2(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Float3(a), Value::Float3(b)) => Ok(lanes_less(a, b, or_equal)),
            (Value::Float4(a), Value::Float4(b)) => Ok(lanes_less(a, b, or_equal)),
            // colors: `<` holds if any channel is lower, `<=` only if every
            // channel is lower or equal
            (Value::Color(a), Value::Color(b)) => {
                let (a, b) = (a.lanes(), b.lanes());
                if or_equal {
                    Ok(a.iter().zip(&b).all(|(x, y)| x <= y))
                } else {
                    Ok(a.iter().zip(&b).any(|(x, y)| x < y))
                }
            }
            (Value::String(a), Value::String(b)) | (Value::Path(a), Value::Path(b)) => {
                Ok(ord(a < b, a <= b))
            }
            (Value::Bytes(a), Value::Bytes(b)) => Ok(ord(a < b, a <= b)),
            (Value::Seq(a), Value::Seq(b)) => seq_less(a, b, or_equal),
            (Value::Table(a), Value::Table(b)) => table_less(a, b, or_equal),
            (a, b) if a.basic_type() != b.basic_type() => Err(a.mismatch(b)),
            (a, _) => Err(ValueError::UnsupportedComparison(
                a.basic_type().to_string(),
            )),
        }
    }
}

fn lanes_less<T: PartialOrd>(a: &[T], b: &[T], or_equal: bool) -> bool {
    for (x, y) in a.iter().zip(b) {
        if x < y {
            return true;
        } else if x > y {
            return false;
        }
    }
    or_equal
}

fn seq_less(a: &[Value], b: &[Value], or_equal: bool) -> ValueResult<bool> {
    for (x, y) in a.iter().zip(b) {
        if x != y {
            return x.ordering(y, or_equal);
        }
    }
    Ok(if or_equal {
        a.len() <= b.len()
    } else {
        a.len() < b.len()
    })
}

fn table_less(a: &Table, b: &Table, or_equal: bool) -> ValueResult<bool> {
    let (akeys, bkeys) = (a.sorted_keys(), b.sorted_keys());
    for (ka, kb) in akeys.iter().zip(&bkeys) {
        if ka != kb {
            return Ok(ka < kb);
        }
        if let (Some(va), Some(vb)) = (a.get(ka), b.get(kb)) {
            if va != vb {
                return va.ordering(vb, or_equal);
            }
        }
    }
    Ok(if or_equal {
        akeys.len() <= bkeys.len()
    } else {
        akeys.len() < bkeys.len()
    })
}

fn floats_eq(a: &[f64], b: &[f64]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= FLOAT_EPSILON)
}

fn floats32_eq(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= f32::EPSILON)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Any, Value::Any) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int2(a), Value::Int2(b)) => a == b,
            (Value::Int3(a), Value::Int3(b)) => a == b,
            (Value::Int4(a), Value::Int4(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => (a - b).abs() <= FLOAT_EPSILON,
            (Value::Float2(a), Value::Float2(b)) => floats_eq(a, b),
            (Value::Float3(a), Value::Float3(b)) => floats32_eq(a, b),
            (Value::Float4(a), Value::Float4(b)) => floats32_eq(a, b),
            (Value::Color(a), Value::Color(b)) => a == b,
            (Value::String(a), Value::String(b)) | (Value::Path(a), Value::Path(b)) => {
                std::ptr::eq(a.as_ptr(), b.as_ptr()) && a.len() == b.len() || a == b
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Image(a), Value::Image(b)) => a == b,
            (Value::Audio(a), Value::Audio(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                a.vendor_id == b.vendor_id && a.type_id == b.type_id && a.same_payload(b)
            }
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => a.ptr_eq(b),
            (Value::Chain(a), Value::Chain(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl From<Table> for Value {
    fn from(v: Table) -> Self {
        Value::Table(v)
    }
}

impl From<Color> for Value {
    fn from(v: Color) -> Self {
        Value::Color(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Any => write!(f, "any"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Int2(v) => write!(f, "{:?}", v),
            Value::Int3(v) => write!(f, "{:?}", v),
            Value::Int4(v) => write!(f, "{:?}", v),
            Value::Int8(v) => write!(f, "{:?}", v),
            Value::Int16(v) => write!(f, "{:?}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Float2(v) => write!(f, "{:?}", v),
            Value::Float3(v) => write!(f, "{:?}", v),
            Value::Float4(v) => write!(f, "{:?}", v),
            Value::Color(c) => write!(f, "#{:02x}{:02x}{:02x}{:02x}", c.r, c.g, c.b, c.a),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Path(v) => write!(f, "path:{}", v),
            Value::Bytes(v) => write!(f, "bytes[{}]", v.len()),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Table(table) => {
                write!(f, "{{")?;
                for (idx, key) in table.sorted_keys().into_iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    if let Some(value) = table.get(key) {
                        write!(f, "{:?}: {}", key, value)?;
                    }
                }
                write!(f, "}}")
            }
            Value::Set(set) => write!(f, "set[{}]", set.len()),
            Value::Image(img) => write!(f, "image[{}x{}x{}]", img.width, img.height, img.channels),
            Value::Audio(audio) => write!(f, "audio[{}x{}]", audio.frames(), audio.channels),
            Value::Object(obj) => write!(f, "object[{}:{}]", obj.vendor_id, obj.type_id),
            Value::Enum(e) => write!(f, "enum[{}:{}]={}", e.vendor_id, e.type_id, e.value),
            Value::Block(block) => write!(f, "block:{}", block.name()),
            Value::Chain(chain) => write!(f, "chain:{}", chain.name()),
        }
    }
}
