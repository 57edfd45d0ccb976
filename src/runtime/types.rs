//! Structural type descriptions and type matching
//!
//! A [`TypeInfo`] describes the shape a [`Value`] must have. Composition
//! propagates these through a chain and uses [`match_types`] to decide
//! whether a producer's output is acceptable to a consumer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Recursion guard for self-referential type descriptions
const MAX_MATCH_DEPTH: usize = 64;

/// Basic type tag shared by values and type descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BasicType {
    /// No value
    None,
    /// Wildcard
    Any,
    /// Boolean
    Bool,
    /// 64-bit integer
    Int,
    /// Two integer lanes
    Int2,
    /// Three integer lanes
    Int3,
    /// Four integer lanes
    Int4,
    /// Eight integer lanes
    Int8,
    /// Sixteen integer lanes
    Int16,
    /// 64-bit float
    Float,
    /// Two float lanes
    Float2,
    /// Three float lanes
    Float3,
    /// Four float lanes
    Float4,
    /// RGBA color
    Color,
    /// String
    String,
    /// Byte buffer
    Bytes,
    /// Filesystem path
    Path,
    /// Sequence
    Seq,
    /// Table
    Table,
    /// Set
    Set,
    /// Image
    Image,
    /// Audio
    Audio,
    /// Vendor object
    Object,
    /// Vendor enumeration
    Enum,
    /// Block instance
    Block,
    /// Chain handle
    Chain,
}

impl BasicType {
    /// Whether this is one of the integer vector tags
    pub fn is_int_vector(self) -> bool {
        matches!(
            self,
            BasicType::Int2 | BasicType::Int3 | BasicType::Int4 | BasicType::Int8 | BasicType::Int16
        )
    }

    /// Whether this is one of the float vector tags
    pub fn is_float_vector(self) -> bool {
        matches!(
            self,
            BasicType::Float2 | BasicType::Float3 | BasicType::Float4
        )
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structural description of a value's shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeInfo {
    /// No value
    None,
    /// Matches anything
    Any,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Two integer lanes
    Int2,
    /// Three integer lanes
    Int3,
    /// Four integer lanes
    Int4,
    /// Eight integer lanes
    Int8,
    /// Sixteen integer lanes
    Int16,
    /// Float
    Float,
    /// Two float lanes
    Float2,
    /// Three float lanes
    Float3,
    /// Four float lanes
    Float4,
    /// Color
    Color,
    /// String
    String,
    /// Bytes
    Bytes,
    /// Path
    Path,
    /// Image
    Image,
    /// Audio
    Audio,
    /// Block instance
    Block,
    /// Chain handle
    Chain,
    /// Sequence; empty `types` means unconstrained elements
    Seq {
        /// Admissible element types
        types: Vec<TypeInfo>,
        /// Minimum length guaranteed by the producer (0 = unknown)
        fixed_size: usize,
    },
    /// Table; `keys` are parallel to `types` when the table is closed
    Table {
        /// Declared keys (empty for open tables)
        keys: Vec<String>,
        /// Admissible value types
        types: Vec<TypeInfo>,
    },
    /// Set; empty `types` means unconstrained elements
    Set {
        /// Admissible element types
        types: Vec<TypeInfo>,
    },
    /// Vendor object
    Object {
        /// Vendor id
        vendor_id: i32,
        /// Type id
        type_id: i32,
    },
    /// Vendor enumeration
    Enum {
        /// Vendor id
        vendor_id: i32,
        /// Type id
        type_id: i32,
    },
    /// Stands for the nearest enclosing Seq/Table/Set description
    Recursive,
}

impl TypeInfo {
    /// Sequence of the given element types
    pub fn seq_of(types: Vec<TypeInfo>) -> Self {
        TypeInfo::Seq {
            types,
            fixed_size: 0,
        }
    }

    /// Sequence with unconstrained elements
    pub fn any_seq() -> Self {
        TypeInfo::seq_of(vec![TypeInfo::Any])
    }

    /// Open table whose values may be any of `types`
    pub fn table_of(types: Vec<TypeInfo>) -> Self {
        TypeInfo::Table {
            keys: Vec::new(),
            types,
        }
    }

    /// Closed table with the given key/type pairs
    pub fn table_with_keys(entries: Vec<(String, TypeInfo)>) -> Self {
        let (keys, types) = entries.into_iter().unzip();
        TypeInfo::Table { keys, types }
    }

    /// The basic tag of this description
    pub fn basic_type(&self) -> BasicType {
        match self {
            TypeInfo::None => BasicType::None,
            TypeInfo::Any | TypeInfo::Recursive => BasicType::Any,
            TypeInfo::Bool => BasicType::Bool,
            TypeInfo::Int => BasicType::Int,
            TypeInfo::Int2 => BasicType::Int2,
            TypeInfo::Int3 => BasicType::Int3,
            TypeInfo::Int4 => BasicType::Int4,
            TypeInfo::Int8 => BasicType::Int8,
            TypeInfo::Int16 => BasicType::Int16,
            TypeInfo::Float => BasicType::Float,
            TypeInfo::Float2 => BasicType::Float2,
            TypeInfo::Float3 => BasicType::Float3,
            TypeInfo::Float4 => BasicType::Float4,
            TypeInfo::Color => BasicType::Color,
            TypeInfo::String => BasicType::String,
            TypeInfo::Bytes => BasicType::Bytes,
            TypeInfo::Path => BasicType::Path,
            TypeInfo::Image => BasicType::Image,
            TypeInfo::Audio => BasicType::Audio,
            TypeInfo::Block => BasicType::Block,
            TypeInfo::Chain => BasicType::Chain,
            TypeInfo::Seq { .. } => BasicType::Seq,
            TypeInfo::Table { .. } => BasicType::Table,
            TypeInfo::Set { .. } => BasicType::Set,
            TypeInfo::Object { .. } => BasicType::Object,
            TypeInfo::Enum { .. } => BasicType::Enum,
        }
    }

    /// Description with no structural detail for a basic tag
    pub fn from_basic(basic: BasicType) -> Self {
        match basic {
            BasicType::None => TypeInfo::None,
            BasicType::Any => TypeInfo::Any,
            BasicType::Bool => TypeInfo::Bool,
            BasicType::Int => TypeInfo::Int,
            BasicType::Int2 => TypeInfo::Int2,
            BasicType::Int3 => TypeInfo::Int3,
            BasicType::Int4 => TypeInfo::Int4,
            BasicType::Int8 => TypeInfo::Int8,
            BasicType::Int16 => TypeInfo::Int16,
            BasicType::Float => TypeInfo::Float,
            BasicType::Float2 => TypeInfo::Float2,
            BasicType::Float3 => TypeInfo::Float3,
            BasicType::Float4 => TypeInfo::Float4,
            BasicType::Color => TypeInfo::Color,
            BasicType::String => TypeInfo::String,
            BasicType::Bytes => TypeInfo::Bytes,
            BasicType::Path => TypeInfo::Path,
            BasicType::Image => TypeInfo::Image,
            BasicType::Audio => TypeInfo::Audio,
            BasicType::Block => TypeInfo::Block,
            BasicType::Chain => TypeInfo::Chain,
            BasicType::Seq => TypeInfo::seq_of(Vec::new()),
            BasicType::Table => TypeInfo::table_of(Vec::new()),
            BasicType::Set => TypeInfo::Set { types: Vec::new() },
            BasicType::Object => TypeInfo::Object {
                vendor_id: 0,
                type_id: 0,
            },
            BasicType::Enum => TypeInfo::Enum {
                vendor_id: 0,
                type_id: 0,
            },
        }
    }

    /// Whether this is the `Any` wildcard
    pub fn is_any(&self) -> bool {
        matches!(self, TypeInfo::Any)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, types: &[TypeInfo]) -> fmt::Result {
            write!(f, "[")?;
            for (idx, ty) in types.iter().enumerate() {
                if idx > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", ty)?;
            }
            write!(f, "]")
        }

        match self {
            TypeInfo::Seq { types, .. } => {
                write!(f, "Seq ")?;
                list(f, types)
            }
            TypeInfo::Set { types } => {
                write!(f, "Set ")?;
                list(f, types)
            }
            TypeInfo::Table { keys, types } if keys.is_empty() => {
                write!(f, "Table ")?;
                list(f, types)
            }
            TypeInfo::Table { keys, types } => {
                write!(f, "Table {{")?;
                for (idx, (key, ty)) in keys.iter().zip(types).enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:?}: {}", key, ty)?;
                }
                write!(f, "}}")
            }
            TypeInfo::Object { vendor_id, type_id } => {
                write!(f, "Object({}:{})", vendor_id, type_id)
            }
            TypeInfo::Enum { vendor_id, type_id } => write!(f, "Enum({}:{})", vendor_id, type_id),
            TypeInfo::Recursive => write!(f, "Self"),
            other => write!(f, "{}", other.basic_type()),
        }
    }
}

/// Render a list of types as `[A B C]`
pub fn format_types(types: &[TypeInfo]) -> String {
    let inner: Vec<String> = types.iter().map(ToString::to_string).collect();
    format!("[{}]", inner.join(" "))
}

/// A named type binding advertised or consumed by a block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExposedTypeInfo {
    /// Variable name
    pub name: String,
    /// Help text
    pub help: String,
    /// Type of the variable
    pub exposed_type: TypeInfo,
    /// Whether consumers may mutate it
    pub is_mutable: bool,
    /// Whether it is protected from being overwritten
    pub is_protected: bool,
    /// Whether the binding is a single entry of a table variable
    pub is_table_entry: bool,
    /// Node-global rather than chain-local
    pub global: bool,
}

impl ExposedTypeInfo {
    /// Immutable chain-local binding
    pub fn new(name: impl Into<String>, exposed_type: TypeInfo) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            exposed_type,
            is_mutable: false,
            is_protected: false,
            is_table_entry: false,
            global: false,
        }
    }

    /// Mark as mutable
    pub fn mutable(mut self, is_mutable: bool) -> Self {
        self.is_mutable = is_mutable;
        self
    }

    /// Mark as node-global
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Mark as protected
    pub fn protected(mut self, is_protected: bool) -> Self {
        self.is_protected = is_protected;
        self
    }

    /// Mark as a table entry binding
    pub fn table_entry(mut self, is_table_entry: bool) -> Self {
        self.is_table_entry = is_table_entry;
        self
    }

    /// Attach help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }
}

/// Describes one block parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Parameter name
    pub name: String,
    /// Help text
    pub help: String,
    /// Accepted value types
    pub value_types: Vec<TypeInfo>,
}

impl ParameterInfo {
    /// Create a parameter description
    pub fn new(name: impl Into<String>, help: impl Into<String>, value_types: Vec<TypeInfo>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value_types,
        }
    }
}

/// Whether a value shaped like `candidate` is acceptable where `target`
/// is expected.
///
/// `is_parameter` selects parameter-validation mode, where an empty
/// candidate Seq/Table/Set (no element information) is accepted. In
/// connection mode it is not. `strict` enables the element-level checks
/// for collections; non-strict matching only compares tags and vendor ids.
pub fn match_types(candidate: &TypeInfo, target: &TypeInfo, is_parameter: bool, strict: bool) -> bool {
    Matcher {
        is_parameter,
        strict,
    }
    .matches(candidate, target, candidate, target, 0)
}

struct Matcher {
    is_parameter: bool,
    strict: bool,
}

impl Matcher {
    fn matches<'a>(
        &self,
        candidate: &'a TypeInfo,
        target: &'a TypeInfo,
        candidate_parent: &'a TypeInfo,
        target_parent: &'a TypeInfo,
        depth: usize,
    ) -> bool {
        if depth > MAX_MATCH_DEPTH {
            return false;
        }

        let (candidate, target) = match (candidate, target) {
            (TypeInfo::Recursive, TypeInfo::Recursive) => return true,
            (TypeInfo::Recursive, t) => (candidate_parent, t),
            (c, TypeInfo::Recursive) => (c, target_parent),
            pair => pair,
        };

        if target.is_any() || (!self.is_parameter && matches!(target, TypeInfo::None)) {
            return true;
        }

        if candidate.basic_type() != target.basic_type() {
            return false;
        }

        match (candidate, target) {
            (
                TypeInfo::Object {
                    vendor_id: cv,
                    type_id: ct,
                },
                TypeInfo::Object {
                    vendor_id: tv,
                    type_id: tt,
                },
            )
            | (
                TypeInfo::Enum {
                    vendor_id: cv,
                    type_id: ct,
                },
                TypeInfo::Enum {
                    vendor_id: tv,
                    type_id: tt,
                },
            ) => cv == tv && ct == tt,
            _ if !self.strict => true,
            (
                TypeInfo::Seq {
                    types: ctypes,
                    fixed_size: csize,
                },
                TypeInfo::Seq {
                    types: ttypes,
                    fixed_size: tsize,
                },
            ) => {
                if *tsize > 0 && csize < tsize {
                    return false;
                }
                self.elements(ctypes, ttypes, candidate, target, depth)
            }
            (TypeInfo::Set { types: ctypes }, TypeInfo::Set { types: ttypes }) => {
                self.elements(ctypes, ttypes, candidate, target, depth)
            }
            (
                TypeInfo::Table {
                    keys: ckeys,
                    types: ctypes,
                },
                TypeInfo::Table {
                    keys: tkeys,
                    types: ttypes,
                },
            ) => {
                if tkeys.is_empty() || ckeys.is_empty() && self.is_parameter {
                    self.elements(ctypes, ttypes, candidate, target, depth)
                } else {
                    self.closed_table(ckeys, ctypes, tkeys, ttypes, candidate, target, depth)
                }
            }
            _ => true,
        }
    }

    /// Every candidate element type must find a compatible target element type.
    fn elements(
        &self,
        ctypes: &[TypeInfo],
        ttypes: &[TypeInfo],
        candidate: &TypeInfo,
        target: &TypeInfo,
        depth: usize,
    ) -> bool {
        if ttypes.is_empty() || ttypes.iter().any(TypeInfo::is_any) {
            return true;
        }
        if ctypes.is_empty() {
            return self.is_parameter;
        }
        ctypes.iter().all(|ctype| {
            ttypes
                .iter()
                .any(|ttype| self.matches(ctype, ttype, candidate, target, depth + 1))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn closed_table(
        &self,
        ckeys: &[String],
        ctypes: &[TypeInfo],
        tkeys: &[String],
        ttypes: &[TypeInfo],
        candidate: &TypeInfo,
        target: &TypeInfo,
        depth: usize,
    ) -> bool {
        let wildcard = tkeys.last().is_some_and(|key| key.is_empty());
        let declared = if wildcard { tkeys.len() - 1 } else { tkeys.len() };

        if ckeys.is_empty() {
            // open candidate against closed target
            return self.elements(ctypes, ttypes, candidate, target, depth);
        }
        if !wildcard && ckeys.len() != declared {
            return false;
        }

        for (key, ttype) in tkeys.iter().zip(ttypes).take(declared) {
            let found = ckeys
                .iter()
                .position(|ckey| ckey == key)
                .and_then(|idx| ctypes.get(idx));
            match found {
                Some(ctype) if self.matches(ctype, ttype, candidate, target, depth + 1) => {}
                _ => return false,
            }
        }

        if wildcard {
            let Some(tail) = ttypes.get(declared) else {
                return true;
            };
            for (ckey, ctype) in ckeys.iter().zip(ctypes) {
                if tkeys[..declared].contains(ckey) {
                    continue;
                }
                if !self.matches(ctype, tail, candidate, target, depth + 1) {
                    return false;
                }
            }
        }
        true
    }
}

/// Build a description from a concrete value
///
/// Collections record their distinct element types (tables record value
/// types only, leaving the derived table open).
pub fn derive_type_info(value: &Value) -> TypeInfo {
    fn unique(values: impl Iterator<Item = TypeInfo>) -> Vec<TypeInfo> {
        let mut types: Vec<TypeInfo> = Vec::new();
        for ty in values {
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        types
    }

    match value {
        Value::Seq(items) => TypeInfo::seq_of(unique(items.iter().map(derive_type_info))),
        Value::Table(table) => {
            TypeInfo::table_of(unique(table.iter().map(|(_, v)| derive_type_info(v))))
        }
        Value::Set(set) => TypeInfo::Set {
            types: unique(set.iter().map(derive_type_info)),
        },
        Value::Object(obj) => TypeInfo::Object {
            vendor_id: obj.vendor_id,
            type_id: obj.type_id,
        },
        Value::Enum(e) => TypeInfo::Enum {
            vendor_id: e.vendor_id,
            type_id: e.type_id,
        },
        other => TypeInfo::from_basic(other.basic_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Table;

    const ALL_BASIC: &[TypeInfo] = &[
        TypeInfo::None,
        TypeInfo::Bool,
        TypeInfo::Int,
        TypeInfo::Int2,
        TypeInfo::Int3,
        TypeInfo::Int4,
        TypeInfo::Int8,
        TypeInfo::Int16,
        TypeInfo::Float,
        TypeInfo::Float2,
        TypeInfo::Float3,
        TypeInfo::Float4,
        TypeInfo::Color,
        TypeInfo::String,
        TypeInfo::Bytes,
        TypeInfo::Path,
        TypeInfo::Image,
        TypeInfo::Audio,
        TypeInfo::Block,
        TypeInfo::Chain,
    ];

    #[test]
    fn test_any_target_matches_everything() {
        for ty in ALL_BASIC {
            assert!(match_types(ty, &TypeInfo::Any, false, true));
            assert!(match_types(ty, &TypeInfo::Any, true, true));
        }
        assert!(match_types(&TypeInfo::any_seq(), &TypeInfo::Any, false, true));
    }

    #[test]
    fn test_same_tag_matches_and_different_tag_fails() {
        for a in ALL_BASIC {
            assert!(match_types(a, a, true, true), "{} vs itself", a);
            for b in ALL_BASIC {
                if a != b && !matches!(b, TypeInfo::None) {
                    assert!(!match_types(a, b, false, true), "{} vs {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_none_target_accepts_anything_in_connection_mode() {
        assert!(match_types(&TypeInfo::Int, &TypeInfo::None, false, true));
        assert!(!match_types(&TypeInfo::Int, &TypeInfo::None, true, true));
    }

    #[test]
    fn test_object_ids_must_match() {
        let a = TypeInfo::Object {
            vendor_id: 1,
            type_id: 2,
        };
        let b = TypeInfo::Object {
            vendor_id: 1,
            type_id: 3,
        };
        assert!(match_types(&a, &a, false, false));
        assert!(!match_types(&a, &b, false, false));
    }

    #[test]
    fn test_seq_element_matching() {
        let ints = TypeInfo::seq_of(vec![TypeInfo::Int]);
        let numbers = TypeInfo::seq_of(vec![TypeInfo::Int, TypeInfo::Float]);
        assert!(match_types(&ints, &numbers, false, true));
        assert!(!match_types(&numbers, &ints, false, true));
        // non-strict only compares tags
        assert!(match_types(&numbers, &ints, false, false));
    }

    #[test]
    fn test_seq_fixed_size() {
        let target = TypeInfo::Seq {
            types: vec![TypeInfo::Int],
            fixed_size: 3,
        };
        let short = TypeInfo::Seq {
            types: vec![TypeInfo::Int],
            fixed_size: 2,
        };
        let long = TypeInfo::Seq {
            types: vec![TypeInfo::Int],
            fixed_size: 4,
        };
        assert!(!match_types(&short, &target, false, true));
        assert!(match_types(&long, &target, false, true));
    }

    #[test]
    fn test_empty_seq_asymmetry() {
        let empty = TypeInfo::seq_of(Vec::new());
        let ints = TypeInfo::seq_of(vec![TypeInfo::Int]);
        assert!(match_types(&empty, &ints, true, true));
        assert!(!match_types(&empty, &ints, false, true));
        // an empty target is unconstrained
        assert!(match_types(&ints, &empty, false, true));
    }

    #[test]
    fn test_open_table_matches_value_types() {
        let candidate = TypeInfo::table_of(vec![TypeInfo::Int]);
        let target = TypeInfo::table_of(vec![TypeInfo::Int, TypeInfo::String]);
        assert!(match_types(&candidate, &target, false, true));
        assert!(!match_types(
            &TypeInfo::table_of(vec![TypeInfo::Bool]),
            &target,
            false,
            true
        ));
    }

    #[test]
    fn test_closed_table_requires_keys() {
        let target = TypeInfo::table_with_keys(vec![
            ("x".into(), TypeInfo::Int),
            ("y".into(), TypeInfo::Int),
        ]);
        let exact = TypeInfo::table_with_keys(vec![
            ("y".into(), TypeInfo::Int),
            ("x".into(), TypeInfo::Int),
        ]);
        let extra = TypeInfo::table_with_keys(vec![
            ("x".into(), TypeInfo::Int),
            ("y".into(), TypeInfo::Int),
            ("z".into(), TypeInfo::String),
        ]);
        assert!(match_types(&exact, &target, false, true));
        assert!(!match_types(&extra, &target, false, true));
    }

    #[test]
    fn test_closed_table_wildcard_tail() {
        let target = TypeInfo::table_with_keys(vec![
            ("x".into(), TypeInfo::Int),
            ("".into(), TypeInfo::String),
        ]);
        let ok = TypeInfo::table_with_keys(vec![
            ("x".into(), TypeInfo::Int),
            ("name".into(), TypeInfo::String),
        ]);
        let bad = TypeInfo::table_with_keys(vec![
            ("x".into(), TypeInfo::Int),
            ("name".into(), TypeInfo::Bool),
        ]);
        assert!(match_types(&ok, &target, false, true));
        assert!(!match_types(&bad, &target, false, true));
    }

    #[test]
    fn test_recursive_types() {
        let tree = TypeInfo::seq_of(vec![TypeInfo::Int, TypeInfo::Recursive]);
        let nested = TypeInfo::seq_of(vec![
            TypeInfo::Int,
            TypeInfo::seq_of(vec![TypeInfo::Int]),
        ]);
        assert!(match_types(&nested, &tree, false, true));
        assert!(match_types(&tree, &tree, false, true));
        assert!(!match_types(
            &TypeInfo::seq_of(vec![TypeInfo::String]),
            &tree,
            false,
            true
        ));
    }

    #[test]
    fn test_derive_type_info() {
        let value = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::string("a")]);
        assert_eq!(
            derive_type_info(&value),
            TypeInfo::seq_of(vec![TypeInfo::Int, TypeInfo::String])
        );

        let mut table = Table::new();
        table.insert("a", Value::Float(1.0));
        assert_eq!(
            derive_type_info(&Value::Table(table)),
            TypeInfo::table_of(vec![TypeInfo::Float])
        );
        assert_eq!(derive_type_info(&Value::Int(3)), TypeInfo::Int);
    }
}
