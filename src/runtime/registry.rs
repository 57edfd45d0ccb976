//! Block type registry and factory system
//!
//! A [`BlockCatalog`] collects block factories and object/enum type
//! descriptors before any chain is built. Embedders freeze it into an
//! immutable [`BlockRegistry`] snapshot that is cheap to clone and hand
//! to loaders.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::block::{Block, BlockRef};
use super::error::{RegistryError, RegistryResult};

/// Factory producing a fresh block instance
pub type BlockFactory = Arc<dyn Fn() -> Box<dyn Block> + Send + Sync>;

/// Descriptor of a vendor object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeInfo {
    /// Vendor id
    pub vendor_id: i32,
    /// Type id within the vendor
    pub type_id: i32,
    /// Human readable name
    pub name: String,
}

/// Descriptor of a vendor enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumTypeInfo {
    /// Vendor id
    pub vendor_id: i32,
    /// Type id within the vendor
    pub type_id: i32,
    /// Human readable name
    pub name: String,
    /// Label and value of each variant
    pub variants: Vec<(String, i32)>,
}

impl EnumTypeInfo {
    /// Label of a variant value
    pub fn label(&self, value: i32) -> Option<&str> {
        self.variants
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(label, _)| label.as_str())
    }
}

#[derive(Default, Clone)]
struct CatalogEntries {
    // registration order is kept for listings
    order: Vec<String>,
    blocks: HashMap<String, BlockFactory>,
    objects: HashMap<(i32, i32), ObjectTypeInfo>,
    enums: HashMap<(i32, i32), EnumTypeInfo>,
}

/// Mutable catalog of block definitions
#[derive(Default)]
pub struct BlockCatalog {
    entries: RwLock<CatalogEntries>,
}

impl BlockCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block type with a factory function. Registering a name
    /// again replaces the earlier factory.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Block> + Send + Sync + 'static,
    {
        let mut entries = self.entries.write();
        if entries.blocks.insert(name.to_string(), Arc::new(factory)).is_some() {
            warn!(block = name, "block type registered twice, replacing the earlier factory");
        } else {
            entries.order.push(name.to_string());
        }
    }

    /// Register a block type that implements `Default`
    pub fn register_default<T>(&self, name: &str)
    where
        T: Block + Default,
    {
        self.register(name, || Box::new(T::default()));
    }

    /// Register an object type descriptor
    pub fn register_object_type(&self, info: ObjectTypeInfo) {
        let mut entries = self.entries.write();
        let key = (info.vendor_id, info.type_id);
        if entries.objects.insert(key, info).is_some() {
            warn!(vendor = key.0, type_id = key.1, "object type registered twice");
        }
    }

    /// Register an enum type descriptor
    pub fn register_enum_type(&self, info: EnumTypeInfo) {
        let mut entries = self.entries.write();
        let key = (info.vendor_id, info.type_id);
        if entries.enums.insert(key, info).is_some() {
            warn!(vendor = key.0, type_id = key.1, "enum type registered twice");
        }
    }

    /// Produce an immutable snapshot
    pub fn snapshot(&self) -> BlockRegistry {
        let entries = self.entries.read();
        BlockRegistry {
            entries: Arc::new(entries.clone()),
        }
    }
}

/// Immutable view of a block catalog
#[derive(Clone)]
pub struct BlockRegistry {
    entries: Arc<CatalogEntries>,
}

impl BlockRegistry {
    /// Instantiate a block of the given type
    pub fn create(&self, name: &str) -> RegistryResult<BlockRef> {
        let factory = self
            .entries
            .blocks
            .get(name)
            .ok_or_else(|| RegistryError::UnknownBlock(name.to_string()))?;
        Ok(BlockRef::from_box(factory()))
    }

    /// Whether the snapshot knows the block type
    pub fn has_type(&self, name: &str) -> bool {
        self.entries.blocks.contains_key(name)
    }

    /// Block type names in registration order
    pub fn list_types(&self) -> Vec<String> {
        self.entries.order.clone()
    }

    /// Look up an object type descriptor
    pub fn object_type(&self, vendor_id: i32, type_id: i32) -> Option<&ObjectTypeInfo> {
        self.entries.objects.get(&(vendor_id, type_id))
    }

    /// Look up an enum type descriptor
    pub fn enum_type(&self, vendor_id: i32, type_id: i32) -> Option<&EnumTypeInfo> {
        self.entries.enums.get(&(vendor_id, type_id))
    }
}
