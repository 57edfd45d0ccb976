//! Structural value hashing
//!
//! Hashes are blake3 digests truncated to 64 bits. Tables and sets hash
//! each entry on its own and fold the sorted entry digests, so the result
//! does not depend on insertion order. Chains may reference themselves
//! through values, so recursion carries an explicit visited set.

use std::collections::HashSet;

use super::block::BlockRef;
use super::chain::ChainRef;
use super::value::Value;

/// Stateful walker producing a structural hash
#[derive(Default)]
pub struct StructuralHasher {
    visited_chains: HashSet<usize>,
}

impl StructuralHasher {
    /// Create a hasher with an empty visited set
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a value to 64 bits
    pub fn hash_value(&mut self, value: &Value) -> u64 {
        let mut hasher = blake3::Hasher::new();
        self.feed(&mut hasher, value);
        finish64(&hasher)
    }

    fn feed(&mut self, hasher: &mut blake3::Hasher, value: &Value) {
        hasher.update(&[value.basic_type() as u8]);
        match value {
            Value::None | Value::Any => {}
            Value::Bool(v) => {
                hasher.update(&[*v as u8]);
            }
            Value::Int(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::Int2(v) => lanes(hasher, v, |x| x.to_le_bytes()),
            Value::Int3(v) => lanes(hasher, v, |x| x.to_le_bytes()),
            Value::Int4(v) => lanes(hasher, v, |x| x.to_le_bytes()),
            Value::Int8(v) => lanes(hasher, v, |x| x.to_le_bytes()),
            Value::Int16(v) => lanes(hasher, v, |x| x.to_le_bytes()),
            Value::Float(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Float2(v) => lanes(hasher, v, |x| x.to_bits().to_le_bytes()),
            Value::Float3(v) => lanes(hasher, v, |x| x.to_bits().to_le_bytes()),
            Value::Float4(v) => lanes(hasher, v, |x| x.to_bits().to_le_bytes()),
            Value::Color(c) => {
                hasher.update(&[c.r, c.g, c.b, c.a]);
            }
            Value::String(s) | Value::Path(s) => prefixed(hasher, s.as_bytes()),
            Value::Bytes(b) => prefixed(hasher, b),
            Value::Seq(items) => {
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    self.feed(hasher, item);
                }
            }
            Value::Table(table) => {
                let mut entries: Vec<u64> = table
                    .iter()
                    .map(|(key, item)| {
                        let mut entry = blake3::Hasher::new();
                        prefixed(&mut entry, key.as_bytes());
                        self.feed(&mut entry, item);
                        finish64(&entry)
                    })
                    .collect();
                fold_sorted(hasher, &mut entries);
            }
            Value::Set(set) => {
                let mut entries: Vec<u64> = set.iter().map(|item| self.hash_value(item)).collect();
                fold_sorted(hasher, &mut entries);
            }
            Value::Image(img) => {
                hasher.update(&img.width.to_le_bytes());
                hasher.update(&img.height.to_le_bytes());
                hasher.update(&[img.channels, img.flags]);
                hasher.update(&img.data);
            }
            Value::Audio(audio) => {
                hasher.update(&audio.sample_rate.to_le_bytes());
                hasher.update(&audio.channels.to_le_bytes());
                hasher.update(&(audio.samples.len() as u64).to_le_bytes());
                lanes(hasher, &audio.samples, |x| x.to_bits().to_le_bytes());
            }
            Value::Object(obj) => {
                hasher.update(&obj.vendor_id.to_le_bytes());
                hasher.update(&obj.type_id.to_le_bytes());
                let custom = obj
                    .info()
                    .and_then(|info| info.hash(obj.payload().as_ref()));
                match custom {
                    Some(h) => hasher.update(&h.to_le_bytes()),
                    None => hasher.update(&(std::rc::Rc::as_ptr(obj.payload()) as *const () as usize).to_le_bytes()),
                };
            }
            Value::Enum(e) => {
                hasher.update(&e.vendor_id.to_le_bytes());
                hasher.update(&e.type_id.to_le_bytes());
                hasher.update(&e.value.to_le_bytes());
            }
            Value::Block(block) => self.feed_block(hasher, block),
            Value::Chain(chain) => self.feed_chain(hasher, chain),
        }
    }

    /// A block hashes its name, type hash, parameters and persisted state.
    fn feed_block(&mut self, hasher: &mut blake3::Hasher, block: &BlockRef) {
        prefixed(hasher, block.name().as_bytes());
        let snapshot = block.with(|b| {
            let params: Vec<Value> = (0..b.parameters().len()).map(|idx| b.get_param(idx)).collect();
            (b.hash(), params, b.get_state())
        });
        if let Some((type_hash, params, state)) = snapshot {
            hasher.update(&type_hash.to_le_bytes());
            for param in &params {
                self.feed(hasher, param);
            }
            self.feed(hasher, &state);
        }
    }

    fn feed_chain(&mut self, hasher: &mut blake3::Hasher, chain: &ChainRef) {
        let key = chain.addr();
        if !self.visited_chains.insert(key) {
            // already on the path; fold only the name to terminate
            prefixed(hasher, chain.name().as_bytes());
            return;
        }

        let Some((name, looped, unsafe_mode, blocks, variables)) = chain.hash_parts() else {
            prefixed(hasher, chain.name().as_bytes());
            self.visited_chains.remove(&key);
            return;
        };
        prefixed(hasher, name.as_bytes());
        hasher.update(&[looped as u8, unsafe_mode as u8]);
        for block in &blocks {
            self.feed_block(hasher, block);
        }
        let mut entries: Vec<u64> = variables
            .iter()
            .map(|(var_name, value)| {
                let mut entry = blake3::Hasher::new();
                prefixed(&mut entry, var_name.as_bytes());
                self.feed(&mut entry, value);
                finish64(&entry)
            })
            .collect();
        fold_sorted(hasher, &mut entries);

        self.visited_chains.remove(&key);
    }
}

/// Variable-length payloads carry their length so adjacent ones cannot
/// trade bytes
fn prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn lanes<T: Copy, const N: usize>(hasher: &mut blake3::Hasher, values: &[T], bytes: impl Fn(T) -> [u8; N]) {
    for v in values {
        hasher.update(&bytes(*v));
    }
}

fn fold_sorted(hasher: &mut blake3::Hasher, entries: &mut [u64]) {
    entries.sort_unstable();
    hasher.update(&(entries.len() as u64).to_le_bytes());
    for entry in entries.iter() {
        hasher.update(&entry.to_le_bytes());
    }
}

fn finish64(hasher: &blake3::Hasher) -> u64 {
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

impl Value {
    /// Structural 64-bit hash
    pub fn hash64(&self) -> u64 {
        StructuralHasher::new().hash_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::{Table, ValueSet};

    #[test]
    fn test_clone_hashes_equal() {
        let value = Value::Seq(vec![Value::Int(1), Value::string("two"), Value::Float(3.0)]);
        assert_eq!(value.hash64(), value.clone().hash64());
    }

    #[test]
    fn test_table_hash_is_order_independent() {
        let mut a = Table::new();
        a.insert("one", Value::Int(1));
        a.insert("two", Value::Int(2));
        let mut b = Table::new();
        b.insert("two", Value::Int(2));
        b.insert("one", Value::Int(1));
        assert_eq!(Value::Table(a).hash64(), Value::Table(b).hash64());
    }

    #[test]
    fn test_set_hash_is_order_independent() {
        let a: ValueSet = vec![Value::Int(1), Value::Int(2)].into_iter().collect();
        let b: ValueSet = vec![Value::Int(2), Value::Int(1)].into_iter().collect();
        assert_eq!(Value::Set(a).hash64(), Value::Set(b).hash64());
    }

    #[test]
    fn test_tag_participates_in_hash() {
        assert_ne!(Value::string("a").hash64(), Value::Path("a".into()).hash64());
        assert_ne!(Value::Int(0).hash64(), Value::None.hash64());
    }

    #[test]
    fn test_string_boundaries_participate_in_hash() {
        // the tag byte of String is 14, so without a length the second
        // sequence would feed the same bytes as the first
        let split = Value::Seq(vec![Value::string("a"), Value::string("b\u{e}c")]);
        let shifted = Value::Seq(vec![Value::string("a\u{e}b"), Value::string("c")]);
        assert_ne!(split.hash64(), shifted.hash64());

        let bytes = Value::Seq(vec![Value::Bytes(vec![1]), Value::Bytes(vec![2, 3])]);
        let moved = Value::Seq(vec![Value::Bytes(vec![1, 2]), Value::Bytes(vec![3])]);
        assert_ne!(bytes.hash64(), moved.hash64());
    }
}
