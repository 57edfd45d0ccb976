//! Blocks that hand their work to the node's worker pool

use async_trait::async_trait;
use tracing::trace;

use crate::runtime::block::Block;
use crate::runtime::context::Context;
use crate::runtime::error::ActivationResult;
use crate::runtime::types::TypeInfo;
use crate::runtime::value::Value;

use super::invalid_input;

fn digest(payload: &[u8]) -> i64 {
    let hash = blake3::hash(payload);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(head)
}

/// blake3 checksum of a string or byte buffer, as an Int
///
/// Runs on the worker pool when the chain has one, suspending the chain
/// until the digest is ready. Without a pool it hashes inline.
#[derive(Debug, Default)]
pub struct Checksum;

#[async_trait(?Send)]
impl Block for Checksum {
    fn name(&self) -> &str {
        "Checksum"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bytes, TypeInfo::String]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Int]
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let payload = match input {
            Value::Bytes(bytes) => bytes.clone(),
            Value::String(text) => text.clone().into_bytes(),
            other => return Err(invalid_input("Checksum", "Bytes or String", other)),
        };

        if !ctx.has_workers() {
            return Ok(Value::Int(digest(&payload)));
        }
        trace!(len = payload.len(), "checksum on worker pool");
        let task = ctx.spawn_worker(move || digest(&payload))?;
        let sum = ctx.await_worker(task).await?;
        Ok(Value::Int(sum))
    }
}
