//! Node running a [`BatchProcessor`] over a list in the shared context
//!
//! [`BatchNode`] reads a JSON array, hands every element to an async item
//! operation through the processor (bounded concurrency, adaptive
//! sub-batches, input order preserved) and writes the results back as an
//! array. A failing item never fails the node: its slot holds an error
//! record `{"error": .., "error_type": ..}` and the failure count is stored
//! next to the results.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;
use trialflow_common::resilience::BatchProcessor;

use crate::error::NodeError;
use crate::flow::{ExecutionMode, Next, Node, SharedContext};

/// Shared-context key read by default
pub const DEFAULT_INPUT_KEY: &str = "items";
/// Shared-context key written by default
pub const DEFAULT_OUTPUT_KEY: &str = "results";

/// Results of one batch node execution
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// One value per input item, in input order
    pub results: Vec<Value>,
    /// Items whose slot holds an error record
    pub failed: usize,
}

/// Non-blocking node fanning a list out through a [`BatchProcessor`]
pub struct BatchNode<F> {
    id: String,
    input_key: String,
    output_key: String,
    processor: Arc<BatchProcessor>,
    item_op: F,
}

impl<F, Fut> BatchNode<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    /// Node `id` applying `item_op` to every element of `items`
    pub fn new(id: impl Into<String>, processor: Arc<BatchProcessor>, item_op: F) -> Self {
        Self {
            id: id.into(),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            processor,
            item_op,
        }
    }

    /// Read items from `key`
    #[must_use]
    pub fn reading(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    /// Write results to `key`; the failure count goes to `{key}_failed`
    #[must_use]
    pub fn writing(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }
}

#[async_trait]
impl<F, Fut> Node for BatchNode<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    type Prep = Vec<Value>;
    type Exec = BatchOutput;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::NonBlocking
    }

    fn prep(&self, shared: &SharedContext) -> Result<Vec<Value>, NodeError> {
        shared.require(&self.input_key)
    }

    async fn exec_async(&self, items: &Vec<Value>) -> Result<BatchOutput, NodeError> {
        let failed = AtomicUsize::new(0);
        let failed_ref = &failed;
        let item_op = &self.item_op;

        let results = self
            .processor
            .process_batch_with_handler(items.clone(), item_op, |_item, err: NodeError| async move {
                failed_ref.fetch_add(1, Ordering::Relaxed);
                json!({"error": err.message(), "error_type": err.error_type()})
            })
            .await
            .map_err(NodeError::from_error)?;

        let failed = failed.load(Ordering::Relaxed);
        if failed > 0 {
            warn!(node_id = %self.id, failed, total = results.len(), "batch node items failed");
        }
        Ok(BatchOutput { results, failed })
    }

    fn post(&self, shared: &mut SharedContext, _items: Vec<Value>, output: BatchOutput) -> Result<Next, NodeError> {
        shared.insert(format!("{}_failed", self.output_key), output.failed);
        shared.insert(self.output_key.clone(), output.results);
        Ok(Next::Default)
    }
}
