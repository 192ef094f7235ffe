//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Checkpoint, Database, DbResult, Message, ThreadSummary, ToolCallRequest};
use crate::llm::ToolDefinition;
use crate::tools::{ToolDispatcher, ToolError, ToolOutput};
use async_trait::async_trait;
use std::sync::Arc;

/// Versioned snapshots of thread history
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        step: i64,
        messages: &[Message],
    ) -> DbResult<Checkpoint>;

    async fn latest_checkpoint(&self, thread_id: &str) -> DbResult<Option<Checkpoint>>;

    /// Threads with at least one checkpoint, most recently written first
    async fn checkpoint_threads(&self) -> DbResult<Vec<String>>;

    async fn delete_checkpoints(&self, thread_id: &str) -> DbResult<usize>;
}

/// Thread titles
#[async_trait]
pub trait ThreadRegistry: Send + Sync {
    async fn upsert_title(&self, thread_id: &str, title: &str) -> DbResult<()>;

    async fn has_title(&self, thread_id: &str) -> DbResult<bool>;

    async fn thread_summaries(&self, known_ids: &[String]) -> DbResult<Vec<ThreadSummary>>;

    async fn delete_title(&self, thread_id: &str) -> DbResult<usize>;
}

/// Executor for tool calls
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, call: &ToolCallRequest) -> Result<ToolOutput, ToolError>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// Combined storage trait for convenience
pub trait Storage: CheckpointStore + ThreadRegistry {}
impl<T: CheckpointStore + ThreadRegistry> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn invoke(&self, call: &ToolCallRequest) -> Result<ToolOutput, ToolError> {
        (**self).invoke(call).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl CheckpointStore for DatabaseStorage {
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        step: i64,
        messages: &[Message],
    ) -> DbResult<Checkpoint> {
        self.db.save_checkpoint(thread_id, step, messages)
    }

    async fn latest_checkpoint(&self, thread_id: &str) -> DbResult<Option<Checkpoint>> {
        self.db.latest_checkpoint(thread_id)
    }

    async fn checkpoint_threads(&self) -> DbResult<Vec<String>> {
        self.db.checkpoint_threads()
    }

    async fn delete_checkpoints(&self, thread_id: &str) -> DbResult<usize> {
        self.db.delete_checkpoints(thread_id)
    }
}

#[async_trait]
impl ThreadRegistry for DatabaseStorage {
    async fn upsert_title(&self, thread_id: &str, title: &str) -> DbResult<()> {
        self.db.upsert_title(thread_id, title)
    }

    async fn has_title(&self, thread_id: &str) -> DbResult<bool> {
        self.db.has_title(thread_id)
    }

    async fn thread_summaries(&self, known_ids: &[String]) -> DbResult<Vec<ThreadSummary>> {
        self.db.thread_summaries(known_ids)
    }

    async fn delete_title(&self, thread_id: &str) -> DbResult<usize> {
        self.db.delete_title(thread_id)
    }
}

#[async_trait]
impl ToolExecutor for ToolDispatcher {
    async fn invoke(&self, call: &ToolCallRequest) -> Result<ToolOutput, ToolError> {
        ToolDispatcher::invoke(self, call).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolDispatcher::definitions(self)
    }
}
