//! # Storage collaborator.
//!
//! Durable storage is an opaque keyed-record store split into scopes:
//!
//! - the **global** scope holds accounts and job records, and is opened and
//!   closed around short, non-concurrent operations;
//! - a **local** scope per account holds the backed-up data and is opened once
//!   per job run and shared by all of the job's workers.
//!
//! Each scope exposes named collections of JSON records. A reserved
//! [`VERSION`] collection holds one `{table, version, updated}` checkpoint per
//! data category.
//!
//! [`MemoryStorage`] is the in-process implementation used for offline runs
//! and tests.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

pub use memory::{MemoryScope, MemoryStorage};

/// Global collection of account snapshots, keyed by user id.
pub const ACCOUNT: &str = "account";
/// Global collection of job records, auto-increment keys.
pub const JOB: &str = "job";
/// Local collection of per-category version checkpoints, keyed by table name.
pub const VERSION: &str = "version";

/// Page size used by [`Scope::each`].
const EACH_PAGE: usize = 100;

/// A stored record with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

/// One write inside a multi-collection [`Scope::transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace `key`.
    Put {
        collection: String,
        key: String,
        value: Value,
    },
    /// Insert under a fresh auto-increment key.
    Add { collection: String, value: Value },
    /// Remove `key` if present.
    Delete { collection: String, key: String },
}

/// A named storage scope with collections of JSON records.
///
/// Every data operation fails with [`StorageError::Closed`] unless the scope
/// is open.
#[async_trait]
pub trait Scope: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn open(&self) -> Result<(), StorageError>;

    async fn close(&self) -> Result<(), StorageError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError>;

    /// Inserts or replaces `key`.
    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError>;

    /// Inserts under a fresh auto-increment key and returns it.
    async fn add(&self, collection: &str, value: Value) -> Result<u64, StorageError>;

    async fn count(&self, collection: &str) -> Result<usize, StorageError>;

    /// Returns up to `limit` records starting at `offset`, in key order.
    async fn scan(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StorageError>;

    /// Applies all writes atomically; returns the key assigned to each `Add`
    /// (`None` for the other ops), in order.
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Option<u64>>, StorageError>;

    /// Visits every record of `collection` in key order, one page at a time.
    async fn each(
        &self,
        collection: &str,
        visit: &mut (dyn FnMut(Record) + Send),
    ) -> Result<usize, StorageError> {
        let mut offset = 0;
        loop {
            let page = self.scan(collection, offset, EACH_PAGE).await?;
            let n = page.len();
            for record in page {
                visit(record);
            }
            offset += n;
            if n < EACH_PAGE {
                return Ok(offset);
            }
        }
    }
}

/// Hands out the global scope and per-account local scopes.
pub trait StorageFactory: Send + Sync + 'static {
    fn global(&self) -> Arc<dyn Scope>;

    fn local(&self, account: &str) -> Arc<dyn Scope>;
}
