//! In-memory storage backend.
//!
//! [`MemoryStorage`] keeps every scope in process memory. Data survives
//! `close()`/`open()` cycles for the lifetime of the factory, which is what
//! offline runs and tests need.
//!
//! Keys sort numerically when both are integers (auto-increment keys), and
//! lexicographically otherwise, so scans return records in insertion order for
//! `add`-keyed collections.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;

use super::{Record, Scope, StorageFactory, WriteOp};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey(String);

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => CmpOrdering::Less,
            (Err(_), Ok(_)) => CmpOrdering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Collection {
    records: BTreeMap<SortKey, Value>,
    next_id: u64,
}

impl Collection {
    fn add(&mut self, value: Value) -> u64 {
        loop {
            self.next_id += 1;
            let key = SortKey(self.next_id.to_string());
            if !self.records.contains_key(&key) {
                self.records.insert(key, value);
                return self.next_id;
            }
        }
    }
}

/// One in-memory scope.
pub struct MemoryScope {
    name: String,
    open: AtomicBool,
    data: Mutex<HashMap<String, Collection>>,
}

impl MemoryScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
            data: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::Closed {
                scope: self.name.clone(),
            })
        }
    }
}

#[async_trait]
impl Scope for MemoryScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn open(&self) -> Result<(), StorageError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        self.ensure_open()?;
        let data = self.data.lock();
        Ok(data
            .get(collection)
            .and_then(|c| c.records.get(&SortKey(key.to_string())))
            .cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.data
            .lock()
            .entry(collection.to_string())
            .or_default()
            .records
            .insert(SortKey(key.to_string()), value);
        Ok(())
    }

    async fn add(&self, collection: &str, value: Value) -> Result<u64, StorageError> {
        self.ensure_open()?;
        Ok(self
            .data
            .lock()
            .entry(collection.to_string())
            .or_default()
            .add(value))
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        self.ensure_open()?;
        Ok(self
            .data
            .lock()
            .get(collection)
            .map_or(0, |c| c.records.len()))
    }

    async fn scan(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StorageError> {
        self.ensure_open()?;
        let data = self.data.lock();
        let Some(c) = data.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(c.records
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(k, v)| Record {
                key: k.0.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Option<u64>>, StorageError> {
        self.ensure_open()?;
        let mut data = self.data.lock();
        let mut keys = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                WriteOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    data.entry(collection)
                        .or_default()
                        .records
                        .insert(SortKey(key), value);
                    keys.push(None);
                }
                WriteOp::Add { collection, value } => {
                    keys.push(Some(data.entry(collection).or_default().add(value)));
                }
                WriteOp::Delete { collection, key } => {
                    if let Some(c) = data.get_mut(&collection) {
                        c.records.remove(&SortKey(key));
                    }
                    keys.push(None);
                }
            }
        }
        Ok(keys)
    }
}

/// In-memory [`StorageFactory`]: one global scope plus one scope per account.
pub struct MemoryStorage {
    global: Arc<MemoryScope>,
    locals: Mutex<HashMap<String, Arc<MemoryScope>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            global: Arc::new(MemoryScope::new("global")),
            locals: Mutex::new(HashMap::new()),
        }
    }

    /// Typed access to the global scope (tests and seeding).
    pub fn global_scope(&self) -> Arc<MemoryScope> {
        self.global.clone()
    }

    /// Typed access to an account's local scope, creating it if needed.
    pub fn local_scope(&self, account: &str) -> Arc<MemoryScope> {
        self.locals
            .lock()
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(MemoryScope::new(format!("local:{account}"))))
            .clone()
    }
}

impl StorageFactory for MemoryStorage {
    fn global(&self) -> Arc<dyn Scope> {
        self.global.clone()
    }

    fn local(&self, account: &str) -> Arc<dyn Scope> {
        self.local_scope(account)
    }
}
