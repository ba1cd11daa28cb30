use std::{
    collections::{HashMap, VecDeque, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Mutex,
        MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

/// Checkpoints remembered per collection.
pub const MAX_CHECKPOINTS: usize = 1000;
/// Document errors kept per checkpoint; further errors are only counted.
pub const MAX_ERRORS_KEPT: usize = 100;

/// A failure while processing or indexing one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub msg: String,
}

impl DocumentError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            doc_type: None,
            doc_id: None,
            msg: msg.into(),
        }
    }

    pub fn for_doc(doc_type: &str, doc_id: &str, msg: impl Into<String>) -> Self {
        Self {
            doc_type: Some(doc_type.to_string()),
            doc_id: Some(doc_id.to_string()),
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub reached: bool,
    pub commit: bool,
    /// Errors reported since the previous checkpoint was reached. Empty
    /// until this one is reached.
    pub errors: Vec<DocumentError>,
    pub total_errors: usize,
}

#[derive(Default)]
struct CollectionCheckpoints {
    checkpoints: VecDeque<CheckpointInfo>,
    errors: Vec<DocumentError>,
    total_errors: usize,
}

impl CollectionCheckpoints {
    fn find_mut(&mut self, id: &str) -> Option<&mut CheckpointInfo> {
        self.checkpoints.iter_mut().find(|c| c.id == id)
    }

    /// Make room for one more checkpoint by forgetting the oldest reached
    /// ones. False if every remembered checkpoint is still pending.
    fn make_room(&mut self) -> bool {
        while self.checkpoints.len() >= MAX_CHECKPOINTS {
            match self.checkpoints.iter().position(|c| c.reached) {
                Some(victim) => {
                    self.checkpoints.remove(victim);
                }
                None => return false,
            }
        }
        true
    }
}

/// Per-collection checkpoint bookkeeping.
pub struct CheckpointRegistry {
    salt: u64,
    counter: AtomicU64,
    collections: Mutex<HashMap<String, CollectionCheckpoints>>,
}

impl Default for CheckpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointRegistry {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        nanos.hash(&mut hasher);
        std::process::id().hash(&mut hasher);
        Self {
            salt: hasher.finish(),
            counter: AtomicU64::new(0),
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CollectionCheckpoints>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn generate_id(&self, collection: &str) -> String {
        let mut hasher = DefaultHasher::new();
        self.salt.hash(&mut hasher);
        collection.hash(&mut hasher);
        self.counter.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Record a new pending checkpoint and return its id. `None` when the
    /// collection already has `MAX_CHECKPOINTS` pending checkpoints.
    pub fn create(&self, collection: &str, commit: bool) -> Option<String> {
        let mut collections = self.lock();
        let entry = collections.entry(collection.to_string()).or_default();
        if !entry.make_room() {
            return None;
        }
        let mut id = self.generate_id(collection);
        while entry.find_mut(&id).is_some() {
            id = self.generate_id(collection);
        }
        entry.checkpoints.push_back(CheckpointInfo {
            id: id.clone(),
            reached: false,
            commit,
            errors: Vec::new(),
            total_errors: 0,
        });
        Some(id)
    }

    /// Drop a checkpoint that never made it onto a queue.
    pub fn forget(&self, collection: &str, id: &str) {
        if let Some(entry) = self.lock().get_mut(collection) {
            entry.checkpoints.retain(|c| c.id != id);
        }
    }

    pub fn record_error(&self, collection: &str, error: DocumentError) {
        let mut collections = self.lock();
        let entry = collections.entry(collection.to_string()).or_default();
        entry.total_errors += 1;
        if entry.errors.len() < MAX_ERRORS_KEPT {
            entry.errors.push(error);
        }
    }

    /// Mark a checkpoint reached, handing it the errors collected since the
    /// previous one.
    pub fn reach(&self, collection: &str, id: &str) {
        let mut collections = self.lock();
        let entry = collections.entry(collection.to_string()).or_default();
        let errors = std::mem::take(&mut entry.errors);
        let total_errors = std::mem::take(&mut entry.total_errors);
        match entry.find_mut(id) {
            Some(checkpoint) => {
                checkpoint.reached = true;
                checkpoint.errors = errors;
                checkpoint.total_errors = total_errors;
            }
            None => {
                tracing::warn!(collection, checkpoint = id, "reached unknown checkpoint");
            }
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<CheckpointInfo> {
        self.lock()
            .get_mut(collection)
            .and_then(|entry| entry.find_mut(id).map(|c| c.clone()))
    }

    /// All remembered checkpoints of a collection, oldest first.
    pub fn list(&self, collection: &str) -> Vec<CheckpointInfo> {
        self.lock()
            .get(collection)
            .map(|entry| entry.checkpoints.iter().cloned().collect())
            .unwrap_or_default()
    }
}
