//! The closed set of work items run by the task manager, and how each one
//! executes.

use serde_json::{Map, Value, json};

use crate::{
    checkpoint::{CheckpointRegistry, DocumentError},
    collection::Collection,
    collection_config::CollectionConfig,
    document::{self, normalize, resolve_identity},
    error::{Error, Result},
    result::ResultHandle,
    search::SearchRequest,
    task_manager::TaskManager,
};

/// Deepest chain of pipe targets a document may follow.
pub const MAX_PIPE_DEPTH: usize = 10;

/// A task plus the slot its outcome is reported to, if anyone is waiting.
#[derive(Debug)]
pub struct Job<T> {
    pub task: T,
    pub result: Option<ResultHandle>,
}

impl<T> Job<T> {
    pub fn new(task: T, result: Option<ResultHandle>) -> Self {
        Self { task, result }
    }
}

/// Readonly queue categories. Each has its own queue and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadonlyCategory {
    Search,
    Info,
    Status,
}

impl ReadonlyCategory {
    pub const ALL: [ReadonlyCategory; 3] = [
        ReadonlyCategory::Search,
        ReadonlyCategory::Info,
        ReadonlyCategory::Status,
    ];

    pub fn queue_name(self) -> &'static str {
        match self {
            ReadonlyCategory::Search => "search",
            ReadonlyCategory::Info => "info",
            ReadonlyCategory::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadonlyTask {
    Search {
        collection: String,
        request: SearchRequest,
    },
    GetDocument {
        collection: String,
        doc_type: String,
        doc_id: String,
    },
    CollectionInfo {
        collection: String,
    },
    ListCollections,
    ServerStatus,
    GetCheckpoint {
        collection: String,
        id: String,
    },
    ListCheckpoints {
        collection: String,
    },
    ListTaxonomies {
        collection: String,
    },
    GetTaxonomy {
        collection: String,
        taxonomy: String,
    },
    GetCategory {
        collection: String,
        taxonomy: String,
        category: String,
    },
}

impl ReadonlyTask {
    /// The collection whose readonly handle this task needs, if any.
    pub fn handle_collection(&self) -> Option<&str> {
        match self {
            ReadonlyTask::Search { collection, .. }
            | ReadonlyTask::GetDocument { collection, .. }
            | ReadonlyTask::CollectionInfo { collection }
            | ReadonlyTask::ListTaxonomies { collection }
            | ReadonlyTask::GetTaxonomy { collection, .. }
            | ReadonlyTask::GetCategory { collection, .. } => {
                Some(collection.as_str())
            }
            ReadonlyTask::ListCollections
            | ReadonlyTask::ServerStatus
            | ReadonlyTask::GetCheckpoint { .. }
            | ReadonlyTask::ListCheckpoints { .. } => None,
        }
    }

    /// Run the task. `handle` is a readonly handle for
    /// [`ReadonlyTask::handle_collection`] when that is `Some`.
    pub fn execute(
        &self,
        manager: &TaskManager,
        handle: Option<&Collection>,
    ) -> Result<Value> {
        let coll = || {
            handle.ok_or_else(|| {
                Error::InvalidState("task needs a collection handle".into())
            })
        };

        match self {
            ReadonlyTask::Search { request, .. } => {
                Ok(serde_json::to_value(coll()?.search(request)?)?)
            }
            ReadonlyTask::GetDocument {
                doc_type, doc_id, ..
            } => coll()?.get_document(doc_type, doc_id)?.ok_or_else(|| {
                Error::not_found("document", format!("{doc_type}/{doc_id}"))
            }),
            ReadonlyTask::CollectionInfo { .. } => coll()?.info(),
            ReadonlyTask::ListCollections => {
                Ok(json!(manager.pool().list_names()?))
            }
            ReadonlyTask::ServerStatus => Ok(manager.status()),
            ReadonlyTask::GetCheckpoint { collection, id } => {
                let info = manager
                    .checkpoints()
                    .get(collection, id)
                    .ok_or_else(|| Error::not_found("checkpoint", id.as_str()))?;
                Ok(serde_json::to_value(info)?)
            }
            ReadonlyTask::ListCheckpoints { collection } => Ok(
                serde_json::to_value(manager.checkpoints().list(collection))?,
            ),
            ReadonlyTask::ListTaxonomies { .. } => {
                let names: Vec<&String> =
                    coll()?.config()?.taxonomies.keys().collect();
                Ok(json!(names))
            }
            ReadonlyTask::GetTaxonomy { taxonomy, .. } => {
                Ok(serde_json::to_value(coll()?.config()?.taxonomy(taxonomy)?)?)
            }
            ReadonlyTask::GetCategory {
                taxonomy, category, ..
            } => {
                let config = coll()?.config()?;
                let tax = config.taxonomy(taxonomy)?;
                let parents = tax
                    .parents(category)
                    .ok_or_else(|| Error::not_found("category", category.as_str()))?;
                Ok(json!({
                    "parents": parents,
                    "children": tax.children(category),
                    "ancestors": tax.ancestors(category),
                    "descendants": tax.descendants(category),
                }))
            }
        }
    }
}

/// Work done before a write reaches the index. Runs in parallel and never
/// touches the index; its output is a list of indexing tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingTask {
    IndexDocument {
        doc: Value,
        doc_type: Option<String>,
        doc_id: Option<String>,
    },
    PipeDocument {
        pipe: String,
        doc: Value,
    },
    SetConfig {
        config: CollectionConfig,
    },
    AddCategoryParent {
        taxonomy: String,
        category: String,
        parent: String,
    },
    RemoveCategoryParent {
        taxonomy: String,
        category: String,
        parent: String,
    },
    RemoveCategory {
        taxonomy: String,
        category: String,
    },
}

/// Result of a processing task: indexing work to forward, plus per-document
/// failures that did not stop the task.
#[derive(Debug, Default)]
pub struct Processed {
    pub indexing: Vec<IndexingTask>,
    pub errors: Vec<DocumentError>,
}

impl ProcessingTask {
    /// Type and id to attribute a failure of this task to.
    pub fn document_identity(&self) -> Option<(Option<String>, Option<String>)> {
        match self {
            ProcessingTask::IndexDocument {
                doc,
                doc_type,
                doc_id,
            } => {
                let (raw_type, raw_id) = raw_identity(doc);
                Some((doc_type.clone().or(raw_type), doc_id.clone().or(raw_id)))
            }
            ProcessingTask::PipeDocument { doc, .. } => Some(raw_identity(doc)),
            _ => None,
        }
    }

    pub fn execute(self, manager: &TaskManager, collection: &str) -> Result<Processed> {
        let mut out = Processed::default();
        match self {
            ProcessingTask::IndexDocument {
                doc,
                doc_type,
                doc_id,
            } => {
                let data = normalize(doc)?;
                let (doc_type, doc_id) =
                    resolve_identity(&data, doc_type.as_deref(), doc_id.as_deref())?;
                out.indexing.push(IndexingTask::UpdateDocument {
                    doc_type,
                    doc_id,
                    data,
                });
            }
            ProcessingTask::PipeDocument { pipe, doc } => {
                let config = manager.processing_config(collection)?;
                let data = normalize(doc)?;
                run_pipe(&config, &pipe, data, 0, &mut out)?;
            }
            ProcessingTask::SetConfig { config } => {
                let _edit = manager.lock_config_edits();
                manager.config_db().set_collection_config(collection, &config)?;
                out.indexing.push(IndexingTask::SetConfig { config });
            }
            ProcessingTask::AddCategoryParent {
                taxonomy,
                category,
                parent,
            } => {
                let _edit = manager.lock_config_edits();
                let mut config = manager.processing_config(collection)?;
                config.category_add_parent(&taxonomy, &category, &parent)?;
                manager.config_db().set_collection_config(collection, &config)?;
                out.indexing.push(IndexingTask::AddCategoryParent {
                    taxonomy,
                    category,
                    parent,
                });
            }
            ProcessingTask::RemoveCategoryParent {
                taxonomy,
                category,
                parent,
            } => {
                let _edit = manager.lock_config_edits();
                let mut config = manager.processing_config(collection)?;
                config.category_remove_parent(&taxonomy, &category, &parent)?;
                manager.config_db().set_collection_config(collection, &config)?;
                out.indexing.push(IndexingTask::RemoveCategoryParent {
                    taxonomy,
                    category,
                    parent,
                });
            }
            ProcessingTask::RemoveCategory { taxonomy, category } => {
                let _edit = manager.lock_config_edits();
                let mut config = manager.processing_config(collection)?;
                config.category_remove(&taxonomy, &category)?;
                manager.config_db().set_collection_config(collection, &config)?;
                out.indexing
                    .push(IndexingTask::RemoveCategory { taxonomy, category });
            }
        }
        Ok(out)
    }
}

fn run_pipe(
    config: &CollectionConfig,
    pipe_name: &str,
    input: Map<String, Value>,
    depth: usize,
    out: &mut Processed,
) -> Result<()> {
    if depth >= MAX_PIPE_DEPTH {
        return Err(Error::InvalidValue(format!(
            "pipe {pipe_name:?} exceeds the maximum chain of {MAX_PIPE_DEPTH} pipes"
        )));
    }
    let pipe = config.pipe(pipe_name)?;

    for output in pipe.apply(&input) {
        if let Some(target) = &pipe.target {
            run_pipe(config, target, output, depth + 1, out)?;
            continue;
        }
        match resolve_identity(&output, None, None) {
            Ok((doc_type, doc_id)) => {
                out.indexing.push(IndexingTask::UpdateDocument {
                    doc_type,
                    doc_id,
                    data: output,
                });
            }
            Err(e) => out.errors.push(DocumentError::new(format!(
                "output of pipe {pipe_name:?} not indexed: {e}"
            ))),
        }
    }
    Ok(())
}

/// A mutation applied by a collection's single writer, in queue order.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexingTask {
    UpdateDocument {
        doc_type: String,
        doc_id: String,
        data: Map<String, Value>,
    },
    DeleteDocument {
        doc_type: String,
        doc_id: String,
    },
    SetConfig {
        config: CollectionConfig,
    },
    AddCategoryParent {
        taxonomy: String,
        category: String,
        parent: String,
    },
    RemoveCategoryParent {
        taxonomy: String,
        category: String,
        parent: String,
    },
    RemoveCategory {
        taxonomy: String,
        category: String,
    },
    Commit,
    Checkpoint {
        id: String,
        commit: bool,
    },
}

impl IndexingTask {
    /// The document a failure of this task should be attributed to.
    pub fn document(&self) -> Option<(&str, &str)> {
        match self {
            IndexingTask::UpdateDocument {
                doc_type, doc_id, ..
            }
            | IndexingTask::DeleteDocument { doc_type, doc_id } => {
                Some((doc_type, doc_id))
            }
            _ => None,
        }
    }

    pub fn apply(
        self,
        coll: &mut Collection,
        checkpoints: &CheckpointRegistry,
    ) -> Result<Value> {
        match self {
            IndexingTask::UpdateDocument {
                doc_type,
                doc_id,
                data,
            } => {
                let doc = coll.process_doc(&doc_type, &doc_id, data)?;
                coll.update_document(doc)?;
                Ok(json!({"type": doc_type, "id": doc_id}))
            }
            IndexingTask::DeleteDocument { doc_type, doc_id } => {
                coll.delete_document(&doc_type, &doc_id)?;
                Ok(json!({"type": doc_type, "id": doc_id}))
            }
            IndexingTask::SetConfig { config } => {
                coll.set_config(config)?;
                Ok(Value::Null)
            }
            IndexingTask::AddCategoryParent {
                taxonomy,
                category,
                parent,
            } => {
                coll.category_add_parent(&taxonomy, &category, &parent)?;
                Ok(Value::Null)
            }
            IndexingTask::RemoveCategoryParent {
                taxonomy,
                category,
                parent,
            } => {
                coll.category_remove_parent(&taxonomy, &category, &parent)?;
                Ok(Value::Null)
            }
            IndexingTask::RemoveCategory { taxonomy, category } => {
                coll.category_remove(&taxonomy, &category)?;
                Ok(Value::Null)
            }
            IndexingTask::Commit => {
                coll.commit()?;
                Ok(Value::Null)
            }
            IndexingTask::Checkpoint { id, commit } => {
                let name = coll.name().to_string();
                if commit && let Err(e) = coll.commit() {
                    tracing::error!(collection = %name, checkpoint = %id, "commit failed: {e}");
                    checkpoints
                        .record_error(&name, DocumentError::new(format!("commit failed: {e}")));
                }
                checkpoints.reach(&name, &id);
                Ok(json!({"checkpoint": id}))
            }
        }
    }
}

/// Document identity used when recording a failed document, taken from the
/// raw input where possible.
pub fn raw_identity(doc: &Value) -> (Option<String>, Option<String>) {
    let text = |field: &str| {
        let value = doc.get(field)?;
        let value = match value {
            Value::Array(values) if values.len() == 1 => &values[0],
            other => other,
        };
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    (text(document::TYPE_FIELD), text(document::ID_FIELD))
}
