use std::{sync::Arc, time::Duration};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    collection_config::CollectionConfig,
    error,
    queue::QueueState,
    result::{ResultHandle, TaskOutcome},
    search::{DEFAULT_PAGE_SIZE, Query, SearchRequest},
    task_manager::TaskManager,
    tasks::{IndexingTask, ProcessingTask, ReadonlyCategory, ReadonlyTask},
};

/// How long a tool call waits for its task before giving up.
const TASK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct JsondexMcpServer {
    manager: Arc<TaskManager>,
    tool_router: ToolRouter<Self>,
}

impl JsondexMcpServer {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    /// Submit a task with a fresh result handle and wait for its outcome off
    /// the async runtime.
    async fn submit(
        &self,
        submit: impl FnOnce(ResultHandle) -> error::Result<QueueState> + Send,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let handle = ResultHandle::new();
        let state = match submit(handle.clone()) {
            Ok(state) => state,
            Err(e) => return Ok(outcome_result(TaskOutcome::error(&e))),
        };
        if let Some(rejected) = rejection(state) {
            return Ok(rejected);
        }

        let outcome = tokio::task::spawn_blocking(move || {
            handle.wait_timeout(TASK_TIMEOUT)
        })
        .await
        .map_err(|e| mcp_error("task wait failed", e))?;

        Ok(match outcome {
            Some(outcome) => outcome_result(outcome),
            None => tool_error("timeout", "task did not finish in time"),
        })
    }

    async fn readonly(
        &self,
        category: ReadonlyCategory,
        task: ReadonlyTask,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let manager = Arc::clone(&self.manager);
        self.submit(move |handle| {
            Ok(manager.queue_readonly(category, task, Some(handle)))
        })
        .await
    }

    async fn processing(
        &self,
        collection: String,
        task: ProcessingTask,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let manager = Arc::clone(&self.manager);
        self.submit(move |handle| {
            manager.queue_processing(&collection, task, false, Some(handle))
        })
        .await
    }
}

#[tool_router(router = tool_router)]
impl JsondexMcpServer {
    #[tool(
        name = "jsondex_add_document",
        description = "Add or replace a JSON document in a collection. The type and id come from the arguments or the document's own \"type\" and \"id\" fields."
    )]
    pub async fn jsondex_add_document(
        &self,
        params: Parameters<AddDocumentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        self.processing(
            p.collection,
            ProcessingTask::IndexDocument {
                doc: p.document,
                doc_type: p.doc_type,
                doc_id: p.doc_id,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_pipe_document",
        description = "Send a JSON document through one of the collection's pipes before indexing."
    )]
    pub async fn jsondex_pipe_document(
        &self,
        params: Parameters<PipeDocumentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        self.processing(
            p.collection,
            ProcessingTask::PipeDocument {
                pipe: p.pipe,
                doc: p.document,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_delete_document",
        description = "Delete a document by type and id."
    )]
    pub async fn jsondex_delete_document(
        &self,
        params: Parameters<DocumentRefParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let manager = Arc::clone(&self.manager);
        self.submit(move |handle| {
            manager.queue_indexing(
                &p.collection,
                IndexingTask::DeleteDocument {
                    doc_type: p.doc_type,
                    doc_id: p.doc_id,
                },
                false,
                Some(handle),
            )
        })
        .await
    }

    #[tool(
        name = "jsondex_set_config",
        description = "Replace a collection's configuration (pipes, taxonomies, category_fields)."
    )]
    pub async fn jsondex_set_config(
        &self,
        params: Parameters<SetConfigParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let config = match CollectionConfig::from_json(p.config) {
            Ok(config) => config,
            Err(e) => return Ok(outcome_result(TaskOutcome::error(&e))),
        };
        self.processing(p.collection, ProcessingTask::SetConfig { config })
            .await
    }

    #[tool(
        name = "jsondex_add_category_parent",
        description = "Make one category a parent of another within a taxonomy. Documents using the category are re-indexed."
    )]
    pub async fn jsondex_add_category_parent(
        &self,
        params: Parameters<CategoryParentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        self.processing(
            p.collection,
            ProcessingTask::AddCategoryParent {
                taxonomy: p.taxonomy,
                category: p.category,
                parent: p.parent,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_search",
        description = "Search a collection. Pass `text` for a full-text search, or `query` for a structured query."
    )]
    pub async fn jsondex_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let query = match (p.query, p.text) {
            (Some(query), _) => match serde_json::from_value::<Query>(query) {
                Ok(query) => query,
                Err(e) => {
                    return Ok(tool_error(
                        "invalid_value",
                        &format!("invalid query: {e}"),
                    ));
                }
            },
            (None, Some(text)) => Query::Text(text),
            (None, None) => Query::MatchAll,
        };
        let request = SearchRequest {
            query,
            from: p.from.unwrap_or(0),
            size: p.size.unwrap_or(DEFAULT_PAGE_SIZE),
            doc_type: p.doc_type,
        };
        if let Err(e) = request.validate() {
            return Ok(outcome_result(TaskOutcome::error(&e)));
        }

        self.readonly(
            ReadonlyCategory::Search,
            ReadonlyTask::Search {
                collection: p.collection,
                request,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_get_document",
        description = "Fetch a stored document and its indexed terms."
    )]
    pub async fn jsondex_get_document(
        &self,
        params: Parameters<DocumentRefParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        self.readonly(
            ReadonlyCategory::Search,
            ReadonlyTask::GetDocument {
                collection: p.collection,
                doc_type: p.doc_type,
                doc_id: p.doc_id,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_list_collections",
        description = "List the names of all collections."
    )]
    pub async fn jsondex_list_collections(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.readonly(ReadonlyCategory::Info, ReadonlyTask::ListCollections)
            .await
    }

    #[tool(
        name = "jsondex_collection_info",
        description = "Document count and configuration of a collection."
    )]
    pub async fn jsondex_collection_info(
        &self,
        params: Parameters<CollectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.readonly(
            ReadonlyCategory::Info,
            ReadonlyTask::CollectionInfo {
                collection: params.0.collection,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_create_checkpoint",
        description = "Create a checkpoint. It is reached once every change submitted before it has been applied; with commit=true the changes are also made visible to searches."
    )]
    pub async fn jsondex_create_checkpoint(
        &self,
        params: Parameters<CreateCheckpointParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let commit = p.commit.unwrap_or(true);
        let (id, state) =
            match self.manager.create_checkpoint(&p.collection, commit, false) {
                Ok(created) => created,
                Err(e) => return Ok(outcome_result(TaskOutcome::error(&e))),
            };
        if let Some(rejected) = rejection(state) {
            return Ok(rejected);
        }
        Ok(outcome_result(TaskOutcome::created(
            json!({"checkid": id, "commit": commit}),
        )))
    }

    #[tool(
        name = "jsondex_get_checkpoint",
        description = "State of a checkpoint, with errors reported since the previous one."
    )]
    pub async fn jsondex_get_checkpoint(
        &self,
        params: Parameters<CheckpointParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        self.readonly(
            ReadonlyCategory::Info,
            ReadonlyTask::GetCheckpoint {
                collection: p.collection,
                id: p.id,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_list_checkpoints",
        description = "All remembered checkpoints of a collection, oldest first."
    )]
    pub async fn jsondex_list_checkpoints(
        &self,
        params: Parameters<CollectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.readonly(
            ReadonlyCategory::Info,
            ReadonlyTask::ListCheckpoints {
                collection: params.0.collection,
            },
        )
        .await
    }

    #[tool(
        name = "jsondex_status",
        description = "Queue depths and worker counts."
    )]
    pub async fn jsondex_status(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        self.readonly(ReadonlyCategory::Status, ReadonlyTask::ServerStatus)
            .await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for JsondexMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::new("jsondex", env!("CARGO_PKG_VERSION"));
        server_info.title = Some("jsondex MCP".to_string());
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Writes are asynchronous: after adding documents, create a checkpoint with commit=true and poll jsondex_get_checkpoint until it is reached before searching."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddDocumentParams {
    /// Collection name.
    pub collection: String,
    /// The document: a JSON object of scalar or array-of-scalar fields.
    pub document: Value,
    /// Document type (default: the document's "type" field, or "default").
    pub doc_type: Option<String>,
    /// Document id (default: the document's "id" field).
    pub doc_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipeDocumentParams {
    pub collection: String,
    /// Name of the pipe to run.
    pub pipe: String,
    pub document: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DocumentRefParams {
    pub collection: String,
    pub doc_type: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetConfigParams {
    pub collection: String,
    /// `{"pipes": {...}, "taxonomies": {...}, "category_fields": {...}}`
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CategoryParentParams {
    pub collection: String,
    pub taxonomy: String,
    pub category: String,
    pub parent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    pub collection: String,
    /// Full-text query string.
    pub text: Option<String>,
    /// Structured query, e.g. {"field": {"name": "tag", "value": "x"}}.
    pub query: Option<Value>,
    /// Offset of the first result (default: 0).
    pub from: Option<usize>,
    /// Page size (default: 10, at most 1000).
    pub size: Option<usize>,
    /// Only return documents of this type.
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CollectionParams {
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateCheckpointParams {
    pub collection: String,
    /// Commit when the checkpoint is reached (default: true).
    pub commit: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckpointParams {
    pub collection: String,
    /// Checkpoint id returned by jsondex_create_checkpoint.
    pub id: String,
}

fn rejection(state: QueueState) -> Option<CallToolResult> {
    match state {
        QueueState::Ok => None,
        QueueState::Throttled => Some(tool_error(
            "throttled",
            "server busy, retry later",
        )),
        QueueState::Full => Some(tool_error(
            "unavailable",
            "server unavailable: queue full",
        )),
        QueueState::Closed => Some(tool_error(
            "shutting_down",
            "server is shutting down",
        )),
    }
}

fn tool_error(kind: &str, message: &str) -> CallToolResult {
    let mut result = CallToolResult::error(vec![Content::text(message.to_string())]);
    result.structured_content = Some(json!({"err": message, "kind": kind}));
    result
}

fn outcome_result(outcome: TaskOutcome) -> CallToolResult {
    let success = outcome.is_success();
    let text = match (success, outcome.error_message()) {
        (false, Some(msg)) => msg.to_string(),
        _ => serde_json::to_string_pretty(&outcome.body).unwrap_or_default(),
    };
    let mut result = CallToolResult::success(vec![Content::text(text)]);
    result.structured_content = Some(outcome.body);
    result.is_error = Some(!success);
    result
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(manager: Arc<TaskManager>) -> error::Result<()> {
    manager.start();
    let server = JsondexMcpServer::new(Arc::clone(&manager));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let served: error::Result<()> = runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    });

    manager.stop();
    manager.join();
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config_db::ConfigDb, settings::ServerSettings};

    fn structured(result: &CallToolResult) -> Value {
        result.structured_content.clone().expect("structured")
    }

    #[tokio::test]
    async fn add_checkpoint_and_search() {
        let tmp = tempfile::tempdir().unwrap();
        let config_db =
            Arc::new(ConfigDb::open(&tmp.path().join("config.redb")).unwrap());
        let manager = TaskManager::new(
            tmp.path().join("collections"),
            config_db,
            ServerSettings::default(),
        );
        manager.start();
        let server = JsondexMcpServer::new(Arc::clone(&manager));

        let added = server
            .jsondex_add_document(Parameters(AddDocumentParams {
                collection: "notes".into(),
                document: json!({"id": "1", "text": "Rust is fast"}),
                doc_type: None,
                doc_id: None,
            }))
            .await
            .unwrap();
        assert_eq!(added.is_error, Some(false));

        let created = server
            .jsondex_create_checkpoint(Parameters(CreateCheckpointParams {
                collection: "notes".into(),
                commit: Some(true),
            }))
            .await
            .unwrap();
        let id = structured(&created)["checkid"].as_str().unwrap().to_string();

        let mut reached = false;
        for _ in 0..200 {
            let checkpoint = server
                .jsondex_get_checkpoint(Parameters(CheckpointParams {
                    collection: "notes".into(),
                    id: id.clone(),
                }))
                .await
                .unwrap();
            if structured(&checkpoint)["reached"] == json!(true) {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(reached, "checkpoint never reached");

        let found = server
            .jsondex_search(Parameters(SearchParams {
                collection: "notes".into(),
                text: Some("rust".into()),
                query: None,
                from: None,
                size: None,
                doc_type: None,
            }))
            .await
            .unwrap();
        let body = structured(&found);
        assert_eq!(body["total_matches"], 1);
        assert_eq!(body["items"][0]["doc_id"], "1");

        let missing = server
            .jsondex_get_document(Parameters(DocumentRefParams {
                collection: "notes".into(),
                doc_type: "default".into(),
                doc_id: "nope".into(),
            }))
            .await
            .unwrap();
        assert_eq!(missing.is_error, Some(true));
        assert_eq!(structured(&missing)["kind"], "not_found");

        manager.stop();
        manager.join();
    }

    #[tokio::test]
    async fn stopped_manager_reports_shutting_down() {
        let tmp = tempfile::tempdir().unwrap();
        let config_db =
            Arc::new(ConfigDb::open(&tmp.path().join("config.redb")).unwrap());
        let manager = TaskManager::new(
            tmp.path().join("collections"),
            config_db,
            ServerSettings::default(),
        );
        manager.stop();
        let server = JsondexMcpServer::new(manager);

        let status = server.jsondex_status().await.unwrap();
        assert_eq!(status.is_error, Some(true));
        assert_eq!(structured(&status)["kind"], "shutting_down");
    }
}
