//! jsondex - a JSON document search server core.
//!
//! Documents live in named collections, each backed by a
//! [Tantivy](https://github.com/quickwit-oss/tantivy) index. All work goes
//! through a [`TaskManager`]: readonly tasks (searches, lookups) run on a
//! shared worker pool, processing tasks (normalisation, pipes, category
//! edits) run in parallel, and every write to a collection is applied by
//! that collection's single indexing worker in submission order.
//! Checkpoints mark a point in a collection's write sequence; once reached,
//! every earlier write has been applied.
//!
//! # Quick start
//!
//! ```no_run
//! use jsondex::{DataDir, TaskManager};
//! use jsondex::tasks::ProcessingTask;
//! use serde_json::json;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let manager = TaskManager::open(&data_dir).unwrap();
//! manager.start();
//!
//! manager
//!     .queue_processing(
//!         "books",
//!         ProcessingTask::IndexDocument {
//!             doc: json!({"id": "1", "title": "Dune"}),
//!             doc_type: None,
//!             doc_id: None,
//!         },
//!         false,
//!         None,
//!     )
//!     .unwrap();
//! let (id, _state) = manager.create_checkpoint("books", true, false).unwrap();
//! let reached = jsondex::import::wait_for_checkpoint(&manager, "books", &id).unwrap();
//! assert!(reached.errors.is_empty());
//!
//! manager.stop();
//! manager.join();
//! ```

pub mod checkpoint;
pub mod cli;
pub mod collection;
pub mod collection_config;
pub mod collection_pool;
pub mod config_db;
pub mod data_dir;
pub mod document;
pub mod error;
pub mod import;
pub mod mcp;
pub mod pipe;
pub mod queue;
pub mod result;
pub mod search;
pub mod settings;
pub mod task_manager;
pub mod tasks;
pub mod taxonomy;
pub mod validation;
mod worker;

pub use checkpoint::{CheckpointInfo, CheckpointRegistry, DocumentError};
pub use collection::Collection;
pub use collection_config::CollectionConfig;
pub use collection_pool::CollectionPool;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use queue::QueueState;
pub use result::{ResultHandle, TaskOutcome};
pub use search::{Query, SearchRequest, SearchResults};
pub use settings::ServerSettings;
pub use task_manager::TaskManager;
