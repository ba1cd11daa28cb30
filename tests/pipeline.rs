use std::{sync::Arc, time::Duration};

use jsondex::{
    CheckpointInfo, CollectionConfig, ConfigDb, QueueState, ResultHandle,
    SearchRequest, ServerSettings, TaskManager,
    import::wait_for_checkpoint,
    search::Query,
    tasks::{IndexingTask, ProcessingTask, ReadonlyCategory, ReadonlyTask},
};
use serde_json::{Value, json};

/// A manager whose workers have not been started yet, so submitted work
/// stays queued.
fn stalled() -> (tempfile::TempDir, Arc<TaskManager>) {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(ConfigDb::open(&tmp.path().join("config.redb")).unwrap());
    let manager = TaskManager::new(
        tmp.path().join("collections"),
        db,
        ServerSettings::default(),
    );
    (tmp, manager)
}

fn started() -> (tempfile::TempDir, Arc<TaskManager>) {
    let (tmp, manager) = stalled();
    manager.start();
    (tmp, manager)
}

fn process(manager: &TaskManager, collection: &str, task: ProcessingTask) -> Value {
    let handle = ResultHandle::new();
    let state = manager
        .queue_processing(collection, task, false, Some(handle.clone()))
        .unwrap();
    assert_eq!(state, QueueState::Ok);
    handle
        .wait_timeout(Duration::from_secs(10))
        .expect("processing finished")
        .into_result()
        .unwrap()
}

fn index(manager: &TaskManager, collection: &str, doc: Value) {
    let state = manager
        .queue_processing(
            collection,
            ProcessingTask::IndexDocument {
                doc,
                doc_type: None,
                doc_id: None,
            },
            false,
            None,
        )
        .unwrap();
    assert_eq!(state, QueueState::Ok);
}

fn checkpoint(manager: &Arc<TaskManager>, collection: &str, commit: bool) -> CheckpointInfo {
    let (id, state) = manager.create_checkpoint(collection, commit, false).unwrap();
    assert_eq!(state, QueueState::Ok);
    wait_for_checkpoint(manager, collection, &id).unwrap()
}

fn queue_checkpoint(manager: &Arc<TaskManager>, collection: &str, commit: bool) -> String {
    let (id, state) = manager.create_checkpoint(collection, commit, false).unwrap();
    assert_eq!(state, QueueState::Ok);
    id
}

fn has_document(manager: &TaskManager, collection: &str, id: &str) -> bool {
    let reader = manager.pool().get_readonly(collection).unwrap();
    let found = reader.get_document("default", id).unwrap().is_some();
    manager.pool().release(reader);
    found
}

fn doc_count(manager: &TaskManager, collection: &str) -> u64 {
    let reader = manager.pool().get_readonly(collection).unwrap();
    let count = reader.doc_count().unwrap();
    manager.pool().release(reader);
    count
}

fn shutdown(manager: Arc<TaskManager>) {
    manager.stop();
    manager.join();
}

#[test]
fn piped_document_is_visible_after_committing_checkpoint() {
    let (_tmp, manager) = started();
    let config = CollectionConfig::from_json(json!({
        "pipes": {
            "copy": {"mappings": [{"map": [{"from": "foo", "to": "bar"}]}]}
        }
    }))
    .unwrap();
    process(&manager, "docs", ProcessingTask::SetConfig { config });
    process(
        &manager,
        "docs",
        ProcessingTask::PipeDocument {
            pipe: "copy".into(),
            doc: json!({"id": "1", "foo": "value"}),
        },
    );

    let reached = checkpoint(&manager, "docs", true);
    assert!(reached.reached);
    assert!(reached.errors.is_empty(), "{:?}", reached.errors);

    let reader = manager.pool().get_readonly("docs").unwrap();
    assert_eq!(reader.doc_count().unwrap(), 1);
    let doc = reader.get_document("default", "1").unwrap().unwrap();
    assert_eq!(doc["data"]["bar"], json!(["value"]));
    assert!(doc["data"].get("foo").is_none());
    manager.pool().release(reader);

    shutdown(manager);
}

#[test]
fn only_committing_checkpoints_publish_writes() {
    let (_tmp, manager) = started();
    index(&manager, "c", json!({"id": "1", "text": "first"}));

    let k1 = checkpoint(&manager, "c", false);
    assert!(k1.reached);
    assert_eq!(doc_count(&manager, "c"), 0);

    index(&manager, "c", json!({"id": "2", "text": "second"}));
    let k2 = checkpoint(&manager, "c", true);
    assert!(k2.reached);
    assert!(manager.checkpoints().get("c", &k1.id).unwrap().reached);
    assert_eq!(doc_count(&manager, "c"), 2);

    shutdown(manager);
}

#[test]
fn checkpoints_queued_back_to_back_are_reached_in_order() {
    let (_tmp, manager) = stalled();
    index(&manager, "c", json!({"id": "1", "text": "first"}));
    let k1 = queue_checkpoint(&manager, "c", false);
    index(&manager, "c", json!({"id": "2", "text": "second"}));
    let k2 = queue_checkpoint(&manager, "c", true);
    assert!(!manager.checkpoints().get("c", &k1).unwrap().reached);

    manager.start();
    let reached = wait_for_checkpoint(&manager, "c", &k2).unwrap();
    assert!(reached.reached);
    assert!(manager.checkpoints().get("c", &k1).unwrap().reached);
    let order: Vec<_> = manager
        .checkpoints()
        .list("c")
        .into_iter()
        .map(|info| info.id)
        .collect();
    assert_eq!(order, vec![k1, k2]);
    assert_eq!(doc_count(&manager, "c"), 2);

    shutdown(manager);
}

#[test]
fn checkpoint_sees_earlier_writes_but_not_necessarily_later_ones() {
    let (_tmp, manager) = stalled();
    index(&manager, "c", json!({"id": "t1"}));
    index(&manager, "c", json!({"id": "t2"}));
    let k = queue_checkpoint(&manager, "c", true);
    index(&manager, "c", json!({"id": "t3"}));

    manager.start();
    assert!(wait_for_checkpoint(&manager, "c", &k).unwrap().reached);
    assert!(has_document(&manager, "c", "t1"));
    assert!(has_document(&manager, "c", "t2"));
    let count = doc_count(&manager, "c");
    assert!((2..=3).contains(&count), "unexpected count {count}");

    checkpoint(&manager, "c", true);
    assert!(has_document(&manager, "c", "t3"));

    shutdown(manager);
}

#[test]
fn checkpoint_covers_every_earlier_submission() {
    let (_tmp, manager) = started();
    for i in 0..50 {
        index(&manager, "bulk", json!({"id": i.to_string(), "n": i}));
    }
    let reached = checkpoint(&manager, "bulk", true);
    assert!(reached.errors.is_empty());
    assert_eq!(doc_count(&manager, "bulk"), 50);

    shutdown(manager);
}

#[test]
fn delete_does_not_overtake_earlier_add() {
    let (_tmp, manager) = started();
    index(&manager, "c", json!({"id": "gone", "text": "short lived"}));
    let state = manager
        .queue_indexing(
            "c",
            IndexingTask::DeleteDocument {
                doc_type: "default".into(),
                doc_id: "gone".into(),
            },
            false,
            None,
        )
        .unwrap();
    assert_eq!(state, QueueState::Ok);

    checkpoint(&manager, "c", true);
    assert_eq!(doc_count(&manager, "c"), 0);

    shutdown(manager);
}

#[test]
fn failed_documents_are_reported_at_the_next_checkpoint() {
    let (_tmp, manager) = started();
    index(&manager, "c", json!({"id": "ok"}));
    index(&manager, "c", json!({"text": "no id"}));
    index(&manager, "c", json!({"id": "nested", "bad": {"x": 1}}));

    let first = checkpoint(&manager, "c", true);
    assert_eq!(first.errors.len(), 2);
    assert_eq!(first.total_errors, 2);
    // Processing runs in parallel, so the two failures arrive in any order.
    assert!(
        first
            .errors
            .iter()
            .any(|e| e.doc_id.as_deref() == Some("nested"))
    );

    let second = checkpoint(&manager, "c", true);
    assert!(second.errors.is_empty());
    assert_eq!(second.total_errors, 2);
    assert_eq!(doc_count(&manager, "c"), 1);

    shutdown(manager);
}

#[test]
fn category_edits_reindex_documents() {
    let (_tmp, manager) = started();
    let config = CollectionConfig::from_json(json!({
        "taxonomies": {"genres": {"scifi": [], "space opera": []}},
        "category_fields": {"genre": "genres"}
    }))
    .unwrap();
    process(&manager, "books", ProcessingTask::SetConfig { config });
    index(&manager, "books", json!({"id": "dune", "genre": "space opera"}));
    checkpoint(&manager, "books", true);

    let under_scifi = |manager: &TaskManager| {
        let reader = manager.pool().get_readonly("books").unwrap();
        let request = SearchRequest {
            query: Query::Category {
                field: "genre".into(),
                category: "scifi".into(),
                include_descendants: true,
            },
            from: 0,
            size: 10,
            doc_type: None,
        };
        let total = reader.search(&request).unwrap().total_matches;
        manager.pool().release(reader);
        total
    };
    assert_eq!(under_scifi(&manager), 0);

    let add = || ProcessingTask::AddCategoryParent {
        taxonomy: "genres".into(),
        category: "space opera".into(),
        parent: "scifi".into(),
    };
    process(&manager, "books", add());
    let reached = checkpoint(&manager, "books", true);
    assert!(reached.errors.is_empty());
    assert_eq!(under_scifi(&manager), 1);

    // Adding the same link again changes nothing.
    process(&manager, "books", add());
    assert!(checkpoint(&manager, "books", true).errors.is_empty());
    assert_eq!(under_scifi(&manager), 1);

    let handle = ResultHandle::new();
    manager.queue_readonly(
        ReadonlyCategory::Info,
        ReadonlyTask::GetCategory {
            collection: "books".into(),
            taxonomy: "genres".into(),
            category: "space opera".into(),
        },
        Some(handle.clone()),
    );
    let category = handle.wait().into_result().unwrap();
    assert_eq!(category["parents"], json!(["scifi"]));
    assert_eq!(category["ancestors"], json!(["scifi"]));

    process(
        &manager,
        "books",
        ProcessingTask::RemoveCategory {
            taxonomy: "genres".into(),
            category: "scifi".into(),
        },
    );
    checkpoint(&manager, "books", true);
    assert_eq!(under_scifi(&manager), 0);

    shutdown(manager);
}

#[test]
fn writes_survive_restart_through_close() {
    let tmp = tempfile::tempdir().unwrap();
    let collections = tmp.path().join("collections");
    let db = Arc::new(ConfigDb::open(&tmp.path().join("config.redb")).unwrap());

    let manager = TaskManager::new(
        collections.clone(),
        Arc::clone(&db),
        ServerSettings::default(),
    );
    manager.start();
    index(&manager, "c", json!({"id": "1"}));
    // Reached without committing; the writer commits when its lane exits.
    checkpoint(&manager, "c", false);
    shutdown(manager);

    let manager = TaskManager::new(collections, db, ServerSettings::default());
    manager.start();
    assert_eq!(doc_count(&manager, "c"), 1);
    shutdown(manager);
}

#[test]
fn shutdown_rejects_new_work() {
    let (_tmp, manager) = started();
    index(&manager, "c", json!({"id": "1"}));
    checkpoint(&manager, "c", true);
    manager.stop();

    assert_eq!(
        manager
            .queue_processing(
                "c",
                ProcessingTask::IndexDocument {
                    doc: json!({"id": "2"}),
                    doc_type: None,
                    doc_id: None,
                },
                false,
                None,
            )
            .unwrap(),
        QueueState::Closed
    );
    assert_eq!(
        manager.queue_readonly(ReadonlyCategory::Status, ReadonlyTask::ServerStatus, None),
        QueueState::Closed
    );
    manager.join();
}
