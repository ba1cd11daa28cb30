//! Worker thread bodies. Each loop runs until its queue is closed.

use std::sync::Arc;

use serde_json::json;

use crate::{
    checkpoint::DocumentError,
    error::Error,
    result::{TaskOutcome, complete},
    task_manager::{IndexingQueue, TaskManager},
    tasks::{IndexingTask, Job, Processed, ReadonlyTask},
};

pub(crate) fn readonly_loop(manager: Arc<TaskManager>) {
    while let Some((queue, job)) = manager.next_readonly() {
        let outcome = run_readonly(&manager, &job.task);
        if !outcome.is_success() {
            tracing::debug!(queue, status = outcome.status, "readonly task failed");
        }
        complete(&job.result, outcome);
    }
    tracing::debug!("readonly worker exiting");
}

fn run_readonly(manager: &TaskManager, task: &ReadonlyTask) -> TaskOutcome {
    let Some(collection) = task.handle_collection() else {
        return task.execute(manager, None).into();
    };
    let handle = match manager.pool().get_readonly(collection) {
        Ok(handle) => handle,
        Err(e) => return TaskOutcome::error(&e),
    };
    let outcome = task.execute(manager, Some(&handle)).into();
    manager.pool().release(handle);
    outcome
}

pub(crate) fn processing_loop(manager: Arc<TaskManager>) {
    while let Some((collection, pjob)) = manager.next_processing() {
        let Job { task, result } = pjob.job;
        let identity = task.document_identity();

        let outcome = match task.execute(&manager, &collection) {
            Ok(processed) => forward_processed(&manager, &collection, processed),
            Err(e) => {
                tracing::warn!(collection, "processing failed: {e}");
                if let Some((doc_type, doc_id)) = identity {
                    manager.checkpoints().record_error(
                        &collection,
                        DocumentError {
                            doc_type,
                            doc_id,
                            msg: e.to_string(),
                        },
                    );
                }
                TaskOutcome::error(&e)
            }
        };

        complete(&result, outcome);
        manager.finish_processing(&collection, pjob.seq);
    }
    tracing::debug!("processing worker exiting");
}

/// Hand a processing task's output to the indexing lane. A task whose
/// indexing work could not all be forwarded fails with `ShuttingDown`.
fn forward_processed(
    manager: &Arc<TaskManager>,
    collection: &str,
    processed: Processed,
) -> TaskOutcome {
    let queued = processed.indexing.len();
    let mut dropped = 0;
    for indexing in processed.indexing {
        if manager
            .queue_indexing_from_processing(collection, indexing, None)
            .is_err()
        {
            dropped += 1;
        }
    }
    let failed = processed.errors.len();
    for error in processed.errors {
        tracing::warn!(collection, "{}", error.msg);
        manager.checkpoints().record_error(collection, error);
    }
    if dropped > 0 {
        tracing::warn!(collection, dropped, "indexing work dropped during shutdown");
        return TaskOutcome::error(&Error::ShuttingDown);
    }
    TaskOutcome::accepted(json!({"queued": queued, "failed": failed}))
}

pub(crate) fn indexing_loop(
    manager: Arc<TaskManager>,
    collection: String,
    queue: Arc<IndexingQueue>,
) {
    tracing::debug!(collection, "indexing worker started");
    while let Some(Job { task, result }) = queue.pop() {
        let document = task
            .document()
            .map(|(doc_type, doc_id)| (doc_type.to_string(), doc_id.to_string()));

        let applied = match manager.pool().get_writable(&collection) {
            Ok(mut handle) => {
                let applied = task.apply(&mut handle, manager.checkpoints());
                manager.pool().release(handle);
                applied
            }
            Err(e) => {
                if let IndexingTask::Checkpoint { id, .. } = &task {
                    // The checkpoint still marks its place in the sequence.
                    manager.checkpoints().record_error(
                        &collection,
                        DocumentError::new(format!("collection unavailable: {e}")),
                    );
                    manager.checkpoints().reach(&collection, id);
                }
                Err(e)
            }
        };

        if let Err(e) = &applied {
            tracing::error!(collection, "indexing task failed: {e}");
            if let Some((doc_type, doc_id)) = &document {
                manager.checkpoints().record_error(
                    &collection,
                    DocumentError::for_doc(doc_type, doc_id, e.to_string()),
                );
            }
        }
        complete(&result, applied.into());
    }

    close_writer(&manager, &collection);
    tracing::debug!(collection, "indexing worker exiting");
}

/// Commit and drop the collection's cached writer, if any.
fn close_writer(manager: &TaskManager, collection: &str) {
    let Some(mut handle) = manager.pool().take_writable(collection) else {
        return;
    };
    if let Err(e) = handle.close() {
        tracing::error!(collection, "failed to commit on shutdown: {e}");
    }
}
