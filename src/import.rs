//! Bulk loading of JSON Lines files through a running [`TaskManager`].
//!
//! Lines are parsed in parallel; submission is sequential so documents enter
//! the collection in file order. Submissions accept throttling and back off
//! while the processing queue is busy.

use std::{sync::Arc, thread, time::Duration};

use rayon::prelude::*;
use serde_json::Value;

use crate::{
    checkpoint::CheckpointInfo,
    error::{Error, Result},
    queue::QueueState,
    task_manager::TaskManager,
    tasks::ProcessingTask,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(500);
const CHECKPOINT_POLL: Duration = Duration::from_millis(20);

/// A line that could not be parsed as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub submitted: usize,
    pub skipped: Vec<SkippedLine>,
    /// The checkpoint queued after the last document, once reached. Its
    /// `errors` list the documents that failed processing or indexing.
    pub checkpoint: CheckpointInfo,
}

/// Parse JSON Lines text. Blank lines are ignored.
pub fn parse_lines(text: &str) -> (Vec<Value>, Vec<SkippedLine>) {
    let lines: Vec<&str> = text.lines().collect();
    let parsed: Vec<(usize, std::result::Result<Value, String>)> = lines
        .par_iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let doc = match serde_json::from_str::<Value>(line) {
                Ok(doc @ Value::Object(_)) => Ok(doc),
                Ok(_) => Err("expected a JSON object".to_string()),
                Err(e) => Err(e.to_string()),
            };
            (i + 1, doc)
        })
        .collect();

    let mut docs = Vec::with_capacity(parsed.len());
    let mut skipped = Vec::new();
    for (line, doc) in parsed {
        match doc {
            Ok(doc) => docs.push(doc),
            Err(msg) => skipped.push(SkippedLine { line, msg }),
        }
    }
    (docs, skipped)
}

/// Retry `submit` until it is admitted. THROTTLED and FULL are both
/// transient for a bulk loader; CLOSED is not.
fn submit_with_backoff(
    mut submit: impl FnMut() -> Result<QueueState>,
) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match submit()? {
            QueueState::Ok => return Ok(()),
            QueueState::Closed => return Err(Error::ShuttingDown),
            state @ (QueueState::Throttled | QueueState::Full) => {
                tracing::trace!(?state, ?backoff, "queue busy, backing off");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Block until checkpoint `id` is reached.
pub fn wait_for_checkpoint(
    manager: &TaskManager,
    collection: &str,
    id: &str,
) -> Result<CheckpointInfo> {
    loop {
        let Some(info) = manager.checkpoints().get(collection, id) else {
            return Err(Error::not_found("checkpoint", id));
        };
        if info.reached {
            return Ok(info);
        }
        if manager.is_stopping() {
            return Err(Error::ShuttingDown);
        }
        thread::sleep(CHECKPOINT_POLL);
    }
}

/// Queue `docs` for `collection`, optionally through `pipe`, then queue a
/// checkpoint and wait for it. The manager must be started.
pub fn import_documents(
    manager: &Arc<TaskManager>,
    collection: &str,
    docs: Vec<Value>,
    pipe: Option<&str>,
    commit: bool,
) -> Result<(usize, CheckpointInfo)> {
    let mut submitted = 0;
    for doc in docs {
        let task = match pipe {
            Some(pipe) => ProcessingTask::PipeDocument {
                pipe: pipe.to_string(),
                doc,
            },
            None => ProcessingTask::IndexDocument {
                doc,
                doc_type: None,
                doc_id: None,
            },
        };
        submit_with_backoff(|| {
            manager.queue_processing(collection, task.clone(), true, None)
        })?;
        submitted += 1;
    }
    tracing::info!(collection, submitted, "documents queued");

    let mut checkpoint = None;
    submit_with_backoff(|| {
        let (id, state) = manager.create_checkpoint(collection, commit, true)?;
        if state.is_ok() {
            checkpoint = Some(id);
        }
        Ok(state)
    })?;
    let id = checkpoint
        .ok_or_else(|| Error::InvalidState("checkpoint was not created".into()))?;
    let info = wait_for_checkpoint(manager, collection, &id)?;
    Ok((submitted, info))
}

/// Read a JSON Lines file and import it.
pub fn import_file(
    manager: &Arc<TaskManager>,
    collection: &str,
    path: &std::path::Path,
    pipe: Option<&str>,
    commit: bool,
) -> Result<ImportReport> {
    let text = std::fs::read_to_string(path)?;
    let (docs, skipped) = parse_lines(&text);
    for line in &skipped {
        tracing::warn!(line = line.line, "skipping unparsable line: {}", line.msg);
    }
    let (submitted, checkpoint) =
        import_documents(manager, collection, docs, pipe, commit)?;
    Ok(ImportReport {
        submitted,
        skipped,
        checkpoint,
    })
}
