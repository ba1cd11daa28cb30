use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Error;

/// Final outcome of a task: an HTTP-like status and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub status: u16,
    pub body: Value,
}

impl TaskOutcome {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    pub fn accepted(body: Value) -> Self {
        Self { status: 202, body }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            status: err.status_code(),
            body: json!({
                "err": err.to_string(),
                "kind": err.kind(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body of a successful outcome, or the failure as an error.
    pub fn into_result(self) -> crate::error::Result<Value> {
        if self.is_success() {
            return Ok(self.body);
        }
        let text = |key: &str| {
            self.body
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Err(Error::Task {
            status: self.status,
            kind: text("kind"),
            message: text("err"),
        })
    }

    /// Error message of a failed outcome.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("err").and_then(Value::as_str)
    }
}

impl From<crate::error::Result<Value>> for TaskOutcome {
    fn from(result: crate::error::Result<Value>) -> Self {
        match result {
            Ok(body) => TaskOutcome::ok(body),
            Err(e) => TaskOutcome::error(&e),
        }
    }
}

/// Write-once slot for a task's outcome, shared between the submitter and
/// the worker that runs the task.
#[derive(Clone, Default)]
pub struct ResultHandle {
    inner: Arc<(Mutex<Option<TaskOutcome>>, Condvar)>,
}

impl ResultHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the outcome and wake waiters.
    ///
    /// # Panics
    ///
    /// Panics if an outcome was already set.
    pub fn set(&self, outcome: TaskOutcome) {
        let (slot, ready) = &*self.inner;
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        assert!(slot.is_none(), "task outcome set twice");
        *slot = Some(outcome);
        drop(slot);
        ready.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        self.try_get().is_some()
    }

    pub fn try_get(&self) -> Option<TaskOutcome> {
        let (slot, _) = &*self.inner;
        slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Block until the outcome is set.
    pub fn wait(&self) -> TaskOutcome {
        let (slot, ready) = &*self.inner;
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the outcome is set or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let (slot, ready) = &*self.inner;
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Complete an optional handle.
pub fn complete(handle: &Option<ResultHandle>, outcome: TaskOutcome) {
    if let Some(handle) = handle {
        handle.set(outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_outcome_from_other_thread() {
        let handle = ResultHandle::new();
        assert!(handle.try_get().is_none());

        let setter = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set(TaskOutcome::ok(json!({"n": 1})));
        });
        let outcome = handle.wait();
        t.join().unwrap();

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, json!({"n": 1}));
        assert!(handle.is_ready());
    }

    #[test]
    fn wait_timeout_expires() {
        let handle = ResultHandle::new();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    #[should_panic(expected = "set twice")]
    fn second_set_panics() {
        let handle = ResultHandle::new();
        handle.set(TaskOutcome::ok(Value::Null));
        handle.set(TaskOutcome::ok(Value::Null));
    }

    #[test]
    fn error_outcome_shape() {
        let outcome = TaskOutcome::error(&Error::not_found("collection", "x"));
        assert_eq!(outcome.status, 404);
        assert_eq!(outcome.body["kind"], "not_found");
        assert_eq!(outcome.error_message(), Some("collection not found: x"));
        assert!(!outcome.is_success());

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "collection not found: x");
        assert_eq!(
            TaskOutcome::created(json!({"a": 1})).into_result().unwrap(),
            json!({"a": 1})
        );
    }
}
