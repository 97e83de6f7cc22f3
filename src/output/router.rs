// src/output/router.rs

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::logging::WORKER_OUTPUT;
use crate::output::interpreter::Interpreter;
use crate::protocol::reader::OutputStream;

/// Forwards worker output to the interpreter of the current run.
///
/// The reader tasks live as long as the worker process, which can outlive a
/// run; each run attaches its own interpreter and detaches it at the end.
#[derive(Debug, Clone, Default)]
pub struct OutputRouter {
    current: Arc<Mutex<Option<Arc<Interpreter>>>>,
}

impl OutputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Interpreter>>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self, interpreter: Arc<Interpreter>) {
        *self.lock() = Some(interpreter);
    }

    pub fn detach(&self) {
        *self.lock() = None;
    }

    pub fn route(&self, stream: OutputStream, line: &str) {
        // Clone out of the lock so the interpreter never runs under it.
        let current = self.lock().clone();
        match current {
            Some(interpreter) => interpreter.handle_line(stream, line),
            None => debug!(target: WORKER_OUTPUT, ?stream, idle = true, "{}", line),
        }
    }

    pub fn worker_exited(&self, code: Option<i32>) {
        let current = self.lock().clone();
        if let Some(interpreter) = current {
            interpreter.worker_exited(code);
        }
    }
}
