//! One tool call running on its own OS thread.
//!
//! The main loop polls [`ToolExecution::poll`] on every tick; it never
//! blocks on a worker except in [`ToolExecution::join`] at shutdown.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use arbor_core::ids::ToolCallId;
use arbor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use crate::error::EngineError;

#[derive(Debug, Default)]
struct ResultCell {
    done: bool,
    result: Option<ToolResult>,
}

#[derive(Debug)]
pub struct ToolExecution {
    pub call_id: ToolCallId,
    pub tool_name: String,
    cell: Arc<Mutex<ResultCell>>,
    handle: Option<JoinHandle<()>>,
}

impl ToolExecution {
    /// Start `tool` on a worker thread.
    pub fn spawn(
        tool: Arc<dyn Tool>,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<Self, EngineError> {
        let cell = Arc::new(Mutex::new(ResultCell::default()));
        let call_id = ctx.tool_call_id.clone();
        let tool_name = tool.name().to_string();

        let worker_cell = Arc::clone(&cell);
        let handle = std::thread::Builder::new()
            .name(format!("tool-{tool_name}"))
            .spawn(move || {
                let start = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| tool.execute(args, &ctx)));
                let result = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => error_result(&e, start.elapsed()),
                    Err(_) => error_result(&ToolError::Panicked, start.elapsed()),
                };
                let mut cell = worker_cell.lock();
                cell.result = Some(result);
                cell.done = true;
            })
            .map_err(|e| EngineError::Internal(format!("failed to spawn tool worker: {e}")))?;

        Ok(Self {
            call_id,
            tool_name,
            cell,
            handle: Some(handle),
        })
    }

    /// An execution that finished before it started, e.g. a call to a tool
    /// the agent may not use.
    pub fn finished(call_id: ToolCallId, tool_name: impl Into<String>, error: &ToolError) -> Self {
        Self {
            call_id,
            tool_name: tool_name.into(),
            cell: Arc::new(Mutex::new(ResultCell {
                done: true,
                result: Some(error_result(error, Duration::ZERO)),
            })),
            handle: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cell.lock().done
    }

    /// Take the result if the worker has finished. Returns `None` while it
    /// is still running and after the result was taken.
    pub fn poll(&mut self) -> Option<ToolResult> {
        let result = {
            let mut cell = self.cell.lock();
            if !cell.done {
                return None;
            }
            cell.result.take()
        };
        // The worker already stored its result, so this only reaps it.
        self.reap();
        result
    }

    /// Block until the worker exits.
    pub fn join(mut self) -> Option<ToolResult> {
        self.reap();
        self.cell.lock().result.take()
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(tool = %self.tool_name, "tool worker exited abnormally");
            }
        }
    }
}

fn error_result(error: &ToolError, duration: Duration) -> ToolResult {
    ToolResult {
        content: error.to_string(),
        is_error: true,
        duration,
    }
}
