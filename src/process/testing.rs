//! Recording runner for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Command, ExecResult, Output, ProcessResult, ProcessRunner};

type Responder = Box<dyn Fn(&Command) -> ExecResult + Send + Sync>;

/// Records every command and answers with a scripted result.
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<(Command, Output)>>,
    responder: Responder,
}

impl RecordingRunner {
    pub(crate) fn new(responder: impl Fn(&Command) -> ExecResult + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Every command exits with `code` and no output.
    pub(crate) fn exiting(code: i32) -> Self {
        Self::new(move |_| exited(code, ""))
    }

    pub(crate) fn calls(&self) -> Vec<(Command, Output)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.calls().into_iter().map(|(c, _)| c).collect()
    }
}

pub(crate) fn exited(code: i32, stdout: &str) -> ExecResult {
    ExecResult {
        exit_code: code,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration: Duration::ZERO,
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, cmd: &Command, output: &Output) -> ProcessResult<ExecResult> {
        self.calls
            .lock()
            .unwrap()
            .push((cmd.clone(), output.clone()));
        Ok((self.responder)(cmd))
    }
}
