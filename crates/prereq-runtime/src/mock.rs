use crate::runner::{CommandRunner, ProcessRunner};
use crate::{BuildEnv, RuntimeError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl RecordedCommand {
    pub fn line(&self) -> String {
        self.argv.join(" ")
    }

    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }
}

/// Runner that records every invocation.
///
/// By default nothing is executed and every command succeeds. With
/// [`executing`](Self::executing) commands really run, which lets tests use
/// `mkdir`/`touch` build steps to produce install trees.
pub struct MockRunner {
    calls: Mutex<Vec<RecordedCommand>>,
    failures: Vec<String>,
    inner: Option<ProcessRunner>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Vec::new(),
            inner: None,
        }
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executing() -> Self {
        Self {
            inner: Some(ProcessRunner::new()),
            ..Self::default()
        }
    }

    /// Report a non-zero exit for any command whose line contains `needle`.
    #[must_use]
    pub fn fail_when(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Recorded lines containing `needle`, in invocation order.
    pub fn lines_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .iter()
            .map(RecordedCommand::line)
            .filter(|l| l.contains(needle))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &BuildEnv,
    ) -> Result<bool, RuntimeError> {
        let record = RecordedCommand {
            argv: argv.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        };
        let line = record.line();
        self.calls
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push(record);

        if self.failures.iter().any(|f| line.contains(f.as_str())) {
            return Ok(false);
        }
        match &self.inner {
            Some(runner) => runner.run(argv, cwd, env),
            None => Ok(true),
        }
    }
}
