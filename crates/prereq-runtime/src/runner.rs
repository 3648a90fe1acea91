use crate::{BuildEnv, RuntimeError};
use std::path::Path;
use std::process::Command;

/// Executes external commands for retrieval, builds, and rpath patching.
pub trait CommandRunner: Send + Sync {
    /// Run `argv` in `cwd` with the process environment of `env`.
    ///
    /// Returns `Ok(true)` on a zero exit status, `Ok(false)` on any other
    /// exit, and an error only when the process could not be started.
    fn run(&self, argv: &[String], cwd: Option<&Path>, env: &BuildEnv)
        -> Result<bool, RuntimeError>;

    /// Whether commands are only printed.
    fn dry_run(&self) -> bool {
        false
    }
}

/// Render an argv list the way a shell user would type it.
pub fn format_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'') {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands as child processes, or only logs them in dry-run mode.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    dry_run: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &BuildEnv,
    ) -> Result<bool, RuntimeError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RuntimeError::ExecFailed("empty command".to_owned()));
        };
        let line = format_command(argv);
        if self.dry_run {
            tracing::info!("Would RUN: {line}");
            return Ok(true);
        }
        match cwd {
            Some(dir) => tracing::info!("RUN: {line} (in {})", dir.display()),
            None => tracing::info!("RUN: {line}"),
        }

        let mut cmd = Command::new(program);
        cmd.args(args).env_clear().envs(env.process_env());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let status = cmd
            .status()
            .map_err(|e| RuntimeError::ExecFailed(format!("{program}: {e}")))?;
        if !status.success() {
            tracing::debug!("'{line}' exited with {status}");
        }
        Ok(status.success())
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}
