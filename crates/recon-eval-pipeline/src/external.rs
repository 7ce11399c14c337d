//! Blocking invocation of external collaborators.
//!
//! The child's stdout and stderr both go straight into a log file while the
//! caller waits. The exit status and the files the tool wrote are the only
//! result channel. There is no timeout: a hanging tool hangs the caller.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::EvalError;

/// A program plus arguments, labelled for diagnostics.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Insert `arg` at `index`, or append past the end.
    pub fn insert_arg(&mut self, index: usize, arg: impl Into<OsString>) {
        let index = index.min(self.args.len());
        self.args.insert(index, arg.into());
    }

    pub fn position(&self, arg: &str) -> Option<usize> {
        self.args.iter().position(|a| a == arg)
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a finished tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub log: PathBuf,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `command` to completion with its output captured in `log`.
///
/// Failing to launch is an error; a non-zero exit is reported in the
/// returned [`ToolRun`].
pub fn run_logged(command: &ExternalCommand, log: &Path) -> Result<ToolRun> {
    let out = File::create(log).with_context(|| format!("failed to create {}", log.display()))?;
    let err = out.try_clone()?;
    log::info!("running {}: {}", command.label, command.display());
    let status = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .status()
        .with_context(|| format!("failed to launch {}", command.program.display()))?;
    log::debug!("{} finished with {status}", command.label);
    Ok(ToolRun {
        exit_code: status.code(),
        log: log.to_path_buf(),
    })
}

/// Run and require a zero exit plus every file in `outputs`.
pub fn run_checked(command: &ExternalCommand, log: &Path, outputs: &[PathBuf]) -> Result<ToolRun> {
    let run = run_logged(command, log)?;
    let failure = || EvalError::ExternalToolFailure {
        tool: command.label.clone(),
        exit_code: run.exit_code,
        log: run.log.clone(),
    };
    if !run.success() {
        return Err(failure().into());
    }
    if let Some(missing) = outputs.iter().find(|p| !p.exists()) {
        return Err(anyhow::Error::new(failure())
            .context(format!("expected output {} was not written", missing.display())));
    }
    Ok(run)
}
