//! System gateway: the single seam through which external commands run
//!
//! Every OS mutation (iptables, systemctl, udevadm, useradd, the headless
//! browser, generated files under /etc) goes through a [`SystemGateway`].
//! [`HostGateway`] executes for real; [`RecordingGateway`] records
//! invocations and answers from a responder, which backs `--dry-run` and
//! the tests.

use crate::error::{NetfilterError, Result};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the program matches and the arguments start with `prefix`
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.program)
        } else {
            write!(f, "{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            status: Some(0),
            ..Self::default()
        }
    }

    pub fn ok_with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes external commands on behalf of the restriction pipeline
pub trait SystemGateway: Send + Sync {
    /// Run a command to completion. `Err` only when it could not be started.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run a command and turn a non-zero exit into an error
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.run(invocation)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(NetfilterError::CommandFailed {
                command: invocation.to_string(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a command whose failure is advisory; failures are logged
    fn run_logged(&self, invocation: &Invocation) -> bool {
        match self.run_checked(invocation) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Whether a program is available on PATH
    fn command_exists(&self, program: &str) -> bool {
        self.run(&Invocation::new("which", [program]))
            .map(|out| out.is_success())
            .unwrap_or(false)
    }

    /// Create or replace a file, creating missing parent directories
    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        write_file(path, contents)
    }

    /// Delete a file. Returns whether it existed.
    fn remove_file(&self, path: &Path) -> Result<bool> {
        remove_file(path)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Runs commands on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct HostGateway;

impl SystemGateway for HostGateway {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!("exec: {}", invocation);
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .output()
            .map_err(|source| NetfilterError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

type Responder = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

/// Records invocations instead of executing them.
///
/// File writes are logged and skipped unless [`RecordingGateway::writing_files`]
/// is set.
pub struct RecordingGateway {
    invocations: Mutex<Vec<Invocation>>,
    responder: Responder,
    writes_files: bool,
}

impl RecordingGateway {
    /// Every command succeeds with empty output
    pub fn new() -> Self {
        Self::with_responder(|_| CommandOutput::ok())
    }

    /// Answer each invocation with the given function
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            invocations: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            writes_files: false,
        }
    }

    /// Perform file writes and removals for real
    pub fn writing_files(mut self) -> Self {
        self.writes_files = true;
        self
    }

    /// Snapshot of everything run so far, in order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Rendered command lines, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.clear();
        }
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemGateway for RecordingGateway {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::info!("dry-run: {}", invocation);
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation.clone());
        }
        Ok((self.responder)(invocation))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        tracing::info!("dry-run: write {} ({} bytes)", path.display(), contents.len());
        if self.writes_files {
            write_file(path, contents)?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        tracing::info!("dry-run: remove {}", path.display());
        if self.writes_files {
            return remove_file(path);
        }
        Ok(path.exists())
    }
}
