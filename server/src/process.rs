//! Out-of-process tool invocation with a bounded lifetime.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// How many trailing stderr lines are kept as the diagnostic.
const DIAGNOSTIC_LINES: usize = 20;
const DIAGNOSTIC_MAX_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("cannot start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {diagnostic}")]
    Failed {
        program: String,
        status: String,
        diagnostic: String,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// An external executable together with its time budget.
#[derive(Debug, Clone)]
pub struct Tool {
    program: PathBuf,
    timeout: Duration,
}

impl Tool {
    #[must_use]
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    #[must_use]
    pub fn invoke(&self) -> Invocation<'_> {
        Invocation {
            tool: self,
            args: Vec::new(),
            redact: Vec::new(),
            cwd: None,
        }
    }

    /// Program file name, safe to show to clients.
    fn display_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

pub struct Invocation<'a> {
    tool: &'a Tool,
    args: Vec<OsString>,
    redact: Vec<PathBuf>,
    cwd: Option<PathBuf>,
}

impl Invocation<'_> {
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Adds a path argument whose location must not leak into diagnostics.
    #[must_use]
    pub fn path_arg(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self.redact(path)
    }

    #[must_use]
    pub fn redact(mut self, path: &Path) -> Self {
        self.redact.push(path.to_path_buf());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Runs to completion. The child is killed if the time budget runs out
    /// or if the returned future is dropped.
    pub async fn run(self) -> Result<(), ToolError> {
        let program = self.tool.display_name();
        let mut command = Command::new(&self.tool.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        tracing::debug!("running {program} with {} arguments", self.args.len());
        let child = command.spawn().map_err(|source| ToolError::Launch {
            program: program.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(self.tool.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|source| ToolError::Launch {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ToolError::TimedOut {
                    program,
                    timeout: self.tool.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ToolError::Failed {
            program,
            status: output.status.to_string(),
            diagnostic: redact(&tail(&stderr), &self.redact),
        })
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    let joined = lines[start..].join("\n");
    if joined.chars().count() > DIAGNOSTIC_MAX_CHARS {
        joined
            .chars()
            .skip(joined.chars().count() - DIAGNOSTIC_MAX_CHARS)
            .collect()
    } else {
        joined
    }
}

/// Replaces every occurrence of the given paths with their bare file names.
pub fn redact(text: &str, paths: &[PathBuf]) -> String {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    // longest first so a directory never eats the prefix of a file inside it
    sorted.sort_by_key(|p| std::cmp::Reverse(p.as_os_str().len()));
    let mut result = text.to_owned();
    for path in sorted {
        let full = path.to_string_lossy();
        if full.is_empty() {
            continue;
        }
        let short = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        result = result.replace(full.as_ref(), &short);
    }
    result
}
