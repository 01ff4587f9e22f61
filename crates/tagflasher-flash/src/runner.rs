//! External command execution
//!
//! Every external tool (builder, converter, flashing tools) is run through a
//! [`CommandRunner`]. The production runner spawns processes on a shared
//! tokio runtime so each invocation can be bounded by a timeout and killed
//! when it expires, while callers stay synchronous.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

/// Global tokio runtime for blocking operations
static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Get or create the global tokio runtime
fn get_runtime() -> io::Result<&'static tokio::runtime::Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tagflasher-io")
        .build()?;
    Ok(RUNTIME.get_or_init(|| rt))
}

/// Run an async future in a blocking context
pub fn block_on<F: Future>(fut: F) -> io::Result<F::Output> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        // We're inside a tokio runtime, use block_in_place
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    } else {
        Ok(get_runtime()?.block_on(fut))
    }
}

/// Spawn a background task on the global runtime
pub fn spawn_background<F>(fut: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    get_runtime()?.spawn(fut);
    Ok(())
}

/// Errors running an external command
#[derive(Debug, Error)]
pub enum RunError {
    /// The process could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The process did not exit in time and was killed
    #[error("{program} timed out after {}s", .timeout.as_secs_f32())]
    Timeout {
        /// Program name
        program: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The async runtime could not be created
    #[error("Async runtime unavailable: {0}")]
    Runtime(#[source] io::Error),
}

/// An external command with its timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Time limit for the whole invocation
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Whether any argument equals `arg`
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub code: Option<i32>,
    /// Stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    /// A successful result with the given output
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            output: output.into(),
        }
    }

    /// A failed result with the given exit code and output
    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            output: output.into(),
        }
    }

    /// Exit code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The last `lines` lines of output
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion or timeout
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        log::debug!("Running: {}", spec);

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let result = block_on(tokio::time::timeout(spec.timeout, cmd.output()))
            .map_err(RunError::Runtime)?;

        let out = match result {
            Err(_) => {
                log::warn!("{} timed out after {:?}", spec.program, spec.timeout);
                return Err(RunError::Timeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(RunError::Spawn {
                    program: spec.program.clone(),
                    source,
                })
            }
            Ok(Ok(out)) => out,
        };

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        log::trace!("{} exited with {:?}", spec.program, out.status.code());

        Ok(CommandOutput {
            code: out.status.code(),
            output,
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedRunner;

#[cfg(any(test, feature = "test-util"))]
mod scripted {
    use std::sync::Mutex;

    use super::{CommandOutput, CommandRunner, CommandSpec, RunError};

    type Handler = dyn Fn(&CommandSpec) -> Result<CommandOutput, RunError> + Send + Sync;

    /// Runner that answers from a closure and records every call
    pub struct ScriptedRunner {
        handler: Box<Handler>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        /// Create a runner answering with `handler`
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&CommandSpec) -> Result<CommandOutput, RunError> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every command run so far
        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Number of calls to `program`
        pub fn count(&self, program: &str) -> usize {
            self.calls().iter().filter(|c| c.program == program).count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(spec.clone());
            }
            (self.handler)(spec)
        }
    }
}
