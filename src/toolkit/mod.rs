//! Toolkit Layer
//!
//! Drives the PaddleOCR training, export and inference scripts as external
//! processes. The process boundary sits behind [`CommandRunner`] so the
//! orchestration logic can be exercised without Python installed.

pub mod runner;
pub mod training_config;

pub use runner::{ModelRunner, TrackingCredentials};

use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PrepError, PrepResult};

/// A fully resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    /// Wall-clock budget; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Apply a timeout in seconds, `0` meaning unlimited
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Process boundary: run a command to completion
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> PrepResult<ProcessExit>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, invocation: &Invocation) -> PrepResult<ProcessExit> {
        (**self).run(invocation)
    }
}

/// Runs commands as real child processes, inheriting stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct SubprocessRunner;

impl CommandRunner for SubprocessRunner {
    fn run(&self, invocation: &Invocation) -> PrepResult<ProcessExit> {
        let command_line = invocation.to_string();
        let spawn_error = |source| PrepError::Spawn {
            command: command_line.clone(),
            source,
        };

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(spawn_error)?;

        info!("Running {}", command_line);
        rt.block_on(async {
            let mut child = tokio::process::Command::new(&invocation.program)
                .args(&invocation.args)
                .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .kill_on_drop(true)
                .spawn()
                .map_err(spawn_error)?;

            let status = match invocation.timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        child.kill().await.ok();
                        return Err(PrepError::ProcessTimeout {
                            command: command_line.clone(),
                            secs: limit.as_secs(),
                        });
                    }
                },
                None => child.wait().await,
            }
            .map_err(spawn_error)?;

            debug!("{} exited with {:?}", command_line, status.code());
            Ok(ProcessExit {
                code: status.code(),
            })
        })
    }
}
