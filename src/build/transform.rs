//! Transform service contract and the built-in engines.
//!
//! # Responsibilities
//! - Define the job payload (`TransformInput`) and result (`TransformOutput`)
//! - Run an external transform command speaking JSON over stdio
//! - Provide a pass-through engine when no command is configured
//!
//! # Design Decisions
//! - Engines are synchronous and run on worker threads
//! - Engines poll the cancellation token; a cancelled child process is killed

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Source map emission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMap {
    #[default]
    Disabled,
    /// Returned separately in [`TransformOutput::map`].
    External,
    /// Embedded in the generated code.
    Inline,
}

impl Serialize for SourceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SourceMap::Disabled => serializer.serialize_bool(false),
            SourceMap::External => serializer.serialize_bool(true),
            SourceMap::Inline => serializer.serialize_str("inline"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOptions {
    pub banner: Option<String>,
    pub sourcemap: SourceMap,
    pub sourcemap_file_name: Option<String>,
}

/// One transform job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformInput {
    pub code: String,
    pub source_url: String,
    pub options: TransformOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransformOutput {
    pub code: String,
    #[serde(default)]
    pub map: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransformError {
    /// The engine rejected the input.
    #[error("transform failed: {0}")]
    Failed(String),

    #[error("transform cancelled")]
    Cancelled,

    /// The worker died before answering.
    #[error("build worker lost")]
    WorkerLost,

    #[error("build pool closed")]
    PoolClosed,

    #[error("failed to start build worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A module-format transform engine.
pub trait Transform: Send + Sync + 'static {
    fn transform(
        &self,
        input: &TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError>;
}

/// Prepends the banner and returns the code unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn transform(
        &self,
        input: &TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        if cancel.is_cancelled() {
            return Err(TransformError::Cancelled);
        }
        let code = match &input.options.banner {
            Some(banner) => format!("{banner}\n{}", input.code),
            None => input.code.clone(),
        };
        Ok(TransformOutput { code, map: None })
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runs an external command per job.
///
/// The command receives the JSON-encoded [`TransformInput`] on stdin and
/// must print `{"code": "...", "map": "..."}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
}

impl CommandTransform {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Transform for CommandTransform {
    fn transform(
        &self,
        input: &TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        let payload =
            serde_json::to_vec(input).map_err(|e| TransformError::Failed(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are serviced on their own threads so a chatty child cannot block.
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&payload);
            }
        });
        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransformError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let _ = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let message = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(TransformError::Failed(if message.is_empty() {
                format!("transform command exited with {status}")
            } else {
                message
            }));
        }

        serde_json::from_slice(&stdout)
            .map_err(|e| TransformError::Failed(format!("invalid transform output: {e}")))
    }
}

fn read_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}
