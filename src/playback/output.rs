use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An opened render target: an optional byte sink for fragments and, for
/// process-backed outputs, the child that renders them.
pub struct OutputPipe {
    writer: Option<BoxWriter>,
    child: Option<Child>,
}

impl fmt::Debug for OutputPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPipe")
            .field("writer", &self.writer.is_some())
            .field("child", &self.child.as_ref().and_then(|c| c.id()))
            .finish()
    }
}

impl OutputPipe {
    #[cfg(test)]
    pub fn from_writer(writer: BoxWriter) -> Self {
        OutputPipe {
            writer: Some(writer),
            child: None,
        }
    }

    pub async fn write_fragment(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.write_all(bytes).await,
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "output has no input stream")),
        }
    }

    /// Close the input and wait for the renderer, if any, to exit.
    pub async fn finish(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.shutdown().await?;
        }
        if let Some(child) = self.child.as_mut() {
            let status = child.wait().await?;
            tracing::debug!("renderer exited with {}", status);
        }
        Ok(())
    }
}

/// Something a player can render into. `source` is `None` when fragments
/// will be written to the pipe, or the manifest URL when the output fetches
/// the stream itself.
pub trait MediaOutput: Send + Sync {
    fn open(&self, source: Option<&str>) -> io::Result<OutputPipe>;
}

/// Spawns an external renderer, e.g. `ffplay -`.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    program: String,
    args: Vec<String>,
}

impl CommandOutput {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(CommandOutput {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl MediaOutput for CommandOutput {
    fn open(&self, source: Option<&str>) -> io::Result<OutputPipe> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        match source {
            Some(src) => {
                cmd.arg(src).stdin(Stdio::null());
            }
            None => {
                cmd.stdin(Stdio::piped());
            }
        }

        let mut child = cmd.spawn()?;
        tracing::info!("started renderer `{}` (pid {:?})", self.program, child.id());
        let writer = child.stdin.take().map(|s| Box::new(s) as BoxWriter);
        Ok(OutputPipe {
            writer,
            child: Some(child),
        })
    }
}
