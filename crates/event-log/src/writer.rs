use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::entry::EventEntry;

/// Errors that can occur while writing the event stream.
#[derive(Debug, thiserror::Error)]
pub enum EventWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open event log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write event: {0}")]
    Write(std::io::Error),

    #[error("failed to flush event log: {0}")]
    Flush(std::io::Error),
}

/// Writer that serialises [`EventEntry`] values as JSON lines.
///
/// Each call to [`write`](Self::write) produces exactly one newline-terminated
/// JSON object on the underlying output.
pub struct EventWriter {
    out: Box<dyn AsyncWrite + Send + Unpin>,
}

impl EventWriter {
    /// Write events to the process's standard output.
    pub fn stdout() -> Self {
        Self::from_writer(tokio::io::stdout())
    }

    /// Open (or create) the file at `path` in append mode.
    ///
    /// Parent directories are created automatically if they do not exist.
    pub async fn append_to(path: impl AsRef<Path>) -> Result<Self, EventWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(EventWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(EventWriteError::OpenFile)?;

        Ok(Self::from_writer(file))
    }

    pub fn from_writer(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Serialise `entry` as a single JSON line and write it out.
    pub async fn write(&mut self, entry: &EventEntry) -> Result<(), EventWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.out
            .write_all(&line)
            .await
            .map_err(EventWriteError::Write)
    }

    pub async fn flush(&mut self) -> Result<(), EventWriteError> {
        self.out.flush().await.map_err(EventWriteError::Flush)
    }
}
