use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::EventEntry;
use crate::writer::EventWriter;

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Idle time after which buffered entries are flushed.
const FLUSH_INTERVAL_MS: u64 = 250;

/// A cheap, cloneable handle used to submit [`EventEntry`] values to the
/// background event writer.
///
/// Every forwarding task holds its own clone; the writer task exits once the
/// last clone is dropped.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EventEntry>,
}

impl EventSink {
    /// Spawn the background writer task and return a `(sink, join_handle)`
    /// pair.
    ///
    /// The background task will:
    ///
    /// * Write each entry as a JSON line via [`EventWriter`].
    /// * Flush whenever the channel has been idle for a short interval.
    /// * Flush once more when the last `EventSink` clone is dropped and the
    ///   channel closes, then exit.
    ///
    /// I/O errors are logged via `tracing::error` and the entry is skipped.
    pub fn start(writer: EventWriter) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<EventEntry>(CHANNEL_BUFFER);

        let handle = tokio::spawn(async move {
            let mut writer = writer;
            run_writer_loop(&mut writer, rx).await;
        });

        (Self { tx }, handle)
    }

    /// Send an event to the background writer.
    ///
    /// Waits for channel capacity when the writer is behind. If the writer
    /// task has already exited the entry is dropped and a warning is logged.
    pub async fn log(&self, entry: EventEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event = ?err.0.event,
                "event sink closed, entry dropped"
            );
        }
    }
}

async fn run_writer_loop(writer: &mut EventWriter, mut rx: mpsc::Receiver<EventEntry>) {
    let idle = Duration::from_millis(FLUSH_INTERVAL_MS);
    let mut unflushed = 0usize;

    loop {
        // With nothing buffered there is no deadline to wait for.
        let next = if unflushed == 0 {
            Some(rx.recv().await)
        } else {
            tokio::time::timeout(idle, rx.recv()).await.ok()
        };

        match next {
            Some(Some(entry)) => match writer.write(&entry).await {
                Ok(()) => unflushed += 1,
                Err(err) => tracing::error!(%err, "failed to write event"),
            },
            Some(None) => break,
            None => unflushed = flush(writer, unflushed).await,
        }
    }

    flush(writer, unflushed).await;
    tracing::debug!("event writer task shutting down");
}

/// Flush if anything is buffered. Returns how many entries are still unflushed.
async fn flush(writer: &mut EventWriter, unflushed: usize) -> usize {
    if unflushed == 0 {
        return 0;
    }
    match writer.flush().await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(%err, entries = unflushed, "failed to flush event log");
            unflushed
        }
    }
}
