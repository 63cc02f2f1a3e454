//! Structured JSON-lines delivery events for webhooker.
//!
//! Every lifecycle moment of a relayed webhook (`webhook_received`,
//! `webhook_forwarded`, `forward_error`) is serialised as a single
//! newline-terminated JSON object. The stream goes to stdout by default, or is
//! appended to a file, producing [JSON Lines](https://jsonlines.org/) output
//! that is easy to pipe into `jq` or ship elsewhere.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use event_log::{EventEntry, EventKind, EventSink, EventWriter};
//!
//! # async fn example() {
//! let (sink, _handle) = EventSink::start(EventWriter::stdout());
//!
//! sink.log(
//!     EventEntry::new(EventKind::WebhookReceived).with_request("POST", "/hooks/github"),
//! )
//! .await;
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{EventEntry, EventKind};
pub use sink::EventSink;
pub use writer::{EventWriteError, EventWriter};
