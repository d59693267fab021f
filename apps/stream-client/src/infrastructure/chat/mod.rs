//! Chunked Chat Stream Client
//!
//! Streams assistant replies over HTTP and exposes them as cancellable
//! sequences of [`StreamEvent`](crate::domain::conversation::StreamEvent)s.
//!
//! # Pipeline
//!
//! ```text
//! HTTP body ──► FrameAssembler ──► StreamParser ──► ChatStream ──► consumer
//!                (frames)           (events)        (cancel gate)
//! ```

pub mod channel;
pub mod client;
pub mod frame;
pub mod messages;
pub mod parser;
pub mod request;

pub use channel::ChatChannel;
pub use client::{ChatClient, ChatClientConfig, ChatError};
pub use frame::{FRAME_DELIMITER, FrameAssembler};
pub use parser::{ChatProtocol, FRAME_MARKER, ParseError, StreamParser};
pub use request::{CancelHandle, ChatStream, DEFAULT_EVENT_CAPACITY};
