//! ptykit-protocol: console-list helper protocol
//!
//! Windows allows a process one console attachment at a time, so listing
//! the processes attached to another console is delegated to a short-lived
//! helper process. This crate defines the request (a single decimal pid
//! argument) and the single framed response the helper writes to stdout.

pub mod codec;
pub mod messages;

pub use codec::{encode_frame, CodecError, ConsoleListCodec, MAX_MESSAGE_SIZE};
pub use messages::{ConsoleListRequest, ConsoleListResponse, ProcessRecord, RequestArgsError};
