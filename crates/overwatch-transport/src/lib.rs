//! Overwatch Transport - framed JSON-RPC 2.0 over byte streams.
//!
//! Two frame modes, tried in order:
//! - **Header-delimited**: ASCII headers terminated by CRLF CRLF, then
//!   exactly `Content-Length` bytes of UTF-8 JSON.
//! - **Line-delimited**: when the first line is not a header, a
//!   `\n`-terminated line is one complete JSON message.
//!
//! The decoder is a pull parser ([`FrameDecoder`]) separate from the I/O
//! pump ([`FramedTransport`]), so framing behavior - including limit
//! violations and resynchronization - is testable without streams.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod framing;
mod message;
mod transport;

pub use error::{TransportError, TransportResult};
pub use framing::{FrameDecoder, FramingLimits, encode_frame};
pub use message::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
pub use transport::{FramedTransport, TransportEvent};
