#![forbid(unsafe_code)]
//! A length-prefixed JSON [`Codec`](birpc_core::Codec) over any duplex
//! `AsyncRead + AsyncWrite` stream (TCP, Unix socket, or a byte-oriented
//! wrapper around a websocket's binary frames).
//!
//! Frames are `[4-byte big-endian length][JSON payload]`. Ping/pong live on
//! the same framed stream as small control objects (`{"ctrl":"ping"}`) so no
//! separate transport-level heartbeat support is required from the
//! underlying stream.

mod codec;

pub use codec::{JsonFramedCodec, PeerLabel, MAX_FRAME_SIZE};
