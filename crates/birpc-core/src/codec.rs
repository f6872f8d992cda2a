use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::CodecError;
use crate::extensions::Extensions;
use crate::message::Message;

/// The contract an endpoint needs from a transport-specific codec.
///
/// Implementations own the duplex byte stream and are responsible for
/// framing. `write_message` must serialize concurrent writers internally —
/// the endpoint may call it from several tasks at once (one per in-flight
/// outbound call plus one per reply) and relies on the codec to not
/// interleave partial frames. `read_message` is only ever called from the
/// endpoint's single reader task.
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    async fn read_message(&self) -> Result<Message, CodecError>;

    async fn write_message(&self, message: &Message) -> Result<(), CodecError>;

    /// Decodes a request's `args` into `T`. Synchronous: the payload is
    /// already buffered by the time a handler needs it.
    fn unmarshal_args<T: DeserializeOwned>(&self, raw: &RawValue) -> Result<T, CodecError> {
        serde_json::from_str(raw.get()).map_err(CodecError::Decode)
    }

    /// Decodes a response's `result` into `T`.
    fn unmarshal_result<T: DeserializeOwned>(&self, raw: &RawValue) -> Result<T, CodecError> {
        serde_json::from_str(raw.get()).map_err(CodecError::Decode)
    }

    async fn ping(&self) -> Result<(), CodecError>;

    async fn pong(&self) -> Result<(), CodecError>;

    /// Installs a callback invoked from the reader task whenever a ping
    /// frame arrives. Must not block.
    fn set_ping_handler(&self, handler: Box<dyn Fn() + Send + Sync>);

    /// Installs a callback invoked from the reader task whenever a pong
    /// frame arrives. Must not block.
    fn set_pong_handler(&self, handler: Box<dyn Fn() + Send + Sync>);

    /// Closes the underlying transport. Must be idempotent: `serve()` may
    /// call this after the transport has already failed.
    async fn close(&self) -> Result<(), CodecError>;

    /// An optional capability for codecs whose transport carries
    /// connection-scoped extras (peer address, negotiated subprotocol) that
    /// should be injected into every inbound handler's [`Extensions`].
    fn arg_filler(&self) -> Option<&dyn ArgFiller> {
        None
    }
}

/// Fills extra slots in a handler's [`Extensions`] from transport state,
/// e.g. the remote peer's address for a length-prefixed TCP codec.
pub trait ArgFiller: Send + Sync {
    fn fill(&self, extensions: &mut Extensions);
}
