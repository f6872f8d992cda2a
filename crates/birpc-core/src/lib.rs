#![forbid(unsafe_code)]
//! Transport-agnostic bidirectional JSON-RPC endpoint.
//!
//! Either peer on a duplex, message-framed byte stream can call named
//! methods on the other concurrently, at any time, and may also send
//! fire-and-forget notifications (`id == 0`). This crate owns the protocol
//! (envelope shape, dispatch, heartbeat, shutdown draining) and is generic
//! over a [`Codec`] that owns framing and I/O for one concrete transport;
//! see `birpc-transport` for a length-prefixed JSON reference `Codec`.
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .method("Greeting.Greet", |name: String, _ext| async move {
//!         Ok::<_, HandlerError>(format!("hello, {name}"))
//!     })?
//!     .build();
//! let endpoint = Endpoint::new(codec, registry);
//! let serve = tokio::spawn({ let e = endpoint.clone(); async move { e.serve().await } });
//! let reply: String = endpoint.call("Greeting.Greet", &"world").await?;
//! ```

mod codec;
mod endpoint;
mod error;
mod extensions;
mod message;
mod registry;

pub use codec::{ArgFiller, Codec};
pub use endpoint::{Call, Endpoint, GET_METHODS};
pub use error::{CodecError, EndpointError, HandlerError, RegistryError};
pub use extensions::Extensions;
pub use message::{Message, RpcError};
pub use registry::{RawHandler, Registry, RegistryBuilder};
