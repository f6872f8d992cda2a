//! Integration tests exercising the endpoint end to end over an in-memory
//! transport: two paired `Codec`s exchanging frames through unbounded
//! channels, no real socket involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use birpc_core::{ArgFiller, Codec, CodecError, Endpoint, EndpointError, Extensions, HandlerError, Registry};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

enum Frame {
    Msg(String),
    Ping,
    Pong,
}

struct ChannelCodec {
    tx: mpsc::UnboundedSender<Frame>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
    ping_handler: std::sync::Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pong_handler: std::sync::Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    peer_id: Option<PeerIdFiller>,
}

impl ChannelCodec {
    fn new(tx: mpsc::UnboundedSender<Frame>, rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            ping_handler: std::sync::Mutex::new(None),
            pong_handler: std::sync::Mutex::new(None),
            peer_id: None,
        }
    }

    fn with_peer_id(mut self, id: impl Into<String>) -> Self {
        self.peer_id = Some(PeerIdFiller(id.into()));
        self
    }
}

#[async_trait]
impl Codec for ChannelCodec {
    async fn read_message(&self) -> Result<birpc_core::Message, CodecError> {
        loop {
            let frame = self
                .rx
                .lock()
                .await
                .recv()
                .await
                .ok_or(CodecError::Closed)?;
            match frame {
                Frame::Msg(json) => {
                    return serde_json::from_str(&json).map_err(CodecError::Decode);
                }
                Frame::Ping => {
                    if let Some(handler) = self.ping_handler.lock().unwrap().as_ref() {
                        handler();
                    }
                }
                Frame::Pong => {
                    if let Some(handler) = self.pong_handler.lock().unwrap().as_ref() {
                        handler();
                    }
                }
            }
        }
    }

    async fn write_message(&self, message: &birpc_core::Message) -> Result<(), CodecError> {
        let json = serde_json::to_string(message).map_err(CodecError::Encode)?;
        self.tx.send(Frame::Msg(json)).map_err(|_| CodecError::Closed)
    }

    async fn ping(&self) -> Result<(), CodecError> {
        self.tx.send(Frame::Ping).map_err(|_| CodecError::Closed)
    }

    async fn pong(&self) -> Result<(), CodecError> {
        self.tx.send(Frame::Pong).map_err(|_| CodecError::Closed)
    }

    fn set_ping_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        *self.ping_handler.lock().unwrap() = Some(handler);
    }

    fn set_pong_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        *self.pong_handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<(), CodecError> {
        Ok(())
    }

    fn arg_filler(&self) -> Option<&dyn ArgFiller> {
        self.peer_id.as_ref().map(|f| f as &dyn ArgFiller)
    }
}

struct PeerIdFiller(String);

impl ArgFiller for PeerIdFiller {
    fn fill(&self, extensions: &mut Extensions) {
        extensions.insert(PeerId(self.0.clone()));
    }
}

#[derive(Clone)]
struct PeerId(String);

fn channel_pair() -> (ChannelCodec, ChannelCodec) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (ChannelCodec::new(a_tx, a_rx), ChannelCodec::new(b_tx, b_rx))
}

/// A codec whose reader never produces anything and whose `ping` never
/// reaches a peer; used to exercise the heartbeat-timeout path in isolation.
struct SoloCodec {
    _never_tx: mpsc::Sender<()>,
    never_rx: AsyncMutex<mpsc::Receiver<()>>,
    pings_sent: AtomicUsize,
}

impl SoloCodec {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            _never_tx: tx,
            never_rx: AsyncMutex::new(rx),
            pings_sent: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Codec for SoloCodec {
    async fn read_message(&self) -> Result<birpc_core::Message, CodecError> {
        // The sender half is kept alive in `self`, so this never resolves
        // until the endpoint drops/closes the codec.
        match self.never_rx.lock().await.recv().await {
            Some(()) => unreachable!("nothing is ever sent"),
            None => Err(CodecError::Closed),
        }
    }

    async fn write_message(&self, _message: &birpc_core::Message) -> Result<(), CodecError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CodecError> {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn pong(&self) -> Result<(), CodecError> {
        Ok(())
    }

    fn set_ping_handler(&self, _handler: Box<dyn Fn() + Send + Sync>) {}
    fn set_pong_handler(&self, _handler: Box<dyn Fn() + Send + Sync>) {}

    async fn close(&self) -> Result<(), CodecError> {
        Ok(())
    }
}

fn greeter_registry() -> Registry {
    Registry::builder()
        .method("Greeting.Greet", |name: String, _ext: Extensions| async move {
            Ok::<_, HandlerError>(format!("hello, {name}"))
        })
        .unwrap()
        .method("Peer.Whoami", |_args: (), ext: Extensions| async move {
            let id = ext
                .get::<PeerId>()
                .map(|p| p.0.clone())
                .ok_or_else(|| HandlerError::Failed("no peer id injected".into()))?;
            Ok::<_, HandlerError>(id)
        })
        .unwrap()
        .build()
}

fn empty_registry() -> Registry {
    Registry::builder().build()
}

#[tokio::test]
async fn parallel_fan_out_returns_each_reply() {
    let (codec_a, codec_b) = channel_pair();
    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, greeter_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    let names = ["ada", "grace", "margaret", "katherine", "dorothy"];
    let mut calls = Vec::new();
    for name in names {
        let endpoint_a = Arc::clone(&endpoint_a);
        calls.push(tokio::spawn(async move {
            let reply: String = endpoint_a
                .call("Greeting.Greet", &name.to_string())
                .await
                .unwrap();
            reply
        }));
    }

    for (name, call) in names.iter().zip(calls) {
        let reply = call.await.unwrap();
        assert_eq!(reply, format!("hello, {name}"));
    }
}

#[tokio::test]
async fn codec_arg_filler_injects_extension_into_handler() {
    let (codec_a, codec_b) = channel_pair();
    let codec_b = codec_b.with_peer_id("peer-42");

    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, greeter_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    let who: String = endpoint_a.call("Peer.Whoami", &()).await.unwrap();
    assert_eq!(who, "peer-42");
}

#[tokio::test]
async fn unknown_method_surfaces_as_remote_error() {
    let (codec_a, codec_b) = channel_pair();
    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, greeter_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    let err = endpoint_a
        .call::<_, String>("Nonexistent.Method", &())
        .await
        .unwrap_err();
    match err {
        EndpointError::Remote(rpc_err) => {
            assert_eq!(rpc_err.msg, "No such function.");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn get_methods_discovers_the_peers_registry() {
    let (codec_a, codec_b) = channel_pair();
    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, greeter_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    let methods: Vec<String> = endpoint_a.call("getMethods", &()).await.unwrap();
    assert_eq!(methods, vec!["Greeting.Greet".to_string(), "Peer.Whoami".to_string()]);
}

#[tokio::test]
async fn get_methods_succeeds_even_against_an_empty_registry() {
    let (codec_a, codec_b) = channel_pair();
    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, empty_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    let methods: Vec<String> = endpoint_a.call("getMethods", &()).await.unwrap();
    assert!(methods.is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_the_endpoint_alive_across_several_periods() {
    let (codec_a, codec_b) = channel_pair();
    let endpoint_a = Endpoint::new(codec_a, empty_registry());
    let endpoint_b = Endpoint::new(codec_b, greeter_registry());

    let _serve_a = tokio::spawn({
        let endpoint_a = Arc::clone(&endpoint_a);
        async move {
            endpoint_a.serve().await;
        }
    });
    let _serve_b = tokio::spawn({
        let endpoint_b = Arc::clone(&endpoint_b);
        async move {
            endpoint_b.serve().await;
        }
    });

    // Three heartbeat periods pass uneventfully; pongs keep arriving so
    // neither side ever declares a timeout.
    tokio::time::advance(Duration::from_secs(31)).await;
    tokio::task::yield_now().await;

    let reply: String = endpoint_a
        .call("Greeting.Greet", &"still alive".to_string())
        .await
        .unwrap();
    assert_eq!(reply, "hello, still alive");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_is_fatal_to_serve() {
    let codec = SoloCodec::new();
    let endpoint = Endpoint::new(codec, empty_registry());

    let serve = tokio::spawn({
        let endpoint = Arc::clone(&endpoint);
        async move { endpoint.serve().await }
    });

    tokio::time::advance(Duration::from_secs(25)).await;

    let error = serve.await.unwrap();
    assert!(matches!(error, EndpointError::HeartbeatTimeout { .. }));
}
