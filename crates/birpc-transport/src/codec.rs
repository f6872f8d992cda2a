use async_trait::async_trait;
use birpc_core::{ArgFiller, Codec, CodecError, Extensions, Message};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Refuses to buffer a frame larger than this; guards against a
/// misbehaving peer claiming an enormous length prefix.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A connection-scoped label (peer address, socket path, …) injected into
/// every inbound handler's [`Extensions`] via [`ArgFiller`].
#[derive(Debug, Clone)]
pub struct PeerLabel(pub String);

struct PeerLabelFiller(PeerLabel);

impl ArgFiller for PeerLabelFiller {
    fn fill(&self, extensions: &mut Extensions) {
        extensions.insert(self.0.clone());
    }
}

/// Length-prefixed JSON codec over a split duplex stream.
pub struct JsonFramedCodec<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    ping_handler: std::sync::Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pong_handler: std::sync::Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    peer_label: Option<PeerLabelFiller>,
}

impl<S> JsonFramedCodec<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            ping_handler: std::sync::Mutex::new(None),
            pong_handler: std::sync::Mutex::new(None),
            peer_label: None,
        }
    }

    /// Attaches a peer label the endpoint will inject into every inbound
    /// handler's [`Extensions`] via this codec's [`ArgFiller`].
    pub fn with_peer_label(mut self, label: impl Into<String>) -> Self {
        self.peer_label = Some(PeerLabelFiller(PeerLabel(label.into())));
        self
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), CodecError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = (payload.len() as u32).to_be_bytes();
        let mut writer = self.writer.lock().await;
        writer.write_all(&len).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_frame(&self) -> Result<Vec<u8>, CodecError> {
        let mut reader = self.reader.lock().await;
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

#[async_trait]
impl<S> Codec for JsonFramedCodec<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    async fn read_message(&self) -> Result<Message, CodecError> {
        loop {
            let payload = self.read_frame().await?;
            let value: serde_json::Value =
                serde_json::from_slice(&payload).map_err(CodecError::Decode)?;
            if let Some(ctrl) = value.get("ctrl").and_then(|v| v.as_str()) {
                match ctrl {
                    "ping" => {
                        if let Some(handler) = self.ping_handler.lock().unwrap().as_ref() {
                            handler();
                        }
                    }
                    "pong" => {
                        if let Some(handler) = self.pong_handler.lock().unwrap().as_ref() {
                            handler();
                        }
                    }
                    other => tracing::warn!(ctrl = other, "ignoring unknown control frame"),
                }
                continue;
            }
            return serde_json::from_value(value).map_err(CodecError::Decode);
        }
    }

    async fn write_message(&self, message: &Message) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(message).map_err(CodecError::Encode)?;
        self.write_frame(&payload).await
    }

    async fn ping(&self) -> Result<(), CodecError> {
        self.write_frame(br#"{"ctrl":"ping"}"#).await
    }

    async fn pong(&self) -> Result<(), CodecError> {
        self.write_frame(br#"{"ctrl":"pong"}"#).await
    }

    fn set_ping_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        *self.ping_handler.lock().unwrap() = Some(handler);
    }

    fn set_pong_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        *self.pong_handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(CodecError::from)
    }

    fn arg_filler(&self) -> Option<&dyn ArgFiller> {
        self.peer_label.as_ref().map(|f| f as &dyn ArgFiller)
    }
}
