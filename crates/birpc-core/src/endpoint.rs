use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::codec::Codec;
use crate::error::{CodecError, EndpointError, HandlerError};
use crate::extensions::Extensions;
use crate::message::{Message, RpcError};
use crate::registry::Registry;

/// Reserved method name bypassing the [`Registry`] entirely; always
/// succeeds, even against an empty registry.
pub const GET_METHODS: &str = "getMethods";

/// Wire-visible error message for a call naming a method the registry
/// doesn't have.
const NO_SUCH_FUNCTION: &str = "No such function.";

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(20);

struct PendingTable {
    next_id: u64,
    calls: HashMap<u64, oneshot::Sender<Result<Box<RawValue>, EndpointError>>>,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            next_id: 0,
            calls: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        // id 0 is reserved for notifications; never hand it out to a call.
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        self.next_id
    }
}

/// A handle to an in-flight outbound call, returned by [`Endpoint::go`].
pub struct Call<R> {
    id: u64,
    rx: oneshot::Receiver<Result<Box<RawValue>, EndpointError>>,
    _reply: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> Call<R> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<R, EndpointError> {
        let raw = self.rx.await.map_err(|_| EndpointError::Cancelled)??;
        serde_json::from_str(raw.get()).map_err(|source| EndpointError::Read(CodecError::Decode(source)))
    }
}

/// Owns a [`Codec`] and a [`Registry`] and drives the bidirectional
/// request/response protocol over it: one reader task, one heartbeat task,
/// one short-lived writer task per outbound call, one handler task per
/// inbound request.
pub struct Endpoint<C: Codec> {
    codec: Arc<C>,
    registry: Arc<Registry>,
    pending: Mutex<PendingTable>,
}

impl<C: Codec> Endpoint<C> {
    pub fn new(codec: C, registry: Registry) -> Arc<Self> {
        Arc::new(Self {
            codec: Arc::new(codec),
            registry: Arc::new(registry),
            pending: Mutex::new(PendingTable::new()),
        })
    }

    /// Sends a request and returns a handle the caller can await later,
    /// without blocking on the reply. Mirrors the non-blocking half of the
    /// classic `Client.Go` API.
    pub async fn go<Args, R>(&self, func: &str, args: &Args) -> Result<Call<R>, EndpointError>
    where
        Args: Serialize,
        R: DeserializeOwned,
    {
        let raw_args = serde_json::value::to_raw_value(args)
            .map_err(|source| EndpointError::Write(CodecError::Encode(source)))?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.pending.lock().await;
            let id = table.next_id();
            table.calls.insert(id, tx);
            id
        };

        let message = Message::request(id, func, raw_args);
        let codec = Arc::clone(&self.codec);
        // Writing happens off this task so a slow or wedged peer can never
        // block the caller of `go`; the pending-table entry already exists
        // so a reply racing ahead of this spawn still resolves correctly.
        tokio::spawn(async move {
            if let Err(err) = codec.write_message(&message).await {
                tracing::warn!(error = %err, call_id = id, "failed to send outbound call");
            }
        });

        Ok(Call {
            id,
            rx,
            _reply: PhantomData,
        })
    }

    /// Sends a request and waits for the reply.
    pub async fn call<Args, R>(&self, func: &str, args: &Args) -> Result<R, EndpointError>
    where
        Args: Serialize,
        R: DeserializeOwned,
    {
        self.go(func, args).await?.wait().await
    }

    /// Like [`Endpoint::call`] but fails with [`EndpointError::CallTimeout`]
    /// if no reply arrives before `timeout` elapses. On expiry the pending
    /// entry is removed so a late reply can't be mistaken for a response to
    /// some future call reusing the same id.
    pub async fn call_with_deadline<Args, R>(
        &self,
        func: &str,
        args: &Args,
        timeout: Duration,
    ) -> Result<R, EndpointError>
    where
        Args: Serialize,
        R: DeserializeOwned,
    {
        let call = self.go(func, args).await?;
        let id = call.id();
        match tokio::time::timeout(timeout, call.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.lock().await.calls.remove(&id);
                Err(EndpointError::CallTimeout)
            }
        }
    }

    /// Sends a fire-and-forget notification (`id == 0`); the peer must not
    /// reply and none is awaited here.
    pub async fn notify<Args: Serialize>(&self, func: &str, args: &Args) -> Result<(), EndpointError> {
        let raw_args = serde_json::value::to_raw_value(args)
            .map_err(|source| EndpointError::Write(CodecError::Encode(source)))?;
        let message = Message::request(0, func, raw_args);
        self.codec
            .write_message(&message)
            .await
            .map_err(EndpointError::Write)
    }

    /// Runs the endpoint until a fatal transport or protocol error occurs.
    /// Guarantees every dispatched inbound handler has completed, and every
    /// still-pending outbound call has been resolved with
    /// [`EndpointError::Shutdown`], before returning.
    pub async fn serve(self: &Arc<Self>) -> EndpointError {
        let start = Instant::now();
        let last_pong_ms = Arc::new(AtomicI64::new(0));

        {
            let last_pong_ms = Arc::clone(&last_pong_ms);
            self.codec.set_pong_handler(Box::new(move || {
                last_pong_ms.store(start.elapsed().as_millis() as i64, Ordering::Relaxed);
            }));
        }
        {
            let codec = Arc::clone(&self.codec);
            self.codec.set_ping_handler(Box::new(move || {
                let codec = Arc::clone(&codec);
                tokio::spawn(async move {
                    if let Err(err) = codec.pong().await {
                        tracing::warn!(error = %err, "failed to reply to ping");
                    }
                });
            }));
        }

        let mut reader_handle = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.reader_loop().await })
        };
        let mut heartbeat_handle = {
            let this = Arc::clone(self);
            let last_pong_ms = Arc::clone(&last_pong_ms);
            tokio::spawn(async move { this.heartbeat_loop(start, last_pong_ms).await })
        };

        let error = tokio::select! {
            result = &mut reader_handle => result.unwrap_or(EndpointError::Shutdown),
            result = &mut heartbeat_handle => result.unwrap_or(EndpointError::Shutdown),
        };

        let _ = self.codec.close().await;

        if !reader_handle.is_finished() {
            let _ = reader_handle.await;
        }
        if !heartbeat_handle.is_finished() {
            let _ = heartbeat_handle.await;
        }

        self.fail_pending().await;

        error
    }

    async fn fail_pending(&self) {
        let mut table = self.pending.lock().await;
        for (_, sender) in table.calls.drain() {
            let _ = sender.send(Err(EndpointError::Shutdown));
        }
    }

    async fn reader_loop(self: Arc<Self>) -> EndpointError {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                read_result = self.codec.read_message() => {
                    match read_result {
                        Ok(message) if message.is_request() => {
                            let this = Arc::clone(&self);
                            tasks.spawn(async move { this.run_handler(message).await });
                        }
                        Ok(message) => {
                            if let Err(err) = self.complete_pending(message).await {
                                Self::drain(&mut tasks).await;
                                return err;
                            }
                        }
                        Err(err) => {
                            Self::drain(&mut tasks).await;
                            return EndpointError::Read(err);
                        }
                    }
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }
    }

    async fn drain(tasks: &mut JoinSet<()>) {
        while tasks.join_next().await.is_some() {}
    }

    async fn heartbeat_loop(self: Arc<Self>, start: Instant, last_pong_ms: Arc<AtomicI64>) -> EndpointError {
        // First tick fires one period after `start`, not immediately: a
        // fresh connection gets a full period of grace before its first ping.
        let mut ticker = tokio::time::interval_at(start + HEARTBEAT_PERIOD, HEARTBEAT_PERIOD);
        loop {
            ticker.tick().await;

            let now_ms = start.elapsed().as_millis() as i64;
            let since_pong_ms = (now_ms - last_pong_ms.load(Ordering::Relaxed)).max(0) as u64;
            let elapsed = Duration::from_millis(since_pong_ms);
            if elapsed > HEARTBEAT_DEADLINE {
                return EndpointError::HeartbeatTimeout {
                    elapsed,
                    deadline: HEARTBEAT_DEADLINE,
                };
            }

            if let Err(err) = self.codec.ping().await {
                return EndpointError::HeartbeatSend(err);
            }
        }
    }

    async fn complete_pending(&self, message: Message) -> Result<(), EndpointError> {
        let id = message.id;
        let sender = {
            let mut table = self.pending.lock().await;
            table.calls.remove(&id)
        };
        let Some(sender) = sender else {
            return Err(EndpointError::UnknownResponseId { id });
        };
        let outcome = match (message.result, message.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(EndpointError::Remote(error)),
            _ => Err(EndpointError::Read(CodecError::InvalidEnvelope { id })),
        };
        let _ = sender.send(outcome);
        Ok(())
    }

    async fn run_handler(self: Arc<Self>, message: Message) {
        let id = message.id;
        let func = message.func.clone();

        let mut extensions = Extensions::new();
        extensions.insert(Arc::clone(&self));
        if let Some(filler) = self.codec.arg_filler() {
            filler.fill(&mut extensions);
        }

        let outcome = if func == GET_METHODS {
            serde_json::value::to_raw_value(&self.registry.method_names())
                .map_err(HandlerError::BadReply)
                .map_err(RpcError::from)
        } else {
            match self.registry.lookup(&func) {
                Some(handler) => handler
                    .call(message.args.as_deref(), extensions)
                    .await
                    .map_err(RpcError::from),
                // The wire-visible message is a fixed string, not a
                // formatted HandlerError: callers match on it exactly.
                None => Err(RpcError::new(NO_SUCH_FUNCTION)),
            }
        };

        if id == 0 {
            if let Err(err) = outcome {
                tracing::warn!(method = %func, error = %err, "notification handler failed");
            }
            return;
        }

        let reply = match outcome {
            Ok(result) => Message::response_ok(id, result),
            Err(err) => Message::response_err(id, err),
        };
        if let Err(err) = self.codec.write_message(&reply).await {
            tracing::warn!(error = %err, call_id = id, "failed to write reply");
        }
    }
}
