use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::{HandlerError, RegistryError};
use crate::extensions::Extensions;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased handler, reached through [`Registry::lookup`]. The generic
/// `Args`/`Reply` types a caller registered with are monomorphized away at
/// registration time; everything past that point operates on raw JSON, the
/// same way every payload on the wire already does (see [`crate::message::Message`]).
pub trait RawHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        args: Option<&'a RawValue>,
        extensions: Extensions,
    ) -> BoxFuture<'a, Result<Box<RawValue>, HandlerError>>;
}

struct TypedHandler<F> {
    func: F,
}

impl<Args, Reply, Fut, F> RawHandler for TypedHandler<F>
where
    Args: DeserializeOwned + Default + Send + 'static,
    Reply: Serialize + Send + 'static,
    Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
    F: Fn(Args, Extensions) -> Fut + Send + Sync,
{
    fn call<'a>(
        &'a self,
        args: Option<&'a RawValue>,
        extensions: Extensions,
    ) -> BoxFuture<'a, Result<Box<RawValue>, HandlerError>> {
        Box::pin(async move {
            let decoded: Args = match args {
                Some(raw) => serde_json::from_str(raw.get()).map_err(HandlerError::BadArgs)?,
                None => Args::default(),
            };
            let reply = (self.func)(decoded, extensions).await?;
            let encoded =
                serde_json::value::to_raw_value(&reply).map_err(HandlerError::BadReply)?;
            Ok(encoded)
        })
    }
}

/// Thread-safe `"Service.Method"` -> handler table. Analogous to the
/// reflective service registration in the original design, but built by an
/// explicit typed builder instead of scanning a receiver's exported methods
/// at runtime: Rust's type system already enforces what reflection checked
/// dynamically (argument count, the reply's return position, a single
/// canonical error type).
#[derive(Default)]
pub struct Registry {
    methods: RwLock<HashMap<String, Arc<dyn RawHandler>>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RawHandler>> {
        self.methods.read().expect("registry lock poisoned").get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    methods: HashMap<String, Arc<dyn RawHandler>>,
}

impl RegistryBuilder {
    /// Registers a handler under `name` (conventionally `"Service.Method"`).
    /// Rejects a name already registered in this builder rather than
    /// silently overwriting it.
    pub fn method<Args, Reply, Fut, F>(
        mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        Args: DeserializeOwned + Default + Send + 'static,
        Reply: Serialize + Send + 'static,
        Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
        F: Fn(Args, Extensions) -> Fut + Send + Sync + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(RegistryError::DuplicateMethod(name));
        }
        self.methods
            .insert(name, Arc::new(TypedHandler { func: handler }));
        Ok(self)
    }

    /// Zero registered methods is a valid, if unusual, registry: a pure
    /// outbound client that never answers inbound requests still needs one
    /// to construct an [`crate::endpoint::Endpoint`]. `getMethods` still
    /// answers such a registry truthfully, with an empty list.
    pub fn build(self) -> Registry {
        Registry {
            methods: RwLock::new(self.methods),
        }
    }
}
