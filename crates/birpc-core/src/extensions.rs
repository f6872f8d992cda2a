use std::any::{Any, TypeId};
use std::collections::HashMap;

/// A small type-indexed map passed to every handler as an extra parameter
/// slot, the Rust encoding of the Go implementation's reflective "extra
/// argument" positions. The endpoint inserts its own handle first; a
/// [`crate::codec::ArgFiller`] (if the `Codec` has one) fills in afterward,
/// so transport-specific values can shadow nothing the endpoint relies on
/// but still add connection-scoped context (peer address, auth principal).
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}
