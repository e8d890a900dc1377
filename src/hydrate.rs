use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::response::Payload;

/// Identifies the domain type a response body should be hydrated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetType {
    id: TypeId,
    name: &'static str,
}

impl TargetType {
    /// Target for `T`
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    /// Type name, for diagnostics only
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Turns a decoded JSON body into a domain object.
pub trait Hydrator: Send + Sync {
    /// Fails when `target` is unknown or `body` doesn't have the expected shape.
    fn hydrate(&self, target: TargetType, body: Value) -> Result<Payload, BoxError>;
}

impl<F> Hydrator for F
where
    F: Fn(TargetType, Value) -> Result<Payload, BoxError> + Send + Sync,
{
    fn hydrate(&self, target: TargetType, body: Value) -> Result<Payload, BoxError> {
        self(target, body)
    }
}

type HydrateFn = Arc<dyn Fn(Value) -> Result<Payload, BoxError> + Send + Sync>;

/// [`Hydrator`] backed by a registry of known target types.
///
/// ```
/// # use http_cache_executor::{SerdeHydrator, TargetType, Hydrator};
/// #[derive(serde::Deserialize)]
/// struct Banner { id: u32 }
///
/// let hydrator = SerdeHydrator::new().register::<Banner>();
/// let payload = hydrator.hydrate(TargetType::of::<Banner>(), serde_json::json!({"id": 7})).unwrap();
/// assert_eq!(payload.downcast_ref::<Banner>().unwrap().id, 7);
/// ```
#[derive(Clone, Default)]
pub struct SerdeHydrator {
    targets: HashMap<TypeId, HydrateFn>,
}

impl SerdeHydrator {
    /// Registry that knows no types yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrates `T` with its `Deserialize` impl.
    pub fn register<T>(self) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.register_with::<T, _>(|body| Ok(serde_json::from_value::<T>(body)?))
    }

    /// Hydrates `T` with a custom function, e.g. for bodies wrapped in an envelope.
    pub fn register_with<T, F>(mut self, hydrate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Value) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.targets.insert(
            TypeId::of::<T>(),
            Arc::new(move |body| hydrate(body).map(|obj| Arc::new(obj) as Payload)),
        );
        self
    }

    /// Whether `target` has been registered
    pub fn knows(&self, target: TargetType) -> bool {
        self.targets.contains_key(&target.id)
    }
}

impl Hydrator for SerdeHydrator {
    fn hydrate(&self, target: TargetType, body: Value) -> Result<Payload, BoxError> {
        let hydrate = self
            .targets
            .get(&target.id)
            .ok_or_else(|| format!("no hydrator registered for {target}"))?;
        hydrate(body)
    }
}

impl fmt::Debug for SerdeHydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeHydrator")
            .field("targets", &self.targets.len())
            .finish()
    }
}
