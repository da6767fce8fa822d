//! Accessor bridge from host objects into the template namespace.
//!
//! Member access on an opaque [`ObjectRef`] consults an accessor registry:
//! given the host type and a member name it yields a getter or nothing.
//! Accessors never fail; a missing member is `Nil`. Resolution results are
//! cached per `(type, name)` behind a copy-on-write map so concurrent reads
//! stay cheap while writes are serialized.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;

use super::{convert, ObjectRef, Value};

/// Policy for member access on opaque host objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberAccessStrategy {
    /// Only explicitly registered accessors resolve. The default.
    #[default]
    Safe,
    /// Unregistered members fall back to serializing the host through serde
    /// and reading the resulting dictionary.
    SerdeBridge,
}

type Getter = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync>;
type GetterCache = HashMap<(TypeId, String), Option<Getter>>;

/// The asynchronous member contract. `get_member` is primary; the
/// synchronous variant polls an already-completed future.
#[async_trait]
pub trait MemberResolver: Send + Sync {
    async fn get_member(&self, obj: &ObjectRef, name: &str) -> Value;

    fn get_member_sync(&self, obj: &ObjectRef, name: &str) -> Value {
        self.get_member(obj, name)
            .now_or_never()
            .unwrap_or(Value::Nil)
    }
}

/// Registry of named getters keyed by host type.
pub struct AccessorRegistry {
    getters: HashMap<(TypeId, String), Getter>,
    cache: RwLock<Arc<GetterCache>>,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self {
            getters: HashMap::new(),
            cache: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }

    /// Registers a getter for `T::name`. Registration is expected to happen
    /// before rendering starts; it invalidates the resolution cache.
    pub fn register<T, F>(&mut self, name: impl Into<String>, get: F)
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |host| {
            host.downcast_ref::<T>().map(&get).unwrap_or(Value::Nil)
        });
        self.getters.insert((TypeId::of::<T>(), name.into()), getter);
        if let Ok(mut cache) = self.cache.write() {
            *cache = Arc::new(HashMap::new());
        }
    }

    /// Resolves a getter for `(type, name)`. Hits read the shared map
    /// without mutation; a miss clones the map, inserts the result, and
    /// swaps the pointer under the write lock.
    pub fn resolve(&self, type_id: TypeId, name: &str) -> Option<Getter> {
        let snapshot = match self.cache.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return self.getters.get(&(type_id, name.to_string())).cloned(),
        };
        if let Some(cached) = snapshot.get(&(type_id, name.to_string())) {
            return cached.clone();
        }

        let resolved = self.getters.get(&(type_id, name.to_string())).cloned();
        if let Ok(mut guard) = self.cache.write() {
            let mut next: GetterCache = (**guard).clone();
            next.insert((type_id, name.to_string()), resolved.clone());
            *guard = Arc::new(next);
        }
        resolved
    }
}

impl Default for AccessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemberResolver for AccessorRegistry {
    async fn get_member(&self, obj: &ObjectRef, name: &str) -> Value {
        match self.resolve(obj.type_id(), name) {
            Some(getter) => getter(obj.host()),
            None => Value::Nil,
        }
    }
}

/// Layered resolution: the context registry overrides the options registry,
/// and the serde bridge (when the strategy allows it) is the last resort.
pub(crate) async fn resolve_member(
    layers: &[&AccessorRegistry],
    strategy: MemberAccessStrategy,
    obj: &ObjectRef,
    name: &str,
) -> Value {
    for registry in layers {
        if let Some(getter) = registry.resolve(obj.type_id(), name) {
            return getter(obj.host());
        }
    }
    if strategy == MemberAccessStrategy::SerdeBridge {
        if let Some(json) = obj.to_serialized() {
            return convert::classify(&json, &[]).builtin_member(name);
        }
    }
    Value::Nil
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Product {
        title: String,
        price: i64,
    }

    fn product_value() -> Value {
        Value::object(Product {
            title: "widget".into(),
            price: 9,
        })
    }

    fn registry() -> AccessorRegistry {
        let mut registry = AccessorRegistry::new();
        registry.register::<Product, _>("title", |p| Value::str(p.title.clone()));
        registry.register::<Product, _>("price", |p| Value::from(p.price));
        registry
    }

    #[tokio::test]
    async fn test_registered_member_resolves() {
        let registry = registry();
        let value = product_value();
        let Value::Object(obj) = &value else {
            panic!("expected object")
        };
        assert_eq!(registry.get_member(obj, "title").await, Value::str("widget"));
        assert_eq!(registry.get_member(obj, "missing").await, Value::Nil);
    }

    #[test]
    fn test_sync_variant_polls_ready_future() {
        let registry = registry();
        let value = product_value();
        let Value::Object(obj) = &value else {
            panic!("expected object")
        };
        assert_eq!(registry.get_member_sync(obj, "price"), Value::from(9));
    }

    #[test]
    fn test_resolution_cache_caches_misses() {
        let registry = registry();
        let type_id = TypeId::of::<Product>();
        assert!(registry.resolve(type_id, "nope").is_none());
        let cache = registry.cache.read().unwrap();
        assert!(cache.contains_key(&(type_id, "nope".to_string())));
    }

    #[tokio::test]
    async fn test_layered_override() {
        let base = registry();
        let mut overlay = AccessorRegistry::new();
        overlay.register::<Product, _>("title", |_| Value::str("overridden"));
        let value = product_value();
        let Value::Object(obj) = &value else {
            panic!("expected object")
        };
        let resolved = resolve_member(
            &[&overlay, &base],
            MemberAccessStrategy::Safe,
            obj,
            "title",
        )
        .await;
        assert_eq!(resolved, Value::str("overridden"));
    }

    #[tokio::test]
    async fn test_serde_bridge_fallback() {
        #[derive(serde::Serialize)]
        struct Point {
            x: i64,
        }
        let value = Value::object_serializable(Point { x: 3 });
        let Value::Object(obj) = &value else {
            panic!("expected object")
        };
        let empty = AccessorRegistry::new();
        let safe = resolve_member(&[&empty], MemberAccessStrategy::Safe, obj, "x").await;
        assert_eq!(safe, Value::Nil);
        let bridged = resolve_member(&[&empty], MemberAccessStrategy::SerdeBridge, obj, "x").await;
        assert_eq!(bridged, Value::from(3));
    }
}
