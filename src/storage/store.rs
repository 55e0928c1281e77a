//! The exposed model: element store, revision counter and concurrency guard
//!
//! All state lives behind one `parking_lot` mutex. [`ExposedModel::lock`]
//! hands out a [`ModelLock`] guard through which every operation runs, so a
//! caller can group several operations into one atomic step and the lock is
//! released on every exit path when the guard drops.
//!
//! Each committed mutation bumps the revision by exactly one, publishes it to
//! the [`RevisionWatch`], records metrics and then dispatches listener events
//! while the guard is still held.

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::config::{Config, UnknownKeyPolicy};
use crate::core::error::{Error, Result};
use crate::core::types::{ElementType, ElementValue, Revision};
use crate::notify::listener::{is_dispatching, ListenerRegistry};
use crate::notify::{
    CancelToken, EventKind, ListenerId, ModelEvent, ModelListener, RevisionWatch, WaitOutcome,
};
use crate::schema::StateSchema;
use crate::storage::element::{Element, ElementSpec};
use crate::system::metrics::Metrics;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, revision-tracked store of typed elements
pub struct ExposedModel {
    id: u64,
    state: Mutex<ModelState>,
    watch: Arc<RevisionWatch>,
    unknown_keys: UnknownKeyPolicy,
}

struct ModelState {
    elements: BTreeMap<String, Element>,
    revision: Revision,
    listeners: ListenerRegistry,
    layout: Json,
    schema: Option<Arc<StateSchema>>,
}

impl ExposedModel {
    /// Empty model at revision 0 that ignores unknown keys on apply
    pub fn new() -> Self {
        Self::with_policy(UnknownKeyPolicy::default())
    }

    /// Empty model with an explicit policy for unknown keys in applied documents
    pub fn with_policy(unknown_keys: UnknownKeyPolicy) -> Self {
        Self {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ModelState {
                elements: BTreeMap::new(),
                revision: 0,
                listeners: ListenerRegistry::default(),
                layout: Json::Null,
                schema: None,
            }),
            watch: Arc::new(RevisionWatch::new(0)),
            unknown_keys,
        }
    }

    /// Empty model configured from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::with_policy(config.model.unknown_keys)
    }

    /// Policy applied to unknown keys in inbound documents
    pub fn unknown_key_policy(&self) -> UnknownKeyPolicy {
        self.unknown_keys
    }

    /// Acquire the model guard
    ///
    /// Fails with [`Error::ReentrantAccess`] when called from inside one of
    /// this model's listener callbacks. Acquiring it twice from the same
    /// thread outside a callback deadlocks, as with any plain mutex.
    pub fn lock(&self) -> Result<ModelLock<'_>> {
        if is_dispatching(self.id) {
            return Err(Error::ReentrantAccess);
        }
        Ok(ModelLock {
            model: self,
            state: self.state.lock(),
        })
    }

    /// Latest committed revision
    ///
    /// Reads the revision mirror, so it never waits for the guard and is safe
    /// to call from listener callbacks.
    pub fn current_revision(&self) -> Revision {
        self.watch.current()
    }

    /// Revision mirror used for long-poll waits
    pub fn revision_watch(&self) -> Arc<RevisionWatch> {
        self.watch.clone()
    }

    /// Token that cancels blocking waits on this model
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(self.watch.clone())
    }

    /// Block until the revision exceeds `after`, `timeout` elapses or `cancel` fires
    pub fn wait_for_revision(
        &self,
        after: Revision,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        self.watch.wait_for_revision(after, timeout, cancel)
    }

    /// Wait for the revision to exceed `after` without blocking the thread
    pub async fn wait_for_revision_async(&self, after: Revision, timeout: Duration) -> WaitOutcome {
        self.watch.wait_for_revision_async(after, timeout).await
    }

    /// Add an unconstrained element
    pub fn add_element(&self, key: &str, value: impl Into<ElementValue>) -> Result<Revision> {
        self.lock()?.add(ElementSpec::new(key, value))
    }

    /// Add an element restricted to the inclusive range `[min, max]`
    pub fn add_constrained_element(
        &self,
        key: &str,
        value: impl Into<ElementValue>,
        min: impl Into<ElementValue>,
        max: impl Into<ElementValue>,
    ) -> Result<Revision> {
        self.lock()?.add(ElementSpec::new(key, value).with_range(min, max))
    }

    /// Add an element restricted to an explicit set of values
    pub fn add_element_with_restriction<I, V>(
        &self,
        key: &str,
        value: impl Into<ElementValue>,
        allowed: I,
    ) -> Result<Revision>
    where
        I: IntoIterator<Item = V>,
        V: Into<ElementValue>,
    {
        self.lock()?.add(ElementSpec::new(key, value).with_allowed(allowed))
    }

    /// Add an element described by `spec`
    pub fn add(&self, spec: ElementSpec) -> Result<Revision> {
        self.lock()?.add(spec)
    }

    /// Replace the value of an existing element
    pub fn update_element(&self, key: &str, value: impl Into<ElementValue>) -> Result<Revision> {
        self.lock()?.update_element(key, value)
    }

    /// Remove an element
    pub fn remove_element(&self, key: &str) -> Result<Revision> {
        self.lock()?.remove_element(key)
    }

    /// Attach or replace the annotation of an existing element
    pub fn annotate(&self, key: &str, annotation: impl Into<String>) -> Result<Revision> {
        self.lock()?.annotate(key, annotation)
    }

    /// Current value of an element
    pub fn get_value(&self, key: &str) -> Result<ElementValue> {
        self.lock()?.get_value(key)
    }

    /// Current value of an element converted to `T`
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<ElementValue, Error = ElementType>,
    {
        self.lock()?.get(key)
    }

    /// Snapshot of an element
    pub fn element(&self, key: &str) -> Result<Element> {
        self.lock()?.element(key).cloned()
    }

    /// Whether an element with `key` exists
    pub fn has_element(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.has_element(key))
    }

    /// Keys of all elements in order
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys())
    }

    /// Replace the opaque layout blob carried by every document
    pub fn set_layout(&self, layout: Json) -> Result<()> {
        self.lock()?.set_layout(layout);
        Ok(())
    }

    /// Schema of the exposed elements
    pub fn schema(&self) -> Result<Arc<StateSchema>> {
        Ok(self.lock()?.schema())
    }

    /// Register a listener for every later committed mutation
    pub fn register_listener(&self, listener: Arc<dyn ModelListener>) -> Result<ListenerId> {
        Ok(self.lock()?.register_listener(listener))
    }

    /// Unregister a listener; returns whether it was registered
    pub fn unregister_listener(&self, id: ListenerId) -> Result<bool> {
        Ok(self.lock()?.unregister_listener(id))
    }
}

impl Default for ExposedModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to an [`ExposedModel`]; released on drop
pub struct ModelLock<'a> {
    model: &'a ExposedModel,
    state: MutexGuard<'a, ModelState>,
}

impl<'a> ModelLock<'a> {
    /// Revision of the last committed mutation
    pub fn current_revision(&self) -> Revision {
        self.state.revision
    }

    /// Policy applied to unknown keys in inbound documents
    pub fn unknown_key_policy(&self) -> UnknownKeyPolicy {
        self.model.unknown_keys
    }

    /// Add an element described by `spec`
    ///
    /// Fires `SchemaAdded` followed by `ElementChanged`.
    pub fn add(&mut self, spec: ElementSpec) -> Result<Revision> {
        if self.state.elements.contains_key(&spec.key) {
            return Err(Error::DuplicateKey { key: spec.key });
        }
        let revision = self.state.revision + 1;
        let element = spec.into_element(revision)?;
        let key = element.key.clone();

        self.state.revision = revision;
        self.state.elements.insert(key.clone(), element);
        self.commit(
            "add",
            &key,
            revision,
            &[EventKind::SchemaAdded, EventKind::ElementChanged],
        );
        Ok(revision)
    }

    /// Add an unconstrained element
    pub fn add_element(&mut self, key: &str, value: impl Into<ElementValue>) -> Result<Revision> {
        self.add(ElementSpec::new(key, value))
    }

    /// Add an element restricted to the inclusive range `[min, max]`
    pub fn add_constrained_element(
        &mut self,
        key: &str,
        value: impl Into<ElementValue>,
        min: impl Into<ElementValue>,
        max: impl Into<ElementValue>,
    ) -> Result<Revision> {
        self.add(ElementSpec::new(key, value).with_range(min, max))
    }

    /// Add an element restricted to an explicit set of values
    pub fn add_element_with_restriction<I, V>(
        &mut self,
        key: &str,
        value: impl Into<ElementValue>,
        allowed: I,
    ) -> Result<Revision>
    where
        I: IntoIterator<Item = V>,
        V: Into<ElementValue>,
    {
        self.add(ElementSpec::new(key, value).with_allowed(allowed))
    }

    /// Check that `value` would be accepted by `update_element` without committing it
    pub fn check_update(&self, key: &str, value: &ElementValue) -> Result<()> {
        let element = self
            .state
            .elements
            .get(key)
            .ok_or_else(|| Error::unknown_key(key))?;
        if element.element_type() != value.element_type() {
            return Err(Error::TypeMismatch {
                key: key.to_string(),
                expected: element.element_type().to_string(),
                actual: value.element_type().to_string(),
            });
        }
        element.constraint.check(key, value)
    }

    /// Replace the value of an existing element
    ///
    /// Every successful update commits a new revision, including one that
    /// stores the value already held.
    pub fn update_element(&mut self, key: &str, value: impl Into<ElementValue>) -> Result<Revision> {
        let value = value.into();
        self.check_update(key, &value)?;

        let state = &mut *self.state;
        let element = state
            .elements
            .get_mut(key)
            .ok_or_else(|| Error::unknown_key(key))?;
        state.revision += 1;
        element.value = value;
        element.last_modified = state.revision;

        let revision = state.revision;
        self.commit("update", key, revision, &[EventKind::ElementChanged]);
        Ok(revision)
    }

    /// Remove an element
    pub fn remove_element(&mut self, key: &str) -> Result<Revision> {
        let removed = self
            .state
            .elements
            .remove(key)
            .ok_or_else(|| Error::unknown_key(key))?;
        self.state.revision += 1;
        let revision = self.state.revision;

        self.publish("remove", revision, true);
        debug!(key, revision, "removed element");
        self.state
            .listeners
            .dispatch(self.model.id, &ModelEvent::SchemaRemoved(&removed), revision);
        Ok(revision)
    }

    /// Attach or replace the annotation of an existing element
    ///
    /// The element is stamped with the new revision so deltas carry it.
    pub fn annotate(&mut self, key: &str, annotation: impl Into<String>) -> Result<Revision> {
        let state = &mut *self.state;
        let element = state
            .elements
            .get_mut(key)
            .ok_or_else(|| Error::unknown_key(key))?;
        state.revision += 1;
        element.annotation = Some(annotation.into());
        element.last_modified = state.revision;

        let revision = state.revision;
        self.commit("annotate", key, revision, &[EventKind::SchemaModified]);
        Ok(revision)
    }

    /// Borrow an element
    pub fn element(&self, key: &str) -> Result<&Element> {
        self.state
            .elements
            .get(key)
            .ok_or_else(|| Error::unknown_key(key))
    }

    /// Current value of an element
    pub fn get_value(&self, key: &str) -> Result<ElementValue> {
        self.element(key).map(|e| e.value.clone())
    }

    /// Current value of an element converted to `T`
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<ElementValue, Error = ElementType>,
    {
        T::try_from(self.get_value(key)?).map_err(|actual| Error::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: actual.to_string(),
        })
    }

    /// Whether an element with `key` exists
    pub fn has_element(&self, key: &str) -> bool {
        self.state.elements.contains_key(key)
    }

    /// Keys of all elements in order
    pub fn keys(&self) -> Vec<String> {
        self.state.elements.keys().cloned().collect()
    }

    /// All elements in key order, hidden ones included
    pub fn elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.state.elements.values()
    }

    /// Number of elements, hidden ones included
    pub fn len(&self) -> usize {
        self.state.elements.len()
    }

    /// Whether the model holds no elements
    pub fn is_empty(&self) -> bool {
        self.state.elements.is_empty()
    }

    /// Replace the opaque layout blob; does not change the revision
    pub fn set_layout(&mut self, layout: Json) {
        self.state.layout = layout;
    }

    /// Opaque layout blob
    pub fn layout(&self) -> &Json {
        &self.state.layout
    }

    /// Schema of the exposed elements, regenerated after schema events only
    pub fn schema(&mut self) -> Arc<StateSchema> {
        let state = &mut *self.state;
        state
            .schema
            .get_or_insert_with(|| Arc::new(StateSchema::generate(state.elements.values())))
            .clone()
    }

    /// Register a listener for every later committed mutation
    pub fn register_listener(&mut self, listener: Arc<dyn ModelListener>) -> ListenerId {
        self.state.listeners.register(listener)
    }

    /// Unregister a listener; returns whether it was registered
    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        self.state.listeners.unregister(id)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.state.listeners.len()
    }

    fn publish(&mut self, kind: &'static str, revision: Revision, schema_changed: bool) {
        if schema_changed {
            self.state.schema = None;
        }
        self.model.watch.publish(revision);

        let metrics = Metrics::global();
        metrics.mutations.with_label_values(&[kind]).inc();
        metrics.revision.set(revision as i64);
        metrics.elements.set(self.state.elements.len() as i64);
    }

    fn commit(&mut self, kind: &'static str, key: &str, revision: Revision, events: &[EventKind]) {
        self.publish(kind, revision, events.iter().any(|e| e.is_schema()));
        debug!(key, revision, kind, "committed mutation");

        let state = &*self.state;
        let Some(element) = state.elements.get(key) else {
            return;
        };
        for kind in events {
            let event = match kind {
                EventKind::ElementChanged => ModelEvent::ElementChanged(element),
                EventKind::SchemaAdded => ModelEvent::SchemaAdded(element),
                EventKind::SchemaRemoved => ModelEvent::SchemaRemoved(element),
                EventKind::SchemaModified => ModelEvent::SchemaModified(element),
            };
            state.listeners.dispatch(self.model.id, &event, revision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Matrix;
    use std::sync::Weak;

    #[test]
    fn test_revision_counts_committed_mutations() {
        let model = ExposedModel::new();
        assert_eq!(model.current_revision(), 0);

        assert_eq!(model.add_element("a", 1).unwrap(), 1);
        assert_eq!(model.update_element("a", 2).unwrap(), 2);
        assert!(model.update_element("a", "text").is_err());
        assert!(model.update_element("missing", 1).is_err());
        assert_eq!(model.annotate("a", "An integer").unwrap(), 3);
        assert_eq!(model.remove_element("a").unwrap(), 4);
        assert!(model.remove_element("a").is_err());

        assert_eq!(model.current_revision(), 4);
        assert_eq!(model.lock().unwrap().current_revision(), 4);
    }

    #[test]
    fn test_duplicate_key_leaves_store_unchanged() {
        let model = ExposedModel::new();
        model.add_element("isovalue", -4).unwrap();
        let err = model.add_element("isovalue", 7).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { ref key } if key == "isovalue"));
        assert_eq!(model.current_revision(), 1);
        assert_eq!(model.get::<i64>("isovalue").unwrap(), -4);
    }

    #[test]
    fn test_update_checks_type_and_constraint() {
        let model = ExposedModel::new();
        model.add_constrained_element("timestep", 40, 2, 42).unwrap();

        assert!(matches!(
            model.update_element("timestep", 1.5),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            model.update_element("timestep", 43),
            Err(Error::ConstraintViolation { .. })
        ));
        assert_eq!(model.current_revision(), 1);

        assert_eq!(model.update_element("timestep", 42).unwrap(), 2);
        let element = model.element("timestep").unwrap();
        assert_eq!(element.value(), &ElementValue::Integer(42));
        assert_eq!(element.last_modified(), 2);
    }

    #[test]
    fn test_enumeration_update_outside_set() {
        let model = ExposedModel::new();
        model
            .add_element_with_restriction("render_mode", "points", ["points", "wireframe"])
            .unwrap();
        assert!(matches!(
            model.update_element("render_mode", "solid"),
            Err(Error::ConstraintViolation { .. })
        ));
        model.update_element("render_mode", "wireframe").unwrap();
        assert_eq!(model.get::<String>("render_mode").unwrap(), "wireframe");
    }

    #[test]
    fn test_typed_get_reports_mismatch() {
        let model = ExposedModel::new();
        model.add_element("projection", Matrix::identity()).unwrap();
        assert_eq!(model.get::<Matrix>("projection").unwrap(), Matrix::identity());
        assert!(matches!(
            model.get::<bool>("projection"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(model.get::<bool>("nope"), Err(Error::UnknownKey { .. })));
    }

    #[test]
    fn test_annotate_requires_existing_element() {
        let model = ExposedModel::new();
        assert!(matches!(
            model.annotate("later", "too early"),
            Err(Error::UnknownKey { .. })
        ));
        model.add_element("later", true).unwrap();
        model.annotate("later", "Now it exists").unwrap();
        assert_eq!(
            model.element("later").unwrap().annotation(),
            Some("Now it exists")
        );
    }

    #[test]
    fn test_layout_does_not_bump_revision() {
        let model = ExposedModel::new();
        model
            .set_layout(serde_json::json!({"kind": "vbox"}))
            .unwrap();
        assert_eq!(model.current_revision(), 0);
        assert_eq!(model.lock().unwrap().layout()["kind"], "vbox");
    }

    #[test]
    fn test_schema_cache_follows_schema_events() {
        let model = ExposedModel::new();
        model.add_element("a", 1).unwrap();
        let first = model.schema().unwrap();
        model.update_element("a", 2).unwrap();
        assert!(Arc::ptr_eq(&first, &model.schema().unwrap()));

        model.add_element("b", 2.0).unwrap();
        let second = model.schema().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.elements.len(), 2);
    }

    struct Reentrant {
        model: Weak<ExposedModel>,
        outcomes: Mutex<Vec<bool>>,
    }

    impl ModelListener for Reentrant {
        fn on_event(&self, _event: &ModelEvent<'_>, _revision: Revision) {
            if let Some(model) = self.model.upgrade() {
                let rejected = matches!(model.lock(), Err(Error::ReentrantAccess));
                self.outcomes.lock().push(rejected);
            }
        }
    }

    #[test]
    fn test_listener_cannot_reenter_model() {
        let model = Arc::new(ExposedModel::new());
        let listener = Arc::new(Reentrant {
            model: Arc::downgrade(&model),
            outcomes: Mutex::new(Vec::new()),
        });
        model.register_listener(listener.clone()).unwrap();

        model.add_element("x", 1).unwrap();
        assert_eq!(*listener.outcomes.lock(), vec![true, true]);

        // Outside the callback the model is usable again.
        model.update_element("x", 2).unwrap();
        assert_eq!(model.current_revision(), 2);
    }
}
