//! Document generation and application
//!
//! Deltas are selected by each element's last-modified revision rather than
//! from a change log. Generating one costs a pass over the elements, but only
//! "everything newer than R" can be asked for. Removals leave no stamped
//! element behind, so a delta never reports them; observers learn about
//! removals from the schema section, which is always sent in full.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::config::UnknownKeyPolicy;
use crate::core::error::{Error, Result};
use crate::core::types::{ElementValue, Revision};
use crate::delta::types::{ApplyReport, ModelDocument, StateEntry};
use crate::storage::{Element, ExposedModel, ModelLock};
use crate::system::metrics::{Metrics, Timer};

impl ModelLock<'_> {
    /// Document describing every exposed element
    pub fn full_document(&mut self) -> ModelDocument {
        Metrics::global()
            .documents_generated
            .with_label_values(&["full"])
            .inc();
        self.document(|_| true)
    }

    /// Document carrying only the exposed elements modified after `since`
    ///
    /// The envelope records the current revision, not `since`.
    pub fn delta_document(&mut self, since: Revision) -> ModelDocument {
        Metrics::global()
            .documents_generated
            .with_label_values(&["delta"])
            .inc();
        self.document(|e| e.last_modified() > since)
    }

    fn document(&mut self, include: impl Fn(&Element) -> bool) -> ModelDocument {
        let schema = self.schema();
        let state = self
            .elements()
            .filter(|e| e.is_exposed() && include(e))
            .map(|e| StateEntry {
                key: e.key().to_string(),
                value: e.value().to_json(),
            })
            .collect();
        ModelDocument {
            revision: self.current_revision(),
            schema: Some(schema.as_ref().clone()),
            state,
            layout: self.layout().clone(),
        }
    }

    /// Apply the state section of `doc` as a batch of updates
    ///
    /// Every entry is validated before any is committed; a single bad entry
    /// rejects the whole document and leaves the store untouched. Valid
    /// entries are then applied in document order, one revision each. Keys
    /// the store does not expose are skipped or rejected according to the
    /// model's [`UnknownKeyPolicy`]. The layout section is ignored.
    pub fn apply_document(&mut self, doc: &ModelDocument) -> Result<ApplyReport> {
        let metrics = Metrics::global();
        let timer = Timer::start(&metrics.apply_duration);
        let result = self.validate_and_apply(doc);
        timer.finish();

        match &result {
            Ok(report) => {
                metrics.documents_applied.inc();
                debug!(
                    applied = report.applied.len(),
                    ignored = report.ignored.len(),
                    revision = report.revision,
                    "applied document"
                );
            }
            Err(err) => {
                metrics.documents_rejected.inc();
                warn!(error = %err, "rejected document");
            }
        }
        result
    }

    fn validate_and_apply(&mut self, doc: &ModelDocument) -> Result<ApplyReport> {
        if let Some(declared) = &doc.schema {
            let known = self.schema();
            for entry in &declared.elements {
                let Some(local) = known.get(&entry.key) else {
                    continue;
                };
                if entry.shape != local.shape {
                    return Err(Error::SchemaMismatch {
                        key: entry.key.clone(),
                        declared: entry.shape.to_string(),
                        known: local.shape.to_string(),
                    });
                }
            }
        }

        let policy = self.unknown_key_policy();
        let mut report = ApplyReport::default();
        let mut staged: Vec<(&str, ElementValue)> = Vec::with_capacity(doc.state.len());
        for entry in &doc.state {
            let ty = match self.element(&entry.key) {
                Ok(element) if element.is_exposed() => element.element_type(),
                _ => match policy {
                    UnknownKeyPolicy::Ignore => {
                        warn!(key = %entry.key, "ignoring unknown key in applied document");
                        report.ignored.push(entry.key.clone());
                        continue;
                    }
                    UnknownKeyPolicy::Reject => {
                        return Err(Error::malformed_update(&entry.key, "no such element"));
                    }
                },
            };
            let value = ElementValue::from_json(&entry.key, ty, &entry.value)?;
            self.check_update(&entry.key, &value)?;
            staged.push((entry.key.as_str(), value));
        }

        for (key, value) in staged {
            report.revision = self.update_element(key, value)?;
            report.applied.push(key.to_string());
        }
        if report.applied.is_empty() {
            report.revision = self.current_revision();
        }
        Ok(report)
    }
}

impl ExposedModel {
    /// Serialised document describing every exposed element
    pub fn full_document(&self) -> Result<Bytes> {
        let doc = self.lock()?.full_document();
        doc.to_bytes()
    }

    /// Serialised document of the exposed elements modified after `since`
    pub fn delta_document(&self, since: Revision) -> Result<Bytes> {
        let doc = self.lock()?.delta_document(since);
        doc.to_bytes()
    }

    /// Parse `bytes` as a document and apply it under one guard acquisition
    pub fn apply_document(&self, bytes: &[u8]) -> Result<ApplyReport> {
        let doc = ModelDocument::from_slice(bytes).map_err(|err| {
            Metrics::global().documents_rejected.inc();
            warn!(error = %err, "rejected unparsable document");
            err
        })?;
        self.lock()?.apply_document(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Matrix;
    use crate::storage::ElementSpec;
    use serde_json::json;

    fn parse(bytes: Bytes) -> ModelDocument {
        ModelDocument::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_delta_restores_older_snapshot() {
        let model = ExposedModel::new();
        model.add_element("test1", 123).unwrap();
        let rev0 = model.current_revision();
        model.add_element("test2", 123.456).unwrap();
        let snapshot = model.delta_document(rev0).unwrap();

        model.update_element("test1", 7).unwrap();
        model.update_element("test2", 1.5).unwrap();

        let doc = parse(snapshot.clone());
        assert_eq!(doc.keys().collect::<Vec<_>>(), ["test2"]);
        assert_eq!(doc.revision, 2);

        model.apply_document(&snapshot).unwrap();
        assert_eq!(model.get::<f64>("test2").unwrap(), 123.456);
        assert_eq!(model.get::<i64>("test1").unwrap(), 7);
    }

    #[test]
    fn test_delta_selects_strictly_newer_elements() {
        let model = ExposedModel::new();
        model.add_element("a", 1).unwrap();
        model.add_element("b", 2).unwrap();
        model.update_element("a", 3).unwrap();

        let doc = parse(model.delta_document(2).unwrap());
        assert_eq!(doc.keys().collect::<Vec<_>>(), ["a"]);
        assert_eq!(doc.revision, 3);
        assert_eq!(doc.schema.unwrap().len(), 2);

        assert!(parse(model.delta_document(3).unwrap()).is_noop());
    }

    #[test]
    fn test_hidden_elements_never_leave_the_store() {
        let model = ExposedModel::new();
        model.add(ElementSpec::new("secret", 1).hidden()).unwrap();
        model.add_element("shown", 2).unwrap();
        let doc = parse(model.full_document().unwrap());
        assert_eq!(doc.keys().collect::<Vec<_>>(), ["shown"]);

        let report = model
            .apply_document(br#"{"state": [{"key": "secret", "value": 5}]}"#)
            .unwrap();
        assert_eq!(report.ignored, ["secret"]);
        assert_eq!(model.get::<i64>("secret").unwrap(), 1);
    }

    #[test]
    fn test_full_self_apply_keeps_values() {
        let model = ExposedModel::new();
        model.add_constrained_element("timestep", 40, 2, 42).unwrap();
        model
            .add_element_with_restriction("mode", "points", ["points", "solid"])
            .unwrap();
        model.add_element("blob", vec![1u8, 2, 3]).unwrap();
        model.set_layout(json!({"kind": "grid"})).unwrap();

        let full = model.full_document().unwrap();
        let report = model.apply_document(&full).unwrap();
        assert_eq!(report.applied.len(), 3);
        assert_eq!(report.revision, 6);

        let again = parse(model.full_document().unwrap());
        let before = parse(full);
        assert_eq!(again.state, before.state);
        assert_eq!(again.layout, json!({"kind": "grid"}));
    }

    #[test]
    fn test_full_self_apply_keeps_non_finite_values() {
        let model = ExposedModel::new();
        model.add_element("f", f64::NAN).unwrap();
        let mut m = Matrix::identity();
        m.0[0] = f32::INFINITY;
        model.add_element("m", m).unwrap();

        let full = model.full_document().unwrap();
        let report = model.apply_document(&full).unwrap();
        assert_eq!(report.applied, ["f", "m"]);
        assert!(model.get::<f64>("f").unwrap().is_nan());
        assert_eq!(model.get::<Matrix>("m").unwrap(), m);
    }

    #[test]
    fn test_one_bad_entry_rejects_the_document() {
        let model = ExposedModel::new();
        model.add_element("a", 1).unwrap();
        model.add_constrained_element("b", 5, 0, 10).unwrap();

        let err = model
            .apply_document(br#"{"state": [{"key": "a", "value": 2}, {"key": "b", "value": 11}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation { ref key, .. } if key == "b"));

        let err = model
            .apply_document(br#"{"state": [{"key": "a", "value": 2}, {"key": "b", "value": "x"}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate { ref key, .. } if key == "b"));

        assert_eq!(model.get::<i64>("a").unwrap(), 1);
        assert_eq!(model.current_revision(), 2);
    }

    #[test]
    fn test_unknown_key_policy() {
        let lenient = ExposedModel::new();
        lenient.add_element("a", 1).unwrap();
        let report = lenient
            .apply_document(br#"{"state": [{"key": "gone", "value": 1}, {"key": "a", "value": 4}]}"#)
            .unwrap();
        assert_eq!(report.applied, ["a"]);
        assert_eq!(report.ignored, ["gone"]);

        let strict = ExposedModel::with_policy(UnknownKeyPolicy::Reject);
        strict.add_element("a", 1).unwrap();
        let err = strict
            .apply_document(br#"{"state": [{"key": "gone", "value": 1}, {"key": "a", "value": 4}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate { ref key, .. } if key == "gone"));
        assert_eq!(strict.get::<i64>("a").unwrap(), 1);
    }

    #[test]
    fn test_declared_schema_must_agree() {
        let model = ExposedModel::new();
        model.add_element("a", 1).unwrap();
        let doc = br#"{
            "schema": {"elements": [{"key": "a", "shape": {"type": "float"}}]},
            "state": [{"key": "a", "value": 2}]
        }"#;
        assert!(matches!(
            model.apply_document(doc),
            Err(Error::SchemaMismatch { .. })
        ));
        assert_eq!(model.current_revision(), 1);
    }

    #[test]
    fn test_empty_document_reports_current_revision() {
        let model = ExposedModel::new();
        model.add_element("a", 1).unwrap();
        let report = model.apply_document(b"{}").unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.revision, 1);
    }
}
