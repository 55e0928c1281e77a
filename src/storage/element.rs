//! Elements and their constraints
//!
//! An [`Element`] exists only inside the store. Callers describe a new one
//! with an [`ElementSpec`] and read it back through the store's lock.

use crate::core::error::{Error, Result};
use crate::core::types::{ElementType, ElementValue, Revision};
use std::cmp::Ordering;

/// Validation rule attached to an element at creation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Constraint {
    /// Any value of the element's type is accepted
    #[default]
    None,
    /// Inclusive numeric range, in the element's native numeric type
    Range {
        /// Smallest accepted value
        min: ElementValue,
        /// Largest accepted value
        max: ElementValue,
    },
    /// Explicit set of accepted values
    Allowed(Vec<ElementValue>),
}

impl Constraint {
    /// Check that the constraint is well-formed for an element of type `ty`
    pub fn validate_for(&self, key: &str, ty: ElementType) -> Result<()> {
        match self {
            Constraint::None => Ok(()),
            Constraint::Range { min, max } => {
                if !ty.is_numeric() {
                    return Err(Error::TypeMismatch {
                        key: key.to_string(),
                        expected: "integer or float for a range constraint".to_string(),
                        actual: ty.to_string(),
                    });
                }
                for bound in [min, max] {
                    if bound.element_type() != ty {
                        return Err(Error::TypeMismatch {
                            key: key.to_string(),
                            expected: ty.to_string(),
                            actual: bound.element_type().to_string(),
                        });
                    }
                }
                match compare_numeric(min, max) {
                    Some(Ordering::Less) | Some(Ordering::Equal) => Ok(()),
                    _ => Err(Error::constraint_violation(
                        key,
                        format!("empty range [{}, {}]", min, max),
                    )),
                }
            }
            Constraint::Allowed(values) => {
                if let Some(bad) = values.iter().find(|v| v.element_type() != ty) {
                    return Err(Error::TypeMismatch {
                        key: key.to_string(),
                        expected: ty.to_string(),
                        actual: bad.element_type().to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Check `value` against the constraint
    ///
    /// Values that cannot be ordered against the bounds (NaN) are rejected.
    pub fn check(&self, key: &str, value: &ElementValue) -> Result<()> {
        match self {
            Constraint::None => Ok(()),
            Constraint::Range { min, max } => {
                let above_min = matches!(
                    compare_numeric(min, value),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                );
                let below_max = matches!(
                    compare_numeric(value, max),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                );
                if above_min && below_max {
                    Ok(())
                } else {
                    Err(Error::constraint_violation(
                        key,
                        format!("{} is outside [{}, {}]", value, min, max),
                    ))
                }
            }
            Constraint::Allowed(values) => {
                if values.contains(value) {
                    Ok(())
                } else {
                    Err(Error::constraint_violation(
                        key,
                        format!("{} is not one of the allowed values", value),
                    ))
                }
            }
        }
    }

    /// Whether any restriction applies
    pub fn is_none(&self) -> bool {
        matches!(self, Constraint::None)
    }
}

fn compare_numeric(a: &ElementValue, b: &ElementValue) -> Option<Ordering> {
    match (a, b) {
        (ElementValue::Integer(a), ElementValue::Integer(b)) => Some(a.cmp(b)),
        (ElementValue::Float(a), ElementValue::Float(b)) => a.partial_cmp(b),
        _ => None,
    }
}

/// One named, typed, versioned value in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) key: String,
    pub(crate) value: ElementValue,
    pub(crate) constraint: Constraint,
    pub(crate) annotation: Option<String>,
    pub(crate) last_modified: Revision,
    pub(crate) exposed: bool,
}

impl Element {
    /// Element key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value
    pub fn value(&self) -> &ElementValue {
        &self.value
    }

    /// Immutable type of the element
    pub fn element_type(&self) -> ElementType {
        self.value.element_type()
    }

    /// Constraint fixed at creation
    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Human-readable annotation, if any
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    /// Store revision at which the element was last created or updated
    pub fn last_modified(&self) -> Revision {
        self.last_modified
    }

    /// Whether the element appears in schema and state output
    pub fn is_exposed(&self) -> bool {
        self.exposed
    }
}

/// Description of an element to add
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub(crate) key: String,
    pub(crate) value: ElementValue,
    pub(crate) constraint: Constraint,
    pub(crate) annotation: Option<String>,
    pub(crate) exposed: bool,
}

impl ElementSpec {
    /// Unconstrained, exposed element
    pub fn new(key: impl Into<String>, value: impl Into<ElementValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            constraint: Constraint::None,
            annotation: None,
            exposed: true,
        }
    }

    /// Restrict the element to the inclusive range `[min, max]`
    pub fn with_range(mut self, min: impl Into<ElementValue>, max: impl Into<ElementValue>) -> Self {
        self.constraint = Constraint::Range {
            min: min.into(),
            max: max.into(),
        };
        self
    }

    /// Restrict the element to an explicit set of values
    pub fn with_allowed<I, V>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ElementValue>,
    {
        self.constraint = Constraint::Allowed(allowed.into_iter().map(Into::into).collect());
        self
    }

    /// Attach an annotation
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Keep the element out of schema and state output
    pub fn hidden(mut self) -> Self {
        self.exposed = false;
        self
    }

    /// Validate the spec and turn it into an element stamped with `revision`
    pub(crate) fn into_element(self, revision: Revision) -> Result<Element> {
        let ty = self.value.element_type();
        self.constraint.validate_for(&self.key, ty)?;

        if let Constraint::Allowed(_) = self.constraint {
            if self.constraint.check(&self.key, &self.value).is_err() {
                return Err(Error::ValueNotInRestriction {
                    key: self.key,
                    value: self.value.to_string(),
                });
            }
        } else {
            self.constraint.check(&self.key, &self.value)?;
        }

        Ok(Element {
            key: self.key,
            value: self.value,
            constraint: self.constraint,
            annotation: self.annotation,
            last_modified: revision,
            exposed: self.exposed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range_is_inclusive() {
        let c = Constraint::Range {
            min: ElementValue::Integer(2),
            max: ElementValue::Integer(42),
        };
        assert!(c.check("timestep", &ElementValue::Integer(2)).is_ok());
        assert!(c.check("timestep", &ElementValue::Integer(42)).is_ok());
        assert!(c.check("timestep", &ElementValue::Integer(1)).is_err());
        assert!(c.check("timestep", &ElementValue::Integer(43)).is_err());
    }

    #[test]
    fn test_float_range_fails_closed_on_nan() {
        let c = Constraint::Range {
            min: ElementValue::Float(-100.0),
            max: ElementValue::Float(100.0),
        };
        assert!(c.check("d", &ElementValue::Float(100.0)).is_ok());
        assert!(c.check("d", &ElementValue::Float(101.0)).is_err());
        assert!(c.check("d", &ElementValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_range_bounds_must_match_element_type() {
        let spec = ElementSpec::new("d", 1.5).with_range(0, 10);
        assert!(matches!(spec.into_element(1), Err(Error::TypeMismatch { .. })));

        let spec = ElementSpec::new("s", "x").with_range(0, 10);
        assert!(matches!(spec.into_element(1), Err(Error::TypeMismatch { .. })));

        let spec = ElementSpec::new("i", 5).with_range(10, 0);
        assert!(matches!(spec.into_element(1), Err(Error::ConstraintViolation { .. })));
    }

    #[test]
    fn test_initial_value_outside_range_is_rejected() {
        let spec = ElementSpec::new("aDouble", 101.0).with_range(-100.0, 100.0);
        assert!(matches!(spec.into_element(1), Err(Error::ConstraintViolation { .. })));
    }

    #[test]
    fn test_initial_value_outside_allowed_set() {
        let spec = ElementSpec::new("foobar", "foo").with_allowed(["bar", "gaz"]);
        assert!(matches!(
            spec.into_element(1),
            Err(Error::ValueNotInRestriction { .. })
        ));

        let element = ElementSpec::new("render_mode", "points")
            .with_allowed(["points", "wireframe", "solid"])
            .with_annotation("Render mode")
            .into_element(3)
            .unwrap();
        assert_eq!(element.last_modified(), 3);
        assert_eq!(element.annotation(), Some("Render mode"));
        assert!(element.is_exposed());
    }
}
