//! Schema generation
//!
//! Derives the structural description of every exposed element: its shape,
//! its restriction and its annotation. Composite types are expanded into
//! records of named fields, fixed-length arrays into lists with a length.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

use crate::core::types::{ElementType, MATRIX_LEN};
use crate::storage::{Constraint, Element};

/// Structural description of the exposed elements, in key order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSchema {
    /// One entry per exposed element
    pub elements: Vec<SchemaElement>,
}

impl StateSchema {
    /// Describe every exposed element yielded by `elements`
    pub fn generate<'a>(elements: impl IntoIterator<Item = &'a Element>) -> Self {
        Self {
            elements: elements
                .into_iter()
                .filter(|e| e.is_exposed())
                .map(SchemaElement::describe)
                .collect(),
        }
    }

    /// Entry for `key`
    pub fn get(&self, key: &str) -> Option<&SchemaElement> {
        self.elements.iter().find(|e| e.key == key)
    }

    /// Number of described elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether no element is described
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Description of one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaElement {
    /// Element key
    pub key: String,
    /// Structural shape of the value
    pub shape: Shape,
    /// Restriction on accepted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restriction: Option<Restriction>,
    /// Human-readable annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl SchemaElement {
    fn describe(element: &Element) -> Self {
        Self {
            key: element.key().to_string(),
            shape: Shape::of(element.element_type()),
            restriction: Restriction::from_constraint(element.constraint()),
            annotation: element.annotation().map(str::to_string),
        }
    }
}

/// Structural shape of a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    /// Signed integer
    Integer,
    /// Floating point number
    Float,
    /// Boolean
    Boolean,
    /// UTF-8 string
    String,
    /// Base64-encoded byte blob
    Bytes,
    /// Fixed-length list
    List {
        /// Shape of every item
        item: Box<Shape>,
        /// Exact number of items
        length: usize,
    },
    /// Named record of fields
    Record {
        /// Record type name
        name: String,
        /// Fields in declaration order
        fields: Vec<Field>,
    },
}

impl Shape {
    /// Shape of values of type `ty`
    pub fn of(ty: ElementType) -> Self {
        match ty {
            ElementType::Integer => Shape::Integer,
            ElementType::Float => Shape::Float,
            ElementType::Boolean => Shape::Boolean,
            ElementType::String => Shape::String,
            ElementType::Bytes => Shape::Bytes,
            ElementType::Matrix => Shape::matrix(),
            ElementType::Viewer => Shape::Record {
                name: "viewer".to_string(),
                fields: vec![
                    Field::new("width", Shape::Integer),
                    Field::new("height", Shape::Integer),
                    Field::new("projection", Shape::matrix()),
                    Field::new("modelview", Shape::matrix()),
                    Field::new("timestamp", Shape::Float),
                    Field::new("sceneView", Shape::String),
                ],
            },
        }
    }

    fn matrix() -> Self {
        Shape::List {
            item: Box::new(Shape::Float),
            length: MATRIX_LEN,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Integer => f.write_str("integer"),
            Shape::Float => f.write_str("float"),
            Shape::Boolean => f.write_str("boolean"),
            Shape::String => f.write_str("string"),
            Shape::Bytes => f.write_str("bytes"),
            Shape::List { item, length } => write!(f, "list<{}; {}>", item, length),
            Shape::Record { name, .. } => write!(f, "record {}", name),
        }
    }
}

/// Named field of a record shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field shape
    pub shape: Shape,
}

impl Field {
    fn new(name: &str, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            shape,
        }
    }
}

/// Restriction on the values an element accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Restriction {
    /// Inclusive bounds
    #[serde(rename_all = "camelCase")]
    Range {
        /// Smallest accepted value
        min_inclusive: Json,
        /// Largest accepted value
        max_inclusive: Json,
    },
    /// Explicit set of accepted values
    Enumeration {
        /// Accepted values
        values: Vec<Json>,
    },
}

impl Restriction {
    /// Wire form of a constraint; `None` when unconstrained
    pub fn from_constraint(constraint: &Constraint) -> Option<Self> {
        match constraint {
            Constraint::None => None,
            Constraint::Range { min, max } => Some(Restriction::Range {
                min_inclusive: min.to_json(),
                max_inclusive: max.to_json(),
            }),
            Constraint::Allowed(values) => Some(Restriction::Enumeration {
                values: values.iter().map(|v| v.to_json()).collect(),
            }),
        }
    }
}
