//! Typed values held by the exposed model
//!
//! [`ElementValue`] is the closed set of payloads an element can carry. Every
//! type-sensitive operation (update, serialisation, schema generation) matches
//! on it exhaustively, so a new variant cannot slip through unhandled.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::fmt;

use crate::core::error::{Error, Result};

/// Revision number of the store
pub type Revision = u64;

/// Number of components in a [`Matrix`]
pub const MATRIX_LEN: usize = 16;

/// Discriminant of an [`ElementValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Signed 64-bit integer
    Integer,
    /// 64-bit floating point
    Float,
    /// Boolean flag
    Boolean,
    /// UTF-8 string
    String,
    /// Opaque byte blob
    Bytes,
    /// Fixed-length array of 16 floats
    Matrix,
    /// Composite viewer record
    Viewer,
}

impl ElementType {
    /// Name used in schemas and error messages
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Integer => "integer",
            ElementType::Float => "float",
            ElementType::Boolean => "boolean",
            ElementType::String => "string",
            ElementType::Bytes => "bytes",
            ElementType::Matrix => "matrix",
            ElementType::Viewer => "viewer",
        }
    }

    /// Whether values of this type can carry a numeric range
    pub fn is_numeric(&self) -> bool {
        matches!(self, ElementType::Integer | ElementType::Float)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column-major 4x4 float matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f32; MATRIX_LEN]);

impl Matrix {
    /// Identity matrix
    pub fn identity() -> Self {
        let mut m = [0.0f32; MATRIX_LEN];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Matrix(m)
    }

    /// Build a matrix from exactly 16 components
    pub fn from_slice(key: &str, components: &[f32]) -> Result<Self> {
        let array: [f32; MATRIX_LEN] =
            components.try_into().map_err(|_| Error::TypeMismatch {
                key: key.to_string(),
                expected: format!("matrix of {} floats", MATRIX_LEN),
                actual: format!("{} floats", components.len()),
            })?;
        Ok(Matrix(array))
    }

    /// Components as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[f32; MATRIX_LEN]> for Matrix {
    fn from(components: [f32; MATRIX_LEN]) -> Self {
        Matrix(components)
    }
}

impl TryFrom<&[f32]> for Matrix {
    type Error = Error;

    fn try_from(components: &[f32]) -> Result<Self> {
        Matrix::from_slice("matrix", components)
    }
}

/// Camera state of a remote viewer
///
/// Stored and exchanged as one unit, but described field by field in the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    /// Canvas width in pixels
    pub width: i64,
    /// Canvas height in pixels
    pub height: i64,
    /// Projection matrix
    pub projection: Matrix,
    /// Modelview matrix
    pub modelview: Matrix,
    /// Client timestamp of the last camera change
    pub timestamp: f64,
    /// Name of the scene view shown by this viewer
    pub scene_view: String,
}

impl Default for Viewer {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            projection: Matrix::identity(),
            modelview: Matrix::identity(),
            timestamp: 0.0,
            scene_view: String::new(),
        }
    }
}

/// Payload of an element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Signed integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value
    String(String),
    /// Byte blob
    Bytes(Vec<u8>),
    /// 16-component float matrix
    Matrix(Matrix),
    /// Composite viewer record
    Viewer(Viewer),
}

impl ElementValue {
    /// Type of this value
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementValue::Integer(_) => ElementType::Integer,
            ElementValue::Float(_) => ElementType::Float,
            ElementValue::Bool(_) => ElementType::Boolean,
            ElementValue::String(_) => ElementType::String,
            ElementValue::Bytes(_) => ElementType::Bytes,
            ElementValue::Matrix(_) => ElementType::Matrix,
            ElementValue::Viewer(_) => ElementType::Viewer,
        }
    }
}

impl fmt::Display for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementValue::Integer(v) => write!(f, "{}", v),
            ElementValue::Float(v) => write!(f, "{}", v),
            ElementValue::Bool(v) => write!(f, "{}", v),
            ElementValue::String(v) => write!(f, "\"{}\"", v),
            ElementValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            ElementValue::Matrix(m) => write!(f, "{:?}", m.0),
            ElementValue::Viewer(v) => write!(f, "viewer {}x{}", v.width, v.height),
        }
    }
}

impl ElementValue {
    /// Wire form of the value inside a document
    ///
    /// Byte blobs are base64 text, matrices are arrays of 16 numbers and the
    /// viewer is an object of its named fields. JSON has no NaN or infinity,
    /// so non-finite floats are written as the text `NaN`, `inf` or `-inf`,
    /// which the parser reads back.
    pub fn to_json(&self) -> Json {
        match self {
            ElementValue::Integer(v) => json!(v),
            ElementValue::Float(v) => float_json(*v),
            ElementValue::Bool(v) => json!(v),
            ElementValue::String(v) => json!(v),
            ElementValue::Bytes(v) => json!(BASE64.encode(v)),
            ElementValue::Matrix(m) => matrix_json(m),
            ElementValue::Viewer(v) => json!({
                "width": v.width,
                "height": v.height,
                "projection": matrix_json(&v.projection),
                "modelview": matrix_json(&v.modelview),
                "timestamp": float_json(v.timestamp),
                "sceneView": v.scene_view,
            }),
        }
    }

    /// Parse a wire value as type `ty`, reporting failures against `key`
    pub fn from_json(key: &str, ty: ElementType, json: &Json) -> Result<Self> {
        let value = match ty {
            ElementType::Integer => ElementValue::Integer(parse_integer(key, json)?),
            ElementType::Float => ElementValue::Float(parse_float(key, json)?),
            ElementType::Boolean => ElementValue::Bool(parse_bool(key, json)?),
            ElementType::String => match json {
                Json::String(s) => ElementValue::String(s.clone()),
                other => return Err(unexpected(key, "a string", other)),
            },
            ElementType::Bytes => match json {
                Json::String(s) => ElementValue::Bytes(
                    BASE64
                        .decode(s)
                        .map_err(|e| Error::malformed_update(key, format!("invalid base64: {}", e)))?,
                ),
                other => return Err(unexpected(key, "base64 text", other)),
            },
            ElementType::Matrix => ElementValue::Matrix(parse_matrix(key, json)?),
            ElementType::Viewer => ElementValue::Viewer(parse_viewer(key, json)?),
        };
        Ok(value)
    }
}

fn float_json(v: f64) -> Json {
    if v.is_finite() {
        json!(v)
    } else {
        Json::String(v.to_string())
    }
}

fn matrix_json(m: &Matrix) -> Json {
    m.0.iter()
        .map(|c| {
            if c.is_finite() {
                json!(c)
            } else {
                Json::String(c.to_string())
            }
        })
        .collect()
}

fn unexpected(key: &str, expected: &str, found: &Json) -> Error {
    Error::malformed_update(key, format!("expected {}, found {}", expected, found))
}

fn parse_integer(key: &str, json: &Json) -> Result<i64> {
    match json {
        Json::Number(n) => n.as_i64().ok_or_else(|| unexpected(key, "an integer", json)),
        Json::String(s) => s.trim().parse().map_err(|_| unexpected(key, "an integer", json)),
        other => Err(unexpected(key, "an integer", other)),
    }
}

fn parse_float(key: &str, json: &Json) -> Result<f64> {
    match json {
        Json::Number(n) => n.as_f64().ok_or_else(|| unexpected(key, "a number", json)),
        Json::String(s) => s.trim().parse().map_err(|_| unexpected(key, "a number", json)),
        other => Err(unexpected(key, "a number", other)),
    }
}

fn parse_bool(key: &str, json: &Json) -> Result<bool> {
    match json {
        Json::Bool(b) => Ok(*b),
        Json::String(s) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(unexpected(key, "a boolean", json)),
        },
        other => Err(unexpected(key, "a boolean", other)),
    }
}

/// Matrices arrive either as a JSON array or as space-separated text
fn parse_matrix(key: &str, json: &Json) -> Result<Matrix> {
    let components: Vec<f32> = match json {
        Json::Array(items) => items
            .iter()
            .map(|item| parse_float(key, item).map(|v| v as f32))
            .collect::<Result<_>>()?,
        Json::String(s) => s
            .split_whitespace()
            .map(|part| {
                part.parse::<f32>()
                    .map_err(|_| Error::malformed_update(key, format!("invalid matrix component '{}'", part)))
            })
            .collect::<Result<_>>()?,
        other => return Err(unexpected(key, "a matrix", other)),
    };
    if components.len() != MATRIX_LEN {
        return Err(Error::malformed_update(
            key,
            format!("matrix needs {} components, found {}", MATRIX_LEN, components.len()),
        ));
    }
    Matrix::from_slice(key, &components)
}

fn parse_viewer(key: &str, json: &Json) -> Result<Viewer> {
    let fields: &Map<String, Json> = json
        .as_object()
        .ok_or_else(|| unexpected(key, "a viewer object", json))?;
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| Error::malformed_update(key, format!("viewer is missing '{}'", name)))
    };
    Ok(Viewer {
        width: parse_integer(key, field("width")?)?,
        height: parse_integer(key, field("height")?)?,
        projection: parse_matrix(key, field("projection")?)?,
        modelview: parse_matrix(key, field("modelview")?)?,
        timestamp: parse_float(key, field("timestamp")?)?,
        scene_view: match field("sceneView")? {
            Json::String(s) => s.clone(),
            other => return Err(unexpected(key, "a string sceneView", other)),
        },
    })
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for ElementValue {
            fn from(v: $ty) -> Self {
                ElementValue::$variant(v.into())
            }
        }
    };
}

impl_from_value!(i64, Integer);
impl_from_value!(i32, Integer);
impl_from_value!(u32, Integer);
impl_from_value!(f64, Float);
impl_from_value!(f32, Float);
impl_from_value!(bool, Bool);
impl_from_value!(String, String);
impl_from_value!(&str, String);
impl_from_value!(Vec<u8>, Bytes);
impl_from_value!(Matrix, Matrix);
impl_from_value!([f32; MATRIX_LEN], Matrix);
impl_from_value!(Viewer, Viewer);

macro_rules! impl_try_from_value {
    ($ty:ty, $variant:ident) => {
        impl TryFrom<ElementValue> for $ty {
            type Error = ElementType;

            fn try_from(value: ElementValue) -> std::result::Result<Self, ElementType> {
                match value {
                    ElementValue::$variant(v) => Ok(v),
                    other => Err(other.element_type()),
                }
            }
        }
    };
}

impl_try_from_value!(i64, Integer);
impl_try_from_value!(f64, Float);
impl_try_from_value!(bool, Bool);
impl_try_from_value!(String, String);
impl_try_from_value!(Vec<u8>, Bytes);
impl_try_from_value!(Matrix, Matrix);
impl_try_from_value!(Viewer, Viewer);
