//! Typed data model shared by the store, the mapping engine and the jobs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Scalar metadata stored next to vectors and used for filtering.
pub type Payload = Map<String, Value>;

pub const DEFAULT_LANGUAGE: &str = "en";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// A typed field value.
///
/// The serde form is the wire representation: an object tagged by `type`,
/// with image bytes carried as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValue {
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    Text {
        text: String,
        #[serde(default = "default_language")]
        language: String,
    },
    Image {
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
        ext: String,
    },
    Geo {
        lat: f64,
        lon: f64,
    },
    Meta {
        meta: Map<String, Value>,
    },
}

/// Projection of a field onto a filterable payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => Value::from(i),
            Scalar::Float(f) => Value::from(f),
            Scalar::Text(t) => Value::String(t),
        }
    }
}

impl FieldValue {
    pub fn text(text: impl Into<String>) -> Self {
        FieldValue::Text { text: text.into(), language: default_language() }
    }

    pub fn text_with_language(text: impl Into<String>, language: impl Into<String>) -> Self {
        FieldValue::Text { text: text.into(), language: language.into() }
    }

    pub fn image(content: Vec<u8>, ext: impl Into<String>) -> Self {
        FieldValue::Image { content, ext: ext.into() }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool { .. } => "bool",
            FieldValue::Int { .. } => "int",
            FieldValue::Float { .. } => "float",
            FieldValue::Text { .. } => "text",
            FieldValue::Image { .. } => "image",
            FieldValue::Geo { .. } => "geo",
            FieldValue::Meta { .. } => "meta",
        }
    }

    /// Bool/Int/Float/Text project to a scalar; Image, Geo and Meta do not.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            FieldValue::Bool { value } => Some(Scalar::Bool(*value)),
            FieldValue::Int { value } => Some(Scalar::Int(*value)),
            FieldValue::Float { value } => Some(Scalar::Float(*value)),
            FieldValue::Text { text, .. } => Some(Scalar::Text(text.clone())),
            FieldValue::Image { .. } | FieldValue::Geo { .. } | FieldValue::Meta { .. } => None,
        }
    }

    /// Convert a JSON scalar (as found in meta maps) into a field value.
    pub fn from_json_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FieldValue::Bool { value: *b }),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int { value: i }),
                None => n.as_f64().map(|f| FieldValue::Float { value: f }),
            },
            Value::String(s) => Some(FieldValue::text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool { value } => write!(f, "{value}"),
            FieldValue::Int { value } => write!(f, "{value}"),
            FieldValue::Float { value } => write!(f, "{value}"),
            FieldValue::Text { text, .. } => f.write_str(text),
            FieldValue::Image { content, ext } => write!(f, "<image {} bytes .{ext}>", content.len()),
            FieldValue::Geo { lat, lon } => write!(f, "{lat}:{lon}"),
            FieldValue::Meta { meta } => write!(f, "{}", Value::Object(meta.clone())),
        }
    }
}

/// A named, typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataField {
    pub name: String,
    pub value: FieldValue,
}

impl DataField {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self { name: name.into(), value }
    }
}

/// One indexable unit: an id plus uniquely named fields in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataPoint")]
pub struct DataPoint {
    pub id: String,
    fields: Vec<DataField>,
}

#[derive(Deserialize)]
struct RawDataPoint {
    id: String,
    #[serde(default)]
    fields: Vec<DataField>,
}

impl TryFrom<RawDataPoint> for DataPoint {
    type Error = Error;

    fn try_from(raw: RawDataPoint) -> Result<Self> {
        DataPoint::from_fields(raw.id, raw.fields)
    }
}

impl DataPoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: Vec::new() }
    }

    pub fn with_generated_id() -> Self {
        Self::new(generate_id())
    }

    pub fn from_fields(id: impl Into<String>, fields: Vec<DataField>) -> Result<Self> {
        let mut point = Self::new(id);
        for field in fields {
            point.push(field.name, field.value)?;
        }
        Ok(point)
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) -> Result<()> {
        let name = name.into();
        if self.fields.iter().any(|f| f.name == name) {
            return Err(Error::DuplicateField(name));
        }
        self.fields.push(DataField { name, value });
        Ok(())
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Result<Self> {
        self.push(name, value)?;
        Ok(self)
    }

    pub fn fields(&self) -> &[DataField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<DataField> {
        self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flatten into `(name, value)` pairs.
    ///
    /// Meta fields expand recursively into `name/key` sub-fields; arrays of
    /// scalars yield one pair per element under the same name, nulls are
    /// dropped. Every other field passes through unchanged.
    pub fn flatten(&self) -> Vec<(String, FieldValue)> {
        flatten_fields(&self.fields)
    }

    /// Deterministic id derived from the field contents.
    pub fn content_id(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.fields)?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        Ok(hash[..32].to_string())
    }
}

/// `DataPoint::flatten` over a bare field list (e.g. search inputs).
pub fn flatten_fields(fields: &[DataField]) -> Vec<(String, FieldValue)> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        match &field.value {
            FieldValue::Meta { meta } => flatten_meta(&field.name, meta, &mut out),
            other => out.push((field.name.clone(), other.clone())),
        }
    }
    out
}

fn flatten_meta(prefix: &str, meta: &Map<String, Value>, out: &mut Vec<(String, FieldValue)>) {
    for (key, value) in meta {
        let name = format!("{prefix}/{key}");
        match value {
            Value::Object(inner) => flatten_meta(&name, inner, out),
            Value::Array(items) => {
                for item in items {
                    if let Some(v) = FieldValue::from_json_scalar(item) {
                        out.push((name.clone(), v));
                    }
                }
            }
            other => {
                if let Some(v) = FieldValue::from_json_scalar(other) {
                    out.push((name, v));
                }
            }
        }
    }
}

/// Fresh random id (32 lowercase hex chars).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Field name carrying a language tag, e.g. `title/_en`.
pub fn language_field_name(path: &str, language: &str) -> String {
    format!("{path}/_{language}")
}

/// Split `name/_xx` (two ASCII letters) into `("name", Some("xx"))`.
pub fn split_language_suffix(name: &str) -> (&str, Option<&str>) {
    if let Some((base, tag)) = name.rsplit_once("/_") {
        if !base.is_empty() && tag.len() == 2 && tag.chars().all(|c| c.is_ascii_alphabetic()) {
            return (base, Some(tag));
        }
    }
    (name, None)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_field_names_are_rejected() {
        let mut p = DataPoint::new("p1");
        p.push("image", FieldValue::image(vec![1, 2], "jpg")).unwrap();
        let err = p.push("image", FieldValue::text("x")).unwrap_err();
        assert!(matches!(err, Error::DuplicateField(name) if name == "image"));
    }

    #[test]
    fn deserializing_duplicate_fields_fails() {
        let raw = json!({
            "id": "abcd",
            "fields": [
                {"name": "a", "value": {"type": "int", "value": 1}},
                {"name": "a", "value": {"type": "int", "value": 2}}
            ]
        });
        assert!(serde_json::from_value::<DataPoint>(raw).is_err());
    }

    #[test]
    fn meta_flattens_into_named_scalars() {
        let meta = json!({"title": "Arethusa", "medium": ["oil paint", "canvas"], "origin": {"name": "wikidata"}, "gone": null});
        let p = DataPoint::new("p")
            .with_field("meta", FieldValue::Meta { meta: meta.as_object().unwrap().clone() })
            .unwrap()
            .with_field("year", FieldValue::Int { value: 1887 })
            .unwrap();
        let flat = p.flatten();
        let names: Vec<&str> = flat.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"meta/title"));
        assert!(names.contains(&"meta/origin/name"));
        assert_eq!(names.iter().filter(|n| **n == "meta/medium").count(), 2);
        assert!(!names.contains(&"meta/gone"));
        assert!(names.contains(&"year"));
    }

    #[test]
    fn scalar_projection_per_kind() {
        assert_eq!(FieldValue::Int { value: 3 }.to_scalar(), Some(Scalar::Int(3)));
        assert_eq!(FieldValue::text("x").to_scalar(), Some(Scalar::Text("x".into())));
        assert_eq!(FieldValue::Geo { lat: 1.0, lon: 2.0 }.to_scalar(), None);
        assert_eq!(FieldValue::image(vec![], "png").to_scalar(), None);
        assert_eq!(FieldValue::Geo { lat: 1.5, lon: 2.0 }.to_string(), "1.5:2");
    }

    #[test]
    fn language_suffix() {
        assert_eq!(split_language_suffix("title/_en"), ("title", Some("en")));
        assert_eq!(split_language_suffix("meta/title/_de"), ("meta/title", Some("de")));
        assert_eq!(split_language_suffix("title/_eng"), ("title/_eng", None));
        assert_eq!(split_language_suffix("title"), ("title", None));
        assert_eq!(split_language_suffix("/_en"), ("/_en", None));
        assert_eq!(language_field_name("title", "fr"), "title/_fr");
    }

    #[test]
    fn image_wire_form_is_base64() {
        let v = FieldValue::image(vec![0xff, 0x00, 0x10], "jpg");
        let js = serde_json::to_value(&v).unwrap();
        assert_eq!(js["type"], "image");
        assert_eq!(js["content"], "/wAQ");
        let back: FieldValue = serde_json::from_value(js).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn content_id_is_stable() {
        let a = DataPoint::new("x").with_field("t", FieldValue::text("hello")).unwrap();
        let b = DataPoint::new("y").with_field("t", FieldValue::text("hello")).unwrap();
        assert_eq!(a.content_id().unwrap(), b.content_id().unwrap());
        assert_eq!(a.content_id().unwrap().len(), 32);
    }
}
