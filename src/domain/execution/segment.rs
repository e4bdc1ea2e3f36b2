use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::model::SegmentType;

/// Marker key/value identifying a serialized file object.
pub const FILE_MODEL_IDENTITY: &str = "__file__";
const MODEL_IDENTITY_KEY: &str = "model_identity";

// ================================
// Files
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Document,
    Audio,
    Video,
    #[default]
    Custom,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Audio => "audio",
            FileType::Video => "video",
            FileType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileTransferMethod {
    #[default]
    LocalFile,
    RemoteUrl,
    ToolFile,
}

impl FileTransferMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileTransferMethod::LocalFile => "local_file",
            FileTransferMethod::RemoteUrl => "remote_url",
            FileTransferMethod::ToolFile => "tool_file",
        }
    }
}

/// File attributes addressable by sub-variable conditions and selector paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAttribute {
    Type,
    Size,
    Name,
    MimeType,
    TransferMethod,
    Url,
    Extension,
    RelatedId,
}

impl FileAttribute {
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileSegment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub transfer_method: FileTransferMethod,
    #[serde(default, alias = "remote_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileSegment {
    pub fn attribute(&self, attr: FileAttribute) -> Segment {
        let opt = |v: &Option<String>| v.clone().map(Segment::String).unwrap_or_default();
        match attr {
            FileAttribute::Type => Segment::String(self.file_type.as_str().to_string()),
            FileAttribute::Size => self.size.map(Segment::Integer).unwrap_or_default(),
            FileAttribute::Name => opt(&self.filename),
            FileAttribute::MimeType => opt(&self.mime_type),
            FileAttribute::TransferMethod => {
                Segment::String(self.transfer_method.as_str().to_string())
            }
            FileAttribute::Url => opt(&self.url),
            FileAttribute::Extension => opt(&self.extension),
            FileAttribute::RelatedId => opt(&self.related_id),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                MODEL_IDENTITY_KEY.to_string(),
                Value::String(FILE_MODEL_IDENTITY.to_string()),
            );
        }
        value
    }

    /// Only objects carrying the file marker are recognized.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.get(MODEL_IDENTITY_KEY).and_then(Value::as_str) != Some(FILE_MODEL_IDENTITY) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

// ================================
// Segment – the typed value stored in the variable pool
// ================================

#[derive(Debug, Clone, Default)]
pub enum Segment {
    #[default]
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(HashMap<String, Segment>),
    File(Box<FileSegment>),
    ArrayString(Vec<String>),
    Array(Vec<Segment>),
    ArrayFile(Vec<FileSegment>),
}

impl Segment {
    pub fn segment_type(&self) -> SegmentType {
        match self {
            Segment::None => SegmentType::None,
            Segment::String(_) => SegmentType::String,
            Segment::Integer(_) | Segment::Float(_) => SegmentType::Number,
            Segment::Boolean(_) => SegmentType::Boolean,
            Segment::Object(_) => SegmentType::Object,
            Segment::File(_) => SegmentType::File,
            Segment::ArrayString(_) => SegmentType::ArrayString,
            Segment::ArrayFile(_) => SegmentType::ArrayFile,
            Segment::Array(items) => {
                if items.is_empty() {
                    SegmentType::ArrayAny
                } else if items
                    .iter()
                    .all(|s| matches!(s, Segment::Integer(_) | Segment::Float(_)))
                {
                    SegmentType::ArrayNumber
                } else if items.iter().all(|s| matches!(s, Segment::Boolean(_))) {
                    SegmentType::ArrayBoolean
                } else if items.iter().all(|s| matches!(s, Segment::Object(_))) {
                    SegmentType::ArrayObject
                } else {
                    SegmentType::ArrayAny
                }
            }
        }
    }

    /// Convert to a plain JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => Value::Number((*i).into()),
            Segment::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => {
                let obj = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect::<serde_json::Map<_, _>>();
                Value::Object(obj)
            }
            Segment::File(file) => file.to_value(),
            Segment::ArrayString(items) => {
                Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
            }
            Segment::Array(items) => Value::Array(items.iter().map(|s| s.to_value()).collect()),
            Segment::ArrayFile(files) => Value::Array(files.iter().map(|f| f.to_value()).collect()),
        }
    }

    /// Build a segment from a JSON value, inferring the narrowest array type.
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(items) => {
                if items.is_empty() {
                    return Segment::Array(Vec::new());
                }
                if items.iter().all(Value::is_string) {
                    return Segment::ArrayString(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    );
                }
                let files: Vec<FileSegment> =
                    items.iter().filter_map(FileSegment::from_value).collect();
                if files.len() == items.len() {
                    return Segment::ArrayFile(files);
                }
                Segment::Array(items.iter().map(Segment::from_value).collect())
            }
            Value::Object(map) => {
                if let Some(file) = FileSegment::from_value(v) {
                    return Segment::File(Box::new(file));
                }
                Segment::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn is_array(&self) -> bool {
        self.segment_type().is_array()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Elements of an array segment as individual segments.
    pub fn array_items(&self) -> Option<Vec<Segment>> {
        match self {
            Segment::ArrayString(items) => {
                Some(items.iter().cloned().map(Segment::String).collect())
            }
            Segment::Array(items) => Some(items.clone()),
            Segment::ArrayFile(files) => Some(
                files
                    .iter()
                    .cloned()
                    .map(|f| Segment::File(Box::new(f)))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Step into an object key or a file attribute.
    pub fn attribute(&self, name: &str) -> Option<Segment> {
        match self {
            Segment::Object(map) => map.get(name).cloned(),
            Segment::File(file) => FileAttribute::parse(name).map(|attr| file.attribute(attr)),
            _ => None,
        }
    }

    /// Textual form used by template rendering.
    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            Segment::File(file) => file
                .url
                .clone()
                .or_else(|| file.filename.clone())
                .unwrap_or_default(),
            other => serde_json::to_string(&other.to_value()).unwrap_or_default(),
        }
    }

    /// Falsy values: none, zero, false and empty strings, arrays or objects.
    pub fn is_empty(&self) -> bool {
        match self {
            Segment::None => true,
            Segment::String(s) => s.is_empty(),
            Segment::Integer(i) => *i == 0,
            Segment::Float(f) => *f == 0.0,
            Segment::Boolean(b) => !*b,
            Segment::Object(map) => map.is_empty(),
            Segment::File(_) => false,
            Segment::ArrayString(items) => items.is_empty(),
            Segment::Array(items) => items.is_empty(),
            Segment::ArrayFile(files) => files.is_empty(),
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::Integer(a), Segment::Float(b)) | (Segment::Float(b), Segment::Integer(a)) => {
                (*a as f64) == *b
            }
            _ => self.to_value() == other.to_value(),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl Serialize for Segment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Segment::from_value(&value))
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Segment::String(value.to_string())
    }
}

impl From<String> for Segment {
    fn from(value: String) -> Self {
        Segment::String(value)
    }
}

impl From<i64> for Segment {
    fn from(value: i64) -> Self {
        Segment::Integer(value)
    }
}

impl From<f64> for Segment {
    fn from(value: f64) -> Self {
        Segment::Float(value)
    }
}

impl From<bool> for Segment {
    fn from(value: bool) -> Self {
        Segment::Boolean(value)
    }
}

impl From<Value> for Segment {
    fn from(value: Value) -> Self {
        Segment::from_value(&value)
    }
}
