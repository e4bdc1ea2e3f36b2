use serde::{Deserialize, Serialize};

/// Type tag carried by every [`Segment`](crate::domain::execution::Segment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    None,
    String,
    Number,
    Boolean,
    Object,
    File,
    #[serde(rename = "array[string]")]
    ArrayString,
    #[serde(rename = "array[number]")]
    ArrayNumber,
    #[serde(rename = "array[boolean]")]
    ArrayBoolean,
    #[serde(rename = "array[object]")]
    ArrayObject,
    #[serde(rename = "array[file]")]
    ArrayFile,
    #[serde(rename = "array[any]")]
    ArrayAny,
}

impl SegmentType {
    pub fn from_dsl_type(t: &str) -> Option<Self> {
        match t.trim().to_lowercase().as_str() {
            "none" => Some(SegmentType::None),
            "string" | "paragraph" | "select" | "text-input" => Some(SegmentType::String),
            "number" | "integer" | "float" => Some(SegmentType::Number),
            "boolean" => Some(SegmentType::Boolean),
            "object" => Some(SegmentType::Object),
            "file" => Some(SegmentType::File),
            "array[string]" => Some(SegmentType::ArrayString),
            "array[number]" => Some(SegmentType::ArrayNumber),
            "array[boolean]" => Some(SegmentType::ArrayBoolean),
            "array[object]" => Some(SegmentType::ArrayObject),
            "array[file]" => Some(SegmentType::ArrayFile),
            "array[any]" | "array" => Some(SegmentType::ArrayAny),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            SegmentType::ArrayString
                | SegmentType::ArrayNumber
                | SegmentType::ArrayBoolean
                | SegmentType::ArrayObject
                | SegmentType::ArrayFile
                | SegmentType::ArrayAny
        )
    }
}
