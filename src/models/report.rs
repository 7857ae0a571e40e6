use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Farmer-facing report as requested from the language model.
///
/// Models do not always follow the requested types, so every field is read
/// leniently: a single string where a list was asked for becomes a one-item
/// list, numbers become text, and `null` is empty. Keys outside the schema
/// are kept in `extra` and serialized back alongside the known fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiseaseReport {
    #[serde(deserialize_with = "lenient_text")]
    pub disease: String,
    #[serde(deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(deserialize_with = "lenient_list")]
    pub symptoms: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub causes: Vec<String>,
    #[serde(deserialize_with = "lenient_treatment")]
    pub treatment: Treatment,
    #[serde(deserialize_with = "lenient_list")]
    pub prevention: Vec<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub note: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Treatment {
    #[serde(deserialize_with = "lenient_list")]
    pub organic: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub non_organic: Vec<String>,
    /// Advice the model gave without splitting it by treatment type.
    #[serde(deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub general: Vec<String>,
}

fn text_of(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(text_of)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn list_of(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(text_of)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        other => {
            let text = text_of(other);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Value::deserialize(deserializer).map(text_of)
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Value::deserialize(deserializer).map(list_of)
}

fn lenient_treatment<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Treatment, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Object(map) => {
            serde_json::from_value(Value::Object(map)).map_err(serde::de::Error::custom)
        }
        other => Ok(Treatment {
            general: list_of(other),
            ..Default::default()
        }),
    }
}

/// What the report stage hands back. `Raw` is a successful outcome: the model
/// answered, but not with parseable JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedReport {
    // Listed first: an untagged `DiseaseReport` accepts any object.
    Raw { raw: String },
    Structured(DiseaseReport),
}

impl GeneratedReport {
    pub fn is_raw(&self) -> bool {
        matches!(self, GeneratedReport::Raw { .. })
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
