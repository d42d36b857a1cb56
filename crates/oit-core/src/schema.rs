//! Step Schema: contrato polimórfico de um passo de template
//!
//! A step is a closed sum type over six capture variants. Tags the engine does
//! not know (or known tags whose configuration does not decode) become an
//! inert [`StepKind::Unsupported`] placeholder instead of a parse failure.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Denormalized step type, copied into every `StepData` at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Text,
    Input,
    Image,
    Document,
    Checkbox,
    Signature,
    #[serde(other)]
    Unsupported,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Input => "INPUT",
            Self::Image => "IMAGE",
            Self::Document => "DOCUMENT",
            Self::Checkbox => "CHECKBOX",
            Self::Signature => "SIGNATURE",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    /// Whether captured data for this type is carried by files instead of a value
    pub fn carries_files(&self) -> bool {
        matches!(self, Self::Image | Self::Document)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PER-VARIANT CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputConfig {
    pub input_type: InputType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageConfig {
    pub allow_multiple: bool,
    #[serde(rename = "requireGPS", alias = "requireGps")]
    pub require_gps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentConfig {
    pub accepted_formats: Vec<String>,
    pub allow_multiple: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckboxConfig {
    pub requires_comment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
}

/// The closed set of step variants with their configuration
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Text,
    Input(InputConfig),
    Image(ImageConfig),
    Document(DocumentConfig),
    Checkbox(CheckboxConfig),
    Signature(SignatureConfig),
    /// Placeholder for a tag this engine cannot execute
    Unsupported { type_tag: String, reason: String },
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Text => StepType::Text,
            Self::Input(_) => StepType::Input,
            Self::Image(_) => StepType::Image,
            Self::Document(_) => StepType::Document,
            Self::Checkbox(_) => StepType::Checkbox,
            Self::Signature(_) => StepType::Signature,
            Self::Unsupported { .. } => StepType::Unsupported,
        }
    }

    /// Wire tag, preserving the original tag of unsupported steps
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Unsupported { type_tag, .. } => type_tag,
            other => other.step_type().as_str(),
        }
    }

    /// Decodes a tag and its configuration. Never fails.
    fn decode(type_tag: &str, config: Value) -> Self {
        let config = match config {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let decoded = match type_tag.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "INPUT" => serde_json::from_value(config).map(Self::Input),
            "IMAGE" => serde_json::from_value(config).map(Self::Image),
            "DOCUMENT" => serde_json::from_value(config).map(Self::Document),
            "CHECKBOX" => serde_json::from_value(config).map(Self::Checkbox),
            "SIGNATURE" => serde_json::from_value(config).map(Self::Signature),
            _ => {
                tracing::warn!(type_tag, "unsupported step type, rendering placeholder");
                return Self::Unsupported {
                    type_tag: type_tag.to_string(),
                    reason: "unknown step type".to_string(),
                };
            }
        };

        decoded.unwrap_or_else(|err| {
            tracing::warn!(type_tag, error = %err, "step configuration does not decode, rendering placeholder");
            Self::Unsupported {
                type_tag: type_tag.to_string(),
                reason: format!("invalid configuration: {}", err),
            }
        })
    }

    fn encode_config(&self) -> Value {
        let encoded = match self {
            Self::Text | Self::Unsupported { .. } => return Value::Null,
            Self::Input(c) => serde_json::to_value(c),
            Self::Image(c) => serde_json::to_value(c),
            Self::Document(c) => serde_json::to_value(c),
            Self::Checkbox(c) => serde_json::to_value(c),
            Self::Signature(c) => serde_json::to_value(c),
        };
        encoded.unwrap_or(Value::Null)
    }
}

// ============================================================================
// TEMPLATE STEP
// ============================================================================

/// One authored step of a template, read-only at execution time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStep", into = "RawStep")]
pub struct TemplateStep {
    pub id: String,
    pub order: i64,
    pub title: String,
    pub description: String,
    pub required: bool,
    /// Step must be accepted by the external judge before the cursor advances
    pub requires_validation: bool,
    pub kind: StepKind,
}

impl TemplateStep {
    pub fn new(id: impl Into<String>, order: i64, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            order,
            title: String::new(),
            description: String::new(),
            required: false,
            requires_validation: false,
            kind,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validated(mut self) -> Self {
        self.requires_validation = true;
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, StepKind::Unsupported { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(deserialize_with = "id_from_any")]
    id: String,
    #[serde(default)]
    order: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    requires_validation: bool,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    config: Value,
}

impl From<RawStep> for TemplateStep {
    fn from(raw: RawStep) -> Self {
        let kind = StepKind::decode(&raw.type_tag, raw.config);
        Self {
            id: raw.id,
            order: raw.order,
            title: raw.title,
            description: raw.description,
            required: raw.required,
            requires_validation: raw.requires_validation,
            kind,
        }
    }
}

impl From<TemplateStep> for RawStep {
    fn from(step: TemplateStep) -> Self {
        Self {
            config: step.kind.encode_config(),
            type_tag: step.kind.type_tag().to_string(),
            id: step.id,
            order: step.order,
            title: step.title,
            description: step.description,
            required: step.required,
            requires_validation: step.requires_validation,
        }
    }
}

/// Accepts string or numeric identifiers
pub(crate) fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyId {
        Text(String),
        Number(i64),
    }

    Ok(match AnyId::deserialize(deserializer)? {
        AnyId::Text(s) => s,
        AnyId::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_input_step() {
        let step: TemplateStep = serde_json::from_value(json!({
            "id": "temp",
            "order": 2,
            "title": "Temperatura da água",
            "required": true,
            "type": "INPUT",
            "config": { "inputType": "number", "unit": "°C", "min": -5.0, "max": 60.0 }
        }))
        .unwrap();

        assert_eq!(step.step_type(), StepType::Input);
        assert!(step.required);
        match step.kind {
            StepKind::Input(cfg) => {
                assert_eq!(cfg.input_type, InputType::Number);
                assert_eq!(cfg.unit.as_deref(), Some("°C"));
                assert_eq!(cfg.max, Some(60.0));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_image_require_gps_wire_name() {
        let step: TemplateStep = serde_json::from_value(json!({
            "id": 7,
            "order": 1,
            "type": "image",
            "config": { "requireGPS": true }
        }))
        .unwrap();

        assert_eq!(step.id, "7");
        assert_eq!(step.kind, StepKind::Image(ImageConfig { allow_multiple: false, require_gps: true }));
    }

    #[test]
    fn test_unknown_type_becomes_placeholder() {
        let step: TemplateStep = serde_json::from_value(json!({
            "id": "x",
            "order": 1,
            "type": "VIDEO"
        }))
        .unwrap();

        assert!(step.is_placeholder());
        assert_eq!(step.step_type(), StepType::Unsupported);
        assert_eq!(step.kind.type_tag(), "VIDEO");
    }

    #[test]
    fn test_malformed_config_becomes_placeholder() {
        let step: TemplateStep = serde_json::from_value(json!({
            "id": "doc",
            "order": 1,
            "type": "DOCUMENT",
            "config": { "acceptedFormats": "pdf" }
        }))
        .unwrap();

        assert!(step.is_placeholder());
    }

    #[test]
    fn test_serialize_keeps_wire_shape() {
        let step = TemplateStep::new("sig", 4, StepKind::Signature(SignatureConfig {
            signer_name: Some("Responsável técnico".to_string()),
        }))
        .required();

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "SIGNATURE");
        assert_eq!(value["config"]["signerName"], "Responsável técnico");

        let back: TemplateStep = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_unknown_step_type_in_data_deserializes() {
        let t: StepType = serde_json::from_value(json!("HOLOGRAM")).unwrap();
        assert_eq!(t, StepType::Unsupported);
    }
}
