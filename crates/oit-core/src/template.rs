//! Template parsing, ordering and fingerprinting

use crate::error::OitError;
use crate::schema::TemplateStep;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Template as delivered by the template source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub steps: StepsPayload,
    #[serde(default)]
    pub requires_validation: bool,
}

/// Steps arrive JSON-encoded inside a string; inline arrays are accepted too
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepsPayload {
    Encoded(String),
    Inline(Vec<TemplateStep>),
}

impl StepsPayload {
    fn into_steps(self) -> Result<Vec<TemplateStep>, OitError> {
        match self {
            Self::Inline(steps) => Ok(steps),
            Self::Encoded(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Self::Encoded(raw) => serde_json::from_str(&raw)
                .map_err(|e| OitError::Template(format!("steps payload: {}", e))),
        }
    }
}

/// An ordered, validated template ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub name: String,
    steps: Vec<TemplateStep>,
    requires_validation: bool,
    fingerprint: String,
}

impl Template {
    /// Builds a template, sorting steps by `(order, id)`
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut steps: Vec<TemplateStep>,
    ) -> Result<Self, OitError> {
        let id = id.into();
        if steps.is_empty() {
            return Err(OitError::Template(format!("template {} has no steps", id)));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.id.as_str()) {
                return Err(OitError::Template(format!(
                    "duplicate step id '{}' in template {}",
                    step.id, id
                )));
            }
        }

        steps.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        for pair in steps.windows(2) {
            if pair[0].order == pair[1].order {
                tracing::warn!(
                    template_id = %id,
                    order = pair[0].order,
                    first = %pair[0].id,
                    second = %pair[1].id,
                    "steps share the same order, falling back to id order"
                );
            }
        }

        let fingerprint = fingerprint_steps(&steps);

        Ok(Self {
            id,
            name: name.into(),
            steps,
            requires_validation: false,
            fingerprint,
        })
    }

    pub fn from_document(id: impl Into<String>, doc: TemplateDocument) -> Result<Self, OitError> {
        let id = doc.id.clone().unwrap_or_else(|| id.into());
        let steps = doc.steps.into_steps()?;
        let mut template = Self::new(id, doc.name, steps)?;
        template.requires_validation = doc.requires_validation;
        Ok(template)
    }

    /// Parses a template document from JSON text
    pub fn parse(id: impl Into<String>, json: &str) -> Result<Self, OitError> {
        let doc: TemplateDocument = serde_json::from_str(json)
            .map_err(|e| OitError::Template(format!("document: {}", e)))?;
        Self::from_document(id, doc)
    }

    /// Marks every step as requiring external validation
    pub fn with_validation_required(mut self) -> Self {
        self.requires_validation = true;
        self
    }

    pub fn steps(&self) -> &[TemplateStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&TemplateStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Whether step `index` must pass the external judge
    pub fn requires_validation(&self, index: usize) -> bool {
        self.steps
            .get(index)
            .map(|s| !s.is_placeholder() && (self.requires_validation || s.requires_validation))
            .unwrap_or(false)
    }

    /// Digest of the ordered step ids and types
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint_steps(steps: &[TemplateStep]) -> String {
    let mut hasher = blake3::Hasher::new();
    for step in steps {
        hasher.update(step.id.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(step.kind.type_tag().as_bytes());
        hasher.update(&[0x1e]);
    }
    format!("blake3:{}", hasher.finalize())
}
