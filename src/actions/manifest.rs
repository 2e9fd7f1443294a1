//! Declarative action handlers loaded from JSON manifests.
//!
//! A manifest is a `MailData` document whose strings may contain
//! `{{param}}` placeholders, filled from the message params:
//!
//! ```json
//! { "to": "{{email}}", "subject": "Welcome {{username}}" }
//! ```
//!
//! When the manifest has no `templateData`, the message params are used.

use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;

use crate::broker::Message;
use crate::error::MailerError;
use crate::mail::MailData;

use super::ActionHandler;

/// Handler backed by a mail manifest.
#[derive(Debug, Clone)]
pub struct ManifestAction {
    manifest: serde_json::Map<String, serde_json::Value>,
}

impl ManifestAction {
    /// Build from an already parsed manifest. The manifest must be an object.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Object(manifest) => Ok(Self { manifest }),
            other => Err(format!("manifest must be a JSON object, got {}", kind(&other))),
        }
    }

    /// Read and parse a manifest file.
    pub async fn from_file(path: &Path) -> Result<Self, MailerError> {
        let load_error = |reason: String| MailerError::ActionLoad {
            path: path.to_path_buf(),
            reason,
        };

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| load_error(e.to_string()))?;

        Self::from_value(value).map_err(load_error)
    }
}

#[async_trait]
impl ActionHandler for ManifestAction {
    async fn run(&self, message: &Message) -> anyhow::Result<MailData> {
        let params = match &message.params {
            serde_json::Value::Object(params) => params.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => bail!("params must be an object, got {}", kind(other)),
        };

        let mut rendered = serde_json::Map::new();
        for (key, value) in &self.manifest {
            rendered.insert(key.clone(), substitute_value(value, &params));
        }
        if !rendered.contains_key("templateData") {
            rendered.insert(
                "templateData".to_string(),
                serde_json::Value::Object(params),
            );
        }

        serde_json::from_value(serde_json::Value::Object(rendered))
            .context("manifest does not describe a valid mail")
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn substitute_value(
    value: &serde_json::Value,
    variables: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(substitute_string(s, variables)),
        serde_json::Value::Array(arr) => serde_json::Value::Array(
            arr.iter().map(|v| substitute_value(v, variables)).collect(),
        ),
        serde_json::Value::Object(obj) => serde_json::Value::Object(
            obj.iter()
                .map(|(key, val)| (key.clone(), substitute_value(val, variables)))
                .collect(),
        ),
        // Numbers, booleans, null are passed through as-is
        _ => value.clone(),
    }
}

/// Fill `{{key}}` placeholders in one pass over `template`. Substituted
/// values are never scanned again; unknown keys are left verbatim.
fn substitute_string(
    template: &str,
    variables: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let key = &rest[start + 2..start + 2 + len];
        let end = start + 2 + len + 2;

        result.push_str(&rest[..start]);
        match variables.get(key) {
            Some(value) => result.push_str(&replacement(value)),
            None => result.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    result.push_str(rest);
    result
}

fn replacement(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        _ => value.to_string(),
    }
}
