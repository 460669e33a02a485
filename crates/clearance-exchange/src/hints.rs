//! Schema inference for presentation requests.
//!
//! Requesters name the credential they want in different places depending on
//! the agent that built the request. [`SchemaHints`] holds the deployment's
//! known schema ids and aliases; [`SchemaHints::resolve`] walks the signal
//! locations in a fixed order and never guesses past them.

use std::collections::HashMap;
use std::fmt;

use clearance_core::TrustPolicy;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Fields that name a schema directly.
const EXPLICIT_FIELDS: &[&str] = &["schemaId", "schema_id", "credentialType"];

/// Known schemas and the aliases that point at them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaHints {
    /// Schema ids this deployment can present.
    pub schemas: Vec<String>,
    /// Alias to schema id. Keys are credential type names, goal codes or
    /// proof-type GUIDs, compared case-insensitively.
    pub aliases: HashMap<String, String>,
}

/// Where in a request the schema was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSignal {
    Explicit,
    Goal,
    Comment,
    GoalCode,
    ProofType,
}

impl fmt::Display for SchemaSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaSignal::Explicit => "explicit",
            SchemaSignal::Goal => "goal",
            SchemaSignal::Comment => "comment",
            SchemaSignal::GoalCode => "goal_code",
            SchemaSignal::ProofType => "proof_types",
        };
        f.write_str(name)
    }
}

impl SchemaHints {
    /// Hints covering the policy's clearance schemas, with the conventional
    /// credential type name aliased to the first one.
    pub fn from_policy(policy: &TrustPolicy) -> Self {
        let mut hints = Self {
            schemas: policy.clearance_schemas.clone(),
            aliases: HashMap::new(),
        };
        if let Some(first) = policy.clearance_schemas.first() {
            hints.add_alias("SecurityClearanceCredential", first);
        }
        hints
    }

    /// Load from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut hints: Self = serde_json::from_str(json)?;
        hints.aliases = hints
            .aliases
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Ok(hints)
    }

    pub fn add_alias(&mut self, alias: &str, schema_id: &str) {
        self.aliases
            .insert(alias.to_ascii_lowercase(), schema_id.to_string());
    }

    fn alias(&self, key: &str) -> Option<&str> {
        self.aliases
            .get(&key.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The schema a request body asks for, and where it was found.
    pub fn resolve(&self, body: &Value) -> Option<(String, SchemaSignal)> {
        for field in EXPLICIT_FIELDS {
            if let Some(named) = text(body, field).filter(|s| !s.is_empty()) {
                let schema = self.alias(named).unwrap_or(named);
                return Some((schema.to_string(), SchemaSignal::Explicit));
            }
        }

        if let Some(schema) = text(body, "goal").and_then(|t| self.match_text(t)) {
            return Some((schema, SchemaSignal::Goal));
        }
        if let Some(schema) = text(body, "comment").and_then(|t| self.match_text(t)) {
            return Some((schema, SchemaSignal::Comment));
        }
        if let Some(schema) = text(body, "goal_code").and_then(|c| self.alias(c)) {
            return Some((schema.to_string(), SchemaSignal::GoalCode));
        }
        if let Some(schema) = body.get("proof_types").and_then(|p| self.match_proof_types(p)) {
            return Some((schema, SchemaSignal::ProofType));
        }
        None
    }

    /// A known schema id mentioned in free text, else an alias that
    /// appears as a whole word.
    fn match_text(&self, text: &str) -> Option<String> {
        if let Some(schema) = self.schemas.iter().find(|s| text.contains(s.as_str())) {
            return Some(schema.clone());
        }
        text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .filter(|word| !word.is_empty())
            .find_map(|word| self.alias(word.trim_end_matches('.')))
            .map(str::to_string)
    }

    /// The first GUID in a `proof_types` array that maps to a schema.
    fn match_proof_types(&self, proof_types: &Value) -> Option<String> {
        let entries = proof_types.as_array()?;
        entries
            .iter()
            .flat_map(|entry| match entry {
                Value::String(s) => vec![s.as_str()],
                Value::Object(obj) => obj.values().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            })
            .filter_map(|candidate| Uuid::parse_str(candidate.trim()).ok())
            .find_map(|guid| self.alias(&guid.hyphenated().to_string()))
            .map(str::to_string)
    }
}

fn text<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).map(str::trim)
}
