//! Agent descriptors and the static registry file.
//!
//! A descriptor is the identity and capability metadata of one agent. The
//! runtime never mutates a descriptor after registration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-agent overrides of the global retry/timeout policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPolicy {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
}

impl AgentPolicy {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Identity and capability metadata for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent name.
    pub name: String,
    /// Free-text role, e.g. "Senior Accountant".
    #[serde(default)]
    pub role: String,
    /// Free-text category, e.g. "finance".
    #[serde(default)]
    pub category: String,
    /// Capability tags used for task matching.
    #[serde(default, alias = "tags")]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub policy: AgentPolicy,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: String::new(),
            category: String::new(),
            capabilities: Vec::new(),
            policy: AgentPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: AgentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Capability tags lowercased, trimmed and de-duplicated, in declaration order.
    pub fn normalized_capabilities(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.capabilities
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect()
    }
}

/// One entry of a registry file: a descriptor plus how to run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    /// Command (argv) run once per task. Absent means the built-in echo agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    Wrapped { agents: Vec<RegistryEntry> },
    Bare(Vec<RegistryEntry>),
}

/// Load the static agent registry from a JSON file.
///
/// Accepts either `{"agents": [...]}` or a bare array. Names must be
/// non-empty and unique; commands, when present, must be non-empty.
pub fn load_registry_file(path: &Path) -> Result<Vec<RegistryEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Registry {
        path: path.to_path_buf(),
        message: format!("failed to read: {e}"),
    })?;
    let parsed: RegistryFile = serde_json::from_str(&content).map_err(|e| Error::Registry {
        path: path.to_path_buf(),
        message: format!("failed to parse: {e}"),
    })?;
    let entries = match parsed {
        RegistryFile::Wrapped { agents } | RegistryFile::Bare(agents) => agents,
    };
    validate_entries(&entries).map_err(|message| Error::Registry {
        path: path.to_path_buf(),
        message,
    })?;
    Ok(entries)
}

fn validate_entries(entries: &[RegistryEntry]) -> std::result::Result<(), String> {
    let mut names = HashSet::new();
    for entry in entries {
        let name = entry.descriptor.name.trim();
        if name.is_empty() {
            return Err("agent name must not be empty".to_string());
        }
        if !names.insert(name) {
            return Err(format!("duplicate agent name '{name}'"));
        }
        if entry.command.as_ref().is_some_and(Vec::is_empty) {
            return Err(format!("agent '{name}' has an empty command"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("agents.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_wrapped_registry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"agents": [
                {"name": "auditor", "role": "Auditor", "category": "finance",
                 "capabilities": ["finance", "audit"], "policy": {"max_retries": 1}},
                {"name": "counsel", "tags": ["legal"], "command": ["sh", "-c", "cat"]}
            ]}"#,
        );
        let entries = load_registry_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].descriptor.policy.max_retries, Some(1));
        assert_eq!(entries[1].descriptor.capabilities, vec!["legal"]);
        assert_eq!(entries[1].command.as_ref().unwrap()[0], "sh");
    }

    #[test]
    fn loads_bare_array() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(&dir, r#"[{"name": "solo"}]"#);
        let entries = load_registry_file(&path).unwrap();
        assert_eq!(entries[0].descriptor.name, "solo");
        assert!(entries[0].command.is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(&dir, r#"[{"name": "a"}, {"name": "a"}]"#);
        let err = load_registry_file(&path).unwrap_err().to_string();
        assert!(err.contains("duplicate agent name 'a'"), "{err}");
    }

    #[test]
    fn rejects_empty_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(&dir, r#"[{"name": "a", "command": []}]"#);
        assert!(load_registry_file(&path).is_err());
    }

    #[test]
    fn normalized_capabilities_dedupes_and_lowercases() {
        let d = AgentDescriptor::new("x").with_capabilities(["Finance", " finance ", "", "Audit"]);
        assert_eq!(d.normalized_capabilities(), vec!["finance", "audit"]);
    }
}
