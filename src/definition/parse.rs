//! Definition file parsing.
//!
//! Reads one YAML file into an [`AgentDefinition`], attaching discovery
//! metadata (tier, source path, modification time, content hash) and the
//! computed validation score. Parse failures carry the offending path and
//! a human-readable reason; they never abort a directory scan.

use super::scoring::validation_score;
use super::{AgentDefinition, RawDefinition};
use crate::error::{MusterError, Result};
use crate::hierarchy::Tier;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Valid agent names: lowercase slug starting with an alphanumeric.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid name regex"));

/// Derive the logical agent name from a definition filename.
///
/// Recognized conventions map to the same logical schema:
/// `qa.yaml`, `qa.yml`, `qa-agent.yaml`, and `qa_agent.yaml` all
/// yield `qa`. The `name:` field inside the file is authoritative;
/// this is the fallback when the field is absent.
pub fn logical_name_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem
        .strip_suffix("-agent")
        .or_else(|| stem.strip_suffix("_agent"))
        .unwrap_or(stem);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Parse a definition file into an [`AgentDefinition`].
///
/// # Errors
///
/// Returns [`MusterError::Parse`] when the file is unreadable, the YAML is
/// malformed, the required identity fields are missing, or the name is not
/// a valid slug.
pub fn parse_definition(path: &Path, tier: Tier) -> Result<AgentDefinition> {
    let parse_err = |reason: String| MusterError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| parse_err(format!("failed to read file: {}", e)))?;

    let raw: RawDefinition = serde_yaml::from_str(&content)
        .map_err(|e| parse_err(format!("invalid YAML: {}", e)))?;

    let name = if raw.name.is_empty() {
        logical_name_from_filename(path)
            .ok_or_else(|| parse_err("missing required field 'name'".to_string()))?
    } else {
        raw.name.clone()
    };

    if !NAME_RE.is_match(&name) {
        return Err(parse_err(format!(
            "invalid agent name '{}': expected a lowercase slug ([a-z0-9_-])",
            name
        )));
    }

    let kind = raw
        .kind
        .ok_or_else(|| parse_err("missing required field 'kind'".to_string()))?;

    let modified = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
    let score = validation_score(&raw);

    Ok(AgentDefinition {
        name,
        kind,
        hybrid_kinds: raw.hybrid_kinds,
        description: raw.description,
        specializations: raw.specializations,
        frameworks: raw.frameworks,
        domains: raw.domains,
        roles: raw.roles,
        capabilities: raw.capabilities,
        complexity: raw.complexity,
        command: raw.command,
        timeout_seconds: raw.timeout_seconds,
        environment: raw.environment,
        validation_score: score,
        tier,
        source_path: path.to_path_buf(),
        modified,
        content_hash,
        extra: raw.extra,
    })
}
