//! Versioned prompt registry.
//!
//! Prompt templates live in YAML documents embedded at build time, keyed by
//! name with optional named sections. Variables use `$var` / `${var}` syntax;
//! missing variables are preserved verbatim so a partially rendered template
//! is still inspectable.

use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors from the prompt registry.
#[derive(Debug, Error)]
pub enum PromptError {
    /// No prompt registered under that name.
    #[error("Prompt not found: {0}")]
    NotFound(String),

    /// The document has no `template` field.
    #[error("Prompt '{0}' has no template")]
    MissingTemplate(String),

    /// The requested section does not exist.
    #[error("Prompt '{name}' has no section '{section}'")]
    MissingSection { name: String, section: String },

    /// YAML parse failure.
    #[error("Prompt parse error in '{name}': {message}")]
    Parse { name: String, message: String },
}

/// Prompt document metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone)]
struct PromptDoc {
    metadata: PromptMetadata,
    template: Option<String>,
    sections: HashMap<String, String>,
}

/// Registry over the embedded prompt documents.
pub struct PromptRegistry {
    docs: HashMap<String, PromptDoc>,
}

const EMBEDDED: &[(&str, &str)] = &[
    (
        "intent_analyzer",
        include_str!("../prompts/intent_analyzer.yaml"),
    ),
    (
        "writer_guardrail",
        include_str!("../prompts/writer_guardrail.yaml"),
    ),
    ("writer_normal", include_str!("../prompts/writer_normal.yaml")),
    (
        "eval_intent_analysis",
        include_str!("../prompts/eval_intent_analysis.yaml"),
    ),
    ("rubric_eval", include_str!("../prompts/rubric_eval.yaml")),
    (
        "answer_summary",
        include_str!("../prompts/answer_summary.yaml"),
    ),
    ("holistic_flow", include_str!("../prompts/holistic_flow.yaml")),
    ("code_quality", include_str!("../prompts/code_quality.yaml")),
    (
        "memory_summary",
        include_str!("../prompts/memory_summary.yaml"),
    ),
];

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::embedded()
    }
}

impl PromptRegistry {
    /// Registry over the documents shipped with the crate.
    ///
    /// The embedded documents are part of the build, so a parse failure here
    /// is a build defect; it panics at startup rather than mid-session.
    pub fn embedded() -> Self {
        let mut docs = HashMap::new();
        for (name, raw) in EMBEDDED {
            let doc = parse_doc(name, raw)
                .unwrap_or_else(|e| panic!("embedded prompt '{name}' is invalid: {e}"));
            docs.insert(name.to_string(), doc);
        }
        Self { docs }
    }

    /// Render a prompt's main template with the given variables.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let doc = self
            .docs
            .get(name)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))?;
        let template = doc
            .template
            .as_deref()
            .ok_or_else(|| PromptError::MissingTemplate(name.to_string()))?;
        Ok(substitute(template, vars))
    }

    /// Render a named section of a prompt document.
    pub fn render_section(
        &self,
        name: &str,
        section: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, PromptError> {
        let doc = self
            .docs
            .get(name)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))?;
        let template = doc
            .sections
            .get(section)
            .ok_or_else(|| PromptError::MissingSection {
                name: name.to_string(),
                section: section.to_string(),
            })?;
        Ok(substitute(template, vars))
    }

    /// Metadata of a prompt document.
    pub fn metadata(&self, name: &str) -> Result<&PromptMetadata, PromptError> {
        self.docs
            .get(name)
            .map(|d| &d.metadata)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }

    /// Registered prompt names.
    pub fn names(&self) -> Vec<&str> {
        self.docs.keys().map(String::as_str).collect()
    }
}

fn parse_doc(name: &str, raw: &str) -> Result<PromptDoc, PromptError> {
    let value: YamlValue = serde_yaml::from_str(raw).map_err(|e| PromptError::Parse {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    let metadata: PromptMetadata =
        serde_yaml::from_value(value.clone()).map_err(|e| PromptError::Parse {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    let mut template = None;
    let mut sections = HashMap::new();
    if let YamlValue::Mapping(mapping) = value {
        for (key, entry) in mapping {
            let (Some(key), Some(text)) = (key.as_str(), entry.as_str()) else {
                continue;
            };
            match key {
                "template" => template = Some(text.to_string()),
                "version" | "name" | "description" => {}
                other => {
                    sections.insert(other.to_string(), text.to_string());
                }
            }
        }
    }

    Ok(PromptDoc {
        metadata,
        template,
        sections,
    })
}

/// Substitute `$var` / `${var}` occurrences; unknown variables stay verbatim.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = VAR_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable regex is valid")
    });
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let var = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        match vars.iter().find(|(name, _)| *name == var) {
            Some((_, value)) => value.to_string(),
            None => caps
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    })
    .into_owned()
}
