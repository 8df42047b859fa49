//! Structured (YAML/JSON) form of a rubric.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::Rubric;
use crate::rules::{builtin, ParamBag, RuleConfigurationError, RuleRegistry};

/// Errors that can occur when loading or saving a rubric file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Template file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to access template file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Rule(#[from] RuleConfigurationError),

    #[error("Template validation failed: {0}")]
    Validation(String),
}

/// One rule entry in the persisted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEntry {
    /// Kind tag (`type` in older templates)
    #[serde(alias = "type")]
    pub kind: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default, skip_serializing_if = "ParamBag::is_empty")]
    pub params: ParamBag,
}

fn default_weight() -> f64 {
    1.0
}

fn default_name() -> String {
    "default".to_string()
}

/// The persisted form of a rubric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateDocument {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

impl Rubric {
    /// Convert to the persisted document form.
    pub fn to_structured_form(&self) -> TemplateDocument {
        TemplateDocument {
            name: self.name.clone(),
            description: self.description.clone(),
            rules: self
                .rules
                .iter()
                .map(|r| RuleEntry {
                    kind: r.rule.kind().to_string(),
                    weight: r.weight,
                    params: r.rule.params(),
                })
                .collect(),
        }
    }

    /// Build a rubric from its document form using the built-in kinds.
    pub fn from_structured_form(doc: &TemplateDocument) -> Result<Self, ConfigFileError> {
        Self::from_structured_form_with(builtin(), doc)
    }

    /// Build a rubric from its document form, resolving kinds in `registry`.
    pub fn from_structured_form_with(
        registry: &RuleRegistry,
        doc: &TemplateDocument,
    ) -> Result<Self, ConfigFileError> {
        let mut rubric = Rubric::new(doc.name.clone()).with_description(doc.description.clone());
        for entry in &doc.rules {
            rubric.add_rule_from(registry, &entry.kind, entry.weight, entry.params.clone())?;
        }
        rubric.validate()?;
        Ok(rubric)
    }

    /// Parse a rubric from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigFileError> {
        let doc: TemplateDocument = serde_yaml::from_str(yaml)?;
        Self::from_structured_form(&doc)
    }

    /// Parse a rubric from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigFileError> {
        let doc: TemplateDocument = serde_json::from_str(json)?;
        Self::from_structured_form(&doc)
    }

    /// Load a rubric from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    /// Load a rubric from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        Self::from_json(&read(path.as_ref())?)
    }

    /// Load a rubric, picking the format from the file extension.
    ///
    /// `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_file(path)
        } else {
            Self::from_yaml_file(path)
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigFileError> {
        Ok(serde_yaml::to_string(&self.to_structured_form())?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigFileError> {
        Ok(serde_json::to_string_pretty(&self.to_structured_form())?)
    }

    /// Write the rubric as YAML, creating parent directories.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigFileError> {
        let mut writer = create(path.as_ref())?;
        serde_yaml::to_writer(&mut writer, &self.to_structured_form())?;
        writer.flush()?;
        Ok(())
    }

    /// Write the rubric as pretty-printed JSON, creating parent directories.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigFileError> {
        let mut writer = create(path.as_ref())?;
        serde_json::to_writer_pretty(&mut writer, &self.to_structured_form())?;
        writer.flush()?;
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

fn create(path: &Path) -> Result<BufWriter<File>, ConfigFileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL_TEMPLATE: &str = r#"
name: full
description: Every built-in kind
rules:
  - kind: contains_phrase
    weight: 2.0
    params:
      phrase: helpful
  - kind: word_count
    weight: 1.0
    params:
      min_words: 5
      max_words: 100
  - kind: regex_match
    weight: 0.5
    params:
      pattern: '\bexample\b'
      case_insensitive: true
  - kind: cosine_sim
    params:
      target: clear concise helpful answer
  - kind: sentiment_positive
    weight: 0.3
  - kind: argument_structure
    weight: 0.4
  - kind: domain_expertise
    weight: 0.6
    params:
      domain: programming
      expertise_terms: [function, variable, loop]
  - kind: citation_quality
    weight: 0.2
  - kind: readability
    weight: 0.5
    params:
      target_grade_level: 6
      tolerance: 3
  - kind: semantic_coherence
    weight: 0.5
"#;

    const TEXTS: &[&str] = &[
        "",
        "short",
        "This is a helpful example answer that is clear and concise",
        "Therefore the function returns early because the loop variable (Smith, 2020) is great",
        "However, some argue otherwise; see [1] and https://example.org for evidence.",
    ];

    #[test]
    fn test_yaml_parsing() {
        let rubric = Rubric::from_yaml(FULL_TEMPLATE).unwrap();
        assert_eq!(rubric.name, "full");
        assert_eq!(rubric.description, "Every built-in kind");
        assert_eq!(rubric.len(), 10);
        assert_eq!(rubric.rules()[3].weight(), 1.0);
    }

    #[test]
    fn test_structured_roundtrip_scores_identically() {
        let saved = Rubric::from_yaml(FULL_TEMPLATE).unwrap();
        let doc = saved.to_structured_form();
        let restored = Rubric::from_structured_form(&doc).unwrap();

        assert_eq!(restored.to_structured_form(), doc);
        for text in TEXTS {
            assert_eq!(
                saved.score(text).to_bits(),
                restored.score(text).to_bits(),
                "mismatch on {text:?}"
            );
        }
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("rubric.yaml");

        let saved = Rubric::from_yaml(FULL_TEMPLATE).unwrap();
        saved.to_yaml_file(&path).unwrap();
        let restored = Rubric::from_file(&path).unwrap();

        assert_eq!(restored.to_structured_form(), saved.to_structured_form());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rubric.json");

        let saved = Rubric::from_yaml(FULL_TEMPLATE).unwrap();
        saved.to_json_file(&path).unwrap();
        let restored = Rubric::from_file(&path).unwrap();

        for text in TEXTS {
            assert_eq!(saved.score(text), restored.score(text));
        }
    }

    #[test]
    fn test_type_alias_accepted() {
        let yaml = r#"
name: legacy
rules:
  - type: contains_phrase
    weight: 1.0
    params:
      phrase: hello
"#;
        let rubric = Rubric::from_yaml(yaml).unwrap();
        assert_eq!(rubric.score("hello world"), 1.0);
    }

    #[test]
    fn test_defaults_applied() {
        let rubric = Rubric::from_yaml("rules: []").unwrap();
        assert_eq!(rubric.name, "default");
        assert!(rubric.is_empty());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let yaml = "rules:\n  - kind: telepathy\n";
        assert!(matches!(
            Rubric::from_yaml(yaml),
            Err(ConfigFileError::Rule(RuleConfigurationError::UnknownKind(_)))
        ));
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        let yaml = "rules:\n  - kind: contains_phrase\n    weight: 0\n    params: {phrase: x}\n";
        assert!(matches!(
            Rubric::from_yaml(yaml),
            Err(ConfigFileError::Rule(RuleConfigurationError::ZeroTotalWeight(_)))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            Rubric::from_yaml("rules: [unclosed"),
            Err(ConfigFileError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = Rubric::from_file(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigFileError::NotFound(_))));
    }
}
