//! Capability definition files.
//!
//! A definition file is either a top-level list of entries or a map with a
//! `capabilities` list. The format is chosen by extension: `.yaml`/`.yml`,
//! `.toml` or `.json`.

use crate::models::CapabilityEntry;
use crate::services::CapabilityIndex;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Wrapped { capabilities: Vec<CapabilityEntry> },
    List(Vec<CapabilityEntry>),
}

impl DefinitionFile {
    fn into_entries(self) -> Vec<CapabilityEntry> {
        match self {
            Self::Wrapped { capabilities } | Self::List(capabilities) => capabilities,
        }
    }
}

/// Supported definition formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    /// YAML.
    Yaml,
    /// TOML. Only the `capabilities = [...]` form is possible.
    Toml,
    /// JSON.
    Json,
}

impl DefinitionFormat {
    /// Picks a format from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parses definition text.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the text does not parse.
pub fn parse_definitions(contents: &str, format: DefinitionFormat) -> Result<Vec<CapabilityEntry>> {
    let parsed: DefinitionFile = match format {
        DefinitionFormat::Yaml => serde_yaml_ng::from_str(contents)
            .map_err(|e| Error::Configuration(format!("invalid capability YAML: {e}")))?,
        DefinitionFormat::Toml => toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("invalid capability TOML: {e}")))?,
        DefinitionFormat::Json => serde_json::from_str(contents)
            .map_err(|e| Error::Configuration(format!("invalid capability JSON: {e}")))?,
    };
    Ok(parsed.into_entries())
}

impl CapabilityIndex {
    /// Loads and registers every entry in a definition file.
    ///
    /// Returns the number of entries registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file is missing, has an
    /// unknown extension, does not parse, or holds an invalid entry.
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let format = DefinitionFormat::from_path(path).ok_or_else(|| {
            Error::Configuration(format!(
                "unsupported capability file extension: {}",
                path.display()
            ))
        })?;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "cannot read capability file {}: {e}",
                path.display()
            ))
        })?;

        let entries = parse_definitions(&contents, format)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        let count = self.register_all(entries)?;
        tracing::info!(count, "loaded capability definitions");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CapabilityKind;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    const YAML_WRAPPED: &str = r"
capabilities:
  - name: Deploy
    kind: workflow
    slashCommand: /deploy
    triggers: [deploy, release]
  - name: Payments API
    kind: service
    serviceType: api
    endpoint: https://payments.local
";

    const YAML_LIST: &str = r"
- name: Scribe
  kind: node
  role: writes release notes
  primaryTool: editor
";

    const TOML_DEFS: &str = r#"
[[capabilities]]
name = "log_analyzer"
kind = "tool"
"#;

    const JSON_DEFS: &str = r#"[{"name": "cache", "kind": "service", "service_type": "cache"}]"#;

    #[test_case(YAML_WRAPPED, DefinitionFormat::Yaml, 2; "yaml wrapped")]
    #[test_case(YAML_LIST, DefinitionFormat::Yaml, 1; "yaml list")]
    #[test_case(TOML_DEFS, DefinitionFormat::Toml, 1; "toml")]
    #[test_case(JSON_DEFS, DefinitionFormat::Json, 1; "json list")]
    fn test_parse_definitions(contents: &str, format: DefinitionFormat, count: usize) {
        assert_eq!(parse_definitions(contents, format).unwrap().len(), count);
    }

    #[test]
    fn test_aliases() {
        let entries = parse_definitions(YAML_LIST, DefinitionFormat::Yaml).unwrap();
        assert_eq!(entries[0].description.as_deref(), Some("writes release notes"));
        assert_eq!(entries[0].primary_tool.as_deref(), Some("editor"));
    }

    #[test]
    fn test_bad_kind_is_configuration_error() {
        let err = parse_definitions("- name: x\n  kind: gadget\n", DefinitionFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML_WRAPPED.as_bytes()).unwrap();

        let index = CapabilityIndex::new();
        assert_eq!(index.load_file(file.path()).unwrap(), 2);
        let deploy = index.get(CapabilityKind::Workflow, "Deploy").unwrap();
        assert_eq!(deploy.slash_command.as_deref(), Some("/deploy"));
        let api = index.get(CapabilityKind::Service, "Payments API").unwrap();
        assert_eq!(api.service_type.as_deref(), Some("api"));
    }

    #[test]
    fn test_load_file_rejects_blank_name() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(br#"[{"name": " ", "kind": "node"}]"#).unwrap();
        let err = CapabilityIndex::new().load_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("capability #0"));
    }

    #[test]
    fn test_load_file_missing_or_unknown_extension() {
        let index = CapabilityIndex::new();
        assert!(matches!(
            index.load_file(Path::new("/nonexistent/caps.yaml")),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            index.load_file(Path::new("caps.ini")),
            Err(Error::Configuration(_))
        ));
    }
}
