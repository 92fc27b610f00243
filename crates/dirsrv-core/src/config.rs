//! Service configuration loaded from TOML or JSON.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One entry created at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    /// User-provided DN.
    pub dn: String,
    /// Attribute description to values.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// The directory administrator.
    pub admin_dn: String,
    /// Naming contexts served by the partition.
    pub suffixes: Vec<String>,
    /// Entries added by the administrator when the service starts.
    pub seed_entries: Vec<SeedEntry>,
    /// How many diagnostic events are retained.
    pub diagnostics_capacity: usize,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            admin_dn: String::from("uid=admin,ou=system"),
            suffixes: vec![String::from("ou=system")],
            seed_entries: Vec::new(),
            diagnostics_capacity: 256,
            log_filter: String::from("info"),
        }
    }
}

impl ServiceConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display())),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// The configuration rendered as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("rendering configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.admin_dn, "uid=admin,ou=system");
        assert_eq!(config.suffixes, vec!["ou=system"]);
        assert!(config.seed_entries.is_empty());
        assert_eq!(config.diagnostics_capacity, 256);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
admin_dn = "uid=root,dc=example,dc=com"
suffixes = ["dc=example,dc=com"]
diagnostics_capacity = 16

[[seed_entries]]
dn = "dc=example,dc=com"
attributes = {{ objectClass = ["top", "domain"], dc = ["example"] }}
            "#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.admin_dn, "uid=root,dc=example,dc=com");
        assert_eq!(config.suffixes, vec!["dc=example,dc=com"]);
        assert_eq!(config.diagnostics_capacity, 16);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.seed_entries.len(), 1);
        assert_eq!(
            config.seed_entries[0].attributes["objectClass"],
            vec!["top", "domain"]
        );
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "suffixes": ["ou=system", "dc=example,dc=com"],
                "log_filter": "dirsrv_core=debug"
            }}"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.suffixes.len(), 2);
        assert_eq!(config.log_filter, "dirsrv_core=debug");
        assert_eq!(config.admin_dn, "uid=admin,ou=system");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = ServiceConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = ServiceConfig {
            seed_entries: vec![SeedEntry {
                dn: "ou=users,ou=system".to_string(),
                attributes: BTreeMap::from([(
                    "objectClass".to_string(),
                    vec!["organizationalUnit".to_string()],
                )]),
            }],
            ..ServiceConfig::default()
        };
        let rendered = config.to_toml().unwrap();
        let decoded: ServiceConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(decoded.seed_entries, config.seed_entries);
        assert_eq!(decoded.admin_dn, config.admin_dn);
    }
}
