//! Municipality reference data loaded from a TOML file
//!
//! ```toml
//! [[municipality]]
//! code = "69266"
//! name = "Villeurbanne"
//! department = "69"
//! ```

use super::{Municipality, MunicipalityDirectory};
use async_trait::async_trait;
use civic_common::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    municipality: Vec<MunicipalityEntry>,
}

#[derive(Debug, Deserialize)]
struct MunicipalityEntry {
    code: String,
    name: String,
    #[serde(default)]
    department: Option<String>,
}

/// In-memory municipality directory
#[derive(Debug, Default, Clone)]
pub struct StaticMunicipalityDirectory {
    by_code: HashMap<String, Municipality>,
}

impl StaticMunicipalityDirectory {
    pub fn new(municipalities: impl IntoIterator<Item = Municipality>) -> Self {
        Self {
            by_code: municipalities
                .into_iter()
                .map(|m| (m.code.clone(), m))
                .collect(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: DirectoryFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse municipality directory failed: {}", e)))?;

        Ok(Self::new(file.municipality.into_iter().map(|entry| Municipality {
            code: entry.code.trim().to_string(),
            name: entry.name.trim().to_string(),
            department_code: entry.department,
        })))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read municipality directory {} failed: {}", path.display(), e))
        })?;
        let directory = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            municipalities = directory.len(),
            "Loaded municipality directory"
        );
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[async_trait]
impl MunicipalityDirectory for StaticMunicipalityDirectory {
    async fn lookup(&self, code: &str) -> Option<Municipality> {
        self.by_code.get(code.trim()).cloned()
    }
}
