//! Station element id → name dictionary.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Element id that carries station elevation.
pub const ELEVATION_ELEMENT: i16 = 3;

/// Names for station element ids. Ids without an entry are named by number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementNames {
    names: BTreeMap<i16, String>,
}

impl ElementNames {
    /// Loads a YAML (`.yml`/`.yaml`) or JSON (`.json`) map of id to name.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read element names from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let names = match ext.as_deref() {
            Some("json") => serde_json::from_str(&text)
                .with_context(|| format!("invalid JSON in {}", path.display()))?,
            Some("yml" | "yaml") => serde_yaml::from_str(&text)
                .with_context(|| format!("invalid YAML in {}", path.display()))?,
            _ => bail!(
                "unsupported element dictionary {} (expected .yml, .yaml or .json)",
                path.display()
            ),
        };
        Ok(Self { names })
    }

    pub fn insert(&mut self, id: i16, name: &str) {
        self.names.insert(id, name.to_string());
    }

    pub fn name(&self, id: i16) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Reverse lookup; a bare number also resolves to itself.
    pub fn id(&self, name: &str) -> Option<i16> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
            .or_else(|| name.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(i16, String)> for ElementNames {
    fn from_iter<I: IntoIterator<Item = (i16, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
