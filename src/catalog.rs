use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::ScanError;

pub const UNKNOWN_SERVICE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEntry {
    pub port: u16,
    pub service: String,
}

impl ServiceEntry {
    pub fn new(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            service: service.into(),
        }
    }
}

/// Port number to service name table. Entries keep file order and may
/// repeat a port; the first one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    entries: Vec<ServiceEntry>,
}

impl ServiceCatalog {
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|e| ScanError::CatalogReadFailed(path.into(), e))?;
        let catalog: Self = serde_json::from_slice(&raw)
            .map_err(|e| ScanError::CatalogParseFailed(path.into(), e))?;

        log::debug!(
            "Loaded {} service entries from `{}`",
            catalog.len(),
            path.display()
        );

        Ok(catalog)
    }

    /// Like [`ServiceCatalog::load`] but a missing or broken file only
    /// costs the service names.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("{}; every open port will be reported as `{}`", e, UNKNOWN_SERVICE);
            Self::default()
        })
    }

    pub fn classify(&self, port: u16) -> &str {
        self.entries
            .iter()
            .find(|e| e.port == port)
            .map_or(UNKNOWN_SERVICE, |e| e.service.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
