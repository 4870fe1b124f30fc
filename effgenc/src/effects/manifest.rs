//! Registry manifest parsing.
//!
//! A manifest declares the modifiers of a registry and the sets of
//! modifiers that exclude each other.
//!
//! # Example Manifest
//!
//! ```toml
//! [[modifier]]
//! name = "async"
//! carried = true
//! forwarding-token = ".await"
//! wrapper = "Future"
//!
//! [[modifier]]
//! name = "const"
//! direction = "subset"
//!
//! [[modifier]]
//! name = "gen"
//! carried = true
//! default = "on-optional"
//!
//! [[exclusive]]
//! modifiers = ["async", "gen"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{EffectError, EffectErrorKind};
use super::registry::{EffectRegistry, ModifierSpec, RegistryError};
use crate::span::Span;
use super::state::{Direction, Polarity};

/// Errors that can occur when loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid modifier table: {0}")]
    Registry(#[from] RegistryError),

    #[error("modifier name must not be empty")]
    EmptyName,
}

impl ManifestError {
    /// Report this error against the manifest it was loaded from.
    pub fn into_effect_error(self, span: Span) -> EffectError {
        let kind = match self {
            ManifestError::Registry(RegistryError::DuplicateModifier { name }) => {
                EffectErrorKind::DuplicateModifier { name }
            }
            ManifestError::Registry(RegistryError::UnknownModifier { name }) => {
                EffectErrorKind::UnknownModifier { name }
            }
            other => EffectErrorKind::InvalidManifest {
                message: other.to_string(),
            },
        };
        EffectError::new(kind, span)
    }
}

/// One `[[modifier]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModifierEntry {
    pub name: String,

    #[serde(default)]
    pub carried: bool,

    pub forwarding_token: Option<String>,

    /// Wrapping type constructor; derived from the name when omitted.
    pub wrapper: Option<String>,

    #[serde(default, rename = "default")]
    pub default_polarity: Polarity,

    #[serde(default)]
    pub direction: Direction,
}

/// One `[[exclusive]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusiveEntry {
    pub modifiers: Vec<String>,
}

/// A registry manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryManifest {
    #[serde(default, rename = "modifier")]
    pub modifiers: Vec<ModifierEntry>,

    #[serde(default)]
    pub exclusive: Vec<ExclusiveEntry>,
}

impl RegistryManifest {
    /// Parse a manifest from a TOML string.
    #[allow(clippy::should_implement_trait)] // Uses custom ManifestError, not compatible with FromStr trait
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: RegistryManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from a file path.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.modifiers.iter().any(|m| m.name.trim().is_empty()) {
            return Err(ManifestError::EmptyName);
        }
        Ok(())
    }

    /// Build a registry holding exactly the modifiers of this manifest.
    pub fn build(&self) -> Result<EffectRegistry, ManifestError> {
        let mut registry = EffectRegistry::new();
        self.extend(&mut registry)?;
        Ok(registry)
    }

    /// Append this manifest's modifiers and exclusions to `registry`.
    pub fn extend(&self, registry: &mut EffectRegistry) -> Result<(), ManifestError> {
        for entry in &self.modifiers {
            registry.register_spec(ModifierSpec {
                name: entry.name.clone(),
                carried: entry.carried,
                forwarding_token: entry.forwarding_token.clone(),
                default_polarity: entry.default_polarity,
                direction: entry.direction,
                wrapper: entry.wrapper.clone(),
            })?;
        }
        for set in &self.exclusive {
            let names: Vec<&str> = set.modifiers.iter().map(String::as_str).collect();
            registry.register_exclusion(&names)?;
        }
        tracing::debug!(
            modifiers = self.modifiers.len(),
            exclusions = self.exclusive.len(),
            "loaded registry manifest"
        );
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl EffectRegistry {
    /// Build a registry from a TOML manifest.
    pub fn from_manifest(content: &str) -> Result<Self, ManifestError> {
        RegistryManifest::from_str(content)?.build()
    }
}
