//! Effect metadata of compiled units.
//!
//! A unit publishes the effect classification of its declarations so that
//! downstream units can check and infer calls into it without its bodies.
//!
//! # Textual Effect Maps
//!
//! An [`EffectMap`] is encoded as comma-separated `modifier=state` entries,
//! sorted by modifier name:
//!
//! ```text
//! async=maybe,const=never,try=unknown
//! ```
//!
//! Decoding starts from the registry defaults, so modifiers registered after
//! the metadata was written read as their default state.
//!
//! # Artifact Documents
//!
//! [`ArtifactMetadata`] is the JSON document written next to a compiled
//! unit. It lists every exported declaration with its encoded map and
//! effect variables.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classify::StateTable;
use super::error::{EffectError, EffectErrorKind, Fix};
use super::registry::EffectRegistry;
use super::state::{EffectMap, EffectState, Revision};
use crate::hir::{DefId, EffectVarDecl, Program};
use crate::span::Span;

/// Metadata format version for compatibility checking.
pub const METADATA_VERSION: u32 = 1;

/// Errors that can occur while reading or writing metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("malformed effect entry `{entry}`")]
    MalformedEntry { entry: String },

    #[error("unknown modifier `{name}`")]
    UnknownModifier { name: String },

    #[error("unknown effect state `{state}` for `{modifier}`")]
    UnknownState { modifier: String, state: String },

    #[error("modifier `{name}` is listed twice")]
    DuplicateEntry { name: String },

    #[error("metadata version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("metadata IO error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetadataError {
    /// Convert to an effect error at `span`.
    pub fn into_effect_error(self, span: Span) -> EffectError {
        let kind = match self {
            MetadataError::UnknownModifier { name } => EffectErrorKind::UnknownModifier { name },
            other => EffectErrorKind::InvalidMetadata {
                message: other.to_string(),
            },
        };
        EffectError::new(kind, span)
    }
}

/// Encode an effect map, entries sorted by modifier name.
pub fn encode_effect_map(map: &EffectMap, registry: &EffectRegistry) -> String {
    let mut entries: Vec<(&str, EffectState)> = map
        .iter()
        .map(|(id, state)| (registry.name(id), state))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .iter()
        .map(|(name, state)| format!("{name}={state}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode an effect map. Modifiers not mentioned take their default state.
pub fn decode_effect_map(text: &str, registry: &EffectRegistry) -> Result<EffectMap, MetadataError> {
    let mut map = EffectMap::defaults(registry);
    let mut seen = BTreeSet::new();

    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, state) = entry
            .split_once('=')
            .map(|(n, s)| (n.trim(), s.trim()))
            .ok_or_else(|| MetadataError::MalformedEntry {
                entry: entry.to_string(),
            })?;
        if name.is_empty() {
            return Err(MetadataError::MalformedEntry {
                entry: entry.to_string(),
            });
        }
        let id = registry
            .id_of(name)
            .map_err(|_| MetadataError::UnknownModifier {
                name: name.to_string(),
            })?;
        let state: EffectState = state.parse().map_err(|state| MetadataError::UnknownState {
            modifier: name.to_string(),
            state,
        })?;
        if !seen.insert(id) {
            return Err(MetadataError::DuplicateEntry {
                name: name.to_string(),
            });
        }
        map.set(id, state);
    }
    Ok(map)
}

/// An effect variable as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVar {
    pub name: String,
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub exclusive: bool,
}

/// One exported declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedDecl {
    /// Fully qualified path, `unit::name`.
    pub path: String,
    /// Encoded effect map.
    pub effects: String,
    #[serde(default)]
    pub effect_vars: Vec<ExportedVar>,
}

/// The effect metadata of one compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub version: u32,
    pub unit: String,
    pub exports: Vec<ExportedDecl>,
}

impl ArtifactMetadata {
    /// Collect the metadata of every local declaration of a classified program.
    pub fn export(
        unit: &str,
        program: &Program,
        table: &StateTable,
        registry: &EffectRegistry,
    ) -> Self {
        let exports = program
            .declarations()
            .filter_map(|decl| {
                let classified = table.get(decl.def_id)?;
                Some(ExportedDecl {
                    path: format!("{unit}::{}", decl.name),
                    effects: encode_effect_map(&classified.effects, registry),
                    effect_vars: classified
                        .vars
                        .iter()
                        .map(|var| ExportedVar {
                            name: var.name.clone(),
                            modifiers: var
                                .modifiers
                                .iter()
                                .map(|id| registry.name(*id).to_string())
                                .collect(),
                            exclusive: var.exclusive,
                        })
                        .collect(),
                })
            })
            .collect();

        Self {
            version: METADATA_VERSION,
            unit: unit.to_string(),
            exports,
        }
    }

    pub fn find(&self, path: &str) -> Option<&ExportedDecl> {
        self.exports.iter().find(|e| e.path == path)
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let metadata: ArtifactMetadata = serde_json::from_str(json)?;
        if metadata.version != METADATA_VERSION {
            return Err(MetadataError::VersionMismatch {
                expected: METADATA_VERSION,
                found: metadata.version,
            });
        }
        Ok(metadata)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), MetadataError> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, MetadataError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Add every export to `program` as an external declaration.
    pub fn import(&self, program: &mut Program) -> HashMap<String, DefId> {
        let mut ids = HashMap::new();
        for export in &self.exports {
            let vars = export
                .effect_vars
                .iter()
                .map(|var| EffectVarDecl {
                    name: var.name.clone(),
                    modifiers: var.modifiers.clone(),
                    exclusive: var.exclusive,
                    span: Span::dummy(),
                })
                .collect();
            let id = program.add_extern(&export.path, &export.effects, vars);
            ids.insert(export.path.clone(), id);
        }
        tracing::debug!(unit = %self.unit, exports = ids.len(), "imported effect metadata");
        ids
    }

    /// Check that `next`, a later revision of this unit, keeps every
    /// published state compatible.
    ///
    /// Declarations dropped from `next` are not reported here.
    pub fn check_revision(&self, next: &ArtifactMetadata, registry: &EffectRegistry) -> Vec<EffectError> {
        let mut errors = Vec::new();
        for prev in &self.exports {
            let Some(current) = next.find(&prev.path) else {
                continue;
            };
            let decoded = decode_effect_map(&prev.effects, registry)
                .and_then(|before| Ok((before, decode_effect_map(&current.effects, registry)?)));
            let (before, after) = match decoded {
                Ok(maps) => maps,
                Err(err) => {
                    errors.push(err.into_effect_error(Span::dummy()));
                    continue;
                }
            };

            for id in registry.ids() {
                let from = before.get(id, registry);
                let to = after.get(id, registry);
                let revision = from.revise(to);
                tracing::trace!(decl = %prev.path, modifier = registry.name(id), ?revision);
                if revision == Revision::Breaking {
                    errors.push(
                        EffectError::new(
                            EffectErrorKind::IncompatibleRevision {
                                decl: prev.path.clone(),
                                modifier: registry.name(id).to_string(),
                                from,
                                to,
                            },
                            Span::dummy(),
                        )
                        .with_fix(Fix::Rename {
                            decl: prev.path.clone(),
                        }),
                    );
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sorted_by_name() {
        let registry = EffectRegistry::standard();
        let mut map = EffectMap::defaults(&registry);
        map.set(registry.id_of("async").unwrap(), EffectState::Maybe);
        map.set(registry.id_of("const").unwrap(), EffectState::Never);
        assert_eq!(
            encode_effect_map(&map, &registry),
            "async=maybe,const=never,try=unknown"
        );
    }

    #[test]
    fn test_decode_fills_defaults() {
        let registry = EffectRegistry::standard();
        let map = decode_effect_map("async=maybe", &registry).unwrap();
        assert_eq!(map.get(registry.id_of("async").unwrap(), &registry), EffectState::Maybe);
        assert_eq!(map.get(registry.id_of("try").unwrap(), &registry), EffectState::Unknown);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_decode_errors() {
        let registry = EffectRegistry::standard();
        assert!(matches!(
            decode_effect_map("gen=maybe", &registry),
            Err(MetadataError::UnknownModifier { name }) if name == "gen"
        ));
        assert!(matches!(
            decode_effect_map("async", &registry),
            Err(MetadataError::MalformedEntry { .. })
        ));
        assert!(matches!(
            decode_effect_map("async=sometimes", &registry),
            Err(MetadataError::UnknownState { .. })
        ));
        assert!(matches!(
            decode_effect_map("async=maybe,async=never", &registry),
            Err(MetadataError::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn test_unknown_modifier_maps_to_effect_error() {
        let err = MetadataError::UnknownModifier { name: "gen".into() }.into_effect_error(Span::dummy());
        assert!(matches!(err.kind, EffectErrorKind::UnknownModifier { .. }));
        let err = MetadataError::MalformedEntry { entry: "x".into() }.into_effect_error(Span::dummy());
        assert!(matches!(err.kind, EffectErrorKind::InvalidMetadata { .. }));
    }

    #[test]
    fn test_version_mismatch() {
        let json = r#"{ "version": 99, "unit": "io", "exports": [] }"#;
        assert!(matches!(
            ArtifactMetadata::from_json(json),
            Err(MetadataError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    fn single(effects: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            version: METADATA_VERSION,
            unit: "io".into(),
            exports: vec![ExportedDecl {
                path: "io::read".into(),
                effects: effects.into(),
                effect_vars: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_revision_widening_is_compatible() {
        let registry = EffectRegistry::standard();
        let before = single("async=unknown");
        assert!(before.check_revision(&single("async=maybe"), &registry).is_empty());
        assert!(before.check_revision(&single("async=never"), &registry).is_empty());
    }

    #[test]
    fn test_revision_never_is_frozen() {
        let registry = EffectRegistry::standard();
        let errors = single("async=never").check_revision(&single("async=maybe"), &registry);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0].kind,
            EffectErrorKind::IncompatibleRevision { from: EffectState::Never, to: EffectState::Maybe, .. }
        ));
        assert_eq!(errors[0].fix, Some(Fix::Rename { decl: "io::read".into() }));
    }

    #[test]
    fn test_revision_to_always_breaks() {
        let registry = EffectRegistry::standard();
        let errors = single("").check_revision(&single("async=always"), &registry);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_import_adds_externs() {
        let mut metadata = single("async=maybe");
        metadata.exports[0].effect_vars.push(ExportedVar {
            name: "ASYNC".into(),
            modifiers: vec!["async".into()],
            exclusive: false,
        });
        let mut program = Program::new();
        let ids = metadata.import(&mut program);
        let id = ids["io::read"];
        assert_eq!(program.name_of(id), "io::read");
        assert!(program.local(id).is_none());
    }
}
