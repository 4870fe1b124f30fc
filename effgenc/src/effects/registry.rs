//! # Effect Registry
//!
//! The closed set of modifiers known to a compilation, with the properties
//! every other phase consults.
//!
//! The registry is append-only: modifiers and exclusion sets can be added
//! but never removed or changed. It is built once before classification and
//! only borrowed immutably afterwards, so adding a modifier to a later
//! registry never invalidates declarations classified against an earlier
//! one.
//!
//! ## Standard Modifiers
//!
//! | Modifier | Carried | Token    | Wrapper    | Direction |
//! |----------|---------|----------|------------|-----------|
//! | `async`  | yes     | `.await` | `Future`   | superset  |
//! | `try`    | yes     | `?`      | `Fallible` | superset  |
//! | `const`  | no      | -        | -          | subset    |

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

use super::state::{Direction, EffectState, Polarity};

/// Index of a modifier in its registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModifierId(u32);

impl ModifierId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifierId({})", self.0)
    }
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("modifier `{name}` is already registered")]
    DuplicateModifier { name: String },

    #[error("unknown modifier `{name}`")]
    UnknownModifier { name: String },

    #[error("uncarried modifier `{name}` cannot have a forwarding token")]
    TokenOnUncarried { name: String },

    #[error("an exclusion set needs at least two distinct modifiers, got {count}")]
    DegenerateExclusion { count: usize },
}

/// Everything the registry knows about a modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierInfo {
    pub id: ModifierId,
    pub name: String,
    /// Whether activation wraps the return type.
    pub carried: bool,
    /// The call-site marker consuming an active carried result.
    pub forwarding_token: Option<String>,
    pub default_polarity: Polarity,
    pub direction: Direction,
    /// Wrapping type constructor for carried modifiers.
    pub wrapper: Option<String>,
}

impl ModifierInfo {
    /// Whether call sites can carry this modifier's forwarding token.
    pub fn has_token(&self) -> bool {
        self.carried && self.forwarding_token.is_some()
    }

    /// The name of the compile-time parameter lowering introduces.
    pub fn param_name(&self) -> String {
        self.name.to_uppercase()
    }
}

/// Description of a modifier to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierSpec {
    pub name: String,
    pub carried: bool,
    pub forwarding_token: Option<String>,
    pub default_polarity: Polarity,
    pub direction: Direction,
    pub wrapper: Option<String>,
}

impl ModifierSpec {
    /// A carried, superset-producing modifier.
    pub fn carried(name: &str, token: &str, wrapper: &str) -> Self {
        Self {
            name: name.to_string(),
            carried: true,
            forwarding_token: Some(token.to_string()),
            default_polarity: Polarity::Off,
            direction: Direction::Superset,
            wrapper: Some(wrapper.to_string()),
        }
    }

    /// An uncarried modifier without a forwarding token.
    pub fn uncarried(name: &str) -> Self {
        Self {
            name: name.to_string(),
            carried: false,
            forwarding_token: None,
            default_polarity: Polarity::Off,
            direction: Direction::Superset,
            wrapper: None,
        }
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.default_polarity = polarity;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Modifiers that may not be active together for one effect variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    members: BTreeSet<ModifierId>,
}

impl ExclusionSet {
    pub fn members(&self) -> impl Iterator<Item = ModifierId> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, id: ModifierId) -> bool {
        self.members.contains(&id)
    }
}

/// The registry of known modifiers.
#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    modifiers: Vec<ModifierInfo>,
    by_name: HashMap<String, ModifierId>,
    exclusions: Vec<ExclusionSet>,
}

impl EffectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard registry: `async`, `try` and `const`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let standard = [
            ModifierSpec::carried("async", ".await", "Future"),
            ModifierSpec::carried("try", "?", "Fallible"),
            ModifierSpec::uncarried("const").with_direction(Direction::Subset),
        ];
        for spec in standard {
            // Names are distinct and uncarried ones have no token.
            if let Err(err) = registry.register_spec(spec) {
                unreachable!("standard registry is well formed: {err}");
            }
        }
        registry
    }

    /// Register a superset-producing modifier.
    pub fn register(
        &mut self,
        name: &str,
        carried: bool,
        forwarding_token: Option<&str>,
        default_polarity: Polarity,
    ) -> Result<ModifierId, RegistryError> {
        self.register_spec(ModifierSpec {
            name: name.to_string(),
            carried,
            forwarding_token: forwarding_token.map(str::to_string),
            default_polarity,
            direction: Direction::Superset,
            wrapper: carried.then(|| format!("{}Of", capitalize(name))),
        })
    }

    /// Register a modifier from a full description.
    pub fn register_spec(&mut self, spec: ModifierSpec) -> Result<ModifierId, RegistryError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateModifier { name: spec.name });
        }
        if !spec.carried && spec.forwarding_token.is_some() {
            return Err(RegistryError::TokenOnUncarried { name: spec.name });
        }

        let id = ModifierId(self.modifiers.len() as u32);
        let wrapper = if spec.carried {
            spec.wrapper.or_else(|| Some(format!("{}Of", capitalize(&spec.name))))
        } else {
            None
        };
        tracing::debug!(modifier = %spec.name, carried = spec.carried, "registered modifier");
        self.by_name.insert(spec.name.clone(), id);
        self.modifiers.push(ModifierInfo {
            id,
            name: spec.name,
            carried: spec.carried,
            forwarding_token: spec.forwarding_token,
            default_polarity: spec.default_polarity,
            direction: spec.direction,
            wrapper,
        });
        Ok(id)
    }

    /// Declare a set of modifiers mutually exclusive for any effect variable.
    pub fn register_exclusion(&mut self, names: &[&str]) -> Result<(), RegistryError> {
        let mut members = BTreeSet::new();
        for name in names {
            members.insert(self.id_of(name)?);
        }
        if members.len() < 2 {
            return Err(RegistryError::DegenerateExclusion { count: members.len() });
        }
        self.exclusions.push(ExclusionSet { members });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&ModifierInfo, RegistryError> {
        self.id_of(name).map(|id| self.info(id))
    }

    pub fn id_of(&self, name: &str) -> Result<ModifierId, RegistryError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownModifier {
                name: name.to_string(),
            })
    }

    /// Info for an id minted by this registry.
    pub fn info(&self, id: ModifierId) -> &ModifierInfo {
        &self.modifiers[id.index()]
    }

    pub fn name(&self, id: ModifierId) -> &str {
        &self.info(id).name
    }

    pub fn default_state(&self, id: ModifierId) -> EffectState {
        self.info(id).default_polarity.default_state()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModifierInfo> {
        self.modifiers.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = ModifierId> + '_ {
        self.modifiers.iter().map(|m| m.id)
    }

    pub fn exclusions(&self) -> &[ExclusionSet] {
        &self.exclusions
    }

    /// Whether the registry forbids `a` and `b` being active together.
    pub fn mutually_exclusive(&self, a: ModifierId, b: ModifierId) -> bool {
        a != b
            && self
                .exclusions
                .iter()
                .any(|set| set.contains(a) && set.contains(b))
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = EffectRegistry::standard();
        assert_eq!(registry.len(), 3);

        let async_ = registry.lookup("async").unwrap();
        assert!(async_.carried);
        assert_eq!(async_.forwarding_token.as_deref(), Some(".await"));
        assert_eq!(async_.wrapper.as_deref(), Some("Future"));

        let const_ = registry.lookup("const").unwrap();
        assert!(!const_.carried);
        assert!(!const_.has_token());
        assert_eq!(const_.direction, Direction::Subset);
    }

    #[test]
    fn test_duplicate_modifier() {
        let mut registry = EffectRegistry::standard();
        let err = registry
            .register("async", true, Some(".await"), Polarity::Off)
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateModifier { name: "async".into() });
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unknown_modifier() {
        let registry = EffectRegistry::standard();
        assert!(matches!(
            registry.lookup("gen"),
            Err(RegistryError::UnknownModifier { name }) if name == "gen"
        ));
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = EffectRegistry::new();
        let a = registry.register("async", true, Some(".await"), Polarity::Off).unwrap();
        let b = registry.register("unwind", false, None, Polarity::OnOptional).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.default_state(b), EffectState::Maybe);
        assert_eq!(registry.info(a).wrapper.as_deref(), Some("AsyncOf"));
    }

    #[test]
    fn test_token_on_uncarried_rejected() {
        let mut registry = EffectRegistry::new();
        let err = registry.register("const", false, Some("!"), Polarity::Off).unwrap_err();
        assert!(matches!(err, RegistryError::TokenOnUncarried { .. }));
    }

    #[test]
    fn test_exclusions() {
        let mut registry = EffectRegistry::standard();
        registry.register_exclusion(&["async", "try"]).unwrap();
        let a = registry.id_of("async").unwrap();
        let t = registry.id_of("try").unwrap();
        let c = registry.id_of("const").unwrap();
        assert!(registry.mutually_exclusive(a, t));
        assert!(!registry.mutually_exclusive(a, c));
        assert!(!registry.mutually_exclusive(a, a));

        assert!(matches!(
            registry.register_exclusion(&["async", "async"]),
            Err(RegistryError::DegenerateExclusion { count: 1 })
        ));
        assert!(matches!(
            registry.register_exclusion(&["async", "gen"]),
            Err(RegistryError::UnknownModifier { .. })
        ));
    }
}
