//! # Effect States
//!
//! Every (declaration, modifier) pair is classified into one of four states:
//!
//! | State     | Meaning                                              |
//! |-----------|------------------------------------------------------|
//! | `Always`  | unconditionally carries the modifier                 |
//! | `Maybe`   | generic over the modifier                            |
//! | `Never`   | committed to never carrying the modifier             |
//! | `Unknown` | not classified yet; may still be widened to `Maybe`  |
//!
//! ## Capability Breadth
//!
//! ```text
//! Always ⊇ Maybe ⊇ { Never, Unknown }
//! ```
//!
//! ## Revisions
//!
//! Published states only move in the safe directions:
//!
//! ```text
//! Unknown ──► Maybe
//!    │
//!    └──────► Never      (irreversible)
//! ```
//!
//! Anything reaching `Always` needs a new declaration name.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::registry::{EffectRegistry, ModifierId};
use crate::hir::AnnotatedState;

/// Classification of one declaration with respect to one modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectState {
    Always,
    Never,
    Maybe,
    Unknown,
}

impl EffectState {
    pub const ALL: [EffectState; 4] = [
        EffectState::Never,
        EffectState::Unknown,
        EffectState::Maybe,
        EffectState::Always,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EffectState::Always => "always",
            EffectState::Never => "never",
            EffectState::Maybe => "maybe",
            EffectState::Unknown => "unknown",
        }
    }

    /// Position in the capability-breadth order.
    pub fn breadth(self) -> u8 {
        match self {
            EffectState::Never | EffectState::Unknown => 0,
            EffectState::Maybe => 1,
            EffectState::Always => 2,
        }
    }

    /// The state used for call checking: `Unknown` behaves as `Never`.
    pub fn effective(self) -> EffectState {
        match self {
            EffectState::Unknown => EffectState::Never,
            state => state,
        }
    }

    /// Whether the declaration has no modifier-on form at all.
    pub fn is_off(self) -> bool {
        matches!(self, EffectState::Never | EffectState::Unknown)
    }

    /// Narrowing-only inheritance from a trait to its methods, and from a
    /// trait method to the impl methods implementing it.
    pub fn permits_child(self, child: EffectState) -> bool {
        match self {
            EffectState::Always => child == EffectState::Always,
            EffectState::Maybe => child != EffectState::Unknown,
            EffectState::Never => child == EffectState::Never,
            EffectState::Unknown => child.is_off(),
        }
    }

    /// Super-trait rule: a sub-trait is no broader than its super-trait, and
    /// an `Always` super-trait forbids an off sub-trait.
    pub fn permits_subtrait(self, sub: EffectState) -> bool {
        match self {
            EffectState::Always => matches!(sub, EffectState::Always | EffectState::Maybe),
            _ => sub.breadth() <= self.breadth(),
        }
    }

    /// Classify a change of published state between two revisions.
    pub fn revise(self, next: EffectState) -> Revision {
        match (self, next) {
            (prev, next) if prev == next => Revision::Unchanged,
            (EffectState::Unknown, EffectState::Maybe) => Revision::Widened,
            (EffectState::Unknown, EffectState::Never) => Revision::Committed,
            _ => Revision::Breaking,
        }
    }
}

impl From<AnnotatedState> for EffectState {
    fn from(state: AnnotatedState) -> Self {
        match state {
            AnnotatedState::Always => EffectState::Always,
            AnnotatedState::Maybe => EffectState::Maybe,
            AnnotatedState::Never => EffectState::Never,
        }
    }
}

impl fmt::Display for EffectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(EffectState::Always),
            "never" => Ok(EffectState::Never),
            "maybe" => Ok(EffectState::Maybe),
            "unknown" => Ok(EffectState::Unknown),
            other => Err(other.to_string()),
        }
    }
}

/// Outcome of moving a published state to a new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Unchanged,
    /// `Unknown → Maybe`: always safe.
    Widened,
    /// `Unknown → Never`: safe, but can never be undone.
    Committed,
    /// Breaks existing callers.
    Breaking,
}

impl Revision {
    pub fn is_compatible(self) -> bool {
        self != Revision::Breaking
    }
}

/// How unannotated declarations are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    /// Modifier-off unless stated. Unannotated declarations are `Unknown`.
    #[default]
    Off,
    /// Modifier-on-but-optional unless stated. Unannotated declarations are `Maybe`.
    OnOptional,
}

impl Polarity {
    pub fn default_state(self) -> EffectState {
        match self {
            Polarity::Off => EffectState::Unknown,
            Polarity::OnOptional => EffectState::Maybe,
        }
    }
}

/// Whether activating a modifier grants or restricts capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Activation produces a superset (e.g. `async` may suspend).
    #[default]
    Superset,
    /// Activation produces a subset (e.g. `const` may only do compile-time work).
    Subset,
}

/// A concrete instantiation of one modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    On,
    Off,
}

impl Variant {
    pub fn is_on(self) -> bool {
        self == Variant::On
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::On => write!(f, "on"),
            Variant::Off => write!(f, "off"),
        }
    }
}

/// The complete classification of one declaration.
///
/// Modifiers missing from the map (registered after the map was built)
/// read as their default state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectMap {
    states: BTreeMap<ModifierId, EffectState>,
}

impl EffectMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding every registered modifier's default state.
    pub fn defaults(registry: &EffectRegistry) -> Self {
        let mut map = Self::new();
        for info in registry.iter() {
            map.set(info.id, info.default_polarity.default_state());
        }
        map
    }

    pub fn set(&mut self, modifier: ModifierId, state: EffectState) {
        self.states.insert(modifier, state);
    }

    /// The recorded state, without falling back to defaults.
    pub fn recorded(&self, modifier: ModifierId) -> Option<EffectState> {
        self.states.get(&modifier).copied()
    }

    pub fn get(&self, modifier: ModifierId, registry: &EffectRegistry) -> EffectState {
        self.recorded(modifier)
            .unwrap_or_else(|| registry.default_state(modifier))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModifierId, EffectState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, *state))
    }

    /// Modifiers this declaration is generic over.
    pub fn maybe_modifiers(&self) -> impl Iterator<Item = ModifierId> + '_ {
        self.iter()
            .filter(|(_, state)| *state == EffectState::Maybe)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breadth_order() {
        assert!(EffectState::Always.breadth() > EffectState::Maybe.breadth());
        assert!(EffectState::Maybe.breadth() > EffectState::Never.breadth());
        assert_eq!(EffectState::Never.breadth(), EffectState::Unknown.breadth());
    }

    #[test]
    fn test_unknown_behaves_as_never() {
        assert_eq!(EffectState::Unknown.effective(), EffectState::Never);
        assert_eq!(EffectState::Maybe.effective(), EffectState::Maybe);
    }

    #[test]
    fn test_permits_child_under_maybe() {
        let parent = EffectState::Maybe;
        assert!(parent.permits_child(EffectState::Always));
        assert!(parent.permits_child(EffectState::Maybe));
        assert!(parent.permits_child(EffectState::Never));
    }

    #[test]
    fn test_permits_child_rejects_widening() {
        assert!(!EffectState::Never.permits_child(EffectState::Maybe));
        assert!(!EffectState::Never.permits_child(EffectState::Always));
        assert!(!EffectState::Always.permits_child(EffectState::Never));
        assert!(!EffectState::Unknown.permits_child(EffectState::Maybe));
    }

    #[test]
    fn test_permits_subtrait() {
        assert!(EffectState::Always.permits_subtrait(EffectState::Maybe));
        assert!(!EffectState::Always.permits_subtrait(EffectState::Never));
        assert!(!EffectState::Always.permits_subtrait(EffectState::Unknown));
        assert!(EffectState::Maybe.permits_subtrait(EffectState::Never));
        assert!(!EffectState::Maybe.permits_subtrait(EffectState::Always));
        assert!(!EffectState::Never.permits_subtrait(EffectState::Maybe));
    }

    #[test]
    fn test_revisions() {
        use EffectState::*;
        assert_eq!(Unknown.revise(Maybe), Revision::Widened);
        assert_eq!(Unknown.revise(Never), Revision::Committed);
        assert_eq!(Never.revise(Never), Revision::Unchanged);
        assert_eq!(Never.revise(Maybe), Revision::Breaking);
        assert_eq!(Never.revise(Unknown), Revision::Breaking);
        assert_eq!(Maybe.revise(Always), Revision::Breaking);
        assert_eq!(Unknown.revise(Always), Revision::Breaking);
    }

    #[test]
    fn test_state_text() {
        for state in EffectState::ALL {
            assert_eq!(state.as_str().parse::<EffectState>(), Ok(state));
        }
        assert!("sometimes".parse::<EffectState>().is_err());
    }

    #[test]
    fn test_polarity_defaults() {
        assert_eq!(Polarity::Off.default_state(), EffectState::Unknown);
        assert_eq!(Polarity::OnOptional.default_state(), EffectState::Maybe);
    }
}
