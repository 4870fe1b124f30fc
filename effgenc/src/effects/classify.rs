//! # Declaration Classifier
//!
//! Resolves the raw annotations of every declaration into a complete
//! [`EffectMap`], applying the inheritance rules between traits, their
//! methods, their super-traits, and the impl methods implementing them.
//!
//! ## Inheritance
//!
//! | Declaration       | Unannotated modifier takes           | Explicit state must satisfy        |
//! |-------------------|--------------------------------------|------------------------------------|
//! | function, type    | registry default                     | -                                  |
//! | trait             | broadest super-trait state           | `super.permits_subtrait(state)`    |
//! | required method   | trait state (`Unknown` → default)    | `trait.permits_child(state)`       |
//! | provided method   | trait state (`Unknown` → default)    | -                                  |
//! | impl method       | implemented method's state           | `method.permits_child(state)`      |
//!
//! Resolution is memoized per declaration. A declaration met again while it
//! is still being resolved closes an inheritance cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::{EffectError, EffectErrorKind, Fix};
use super::metadata::decode_effect_map;
use super::registry::{EffectRegistry, ModifierId};
use super::state::{EffectMap, EffectState};
use crate::hir::{DeclKind, Declaration, DefId, EffectVarDecl, Program, ProgramItem};
use crate::span::Span;

/// A generic effect variable ranging over `Maybe` modifiers of one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectVar {
    pub name: String,
    pub modifiers: Vec<ModifierId>,
    /// At most one member may be active at a time.
    pub exclusive: bool,
}

impl EffectVar {
    pub fn contains(&self, modifier: ModifierId) -> bool {
        self.modifiers.contains(&modifier)
    }
}

/// The classification of one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedDecl {
    pub def_id: DefId,
    pub name: String,
    pub effects: EffectMap,
    /// Explicit variables first, then one implicit variable per remaining
    /// `Maybe` modifier.
    pub vars: Vec<EffectVar>,
    pub span: Span,
    /// Imported from another unit's metadata.
    pub external: bool,
}

impl ClassifiedDecl {
    pub fn state(&self, modifier: ModifierId, registry: &EffectRegistry) -> EffectState {
        self.effects.get(modifier, registry)
    }

    /// The variable a `Maybe` modifier belongs to.
    pub fn var_of(&self, modifier: ModifierId) -> Option<&EffectVar> {
        self.vars.iter().find(|var| var.contains(modifier))
    }

    /// Whether any modifier is `Maybe`.
    pub fn is_generic(&self) -> bool {
        !self.vars.is_empty()
    }
}

/// Classified declarations of a program, keyed by `DefId`.
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    decls: BTreeMap<DefId, ClassifiedDecl>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, decl: ClassifiedDecl) {
        self.decls.insert(decl.def_id, decl);
    }

    pub fn get(&self, def_id: DefId) -> Option<&ClassifiedDecl> {
        self.decls.get(&def_id)
    }

    pub fn state(
        &self,
        def_id: DefId,
        modifier: ModifierId,
        registry: &EffectRegistry,
    ) -> Option<EffectState> {
        self.get(def_id).map(|decl| decl.state(modifier, registry))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedDecl> {
        self.decls.values()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// Classify every declaration of `program`.
pub fn classify(program: &Program, registry: &EffectRegistry) -> Result<StateTable, Vec<EffectError>> {
    Classifier::new(program, registry).run()
}

/// Declaration classifier.
pub struct Classifier<'a> {
    program: &'a Program,
    registry: &'a EffectRegistry,
    resolved: HashMap<DefId, EffectMap>,
    /// Declarations currently being resolved, innermost last.
    visiting: Vec<DefId>,
    errors: Vec<EffectError>,
}

impl<'a> Classifier<'a> {
    pub fn new(program: &'a Program, registry: &'a EffectRegistry) -> Self {
        Self {
            program,
            registry,
            resolved: HashMap::new(),
            visiting: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn run(mut self) -> Result<StateTable, Vec<EffectError>> {
        let program = self.program;
        let mut table = StateTable::new();

        for item in program.items() {
            let effects = self.resolve(item.def_id());
            let classified = match item {
                ProgramItem::Local(decl) => {
                    self.check_body_modifiers(decl);
                    self.check_fixed_exclusions(&decl.name, &effects, decl.span);
                    let vars = self.effect_vars(&decl.name, &decl.effect_vars, &effects);
                    ClassifiedDecl {
                        def_id: decl.def_id,
                        name: decl.name.clone(),
                        effects,
                        vars,
                        span: decl.span,
                        external: false,
                    }
                }
                ProgramItem::Extern(ext) => {
                    let vars = self.effect_vars(&ext.path, &ext.effect_vars, &effects);
                    ClassifiedDecl {
                        def_id: ext.def_id,
                        name: ext.path.clone(),
                        effects,
                        vars,
                        span: Span::dummy(),
                        external: true,
                    }
                }
            };
            table.insert(classified);
        }

        if self.errors.is_empty() {
            Ok(table)
        } else {
            Err(self.errors)
        }
    }

    /// Resolve the effect map of a declaration, memoized.
    fn resolve(&mut self, def_id: DefId) -> EffectMap {
        if let Some(map) = self.resolved.get(&def_id) {
            return map.clone();
        }
        let program = self.program;
        let Some(item) = program.get(def_id) else {
            return EffectMap::defaults(self.registry);
        };

        if self.visiting.contains(&def_id) {
            let span = match item {
                ProgramItem::Local(decl) => decl.span,
                ProgramItem::Extern(_) => Span::dummy(),
            };
            self.errors.push(EffectError::new(
                EffectErrorKind::InheritanceCycle {
                    decl: item.name().to_string(),
                },
                span,
            ));
            return EffectMap::defaults(self.registry);
        }

        self.visiting.push(def_id);
        let map = match item {
            ProgramItem::Local(decl) => self.classify_decl(decl),
            // Externally compiled declarations are taken as-is.
            ProgramItem::Extern(ext) => match decode_effect_map(&ext.effects, self.registry) {
                Ok(map) => map,
                Err(err) => {
                    self.errors.push(err.into_effect_error(Span::dummy()));
                    EffectMap::defaults(self.registry)
                }
            },
        };
        self.visiting.pop();

        tracing::debug!(
            decl = %item.name(),
            effects = ?map.iter().map(|(id, s)| (self.registry.name(id), s)).collect::<Vec<_>>(),
            "classified declaration"
        );
        self.resolved.insert(def_id, map.clone());
        map
    }

    fn classify_decl(&mut self, decl: &Declaration) -> EffectMap {
        let explicit = self.explicit_states(decl);
        let registry = self.registry;
        let mut map = EffectMap::defaults(registry);

        match &decl.kind {
            DeclKind::Function | DeclKind::Type => {
                for (id, (state, _)) in &explicit {
                    map.set(*id, *state);
                }
            }
            DeclKind::Trait { supertraits } => {
                let supers: Vec<(DefId, EffectMap)> = supertraits
                    .iter()
                    .map(|sup| (*sup, self.parent_map(decl, *sup, ParentKind::Trait)))
                    .collect();

                for id in registry.ids() {
                    let (state, span) = match explicit.get(&id) {
                        Some((state, span)) => (*state, *span),
                        None => {
                            let inherited = supers
                                .iter()
                                .map(|(_, m)| m.get(id, registry))
                                .reduce(broadest)
                                .unwrap_or_else(|| registry.default_state(id));
                            (inherited, decl.span)
                        }
                    };
                    for (sup, sup_map) in &supers {
                        let sup_state = sup_map.get(id, registry);
                        if !sup_state.permits_subtrait(state) {
                            self.illegal_narrowing(decl, *sup, id, sup_state, state, span);
                        }
                    }
                    map.set(id, state);
                }
            }
            DeclKind::TraitMethod { parent, provided } => {
                let parent_map = self.parent_map(decl, *parent, ParentKind::Trait);
                for id in registry.ids() {
                    let parent_state = parent_map.get(id, registry);
                    let state = match explicit.get(&id) {
                        Some((state, span)) => {
                            if !provided && !parent_state.permits_child(*state) {
                                self.illegal_narrowing(decl, *parent, id, parent_state, *state, *span);
                            }
                            *state
                        }
                        None if parent_state == EffectState::Unknown => registry.default_state(id),
                        None => parent_state,
                    };
                    map.set(id, state);
                }
            }
            DeclKind::ImplMethod { implements } => {
                let base = self.parent_map(decl, *implements, ParentKind::TraitMethod);
                for id in registry.ids() {
                    let base_state = base.get(id, registry);
                    let state = match explicit.get(&id) {
                        Some((state, span)) => {
                            if !base_state.permits_child(*state) {
                                self.illegal_narrowing(decl, *implements, id, base_state, *state, *span);
                            }
                            *state
                        }
                        None => base_state,
                    };
                    map.set(id, state);
                }
            }
        }
        map
    }

    /// Annotations resolved against the registry, one per modifier.
    fn explicit_states(&mut self, decl: &Declaration) -> BTreeMap<ModifierId, (EffectState, Span)> {
        let mut out = BTreeMap::new();
        for ann in &decl.annotations {
            let Ok(id) = self.registry.id_of(&ann.modifier) else {
                self.errors.push(EffectError::new(
                    EffectErrorKind::UnknownModifier {
                        name: ann.modifier.clone(),
                    },
                    ann.span,
                ));
                continue;
            };
            let state = EffectState::from(ann.state);
            match out.get(&id).copied() {
                Some((prev, _)) if prev == state => {
                    tracing::warn!(
                        decl = %decl.name,
                        modifier = %ann.modifier,
                        %state,
                        "repeated effect annotation"
                    );
                }
                Some((prev, prev_span)) => {
                    self.errors.push(
                        EffectError::new(
                            EffectErrorKind::ConflictingClassification {
                                decl: decl.name.clone(),
                                modifier: ann.modifier.clone(),
                                first: prev,
                                second: state,
                            },
                            ann.span,
                        )
                        .with_note(prev_span, format!("first declared `{prev}` here"))
                        .with_fix(Fix::RemoveAnnotation {
                            decl: decl.name.clone(),
                            modifier: ann.modifier.clone(),
                        }),
                    );
                }
                None => {
                    out.insert(id, (state, ann.span));
                }
            }
        }
        out
    }

    fn parent_map(&mut self, decl: &Declaration, parent: DefId, expected: ParentKind) -> EffectMap {
        let program = self.program;
        let help = match program.get(parent) {
            None => format!("`{}` inherits from a declaration that does not exist", decl.name),
            // Imported declarations carry no kind; their effect map is trusted.
            Some(ProgramItem::Extern(_)) => return self.resolve(parent),
            Some(ProgramItem::Local(local)) if expected.matches(&local.kind) => return self.resolve(parent),
            Some(ProgramItem::Local(local)) => format!(
                "`{}` inherits from `{}`, which is a {} and not a {}",
                decl.name,
                local.name,
                local.kind.describe(),
                expected.describe()
            ),
        };
        self.errors.push(
            EffectError::new(EffectErrorKind::UnknownDeclaration { def_id: parent }, decl.span).with_help(help),
        );
        EffectMap::defaults(self.registry)
    }

    fn illegal_narrowing(
        &mut self,
        decl: &Declaration,
        parent: DefId,
        modifier: ModifierId,
        parent_state: EffectState,
        state: EffectState,
        span: Span,
    ) {
        let parent_name = self.program.name_of(parent);
        let parent_span = self.program.local(parent).map_or(Span::dummy(), |p| p.span);
        let modifier_name = self.registry.name(modifier).to_string();
        self.errors.push(
            EffectError::new(
                EffectErrorKind::IllegalNarrowing {
                    decl: decl.name.clone(),
                    parent: parent_name.clone(),
                    modifier: modifier_name.clone(),
                    parent_state,
                    state,
                },
                span,
            )
            .with_note(parent_span, format!("`{parent_name}` is `{parent_state}` here"))
            .with_fix(Fix::Narrow {
                decl: decl.name.clone(),
                modifier: modifier_name,
                to: parent_state,
            }),
        );
    }

    /// Every modifier written in a body must be registered, so later phases
    /// can skip names they cannot resolve.
    fn check_body_modifiers(&mut self, decl: &Declaration) {
        let Some(body) = &decl.body else {
            return;
        };
        for (name, span) in body.mentioned_modifiers() {
            if self.registry.id_of(name).is_err() {
                self.errors.push(EffectError::new(
                    EffectErrorKind::UnknownModifier {
                        name: name.to_string(),
                    },
                    span,
                ));
            }
        }
    }

    /// Two members of a registry exclusion set may not both be `Always`.
    fn check_fixed_exclusions(&mut self, decl: &str, effects: &EffectMap, span: Span) {
        let registry = self.registry;
        for set in registry.exclusions() {
            let active: Vec<String> = set
                .members()
                .filter(|id| effects.get(*id, registry) == EffectState::Always)
                .map(|id| registry.name(id).to_string())
                .collect();
            let Some(last) = active.last().cloned().filter(|_| active.len() > 1) else {
                continue;
            };
            self.errors.push(
                EffectError::new(
                    EffectErrorKind::ExclusionViolation {
                        decl: decl.to_string(),
                        var: None,
                        modifiers: active,
                    },
                    span,
                )
                .with_fix(Fix::Narrow {
                    decl: decl.to_string(),
                    modifier: last,
                    to: EffectState::Never,
                }),
            );
        }
    }

    fn effect_vars(&mut self, decl: &str, declared: &[EffectVarDecl], effects: &EffectMap) -> Vec<EffectVar> {
        let registry = self.registry;
        let mut vars: Vec<EffectVar> = Vec::new();
        let mut covered = BTreeSet::new();

        for var in declared {
            let invalid = |reason: String| {
                EffectError::new(
                    EffectErrorKind::InvalidEffectVar {
                        decl: decl.to_string(),
                        var: var.name.clone(),
                        reason,
                    },
                    var.span,
                )
            };
            if vars.iter().any(|v| v.name == var.name) {
                self.errors.push(invalid("declared twice".to_string()));
                continue;
            }
            if var.modifiers.is_empty() {
                self.errors.push(invalid("ranges over no modifiers".to_string()));
                continue;
            }

            let mut members = Vec::new();
            for name in &var.modifiers {
                let Ok(id) = registry.id_of(name) else {
                    self.errors.push(EffectError::new(
                        EffectErrorKind::UnknownModifier { name: name.clone() },
                        var.span,
                    ));
                    continue;
                };
                let state = effects.get(id, registry);
                if state != EffectState::Maybe {
                    self.errors
                        .push(invalid(format!("`{name}` is `{state}` here, not `maybe`")));
                    continue;
                }
                if !covered.insert(id) {
                    self.errors
                        .push(invalid(format!("`{name}` already belongs to another effect variable")));
                    continue;
                }
                members.push(id);
            }
            if members.is_empty() {
                continue;
            }

            let exclusive = members.len() > 1 && (var.exclusive || all_excluded(registry, &members));
            vars.push(EffectVar {
                name: var.name.clone(),
                modifiers: members,
                exclusive,
            });
        }

        for id in effects.maybe_modifiers() {
            if covered.contains(&id) {
                continue;
            }
            let info = registry.info(id);
            let name = info.param_name();
            if vars.iter().any(|v| v.name == name) {
                self.errors.push(EffectError::new(
                    EffectErrorKind::InvalidEffectVar {
                        decl: decl.to_string(),
                        var: name,
                        reason: format!("the name is taken by the implicit `{}` variable", info.name),
                    },
                    Span::dummy(),
                ));
                continue;
            }
            vars.push(EffectVar {
                name,
                modifiers: vec![id],
                exclusive: false,
            });
        }
        vars
    }
}

/// What a declaration may inherit its states from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentKind {
    Trait,
    TraitMethod,
}

impl ParentKind {
    fn matches(self, kind: &DeclKind) -> bool {
        matches!(
            (self, kind),
            (ParentKind::Trait, DeclKind::Trait { .. }) | (ParentKind::TraitMethod, DeclKind::TraitMethod { .. })
        )
    }

    fn describe(self) -> &'static str {
        match self {
            ParentKind::Trait => "trait",
            ParentKind::TraitMethod => "trait method",
        }
    }
}

/// The broader of two states; `Never` wins ties with `Unknown`.
fn broadest(a: EffectState, b: EffectState) -> EffectState {
    match a.breadth().cmp(&b.breadth()) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal if b == EffectState::Never => b,
        std::cmp::Ordering::Equal => a,
    }
}

fn all_excluded(registry: &EffectRegistry, members: &[ModifierId]) -> bool {
    members
        .iter()
        .enumerate()
        .all(|(i, a)| members[i + 1..].iter().all(|b| registry.mutually_exclusive(*a, *b)))
}
