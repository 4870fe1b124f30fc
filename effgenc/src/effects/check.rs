//! # Compatibility Checker
//!
//! Validates every call edge against the classification of its two ends.
//!
//! ## Superset-Producing Modifiers
//!
//! | caller \ callee | NEVER   | MAYBE   | ALWAYS       |
//! |-----------------|---------|---------|--------------|
//! | NEVER           | allowed | allowed | **rejected** |
//! | MAYBE           | allowed | allowed | **rejected** |
//! | ALWAYS          | allowed | allowed | allowed      |
//!
//! A conditional context may call code that never carries the modifier and
//! other conditional code, but never code that always carries it.
//!
//! ## Subset-Producing Modifiers
//!
//! | caller \ callee | NEVER        | MAYBE   | ALWAYS  |
//! |-----------------|--------------|---------|---------|
//! | NEVER           | allowed      | allowed | allowed |
//! | MAYBE           | **rejected** | allowed | allowed |
//! | ALWAYS          | **rejected** | allowed | allowed |
//!
//! A context that may run restricted must only reach code that has a
//! restricted form.
//!
//! `Unknown` behaves as `Never` on both sides.
//!
//! ## Call Sites
//!
//! The caller side of an edge is the innermost enclosing context: a modifier
//! block such as `async { ... }` makes its modifier `Always` inside it,
//! otherwise the enclosing declaration's state applies. An explicit override
//! on a generic callee selects the instance being called, and the table is
//! checked against that instance.

use std::fmt;

use super::classify::{ClassifiedDecl, StateTable};
use super::error::{EffectError, EffectErrorKind, Fix};
use super::registry::{EffectRegistry, ModifierInfo};
use super::state::{Direction, EffectState};
use crate::hir::{CallSite, Declaration, OverrideArg, Program};

/// Outcome of checking one (caller, callee, modifier) edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        self == Verdict::Allowed
    }
}

/// Why an edge was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// A context that is not unconditionally on calls unconditional code.
    UnconditionalCallee,
    /// A context that may be restricted calls code without a restricted form.
    RestrictedContext,
    /// A forwarding token where the context cannot consume it.
    TokenOutsideContext,
    /// A forwarding token on a call that produces nothing to consume.
    NothingToForward,
    /// A forwarding token for a modifier without one.
    UncarriedToken,
    /// An explicit effect argument contradicting a non-generic callee.
    OverrideOnConcreteCallee,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::UnconditionalCallee => "a conditional or off context cannot call unconditional code",
            RejectReason::RestrictedContext => "a possibly restricted context cannot call unrestricted code",
            RejectReason::TokenOutsideContext => "the forwarding token is used outside a context that can consume it",
            RejectReason::NothingToForward => "the callee produces nothing for the forwarding token to consume",
            RejectReason::UncarriedToken => "the modifier has no forwarding token",
            RejectReason::OverrideOnConcreteCallee => "the effect argument contradicts a non-generic callee",
        };
        f.write_str(text)
    }
}

/// Check a call edge of a superset-producing modifier.
pub fn check_call(caller: EffectState, callee: EffectState) -> Verdict {
    check_call_with(Direction::Superset, caller, callee)
}

/// Check a call edge under the table of `direction`.
pub fn check_call_with(direction: Direction, caller: EffectState, callee: EffectState) -> Verdict {
    let (caller, callee) = (caller.effective(), callee.effective());
    match direction {
        Direction::Superset if callee == EffectState::Always && caller != EffectState::Always => {
            Verdict::Rejected(RejectReason::UnconditionalCallee)
        }
        Direction::Subset if caller != EffectState::Never && callee == EffectState::Never => {
            Verdict::Rejected(RejectReason::RestrictedContext)
        }
        _ => Verdict::Allowed,
    }
}

/// The state of `modifier` in the context of a call site: `Always` inside a
/// block of that modifier, the enclosing declaration's state otherwise.
pub fn context_state(
    caller: &ClassifiedDecl,
    blocks: &[&str],
    modifier: &ModifierInfo,
    registry: &EffectRegistry,
) -> EffectState {
    if blocks.iter().any(|b| *b == modifier.name) {
        EffectState::Always
    } else {
        caller.state(modifier.id, registry)
    }
}

/// The callee instance a call selects: an override on a generic callee fixes
/// it, otherwise the callee's own state applies.
pub fn instance_state(
    callee: EffectState,
    context: EffectState,
    arg: Option<OverrideArg>,
) -> EffectState {
    match (callee, arg) {
        (EffectState::Maybe, Some(OverrideArg::On)) => EffectState::Always,
        (EffectState::Maybe, Some(OverrideArg::Off)) => EffectState::Never,
        (EffectState::Maybe, Some(OverrideArg::Forward)) => context.effective(),
        (state, _) => state,
    }
}

/// Check every call edge of `program`.
pub fn check_program(
    program: &Program,
    registry: &EffectRegistry,
    table: &StateTable,
) -> Result<(), Vec<EffectError>> {
    CompatibilityChecker::new(program, registry, table).run()
}

/// Compatibility checker over a classified program.
pub struct CompatibilityChecker<'a> {
    program: &'a Program,
    registry: &'a EffectRegistry,
    table: &'a StateTable,
    errors: Vec<EffectError>,
    edges: usize,
}

impl<'a> CompatibilityChecker<'a> {
    pub fn new(program: &'a Program, registry: &'a EffectRegistry, table: &'a StateTable) -> Self {
        Self {
            program,
            registry,
            table,
            errors: Vec::new(),
            edges: 0,
        }
    }

    pub fn run(mut self) -> Result<(), Vec<EffectError>> {
        let program = self.program;
        for decl in program.declarations() {
            self.check_decl(decl);
        }
        tracing::debug!(edges = self.edges, errors = self.errors.len(), "checked call edges");
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn check_decl(&mut self, decl: &Declaration) {
        let table = self.table;
        let (Some(body), Some(caller)) = (&decl.body, table.get(decl.def_id)) else {
            return;
        };
        let mut sites = Vec::new();
        body.visit_calls(&mut |site, blocks| {
            sites.push((site, blocks.to_vec()));
        });
        for (site, blocks) in sites {
            self.check_site(caller, site, &blocks);
        }
    }

    fn check_site(&mut self, caller: &ClassifiedDecl, site: &CallSite, blocks: &[&str]) {
        let table = self.table;
        let Some(callee) = table.get(site.callee) else {
            self.errors.push(
                EffectError::new(EffectErrorKind::UnknownDeclaration { def_id: site.callee }, site.span)
                    .with_help(format!("`{}` calls a declaration that does not exist", caller.name)),
            );
            return;
        };

        let registry = self.registry;
        for info in registry.iter() {
            self.edges += 1;
            let context = context_state(caller, blocks, info, registry);
            let callee_state = callee.state(info.id, registry);
            let arg = site.override_for(&info.name).map(|o| o.arg);

            let Err(reason) = check_edge(info, context, callee_state, arg, site.has_token(&info.name))
            else {
                tracing::trace!(
                    caller = %caller.name,
                    callee = %callee.name,
                    modifier = %info.name,
                    %context,
                    %callee_state,
                    "allowed"
                );
                continue;
            };

            let fix = self.suggest_fix(caller, info, reason, arg.is_some());
            let mut err = EffectError::new(
                EffectErrorKind::Rejected {
                    modifier: info.name.clone(),
                    caller: caller.name.clone(),
                    callee: callee.name.clone(),
                    caller_state: context,
                    callee_state,
                    reason,
                },
                site.span,
            )
            .with_note(
                callee.span,
                format!("`{}` is declared `{callee_state}` for `{}` here", callee.name, info.name),
            );
            if let Some(fix) = fix {
                err = err.with_fix(fix);
            }
            self.errors.push(err);
        }
    }

    fn suggest_fix(
        &self,
        caller: &ClassifiedDecl,
        info: &ModifierInfo,
        reason: RejectReason,
        has_override: bool,
    ) -> Option<Fix> {
        let token = || info.forwarding_token.clone().unwrap_or_else(|| info.name.clone());
        let fix = match reason {
            RejectReason::UnconditionalCallee if has_override => Fix::RemoveOverride {
                modifier: info.name.clone(),
            },
            RejectReason::UnconditionalCallee => Fix::Widen {
                decl: caller.name.clone(),
                modifier: info.name.clone(),
                to: EffectState::Always,
            },
            RejectReason::RestrictedContext if has_override => Fix::RemoveOverride {
                modifier: info.name.clone(),
            },
            RejectReason::RestrictedContext => Fix::Narrow {
                decl: caller.name.clone(),
                modifier: info.name.clone(),
                to: EffectState::Never,
            },
            RejectReason::TokenOutsideContext => Fix::Widen {
                decl: caller.name.clone(),
                modifier: info.name.clone(),
                to: EffectState::Maybe,
            },
            RejectReason::NothingToForward | RejectReason::UncarriedToken => {
                Fix::RemoveForwardingToken {
                    modifier: info.name.clone(),
                    token: token(),
                }
            }
            RejectReason::OverrideOnConcreteCallee => Fix::RemoveOverride {
                modifier: info.name.clone(),
            },
        };
        Some(fix)
    }
}

/// Check one edge for one modifier, reporting the first failing rule.
fn check_edge(
    info: &ModifierInfo,
    context: EffectState,
    callee: EffectState,
    arg: Option<OverrideArg>,
    has_token: bool,
) -> Result<(), RejectReason> {
    if has_token && !info.has_token() {
        return Err(RejectReason::UncarriedToken);
    }
    if let Some(arg) = arg {
        let contradicts = match (callee.effective(), arg) {
            (EffectState::Maybe, _) => false,
            (EffectState::Always, OverrideArg::On) => false,
            (EffectState::Never, OverrideArg::Off) => false,
            _ => true,
        };
        if contradicts {
            return Err(RejectReason::OverrideOnConcreteCallee);
        }
    }

    let instance = instance_state(callee, context, arg);
    if let Verdict::Rejected(reason) = check_call_with(info.direction, context, instance) {
        return Err(reason);
    }

    if has_token {
        if context.is_off() {
            return Err(RejectReason::TokenOutsideContext);
        }
        if instance.is_off() {
            return Err(RejectReason::NothingToForward);
        }
    }
    Ok(())
}
