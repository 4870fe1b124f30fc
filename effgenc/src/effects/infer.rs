//! # Call-Site Inference
//!
//! Decides, for every call site and modifier, which variant of the callee
//! is being called.
//!
//! ## Priority
//!
//! 1. An explicit override always wins.
//! 2. A callee that is not `Maybe` resolves to its fixed state.
//! 3. For a modifier with a forwarding token, the token decides: present
//!    means on, absent means off.
//! 4. Otherwise the enclosing context decides: `Always` means on,
//!    `Never`/`Unknown` mean off, and `Maybe` is ambiguous.
//!
//! Only the call site itself and its enclosing context are consulted. The
//! types of arguments never are, and resolutions of different arguments are
//! never unified with each other.
//!
//! ## Example
//!
//! ```text
//! maybe(async) fn copy(r, w) {
//!     let n = read(r).await;    // async: On  (token present)
//!     write(w, n)               // async: Off (token absent)
//! }
//! ```

use std::collections::BTreeMap;

use super::check::context_state;
use super::classify::{ClassifiedDecl, StateTable};
use super::error::{EffectError, EffectErrorKind, Fix};
use super::registry::{EffectRegistry, ModifierId, ModifierInfo};
use super::state::{EffectState, Variant};
use crate::hir::{CallId, CallSite, Declaration, OverrideArg, Program};

/// How one modifier of one call site is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Concrete(Variant),
    /// Not determinable; always an error.
    Ambiguous,
    ExplicitOverride(OverrideArg),
}

impl Resolution {
    pub fn is_ambiguous(self) -> bool {
        self == Resolution::Ambiguous
    }
}

/// Everything inference may look at for one (call site, modifier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteFacts {
    /// The callee's classified state.
    pub callee: EffectState,
    /// The enclosing context's state.
    pub context: EffectState,
    /// Whether the modifier has a forwarding token at all.
    pub tokened: bool,
    /// Whether the token follows this call.
    pub token: bool,
    pub override_arg: Option<OverrideArg>,
}

impl SiteFacts {
    /// Gather the facts of `site` for one modifier.
    pub fn gather(
        caller: &ClassifiedDecl,
        callee: &ClassifiedDecl,
        site: &CallSite,
        blocks: &[&str],
        info: &ModifierInfo,
        registry: &EffectRegistry,
    ) -> Self {
        SiteFacts {
            callee: callee.state(info.id, registry),
            context: context_state(caller, blocks, info, registry),
            tokened: info.has_token(),
            token: site.has_token(&info.name),
            override_arg: site.override_for(&info.name).map(|o| o.arg),
        }
    }
}

/// Resolve one (call site, modifier) pair.
pub fn infer(facts: &SiteFacts) -> Resolution {
    if let Some(arg) = facts.override_arg {
        return Resolution::ExplicitOverride(arg);
    }
    match facts.callee {
        EffectState::Always => Resolution::Concrete(Variant::On),
        EffectState::Never | EffectState::Unknown => Resolution::Concrete(Variant::Off),
        EffectState::Maybe if facts.tokened => Resolution::Concrete(if facts.token {
            Variant::On
        } else {
            Variant::Off
        }),
        EffectState::Maybe => match facts.context {
            EffectState::Always => Resolution::Concrete(Variant::On),
            EffectState::Never | EffectState::Unknown => Resolution::Concrete(Variant::Off),
            EffectState::Maybe => Resolution::Ambiguous,
        },
    }
}

/// Resolutions of every call site of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionTable {
    entries: BTreeMap<(CallId, ModifierId), Resolution>,
}

impl ResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, call: CallId, modifier: ModifierId, resolution: Resolution) {
        self.entries.insert((call, modifier), resolution);
    }

    pub fn get(&self, call: CallId, modifier: ModifierId) -> Option<Resolution> {
        self.entries.get(&(call, modifier)).copied()
    }

    /// All resolutions of one call site, ordered by modifier.
    pub fn for_call(&self, call: CallId) -> impl Iterator<Item = (ModifierId, Resolution)> + '_ {
        self.entries
            .iter()
            .filter(move |((c, _), _)| *c == call)
            .map(|((_, m), r)| (*m, *r))
    }

    pub fn iter(&self) -> impl Iterator<Item = (CallId, ModifierId, Resolution)> + '_ {
        self.entries.iter().map(|((c, m), r)| (*c, *m, *r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve every call site of a checked program.
pub fn infer_program(
    program: &Program,
    registry: &EffectRegistry,
    table: &StateTable,
) -> Result<ResolutionTable, Vec<EffectError>> {
    InferenceEngine::new(registry, table).run(program)
}

/// Call-site inference engine.
pub struct InferenceEngine<'a> {
    registry: &'a EffectRegistry,
    table: &'a StateTable,
    resolutions: ResolutionTable,
    errors: Vec<EffectError>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(registry: &'a EffectRegistry, table: &'a StateTable) -> Self {
        Self {
            registry,
            table,
            resolutions: ResolutionTable::new(),
            errors: Vec::new(),
        }
    }

    pub fn run(mut self, program: &Program) -> Result<ResolutionTable, Vec<EffectError>> {
        for decl in program.declarations() {
            self.infer_decl(decl);
        }
        tracing::debug!(resolutions = self.resolutions.len(), "inferred call sites");
        if self.errors.is_empty() {
            Ok(self.resolutions)
        } else {
            Err(self.errors)
        }
    }

    fn infer_decl(&mut self, decl: &Declaration) {
        let table = self.table;
        let (Some(body), Some(caller)) = (&decl.body, table.get(decl.def_id)) else {
            return;
        };
        let mut sites = Vec::new();
        body.visit_calls(&mut |site, blocks| sites.push((site, blocks.to_vec())));
        for (site, blocks) in sites {
            self.infer_site(caller, site, &blocks);
        }
    }

    /// Resolve every modifier of one call site.
    pub fn infer_site(&mut self, caller: &ClassifiedDecl, site: &CallSite, blocks: &[&str]) {
        let table = self.table;
        let Some(callee) = table.get(site.callee) else {
            return;
        };
        let registry = self.registry;
        for info in registry.iter() {
            let facts = SiteFacts::gather(caller, callee, site, blocks, info, registry);
            let resolution = infer(&facts);
            tracing::trace!(
                call = %site.id,
                caller = %caller.name,
                callee = %callee.name,
                modifier = %info.name,
                ?resolution,
                "resolved"
            );
            if resolution.is_ambiguous() {
                self.errors.push(
                    EffectError::new(
                        EffectErrorKind::Ambiguous {
                            modifier: info.name.clone(),
                            caller: caller.name.clone(),
                            callee: callee.name.clone(),
                            caller_state: facts.context,
                            callee_state: facts.callee,
                        },
                        site.span,
                    )
                    .with_fix(Fix::AddOverride {
                        modifier: info.name.clone(),
                        arg: OverrideArg::Forward,
                    }),
                );
            }
            self.resolutions.insert(site.id, info.id, resolution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::classify::classify;
    use crate::hir::Stmt;

    fn facts(callee: EffectState, context: EffectState) -> SiteFacts {
        SiteFacts {
            callee,
            context,
            tokened: true,
            token: false,
            override_arg: None,
        }
    }

    #[test]
    fn test_override_wins() {
        let mut f = facts(EffectState::Maybe, EffectState::Maybe);
        f.token = true;
        f.override_arg = Some(OverrideArg::Off);
        assert_eq!(infer(&f), Resolution::ExplicitOverride(OverrideArg::Off));
    }

    #[test]
    fn test_fixed_callees() {
        assert_eq!(
            infer(&facts(EffectState::Always, EffectState::Always)),
            Resolution::Concrete(Variant::On)
        );
        assert_eq!(
            infer(&facts(EffectState::Unknown, EffectState::Maybe)),
            Resolution::Concrete(Variant::Off)
        );
    }

    #[test]
    fn test_token_decides_carried() {
        let mut f = facts(EffectState::Maybe, EffectState::Always);
        assert_eq!(infer(&f), Resolution::Concrete(Variant::Off));
        f.token = true;
        assert_eq!(infer(&f), Resolution::Concrete(Variant::On));
    }

    #[test]
    fn test_context_decides_uncarried() {
        let mut f = facts(EffectState::Maybe, EffectState::Always);
        f.tokened = false;
        assert_eq!(infer(&f), Resolution::Concrete(Variant::On));
        f.context = EffectState::Unknown;
        assert_eq!(infer(&f), Resolution::Concrete(Variant::Off));
        f.context = EffectState::Maybe;
        assert_eq!(infer(&f), Resolution::Ambiguous);
    }

    #[test]
    fn test_copy_read_resolutions() {
        let registry = EffectRegistry::standard();
        let a = registry.id_of("async").unwrap();
        let mut program = Program::new();
        let read = program.add(Declaration::function("read").maybe("async"));
        let write = program.add(Declaration::function("write").maybe("async"));
        let copy = program.add(Declaration::function("copy").maybe("async").body(vec![
            Stmt::let_("n", CallSite::new(read).forward("async")),
            Stmt::expr(CallSite::new(write)),
        ]));
        let table = classify(&program, &registry).unwrap();
        let resolutions = infer_program(&program, &registry, &table).unwrap();

        let mut ids = Vec::new();
        if let Some(body) = program.local(copy).and_then(|d| d.body.as_ref()) {
            body.visit_calls(&mut |site, _| ids.push(site.id));
        }
        assert_eq!(resolutions.get(ids[0], a), Some(Resolution::Concrete(Variant::On)));
        assert_eq!(resolutions.get(ids[1], a), Some(Resolution::Concrete(Variant::Off)));
        assert_eq!(resolutions.for_call(ids[0]).count(), registry.len());
    }

    #[test]
    fn test_uncarried_in_maybe_context_is_ambiguous() {
        let registry = EffectRegistry::standard();
        let mut program = Program::new();
        let len = program.add(Declaration::function("len").maybe("const"));
        let call_span = crate::span::Span::new(30, 35, 2, 5);
        program.add(
            Declaration::function("size")
                .maybe("const")
                .body(vec![Stmt::expr(CallSite::new(len).at(call_span))]),
        );
        let table = classify(&program, &registry).unwrap();
        let errors = infer_program(&program, &registry, &table).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code().as_str(), "E0406");
        assert_eq!(errors[0].span, call_span);
        assert!(matches!(
            errors[0].kind,
            EffectErrorKind::Ambiguous {
                caller_state: EffectState::Maybe,
                callee_state: EffectState::Maybe,
                ..
            }
        ));
        assert_eq!(
            errors[0].fix,
            Some(Fix::AddOverride {
                modifier: "const".into(),
                arg: OverrideArg::Forward
            })
        );
    }

    #[test]
    fn test_forward_override_resolves_ambiguity() {
        let registry = EffectRegistry::standard();
        let c = registry.id_of("const").unwrap();
        let mut program = Program::new();
        let len = program.add(Declaration::function("len").maybe("const"));
        program.add(Declaration::function("size").maybe("const").body(vec![Stmt::expr(
            CallSite::new(len).with_override("const", OverrideArg::Forward),
        )]));
        let table = classify(&program, &registry).unwrap();
        let resolutions = infer_program(&program, &registry, &table).unwrap();
        let (call, _, _) = resolutions.iter().next().unwrap();
        assert_eq!(
            resolutions.get(call, c),
            Some(Resolution::ExplicitOverride(OverrideArg::Forward))
        );
    }
}
