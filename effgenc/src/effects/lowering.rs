//! # Effect Lowering
//!
//! Desugars effect-generic declarations into ordinary parametric host code.
//!
//! ## Translation
//!
//! | State of M        | Lowered form                                          |
//! |-------------------|-------------------------------------------------------|
//! | `Maybe`           | a `const M: bool` parameter (or an enum, see below)   |
//! | `Always`          | fixed `true`, no parameter                            |
//! | `Never`/`Unknown` | plain host code                                       |
//!
//! Each effect variable contributes one boolean parameter per modifier. An
//! exclusive variable contributes a single enum parameter instead, with one
//! variant per member plus `None`, so two members can never be on together.
//!
//! A carried `Maybe` modifier makes the return type a late-bound projection:
//! the base type while the parameter is false, the wrapped type while it is
//! true. The projection is only resolved by [`specialize`].
//!
//! ## Example Translation
//!
//! ```text
//! // Before lowering
//! maybe(async) fn copy(r: Reader, w: Writer) -> usize {
//!     let n = read(r).await;
//!     write(w, n);
//! }
//!
//! // After lowering
//! fn copy<const ASYNC: bool>(r: Reader, w: Writer) -> <usize as Lift<ASYNC: Future>>::Output {
//!     let n = (read::<ASYNC>(r).await if ASYNC);
//!     write::<false>(w, n);
//! }
//! ```
//!
//! Specializing `ASYNC = false` removes the guarded `.await` together with
//! the parameter, giving exactly the code of a hand-written synchronous
//! `copy` without forwarding tokens.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use super::classify::{ClassifiedDecl, EffectVar, StateTable};
use super::error::{EffectError, EffectErrorKind, EffectResult, Fix};
use super::infer::{infer, Resolution, ResolutionTable, SiteFacts};
use super::registry::{EffectRegistry, ModifierInfo};
use super::state::{EffectState, Variant};
use crate::hir::{CallSite, DeclKind, Declaration, Expr, ExprKind, OverrideArg, Param, Program, Stmt};
use crate::span::Span;

/// A modifier as seen by lowered code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParamMember {
    pub modifier: String,
    pub carried: bool,
}

/// A compile-time effect parameter of a lowered declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectParam {
    /// `const NAME: bool`
    Flag { name: String, member: ParamMember },
    /// `const NAME: Effect<None | A | B>`
    Choice { name: String, members: Vec<ParamMember> },
}

impl EffectParam {
    pub fn name(&self) -> &str {
        match self {
            EffectParam::Flag { name, .. } | EffectParam::Choice { name, .. } => name,
        }
    }
}

/// A compile-time boolean in lowered code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Const(bool),
    /// The value of a flag parameter.
    Flag(String),
    /// Whether a choice parameter selects `variant`.
    Is { param: String, variant: String },
}

impl Cond {
    pub const TRUE: Cond = Cond::Const(true);
    pub const FALSE: Cond = Cond::Const(false);

    fn substitute(&self, assignment: &Assignment) -> Cond {
        match self {
            Cond::Flag(param) => match assignment.get(param) {
                Some(ParamValue::Flag(value)) => Cond::Const(*value),
                _ => self.clone(),
            },
            Cond::Is { param, variant } => match assignment.get(param) {
                Some(ParamValue::Choice(value)) => Cond::Const(value.as_deref() == Some(variant.as_str())),
                _ => self.clone(),
            },
            Cond::Const(_) => self.clone(),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Const(value) => write!(f, "{value}"),
            Cond::Flag(param) => f.write_str(param),
            Cond::Is { param, variant } => write!(f, "{{ {param} == Effect::{} }}", variant_name(variant)),
        }
    }
}

/// One conditional wrapping layer of a projected return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub cond: Cond,
    pub wrapper: String,
}

/// A return type in lowered code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    Unit,
    Named(String),
    Wrapped { wrapper: String, inner: Box<HostType> },
    /// Late-bound result type; `layers` are listed outermost first.
    Projection { base: Box<HostType>, layers: Vec<Layer> },
}

impl HostType {
    /// Apply wrapping layers to `base`, resolving them when every condition
    /// is known.
    pub fn lift(base: HostType, layers: Vec<Layer>) -> HostType {
        let layers: Vec<Layer> = layers.into_iter().filter(|l| l.cond != Cond::FALSE).collect();
        if layers.iter().all(|l| l.cond == Cond::TRUE) {
            layers.into_iter().rev().fold(base, |inner, layer| HostType::Wrapped {
                wrapper: layer.wrapper,
                inner: Box::new(inner),
            })
        } else {
            HostType::Projection {
                base: Box::new(base),
                layers,
            }
        }
    }

    fn substitute(&self, assignment: &Assignment) -> HostType {
        match self {
            HostType::Projection { base, layers } => HostType::lift(
                (**base).clone(),
                layers
                    .iter()
                    .map(|l| Layer {
                        cond: l.cond.substitute(assignment),
                        wrapper: l.wrapper.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn is_unit(&self) -> bool {
        *self == HostType::Unit
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Unit => f.write_str("()"),
            HostType::Named(name) => f.write_str(name),
            HostType::Wrapped { wrapper, inner } => write!(f, "{wrapper}<{inner}>"),
            HostType::Projection { base, layers } => {
                let layers: Vec<String> = layers.iter().map(|l| format!("{}: {}", l.cond, l.wrapper)).collect();
                write!(f, "<{base} as Lift<{}>>::Output", layers.join(", "))
            }
        }
    }
}

/// The value passed to a callee's choice parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceArg {
    /// A fixed variant, `None` for no active member.
    Const(Option<String>),
    /// The caller's own choice parameter, passed through.
    Param(String),
    /// Per-member conditions, at most one of which may hold.
    Select(Vec<(String, Cond)>),
}

impl ChoiceArg {
    fn substitute(&self, assignment: &Assignment) -> Result<ChoiceArg, Vec<String>> {
        match self {
            ChoiceArg::Param(param) => match assignment.get(param) {
                Some(ParamValue::Choice(value)) => Ok(ChoiceArg::Const(value.clone())),
                _ => Ok(self.clone()),
            },
            ChoiceArg::Select(entries) => select(
                entries
                    .iter()
                    .map(|(m, c)| (m.clone(), c.substitute(assignment)))
                    .collect(),
            ),
            ChoiceArg::Const(_) => Ok(self.clone()),
        }
    }
}

impl fmt::Display for ChoiceArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceArg::Const(None) => f.write_str("Effect::None"),
            ChoiceArg::Const(Some(variant)) => write!(f, "Effect::{}", variant_name(variant)),
            ChoiceArg::Param(param) => f.write_str(param),
            ChoiceArg::Select(entries) => {
                let entries: Vec<String> = entries.iter().map(|(m, c)| format!("{m}: {c}")).collect();
                write!(f, "select!({})", entries.join(", "))
            }
        }
    }
}

/// Build a choice from per-member conditions. Fails with the active members
/// when more than one is known to hold.
fn select(entries: Vec<(String, Cond)>) -> Result<ChoiceArg, Vec<String>> {
    if entries.iter().any(|(_, c)| !matches!(c, Cond::Const(_))) {
        return Ok(ChoiceArg::Select(entries));
    }
    let active: Vec<String> = entries
        .into_iter()
        .filter(|(_, c)| *c == Cond::TRUE)
        .map(|(m, _)| m)
        .collect();
    match active.len() {
        0 => Ok(ChoiceArg::Const(None)),
        1 => Ok(ChoiceArg::Const(active.into_iter().next())),
        _ => Err(active),
    }
}

/// An effect argument at a lowered call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectArg {
    Flag { param: String, value: Cond },
    Choice { param: String, value: ChoiceArg },
}

impl fmt::Display for EffectArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectArg::Flag { value, .. } => write!(f, "{value}"),
            EffectArg::Choice { value, .. } => write!(f, "{value}"),
        }
    }
}

/// A lowered expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LExpr {
    Call {
        callee: String,
        effect_args: Vec<EffectArg>,
        /// Callee modifiers this call must not turn on together.
        exclusions: Vec<ExclusionGroup>,
        receiver: Option<Box<LExpr>>,
        args: Vec<LExpr>,
    },
    /// Consumption of a carried result, performed only while `guard` holds.
    Consume {
        modifier: String,
        token: String,
        guard: Cond,
        inner: Box<LExpr>,
    },
    Block { modifier: String, body: Vec<LStmt> },
    Path(String),
    Literal(String),
    Opaque(String),
}

/// A lowered statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LStmt {
    Let { name: String, init: LExpr },
    Expr(LExpr),
    Return(Option<LExpr>),
}

/// A forwarding token that suspends or otherwise consumes in lowered code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumePoint {
    pub callee: String,
    pub guard: Cond,
}

/// Modifiers at most one of which may be on, each with the condition under
/// which it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionGroup {
    /// The effect variable every member belongs to, if there is one.
    pub var: Option<String>,
    pub members: Vec<(String, Cond)>,
    pub span: Span,
    pub fix: Fix,
}

impl ExclusionGroup {
    /// Substitute `assignment` into the member conditions. Members known to
    /// be off are dropped, and so is a group left with fewer than two
    /// members. Fails with the active members when more than one is on.
    fn substitute(&self, assignment: &Assignment) -> Result<Option<ExclusionGroup>, Vec<String>> {
        let members: Vec<(String, Cond)> = self
            .members
            .iter()
            .map(|(m, c)| (m.clone(), c.substitute(assignment)))
            .filter(|(_, c)| *c != Cond::FALSE)
            .collect();
        let active: Vec<String> = members
            .iter()
            .filter(|(_, c)| *c == Cond::TRUE)
            .map(|(m, _)| m.clone())
            .collect();
        if active.len() > 1 {
            return Err(active);
        }
        Ok((members.len() > 1).then(|| ExclusionGroup {
            members,
            ..self.clone()
        }))
    }

    fn violation(&self, decl: &str, modifiers: Vec<String>) -> EffectError {
        EffectError::new(
            EffectErrorKind::ExclusionViolation {
                decl: decl.to_string(),
                var: self.var.clone(),
                modifiers,
            },
            self.span,
        )
        .with_fix(self.fix.clone())
    }
}

/// A declaration after lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredDecl {
    pub name: String,
    /// Host keyword: `fn`, `trait` or `type`.
    pub keyword: &'static str,
    pub effect_params: Vec<EffectParam>,
    /// Modifiers that are unconditionally on, sorted by name.
    pub fixed: Vec<ParamMember>,
    pub exclusions: Vec<ExclusionGroup>,
    pub params: Vec<Param>,
    pub ret: HostType,
    pub body: Option<Vec<LStmt>>,
    pub span: Span,
}

/// Values for effect parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    values: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Flag(bool),
    Choice(Option<String>),
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, param: &str, value: bool) -> Self {
        self.values.insert(param.to_string(), ParamValue::Flag(value));
        self
    }

    pub fn choice(mut self, param: &str, variant: Option<&str>) -> Self {
        self.values
            .insert(param.to_string(), ParamValue::Choice(variant.map(str::to_string)));
        self
    }

    pub fn get(&self, param: &str) -> Option<&ParamValue> {
        self.values.get(param)
    }

    /// Every parameter of `decl` off.
    pub fn all_off(decl: &LoweredDecl) -> Self {
        decl.effect_params.iter().fold(Self::new(), |a, p| match p {
            EffectParam::Flag { name, .. } => a.flag(name, false),
            EffectParam::Choice { name, .. } => a.choice(name, None),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl LoweredDecl {
    /// Substitute `assignment` into this declaration.
    ///
    /// Assigned parameters disappear, false guards are dropped along with
    /// their consumption, true guards become unconditional, and projections
    /// whose conditions are all known are resolved. Unassigned parameters
    /// stay generic.
    pub fn specialize(&self, assignment: &Assignment) -> EffectResult<LoweredDecl> {
        let invalid = |var: &str, reason: String| {
            Box::new(EffectError::new(
                EffectErrorKind::InvalidEffectVar {
                    decl: self.name.clone(),
                    var: var.to_string(),
                    reason,
                },
                self.span,
            ))
        };

        for (param, value) in &assignment.values {
            match (self.effect_params.iter().find(|p| p.name() == param), value) {
                (None, _) => return Err(invalid(param, "no such effect parameter".to_string())),
                (Some(EffectParam::Flag { .. }), ParamValue::Flag(_)) => {}
                (Some(EffectParam::Choice { members, .. }), ParamValue::Choice(variant)) => {
                    if let Some(variant) = variant {
                        if !members.iter().any(|m| &m.modifier == variant) {
                            return Err(invalid(param, format!("`{variant}` is not a member")));
                        }
                    }
                }
                (Some(_), _) => return Err(invalid(param, "wrong kind of value".to_string())),
            }
        }

        let mut exclusions = Vec::new();
        for group in &self.exclusions {
            match group.substitute(assignment) {
                Ok(Some(group)) => exclusions.push(group),
                Ok(None) => {}
                Err(active) => return Err(Box::new(group.violation(&self.name, active))),
            }
        }

        let mut effect_params = Vec::new();
        let mut fixed = self.fixed.clone();
        for param in &self.effect_params {
            match (param, assignment.get(param.name())) {
                (_, None) => effect_params.push(param.clone()),
                (EffectParam::Flag { member, .. }, Some(ParamValue::Flag(true))) => fixed.push(member.clone()),
                (EffectParam::Choice { members, .. }, Some(ParamValue::Choice(Some(variant)))) => {
                    fixed.extend(members.iter().filter(|m| &m.modifier == variant).cloned());
                }
                _ => {}
            }
        }
        fixed.sort();

        let mut specializer = Specializer {
            assignment,
            decl: &self.name,
            error: None,
        };
        let body = self
            .body
            .as_ref()
            .map(|stmts| stmts.iter().map(|s| specializer.stmt(s)).collect());
        if let Some(err) = specializer.error {
            return Err(Box::new(err));
        }

        Ok(LoweredDecl {
            name: self.name.clone(),
            keyword: self.keyword,
            effect_params,
            fixed,
            exclusions,
            params: self.params.clone(),
            ret: self.ret.substitute(assignment),
            body,
            span: self.span,
        })
    }

    /// Consumption points of `modifier` in evaluation order.
    pub fn consume_points(&self, modifier: &str) -> Vec<ConsumePoint> {
        let mut out = Vec::new();
        for stmt in self.body.iter().flatten() {
            if let Some(expr) = lstmt_expr(stmt) {
                collect_consumes(expr, modifier, &mut out);
            }
        }
        out
    }

    /// Render in a stable host-like textual form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for member in self.fixed.iter().filter(|m| !m.carried) {
            out.push_str(&member.modifier);
            out.push(' ');
        }
        out.push_str(self.keyword);
        out.push(' ');
        out.push_str(&self.name);

        if !self.effect_params.is_empty() {
            let generics: Vec<String> = self
                .effect_params
                .iter()
                .map(|p| match p {
                    EffectParam::Flag { name, .. } => format!("const {name}: bool"),
                    EffectParam::Choice { name, members } => {
                        let variants: Vec<String> =
                            members.iter().map(|m| variant_name(&m.modifier)).collect();
                        format!("const {name}: Effect<None | {}>", variants.join(" | "))
                    }
                })
                .collect();
            let _ = write!(out, "<{}>", generics.join(", "));
        }

        if self.keyword == "fn" {
            let params: Vec<String> = self.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect();
            let _ = write!(out, "({})", params.join(", "));
            if !self.ret.is_unit() {
                let _ = write!(out, " -> {}", self.ret);
            }
        }

        match &self.body {
            None => out.push_str(";\n"),
            Some(stmts) => {
                out.push_str(" {\n");
                render_stmts(stmts, 1, &mut out);
                out.push_str("}\n");
            }
        }
        out
    }
}

/// Monomorphize a lowered declaration.
pub fn specialize(lowered: &LoweredDecl, assignment: &Assignment) -> EffectResult<LoweredDecl> {
    lowered.specialize(assignment)
}

struct Specializer<'a> {
    assignment: &'a Assignment,
    decl: &'a str,
    error: Option<EffectError>,
}

impl Specializer<'_> {
    fn stmt(&mut self, stmt: &LStmt) -> LStmt {
        match stmt {
            LStmt::Let { name, init } => LStmt::Let {
                name: name.clone(),
                init: self.expr(init),
            },
            LStmt::Expr(expr) => LStmt::Expr(self.expr(expr)),
            LStmt::Return(value) => LStmt::Return(value.as_ref().map(|v| self.expr(v))),
        }
    }

    fn expr(&mut self, expr: &LExpr) -> LExpr {
        match expr {
            LExpr::Call {
                callee,
                effect_args,
                exclusions,
                receiver,
                args,
            } => {
                let mut kept = Vec::new();
                for group in exclusions {
                    match group.substitute(self.assignment) {
                        Ok(Some(group)) => kept.push(group),
                        Ok(None) => {}
                        Err(active) => self.report(group.violation(self.decl, active)),
                    }
                }
                LExpr::Call {
                    callee: callee.clone(),
                    effect_args: effect_args.iter().map(|a| self.arg(a)).collect(),
                    exclusions: kept,
                    receiver: receiver.as_ref().map(|r| Box::new(self.expr(r))),
                    args: args.iter().map(|a| self.expr(a)).collect(),
                }
            }
            LExpr::Consume {
                modifier,
                token,
                guard,
                inner,
            } => {
                let inner = self.expr(inner);
                match guard.substitute(self.assignment) {
                    Cond::Const(false) => inner,
                    guard => LExpr::Consume {
                        modifier: modifier.clone(),
                        token: token.clone(),
                        guard,
                        inner: Box::new(inner),
                    },
                }
            }
            LExpr::Block { modifier, body } => LExpr::Block {
                modifier: modifier.clone(),
                body: body.iter().map(|s| self.stmt(s)).collect(),
            },
            LExpr::Path(_) | LExpr::Literal(_) | LExpr::Opaque(_) => expr.clone(),
        }
    }

    fn arg(&self, arg: &EffectArg) -> EffectArg {
        match arg {
            EffectArg::Flag { param, value } => EffectArg::Flag {
                param: param.clone(),
                value: value.substitute(self.assignment),
            },
            EffectArg::Choice { param, value } => EffectArg::Choice {
                param: param.clone(),
                // A clash is reported through the call's exclusion groups.
                value: value.substitute(self.assignment).unwrap_or_else(|_| value.clone()),
            },
        }
    }

    /// Keep the first error.
    fn report(&mut self, err: EffectError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Lower every local declaration of a checked and inferred program.
pub fn lower_program(
    program: &Program,
    registry: &EffectRegistry,
    table: &StateTable,
    resolutions: &ResolutionTable,
) -> Result<Vec<LoweredDecl>, Vec<EffectError>> {
    let lowerer = Lowerer::new(registry, table, resolutions);
    let mut lowered = Vec::new();
    let mut errors = Vec::new();
    for decl in program.declarations() {
        match lowerer.lower(decl) {
            Ok(l) => lowered.push(l),
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    tracing::debug!(decls = lowered.len(), errors = errors.len(), "lowered declarations");
    if errors.is_empty() {
        Ok(lowered)
    } else {
        Err(errors)
    }
}

/// Lowering engine.
pub struct Lowerer<'a> {
    registry: &'a EffectRegistry,
    table: &'a StateTable,
    resolutions: &'a ResolutionTable,
}

/// Per-declaration lowering state.
struct LowerCx<'a> {
    caller: &'a ClassifiedDecl,
    blocks: Vec<&'a str>,
    errors: Vec<EffectError>,
}

impl<'a> Lowerer<'a> {
    pub fn new(registry: &'a EffectRegistry, table: &'a StateTable, resolutions: &'a ResolutionTable) -> Self {
        Self {
            registry,
            table,
            resolutions,
        }
    }

    /// Lower one declaration.
    pub fn lower(&self, decl: &'a Declaration) -> Result<LoweredDecl, Vec<EffectError>> {
        let Some(classified) = self.table.get(decl.def_id) else {
            return Err(vec![EffectError::new(
                EffectErrorKind::UnknownDeclaration { def_id: decl.def_id },
                decl.span,
            )]);
        };

        let registry = self.registry;
        let mut fixed: Vec<ParamMember> = registry
            .iter()
            .filter(|info| classified.state(info.id, registry) == EffectState::Always)
            .map(member)
            .collect();
        fixed.sort();

        let effect_params: Vec<EffectParam> = classified
            .vars
            .iter()
            .flat_map(|var| self.var_params(var))
            .collect();
        let exclusions: Vec<ExclusionGroup> = excluded_sets(classified, registry, false)
            .into_iter()
            .map(|set| ExclusionGroup {
                members: set
                    .members
                    .iter()
                    .map(|info| (info.name.clone(), own_cond(classified, info, registry).unwrap_or(Cond::FALSE)))
                    .collect(),
                var: set.var,
                span: decl.span,
                fix: Fix::Narrow {
                    decl: decl.name.clone(),
                    modifier: set.generic.name.clone(),
                    to: EffectState::Never,
                },
            })
            .collect();

        let base = decl.ret.clone().map_or(HostType::Unit, HostType::Named);
        let layers = registry
            .iter()
            .filter_map(|info| {
                let wrapper = info.wrapper.clone().filter(|_| info.carried)?;
                let cond = own_cond(classified, info, registry)?;
                Some(Layer { cond, wrapper })
            })
            .collect();

        let mut cx = LowerCx {
            caller: classified,
            blocks: Vec::new(),
            errors: Vec::new(),
        };
        let body = decl
            .body
            .as_ref()
            .map(|body| body.stmts.iter().map(|s| self.lower_stmt(s, &mut cx)).collect());
        if !cx.errors.is_empty() {
            return Err(cx.errors);
        }

        tracing::debug!(
            decl = %decl.name,
            kind = decl.kind.describe(),
            params = effect_params.len(),
            "lowered declaration"
        );
        Ok(LoweredDecl {
            name: decl.name.clone(),
            keyword: keyword(&decl.kind),
            effect_params,
            fixed,
            exclusions,
            params: decl.params.clone(),
            ret: HostType::lift(base, layers),
            body,
            span: decl.span,
        })
    }

    fn var_params(&self, var: &EffectVar) -> Vec<EffectParam> {
        let members = var.modifiers.iter().map(|m| self.registry.info(*m));
        if var.exclusive {
            vec![EffectParam::Choice {
                name: var.name.clone(),
                members: members.map(member).collect(),
            }]
        } else {
            members
                .map(|info| EffectParam::Flag {
                    name: flag_name(var, info),
                    member: member(info),
                })
                .collect()
        }
    }

    fn lower_stmt(&self, stmt: &'a Stmt, cx: &mut LowerCx<'a>) -> LStmt {
        match stmt {
            Stmt::Let { name, init } => LStmt::Let {
                name: name.clone(),
                init: self.lower_expr(init, cx),
            },
            Stmt::Expr(expr) => LStmt::Expr(self.lower_expr(expr, cx)),
            Stmt::Return(value) => LStmt::Return(value.as_ref().map(|v| self.lower_expr(v, cx))),
        }
    }

    fn lower_expr(&self, expr: &'a Expr, cx: &mut LowerCx<'a>) -> LExpr {
        match &expr.kind {
            ExprKind::Call(site) => self.lower_call(site, cx),
            ExprKind::ModifierBlock { modifier, body } => {
                cx.blocks.push(modifier.as_str());
                let body = body.iter().map(|s| self.lower_stmt(s, cx)).collect();
                cx.blocks.pop();
                LExpr::Block {
                    modifier: modifier.clone(),
                    body,
                }
            }
            ExprKind::Path(p) => LExpr::Path(p.clone()),
            ExprKind::Literal(l) => LExpr::Literal(l.clone()),
            ExprKind::Opaque(o) => LExpr::Opaque(o.clone()),
        }
    }

    fn lower_call(&self, site: &'a CallSite, cx: &mut LowerCx<'a>) -> LExpr {
        let receiver = site.receiver.as_ref().map(|r| Box::new(self.lower_expr(r, cx)));
        let args = site.args.iter().map(|a| self.lower_expr(a, cx)).collect();

        let Some(callee) = self.table.get(site.callee) else {
            cx.errors.push(EffectError::new(
                EffectErrorKind::UnknownDeclaration { def_id: site.callee },
                site.span,
            ));
            return LExpr::Opaque(site.callee.to_string());
        };

        let registry = self.registry;
        // The condition under which the callee instance has each modifier on.
        let mut on: BTreeMap<String, Cond> = BTreeMap::new();
        for info in registry.iter() {
            let facts = SiteFacts::gather(cx.caller, callee, site, &cx.blocks, info, registry);
            let resolution = self
                .resolutions
                .get(site.id, info.id)
                .unwrap_or_else(|| infer(&facts));
            let cond = match resolution {
                Resolution::ExplicitOverride(OverrideArg::On) => Cond::TRUE,
                Resolution::ExplicitOverride(OverrideArg::Off) => Cond::FALSE,
                Resolution::ExplicitOverride(OverrideArg::Forward) => context_cond(cx, facts.context, info, registry),
                // A token-driven `On` inside a generic context follows the context.
                Resolution::Concrete(Variant::On) if facts.callee == EffectState::Maybe && facts.token => {
                    context_cond(cx, facts.context, info, registry)
                }
                Resolution::Concrete(variant) => Cond::Const(variant.is_on()),
                Resolution::Ambiguous => {
                    cx.errors.push(
                        EffectError::new(
                            EffectErrorKind::Ambiguous {
                                modifier: info.name.clone(),
                                caller: cx.caller.name.clone(),
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
                    Cond::FALSE
                }
            };
            on.insert(info.name.clone(), cond);
        }

        let mut exclusions = Vec::new();
        for set in excluded_sets(callee, registry, true) {
            let group = ExclusionGroup {
                members: set
                    .members
                    .iter()
                    .map(|info| (info.name.clone(), on.get(&info.name).cloned().unwrap_or(Cond::FALSE)))
                    .collect(),
                var: set.var,
                span: site.span,
                fix: Fix::AddOverride {
                    modifier: set.generic.name.clone(),
                    arg: OverrideArg::Off,
                },
            };
            match group.substitute(&Assignment::new()) {
                Ok(Some(group)) => exclusions.push(group),
                Ok(None) => {}
                Err(active) => cx.errors.push(group.violation(&cx.caller.name, active)),
            }
        }

        let mut effect_args = Vec::new();
        for var in &callee.vars {
            if var.exclusive {
                let entries: Vec<(String, Cond)> = var
                    .modifiers
                    .iter()
                    .map(|m| {
                        let name = registry.name(*m).to_string();
                        let cond = on.get(&name).cloned().unwrap_or(Cond::FALSE);
                        (name, cond)
                    })
                    .collect();
                let value = match self.forwarded_choice(cx.caller, var, &entries) {
                    Some(param) => ChoiceArg::Param(param),
                    // A clash is already reported through `exclusions`.
                    None => select(entries).unwrap_or(ChoiceArg::Const(None)),
                };
                effect_args.push(EffectArg::Choice {
                    param: var.name.clone(),
                    value,
                });
            } else {
                for m in &var.modifiers {
                    let info = registry.info(*m);
                    effect_args.push(EffectArg::Flag {
                        param: flag_name(var, info),
                        value: on.get(&info.name).cloned().unwrap_or(Cond::FALSE),
                    });
                }
            }
        }

        let mut lowered = LExpr::Call {
            callee: callee.name.clone(),
            effect_args,
            exclusions,
            receiver,
            args,
        };
        for token in &site.tokens {
            let Ok(info) = registry.lookup(token) else {
                continue;
            };
            let Some(text) = info.forwarding_token.clone().filter(|_| info.carried) else {
                continue;
            };
            let guard = match callee.state(info.id, registry) {
                EffectState::Always => Cond::TRUE,
                EffectState::Maybe => on.get(&info.name).cloned().unwrap_or(Cond::FALSE),
                EffectState::Never | EffectState::Unknown => Cond::FALSE,
            };
            if guard == Cond::FALSE {
                continue;
            }
            lowered = LExpr::Consume {
                modifier: info.name.clone(),
                token: text,
                guard,
                inner: Box::new(lowered),
            };
        }
        lowered
    }

    /// The caller's choice parameter when every member of the callee's
    /// variable is passed straight through from it.
    fn forwarded_choice(&self, caller: &ClassifiedDecl, var: &EffectVar, entries: &[(String, Cond)]) -> Option<String> {
        let mut param = None;
        for (modifier, cond) in entries {
            let Cond::Is { param: p, variant } = cond else {
                return None;
            };
            if variant != modifier || param.as_ref().is_some_and(|q| q != p) {
                return None;
            }
            param = Some(p.clone());
        }
        let param = param?;
        let source = caller.vars.iter().find(|v| v.name == param)?;
        (source.modifiers == var.modifiers).then_some(param)
    }
}

/// Members of one exclusion that a declaration can have on.
struct Excluded<'r> {
    var: Option<String>,
    members: Vec<&'r ModifierInfo>,
    /// The last member that is generic rather than fixed on.
    generic: &'r ModifierInfo,
}

/// Modifiers of `decl` that must not be on together: the members of each
/// registry exclusion set not already kept apart by a choice parameter and,
/// with `choices`, the members of each exclusive variable.
fn excluded_sets<'r>(decl: &ClassifiedDecl, registry: &'r EffectRegistry, choices: bool) -> Vec<Excluded<'r>> {
    let excluded = |var: Option<String>, members: Vec<&'r ModifierInfo>| {
        let generic = members
            .iter()
            .rev()
            .find(|info| decl.state(info.id, registry) == EffectState::Maybe)
            .copied()?;
        (members.len() > 1).then_some(Excluded { var, members, generic })
    };

    let mut out = Vec::new();
    for set in registry.exclusions() {
        let members: Vec<&ModifierInfo> = set
            .members()
            .map(|id| registry.info(id))
            .filter(|info| !decl.state(info.id, registry).is_off())
            .collect();
        let var = shared_var(decl, &members);
        if var.is_some_and(|v| v.exclusive) {
            continue;
        }
        out.extend(excluded(var.map(|v| v.name.clone()), members));
    }
    if choices {
        for var in decl.vars.iter().filter(|v| v.exclusive) {
            let members = var.modifiers.iter().map(|m| registry.info(*m)).collect();
            out.extend(excluded(Some(var.name.clone()), members));
        }
    }
    out
}

/// The effect variable that every one of `members` belongs to.
fn shared_var<'d>(decl: &'d ClassifiedDecl, members: &[&ModifierInfo]) -> Option<&'d EffectVar> {
    let var = decl.var_of(members.first()?.id)?;
    members.iter().all(|m| var.contains(m.id)).then_some(var)
}

/// The condition under which the enclosing context has `info` on.
fn context_cond(cx: &LowerCx<'_>, context: EffectState, info: &ModifierInfo, registry: &EffectRegistry) -> Cond {
    match context {
        EffectState::Always => Cond::TRUE,
        EffectState::Maybe => own_cond(cx.caller, info, registry).unwrap_or(Cond::FALSE),
        EffectState::Never | EffectState::Unknown => Cond::FALSE,
    }
}

/// The condition under which `decl` itself has `info` on; `None` when never.
fn own_cond(decl: &ClassifiedDecl, info: &ModifierInfo, registry: &EffectRegistry) -> Option<Cond> {
    match decl.state(info.id, registry) {
        EffectState::Always => Some(Cond::TRUE),
        EffectState::Maybe => {
            let var = decl.var_of(info.id)?;
            Some(if var.exclusive {
                Cond::Is {
                    param: var.name.clone(),
                    variant: info.name.clone(),
                }
            } else {
                Cond::Flag(flag_name(var, info))
            })
        }
        EffectState::Never | EffectState::Unknown => None,
    }
}

/// Name of the flag parameter of one modifier of a non-exclusive variable.
fn flag_name(var: &EffectVar, info: &ModifierInfo) -> String {
    if var.modifiers.len() == 1 {
        var.name.clone()
    } else {
        format!("{}_{}", var.name, info.param_name())
    }
}

fn member(info: &ModifierInfo) -> ParamMember {
    ParamMember {
        modifier: info.name.clone(),
        carried: info.carried,
    }
}

fn keyword(kind: &DeclKind) -> &'static str {
    match kind {
        DeclKind::Trait { .. } => "trait",
        DeclKind::Type => "type",
        DeclKind::Function | DeclKind::TraitMethod { .. } | DeclKind::ImplMethod { .. } => "fn",
    }
}

fn variant_name(modifier: &str) -> String {
    let mut chars = modifier.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lstmt_expr(stmt: &LStmt) -> Option<&LExpr> {
    match stmt {
        LStmt::Let { init, .. } => Some(init),
        LStmt::Expr(expr) => Some(expr),
        LStmt::Return(value) => value.as_ref(),
    }
}

fn collect_consumes(expr: &LExpr, modifier: &str, out: &mut Vec<ConsumePoint>) {
    match expr {
        LExpr::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                collect_consumes(receiver, modifier, out);
            }
            for arg in args {
                collect_consumes(arg, modifier, out);
            }
        }
        LExpr::Consume {
            modifier: m,
            guard,
            inner,
            ..
        } => {
            collect_consumes(inner, modifier, out);
            if m == modifier {
                out.push(ConsumePoint {
                    callee: callee_name(inner),
                    guard: guard.clone(),
                });
            }
        }
        LExpr::Block { body, .. } => {
            for stmt in body {
                if let Some(expr) = lstmt_expr(stmt) {
                    collect_consumes(expr, modifier, out);
                }
            }
        }
        LExpr::Path(_) | LExpr::Literal(_) | LExpr::Opaque(_) => {}
    }
}

fn callee_name(expr: &LExpr) -> String {
    match expr {
        LExpr::Call { callee, .. } => callee.clone(),
        LExpr::Consume { inner, .. } => callee_name(inner),
        _ => String::new(),
    }
}

fn render_stmts(stmts: &[LStmt], depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    for stmt in stmts {
        out.push_str(&indent);
        match stmt {
            LStmt::Let { name, init } => {
                let _ = write!(out, "let {name} = ");
                render_expr(init, depth, out);
                out.push(';');
            }
            LStmt::Expr(expr) => {
                render_expr(expr, depth, out);
                out.push(';');
            }
            LStmt::Return(None) => out.push_str("return;"),
            LStmt::Return(Some(value)) => {
                out.push_str("return ");
                render_expr(value, depth, out);
                out.push(';');
            }
        }
        out.push('\n');
    }
}

fn render_expr(expr: &LExpr, depth: usize, out: &mut String) {
    match expr {
        LExpr::Call {
            callee,
            effect_args,
            receiver,
            args,
            ..
        } => {
            if let Some(receiver) = receiver {
                render_expr(receiver, depth, out);
                out.push('.');
            }
            out.push_str(callee);
            if !effect_args.is_empty() {
                let rendered: Vec<String> = effect_args.iter().map(|a| a.to_string()).collect();
                let _ = write!(out, "::<{}>", rendered.join(", "));
            }
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_expr(arg, depth, out);
            }
            out.push(')');
        }
        LExpr::Consume {
            token, guard, inner, ..
        } => {
            if *guard == Cond::TRUE {
                render_expr(inner, depth, out);
                out.push_str(token);
            } else {
                out.push('(');
                render_expr(inner, depth, out);
                let _ = write!(out, "{token} if {guard})");
            }
        }
        LExpr::Block { modifier, body } => {
            let _ = writeln!(out, "{modifier} {{");
            render_stmts(body, depth + 1, out);
            out.push_str(&"    ".repeat(depth));
            out.push('}');
        }
        LExpr::Path(text) | LExpr::Literal(text) | LExpr::Opaque(text) => out.push_str(text),
    }
}
