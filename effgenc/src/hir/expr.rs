//! Bodies, statements and call sites.
//!
//! The effect model only needs the skeleton of a body: the order of
//! statements and the call sites within them. Everything else the host
//! language can express is carried as an opaque expression.

use super::def::{CallId, DefId};
use crate::span::Span;

/// A function body: an ordered sequence of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

/// A statement within a body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name = init;`
    Let { name: String, init: Expr },
    /// An expression statement.
    Expr(Expr),
    /// `return value;`
    Return(Option<Expr>),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A call to another declaration.
    Call(Box<CallSite>),
    /// A path to a local or parameter.
    Path(String),
    /// A literal.
    Literal(String),
    /// Host code with no calls that the effect model does not interpret.
    Opaque(String),
    /// A block that is unconditionally in one modifier's context,
    /// e.g. `async { ... }` inside an ordinary function.
    ModifierBlock { modifier: String, body: Vec<Stmt> },
}

/// An explicit effect argument written at a call site.
///
/// Equivalent to spelling out the callee's effect parameter by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideArg {
    /// Instantiate the callee with the modifier on.
    On,
    /// Instantiate the callee with the modifier off.
    Off,
    /// Pass the enclosing context's own effect through.
    Forward,
}

impl std::fmt::Display for OverrideArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideArg::On => write!(f, "on"),
            OverrideArg::Off => write!(f, "off"),
            OverrideArg::Forward => write!(f, "forward"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectOverride {
    pub modifier: String,
    pub arg: OverrideArg,
    pub span: Span,
}

/// A call from the enclosing context to a callee declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Assigned by [`Program::add`](super::Program::add).
    pub id: CallId,
    pub callee: DefId,
    /// Method receiver, evaluated before the arguments.
    pub receiver: Option<Box<Expr>>,
    pub args: Vec<Expr>,
    /// Modifiers whose forwarding token follows the call, in source order
    /// (`read().await?` lists `async` then `try`).
    pub tokens: Vec<String>,
    pub overrides: Vec<EffectOverride>,
    pub span: Span,
}

impl CallSite {
    pub fn new(callee: DefId) -> Self {
        Self {
            id: CallId::default(),
            callee,
            receiver: None,
            args: Vec::new(),
            tokens: Vec::new(),
            overrides: Vec::new(),
            span: Span::dummy(),
        }
    }

    pub fn receiver(mut self, receiver: Expr) -> Self {
        self.receiver = Some(Box::new(receiver));
        self
    }

    pub fn arg(mut self, arg: Expr) -> Self {
        self.args.push(arg);
        self
    }

    /// Append the forwarding token of `modifier`.
    pub fn forward(mut self, modifier: &str) -> Self {
        self.tokens.push(modifier.to_string());
        self
    }

    /// Spell out the callee's effect argument for `modifier`.
    pub fn with_override(mut self, modifier: &str, arg: OverrideArg) -> Self {
        self.overrides.push(EffectOverride {
            modifier: modifier.to_string(),
            arg,
            span: self.span,
        });
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn has_token(&self, modifier: &str) -> bool {
        self.tokens.iter().any(|t| t == modifier)
    }

    /// The explicit override for `modifier`, if any. The last one written wins.
    pub fn override_for(&self, modifier: &str) -> Option<&EffectOverride> {
        self.overrides.iter().rev().find(|o| o.modifier == modifier)
    }

    pub fn into_expr(self) -> Expr {
        let span = self.span;
        Expr {
            kind: ExprKind::Call(Box::new(self)),
            span,
        }
    }
}

impl From<CallSite> for Expr {
    fn from(site: CallSite) -> Self {
        site.into_expr()
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn path(name: &str) -> Self {
        Self::new(ExprKind::Path(name.to_string()), Span::dummy())
    }

    pub fn literal(text: &str) -> Self {
        Self::new(ExprKind::Literal(text.to_string()), Span::dummy())
    }

    pub fn opaque(text: &str) -> Self {
        Self::new(ExprKind::Opaque(text.to_string()), Span::dummy())
    }

    pub fn modifier_block(modifier: &str, body: Vec<Stmt>) -> Self {
        Self::new(
            ExprKind::ModifierBlock {
                modifier: modifier.to_string(),
                body,
            },
            Span::dummy(),
        )
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Stmt {
    pub fn let_(name: &str, init: impl Into<Expr>) -> Self {
        Stmt::Let {
            name: name.to_string(),
            init: init.into(),
        }
    }

    pub fn expr(expr: impl Into<Expr>) -> Self {
        Stmt::Expr(expr.into())
    }

    pub fn ret(expr: impl Into<Expr>) -> Self {
        Stmt::Return(Some(expr.into()))
    }
}

impl Body {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    /// Visit every call site in evaluation order.
    ///
    /// Receivers and arguments are visited before the call that consumes
    /// them, so the order matches the order in which forwarding tokens
    /// execute. The callback also receives the modifier blocks enclosing
    /// the call, innermost last.
    pub fn visit_calls<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a CallSite, &[&'a str]),
    {
        let mut blocks = Vec::new();
        visit_stmts(&self.stmts, &mut blocks, f);
    }

    /// Assign call ids in the same order as [`Body::visit_calls`].
    pub(crate) fn number_calls(&mut self, next: &mut u32) {
        for stmt in &mut self.stmts {
            number_stmt(stmt, next);
        }
    }

    /// Every modifier name written in this body, with the span it was written at.
    pub fn mentioned_modifiers(&self) -> Vec<(&str, Span)> {
        let mut out = Vec::new();
        for stmt in &self.stmts {
            collect_stmt_modifiers(stmt, &mut out);
        }
        out
    }
}

fn stmt_expr(stmt: &Stmt) -> Option<&Expr> {
    match stmt {
        Stmt::Let { init, .. } => Some(init),
        Stmt::Expr(expr) => Some(expr),
        Stmt::Return(value) => value.as_ref(),
    }
}

fn visit_stmts<'a, F>(stmts: &'a [Stmt], blocks: &mut Vec<&'a str>, f: &mut F)
where
    F: FnMut(&'a CallSite, &[&'a str]),
{
    for stmt in stmts {
        if let Some(expr) = stmt_expr(stmt) {
            visit_expr(expr, blocks, f);
        }
    }
}

fn visit_expr<'a, F>(expr: &'a Expr, blocks: &mut Vec<&'a str>, f: &mut F)
where
    F: FnMut(&'a CallSite, &[&'a str]),
{
    match &expr.kind {
        ExprKind::Call(site) => {
            if let Some(receiver) = &site.receiver {
                visit_expr(receiver, blocks, f);
            }
            for arg in &site.args {
                visit_expr(arg, blocks, f);
            }
            f(site, blocks);
        }
        ExprKind::ModifierBlock { modifier, body } => {
            blocks.push(modifier.as_str());
            visit_stmts(body, blocks, f);
            blocks.pop();
        }
        ExprKind::Path(_) | ExprKind::Literal(_) | ExprKind::Opaque(_) => {}
    }
}

fn number_stmt(stmt: &mut Stmt, next: &mut u32) {
    let expr = match stmt {
        Stmt::Let { init, .. } => init,
        Stmt::Expr(expr) => expr,
        Stmt::Return(Some(expr)) => expr,
        Stmt::Return(None) => return,
    };
    number_expr(expr, next);
}

fn number_expr(expr: &mut Expr, next: &mut u32) {
    match &mut expr.kind {
        ExprKind::Call(site) => {
            if let Some(receiver) = &mut site.receiver {
                number_expr(receiver, next);
            }
            for arg in &mut site.args {
                number_expr(arg, next);
            }
            site.id = CallId::new(*next);
            *next += 1;
        }
        ExprKind::ModifierBlock { body, .. } => {
            for stmt in body {
                number_stmt(stmt, next);
            }
        }
        ExprKind::Path(_) | ExprKind::Literal(_) | ExprKind::Opaque(_) => {}
    }
}

fn collect_stmt_modifiers<'a>(stmt: &'a Stmt, out: &mut Vec<(&'a str, Span)>) {
    if let Some(expr) = stmt_expr(stmt) {
        collect_expr_modifiers(expr, out);
    }
}

fn collect_expr_modifiers<'a>(expr: &'a Expr, out: &mut Vec<(&'a str, Span)>) {
    match &expr.kind {
        ExprKind::Call(site) => {
            if let Some(receiver) = &site.receiver {
                collect_expr_modifiers(receiver, out);
            }
            for arg in &site.args {
                collect_expr_modifiers(arg, out);
            }
            for token in &site.tokens {
                out.push((token.as_str(), site.span));
            }
            for o in &site.overrides {
                out.push((o.modifier.as_str(), o.span));
            }
        }
        ExprKind::ModifierBlock { modifier, body } => {
            out.push((modifier.as_str(), expr.span));
            for stmt in body {
                collect_stmt_modifiers(stmt, out);
            }
        }
        ExprKind::Path(_) | ExprKind::Literal(_) | ExprKind::Opaque(_) => {}
    }
}
