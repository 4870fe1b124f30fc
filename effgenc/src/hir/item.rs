//! Declarations as produced by the host parser.
//!
//! A [`Declaration`] carries the raw, unresolved effect annotations its
//! author wrote. Resolving them against the registry and the inheritance
//! rules is the classifier's job.

use super::def::DefId;
use super::expr::{Body, Stmt};
use crate::span::Span;

/// What kind of declaration this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    /// A free function.
    Function,
    /// A trait, with the traits it extends.
    Trait { supertraits: Vec<DefId> },
    /// A method declared inside a trait.
    ///
    /// `provided` methods come with a default body and are not bound by the
    /// trait's effect states the way required methods are.
    TraitMethod { parent: DefId, provided: bool },
    /// A method implementing a trait method.
    ImplMethod { implements: DefId },
    /// A type declaration (struct, enum, alias).
    Type,
}

impl DeclKind {
    pub fn describe(&self) -> &'static str {
        match self {
            DeclKind::Function => "function",
            DeclKind::Trait { .. } => "trait",
            DeclKind::TraitMethod { .. } => "trait method",
            DeclKind::ImplMethod { .. } => "impl method",
            DeclKind::Type => "type",
        }
    }
}

/// The states an author can write down. `Unknown` is never written; it is
/// what an unannotated declaration defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotatedState {
    /// "this item is M"
    Always,
    /// "this item may or may not be M"
    Maybe,
    /// "this item is never M"
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectAnnotation {
    pub modifier: String,
    pub state: AnnotatedState,
    pub span: Span,
}

/// A named generic effect variable.
///
/// Without an explicit variable, each `Maybe` modifier gets a variable of
/// its own. `exclusive` variables range over at most one active modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectVarDecl {
    pub name: String,
    pub modifiers: Vec<String>,
    pub exclusive: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

/// A declaration in the current compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Assigned by [`Program::add`](super::Program::add).
    pub def_id: DefId,
    pub name: String,
    pub kind: DeclKind,
    pub annotations: Vec<EffectAnnotation>,
    pub effect_vars: Vec<EffectVarDecl>,
    pub params: Vec<Param>,
    /// Base return type; `None` for unit.
    pub ret: Option<String>,
    pub body: Option<Body>,
    pub span: Span,
}

impl Declaration {
    fn new(name: &str, kind: DeclKind) -> Self {
        Self {
            def_id: DefId::new(0),
            name: name.to_string(),
            kind,
            annotations: Vec::new(),
            effect_vars: Vec::new(),
            params: Vec::new(),
            ret: None,
            body: None,
            span: Span::dummy(),
        }
    }

    pub fn function(name: &str) -> Self {
        Self::new(name, DeclKind::Function)
    }

    pub fn trait_decl(name: &str) -> Self {
        Self::new(name, DeclKind::Trait { supertraits: Vec::new() })
    }

    pub fn trait_method(name: &str, parent: DefId) -> Self {
        Self::new(name, DeclKind::TraitMethod { parent, provided: false })
    }

    pub fn impl_method(name: &str, implements: DefId) -> Self {
        Self::new(name, DeclKind::ImplMethod { implements })
    }

    pub fn type_decl(name: &str) -> Self {
        Self::new(name, DeclKind::Type)
    }

    /// Add a supertrait. No effect on non-trait declarations.
    pub fn supertrait(mut self, id: DefId) -> Self {
        if let DeclKind::Trait { supertraits } = &mut self.kind {
            supertraits.push(id);
        }
        self
    }

    /// Mark a trait method as provided (it has a default body).
    pub fn provided(mut self) -> Self {
        if let DeclKind::TraitMethod { provided, .. } = &mut self.kind {
            *provided = true;
        }
        self
    }

    pub fn annotate(mut self, modifier: &str, state: AnnotatedState, span: Span) -> Self {
        self.annotations.push(EffectAnnotation {
            modifier: modifier.to_string(),
            state,
            span,
        });
        self
    }

    pub fn always(self, modifier: &str) -> Self {
        let span = self.span;
        self.annotate(modifier, AnnotatedState::Always, span)
    }

    pub fn maybe(self, modifier: &str) -> Self {
        let span = self.span;
        self.annotate(modifier, AnnotatedState::Maybe, span)
    }

    pub fn never(self, modifier: &str) -> Self {
        let span = self.span;
        self.annotate(modifier, AnnotatedState::Never, span)
    }

    pub fn effect_var(mut self, name: &str, modifiers: &[&str], exclusive: bool) -> Self {
        self.effect_vars.push(EffectVarDecl {
            name: name.to_string(),
            modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
            exclusive,
            span: self.span,
        });
        self
    }

    pub fn param(mut self, name: &str, ty: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            ty: ty.to_string(),
        });
        self
    }

    pub fn returns(mut self, ty: &str) -> Self {
        self.ret = Some(ty.to_string());
        self
    }

    pub fn body(mut self, stmts: Vec<Stmt>) -> Self {
        self.body = Some(Body::new(stmts));
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A declaration from a previously compiled unit, known only through its
/// exported effect metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternDecl {
    pub def_id: DefId,
    /// Fully qualified path, e.g. `io::read`.
    pub path: String,
    /// Textual effect map, see [`crate::effects::metadata`].
    pub effects: String,
    pub effect_vars: Vec<EffectVarDecl>,
}
