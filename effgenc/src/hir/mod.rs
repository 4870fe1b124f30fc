//! High-level Intermediate Representation (HIR) consumed by the effect phases.
//!
//! The host parser and name resolver produce a [`Program`]: the declarations
//! of one compilation unit with their raw effect annotations and bodies,
//! plus the declarations imported from previously compiled units.
//!
//! # HIR Structure
//!
//! - [`Program`] - Root node containing all declarations in a compilation unit
//! - [`Declaration`] - Local functions, traits, trait methods, impl methods and types
//! - [`ExternDecl`] - Imported declarations known only through metadata
//! - [`Body`] - Statements and call sites of a function body

pub mod def;
pub mod expr;
pub mod item;

pub use def::{CallId, DefId};
pub use expr::{Body, CallSite, EffectOverride, Expr, ExprKind, OverrideArg, Stmt};
pub use item::{AnnotatedState, DeclKind, Declaration, EffectAnnotation, EffectVarDecl, ExternDecl, Param};

/// One entry of a program, indexed by `DefId`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramItem {
    Local(Declaration),
    Extern(ExternDecl),
}

impl ProgramItem {
    pub fn def_id(&self) -> DefId {
        match self {
            ProgramItem::Local(decl) => decl.def_id,
            ProgramItem::Extern(ext) => ext.def_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProgramItem::Local(decl) => &decl.name,
            ProgramItem::Extern(ext) => &ext.path,
        }
    }
}

/// A compilation unit in HIR form.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// All items, indexed by `DefId::index`.
    items: Vec<ProgramItem>,
    next_call: u32,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a local declaration, assigning its `DefId` and numbering its call sites.
    pub fn add(&mut self, mut decl: Declaration) -> DefId {
        let id = DefId::new(self.items.len() as u32);
        decl.def_id = id;
        if let Some(body) = &mut decl.body {
            body.number_calls(&mut self.next_call);
        }
        self.items.push(ProgramItem::Local(decl));
        id
    }

    /// Add a declaration imported from another unit's metadata.
    pub fn add_extern(
        &mut self,
        path: &str,
        effects: &str,
        effect_vars: Vec<EffectVarDecl>,
    ) -> DefId {
        let id = DefId::new(self.items.len() as u32);
        self.items.push(ProgramItem::Extern(ExternDecl {
            def_id: id,
            path: path.to_string(),
            effects: effects.to_string(),
            effect_vars,
        }));
        id
    }

    pub fn get(&self, id: DefId) -> Option<&ProgramItem> {
        self.items.get(id.index as usize)
    }

    pub fn local(&self, id: DefId) -> Option<&Declaration> {
        match self.get(id) {
            Some(ProgramItem::Local(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Name of a declaration, or its `DefId` if it does not exist.
    pub fn name_of(&self, id: DefId) -> String {
        self.get(id)
            .map(|item| item.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn items(&self) -> impl Iterator<Item = &ProgramItem> {
        self.items.iter()
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.items.iter().filter_map(|item| match item {
            ProgramItem::Local(decl) => Some(decl),
            ProgramItem::Extern(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
