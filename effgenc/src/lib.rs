//! # effgenc
//!
//! Effect generics for a host compiler: declarations that are generic over
//! whether they carry a modifier such as `async`, `try` or `const`.
//!
//! ## Pipeline
//!
//! ```text
//! HIR Program -> Classify -> Check -> Infer -> Lower -> parametric host code
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use effgenc::effects::EffectRegistry;
//! use effgenc::hir::{CallSite, Declaration, Program, Stmt};
//! use effgenc::EffectPipeline;
//!
//! let registry = EffectRegistry::standard();
//! let mut program = Program::new();
//! let read = program.add(Declaration::function("read").maybe("async").returns("usize"));
//! program.add(
//!     Declaration::function("copy")
//!         .maybe("async")
//!         .body(vec![Stmt::let_("n", CallSite::new(read).forward("async"))]),
//! );
//!
//! let output = EffectPipeline::new(&registry).run(&program).unwrap();
//! let copy = output.lowered("copy").unwrap();
//! assert!(copy.render().starts_with("fn copy<const ASYNC: bool>"));
//! ```
//!
//! ### Error Handling
//!
//! Every phase reports [`effects::EffectError`]s, which convert to
//! [`Diagnostic`]s with `E04xx` codes:
//!
//! ```rust
//! use effgenc::effects::EffectRegistry;
//! use effgenc::hir::{CallSite, Declaration, Program, Stmt};
//! use effgenc::{DiagnosticEmitter, EffectPipeline};
//!
//! let registry = EffectRegistry::standard();
//! let mut program = Program::new();
//! let fetch = program.add(Declaration::function("fetch").always("async"));
//! program.add(
//!     Declaration::function("main")
//!         .never("async")
//!         .body(vec![Stmt::expr(CallSite::new(fetch).forward("async"))]),
//! );
//!
//! let source = "fn main() { fetch().await }";
//! if let Err(err) = EffectPipeline::new(&registry).run(&program) {
//!     let emitter = DiagnosticEmitter::new("main.rs", source).without_color();
//!     for diagnostic in err.diagnostics() {
//!         let _ = emitter.emit(&diagnostic);
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`diagnostics`] - Error reporting infrastructure
//! - [`effects`] - Registry, classification, checking, inference and lowering
//! - [`hir`] - Declarations and bodies consumed by the effect phases
//! - [`pipeline`] - Phase driver
//! - [`span`] - Source location tracking

pub mod diagnostics;
pub mod effects;
pub mod hir;
pub mod pipeline;
pub mod span;

// Re-export commonly used types
pub use diagnostics::{Diagnostic, DiagnosticEmitter, DiagnosticKind, ErrorCode};
pub use pipeline::{EffectPipeline, Phase, PipelineError, PipelineOutput};
pub use span::Span;
