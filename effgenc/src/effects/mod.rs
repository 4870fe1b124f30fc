//! # Effect Generics
//!
//! Lets one declaration be generic over whether it carries a modifier such as
//! `async`, `try` or `const`, instead of writing one copy per combination.
//!
//! ## Design Overview
//!
//! Every declaration is classified per modifier into one of four states:
//!
//! | State     | Meaning                                  |
//! |-----------|------------------------------------------|
//! | `Always`  | the declaration is unconditionally M     |
//! | `Maybe`   | generic over M, decided at the call site |
//! | `Never`   | explicitly opted out of M                |
//! | `Unknown` | never annotated; behaves as `Never`      |
//!
//! `Unknown` exists so that a later release can commit an unannotated item to
//! `Never` or widen it to `Maybe` without breaking downstream code.
//!
//! ## Pipeline
//!
//! ```text
//! Program -> classify -> check -> infer -> lower -> LoweredDecl
//!               |          |        |        |
//!          StateTable  (errors) Resolutions  host code
//! ```
//!
//! ## Module Structure
//!
//! - [`registry`] - Known modifiers and their properties
//! - [`manifest`] - TOML registry manifests
//! - [`state`] - Effect states, polarity and per-declaration maps
//! - [`classify`] - Declaration classifier
//! - [`check`] - Caller/callee compatibility checker
//! - [`infer`] - Call-site inference
//! - [`lowering`] - Desugaring into parametric host code
//! - [`metadata`] - Cross-unit effect metadata
//! - [`error`] - Effect errors and suggested fixes

pub mod check;
pub mod classify;
pub mod error;
pub mod infer;
pub mod lowering;
pub mod manifest;
pub mod metadata;
pub mod registry;
pub mod state;

pub use check::{check_call, check_call_with, check_program, CompatibilityChecker, RejectReason, Verdict};
pub use classify::{classify, ClassifiedDecl, Classifier, EffectVar, StateTable};
pub use error::{EffectError, EffectErrorKind, EffectResult, Fix};
pub use infer::{infer, infer_program, InferenceEngine, Resolution, ResolutionTable, SiteFacts};
pub use lowering::{
    lower_program, specialize, Assignment, Cond, EffectArg, EffectParam, ExclusionGroup, HostType, LExpr, LStmt,
    LoweredDecl, Lowerer, ParamValue,
};
pub use manifest::{ManifestError, RegistryManifest};
pub use metadata::{ArtifactMetadata, MetadataError, METADATA_VERSION};
pub use registry::{EffectRegistry, ModifierId, ModifierInfo, ModifierSpec, RegistryError};
pub use state::{Direction, EffectMap, EffectState, Polarity, Revision, Variant};
