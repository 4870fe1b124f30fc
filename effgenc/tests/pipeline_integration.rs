//! End-to-end tests for the effect pipeline.
//!
//! These tests build HIR programs by hand and run them through
//! classification, checking, inference and lowering.

use effgenc::effects::{
    Assignment, EffectErrorKind, EffectRegistry, EffectState, Fix, RejectReason, Resolution, Variant,
};
use effgenc::hir::{CallSite, Declaration, DefId, Expr, OverrideArg, Program, Stmt};
use effgenc::span::LineIndex;
use effgenc::{DiagnosticEmitter, EffectPipeline, Phase, PipelineError, PipelineOutput};

/// Test helper to run the full pipeline with the standard registry.
fn run(program: &Program) -> Result<PipelineOutput, PipelineError> {
    let registry = EffectRegistry::standard();
    EffectPipeline::new(&registry).run(program)
}

/// Test helper to verify a program makes it through every phase.
fn assert_lowers(program: &Program) -> PipelineOutput {
    match run(program) {
        Ok(output) => output,
        Err(err) => panic!(
            "{} failed:\n{}",
            err.phase,
            err.errors
                .iter()
                .map(|e| format!("  - {e}"))
                .collect::<Vec<_>>()
                .join("\n")
        ),
    }
}

/// Test helper to verify a program is rejected in `phase` with a message containing `expected`.
fn assert_rejected(program: &Program, phase: Phase, expected: &str) -> PipelineError {
    match run(program) {
        Ok(_) => panic!("expected {phase} to fail with '{expected}', but the pipeline succeeded"),
        Err(err) => {
            assert_eq!(err.phase, phase);
            let has_expected = err.errors.iter().any(|e| e.to_string().contains(expected));
            assert!(
                has_expected,
                "expected error containing '{expected}', got:\n{}",
                err.errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n")
            );
            err
        }
    }
}

/// Call ids of a declaration's body, in evaluation order.
fn call_ids(program: &Program, decl: DefId) -> Vec<effgenc::hir::CallId> {
    let mut ids = Vec::new();
    if let Some(body) = program.local(decl).and_then(|d| d.body.as_ref()) {
        body.visit_calls(&mut |site, _| ids.push(site.id));
    }
    ids
}

/// `maybe(async) fn read(r: Reader) -> usize`
fn with_read(program: &mut Program) -> DefId {
    program.add(
        Declaration::function("read")
            .maybe("async")
            .param("r", "Reader")
            .returns("usize"),
    )
}

// ============================================================
// copy / read
// ============================================================

#[test]
fn test_async_copy_calls_generic_read() {
    let mut program = Program::new();
    let read = with_read(&mut program);
    let copy = program.add(
        Declaration::function("copy")
            .always("async")
            .param("r", "Reader")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(read).arg(Expr::path("r")).forward("async"))]),
    );
    let output = assert_lowers(&program);

    let registry = EffectRegistry::standard();
    let async_id = registry.id_of("async").unwrap();
    let call = call_ids(&program, copy)[0];
    assert_eq!(output.resolutions.get(call, async_id), Some(Resolution::Concrete(Variant::On)));

    let lowered = output.lowered("copy").unwrap();
    assert_eq!(
        lowered.render(),
        "fn copy(r: Reader) -> Future<usize> {\n    return read::<true>(r).await;\n}\n"
    );
    assert_eq!(lowered.consume_points("async").len(), 1);
}

#[test]
fn test_plain_copy_calls_generic_read() {
    let mut program = Program::new();
    let read = with_read(&mut program);
    let copy = program.add(
        Declaration::function("copy")
            .param("r", "Reader")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(read).arg(Expr::path("r")))]),
    );
    let output = assert_lowers(&program);

    let registry = EffectRegistry::standard();
    let async_id = registry.id_of("async").unwrap();
    let call = call_ids(&program, copy)[0];
    assert_eq!(output.resolutions.get(call, async_id), Some(Resolution::Concrete(Variant::Off)));
    assert_eq!(
        output.lowered("copy").unwrap().render(),
        "fn copy(r: Reader) -> usize {\n    return read::<false>(r);\n}\n"
    );
    assert_eq!(output.table.state(copy, async_id, &registry), Some(EffectState::Unknown));
}

#[test]
fn test_generic_copy_forwards_its_own_parameter() {
    let mut program = Program::new();
    let read = with_read(&mut program);
    program.add(
        Declaration::function("copy")
            .maybe("async")
            .param("r", "Reader")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(read).arg(Expr::path("r")).forward("async"))]),
    );
    let output = assert_lowers(&program);
    let lowered = output.lowered("copy").unwrap();
    assert!(lowered.render().contains("return (read::<ASYNC>(r).await if ASYNC);"));

    let off = lowered.specialize(&Assignment::all_off(lowered)).unwrap();
    assert!(off.consume_points("async").is_empty());
    assert_eq!(off.ret.to_string(), "usize");
}

// ============================================================
// Rejections
// ============================================================

#[test]
fn test_never_calling_always_is_rejected() {
    let source = "fn main() { fetch().await }";
    let call_span = LineIndex::new(source).span(12, 25);

    let mut program = Program::new();
    let fetch = program.add(Declaration::function("fetch").always("async").returns("Bytes"));
    program.add(
        Declaration::function("main")
            .never("async")
            .body(vec![Stmt::expr(CallSite::new(fetch).forward("async").at(call_span))]),
    );
    let err = assert_rejected(&program, Phase::Check, "`main` (never `async`) cannot call `fetch` (always `async`)");
    assert_eq!(err.errors.len(), 1);

    match &err.errors[0].kind {
        EffectErrorKind::Rejected {
            modifier,
            caller,
            callee,
            caller_state,
            callee_state,
            reason,
        } => {
            assert_eq!(modifier, "async");
            assert_eq!(caller, "main");
            assert_eq!(callee, "fetch");
            assert_eq!(*caller_state, EffectState::Never);
            assert_eq!(*callee_state, EffectState::Always);
            assert_eq!(*reason, RejectReason::UnconditionalCallee);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.errors[0].fix.is_some());
    assert_eq!(err.errors[0].span, call_span);

    let emitter = DiagnosticEmitter::new("main.rs", source).without_color();
    let rendered = emitter.render(&err.diagnostics()[0]).unwrap();
    assert!(rendered.contains("E0405"), "{rendered}");
    assert!(rendered.contains("fetch"));
}

#[test]
fn test_token_in_plain_context_is_rejected() {
    let mut program = Program::new();
    let read = with_read(&mut program);
    program.add(
        Declaration::function("copy")
            .body(vec![Stmt::expr(CallSite::new(read).forward("async"))]),
    );
    let err = run(&program).unwrap_err();
    assert_eq!(err.phase, Phase::Check);
    assert!(matches!(
        err.errors[0].kind,
        EffectErrorKind::Rejected {
            reason: RejectReason::TokenOutsideContext,
            ..
        }
    ));
    assert!(matches!(
        err.errors[0].fix,
        Some(Fix::Widen {
            to: EffectState::Maybe,
            ..
        })
    ));
}

#[test]
fn test_maybe_context_cannot_call_always() {
    let mut program = Program::new();
    let fetch = program.add(Declaration::function("fetch").always("async"));
    program.add(
        Declaration::function("load")
            .maybe("async")
            .body(vec![Stmt::expr(CallSite::new(fetch).forward("async"))]),
    );
    assert_rejected(&program, Phase::Check, "cannot call `fetch`");
}

#[test]
fn test_async_block_allows_always_callee() {
    let mut program = Program::new();
    let fetch = program.add(Declaration::function("fetch").always("async"));
    program.add(Declaration::function("spawn").body(vec![Stmt::expr(Expr::modifier_block(
        "async",
        vec![Stmt::expr(CallSite::new(fetch).forward("async"))],
    ))]));
    assert_lowers(&program);
}

#[test]
fn test_registry_exclusion_survives_specialization() {
    let source = "maybe(async) maybe(try) fn op() -> u8;";
    let decl_span = LineIndex::new(source).span(0, source.len());

    let mut registry = EffectRegistry::standard();
    registry.register_exclusion(&["async", "try"]).unwrap();
    let mut program = Program::new();
    program.add(
        Declaration::function("op")
            .maybe("async")
            .maybe("try")
            .returns("u8")
            .at(decl_span),
    );
    let output = EffectPipeline::new(&registry).run(&program).unwrap();
    let op = output.lowered("op").unwrap();

    let async_only = op.specialize(&Assignment::new().flag("ASYNC", true).flag("TRY", false)).unwrap();
    assert_eq!(async_only.render(), "fn op() -> Future<u8>;\n");

    let err = op
        .specialize(&Assignment::new().flag("ASYNC", true).flag("TRY", true))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "`op` activates mutually exclusive modifiers `async` and `try`"
    );
    assert_eq!(err.span, decl_span);
    assert!(matches!(
        &err.fix,
        Some(Fix::Narrow { modifier, to: EffectState::Never, .. }) if modifier == "try"
    ));

    let emitter = DiagnosticEmitter::new("op.rs", source).without_color();
    let rendered = emitter.render(&err.to_diagnostic()).unwrap();
    assert!(rendered.contains("E0407"), "{rendered}");
}

// ============================================================
// Uncarried modifiers
// ============================================================

#[test]
fn test_const_context_rejects_runtime_callee() {
    let mut program = Program::new();
    let now = program.add(Declaration::function("now").returns("u64"));
    program.add(
        Declaration::function("seed")
            .always("const")
            .body(vec![Stmt::expr(CallSite::new(now))]),
    );
    assert_rejected(&program, Phase::Check, "`seed` (always `const`) cannot call `now`");
}

#[test]
fn test_const_context_instantiates_generic_callee() {
    let mut program = Program::new();
    let len = program.add(Declaration::function("len").maybe("const").returns("usize"));
    program.add(
        Declaration::function("size")
            .always("const")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(len))]),
    );
    program.add(
        Declaration::function("count")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(len))]),
    );
    let output = assert_lowers(&program);
    assert_eq!(
        output.lowered("size").unwrap().render(),
        "const fn size() -> usize {\n    return len::<true>();\n}\n"
    );
    assert_eq!(
        output.lowered("count").unwrap().render(),
        "fn count() -> usize {\n    return len::<false>();\n}\n"
    );
}

#[test]
fn test_generic_const_needs_explicit_forwarding() {
    let mut program = Program::new();
    let len = program.add(Declaration::function("len").maybe("const").returns("usize"));
    program.add(
        Declaration::function("size")
            .maybe("const")
            .body(vec![Stmt::ret(CallSite::new(len))]),
    );
    let err = assert_rejected(&program, Phase::Infer, "`const`");
    assert!(matches!(err.errors[0].kind, EffectErrorKind::Ambiguous { .. }));

    let mut program = Program::new();
    let len = program.add(Declaration::function("len").maybe("const").returns("usize"));
    program.add(Declaration::function("size").maybe("const").body(vec![Stmt::ret(
        CallSite::new(len).with_override("const", OverrideArg::Forward),
    )]));
    let output = assert_lowers(&program);
    assert!(output.lowered("size").unwrap().render().contains("len::<CONST>()"));
}

// ============================================================
// Traits
// ============================================================

#[test]
fn test_trait_methods_follow_trait_state() {
    let mut program = Program::new();
    let reader = program.add(Declaration::trait_decl("Read").maybe("async"));
    let read = program.add(Declaration::trait_method("read", reader).returns("usize"));
    let output = assert_lowers(&program);

    let registry = EffectRegistry::standard();
    let async_id = registry.id_of("async").unwrap();
    assert_eq!(output.table.state(read, async_id, &registry), Some(EffectState::Maybe));
    assert_eq!(
        output.lowered("Read").unwrap().render(),
        "trait Read<const ASYNC: bool>;\n"
    );
}

#[test]
fn test_trait_method_cannot_claim_more_than_trait() {
    let mut program = Program::new();
    let reader = program.add(Declaration::trait_decl("Read").never("async"));
    program.add(Declaration::trait_method("read", reader).always("async"));
    let err = run(&program).unwrap_err();
    assert_eq!(err.phase, Phase::Classify);
    assert!(matches!(err.errors[0].kind, EffectErrorKind::IllegalNarrowing { .. }));
}
