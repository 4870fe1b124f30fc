//! Snapshot tests for lowered code.
//!
//! Each test lowers a small program and compares the rendered host code
//! against an inline snapshot.

use effgenc::effects::{Assignment, EffectRegistry, LoweredDecl};
use effgenc::hir::{CallSite, Declaration, Expr, OverrideArg, Program, Stmt};
use effgenc::EffectPipeline;

/// Helper to lower a program and return one declaration.
fn lower(program: &Program, registry: &EffectRegistry, name: &str) -> LoweredDecl {
    let output = match EffectPipeline::new(registry).run(program) {
        Ok(output) => output,
        Err(err) => panic!("{} failed: {:?}", err.phase, err.errors),
    };
    match output.lowered(name) {
        Some(decl) => decl.clone(),
        None => panic!("`{name}` was not lowered"),
    }
}

/// `copy` over generic `read` and `write`, in the given async state.
fn copy_program(state: &str) -> Program {
    let mut program = Program::new();
    let read = program.add(
        Declaration::function("read")
            .maybe("async")
            .param("r", "Reader")
            .returns("usize"),
    );
    let write = program.add(
        Declaration::function("write")
            .maybe("async")
            .param("w", "Writer")
            .param("n", "usize"),
    );
    let tokens = state != "never";
    let forward = |site: CallSite| if tokens { site.forward("async") } else { site };
    let copy = Declaration::function("copy")
        .param("r", "Reader")
        .param("w", "Writer")
        .returns("usize")
        .body(vec![
            Stmt::let_("n", forward(CallSite::new(read).arg(Expr::path("r")))),
            Stmt::expr(forward(CallSite::new(write).arg(Expr::path("w")).arg(Expr::path("n")))),
            Stmt::ret(Expr::path("n")),
        ]);
    program.add(match state {
        "maybe" => copy.maybe("async"),
        "always" => copy.always("async"),
        _ => copy.never("async"),
    });
    program
}

#[test]
fn test_generic_copy() {
    let registry = EffectRegistry::standard();
    let copy = lower(&copy_program("maybe"), &registry, "copy");
    insta::assert_snapshot!(copy.render(), @r"
fn copy<const ASYNC: bool>(r: Reader, w: Writer) -> <usize as Lift<ASYNC: Future>>::Output {
    let n = (read::<ASYNC>(r).await if ASYNC);
    (write::<ASYNC>(w, n).await if ASYNC);
    return n;
}
");
}

#[test]
fn test_specialized_copy_matches_hand_written_versions() {
    let registry = EffectRegistry::standard();
    let generic = lower(&copy_program("maybe"), &registry, "copy");

    let off = generic.specialize(&Assignment::all_off(&generic)).unwrap();
    let never = lower(&copy_program("never"), &registry, "copy");
    assert_eq!(off.render(), never.render());
    insta::assert_snapshot!(off.render(), @r"
fn copy(r: Reader, w: Writer) -> usize {
    let n = read::<false>(r);
    write::<false>(w, n);
    return n;
}
");

    let on = generic.specialize(&Assignment::new().flag("ASYNC", true)).unwrap();
    let always = lower(&copy_program("always"), &registry, "copy");
    assert_eq!(on.render(), always.render());
    insta::assert_snapshot!(on.render(), @r"
fn copy(r: Reader, w: Writer) -> Future<usize> {
    let n = read::<true>(r).await;
    write::<true>(w, n).await;
    return n;
}
");
}

#[test]
fn test_async_and_try_together() {
    let registry = EffectRegistry::standard();
    let mut program = Program::new();
    let open = program.add(
        Declaration::function("open")
            .maybe("async")
            .maybe("try")
            .param("path", "Path")
            .returns("File"),
    );
    program.add(
        Declaration::function("load")
            .maybe("async")
            .always("try")
            .param("path", "Path")
            .returns("File")
            .body(vec![Stmt::ret(
                CallSite::new(open)
                    .arg(Expr::path("path"))
                    .forward("async")
                    .forward("try"),
            )]),
    );
    let load = lower(&program, &registry, "load");
    insta::assert_snapshot!(load.render(), @r"
fn load<const ASYNC: bool>(path: Path) -> <File as Lift<ASYNC: Future, true: Fallible>>::Output {
    return (open::<ASYNC, true>(path).await if ASYNC)?;
}
");
}

#[test]
fn test_const_forwarding() {
    let registry = EffectRegistry::standard();
    let mut program = Program::new();
    let len = program.add(Declaration::function("len").maybe("const").param("s", "Str").returns("usize"));
    program.add(
        Declaration::function("is_empty")
            .maybe("const")
            .param("s", "Str")
            .returns("bool")
            .body(vec![Stmt::ret(
                CallSite::new(len)
                    .arg(Expr::path("s"))
                    .with_override("const", OverrideArg::Forward),
            )]),
    );
    let is_empty = lower(&program, &registry, "is_empty");
    insta::assert_snapshot!(is_empty.render(), @r"
fn is_empty<const CONST: bool>(s: Str) -> bool {
    return len::<CONST>(s);
}
");
    let on = is_empty.specialize(&Assignment::new().flag("CONST", true)).unwrap();
    insta::assert_snapshot!(on.render(), @r"
const fn is_empty(s: Str) -> bool {
    return len::<true>(s);
}
");
}
