//! Cross-unit tests: effect metadata written by one unit and consumed by
//! another, and registries loaded from manifest files.

use std::fs;

use effgenc::effects::{
    ArtifactMetadata, EffectErrorKind, EffectRegistry, EffectState, MetadataError, RegistryManifest,
};
use effgenc::hir::{CallSite, Declaration, Expr, Program, Stmt};
use effgenc::{EffectPipeline, Phase};
use tempfile::TempDir;

/// The upstream `io` unit.
fn io_unit(read_state: &str) -> Program {
    let mut program = Program::new();
    let read = Declaration::function("read").param("r", "Reader").returns("usize");
    program.add(match read_state {
        "maybe" => read.maybe("async"),
        "always" => read.always("async"),
        _ => read,
    });
    program.add(Declaration::function("fetch").always("async").returns("Bytes"));
    program.add(Declaration::function("len").maybe("const").returns("usize"));
    program
}

fn export(program: &Program, registry: &EffectRegistry) -> ArtifactMetadata {
    let output = EffectPipeline::new(registry).run(program).unwrap();
    output.export("io", program, registry)
}

#[test]
fn test_metadata_round_trip_through_file() {
    let registry = EffectRegistry::standard();
    let metadata = export(&io_unit("maybe"), &registry);
    assert_eq!(metadata.find("io::read").unwrap().effects, "async=maybe,const=unknown,try=unknown");

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("target").join("io.effects.json");
    metadata.write_to(&path).unwrap();
    let loaded = ArtifactMetadata::read_from(&path).unwrap();
    assert_eq!(loaded, metadata);
}

#[test]
fn test_downstream_unit_calls_imported_declarations() {
    let registry = EffectRegistry::standard();
    let metadata = export(&io_unit("maybe"), &registry);

    let mut program = Program::new();
    let ids = metadata.import(&mut program);
    let read = ids["io::read"];
    let len = ids["io::len"];
    program.add(
        Declaration::function("copy")
            .always("async")
            .param("r", "Reader")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(read).arg(Expr::path("r")).forward("async"))]),
    );
    program.add(
        Declaration::function("size")
            .always("const")
            .returns("usize")
            .body(vec![Stmt::ret(CallSite::new(len))]),
    );

    let output = EffectPipeline::new(&registry).run(&program).unwrap();
    assert_eq!(output.lowered.len(), 2);
    assert!(output
        .lowered("copy")
        .unwrap()
        .render()
        .contains("return io::read::<true>(r).await;"));
    assert!(output.lowered("size").unwrap().render().contains("io::len::<true>()"));

    let async_id = registry.id_of("async").unwrap();
    assert_eq!(output.table.state(read, async_id, &registry), Some(EffectState::Maybe));
}

#[test]
fn test_downstream_rejection_against_imported_declaration() {
    let registry = EffectRegistry::standard();
    let metadata = export(&io_unit("maybe"), &registry);

    let mut program = Program::new();
    let ids = metadata.import(&mut program);
    program.add(
        Declaration::function("main")
            .never("async")
            .body(vec![Stmt::expr(CallSite::new(ids["io::fetch"]).forward("async"))]),
    );
    let err = EffectPipeline::new(&registry).run(&program).unwrap_err();
    assert_eq!(err.phase, Phase::Check);
    assert!(err.errors[0].to_string().contains("`io::fetch`"));
}

#[test]
fn test_revision_compatibility() {
    let registry = EffectRegistry::standard();
    let unannotated = export(&io_unit("unknown"), &registry);
    let widened = export(&io_unit("maybe"), &registry);
    let committed = export(&io_unit("always"), &registry);

    assert!(unannotated.check_revision(&widened, &registry).is_empty());

    let errors = widened.check_revision(&committed, &registry);
    assert_eq!(errors.len(), 1);
    match &errors[0].kind {
        EffectErrorKind::IncompatibleRevision { decl, modifier, from, to } => {
            assert_eq!(decl, "io::read");
            assert_eq!(modifier, "async");
            assert_eq!(*from, EffectState::Maybe);
            assert_eq!(*to, EffectState::Always);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_unsupported_metadata_version() {
    let registry = EffectRegistry::standard();
    let mut metadata = export(&io_unit("maybe"), &registry);
    metadata.version += 1;
    let json = metadata.to_json().unwrap();
    assert!(matches!(
        ArtifactMetadata::from_json(&json),
        Err(MetadataError::VersionMismatch { .. })
    ));
}

#[test]
fn test_registry_from_manifest_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("effects.toml");
    fs::write(
        &path,
        r#"
[[modifier]]
name = "async"
carried = true
forwarding-token = ".await"
wrapper = "Future"

[[modifier]]
name = "gen"
carried = true
default = "on-optional"

[[modifier]]
name = "const"
direction = "subset"

[[exclusive]]
modifiers = ["async", "gen"]
"#,
    )
    .unwrap();

    let registry = RegistryManifest::from_path(&path).unwrap().build().unwrap();
    assert_eq!(registry.len(), 3);
    let gen = registry.id_of("gen").unwrap();
    assert_eq!(registry.default_state(gen), EffectState::Maybe);
    assert!(registry.mutually_exclusive(registry.id_of("async").unwrap(), gen));

    let mut program = Program::new();
    let items = program.add(Declaration::function("items").returns("u8"));
    let output = EffectPipeline::new(&registry).run(&program).unwrap();
    assert_eq!(output.table.state(items, gen, &registry), Some(EffectState::Maybe));
    assert_eq!(
        output.lowered("items").unwrap().render(),
        "fn items<const GEN: bool>() -> <u8 as Lift<GEN: GenOf>>::Output;\n"
    );
}
