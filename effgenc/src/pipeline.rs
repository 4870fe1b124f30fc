//! Phase driver.
//!
//! Runs classification, checking, inference and lowering over one program,
//! in that order, stopping after the first phase that reports errors.

use crate::diagnostics::Diagnostic;
use crate::effects::{
    check_program, classify, infer_program, lower_program, ArtifactMetadata, EffectError, EffectRegistry,
    LoweredDecl, ResolutionTable, StateTable,
};
use crate::hir::Program;

/// The phase an error was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Classify,
    Check,
    Infer,
    Lower,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Classify => "classify",
            Phase::Check => "check",
            Phase::Infer => "infer",
            Phase::Lower => "lower",
        };
        f.write_str(name)
    }
}

/// Errors of the phase that stopped the pipeline.
#[derive(Debug)]
pub struct PipelineError {
    pub phase: Phase,
    pub errors: Vec<EffectError>,
}

impl PipelineError {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors.iter().map(EffectError::to_diagnostic).collect()
    }
}

/// Everything the pipeline produces for a well-formed program.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: StateTable,
    pub resolutions: ResolutionTable,
    pub lowered: Vec<LoweredDecl>,
}

impl PipelineOutput {
    pub fn lowered(&self, name: &str) -> Option<&LoweredDecl> {
        self.lowered.iter().find(|l| l.name == name)
    }

    /// Effect metadata of this unit for downstream consumers.
    pub fn export(&self, unit: &str, program: &Program, registry: &EffectRegistry) -> ArtifactMetadata {
        ArtifactMetadata::export(unit, program, &self.table, registry)
    }
}

/// Drives the effect phases with one registry.
pub struct EffectPipeline<'a> {
    registry: &'a EffectRegistry,
}

impl<'a> EffectPipeline<'a> {
    pub fn new(registry: &'a EffectRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EffectRegistry {
        self.registry
    }

    pub fn run(&self, program: &Program) -> Result<PipelineOutput, PipelineError> {
        let registry = self.registry;

        let table = {
            let _span = tracing::info_span!("classify", items = program.len()).entered();
            classify(program, registry).map_err(|errors| stop(Phase::Classify, errors))?
        };

        {
            let _span = tracing::info_span!("check").entered();
            check_program(program, registry, &table).map_err(|errors| stop(Phase::Check, errors))?;
        }

        let resolutions = {
            let _span = tracing::info_span!("infer").entered();
            infer_program(program, registry, &table).map_err(|errors| stop(Phase::Infer, errors))?
        };

        let lowered = {
            let _span = tracing::info_span!("lower").entered();
            lower_program(program, registry, &table, &resolutions).map_err(|errors| stop(Phase::Lower, errors))?
        };

        tracing::info!(decls = lowered.len(), "effect pipeline finished");
        Ok(PipelineOutput {
            table,
            resolutions,
            lowered,
        })
    }
}

fn stop(phase: Phase, errors: Vec<EffectError>) -> PipelineError {
    tracing::info!(%phase, errors = errors.len(), "effect pipeline stopped");
    PipelineError { phase, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{CallSite, Declaration, Stmt};

    #[test]
    fn test_stops_at_check() {
        let registry = EffectRegistry::standard();
        let mut program = Program::new();
        let fetch = program.add(Declaration::function("fetch").always("async"));
        program.add(
            Declaration::function("main")
                .never("async")
                .body(vec![Stmt::expr(CallSite::new(fetch).forward("async"))]),
        );
        let err = EffectPipeline::new(&registry).run(&program).unwrap_err();
        assert_eq!(err.phase, Phase::Check);
        assert_eq!(err.diagnostics().len(), err.errors.len());
    }

    #[test]
    fn test_stops_at_classify() {
        let registry = EffectRegistry::standard();
        let mut program = Program::new();
        program.add(Declaration::function("f").maybe("gen"));
        let err = EffectPipeline::new(&registry).run(&program).unwrap_err();
        assert_eq!(err.phase, Phase::Classify);
    }

    #[test]
    fn test_runs_all_phases() {
        let registry = EffectRegistry::standard();
        let mut program = Program::new();
        let read = program.add(Declaration::function("read").maybe("async"));
        program.add(
            Declaration::function("copy")
                .maybe("async")
                .body(vec![Stmt::expr(CallSite::new(read).forward("async"))]),
        );
        let output = EffectPipeline::new(&registry).run(&program).unwrap();
        assert_eq!(output.lowered.len(), 2);
        assert_eq!(output.resolutions.len(), registry.len());
        assert!(output.lowered("copy").is_some());
        assert_eq!(output.export("io", &program, &registry).exports.len(), 2);
    }
}
