// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: Program and CompilationConfig must be set before calling
//   run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//   has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for
//   immediate display.

use std::time::Instant;

use crate::ast::Program;
use crate::diag::{DiagLevel, Diagnostic};
use crate::domains::DeviceDomains;
use crate::ir::Module;
use crate::pass::{descriptor, required_passes, PassId};
use crate::scope::CompilationConfig;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.tir` source text.
/// `config_fingerprint`: SHA-256 of canonical compact JSON from
/// `CompilationConfig::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub config_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the config fingerprint (64 characters).
    pub fn config_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.config_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"config_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.config_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from source text and config.
///
/// Uses SHA-256 for both hashes. The config fingerprint is computed from
/// `CompilationConfig::canonical_json()` (compact JSON, no whitespace) to
/// ensure stability independent of display formatting.
pub fn compute_provenance(source: &str, config: &CompilationConfig) -> Provenance {
    use sha2::{Digest, Sha256};

    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    let config_fingerprint = {
        let canonical = config.canonical_json();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        source_hash,
        config_fingerprint,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub config: CompilationConfig,
    pub program: Program,
    pub module: Option<Module>,
    pub normalized: Option<Module>,
    pub domains: Option<DeviceDomains>,
    pub planned: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program, config: CompilationConfig) -> Self {
        Self {
            config,
            program,
            module: None,
            normalized: None,
            domains: None,
            planned: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "dpc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1_000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal pass set for `terminal` over the state's program.
///
/// Stops at the first pass that produces error-level diagnostics; the
/// diagnostics stay in `state.diagnostics` either way.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::Resolve => {
                let t = Instant::now();
                let result = crate::resolve::resolve(&state.program, &state.config);
                let elapsed = t.elapsed();
                let diags = result.diagnostics;
                state.module = Some(result.module);
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
            PassId::TypeCheck => {
                let t = Instant::now();
                let module = state.module.as_mut().expect("internal: no resolved module");
                let diags = crate::types::check(module);
                let elapsed = t.elapsed();
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
            PassId::Normalize => {
                let t = Instant::now();
                let module = state.module.as_ref().expect("internal: no typed module");
                state.normalized = Some(crate::normalize::normalize(module));
                let elapsed = t.elapsed();
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Analyze => {
                let t = Instant::now();
                let module = state
                    .normalized
                    .as_ref()
                    .expect("internal: no normalized module");
                let (domains, diags) = match crate::analyze::analyze(module, &state.config) {
                    Ok(domains) => (Some(domains), Vec::new()),
                    Err(diag) => (None, vec![diag]),
                };
                let elapsed = t.elapsed();
                state.domains = domains;
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
            PassId::Default => {
                let t = Instant::now();
                let module = state
                    .normalized
                    .as_ref()
                    .expect("internal: no normalized module");
                let domains = state.domains.as_mut().expect("internal: no domain store");
                crate::defaults::default_domains(module, domains);
                let elapsed = t.elapsed();
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Capture => {
                let t = Instant::now();
                let module = state
                    .normalized
                    .as_ref()
                    .expect("internal: no normalized module");
                let domains = state.domains.as_mut().expect("internal: no domain store");
                state.planned = Some(crate::capture::capture(module, domains));
                let elapsed = t.elapsed();
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::test_config;
    use crate::parser;

    fn state_for(source: &str) -> CompilationState {
        let parsed = parser::parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        CompilationState::new(parsed.program.unwrap(), test_config())
    }

    #[test]
    fn full_pipeline_produces_planned_module() {
        let mut state = state_for(
            "def @main(%x: Tensor) -> Tensor { negative(on_device(exp(%x), scope=gpu)) }",
        );
        run_pipeline(&mut state, PassId::Capture, false, |_, _| {}).unwrap();
        assert!(state.planned.is_some());
        assert!(!state.has_error);
    }

    #[test]
    fn terminal_typecheck_skips_planner_passes() {
        let mut state = state_for("def @main(%x: Tensor) -> Tensor { %x }");
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::TypeCheck, false, |id, _| seen.push(id)).unwrap();
        assert_eq!(seen, vec![PassId::Resolve, PassId::TypeCheck]);
        assert!(state.planned.is_none());
    }

    #[test]
    fn analysis_failure_stops_the_pipeline() {
        let mut state = state_for(
            "def @main(%x: Tensor) -> Tensor {\n\
               let %a = on_device(exp(%x), scope=cpu);\n\
               on_device(%a, scope=gpu, fixed=true)\n\
             }",
        );
        let err = run_pipeline(&mut state, PassId::Capture, false, |_, _| {}).unwrap_err();
        assert_eq!(err.failing_pass, PassId::Analyze);
        assert!(state.has_error);
        assert!(state.planned.is_none());
    }

    #[test]
    fn provenance_is_stable() {
        let config = test_config();
        let a = compute_provenance("def @main() -> Tensor { 0 }", &config);
        let b = compute_provenance("def @main() -> Tensor { 0 }", &config);
        assert_eq!(a.source_hash_hex(), b.source_hash_hex());
        assert_eq!(a.config_fingerprint_hex(), b.config_fingerprint_hex());
        assert_eq!(a.source_hash_hex().len(), 64);
    }
}
