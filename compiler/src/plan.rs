// plan.rs — The composite device-planning pass
//
// Runs the four planner phases in order over one module:
//
//   0. normalize — canonicalize on_device annotations
//   1. analyze   — collect the scope constraint system (may fail)
//   2. default   — fill still-free domains
//   3. capture   — rewrite the module, attach function scope attributes
//
// There is no partial success: either a fully annotated module comes back,
// or the diagnostics say why not. The composed pass is idempotent —
// planning a planned module is a no-op up to structural equality.
//
// Preconditions: resolved, type-checked module.
// Postconditions: see capture.rs.
// Failure modes: scope conflicts from the analyzer.
// Side effects: none (the input module is untouched).

use crate::analyze;
use crate::capture;
use crate::defaults;
use crate::diag::Diagnostic;
use crate::domains::DeviceDomains;
use crate::ir::Module;
use crate::normalize;
use crate::scope::CompilationConfig;

/// Result of planning: the rewritten module, or the diagnostics that
/// stopped it.
#[derive(Debug)]
pub struct PlanResult {
    pub planned: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Plan execution scopes for every sub-expression of the module.
pub fn plan(module: &Module, config: &CompilationConfig) -> PlanResult {
    let normalized = normalize::normalize(module);
    let mut domains: DeviceDomains = match analyze::analyze(&normalized, config) {
        Ok(domains) => domains,
        Err(diag) => {
            return PlanResult {
                planned: None,
                diagnostics: vec![diag],
            }
        }
    };
    defaults::default_domains(&normalized, &mut domains);
    let planned = capture::capture(&normalized, &mut domains);
    PlanResult {
        planned: Some(planned),
        diagnostics: Vec::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
