// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's 6 semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the
// pipeline runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    TypeCheck,
    Normalize,
    Analyze,
    Default,
    Capture,
}

/// Machine-readable artifact identifiers. Each maps to a concrete field
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Module,     // ir::Module (resolved)
    Typed,      // checked types backfilled into Module
    Normalized, // ir::Module (Phase 0 output)
    Domains,    // domains::DeviceDomains
    Planned,    // ir::Module (Phase 3 output)
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Module],
            invariants: "all names resolved, variable occurrences interned",
        },
        PassId::TypeCheck => PassDescriptor {
            name: "typecheck",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Typed],
            invariants: "every node has a checked type; Fn arities verified",
        },
        PassId::Normalize => PassDescriptor {
            name: "normalize",
            inputs: &[PassId::TypeCheck],
            outputs: &[ArtifactId::Normalized],
            invariants: "let/fn-body annotations fixed, projections pushed",
        },
        PassId::Analyze => PassDescriptor {
            name: "analyze",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Domains],
            invariants: "constraint system collected, calls unified",
        },
        PassId::Default => PassDescriptor {
            name: "default",
            inputs: &[PassId::Analyze],
            outputs: &[],
            invariants: "every reachable domain fully constrained",
        },
        PassId::Capture => PassDescriptor {
            name: "capture",
            inputs: &[PassId::Default],
            outputs: &[ArtifactId::Planned],
            invariants: "scopes lexically recoverable, copies at transitions",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 6 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Resolve,
    PassId::TypeCheck,
    PassId::Normalize,
    PassId::Analyze,
    PassId::Default,
    PassId::Capture,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
