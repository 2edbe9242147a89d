// scope.rs — Execution scopes and the compilation configuration
//
// A Scope names where a value lives: a device kind, the target (backend)
// that compiles code for that kind, and a memory scope on the device. Any
// facet may be unknown while constraints are still being collected; the
// planner only ever emits fully-constrained, canonicalized scopes.
//
// Preconditions: none (types + pure functions).
// Postconditions: `canonical` output for a known device has all facets set.
// Failure modes: `join` returns None on facet conflicts; config validation
//   rejects host/default devices with no configured target.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Scope ───────────────────────────────────────────────────────────────────

/// An execution scope: device kind, target, and memory scope facets.
///
/// `None` means the facet is not yet constrained. Scopes are compared for
/// equality facet-wise; all comparisons after defaulting must go through
/// `CompilationConfig::canonical` first so that partially-spelled scopes
/// (e.g. `gpu` vs `gpu@global`) do not look different.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub device: Option<String>,
    pub target: Option<String>,
    pub memory: Option<String>,
}

impl Scope {
    /// The fully-unconstrained scope.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// A scope constrained to a device kind only.
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            target: None,
            memory: None,
        }
    }

    /// A scope constrained to a device kind and memory scope.
    pub fn with_memory(device: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            target: None,
            memory: Some(memory.into()),
        }
    }

    pub fn is_fully_unconstrained(&self) -> bool {
        self.device.is_none() && self.target.is_none() && self.memory.is_none()
    }

    pub fn is_fully_constrained(&self) -> bool {
        self.device.is_some() && self.target.is_some() && self.memory.is_some()
    }

    /// Facet-wise join. Each facet takes whichever side is known; returns
    /// None if both sides know a facet and disagree.
    pub fn join(&self, other: &Scope) -> Option<Scope> {
        Some(Scope {
            device: join_facet(&self.device, &other.device)?,
            target: join_facet(&self.target, &other.target)?,
            memory: join_facet(&self.memory, &other.memory)?,
        })
    }

    /// Fill unknown facets from `default`. Never fails; known facets win.
    pub fn defaulted_to(&self, default: &Scope) -> Scope {
        Scope {
            device: self.device.clone().or_else(|| default.device.clone()),
            target: self.target.clone().or_else(|| default.target.clone()),
            memory: self.memory.clone().or_else(|| default.memory.clone()),
        }
    }
}

fn join_facet(a: &Option<String>, b: &Option<String>) -> Option<Option<String>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => None,
        (Some(x), _) => Some(Some(x.clone())),
        (None, y) => Some(y.clone()),
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fully_unconstrained() {
            return write!(f, "?");
        }
        write!(f, "{}", self.device.as_deref().unwrap_or("?"))?;
        if let Some(target) = &self.target {
            write!(f, ":{}", target)?;
        }
        if let Some(memory) = &self.memory {
            write!(f, "@{}", memory)?;
        }
        Ok(())
    }
}

// ── Target ──────────────────────────────────────────────────────────────────

/// A configured backend for one device kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Device kind this target compiles for (e.g. `cpu`, `gpu`).
    pub device: String,
    /// Backend identifier (e.g. `llvm`, `cuda`).
    pub backend: String,
    /// Memory scope assumed when a scope does not spell one out.
    #[serde(default = "default_memory")]
    pub memory: String,
}

fn default_memory() -> String {
    "global".to_string()
}

impl Target {
    pub fn new(device: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            backend: backend.into(),
            memory: default_memory(),
        }
    }
}

// ── CompilationConfig ───────────────────────────────────────────────────────

/// Everything the planner needs to know about the compilation environment:
/// the ordered list of targets, the host device for shape computations, and
/// the default device for otherwise-unconstrained sub-expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationConfig {
    pub targets: Vec<Target>,
    /// Device kind that holds shapes and runs shape functions.
    pub host: String,
    /// Device kind assigned to sub-expressions no constraint reaches.
    pub default: String,
}

impl CompilationConfig {
    /// Build a config, checking that host and default name configured targets.
    pub fn new(
        targets: Vec<Target>,
        host: impl Into<String>,
        default: impl Into<String>,
    ) -> Result<Self, String> {
        let config = Self {
            targets,
            host: host.into(),
            default: default.into(),
        };
        for device in [&config.host, &config.default] {
            if config.target_for(device).is_none() {
                return Err(format!("no target configured for device '{}'", device));
            }
        }
        Ok(config)
    }

    /// Parse a config from its JSON form (the `--config` file).
    pub fn from_json(source: &str) -> Result<Self, String> {
        let config: CompilationConfig =
            serde_json::from_str(source).map_err(|e| format!("invalid config JSON: {}", e))?;
        CompilationConfig::new(config.targets, config.host, config.default)
    }

    /// Canonical compact JSON, used for the build provenance fingerprint.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("config serialization should not fail")
    }

    /// The first configured target for a device kind, if any.
    pub fn target_for(&self, device: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.device == device)
    }

    pub fn known_device(&self, device: &str) -> bool {
        self.target_for(device).is_some()
    }

    /// Canonical form of a scope: for a known device kind, the target and
    /// memory facets are filled in from the configured target. Scopes with
    /// an unknown device pass through unchanged.
    pub fn canonical(&self, scope: &Scope) -> Scope {
        let Some(device) = &scope.device else {
            return scope.clone();
        };
        let Some(target) = self.target_for(device) else {
            return scope.clone();
        };
        Scope {
            device: Some(device.clone()),
            target: Some(
                scope
                    .target
                    .clone()
                    .unwrap_or_else(|| target.backend.clone()),
            ),
            memory: Some(scope.memory.clone().unwrap_or_else(|| target.memory.clone())),
        }
    }

    /// Canonical equality. All scope comparisons after defaulting use this.
    pub fn scope_eq(&self, a: &Scope, b: &Scope) -> bool {
        self.canonical(a) == self.canonical(b)
    }

    /// The canonicalized host scope (shape computations live here).
    pub fn host_scope(&self) -> Scope {
        self.canonical(&Scope::for_device(self.host.clone()))
    }

    /// The canonicalized default scope for the Defaulter.
    pub fn default_scope(&self) -> Scope {
        self.canonical(&Scope::for_device(self.default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_gpu_config() -> CompilationConfig {
        CompilationConfig::new(
            vec![Target::new("cpu", "llvm"), Target::new("gpu", "cuda")],
            "cpu",
            "cpu",
        )
        .unwrap()
    }

    #[test]
    fn canonical_fills_target_and_memory() {
        let config = cpu_gpu_config();
        let canonical = config.canonical(&Scope::for_device("gpu"));
        assert_eq!(canonical.target.as_deref(), Some("cuda"));
        assert_eq!(canonical.memory.as_deref(), Some("global"));
        assert!(canonical.is_fully_constrained());
    }

    #[test]
    fn canonical_preserves_spelled_memory() {
        let config = cpu_gpu_config();
        let canonical = config.canonical(&Scope::with_memory("gpu", "texture"));
        assert_eq!(canonical.memory.as_deref(), Some("texture"));
    }

    #[test]
    fn scope_eq_sees_through_partial_spelling() {
        let config = cpu_gpu_config();
        assert!(config.scope_eq(
            &Scope::for_device("gpu"),
            &Scope::with_memory("gpu", "global")
        ));
        assert!(!config.scope_eq(&Scope::for_device("gpu"), &Scope::for_device("cpu")));
    }

    #[test]
    fn join_conflict() {
        let gpu = Scope::for_device("gpu");
        let cpu = Scope::for_device("cpu");
        assert!(gpu.join(&cpu).is_none());
        assert_eq!(gpu.join(&Scope::unconstrained()), Some(gpu.clone()));
    }

    #[test]
    fn join_merges_disjoint_facets() {
        let device_only = Scope::for_device("gpu");
        let memory_only = Scope {
            device: None,
            target: None,
            memory: Some("texture".to_string()),
        };
        let joined = device_only.join(&memory_only).unwrap();
        assert_eq!(joined.device.as_deref(), Some("gpu"));
        assert_eq!(joined.memory.as_deref(), Some("texture"));
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", Scope::unconstrained()), "?");
        assert_eq!(format!("{}", Scope::for_device("cpu")), "cpu");
        let config = cpu_gpu_config();
        assert_eq!(
            format!("{}", config.canonical(&Scope::for_device("gpu"))),
            "gpu:cuda@global"
        );
    }

    #[test]
    fn config_rejects_unknown_host() {
        let err = CompilationConfig::new(vec![Target::new("cpu", "llvm")], "gpu", "cpu");
        assert!(err.is_err());
    }

    #[test]
    fn config_json_round_trip() {
        let config = cpu_gpu_config();
        let reparsed = CompilationConfig::from_json(&config.canonical_json()).unwrap();
        assert_eq!(reparsed.canonical_json(), config.canonical_json());
    }
}
