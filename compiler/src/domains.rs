// domains.rs — Device domain store: union-find over execution scopes
//
// The single store shared by the analyze/default/capture phases. A domain
// stands for the scope of one value: first-order domains carry a (possibly
// partial) scope, higher-order domains mirror a function type with one
// domain per parameter plus a result domain. Unification merges domains;
// conflicts between two constrained scopes are the planner's only
// user-facing failure.
//
// Preconditions: expressions come from one module with checked types.
// Postconditions: after defaulting, every reachable leaf is fully
//   constrained (callers enforce via `is_fully_constrained`).
// Failure modes: `UnifyError` when two constrained scopes disagree.
//   Arity mismatches between higher-order domains panic — the type
//   propagation pass rules them out, so they indicate a planner bug.
// Side effects: none outside the store.

use std::collections::HashMap;

use crate::id::{DomainId, ExprId, TypeId};
use crate::ir::{Arena, CallAttrs, ExprKind, Type};
use crate::ops::{self, ArgPlacement, OpDialect, ResultPlacement};
use crate::scope::{CompilationConfig, Scope};

/// Two constrained scopes refused to merge. The analyzer wraps this into a
/// diagnostic carrying both domain dumps and the offending expression.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifyError {
    pub lhs: Scope,
    pub rhs: Scope,
}

#[derive(Debug, Clone)]
enum Payload {
    FirstOrder(Scope),
    HigherOrder {
        params: Vec<DomainId>,
        result: DomainId,
    },
}

#[derive(Debug, Clone)]
enum Node {
    Link(DomainId),
    Root { payload: Payload, rank: u32 },
}

/// The unification store. Owns the compilation config so phase artifacts can
/// be held side by side without borrow gymnastics.
#[derive(Debug)]
pub struct DeviceDomains {
    config: CompilationConfig,
    nodes: Vec<Node>,
    expr_domains: HashMap<ExprId, DomainId>,
    /// Callee domains are cached per call site so the analyzer, defaulter,
    /// and capturer all see the same domain for one call.
    callee_domains: HashMap<ExprId, DomainId>,
}

impl DeviceDomains {
    pub fn new(config: &CompilationConfig) -> Self {
        Self {
            config: config.clone(),
            nodes: Vec::new(),
            expr_domains: HashMap::new(),
            callee_domains: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CompilationConfig {
        &self.config
    }

    // ── Allocation ──────────────────────────────────────────────────────────

    pub fn fresh_first_order(&mut self, scope: Scope) -> DomainId {
        let id = DomainId(self.nodes.len() as u32);
        self.nodes.push(Node::Root {
            payload: Payload::FirstOrder(scope),
            rank: 0,
        });
        id
    }

    pub fn make_higher_order(&mut self, params: Vec<DomainId>, result: DomainId) -> DomainId {
        let id = DomainId(self.nodes.len() as u32);
        self.nodes.push(Node::Root {
            payload: Payload::HigherOrder { params, result },
            rank: 0,
        });
        id
    }

    /// A fresh domain matching `ty`: a higher-order skeleton for function
    /// types, a first-order unconstrained domain otherwise.
    pub fn for_type(&mut self, arena: &Arena, ty: TypeId) -> DomainId {
        match arena.ty(ty).clone() {
            Type::Fn { params, ret } => {
                let param_domains = params.iter().map(|p| self.for_type(arena, *p)).collect();
                let result = self.for_type(arena, ret);
                self.make_higher_order(param_domains, result)
            }
            _ => self.fresh_first_order(Scope::unconstrained()),
        }
    }

    /// A fresh domain matching `ty` whose every first-order leaf is
    /// pre-constrained to `scope`.
    pub fn for_scope(&mut self, arena: &Arena, ty: TypeId, scope: &Scope) -> DomainId {
        let canonical = self.config.canonical(scope);
        match arena.ty(ty).clone() {
            Type::Fn { params, ret } => {
                let param_domains = params
                    .iter()
                    .map(|p| self.for_scope(arena, *p, scope))
                    .collect();
                let result = self.for_scope(arena, ret, scope);
                self.make_higher_order(param_domains, result)
            }
            _ => self.fresh_first_order(canonical),
        }
    }

    /// The domain bound to `expr`, allocating on first use.
    pub fn domain_for(&mut self, arena: &Arena, expr: ExprId) -> DomainId {
        if let Some(&d) = self.expr_domains.get(&expr) {
            return d;
        }
        let d = self.for_type(arena, arena.ty_of(expr));
        self.expr_domains.insert(expr, d);
        d
    }

    /// The domain already bound to `expr`, if any. The capturer uses this —
    /// by capture time every expression must have been analyzed.
    pub fn lookup_expr(&self, expr: ExprId) -> Option<DomainId> {
        self.expr_domains.get(&expr).copied()
    }

    /// The higher-order domain for the callee of `call`.
    ///
    /// Primitives and constructors are device-polymorphic: each call site
    /// gets its own domain, shaped by the operator table. The annotation
    /// dialects pin argument/result domains from their call attributes.
    /// Any other callee shares the domain of the callee expression.
    pub fn domain_for_callee(&mut self, arena: &Arena, call: ExprId) -> DomainId {
        if let Some(&d) = self.callee_domains.get(&call) {
            return d;
        }
        let ExprKind::Call { op, args, attrs } = arena.kind(call) else {
            panic!("internal: domain_for_callee on a non-call expression");
        };
        let (op, args, attrs) = (*op, args.clone(), attrs.clone());
        let d = match arena.kind(op) {
            ExprKind::OpRef(op_id) => {
                let def = ops::def(*op_id);
                match def.dialect {
                    OpDialect::OnDevice => {
                        let CallAttrs::OnDevice(props) = &attrs else {
                            panic!("internal: on_device call without annotation attributes");
                        };
                        let scope = self.config.canonical(&props.scope);
                        let arg = self.fresh_first_order(scope);
                        let result = if props.is_fixed {
                            arg
                        } else {
                            self.fresh_first_order(Scope::unconstrained())
                        };
                        self.make_higher_order(vec![arg], result)
                    }
                    OpDialect::DeviceCopy => {
                        let CallAttrs::DeviceCopy(props) = &attrs else {
                            panic!("internal: device_copy call without copy attributes");
                        };
                        let src = self.config.canonical(&props.src);
                        let dst = self.config.canonical(&props.dst);
                        let arg = self.fresh_first_order(src);
                        let result = self.fresh_first_order(dst);
                        self.make_higher_order(vec![arg], result)
                    }
                    OpDialect::Plain => match def.placement {
                        Some(shape) => {
                            let host = self.config.host_scope();
                            let result = match shape.result {
                                ResultPlacement::Free => {
                                    self.fresh_first_order(Scope::unconstrained())
                                }
                                ResultPlacement::Host => self.fresh_first_order(host.clone()),
                            };
                            let params = shape
                                .args
                                .iter()
                                .map(|placement| match placement {
                                    ArgPlacement::Free => {
                                        self.fresh_first_order(Scope::unconstrained())
                                    }
                                    ArgPlacement::Host => self.fresh_first_order(host.clone()),
                                    ArgPlacement::Result => result,
                                })
                                .collect();
                            self.make_higher_order(params, result)
                        }
                        // Homogeneous primitive: arguments and result share
                        // one scope, chosen per call site.
                        None => {
                            let shared = self.fresh_first_order(Scope::unconstrained());
                            self.make_higher_order(vec![shared; args.len()], shared)
                        }
                    },
                }
            }
            // Constructors are polymorphic and homogeneous, like primitives.
            ExprKind::CtorRef(_) => {
                let shared = self.fresh_first_order(Scope::unconstrained());
                self.make_higher_order(vec![shared; args.len()], shared)
            }
            _ => self.domain_for(arena, op),
        };
        self.callee_domains.insert(call, d);
        d
    }

    // ── Union-find ──────────────────────────────────────────────────────────

    pub fn find(&mut self, mut id: DomainId) -> DomainId {
        loop {
            let parent = match &self.nodes[id.0 as usize] {
                Node::Root { .. } => return id,
                Node::Link(parent) => *parent,
            };
            // Path halving.
            let grandparent = match &self.nodes[parent.0 as usize] {
                Node::Link(grandparent) => Some(*grandparent),
                Node::Root { .. } => None,
            };
            if let Some(grandparent) = grandparent {
                self.nodes[id.0 as usize] = Node::Link(grandparent);
            }
            id = parent;
        }
    }

    fn payload(&mut self, id: DomainId) -> Payload {
        let root = self.find(id);
        match &self.nodes[root.0 as usize] {
            Node::Root { payload, .. } => payload.clone(),
            Node::Link(_) => unreachable!(),
        }
    }

    fn rank(&self, root: DomainId) -> u32 {
        match &self.nodes[root.0 as usize] {
            Node::Root { rank, .. } => *rank,
            Node::Link(_) => unreachable!(),
        }
    }

    /// Link `loser` under `winner` (both roots), giving `winner` the payload.
    fn link(&mut self, winner: DomainId, loser: DomainId, payload: Payload) {
        let winner_rank = self.rank(winner);
        let loser_rank = self.rank(loser);
        let rank = if winner_rank == loser_rank {
            winner_rank + 1
        } else {
            winner_rank.max(loser_rank)
        };
        self.nodes[loser.0 as usize] = Node::Link(winner);
        self.nodes[winner.0 as usize] = Node::Root { payload, rank };
    }

    /// Structural unification. First-order scopes join facet-wise;
    /// higher-order domains unify position-wise. A first-order domain
    /// unifying with a higher-order one collapses the higher-order side
    /// (a function value flowing into a position that erases its shape).
    pub fn unify(&mut self, a: DomainId, b: DomainId) -> Result<DomainId, UnifyError> {
        let a = self.find(a);
        let b = self.find(b);
        if a == b {
            return Ok(a);
        }
        match (self.payload(a), self.payload(b)) {
            (Payload::FirstOrder(scope_a), Payload::FirstOrder(scope_b)) => {
                let joined = scope_a.join(&scope_b).ok_or(UnifyError {
                    lhs: scope_a.clone(),
                    rhs: scope_b.clone(),
                })?;
                let joined = self.config.canonical(&joined);
                let (winner, loser) = if self.rank(a) >= self.rank(b) {
                    (a, b)
                } else {
                    (b, a)
                };
                self.link(winner, loser, Payload::FirstOrder(joined));
                Ok(winner)
            }
            (
                Payload::HigherOrder {
                    params: params_a,
                    result: result_a,
                },
                Payload::HigherOrder {
                    params: params_b,
                    result: result_b,
                },
            ) => {
                assert_eq!(
                    params_a.len(),
                    params_b.len(),
                    "internal: unifying higher-order domains of different arity"
                );
                // Link first so the recursive unifications see one root.
                let (winner, loser) = if self.rank(a) >= self.rank(b) {
                    (a, b)
                } else {
                    (b, a)
                };
                let payload = Payload::HigherOrder {
                    params: params_a.clone(),
                    result: result_a,
                };
                self.link(winner, loser, payload);
                for (pa, pb) in params_a.iter().zip(&params_b) {
                    self.unify(*pa, *pb)?;
                }
                self.unify(result_a, result_b)?;
                Ok(self.find(winner))
            }
            (Payload::FirstOrder(_), Payload::HigherOrder { .. }) => {
                let collapsed = self.collapse(b)?;
                self.unify(a, collapsed)
            }
            (Payload::HigherOrder { .. }, Payload::FirstOrder(_)) => {
                let collapsed = self.collapse(a)?;
                self.unify(collapsed, b)
            }
        }
    }

    /// Try to unify; None instead of an error.
    pub fn unify_or_null(&mut self, a: DomainId, b: DomainId) -> Option<DomainId> {
        self.unify(a, b).ok()
    }

    /// Flatten a domain to a single first-order variable: every parameter
    /// and result leaf is unified into one shared scope. Used at positions
    /// that erase function identity (tuples, refs, ADTs, branch conditions).
    pub fn collapse(&mut self, d: DomainId) -> Result<DomainId, UnifyError> {
        match self.payload(d) {
            Payload::FirstOrder(_) => Ok(self.find(d)),
            Payload::HigherOrder { .. } => {
                let shared = self.fresh_first_order(Scope::unconstrained());
                self.collapse_into(d, shared)?;
                Ok(self.find(shared))
            }
        }
    }

    fn collapse_into(&mut self, d: DomainId, shared: DomainId) -> Result<(), UnifyError> {
        match self.payload(d) {
            Payload::FirstOrder(_) => {
                self.unify(d, shared)?;
                Ok(())
            }
            Payload::HigherOrder { params, result } => {
                for p in params {
                    self.collapse_into(p, shared)?;
                }
                self.collapse_into(result, shared)
            }
        }
    }

    /// Unify the domains of two expressions structurally.
    pub fn unify_exprs_exact(
        &mut self,
        arena: &Arena,
        a: ExprId,
        b: ExprId,
    ) -> Result<(), UnifyError> {
        let da = self.domain_for(arena, a);
        let db = self.domain_for(arena, b);
        self.unify(da, db).map(|_| ())
    }

    /// Unify the domains of two expressions, collapsing either side's
    /// higher-order structure first.
    pub fn unify_exprs_collapsed(
        &mut self,
        arena: &Arena,
        a: ExprId,
        b: ExprId,
    ) -> Result<(), UnifyError> {
        let da = self.domain_for(arena, a);
        let db = self.domain_for(arena, b);
        self.unify_collapsed(da, db).map(|_| ())
    }

    /// Domain-level collapsed unification.
    pub fn unify_collapsed(&mut self, a: DomainId, b: DomainId) -> Result<DomainId, UnifyError> {
        let a = self.collapse(a)?;
        let b = self.collapse(b)?;
        self.unify(a, b)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Arity of a higher-order domain.
    pub fn arity(&mut self, d: DomainId) -> usize {
        match self.payload(d) {
            Payload::HigherOrder { params, .. } => params.len(),
            Payload::FirstOrder(_) => {
                panic!("internal: arity of a first-order domain")
            }
        }
    }

    /// The i-th parameter domain of a higher-order domain.
    pub fn param(&mut self, d: DomainId, i: usize) -> DomainId {
        match self.payload(d) {
            Payload::HigherOrder { params, .. } => params[i],
            Payload::FirstOrder(_) => {
                panic!("internal: parameter of a first-order domain")
            }
        }
    }

    /// The result domain of a higher-order domain.
    pub fn result(&mut self, d: DomainId) -> DomainId {
        match self.payload(d) {
            Payload::HigherOrder { result, .. } => result,
            Payload::FirstOrder(_) => {
                panic!("internal: result of a first-order domain")
            }
        }
    }

    pub fn is_higher_order(&mut self, d: DomainId) -> bool {
        matches!(self.payload(d), Payload::HigherOrder { .. })
    }

    /// The scope of the result leaf, descending through higher-order
    /// domains along the result position.
    pub fn result_scope(&mut self, d: DomainId) -> Scope {
        match self.payload(d) {
            Payload::FirstOrder(scope) => scope,
            Payload::HigherOrder { result, .. } => self.result_scope(result),
        }
    }

    /// True iff every leaf's scope canonicalizes to a fully-constrained one.
    pub fn is_fully_constrained(&mut self, d: DomainId) -> bool {
        match self.payload(d) {
            Payload::FirstOrder(scope) => {
                self.config.canonical(&scope).is_fully_constrained()
            }
            Payload::HigherOrder { params, result } => {
                params.into_iter().all(|p| self.is_fully_constrained(p))
                    && self.is_fully_constrained(result)
            }
        }
    }

    // ── Defaulting ──────────────────────────────────────────────────────────

    /// Fill every unconstrained facet of every leaf from `default`.
    pub fn set_default(&mut self, d: DomainId, default: &Scope) {
        match self.payload(d) {
            Payload::FirstOrder(scope) => {
                // Canonicalize first: a device-known leaf must take its own
                // target's facets, never the default scope's.
                let filled = self
                    .config
                    .canonical(&self.config.canonical(&scope).defaulted_to(default));
                let root = self.find(d);
                let rank = self.rank(root);
                self.nodes[root.0 as usize] = Node::Root {
                    payload: Payload::FirstOrder(filled),
                    rank,
                };
            }
            Payload::HigherOrder { params, result } => {
                for p in params {
                    self.set_default(p, default);
                }
                self.set_default(result, default);
            }
        }
    }

    /// Default the result position first, then pull each parameter toward
    /// the now-fixed result scope. This is what propagates a function's
    /// result scope out to its parameters.
    pub fn set_result_default_then_params(&mut self, d: DomainId, default: &Scope) {
        match self.payload(d) {
            Payload::FirstOrder(_) => self.set_default(d, default),
            Payload::HigherOrder { params, result } => {
                self.set_result_default_then_params(result, default);
                let result_scope = self.result_scope(result);
                for p in params {
                    self.set_default(p, &result_scope);
                }
            }
        }
    }

    // ── Rendering ───────────────────────────────────────────────────────────

    /// Human-readable dump, e.g. `fn(cpu:llvm@global, ?) -> gpu:cuda@global`.
    pub fn describe(&mut self, d: DomainId) -> String {
        match self.payload(d) {
            Payload::FirstOrder(scope) => scope.to_string(),
            Payload::HigherOrder { params, result } => {
                let params: Vec<String> = params.into_iter().map(|p| self.describe(p)).collect();
                format!("fn({}) -> {}", params.join(", "), self.describe(result))
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) fn test_config() -> CompilationConfig {
    use crate::scope::Target;
    CompilationConfig::new(
        vec![Target::new("cpu", "llvm"), Target::new("gpu", "cuda")],
        "cpu",
        "cpu",
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DeviceDomains {
        DeviceDomains::new(&test_config())
    }

    fn gpu() -> Scope {
        Scope::for_device("gpu")
    }

    fn cpu() -> Scope {
        Scope::for_device("cpu")
    }

    #[test]
    fn unify_free_with_constrained() {
        let mut domains = store();
        let free = domains.fresh_first_order(Scope::unconstrained());
        let pinned = domains.fresh_first_order(gpu());
        domains.unify(free, pinned).unwrap();
        assert_eq!(
            domains.result_scope(free),
            domains.config().canonical(&gpu())
        );
    }

    #[test]
    fn unify_conflict_reports_both_scopes() {
        let mut domains = store();
        let a = domains.fresh_first_order(gpu());
        let b = domains.fresh_first_order(cpu());
        let err = domains.unify(a, b).unwrap_err();
        assert_eq!(err.lhs.device.as_deref(), Some("gpu"));
        assert_eq!(err.rhs.device.as_deref(), Some("cpu"));
    }

    #[test]
    fn unify_is_transitive_through_representatives() {
        let mut domains = store();
        let a = domains.fresh_first_order(Scope::unconstrained());
        let b = domains.fresh_first_order(Scope::unconstrained());
        let c = domains.fresh_first_order(gpu());
        domains.unify(a, b).unwrap();
        domains.unify(b, c).unwrap();
        assert_eq!(domains.find(a), domains.find(c));
        assert!(domains.is_fully_constrained(a));
    }

    #[test]
    fn higher_order_unification_recurses() {
        let mut domains = store();
        let p1 = domains.fresh_first_order(gpu());
        let r1 = domains.fresh_first_order(Scope::unconstrained());
        let f1 = domains.make_higher_order(vec![p1], r1);

        let p2 = domains.fresh_first_order(Scope::unconstrained());
        let r2 = domains.fresh_first_order(cpu());
        let f2 = domains.make_higher_order(vec![p2], r2);

        domains.unify(f1, f2).unwrap();
        assert_eq!(
            domains.result_scope(p2),
            domains.config().canonical(&gpu())
        );
        assert_eq!(
            domains.result_scope(f1),
            domains.config().canonical(&cpu())
        );
    }

    #[test]
    #[should_panic(expected = "different arity")]
    fn higher_order_arity_mismatch_is_a_planner_bug() {
        let mut domains = store();
        let a1 = domains.fresh_first_order(Scope::unconstrained());
        let r1 = domains.fresh_first_order(Scope::unconstrained());
        let f1 = domains.make_higher_order(vec![a1], r1);
        let r2 = domains.fresh_first_order(Scope::unconstrained());
        let f2 = domains.make_higher_order(vec![], r2);
        let _ = domains.unify(f1, f2);
    }

    #[test]
    fn collapse_flattens_every_position() {
        let mut domains = store();
        let p = domains.fresh_first_order(Scope::unconstrained());
        let r = domains.fresh_first_order(gpu());
        let f = domains.make_higher_order(vec![p], r);
        let collapsed = domains.collapse(f).unwrap();
        // The parameter inherits the result's scope through the collapse.
        assert_eq!(
            domains.result_scope(p),
            domains.config().canonical(&gpu())
        );
        assert_eq!(
            domains.result_scope(collapsed),
            domains.config().canonical(&gpu())
        );
    }

    #[test]
    fn collapse_conflict_is_a_unify_error() {
        let mut domains = store();
        let p = domains.fresh_first_order(gpu());
        let r = domains.fresh_first_order(cpu());
        let f = domains.make_higher_order(vec![p], r);
        assert!(domains.collapse(f).is_err());
    }

    #[test]
    fn mixed_order_exact_unification_collapses() {
        let mut domains = store();
        let first = domains.fresh_first_order(gpu());
        let p = domains.fresh_first_order(Scope::unconstrained());
        let r = domains.fresh_first_order(Scope::unconstrained());
        let f = domains.make_higher_order(vec![p], r);
        domains.unify(first, f).unwrap();
        assert_eq!(
            domains.result_scope(p),
            domains.config().canonical(&gpu())
        );
    }

    #[test]
    fn set_result_default_then_params_pulls_params_to_result() {
        let mut domains = store();
        let p = domains.fresh_first_order(Scope::unconstrained());
        let r = domains.fresh_first_order(gpu());
        let f = domains.make_higher_order(vec![p], r);
        let default = domains.config().default_scope();
        domains.set_result_default_then_params(f, &default);
        // Result was already gpu; the parameter follows it, not the default.
        assert_eq!(
            domains.result_scope(p),
            domains.config().canonical(&gpu())
        );
        assert!(domains.is_fully_constrained(f));
    }

    #[test]
    fn set_result_default_then_params_uses_default_when_free() {
        let mut domains = store();
        let p = domains.fresh_first_order(Scope::unconstrained());
        let r = domains.fresh_first_order(Scope::unconstrained());
        let f = domains.make_higher_order(vec![p], r);
        let default = domains.config().default_scope();
        domains.set_result_default_then_params(f, &default);
        assert_eq!(domains.result_scope(f), default);
        assert_eq!(domains.result_scope(p), default);
    }

    #[test]
    fn set_default_fills_only_missing_facets() {
        let mut domains = store();
        let d = domains.fresh_first_order(Scope {
            device: None,
            target: None,
            memory: Some("texture".to_string()),
        });
        let default = domains.config().default_scope();
        domains.set_default(d, &default);
        let scope = domains.result_scope(d);
        assert_eq!(scope.device.as_deref(), Some("cpu"));
        assert_eq!(scope.memory.as_deref(), Some("texture"));
    }

    #[test]
    fn describe_higher_order() {
        let mut domains = store();
        let p = domains.fresh_first_order(cpu());
        let r = domains.fresh_first_order(Scope::unconstrained());
        let f = domains.make_higher_order(vec![p], r);
        assert_eq!(domains.describe(f), "fn(cpu) -> ?");
    }
}
