// ops.rs — Primitive operator table
//
// Every primitive the IR can call is described here: its arity, the kind of
// value it produces, and the placement shape the planner uses for its
// callee domain. New primitives are added by extending the table; the
// planner traversals never special-case an operator by name.
//
// Preconditions: none (static data).
// Postconditions: `lookup` is the only way resolve admits an operator name.
// Failure modes: none.
// Side effects: none.

use crate::id::OpId;

// ── Result kinds ────────────────────────────────────────────────────────────

/// What a primitive call evaluates to, as far as type propagation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Tensor,
    Shape,
    Storage,
    /// Result type equals the first argument's type (annotation dialects).
    SameAsArg0,
}

// ── Placement shapes ────────────────────────────────────────────────────────

/// Placement constraint for one argument position of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPlacement {
    /// No constraint beyond what flows in from elsewhere.
    Free,
    /// Pinned to the configuration's host scope (shape-typed positions).
    Host,
    /// Shares the call result's domain (data that ends up where the result is).
    Result,
}

/// Placement constraint for a primitive's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPlacement {
    Free,
    Host,
}

/// Per-primitive placement shape. `None` on an `OpDef` means the operator is
/// homogeneous: every argument and the result share one scope, chosen per
/// call site (primitives are device-polymorphic).
#[derive(Debug, Clone, Copy)]
pub struct PlacementShape {
    pub args: &'static [ArgPlacement],
    pub result: ResultPlacement,
}

// ── Operator definitions ────────────────────────────────────────────────────

/// How the planner treats the operator's call dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpDialect {
    /// Ordinary primitive; placement follows `placement` (or homogeneous).
    Plain,
    /// `on_device(e, scope=S [, fixed])` annotation call.
    OnDevice,
    /// `device_copy(e, src=S1, dst=S2)` explicit transition call.
    DeviceCopy,
}

#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub arity: usize,
    pub result: OpResult,
    pub dialect: OpDialect,
    pub placement: Option<PlacementShape>,
}

use ArgPlacement::{Free, Host, Result as SameAsResult};

/// The operator table. Order is load-bearing: `OpId` is an index into it.
static OPS: &[OpDef] = &[
    // ── Elementwise / generic tensor primitives ──
    OpDef { name: "add", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "subtract", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "multiply", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "divide", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "maximum", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "minimum", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "equal", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "less", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "matmul", arity: 2, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "negative", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "exp", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "log", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "sqrt", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "tanh", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "relu", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "sum", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    OpDef { name: "copy", arity: 1, result: OpResult::Tensor, dialect: OpDialect::Plain, placement: None },
    // ── Shape dialect: shapes live on the host ──
    OpDef {
        name: "shape_of",
        arity: 1,
        result: OpResult::Shape,
        dialect: OpDialect::Plain,
        placement: Some(PlacementShape { args: &[Free], result: ResultPlacement::Host }),
    },
    OpDef {
        // shape_func(func, inputs, outputs); input/output shape tuples on host
        name: "shape_func",
        arity: 3,
        result: OpResult::Shape,
        dialect: OpDialect::Plain,
        placement: Some(PlacementShape { args: &[Free, Host, Host], result: ResultPlacement::Host }),
    },
    OpDef {
        // reshape_tensor(data, shape); data stays with the result
        name: "reshape_tensor",
        arity: 2,
        result: OpResult::Tensor,
        dialect: OpDialect::Plain,
        placement: Some(PlacementShape { args: &[SameAsResult, Host], result: ResultPlacement::Free }),
    },
    // ── Memory dialect: sizes/offsets/shapes on host, payload free ──
    OpDef {
        // alloc_storage(size, alignment)
        name: "alloc_storage",
        arity: 2,
        result: OpResult::Storage,
        dialect: OpDialect::Plain,
        placement: Some(PlacementShape { args: &[Host, Host], result: ResultPlacement::Free }),
    },
    OpDef {
        // alloc_tensor(storage, offset, shape); storage is where the tensor lands
        name: "alloc_tensor",
        arity: 3,
        result: OpResult::Tensor,
        dialect: OpDialect::Plain,
        placement: Some(PlacementShape {
            args: &[SameAsResult, Host, Host],
            result: ResultPlacement::Free,
        }),
    },
    // ── Annotation dialect: placement shapes come from call attributes ──
    OpDef { name: "on_device", arity: 1, result: OpResult::SameAsArg0, dialect: OpDialect::OnDevice, placement: None },
    OpDef { name: "device_copy", arity: 1, result: OpResult::SameAsArg0, dialect: OpDialect::DeviceCopy, placement: None },
];

/// Look up an operator by name.
pub fn lookup(name: &str) -> Option<OpId> {
    OPS.iter()
        .position(|op| op.name == name)
        .map(|i| OpId(i as u16))
}

/// The definition for an operator id.
pub fn def(id: OpId) -> &'static OpDef {
    &OPS[id.0 as usize]
}

pub fn on_device_op() -> OpId {
    lookup("on_device").expect("internal: on_device missing from operator table")
}

pub fn device_copy_op() -> OpId {
    lookup("device_copy").expect("internal: device_copy missing from operator table")
}
