// id.rs — Stable semantic identifiers for dpc compiler phases
//
// These IDs provide deterministic, span-independent identity for IR nodes.
// Expressions and types are arena-allocated in source order; an ExprId is
// the node's arena index and is the key the planner uses to attach device
// domains to sub-expressions.

/// Stable identifier for an expression node in the IR arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Stable identifier for a type node in the IR arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Stable identifier for an ADT definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdtId(pub u32);

/// Stable identifier for an ADT constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtorId(pub u32);

/// Stable identifier for a primitive operator (index into the operator table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u16);

/// Stable identifier for a device domain in the union-find store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub u32);
