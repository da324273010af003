//! IR node definitions for the Sea-of-Nodes graph.
//!
//! Data and control flow are both plain use-def edges between nodes, so a
//! node carries no position of its own until the scheduler assigns it a
//! block.
//!
//! # Node Structure
//!
//! Each node has:
//! - **Operator**: what the node computes, with any payload ([`Op`])
//! - **Inputs**: ordered, possibly empty def slots
//! - **Type**: the optimistic lattice type computed by the peephole pass
//! - **Keep count**: parser-held references that keep an unused node alive
//!
//! # Input conventions
//!
//! Slot 0 is control for nodes that need it and `None` otherwise. Regions
//! keep slot 0 empty and list predecessors from slot 1; a Phi's slot 0 is
//! its region and slot `i` is the value arriving along region input `i`.

use super::arena::Id;
use crate::types::TypeId;
use smallvec::SmallVec;
use std::rc::Rc;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inline capacity covers every fixed-arity node; only Regions, Phis,
/// Calls and Stop spill.
pub type Inputs = SmallVec<[Option<NodeId>; 4]>;

// =============================================================================
// Operators
// =============================================================================

/// Node operator with its payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // ---- control ----
    /// Program entry; produces `[Ctrl, mem, arg]`.
    Start { arg: TypeId },
    /// Program exit; inputs are the function Returns.
    Stop,
    /// Control merge; inputs `[None, preds..]`.
    Region,
    /// Loop header; inputs `[None, entry, back]`, the back edge set later.
    Loop,
    /// Two-way branch; inputs `[ctrl, pred]`, produces `[Ctrl, Ctrl]`.
    If,
    /// Control projection out of a multi-node.
    CProj { idx: u32, label: Rc<str> },
    /// Function entry; a region whose only predecessor is the Start
    /// projection.
    Fun {
        fidx: u32,
        name: Rc<str>,
        /// Signature tuple `[ret, args..]`.
        sig: TypeId,
    },
    /// Function exit; inputs `[ctrl, mem, val]`.
    Return,
    /// Call; inputs `[ctrl, mem, args.., fptr]`.
    Call,
    /// Call result; input `[call]`, produces `[Ctrl, mem, ret]`.
    CallEnd,

    // ---- data ----
    /// Constant; input `[start]`.
    Con(TypeId),
    /// Data projection out of a multi-node.
    Proj { idx: u32, label: Rc<str> },
    /// Merge of values; inputs `[region, vals..]`. `min` is the declared
    /// type reported while the region is still being built.
    Phi { label: Rc<str>, min: TypeId },
    /// Function parameter, a Phi over the function's callers; input `[fun]`.
    /// `idx` 1 is memory, 2.. are the arguments, matching the Call layout.
    Parm {
        idx: u32,
        label: Rc<str>,
        min: TypeId,
    },

    Add,
    Sub,
    Mul,
    Div,
    Minus,
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic shift right.
    Sar,
    /// Logical shift right.
    Shr,

    AddF,
    SubF,
    MulF,
    DivF,
    MinusF,
    ToFloat,

    Eq,
    Lt,
    Le,
    EqF,
    LtF,
    LeF,
    Not,

    /// Type upcast guarded by control; inputs `[ctrl, val]`.
    Cast(TypeId),
    /// Read-only view of a pointer; inputs `[None, ptr]`.
    ReadOnly,
    /// Allocation; inputs `[None, mem, inits..]`, produces `[mem, ptr]`.
    New(TypeId),
    /// Field read; inputs `[None, mem, ptr]`.
    Load {
        name: Rc<str>,
        alias: u32,
        decl: TypeId,
    },
    /// Field write; inputs `[None, mem, ptr, val]`, produces memory.
    Store { name: Rc<str>, alias: u32 },

    /// Parser symbol table; inputs `[ctrl, mem, vars..]`.
    Scope,
}

impl Op {
    /// Short operator name used in debug dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Start { .. } => "Start",
            Op::Stop => "Stop",
            Op::Region => "Region",
            Op::Loop => "Loop",
            Op::If => "If",
            Op::CProj { .. } => "CProj",
            Op::Fun { .. } => "Fun",
            Op::Return => "Return",
            Op::Call => "Call",
            Op::CallEnd => "CallEnd",
            Op::Con(_) => "Con",
            Op::Proj { .. } => "Proj",
            Op::Phi { .. } => "Phi",
            Op::Parm { .. } => "Parm",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Minus => "Minus",
            Op::And => "And",
            Op::Or => "Or",
            Op::Xor => "Xor",
            Op::Shl => "Shl",
            Op::Sar => "Sar",
            Op::Shr => "Shr",
            Op::AddF => "AddF",
            Op::SubF => "SubF",
            Op::MulF => "MulF",
            Op::DivF => "DivF",
            Op::MinusF => "MinusF",
            Op::ToFloat => "ToFloat",
            Op::Eq => "EQ",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::EqF => "EQF",
            Op::LtF => "LTF",
            Op::LeF => "LEF",
            Op::Not => "Not",
            Op::Cast(_) => "Cast",
            Op::ReadOnly => "ReadOnly",
            Op::New(_) => "New",
            Op::Load { .. } => "Load",
            Op::Store { .. } => "Store",
            Op::Scope => "Scope",
        }
    }

    /// Source-level spelling of a binary operator.
    pub fn glyph(&self) -> Option<&'static str> {
        Some(match self {
            Op::Add | Op::AddF => "+",
            Op::Sub | Op::SubF => "-",
            Op::Mul | Op::MulF => "*",
            Op::Div | Op::DivF => "/",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::Shl => "<<",
            Op::Sar => ">>",
            Op::Shr => ">>>",
            Op::Eq | Op::EqF => "==",
            Op::Lt | Op::LtF => "<",
            Op::Le | Op::LeF => "<=",
            _ => return None,
        })
    }

    /// Control-flow nodes: they form the CFG the scheduler places data into.
    pub fn is_cfg(&self) -> bool {
        matches!(
            self,
            Op::Start { .. }
                | Op::Stop
                | Op::Region
                | Op::Loop
                | Op::If
                | Op::CProj { .. }
                | Op::Fun { .. }
                | Op::Return
                | Op::Call
                | Op::CallEnd
        )
    }

    /// Nodes whose inputs are control predecessors in slots `1..`.
    pub fn is_region(&self) -> bool {
        matches!(self, Op::Region | Op::Loop | Op::Fun { .. })
    }

    /// Nodes producing a tuple that only projections read.
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            Op::Start { .. } | Op::If | Op::New(_) | Op::Call | Op::CallEnd
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Op::Phi { .. } | Op::Parm { .. })
    }

    pub fn is_proj(&self) -> bool {
        matches!(self, Op::Proj { .. } | Op::CProj { .. })
    }

    /// Data nodes that stay in the block of their control input instead of
    /// floating.
    pub fn is_pinned(&self) -> bool {
        matches!(self, Op::Phi { .. } | Op::Parm { .. } | Op::Proj { .. })
    }

    /// Projection index, for either flavour of projection.
    pub fn proj_idx(&self) -> Option<u32> {
        match self {
            Op::Proj { idx, .. } | Op::CProj { idx, .. } => Some(*idx),
            _ => None,
        }
    }

    /// Integer binary operators.
    pub fn is_int_binop(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Shl
                | Op::Sar
                | Op::Shr
        )
    }

    pub fn is_float_binop(&self) -> bool {
        matches!(self, Op::AddF | Op::SubF | Op::MulF | Op::DivF)
    }

    pub fn is_compare(&self) -> bool {
        matches!(
            self,
            Op::Eq | Op::Lt | Op::Le | Op::EqF | Op::LtF | Op::LeF
        )
    }

    /// Commutative operators, whose operands may be reordered.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Mul
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::AddF
                | Op::MulF
                | Op::Eq
                | Op::EqF
        )
    }

    /// Nodes that touch the memory chain.
    pub fn is_mem(&self) -> bool {
        matches!(self, Op::Load { .. } | Op::Store { .. } | Op::New(_))
    }

    /// Nodes the value-numbering table may share.
    pub fn is_gvn(&self) -> bool {
        !self.is_cfg()
            && !matches!(
                self,
                Op::Scope | Op::New(_) | Op::Store { .. } | Op::Parm { .. }
            )
    }
}

// =============================================================================
// Node Structure
// =============================================================================

/// A single node in the graph.
#[derive(Clone)]
pub struct Node {
    pub op: Op,
    pub inputs: Inputs,
    /// Current type; [`TypeId::INVALID`] until first computed.
    pub ty: TypeId,
    pub flags: NodeFlags,
    /// Parser-held references; a node with a keep count is never dead.
    pub keep: u16,
}

impl Node {
    pub fn new(op: Op, inputs: &[Option<NodeId>]) -> Self {
        Node {
            op,
            inputs: inputs.iter().copied().collect(),
            ty: TypeId::INVALID,
            flags: NodeFlags::empty(),
            keep: 0,
        }
    }

    /// Input at slot `i`, if the slot exists and is filled.
    #[inline]
    pub fn input(&self, i: usize) -> Option<NodeId> {
        self.inputs.get(i).copied().flatten()
    }

    #[inline]
    pub fn ctrl(&self) -> Option<NodeId> {
        self.input(0)
    }

    #[inline]
    pub fn nins(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    /// Label used when a node is referred to instead of expanded.
    pub fn label(&self) -> String {
        match &self.op {
            Op::Phi { label, .. } | Op::Parm { label, .. } => format!("Phi_{label}"),
            Op::Proj { label, .. } | Op::CProj { label, .. } => label.to_string(),
            Op::Fun { name, .. } => name.to_string(),
            Op::Load { name, .. } => format!("Load_{name}"),
            op => op.name().to_string(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op.name())?;
        if !self.inputs.is_empty() {
            write!(f, " [")?;
            for (i, x) in self.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match x {
                    Some(id) => write!(f, "{id}")?,
                    None => write!(f, "_")?,
                }
            }
            write!(f, "]")?;
        }
        write!(f, " : {:?}", self.ty)
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node was killed; its slot is never reused.
        const DEAD = 0b0000_0001;
        /// Node is currently the value-numbering table's representative.
        const IN_GVN = 0b0000_0010;
        /// Node sits on the iterative worklist.
        const ON_WORKLIST = 0b0000_0100;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_inputs() {
        let a = NodeId::new(3);
        let n = Node::new(Op::Phi { label: Rc::from("x"), min: TypeId::INVALID }, &[Some(a), None]);
        assert_eq!(n.ctrl(), Some(a));
        assert_eq!(n.input(1), None);
        assert_eq!(n.input(7), None);
        assert_eq!(n.nins(), 2);
        assert_eq!(n.label(), "Phi_x");
    }

    #[test]
    fn test_op_classes() {
        assert!(Op::Loop.is_region());
        assert!(Op::Loop.is_cfg());
        assert!(!Op::Add.is_cfg());
        assert!(Op::Add.is_gvn());
        assert!(!Op::Scope.is_gvn());
        assert!(!Op::Store { name: Rc::from("f"), alias: 1 }.is_gvn());
        assert!(Op::Phi { label: Rc::from("a"), min: TypeId::INVALID }.is_pinned());
        assert!(!Op::Add.is_pinned());
        assert!(Op::Mul.is_commutative());
        assert!(!Op::Sub.is_commutative());
        assert_eq!(Op::Shr.glyph(), Some(">>>"));
        assert_eq!(Op::Not.glyph(), None);
    }

    #[test]
    fn test_node_flags() {
        let mut n = Node::new(Op::Add, &[None, None, None]);
        assert!(!n.is_dead());
        n.flags.insert(NodeFlags::DEAD);
        assert!(n.is_dead());
    }
}
