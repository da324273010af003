//! Sea-of-Nodes Intermediate Representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): handle-addressed storage and side tables
//! - **Node** (`node.rs`): operators and node layout
//! - **Graph** (`graph.rs`): use-def edges, value numbering, worklist
//! - **Compute** (`compute.rs`): type transfer functions
//! - **Idealize** (`idealize.rs`): local rewrite rules
//! - **Peephole** (`peephole.rs`): the per-node optimization driver
//! - **Print** (`print.rs`): expression-style dumps
//!
//! # Design Principles
//!
//! - **Optimize on construction**: every node is peepholed as it is built
//! - **Unified control/data**: control is just another edge kind
//! - **Monotone types**: a node's type only ever moves down the lattice

pub mod arena;
pub mod compute;
pub mod graph;
pub mod idealize;
pub mod node;
pub mod peephole;
pub mod print;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use graph::{Graph, GraphStats};
pub use node::{Inputs, Node, NodeFlags, NodeId, Op};
