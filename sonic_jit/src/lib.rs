//! Sea-of-Nodes middle end for Sonic.
//!
//! Control and data share one graph; values are optimized as they are
//! built, and a scheduling pass later turns the graph into ordered blocks:
//! - Typed, hash-consed node graph with in-place peepholes
//! - Type lattice with recursive struct types
//! - Worklist fixpoint optimizer and post-convergence type checks
//! - Loop tree, global code motion and local scheduling
//!
//! A front end drives a [`CodeGen`] session: it builds the graph, calls
//! [`CodeGen::finish_parse`], then runs [`CodeGen::driver`].

pub mod codegen;
pub mod error;
pub mod ir;
pub mod opt;
pub mod sched;
pub mod types;

#[cfg(test)]
mod testing;

pub use codegen::{ArgType, BlockView, CodeGen, CodeGenConfig, Phase};
pub use error::{CompileError, ParseError, ParseResult, Result};
pub use ir::{Graph, Node, NodeId, Op};
pub use types::{TypeData, TypeId, Types};
