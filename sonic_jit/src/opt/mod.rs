//! Whole-graph passes run after construction.
//!
//! - **IterPeeps** (`iter_peeps.rs`): drains the worklist to a peephole
//!   fixpoint
//! - **TypeCheck** (`type_check.rs`): reports lattice-level errors once
//!   types have converged

pub mod iter_peeps;
pub mod type_check;

pub use iter_peeps::{iterate, IterStats};
pub use type_check::type_check;
