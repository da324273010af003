//! Evaluator for scheduled Sonic programs.
//!
//! Runs `main(arg)` over the blocks the local scheduler produced, so a
//! wrong placement or ordering shows up as a wrong answer. Used for
//! differential testing of the optimizer against unoptimized builds.

pub mod error;
pub mod frame;
pub mod interpreter;
pub mod value;

pub use error::{EvalError, Result};
pub use interpreter::{evaluate, evaluate_with_fuel, Interpreter, DEFAULT_FUEL};
pub use value::{Heap, Value};
