//! Call frames.
//!
//! A frame maps nodes to the values they computed during one function
//! activation. Lookups fall back to enclosing frames, so values computed
//! once in the entry block (constants, `arg`) stay visible inside calls.

use crate::value::Value;
use rustc_hash::FxHashMap;
use sonic_jit::NodeId;

/// Maximum call depth before evaluation gives up.
pub const MAX_CALL_DEPTH: usize = 1000;

/// Values of one function activation.
#[derive(Debug, Default)]
pub struct Frame {
    values: FxHashMap<NodeId, Value>,
}

/// Active frames, innermost last.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    /// A stack holding only the frame of `main`.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Innermost value of `n`.
    pub fn get(&self, n: NodeId) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.values.get(&n).copied())
    }

    /// Set `n` in the innermost frame.
    pub fn set(&mut self, n: NodeId, v: Value) {
        if let Some(f) = self.frames.last_mut() {
            f.values.insert(n, v);
        }
    }

    /// True if the innermost frame already holds `n`.
    pub fn has_local(&self, n: NodeId) -> bool {
        self.frames
            .last()
            .is_some_and(|f| f.values.contains_key(&n))
    }
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}
