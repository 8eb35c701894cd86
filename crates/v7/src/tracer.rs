//! VM execution tracing.
//!
//! A trait with no-op default hooks; the engine owns one boxed tracer and
//! calls it from the dispatch loop, the call machinery, the unwinder, and
//! the collector. [`NoopTracer`] is the default; [`StderrTracer`] logs a
//! readable stream; [`CountingTracer`] keeps opcode frequency counts that
//! the host can read back.

use std::collections::HashMap;

/// Hook points for observing VM execution.
///
/// Every method has a no-op default, so implementations only override what
/// they care about.
pub trait VmTracer {
    /// An opcode is about to be dispatched.
    fn on_op(&mut self, ip: usize, opcode: u8, stack_depth: usize) {
        let _ = (ip, opcode, stack_depth);
    }

    /// A function call pushed a frame; `depth` is the new call depth.
    fn on_call(&mut self, depth: usize) {
        let _ = depth;
    }

    /// A function return popped a frame; `depth` is the remaining depth.
    fn on_return(&mut self, depth: usize) {
        let _ = depth;
    }

    /// A value was thrown (before any handler is located).
    fn on_throw(&mut self) {}

    /// A collection cycle finished.
    fn on_gc(&mut self, objects_freed: usize, bytes_compacted: usize) {
        let _ = (objects_freed, bytes_compacted);
    }
}

/// The zero-cost default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Logs every event to stderr; for debugging the engine itself.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_op(&mut self, ip: usize, opcode: u8, stack_depth: usize) {
        let name = crate::bytecode::Opcode::from_repr(opcode)
            .map_or("??", |op| op.into());
        eprintln!("{ip:6}  {name:<14} depth={stack_depth}");
    }

    fn on_call(&mut self, depth: usize) {
        eprintln!("call -> depth {depth}");
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("ret  -> depth {depth}");
    }

    fn on_throw(&mut self) {
        eprintln!("throw");
    }

    fn on_gc(&mut self, objects_freed: usize, bytes_compacted: usize) {
        eprintln!("gc: freed {objects_freed} cells, compacted {bytes_compacted} bytes");
    }
}

/// Counts opcode dispatches, calls, throws, and GC cycles.
#[derive(Debug, Default)]
pub struct CountingTracer {
    ops: HashMap<u8, u64>,
    pub calls: u64,
    pub throws: u64,
    pub gc_cycles: u64,
}

impl CountingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch count of one opcode byte.
    pub fn count(&self, opcode: u8) -> u64 {
        self.ops.get(&opcode).copied().unwrap_or(0)
    }

    /// Total dispatched opcodes.
    pub fn total(&self) -> u64 {
        self.ops.values().sum()
    }
}

impl VmTracer for CountingTracer {
    fn on_op(&mut self, _ip: usize, opcode: u8, _stack_depth: usize) {
        *self.ops.entry(opcode).or_insert(0) += 1;
    }

    fn on_call(&mut self, _depth: usize) {
        self.calls += 1;
    }

    fn on_throw(&mut self) {
        self.throws += 1;
    }

    fn on_gc(&mut self, _objects_freed: usize, _bytes_compacted: usize) {
        self.gc_cycles += 1;
    }
}
