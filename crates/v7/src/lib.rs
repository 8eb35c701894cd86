//! An embeddable ES5-ish JavaScript engine for constrained environments.
//!
//! The pipeline is lexer → parser (explicit-stack recursive descent) →
//! compact AST → bytecode compiler → stack VM, over a NaN-boxed value
//! representation and a garbage-collected arena heap. Hosts drive it
//! through [`Engine`]: create values, get/set properties, call functions,
//! and [`Engine::exec`] source text.
//!
//! ```
//! use v7::Engine;
//!
//! let mut engine = Engine::new();
//! let result = engine.exec("var x = 0; for (var i = 0; i < 5; i++) x += i; x").unwrap();
//! assert_eq!(result.as_number(), 10.0);
//! ```

mod ast;
mod bytecode;
mod engine;
mod error;
mod gc;
mod heap;
mod json;
mod lexer;
mod object;
mod parser;
mod stringify;
mod tracer;
mod value;
mod vm;

pub use crate::{
    engine::{CFunc, CompileTarget, Engine, EngineOpts, InterruptHandle, JsError, OwnHandle},
    error::{ExecError, ExecResult, SyntaxError},
    heap::MemStats,
    object::{
        PROP_DONT_DELETE, PROP_DONT_ENUM, PROP_GETTER, PROP_HIDDEN, PROP_READ_ONLY, PROP_SETTER,
    },
    tracer::{CountingTracer, NoopTracer, StderrTracer, VmTracer},
    value::Val,
};
