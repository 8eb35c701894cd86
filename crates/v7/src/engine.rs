//! The engine instance and the host-facing API.
//!
//! Everything the C original kept in globals lives here as fields: arenas,
//! string heaps, the data and call stacks, VM registers, the prototype and
//! error-constructor tables, the cfunction registry, and the GC bookkeeping.
//! Host callbacks receive `&mut Engine` explicitly.

use std::borrow::Cow;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;

use crate::bytecode::code::{bcode_from_binary, bcode_to_binary};
use crate::bytecode::{compiler, Bcode};
use crate::error::{ExecError, ExecResult};
use crate::heap::{Arena, CFuncId, FuncId, MemStats, ObjId, StrLookup, StringHeap};
use crate::heap::ForeignStrings;
use crate::object::{
    FuncCell, ObjCell, ObjData, PropCell, OBJ_DENSE_ARRAY, OBJ_FUNCTION, PROP_DONT_ENUM,
};
use crate::parser;
use crate::tracer::{NoopTracer, VmTracer};
use crate::value::{self, Val};

/// A host callback. Returning `Err(v)` makes the VM unwind as if `v` had
/// been thrown by JS code.
pub type CFunc = fn(&mut Engine, this: Val, args: &[Val]) -> Result<Val, Val>;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOpts {
    /// Cells per generic-object arena block.
    pub object_arena_size: u32,
    /// Cells per function arena block.
    pub function_arena_size: u32,
    /// Cells per property arena block.
    pub property_arena_size: u32,
    /// Initial owned-string heap budget in bytes.
    pub string_heap_size: usize,
    /// Maximum VM call depth (frames), checked at CALL/NEW and on nested
    /// evaluator entry.
    pub max_call_depth: usize,
    /// Maximum number of live parser frames.
    pub max_parser_frames: usize,
    /// Force strict mode for all scripts.
    pub force_strict: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            object_arena_size: 200,
            function_arena_size: 100,
            property_arena_size: 400,
            string_heap_size: 4096,
            max_call_depth: 500,
            max_parser_frames: 16 * 1024,
            force_strict: false,
        }
    }
}

/// JS-visible error kinds; each has a constructor and a prototype object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsError {
    Error,
    Type,
    Syntax,
    Reference,
    Internal,
    Range,
    Eval,
}

impl JsError {
    pub(crate) const ALL: [Self; 7] = [
        Self::Error,
        Self::Type,
        Self::Syntax,
        Self::Reference,
        Self::Internal,
        Self::Range,
        Self::Eval,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Type => "TypeError",
            Self::Syntax => "SyntaxError",
            Self::Reference => "ReferenceError",
            Self::Internal => "InternalError",
            Self::Range => "RangeError",
            Self::Eval => "EvalError",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|&k| k == self).unwrap_or(0)
    }
}

/// The prototype objects the engine guarantees to exist; all GC roots.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Prototypes {
    pub object: Val,
    pub array: Val,
    pub boolean: Val,
    pub string: Val,
    pub number: Val,
    pub date: Val,
    pub function: Val,
    pub regexp: Val,
    pub error: Val,
    /// Prototype per [`JsError`], in `JsError::ALL` order.
    pub errors: [Val; 7],
}

impl Prototypes {
    pub(crate) fn roots(&self) -> impl Iterator<Item = Val> + '_ {
        [
            self.object,
            self.array,
            self.boolean,
            self.string,
            self.number,
            self.date,
            self.function,
            self.regexp,
            self.error,
        ]
        .into_iter()
        .chain(self.errors)
    }
}

/// Saved caller registers of one active function call. A catch-introduced
/// "private" frame never gets one of these records; that absence is what
/// distinguishes it from a function frame during unwinding.
#[derive(Debug, Clone)]
pub(crate) struct CallFrame {
    /// Caller's bcode to resume.
    pub bcode: Rc<Bcode>,
    /// Caller's resume offset in its ops stream.
    pub ret_ip: usize,
    /// Caller's `this`.
    pub this: Val,
    /// Caller's constructor flag.
    pub is_ctor: bool,
    /// The callee's frame object (scope to unwind past on return).
    pub frame: Val,
}

/// Handle returned by [`Engine::own`]; redeem with [`Engine::disown`].
#[derive(Debug)]
pub struct OwnHandle(usize);

/// An embeddable JS engine instance.
///
/// Single-threaded: one instance must be externally serialized. Values
/// ([`Val`]) borrow from the instance's heaps; any val a host holds across
/// engine calls must be pinned with [`Engine::own`] so the collector keeps
/// and relocates it.
pub struct Engine {
    // heaps
    pub(crate) objects: Arena<ObjCell>,
    pub(crate) functions: Arena<FuncCell>,
    pub(crate) props: Arena<PropCell>,
    pub(crate) strings: StringHeap,
    pub(crate) foreign_strs: ForeignStrings,
    lit_intern: AHashMap<String, usize>,

    // globals
    pub(crate) global: Val,
    pub(crate) protos: Prototypes,
    /// Error constructor objects, in `JsError::ALL` order (a GC root).
    pub(crate) error_ctors: [Val; 7],
    pub(crate) cfuncs: Vec<CFunc>,

    // VM state
    pub(crate) stack: Vec<Val>,
    pub(crate) call_frames: Vec<CallFrame>,
    pub(crate) scope: Val,
    pub(crate) this_val: Val,
    pub(crate) stash: Val,
    pub(crate) thrown: Val,
    pub(crate) is_thrown: bool,
    pub(crate) is_returned: bool,
    pub(crate) returned: Val,
    pub(crate) is_breaking: bool,
    pub(crate) is_continuing: bool,
    pub(crate) is_ctor: bool,
    /// Root bcodes of every active (possibly nested) exec.
    pub(crate) act_bcodes: Vec<Rc<Bcode>>,
    /// Rust-side recursion depth of nested evaluator entries.
    pub(crate) exec_depth: usize,

    // host roots
    pub(crate) owned: Vec<Option<Val>>,
    pub(crate) tmp_roots: Vec<Vec<Val>>,

    // gc
    pub(crate) need_gc: bool,
    pub(crate) inhibit_gc: u32,
    pub(crate) gc_cycles: usize,

    // control
    interrupt: Arc<AtomicBool>,
    pub(crate) opts: EngineOpts,
    pub(crate) tracer: Box<dyn VmTracer>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_opts(EngineOpts::default())
    }

    pub fn with_opts(opts: EngineOpts) -> Self {
        let mut engine = Self {
            objects: Arena::new(opts.object_arena_size),
            functions: Arena::new(opts.function_arena_size),
            props: Arena::new(opts.property_arena_size),
            strings: StringHeap::new(opts.string_heap_size),
            foreign_strs: ForeignStrings::default(),
            lit_intern: AHashMap::new(),
            global: Val::UNDEFINED,
            protos: Prototypes {
                object: Val::UNDEFINED,
                array: Val::UNDEFINED,
                boolean: Val::UNDEFINED,
                string: Val::UNDEFINED,
                number: Val::UNDEFINED,
                date: Val::UNDEFINED,
                function: Val::UNDEFINED,
                regexp: Val::UNDEFINED,
                error: Val::UNDEFINED,
                errors: [Val::UNDEFINED; 7],
            },
            error_ctors: [Val::UNDEFINED; 7],
            cfuncs: Vec::new(),
            stack: Vec::new(),
            call_frames: Vec::new(),
            scope: Val::UNDEFINED,
            this_val: Val::UNDEFINED,
            stash: Val::NOVALUE,
            thrown: Val::UNDEFINED,
            is_thrown: false,
            is_returned: false,
            returned: Val::UNDEFINED,
            is_breaking: false,
            is_continuing: false,
            is_ctor: false,
            act_bcodes: Vec::new(),
            exec_depth: 0,
            owned: Vec::new(),
            tmp_roots: Vec::new(),
            need_gc: false,
            inhibit_gc: 0,
            gc_cycles: 0,
            interrupt: Arc::new(AtomicBool::new(false)),
            opts,
            tracer: Box::new(NoopTracer),
        };
        engine.bootstrap();
        engine
    }

    /// Swaps the VM tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    fn bootstrap(&mut self) {
        let object_proto = self.alloc_object_cell(ObjCell::plain(Val::NULL));
        self.protos.object = object_proto;
        self.protos.array = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.boolean = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.string = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.number = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.date = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.function = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.regexp = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.protos.error = self.alloc_object_cell(ObjCell::plain(object_proto));

        self.global = self.alloc_object_cell(ObjCell::plain(object_proto));
        self.scope = self.global;
        self.this_val = self.global;

        // Ambient data properties.
        let undef_name = self.intern_literal_string("undefined");
        self.define_own(self.global, undef_name, Val::UNDEFINED, PROP_DONT_ENUM);
        let nan_name = self.intern_literal_string("NaN");
        self.define_own(self.global, nan_name, Val::NAN, PROP_DONT_ENUM);
        let inf_name = self.intern_literal_string("Infinity");
        self.define_own(
            self.global,
            inf_name,
            Val::number(f64::INFINITY),
            PROP_DONT_ENUM,
        );

        self.bootstrap_errors();
        self.bootstrap_json();

        let eval_fn = self.create_cfunction(builtin_eval);
        let eval_name = self.intern_literal_string("eval");
        self.define_own(self.global, eval_name, eval_fn, PROP_DONT_ENUM);
    }

    fn bootstrap_errors(&mut self) {
        let error_proto = self.protos.error;
        for (i, kind) in JsError::ALL.into_iter().enumerate() {
            let proto = if kind == JsError::Error {
                error_proto
            } else {
                self.alloc_object_cell(ObjCell::plain(error_proto))
            };
            self.protos.errors[i] = proto;

            let name_key = self.intern_literal_string("name");
            let name_val = self.intern_literal_string(kind.name());
            self.define_own(proto, name_key, name_val, PROP_DONT_ENUM);
            let msg_key = self.intern_literal_string("message");
            self.define_own(proto, msg_key, Val::EMPTY_STRING, PROP_DONT_ENUM);

            let ctor = self.create_cfunction_object(ERROR_CTORS[i]);
            let proto_key = self.intern_literal_string("prototype");
            self.define_own(ctor, proto_key, proto, PROP_DONT_ENUM);
            let ctor_key = self.intern_literal_string("constructor");
            self.define_own(proto, ctor_key, ctor, PROP_DONT_ENUM);
            self.error_ctors[i] = ctor;

            let bind = self.intern_literal_string(kind.name());
            self.define_own(self.global, bind, ctor, PROP_DONT_ENUM);
        }
    }

    fn bootstrap_json(&mut self) {
        let json = self.create_object();
        let stringify = self.create_cfunction(builtin_json_stringify);
        let parse = self.create_cfunction(builtin_json_parse);
        let k = self.intern_literal_string("stringify");
        self.define_own(json, k, stringify, PROP_DONT_ENUM);
        let k = self.intern_literal_string("parse");
        self.define_own(json, k, parse, PROP_DONT_ENUM);
        let k = self.intern_literal_string("JSON");
        self.define_own(self.global, k, json, PROP_DONT_ENUM);
    }

    // --- creation API ---

    pub(crate) fn alloc_object_cell(&mut self, cell: ObjCell) -> Val {
        let id = self.objects.alloc(cell);
        if self.objects.grew {
            self.need_gc = true;
        }
        Val::object(ObjId(id))
    }

    /// Creates an empty object inheriting from `Object.prototype`.
    pub fn create_object(&mut self) -> Val {
        self.alloc_object_cell(ObjCell::plain(self.protos.object))
    }

    /// Creates an object with an explicit prototype.
    pub fn create_object_with_proto(&mut self, proto: Val) -> Val {
        self.alloc_object_cell(ObjCell::plain(proto))
    }

    /// Creates an empty dense array.
    pub fn create_array(&mut self) -> Val {
        self.alloc_object_cell(ObjCell {
            proto: self.protos.array,
            props: None,
            attrs: OBJ_DENSE_ARRAY,
            data: ObjData::DenseArray(Vec::new()),
        })
    }

    /// Trivial value constructors, provided for host-API symmetry.
    pub fn create_number(&self, n: f64) -> Val {
        Val::number(n)
    }

    pub fn create_boolean(&self, b: bool) -> Val {
        Val::boolean(b)
    }

    pub fn create_null(&self) -> Val {
        Val::NULL
    }

    pub fn create_undefined(&self) -> Val {
        Val::UNDEFINED
    }

    pub fn create_foreign(&self, ptr: usize) -> Val {
        Val::foreign(ptr)
    }

    /// Registers a host callback as a bare cfunction value.
    pub fn create_cfunction(&mut self, f: CFunc) -> Val {
        self.cfuncs.push(f);
        Val::cfunction(CFuncId(self.cfuncs.len() as u32 - 1))
    }

    /// Registers a host callback wrapped in a callable object that can carry
    /// properties (constructors need a `prototype`).
    pub fn create_cfunction_object(&mut self, f: CFunc) -> Val {
        self.cfuncs.push(f);
        let id = CFuncId(self.cfuncs.len() as u32 - 1);
        self.alloc_object_cell(ObjCell {
            proto: self.protos.function,
            props: None,
            attrs: OBJ_FUNCTION,
            data: ObjData::Cfunc(id),
        })
    }

    /// Creates a function value from a bcode template with no captured
    /// scope (used by the binary-bcode reader and the compiler).
    pub(crate) fn make_func_template(&mut self, bcode: Rc<Bcode>) -> Val {
        let id = self.functions.alloc(FuncCell {
            scope: Val::NOVALUE,
            props: None,
            attrs: OBJ_FUNCTION,
            bcode,
        });
        if self.functions.grew {
            self.need_gc = true;
        }
        Val::function(FuncId(id))
    }

    /// Instantiates a closure from a template, capturing `scope`.
    pub(crate) fn make_closure(&mut self, template: FuncId, scope: Val) -> Option<Val> {
        let bcode = self.functions.get(template.0)?.bcode.clone();
        let id = self.functions.alloc(FuncCell {
            scope,
            props: None,
            attrs: OBJ_FUNCTION,
            bcode,
        });
        if self.functions.grew {
            self.need_gc = true;
        }
        Some(Val::function(FuncId(id)))
    }

    pub(crate) fn func_bcode(&self, id: FuncId) -> Option<Rc<Bcode>> {
        self.functions.get(id.0).map(|f| f.bcode.clone())
    }

    /// Compiles a regex pattern into a regexp value.
    ///
    /// The pattern is handed to the embedded regex engine mostly verbatim; a
    /// pattern it rejects surfaces as a JS `SyntaxError`.
    pub fn create_regexp(&mut self, pattern: &str, flags: &str) -> Result<Val, Val> {
        let global = flags.contains('g');
        let ignore_case = flags.contains('i');
        let multiline = flags.contains('m');
        let mut builder = regex::RegexBuilder::new(pattern);
        builder.case_insensitive(ignore_case).multi_line(multiline);
        let program = match builder.build() {
            Ok(p) => p,
            Err(_) => {
                return Err(self.make_error(JsError::Syntax, "invalid regular expression"));
            }
        };
        let source = self.intern_literal_string(pattern);
        let id = self.objects.alloc(ObjCell {
            proto: self.protos.regexp,
            props: None,
            attrs: 0,
            data: ObjData::Regexp(Box::new(crate::object::RegexpData {
                source,
                program,
                global,
                ignore_case,
                multiline,
                last_index: 0.0,
            })),
        });
        if self.objects.grew {
            self.need_gc = true;
        }
        Ok(Val::regexp(ObjId(id)))
    }

    /// Creates an error object of the given kind with a `message` property.
    pub(crate) fn make_error(&mut self, kind: JsError, msg: &str) -> Val {
        let proto = self.protos.errors[kind.index()];
        let err = self.alloc_object_cell(ObjCell::plain(proto));
        let msg_val = self.create_string(msg);
        let key = self.intern_literal_string("message");
        self.define_own(err, key, msg_val, 0);
        err
    }

    pub(crate) fn internal_error_val(&mut self, err: &ExecError) -> Val {
        let msg = err.to_string();
        self.make_error(JsError::Internal, &msg)
    }

    // --- strings ---

    /// Creates a string value. Short strings are packed inline, dictionary
    /// hits intern for free, everything else goes to the owned heap (which
    /// may schedule a GC when crowded).
    pub fn create_string(&mut self, s: &str) -> Val {
        if let Some(v) = Val::inline_string(s) {
            return v;
        }
        if let Some(i) = value::dict_lookup(s) {
            return Val::dict_string(i);
        }
        let (offset, serial) = self.strings.alloc(s);
        if self.strings.wants_gc() {
            self.need_gc = true;
        }
        Val::owned_string(offset, serial)
    }

    /// Interns a string for the life of the engine (compiler literals,
    /// bootstrap names). Never subject to compaction, so bcode literal
    /// tables can reference it immutably.
    pub(crate) fn intern_literal_string(&mut self, s: &str) -> Val {
        if let Some(v) = Val::inline_string(s) {
            return v;
        }
        if let Some(i) = value::dict_lookup(s) {
            return Val::dict_string(i);
        }
        if let Some(&i) = self.lit_intern.get(s) {
            return Val::foreign_string(i);
        }
        let i = self.foreign_strs.add(Cow::Owned(s.to_owned()));
        self.lit_intern.insert(s.to_owned(), i);
        Val::foreign_string(i)
    }

    /// Registers a `'static` host string as a foreign string value.
    pub fn create_foreign_string(&mut self, s: &'static str) -> Val {
        if let Some(v) = Val::inline_string(s) {
            return v;
        }
        let i = self.foreign_strs.add(Cow::Borrowed(s));
        Val::foreign_string(i)
    }

    /// Borrows the bytes of a string value.
    ///
    /// The returned borrow is valid until the next allocation (enforced by
    /// the borrow checker: allocation needs `&mut self`). A stale owned
    /// string — one that survived a compaction outside the engine's roots —
    /// reports `ExecError::Internal`.
    pub fn try_str(&self, v: Val) -> ExecResult<Cow<'_, str>> {
        let mut buf = [0u8; 5];
        if let Some(s) = v.inline_str(&mut buf) {
            return Ok(Cow::Owned(s.to_owned()));
        }
        if let Some(i) = v.dict_index() {
            return value::STRING_DICT
                .get(i)
                .map(|s| Cow::Borrowed(*s))
                .ok_or_else(|| ExecError::internal("bad dictionary string index"));
        }
        if let Some(i) = v.foreign_str_index() {
            return self
                .foreign_strs
                .get(i)
                .map(Cow::Borrowed)
                .ok_or_else(|| ExecError::internal("bad foreign string index"));
        }
        if let Some((offset, serial)) = v.owned_str_parts() {
            return match self.strings.get(offset, serial) {
                StrLookup::Ok(s) => Ok(Cow::Borrowed(s)),
                StrLookup::Stale => Err(ExecError::internal("stale string reference")),
            };
        }
        Err(ExecError::InvalidArg("not a string"))
    }

    /// Copies a string value out of the heaps; a stale reference converts
    /// into a thrown `InternalError` value.
    pub(crate) fn str_or_throw(&mut self, v: Val) -> Result<String, Val> {
        match self.try_str(v) {
            Ok(s) => Ok(s.into_owned()),
            Err(e) => Err(self.internal_error_val(&e)),
        }
    }

    /// Literal rendering for the disassembler.
    pub(crate) fn debug_lit(&self, v: Val) -> String {
        if v.is_number() {
            crate::stringify::number_to_string(v.as_number())
        } else if v.is_string() {
            match self.try_str(v) {
                Ok(s) => format!("{s:?}"),
                Err(_) => "<stale string>".to_owned(),
            }
        } else if v.is_function() {
            "<function>".to_owned()
        } else if v.is_regexp() {
            "<regexp>".to_owned()
        } else {
            format!("{v:?}")
        }
    }

    // --- host projections ---

    pub fn is_array(&self, v: Val) -> bool {
        self.obj_attrs(v) & OBJ_DENSE_ARRAY != 0
    }

    /// Host-facing `get`: property read with prototype walk.
    pub fn get_property(&mut self, obj: Val, name: &str) -> ExecResult<Val> {
        let name_val = self.create_string(name);
        self.get_prop(obj, name_val).map_err(|t| self.store_thrown(t))
    }

    /// Host-facing `set`. Host writes are authoritative: they do not consult
    /// strict mode and succeed on frozen scopes.
    pub fn set_property(&mut self, obj: Val, name: &str, value: Val) -> ExecResult<()> {
        let name_val = self.create_string(name);
        self.set_prop(obj, name_val, value).map_err(|t| self.store_thrown(t))
    }

    /// Host-facing `set` with explicit property attributes.
    pub fn set_property_attrs(&mut self, obj: Val, name: &str, value: Val, attrs: u8) {
        let name_val = self.create_string(name);
        self.define_own(obj, name_val, value, attrs);
    }

    pub fn del_property(&mut self, obj: Val, name: &str) -> bool {
        let name_val = self.create_string(name);
        self.del_own(obj, name_val)
    }

    /// Host-facing array element read.
    pub fn array_get_value(&mut self, arr: Val, index: usize) -> ExecResult<Val> {
        self.array_get(arr, index).map_err(|t| self.store_thrown(t))
    }

    /// Host-facing array element write.
    pub fn array_set_value(&mut self, arr: Val, index: usize, v: Val) -> ExecResult<()> {
        self.array_set(arr, index, v).map_err(|t| self.store_thrown(t))
    }

    /// Host-facing array append; returns the new length.
    pub fn array_push_value(&mut self, arr: Val, v: Val) -> ExecResult<usize> {
        self.array_push(arr, v).map_err(|t| self.store_thrown(t))
    }

    /// Host-facing array length.
    pub fn array_length_value(&self, arr: Val) -> usize {
        self.array_length(arr)
    }

    /// Host-facing array element deletion (leaves a hole).
    pub fn array_del_value(&mut self, arr: Val, index: usize) -> bool {
        self.array_del(arr, index)
    }

    /// Host-facing enumeration: feed `Val::NULL` to start, the returned
    /// handle to continue. Yields `(handle, name, value)`.
    pub fn next_property(&mut self, obj: Val, handle: Val) -> ExecResult<Option<(Val, Val, Val)>> {
        self.next_prop(obj, handle).map_err(|t| self.store_thrown(t))
    }

    // --- pinning ---

    /// Pins a value as a GC root. The collector keeps it alive and rewrites
    /// it on string compaction; read the current value with [`Engine::owned`].
    pub fn own(&mut self, v: Val) -> OwnHandle {
        if let Some(slot) = self.owned.iter().position(Option::is_none) {
            self.owned[slot] = Some(v);
            OwnHandle(slot)
        } else {
            self.owned.push(Some(v));
            OwnHandle(self.owned.len() - 1)
        }
    }

    pub fn owned(&self, h: &OwnHandle) -> Val {
        self.owned.get(h.0).copied().flatten().unwrap_or(Val::UNDEFINED)
    }

    /// Releases a pin, returning the (possibly relocated) value.
    pub fn disown(&mut self, h: OwnHandle) -> Val {
        let v = self.owned.get_mut(h.0).and_then(Option::take);
        v.unwrap_or(Val::UNDEFINED)
    }

    // --- thrown-state machinery ---

    /// Records `v` as the pending thrown value and produces the matching
    /// top-level error.
    pub fn store_thrown(&mut self, v: Val) -> ExecError {
        self.thrown = v;
        self.is_thrown = true;
        let shown = self
            .to_display_string(v)
            .unwrap_or_else(|_| "<unprintable>".to_owned());
        ExecError::Exception(shown)
    }

    /// Makes `v` the pending thrown value (host-facing `throw`).
    pub fn throw_value(&mut self, v: Val) {
        self.thrown = v;
        self.is_thrown = true;
    }

    /// Builds an error value of `kind` and records it as thrown; cfunctions
    /// typically `return Err(engine.throwf(...))`.
    pub fn throwf(&mut self, kind: JsError, msg: &str) -> Val {
        let err = self.make_error(kind, msg);
        self.throw_value(err);
        err
    }

    pub fn thrown_value(&self) -> Option<Val> {
        self.is_thrown.then_some(self.thrown)
    }

    pub fn thrown_clear(&mut self) {
        self.is_thrown = false;
        self.thrown = Val::UNDEFINED;
    }

    // --- interrupt ---

    /// A cloneable flag that can be set from another thread or a signal
    /// handler; the VM raises an `InternalError` at the next opcode boundary
    /// it observes the flag.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(self.interrupt.clone())
    }

    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::Relaxed)
    }

    // --- entry points ---

    /// Parses, compiles, and executes a script; returns the final value.
    pub fn exec(&mut self, src: &str) -> ExecResult<Val> {
        let bcode = self.compile_src(src)?;
        self.run_script(bcode)
    }

    /// Parses and compiles a script without executing it.
    pub(crate) fn compile_src(&mut self, src: &str) -> ExecResult<Rc<Bcode>> {
        let ast = parser::parse(src, self.opts.max_parser_frames)?;
        let bcode = compiler::compile_script(self, &ast, src, self.opts.force_strict)?;
        Ok(Rc::new(bcode))
    }

    pub(crate) fn run_script(&mut self, bcode: Rc<Bcode>) -> ExecResult<Val> {
        let global = self.global;
        match self.exec_bcode(bcode, global, global, false) {
            Ok(v) => Ok(v),
            Err(thrown) => Err(self.store_thrown(thrown)),
        }
    }

    /// Executes a script from its binary AST dump.
    pub fn exec_binary_ast(&mut self, bytes: &[u8]) -> ExecResult<Val> {
        let ast = crate::ast::Ast::from_binary(bytes)
            .ok_or(ExecError::InvalidArg("bad AST magic"))?;
        let bcode = compiler::compile_script(self, &ast, "", self.opts.force_strict)?;
        self.run_script(Rc::new(bcode))
    }

    /// Compiles a binary AST dump straight to binary bytecode.
    pub fn compile_binary_ast(&mut self, bytes: &[u8]) -> ExecResult<Vec<u8>> {
        let ast = crate::ast::Ast::from_binary(bytes)
            .ok_or(ExecError::InvalidArg("bad AST magic"))?;
        let bcode = compiler::compile_script(self, &ast, "", self.opts.force_strict)?;
        bcode_to_binary(self, &bcode)
    }

    /// Executes a script from its binary bytecode dump.
    pub fn exec_binary_bcode(&mut self, bytes: &[u8]) -> ExecResult<Val> {
        let bcode = bcode_from_binary(self, bytes)?;
        self.run_script(bcode)
    }

    /// Compiles `src` and renders the requested artifact.
    pub fn compile_to(&mut self, src: &str, target: CompileTarget) -> ExecResult<Vec<u8>> {
        match target {
            CompileTarget::AstText => {
                let ast = parser::parse(src, self.opts.max_parser_frames)?;
                Ok(ast.dump().into_bytes())
            }
            CompileTarget::AstBinary => {
                let ast = parser::parse(src, self.opts.max_parser_frames)?;
                Ok(ast.to_binary())
            }
            CompileTarget::BcodeText => {
                let bcode = self.compile_src(src)?;
                Ok(bcode.disassemble(self).into_bytes())
            }
            CompileTarget::BcodeBinary => {
                let bcode = self.compile_src(src)?;
                bcode_to_binary(self, &bcode)
            }
        }
    }

    /// Synchronous call of a function value from the host.
    pub fn apply(&mut self, func: Val, this: Val, args: &[Val]) -> ExecResult<Val> {
        self.apply_val(func, this, args)
            .map_err(|t| self.store_thrown(t))
    }

    /// Parses JSON text into values.
    pub fn parse_json(&mut self, src: &str) -> ExecResult<Val> {
        crate::json::parse_json(self, src).map_err(|t| self.store_thrown(t))
    }

    /// Engine memory statistics (CLI `-mm`).
    pub fn mem_stats(&self) -> MemStats {
        MemStats {
            object_cells_live: self.objects.live(),
            object_cells_total: self.objects.total_cells(),
            function_cells_live: self.functions.live(),
            function_cells_total: self.functions.total_cells(),
            property_cells_live: self.props.live(),
            property_cells_total: self.props.total_cells(),
            string_heap_used: self.strings.used(),
            string_heap_budget: self.strings.budget(),
            foreign_strings: self.foreign_strs.len(),
            gc_cycles: self.gc_cycles,
        }
    }

    /// The global object.
    pub fn global(&self) -> Val {
        self.global
    }
}

/// Cloneable interrupt flag; see [`Engine::interrupt_handle`].
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Artifacts `Engine::compile_to` can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget {
    AstText,
    AstBinary,
    BcodeText,
    BcodeBinary,
}

// --- built-in cfunctions (core surface only) ---

fn error_ctor(engine: &mut Engine, kind: JsError, args: &[Val]) -> Result<Val, Val> {
    let msg = match args.first() {
        Some(&v) if !v.is_undefined() => engine.to_display_string(v)?,
        _ => String::new(),
    };
    Ok(engine.make_error(kind, &msg))
}

macro_rules! error_ctor_fn {
    ($name:ident, $kind:expr) => {
        fn $name(engine: &mut Engine, _this: Val, args: &[Val]) -> Result<Val, Val> {
            error_ctor(engine, $kind, args)
        }
    };
}

error_ctor_fn!(ctor_error, JsError::Error);
error_ctor_fn!(ctor_type_error, JsError::Type);
error_ctor_fn!(ctor_syntax_error, JsError::Syntax);
error_ctor_fn!(ctor_reference_error, JsError::Reference);
error_ctor_fn!(ctor_internal_error, JsError::Internal);
error_ctor_fn!(ctor_range_error, JsError::Range);
error_ctor_fn!(ctor_eval_error, JsError::Eval);

/// Error constructors in `JsError::ALL` order.
static ERROR_CTORS: [CFunc; 7] = [
    ctor_error,
    ctor_type_error,
    ctor_syntax_error,
    ctor_reference_error,
    ctor_internal_error,
    ctor_range_error,
    ctor_eval_error,
];

fn builtin_json_stringify(engine: &mut Engine, _this: Val, args: &[Val]) -> Result<Val, Val> {
    let v = args.first().copied().unwrap_or(Val::UNDEFINED);
    let text = crate::stringify::stringify(engine, v, crate::stringify::Mode::Json)?;
    Ok(engine.create_string(&text))
}

fn builtin_json_parse(engine: &mut Engine, _this: Val, args: &[Val]) -> Result<Val, Val> {
    let v = args.first().copied().unwrap_or(Val::UNDEFINED);
    let src = engine.to_display_string(v)?;
    crate::json::parse_json(engine, &src)
}

fn builtin_eval(engine: &mut Engine, _this: Val, args: &[Val]) -> Result<Val, Val> {
    let Some(&src_val) = args.first() else {
        return Ok(Val::UNDEFINED);
    };
    if !src_val.is_string() {
        return Ok(src_val);
    }
    let src = engine.to_display_string(src_val)?;
    let bcode = match engine.compile_src(&src) {
        Ok(b) => b,
        Err(ExecError::Syntax(e)) => {
            let msg = e.to_string();
            return Err(engine.make_error(JsError::Syntax, &msg));
        }
        Err(e) => {
            let v = engine.internal_error_val(&e);
            return Err(v);
        }
    };
    let global = engine.global;
    engine.exec_bcode(bcode, global, global, false)
}
