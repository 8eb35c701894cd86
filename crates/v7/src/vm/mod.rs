//! The bytecode interpreter: a fetch-decode-dispatch loop over the current
//! bcode's ops with a data stack, a call-frame record stack, the per-frame
//! try stacks, and a single stash register.
//!
//! Scope frames are ordinary arena objects. A frame's prototype is its
//! lexical parent (variable lookup is a prototype walk); its `____p` hidden
//! slot is the dynamic parent restored when the frame pops, `____s` the data
//! stack length to restore, `____t` the try stack. Caller registers live in
//! the Rust-side `CallFrame` records; a scope with no record is a private
//! catch frame.

pub(crate) mod arith;
pub(crate) mod unwind;

use std::rc::Rc;

use smallvec::SmallVec;

use crate::bytecode::code::read_target;
use crate::bytecode::{Bcode, Opcode};
use crate::engine::{CallFrame, Engine, JsError};
use crate::heap::FuncId;
use crate::object::{ObjCell, ObjData, PROP_DONT_DELETE, PROP_HIDDEN};
use crate::value::Val;
use crate::vm::unwind::{hidden_name, Unwound, TRY_CATCH, TRY_FINALLY, TRY_LOOP, TRY_SWITCH};

/// Cached execution registers of the innermost dispatch loop.
pub(crate) struct CurFrame {
    pub bcode: Rc<Bcode>,
    pub ip: usize,
    /// Scope at exec entry: unwinding never pops past it.
    pub entry_scope: Val,
    /// Call-frame stack length at exec entry.
    pub bottom_frames: usize,
}

/// Reads the next operand varint.
macro_rules! fetch_varint {
    ($cur:expr) => {
        crate::ast::read_varint(&$cur.bcode.ops, &mut $cur.ip).unwrap_or(0) as usize
    };
}

/// Converts a `Result<_, Val>` into the THROW unwinding path.
macro_rules! try_throw {
    ($self:expr, $cur:expr, $expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(thrown) => {
                match $self.do_throw(thrown, $cur) {
                    Unwound::Continue => continue,
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                }
            }
        }
    };
}

impl Engine {
    /// Runs a bcode to completion in a fresh frame context. This is the
    /// nested-evaluator entry: registers are saved and restored around it,
    /// so an exception escaping an inner script stays observable while the
    /// outer state survives.
    pub(crate) fn exec_bcode(
        &mut self,
        bcode: Rc<Bcode>,
        scope: Val,
        this: Val,
        is_ctor: bool,
    ) -> Result<Val, Val> {
        if self.exec_depth >= self.opts.max_call_depth {
            return Err(self.make_error(JsError::Internal, "stack overflow"));
        }
        self.exec_depth += 1;

        let saved_scope = self.scope;
        let saved_ctor = self.is_ctor;
        let saved_stack = self.stack.len();
        let saved_frames = self.call_frames.len();
        let saved_bcodes = self.act_bcodes.len();
        let saved_flags = (
            self.is_thrown,
            self.is_returned,
            self.is_breaking,
            self.is_continuing,
        );
        self.is_thrown = false;
        self.is_returned = false;
        self.is_breaking = false;
        self.is_continuing = false;

        let saved_this = self.this_val;
        let saved_stash = self.stash;
        self.stash = Val::NOVALUE;
        self.scope = scope;
        self.this_val = this;
        self.is_ctor = is_ctor;
        self.act_bcodes.push(bcode.clone());
        self.hoist_vars(scope, &bcode);
        // A nested exec over a shared scope (eval on the global frame) must
        // not see, or unwind into, the outer exec's try entries. The parked
        // array — and the caller's possibly-string registers — ride in the
        // temporary roots so a collection inside the nested exec keeps and
        // relocates them.
        let parked_tries = self.park_tries(scope);
        self.tmp_roots.push(vec![parked_tries, saved_this, saved_stash]);

        let mut cur = CurFrame {
            bcode,
            ip: 0,
            entry_scope: scope,
            bottom_frames: saved_frames,
        };
        let result = self.dispatch(&mut cur);

        let saved = self
            .tmp_roots
            .pop()
            .unwrap_or_else(|| vec![parked_tries, saved_this, saved_stash]);
        self.unpark_tries(scope, saved[0]);
        self.scope = saved_scope;
        self.this_val = saved[1];
        self.stash = saved[2];
        self.is_ctor = saved_ctor;
        self.stack.truncate(saved_stack);
        self.call_frames.truncate(saved_frames);
        self.act_bcodes.truncate(saved_bcodes);
        (
            self.is_thrown,
            self.is_returned,
            self.is_breaking,
            self.is_continuing,
        ) = saved_flags;
        self.exec_depth -= 1;
        result
    }

    /// Defines a bcode's hoisted `var` names on `scope` when absent.
    fn hoist_vars(&mut self, scope: Val, bcode: &Bcode) {
        let first_var = 1 + bcode.args as usize;
        for i in first_var..bcode.names.len() {
            let name = bcode.names[i];
            if self.find_own(scope, name).is_none() {
                self.define_own(scope, name, Val::UNDEFINED, PROP_DONT_DELETE);
            }
        }
    }

    /// Synchronous call used by the host API, accessors, and coercions.
    pub(crate) fn apply_val(&mut self, func: Val, this: Val, args: &[Val]) -> Result<Val, Val> {
        if let Some(cf) = self.cfunc_of(func) {
            return self.call_cfunc(cf, func, this, args);
        }
        let Some(fid) = func.as_func_id() else {
            return Err(self.make_error(JsError::Type, "value is not a function"));
        };
        let (bcode, frame) = self.make_js_frame(fid, args)?;
        self.exec_bcode(bcode, frame, this, false)
    }

    fn cfunc_of(&self, callee: Val) -> Option<crate::engine::CFunc> {
        if let Some(id) = callee.as_cfunc_id() {
            return self.cfuncs.get(id.0 as usize).copied();
        }
        if let Some(oid) = callee.as_obj_id() {
            if let Some(ObjData::Cfunc(id)) = self.obj(oid).map(|o| &o.data) {
                return self.cfuncs.get(id.0 as usize).copied();
            }
        }
        None
    }

    fn call_cfunc(
        &mut self,
        f: crate::engine::CFunc,
        callee: Val,
        this: Val,
        args: &[Val],
    ) -> Result<Val, Val> {
        if self.exec_depth >= self.opts.max_call_depth {
            return Err(self.make_error(JsError::Internal, "stack overflow"));
        }
        self.exec_depth += 1;
        let mut roots = Vec::with_capacity(args.len() + 2);
        roots.push(callee);
        roots.push(this);
        roots.extend_from_slice(args);
        self.tmp_roots.push(roots);
        let result = f(self, this, args);
        self.tmp_roots.pop();
        self.exec_depth -= 1;
        result
    }

    /// Builds the scope frame for a JS function call: prototype-chained to
    /// the captured scope, parameters and hoisted vars bound as properties,
    /// `____p`/`____s` hidden slots recorded.
    fn make_js_frame(&mut self, fid: FuncId, args: &[Val]) -> Result<(Rc<Bcode>, Val), Val> {
        let (bcode, captured) = {
            let Some(fc) = self.functions.get(fid.0) else {
                return Err(self.make_error(JsError::Internal, "dangling function"));
            };
            (fc.bcode.clone(), fc.scope)
        };
        let proto = if captured.is_novalue() {
            self.global
        } else {
            captured
        };
        let frame = self.alloc_object_cell(ObjCell::plain(proto));

        let argc = bcode.args as usize;
        for i in 0..argc {
            let name = bcode.names[1 + i];
            let value = args.get(i).copied().unwrap_or(Val::UNDEFINED);
            self.define_own(frame, name, value, PROP_DONT_DELETE);
        }
        for i in 1 + argc..bcode.names.len() {
            let name = bcode.names[i];
            self.define_own(frame, name, Val::UNDEFINED, PROP_DONT_DELETE);
        }

        let p_key = hidden_name("____p");
        let scope = self.scope;
        self.define_own(frame, p_key, scope, PROP_HIDDEN);
        let s_key = hidden_name("____s");
        self.define_own(
            frame,
            s_key,
            Val::number(self.stack.len() as f64),
            PROP_HIDDEN,
        );
        Ok((bcode, frame))
    }

    fn pop(&mut self) -> Val {
        self.stack.pop().unwrap_or(Val::UNDEFINED)
    }

    fn peek(&self, depth: usize) -> Val {
        let len = self.stack.len();
        if depth < len {
            self.stack[len - 1 - depth]
        } else {
            Val::UNDEFINED
        }
    }

    fn lit(&mut self, cur: &CurFrame, idx: usize) -> Result<Val, Val> {
        cur.bcode.lit.get(idx).copied().ok_or_else(|| {
            self.make_error(JsError::Internal, "literal index out of range")
        })
    }

    /// The dispatch loop. Returns the exec result: the bottom frame's value
    /// or the uncaught thrown value.
    fn dispatch(&mut self, cur: &mut CurFrame) -> Result<Val, Val> {
        loop {
            // Opcode boundary: GC and interrupt checks happen here, never
            // in the middle of an instruction.
            if self.need_gc && self.inhibit_gc == 0 {
                self.run_gc(Some(cur));
            }
            if self.take_interrupt() {
                let err = self.make_error(JsError::Internal, "interrupted");
                match self.do_throw(err, cur) {
                    Unwound::Continue => continue,
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                }
            }

            if cur.ip >= cur.bcode.ops.len() {
                // Falling off the end: the script's seed value is TOS.
                if self.call_frames.len() == cur.bottom_frames && self.scope == cur.entry_scope {
                    return Ok(self.pop());
                }
                // A function body always ends in RET; treat anything else
                // as an implicit `return undefined`.
                match self.do_ret(Val::UNDEFINED, cur) {
                    Unwound::Continue => continue,
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                }
            }

            let byte = cur.bcode.ops[cur.ip];
            let Some(op) = Opcode::from_repr(byte) else {
                let err = self.make_error(JsError::Internal, "bad opcode");
                match self.do_throw(err, cur) {
                    Unwound::Continue => continue,
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                }
            };
            self.tracer.on_op(cur.ip, op as u8, self.stack.len());
            cur.ip += 1;

            match op {
                Opcode::Drop => {
                    self.pop();
                }
                Opcode::Dup => {
                    let v = self.peek(0);
                    self.stack.push(v);
                }
                Opcode::TwoDup => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    self.stack.push(a);
                    self.stack.push(b);
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    if len >= 2 {
                        self.stack.swap(len - 1, len - 2);
                    }
                }
                Opcode::SwapDrop => {
                    let top = self.pop();
                    self.pop();
                    self.stack.push(top);
                }
                Opcode::Stash => {
                    self.stash = self.pop();
                }
                Opcode::Unstash => {
                    let v = self.stash;
                    self.stash = Val::NOVALUE;
                    self.stack
                        .push(if v.is_novalue() { Val::UNDEFINED } else { v });
                }

                Opcode::PushUndefined => self.stack.push(Val::UNDEFINED),
                Opcode::PushNull => self.stack.push(Val::NULL),
                Opcode::PushThis => self.stack.push(self.this_val),
                Opcode::PushTrue => self.stack.push(Val::TRUE),
                Opcode::PushFalse => self.stack.push(Val::FALSE),
                Opcode::PushZero => self.stack.push(Val::number(0.0)),
                Opcode::PushOne => self.stack.push(Val::number(1.0)),
                Opcode::PushLit => {
                    let idx = fetch_varint!(cur);
                    let v = try_throw!(self, cur, self.lit(cur, idx));
                    self.stack.push(v);
                }

                Opcode::Not => {
                    let v = self.peek(0);
                    let n = try_throw!(self, cur, self.to_int32(v));
                    self.pop();
                    self.stack.push(Val::number(f64::from(!n)));
                }
                Opcode::LogicalNot => {
                    let v = self.pop();
                    self.stack.push(Val::boolean(!self.to_boolean(v)));
                }
                Opcode::Neg => {
                    let v = self.peek(0);
                    let n = try_throw!(self, cur, self.to_number(v));
                    self.pop();
                    self.stack.push(Val::number(-n));
                }
                Opcode::Pos => {
                    let v = self.peek(0);
                    let n = try_throw!(self, cur, self.to_number(v));
                    self.pop();
                    self.stack.push(Val::number(n));
                }
                Opcode::Typeof => {
                    let v = self.pop();
                    let s = self.create_string(v.type_of());
                    self.stack.push(s);
                }

                Opcode::Add
                | Opcode::Sub
                | Opcode::Rem
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Lshift
                | Opcode::Rshift
                | Opcode::Urshift
                | Opcode::Or
                | Opcode::Xor
                | Opcode::And => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let r = try_throw!(self, cur, self.binary_op(op, a, b));
                    self.pop();
                    self.pop();
                    self.stack.push(r);
                }

                Opcode::Eq | Opcode::Ne | Opcode::EqEq | Opcode::NeNe => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let eq = match op {
                        Opcode::EqEq | Opcode::NeNe => self.strict_equals(a, b),
                        _ => try_throw!(self, cur, self.loose_equals(a, b)),
                    };
                    let truth = matches!(op, Opcode::Eq | Opcode::EqEq) == eq;
                    self.pop();
                    self.pop();
                    self.stack.push(Val::boolean(truth));
                }
                Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let r = try_throw!(self, cur, self.relational(op, a, b));
                    self.pop();
                    self.pop();
                    self.stack.push(Val::boolean(r));
                }
                Opcode::Instanceof => {
                    let ctor = self.peek(0);
                    let v = self.peek(1);
                    let r = try_throw!(self, cur, self.instance_of(v, ctor));
                    self.pop();
                    self.pop();
                    self.stack.push(Val::boolean(r));
                }
                Opcode::In => {
                    let obj = self.peek(0);
                    let key = self.peek(1);
                    let r = try_throw!(self, cur, self.has_property(obj, key));
                    self.pop();
                    self.pop();
                    self.stack.push(Val::boolean(r));
                }

                Opcode::Get => {
                    let name = self.peek(0);
                    let obj = self.peek(1);
                    let v = try_throw!(self, cur, self.get_prop(obj, name));
                    self.pop();
                    self.pop();
                    self.stack.push(v);
                }
                Opcode::Set => {
                    let value = self.peek(0);
                    let name = self.peek(1);
                    let obj = self.peek(2);
                    try_throw!(self, cur, self.set_prop(obj, name, value));
                    // Re-read: a setter may have run JS and compacted the
                    // string heap; the stack copy was relocated, the local
                    // was not.
                    let value = self.peek(0);
                    self.pop();
                    self.pop();
                    self.pop();
                    self.stack.push(value);
                }
                Opcode::GetVar | Opcode::SafeGetVar => {
                    let idx = fetch_varint!(cur);
                    let name = try_throw!(self, cur, self.lit(cur, idx));
                    match self.lookup_var(name) {
                        Some(v) => self.stack.push(v),
                        None if op == Opcode::SafeGetVar => self.stack.push(Val::UNDEFINED),
                        None => {
                            let shown = self
                                .try_str(name)
                                .map(|s| s.into_owned())
                                .unwrap_or_default();
                            let err =
                                self.make_error(JsError::Reference, &format!("[{shown}] is not defined"));
                            try_throw!(self, cur, Err::<(), Val>(err));
                        }
                    }
                }
                Opcode::SetVar => {
                    let idx = fetch_varint!(cur);
                    let name = try_throw!(self, cur, self.lit(cur, idx));
                    let value = self.peek(0);
                    try_throw!(self, cur, self.assign_var(name, value, cur.bcode.strict));
                }
                Opcode::Delete => {
                    let name = self.peek(0);
                    let obj = self.peek(1);
                    let r = self.del_prop_val(obj, name);
                    self.pop();
                    self.pop();
                    self.stack.push(Val::boolean(r));
                }
                Opcode::DeleteVar => {
                    let idx = fetch_varint!(cur);
                    let name = try_throw!(self, cur, self.lit(cur, idx));
                    let r = self.delete_var(name);
                    self.stack.push(Val::boolean(r));
                }

                Opcode::Jmp => {
                    let target = read_target(&cur.bcode.ops, &mut cur.ip).unwrap_or(0);
                    cur.ip = target;
                }
                Opcode::JmpTrue | Opcode::JmpFalse => {
                    let target = read_target(&cur.bcode.ops, &mut cur.ip).unwrap_or(0);
                    let cond = self.pop();
                    let truthy = self.to_boolean(cond);
                    if truthy == (op == Opcode::JmpTrue) {
                        cur.ip = target;
                    }
                }
                Opcode::JmpTrueDrop => {
                    let target = read_target(&cur.bcode.ops, &mut cur.ip).unwrap_or(0);
                    let cond = self.pop();
                    if self.to_boolean(cond) {
                        self.pop();
                        cur.ip = target;
                    }
                }
                Opcode::JmpIfContinue => {
                    let target = read_target(&cur.bcode.ops, &mut cur.ip).unwrap_or(0);
                    if self.is_continuing {
                        self.is_continuing = false;
                        cur.ip = target;
                    }
                }

                Opcode::CreateObj => {
                    let o = self.create_object();
                    self.stack.push(o);
                }
                Opcode::CreateArr => {
                    let a = self.create_array();
                    self.stack.push(a);
                }
                Opcode::NextProp => {
                    let handle = self.peek(0);
                    let obj = self.peek(1);
                    let next = try_throw!(self, cur, self.next_prop(obj, handle));
                    self.pop();
                    self.pop();
                    match next {
                        Some((handle, name, _value)) => {
                            self.stack.push(obj);
                            self.stack.push(handle);
                            self.stack.push(name);
                            self.stack.push(Val::TRUE);
                        }
                        None => self.stack.push(Val::FALSE),
                    }
                }
                Opcode::FuncLit => {
                    let idx = fetch_varint!(cur);
                    let template = try_throw!(self, cur, self.lit(cur, idx));
                    let Some(fid) = template.as_func_id() else {
                        let err = self.make_error(JsError::Internal, "bad function literal");
                        try_throw!(self, cur, Err::<(), Val>(err));
                        continue;
                    };
                    let scope = self.scope;
                    let closure = self.make_closure(fid, scope).unwrap_or(Val::UNDEFINED);
                    self.stack.push(closure);
                }

                Opcode::Call | Opcode::New => {
                    let argc = cur.bcode.ops.get(cur.ip).copied().unwrap_or(0) as usize;
                    cur.ip += 1;
                    try_throw!(self, cur, self.op_call(cur, argc, op == Opcode::New));
                }
                Opcode::Ret => {
                    let value = self.pop();
                    match self.do_ret(value, cur) {
                        Unwound::Continue => {}
                        Unwound::Thrown(v) => return Err(v),
                        Unwound::Finished(v) => return Ok(v),
                    }
                }

                Opcode::TryPushCatch
                | Opcode::TryPushFinally
                | Opcode::TryPushLoop
                | Opcode::TryPushSwitch => {
                    let target = read_target(&cur.bcode.ops, &mut cur.ip).unwrap_or(0);
                    let tag = match op {
                        Opcode::TryPushCatch => TRY_CATCH,
                        Opcode::TryPushFinally => TRY_FINALLY,
                        Opcode::TryPushLoop => TRY_LOOP,
                        _ => TRY_SWITCH,
                    };
                    self.try_push(tag, target);
                }
                Opcode::TryPop => {
                    self.try_pop();
                }
                Opcode::AfterFinally => match self.after_finally(cur) {
                    Unwound::Continue => {}
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                },
                Opcode::Throw => {
                    let v = self.pop();
                    match self.do_throw(v, cur) {
                        Unwound::Continue => {}
                        Unwound::Thrown(v) => return Err(v),
                        Unwound::Finished(v) => return Ok(v),
                    }
                }
                Opcode::Break => match self.do_break(cur) {
                    Unwound::Continue => {}
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                },
                Opcode::Continue => match self.do_continue(cur) {
                    Unwound::Continue => {}
                    Unwound::Thrown(v) => return Err(v),
                    Unwound::Finished(v) => return Ok(v),
                },
                Opcode::EnterCatch => {
                    let idx = fetch_varint!(cur);
                    let name = try_throw!(self, cur, self.lit(cur, idx));
                    let caught = self.pop();
                    let scope = self.scope;
                    let frame = self.alloc_object_cell(ObjCell::plain(scope));
                    self.define_own(frame, name, caught, PROP_DONT_DELETE);
                    let p_key = hidden_name("____p");
                    self.define_own(frame, p_key, scope, PROP_HIDDEN);
                    let s_key = hidden_name("____s");
                    self.define_own(
                        frame,
                        s_key,
                        Val::number(self.stack.len() as f64),
                        PROP_HIDDEN,
                    );
                    self.scope = frame;
                }
                Opcode::ExitCatch => {
                    let parent = self.frame_parent(self.scope);
                    if !parent.is_undefined() {
                        self.scope = parent;
                    }
                }
            }
        }
    }

    /// CALL/NEW: pops `argc` arguments, the callee, and `this`; dispatches
    /// to a host callback inline or installs a new frame and jumps into the
    /// callee's ops.
    fn op_call(&mut self, cur: &mut CurFrame, argc: usize, is_new: bool) -> Result<(), Val> {
        let len = self.stack.len();
        if len < argc + 2 {
            return Err(self.make_error(JsError::Internal, "call underflows the stack"));
        }
        let args: SmallVec<[Val; 8]> = self.stack[len - argc..].iter().copied().collect();
        let callee = self.stack[len - argc - 1];
        let mut this = self.stack[len - argc - 2];
        if this.is_undefined() {
            // Sloppy-mode plain calls see the global object as `this`.
            this = self.global;
        }

        if is_new {
            // Fresh object chained to the constructor's prototype.
            let proto_key = Val::dict_string(
                crate::value::dict_lookup("prototype").unwrap_or_default(),
            );
            let proto = self.get_prop(callee, proto_key)?;
            let proto = if proto.is_object() || proto.is_regexp() {
                proto
            } else {
                self.protos.object
            };
            this = self.create_object_with_proto(proto);
        }

        if let Some(f) = self.cfunc_of(callee) {
            let result = self.call_cfunc(f, callee, this, &args);
            self.stack.truncate(len - argc - 2);
            let value = result?;
            let value = if is_new && !value.is_object() { this } else { value };
            self.stack.push(value);
            return Ok(());
        }

        let Some(fid) = callee.as_func_id() else {
            let shown = self
                .to_display_string(callee)
                .unwrap_or_else(|_| "value".to_owned());
            return Err(self.make_error(JsError::Type, &format!("{shown} is not a function")));
        };
        if self.call_frames.len() - cur.bottom_frames >= self.opts.max_call_depth {
            return Err(self.make_error(JsError::Internal, "stack overflow"));
        }

        // Arguments stay on the data stack while the frame is built, so a
        // GC scheduled by these allocations still sees them as roots.
        let (bcode, frame) = self.make_js_frame(fid, &args)?;
        self.stack.truncate(len - argc - 2);
        // ____s must reflect the stack after the pops.
        let s_key = hidden_name("____s");
        self.define_own(
            frame,
            s_key,
            Val::number(self.stack.len() as f64),
            PROP_HIDDEN,
        );

        self.call_frames.push(CallFrame {
            bcode: cur.bcode.clone(),
            ret_ip: cur.ip,
            this: self.this_val,
            is_ctor: self.is_ctor,
            frame,
        });
        self.tracer.on_call(self.call_frames.len());
        cur.bcode = bcode;
        cur.ip = 0;
        self.scope = frame;
        self.this_val = this;
        self.is_ctor = is_new;
        Ok(())
    }

    /// Variable lookup: a prototype-chain walk from the current scope.
    pub(crate) fn lookup_var(&mut self, name: Val) -> Option<Val> {
        let mut cur = self.scope;
        loop {
            if let Some(pid) = self.find_own(cur, name) {
                let v = self.prop(pid).map_or(Val::UNDEFINED, |p| p.value);
                return Some(if v.is_novalue() { Val::UNDEFINED } else { v });
            }
            let next = self.lookup_proto(cur);
            if next.is_null() || next.is_undefined() || next == cur {
                return None;
            }
            cur = next;
        }
    }

    /// SET_VAR: assigns through the scope chain; a miss creates a global in
    /// sloppy mode and throws ReferenceError in strict mode.
    fn assign_var(&mut self, name: Val, value: Val, strict: bool) -> Result<(), Val> {
        let mut cur = self.scope;
        loop {
            if let Some(pid) = self.find_own(cur, name) {
                let read_only = self
                    .prop(pid)
                    .is_some_and(|p| p.attrs & crate::object::PROP_READ_ONLY != 0);
                if !read_only {
                    if let Some(p) = self.prop_mut(pid) {
                        p.value = value;
                    }
                }
                return Ok(());
            }
            let next = self.lookup_proto(cur);
            if next.is_null() || next.is_undefined() || next == cur {
                break;
            }
            cur = next;
        }
        if strict {
            let shown = self
                .try_str(name)
                .map(|s| s.into_owned())
                .unwrap_or_default();
            return Err(self.make_error(
                JsError::Reference,
                &format!("[{shown}] is not defined"),
            ));
        }
        let global = self.global;
        self.define_own(global, name, value, 0);
        Ok(())
    }

    fn delete_var(&mut self, name: Val) -> bool {
        let mut cur = self.scope;
        loop {
            if self.find_own(cur, name).is_some() {
                return self.del_own(cur, name);
            }
            let next = self.lookup_proto(cur);
            if next.is_null() || next.is_undefined() || next == cur {
                return true;
            }
            cur = next;
        }
    }

    fn del_prop_val(&mut self, obj: Val, name: Val) -> bool {
        if self.find_own(obj, name).is_some() {
            return self.del_own(obj, name);
        }
        // Dense element deletion leaves a hole.
        if self.is_array(obj) {
            if let Ok(name_str) = self.try_str(name) {
                if let Ok(i) = name_str.parse::<usize>() {
                    return self.array_del(obj, i);
                }
            } else if name.is_number() {
                let n = name.as_number();
                if n.fract() == 0.0 && n >= 0.0 {
                    return self.array_del(obj, n as usize);
                }
            }
        }
        true
    }

    /// `in` operator: property existence through the prototype chain.
    fn has_property(&mut self, obj: Val, key: Val) -> Result<bool, Val> {
        if !(obj.is_object() || obj.is_regexp()) {
            return Err(self.make_error(
                JsError::Type,
                "'in' operator applied to a non-object",
            ));
        }
        let (key, key_str) = {
            let s = match self.try_str(key) {
                Ok(s) => s.into_owned(),
                Err(_) => self.to_display_string(key)?,
            };
            (self.create_string(&s), s)
        };
        if self.is_array(obj) {
            if let Ok(i) = key_str.parse::<usize>() {
                if let Some(ObjData::DenseArray(v)) =
                    obj.as_obj_id().and_then(|oid| self.obj(oid)).map(|o| &o.data)
                {
                    if v.get(i).is_some_and(|e| !e.is_novalue()) {
                        return Ok(true);
                    }
                }
            }
            if key_str == "length" {
                return Ok(true);
            }
        }
        let mut cur = obj;
        loop {
            if self.find_own(cur, key).is_some() {
                return Ok(true);
            }
            let next = self.lookup_proto(cur);
            if next.is_null() || next.is_undefined() || next == cur {
                return Ok(false);
            }
            cur = next;
        }
    }

    /// `instanceof`: walks the value's prototype chain looking for the
    /// constructor's `prototype` object.
    fn instance_of(&mut self, v: Val, ctor: Val) -> Result<bool, Val> {
        if !(ctor.is_function() || self.cfunc_of(ctor).is_some()) {
            return Err(self.make_error(JsError::Type, "expecting a function in instanceof check"));
        }
        let proto_key = Val::dict_string(crate::value::dict_lookup("prototype").unwrap_or_default());
        let expected = self.get_prop(ctor, proto_key)?;
        if !v.is_object() && !v.is_regexp() {
            return Ok(false);
        }
        let mut cur = self.lookup_proto(v);
        loop {
            if cur == expected {
                return Ok(true);
            }
            if cur.is_null() || cur.is_undefined() {
                return Ok(false);
            }
            let next = self.lookup_proto(cur);
            if next == cur {
                return Ok(false);
            }
            cur = next;
        }
    }
}
