//! The try stack and non-local control flow.
//!
//! Each frame object carries a `____t` hidden property: a dense array of
//! packed 53-bit integers stored as JS numbers. Entry layout: bits 0..31 the
//! target bcode offset, bits 32..34 the tag (1=catch, 2=finally, 3=loop,
//! 4=switch), bits 35..50 the data-stack depth saved at push time.
//!
//! THROW, BREAK, CONTINUE, and RET all walk this stack. A finally entry
//! found along any walk latches the pending action and jumps into the
//! finally body; the `AFTER_FINALLY` opcode at its end re-raises whatever
//! was latched, which is what makes `try/finally` intercept every exit path
//! exactly once.

use crate::engine::{Engine, JsError};
use crate::object::{ObjData, PROP_HIDDEN};
use crate::value::Val;
use crate::vm::CurFrame;

pub(crate) const TRY_CATCH: u8 = 1;
pub(crate) const TRY_FINALLY: u8 = 2;
pub(crate) const TRY_LOOP: u8 = 3;
pub(crate) const TRY_SWITCH: u8 = 4;

/// A decoded try-stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TryEntry {
    pub target: usize,
    pub tag: u8,
    pub depth: usize,
}

impl TryEntry {
    pub fn pack(self) -> f64 {
        debug_assert!(self.target < (1usize << 32));
        debug_assert!(self.depth < (1usize << 16));
        let bits = self.target as u64 | (u64::from(self.tag) << 32) | ((self.depth as u64) << 35);
        bits as f64
    }

    pub fn unpack(v: f64) -> Self {
        let bits = v as u64;
        Self {
            target: (bits & 0xffff_ffff) as usize,
            tag: ((bits >> 32) & 0x7) as u8,
            depth: ((bits >> 35) & 0xffff) as usize,
        }
    }
}

/// Outcome of an unwinding walk: either execution continues at a new ip or
/// the current exec is done (uncaught throw or bottom-frame return).
pub(crate) enum Unwound {
    Continue,
    /// Uncaught: the value left the exec.
    Thrown(Val),
    /// The bottom frame of this exec returned.
    Finished(Val),
}

pub(crate) fn hidden_name(s: &str) -> Val {
    Val::inline_string(s).expect("hidden slot names pack inline")
}

impl Engine {
    /// The `____t` dense array of `frame`, created on demand. A nested exec
    /// parks the outer array by overwriting the slot with `NOVALUE`, so a
    /// non-array value here means "empty" and is replaced when needed.
    fn try_stack(&mut self, frame: Val, create: bool) -> Option<Val> {
        let key = hidden_name("____t");
        if let Some(pid) = self.find_own(frame, key) {
            let current = self.prop(pid)?.value;
            if self.is_array(current) {
                return Some(current);
            }
            if !create {
                return None;
            }
            let arr = self.create_array();
            if let Some(pid) = self.find_own(frame, key) {
                if let Some(p) = self.prop_mut(pid) {
                    p.value = arr;
                }
            }
            return Some(arr);
        }
        if !create {
            return None;
        }
        let arr = self.create_array();
        self.define_own(frame, key, arr, PROP_HIDDEN);
        Some(arr)
    }

    /// Parks the current `____t` of `frame` (for nested exec isolation) and
    /// returns what was there; pass the value back to [`Engine::unpark_tries`].
    pub(crate) fn park_tries(&mut self, frame: Val) -> Val {
        let key = hidden_name("____t");
        match self.find_own(frame, key) {
            Some(pid) => {
                let old = self.prop(pid).map_or(Val::NOVALUE, |p| p.value);
                if let Some(p) = self.prop_mut(pid) {
                    p.value = Val::NOVALUE;
                }
                old
            }
            None => Val::NOVALUE,
        }
    }

    pub(crate) fn unpark_tries(&mut self, frame: Val, old: Val) {
        let key = hidden_name("____t");
        if let Some(pid) = self.find_own(frame, key) {
            if let Some(p) = self.prop_mut(pid) {
                p.value = old;
            }
        } else if !old.is_novalue() {
            self.define_own(frame, key, old, PROP_HIDDEN);
        }
    }

    pub(crate) fn try_push(&mut self, tag: u8, target: usize) {
        let entry = TryEntry {
            target,
            tag,
            depth: self.stack.len(),
        };
        let scope = self.scope;
        let arr = match self.try_stack(scope, true) {
            Some(a) => a,
            None => return,
        };
        if let Some(ObjData::DenseArray(v)) =
            arr.as_obj_id().and_then(|oid| self.obj_mut(oid)).map(|o| &mut o.data)
        {
            v.push(Val::number(entry.pack()));
        }
    }

    fn try_peek(&mut self, frame: Val) -> Option<TryEntry> {
        let arr = self.try_stack(frame, false)?;
        if let Some(ObjData::DenseArray(v)) =
            arr.as_obj_id().and_then(|oid| self.obj(oid)).map(|o| &o.data)
        {
            v.last().map(|e| TryEntry::unpack(e.as_number()))
        } else {
            None
        }
    }

    pub(crate) fn try_pop(&mut self) -> Option<TryEntry> {
        let scope = self.scope;
        let arr = self.try_stack(scope, false)?;
        if let Some(ObjData::DenseArray(v)) =
            arr.as_obj_id().and_then(|oid| self.obj_mut(oid)).map(|o| &mut o.data)
        {
            v.pop().map(|e| TryEntry::unpack(e.as_number()))
        } else {
            None
        }
    }

    fn restore_depth(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    /// Pops one scope frame during a throw walk. Function frames restore the
    /// caller's registers; private frames just step to `____p`. Returns
    /// false when the bottom of this exec is reached.
    fn pop_frame_for_throw(&mut self, cur: &mut CurFrame) -> bool {
        if self.scope == cur.entry_scope {
            return false;
        }
        if let Some(cf) = self.call_frames.last() {
            if cf.frame == self.scope && self.call_frames.len() > cur.bottom_frames {
                let cf = self.call_frames.pop().expect("checked above");
                let parent = self.frame_parent(cf.frame);
                self.restore_depth(self.frame_saved_depth(cf.frame));
                self.scope = parent;
                self.this_val = cf.this;
                self.is_ctor = cf.is_ctor;
                cur.bcode = cf.bcode;
                cur.ip = cf.ret_ip;
                return true;
            }
        }
        let parent = self.frame_parent(self.scope);
        if parent.is_undefined() {
            return false;
        }
        self.scope = parent;
        true
    }

    pub(crate) fn frame_parent(&self, frame: Val) -> Val {
        let key = hidden_name("____p");
        self.find_own(frame, key)
            .and_then(|pid| self.prop(pid))
            .map_or(Val::UNDEFINED, |p| p.value)
    }

    pub(crate) fn frame_saved_depth(&self, frame: Val) -> usize {
        let key = hidden_name("____s");
        self.find_own(frame, key)
            .and_then(|pid| self.prop(pid))
            .map_or(0, |p| p.value.as_number() as usize)
    }

    /// THROW: record the value, then walk catch/finally entries outward,
    /// popping frames (restoring caller registers at function frames) until
    /// a handler takes over or the exec's bottom frame is passed.
    pub(crate) fn do_throw(&mut self, thrown: Val, cur: &mut CurFrame) -> Unwound {
        self.thrown = thrown;
        self.is_thrown = true;
        self.tracer.on_throw();
        loop {
            while let Some(entry) = self.try_peek(self.scope) {
                self.try_pop();
                match entry.tag {
                    TRY_CATCH => {
                        self.restore_depth(entry.depth);
                        self.stack.push(self.thrown);
                        self.is_thrown = false;
                        self.thrown = Val::UNDEFINED;
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    TRY_FINALLY => {
                        // Keep the thrown latch set; AFTER_FINALLY re-raises.
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    _ => {} // loop/switch entries are discarded
                }
            }
            if !self.pop_frame_for_throw(cur) {
                let v = self.thrown;
                return Unwound::Thrown(v);
            }
        }
    }

    /// RET: latch the return value, run intervening finallys, then pop the
    /// function frame and resume the caller (or finish this exec).
    pub(crate) fn do_ret(&mut self, value: Val, cur: &mut CurFrame) -> Unwound {
        self.returned = value;
        self.is_returned = true;
        loop {
            while let Some(entry) = self.try_peek(self.scope) {
                self.try_pop();
                match entry.tag {
                    TRY_FINALLY => {
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    _ => {} // catch/loop/switch entries are discarded
                }
            }
            // Private (catch) frames between here and the function frame.
            let is_function_frame = self
                .call_frames
                .last()
                .is_some_and(|cf| cf.frame == self.scope && self.call_frames.len() > cur.bottom_frames);
            if is_function_frame {
                let cf = self.call_frames.pop().expect("checked above");
                let mut value = self.returned;
                if self.is_ctor && !value.is_object() {
                    value = self.this_val;
                }
                self.is_returned = false;
                self.returned = Val::UNDEFINED;
                self.restore_depth(self.frame_saved_depth(cf.frame));
                self.scope = self.frame_parent(cf.frame);
                self.this_val = cf.this;
                self.is_ctor = cf.is_ctor;
                cur.bcode = cf.bcode;
                cur.ip = cf.ret_ip;
                self.stack.push(value);
                self.tracer.on_return(self.call_frames.len());
                return Unwound::Continue;
            }
            if self.scope == cur.entry_scope {
                // Bottom frame of this exec.
                let mut value = self.returned;
                if self.is_ctor && !value.is_object() {
                    value = self.this_val;
                }
                self.is_returned = false;
                self.returned = Val::UNDEFINED;
                return Unwound::Finished(value);
            }
            let parent = self.frame_parent(self.scope);
            if parent.is_undefined() {
                let err = self.make_error(JsError::Internal, "return outside of frame");
                return Unwound::Thrown(err);
            }
            self.scope = parent;
        }
    }

    /// BREAK: walk to the nearest loop or switch entry. Finally entries on
    /// the way latch `is_breaking` and run first.
    pub(crate) fn do_break(&mut self, cur: &mut CurFrame) -> Unwound {
        loop {
            match self.try_peek(self.scope) {
                Some(entry) => match entry.tag {
                    TRY_CATCH => {
                        self.try_pop();
                    }
                    TRY_FINALLY => {
                        self.try_pop();
                        self.is_breaking = true;
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    _ => {
                        // loop or switch: land on its pad, keep the entry
                        // (the pad's TRY_POP removes it).
                        self.is_breaking = false;
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                },
                None => {
                    let err = self.make_error(JsError::Internal, "break outside of loop");
                    return self.do_throw(err, cur);
                }
            }
        }
    }

    /// CONTINUE: like BREAK but only loop entries terminate the walk, and
    /// the `is_continuing` latch survives into the landing pad, where
    /// `JMP_IF_CONTINUE` routes back to the iteration point.
    pub(crate) fn do_continue(&mut self, cur: &mut CurFrame) -> Unwound {
        loop {
            match self.try_peek(self.scope) {
                Some(entry) => match entry.tag {
                    TRY_CATCH | TRY_SWITCH => {
                        self.try_pop();
                    }
                    TRY_FINALLY => {
                        self.try_pop();
                        self.is_continuing = true;
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    TRY_LOOP => {
                        self.is_continuing = true;
                        self.restore_depth(entry.depth);
                        cur.ip = entry.target;
                        return Unwound::Continue;
                    }
                    _ => {
                        self.try_pop();
                    }
                },
                None => {
                    let err = self.make_error(JsError::Internal, "continue outside of loop");
                    return self.do_throw(err, cur);
                }
            }
        }
    }

    /// AFTER_FINALLY: re-raise whatever the finally intercepted.
    pub(crate) fn after_finally(&mut self, cur: &mut CurFrame) -> Unwound {
        if self.is_thrown {
            let v = self.thrown;
            self.do_throw(v, cur)
        } else if self.is_returned {
            let v = self.returned;
            self.do_ret(v, cur)
        } else if self.is_breaking {
            self.is_breaking = false;
            self.do_break(cur)
        } else if self.is_continuing {
            self.is_continuing = false;
            self.do_continue(cur)
        } else {
            Unwound::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_entry_packs_53_bits() {
        let e = TryEntry {
            target: 0xfedc_ba98,
            tag: TRY_FINALLY,
            depth: 0xffff,
        };
        let packed = e.pack();
        assert_eq!(TryEntry::unpack(packed), e);
        // fits a JS number exactly
        assert!(packed < 2f64.powi(53));
        assert_eq!(packed, (packed as u64) as f64);
    }

    #[test]
    fn tags_match_wire_values() {
        assert_eq!(TRY_CATCH, 1);
        assert_eq!(TRY_FINALLY, 2);
        assert_eq!(TRY_LOOP, 3);
        assert_eq!(TRY_SWITCH, 4);
    }
}
