//! The garbage collector: mark-sweep over the three arenas, mark-compact
//! over the owned-string heap.
//!
//! Marking is a worklist descent from the root set of §the engine: the
//! prototype and error-constructor tables, the global object, the current
//! scope/`this`, the data stack, the stash, the thrown and returned slots,
//! pinned host values, temporary cfunction roots, the call-frame records,
//! and the literal/name tables of every active bcode (shared bcodes are
//! deduplicated by pointer identity).
//!
//! String compaction rewrites every owned-string val the engine can reach
//! with its relocated offset. Bcode literal strings are interned as foreign
//! strings precisely so this pass never needs to touch a literal table.

use ahash::AHashSet;
use std::rc::Rc;

use crate::bytecode::Bcode;
use crate::engine::Engine;
use crate::object::{ObjData, PropCell};
use crate::value::Val;
use crate::vm::CurFrame;

#[derive(Default)]
struct MarkState {
    work: Vec<Val>,
    bcodes: Vec<Rc<Bcode>>,
    seen_bcodes: AHashSet<*const Bcode>,
    live_strings: Vec<u32>,
}

impl Engine {
    /// Explicit collection. `full` also compacts the string heap even when
    /// it is below the occupancy trigger.
    pub fn gc(&mut self, full: bool) {
        self.collect(None, full);
    }

    /// Collection at an opcode boundary; `cur` supplies the innermost
    /// executing bcode as an extra root.
    pub(crate) fn run_gc(&mut self, cur: Option<&CurFrame>) {
        self.collect(cur, false);
    }

    fn collect(&mut self, cur: Option<&CurFrame>, full: bool) {
        if self.inhibit_gc > 0 {
            return;
        }
        let mut st = MarkState::default();

        // Root set.
        st.work.extend(self.protos.roots());
        st.work.push(self.global);
        st.work.push(self.scope);
        st.work.push(self.this_val);
        st.work.extend_from_slice(&self.stack);
        if !self.stash.is_novalue() {
            st.work.push(self.stash);
        }
        st.work.push(self.thrown);
        st.work.push(self.returned);
        st.work.extend(self.error_ctors);
        st.work.extend(self.owned.iter().copied().flatten());
        for roots in &self.tmp_roots {
            st.work.extend_from_slice(roots);
        }
        for cf in &self.call_frames {
            st.work.push(cf.this);
            st.work.push(cf.frame);
            st.bcodes.push(cf.bcode.clone());
        }
        st.bcodes.extend(self.act_bcodes.iter().cloned());
        if let Some(cur) = cur {
            st.bcodes.push(cur.bcode.clone());
        }

        self.mark(&mut st);

        // Sweep. Dropping a cell's payload is its destructor: dense-array
        // backing, compiled regexp programs, and bcode refcounts go with it.
        let mut freed = 0usize;
        freed += self.props.sweep(|_, _| {});
        freed += self.functions.sweep(|_, _| {});
        freed += self.objects.sweep(|_, _| {});

        // String compaction.
        let mut compacted = 0usize;
        if full || self.strings.wants_gc() {
            let before = self.strings.used();
            st.live_strings.sort_unstable();
            st.live_strings.dedup();
            let map = self.strings.compact(&st.live_strings);
            compacted = before.saturating_sub(self.strings.used());
            if !map.is_empty() {
                let map: ahash::AHashMap<u32, u32> = map.into_iter().collect();
                self.relocate_strings(&map);
            }
        }

        self.need_gc = false;
        self.gc_cycles += 1;
        self.tracer.on_gc(freed, compacted);
    }

    fn mark(&mut self, st: &mut MarkState) {
        loop {
            while let Some(v) = st.work.pop() {
                self.mark_val(v, st);
            }
            match st.bcodes.pop() {
                Some(bcode) => {
                    if st.seen_bcodes.insert(Rc::as_ptr(&bcode)) {
                        st.work.extend_from_slice(&bcode.lit);
                        st.work.extend_from_slice(&bcode.names);
                    }
                }
                None => break,
            }
        }
    }

    fn mark_val(&mut self, v: Val, st: &mut MarkState) {
        if let Some((offset, _)) = v.owned_str_parts() {
            st.live_strings.push(offset);
            return;
        }
        if let Some(fid) = v.as_func_id() {
            if self.functions.mark(fid.0) {
                let parts = self
                    .functions
                    .get(fid.0)
                    .map(|fc| (fc.scope, fc.bcode.clone(), fc.props));
                if let Some((scope, bcode, props)) = parts {
                    st.work.push(scope);
                    st.bcodes.push(bcode);
                    self.mark_props(props, st);
                }
            }
            return;
        }
        let Some(oid) = v.as_obj_id() else { return };
        if !self.objects.mark(oid.0) {
            return;
        }
        let (proto, props) = match self.obj(oid) {
            Some(o) => (o.proto, o.props),
            None => return,
        };
        st.work.push(proto);
        self.mark_props(props, st);
        match self.obj(oid).map(|o| &o.data) {
            Some(ObjData::DenseArray(elems)) => st.work.extend_from_slice(elems),
            Some(ObjData::Regexp(r)) => st.work.push(r.source),
            _ => {}
        }
    }

    fn mark_props(&mut self, head: Option<crate::heap::PropId>, st: &mut MarkState) {
        let mut cur = head;
        while let Some(pid) = cur {
            if !self.props.mark(pid.0) {
                // Already marked: the rest of the chain was walked too.
                return;
            }
            let Some(p) = self.prop(pid) else { return };
            st.work.push(p.name);
            st.work.push(p.value);
            cur = p.next;
        }
    }

    /// Rewrites every reachable owned-string val after compaction. A val
    /// whose offset is not in the map was unreachable during marking; it is
    /// left alone and the allocation-serial check catches any later use.
    fn relocate_strings(&mut self, map: &ahash::AHashMap<u32, u32>) {
        let fix = |v: &mut Val| {
            if let Some((offset, serial)) = v.owned_str_parts() {
                if let Some(&new_offset) = map.get(&offset) {
                    *v = Val::owned_string(new_offset, serial);
                }
            }
        };

        for v in &mut self.stack {
            fix(v);
        }
        fix(&mut self.stash);
        fix(&mut self.thrown);
        fix(&mut self.returned);
        fix(&mut self.this_val);
        for slot in self.owned.iter_mut().flatten() {
            fix(slot);
        }
        for roots in &mut self.tmp_roots {
            for v in roots {
                fix(v);
            }
        }
        for cf in &mut self.call_frames {
            fix(&mut cf.this);
        }
        self.props.for_each_mut(|_, p: &mut PropCell| {
            fix(&mut p.name);
            fix(&mut p.value);
        });
        self.objects.for_each_mut(|_, o| {
            if let ObjData::DenseArray(elems) = &mut o.data {
                for v in elems {
                    fix(v);
                }
            }
        });
    }

    /// Suppresses collection while a host callback holds raw string data.
    pub fn gc_inhibit(&mut self) {
        self.inhibit_gc += 1;
    }

    /// Re-enables collection after [`Engine::gc_inhibit`].
    pub fn gc_allow(&mut self) {
        self.inhibit_gc = self.inhibit_gc.saturating_sub(1);
    }
}
