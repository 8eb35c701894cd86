//! Objects, properties, dense arrays, and accessor plumbing.
//!
//! Property lists are singly linked through the property arena. Lookup walks
//! the prototype chain for reads only; writes operate on own properties and
//! otherwise create one at the tail so enumeration follows insertion order.
//! Several object kinds carry an internal handle in the cell itself (dense
//! array backing, compiled regexp program, host callback id, boxed
//! primitive) instead of the property list.

use std::rc::Rc;

use crate::bytecode::Bcode;
use crate::engine::Engine;
use crate::heap::{CFuncId, ObjId, PropId};
use crate::value::Val;

pub(crate) const OBJ_NOT_EXTENSIBLE: u8 = 1 << 0;
pub(crate) const OBJ_DENSE_ARRAY: u8 = 1 << 1;
pub(crate) const OBJ_FUNCTION: u8 = 1 << 2;

/// Property attribute bits (the `attrs` of `set_property_attrs`).
pub const PROP_READ_ONLY: u8 = 1 << 0;
pub const PROP_DONT_ENUM: u8 = 1 << 1;
pub const PROP_DONT_DELETE: u8 = 1 << 2;
pub const PROP_HIDDEN: u8 = 1 << 3;
pub const PROP_GETTER: u8 = 1 << 4;
pub const PROP_SETTER: u8 = 1 << 5;

/// A generic-object arena cell.
#[derive(Debug)]
pub(crate) struct ObjCell {
    pub proto: Val,
    pub props: Option<PropId>,
    pub attrs: u8,
    pub data: ObjData,
}

impl ObjCell {
    pub fn plain(proto: Val) -> Self {
        Self {
            proto,
            props: None,
            attrs: 0,
            data: ObjData::None,
        }
    }
}

/// Internal handle carried by some object kinds.
#[derive(Debug, Default)]
pub(crate) enum ObjData {
    #[default]
    None,
    /// Contiguous indexed storage of a dense array; holes are `NOVALUE`.
    DenseArray(Vec<Val>),
    /// Compiled regular expression record.
    Regexp(Box<RegexpData>),
    /// Host callback behind a callable object (e.g. error constructors).
    Cfunc(CFuncId),
}

/// The record behind a `regexp`-tagged val.
#[derive(Debug)]
pub(crate) struct RegexpData {
    /// Source pattern (a string val, interned for the engine's life).
    pub source: Val,
    pub program: regex::Regex,
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub last_index: f64,
}

/// A function arena cell. The prototype slot of the underlying object is
/// repurposed as the captured lexical scope.
#[derive(Debug)]
pub(crate) struct FuncCell {
    /// Lexical parent frame at closure capture time; `NOVALUE` on function
    /// templates stored in literal tables.
    pub scope: Val,
    pub props: Option<PropId>,
    pub attrs: u8,
    pub bcode: Rc<Bcode>,
}

/// A property arena cell.
#[derive(Debug)]
pub(crate) struct PropCell {
    pub next: Option<PropId>,
    pub attrs: u8,
    pub name: Val,
    pub value: Val,
}

/// Opaque property-iteration cursor, passed around as a JS number:
/// dense-index phase below `2^32`, property-id phase above.
const ITER_PROP_PHASE: f64 = 4_294_967_296.0;

impl Engine {
    pub(crate) fn obj(&self, id: ObjId) -> Option<&ObjCell> {
        self.objects.get(id.0)
    }

    pub(crate) fn obj_mut(&mut self, id: ObjId) -> Option<&mut ObjCell> {
        self.objects.get_mut(id.0)
    }

    pub(crate) fn prop(&self, id: PropId) -> Option<&PropCell> {
        self.props.get(id.0)
    }

    pub(crate) fn prop_mut(&mut self, id: PropId) -> Option<&mut PropCell> {
        self.props.get_mut(id.0)
    }

    /// First link of a value's own property list, if it can carry one.
    pub(crate) fn first_prop(&self, target: Val) -> Option<PropId> {
        if let Some(fid) = target.as_func_id() {
            self.functions.get(fid.0).and_then(|f| f.props)
        } else {
            target.as_obj_id().and_then(|oid| self.obj(oid)).and_then(|o| o.props)
        }
    }

    fn set_first_prop(&mut self, target: Val, head: Option<PropId>) {
        if let Some(fid) = target.as_func_id() {
            if let Some(f) = self.functions.get_mut(fid.0) {
                f.props = head;
            }
        } else if let Some(o) = target.as_obj_id().and_then(|oid| self.obj_mut(oid)) {
            o.props = head;
        }
    }

    pub(crate) fn obj_attrs(&self, target: Val) -> u8 {
        if let Some(fid) = target.as_func_id() {
            self.functions.get(fid.0).map_or(0, |f| f.attrs)
        } else {
            target.as_obj_id().and_then(|oid| self.obj(oid)).map_or(0, |o| o.attrs)
        }
    }

    /// The prototype used for property *lookup* on this value. Function
    /// cells repurpose their prototype slot for the captured scope, so
    /// functions chain to `Function.prototype` here.
    pub(crate) fn lookup_proto(&self, target: Val) -> Val {
        if target.is_function() || target.is_cfunction() {
            self.protos.function
        } else if target.is_regexp() {
            self.protos.regexp
        } else if target.is_string() {
            self.protos.string
        } else if target.is_boolean() {
            self.protos.boolean
        } else if target.is_number() {
            self.protos.number
        } else if let Some(o) = target.as_obj_id().and_then(|oid| self.obj(oid)) {
            o.proto
        } else {
            Val::NULL
        }
    }

    /// Compares a property-name val against another name val: fast path on
    /// identical encodings, content comparison otherwise.
    pub(crate) fn name_eq(&self, a: Val, b: Val) -> bool {
        if a == b {
            return true;
        }
        match (self.try_str(a), self.try_str(b)) {
            (Ok(sa), Ok(sb)) => sa == sb,
            _ => false,
        }
    }

    /// Finds an own property by name val; skips nothing (hidden properties
    /// are found too — enumeration filters them, lookup does not).
    pub(crate) fn find_own(&self, target: Val, name: Val) -> Option<PropId> {
        let mut cur = self.first_prop(target);
        while let Some(pid) = cur {
            let p = self.prop(pid)?;
            if self.name_eq(p.name, name) {
                return Some(pid);
            }
            cur = p.next;
        }
        None
    }

    /// Defines or replaces an own property with explicit attributes.
    /// Appends at the tail so enumeration order is insertion order. Does not
    /// invoke accessors and ignores extensibility: this is the host-level
    /// (and engine-internal) authoritative write.
    pub(crate) fn define_own(&mut self, target: Val, name: Val, value: Val, attrs: u8) {
        if let Some(pid) = self.find_own(target, name) {
            if let Some(p) = self.prop_mut(pid) {
                p.value = value;
                p.attrs = attrs;
            }
            return;
        }
        let new_id = PropId(self.props.alloc(PropCell {
            next: None,
            attrs,
            name,
            value,
        }));
        match self.first_prop(target) {
            None => self.set_first_prop(target, Some(new_id)),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.prop(tail).and_then(|p| p.next) {
                    tail = next;
                }
                if let Some(p) = self.prop_mut(tail) {
                    p.next = Some(new_id);
                }
            }
        }
    }

    /// Removes an own property. Returns false when absent or DONT_DELETE.
    pub(crate) fn del_own(&mut self, target: Val, name: Val) -> bool {
        let mut prev: Option<PropId> = None;
        let mut cur = self.first_prop(target);
        while let Some(pid) = cur {
            let Some(p) = self.prop(pid) else { return false };
            let next = p.next;
            if self.name_eq(p.name, name) {
                if p.attrs & PROP_DONT_DELETE != 0 {
                    return false;
                }
                match prev {
                    None => self.set_first_prop(target, next),
                    Some(prev_id) => {
                        if let Some(pp) = self.prop_mut(prev_id) {
                            pp.next = next;
                        }
                    }
                }
                return true;
            }
            prev = Some(pid);
            cur = next;
        }
        false
    }

    /// Extracts the getter (or setter) function from an accessor property
    /// value: a bare function, or slot 0/1 of the `[getter, setter]` pair.
    fn accessor(&self, prop_value: Val, attrs: u8, setter: bool) -> Option<Val> {
        if attrs & PROP_GETTER != 0 && attrs & PROP_SETTER != 0 {
            let arr = prop_value.as_obj_id()?;
            match &self.obj(arr)?.data {
                ObjData::DenseArray(v) => v.get(usize::from(setter)).copied(),
                _ => None,
            }
        } else {
            Some(prop_value)
        }
    }

    /// Canonical array-index interpretation of a property-name string.
    fn dense_index(name: &str) -> Option<usize> {
        if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
            return None;
        }
        name.parse::<usize>().ok()
    }

    /// Total array length: dense storage plus named numeric spill.
    pub(crate) fn array_length(&self, target: Val) -> usize {
        let Some(oid) = target.as_obj_id() else { return 0 };
        let dense = match self.obj(oid).map(|o| &o.data) {
            Some(ObjData::DenseArray(v)) => v.len(),
            _ => 0,
        };
        let mut len = dense;
        let mut cur = self.first_prop(target);
        while let Some(pid) = cur {
            let Some(p) = self.prop(pid) else { break };
            if p.attrs & PROP_HIDDEN == 0 {
                if let Ok(name) = self.try_str(p.name) {
                    if let Some(i) = Self::dense_index(&name) {
                        len = len.max(i + 1);
                    }
                }
            }
            cur = p.next;
        }
        len
    }

    /// Shrinking `length` to `n` removes every indexed property `i >= n`,
    /// dense and named alike, in one pass.
    pub(crate) fn array_set_length(&mut self, target: Val, n: usize) {
        if let Some(ObjData::DenseArray(v)) =
            target.as_obj_id().and_then(|oid| self.obj_mut(oid)).map(|o| &mut o.data)
        {
            if n < v.len() {
                v.truncate(n);
            } else {
                v.resize(n, Val::NOVALUE);
            }
        }
        // One pass over the named spill.
        let mut doomed = Vec::new();
        let mut cur = self.first_prop(target);
        while let Some(pid) = cur {
            let Some(p) = self.prop(pid) else { break };
            if let Ok(name) = self.try_str(p.name) {
                if Self::dense_index(&name).is_some_and(|i| i >= n) {
                    doomed.push(p.name);
                }
            }
            cur = p.next;
        }
        for name in doomed {
            self.del_own(target, name);
        }
    }

    /// Property read with prototype walk, accessor invocation, and the
    /// virtual properties of arrays, strings, regexps, and functions.
    pub(crate) fn get_prop(&mut self, target: Val, name: Val) -> Result<Val, Val> {
        if target.is_undefined() || target.is_null() {
            let shown = self.try_str(name).map(|s| s.into_owned()).unwrap_or_default();
            return Err(self.make_error(
                crate::engine::JsError::Type,
                &format!("cannot read property '{shown}' of {}", if target.is_null() { "null" } else { "undefined" }),
            ));
        }

        let (name, name_str) = self.normalize_name(name)?;

        // String primitives: length and character indexing.
        if target.is_string() {
            if name_str == "length" {
                let s = self.str_or_throw(target)?;
                return Ok(Val::number(s.chars().count() as f64));
            }
            if let Some(i) = Self::dense_index(&name_str) {
                let s = self.str_or_throw(target)?;
                if let Some(c) = s.chars().nth(i) {
                    let owned = c.to_string();
                    return Ok(self.create_string(&owned));
                }
                return Ok(Val::UNDEFINED);
            }
        }

        // Dense-array element and length.
        if self.obj_attrs(target) & OBJ_DENSE_ARRAY != 0 {
            if name_str == "length" {
                return Ok(Val::number(self.array_length(target) as f64));
            }
            if let Some(i) = Self::dense_index(&name_str) {
                if let Some(oid) = target.as_obj_id() {
                    if let Some(ObjData::DenseArray(v)) = self.obj(oid).map(|o| &o.data) {
                        if let Some(&elem) = v.get(i) {
                            if !elem.is_novalue() {
                                return Ok(elem);
                            }
                        }
                    }
                }
                // fall through: spilled named property or hole
            }
        }

        // Regexp virtual properties.
        if target.is_regexp() {
            if let Some(v) = self.regexp_virtual(target, &name_str) {
                return Ok(v);
            }
        }

        // Functions materialize their `prototype` object lazily.
        if target.is_function() && name_str == "prototype" && self.find_own(target, name).is_none() {
            let proto = self.create_object();
            let ctor_name = self.intern_literal_string("constructor");
            self.define_own(proto, ctor_name, target, PROP_DONT_ENUM);
            self.define_own(target, name, proto, PROP_DONT_ENUM);
            return Ok(proto);
        }

        let mut cur = target;
        loop {
            if let Some(pid) = self.find_own(cur, name) {
                let (value, attrs) = match self.prop(pid) {
                    Some(p) => (p.value, p.attrs),
                    None => {
                        return Err(self
                            .make_error(crate::engine::JsError::Internal, "dangling property"))
                    }
                };
                if attrs & PROP_GETTER != 0 {
                    let getter = self
                        .accessor(value, attrs, false)
                        .unwrap_or(Val::UNDEFINED);
                    return self.apply_val(getter, target, &[]);
                }
                if attrs & PROP_SETTER != 0 {
                    // setter-only accessor reads as undefined
                    return Ok(Val::UNDEFINED);
                }
                return Ok(if value.is_novalue() { Val::UNDEFINED } else { value });
            }
            let next = self.lookup_proto(cur);
            if next.is_null() || next.is_undefined() || next == cur {
                return Ok(Val::UNDEFINED);
            }
            cur = next;
        }
    }

    /// Property write: own properties only (the prototype chain is walked
    /// for reads, never for writes). READ_ONLY and non-extensible targets
    /// ignore the write; primitives ignore it silently.
    pub(crate) fn set_prop(&mut self, target: Val, name: Val, value: Val) -> Result<(), Val> {
        if target.is_undefined() || target.is_null() {
            return Err(self.make_error(
                crate::engine::JsError::Type,
                "cannot set property of undefined",
            ));
        }
        if !(target.is_object() || target.is_regexp()) {
            return Ok(());
        }

        let (name, name_str) = self.normalize_name(name)?;

        if target.is_regexp() && name_str == "lastIndex" {
            let n = self.to_number(value)?;
            if let Some(ObjData::Regexp(r)) =
                target.as_obj_id().and_then(|oid| self.obj_mut(oid)).map(|o| &mut o.data)
            {
                r.last_index = n;
            }
            return Ok(());
        }

        if self.obj_attrs(target) & OBJ_DENSE_ARRAY != 0 {
            if name_str == "length" {
                let n = self.to_number(value)?;
                if n.is_finite() && n >= 0.0 && n.fract() == 0.0 {
                    self.array_set_length(target, n as usize);
                    return Ok(());
                }
                return Err(self.make_error(crate::engine::JsError::Range, "invalid array length"));
            }
            if let Some(i) = Self::dense_index(&name_str) {
                return self.array_set(target, i, value).map(|_| ());
            }
        }

        if let Some(pid) = self.find_own(target, name) {
            let (stored, attrs) = {
                let p = match self.prop(pid) {
                    Some(p) => p,
                    None => return Ok(()),
                };
                (p.value, p.attrs)
            };
            if attrs & PROP_SETTER != 0 {
                let setter = self.accessor(stored, attrs, true).unwrap_or(Val::UNDEFINED);
                return self.apply_val(setter, target, &[value]).map(|_| ());
            }
            if attrs & (PROP_READ_ONLY | PROP_GETTER) != 0 {
                return Ok(());
            }
            if let Some(p) = self.prop_mut(pid) {
                p.value = value;
            }
            return Ok(());
        }

        if self.obj_attrs(target) & OBJ_NOT_EXTENSIBLE != 0 {
            return Ok(());
        }
        self.define_own(target, name, value, 0);
        Ok(())
    }

    /// Property names are stored as string vals; anything else (typically a
    /// number from an index expression) is stringified first. Returns the
    /// normalized name val along with its text.
    fn normalize_name(&mut self, name: Val) -> Result<(Val, String), Val> {
        if name.is_string() {
            let text = self.str_or_throw(name)?;
            return Ok((name, text));
        }
        let text = self.to_display_string(name)?;
        let val = self.create_string(&text);
        Ok((val, text))
    }

    /// Dense-array element write with bounded hole growth: writes more than
    /// 256 slots past the end spill to the named property list.
    pub(crate) fn array_set(&mut self, target: Val, index: usize, value: Val) -> Result<(), Val> {
        let Some(oid) = target.as_obj_id() else {
            return Ok(());
        };
        let spill = {
            match self.obj_mut(oid).map(|o| &mut o.data) {
                Some(ObjData::DenseArray(v)) => {
                    if index < v.len() {
                        v[index] = value;
                        false
                    } else if index - v.len() <= 256 {
                        v.resize(index, Val::NOVALUE);
                        v.push(value);
                        false
                    } else {
                        true
                    }
                }
                _ => true,
            }
        };
        if spill {
            let name = self.create_string(&index.to_string());
            self.define_own(target, name, value, 0);
        }
        Ok(())
    }

    pub(crate) fn array_get(&mut self, target: Val, index: usize) -> Result<Val, Val> {
        let name = self.create_string(&index.to_string());
        self.get_prop(target, name)
    }

    pub(crate) fn array_push(&mut self, target: Val, value: Val) -> Result<usize, Val> {
        let len = self.array_length(target);
        self.array_set(target, len, value)?;
        Ok(len + 1)
    }

    pub(crate) fn array_del(&mut self, target: Val, index: usize) -> bool {
        if let Some(ObjData::DenseArray(v)) =
            target.as_obj_id().and_then(|oid| self.obj_mut(oid)).map(|o| &mut o.data)
        {
            if index < v.len() {
                v[index] = Val::NOVALUE;
                return true;
            }
        }
        let name = self.create_string(&index.to_string());
        self.del_own(target, name)
    }

    fn regexp_virtual(&self, target: Val, name: &str) -> Option<Val> {
        let oid = target.as_obj_id()?;
        match &self.obj(oid)?.data {
            ObjData::Regexp(r) => match name {
                "source" => Some(r.source),
                "global" => Some(Val::boolean(r.global)),
                "ignoreCase" => Some(Val::boolean(r.ignore_case)),
                "multiline" => Some(Val::boolean(r.multiline)),
                "lastIndex" => Some(Val::number(r.last_index)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Advances the opaque enumeration cursor over a value's enumerable own
    /// properties: dense indices first, then the property list, skipping
    /// hidden and non-enumerable entries. Returns `(handle', name, value)`
    /// or `None` when exhausted.
    pub(crate) fn next_prop(&mut self, target: Val, handle: Val) -> Result<Option<(Val, Val, Val)>, Val> {
        let dense_len = match target.as_obj_id().and_then(|oid| self.obj(oid)).map(|o| &o.data) {
            Some(ObjData::DenseArray(v)) => v.len(),
            _ => 0,
        };

        // Decode cursor: null starts at dense index 0.
        let cursor = if handle.is_null() || handle.is_undefined() {
            0.0
        } else {
            handle.as_number()
        };

        if cursor < ITER_PROP_PHASE {
            // Dense phase.
            let mut i = cursor as usize;
            while i < dense_len {
                let elem = match target.as_obj_id().and_then(|oid| self.obj(oid)).map(|o| &o.data) {
                    Some(ObjData::DenseArray(v)) => v.get(i).copied().unwrap_or(Val::NOVALUE),
                    _ => Val::NOVALUE,
                };
                if !elem.is_novalue() {
                    let name = self.create_string(&i.to_string());
                    let next = Val::number((i + 1) as f64);
                    return Ok(Some((next, name, elem)));
                }
                i += 1;
            }
            // Fall into the property-list phase.
            return self.next_listed_prop(target, self.first_prop(target));
        }

        let prev = PropId((cursor - ITER_PROP_PHASE) as u32);
        let next = self.prop(prev).and_then(|p| p.next);
        self.next_listed_prop(target, next)
    }

    fn next_listed_prop(
        &mut self,
        _target: Val,
        mut cur: Option<PropId>,
    ) -> Result<Option<(Val, Val, Val)>, Val> {
        while let Some(pid) = cur {
            let Some(p) = self.prop(pid) else { break };
            if p.attrs & (PROP_HIDDEN | PROP_DONT_ENUM) == 0 {
                let handle = Val::number(ITER_PROP_PHASE + f64::from(pid.0));
                let value = if p.value.is_novalue() { Val::UNDEFINED } else { p.value };
                return Ok(Some((handle, p.name, value)));
            }
            cur = p.next;
        }
        Ok(None)
    }
}
