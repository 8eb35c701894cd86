//! Coercions and the semantics of the binary/comparison opcodes.

use crate::bytecode::Opcode;
use crate::engine::{Engine, JsError};
use crate::value::Val;

impl Engine {
    /// ToBoolean. Pure: never runs JS code.
    pub fn to_boolean(&self, v: Val) -> bool {
        if v.is_boolean() {
            return v.as_boolean();
        }
        if v.is_number() {
            let n = v.as_number();
            return n != 0.0 && !n.is_nan();
        }
        if v.is_string() {
            return self.try_str(v).map_or(false, |s| !s.is_empty());
        }
        if v.is_undefined() || v.is_null() || v.is_novalue() {
            return false;
        }
        true
    }

    /// ToPrimitive for objects: try `valueOf`, then `toString`; a value
    /// that stays an object is returned as-is and stringified by callers
    /// that need text.
    pub(crate) fn to_primitive(&mut self, v: Val) -> Result<Val, Val> {
        if !(v.is_object() || v.is_regexp()) {
            return Ok(v);
        }
        for method in ["valueOf", "toString"] {
            let key = self.create_string(method);
            let f = self.get_prop(v, key)?;
            if f.is_function() || f.is_cfunction() {
                let r = self.apply_val(f, v, &[])?;
                if !(r.is_object() || r.is_regexp()) {
                    return Ok(r);
                }
            }
        }
        Ok(v)
    }

    /// Runs `op` with `shielded` registered as a temporary GC root, and
    /// hands back the (possibly string-relocated) shielded value. Used when
    /// a val must survive a coercion that can run arbitrary JS.
    fn with_root<T>(
        &mut self,
        shielded: Val,
        op: impl FnOnce(&mut Self) -> Result<T, Val>,
    ) -> Result<(Val, T), Val> {
        self.tmp_roots.push(vec![shielded]);
        let result = op(self);
        let shielded = self
            .tmp_roots
            .pop()
            .and_then(|v| v.first().copied())
            .unwrap_or(shielded);
        Ok((shielded, result?))
    }

    /// ToNumber. May run JS (`valueOf`).
    pub fn to_number(&mut self, v: Val) -> Result<f64, Val> {
        if v.is_number() {
            return Ok(v.as_number());
        }
        if v.is_boolean() {
            return Ok(if v.as_boolean() { 1.0 } else { 0.0 });
        }
        if v.is_null() {
            return Ok(0.0);
        }
        if v.is_undefined() || v.is_novalue() || v.is_foreign() {
            return Ok(f64::NAN);
        }
        if v.is_string() {
            let s = match self.try_str(v) {
                Ok(s) => s.into_owned(),
                Err(e) => return Err(self.internal_error_val(&e)),
            };
            return Ok(string_to_number(&s));
        }
        let prim = self.to_primitive(v)?;
        if prim.is_object() || prim.is_regexp() {
            return Ok(f64::NAN);
        }
        self.to_number(prim)
    }

    /// ToInt32: NaN and infinities become 0, the rest truncates and wraps.
    pub(crate) fn to_int32(&mut self, v: Val) -> Result<i32, Val> {
        let n = self.to_number(v)?;
        Ok(double_to_int32(n))
    }

    /// The ADD rule: after ToPrimitive, anything outside
    /// `undefined | number | boolean` makes both sides strings.
    fn add_vals(&mut self, a: Val, b: Val) -> Result<Val, Val> {
        let pa = self.to_primitive(a)?;
        // The second coercion can run JS (and so compact the string heap);
        // keep the first primitive rooted and take the corrected copy back.
        let (pa, pb) = self.with_root(pa, |e| e.to_primitive(b))?;

        let numeric = |v: Val| v.is_number() || v.is_boolean() || v.is_undefined();
        if numeric(pa) && numeric(pb) {
            let x = self.to_number(pa)?;
            let y = self.to_number(pb)?;
            return Ok(Val::number(x + y));
        }
        let (pa, sb) = self.with_root(pa, |e| e.to_display_string(pb))?;
        let sa = self.to_display_string(pa)?;
        let mut out = String::with_capacity(sa.len() + sb.len());
        out.push_str(&sa);
        out.push_str(&sb);
        Ok(self.create_string(&out))
    }

    pub(crate) fn binary_op(&mut self, op: Opcode, a: Val, b: Val) -> Result<Val, Val> {
        match op {
            Opcode::Add => self.add_vals(a, b),
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => {
                let (b, x) = self.with_root(b, |e| e.to_number(a))?;
                let y = self.to_number(b)?;
                let r = match op {
                    Opcode::Sub => x - y,
                    Opcode::Mul => x * y,
                    // IEEE division gives the spec behavior for free:
                    // ±Infinity on x/0 with x != 0, NaN on 0/0.
                    Opcode::Div => x / y,
                    _ => {
                        if !x.is_finite() || y == 0.0 {
                            f64::NAN
                        } else if !y.is_finite() {
                            x
                        } else {
                            x % y
                        }
                    }
                };
                Ok(Val::number(r))
            }
            Opcode::Lshift | Opcode::Rshift | Opcode::Urshift => {
                let (b, x) = self.with_root(b, |e| e.to_int32(a))?;
                let shift = (self.to_int32(b)? as u32) & 0x1f;
                let r = match op {
                    Opcode::Lshift => f64::from(x.wrapping_shl(shift)),
                    Opcode::Rshift => f64::from(x.wrapping_shr(shift)),
                    _ => f64::from((x as u32).wrapping_shr(shift)),
                };
                Ok(Val::number(r))
            }
            Opcode::Or | Opcode::Xor | Opcode::And => {
                let (b, x) = self.with_root(b, |e| e.to_int32(a))?;
                let y = self.to_int32(b)?;
                let r = match op {
                    Opcode::Or => x | y,
                    Opcode::Xor => x ^ y,
                    _ => x & y,
                };
                Ok(Val::number(f64::from(r)))
            }
            _ => Err(self.make_error(JsError::Internal, "not a binary opcode")),
        }
    }

    /// `===`: no coercion; NaN is unequal to itself, numbers compare by
    /// value (so `+0 === -0`), strings byte-for-byte, the rest by identity.
    pub(crate) fn strict_equals(&self, a: Val, b: Val) -> bool {
        if a.is_number() && b.is_number() {
            return a.as_number() == b.as_number();
        }
        if a.is_string() && b.is_string() {
            if a == b {
                return true;
            }
            return match (self.try_str(a), self.try_str(b)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            };
        }
        a == b
    }

    /// `==`: strict equality, plus the null/undefined mutual rule, then
    /// numeric comparison after ToPrimitive.
    pub(crate) fn loose_equals(&mut self, a: Val, b: Val) -> Result<bool, Val> {
        if self.strict_equals(a, b) {
            return Ok(true);
        }
        let nullish = |v: Val| v.is_null() || v.is_undefined();
        if nullish(a) || nullish(b) {
            return Ok(nullish(a) && nullish(b));
        }
        if (a.is_object() || a.is_regexp()) && (b.is_object() || b.is_regexp()) {
            return Ok(false);
        }
        let pa = self.to_primitive(a)?;
        let (pa, pb) = self.with_root(pa, |e| e.to_primitive(b))?;
        if pa.is_string() && pb.is_string() {
            return Ok(self.strict_equals(pa, pb));
        }
        let x = self.to_number(pa)?;
        let y = self.to_number(pb)?;
        Ok(x == y)
    }

    /// `<`, `<=`, `>`, `>=`: strings compare lexicographically, everything
    /// else coerces to number (NaN makes every comparison false).
    pub(crate) fn relational(&mut self, op: Opcode, a: Val, b: Val) -> Result<bool, Val> {
        let pa = self.to_primitive(a)?;
        let (pa, pb) = self.with_root(pa, |e| e.to_primitive(b))?;

        if pa.is_string() && pb.is_string() {
            let sa = self.str_or_throw(pa)?;
            let sb = self.str_or_throw(pb)?;
            let ord = sa.as_bytes().cmp(sb.as_bytes());
            return Ok(match op {
                Opcode::Lt => ord.is_lt(),
                Opcode::Le => ord.is_le(),
                Opcode::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            });
        }
        let x = self.to_number(pa)?;
        let y = self.to_number(pb)?;
        if x.is_nan() || y.is_nan() {
            return Ok(false);
        }
        Ok(match op {
            Opcode::Lt => x < y,
            Opcode::Le => x <= y,
            Opcode::Gt => x > y,
            _ => x >= y,
        })
    }
}

/// ES-style string-to-number: trimmed, empty is 0, hex accepted, otherwise
/// a leading decimal literal parse with NaN on junk.
pub(crate) fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    if t == "Infinity" || t == "+Infinity" {
        return f64::INFINITY;
    }
    if t == "-Infinity" {
        return f64::NEG_INFINITY;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToInt32 of a double.
pub(crate) fn double_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let t = n.trunc();
    let m = t.rem_euclid(4_294_967_296.0);
    let m = if m >= 2_147_483_648.0 {
        m - 4_294_967_296.0
    } else {
        m
    };
    m as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_wraps_and_truncates() {
        assert_eq!(double_to_int32(f64::NAN), 0);
        assert_eq!(double_to_int32(f64::INFINITY), 0);
        assert_eq!(double_to_int32(3.7), 3);
        assert_eq!(double_to_int32(-3.7), -3);
        assert_eq!(double_to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(double_to_int32(2_147_483_648.0), -2_147_483_648);
    }

    #[test]
    fn string_number_coercions() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  12.5 "), 12.5);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }
}
