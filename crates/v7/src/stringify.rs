//! Value stringification: the default ToString, the JSON form, and the
//! debug form, plus the `%g`-style number rendering.

use std::fmt::Write as _;

use crate::engine::{Engine, JsError};
use crate::object::ObjData;
use crate::value::Val;

/// Stringification modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// ToString: user `toString` honored, arrays joined with commas.
    Default,
    /// JSON: visitation stack detects cycles (TypeError), non-representable
    /// values render as `null`, `toJSON` is honored.
    Json,
    /// Like JSON but keeps function and regexp forms readable.
    Debug,
}

const MAX_DEPTH: usize = 200;

pub(crate) fn stringify(engine: &mut Engine, v: Val, mode: Mode) -> Result<String, Val> {
    let mut out = String::new();
    let mut visiting = Vec::new();
    write_val(engine, v, mode, &mut out, &mut visiting, 0)?;
    Ok(out)
}

impl Engine {
    /// Default-mode stringification (host `to_cstring` analogue).
    pub fn to_display_string(&mut self, v: Val) -> Result<String, Val> {
        stringify(self, v, Mode::Default)
    }

    /// JSON-mode stringification.
    pub fn to_json_string(&mut self, v: Val) -> Result<String, Val> {
        stringify(self, v, Mode::Json)
    }

    /// Debug-mode stringification.
    pub fn to_debug_string(&mut self, v: Val) -> Result<String, Val> {
        stringify(self, v, Mode::Debug)
    }

    /// Whether the value's prototype chain passes through an error
    /// prototype (used to render errors as `Name: message`).
    fn is_error_value(&self, v: Val) -> bool {
        let mut cur = self.lookup_proto(v);
        for _ in 0..64 {
            if cur == self.protos.error || self.protos.errors.contains(&cur) {
                return true;
            }
            if cur.is_null() || cur.is_undefined() {
                return false;
            }
            let next = self.lookup_proto(cur);
            if next == cur {
                return false;
            }
            cur = next;
        }
        false
    }
}

fn write_val(
    engine: &mut Engine,
    v: Val,
    mode: Mode,
    out: &mut String,
    visiting: &mut Vec<Val>,
    depth: usize,
) -> Result<(), Val> {
    if depth > MAX_DEPTH {
        return Err(engine.make_error(JsError::Internal, "structure is too deep"));
    }

    if v.is_number() {
        let text = number_to_string(v.as_number());
        match mode {
            Mode::Default => out.push_str(&text),
            _ => {
                if v.as_number().is_finite() {
                    out.push_str(&text);
                } else {
                    out.push_str("null");
                }
            }
        }
        return Ok(());
    }
    if v.is_string() {
        let s = engine.str_or_throw(v)?;
        match mode {
            Mode::Default => out.push_str(&s),
            _ => write_quoted(&s, out),
        }
        return Ok(());
    }
    if v.is_boolean() {
        out.push_str(if v.as_boolean() { "true" } else { "false" });
        return Ok(());
    }
    if v.is_null() {
        out.push_str("null");
        return Ok(());
    }
    if v.is_undefined() || v.is_novalue() {
        out.push_str(match mode {
            Mode::Default => "undefined",
            _ => "null",
        });
        return Ok(());
    }
    if v.is_foreign() {
        out.push_str(match mode {
            Mode::Default => "[foreign]",
            _ => "null",
        });
        return Ok(());
    }
    if v.is_function() || v.is_cfunction() {
        out.push_str(match mode {
            Mode::Json => "null",
            _ => "[function]",
        });
        return Ok(());
    }
    if v.is_regexp() {
        match mode {
            Mode::Json => out.push_str("null"),
            _ => write_regexp(engine, v, out)?,
        }
        return Ok(());
    }

    // Objects from here on.
    if visiting.contains(&v) {
        return match mode {
            Mode::Default => {
                out.push_str("[circular]");
                Ok(())
            }
            _ => Err(engine.make_error(JsError::Type, "converting circular structure")),
        };
    }

    if mode == Mode::Default {
        // Honor a user-supplied toString.
        let key = engine.create_string("toString");
        let f = engine.get_prop(v, key)?;
        if f.is_function() || f.is_cfunction() {
            engine.tmp_roots.push(vec![v]);
            let r = engine.apply_val(f, v, &[]);
            engine.tmp_roots.pop();
            let r = r?;
            if !(r.is_object() || r.is_regexp()) {
                return write_val(engine, r, mode, out, visiting, depth + 1);
            }
        }
        if engine.is_error_value(v) {
            let name_key = engine.create_string("name");
            let name = engine.get_prop(v, name_key)?;
            let msg_key = engine.create_string("message");
            let msg = engine.get_prop(v, msg_key)?;
            let name = if name.is_undefined() {
                "Error".to_owned()
            } else {
                stringify(engine, name, Mode::Default)?
            };
            let msg = stringify(engine, msg, Mode::Default)?;
            out.push_str(&name);
            if !msg.is_empty() {
                out.push_str(": ");
                out.push_str(&msg);
            }
            return Ok(());
        }
        if engine.is_array(v) {
            visiting.push(v);
            let len = engine.array_length(v);
            for i in 0..len {
                if i > 0 {
                    out.push(',');
                }
                let elem = engine.array_get(v, i)?;
                if !(elem.is_undefined() || elem.is_null() || elem.is_novalue()) {
                    write_val(engine, elem, mode, out, visiting, depth + 1)?;
                }
            }
            visiting.pop();
            return Ok(());
        }
        out.push_str("[object Object]");
        return Ok(());
    }

    // JSON / Debug composite forms.
    if mode == Mode::Json {
        let key = engine.create_string("toJSON");
        let f = engine.get_prop(v, key)?;
        if f.is_function() || f.is_cfunction() {
            engine.tmp_roots.push(vec![v]);
            let r = engine.apply_val(f, v, &[]);
            engine.tmp_roots.pop();
            let r = r?;
            if !(r.is_object() || r.is_regexp()) {
                return write_val(engine, r, mode, out, visiting, depth + 1);
            }
        }
    }

    visiting.push(v);
    let result = write_composite(engine, v, mode, out, visiting, depth);
    visiting.pop();
    result
}

fn write_composite(
    engine: &mut Engine,
    v: Val,
    mode: Mode,
    out: &mut String,
    visiting: &mut Vec<Val>,
    depth: usize,
) -> Result<(), Val> {
    if engine.is_array(v) {
        out.push('[');
        let len = engine.array_length(v);
        for i in 0..len {
            if i > 0 {
                out.push(',');
            }
            let elem = engine.array_get(v, i)?;
            write_val(engine, elem, mode, out, visiting, depth + 1)?;
        }
        out.push(']');
        return Ok(());
    }
    out.push('{');
    let mut handle = Val::NULL;
    let mut first = true;
    loop {
        let Some((next, name, value)) = engine.next_prop(v, handle)? else {
            break;
        };
        handle = next;
        if !first {
            out.push(',');
        }
        first = false;
        let name_str = engine.str_or_throw(name)?;
        write_quoted(&name_str, out);
        out.push(':');
        write_val(engine, value, mode, out, visiting, depth + 1)?;
    }
    out.push('}');
    Ok(())
}

fn write_regexp(engine: &mut Engine, v: Val, out: &mut String) -> Result<(), Val> {
    let Some(oid) = v.as_obj_id() else {
        out.push_str("[regexp]");
        return Ok(());
    };
    let (source, g, i, m) = match engine.obj(oid).map(|o| &o.data) {
        Some(ObjData::Regexp(r)) => (r.source, r.global, r.ignore_case, r.multiline),
        _ => {
            out.push_str("[regexp]");
            return Ok(());
        }
    };
    let src = engine.str_or_throw(source)?;
    out.push('/');
    out.push_str(&src);
    out.push('/');
    if g {
        out.push('g');
    }
    if i {
        out.push('i');
    }
    if m {
        out.push('m');
    }
    Ok(())
}

/// JSON string quoting with control-character escapes.
pub(crate) fn write_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Number rendering: 21 significant digits for magnitudes above `1e10`,
/// 10 otherwise; NaN and the infinities render as literals.
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    let precision = if n.abs() > 1e10 { 21 } else { 10 };
    format_g(n, precision)
}

/// printf `%.Ng` semantics: scientific when the exponent falls outside
/// `[-4, N)`, fixed otherwise, trailing zeros stripped either way.
fn format_g(n: f64, precision: usize) -> String {
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }
    let sci = format!("{:.*e}", precision - 1, n);
    let exp: i32 = sci
        .rsplit('e')
        .next()
        .and_then(|e| e.parse().ok())
        .unwrap_or(0);
    if exp < -4 || exp >= precision as i32 {
        let mantissa = sci.split('e').next().unwrap_or("0");
        let mantissa = strip_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{n:.decimals$}");
        strip_zeros(&fixed).to_owned()
    }
}

/// Drops trailing fraction zeros (and a bare trailing point).
fn strip_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    let s = s.trim_end_matches('0');
    s.strip_suffix('.').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_print_plainly() {
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(10.0), "10");
        assert_eq!(number_to_string(-42.0), "-42");
        assert_eq!(number_to_string(100_000_000_000.0), "100000000000");
    }

    #[test]
    fn fractions_round_to_ten_significant_digits() {
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(0.1 + 0.2), "0.3");
        assert_eq!(number_to_string(123_456_789.125), "123456789.1");
    }

    #[test]
    fn extremes_use_scientific_form() {
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-07");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn quoting_escapes_controls() {
        let mut out = String::new();
        write_quoted("a\"b\\c\n\u{1}", &mut out);
        assert_eq!(out, "\"a\\\"b\\\\c\\n\\u0001\"");
    }
}
