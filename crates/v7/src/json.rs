//! JSON text to values.
//!
//! A small recursive-descent reader with a depth guard; errors surface as
//! JS `SyntaxError` values so `JSON.parse` failures are catchable.

use crate::engine::{Engine, JsError};
use crate::value::Val;

const MAX_DEPTH: usize = 200;

struct JsonReader<'s> {
    src: &'s [u8],
    pos: usize,
}

pub(crate) fn parse_json(engine: &mut Engine, src: &str) -> Result<Val, Val> {
    let mut r = JsonReader {
        src: src.as_bytes(),
        pos: 0,
    };
    let v = r.value(engine, 0)?;
    r.skip_ws();
    if r.pos != r.src.len() {
        return Err(r.error(engine, "unexpected trailing characters"));
    }
    Ok(v)
}

impl<'s> JsonReader<'s> {
    fn error(&self, engine: &mut Engine, msg: &str) -> Val {
        engine.make_error(
            JsError::Syntax,
            &format!("invalid JSON at offset {}: {msg}", self.pos),
        )
    }

    fn skip_ws(&mut self) {
        while matches!(self.src.get(self.pos), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.src.get(self.pos) == Some(&b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, engine: &mut Engine, word: &str) -> Result<(), Val> {
        if self.src[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(())
        } else {
            Err(self.error(engine, "unexpected token"))
        }
    }

    fn value(&mut self, engine: &mut Engine, depth: usize) -> Result<Val, Val> {
        if depth > MAX_DEPTH {
            return Err(self.error(engine, "structure is too deep"));
        }
        self.skip_ws();
        match self.src.get(self.pos) {
            None => Err(self.error(engine, "unexpected end of input")),
            Some(b'n') => {
                self.expect_word(engine, "null")?;
                Ok(Val::NULL)
            }
            Some(b't') => {
                self.expect_word(engine, "true")?;
                Ok(Val::TRUE)
            }
            Some(b'f') => {
                self.expect_word(engine, "false")?;
                Ok(Val::FALSE)
            }
            Some(b'"') => {
                let s = self.string(engine)?;
                Ok(engine.create_string(&s))
            }
            Some(b'[') => self.array(engine, depth),
            Some(b'{') => self.object(engine, depth),
            Some(_) => self.number(engine),
        }
    }

    fn array(&mut self, engine: &mut Engine, depth: usize) -> Result<Val, Val> {
        self.pos += 1; // [
        let arr = engine.create_array();
        // Root the array across element allocation.
        engine.tmp_roots.push(vec![arr]);
        let result = self.array_items(engine, arr, depth);
        engine.tmp_roots.pop();
        result?;
        Ok(arr)
    }

    fn array_items(&mut self, engine: &mut Engine, arr: Val, depth: usize) -> Result<(), Val> {
        self.skip_ws();
        if self.eat(b']') {
            return Ok(());
        }
        loop {
            let v = self.value(engine, depth + 1)?;
            engine.array_push(arr, v)?;
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b']') {
                return Ok(());
            }
            return Err(self.error(engine, "expected ',' or ']'"));
        }
    }

    fn object(&mut self, engine: &mut Engine, depth: usize) -> Result<Val, Val> {
        self.pos += 1; // {
        let obj = engine.create_object();
        engine.tmp_roots.push(vec![obj]);
        let result = self.object_items(engine, obj, depth);
        engine.tmp_roots.pop();
        result?;
        Ok(obj)
    }

    fn object_items(&mut self, engine: &mut Engine, obj: Val, depth: usize) -> Result<(), Val> {
        self.skip_ws();
        if self.eat(b'}') {
            return Ok(());
        }
        loop {
            self.skip_ws();
            if self.src.get(self.pos) != Some(&b'"') {
                return Err(self.error(engine, "expected a property name"));
            }
            let name = self.string(engine)?;
            self.skip_ws();
            if !self.eat(b':') {
                return Err(self.error(engine, "expected ':'"));
            }
            let value = self.value(engine, depth + 1)?;
            let name_val = engine.create_string(&name);
            engine.set_prop(obj, name_val, value)?;
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b'}') {
                return Ok(());
            }
            return Err(self.error(engine, "expected ',' or '}'"));
        }
    }

    fn string(&mut self, engine: &mut Engine) -> Result<String, Val> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.src.get(self.pos) {
                None => return Err(self.error(engine, "unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.src.get(self.pos) {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'b') => out.push('\u{8}'),
                        Some(b'f') => out.push('\u{c}'),
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'u') => {
                            let hex = self
                                .src
                                .get(self.pos + 1..self.pos + 5)
                                .and_then(|h| std::str::from_utf8(h).ok())
                                .and_then(|h| u32::from_str_radix(h, 16).ok());
                            match hex {
                                Some(code) => {
                                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                                    self.pos += 4;
                                }
                                None => return Err(self.error(engine, "bad \\u escape")),
                            }
                        }
                        _ => return Err(self.error(engine, "bad escape")),
                    }
                    self.pos += 1;
                }
                Some(&b) if b < 0x20 => {
                    return Err(self.error(engine, "control character in string"));
                }
                Some(_) => {
                    // Copy a whole UTF-8 character.
                    let rest = &self.src[self.pos..];
                    let s = match std::str::from_utf8(rest) {
                        Ok(s) => s,
                        Err(e) if e.valid_up_to() > 0 => {
                            std::str::from_utf8(&rest[..e.valid_up_to()]).unwrap_or("")
                        }
                        Err(_) => return Err(self.error(engine, "invalid utf-8")),
                    };
                    match s.chars().next() {
                        Some(c) => {
                            out.push(c);
                            self.pos += c.len_utf8();
                        }
                        None => return Err(self.error(engine, "invalid utf-8")),
                    }
                }
            }
        }
    }

    fn number(&mut self, engine: &mut Engine) -> Result<Val, Val> {
        let start = self.pos;
        if self.eat(b'-') {}
        while matches!(self.src.get(self.pos), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.eat(b'.') {
            while matches!(self.src.get(self.pos), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.src.get(self.pos), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.src.get(self.pos), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.src.get(self.pos), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        match text.parse::<f64>() {
            Ok(n) => Ok(Val::number(n)),
            Err(_) => Err(self.error(engine, "malformed number")),
        }
    }
}
