//! The compiled-code record and its binary format.

use std::fmt::Write as _;
use std::rc::Rc;

use crate::ast::{read_varint, write_varint};
use crate::bytecode::op::{Opcode, Operand};
use crate::engine::Engine;
use crate::error::{ExecError, ExecResult};
use crate::value::Val;

/// A compiled function or script body.
///
/// Shared by reference counting: every closure instance produced from the
/// same function literal holds the same `Rc<Bcode>`.
///
/// `names[0]` is the function's own name, `names[1..=args]` the parameter
/// names, and the remainder the hoisted `var` names of the body.
#[derive(Debug, Default)]
pub(crate) struct Bcode {
    pub ops: Vec<u8>,
    pub lit: Vec<Val>,
    pub names: Vec<Val>,
    pub args: u16,
    pub strict: bool,
}

impl Bcode {
    /// Adds a literal, deduplicating by exact value encoding. Inline,
    /// dictionary, and foreign-interned strings of equal content share one
    /// encoding, so string literals dedup for free.
    pub fn add_lit(&mut self, v: Val) -> usize {
        if let Some(i) = self.lit.iter().position(|&l| l == v) {
            return i;
        }
        self.lit.push(v);
        self.lit.len() - 1
    }

    /// Renders a human-readable disassembly of the ops stream.
    pub fn disassemble(&self, engine: &Engine) -> String {
        let mut out = String::new();
        let mut ip = 0usize;
        while ip < self.ops.len() {
            let at = ip;
            let Some(op) = Opcode::from_repr(self.ops[ip]) else {
                let _ = writeln!(out, "{at:6}  ?? {:#x}", self.ops[ip]);
                ip += 1;
                continue;
            };
            ip += 1;
            match op.operand() {
                Operand::None => {
                    let _ = writeln!(out, "{at:6}  {op}");
                }
                Operand::Lit => {
                    let idx = read_varint(&self.ops, &mut ip).unwrap_or(0) as usize;
                    let lit = self.lit.get(idx).copied().unwrap_or(Val::UNDEFINED);
                    let shown = engine.debug_lit(lit);
                    let _ = writeln!(out, "{at:6}  {op} {idx} ({shown})");
                }
                Operand::Target => {
                    let target = read_target(&self.ops, &mut ip).unwrap_or(0);
                    let _ = writeln!(out, "{at:6}  {op} -> {target}");
                }
                Operand::ArgCount => {
                    let n = self.ops.get(ip).copied().unwrap_or(0);
                    ip += 1;
                    let _ = writeln!(out, "{at:6}  {op} argc={n}");
                }
            }
        }
        out
    }
}

/// Reads a 4-byte absolute jump target; advances `pos`.
pub(crate) fn read_target(ops: &[u8], pos: &mut usize) -> Option<usize> {
    let bytes = ops.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

/// Magic prefix of the binary bytecode stream.
pub const BCODE_MAGIC: &[u8; 9] = b"V\x07BCODE:\0";

const LIT_NUMBER: u8 = 0;
const LIT_STRING: u8 = 1;
const LIT_FUNCTION: u8 = 3;

/// Serializes a bcode tree: magic, then the recursive function record
/// `<lit-count> <literals> <names-count> <names> <args> <ops-size> <ops>`.
pub(crate) fn bcode_to_binary(engine: &Engine, bcode: &Bcode) -> ExecResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(BCODE_MAGIC);
    write_func_record(engine, bcode, &mut out)?;
    Ok(out)
}

fn write_str(engine: &Engine, v: Val, out: &mut Vec<u8>) -> ExecResult<()> {
    let s = engine
        .try_str(v)
        .map_err(|_| ExecError::internal("stale string in literal table"))?;
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

fn write_func_record(engine: &Engine, bcode: &Bcode, out: &mut Vec<u8>) -> ExecResult<()> {
    write_varint(out, bcode.lit.len() as u64);
    for &lit in &bcode.lit {
        if lit.is_number() {
            out.push(LIT_NUMBER);
            let text = number_text(lit.as_number());
            write_varint(out, text.len() as u64);
            out.extend_from_slice(text.as_bytes());
        } else if lit.is_string() {
            out.push(LIT_STRING);
            write_str(engine, lit, out)?;
        } else if let Some(func_id) = lit.as_func_id() {
            out.push(LIT_FUNCTION);
            let nested = engine
                .func_bcode(func_id)
                .ok_or_else(|| ExecError::internal("function literal without bcode"))?;
            write_func_record(engine, &nested, out)?;
        } else {
            return Err(ExecError::InvalidArg("unserializable literal"));
        }
    }
    write_varint(out, bcode.names.len() as u64);
    for &name in &bcode.names {
        write_str(engine, name, out)?;
    }
    write_varint(out, u64::from(bcode.args));
    write_varint(out, bcode.ops.len() as u64);
    out.extend_from_slice(&bcode.ops);
    Ok(())
}

/// Shortest text that parses back to exactly the same double.
fn number_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        format!("{n}")
    }
}

/// Deserializes a binary bytecode stream produced by [`bcode_to_binary`].
///
/// Strings are re-interned through the engine; nested function records
/// become fresh function-template cells with no captured scope.
pub(crate) fn bcode_from_binary(engine: &mut Engine, bytes: &[u8]) -> ExecResult<Rc<Bcode>> {
    let body = bytes
        .strip_prefix(BCODE_MAGIC.as_slice())
        .ok_or(ExecError::InvalidArg("bad bytecode magic"))?;
    let mut pos = 0usize;
    let bcode = read_func_record(engine, body, &mut pos)?;
    Ok(Rc::new(bcode))
}

fn bad() -> ExecError {
    ExecError::internal("truncated bytecode stream")
}

fn read_str(engine: &mut Engine, bytes: &[u8], pos: &mut usize) -> ExecResult<Val> {
    let len = read_varint(bytes, pos).ok_or_else(bad)? as usize;
    let body = bytes.get(*pos..*pos + len).ok_or_else(bad)?;
    let s = std::str::from_utf8(body).map_err(|_| ExecError::internal("bad utf-8 in bytecode"))?;
    let v = engine.intern_literal_string(s);
    *pos += len;
    if bytes.get(*pos) != Some(&0) {
        return Err(bad());
    }
    *pos += 1;
    Ok(v)
}

fn read_func_record(engine: &mut Engine, bytes: &[u8], pos: &mut usize) -> ExecResult<Bcode> {
    let mut bcode = Bcode::default();
    let lit_count = read_varint(bytes, pos).ok_or_else(bad)?;
    for _ in 0..lit_count {
        let tag = *bytes.get(*pos).ok_or_else(bad)?;
        *pos += 1;
        let lit = match tag {
            LIT_NUMBER => {
                let len = read_varint(bytes, pos).ok_or_else(bad)? as usize;
                let body = bytes.get(*pos..*pos + len).ok_or_else(bad)?;
                *pos += len;
                let text = std::str::from_utf8(body)
                    .map_err(|_| ExecError::internal("bad number literal"))?;
                let n = match text {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ => text
                        .parse::<f64>()
                        .map_err(|_| ExecError::internal("bad number literal"))?,
                };
                Val::number(n)
            }
            LIT_STRING => read_str(engine, bytes, pos)?,
            LIT_FUNCTION => {
                let nested = read_func_record(engine, bytes, pos)?;
                engine.make_func_template(Rc::new(nested))
            }
            _ => return Err(ExecError::internal("unknown literal tag")),
        };
        bcode.lit.push(lit);
    }
    let names_count = read_varint(bytes, pos).ok_or_else(bad)?;
    for _ in 0..names_count {
        let name = read_str(engine, bytes, pos)?;
        bcode.names.push(name);
    }
    bcode.args = read_varint(bytes, pos).ok_or_else(bad)? as u16;
    if usize::from(bcode.args) + 1 > bcode.names.len() {
        return Err(ExecError::internal("argument count exceeds name table"));
    }
    let ops_len = read_varint(bytes, pos).ok_or_else(bad)? as usize;
    let ops = bytes.get(*pos..*pos + ops_len).ok_or_else(bad)?;
    *pos += ops_len;
    bcode.ops = ops.to_vec();
    Ok(bcode)
}
