//! AST to bytecode.
//!
//! Statement discipline: the prologue pushes an `undefined` seed; every
//! non-neutral statement compiles its expression and then `SWAP_DROP`s it
//! over the seed, so the seed always carries the script's "last statement
//! value". Declarations, `if`, and loops are stack-neutral. Inside a
//! `for-in` body the loop cursor sits above the seed, so statement values
//! are dropped instead.
//!
//! Hoisting uses the parser's var chain (the `FIRST_VAR`/`NEXT_VAR` skips):
//! every chained `var` name lands in `bcode.names` with no initializer, and
//! every chained function declaration additionally emits its literal plus a
//! `SET_VAR` in the prologue so it is callable before its textual position.

use ahash::AHashSet;

use crate::ast::{skip, Ast, AstPos, AstTag, write_varint};
use crate::bytecode::op::Opcode;
use crate::bytecode::Bcode;
use crate::engine::Engine;
use crate::error::{ExecError, ExecResult, SyntaxError};
use crate::lexer::unescape;
use crate::value::Val;

const MAX_COMPILE_DEPTH: u32 = 4000;

/// Compiles a parsed script into a bcode record.
pub(crate) fn compile_script(
    engine: &mut Engine,
    ast: &Ast,
    src: &str,
    force_strict: bool,
) -> ExecResult<Bcode> {
    let mut c = Compiler {
        engine,
        ast,
        src,
        strict: force_strict,
        in_function: false,
        discard_depth: 0,
        break_depth: 0,
        loop_depth: 0,
        depth: 0,
    };
    let mut bcode = Bcode::default();
    let empty = c.engine.intern_literal_string("");
    bcode.names.push(empty);
    let mut pos = 0usize;
    c.compile_scope_body(&mut bcode, &mut pos, true)?;
    Ok(bcode)
}

struct Compiler<'a> {
    engine: &'a mut Engine,
    ast: &'a Ast,
    src: &'a str,
    strict: bool,
    in_function: bool,
    /// Non-zero inside for-in bodies: statement values are dropped.
    discard_depth: u32,
    /// Loops plus switches (targets for `break`).
    break_depth: u32,
    /// Loops only (targets for `continue`).
    loop_depth: u32,
    depth: u32,
}

// Emission helpers.

fn here(b: &Bcode) -> usize {
    b.ops.len()
}

fn emit(b: &mut Bcode, op: Opcode) {
    b.ops.push(op as u8);
}

fn emit_lit(b: &mut Bcode, op: Opcode, v: Val) {
    let idx = b.add_lit(v);
    b.ops.push(op as u8);
    write_varint(&mut b.ops, idx as u64);
}

/// Emits a jump-family opcode with a zeroed target; returns the patch site.
fn emit_jump(b: &mut Bcode, op: Opcode) -> usize {
    b.ops.push(op as u8);
    let at = b.ops.len();
    b.ops.extend_from_slice(&[0, 0, 0, 0]);
    at
}

fn patch(b: &mut Bcode, at: usize) {
    let target = b.ops.len() as u32;
    b.ops[at..at + 4].copy_from_slice(&target.to_be_bytes());
}

fn patch_to(b: &mut Bcode, at: usize, target: usize) {
    b.ops[at..at + 4].copy_from_slice(&(target as u32).to_be_bytes());
}

fn add_name(b: &mut Bcode, name: Val) {
    if !b.names.contains(&name) {
        b.names.push(name);
    }
}

impl Compiler<'_> {
    fn err(&self, msg: &str) -> ExecError {
        ExecError::Syntax(SyntaxError::at(self.src, 0, msg))
    }

    fn enter(&mut self) -> ExecResult<()> {
        self.depth += 1;
        if self.depth > MAX_COMPILE_DEPTH {
            return Err(ExecError::StackOverflow);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Reads the chain skip (`FIRST_VAR`/`NEXT_VAR`): a skip pointing at the
    /// node itself means "end of chain".
    fn chain_next(&self, node: AstPos, which: u8) -> Option<AstPos> {
        let target = self.ast.get_skip(node, which);
        (target != node).then_some(target)
    }

    /// Compiles the script body: seed, hoisting, statements. (Function
    /// bodies go through `compile_function`, which reads its own header.)
    fn compile_scope_body(
        &mut self,
        b: &mut Bcode,
        pos: &mut usize,
        is_script: bool,
    ) -> ExecResult<()> {
        let node = *pos;
        let tag = self.ast.fetch_tag(pos);
        if !is_script || tag != AstTag::Script {
            return Err(self.err("expected a script node"));
        }
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let end = self.ast.get_skip(node, skip::END);

        // "use strict" prologue.
        let mut probe = *pos;
        if probe < end && self.ast.fetch_tag(&mut probe) == AstTag::UseStrict {
            self.strict = true;
        }
        b.strict = self.strict;

        emit(b, Opcode::PushUndefined);
        self.hoist(b, node, skip::FIRST_VAR)?;
        self.compile_stmts_range(b, pos, end)?;
        Ok(())
    }

    /// Walks the var chain rooted at `scope_node`, recording names and
    /// emitting hoisted function-declaration assignments.
    fn hoist(&mut self, b: &mut Bcode, scope_node: AstPos, first_which: u8) -> ExecResult<()> {
        let mut link = self.chain_next(scope_node, first_which);
        while let Some(node) = link {
            let mut pos = node;
            let tag = self.ast.fetch_tag(&mut pos);
            match tag {
                AstTag::Var => {
                    pos += 2 * crate::ast::SKIP_SIZE;
                    let end = self.ast.get_skip(node, skip::END);
                    while pos < end {
                        let decl = pos;
                        let tag = self.ast.fetch_tag(&mut pos);
                        if tag != AstTag::VarDecl {
                            return Err(self.err("malformed var declaration"));
                        }
                        let name = self.ast.fetch_inline(&mut pos).to_owned();
                        let name_val = self.engine.intern_literal_string(&name);
                        add_name(b, name_val);
                        let _ = decl;
                        self.ast.skip_tree(&mut pos); // initializer
                    }
                }
                AstTag::FuncDecl => {
                    pos += 2 * crate::ast::SKIP_SIZE;
                    // Single child: the function literal.
                    let mut func_pos = pos;
                    let name_val = self.func_decl_name(func_pos)?;
                    add_name(b, name_val);
                    let template = self.compile_function(&mut func_pos)?;
                    emit_lit(b, Opcode::FuncLit, template);
                    emit_lit(b, Opcode::SetVar, name_val);
                    emit(b, Opcode::Drop);
                }
                _ => return Err(self.err("malformed hoisting chain")),
            }
            link = self.chain_next(node, skip::NEXT_VAR);
        }
        Ok(())
    }

    /// The declared name of the `Func` node at `pos`.
    fn func_decl_name(&mut self, mut pos: AstPos) -> ExecResult<Val> {
        let node = pos;
        let tag = self.ast.fetch_tag(&mut pos);
        if tag != AstTag::Func {
            return Err(self.err("malformed function declaration"));
        }
        let _ = node;
        pos += 3 * crate::ast::SKIP_SIZE;
        let name_tag = self.ast.fetch_tag(&mut pos);
        if name_tag != AstTag::Ident {
            return Err(self.err("function declaration requires a name"));
        }
        let name = self.ast.fetch_inline(&mut pos).to_owned();
        Ok(self.engine.intern_literal_string(&name))
    }

    fn compile_stmts_range(&mut self, b: &mut Bcode, pos: &mut usize, end: usize) -> ExecResult<()> {
        while *pos < end {
            let before = *pos;
            self.compile_stmt(b, pos)?;
            if *pos <= before {
                // Possible only with corrupt (hand-crafted binary) ASTs.
                return Err(self.err("malformed AST"));
            }
        }
        *pos = end;
        Ok(())
    }

    fn compile_stmt(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        self.enter()?;
        let result = self.compile_stmt_inner(b, pos);
        self.leave();
        result
    }

    fn compile_stmt_inner(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        let mut peek = *pos;
        let tag = self.ast.fetch_tag(&mut peek);
        match tag {
            AstTag::Nop | AstTag::Debugger | AstTag::UseStrict => {
                self.ast.skip_tree(pos);
            }
            AstTag::Var => {
                self.compile_var(b, pos)?;
            }
            AstTag::FuncDecl => {
                // Entirely handled by the hoisting pass.
                self.ast.skip_tree(pos);
            }
            AstTag::Block => {
                *pos = peek + crate::ast::SKIP_SIZE;
                let end = self.ast.get_skip(node, skip::END);
                self.compile_stmts_range(b, pos, end)?;
            }
            AstTag::If => self.compile_if(b, pos)?,
            AstTag::While => self.compile_while(b, pos)?,
            AstTag::DoWhile => self.compile_do_while(b, pos)?,
            AstTag::For => self.compile_for(b, pos)?,
            AstTag::ForIn => self.compile_for_in(b, pos)?,
            AstTag::Try => self.compile_try(b, pos)?,
            AstTag::Switch => self.compile_switch(b, pos)?,
            AstTag::With => return Err(self.err("with statement is not supported")),
            AstTag::Label => {
                // The label itself compiles away; only labeled jumps are
                // unsupported.
                *pos = peek;
                self.ast.fetch_inline(pos);
                self.compile_stmt(b, pos)?;
            }
            AstTag::LabeledBreak | AstTag::LabeledContinue => {
                return Err(self.err("labeled break/continue is not supported"))
            }
            AstTag::Return => {
                if !self.in_function {
                    return Err(self.err("return is only allowed inside a function"));
                }
                *pos = peek;
                emit(b, Opcode::PushUndefined);
                emit(b, Opcode::Ret);
            }
            AstTag::ValueReturn => {
                if !self.in_function {
                    return Err(self.err("return is only allowed inside a function"));
                }
                *pos = peek;
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Ret);
            }
            AstTag::Throw => {
                *pos = peek;
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Throw);
            }
            AstTag::Break => {
                if self.break_depth == 0 {
                    return Err(self.err("break outside of a loop or switch"));
                }
                *pos = peek;
                emit(b, Opcode::Break);
            }
            AstTag::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.err("continue outside of a loop"));
                }
                *pos = peek;
                emit(b, Opcode::Continue);
            }
            _ => {
                // Expression statement.
                self.compile_expr(b, pos)?;
                if self.discard_depth > 0 {
                    emit(b, Opcode::Drop);
                } else {
                    emit(b, Opcode::SwapDrop);
                }
            }
        }
        Ok(())
    }

    /// `var` declarations: names were hoisted; initializers assign here.
    fn compile_var(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let end = self.ast.get_skip(node, skip::END);
        while *pos < end {
            let tag = self.ast.fetch_tag(pos);
            if tag != AstTag::VarDecl {
                return Err(self.err("malformed var declaration"));
            }
            let name = self.ast.fetch_inline(pos).to_owned();
            let name_val = self.engine.intern_literal_string(&name);
            let mut init_peek = *pos;
            if self.ast.fetch_tag(&mut init_peek) == AstTag::Nop {
                self.ast.skip_tree(pos);
                continue;
            }
            self.compile_expr(b, pos)?;
            emit_lit(b, Opcode::SetVar, name_val);
            emit(b, Opcode::Drop);
        }
        *pos = end;
        Ok(())
    }

    fn compile_if(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let else_start = self.ast.get_skip(node, skip::END_IF_TRUE);
        let end = self.ast.get_skip(node, skip::END);

        self.compile_expr(b, pos)?; // condition
        let to_else = emit_jump(b, Opcode::JmpFalse);
        self.compile_stmts_range(b, pos, else_start)?;
        if else_start < end {
            let to_end = emit_jump(b, Opcode::Jmp);
            patch(b, to_else);
            self.compile_stmts_range(b, pos, end)?;
            patch(b, to_end);
        } else {
            patch(b, to_else);
        }
        *pos = end;
        Ok(())
    }

    fn compile_while(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + crate::ast::SKIP_SIZE;
        let end = self.ast.get_skip(node, skip::END);

        let try_site = emit_jump(b, Opcode::TryPushLoop);
        let cond_label = here(b);
        self.compile_expr(b, pos)?;
        let to_land = emit_jump(b, Opcode::JmpFalse);

        self.break_depth += 1;
        self.loop_depth += 1;
        self.compile_stmts_range(b, pos, end)?;
        self.loop_depth -= 1;
        self.break_depth -= 1;

        let back = emit_jump(b, Opcode::Jmp);
        patch_to(b, back, cond_label);
        patch(b, try_site);
        patch(b, to_land);
        let continue_site = emit_jump(b, Opcode::JmpIfContinue);
        patch_to(b, continue_site, cond_label);
        emit(b, Opcode::TryPop);
        *pos = end;
        Ok(())
    }

    fn compile_do_while(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let cond_start = self.ast.get_skip(node, skip::DO_WHILE_COND);
        let end = self.ast.get_skip(node, skip::END);

        let try_site = emit_jump(b, Opcode::TryPushLoop);
        let body_label = here(b);

        self.break_depth += 1;
        self.loop_depth += 1;
        self.compile_stmts_range(b, pos, cond_start)?;
        self.loop_depth -= 1;
        self.break_depth -= 1;

        let cond_label = here(b);
        self.compile_expr(b, pos)?;
        let back = emit_jump(b, Opcode::JmpTrue);
        patch_to(b, back, body_label);
        patch(b, try_site);
        let continue_site = emit_jump(b, Opcode::JmpIfContinue);
        patch_to(b, continue_site, cond_label);
        emit(b, Opcode::TryPop);
        *pos = end;
        Ok(())
    }

    fn compile_for(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let body_start = self.ast.get_skip(node, skip::FOR_BODY);
        let end = self.ast.get_skip(node, skip::END);

        // init
        let mut peek = *pos;
        match self.ast.fetch_tag(&mut peek) {
            AstTag::Nop => self.ast.skip_tree(pos),
            AstTag::Var => self.compile_var(b, pos)?,
            _ => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Drop);
            }
        }

        let try_site = emit_jump(b, Opcode::TryPushLoop);
        let cond_label = here(b);
        let mut peek = *pos;
        if self.ast.fetch_tag(&mut peek) == AstTag::Nop {
            self.ast.skip_tree(pos);
            emit(b, Opcode::PushTrue);
        } else {
            self.compile_expr(b, pos)?;
        }
        let to_land = emit_jump(b, Opcode::JmpFalse);

        // Iteration clause is compiled after the body; remember where it is.
        let iter_ast = *pos;
        self.ast.skip_tree(pos);
        debug_assert!(*pos <= body_start);
        *pos = body_start;

        self.break_depth += 1;
        self.loop_depth += 1;
        self.compile_stmts_range(b, pos, end)?;
        self.loop_depth -= 1;
        self.break_depth -= 1;

        let iter_label = here(b);
        let mut iter_pos = iter_ast;
        let mut peek = iter_ast;
        if self.ast.fetch_tag(&mut peek) != AstTag::Nop {
            self.compile_expr(b, &mut iter_pos)?;
            emit(b, Opcode::Drop);
        }
        let back = emit_jump(b, Opcode::Jmp);
        patch_to(b, back, cond_label);
        patch(b, try_site);
        patch(b, to_land);
        let continue_site = emit_jump(b, Opcode::JmpIfContinue);
        patch_to(b, continue_site, iter_label);
        emit(b, Opcode::TryPop);
        *pos = end;
        Ok(())
    }

    fn compile_for_in(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + crate::ast::SKIP_SIZE;
        let end = self.ast.get_skip(node, skip::END);

        // The loop variable: a single var declaration or an lvalue.
        let lvalue_ast = *pos;
        self.ast.skip_tree(pos);

        self.compile_expr(b, pos)?; // object
        emit(b, Opcode::PushNull); // initial cursor
        let try_site = emit_jump(b, Opcode::TryPushLoop);
        let loop_label = here(b);
        emit(b, Opcode::NextProp);
        let to_exhausted = emit_jump(b, Opcode::JmpFalse);

        self.compile_for_in_assign(b, lvalue_ast)?;

        self.break_depth += 1;
        self.loop_depth += 1;
        self.discard_depth += 1;
        self.compile_stmts_range(b, pos, end)?;
        self.discard_depth -= 1;
        self.loop_depth -= 1;
        self.break_depth -= 1;

        let back = emit_jump(b, Opcode::Jmp);
        patch_to(b, back, loop_label);
        patch(b, try_site);
        let continue_site = emit_jump(b, Opcode::JmpIfContinue);
        patch_to(b, continue_site, loop_label);
        emit(b, Opcode::Drop); // cursor
        emit(b, Opcode::Drop); // object
        patch(b, to_exhausted);
        emit(b, Opcode::TryPop);
        *pos = end;
        Ok(())
    }

    /// Assigns the enumerated name (TOS) to the loop variable.
    fn compile_for_in_assign(&mut self, b: &mut Bcode, lvalue: AstPos) -> ExecResult<()> {
        let mut pos = lvalue;
        let tag = self.ast.fetch_tag(&mut pos);
        match tag {
            AstTag::Var => {
                // A single declaration with no initializer.
                let mut p = lvalue + 1 + 2 * crate::ast::SKIP_SIZE;
                let decl_tag = self.ast.fetch_tag(&mut p);
                if decl_tag != AstTag::VarDecl {
                    return Err(self.err("malformed for-in declaration"));
                }
                let name = self.ast.fetch_inline(&mut p).to_owned();
                let name_val = self.engine.intern_literal_string(&name);
                emit_lit(b, Opcode::SetVar, name_val);
                emit(b, Opcode::Drop);
            }
            AstTag::Ident => {
                let name = self.ast.fetch_inline(&mut pos).to_owned();
                let name_val = self.engine.intern_literal_string(&name);
                emit_lit(b, Opcode::SetVar, name_val);
                emit(b, Opcode::Drop);
            }
            AstTag::Member => {
                let name = self.ast.fetch_inline(&mut pos).to_owned();
                let name_val = self.engine.intern_literal_string(&name);
                emit(b, Opcode::Stash);
                self.compile_expr(b, &mut pos)?; // object
                emit_lit(b, Opcode::PushLit, name_val);
                emit(b, Opcode::Unstash);
                emit(b, Opcode::Set);
                emit(b, Opcode::Drop);
            }
            AstTag::Index => {
                emit(b, Opcode::Stash);
                self.compile_expr(b, &mut pos)?; // object
                self.compile_expr(b, &mut pos)?; // index
                emit(b, Opcode::Unstash);
                emit(b, Opcode::Set);
                emit(b, Opcode::Drop);
            }
            _ => return Err(self.err("invalid for-in loop variable")),
        }
        Ok(())
    }

    fn compile_try(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 3 * crate::ast::SKIP_SIZE;
        let catch_start = self.ast.get_skip(node, skip::TRY_CATCH);
        let finally_start = self.ast.get_skip(node, skip::TRY_FINALLY);
        let end = self.ast.get_skip(node, skip::END);
        let has_catch = catch_start < finally_start;
        let has_finally = finally_start < end;
        if !has_catch && !has_finally {
            return Err(self.err("try must have at least catch or finally"));
        }

        let finally_site = has_finally.then(|| emit_jump(b, Opcode::TryPushFinally));
        let catch_site = has_catch.then(|| emit_jump(b, Opcode::TryPushCatch));

        self.compile_stmts_range(b, pos, catch_start)?;

        if has_catch {
            emit(b, Opcode::TryPop);
            let over_catch = emit_jump(b, Opcode::Jmp);
            patch(b, catch_site.expect("has_catch"));

            // The thrown value is on TOS here; bind it in a private frame.
            let mut p = catch_start;
            let ident_tag = self.ast.fetch_tag(&mut p);
            if ident_tag != AstTag::Ident {
                return Err(self.err("malformed catch clause"));
            }
            let name = self.ast.fetch_inline(&mut p).to_owned();
            let name_val = self.engine.intern_literal_string(&name);
            emit_lit(b, Opcode::EnterCatch, name_val);
            self.compile_stmts_range(b, &mut p, finally_start)?;
            emit(b, Opcode::ExitCatch);
            patch(b, over_catch);
        }
        *pos = finally_start;

        if has_finally {
            emit(b, Opcode::TryPop);
            patch(b, finally_site.expect("has_finally"));
            self.compile_stmts_range(b, pos, end)?;
            emit(b, Opcode::AfterFinally);
        }
        *pos = end;
        Ok(())
    }

    fn compile_switch(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        *pos = node + 1 + 2 * crate::ast::SKIP_SIZE;
        let end = self.ast.get_skip(node, skip::END);
        let default_node = self.ast.get_skip(node, skip::SWITCH_DEFAULT);

        let try_site = emit_jump(b, Opcode::TryPushSwitch);
        self.compile_expr(b, pos)?; // comparand

        // First pass: the dispatch table.
        let mut case_sites = Vec::new();
        let mut default_site = None;
        let mut scan = *pos;
        while scan < end {
            let case_node = scan;
            let mut p = scan;
            let tag = self.ast.fetch_tag(&mut p);
            match tag {
                AstTag::Case => {
                    let mut test = case_node + 1 + crate::ast::SKIP_SIZE;
                    emit(b, Opcode::Dup);
                    self.compile_expr(b, &mut test)?;
                    emit(b, Opcode::Eq);
                    case_sites.push((case_node, emit_jump(b, Opcode::JmpTrueDrop)));
                }
                AstTag::Default => {
                    default_site = Some(case_node);
                }
                _ => return Err(self.err("malformed switch case")),
            }
            self.ast.skip_tree(&mut scan);
        }
        let _ = default_node;
        emit(b, Opcode::Drop);
        let dfl_jump = emit_jump(b, Opcode::Jmp);

        // Second pass: case bodies in source order.
        self.break_depth += 1;
        let mut body_labels = Vec::new();
        let mut scan = *pos;
        while scan < end {
            let case_node = scan;
            let mut p = scan;
            let tag = self.ast.fetch_tag(&mut p);
            let case_end = self.ast.get_skip(case_node, skip::END);
            if case_end <= case_node {
                return Err(self.err("malformed AST"));
            }
            let label = here(b);
            body_labels.push((case_node, label));
            match tag {
                AstTag::Case => {
                    let mut body = case_node + 1 + crate::ast::SKIP_SIZE;
                    self.ast.skip_tree(&mut body); // test expression
                    self.compile_stmts_range(b, &mut body, case_end)?;
                }
                AstTag::Default => {
                    let mut body = case_node + 1 + crate::ast::SKIP_SIZE;
                    self.compile_stmts_range(b, &mut body, case_end)?;
                }
                _ => unreachable!("validated in the first pass"),
            }
            scan = case_end;
        }
        self.break_depth -= 1;

        for (case_node, site) in case_sites {
            let label = body_labels
                .iter()
                .find(|(n, _)| *n == case_node)
                .map(|(_, l)| *l)
                .ok_or_else(|| self.err("switch case lost its body"))?;
            patch_to(b, site, label);
        }
        match default_site {
            Some(case_node) => {
                let label = body_labels
                    .iter()
                    .find(|(n, _)| *n == case_node)
                    .map(|(_, l)| *l)
                    .ok_or_else(|| self.err("switch default lost its body"))?;
                patch_to(b, dfl_jump, label);
            }
            None => patch(b, dfl_jump),
        }
        patch(b, try_site);
        emit(b, Opcode::TryPop);
        *pos = end;
        Ok(())
    }

    // --- expressions ---

    fn compile_expr(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        self.enter()?;
        let result = self.compile_expr_inner(b, pos);
        self.leave();
        result
    }

    fn compile_expr_inner(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let node = *pos;
        let tag = self.ast.fetch_tag(pos);
        match tag {
            AstTag::Nop => emit(b, Opcode::PushUndefined),
            AstTag::This => emit(b, Opcode::PushThis),
            AstTag::True => emit(b, Opcode::PushTrue),
            AstTag::False => emit(b, Opcode::PushFalse),
            AstTag::Null => emit(b, Opcode::PushNull),
            AstTag::Undefined => emit(b, Opcode::PushUndefined),

            AstTag::Num => {
                let text = self.ast.fetch_inline(pos).to_owned();
                let n = crate::vm::arith::string_to_number(&text);
                if n == 0.0 && !n.is_sign_negative() {
                    emit(b, Opcode::PushZero);
                } else if n == 1.0 {
                    emit(b, Opcode::PushOne);
                } else {
                    emit_lit(b, Opcode::PushLit, Val::number(n));
                }
            }
            AstTag::StringLit => {
                let raw = self.ast.fetch_inline(pos).to_owned();
                let text = unescape(&raw).map_err(|msg| self.err(msg))?;
                let v = self.engine.intern_literal_string(&text);
                emit_lit(b, Opcode::PushLit, v);
            }
            AstTag::Regex => {
                let raw = self.ast.fetch_inline(pos).to_owned();
                let (pattern, flags) = split_regex(&raw).ok_or_else(|| self.err("malformed regex literal"))?;
                let v = self
                    .engine
                    .create_regexp(pattern, flags)
                    .map_err(|_| self.err("invalid regular expression"))?;
                emit_lit(b, Opcode::PushLit, v);
            }
            AstTag::Ident => {
                let name = self.ast.fetch_inline(pos).to_owned();
                let v = self.engine.intern_literal_string(&name);
                emit_lit(b, Opcode::GetVar, v);
            }

            AstTag::Seq => {
                let end = self.ast.get_skip(node, skip::END);
                *pos = node + 1 + crate::ast::SKIP_SIZE;
                let mut first = true;
                while *pos < end {
                    if !first {
                        // previous value is dead
                        self.compile_expr(b, pos)?;
                        emit(b, Opcode::SwapDrop);
                        continue;
                    }
                    self.compile_expr(b, pos)?;
                    first = false;
                }
                *pos = end;
            }

            AstTag::LogicalOr | AstTag::LogicalAnd => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Dup);
                let short = emit_jump(
                    b,
                    if tag == AstTag::LogicalOr {
                        Opcode::JmpTrue
                    } else {
                        Opcode::JmpFalse
                    },
                );
                emit(b, Opcode::Drop);
                self.compile_expr(b, pos)?;
                patch(b, short);
            }

            AstTag::Cond => {
                self.compile_expr(b, pos)?;
                let to_else = emit_jump(b, Opcode::JmpFalse);
                self.compile_expr(b, pos)?;
                let to_end = emit_jump(b, Opcode::Jmp);
                patch(b, to_else);
                self.compile_expr(b, pos)?;
                patch(b, to_end);
            }

            AstTag::Or
            | AstTag::Xor
            | AstTag::And
            | AstTag::Eq
            | AstTag::EqEq
            | AstTag::Ne
            | AstTag::NeNe
            | AstTag::Le
            | AstTag::Lt
            | AstTag::Ge
            | AstTag::Gt
            | AstTag::In
            | AstTag::Instanceof
            | AstTag::Lshift
            | AstTag::Rshift
            | AstTag::Urshift
            | AstTag::Add
            | AstTag::Sub
            | AstTag::Rem
            | AstTag::Mul
            | AstTag::Div => {
                self.compile_expr(b, pos)?;
                self.compile_expr(b, pos)?;
                emit(b, binary_opcode(tag));
            }

            AstTag::Positive => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Pos);
            }
            AstTag::Negative => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Neg);
            }
            AstTag::Not => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Not);
            }
            AstTag::LogicalNot => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::LogicalNot);
            }
            AstTag::Void => {
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Drop);
                emit(b, Opcode::PushUndefined);
            }
            AstTag::Typeof => {
                let mut peek = *pos;
                if self.ast.fetch_tag(&mut peek) == AstTag::Ident {
                    *pos += 1;
                    let name = self.ast.fetch_inline(pos).to_owned();
                    let v = self.engine.intern_literal_string(&name);
                    emit_lit(b, Opcode::SafeGetVar, v);
                } else {
                    self.compile_expr(b, pos)?;
                }
                emit(b, Opcode::Typeof);
            }
            AstTag::Delete => {
                let mut peek = *pos;
                match self.ast.fetch_tag(&mut peek) {
                    AstTag::Member => {
                        *pos = peek;
                        let name = self.ast.fetch_inline(pos).to_owned();
                        let v = self.engine.intern_literal_string(&name);
                        self.compile_expr(b, pos)?;
                        emit_lit(b, Opcode::PushLit, v);
                        emit(b, Opcode::Delete);
                    }
                    AstTag::Index => {
                        *pos = peek;
                        self.compile_expr(b, pos)?;
                        self.compile_expr(b, pos)?;
                        emit(b, Opcode::Delete);
                    }
                    AstTag::Ident => {
                        *pos = peek;
                        let name = self.ast.fetch_inline(pos).to_owned();
                        let v = self.engine.intern_literal_string(&name);
                        emit_lit(b, Opcode::DeleteVar, v);
                    }
                    _ => {
                        self.compile_expr(b, pos)?;
                        emit(b, Opcode::Drop);
                        emit(b, Opcode::PushTrue);
                    }
                }
            }

            AstTag::Assign
            | AstTag::RemAssign
            | AstTag::MulAssign
            | AstTag::DivAssign
            | AstTag::XorAssign
            | AstTag::PlusAssign
            | AstTag::MinusAssign
            | AstTag::OrAssign
            | AstTag::AndAssign
            | AstTag::LshiftAssign
            | AstTag::RshiftAssign
            | AstTag::UrshiftAssign
            | AstTag::PreInc
            | AstTag::PreDec
            | AstTag::PostInc
            | AstTag::PostDec => {
                self.compile_assign(b, pos, tag)?;
            }

            AstTag::Member => {
                let name = self.ast.fetch_inline(pos).to_owned();
                let v = self.engine.intern_literal_string(&name);
                self.compile_expr(b, pos)?;
                emit_lit(b, Opcode::PushLit, v);
                emit(b, Opcode::Get);
            }
            AstTag::Index => {
                self.compile_expr(b, pos)?;
                self.compile_expr(b, pos)?;
                emit(b, Opcode::Get);
            }

            AstTag::Call | AstTag::New => {
                let end = self.ast.get_skip(node, skip::END);
                *pos = node + 1 + crate::ast::SKIP_SIZE;
                if tag == AstTag::New {
                    emit(b, Opcode::PushUndefined); // replaced by the fresh object
                    self.compile_expr(b, pos)?;
                } else {
                    self.compile_callee(b, pos)?;
                }
                let mut argc = 0usize;
                while *pos < end {
                    self.compile_expr(b, pos)?;
                    argc += 1;
                }
                if argc > 127 {
                    return Err(self.err("too many arguments in a call"));
                }
                emit(b, if tag == AstTag::New { Opcode::New } else { Opcode::Call });
                b.ops.push(argc as u8);
                *pos = end;
            }

            AstTag::Array => {
                let end = self.ast.get_skip(node, skip::END);
                *pos = node + 1 + crate::ast::SKIP_SIZE;
                emit(b, Opcode::CreateArr);
                let mut index = 0usize;
                let mut trailing_holes = 0usize;
                while *pos < end {
                    let mut peek = *pos;
                    if self.ast.fetch_tag(&mut peek) == AstTag::Nop {
                        self.ast.skip_tree(pos);
                        index += 1;
                        trailing_holes += 1;
                        continue;
                    }
                    trailing_holes = 0;
                    emit(b, Opcode::Dup);
                    emit_lit(b, Opcode::PushLit, Val::number(index as f64));
                    self.compile_expr(b, pos)?;
                    emit(b, Opcode::Set);
                    emit(b, Opcode::Drop);
                    index += 1;
                }
                if trailing_holes > 0 {
                    emit(b, Opcode::Dup);
                    let len_name = self.engine.intern_literal_string("length");
                    emit_lit(b, Opcode::PushLit, len_name);
                    emit_lit(b, Opcode::PushLit, Val::number(index as f64));
                    emit(b, Opcode::Set);
                    emit(b, Opcode::Drop);
                }
                *pos = end;
            }

            AstTag::Object => {
                let end = self.ast.get_skip(node, skip::END);
                *pos = node + 1 + crate::ast::SKIP_SIZE;
                emit(b, Opcode::CreateObj);
                let mut seen: AHashSet<String> = AHashSet::new();
                while *pos < end {
                    let prop_tag = self.ast.fetch_tag(pos);
                    match prop_tag {
                        AstTag::Prop => {
                            let key = self.compile_prop_key(b, pos)?;
                            if self.strict && !seen.insert(key) {
                                return Err(self.err("duplicate property in object literal"));
                            }
                            self.compile_expr(b, pos)?;
                            emit(b, Opcode::Set);
                            emit(b, Opcode::Drop);
                        }
                        AstTag::Getter | AstTag::Setter => {
                            return Err(self.err(
                                "getters and setters are not supported in object literals",
                            ));
                        }
                        _ => return Err(self.err("malformed object literal")),
                    }
                }
                *pos = end;
            }

            AstTag::Func => {
                *pos = node;
                let template = self.compile_function(pos)?;
                emit_lit(b, Opcode::FuncLit, template);
            }

            _ => return Err(self.err("unexpected node in expression position")),
        }
        Ok(())
    }

    /// Emits `Dup` + key push for one object-literal property, returning
    /// the key text for the strict-mode duplicate check.
    fn compile_prop_key(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<String> {
        emit(b, Opcode::Dup);
        let tag = self.ast.fetch_tag(pos);
        let key = match tag {
            AstTag::Ident => self.ast.fetch_inline(pos).to_owned(),
            AstTag::StringLit => {
                let raw = self.ast.fetch_inline(pos).to_owned();
                unescape(&raw).map_err(|msg| self.err(msg))?
            }
            AstTag::Num => {
                let text = self.ast.fetch_inline(pos).to_owned();
                let n = crate::vm::arith::string_to_number(&text);
                crate::stringify::number_to_string(n)
            }
            _ => return Err(self.err("invalid property key")),
        };
        let v = self.engine.intern_literal_string(&key);
        emit_lit(b, Opcode::PushLit, v);
        Ok(key)
    }

    /// Member/index callees keep the base object as `this`.
    fn compile_callee(&mut self, b: &mut Bcode, pos: &mut usize) -> ExecResult<()> {
        let mut peek = *pos;
        match self.ast.fetch_tag(&mut peek) {
            AstTag::Member => {
                *pos = peek;
                let name = self.ast.fetch_inline(pos).to_owned();
                let v = self.engine.intern_literal_string(&name);
                self.compile_expr(b, pos)?; // object (this)
                emit(b, Opcode::Dup);
                emit_lit(b, Opcode::PushLit, v);
                emit(b, Opcode::Get);
            }
            AstTag::Index => {
                *pos = peek;
                self.compile_expr(b, pos)?; // object (this)
                emit(b, Opcode::Dup);
                self.compile_expr(b, pos)?; // key
                emit(b, Opcode::Get);
            }
            _ => {
                emit(b, Opcode::PushUndefined); // this
                self.compile_expr(b, pos)?;
            }
        }
        Ok(())
    }

    /// Assignments, compound assignments, and the four inc/dec forms share
    /// one lvalue dispatch.
    fn compile_assign(&mut self, b: &mut Bcode, pos: &mut usize, tag: AstTag) -> ExecResult<()> {
        let lvalue = *pos;
        let mut peek = *pos;
        let lv_tag = self.ast.fetch_tag(&mut peek);
        match lv_tag {
            AstTag::Ident => {
                *pos = peek;
                let name = self.ast.fetch_inline(pos).to_owned();
                let name_val = self.engine.intern_literal_string(&name);
                match tag {
                    AstTag::Assign => {
                        self.compile_expr(b, pos)?;
                        emit_lit(b, Opcode::SetVar, name_val);
                    }
                    AstTag::PreInc | AstTag::PreDec => {
                        emit_lit(b, Opcode::GetVar, name_val);
                        emit(b, Opcode::Pos);
                        emit(b, Opcode::PushOne);
                        emit(b, incdec_opcode(tag));
                        emit_lit(b, Opcode::SetVar, name_val);
                    }
                    AstTag::PostInc | AstTag::PostDec => {
                        emit_lit(b, Opcode::GetVar, name_val);
                        emit(b, Opcode::Pos);
                        emit(b, Opcode::Dup);
                        emit(b, Opcode::PushOne);
                        emit(b, incdec_opcode(tag));
                        emit_lit(b, Opcode::SetVar, name_val);
                        emit(b, Opcode::Drop);
                    }
                    _ => {
                        emit_lit(b, Opcode::GetVar, name_val);
                        self.compile_expr(b, pos)?;
                        emit(b, compound_opcode(tag));
                        emit_lit(b, Opcode::SetVar, name_val);
                    }
                }
            }
            AstTag::Member | AstTag::Index => {
                *pos = peek;
                // Push object and key.
                if lv_tag == AstTag::Member {
                    let name = self.ast.fetch_inline(pos).to_owned();
                    let name_val = self.engine.intern_literal_string(&name);
                    self.compile_expr(b, pos)?;
                    emit_lit(b, Opcode::PushLit, name_val);
                } else {
                    self.compile_expr(b, pos)?;
                    self.compile_expr(b, pos)?;
                }
                match tag {
                    AstTag::Assign => {
                        self.compile_expr(b, pos)?;
                        emit(b, Opcode::Set);
                    }
                    AstTag::PreInc | AstTag::PreDec => {
                        emit(b, Opcode::TwoDup);
                        emit(b, Opcode::Get);
                        emit(b, Opcode::Pos);
                        emit(b, Opcode::PushOne);
                        emit(b, incdec_opcode(tag));
                        emit(b, Opcode::Set);
                    }
                    AstTag::PostInc | AstTag::PostDec => {
                        emit(b, Opcode::TwoDup);
                        emit(b, Opcode::Get);
                        emit(b, Opcode::Pos);
                        emit(b, Opcode::Dup);
                        emit(b, Opcode::Stash);
                        emit(b, Opcode::PushOne);
                        emit(b, incdec_opcode(tag));
                        emit(b, Opcode::Set);
                        emit(b, Opcode::Drop);
                        emit(b, Opcode::Unstash);
                    }
                    _ => {
                        emit(b, Opcode::TwoDup);
                        emit(b, Opcode::Get);
                        self.compile_expr(b, pos)?;
                        emit(b, compound_opcode(tag));
                        emit(b, Opcode::Set);
                    }
                }
            }
            _ => {
                let _ = lvalue;
                return Err(self.err("invalid assignment target"));
            }
        }
        Ok(())
    }

    /// Compiles a function literal into its own bcode and returns the
    /// template value for the literal table.
    fn compile_function(&mut self, pos: &mut usize) -> ExecResult<Val> {
        let node = *pos;
        let tag = self.ast.fetch_tag(pos);
        if tag != AstTag::Func {
            return Err(self.err("expected a function node"));
        }
        *pos = node + 1 + 3 * crate::ast::SKIP_SIZE;
        let body_start = self.ast.get_skip(node, skip::FUNC_BODY);
        let end = self.ast.get_skip(node, skip::END);

        let mut fb = Bcode::default();

        // Name.
        let mut peek = *pos;
        let name_tag = self.ast.fetch_tag(&mut peek);
        if name_tag == AstTag::Ident {
            *pos = peek;
            let name = self.ast.fetch_inline(pos).to_owned();
            let v = self.engine.intern_literal_string(&name);
            fb.names.push(v);
        } else {
            self.ast.skip_tree(pos);
            let v = self.engine.intern_literal_string("");
            fb.names.push(v);
        }

        // Parameters.
        let mut args = 0u16;
        while *pos < body_start {
            let tag = self.ast.fetch_tag(pos);
            if tag != AstTag::Ident {
                return Err(self.err("malformed parameter list"));
            }
            let name = self.ast.fetch_inline(pos).to_owned();
            let v = self.engine.intern_literal_string(&name);
            fb.names.push(v);
            args += 1;
        }
        if args > 127 {
            return Err(self.err("too many parameters"));
        }
        fb.args = args;
        *pos = body_start;

        // Body, in a nested compiler state.
        let saved = (
            self.strict,
            self.in_function,
            self.discard_depth,
            self.break_depth,
            self.loop_depth,
        );
        self.in_function = true;
        self.discard_depth = 0;
        self.break_depth = 0;
        self.loop_depth = 0;

        let mut probe = *pos;
        if probe < end && self.ast.fetch_tag(&mut probe) == AstTag::UseStrict {
            self.strict = true;
        }
        fb.strict = self.strict;

        emit(&mut fb, Opcode::PushUndefined);
        let result = self
            .hoist(&mut fb, node, skip::FIRST_VAR)
            .and_then(|()| self.compile_stmts_range(&mut fb, pos, end));

        (
            self.strict,
            self.in_function,
            self.discard_depth,
            self.break_depth,
            self.loop_depth,
        ) = saved;
        result?;

        emit(&mut fb, Opcode::PushUndefined);
        emit(&mut fb, Opcode::Ret);

        *pos = end;
        Ok(self.engine.make_func_template(std::rc::Rc::new(fb)))
    }
}

fn binary_opcode(tag: AstTag) -> Opcode {
    match tag {
        AstTag::Or => Opcode::Or,
        AstTag::Xor => Opcode::Xor,
        AstTag::And => Opcode::And,
        AstTag::Eq => Opcode::Eq,
        AstTag::EqEq => Opcode::EqEq,
        AstTag::Ne => Opcode::Ne,
        AstTag::NeNe => Opcode::NeNe,
        AstTag::Le => Opcode::Le,
        AstTag::Lt => Opcode::Lt,
        AstTag::Ge => Opcode::Ge,
        AstTag::Gt => Opcode::Gt,
        AstTag::In => Opcode::In,
        AstTag::Instanceof => Opcode::Instanceof,
        AstTag::Lshift => Opcode::Lshift,
        AstTag::Rshift => Opcode::Rshift,
        AstTag::Urshift => Opcode::Urshift,
        AstTag::Add => Opcode::Add,
        AstTag::Sub => Opcode::Sub,
        AstTag::Rem => Opcode::Rem,
        AstTag::Mul => Opcode::Mul,
        AstTag::Div => Opcode::Div,
        _ => unreachable!("not a binary tag"),
    }
}

fn compound_opcode(tag: AstTag) -> Opcode {
    match tag {
        AstTag::RemAssign => Opcode::Rem,
        AstTag::MulAssign => Opcode::Mul,
        AstTag::DivAssign => Opcode::Div,
        AstTag::XorAssign => Opcode::Xor,
        AstTag::PlusAssign => Opcode::Add,
        AstTag::MinusAssign => Opcode::Sub,
        AstTag::OrAssign => Opcode::Or,
        AstTag::AndAssign => Opcode::And,
        AstTag::LshiftAssign => Opcode::Lshift,
        AstTag::RshiftAssign => Opcode::Rshift,
        AstTag::UrshiftAssign => Opcode::Urshift,
        _ => unreachable!("not a compound-assignment tag"),
    }
}

fn incdec_opcode(tag: AstTag) -> Opcode {
    match tag {
        AstTag::PreInc | AstTag::PostInc => Opcode::Add,
        _ => Opcode::Sub,
    }
}

/// Splits a raw `/pattern/flags` literal.
fn split_regex(raw: &str) -> Option<(&str, &str)> {
    let body = raw.strip_prefix('/')?;
    let slash = body.rfind('/')?;
    Some((&body[..slash], &body[slash + 1..]))
}
