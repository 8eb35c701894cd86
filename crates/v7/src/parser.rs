//! Recursive-descent parser with an explicit frame stack.
//!
//! The grammar is ordinary recursive descent, but recursion points push
//! `Frame` values onto a parser-owned stack instead of calling back into
//! the host stack, so arbitrarily nested input consumes a bounded amount of
//! machine stack. Each frame carries a small step counter plus the AST
//! positions it needs; the driver loop pops the top frame, advances it one
//! step, and the frame re-pushes itself (and at most a couple of children)
//! while it has work left. Errors unwind the whole stack through `Result`.
//!
//! Binary operators use precedence climbing over a fixed level table.
//! Hoisting threads `var` and function declarations through the
//! `FIRST_VAR`/`NEXT_VAR` skips of the enclosing scope node while parsing,
//! so the compiler never needs a second pass.

use crate::ast::{skip, Ast, AstPos, AstTag, SKIP_SIZE};
use crate::error::{ExecError, ExecResult, SyntaxError};
use crate::lexer::{Lexer, Tok};

/// Binary-operator levels, loosest first. Each row lists contiguous
/// `(start_tok, end_tok, start_tag)` ranges whose token-to-tag mapping is a
/// plain discriminant offset; left-to-right associativity throughout.
static LEVELS: &[&[(Tok, Tok, AstTag)]] = &[
    &[(Tok::LogicalOr, Tok::LogicalOr, AstTag::LogicalOr)],
    &[(Tok::LogicalAnd, Tok::LogicalAnd, AstTag::LogicalAnd)],
    &[(Tok::Or, Tok::Or, AstTag::Or)],
    &[(Tok::Xor, Tok::Xor, AstTag::Xor)],
    &[(Tok::And, Tok::And, AstTag::And)],
    &[(Tok::Eq, Tok::NeNe, AstTag::Eq)],
    &[
        (Tok::Le, Tok::Gt, AstTag::Le),
        (Tok::In, Tok::In, AstTag::In),
        (Tok::Instanceof, Tok::Instanceof, AstTag::Instanceof),
    ],
    &[(Tok::Lshift, Tok::Urshift, AstTag::Lshift)],
    &[(Tok::Plus, Tok::Minus, AstTag::Add)],
    &[(Tok::Rem, Tok::Div, AstTag::Rem)],
];

const MAX_LEVEL: u8 = (LEVELS.len() - 1) as u8;

/// One suspended grammar production.
#[derive(Debug)]
enum Frame {
    Script { node: AstPos },
    Stmt,
    Block { node: AstPos },
    VarDecls { node: AstPos, step: u8, in_stmt: bool },
    If { node: AstPos, step: u8 },
    While { node: AstPos, step: u8 },
    DoWhile { node: AstPos, step: u8 },
    For { mark: AstPos, step: u8, var_node: Option<AstPos> },
    ForInBody { node: AstPos },
    ForBody { node: AstPos },
    Try { node: AstPos, step: u8, has_catch: bool },
    Switch { node: AstPos, step: u8, cur_case: AstPos, has_default: bool },
    CaseBody { node: AstPos },
    With { node: AstPos, step: u8 },
    ExprStmt { step: u8 },
    RetThrowEnd,
    Expr { start: AstPos, step: u8, seq: bool },
    Assign { start: AstPos, step: u8 },
    Ternary { start: AstPos, step: u8 },
    Binary { start: AstPos, level: u8, step: u8 },
    Postfix { start: AstPos, step: u8 },
    CallExpr { start: AstPos, step: u8 },
    NewExpr { node: AstPos, step: u8 },
    MemberExpr { start: AstPos, step: u8 },
    Args { node: AstPos, step: u8 },
    Term { step: u8 },
    ArrayLit { node: AstPos, step: u8 },
    ObjectLit { node: AstPos, step: u8 },
    FuncLit {
        node: AstPos,
        step: u8,
        saved_scope: AstPos,
        saved_last: AstPos,
        require_name: bool,
        accessor: bool,
    },
    FuncDeclEnd { node: AstPos },
    LabelEnd,
}

struct Parser<'s> {
    lex: Lexer<'s>,
    ast: Ast,
    frames: Vec<Frame>,
    max_frames: usize,
    /// Suppresses `in` as a binary operator inside `for (...)` clauses.
    no_in: bool,
    /// Innermost `Script`/`Func` node, root of the hoisting chain.
    cur_scope: AstPos,
    /// Last node of the hoisting chain (== `cur_scope` when empty).
    last_var: AstPos,
}

/// Parses a script into an AST.
pub(crate) fn parse(src: &str, max_frames: usize) -> ExecResult<Ast> {
    let mut p = Parser {
        lex: Lexer::new(src),
        ast: Ast::new(),
        frames: Vec::new(),
        max_frames,
        no_in: false,
        cur_scope: 0,
        last_var: 0,
    };
    p.advance()?;
    let script = p.ast.add_node(AstTag::Script);
    p.cur_scope = script;
    p.last_var = script;
    p.use_strict_prologue()?;
    p.frames.push(Frame::Script { node: script });

    while let Some(frame) = p.frames.pop() {
        if p.frames.len() >= p.max_frames {
            return Err(ExecError::StackOverflow);
        }
        p.step(frame)?;
    }
    if p.ast.has_overflow {
        return Err(ExecError::AstTooLarge);
    }
    Ok(p.ast)
}

impl<'s> Parser<'s> {
    fn syn(&self, msg: &str) -> ExecError {
        ExecError::Syntax(SyntaxError::at(self.lex.src(), self.lex.tok_start, msg))
    }

    fn advance(&mut self) -> ExecResult<()> {
        self.lex
            .next()
            .map_err(|e| ExecError::Syntax(SyntaxError::at(self.lex.src(), e.pos, e.msg)))
    }

    fn tok(&self) -> Tok {
        self.lex.tok
    }

    fn expect(&mut self, tok: Tok, msg: &str) -> ExecResult<()> {
        if self.tok() == tok {
            self.advance()
        } else {
            Err(self.syn(msg))
        }
    }

    /// Statement terminator with automatic semicolon insertion: an explicit
    /// `;`, or a `}`/end-of-input, or a preceding newline.
    fn expect_semicolon(&mut self) -> ExecResult<()> {
        if self.tok() == Tok::Semicolon {
            return self.advance();
        }
        if matches!(self.tok(), Tok::CloseCurly | Tok::EndOfInput) || self.lex.after_newline {
            return Ok(());
        }
        Err(self.syn("expected ';'"))
    }

    fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Links a freshly created `Var`/`FuncDecl` node into the hoisting
    /// chain of the current scope.
    fn chain_link(&mut self, node: AstPos) {
        if self.last_var == self.cur_scope {
            self.ast
                .modify_skip(self.cur_scope, skip::FIRST_VAR, node);
        } else {
            self.ast.modify_skip(self.last_var, skip::NEXT_VAR, node);
        }
        self.last_var = node;
    }

    /// Emits a `UseStrict` node when the scope opens with the directive.
    fn use_strict_prologue(&mut self) -> ExecResult<()> {
        if self.tok() == Tok::StringLiteral && self.lex.string_inner() == "use strict" {
            // Only a bare expression statement counts as the directive.
            let mut probe = self.lex.clone();
            if probe.next().is_err() {
                return Ok(());
            }
            let terminated = matches!(
                probe.tok,
                Tok::Semicolon | Tok::CloseCurly | Tok::EndOfInput
            ) || probe.after_newline;
            if terminated {
                self.advance()?;
                self.ast.add_node(AstTag::UseStrict);
                self.expect_semicolon()?;
            }
        }
        Ok(())
    }

    /// A property-name token after `.` (keywords are allowed).
    fn member_name(&mut self) -> ExecResult<String> {
        if self.tok() == Tok::Identifier || self.tok() >= Tok::Break {
            let name = self.lex.tok_text().to_owned();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.syn("expected a property name"))
        }
    }

    fn step(&mut self, frame: Frame) -> ExecResult<()> {
        match frame {
            Frame::Script { node } => {
                if self.tok() == Tok::EndOfInput {
                    self.ast.set_skip(node, skip::END);
                } else {
                    self.push(Frame::Script { node });
                    self.push(Frame::Stmt);
                }
            }

            Frame::Stmt => self.statement()?,

            Frame::Block { node } => {
                if self.tok() == Tok::CloseCurly {
                    self.advance()?;
                    self.ast.set_skip(node, skip::END);
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in a block"));
                } else {
                    self.push(Frame::Block { node });
                    self.push(Frame::Stmt);
                }
            }

            Frame::VarDecls { node, step, in_stmt } => self.var_decls(node, step, in_stmt)?,

            Frame::If { node, step } => match step {
                0 => {
                    // condition parsed
                    self.expect(Tok::CloseParen, "expected ')'")?;
                    self.push(Frame::If { node, step: 1 });
                    self.push(Frame::Stmt);
                }
                1 => {
                    self.ast.set_skip(node, skip::END_IF_TRUE);
                    if self.tok() == Tok::Else {
                        self.advance()?;
                        self.push(Frame::If { node, step: 2 });
                        self.push(Frame::Stmt);
                    } else {
                        self.ast.set_skip(node, skip::END);
                    }
                }
                _ => self.ast.set_skip(node, skip::END),
            },

            Frame::While { node, step } => match step {
                0 => {
                    self.expect(Tok::CloseParen, "expected ')'")?;
                    self.push(Frame::While { node, step: 1 });
                    self.push(Frame::Stmt);
                }
                _ => self.ast.set_skip(node, skip::END),
            },

            Frame::DoWhile { node, step } => match step {
                0 => {
                    // body parsed
                    self.expect(Tok::While, "expected 'while'")?;
                    self.expect(Tok::OpenParen, "expected '('")?;
                    self.ast.set_skip(node, skip::DO_WHILE_COND);
                    self.push(Frame::DoWhile { node, step: 1 });
                    self.push_expression();
                }
                _ => {
                    self.expect(Tok::CloseParen, "expected ')'")?;
                    self.expect_semicolon()?;
                    self.ast.set_skip(node, skip::END);
                }
            },

            Frame::For { mark, step, var_node } => self.for_clauses(mark, step, var_node)?,

            Frame::ForBody { node } => {
                self.ast.set_skip(node, skip::END);
            }

            Frame::ForInBody { node } => {
                self.ast.set_skip(node, skip::END);
            }

            Frame::Try { node, step, has_catch } => self.try_clauses(node, step, has_catch)?,

            Frame::Switch {
                node,
                step,
                cur_case,
                has_default,
            } => self.switch_clauses(node, step, cur_case, has_default)?,

            Frame::CaseBody { node } => {
                if matches!(self.tok(), Tok::Case | Tok::Default | Tok::CloseCurly) {
                    self.ast.set_skip(node, skip::END);
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in a switch"));
                } else {
                    self.push(Frame::CaseBody { node });
                    self.push(Frame::Stmt);
                }
            }

            Frame::With { node, step } => match step {
                0 => {
                    self.expect(Tok::CloseParen, "expected ')'")?;
                    self.push(Frame::With { node, step: 1 });
                    self.push(Frame::Stmt);
                }
                _ => self.ast.set_skip(node, skip::END),
            },

            Frame::ExprStmt { step } => match step {
                0 => {
                    self.push(Frame::ExprStmt { step: 1 });
                    self.push_expression();
                }
                _ => self.expect_semicolon()?,
            },

            Frame::RetThrowEnd => self.expect_semicolon()?,

            Frame::Expr { start, step, seq } => match step {
                0 => {
                    self.push(Frame::Expr {
                        start,
                        step: 1,
                        seq,
                    });
                    self.push(Frame::Assign {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
                _ => {
                    if self.tok() == Tok::Comma {
                        self.advance()?;
                        let seq = if seq {
                            true
                        } else {
                            self.ast.insert_node(start, AstTag::Seq);
                            true
                        };
                        self.push(Frame::Expr {
                            start,
                            step: 1,
                            seq,
                        });
                        self.push(Frame::Assign {
                            start: self.ast.len(),
                            step: 0,
                        });
                    } else if seq {
                        self.ast.set_skip(start, skip::END);
                    }
                }
            },

            Frame::Assign { start, step } => match step {
                0 => {
                    self.push(Frame::Assign { start, step: 1 });
                    self.push(Frame::Ternary {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
                _ => {
                    if let Some(tag) = assign_tag(self.tok()) {
                        if !is_lvalue_tag(self.ast_tag_at(start)) {
                            return Err(self.syn("invalid assignment target"));
                        }
                        self.ast.insert_node(start, tag);
                        self.advance()?;
                        // right-associative
                        self.push(Frame::Assign {
                            start: self.ast.len(),
                            step: 0,
                        });
                    }
                }
            },

            Frame::Ternary { start, step } => match step {
                0 => {
                    self.push(Frame::Ternary { start, step: 1 });
                    self.push(Frame::Binary {
                        start: self.ast.len(),
                        level: 0,
                        step: 0,
                    });
                }
                1 => {
                    if self.tok() == Tok::Question {
                        self.advance()?;
                        self.ast.insert_node(start, AstTag::Cond);
                        self.push(Frame::Ternary { start, step: 2 });
                        self.push(Frame::Assign {
                            start: self.ast.len(),
                            step: 0,
                        });
                    }
                }
                _ => {
                    self.expect(Tok::Colon, "expected ':'")?;
                    self.push(Frame::Assign {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
            },

            Frame::Binary { start, level, step } => match step {
                0 => {
                    self.push(Frame::Binary {
                        start,
                        level,
                        step: 1,
                    });
                    self.push_tighter(level)?;
                }
                _ => {
                    if let Some(tag) = self.level_tag(level) {
                        self.ast.insert_node(start, tag);
                        self.advance()?;
                        self.push(Frame::Binary {
                            start,
                            level,
                            step: 1,
                        });
                        self.push_tighter(level)?;
                    }
                }
            },

            Frame::Postfix { start, step } => match step {
                0 => {
                    self.push(Frame::Postfix { start, step: 1 });
                    self.push(Frame::CallExpr {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
                _ => {
                    if matches!(self.tok(), Tok::PlusPlus | Tok::MinusMinus)
                        && !self.lex.after_newline
                    {
                        let tag = if self.tok() == Tok::PlusPlus {
                            AstTag::PostInc
                        } else {
                            AstTag::PostDec
                        };
                        self.ast.insert_node(start, tag);
                        self.advance()?;
                    }
                }
            },

            Frame::CallExpr { start, step } => self.call_expr(start, step)?,
            Frame::NewExpr { node, step } => self.new_expr(node, step)?,
            Frame::MemberExpr { start, step } => self.member_expr(start, step)?,
            Frame::Args { node, step } => self.args(node, step)?,
            Frame::Term { step } => self.terminal(step)?,
            Frame::ArrayLit { node, step } => self.array_lit(node, step)?,
            Frame::ObjectLit { node, step } => self.object_lit(node, step)?,
            Frame::FuncLit {
                node,
                step,
                saved_scope,
                saved_last,
                require_name,
                accessor,
            } => self.func_lit(node, step, saved_scope, saved_last, require_name, accessor)?,

            Frame::FuncDeclEnd { node } => {
                self.ast.set_skip(node, skip::END);
            }
            Frame::LabelEnd => {}
        }
        Ok(())
    }

    /// Tag of the node at `pos` (used to validate lvalues).
    fn ast_tag_at(&self, pos: AstPos) -> AstTag {
        let mut p = pos;
        self.ast.fetch_tag(&mut p)
    }

    fn push_expression(&mut self) {
        self.push(Frame::Expr {
            start: self.ast.len(),
            step: 0,
            seq: false,
        });
    }

    /// Pushes the next-tighter binding level, or the prefix parser.
    fn push_tighter(&mut self, level: u8) -> ExecResult<()> {
        if level >= MAX_LEVEL {
            self.push_prefix()
        } else {
            self.push(Frame::Binary {
                start: self.ast.len(),
                level: level + 1,
                step: 0,
            });
            Ok(())
        }
    }

    /// Consumes any run of prefix operators inline, then parses a postfix
    /// expression. Prefix nodes precede their operand in the buffer, so
    /// they can be emitted eagerly.
    fn push_prefix(&mut self) -> ExecResult<()> {
        loop {
            let tag = match self.tok() {
                Tok::Not => AstTag::LogicalNot,
                Tok::Tilde => AstTag::Not,
                Tok::Plus => AstTag::Positive,
                Tok::Minus => AstTag::Negative,
                Tok::PlusPlus => AstTag::PreInc,
                Tok::MinusMinus => AstTag::PreDec,
                Tok::Typeof => AstTag::Typeof,
                Tok::Void => AstTag::Void,
                Tok::Delete => AstTag::Delete,
                _ => break,
            };
            self.ast.add_node(tag);
            self.advance()?;
        }
        self.push(Frame::Postfix {
            start: self.ast.len(),
            step: 0,
        });
        Ok(())
    }

    fn level_tag(&self, level: u8) -> Option<AstTag> {
        let tok = self.tok();
        for &(start, end, tag) in LEVELS[level as usize] {
            if tok >= start && tok <= end {
                if tok == Tok::In && self.no_in {
                    return None;
                }
                let offset = tok as u8 - start as u8;
                return AstTag::from_repr(tag as u8 + offset);
            }
        }
        None
    }

    /// Statement dispatch.
    fn statement(&mut self) -> ExecResult<()> {
        match self.tok() {
            Tok::Semicolon => {
                self.advance()?;
                self.ast.add_node(AstTag::Nop);
            }
            Tok::OpenCurly => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::Block);
                self.push(Frame::Block { node });
            }
            Tok::Var => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::Var);
                self.chain_link(node);
                self.push(Frame::VarDecls {
                    node,
                    step: 0,
                    in_stmt: true,
                });
            }
            Tok::If => {
                self.advance()?;
                self.expect(Tok::OpenParen, "expected '('")?;
                let node = self.ast.add_node(AstTag::If);
                self.push(Frame::If { node, step: 0 });
                self.push_expression();
            }
            Tok::While => {
                self.advance()?;
                self.expect(Tok::OpenParen, "expected '('")?;
                let node = self.ast.add_node(AstTag::While);
                self.push(Frame::While { node, step: 0 });
                self.push_expression();
            }
            Tok::Do => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::DoWhile);
                self.push(Frame::DoWhile { node, step: 0 });
                self.push(Frame::Stmt);
            }
            Tok::For => {
                self.advance()?;
                self.expect(Tok::OpenParen, "expected '('")?;
                let mark = self.ast.len();
                self.push(Frame::For {
                    mark,
                    step: 0,
                    var_node: None,
                });
            }
            Tok::Try => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::Try);
                self.expect(Tok::OpenCurly, "expected '{'")?;
                self.push(Frame::Try {
                    node,
                    step: 0,
                    has_catch: false,
                });
            }
            Tok::Switch => {
                self.advance()?;
                self.expect(Tok::OpenParen, "expected '('")?;
                let node = self.ast.add_node(AstTag::Switch);
                self.push(Frame::Switch {
                    node,
                    step: 0,
                    cur_case: 0,
                    has_default: false,
                });
                self.push_expression();
            }
            Tok::With => {
                self.advance()?;
                self.expect(Tok::OpenParen, "expected '('")?;
                let node = self.ast.add_node(AstTag::With);
                self.push(Frame::With { node, step: 0 });
                self.push_expression();
            }
            Tok::Return => {
                self.advance()?;
                if matches!(self.tok(), Tok::Semicolon | Tok::CloseCurly | Tok::EndOfInput)
                    || self.lex.after_newline
                {
                    self.ast.add_node(AstTag::Return);
                    self.expect_semicolon()?;
                } else {
                    self.ast.add_node(AstTag::ValueReturn);
                    self.push(Frame::RetThrowEnd);
                    self.push_expression();
                }
            }
            Tok::Throw => {
                self.advance()?;
                if self.lex.after_newline {
                    return Err(self.syn("illegal newline after throw"));
                }
                self.ast.add_node(AstTag::Throw);
                self.push(Frame::RetThrowEnd);
                self.push_expression();
            }
            Tok::Break | Tok::Continue => {
                let is_break = self.tok() == Tok::Break;
                self.advance()?;
                if self.tok() == Tok::Identifier && !self.lex.after_newline {
                    let label = self.lex.tok_text().to_owned();
                    self.advance()?;
                    let tag = if is_break {
                        AstTag::LabeledBreak
                    } else {
                        AstTag::LabeledContinue
                    };
                    self.ast.add_inlined_node(tag, &label);
                } else {
                    self.ast.add_node(if is_break {
                        AstTag::Break
                    } else {
                        AstTag::Continue
                    });
                }
                self.expect_semicolon()?;
            }
            Tok::Debugger => {
                self.advance()?;
                self.ast.add_node(AstTag::Debugger);
                self.expect_semicolon()?;
            }
            Tok::Function => {
                let decl = self.ast.add_node(AstTag::FuncDecl);
                self.chain_link(decl);
                let node = self.ast.add_node(AstTag::Func);
                self.advance()?;
                self.push(Frame::FuncDeclEnd { node: decl });
                self.push_func_lit(node, true, false);
            }
            Tok::Identifier => {
                // Lookahead for a label.
                let mut probe = self.lex.clone();
                let is_label = probe.next().is_ok() && probe.tok == Tok::Colon;
                if is_label {
                    let name = self.lex.tok_text().to_owned();
                    self.advance()?; // identifier
                    self.advance()?; // colon
                    self.ast.add_inlined_node(AstTag::Label, &name);
                    self.push(Frame::LabelEnd);
                    self.push(Frame::Stmt);
                } else {
                    self.push(Frame::ExprStmt { step: 0 });
                }
            }
            Tok::EndOfInput => return Err(self.syn("unexpected end of input")),
            _ => {
                self.push(Frame::ExprStmt { step: 0 });
            }
        }
        Ok(())
    }

    fn push_func_lit(&mut self, node: AstPos, require_name: bool, accessor: bool) {
        let saved_scope = self.cur_scope;
        let saved_last = self.last_var;
        self.push(Frame::FuncLit {
            node,
            step: 0,
            saved_scope,
            saved_last,
            require_name,
            accessor,
        });
    }

    /// `var` declaration list. Step 0 expects a name, step 1 runs after an
    /// initializer expression.
    fn var_decls(&mut self, node: AstPos, step: u8, in_stmt: bool) -> ExecResult<()> {
        if step == 0 {
            if self.tok() != Tok::Identifier {
                return Err(self.syn("expected a variable name"));
            }
            let name = self.lex.tok_text().to_owned();
            self.advance()?;
            self.ast.add_inlined_node(AstTag::VarDecl, &name);
            if self.tok() == Tok::Assign {
                self.advance()?;
                self.push(Frame::VarDecls {
                    node,
                    step: 1,
                    in_stmt,
                });
                self.push(Frame::Assign {
                    start: self.ast.len(),
                    step: 0,
                });
                return Ok(());
            }
            self.ast.add_node(AstTag::Nop);
        }
        // After a declaration (with or without initializer).
        if self.tok() == Tok::Comma {
            self.advance()?;
            self.push(Frame::VarDecls {
                node,
                step: 0,
                in_stmt,
            });
            return Ok(());
        }
        if in_stmt {
            self.expect_semicolon()?;
        }
        self.ast.set_skip(node, skip::END);
        Ok(())
    }

    /// `for (...)` clause parsing; distinguishes classic and for-in forms.
    ///
    /// The loop node is *inserted* at `mark` only once the form is known,
    /// so a `var` node parsed for the init clause joins the hoisting chain
    /// after the insertion shifted it.
    fn for_clauses(&mut self, mark: AstPos, step: u8, var_node: Option<AstPos>) -> ExecResult<()> {
        match step {
            0 => {
                match self.tok() {
                    Tok::Semicolon => {
                        self.ast.add_node(AstTag::Nop); // no init
                        self.push(Frame::For {
                            mark,
                            step: 2,
                            var_node: None,
                        });
                    }
                    Tok::Var => {
                        self.advance()?;
                        let node = self.ast.add_node(AstTag::Var);
                        self.no_in = true;
                        self.push(Frame::For {
                            mark,
                            step: 1,
                            var_node: Some(node),
                        });
                        self.push(Frame::VarDecls {
                            node,
                            step: 0,
                            in_stmt: false,
                        });
                    }
                    _ => {
                        self.no_in = true;
                        self.push(Frame::For {
                            mark,
                            step: 1,
                            var_node: None,
                        });
                        self.push_expression();
                    }
                }
                Ok(())
            }
            1 => {
                // Init clause parsed; `in` decides the form.
                self.no_in = false;
                if self.tok() == Tok::In {
                    self.advance()?;
                    let node = self.ast.insert_node(mark, AstTag::ForIn);
                    let shift = 1 + SKIP_SIZE;
                    if let Some(v) = var_node {
                        self.chain_link(v + shift);
                    } else if !is_lvalue_tag(self.ast_tag_at(mark + shift)) {
                        return Err(self.syn("invalid for-in loop variable"));
                    }
                    self.push(Frame::For {
                        mark: node,
                        step: 5,
                        var_node: None,
                    });
                    self.push_expression();
                    Ok(())
                } else {
                    // Chain-linking waits for step 4: inserting the For
                    // node at `mark` will shift the var node.
                    self.expect(Tok::Semicolon, "expected ';'")?;
                    self.push(Frame::For {
                        mark,
                        step: 3,
                        var_node,
                    });
                    if self.tok() == Tok::Semicolon {
                        self.ast.add_node(AstTag::Nop);
                        Ok(())
                    } else {
                        self.push_expression();
                        Ok(())
                    }
                }
            }
            2 => {
                // `for (;` — consume the first semicolon, parse condition.
                self.expect(Tok::Semicolon, "expected ';'")?;
                self.push(Frame::For {
                    mark,
                    step: 3,
                    var_node: None,
                });
                if self.tok() == Tok::Semicolon {
                    self.ast.add_node(AstTag::Nop);
                } else {
                    self.push_expression();
                }
                Ok(())
            }
            3 => {
                // Condition parsed; parse the iteration clause.
                self.expect(Tok::Semicolon, "expected ';'")?;
                self.push(Frame::For {
                    mark,
                    step: 4,
                    var_node,
                });
                if self.tok() == Tok::CloseParen {
                    self.ast.add_node(AstTag::Nop);
                } else {
                    self.push_expression();
                }
                Ok(())
            }
            4 => {
                // Classic for: insert the node, set FOR_BODY, parse body.
                self.expect(Tok::CloseParen, "expected ')'")?;
                let node = self.ast.insert_node(mark, AstTag::For);
                if let Some(v) = var_node {
                    self.chain_link(v + 1 + 2 * SKIP_SIZE);
                }
                self.ast.set_skip(node, skip::FOR_BODY);
                self.push(Frame::ForBody { node });
                self.push(Frame::Stmt);
                Ok(())
            }
            _ => {
                // for-in: object expression parsed.
                self.expect(Tok::CloseParen, "expected ')'")?;
                self.push(Frame::ForInBody { node: mark });
                self.push(Frame::Stmt);
                Ok(())
            }
        }
    }

    fn try_clauses(&mut self, node: AstPos, step: u8, has_catch: bool) -> ExecResult<()> {
        match step {
            0 => {
                if self.tok() == Tok::CloseCurly {
                    self.advance()?;
                    self.ast.set_skip(node, skip::TRY_CATCH);
                    let has_catch = if self.tok() == Tok::Catch {
                        self.advance()?;
                        self.expect(Tok::OpenParen, "expected '('")?;
                        if self.tok() != Tok::Identifier {
                            return Err(self.syn("expected an identifier"));
                        }
                        let name = self.lex.tok_text().to_owned();
                        self.advance()?;
                        self.expect(Tok::CloseParen, "expected ')'")?;
                        self.expect(Tok::OpenCurly, "expected '{'")?;
                        self.ast.add_inlined_node(AstTag::Ident, &name);
                        true
                    } else {
                        false
                    };
                    self.push(Frame::Try {
                        node,
                        step: if has_catch { 1 } else { 2 },
                        has_catch,
                    });
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in try"));
                } else {
                    self.push(Frame::Try {
                        node,
                        step: 0,
                        has_catch,
                    });
                    self.push(Frame::Stmt);
                }
            }
            1 => {
                // Catch body statements.
                if self.tok() == Tok::CloseCurly {
                    self.advance()?;
                    self.push(Frame::Try {
                        node,
                        step: 2,
                        has_catch,
                    });
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in catch"));
                } else {
                    self.push(Frame::Try {
                        node,
                        step: 1,
                        has_catch,
                    });
                    self.push(Frame::Stmt);
                }
            }
            2 => {
                self.ast.set_skip(node, skip::TRY_FINALLY);
                if self.tok() == Tok::Finally {
                    self.advance()?;
                    self.expect(Tok::OpenCurly, "expected '{'")?;
                    self.push(Frame::Try {
                        node,
                        step: 3,
                        has_catch,
                    });
                } else {
                    if !has_catch {
                        return Err(self.syn("missing catch or finally after try"));
                    }
                    self.ast.set_skip(node, skip::END);
                }
            }
            _ => {
                // Finally body statements.
                if self.tok() == Tok::CloseCurly {
                    self.advance()?;
                    self.ast.set_skip(node, skip::END);
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in finally"));
                } else {
                    self.push(Frame::Try {
                        node,
                        step: 3,
                        has_catch,
                    });
                    self.push(Frame::Stmt);
                }
            }
        }
        Ok(())
    }

    fn switch_clauses(
        &mut self,
        node: AstPos,
        step: u8,
        cur_case: AstPos,
        has_default: bool,
    ) -> ExecResult<()> {
        match step {
            0 => {
                self.expect(Tok::CloseParen, "expected ')'")?;
                self.expect(Tok::OpenCurly, "expected '{'")?;
                self.push(Frame::Switch {
                    node,
                    step: 1,
                    cur_case,
                    has_default,
                });
            }
            1 => match self.tok() {
                Tok::CloseCurly => {
                    self.advance()?;
                    if !has_default {
                        self.ast.set_skip(node, skip::SWITCH_DEFAULT);
                    }
                    self.ast.set_skip(node, skip::END);
                }
                Tok::Case => {
                    self.advance()?;
                    let case_node = self.ast.add_node(AstTag::Case);
                    self.push(Frame::Switch {
                        node,
                        step: 2,
                        cur_case: case_node,
                        has_default,
                    });
                    self.push_expression();
                }
                Tok::Default => {
                    self.advance()?;
                    self.expect(Tok::Colon, "expected ':'")?;
                    self.ast.modify_skip(node, skip::SWITCH_DEFAULT, self.ast.len());
                    let default_node = self.ast.add_node(AstTag::Default);
                    self.push(Frame::Switch {
                        node,
                        step: 1,
                        cur_case,
                        has_default: true,
                    });
                    self.push(Frame::CaseBody { node: default_node });
                }
                _ => return Err(self.syn("expected 'case', 'default', or '}'")),
            },
            _ => {
                // Case test expression parsed.
                self.expect(Tok::Colon, "expected ':'")?;
                self.push(Frame::Switch {
                    node,
                    step: 1,
                    cur_case: 0,
                    has_default,
                });
                self.push(Frame::CaseBody { node: cur_case });
            }
        }
        Ok(())
    }

    fn call_expr(&mut self, start: AstPos, step: u8) -> ExecResult<()> {
        match step {
            0 => {
                self.push(Frame::CallExpr { start, step: 1 });
                if self.tok() == Tok::New {
                    self.advance()?;
                    let node = self.ast.add_node(AstTag::New);
                    self.push(Frame::NewExpr { node, step: 0 });
                } else {
                    self.push(Frame::MemberExpr {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
            }
            1 => match self.tok() {
                Tok::OpenParen => {
                    self.advance()?;
                    let node = self.ast.insert_node(start, AstTag::Call);
                    self.push(Frame::CallExpr { start, step: 1 });
                    self.push(Frame::Args { node, step: 0 });
                }
                Tok::Dot => {
                    self.advance()?;
                    let name = self.member_name()?;
                    self.ast.insert_inlined_node(start, AstTag::Member, &name);
                    self.push(Frame::CallExpr { start, step: 1 });
                }
                Tok::OpenBracket => {
                    self.advance()?;
                    self.ast.insert_node(start, AstTag::Index);
                    self.push(Frame::CallExpr { start, step: 2 });
                    self.push_expression();
                }
                _ => {}
            },
            _ => {
                self.expect(Tok::CloseBracket, "expected ']'")?;
                self.push(Frame::CallExpr { start, step: 1 });
            }
        }
        Ok(())
    }

    fn new_expr(&mut self, node: AstPos, step: u8) -> ExecResult<()> {
        match step {
            0 => {
                self.push(Frame::NewExpr { node, step: 1 });
                self.push(Frame::MemberExpr {
                    start: self.ast.len(),
                    step: 0,
                });
            }
            1 => {
                if self.tok() == Tok::OpenParen {
                    self.advance()?;
                    self.push(Frame::Args { node, step: 0 });
                } else {
                    self.ast.set_skip(node, skip::END);
                }
            }
            _ => unreachable!("new-expression has two steps"),
        }
        Ok(())
    }

    fn member_expr(&mut self, start: AstPos, step: u8) -> ExecResult<()> {
        match step {
            0 => {
                self.push(Frame::MemberExpr { start, step: 1 });
                if self.tok() == Tok::New {
                    self.advance()?;
                    let node = self.ast.add_node(AstTag::New);
                    self.push(Frame::NewExpr { node, step: 0 });
                } else {
                    self.push(Frame::Term { step: 0 });
                }
            }
            1 => match self.tok() {
                Tok::Dot => {
                    self.advance()?;
                    let name = self.member_name()?;
                    self.ast.insert_inlined_node(start, AstTag::Member, &name);
                    self.push(Frame::MemberExpr { start, step: 1 });
                }
                Tok::OpenBracket => {
                    self.advance()?;
                    self.ast.insert_node(start, AstTag::Index);
                    self.push(Frame::MemberExpr { start, step: 2 });
                    self.push_expression();
                }
                _ => {}
            },
            _ => {
                self.expect(Tok::CloseBracket, "expected ']'")?;
                self.push(Frame::MemberExpr { start, step: 1 });
            }
        }
        Ok(())
    }

    fn args(&mut self, node: AstPos, step: u8) -> ExecResult<()> {
        if step == 0 {
            if self.tok() == Tok::CloseParen {
                self.advance()?;
                self.ast.set_skip(node, skip::END);
                return Ok(());
            }
            self.push(Frame::Args { node, step: 1 });
            self.push(Frame::Assign {
                start: self.ast.len(),
                step: 0,
            });
            return Ok(());
        }
        match self.tok() {
            Tok::Comma => {
                self.advance()?;
                self.push(Frame::Args { node, step: 1 });
                self.push(Frame::Assign {
                    start: self.ast.len(),
                    step: 0,
                });
            }
            Tok::CloseParen => {
                self.advance()?;
                self.ast.set_skip(node, skip::END);
            }
            _ => return Err(self.syn("expected ',' or ')'")),
        }
        Ok(())
    }

    fn terminal(&mut self, step: u8) -> ExecResult<()> {
        if step == 1 {
            return self.expect(Tok::CloseParen, "expected ')'");
        }
        match self.tok() {
            Tok::Number => {
                self.ast.add_inlined_node(AstTag::Num, self.lex.tok_text());
                self.advance()?;
            }
            Tok::StringLiteral => {
                self.ast
                    .add_inlined_node(AstTag::StringLit, self.lex.string_inner());
                self.advance()?;
            }
            Tok::RegexLiteral => {
                self.ast.add_inlined_node(AstTag::Regex, self.lex.tok_text());
                self.advance()?;
            }
            Tok::Identifier => {
                self.ast.add_inlined_node(AstTag::Ident, self.lex.tok_text());
                self.advance()?;
            }
            Tok::This => {
                self.ast.add_node(AstTag::This);
                self.advance()?;
            }
            Tok::True => {
                self.ast.add_node(AstTag::True);
                self.advance()?;
            }
            Tok::False => {
                self.ast.add_node(AstTag::False);
                self.advance()?;
            }
            Tok::Null => {
                self.ast.add_node(AstTag::Null);
                self.advance()?;
            }
            Tok::OpenParen => {
                self.advance()?;
                self.push(Frame::Term { step: 1 });
                self.push_expression();
            }
            Tok::OpenBracket => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::Array);
                self.push(Frame::ArrayLit { node, step: 0 });
            }
            Tok::OpenCurly => {
                self.advance()?;
                let node = self.ast.add_node(AstTag::Object);
                self.push(Frame::ObjectLit { node, step: 0 });
            }
            Tok::Function => {
                let node = self.ast.add_node(AstTag::Func);
                self.advance()?;
                self.push_func_lit(node, false, false);
            }
            _ => return Err(self.syn("unexpected token")),
        }
        Ok(())
    }

    fn array_lit(&mut self, node: AstPos, step: u8) -> ExecResult<()> {
        if step == 0 {
            // Element position.
            match self.tok() {
                Tok::CloseBracket => {
                    self.advance()?;
                    self.ast.set_skip(node, skip::END);
                }
                Tok::Comma => {
                    self.advance()?;
                    self.ast.add_node(AstTag::Nop); // hole
                    self.push(Frame::ArrayLit { node, step: 0 });
                }
                _ => {
                    self.push(Frame::ArrayLit { node, step: 1 });
                    self.push(Frame::Assign {
                        start: self.ast.len(),
                        step: 0,
                    });
                }
            }
            return Ok(());
        }
        // After an element.
        match self.tok() {
            Tok::Comma => {
                self.advance()?;
                self.push(Frame::ArrayLit { node, step: 0 });
            }
            Tok::CloseBracket => {
                self.advance()?;
                self.ast.set_skip(node, skip::END);
            }
            _ => return Err(self.syn("expected ',' or ']'")),
        }
        Ok(())
    }

    fn object_lit(&mut self, node: AstPos, step: u8) -> ExecResult<()> {
        if step == 1 {
            // After a property value or accessor.
            match self.tok() {
                Tok::Comma => {
                    self.advance()?;
                    self.push(Frame::ObjectLit { node, step: 0 });
                }
                Tok::CloseCurly => {
                    self.advance()?;
                    self.ast.set_skip(node, skip::END);
                }
                _ => return Err(self.syn("expected ',' or '}'")),
            }
            return Ok(());
        }

        if self.tok() == Tok::CloseCurly {
            self.advance()?;
            self.ast.set_skip(node, skip::END);
            return Ok(());
        }

        // Accessor form: `get name() {...}` / `set name(v) {...}`.
        if self.tok() == Tok::Identifier && matches!(self.lex.tok_text(), "get" | "set") {
            let mut probe = self.lex.clone();
            let is_accessor = probe.next().is_ok()
                && !matches!(probe.tok, Tok::Colon | Tok::Comma | Tok::CloseCurly);
            if is_accessor {
                let tag = if self.lex.tok_text() == "get" {
                    AstTag::Getter
                } else {
                    AstTag::Setter
                };
                self.advance()?;
                self.ast.add_node(tag);
                let func = self.ast.add_node(AstTag::Func);
                self.push(Frame::ObjectLit { node, step: 1 });
                self.push_func_lit(func, true, true);
                return Ok(());
            }
        }

        // Plain property: key ':' value.
        self.ast.add_node(AstTag::Prop);
        match self.tok() {
            Tok::Identifier => {
                self.ast.add_inlined_node(AstTag::Ident, self.lex.tok_text());
            }
            Tok::StringLiteral => {
                self.ast
                    .add_inlined_node(AstTag::StringLit, self.lex.string_inner());
            }
            Tok::Number => {
                self.ast.add_inlined_node(AstTag::Num, self.lex.tok_text());
            }
            t if t >= Tok::Break => {
                // Reserved words are valid property keys.
                self.ast.add_inlined_node(AstTag::Ident, self.lex.tok_text());
            }
            _ => return Err(self.syn("expected a property name")),
        }
        self.advance()?;
        self.expect(Tok::Colon, "expected ':'")?;
        self.push(Frame::ObjectLit { node, step: 1 });
        self.push(Frame::Assign {
            start: self.ast.len(),
            step: 0,
        });
        Ok(())
    }

    fn func_lit(
        &mut self,
        node: AstPos,
        step: u8,
        saved_scope: AstPos,
        saved_last: AstPos,
        require_name: bool,
        accessor: bool,
    ) -> ExecResult<()> {
        match step {
            0 => {
                // Name.
                if self.tok() == Tok::Identifier {
                    self.ast.add_inlined_node(AstTag::Ident, self.lex.tok_text());
                    self.advance()?;
                } else if require_name || accessor {
                    return Err(self.syn("expected a function name"));
                } else {
                    self.ast.add_node(AstTag::Nop);
                }
                // Parameters.
                self.expect(Tok::OpenParen, "expected '('")?;
                while self.tok() != Tok::CloseParen {
                    if self.tok() != Tok::Identifier {
                        return Err(self.syn("expected a parameter name"));
                    }
                    self.ast.add_inlined_node(AstTag::Ident, self.lex.tok_text());
                    self.advance()?;
                    if self.tok() == Tok::Comma {
                        self.advance()?;
                    } else if self.tok() != Tok::CloseParen {
                        return Err(self.syn("expected ',' or ')'"));
                    }
                }
                self.advance()?; // ')'
                self.ast.set_skip(node, skip::FUNC_BODY);
                self.expect(Tok::OpenCurly, "expected '{'")?;
                self.cur_scope = node;
                self.last_var = node;
                self.use_strict_prologue()?;
                self.push(Frame::FuncLit {
                    node,
                    step: 1,
                    saved_scope,
                    saved_last,
                    require_name,
                    accessor,
                });
            }
            _ => {
                if self.tok() == Tok::CloseCurly {
                    self.advance()?;
                    self.ast.set_skip(node, skip::END);
                    self.cur_scope = saved_scope;
                    self.last_var = saved_last;
                } else if self.tok() == Tok::EndOfInput {
                    return Err(self.syn("unexpected end of input in a function body"));
                } else {
                    self.push(Frame::FuncLit {
                        node,
                        step: 1,
                        saved_scope,
                        saved_last,
                        require_name,
                        accessor,
                    });
                    self.push(Frame::Stmt);
                }
            }
        }
        Ok(())
    }
}

fn assign_tag(tok: Tok) -> Option<AstTag> {
    match tok {
        Tok::Assign => Some(AstTag::Assign),
        t if t >= Tok::RemAssign && t <= Tok::UrshiftAssign => {
            AstTag::from_repr(AstTag::RemAssign as u8 + (t as u8 - Tok::RemAssign as u8))
        }
        _ => None,
    }
}

fn is_lvalue_tag(tag: AstTag) -> bool {
    matches!(tag, AstTag::Ident | AstTag::Member | AstTag::Index)
}
