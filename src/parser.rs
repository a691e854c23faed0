// ABOUTME: Recursive-descent parser producing a Program from a token stream

use crate::ast::{
    BinaryOp, DecoratorSpec, Expr, ExprKind, FunctionLit, MatchArm, Param, Pattern, PipeKind, Pos,
    Program, Stmt, StmtKind, TemplateElem, TypeAnn, UnaryOp,
};
use crate::diag::Diagnostic;
use crate::lexer::Lexer;
use crate::token::{TemplatePart, Token, TokenKind};
use std::rc::Rc;

/// Runtime type names recognized as type-tag patterns in `match`.
const TYPE_NAMES: &[&str] = &[
    "Int", "Float", "String", "Bool", "List", "Record", "Function", "Null", "Promise", "Channel",
];

/// Signal that the current statement cannot be parsed further; the statement
/// loop synchronizes and continues so diagnostics arrive in batches.
struct Abort;

type PResult<T> = Result<T, Abort>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diags: Vec<Diagnostic>,
    /// Set while parsing a function's expression body: pipe operators then
    /// terminate the body instead of extending it, so fan-out stages like
    /// `5 \> (x) -> x + 1 \> (x) -> x * 2` stay separate branches.
    no_pipes: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            diags: Vec::new(),
            no_pipes: false,
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn nth_kind(&self, n: usize) -> &TokenKind {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn pos_of(&self, token: &Token) -> Pos {
        Pos::new(token.line, token.column)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error_here(format!("expected {}, found {}", what, self.peek()));
            Err(Abort)
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(String, Pos)> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let tok = self.advance();
                Ok((name, self.pos_of(&tok)))
            }
            _ => {
                self.error_here(format!("expected {}, found {}", what, self.peek()));
                Err(Abort)
            }
        }
    }

    fn error_here(&mut self, message: String) {
        let tok = self.peek();
        self.diags
            .push(Diagnostic::parse(message, tok.line, tok.column));
    }

    fn skip_newlines(&mut self) {
        while matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.advance();
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn parse_program(mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(Abort) => self.synchronize(),
            }
            self.skip_newlines();
        }
        for stmt in &statements {
            check_stmt_placeholders(stmt, &mut self.diags);
        }
        (Program { statements }, self.diags)
    }

    /// Advance to the next statement boundary: past a newline or semicolon,
    /// or up to a token that can begin a statement.
    fn synchronize(&mut self) {
        loop {
            match self.peek().kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Let
                | TokenKind::Maybe
                | TokenKind::If
                | TokenKind::Return
                | TokenKind::Context
                | TokenKind::Provide => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let stmt = self.parse_stmt_inner()?;
        self.expect_stmt_end()?;
        Ok(stmt)
    }

    fn parse_stmt_inner(&mut self) -> PResult<Stmt> {
        let pos = self.pos_of(self.peek());
        match self.peek().kind.clone() {
            TokenKind::Let => {
                self.advance();
                self.parse_binding(false, pos)
            }
            TokenKind::Maybe => {
                self.advance();
                self.parse_binding(true, pos)
            }
            TokenKind::Context => {
                self.advance();
                let (name, _) = self.expect_ident("a context name")?;
                self.expect(&TokenKind::Assign, "`=`")?;
                let default = self.parse_expr()?;
                Ok(Stmt::new(StmtKind::ContextDef { name, default }, pos))
            }
            TokenKind::Provide => {
                self.advance();
                let (name, _) = self.expect_ident("a context name")?;
                let value = self.parse_expr()?;
                let body = if self.check(&TokenKind::LBrace) {
                    self.advance();
                    let stmts = self.parse_block_stmts()?;
                    self.expect(&TokenKind::RBrace, "`}`")?;
                    Some(stmts)
                } else {
                    None
                };
                Ok(Stmt::new(StmtKind::Provide { name, value, body }, pos))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_stmt_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::new(StmtKind::Return(value), pos))
            }
            TokenKind::BackArrow => {
                self.advance();
                let value = if self.at_stmt_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::new(StmtKind::Return(value), pos))
            }
            TokenKind::Use => {
                self.advance();
                let (name, _) = self.expect_ident("a module name")?;
                Ok(Stmt::new(StmtKind::Use(name), pos))
            }
            TokenKind::Ident(name) if matches!(self.nth_kind(1), TokenKind::Assign) => {
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                Ok(Stmt::new(StmtKind::Assign { name, value }, pos))
            }
            _ => {
                let expr = self.parse_expr()?;
                Ok(Stmt::new(StmtKind::Expr(expr), pos))
            }
        }
    }

    fn parse_binding(&mut self, mutable: bool, pos: Pos) -> PResult<Stmt> {
        let (name, _) = self.expect_ident("a binding name")?;
        let type_ann = if self.eat(&TokenKind::DoubleColon) {
            let (ann, _) = self.expect_ident("a type name")?;
            let result = if self.eat(&TokenKind::ColonGt) {
                Some(self.expect_ident("a type name")?.0)
            } else {
                None
            };
            Some(TypeAnn { name: ann, result })
        } else {
            None
        };
        self.expect(&TokenKind::Assign, "`=`")?;
        let value = self.parse_expr()?;
        Ok(Stmt::new(
            StmtKind::Let {
                name,
                mutable,
                type_ann,
                value,
            },
            pos,
        ))
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace
        )
    }

    fn expect_stmt_end(&mut self) -> PResult<()> {
        if self.at_stmt_end() {
            while matches!(
                self.peek().kind,
                TokenKind::Newline | TokenKind::Semicolon
            ) {
                self.advance();
            }
            Ok(())
        } else {
            self.error_here(format!(
                "expected end of statement, found {}",
                self.peek()
            ));
            Err(Abort)
        }
    }

    /// Statements inside `{ ... }`; recovery stays inside the block.
    fn parse_block_stmts(&mut self) -> PResult<Vec<Stmt>> {
        let saved = std::mem::replace(&mut self.no_pipes, false);
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek().kind, TokenKind::RBrace | TokenKind::Eof) {
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(Abort) => self.synchronize(),
            }
            self.skip_newlines();
        }
        self.no_pipes = saved;
        Ok(statements)
    }

    // ------------------------------------------------------------------
    // Expressions, lowest precedence first
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_coalesce()?;
        if self.eat(&TokenKind::Question) {
            self.skip_newlines();
            let then = self.parse_expr()?;
            self.skip_newlines();
            self.expect(&TokenKind::Colon, "`:`")?;
            self.skip_newlines();
            let otherwise = self.parse_expr()?;
            let pos = cond.pos;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                pos,
            ));
        }
        Ok(cond)
    }

    fn parse_coalesce(&mut self) -> PResult<Expr> {
        let mut left = self.parse_logic_or()?;
        while self.check(&TokenKind::Coalesce) {
            let op = self.advance();
            let right = self.parse_logic_or()?;
            left = self.binary(BinaryOp::Coalesce, left, right, &op);
        }
        Ok(left)
    }

    fn parse_logic_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_logic_and()?;
        while self.check(&TokenKind::Or) {
            let op = self.advance();
            let right = self.parse_logic_and()?;
            left = self.binary(BinaryOp::Or, left, right, &op);
        }
        Ok(left)
    }

    fn parse_logic_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let op = self.advance();
            let right = self.parse_equality()?;
            left = self.binary(BinaryOp::And, left, right, &op);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op_kind = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::BangEq => BinaryOp::Ne,
                _ => break,
            };
            let op = self.advance();
            let right = self.parse_comparison()?;
            left = self.binary(op_kind, left, right, &op);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_range()?;
        loop {
            let op_kind = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let op = self.advance();
            let right = self.parse_range()?;
            left = self.binary(op_kind, left, right, &op);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let left = self.parse_additive()?;
        if self.check(&TokenKind::Range) {
            let op = self.advance();
            let right = self.parse_additive()?;
            return Ok(self.binary(BinaryOp::Range, left, right, &op));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op_kind = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Concat => BinaryOp::Concat,
                _ => break,
            };
            let op = self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op_kind, left, right, &op);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_pipes()?;
        loop {
            let op_kind = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                TokenKind::DivInt => BinaryOp::DivInt,
                TokenKind::Mod => BinaryOp::Rem,
                _ => break,
            };
            let op = self.advance();
            let right = self.parse_pipes()?;
            left = self.binary(op_kind, left, right, &op);
        }
        Ok(left)
    }

    /// Pipe chains bind tighter than arithmetic and group left to right. A
    /// chain may continue on the next line when the line starts with a pipe
    /// operator.
    fn parse_pipes(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        if self.no_pipes {
            return Ok(left);
        }
        loop {
            let mut look = self.pos;
            while matches!(self.tokens[look].kind, TokenKind::Newline) {
                look += 1;
            }
            let kind = match self.tokens[look].kind {
                TokenKind::PipeForward => PipeKind::Forward,
                TokenKind::PipeSpread => PipeKind::Spread,
                TokenKind::PipeParallel => PipeKind::Parallel,
                TokenKind::PipeReverse => PipeKind::Reverse,
                TokenKind::PipeCompose => PipeKind::Compose,
                TokenKind::PipeTap => PipeKind::Tap,
                _ => break,
            };
            self.pos = look;
            let op = self.advance();
            self.skip_newlines();
            let right = self.parse_unary()?;
            let pos = self.pos_of(&op);
            left = Expr::new(
                ExprKind::Pipe {
                    kind,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let pos = self.pos_of(self.peek());
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::Await => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Await(Box::new(operand)), pos))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let pos = expr.pos;
                    self.advance();
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    );
                }
                TokenKind::LBracket => {
                    let open = self.advance();
                    let saved = std::mem::replace(&mut self.no_pipes, false);
                    self.skip_newlines();
                    let index = self.parse_expr()?;
                    self.skip_newlines();
                    self.no_pipes = saved;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    let pos = self.pos_of(&open);
                    expr = Expr::new(
                        ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let (name, pos) = self.expect_ident("a member name")?;
                    expr = Expr::new(
                        ExprKind::Member {
                            target: Box::new(expr),
                            name,
                        },
                        pos,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        let saved = std::mem::replace(&mut self.no_pipes, false);
        let mut args = Vec::new();
        self.skip_newlines();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                self.skip_newlines();
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.no_pipes = saved;
        self.expect(&TokenKind::RParen, "`)`")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.pos_of(self.peek());
        match self.peek().kind.clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(value), pos))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Float(value), pos))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(value), pos))
            }
            TokenKind::Template(parts) => {
                self.advance();
                self.parse_template(&parts, pos)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), pos))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, pos))
            }
            TokenKind::Underscore => {
                self.advance();
                Ok(Expr::new(ExprKind::Placeholder, pos))
            }
            TokenKind::Input => {
                self.advance();
                Ok(Expr::new(ExprKind::InputRef, pos))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Ident(name), pos))
            }
            TokenKind::LParen => {
                if self.function_ahead() {
                    self.parse_function(pos)
                } else {
                    self.advance();
                    let saved = std::mem::replace(&mut self.no_pipes, false);
                    self.skip_newlines();
                    let expr = self.parse_expr()?;
                    self.skip_newlines();
                    self.no_pipes = saved;
                    self.expect(&TokenKind::RParen, "`)`")?;
                    Ok(expr)
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let saved = std::mem::replace(&mut self.no_pipes, false);
                let mut items = Vec::new();
                self.skip_newlines();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        self.skip_newlines();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.no_pipes = saved;
                self.expect(&TokenKind::RBracket, "`]`")?;
                Ok(Expr::new(ExprKind::List(items), pos))
            }
            TokenKind::LBrace => self.parse_record_or_block(pos),
            TokenKind::Match => {
                self.advance();
                self.parse_match(pos)
            }
            TokenKind::If => {
                self.advance();
                self.parse_if(pos)
            }
            _ => {
                self.error_here(format!("expected an expression, found {}", self.peek()));
                Err(Abort)
            }
        }
    }

    /// From a `(`, look ahead past the matching `)` for `->` or `:>`.
    fn function_ahead(&self) -> bool {
        let mut i = self.pos + 1;
        let mut depth = 1usize;
        while let Some(token) = self.tokens.get(i) {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        let mut j = i + 1;
                        while matches!(
                            self.tokens.get(j).map(|t| &t.kind),
                            Some(TokenKind::Newline)
                        ) {
                            j += 1;
                        }
                        return matches!(
                            self.tokens.get(j).map(|t| &t.kind),
                            Some(TokenKind::Arrow | TokenKind::ColonGt)
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_function(&mut self, pos: Pos) -> PResult<Expr> {
        self.expect(&TokenKind::LParen, "`(`")?;
        let saved = std::mem::replace(&mut self.no_pipes, false);
        let mut params: Vec<Param> = Vec::new();
        self.skip_newlines();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (name, name_pos) = self.expect_ident("a parameter name")?;
                if params.iter().any(|p| p.name == name) {
                    self.diags.push(Diagnostic::parse(
                        format!("duplicate parameter `{}`", name),
                        name_pos.line,
                        name_pos.column,
                    ));
                }
                let type_ann = if self.eat(&TokenKind::DoubleColon) {
                    Some(self.expect_ident("a type name")?.0)
                } else {
                    None
                };
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    default,
                    type_ann,
                });
                self.skip_newlines();
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.no_pipes = saved;
        self.expect(&TokenKind::RParen, "`)`")?;
        self.skip_newlines();
        let return_ann = if self.eat(&TokenKind::ColonGt) {
            Some(self.expect_ident("a type name")?.0)
        } else {
            None
        };
        self.expect(&TokenKind::Arrow, "`->`")?;
        self.skip_newlines();

        let mut attachments = Vec::new();
        let body = if self.check(&TokenKind::LBrace) {
            let brace = self.advance();
            self.skip_newlines();
            // `@Name` lines at the top of the body attach contexts.
            while self.check(&TokenKind::At) {
                self.advance();
                let (name, _) = self.expect_ident("a context name")?;
                attachments.push(name);
                self.skip_newlines();
            }
            let stmts = self.parse_block_stmts()?;
            self.expect(&TokenKind::RBrace, "`}`")?;
            Expr::new(ExprKind::Block(stmts), self.pos_of(&brace))
        } else {
            let saved = std::mem::replace(&mut self.no_pipes, true);
            let body = self.parse_expr()?;
            self.no_pipes = saved;
            body
        };

        let decorators = self.parse_decorators()?;
        Ok(Expr::new(
            ExprKind::Function(Rc::new(FunctionLit {
                params,
                body,
                decorators,
                attachments,
                return_ann,
            })),
            pos,
        ))
    }

    fn parse_decorators(&mut self) -> PResult<Vec<DecoratorSpec>> {
        let mut decorators = Vec::new();
        while let TokenKind::Decorator(name) = self.peek().kind.clone() {
            let tok = self.advance();
            let pos = self.pos_of(&tok);
            let args = if self.check(&TokenKind::LParen) {
                self.advance();
                self.parse_call_args()?
            } else {
                Vec::new()
            };
            decorators.push(DecoratorSpec { name, args, pos });
        }
        Ok(decorators)
    }

    fn parse_if(&mut self, pos: Pos) -> PResult<Expr> {
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        let then_pos = pos;
        let then_stmts = self.parse_block_stmts()?;
        self.expect(&TokenKind::RBrace, "`}`")?;
        let then = Expr::new(ExprKind::Block(then_stmts), then_pos);

        // `else` may sit on the next line.
        let mut look = self.pos;
        while matches!(self.tokens[look].kind, TokenKind::Newline) {
            look += 1;
        }
        let has_else = matches!(self.tokens[look].kind, TokenKind::Else);
        let otherwise = if has_else {
            self.pos = look;
            self.advance();
            if self.check(&TokenKind::If) {
                let else_pos = self.pos_of(self.peek());
                self.advance();
                self.parse_if(else_pos)?
            } else {
                let brace = self.expect(&TokenKind::LBrace, "`{`")?;
                let stmts = self.parse_block_stmts()?;
                self.expect(&TokenKind::RBrace, "`}`")?;
                Expr::new(ExprKind::Block(stmts), self.pos_of(&brace))
            }
        } else {
            Expr::new(ExprKind::Null, pos)
        };

        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            pos,
        ))
    }

    fn parse_match(&mut self, pos: Pos) -> PResult<Expr> {
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut arms = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek().kind, TokenKind::RBrace | TokenKind::Eof) {
            let arm_pos = self.pos_of(self.peek());
            let pattern = self.parse_pattern()?;
            let guard = if self.eat(&TokenKind::If) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&TokenKind::Arrow, "`->`")?;
            self.skip_newlines();
            let body = self.parse_expr()?;
            arms.push(MatchArm {
                pattern,
                guard,
                body,
                pos: arm_pos,
            });
            self.skip_newlines();
            if self.eat(&TokenKind::Comma) {
                self.skip_newlines();
            }
        }
        self.expect(&TokenKind::RBrace, "`}`")?;
        if arms.is_empty() {
            self.diags.push(Diagnostic::parse(
                "match expression has no arms",
                pos.line,
                pos.column,
            ));
        }
        Ok(Expr::new(
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            pos,
        ))
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        let pos = self.pos_of(self.peek());
        match self.peek().kind.clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Int(value), pos)))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Float(value), pos)))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Str(value), pos)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Bool(true), pos)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Bool(false), pos)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Null, pos)))
            }
            TokenKind::Minus => {
                self.advance();
                match self.peek().kind.clone() {
                    TokenKind::Int(value) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::new(ExprKind::Int(-value), pos)))
                    }
                    TokenKind::Float(value) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::new(ExprKind::Float(-value), pos)))
                    }
                    _ => {
                        self.error_here("expected a number after `-` in pattern".to_string());
                        Err(Abort)
                    }
                }
            }
            TokenKind::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if TYPE_NAMES.contains(&name.as_str()) {
                    Ok(Pattern::TypeTag(name))
                } else {
                    Ok(Pattern::Binder(name))
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                let mut rest = None;
                self.skip_newlines();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        if self.eat(&TokenKind::Range) {
                            let name = match self.peek().kind.clone() {
                                TokenKind::Ident(name) => {
                                    self.advance();
                                    name
                                }
                                _ => "_".to_string(),
                            };
                            rest = Some(name);
                            self.skip_newlines();
                            break;
                        }
                        items.push(self.parse_pattern()?);
                        self.skip_newlines();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.expect(&TokenKind::RBracket, "`]`")?;
                Ok(Pattern::List { items, rest })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                let mut rest = None;
                self.skip_newlines();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        if self.eat(&TokenKind::Range) {
                            let name = match self.peek().kind.clone() {
                                TokenKind::Ident(name) => {
                                    self.advance();
                                    name
                                }
                                _ => "_".to_string(),
                            };
                            rest = Some(name);
                            self.skip_newlines();
                            break;
                        }
                        let (key, _) = self.expect_ident("a field name")?;
                        let sub = if self.eat(&TokenKind::Colon) {
                            Some(self.parse_pattern()?)
                        } else {
                            None
                        };
                        fields.push((key, sub));
                        self.skip_newlines();
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.expect(&TokenKind::RBrace, "`}`")?;
                Ok(Pattern::Record { fields, rest })
            }
            _ => {
                self.error_here(format!("invalid pattern: {}", self.peek()));
                Err(Abort)
            }
        }
    }

    /// `{` starts a record literal when the first entry looks like `key:`;
    /// otherwise it is a block.
    fn parse_record_or_block(&mut self, pos: Pos) -> PResult<Expr> {
        let mut i = self.pos + 1;
        while matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::Newline)
        ) {
            i += 1;
        }
        let first = self.tokens.get(i).map(|t| &t.kind);
        let second = self.tokens.get(i + 1).map(|t| &t.kind);
        let record = match (first, second) {
            (Some(TokenKind::RBrace), _) => true,
            (Some(TokenKind::Ident(_)), Some(TokenKind::Colon)) => true,
            (Some(TokenKind::Str(_)), Some(TokenKind::Colon)) => true,
            _ => false,
        };
        self.advance(); // `{`
        if record {
            let saved = std::mem::replace(&mut self.no_pipes, false);
            let mut entries = Vec::new();
            self.skip_newlines();
            if !self.check(&TokenKind::RBrace) {
                loop {
                    let key = match self.peek().kind.clone() {
                        TokenKind::Ident(name) => {
                            self.advance();
                            name
                        }
                        TokenKind::Str(value) => {
                            self.advance();
                            value
                        }
                        _ => {
                            self.error_here(format!(
                                "expected a record key, found {}",
                                self.peek()
                            ));
                            return Err(Abort);
                        }
                    };
                    self.expect(&TokenKind::Colon, "`:`")?;
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    self.skip_newlines();
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            self.no_pipes = saved;
            self.expect(&TokenKind::RBrace, "`}`")?;
            Ok(Expr::new(ExprKind::Record(entries), pos))
        } else {
            let stmts = self.parse_block_stmts()?;
            self.expect(&TokenKind::RBrace, "`}`")?;
            Ok(Expr::new(ExprKind::Block(stmts), pos))
        }
    }

    fn parse_template(&mut self, parts: &[TemplatePart], pos: Pos) -> PResult<Expr> {
        let mut elems = Vec::new();
        for part in parts {
            match part {
                TemplatePart::Lit(text) => elems.push(TemplateElem::Lit(text.clone())),
                TemplatePart::Interp { src, line, column } => {
                    let (tokens, lex_diags) = Lexer::with_origin(src, *line, *column).run();
                    self.diags.extend(lex_diags);
                    let mut sub = Parser::new(tokens);
                    sub.skip_newlines();
                    let expr = sub.parse_expr();
                    if expr.is_ok() {
                        sub.skip_newlines();
                    }
                    let ok = expr.is_ok() && sub.at_eof();
                    if !ok && expr.is_ok() {
                        sub.error_here(format!(
                            "unexpected {} after interpolated expression",
                            sub.peek()
                        ));
                    }
                    self.diags.append(&mut sub.diags);
                    match expr {
                        Ok(expr) if ok => elems.push(TemplateElem::Expr(expr)),
                        _ => elems.push(TemplateElem::Expr(Expr::new(
                            ExprKind::Null,
                            Pos::new(*line, *column),
                        ))),
                    }
                }
            }
        }
        Ok(Expr::new(ExprKind::Template(elems), pos))
    }

    fn binary(&self, op: BinaryOp, left: Expr, right: Expr, op_token: &Token) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            self.pos_of(op_token),
        )
    }
}

// ----------------------------------------------------------------------
// Placeholder placement check: `_` / `input` may only appear directly in a
// call's argument list.
// ----------------------------------------------------------------------

fn check_stmt_placeholders(stmt: &Stmt, diags: &mut Vec<Diagnostic>) {
    match &stmt.kind {
        StmtKind::Let { value, .. } | StmtKind::Assign { value, .. } => {
            check_expr_placeholders(value, diags)
        }
        StmtKind::Expr(expr) => check_expr_placeholders(expr, diags),
        StmtKind::ContextDef { default, .. } => check_expr_placeholders(default, diags),
        StmtKind::Provide { value, body, .. } => {
            check_expr_placeholders(value, diags);
            if let Some(stmts) = body {
                for stmt in stmts {
                    check_stmt_placeholders(stmt, diags);
                }
            }
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                check_expr_placeholders(value, diags);
            }
        }
        StmtKind::Use(_) => {}
    }
}

fn check_expr_placeholders(expr: &Expr, diags: &mut Vec<Diagnostic>) {
    match &expr.kind {
        ExprKind::Placeholder | ExprKind::InputRef => diags.push(Diagnostic::parse(
            "placeholder is only allowed inside a call's argument list",
            expr.pos.line,
            expr.pos.column,
        )),
        ExprKind::Call { callee, args } => {
            check_expr_placeholders(callee, diags);
            for arg in args {
                // Direct placeholder arguments are the legal position.
                if !matches!(arg.kind, ExprKind::Placeholder | ExprKind::InputRef) {
                    check_expr_placeholders(arg, diags);
                }
            }
        }
        ExprKind::Template(elems) => {
            for elem in elems {
                if let TemplateElem::Expr(e) = elem {
                    check_expr_placeholders(e, diags);
                }
            }
        }
        ExprKind::List(items) => {
            for item in items {
                check_expr_placeholders(item, diags);
            }
        }
        ExprKind::Record(entries) => {
            for (_, value) in entries {
                check_expr_placeholders(value, diags);
            }
        }
        ExprKind::Unary { operand, .. } => check_expr_placeholders(operand, diags),
        ExprKind::Binary { left, right, .. } => {
            check_expr_placeholders(left, diags);
            check_expr_placeholders(right, diags);
        }
        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            check_expr_placeholders(cond, diags);
            check_expr_placeholders(then, diags);
            check_expr_placeholders(otherwise, diags);
        }
        ExprKind::Function(def) => {
            check_expr_placeholders(&def.body, diags);
            for param in &def.params {
                if let Some(default) = &param.default {
                    check_expr_placeholders(default, diags);
                }
            }
            for dec in &def.decorators {
                for arg in &dec.args {
                    check_expr_placeholders(arg, diags);
                }
            }
        }
        ExprKind::Pipe { left, right, .. } => {
            check_expr_placeholders(left, diags);
            check_expr_placeholders(right, diags);
        }
        ExprKind::Index { target, index } => {
            check_expr_placeholders(target, diags);
            check_expr_placeholders(index, diags);
        }
        ExprKind::Member { target, .. } => check_expr_placeholders(target, diags),
        ExprKind::Await(inner) => check_expr_placeholders(inner, diags),
        ExprKind::Block(stmts) => {
            for stmt in stmts {
                check_stmt_placeholders(stmt, diags);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            check_expr_placeholders(scrutinee, diags);
            for arm in arms {
                if let Some(guard) = &arm.guard {
                    check_expr_placeholders(guard, diags);
                }
                check_expr_placeholders(&arm.body, diags);
            }
        }
        _ => {}
    }
}

/// Parse a token stream into a program plus whatever diagnostics accumulated.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<Diagnostic>) {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_ok(source: &str) -> Program {
        let (tokens, lex_diags) = lex(source);
        assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
        let (program, diags) = parse(tokens);
        assert!(diags.is_empty(), "parse errors: {:?}", diags);
        program
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let (tokens, _) = lex(source);
        let (_, diags) = parse(tokens);
        diags
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse_ok("1 + 2 * 3");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_pipe_binds_tighter_than_additive() {
        let program = parse_ok("1 + 2 /> f");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Pipe { .. }));
    }

    #[test]
    fn test_pipe_chain_left_assoc() {
        let program = parse_ok("xs /> f /> g");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Pipe { kind, left, .. } = &expr.kind else {
            panic!("expected pipe");
        };
        assert_eq!(*kind, PipeKind::Forward);
        assert!(matches!(
            left.kind,
            ExprKind::Pipe {
                kind: PipeKind::Forward,
                ..
            }
        ));
    }

    #[test]
    fn test_function_body_stops_at_pipe_operator() {
        let program = parse_ok("5 \\> (x) -> x + 1 \\> (x) -> x * 2 /> (a, b) -> a + b");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        // Outermost: `/>` whose left is the grouped fan-out.
        let ExprKind::Pipe { kind, left, .. } = &expr.kind else {
            panic!("expected pipe");
        };
        assert_eq!(*kind, PipeKind::Forward);
        let ExprKind::Pipe { kind, left, .. } = &left.kind else {
            panic!("expected fan-out spine");
        };
        assert_eq!(*kind, PipeKind::Parallel);
        assert!(matches!(
            left.kind,
            ExprKind::Pipe {
                kind: PipeKind::Parallel,
                ..
            }
        ));
    }

    #[test]
    fn test_function_with_decorators() {
        let program = parse_ok("let f = (x) -> x * 2 #memo #log");
        let StmtKind::Let { value, .. } = &program.statements[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Function(def) = &value.kind else {
            panic!("expected function");
        };
        let names: Vec<_> = def.decorators.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["memo", "log"]);
    }

    #[test]
    fn test_record_vs_block() {
        let program = parse_ok("let r = { a: 1, b: 2 }\nlet v = { 1 + 1 }");
        let StmtKind::Let { value, .. } = &program.statements[0].kind else {
            panic!("expected let");
        };
        assert!(matches!(value.kind, ExprKind::Record(_)));
        let StmtKind::Let { value, .. } = &program.statements[1].kind else {
            panic!("expected let");
        };
        assert!(matches!(value.kind, ExprKind::Block(_)));
    }

    #[test]
    fn test_attachments_parse() {
        let program = parse_ok("let f = () -> {\n  @Logger\n  1\n}");
        let StmtKind::Let { value, .. } = &program.statements[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Function(def) = &value.kind else {
            panic!("expected function");
        };
        assert_eq!(def.attachments, vec!["Logger".to_string()]);
    }

    #[test]
    fn test_match_patterns() {
        parse_ok(
            "match x {\n  0 -> \"zero\",\n  [a, b, ..rest] -> a,\n  { name, age: n } -> name,\n  Int -> \"int\",\n  other if other > 10 -> other,\n  _ -> null\n}",
        );
    }

    #[test]
    fn test_recovery_produces_multiple_diagnostics() {
        let diags = parse_err("let = 1\nlet = 2\n");
        assert!(diags.len() >= 2, "expected two diagnostics, got {:?}", diags);
    }

    #[test]
    fn test_placeholder_outside_call_is_parse_error() {
        let diags = parse_err("let x = _ + 1");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("placeholder"));
    }

    #[test]
    fn test_placeholder_in_call_args_is_fine() {
        parse_ok("5 /> add(_, 3)");
    }

    #[test]
    fn test_provide_with_record_value_and_no_block() {
        let program = parse_ok("provide Logger { log: (m) -> m }");
        let StmtKind::Provide { value, body, .. } = &program.statements[0].kind else {
            panic!("expected provide");
        };
        assert!(matches!(value.kind, ExprKind::Record(_)));
        assert!(body.is_none());
    }

    #[test]
    fn test_provide_with_scope_block() {
        let program = parse_ok("provide Limit 3 { doWork() }");
        let StmtKind::Provide { body, .. } = &program.statements[0].kind else {
            panic!("expected provide");
        };
        assert!(body.is_some());
    }

    #[test]
    fn test_early_return_statement() {
        let program = parse_ok("let f = () -> {\n  <- 42\n  0\n}");
        let StmtKind::Let { value, .. } = &program.statements[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Function(def) = &value.kind else {
            panic!("expected function");
        };
        let ExprKind::Block(stmts) = &def.body.kind else {
            panic!("expected block body");
        };
        assert!(matches!(stmts[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_template_interpolation_parses() {
        let program = parse_ok("`sum: ${1 + 2}`");
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Template(elems) = &expr.kind else {
            panic!("expected template");
        };
        assert_eq!(elems.len(), 2);
        assert!(matches!(&elems[1], TemplateElem::Expr(_)));
    }
}
