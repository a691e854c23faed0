// ABOUTME: Library surface: lex, parse, evaluate, and the run convenience

pub mod ast;
pub mod builtins;
pub mod config;
pub mod context;
pub mod decorators;
pub mod diag;
pub mod env;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod sandbox;
pub mod scheduler;
pub mod token;
pub mod value;

pub use crate::diag::{DiagKind, Diagnostic};

use crate::ast::Program;
use crate::env::Environment;
use crate::eval::Evaluator;
use crate::token::Token;
use std::rc::Rc;

pub use crate::value::Value;

/// Lexical analysis. Always returns a token stream ending in EOF; errors
/// are collected alongside rather than aborting.
pub fn lex(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    lexer::lex(source)
}

/// Parse a token stream. Recovery happens at statement boundaries, so the
/// diagnostics arrive as a batch and the program holds what did parse.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<Diagnostic>) {
    parser::parse(tokens)
}

/// Evaluate a program, optionally against a caller-managed environment.
/// Returns the value of the last expression statement (or null) plus any
/// runtime diagnostic.
pub fn evaluate(program: &Program, env: Option<Rc<Environment>>) -> (Value, Vec<Diagnostic>) {
    let mut ev = match env {
        Some(env) => Evaluator::with_env(env),
        None => Evaluator::new(),
    };
    match ev.eval_program(program) {
        Ok(value) => (value, Vec::new()),
        Err(error) => (Value::Null, vec![error.into_diagnostic((1, 1))]),
    }
}

/// Lex, parse, and evaluate a source text in one call.
pub fn run(source: &str) -> Result<Value, Vec<Diagnostic>> {
    let (tokens, mut diags) = lex(source);
    let (program, parse_diags) = parse(tokens);
    diags.extend(parse_diags);
    if !diags.is_empty() {
        return Err(diags);
    }
    let (value, run_diags) = evaluate(&program, None);
    if run_diags.is_empty() {
        Ok(value)
    } else {
        Err(run_diags)
    }
}
