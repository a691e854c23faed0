// ABOUTME: Tree-walking evaluator: statements, expressions, pipes, and calls

use crate::ast::{
    BinaryOp, Expr, ExprKind, MatchArm, Pattern, PipeKind, Pos, Program, Stmt, StmtKind,
    TemplateElem, UnaryOp,
};
use crate::builtins::{register_builtins, BuiltinDef};
use crate::context::ContextRegistry;
use crate::decorators;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::sandbox::Sandbox;
use crate::scheduler::{Promise, Scheduler};
use crate::value::{compare_values, values_equal, Closure, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

const MAX_CALL_DEPTH: usize = 500;
const MAX_RANGE_LEN: i64 = 10_000_000;

/// The tree-walking evaluator. Owns the context registry, the cooperative
/// scheduler, and the global environment; the REPL keeps one alive across
/// inputs.
pub struct Evaluator {
    pub globals: Rc<Environment>,
    pub contexts: ContextRegistry,
    pub scheduler: Scheduler,
    pub sandbox: Option<Sandbox>,
    /// Indentation level for `#trace` output.
    pub trace_depth: usize,
    /// Non-zero while inside a `#pure` call; effectful built-ins warn.
    pub pure_depth: usize,
    /// Worker bound installed by `#parallel`; `map` consults it.
    pub parallel_limit: Option<usize>,
    depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        let root = Environment::new();
        register_builtins(&root);
        Evaluator {
            globals: Environment::with_parent(root),
            contexts: ContextRegistry::new(),
            scheduler: Scheduler::new(),
            sandbox: None,
            trace_depth: 0,
            pure_depth: 0,
            parallel_limit: None,
            depth: 0,
        }
    }

    /// Evaluate against a caller-supplied environment. Built-ins are bound
    /// directly into it so the program can reach the library.
    pub fn with_env(env: Rc<Environment>) -> Self {
        register_builtins(&env);
        let mut ev = Evaluator::new();
        ev.globals = env;
        ev
    }

    /// Run a whole program. Produces the value of the last expression
    /// statement, then drains any fire-and-forget work left in the queue.
    pub fn eval_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let globals = self.globals.clone();
        let value = self.eval_stmts(&program.statements, &globals)?;
        self.drain_background();
        Ok(value)
    }

    /// Statement list sharing one frame. Context values provided without a
    /// block stay pushed for the remainder of the list and are popped on
    /// every exit path.
    fn eval_stmts(
        &mut self,
        stmts: &[Stmt],
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        let mut provided: Vec<String> = Vec::new();
        let mut last = Value::Null;
        let mut failure = None;
        for stmt in stmts {
            match self.eval_stmt(stmt, env, &mut provided) {
                Ok(Some(value)) => last = value,
                Ok(None) => {}
                Err(error) => {
                    failure = Some(error.at(stmt.pos.line, stmt.pos.column));
                    break;
                }
            }
        }
        for name in provided.iter().rev() {
            self.contexts.pop(name);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(last),
        }
    }

    fn eval_stmt(
        &mut self,
        stmt: &Stmt,
        env: &Rc<Environment>,
        provided: &mut Vec<String>,
    ) -> Result<Option<Value>, RuntimeError> {
        match &stmt.kind {
            StmtKind::Let {
                name,
                mutable,
                type_ann: _,
                value,
            } => {
                let value = self.eval_expr(value, env)?;
                name_function(&value, name);
                env.define(name, value, *mutable, stmt.pos.line, stmt.pos.column)?;
                Ok(None)
            }
            StmtKind::Assign { name, value } => {
                let value = self.eval_expr(value, env)?;
                env.assign(name, value, stmt.pos.line, stmt.pos.column)?;
                Ok(None)
            }
            StmtKind::Expr(expr) => Ok(Some(self.eval_expr(expr, env)?)),
            StmtKind::ContextDef { name, default } => {
                let default = self.eval_expr(default, env)?;
                self.contexts.define(name, default);
                Ok(None)
            }
            StmtKind::Provide { name, value, body } => {
                let value = self.eval_expr(value, env)?;
                self.contexts
                    .push(name, value, stmt.pos.line, stmt.pos.column)?;
                match body {
                    Some(stmts) => {
                        let frame = Environment::with_parent(env.clone());
                        let result = self.eval_stmts(stmts, &frame);
                        self.contexts.pop(name);
                        result?;
                    }
                    None => provided.push(name.clone()),
                }
                Ok(None)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Err(RuntimeError::EarlyReturn(value))
            }
            StmtKind::Use(_) => Ok(None),
        }
    }

    pub fn eval_expr(&mut self, expr: &Expr, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(n) => Ok(Value::Float(*n)),
            ExprKind::Str(s) => Ok(Value::String(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Template(elems) => {
                let mut out = String::new();
                for elem in elems {
                    match elem {
                        TemplateElem::Lit(text) => out.push_str(text),
                        TemplateElem::Expr(inner) => {
                            let value = self.eval_expr(inner, env)?;
                            out.push_str(&value.display_raw());
                        }
                    }
                }
                Ok(Value::String(out))
            }
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::List(values))
            }
            ExprKind::Record(entries) => {
                let mut record = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    record.insert(key.clone(), self.eval_expr(value, env)?);
                }
                Ok(Value::Record(record))
            }
            ExprKind::Ident(name) => self.lookup(name, expr.pos, env),
            ExprKind::Placeholder | ExprKind::InputRef => {
                Err(RuntimeError::PlaceholderOutsidePipe {
                    line: expr.pos.line,
                    column: expr.pos.column,
                })
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand, env)?;
                match op {
                    UnaryOp::Neg => match value {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(n) => Ok(Value::Float(-n)),
                        other => Err(RuntimeError::type_error("a number", &other)
                            .at(expr.pos.line, expr.pos.column)),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                }
            }
            ExprKind::Await(inner) => {
                let value = self.eval_expr(inner, env)?;
                self.force(value)
            }
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, expr.pos, env),
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(cond, env)?.truthy() {
                    self.eval_expr(then, env)
                } else {
                    self.eval_expr(otherwise, env)
                }
            }
            ExprKind::Function(def) => {
                let mut value = Value::Function(Rc::new(Closure {
                    def: def.clone(),
                    env: env.clone(),
                    name: RefCell::new(None),
                }));
                // First declared decorator becomes the innermost wrapper.
                for spec in &def.decorators {
                    let mut dec_args = Vec::with_capacity(spec.args.len());
                    for arg in &spec.args {
                        dec_args.push(self.eval_expr(arg, env)?);
                    }
                    value = decorators::make(&spec.name, dec_args, value, spec.pos)?;
                }
                Ok(value)
            }
            ExprKind::Call { callee, args } => {
                let callee_value = self.eval_expr(callee, env)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    if matches!(arg.kind, ExprKind::Placeholder | ExprKind::InputRef) {
                        return Err(RuntimeError::PlaceholderOutsidePipe {
                            line: arg.pos.line,
                            column: arg.pos.column,
                        });
                    }
                    arg_values.push(self.eval_expr(arg, env)?);
                }
                self.call_value(callee_value, arg_values, expr.pos)
            }
            ExprKind::Pipe { kind, left, right } => {
                self.eval_pipe(*kind, left, right, expr.pos, env)
            }
            ExprKind::Index { target, index } => {
                let target = self.eval_expr(target, env)?;
                let index = self.eval_expr(index, env)?;
                self.eval_index(target, index, expr.pos)
            }
            ExprKind::Member { target, name } => {
                let target = self.eval_expr(target, env)?;
                match target {
                    Value::Record(entries) => {
                        Ok(entries.get(name).cloned().unwrap_or(Value::Null))
                    }
                    other => Err(RuntimeError::type_error("Record", &other)
                        .at(expr.pos.line, expr.pos.column)),
                }
            }
            ExprKind::Block(stmts) => {
                let frame = Environment::with_parent(env.clone());
                self.eval_stmts(stmts, &frame)
            }
            ExprKind::Match { scrutinee, arms } => self.eval_match(scrutinee, arms, expr.pos, env),
        }
    }

    /// Identifier resolution: lexical environment, then the context registry
    /// (provided value or declared default).
    fn lookup(&self, name: &str, pos: Pos, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.contexts.current(name) {
            return Ok(value);
        }
        Err(RuntimeError::Undefined {
            name: name.to_string(),
            line: pos.line,
            column: pos.column,
        })
    }

    // ------------------------------------------------------------------
    // Binary operators
    // ------------------------------------------------------------------

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        pos: Pos,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        // Short-circuit forms first.
        match op {
            BinaryOp::And => {
                let l = self.eval_expr(left, env)?;
                return if l.truthy() { self.eval_expr(right, env) } else { Ok(l) };
            }
            BinaryOp::Or => {
                let l = self.eval_expr(left, env)?;
                return if l.truthy() { Ok(l) } else { self.eval_expr(right, env) };
            }
            BinaryOp::Coalesce => {
                let l = self.eval_expr(left, env)?;
                return if matches!(l, Value::Null) {
                    self.eval_expr(right, env)
                } else {
                    Ok(l)
                };
            }
            _ => {}
        }

        let l = self.eval_expr(left, env)?;
        let r = self.eval_expr(right, env)?;
        apply_binary(op, l, r, pos)
    }

    fn eval_index(&mut self, target: Value, index: Value, pos: Pos) -> Result<Value, RuntimeError> {
        match (&target, &index) {
            (Value::List(items), Value::Int(i)) => {
                let i = *i;
                if i < 0 || i as usize >= items.len() {
                    return Err(RuntimeError::BadIndex {
                        target: "List".to_string(),
                        index: i,
                        len: items.len(),
                        line: pos.line,
                        column: pos.column,
                    });
                }
                Ok(items[i as usize].clone())
            }
            (Value::String(s), Value::Int(i)) => {
                let i = *i;
                let chars: Vec<char> = s.chars().collect();
                if i < 0 || i as usize >= chars.len() {
                    return Err(RuntimeError::BadIndex {
                        target: "String".to_string(),
                        index: i,
                        len: chars.len(),
                        line: pos.line,
                        column: pos.column,
                    });
                }
                Ok(Value::String(chars[i as usize].to_string()))
            }
            (Value::Record(entries), Value::String(key)) => {
                Ok(entries.get(key).cloned().unwrap_or(Value::Null))
            }
            _ => Err(RuntimeError::TypeMismatch {
                expected: "an indexable value and a matching index".to_string(),
                actual: format!("{}[{}]", target.type_name(), index.type_name()),
                line: pos.line,
                column: pos.column,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Pattern matching
    // ------------------------------------------------------------------

    fn eval_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
        pos: Pos,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        let value = self.eval_expr(scrutinee, env)?;
        for arm in arms {
            let frame = Environment::with_parent(env.clone());
            if !match_pattern(&arm.pattern, &value, &frame) {
                continue;
            }
            if let Some(guard) = &arm.guard {
                if !self.eval_expr(guard, &frame)?.truthy() {
                    continue;
                }
            }
            return self.eval_expr(&arm.body, &frame);
        }
        Err(RuntimeError::NoMatch {
            value: value.to_string(),
            line: pos.line,
            column: pos.column,
        })
    }

    // ------------------------------------------------------------------
    // Pipe dispatch
    // ------------------------------------------------------------------

    fn eval_pipe(
        &mut self,
        kind: PipeKind,
        left: &Expr,
        right: &Expr,
        pos: Pos,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        match kind {
            PipeKind::Forward => {
                // A fan-out group on the left destructures into positional
                // arguments for the right-hand function.
                if let ExprKind::Pipe {
                    kind: PipeKind::Parallel,
                    ..
                } = left.kind
                {
                    let values = self.eval_fanout(left, env)?;
                    self.apply_piped(right, values, env)
                } else {
                    let value = self.eval_expr(left, env)?;
                    let value = self.force(value)?;
                    self.apply_piped(right, vec![value], env)
                }
            }
            PipeKind::Spread => {
                let value = self.eval_expr(left, env)?;
                let value = self.force(value)?;
                let items = match value {
                    Value::List(items) => items,
                    other => {
                        return Err(RuntimeError::TypeMismatch {
                            expected: "List on the left of `/>>>`".to_string(),
                            actual: other.type_name().to_string(),
                            line: pos.line,
                            column: pos.column,
                        })
                    }
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.apply_piped(right, vec![item], env)?);
                }
                Ok(Value::List(out))
            }
            PipeKind::Parallel => {
                // Standalone fan-out group (not followed by `/>`).
                let values = self.eval_fanout_parts(left, right, env)?;
                Ok(Value::List(values))
            }
            PipeKind::Reverse => {
                let value = self.eval_expr(right, env)?;
                let value = self.force(value)?;
                self.apply_piped(left, vec![value], env)
            }
            PipeKind::Compose => {
                let lf = self.eval_expr(left, env)?;
                let rf = self.eval_expr(right, env)?;
                for f in [&lf, &rf] {
                    if !f.is_callable() {
                        return Err(RuntimeError::NotCallable {
                            actual: f.type_name().to_string(),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                }
                let mut stages = Vec::new();
                flatten_pipeline(lf, &mut stages);
                flatten_pipeline(rf, &mut stages);
                Ok(Value::Pipeline(Rc::new(stages)))
            }
            PipeKind::Tap => {
                let value = self.eval_expr(left, env)?;
                let value = self.force(value)?;
                self.apply_piped(right, vec![value.clone()], env)?;
                Ok(value)
            }
        }
    }

    /// Evaluate a whole `\>` spine (node known to be Parallel).
    fn eval_fanout(
        &mut self,
        node: &Expr,
        env: &Rc<Environment>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let ExprKind::Pipe { left, right, .. } = &node.kind else {
            unreachable!("eval_fanout on a non-pipe node");
        };
        self.eval_fanout_parts(left, right, env)
    }

    /// Collect consecutive `\>` stages into one group, launch each branch as
    /// a task against the shared input, and gather results in syntactic
    /// order.
    fn eval_fanout_parts(
        &mut self,
        left: &Expr,
        right: &Expr,
        env: &Rc<Environment>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut branches = vec![right];
        let mut input = left;
        while let ExprKind::Pipe {
            kind: PipeKind::Parallel,
            left,
            right,
        } = &input.kind
        {
            branches.push(right);
            input = left;
        }
        branches.reverse();

        let input_value = self.eval_expr(input, env)?;
        let input_value = self.force(input_value)?;

        let mut promises = Vec::with_capacity(branches.len());
        for branch in &branches {
            let callee = self.eval_expr(branch, env)?;
            if !callee.is_callable() {
                return Err(RuntimeError::NotCallable {
                    actual: callee.type_name().to_string(),
                    line: branch.pos.line,
                    column: branch.pos.column,
                });
            }
            promises.push(self.scheduler.spawn(callee, vec![input_value.clone()]));
        }
        let group = self.scheduler.gather(promises);
        match self.drive(&group)? {
            Value::List(values) => Ok(values),
            other => Ok(vec![other]),
        }
    }

    /// Apply the right-hand side of a pipe to the piped value(s): a call
    /// expression substitutes placeholders (or receives the values
    /// prepended); anything else must evaluate to a callable.
    fn apply_piped(
        &mut self,
        right: &Expr,
        values: Vec<Value>,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        match &right.kind {
            ExprKind::Call { callee, args } => {
                let callee_value = self.eval_expr(callee, env)?;
                let placeholders = args
                    .iter()
                    .filter(|a| matches!(a.kind, ExprKind::Placeholder | ExprKind::InputRef))
                    .count();
                let mut call_args = Vec::with_capacity(args.len() + values.len());
                if placeholders > 0 {
                    if placeholders != values.len() {
                        return Err(RuntimeError::message(
                            format!(
                                "pipe supplies {} value{} but the call has {} placeholder{}",
                                values.len(),
                                if values.len() == 1 { "" } else { "s" },
                                placeholders,
                                if placeholders == 1 { "" } else { "s" },
                            ),
                            right.pos.line,
                            right.pos.column,
                        ));
                    }
                    let mut supplied = values.into_iter();
                    for arg in args {
                        if matches!(arg.kind, ExprKind::Placeholder | ExprKind::InputRef) {
                            call_args.push(supplied.next().expect("placeholder count checked"));
                        } else {
                            call_args.push(self.eval_expr(arg, env)?);
                        }
                    }
                } else {
                    call_args.extend(values);
                    for arg in args {
                        call_args.push(self.eval_expr(arg, env)?);
                    }
                }
                self.call_value(callee_value, call_args, right.pos)
            }
            _ => {
                let callee = self.eval_expr(right, env)?;
                if callee.is_callable() {
                    self.call_value(callee, values, right.pos)
                } else {
                    Err(RuntimeError::NotCallable {
                        actual: callee.type_name().to_string(),
                        line: right.pos.line,
                        column: right.pos.column,
                    })
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        pos: Pos,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(closure) => self.call_closure(&closure, args, pos),
            Value::Builtin(def) => self.call_builtin(def, args, pos),
            Value::Decorated(dec) => decorators::call(self, &dec, args, pos),
            Value::Pipeline(stages) => {
                let mut iter = stages.iter();
                let Some(first) = iter.next() else {
                    return Ok(Value::Null);
                };
                let mut value = self.call_value(first.clone(), args, pos)?;
                for stage in iter {
                    value = self.force(value)?;
                    value = self.call_value(stage.clone(), vec![value], pos)?;
                }
                Ok(value)
            }
            other => Err(RuntimeError::NotCallable {
                actual: other.type_name().to_string(),
                line: pos.line,
                column: pos.column,
            }),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        pos: Pos,
    ) -> Result<Value, RuntimeError> {
        let def = &closure.def;
        if args.len() > def.params.len() {
            return Err(RuntimeError::ArityMismatch {
                callee: closure.display_name(),
                expected: def.params.len().to_string(),
                actual: args.len(),
                line: pos.line,
                column: pos.column,
            });
        }

        self.depth += 1;
        if self.depth > MAX_CALL_DEPTH {
            self.depth -= 1;
            return Err(RuntimeError::message(
                "maximum call depth exceeded",
                pos.line,
                pos.column,
            ));
        }

        let result = (|| {
            let frame = Environment::with_parent(closure.env.clone());
            for (i, param) in def.params.iter().enumerate() {
                let value = if i < args.len() {
                    args[i].clone()
                } else if let Some(default) = &param.default {
                    self.eval_expr(default, &frame)?
                } else {
                    return Err(RuntimeError::ArityMismatch {
                        callee: closure.display_name(),
                        expected: def.params.len().to_string(),
                        actual: args.len(),
                        line: pos.line,
                        column: pos.column,
                    });
                };
                frame.bind(&param.name, value);
            }
            // Attachment injection: the current context value becomes a
            // local binding on every invocation.
            for name in &def.attachments {
                let value =
                    self.contexts
                        .current(name)
                        .ok_or_else(|| RuntimeError::UnknownContext {
                            name: name.clone(),
                            line: pos.line,
                            column: pos.column,
                        })?;
                frame.bind(name, value);
            }
            self.eval_expr(&def.body, &frame)
        })();
        self.depth -= 1;

        match result {
            Err(RuntimeError::EarlyReturn(value)) => Ok(value),
            other => other,
        }
    }

    fn call_builtin(
        &mut self,
        def: &'static BuiltinDef,
        args: Vec<Value>,
        pos: Pos,
    ) -> Result<Value, RuntimeError> {
        if !def.arity.check(args.len()) {
            return Err(RuntimeError::ArityMismatch {
                callee: def.name.to_string(),
                expected: def.arity.describe(),
                actual: args.len(),
                line: pos.line,
                column: pos.column,
            });
        }
        if self.pure_depth > 0 && def.effect {
            log::warn!(
                "function marked #pure called effectful built-in `{}`",
                def.name
            );
        }
        (def.func)(self, &args).map_err(|e| e.at(pos.line, pos.column))
    }

    // ------------------------------------------------------------------
    // Cooperative scheduling
    // ------------------------------------------------------------------

    /// Implicit/explicit await: drive the scheduler until the promise
    /// settles. Non-promises pass through unchanged.
    pub fn force(&mut self, value: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Promise(promise) => self.drive(&promise),
            other => Ok(other),
        }
    }

    /// Block the current task on a promise, running queued work until it
    /// settles. Rejection surfaces as a runtime error carrying the cause.
    pub fn drive(&mut self, promise: &Promise) -> Result<Value, RuntimeError> {
        loop {
            if let Some(result) = promise.result() {
                return result.map_err(|cause| RuntimeError::Rejected {
                    cause: Box::new(cause),
                });
            }
            if !self.run_turn() {
                return Err(RuntimeError::Deadlock);
            }
        }
    }

    /// One scheduler turn: propagate settlements, else run a task, else fire
    /// timers, else sleep until the nearest deadline. Returns false when no
    /// progress is possible.
    pub fn run_turn(&mut self) -> bool {
        if self.scheduler.propagate() {
            return true;
        }
        if let Some(task) = self.scheduler.next_task() {
            let result = self.call_value(task.func, task.args, Pos::default());
            match result {
                // A task resolving to a promise chains into it rather than
                // resolving with the promise itself.
                Ok(Value::Promise(inner)) => self.scheduler.chain_into(inner, task.done),
                other => task.done.settle(other),
            }
            return true;
        }
        if self.scheduler.fire_due_timers() {
            return true;
        }
        if let Some(deadline) = self.scheduler.next_deadline() {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            return true;
        }
        false
    }

    /// Run queued fire-and-forget tasks after the program's last statement.
    /// Pending far-future timers are abandoned rather than slept on.
    fn drain_background(&mut self) {
        loop {
            if self.scheduler.propagate() {
                continue;
            }
            if let Some(task) = self.scheduler.next_task() {
                let result = self.call_value(task.func, task.args, Pos::default());
                match result {
                    Ok(Value::Promise(inner)) => self.scheduler.chain_into(inner, task.done),
                    Err(error) => {
                        log::warn!("background task failed: {}", error);
                        task.done.reject(error);
                    }
                    Ok(value) => task.done.resolve(value),
                }
                continue;
            }
            if self.scheduler.fire_due_timers() {
                continue;
            }
            break;
        }
    }
}

/// Give a function its binding name for logs; decorated chains name the
/// innermost closure.
fn name_function(value: &Value, name: &str) {
    match value {
        Value::Function(closure) => {
            let mut slot = closure.name.borrow_mut();
            if slot.is_none() {
                *slot = Some(name.to_string());
            }
        }
        Value::Decorated(dec) => name_function(&dec.inner, name),
        _ => {}
    }
}

fn flatten_pipeline(value: Value, stages: &mut Vec<Value>) {
    match value {
        Value::Pipeline(inner) => stages.extend(inner.iter().cloned()),
        other => stages.push(other),
    }
}

/// Non-short-circuiting binary operators on already-evaluated operands.
pub fn apply_binary(
    op: BinaryOp,
    l: Value,
    r: Value,
    pos: Pos,
) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Add => numeric(l, r, pos, i64::checked_add, |a, b| a + b),
        BinaryOp::Sub => numeric(l, r, pos, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => numeric(l, r, pos, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            let (a, b) = both_numbers(&l, &r, pos)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero {
                    line: pos.line,
                    column: pos.column,
                });
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::DivInt => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(RuntimeError::DivisionByZero {
                        line: pos.line,
                        column: pos.column,
                    })
                } else {
                    Ok(Value::Int(a.div_euclid(*b)))
                }
            }
            _ => Err(RuntimeError::TypeMismatch {
                expected: "two Ints for `divInt`".to_string(),
                actual: format!("{} and {}", l.type_name(), r.type_name()),
                line: pos.line,
                column: pos.column,
            }),
        },
        BinaryOp::Rem => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(RuntimeError::DivisionByZero {
                        line: pos.line,
                        column: pos.column,
                    })
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            _ => {
                let (a, b) = both_numbers(&l, &r, pos)?;
                if b == 0.0 {
                    Err(RuntimeError::DivisionByZero {
                        line: pos.line,
                        column: pos.column,
                    })
                } else {
                    Ok(Value::Float(a % b))
                }
            }
        },
        BinaryOp::Concat => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (l, r) => Err(RuntimeError::TypeMismatch {
                expected: "two Strings or two Lists for `++`".to_string(),
                actual: format!("{} and {}", l.type_name(), r.type_name()),
                line: pos.line,
                column: pos.column,
            }),
        },
        BinaryOp::Range => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => {
                if b.checked_sub(*a).is_none_or(|d| d > MAX_RANGE_LEN) {
                    return Err(RuntimeError::message(
                        format!("range {}..{} is too large", a, b),
                        pos.line,
                        pos.column,
                    ));
                }
                Ok(Value::List((*a..*b).map(Value::Int).collect()))
            }
            _ => Err(RuntimeError::TypeMismatch {
                expected: "two Ints for `..`".to_string(),
                actual: format!("{} and {}", l.type_name(), r.type_name()),
                line: pos.line,
                column: pos.column,
            }),
        },
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let ordering =
                compare_values(&l, &r).map_err(|e| e.at(pos.line, pos.column))?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => {
            unreachable!("short-circuit operators are handled before evaluation")
        }
    }
}

/// Arithmetic with numeric promotion: Int op Int stays Int, anything with a
/// Float becomes Float.
fn numeric(
    l: Value,
    r: Value,
    pos: Pos,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or_else(|| {
            RuntimeError::message("integer overflow", pos.line, pos.column)
        }),
        _ => {
            let (a, b) = both_numbers(&l, &r, pos)?;
            Ok(Value::Float(float_op(a, b)))
        }
    }
}

fn both_numbers(l: &Value, r: &Value, pos: Pos) -> Result<(f64, f64), RuntimeError> {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(RuntimeError::type_error("a number", l).at(pos.line, pos.column)),
        (_, None) => Err(RuntimeError::type_error("a number", r).at(pos.line, pos.column)),
    }
}

/// Try to bind `value` against `pattern` in `frame`. Returns whether the
/// pattern matched; bindings from partial matches are discarded with the
/// frame by the caller.
fn match_pattern(pattern: &Pattern, value: &Value, frame: &Rc<Environment>) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Binder(name) => {
            frame.bind(name, value.clone());
            true
        }
        Pattern::TypeTag(name) => value.type_name() == name,
        Pattern::Literal(expr) => match literal_value(expr) {
            Some(lit) => values_equal(&lit, value),
            None => false,
        },
        Pattern::List { items, rest } => {
            let Value::List(values) = value else {
                return false;
            };
            match rest {
                Some(rest_name) => {
                    if values.len() < items.len() {
                        return false;
                    }
                    for (pat, val) in items.iter().zip(values) {
                        if !match_pattern(pat, val, frame) {
                            return false;
                        }
                    }
                    if rest_name != "_" {
                        frame.bind(rest_name, Value::List(values[items.len()..].to_vec()));
                    }
                    true
                }
                None => {
                    if values.len() != items.len() {
                        return false;
                    }
                    items
                        .iter()
                        .zip(values)
                        .all(|(pat, val)| match_pattern(pat, val, frame))
                }
            }
        }
        Pattern::Record { fields, rest } => {
            let Value::Record(entries) = value else {
                return false;
            };
            for (key, sub) in fields {
                let Some(val) = entries.get(key) else {
                    return false;
                };
                match sub {
                    Some(pat) => {
                        if !match_pattern(pat, val, frame) {
                            return false;
                        }
                    }
                    None => frame.bind(key, val.clone()),
                }
            }
            if let Some(rest_name) = rest {
                if rest_name != "_" {
                    let matched: Vec<&String> = fields.iter().map(|(k, _)| k).collect();
                    let remaining: IndexMap<String, Value> = entries
                        .iter()
                        .filter(|(k, _)| !matched.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    frame.bind(rest_name, Value::Record(remaining));
                }
            }
            true
        }
    }
}

/// Literal patterns hold literal expressions only; anything else fails to
/// match rather than evaluating.
fn literal_value(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Int(n) => Some(Value::Int(*n)),
        ExprKind::Float(n) => Some(Value::Float(*n)),
        ExprKind::Str(s) => Some(Value::String(s.clone())),
        ExprKind::Bool(b) => Some(Value::Bool(*b)),
        ExprKind::Null => Some(Value::Null),
        _ => None,
    }
}
