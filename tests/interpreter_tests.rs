// ABOUTME: End-to-end tests for the lex -> parse -> evaluate pipeline

use lea::diag::DiagKind;
use lea::eval::Evaluator;
use lea::value::Value;

fn eval_ok(source: &str) -> Value {
    lea::run(source).unwrap_or_else(|diags| panic!("unexpected diagnostics: {:?}", diags))
}

fn eval_err(source: &str) -> Vec<lea::Diagnostic> {
    lea::run(source).expect_err("expected diagnostics")
}

fn eval_with(ev: &mut Evaluator, source: &str) -> Result<Value, lea::Diagnostic> {
    let (tokens, diags) = lea::lex(source);
    assert!(diags.is_empty(), "lex errors: {:?}", diags);
    let (program, diags) = lea::parse(tokens);
    assert!(diags.is_empty(), "parse errors: {:?}", diags);
    ev.eval_program(&program)
        .map_err(|e| e.into_diagnostic((1, 1)))
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected Int, got {:?}", other),
    }
}

fn as_string(value: &Value) -> &str {
    match value {
        Value::String(s) => s,
        other => panic!("expected String, got {:?}", other),
    }
}

// ----------------------------------------------------------------------
// End-to-end scenarios
// ----------------------------------------------------------------------

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(as_int(&eval_ok("1 + 2 * 3")), 7);
}

#[test]
fn test_filter_map_reduce_chain() {
    let source = "let nums = [1, 2, 3, 4, 5]\n\
                  nums /> filter((x) -> x > 2) /> map((x) -> x * x) /> reduce(0, (acc, x) -> acc + x)";
    assert_eq!(as_int(&eval_ok(source)), 50);
}

#[test]
fn test_placeholder_substitution() {
    let source = "let add = (a, b) -> a + b; 5 /> add(_, 3)";
    assert_eq!(as_int(&eval_ok(source)), 8);
}

#[test]
fn test_memo_suppresses_reentry() {
    let source = "maybe calls = 0\n\
                  let f = (x) -> { calls = calls + 1; x * 2 } #memo\n\
                  f(3); f(3); calls";
    assert_eq!(as_int(&eval_ok(source)), 1);
}

#[test]
fn test_retry_exhausts_and_surfaces_division_by_zero() {
    let mut ev = Evaluator::new();
    let err = eval_with(
        &mut ev,
        "maybe attempts = 0\n\
         let e = () -> { attempts = attempts + 1; 1/0 } #retry(2)\n\
         e()",
    )
    .expect_err("expected a runtime error");
    assert_eq!(err.kind, DiagKind::Runtime);
    assert_eq!(err.code, Some("DIVISION_BY_ZERO"));
    // 1 initial call + 2 retries.
    let attempts = eval_with(&mut ev, "attempts").unwrap();
    assert_eq!(as_int(&attempts), 3);
}

#[test]
fn test_context_provide_shadows_default() {
    let source = "context Logger = { log: (m) -> m }\n\
                  provide Logger { log: (m) -> \"X:\" ++ m }\n\
                  Logger.log(\"hi\")";
    assert_eq!(as_string(&eval_ok(source)), "X:hi");
}

#[test]
fn test_fan_out_fan_in() {
    let source = "5 \\> (x) -> x + 1 \\> (x) -> x * 2 /> (a, b) -> a + b";
    assert_eq!(as_int(&eval_ok(source)), 16);
}

#[test]
fn test_async_delay_propagates() {
    let start = std::time::Instant::now();
    let source = "let f = () -> delay(10) #async\nawait f(); \"done\"";
    assert_eq!(as_string(&eval_ok(source)), "done");
    assert!(start.elapsed().as_millis() >= 10);
}

// ----------------------------------------------------------------------
// Pipe dispatch
// ----------------------------------------------------------------------

#[test]
fn test_pipe_is_plain_application() {
    let source = "let inc = (x) -> x + 1\n5 /> inc";
    assert_eq!(as_int(&eval_ok(source)), 6);
}

#[test]
fn test_pipe_prepends_without_placeholder() {
    let source = "let sub = (a, b) -> a - b\n10 /> sub(3)";
    assert_eq!(as_int(&eval_ok(source)), 7);
}

#[test]
fn test_pipe_with_function_literal() {
    assert_eq!(as_int(&eval_ok("5 /> (x) -> x * 3")), 15);
}

#[test]
fn test_spread_maps_elements() {
    let value = eval_ok("[1, 2, 3] />>> (x) -> x * 2");
    assert_eq!(format!("{}", value), "[2, 4, 6]");
}

#[test]
fn test_spread_requires_list() {
    let diags = eval_err("1 />>> (x) -> x");
    assert_eq!(diags[0].code, Some("TYPE_MISMATCH"));
}

#[test]
fn test_reverse_pipe() {
    let source = "let inc = (x) -> x + 1\ninc </ 5";
    assert_eq!(as_int(&eval_ok(source)), 6);
}

#[test]
fn test_tap_forwards_input_unchanged() {
    let source = "maybe seen = 0\n\
                  let note = (x) -> { seen = x }\n\
                  let out = 5 @> note\n\
                  [out, seen]";
    assert_eq!(format!("{}", eval_ok(source)), "[5, 5]");
}

#[test]
fn test_compose_builds_pipeline_without_invoking() {
    let source = "maybe ran = false\n\
                  let inc = (x) -> { ran = true\n x + 1 }\n\
                  let dbl = (x) -> x * 2\n\
                  let both = inc </> dbl\n\
                  [ran, both(5)]";
    assert_eq!(format!("{}", eval_ok(source)), "[false, 12]");
}

#[test]
fn test_standalone_fan_out_yields_list() {
    let value = eval_ok("3 \\> (x) -> x + 1 \\> (x) -> x * 10");
    assert_eq!(format!("{}", value), "[4, 30]");
}

#[test]
fn test_pipe_chain_continues_across_newlines() {
    let source = "[1, 2, 3]\n  /> map((x) -> x + 1)\n  /> length";
    assert_eq!(as_int(&eval_ok(source)), 3);
}

// ----------------------------------------------------------------------
// Language core
// ----------------------------------------------------------------------

#[test]
fn test_ternary_is_lazy() {
    let source = "true ? 1 : 1/0";
    assert_eq!(as_int(&eval_ok(source)), 1);
}

#[test]
fn test_if_else_expression() {
    let source = "let grade = (n) -> { if n > 90 { \"A\" } else if n > 80 { \"B\" } else { \"C\" } }\n\
                  grade(85)";
    assert_eq!(as_string(&eval_ok(source)), "B");
}

#[test]
fn test_null_coalesce_and_missing_member() {
    let source = "let r = { a: 1 }\nr.b ?? 42";
    assert_eq!(as_int(&eval_ok(source)), 42);
}

#[test]
fn test_string_concat_and_template() {
    assert_eq!(as_string(&eval_ok("\"a\" ++ \"b\"")), "ab");
    let source = "let x = 2\n`one ${x + 1} three`";
    assert_eq!(as_string(&eval_ok(source)), "one 3 three");
}

#[test]
fn test_range_is_half_open() {
    assert_eq!(format!("{}", eval_ok("1..4")), "[1, 2, 3]");
}

#[test]
fn test_indexing() {
    assert_eq!(as_int(&eval_ok("[10, 20, 30][1]")), 20);
    assert_eq!(as_string(&eval_ok("\"abc\"[2]")), "c");
    assert_eq!(as_int(&eval_ok("let r = { a: 7 }\nr[\"a\"]")), 7);
    let diags = eval_err("[1][5]");
    assert_eq!(diags[0].code, Some("BAD_INDEX"));
}

#[test]
fn test_undefined_identifier_names_the_symbol() {
    let diags = eval_err("ghost + 1");
    assert_eq!(diags[0].code, Some("UNDEFINED_NAME"));
    assert!(diags[0].message.contains("ghost"));
    assert_eq!(diags[0].line, 1);
}

#[test]
fn test_let_rebinding_fails() {
    let diags = eval_err("let x = 1\nlet x = 2");
    assert_eq!(diags[0].code, Some("REBIND"));
}

#[test]
fn test_assign_to_immutable_fails() {
    let diags = eval_err("let x = 1\nx = 2");
    assert_eq!(diags[0].code, Some("ASSIGN_IMMUTABLE"));
}

#[test]
fn test_maybe_is_mutable_through_closures() {
    let source = "maybe count = 0\n\
                  let bump = () -> { count = count + 1 }\n\
                  bump(); bump(); bump()\n\
                  count";
    assert_eq!(as_int(&eval_ok(source)), 3);
}

#[test]
fn test_early_return_statement() {
    let source = "let pick = (n) -> {\n  if n > 0 { <- \"pos\" }\n  \"other\"\n}\n\
                  [pick(5), pick(-5)]";
    assert_eq!(format!("{}", eval_ok(source)), "[\"pos\", \"other\"]");
}

#[test]
fn test_default_parameters() {
    let source = "let greet = (name, prefix = \"hi \") -> prefix ++ name\n\
                  [greet(\"a\"), greet(\"b\", \"yo \")]";
    assert_eq!(format!("{}", eval_ok(source)), "[\"hi a\", \"yo b\"]");
}

#[test]
fn test_extra_arguments_are_an_arity_error() {
    let diags = eval_err("let f = (x) -> x\nf(1, 2)");
    assert_eq!(diags[0].code, Some("ARITY_MISMATCH"));
}

#[test]
fn test_use_statement_is_accepted() {
    assert_eq!(as_int(&eval_ok("use prelude\n1")), 1);
}

#[test]
fn test_block_scoping_shadows() {
    let source = "let x = 1\nlet y = { let x = 2\n x + 1 }\n[x, y]";
    assert_eq!(format!("{}", eval_ok(source)), "[1, 3]");
}

// ----------------------------------------------------------------------
// Match
// ----------------------------------------------------------------------

#[test]
fn test_match_first_arm_wins() {
    let source = "match 3 {\n  1 -> \"one\",\n  n if n > 2 -> \"big\",\n  _ -> \"other\"\n}";
    assert_eq!(as_string(&eval_ok(source)), "big");
}

#[test]
fn test_match_list_destructure_with_rest() {
    let source = "match [1, 2, 3, 4] {\n  [a, b, ..rest] -> a + b + length(rest),\n  _ -> 0\n}";
    assert_eq!(as_int(&eval_ok(source)), 5);
}

#[test]
fn test_match_record_destructure() {
    let source = "match { name: \"lea\", age: 2 } {\n  { name, age } -> name ++ \"/\" ++ toString(age),\n  _ -> \"none\"\n}";
    assert_eq!(as_string(&eval_ok(source)), "lea/2");
}

#[test]
fn test_match_type_tags() {
    let source = "let kind = (v) -> match v {\n  Int -> \"int\",\n  String -> \"string\",\n  List -> \"list\",\n  _ -> \"other\"\n}\n\
                  [kind(1), kind(\"s\"), kind([1])]";
    assert_eq!(
        format!("{}", eval_ok(source)),
        "[\"int\", \"string\", \"list\"]"
    );
}

#[test]
fn test_match_exhaustion_is_runtime_error() {
    let diags = eval_err("match 9 { 1 -> \"one\" }");
    assert_eq!(diags[0].code, Some("NO_MATCH"));
}

// ----------------------------------------------------------------------
// Contexts
// ----------------------------------------------------------------------

#[test]
fn test_context_default_applies() {
    let source = "context Limit = 10\nLimit + 1";
    assert_eq!(as_int(&eval_ok(source)), 11);
}

#[test]
fn test_provide_block_restores_previous_value() {
    let source = "context Limit = 10\n\
                  maybe seen = 0\n\
                  provide Limit 3 { seen = Limit }\n\
                  [seen, Limit]";
    assert_eq!(format!("{}", eval_ok(source)), "[3, 10]");
}

#[test]
fn test_provide_without_context_fails() {
    let diags = eval_err("provide Ghost 1");
    assert_eq!(diags[0].code, Some("UNKNOWN_CONTEXT"));
}

#[test]
fn test_context_stack_balances_after_program() {
    let mut ev = Evaluator::new();
    eval_with(&mut ev, "context Limit = 10\nprovide Limit 3\nLimit").unwrap();
    assert_eq!(ev.contexts.depth("Limit"), 0);
}

#[test]
fn test_context_stack_balances_on_error() {
    let mut ev = Evaluator::new();
    let err = eval_with(
        &mut ev,
        "context Limit = 10\nprovide Limit 3 { 1/0 }",
    )
    .expect_err("expected failure");
    assert_eq!(err.code, Some("DIVISION_BY_ZERO"));
    assert_eq!(ev.contexts.depth("Limit"), 0);
}

#[test]
fn test_attachment_injects_per_call() {
    let source = "context Logger = { log: (m) -> \"default:\" ++ m }\n\
                  let speak = (m) -> {\n  @Logger\n  Logger.log(m)\n}\n\
                  maybe first = null\n\
                  first = speak(\"a\")\n\
                  provide Logger { log: (m) -> \"loud:\" ++ m }\n\
                  [first, speak(\"b\")]";
    assert_eq!(
        format!("{}", eval_ok(source)),
        "[\"default:a\", \"loud:b\"]"
    );
}

// ----------------------------------------------------------------------
// Determinism and equivalences
// ----------------------------------------------------------------------

#[test]
fn test_pure_expressions_are_deterministic() {
    let source = "[1, 2, 3] /> map((x) -> x * x) /> reduce(1, (a, b) -> a + b)";
    let a = format!("{}", eval_ok(source));
    let b = format!("{}", eval_ok(source));
    assert_eq!(a, b);
}

#[test]
fn test_pipe_equals_direct_call() {
    let piped = eval_ok("let f = (x) -> x * 7\n6 /> f");
    let called = eval_ok("let f = (x) -> x * 7\nf(6)");
    assert_eq!(format!("{}", piped), format!("{}", called));
}

#[test]
fn test_print_returns_its_argument() {
    assert_eq!(as_int(&eval_ok("print(5) + 1")), 6);
}

#[test]
fn test_multiple_parse_errors_in_one_pass() {
    let (tokens, _) = lea::lex("let = 1\nlet = 2\nlet ok = 3");
    let (program, diags) = lea::parse(tokens);
    assert!(diags.len() >= 2);
    // The valid trailing statement still parsed.
    assert_eq!(program.statements.len(), 1);
}
