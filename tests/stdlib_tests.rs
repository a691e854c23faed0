// ABOUTME: Tests for the built-in library, driven through the language

use lea::config::FsConfig;
use lea::eval::Evaluator;
use lea::sandbox::Sandbox;
use lea::value::Value;
use serial_test::serial;

fn eval_ok(source: &str) -> Value {
    lea::run(source).unwrap_or_else(|diags| panic!("unexpected diagnostics: {:?}", diags))
}

fn show(source: &str) -> String {
    format!("{}", eval_ok(source))
}

// ----------------------------------------------------------------------
// Lists
// ----------------------------------------------------------------------

#[test]
fn test_head_tail_take_drop() {
    assert_eq!(show("head([1, 2, 3])"), "1");
    assert_eq!(show("head([])"), "null");
    assert_eq!(show("tail([1, 2, 3])"), "[2, 3]");
    assert_eq!(show("take([1, 2, 3, 4], 2)"), "[1, 2]");
    assert_eq!(show("drop([1, 2, 3, 4], 2)"), "[3, 4]");
    assert_eq!(show("slice([1, 2, 3, 4, 5], 1, 3)"), "[2, 3]");
}

#[test]
fn test_length_works_across_types() {
    assert_eq!(show("length([1, 2, 3])"), "3");
    assert_eq!(show("length(\"hello\")"), "5");
    assert_eq!(show("length({ a: 1, b: 2 })"), "2");
}

#[test]
fn test_zip_and_partition() {
    assert_eq!(show("zip([1, 2], [\"a\", \"b\", \"c\"])"), "[[1, \"a\"], [2, \"b\"]]");
    assert_eq!(
        show("partition([1, 2, 3, 4], (x) -> x % 2 == 0)"),
        "[[2, 4], [1, 3]]"
    );
}

#[test]
fn test_sort_and_sort_by() {
    assert_eq!(show("sort([3, 1, 2])"), "[1, 2, 3]");
    assert_eq!(show("sort([\"b\", \"a\"])"), "[\"a\", \"b\"]");
    assert_eq!(
        show("sortBy([{ n: 3 }, { n: 1 }], (r) -> r.n)"),
        "[{ n: 1 }, { n: 3 }]"
    );
}

#[test]
fn test_unique_group_by_flatten() {
    assert_eq!(show("unique([1, 2, 1, 3, 2])"), "[1, 2, 3]");
    assert_eq!(
        show("groupBy([1, 2, 3, 4], (x) -> x % 2 == 0 ? \"even\" : \"odd\")"),
        "{ odd: [1, 3], even: [2, 4] }"
    );
    assert_eq!(show("flatten([[1, 2], [3], 4])"), "[1, 2, 3, 4]");
    assert_eq!(show("flatMap([1, 2], (x) -> [x, x])"), "[1, 1, 2, 2]");
}

#[test]
fn test_push_and_concat_do_not_mutate() {
    let source = "let xs = [1, 2]\nlet ys = push(xs, 3)\n[xs, ys]";
    assert_eq!(show(source), "[[1, 2], [1, 2, 3]]");
}

#[test]
fn test_range_builtin() {
    assert_eq!(show("range(3)"), "[0, 1, 2]");
    assert_eq!(show("range(2, 5)"), "[2, 3, 4]");
}

// ----------------------------------------------------------------------
// Strings
// ----------------------------------------------------------------------

#[test]
fn test_split_join_replace_trim() {
    assert_eq!(show("split(\"a,b,c\", \",\")"), "[\"a\", \"b\", \"c\"]");
    assert_eq!(show("join([\"a\", \"b\"], \"-\")"), "\"a-b\"");
    assert_eq!(show("replace(\"aaa\", \"a\", \"b\")"), "\"bbb\"");
    assert_eq!(show("trim(\"  x  \")"), "\"x\"");
}

#[test]
fn test_case_conversions() {
    assert_eq!(show("toUpperCase(\"ab\")"), "\"AB\"");
    assert_eq!(show("toLowerCase(\"AB\")"), "\"ab\"");
    assert_eq!(show("capitalize(\"lea\")"), "\"Lea\"");
}

#[test]
fn test_number_parsing() {
    assert_eq!(show("parseInt(\" 42 \")"), "42");
    assert_eq!(show("parseInt(\"nope\")"), "null");
    assert_eq!(show("parseFloat(\"2.5\")"), "2.5");
    assert_eq!(show("toString(12)"), "\"12\"");
}

#[test]
fn test_regex_primitives() {
    assert_eq!(show("regexMatch(\"abc123\", \"[0-9]+\")"), "true");
    assert_eq!(show("regexFind(\"abc123\", \"[0-9]+\")"), "\"123\"");
    assert_eq!(show("regexFind(\"abc\", \"[0-9]+\")"), "null");
    assert_eq!(
        show("regexFindAll(\"a1b22c\", \"[0-9]+\")"),
        "[\"1\", \"22\"]"
    );
    assert_eq!(
        show("regexReplace(\"a1b2\", \"[0-9]\", \"_\")"),
        "\"a_b_\""
    );
}

#[test]
fn test_codecs_round_trip() {
    assert_eq!(show("base64Encode(\"hello\")"), "\"aGVsbG8=\"");
    assert_eq!(show("base64Decode(base64Encode(\"piped text\"))"), "\"piped text\"");
    assert_eq!(show("urlEncode(\"a b&c\")"), "\"a%20b%26c\"");
    assert_eq!(show("urlDecode(urlEncode(\"a b&c\"))"), "\"a b&c\"");
    assert_eq!(show("hexEncode(\"AB\")"), "\"4142\"");
    assert_eq!(show("hexDecode(\"4142\")"), "\"AB\"");
}

// ----------------------------------------------------------------------
// Records and JSON
// ----------------------------------------------------------------------

#[test]
fn test_record_operations_keep_insertion_order() {
    assert_eq!(show("keys({ b: 1, a: 2 })"), "[\"b\", \"a\"]");
    assert_eq!(show("values({ b: 1, a: 2 })"), "[1, 2]");
    assert_eq!(
        show("entries({ x: 1 })"),
        "[[\"x\", 1]]"
    );
    assert_eq!(
        show("merge({ a: 1, b: 2 }, { b: 9, c: 3 })"),
        "{ a: 1, b: 9, c: 3 }"
    );
}

#[test]
fn test_json_round_trip() {
    match eval_ok("toJson({ b: [1, 2], a: \"x\" })") {
        Value::String(s) => assert_eq!(s, "{\"b\":[1,2],\"a\":\"x\"}"),
        other => panic!("expected String, got {:?}", other),
    }
    assert_eq!(
        show("parseJson(\"{\\\"n\\\": 1, \\\"s\\\": [true, null]}\")"),
        "{ n: 1, s: [true, null] }"
    );
}

// ----------------------------------------------------------------------
// Math and time
// ----------------------------------------------------------------------

#[test]
fn test_math_helpers() {
    assert_eq!(show("abs(-3)"), "3");
    assert_eq!(show("floor(2.7)"), "2");
    assert_eq!(show("ceil(2.1)"), "3");
    assert_eq!(show("round(2.5)"), "3");
    assert_eq!(show("sqrt(9)"), "3.0");
    assert_eq!(show("pow(2, 10)"), "1024");
    assert_eq!(show("min(3, 1, 2)"), "1");
    assert_eq!(show("max([3, 1, 2])"), "3");
}

#[test]
fn test_time_helpers() {
    match eval_ok("now()") {
        Value::Int(ms) => assert!(ms > 1_500_000_000_000),
        other => panic!("expected Int, got {:?}", other),
    }
    assert_eq!(show("regexMatch(today(), \"^[0-9]{4}-[0-9]{2}-[0-9]{2}$\")"), "true");
    assert_eq!(show("addDays(\"2024-01-30\", 3)"), "\"2024-02-02\"");
    assert_eq!(show("diffDays(\"2024-02-02\", \"2024-01-30\")"), "3");
}

// ----------------------------------------------------------------------
// Filesystem (sandboxed)
// ----------------------------------------------------------------------

fn fs_evaluator(tag: &str) -> (Evaluator, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("lea-fs-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = FsConfig {
        allowed_paths: vec![dir.clone()],
        max_file_size: 1024 * 1024,
    };
    let mut ev = Evaluator::new();
    ev.sandbox = Some(Sandbox::new(&config).unwrap());
    (ev, dir)
}

fn eval_with(ev: &mut Evaluator, source: &str) -> Value {
    let (tokens, diags) = lea::lex(source);
    assert!(diags.is_empty(), "lex errors: {:?}", diags);
    let (program, diags) = lea::parse(tokens);
    assert!(diags.is_empty(), "parse errors: {:?}", diags);
    ev.eval_program(&program)
        .unwrap_or_else(|e| panic!("runtime error: {}", e))
}

#[test]
#[serial]
fn test_write_read_exists_list() {
    let (mut ev, dir) = fs_evaluator("basic");
    eval_with(&mut ev, "writeFile(\"out.txt\", \"payload\")");
    assert_eq!(
        format!("{}", eval_with(&mut ev, "readFile(\"out.txt\")")),
        "\"payload\""
    );
    assert_eq!(
        format!("{}", eval_with(&mut ev, "[fileExists(\"out.txt\"), fileExists(\"no.txt\")]")),
        "[true, false]"
    );
    assert_eq!(
        format!("{}", eval_with(&mut ev, "listFiles()")),
        "[\"out.txt\"]"
    );
    std::fs::remove_dir_all(dir).ok();
}

#[test]
#[serial]
fn test_fs_requires_sandbox() {
    let diags = lea::run("readFile(\"x\")").expect_err("expected failure");
    assert_eq!(diags[0].code, Some("IO_ERROR"));
}
