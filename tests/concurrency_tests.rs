// ABOUTME: Tests for promises, channels, and the cooperative scheduler

use lea::value::Value;

fn eval_ok(source: &str) -> Value {
    lea::run(source).unwrap_or_else(|diags| panic!("unexpected diagnostics: {:?}", diags))
}

fn eval_err(source: &str) -> Vec<lea::Diagnostic> {
    lea::run(source).expect_err("expected diagnostics")
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected Int, got {:?}", other),
    }
}

// ----------------------------------------------------------------------
// Promises
// ----------------------------------------------------------------------

#[test]
fn test_await_delay_takes_at_least_that_long() {
    let start = std::time::Instant::now();
    eval_ok("await delay(15)");
    assert!(start.elapsed().as_millis() >= 15);
}

#[test]
fn test_promise_is_first_class_until_awaited() {
    let source = "let p = delay(1)\n[p == p, await p == null]";
    assert_eq!(format!("{}", eval_ok(source)), "[true, true]");
}

#[test]
fn test_forward_pipe_awaits_promise_on_left() {
    let source = "delay(5) /> (x) -> \"after\"";
    assert_eq!(format!("{}", eval_ok(source)), "\"after\"");
}

#[test]
fn test_await_non_promise_passes_through() {
    assert_eq!(as_int(&eval_ok("await 42")), 42);
}

#[test]
fn test_then_chains_on_resolution() {
    assert_eq!(as_int(&eval_ok("await then(delay(5), (x) -> 7)")), 7);
}

#[test]
fn test_then_accepts_plain_values() {
    assert_eq!(as_int(&eval_ok("await then(6, (x) -> x * 2)")), 12);
}

// ----------------------------------------------------------------------
// parallel / race
// ----------------------------------------------------------------------

#[test]
fn test_parallel_preserves_input_order() {
    let source = "await parallel([3, 1, 2], (x) -> x * 10)";
    assert_eq!(format!("{}", eval_ok(source)), "[30, 10, 20]");
}

#[test]
fn test_parallel_respects_limit_option_for_all_k() {
    for k in 1..=4 {
        let source = format!(
            "await parallel([1, 2, 3, 4, 5], (x) -> x + 1, {{ limit: {} }})",
            k
        );
        assert_eq!(format!("{}", eval_ok(&source)), "[2, 3, 4, 5, 6]");
    }
}

#[test]
fn test_parallel_is_awaited_implicitly_by_pipes() {
    let source = "[1, 2, 3] /> parallel((x) -> x * 10, { limit: 2 }) /> head";
    assert_eq!(as_int(&eval_ok(source)), 10);
}

#[test]
fn test_race_returns_first_settlement() {
    let source = "await race([delay(200), then(delay(5), (x) -> \"quick\")])";
    assert_eq!(format!("{}", eval_ok(source)), "\"quick\"");
}

#[test]
fn test_race_accepts_thunks() {
    let source = "await race([() -> \"ready\"])";
    assert_eq!(format!("{}", eval_ok(source)), "\"ready\"");
}

// ----------------------------------------------------------------------
// Fan-out
// ----------------------------------------------------------------------

#[test]
fn test_fan_out_with_async_branch() {
    let source =
        "5 \\> (x) -> { await delay(5); x + 1 } \\> (x) -> x * 2 /> (a, b) -> a + b";
    assert_eq!(as_int(&eval_ok(source)), 16);
}

#[test]
fn test_fan_out_result_preserves_syntactic_order() {
    // The slow branch comes first syntactically and stays first.
    let source = "1 \\> (x) -> { await delay(10); \"slow\" } \\> (x) -> \"fast\"";
    assert_eq!(format!("{}", eval_ok(source)), "[\"slow\", \"fast\"]");
}

// ----------------------------------------------------------------------
// Channels
// ----------------------------------------------------------------------

#[test]
fn test_channel_fifo_order() {
    let source = "let ch = channel(2)\nsend(ch, 1)\nsend(ch, 2)\n[receive(ch), receive(ch)]";
    assert_eq!(format!("{}", eval_ok(source)), "[1, 2]");
}

#[test]
fn test_closed_channel_drains_then_yields_null() {
    let source = "let ch = channel()\nsend(ch, 1)\nclose(ch)\n[receive(ch), receive(ch)]";
    assert_eq!(format!("{}", eval_ok(source)), "[1, null]");
}

#[test]
fn test_send_on_closed_channel_fails() {
    let diags = eval_err("let ch = channel()\nclose(ch)\nsend(ch, 1)");
    assert_eq!(diags[0].code, Some("CHANNEL_CLOSED"));
}

#[test]
fn test_send_on_full_channel_without_consumer_deadlocks() {
    let diags = eval_err("let ch = channel(1)\nsend(ch, 1)\nsend(ch, 2)");
    assert_eq!(diags[0].code, Some("DEADLOCK"));
}

#[test]
fn test_receive_drives_spawned_producer() {
    let source = "let ch = channel(1)\n\
                  let producer = () -> send(ch, 99) #spawn\n\
                  producer()\n\
                  receive(ch)";
    assert_eq!(as_int(&eval_ok(source)), 99);
}

#[test]
fn test_receive_on_empty_channel_deadlocks() {
    let diags = eval_err("let ch = channel()\nreceive(ch)");
    assert_eq!(diags[0].code, Some("DEADLOCK"));
}

#[test]
fn test_is_channel_predicate() {
    assert_eq!(
        format!("{}", eval_ok("[isChannel(channel()), isChannel(1)]")),
        "[true, false]"
    );
}
