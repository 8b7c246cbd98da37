//! End-to-end execution of compiled compositions against a mock action host.

use std::cell::Cell;
use std::collections::HashMap;

use baton::compose::{
    action, compile_composition, dowhile, finally, function, if_, if_with, let_, literal, repeat,
    retain, retain_with, retry, seq, try_, while_, BranchOptions, Composition, RetainOptions, Task,
};
use baton::conductor::{Conductor, Outcome};
use serde_json::{json, Value};

/// Drives a conductor to completion, invoking registered actions whenever
/// the workflow suspends.
#[derive(Default)]
struct MockHost<'a> {
    actions: HashMap<String, Box<dyn FnMut(Value) -> Value + 'a>>,
}

impl<'a> MockHost<'a> {
    fn new() -> Self {
        MockHost::default()
    }

    fn register(&mut self, name: &str, handler: impl FnMut(Value) -> Value + 'a) {
        self.actions.insert(name.to_string(), Box::new(handler));
    }

    fn run(&mut self, composition: &Composition, input: Value) -> Value {
        let conductor = Conductor::new(compile_composition(composition)).expect("valid program");
        let mut params = input;
        loop {
            match conductor.invoke(params).expect("invoke") {
                Outcome::Action {
                    name,
                    params: args,
                    resume,
                } => {
                    let handler = self
                        .actions
                        .get_mut(&name)
                        .unwrap_or_else(|| panic!("no mock action registered for {}", name));
                    let mut result = handler(args);
                    result
                        .as_object_mut()
                        .expect("mock actions must return objects")
                        .insert(
                            "$resume".to_string(),
                            serde_json::to_value(&resume).expect("resume token"),
                        );
                    params = result;
                }
                other => return other.into_value(),
            }
        }
    }
}

#[test]
fn sequence_of_literal_and_function() {
    let comp = seq(vec![
        literal(3).expect("literal"),
        function("{ value: params.value + 1 }").expect("function"),
    ])
    .expect("seq");
    let output = MockHost::new().run(&comp, json!({}));
    assert_eq!(output, json!({ "params": { "value": 4 } }));
}

#[test]
fn if_branches_on_the_test_value() {
    let comp = if_(
        function("{ value: params.n > 0 }").expect("test"),
        literal("pos").expect("pos"),
        literal("neg").expect("neg"),
    )
    .expect("if");

    let pos = MockHost::new().run(&comp, json!({ "n": 5 }));
    assert_eq!(pos, json!({ "params": { "value": "pos" } }));

    let neg = MockHost::new().run(&comp, json!({ "n": -1 }));
    assert_eq!(neg, json!({ "params": { "value": "neg" } }));
}

#[test]
fn if_nosave_feeds_the_test_output_to_the_branch() {
    let comp = if_with(
        function("{ value: params.n > 0, n: params.n }").expect("test"),
        function("{ kept: params.n }").expect("consequent"),
        Task::None,
        BranchOptions { nosave: true },
    )
    .expect("if");
    let output = MockHost::new().run(&comp, json!({ "n": 5 }));
    assert_eq!(output, json!({ "params": { "kept": 5 } }));
}

#[test]
fn try_diverts_errors_to_the_handler() {
    let comp = try_(
        function("{ error: \"x\" }").expect("body"),
        function("{ value: \"caught\" }").expect("handler"),
    )
    .expect("try");
    let output = MockHost::new().run(&comp, json!({}));
    assert_eq!(output, json!({ "params": { "value": "caught" } }));
}

#[test]
fn unhandled_errors_terminate_with_the_error_alone() {
    let comp = seq(vec![
        function("{ error: \"boom\", extra: 1 }").expect("body"),
        literal("unreached").expect("literal"),
    ])
    .expect("seq");
    let output = MockHost::new().run(&comp, json!({}));
    assert_eq!(output, json!({ "error": "boom" }));
}

#[test]
fn finally_runs_the_finalizer_on_error() {
    let ran = Cell::new(0);
    let comp = finally(
        function("{ error: \"x\" }").expect("body"),
        action("/_/tick").expect("finalizer"),
    )
    .expect("finally");

    let mut host = MockHost::new();
    host.register("/_/tick", |params| {
        ran.set(ran.get() + 1);
        params
    });
    let output = host.run(&comp, json!({}));
    assert_eq!(output, json!({ "error": "x" }), "error propagates after the finalizer");
    assert_eq!(ran.get(), 1, "finalizer ran exactly once");
}

#[test]
fn finally_runs_the_finalizer_on_success() {
    let comp = finally(
        function("{ value: 1 }").expect("body"),
        function("params").expect("finalizer"),
    )
    .expect("finally");
    let output = MockHost::new().run(&comp, json!({}));
    assert_eq!(output, json!({ "params": { "value": 1 } }));
}

#[test]
fn retain_pairs_input_with_result() {
    let comp = retain(function("{ value: params.n * 2 }").expect("body")).expect("retain");
    let output = MockHost::new().run(&comp, json!({ "n": 3 }));
    assert_eq!(
        output,
        json!({ "params": { "params": { "n": 3 }, "result": { "value": 6 } } })
    );
}

#[test]
fn retain_field_snapshots_a_single_field() {
    let comp = retain_with(
        function("{ value: true }").expect("body"),
        RetainOptions {
            field: Some("k".to_string()),
            ..RetainOptions::default()
        },
    )
    .expect("retain");
    let output = MockHost::new().run(&comp, json!({ "k": 1, "other": 2 }));
    assert_eq!(
        output,
        json!({ "params": { "params": 1, "result": { "value": true } } })
    );
}

#[test]
fn retain_catch_round_trips_a_thrown_error() {
    let comp = retain_with(
        function("{ error: \"bang\" }").expect("body"),
        RetainOptions {
            catch: true,
            ..RetainOptions::default()
        },
    )
    .expect("retain");
    let output = MockHost::new().run(&comp, json!({ "k": 1 }));
    assert_eq!(
        output,
        json!({ "params": { "params": { "k": 1 }, "result": { "error": "bang" } } })
    );
}

#[test]
fn retain_filter_saves_the_filtered_parameters() {
    let comp = retain_with(
        function("{ doubled: params.n * 2 }").expect("body"),
        RetainOptions {
            filter: Some(Task::Function("{ n: params.n }".to_string())),
            ..RetainOptions::default()
        },
    )
    .expect("retain");
    let output = MockHost::new().run(&comp, json!({ "n": 3, "junk": true }));
    assert_eq!(
        output,
        json!({ "params": { "params": { "n": 3 }, "result": { "doubled": 6 } } })
    );
}

#[test]
fn retry_stops_after_the_last_attempt() {
    let attempts = Cell::new(0);
    let comp = retry(2, "/_/flaky").expect("retry");

    let mut host = MockHost::new();
    host.register("/_/flaky", |_| {
        attempts.set(attempts.get() + 1);
        json!({ "error": "no" })
    });
    let output = host.run(&comp, json!({}));
    assert_eq!(attempts.get(), 3, "count + 1 attempts");
    assert_eq!(output, json!({ "error": "no" }));
}

#[test]
fn retry_returns_the_first_success() {
    let attempts = Cell::new(0);
    let comp = retry(2, "/_/flaky").expect("retry");

    let mut host = MockHost::new();
    host.register("/_/flaky", |_| {
        attempts.set(attempts.get() + 1);
        if attempts.get() < 3 {
            json!({ "error": "no" })
        } else {
            json!({ "value": "ok" })
        }
    });
    let output = host.run(&comp, json!({}));
    assert_eq!(attempts.get(), 3);
    assert_eq!(output, json!({ "params": { "value": "ok" } }));
}

#[test]
fn retry_re_runs_the_body_on_the_original_input() {
    let seen = std::cell::RefCell::new(Vec::new());
    let comp = retry(1, "/_/flaky").expect("retry");

    let mut host = MockHost::new();
    host.register("/_/flaky", |params| {
        seen.borrow_mut().push(params);
        json!({ "error": "no" })
    });
    host.run(&comp, json!({ "n": 9 }));
    assert_eq!(
        *seen.borrow(),
        vec![json!({ "n": 9 }), json!({ "n": 9 })],
        "each attempt sees the saved input"
    );
}

#[test]
fn repeat_runs_the_body_count_times() {
    let steps = Cell::new(0);
    let comp = repeat(3, "/_/step").expect("repeat");

    let mut host = MockHost::new();
    host.register("/_/step", |params| {
        steps.set(steps.get() + 1);
        params
    });
    host.run(&comp, json!({}));
    assert_eq!(steps.get(), 3);
}

#[test]
fn dowhile_runs_the_body_at_least_once() {
    let steps = Cell::new(0);
    let comp = dowhile("/_/step", function("{ value: false }").expect("test")).expect("dowhile");

    let mut host = MockHost::new();
    host.register("/_/step", |params| {
        steps.set(steps.get() + 1);
        params
    });
    host.run(&comp, json!({}));
    assert_eq!(steps.get(), 1);
}

#[test]
fn while_preserves_parameters_across_the_test() {
    let comp = let_(
        json!({ "count": 2 }),
        while_(
            function("(count = count - 1) >= 0").expect("test"),
            function("{ n: params.n + 1 }").expect("body"),
        )
        .expect("while"),
    )
    .expect("let");
    let output = MockHost::new().run(&comp, json!({ "n": 0 }));
    assert_eq!(output, json!({ "params": { "n": 2 } }));
}

#[test]
fn let_exposes_bindings_inside_the_body_only() {
    let scoped = let_(json!({ "x": 1 }), function("{ value: x }").expect("body")).expect("let");
    let output = MockHost::new().run(&scoped, json!({}));
    assert_eq!(output, json!({ "params": { "value": 1 } }));

    let escaped = seq(vec![
        let_(json!({ "x": 1 }), function("params").expect("body")).expect("let"),
        function("{ value: x }").expect("after")
    ])
    .expect("seq");
    let output = MockHost::new().run(&escaped, json!({}));
    assert_eq!(
        output,
        json!({ "error": "unknown name: x" }),
        "bindings do not leak past the let"
    );
}

#[test]
fn inner_let_shadows_and_write_back_targets_the_inner_frame() {
    let comp = let_(
        json!({ "x": 1 }),
        seq(vec![
            let_(
                json!({ "x": 2 }),
                function("x = x + 10; { value: x }").expect("inner"),
            )
            .expect("inner let"),
            function("{ inner: params.value, outer: x }").expect("after"),
        ])
        .expect("seq"),
    )
    .expect("outer let");
    let output = MockHost::new().run(&comp, json!({}));
    assert_eq!(output, json!({ "params": { "inner": 12, "outer": 1 } }));
}
