//! End-to-end pipeline behavior against a scripted interpreter.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Reply, ScriptedExecutor};
use pretty_assertions::assert_eq;
use script_relay::hooks::{ExecutionHooks, FailureEvent, PreExecutionEvent, SuccessEvent};
use script_relay::pipeline::{CallContext, PipelineEnv, PipelineStep};
use script_relay::protocol::{encode_rows, encode_sections, Section};
use script_relay::schema::{FnSchema, ScalarKind, SchemaDescriptor};
use script_relay::{
    EngineConfig, Error, ErrorKind, OperationDef, PayloadKind, Pipeline, RetryPolicy, RunOptions,
    SchemaIssue,
};
use serde::Deserialize;
use serde_json::{json, Value};

fn pipeline(executor: &Arc<ScriptedExecutor>) -> Pipeline {
    Pipeline::builder(EngineConfig::for_application("Things3"))
        .executor_ref(executor.clone())
        .build()
}

fn executor<I: IntoIterator<Item = Reply>>(replies: I) -> Arc<ScriptedExecutor> {
    Arc::new(ScriptedExecutor::new(replies))
}

fn rows(data: &[&[&str]]) -> String {
    let rows: Vec<Vec<String>> = data
        .iter()
        .map(|row| row.iter().map(|f| f.to_string()).collect())
        .collect();
    encode_rows(&rows)
}

fn todo_row_schema() -> FnSchema {
    FnSchema::accepting(SchemaDescriptor::Array(Box::new(SchemaDescriptor::Object(vec![
        ("name".to_string(), SchemaDescriptor::Scalar(ScalarKind::String)),
        ("done".to_string(), SchemaDescriptor::Scalar(ScalarKind::Boolean)),
        ("count".to_string(), SchemaDescriptor::Scalar(ScalarKind::Integer)),
    ]))))
}

#[tokio::test]
async fn test_scalar_call_assembles_and_decodes() {
    let exec = executor([Reply::ok("42")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("increment", PayloadKind::Scalar)
        .body("return ${count} + 1")
        .build()
        .unwrap();

    let out = pipeline
        .run(&op, json!({"count": 41}), RunOptions::new())
        .await
        .unwrap();
    assert_eq!(out, json!("42"));

    let request = &exec.requests()[0];
    assert_eq!(request.program, "osascript");
    assert_eq!(request.args, vec!["-".to_string()]);
    assert_eq!(request.timeout, Duration::from_secs(35));
    assert!(request.stdin.contains("tell application \"Things3\""));
    assert!(request.stdin.contains("\tset p_count to 41\n"));
    assert!(request.stdin.contains("return p_count + 1"));
    assert!(request.stdin.contains("with timeout of 30 seconds"));

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.successes, 1);
}

#[tokio::test]
async fn test_identical_calls_assemble_identical_scripts() {
    let exec = executor([Reply::ok("a"), Reply::ok("a")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("echo", PayloadKind::Scalar)
        .body("return ${b} & ${a}")
        .build()
        .unwrap();

    for _ in 0..2 {
        pipeline
            .run(&op, json!({"a": "x\"y", "b": ["p", 2]}), RunOptions::new())
            .await
            .unwrap();
    }
    let requests = exec.requests();
    assert_eq!(requests[0].stdin, requests[1].stdin);
}

#[tokio::test]
async fn test_rows_are_inferred_and_normalized() {
    let exec = executor([Reply::ok(&rows(&[
        &["Buy milk", "true", "3", "ignored"],
        &["Call Bob", "no", "x"],
    ]))]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("list_todos", PayloadKind::Rows)
        .body("return {}")
        .output_schema(todo_row_schema())
        .build()
        .unwrap();

    let out = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    assert_eq!(
        out,
        json!([
            {"name": "Buy milk", "done": true, "count": 3},
            {"name": "Call Bob", "done": false, "count": "x"},
        ])
    );
}

#[tokio::test]
async fn test_row_mapping_precedence_and_normalization_override() {
    let exec = executor([
        Reply::ok(&rows(&[&["a", "1"]])),
        Reply::ok(&rows(&[&["a", "1"]])),
        Reply::ok(&rows(&[&["a", "1"]])),
    ]);
    let pipeline = pipeline(&exec);

    let custom = OperationDef::builder("custom", PayloadKind::Rows)
        .body("return {}")
        .columns(["ignored"])
        .map_rows(|row| json!({"joined": row.join("-")}))
        .build()
        .unwrap();
    assert_eq!(
        pipeline.run(&custom, Value::Null, RunOptions::new()).await.unwrap(),
        json!([{"joined": "a-1"}])
    );

    let columns = OperationDef::builder("columns", PayloadKind::Rows)
        .body("return {}")
        .columns(["name", "done"])
        .output_schema(todo_row_schema())
        .normalize_rows(false)
        .build()
        .unwrap();
    assert_eq!(
        pipeline.run(&columns, Value::Null, RunOptions::new()).await.unwrap(),
        json!([{"name": "a", "done": "1"}])
    );

    let raw = OperationDef::builder("raw", PayloadKind::Rows)
        .body("return {}")
        .build()
        .unwrap();
    assert_eq!(
        pipeline.run(&raw, Value::Null, RunOptions::new()).await.unwrap(),
        json!([["a", "1"]])
    );
}

#[tokio::test]
async fn test_sections_and_actions() {
    let exec = executor([
        Reply::ok(&encode_sections(&[
            Section::new("Today", vec!["a".to_string(), "b".to_string()]),
            Section::new("Inbox", vec![]),
        ])),
        Reply::ok("done"),
        Reply::err(5, "maybe"),
    ]);
    let pipeline = pipeline(&exec);

    let sections = OperationDef::builder("overview", PayloadKind::Sections)
        .body("return {}")
        .build()
        .unwrap();
    assert_eq!(
        pipeline.run(&sections, Value::Null, RunOptions::new()).await.unwrap(),
        json!({"Today": ["a", "b"], "Inbox": []})
    );

    let action = OperationDef::builder("complete", PayloadKind::Action)
        .body("return \"done\"")
        .build()
        .unwrap();
    assert_eq!(
        pipeline.run(&action, Value::Null, RunOptions::new()).await.unwrap(),
        json!("done")
    );

    let err = pipeline
        .run(&action, Value::Null, RunOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidActionCode);
    assert_eq!(err.code, Some(5));
    assert_eq!(err.payload_kind, PayloadKind::Action);
}

#[tokio::test]
async fn test_input_validation_stops_before_the_interpreter() {
    let exec = executor([]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("add_todo", PayloadKind::Action)
        .body("return \"done\"")
        .input_schema(FnSchema::new(|v| match v.get("title") {
            Some(Value::String(_)) => Ok(v.clone()),
            _ => Err(vec![SchemaIssue::new("/title", "is required")]),
        }))
        .build()
        .unwrap();

    let err = pipeline.run(&op, json!({}), RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
    assert_eq!(err.error.issues(), &[SchemaIssue::new("/title", "is required")]);
    assert_eq!(err.operation_name, "add_todo");
    assert_eq!(err.target_key, "Things3");
    assert_eq!(exec.call_count(), 0);
}

#[tokio::test]
async fn test_validation_can_be_disabled() {
    let exec = executor([Reply::ok("done")]);
    let mut config = EngineConfig::for_application("Things3");
    config.pipeline.validate_input = false;
    let pipeline = Pipeline::builder(config).executor_ref(exec.clone()).build();
    let op = OperationDef::builder("add_todo", PayloadKind::Action)
        .body("return \"done\"")
        .input_schema(FnSchema::new(|_| Err(vec![SchemaIssue::new("", "never valid")])))
        .build()
        .unwrap();

    assert!(pipeline.run(&op, json!({}), RunOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_output_validation_transforms_and_rejects() {
    let exec = executor([Reply::ok("7"), Reply::ok("seven")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("count", PayloadKind::Scalar)
        .body("return 7")
        .output_schema(FnSchema::new(|v| {
            v.as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Value::from)
                .ok_or_else(|| vec![SchemaIssue::new("", "not a number")])
        }))
        .build()
        .unwrap();

    assert_eq!(pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap(), json!(7));

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputValidation);
    assert!(err.message.contains("not a number"));
}

#[tokio::test]
async fn test_parameter_limits_fail_before_the_interpreter() {
    let exec = executor([Reply::ok("ok")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("eval", PayloadKind::Scalar)
        .body("run script ${source}")
        .code_param("source")
        .build()
        .unwrap();

    let err = pipeline
        .run(
            &op,
            json!({"source": "x".repeat(64)}),
            RunOptions::new().max_code_bytes(16),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(err.message.contains("max_code_bytes (16)"));
    assert_eq!(exec.call_count(), 0);

    assert!(pipeline
        .run(&op, json!({"source": "x".repeat(64)}), RunOptions::new())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_timeout_then_success_retries_once() {
    let exec = executor([Reply::TimedOut, Reply::ok("fine")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("slow", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    assert_eq!(
        pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap(),
        json!("fine")
    );
    assert_eq!(exec.call_count(), 2);
    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.successes, 1);
}

#[tokio::test]
async fn test_two_timeouts_retry_exactly_once() {
    let exec = executor([Reply::err(1, "timed out"), Reply::TimedOut, Reply::ok("late")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("slow", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ControllerTimeout);
    assert!(err.is_timeout());
    assert_eq!(err.code, Some(1));
    assert_eq!(exec.call_count(), 2);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.errors_by_kind.get("controller_timeout"), Some(&1));
}

#[tokio::test]
async fn test_timeout_then_script_error_is_terminal() {
    let exec = executor([
        Reply::TimedOut,
        Reply::err(-1728, "Can't get to do \"x\""),
        Reply::ok("unused"),
    ]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("find", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert_eq!(err.code, Some(-1728));
    assert_eq!(exec.call_count(), 2);
}

#[tokio::test]
async fn test_non_retriable_errors_and_retry_overrides() {
    let exec = executor([Reply::err(2, ""), Reply::TimedOut, Reply::TimedOut]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("set x to 1")
        .build()
        .unwrap();

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingReturn);
    assert_eq!(exec.call_count(), 1);

    let err = pipeline
        .run(&op, Value::Null, RunOptions::new().max_retries(0))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(exec.call_count(), 2);

    let never = Pipeline::builder(EngineConfig::for_application("Things3"))
        .executor_ref(exec.clone())
        .retry(RetryPolicy::none())
        .build();
    assert!(never.run(&op, Value::Null, RunOptions::new()).await.is_err());
    assert_eq!(exec.call_count(), 3);
}

#[tokio::test]
async fn test_timeout_precedence() {
    let exec = executor([Reply::ok("1"), Reply::ok("1"), Reply::ok("1")]);
    let mut config = EngineConfig::for_application("Things3");
    config.timeouts.script_secs = Some(20);
    config.timeouts.scalar.script_secs = Some(15);
    let pipeline = Pipeline::builder(config).executor_ref(exec.clone()).build();

    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .script_timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    pipeline
        .run(&op, Value::Null, RunOptions::new().script_timeout_secs(3))
        .await
        .unwrap();
    pipeline
        .run(
            &op,
            Value::Null,
            RunOptions::new().script_timeout_secs(3).process_timeout_ms(2000),
        )
        .await
        .unwrap();

    let requests = exec.requests();
    assert!(requests[0].stdin.contains("with timeout of 10 seconds"));
    assert_eq!(requests[0].timeout, Duration::from_secs(15));
    assert!(requests[1].stdin.contains("with timeout of 3 seconds"));
    assert_eq!(requests[1].timeout, Duration::from_secs(8));
    // A process timeout below the script timeout is raised above it.
    assert_eq!(requests[2].timeout, Duration::from_secs(4));
}

#[tokio::test]
async fn test_script_raised_minus_one_is_unclassified() {
    let exec = executor([
        Reply::err(-1, "custom failure"),
        Reply::Stdout("not an envelope\n".to_string()),
    ]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("export", PayloadKind::Scalar)
        .body("error \"custom failure\" number -1")
        .build()
        .unwrap();

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unclassified);
    assert_eq!(err.message, "custom failure");

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.code, Some(-1));
}

#[tokio::test]
async fn test_interpreter_crash_is_classified() {
    let exec = executor([Reply::Crash {
        stderr: "0:12: syntax error: Expected end of line but found identifier. (-2741)\n".to_string(),
        code: 1,
    }]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("broken", PayloadKind::Scalar)
        .body("this is not applescript")
        .build()
        .unwrap();

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert_eq!(err.code, Some(-2741));
}

#[tokio::test]
async fn test_target_key_precedence() {
    let exec = executor([Reply::ok("1"), Reply::ok("1")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .target("OmniFocus")
        .build()
        .unwrap();

    pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    pipeline
        .run(&op, Value::Null, RunOptions::new().target_key("Things3-secondary"))
        .await
        .unwrap();

    assert_eq!(
        pipeline.registry().keys(),
        vec!["OmniFocus".to_string(), "Things3-secondary".to_string()]
    );
    // The script still addresses the configured application.
    assert!(exec.requests()[0].stdin.contains("tell application \"Things3\""));
}

#[tokio::test]
async fn test_wake_stanza_is_opt_in() {
    let exec = executor([Reply::ok("1"), Reply::ok("1")]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    pipeline
        .run(&op, Value::Null, RunOptions::new().wake_target(true))
        .await
        .unwrap();

    let requests = exec.requests();
    assert!(!requests[0].stdin.contains("to launch"));
    assert!(requests[1].stdin.contains("tell application \"Things3\" to launch"));
    assert!(requests[1].stdin.contains("delay 0.5"));
}

#[derive(Default)]
struct Recorder {
    before: AtomicU32,
    success: AtomicU32,
    failure: AtomicU32,
    last_attempts: AtomicU32,
}

#[async_trait]
impl ExecutionHooks for Recorder {
    async fn before_execute(&self, event: &PreExecutionEvent<'_>) {
        assert!(event.script.contains("runBody"));
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_success(&self, event: &SuccessEvent<'_>) {
        self.last_attempts.store(event.attempts, Ordering::SeqCst);
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_failure(&self, event: &FailureEvent<'_>) {
        self.last_attempts.store(event.attempts, Ordering::SeqCst);
        self.failure.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn test_hooks_see_every_attempt_and_one_outcome() {
    let exec = executor([Reply::TimedOut, Reply::ok("1"), Reply::err(-1728, "gone")]);
    let recorder = Arc::new(Recorder::default());
    let pipeline = Pipeline::builder(EngineConfig::for_application("Things3"))
        .executor_ref(exec.clone())
        .hooks_ref(recorder.clone())
        .build();
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    assert_eq!(recorder.before.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.success.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.last_attempts.load(Ordering::SeqCst), 2);

    pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(recorder.before.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.failure.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.last_attempts.load(Ordering::SeqCst), 1);
}

struct PanickingObserver;

#[async_trait]
impl ExecutionHooks for PanickingObserver {
    async fn on_success(&self, _event: &SuccessEvent<'_>) {
        panic!("observer failed on success");
    }

    async fn on_failure(&self, _event: &FailureEvent<'_>) {
        panic!("observer failed on failure");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

#[tokio::test]
async fn test_panicking_hook_does_not_reach_the_caller() {
    let exec = executor([Reply::ok("1"), Reply::err(-1728, "gone")]);
    let pipeline = Pipeline::builder(EngineConfig::for_application("Things3"))
        .executor_ref(exec.clone())
        .hooks(PanickingObserver)
        .build();
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    let output = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap();
    assert_eq!(output, json!("1"));

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert_eq!(err.code, Some(-1728));

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 1);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Todo {
    name: String,
    count: i64,
}

#[tokio::test]
async fn test_run_typed() {
    let exec = executor([
        Reply::ok(&rows(&[&["Buy milk", "true", "2"]])),
        Reply::ok(&rows(&[&["Buy milk", "true", "many"]])),
    ]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("list_todos", PayloadKind::Rows)
        .body("return {}")
        .output_schema(todo_row_schema())
        .build()
        .unwrap();

    let todos: Vec<Todo> = pipeline
        .run_typed(&op, Value::Null, RunOptions::new())
        .await
        .unwrap();
    assert_eq!(
        todos,
        vec![Todo {
            name: "Buy milk".to_string(),
            count: 2
        }]
    );

    let err = pipeline
        .run_typed::<Vec<Todo>>(&op, Value::Null, RunOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputValidation);
    assert_eq!(err.target_key, "Things3");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_cancels_queued_calls() {
    let exec = executor([
        Reply::ok("first").after(Duration::from_millis(200)),
        Reply::ok("second"),
    ]);
    let pipeline = Arc::new(pipeline(&exec));
    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();

    let first = tokio::spawn({
        let (pipeline, op) = (pipeline.clone(), op.clone());
        async move { pipeline.run(&op, Value::Null, RunOptions::new()).await }
    });
    while exec.call_count() < 1 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let second = tokio::spawn({
        let (pipeline, op) = (pipeline.clone(), op.clone());
        async move { pipeline.run(&op, Value::Null, RunOptions::new()).await }
    });
    while pipeline
        .registry()
        .get("Things3")
        .is_none_or(|queue| queue.raw_len() == 0)
    {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let cleared = pipeline
        .registry()
        .clear("Things3", Some(Error::unclassified("user cancelled")));
    assert_eq!(cleared, 1);

    assert_eq!(first.await.unwrap().unwrap(), json!("first"));
    let err = second.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.message.contains("user cancelled"));
    assert_eq!(exec.call_count(), 1);
}

struct Explode;

#[async_trait]
impl PipelineStep for Explode {
    fn name(&self) -> &'static str {
        "explode"
    }

    fn priority(&self) -> i32 {
        450
    }

    async fn run(&self, _ctx: &mut CallContext, _env: &PipelineEnv) -> script_relay::Result<()> {
        panic!("step exploded")
    }
}

#[tokio::test]
async fn test_panicking_step_becomes_an_error() {
    let exec = executor([Reply::ok("1")]);
    let pipeline = Pipeline::builder(EngineConfig::for_application("Things3"))
        .executor_ref(exec.clone())
        .step(Explode)
        .build();
    assert_eq!(
        pipeline.step_names(),
        vec![
            "input_validation",
            "script_build",
            "execute",
            "decode",
            "explode",
            "rows_mapping",
            "rows_normalization",
            "output_validation",
        ]
    );

    let op = OperationDef::builder("op", PayloadKind::Scalar)
        .body("return 1")
        .build()
        .unwrap();
    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unclassified);
    assert!(err.message.contains("step exploded"));
    assert_eq!(pipeline.stats().snapshot().failures, 1);
}

#[cfg(feature = "validation")]
#[tokio::test]
async fn test_json_schema_drives_rows() {
    use script_relay::JsonSchema;

    let schema = JsonSchema::new(json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["name", "count"]
        }
    }))
    .unwrap();

    let exec = executor([
        Reply::ok(&rows(&[&["Buy milk", "2", "home, errands"]])),
        Reply::ok(&rows(&[&["Buy milk", "lots", ""]])),
    ]);
    let pipeline = pipeline(&exec);
    let op = OperationDef::builder("list_todos", PayloadKind::Rows)
        .body("return {}")
        .output_schema(schema)
        .build()
        .unwrap();

    assert_eq!(
        pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap(),
        json!([{"name": "Buy milk", "count": 2, "tags": ["home", "errands"]}])
    );

    let err = pipeline.run(&op, Value::Null, RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputValidation);
    assert!(!err.error.issues().is_empty());
}
