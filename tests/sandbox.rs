mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::FakeContext;
use snipbox::config::SandboxConfig;
use snipbox::console::{ConsoleLevel, ConsoleSink};
use snipbox::sandbox::{
    ErrorKind, ExecutionContext, ExecutionRequest, ExecutionSandbox, SandboxOptions,
};

fn sandbox_with(options: SandboxOptions) -> (Arc<ConsoleSink>, ExecutionSandbox) {
    let sink = Arc::new(ConsoleSink::new(1000, 1000));
    let sandbox = ExecutionSandbox::new(sink.clone(), options);
    (sink, sandbox)
}

fn sandbox() -> (Arc<ConsoleSink>, ExecutionSandbox) {
    sandbox_with(SandboxOptions::default())
}

fn options_with_timeout(ms: u64) -> SandboxOptions {
    SandboxOptions::from(&SandboxConfig {
        timeout_ms: ms,
        ..SandboxConfig::default()
    })
}

async fn wait_until_active(sandbox: &ExecutionSandbox, count: usize) {
    while sandbox.active_count() < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_console_output_is_captured() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new();

    let result = sandbox
        .run(r#"console.log("hi");"#, Some(&context as &dyn ExecutionContext), Some("s1"))
        .await;

    assert!(result.success);
    assert_eq!(result.execution_id, "s1");
    assert!(result.error.is_none());

    let logs: Vec<_> = sink
        .messages()
        .into_iter()
        .filter(|m| m.level == ConsoleLevel::Log)
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].text.contains("hi"));
    assert_eq!(logs[0].snippet_id.as_deref(), Some("s1"));

    assert!(sink
        .messages()
        .iter()
        .any(|m| m.level == ConsoleLevel::Info && m.text.starts_with("Snippet executed successfully")));
    assert_eq!(sink.error_count(), 0);
}

#[tokio::test]
async fn test_return_value_is_reported() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::new();

    let result = sandbox
        .run(r#"return {"answer": 42};"#, Some(&context as &dyn ExecutionContext), None)
        .await;

    assert!(result.success);
    assert_eq!(result.value, Some(serde_json::json!({"answer": 42})));
    assert!(result.execution_id.starts_with("exec-"));
}

#[tokio::test]
async fn test_thrown_error_is_classified_and_logged_once() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new().with_location("https://example.com/");

    let result = sandbox
        .run(
            r#"throw new Error("boom");"#,
            Some(&context as &dyn ExecutionContext),
            Some("s2"),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Runtime));
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.message(), "boom");
    assert_eq!(error.name(), "Error");

    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "boom");
    assert_eq!(errors[0].snippet_id.as_deref(), Some("s2"));
    assert_eq!(errors[0].location.as_deref(), Some("https://example.com/"));
    assert_eq!(errors[0].line, Some(1));
    assert_eq!(errors[0].column, Some(1));

    assert!(sink
        .messages()
        .iter()
        .any(|m| m.level == ConsoleLevel::Error && m.text.contains("boom")));
}

#[tokio::test]
async fn test_type_error_gets_suggestion() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new();

    sandbox
        .run(
            r#"throw new TypeError("Cannot read properties of null (reading 'x')");"#,
            Some(&context as &dyn ExecutionContext),
            Some("s3"),
        )
        .await;

    assert!(sink
        .messages()
        .iter()
        .any(|m| m.level == ConsoleLevel::Info && m.text.starts_with("Suggestion:")));
    assert_eq!(sink.error_statistics().by_category.get("runtime"), Some(&1));
}

#[tokio::test]
async fn test_successful_runs_record_no_errors() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new();

    for i in 0..3 {
        let id = format!("ok-{}", i);
        let result = sandbox
            .run("return 1;", Some(&context as &dyn ExecutionContext), Some(id.as_str()))
            .await;
        assert!(result.success);
    }
    assert_eq!(sink.error_count(), 0);
}

#[tokio::test]
async fn test_timeout_settles_promptly() {
    let (sink, sandbox) = sandbox_with(options_with_timeout(50));
    let context = FakeContext::new();

    let started = Instant::now();
    let result = sandbox
        .run("sleep(10000);", Some(&context as &dyn ExecutionContext), Some("slow"))
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert!(result
        .error
        .as_ref()
        .unwrap()
        .to_string()
        .contains("timed out after 50ms"));
    assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);
    assert_eq!(sandbox.active_count(), 0);
    assert_eq!(sink.error_count(), 1);
}

#[tokio::test]
async fn test_request_options_override_defaults() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::new();
    let options = options_with_timeout(20);

    let request = ExecutionRequest {
        code: "sleep(5000);",
        execution_id: Some("override"),
        snippet_name: Some("Slow one"),
        options: Some(&options),
    };
    let result = sandbox
        .execute(request, Some(&context as &dyn ExecutionContext))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_emergency_stop_aborts_all_running() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    let (a, b, c, stopped) = tokio::join!(
        sandbox.run("sleep(10000);", Some(ctx), Some("a")),
        sandbox.run("sleep(10000);", Some(ctx), Some("b")),
        sandbox.run("sleep(10000);", Some(ctx), Some("c")),
        async {
            wait_until_active(&sandbox, 3).await;
            sandbox.emergency_stop()
        }
    );

    assert_eq!(stopped, 3);
    for result in [&a, &b, &c] {
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Aborted));
        assert!(result.error.as_ref().unwrap().message().contains("emergency stop"));
    }
    assert_eq!(sandbox.active_count(), 0);

    let warnings: Vec<_> = sink
        .messages()
        .into_iter()
        .filter(|m| m.level == ConsoleLevel::Warn)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].text.contains("3"));
}

#[tokio::test]
async fn test_emergency_stop_reaches_runs_sharing_an_id() {
    let (_sink, sandbox) = sandbox_with(options_with_timeout(2000));
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    let started = Instant::now();
    let (first, second, stopped) = tokio::join!(
        sandbox.run("sleep(10000);", Some(ctx), Some("dup")),
        sandbox.run("sleep(10000);", Some(ctx), Some("dup")),
        async {
            wait_until_active(&sandbox, 2).await;
            assert_eq!(sandbox.active_ids(), vec!["dup".to_string()]);
            sandbox.emergency_stop()
        }
    );

    assert_eq!(stopped, 2);
    assert_eq!(first.error_kind(), Some(ErrorKind::Aborted));
    assert_eq!(second.error_kind(), Some(ErrorKind::Aborted));
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(sandbox.active_count(), 0);
}

#[tokio::test]
async fn test_abort_reaches_runs_sharing_an_id() {
    let (_sink, sandbox) = sandbox_with(options_with_timeout(2000));
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    let (first, second, aborted) = tokio::join!(
        sandbox.run("sleep(10000);", Some(ctx), Some("dup")),
        sandbox.run("sleep(10000);", Some(ctx), Some("dup")),
        async {
            wait_until_active(&sandbox, 2).await;
            sandbox.abort("dup")
        }
    );

    assert!(aborted);
    assert_eq!(first.error_kind(), Some(ErrorKind::Aborted));
    assert_eq!(second.error_kind(), Some(ErrorKind::Aborted));
    assert_eq!(sandbox.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runs_can_be_spawned_onto_the_runtime() {
    let sandbox = Arc::new(ExecutionSandbox::new(
        Arc::new(ConsoleSink::default()),
        SandboxOptions::default(),
    ));
    let context = Arc::new(FakeContext::new());

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let sandbox = sandbox.clone();
            let context = context.clone();
            tokio::spawn(async move {
                let code = format!("mutate(1);\nsleep(10);\nreturn {};", i);
                sandbox
                    .run(&code, Some(context.as_ref() as &dyn ExecutionContext), None)
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert!(result.success);
        assert_eq!(result.value, Some(serde_json::json!(i)));
    }
    assert_eq!(sandbox.active_count(), 0);
    assert_eq!(context.document.observer_count(), 0);
}

#[tokio::test]
async fn test_emergency_stop_with_nothing_running() {
    let (_sink, sandbox) = sandbox();
    assert_eq!(sandbox.emergency_stop(), 0);
    assert_eq!(sandbox.active_count(), 0);
}

#[tokio::test]
async fn test_abort_single_execution() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    let (result, aborted) = tokio::join!(
        sandbox.run("sleep(10000);", Some(ctx), Some("target")),
        async {
            wait_until_active(&sandbox, 1).await;
            assert_eq!(sandbox.active_ids(), vec!["target".to_string()]);
            sandbox.abort("target")
        }
    );

    assert!(aborted);
    assert_eq!(result.error_kind(), Some(ErrorKind::Aborted));
    assert!(result.error.unwrap().message().contains("aborted by user"));
    assert!(!sandbox.abort("target"));
    assert!(!sandbox.abort("never-started"));
}

#[tokio::test]
async fn test_active_set_is_restored_after_every_outcome() {
    let (_sink, sandbox) = sandbox_with(options_with_timeout(30));
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    for code in ["return 1;", r#"throw new Error("x");"#, "sleep(1000);", "return (;"] {
        sandbox.run(code, Some(ctx), None).await;
        assert_eq!(sandbox.active_count(), 0, "leaked after {:?}", code);
    }
    sandbox.run("return 1;", None, None).await;
    assert_eq!(sandbox.active_count(), 0);
}

#[tokio::test]
async fn test_invalid_code_is_never_evaluated() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::new();

    let result = sandbox
        .run("return (;", Some(&context as &dyn ExecutionContext), Some("bad"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    assert!(context.evaluated().is_empty());
    assert_eq!(sink.error_count(), 1);

    let result = sandbox
        .run("   ", Some(&context as &dyn ExecutionContext), Some("empty"))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    assert!(context.evaluated().is_empty());
}

#[tokio::test]
async fn test_unreachable_context_fails_without_evaluating() {
    let (sink, sandbox) = sandbox();
    let context = FakeContext::unreachable();

    let result = sandbox
        .run("return 1;", Some(&context as &dyn ExecutionContext), Some("xo"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::UnreachableContext));
    assert_eq!(result.resource_usage.elapsed_ms, 0);
    assert!(context.evaluated().is_empty());
    assert_eq!(sink.error_count(), 1);
}

#[tokio::test]
async fn test_document_mutations_are_counted_and_observer_released() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::new();

    let result = sandbox
        .run("mutate(3);\nmutate(2);", Some(&context as &dyn ExecutionContext), None)
        .await;

    assert!(result.success);
    assert_eq!(result.resource_usage.dom_mutations, 5);
    assert_eq!(context.document.observer_count(), 0);
    assert_eq!(context.document.disconnects(), 1);
}

#[tokio::test]
async fn test_observer_released_on_failure() {
    let (_sink, sandbox) = sandbox_with(options_with_timeout(20));
    let context = FakeContext::new();
    let ctx: &dyn ExecutionContext = &context;

    sandbox.run(r#"throw new Error("x");"#, Some(ctx), None).await;
    sandbox.run("sleep(1000);", Some(ctx), None).await;

    assert_eq!(context.document.observer_count(), 0);
    assert_eq!(context.document.disconnects(), 2);
}

#[tokio::test]
async fn test_memory_soft_limit_warns_without_failing() {
    let options = SandboxOptions::from(&SandboxConfig {
        max_memory_mb: 1,
        ..SandboxConfig::default()
    });
    let (sink, sandbox) = sandbox_with(options);
    let context = FakeContext::new();

    let result = sandbox
        .run("alloc(3145728);", Some(&context as &dyn ExecutionContext), Some("mem"))
        .await;

    assert!(result.success);
    assert_eq!(result.resource_usage.memory_delta, 3 * 1024 * 1024);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("soft limit"));
    assert!(sink
        .messages()
        .iter()
        .any(|m| m.level == ConsoleLevel::Warn && m.text.contains("soft limit")));
}

#[tokio::test]
async fn test_bare_host_reports_zero_usage() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::bare();

    let result = sandbox
        .run("alloc(999999999);\nmutate(4);", Some(&context as &dyn ExecutionContext), None)
        .await;

    assert!(result.success);
    assert_eq!(result.resource_usage.memory_delta, 0);
    assert_eq!(result.resource_usage.dom_mutations, 0);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_capture_disabled_drops_snippet_output() {
    let options = SandboxOptions::from(&SandboxConfig {
        capture_console: false,
        ..SandboxConfig::default()
    });
    let (sink, sandbox) = sandbox_with(options);
    let context = FakeContext::new();

    let result = sandbox
        .run(r#"console.log("quiet");"#, Some(&context as &dyn ExecutionContext), None)
        .await;

    assert!(result.success);
    assert!(!sink.messages().iter().any(|m| m.text.contains("quiet")));
}

#[tokio::test]
async fn test_risky_code_runs_with_warnings() {
    let (_sink, sandbox) = sandbox();
    let context = FakeContext::new();

    let result = sandbox
        .run(
            "// while(true) is only mentioned here\nreturn 1;",
            Some(&context as &dyn ExecutionContext),
            None,
        )
        .await;

    assert!(result.success);
    assert!(!result.warnings.is_empty());
}
