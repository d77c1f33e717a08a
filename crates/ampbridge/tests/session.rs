//! End-to-end scenarios for the session controller over the fake module.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;

use std::sync::atomic::Ordering;

use ampbridge::{BridgeError, BufferRole, Session, SessionConfig, TransformModule};
use ampbridge_test::{FakeMemory, FakeModule, ModuleBehavior};

fn small_config() -> SessionConfig {
    SessionConfig {
        max_url_len: 2000,
        max_html_len: 4096,
        max_output_len: 8192,
        min_valid_output_len: 1000,
        call_timeout_secs: None,
    }
}

fn session_with(behavior: ModuleBehavior, config: SessionConfig) -> (Session, Arc<FakeModule>) {
    ampbridge_test::init_tracing();
    let memory = FakeMemory::for_config(&config);
    let module = Arc::new(FakeModule::new(memory, behavior));
    let module_dyn: Arc<dyn TransformModule> = module.clone();
    let session = Session::new(module_dyn, config).unwrap();
    (session, module)
}

#[tokio::test]
async fn end_to_end_echo() {
    let (mut session, module) = session_with(ModuleBehavior::Echo, small_config());
    let (_guard, warnings) = ampbridge_test::capture_warnings();
    let html = format!("<html amp><body>{}</body></html>", "x".repeat(1470));
    assert_eq!(html.len(), 1500);

    let out = session
        .transform("https://example.com/", &html)
        .await
        .unwrap();
    assert_eq!(out, html);
    assert_eq!(module.invocations(), 1);
    assert_eq!(warnings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn short_output_is_returned_despite_the_warning() {
    let answer = "<html amp></html>".to_owned();
    assert!(answer.len() < 1000);
    let (mut session, _) = session_with(ModuleBehavior::Fixed(answer.clone()), small_config());
    let (_guard, warnings) = ampbridge_test::capture_warnings();

    // Below min_valid_output_len: a data-quality warning, not an error.
    let out = session.transform("https://example.com/", "<html>").await.unwrap();
    assert_eq!(out, answer);
    assert!(
        warnings.load(Ordering::SeqCst) >= 1,
        "an implausibly short output must be logged"
    );
}

#[tokio::test]
async fn oversized_html_rejected_before_the_module_is_invoked() {
    let config = SessionConfig {
        max_html_len: 4_000_000,
        max_output_len: 8_000_000,
        ..small_config()
    };
    let (mut session, module) = session_with(ModuleBehavior::Echo, config);

    let html = "x".repeat(5_000_000);
    let err = session.transform("https://example.com/", &html).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InputTooLarge {
            role: BufferRole::HtmlIn,
            len: 5_000_000,
            max: 4_000_000,
        }
    ));
    assert_eq!(module.invocations(), 0);
}

#[tokio::test]
async fn oversized_url_rejected_before_the_module_is_invoked() {
    let (mut session, module) = session_with(ModuleBehavior::Echo, small_config());
    let url = format!("https://example.com/{}", "a".repeat(2000));
    let err = session.transform(&url, "<html>").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InputTooLarge {
            role: BufferRole::UrlIn,
            ..
        }
    ));
    assert_eq!(module.invocations(), 0);
}

#[tokio::test]
async fn views_recover_after_mid_call_memory_growth() {
    let (mut session, module) = session_with(ModuleBehavior::GrowThenEcho, small_config());
    let memory = module.memory();

    let first = session.transform("https://example.com/1", "<html>one</html>").await.unwrap();
    assert_eq!(first, "<html>one</html>");

    // Second call starts against cached views from the previous
    // generation; the module relocates memory again mid-call.
    let second = session.transform("https://example.com/2", "<html>two</html>").await.unwrap();
    assert_eq!(second, "<html>two</html>");

    assert_eq!(memory.generation(), 2);
    for role in [BufferRole::UrlIn, BufferRole::HtmlIn, BufferRole::HtmlOut] {
        assert_eq!(memory.release_violations(role), 0, "role {role}");
    }
}

#[tokio::test]
async fn steady_state_calls_reuse_the_same_views() {
    let (mut session, module) = session_with(ModuleBehavior::Echo, small_config());
    let memory = module.memory();

    for i in 0..100 {
        let html = format!("<html amp><body>doc {i}</body></html>");
        let out = session
            .transform(&format!("https://example.com/{i}"), &html)
            .await
            .unwrap();
        assert_eq!(out, html);
    }

    // No growth happened, so each handle acquired exactly one view for
    // the whole batch.
    for role in [BufferRole::UrlIn, BufferRole::HtmlIn, BufferRole::HtmlOut] {
        assert_eq!(memory.acquire_count(role), 1, "role {role}");
    }
}

#[tokio::test]
async fn corrupted_output_prefix_is_detected() {
    let (mut session, _) = session_with(ModuleBehavior::CorruptOutput, small_config());
    let err = session.transform("https://example.com/", "<html>").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::CorruptedBuffer {
            role: BufferRole::HtmlOut,
            ..
        }
    ));
}

#[tokio::test]
async fn module_failure_aborts_only_the_current_call() {
    let (mut session, _) =
        session_with(ModuleBehavior::Fail("out of memory".to_owned()), small_config());
    let err = session.transform("https://example.com/", "<html>").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::TransformFailed { reason } if reason == "out of memory"
    ));

    // The harness pattern: log, skip the input, keep the session.
    let err = session.transform("https://example.com/next", "<html>").await.unwrap_err();
    assert!(matches!(err, BridgeError::TransformFailed { .. }));
}

#[tokio::test(start_paused = true)]
async fn timeout_poisons_the_session() {
    let config = SessionConfig {
        call_timeout_secs: Some(2),
        ..small_config()
    };
    let (mut session, _) = session_with(ModuleBehavior::Never, config);

    let err = session.transform("https://example.com/", "<html>").await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));

    // The module's state is undefined now; the session refuses reuse.
    let err = session.transform("https://example.com/", "<html>").await.unwrap_err();
    assert!(matches!(err, BridgeError::SessionUnusable));
}

#[tokio::test]
async fn releasing_buffers_hands_every_view_back() {
    let (mut session, module) = session_with(ModuleBehavior::Echo, small_config());
    let memory = module.memory();

    session.transform("https://example.com/", "<html>").await.unwrap();
    session.release_buffers().await;

    for role in [BufferRole::UrlIn, BufferRole::HtmlIn, BufferRole::HtmlOut] {
        assert_eq!(memory.acquire_count(role), memory.release_count(role), "role {role}");
    }
}

#[tokio::test]
async fn independent_sessions_do_not_share_state() {
    ampbridge_test::init_tracing();
    let config = small_config();

    let memory_a = FakeMemory::for_config(&config);
    let module_a = Arc::new(FakeModule::new(memory_a, ModuleBehavior::Echo));
    let mut session_a = Session::new(module_a, config.clone()).unwrap();

    let memory_b = FakeMemory::for_config(&config);
    let module_b = Arc::new(FakeModule::new(
        memory_b,
        ModuleBehavior::Fixed("<html amp>b</html>".to_owned()),
    ));
    let mut session_b = Session::new(module_b, config).unwrap();

    let (a, b) = tokio::join!(
        session_a.transform("https://a.example/", "<html>a</html>"),
        session_b.transform("https://b.example/", "<html>b</html>"),
    );
    assert_eq!(a.unwrap(), "<html>a</html>");
    assert_eq!(b.unwrap(), "<html amp>b</html>");
}
