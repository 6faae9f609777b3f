//! End-to-end scenarios exercising the loops, memory, sub-agents, and
//! cancellation together with scripted providers.

use std::sync::Arc;
use std::time::Duration;

use ironloop_agent::test_helpers::*;
use ironloop_agent::{
    ExploreContextTool, ParallelExecuteTool, ReactLoop, RuntimeController, SubAgentConfig,
    SubAgentSpawner, ToolExecutor,
};
use ironloop_core::{FatalError, Message, Provider, Role, Tool};
use ironloop_memory::{MemoryConfig, MemoryManager, SessionStore};
use tokio_util::sync::CancellationToken;

fn store_at(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("sessions"))
}

fn memory_with(provider: Arc<dyn Provider>, dir: &tempfile::TempDir) -> Arc<MemoryManager> {
    Arc::new(MemoryManager::new(
        provider,
        "mock",
        store_at(dir),
        MemoryConfig::default(),
    ))
}

fn full_executor(provider: Arc<dyn Provider>) -> Arc<ToolExecutor> {
    let spawner = SubAgentSpawner::new(provider, "mock", SubAgentConfig::default());
    let mut registry = ironloop_tools::default_registry();
    registry.register(Arc::new(ExploreContextTool::new(spawner.clone(), 0)));
    registry.register(Arc::new(ParallelExecuteTool::new(spawner.clone(), 0)));
    let registry = Arc::new(registry);
    spawner.set_registry(registry.clone());
    Arc::new(ToolExecutor::new(registry, Duration::from_secs(10)))
}

/// Every assistant turn with N tool calls is immediately followed by
/// exactly N tool turns whose call ids match in declared order.
fn assert_tool_pairing(context: &[Message]) {
    let mut i = 0;
    while i < context.len() {
        let msg = &context[i];
        if msg.has_tool_calls() {
            for (offset, call) in msg.tool_calls.iter().enumerate() {
                let follow = context
                    .get(i + 1 + offset)
                    .unwrap_or_else(|| panic!("missing tool turn for call {}", call.id));
                assert_eq!(follow.role, Role::Tool, "expected tool turn after {}", call.id);
                assert_eq!(
                    follow.tool_call_id.as_deref(),
                    Some(call.id.as_str()),
                    "tool turn order mismatch"
                );
            }
            i += 1 + msg.tool_calls.len();
        } else {
            i += 1;
        }
    }
}

// ── E1: simple arithmetic ─────────────────────────────────────────────────

#[tokio::test]
async fn e1_simple_arithmetic() {
    let provider = SequentialMockProvider::new(vec![
        tool_call_response(
            "",
            vec![make_tool_call(
                "call_calc",
                "calculate",
                r#"{"expression":"123 * 456"}"#,
            )],
        ),
        text_response("56088"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);

    let result = controller
        .run_task("Compute 123 * 456 and return only the number.", false)
        .await
        .unwrap();

    assert_eq!(result, "56088");
    // Two LLM calls: one tool round, one final answer
    assert_eq!(provider.call_count(), 2);

    let context = controller.memory().get_context_for_llm().await;
    assert_tool_pairing(&context);
    let tool_turn = context.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_turn.text(), "56088");
}

// ── E2: unknown tool recovery ─────────────────────────────────────────────

#[tokio::test]
async fn e2_unknown_tool_recovery() {
    let provider = SequentialMockProvider::new(vec![
        tool_call_response("", vec![make_tool_call("call_1", "mytool", "{}")]),
        text_response("I used a different approach instead."),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);

    let result = controller.run_task("use mytool", false).await.unwrap();
    assert!(!result.is_empty());

    let context = controller.memory().get_context_for_llm().await;
    let tool_turn = context.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_turn.text().starts_with("Error:"));
    assert!(tool_turn.text().contains("unknown_tool"));
}

// ── E3: compression trip ──────────────────────────────────────────────────

#[tokio::test]
async fn e3_compression_trip() {
    let provider = SequentialMockProvider::new(vec![text_response("compressed summary of turns")]);
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        enabled: true,
        compression_threshold: 1000,
        short_term_size: 4,
        short_term_min_size: 6, // clamps to 4
        compression_ratio: 0.3,
    };
    let memory = MemoryManager::new(provider.clone(), "mock", store_at(&dir), config);

    // 20 synthetic turns sized so the token threshold crosses on the
    // 20th append: ~51 tokens each, 19 * 51 < 1000 < 20 * 51.
    let body = "x".repeat(160);
    for i in 0..10 {
        memory
            .add_message(Message::user(format!("{body}{i:04}")), None)
            .await;
        memory
            .add_message(Message::assistant(format!("{body}{i:04}")), None)
            .await;
    }

    let stats = memory.stats().await;
    assert_eq!(stats.compression_count, 1);
    assert!(stats.message_count <= 4);

    let context = memory.get_context_for_llm().await;
    assert!(context
        .iter()
        .any(|m| m.text().contains("compressed summary of turns")));
    assert_tool_pairing(&context);
}

// ── E4: resume by prefix ──────────────────────────────────────────────────

#[tokio::test]
async fn e4_resume_by_prefix() {
    let dir = tempfile::tempdir().unwrap();

    // Create two persisted sessions
    let mut ids = Vec::new();
    for task in ["first session task", "second session task"] {
        let provider = SequentialMockProvider::single_text("ok");
        let memory = memory_with(provider.clone(), &dir);
        let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider));
        let controller = RuntimeController::new(memory, react);
        controller.run_task(task, false).await.unwrap();
        ids.push(controller.memory().session_id().await);
    }

    // Unambiguous prefix resolves and reconstructs the right session
    let prefix: String = ids[0].simple().to_string().chars().take(8).collect();
    let provider = SequentialMockProvider::single_text("unused");
    let restored = MemoryManager::from_session(
        &prefix,
        provider,
        "mock",
        store_at(&dir),
        MemoryConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(restored.session_id().await, ids[0]);
    let context = restored.get_context_for_llm().await;
    assert!(context.iter().any(|m| m.text() == "first session task"));

    // An empty prefix matches both sessions: ambiguity is an error
    let provider = SequentialMockProvider::single_text("unused");
    let err = MemoryManager::from_session(
        "",
        provider,
        "mock",
        store_at(&dir),
        MemoryConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ironloop_core::MemoryError::AmbiguousPrefix { .. }
    ));
}

// ── E5: parallel DAG ──────────────────────────────────────────────────────

#[tokio::test]
async fn e5_parallel_dag_with_failure() {
    // A succeeds, B fails, C depends on both and is skipped.
    let provider = SequentialMockProvider::with_script(vec![
        Ok(text_response("A complete")),
        Err(ironloop_core::ProviderError::Network("B lost".into())),
    ]);
    let spawner = SubAgentSpawner::new(
        provider.clone(),
        "mock",
        SubAgentConfig {
            max_parallel: 1, // serial waves keep the script deterministic
            ..SubAgentConfig::default()
        },
    );
    let mut registry = ironloop_tools::default_registry();
    registry.register(Arc::new(ParallelExecuteTool::new(spawner.clone(), 0)));
    let registry = Arc::new(registry);
    spawner.set_registry(registry.clone());

    let tool = ParallelExecuteTool::new(spawner, 0);
    let out = tool
        .execute(
            serde_json::json!({
                "tasks": ["task A", "task B", "task C"],
                "dependencies": {"2": ["0", "1"]}
            }),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(out.contains("## Task 0: task A\nStatus: ok"));
    assert!(out.contains("## Task 1: task B\nStatus: error"));
    assert!(out.contains("## Task 2: task C\nStatus: skipped"));
}

#[tokio::test]
async fn e5_cycle_refused_before_execution() {
    // Provider with no scripted responses: any execution would panic.
    let provider = SequentialMockProvider::new(vec![]);
    let spawner = SubAgentSpawner::new(provider, "mock", SubAgentConfig::default());
    let registry = Arc::new(ironloop_tools::default_registry());
    spawner.set_registry(registry);

    let tool = ParallelExecuteTool::new(spawner, 0);
    let err = tool
        .execute(
            serde_json::json!({
                "tasks": ["a", "b"],
                "dependencies": {"0": ["1"], "1": ["0"]}
            }),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dependency_cycle"));
}

// ── E6: interrupt mid-tool ────────────────────────────────────────────────

#[tokio::test]
async fn e6_interrupt_mid_tool() {
    // The model calls a long-running shell sleep; we trip cancellation
    // while the tool is executing.
    let provider = SequentialMockProvider::new(vec![tool_call_response(
        "",
        vec![make_tool_call("call_sleep", "shell", r#"{"command":"sleep 30"}"#)],
    )]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let start = std::time::Instant::now();
    let err = controller
        .run_task("sleep for a while", false)
        .await
        .unwrap_err();
    assert!(matches!(err, FatalError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(10));

    // The saved session contains no assistant turn with unmatched calls
    let store = store_at(&dir);
    let id = controller.memory().session_id().await;
    let session = store.load(id).await.unwrap();
    assert_tool_pairing(&session.messages);

    // And the next context is well-formed (property 7)
    let context = controller.memory().get_context_for_llm().await;
    assert_tool_pairing(&context);
    assert!(!context.last().map(|m| m.has_tool_calls()).unwrap_or(false));
}

// ── Property: token monotonicity across a run ─────────────────────────────

#[tokio::test]
async fn token_totals_never_decrease() {
    let provider = SequentialMockProvider::new(vec![
        tool_call_response(
            "",
            vec![make_tool_call("c1", "calculate", r#"{"expression":"1+1"}"#)],
        ),
        text_response("2"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);

    let before = controller.memory().stats().await;
    controller.run_task("compute", false).await.unwrap();
    let after = controller.memory().stats().await;

    assert!(after.total_input_tokens >= before.total_input_tokens);
    assert!(after.total_output_tokens >= before.total_output_tokens);
    assert!(after.total_input_tokens > 0);
}

// ── Property: save/load identity ──────────────────────────────────────────

#[tokio::test]
async fn save_load_roundtrip_preserves_session() {
    let provider = SequentialMockProvider::new(vec![
        tool_call_response(
            "working",
            vec![make_tool_call("c1", "calculate", r#"{"expression":"7*6"}"#)],
        ),
        text_response("42"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);
    controller.run_task("what is 7*6", false).await.unwrap();

    let id = controller.memory().session_id().await;
    let store = store_at(&dir);
    let first = store.load(id).await.unwrap();

    // Saving the loaded session again yields the same content
    store.save(&first).await.unwrap();
    let second = store.load(id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(first.messages, second.messages);
    assert_eq!(first.system_messages, second.system_messages);
    assert_eq!(first.stats, second.stats);
}

// ── Explore context through the full loop ─────────────────────────────────

#[tokio::test]
async fn explore_context_through_loop() {
    // Main loop: model calls explore_context with two tasks, then
    // answers. Children each make one provider call.
    let provider = SequentialMockProvider::new(vec![
        tool_call_response(
            "exploring",
            vec![make_tool_call(
                "call_explore",
                "explore_context",
                r#"{"tasks":[{"aspect":"layout","description":"map the tree"},{"aspect":"deps","description":"list deps"}]}"#,
            )],
        ),
        text_response("child finding 1"),
        text_response("child finding 2"),
        text_response("final synthesis"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let memory = memory_with(provider.clone(), &dir);
    let react = ReactLoop::new(provider.clone(), "mock", full_executor(provider.clone()));
    let controller = RuntimeController::new(memory, react);

    let result = controller.run_task("explore the repo", false).await.unwrap();
    assert_eq!(result, "final synthesis");

    let context = controller.memory().get_context_for_llm().await;
    let tool_turn = context.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_turn.text().contains("## layout"));
    assert!(tool_turn.text().contains("## deps"));
    assert_tool_pairing(&context);
}
