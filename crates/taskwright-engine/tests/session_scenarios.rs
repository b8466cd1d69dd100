//! End-to-end Session Loop scenarios against a real local MCP server and a
//! scripted LLM provider, covering the concrete trajectories named for the
//! orchestrator's testable properties.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use support::{done, scenario_catalog, start_mock_mcp_server, text, MockReply, ScriptedProvider};

use taskwright_core::config::{BudgetConfig, McpConfig};
use taskwright_core::types::{StepKind, TaskSpec, TaskType, TerminationReason};
use taskwright_engine::{Executor, SessionRunner};
use taskwright_llm::LlmProvider;
use taskwright_mcp::McpClientPool;
use tokio_util::sync::CancellationToken;

fn task(description: &str, max_steps: u32) -> TaskSpec {
    TaskSpec {
        task_id: "scenario".into(),
        description: description.into(),
        task_type: TaskType::Code,
        max_steps,
        max_tokens: None,
        timeout_s: 30,
        context: HashMap::new(),
    }
}

async fn executor_for(server_urls: &[(&str, String)]) -> Arc<Executor> {
    let mut servers = HashMap::new();
    for (name, url) in server_urls {
        servers.insert(name.to_string(), url.clone());
    }
    let config = McpConfig { servers, per_call_timeout_s: 10, ..McpConfig::default() };
    let pool = Arc::new(McpClientPool::new(config.clone()));
    Arc::new(Executor::new(pool, config))
}

#[tokio::test]
async fn s1_single_call_success() {
    let mcp_url = start_mock_mcp_server(vec![MockReply::ok(serde_json::json!("hello"))]).await;
    let executor = executor_for(&[("microsandbox", mcp_url)]).await;

    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
        vec![
            text("<think>trivial</think><microsandbox><execute_python>print('hello')</execute_python></microsandbox><execute_tools />"),
            done(),
        ],
        vec![text("<answer>hello</answer>"), done()],
    ]));

    let runner = SessionRunner::new(
        task("Print hello", 10),
        scenario_catalog(),
        executor,
        llm,
        "test-model".to_string(),
        BudgetConfig::default(),
    );
    let outcome = runner.run(CancellationToken::new()).await;

    assert!(outcome.result.success);
    assert_eq!(outcome.result.termination_reason, TerminationReason::Answer);
    assert_eq!(outcome.result.final_answer.as_deref(), Some("hello"));
    assert!(outcome.raw_transcript.contains("<result index=\"0\">hello</result>"));

    let kinds: Vec<StepKind> = outcome.result.steps.iter().map(|s| s.kind).collect();
    assert!(kinds.contains(&StepKind::Thought));
    assert!(kinds.contains(&StepKind::ToolCall));
    assert!(kinds.contains(&StepKind::Observation));
    assert!(kinds.contains(&StepKind::Answer));
}

#[tokio::test]
async fn s2_parallel_with_failing_child() {
    let deepsearch_url = start_mock_mcp_server(vec![MockReply::ok(serde_json::json!("sunny"))]).await;
    let microsandbox_url = start_mock_mcp_server(vec![MockReply::err("division by zero")]).await;
    let executor = executor_for(&[("microsandbox", microsandbox_url), ("deepsearch", deepsearch_url)]).await;

    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
        vec![
            text(
                "<parallel><deepsearch><research>weather</research></deepsearch>\
                 <microsandbox><execute_python>1/0</execute_python></microsandbox></parallel>\
                 <execute_tools />",
            ),
            done(),
        ],
        vec![text("<answer>search ok, code failed</answer>"), done()],
    ]));

    let runner = SessionRunner::new(
        task("check weather and compute", 10),
        scenario_catalog(),
        executor,
        llm,
        "test-model".to_string(),
        BudgetConfig::default(),
    );
    let outcome = runner.run(CancellationToken::new()).await;

    assert!(outcome.result.success);
    let observation = outcome
        .result
        .steps
        .iter()
        .find_map(|s| match &s.payload {
            taskwright_core::types::StepPayload::Observation { results } => Some(results.clone()),
            _ => None,
        })
        .expect("an observation step");
    assert_eq!(observation.len(), 2);
    assert!(observation[0].is_success());
    assert!(!observation[1].is_success());
}

#[tokio::test]
async fn s3_sequential_with_placeholder() {
    let deepsearch_url = start_mock_mcp_server(vec![MockReply::ok(serde_json::json!("82"))]).await;
    let microsandbox_url = start_mock_mcp_server(vec![MockReply::ok(serde_json::json!("92"))]).await;
    let executor = executor_for(&[("microsandbox", microsandbox_url), ("deepsearch", deepsearch_url)]).await;

    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
        vec![
            text(
                "<sequential><deepsearch><research>age</research></deepsearch>\
                 <microsandbox><execute_python>age = {results[0]}; print(int(age)+10)</execute_python></microsandbox>\
                 </sequential><execute_tools />",
            ),
            done(),
        ],
        vec![text("<answer>92</answer>"), done()],
    ]));

    let runner = SessionRunner::new(
        task("compute age plus ten", 10),
        scenario_catalog(),
        executor,
        llm,
        "test-model".to_string(),
        BudgetConfig::default(),
    );
    let outcome = runner.run(CancellationToken::new()).await;

    assert!(outcome.result.success);
    let observation = outcome
        .result
        .steps
        .iter()
        .find_map(|s| match &s.payload {
            taskwright_core::types::StepPayload::Observation { results } => Some(results.clone()),
            _ => None,
        })
        .expect("an observation step");
    assert_eq!(observation[1].content, "92");
}

#[tokio::test]
async fn s4_loop_detection_terminates_on_third_repeat() {
    let mcp_url = start_mock_mcp_server(vec![
        MockReply::ok(serde_json::json!("ok")),
        MockReply::ok(serde_json::json!("ok")),
    ])
    .await;
    let executor = executor_for(&[("microsandbox", mcp_url)]).await;

    let same_call =
        "<microsandbox><execute_python>while True: pass</execute_python></microsandbox><execute_tools />";
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
        vec![text(same_call), done()],
        vec![text(same_call), done()],
        vec![text(same_call), done()],
    ]));

    let runner = SessionRunner::new(
        task("run forever", 10),
        scenario_catalog(),
        executor,
        llm,
        "test-model".to_string(),
        BudgetConfig::default(),
    );
    let outcome = runner.run(CancellationToken::new()).await;

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.termination_reason, TerminationReason::LoopDetected);

    let tool_call_count = outcome
        .result
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::ToolCall)
        .count();
    let observation_count = outcome
        .result
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::Observation)
        .count();
    assert_eq!(tool_call_count, 2);
    assert_eq!(observation_count, 2);
    assert_eq!(outcome.result.steps.last().unwrap().kind, StepKind::Error);
}

#[tokio::test]
async fn s6_max_steps_exhaustion() {
    let mcp_url = start_mock_mcp_server(vec![
        MockReply::ok(serde_json::json!("1")),
        MockReply::ok(serde_json::json!("2")),
        MockReply::ok(serde_json::json!("3")),
    ])
    .await;
    let executor = executor_for(&[("microsandbox", mcp_url)]).await;

    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
        vec![
            text("<microsandbox><execute_python>print(1)</execute_python></microsandbox><execute_tools />"),
            done(),
        ],
        vec![
            text("<microsandbox><execute_python>print(2)</execute_python></microsandbox><execute_tools />"),
            done(),
        ],
        vec![
            text("<microsandbox><execute_python>print(3)</execute_python></microsandbox><execute_tools />"),
            done(),
        ],
    ]));

    let runner = SessionRunner::new(
        task("never finish", 3),
        scenario_catalog(),
        executor,
        llm,
        "test-model".to_string(),
        BudgetConfig::default(),
    );
    let outcome = runner.run(CancellationToken::new()).await;

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.termination_reason, TerminationReason::MaxSteps);
    let last = outcome.result.steps.last().unwrap();
    assert_eq!(last.kind, StepKind::Error);
    match &last.payload {
        taskwright_core::types::StepPayload::Error { reason, .. } => assert_eq!(reason, "max_steps"),
        other => panic!("expected error payload, got {:?}", other),
    }
}
