//! 引擎端到端场景：规划、执行、备用工具、重规划、取消与并发

use std::sync::Arc;
use std::time::Duration;

use plancraft::config::{AppConfig, SkipPolicy};
use plancraft::core::{EngineBuilder, EngineError, TaskStatus};
use plancraft::llm::MockReasoning;
use plancraft::memory::LedgerEvent;
use plancraft::plan::SubtaskStatus;
use plancraft::react::{EngineEvent, PromptKind};
use plancraft::tools::{mock_registry, MockTool, ToolKind, ToolRegistry};
use tokio_util::sync::CancellationToken;

const BIRTHDAY: &str = "Plan a birthday party for my friend";
const RESEARCH: &str = "Research the history of tea cultivation in China";

fn registry_with(tool: MockTool) -> ToolRegistry {
    let mut registry = mock_registry();
    registry.register(tool);
    registry
}

fn one_subtask_recovery(tool: &str, deps: &[&str]) -> String {
    serde_json::json!({
        "strategy": "alternate",
        "subtasks": [{
            "id": "fix",
            "description": "Rebuild the missing piece",
            "tool": tool,
            "dependencies": deps,
            "success_criteria": "Missing piece exists",
            "deliverable": "Rebuilt piece"
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_birthday_plan_runs_to_success() {
    let model = Arc::new(MockReasoning::new());
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(model.clone())
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(result.status, TaskStatus::Succeeded);
    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.version, 1);
    assert_eq!(plan.subtasks.len(), 5);
    assert!(result
        .results
        .iter()
        .all(|r| r.status == SubtaskStatus::Succeeded && r.attempts == 1 && r.deliverable.is_some()));
    assert_eq!(model.calls(PromptKind::Plan), 3);
    assert_eq!(model.calls(PromptKind::Replan), 0);

    let entries = engine.ledger().entries(&result.task_id).await.unwrap();
    assert!(matches!(entries[0].event, LedgerEvent::TaskCreated { .. }));
    assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
    let candidates = entries.iter().find_map(|e| match &e.event {
        LedgerEvent::CandidatesRecorded {
            candidates,
            selected,
            ..
        } => Some((candidates.len(), *selected)),
        _ => None,
    });
    assert_eq!(candidates, Some((3, Some(1))));
    assert!(!result.memory.is_empty());
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents() {
    let engine = EngineBuilder::new(AppConfig::default()).build();
    let result = engine.run_task(BIRTHDAY).await.unwrap();
    let state = engine.ledger().get(&result.task_id).await.unwrap();
    let finished_at = |id: &str| {
        state
            .history
            .iter()
            .position(|s| s.subtask_id == id)
            .unwrap()
    };
    assert!(finished_at("step-1") < finished_at("step-2"));
    assert!(finished_at("step-2") < finished_at("step-4"));
    assert!(finished_at("step-3") < finished_at("step-5"));
    assert!(finished_at("step-4") < finished_at("step-5"));
}

#[tokio::test]
async fn test_failed_search_falls_back_to_text_generation() {
    let engine = EngineBuilder::new(AppConfig::default())
        .with_registry(registry_with(MockTool::failing(
            ToolKind::SearchInFiles,
            "index unavailable",
        )))
        .build();

    let result = engine.run_task(RESEARCH).await.unwrap();
    assert_eq!(result.status, TaskStatus::Succeeded);
    assert_eq!(result.result("step-3").unwrap().attempts, 2);

    let state = engine.ledger().get(&result.task_id).await.unwrap();
    let steps = state.steps_for("step-3");
    assert_eq!(steps[0].action.tool, ToolKind::SearchInFiles);
    assert!(steps[0].observation.is_error());
    assert_eq!(steps[1].action.tool, ToolKind::GenerateText);
    assert!(steps[1].critique.passed);
}

#[tokio::test]
async fn test_failed_subtask_is_replanned_and_superseded() {
    let model = Arc::new(MockReasoning::new());
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(model.clone())
        .with_registry(registry_with(MockTool::failing(ToolKind::ModifyData, "disk full")))
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(result.status, TaskStatus::Succeeded);
    assert_eq!(model.calls(PromptKind::Replan), 1);

    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.version, 2);
    assert!(!plan.contains("step-4"));
    assert!(plan.get("step-4").is_none());
    assert!(plan.is_superseded("step-4"));
    assert_eq!(plan.superseded.len(), 1);
    assert_eq!(
        plan.get("step-5").unwrap().dependencies,
        vec!["step-3".to_string(), "step-4-r2-2".to_string()]
    );
    assert_eq!(
        plan.get("step-4-r2-1").unwrap().dependencies,
        vec!["step-2".to_string()]
    );

    let failed = result.result("step-4").unwrap();
    assert!(failed.superseded);
    assert_eq!(failed.status, SubtaskStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(result.result("step-4-r2-2").unwrap().status, SubtaskStatus::Succeeded);

    let versions = engine.ledger().plan_versions(&result.task_id).await.unwrap();
    assert_eq!(versions.iter().map(|p| p.version).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_short_input_is_rejected_and_left_pending() {
    let model = Arc::new(MockReasoning::new());
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(model.clone())
        .build();

    let err = engine
        .run_task_with("short", "Hi", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let state = engine.ledger().get("short").await.unwrap();
    assert_eq!(state.status, TaskStatus::Pending);
    assert!(state.plan.is_none());
    assert_eq!(model.calls(PromptKind::Simplify), 0);
    assert_eq!(model.calls(PromptKind::Plan), 0);
}

#[tokio::test]
async fn test_recovery_creating_cycle_fails_task() {
    let model = MockReasoning::new()
        .with_response(PromptKind::Replan, one_subtask_recovery("generate_text", &["step-5"]));
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(Arc::new(model))
        .with_registry(registry_with(MockTool::failing(ToolKind::ModifyData, "disk full")))
        .build();

    let err = engine
        .run_task_with("cyclic", BIRTHDAY, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Invariant(_)));
    let state = engine.ledger().get("cyclic").await.unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert_eq!(state.plan_version, 1);
}

#[tokio::test]
async fn test_abandoned_recovery_skips_dependents() {
    let model = Arc::new(
        MockReasoning::new().with_response(PromptKind::Replan, r#"{"strategy": "abandon"}"#),
    );
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(model.clone())
        .with_registry(registry_with(MockTool::failing(ToolKind::ModifyData, "disk full")))
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(result.status, TaskStatus::PartialSuccess);
    assert_eq!(model.calls(PromptKind::Replan), 1);
    assert_eq!(result.result("step-4").unwrap().status, SubtaskStatus::Failed);
    assert_eq!(result.result("step-5").unwrap().status, SubtaskStatus::Skipped);
    assert_eq!(result.result("step-3").unwrap().status, SubtaskStatus::Succeeded);
    assert_eq!(result.plan.as_ref().unwrap().version, 1);
}

#[tokio::test]
async fn test_replan_budget_is_respected() {
    let model = Arc::new(MockReasoning::new());
    let mut config = AppConfig::default();
    config.engine.max_replans = 0;
    let engine = EngineBuilder::new(config)
        .with_model(model.clone())
        .with_registry(registry_with(MockTool::failing(ToolKind::ModifyData, "disk full")))
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(result.status, TaskStatus::PartialSuccess);
    assert_eq!(model.calls(PromptKind::Replan), 0);
    assert_eq!(result.result("step-5").unwrap().status, SubtaskStatus::Skipped);
}

#[tokio::test]
async fn test_failed_recovery_subtask_is_not_replanned() {
    let model = Arc::new(
        MockReasoning::new().with_response(PromptKind::Replan, one_subtask_recovery("modify_data", &[])),
    );
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(model.clone())
        .with_registry(registry_with(MockTool::failing(ToolKind::ModifyData, "disk full")))
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(model.calls(PromptKind::Replan), 1);
    assert_eq!(result.status, TaskStatus::PartialSuccess);
    assert_eq!(result.result("step-4-r2-1").unwrap().status, SubtaskStatus::Failed);
    assert_eq!(result.result("step-5").unwrap().status, SubtaskStatus::Skipped);
}

#[tokio::test]
async fn test_one_level_skip_lets_grandchildren_run() {
    let mut config = AppConfig::default();
    config.engine.max_replans = 0;
    config.engine.skip_policy = SkipPolicy::OneLevel;
    let engine = EngineBuilder::new(config)
        .with_registry(registry_with(MockTool::failing(ToolKind::GenerateText, "quota")))
        .build();

    // 研究模板：step-1 失败，step-2 被跳过，step-3 的依赖视为满足
    let result = engine.run_task(RESEARCH).await.unwrap();
    assert_eq!(result.result("step-1").unwrap().status, SubtaskStatus::Failed);
    assert_eq!(result.result("step-2").unwrap().status, SubtaskStatus::Skipped);
    assert_eq!(result.result("step-3").unwrap().status, SubtaskStatus::Succeeded);
    assert_eq!(result.status, TaskStatus::PartialSuccess);
}

#[tokio::test]
async fn test_unusable_plans_fail_the_task() {
    let engine = EngineBuilder::new(AppConfig::default())
        .with_model(Arc::new(
            MockReasoning::new().with_response(PromptKind::Plan, "I cannot plan this."),
        ))
        .build();

    let result = engine.run_task(BIRTHDAY).await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.plan.is_none());
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn test_concurrent_tasks_keep_separate_records() {
    let engine = Arc::new(EngineBuilder::new(AppConfig::default()).build());
    let handles: Vec<_> = [BIRTHDAY, RESEARCH, "Organise the quarterly team offsite"]
        .into_iter()
        .map(|task| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_task(task).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, TaskStatus::Succeeded);
        ids.push(result.task_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(engine.ledger().list_tasks().await.len(), 3);
    assert!(engine.list_active().await.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_the_task() {
    let engine = Arc::new(
        EngineBuilder::new(AppConfig::default())
            .with_model(Arc::new(
                MockReasoning::new().with_delay(Duration::from_millis(50)),
            ))
            .build(),
    );
    let token = CancellationToken::new();
    let handle = {
        let engine = engine.clone();
        let token = token.clone();
        tokio::spawn(async move { engine.run_task_with("slow", BIRTHDAY, token).await })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    let active = engine.list_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].task_id, "slow");
    token.cancel();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Cancelled);
    let plan = result.plan.as_ref().unwrap();
    assert!(plan.subtasks.iter().all(|s| s.status.is_terminal()));
    assert!(plan
        .subtasks
        .iter()
        .any(|s| s.status == SubtaskStatus::Skipped));
    assert!(engine.list_active().await.is_empty());
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = EngineBuilder::new(AppConfig::default())
        .with_event_tx(tx)
        .build();
    engine.run_task(BIRTHDAY).await.unwrap();
    drop(engine);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(matches!(events.first(), Some(EngineEvent::TaskStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(EngineEvent::TaskFinished {
            status: TaskStatus::Succeeded,
            ..
        })
    ));
    let finished = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::SubtaskFinished { .. }))
        .count();
    assert_eq!(finished, 5);
}
