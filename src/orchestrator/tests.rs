use super::*;
use crate::llm_client::ProposedAction;
use crate::orchestrator::snapshot::SnapshotWindow;
use crate::tools::ToolDef;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Model double that replays a fixed script, then completes with no actions.
struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelTurn, ModelError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
    cancel_on_call: Option<CancellationToken>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    fn new(script: Vec<Result<ModelTurn, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            cancel_on_call: None,
            delay: None,
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn conversation(&self, call: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    async fn invoke(
        &self,
        conversation: &[Message],
        _tools: &[ToolDef],
    ) -> Result<ModelTurn, ModelError> {
        self.seen.lock().unwrap().push(conversation.to_vec());
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ModelTurn::default()))
    }
}

fn actions(calls: Vec<(&str, Value)>) -> Result<ModelTurn, ModelError> {
    Ok(ModelTurn {
        narrative: None,
        actions: calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, args))| ProposedAction::new(format!("call_{}", i), name, args))
            .collect(),
    })
}

fn reply(text: &str) -> Result<ModelTurn, ModelError> {
    Ok(ModelTurn {
        narrative: Some(text.to_string()),
        actions: Vec::new(),
    })
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<ScheduleDatabase>,
    catalog: Arc<ActionCatalog>,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ScheduleDatabase::new(dir.path().join("turn.db")).expect("db"));
        Self {
            _dir: dir,
            store,
            catalog: Arc::new(ActionCatalog::with_builtin_actions().await),
        }
    }

    fn executor(&self, model: Arc<ScriptedModel>, settings: OrchestratorSettings) -> RoundExecutor {
        RoundExecutor::new(model, self.catalog.clone(), self.store.clone(), settings)
    }

    async fn run(
        &self,
        model: Arc<ScriptedModel>,
        settings: OrchestratorSettings,
        message: &str,
    ) -> TurnOutcome {
        let snapshot = ScheduleSnapshot::capture(&self.store, today(), SnapshotWindow::default());
        self.executor(model, settings)
            .process_chat_turn(
                &[ConversationMessage::user(message)],
                &snapshot,
                &CancellationToken::new(),
            )
            .await
            .expect("turn")
    }

    fn task_count(&self) -> usize {
        self.store
            .read(|s| s.custom_tasks_between(today(), today() + chrono::Duration::days(30)))
            .unwrap()
            .len()
    }
}

fn statuses(round: &ExecutionRound) -> Vec<OutcomeStatus> {
    round.actions.iter().map(|o| o.status).collect()
}

#[tokio::test]
async fn create_task_tomorrow_via_calculation() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        actions(vec![(
            "calc_date_offset",
            json!({"base_date": "2026-10-17", "offset_days": 1}),
        )]),
        actions(vec![(
            "create_custom_task",
            json!({"date": "2026-10-18", "name": "X", "time": "9:00"}),
        )]),
        reply("Added X at 09:00 tomorrow."),
    ]));

    let outcome = h
        .run(model.clone(), OrchestratorSettings::default(), "add task X at 09:00 tomorrow")
        .await;

    assert_eq!(outcome.trace.termination_reason, TerminationReason::Completed);
    assert_eq!(outcome.trace.rounds.len(), 2);
    assert_eq!(outcome.reply, "Added X at 09:00 tomorrow.");
    assert_eq!(outcome.modified_entity_ids, vec!["custom_task:1"]);
    assert_eq!(model.calls(), 3);

    let task = h.store.read(|s| s.get_custom_task(1)).unwrap().expect("task");
    assert_eq!(task.date, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
    assert_eq!(task.time, "09:00");
}

#[tokio::test]
async fn date_dependent_actions_wait_for_same_round_calculations() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        actions(vec![
            ("calc_date_offset", json!({"base_date": "2026-10-17", "offset_days": 1})),
            ("create_custom_task", json!({"date": "2026-10-18", "name": "X"})),
        ]),
        actions(vec![("create_custom_task", json!({"date": "2026-10-18", "name": "X"}))]),
    ]));

    let outcome = h.run(model.clone(), OrchestratorSettings::default(), "add X tomorrow").await;

    let rounds = &outcome.trace.rounds;
    assert_eq!(statuses(&rounds[0]), vec![OutcomeStatus::Applied, OutcomeStatus::Deferred]);
    assert_eq!(statuses(&rounds[1]), vec![OutcomeStatus::Applied]);
    assert_eq!(h.task_count(), 1);

    let feedback = model.conversation(1);
    let last = feedback.last().unwrap();
    assert_eq!(last.role, "system");
    let text = last.content.as_deref().unwrap();
    assert!(text.contains("deferred_actions"));
    assert!(text.contains("resolved_dates:\n- calc_date_offset(2026-10-17, +1) => date=2026-10-18"));
}

#[tokio::test]
async fn repeated_query_stops_at_streak_cap() {
    let h = Harness::new().await;
    h.store
        .transaction(|s| s.insert_custom_task(today(), "Haircut", "15:00", ""))
        .unwrap();
    let script = (0..5)
        .map(|_| actions(vec![("get_daily_summary", json!({}))]))
        .collect();
    let model = Arc::new(ScriptedModel::new(script));

    let outcome = h
        .run(model.clone(), OrchestratorSettings::default(), "what's my schedule?")
        .await;

    assert_eq!(outcome.trace.termination_reason, TerminationReason::StreakCap);
    let all: Vec<OutcomeStatus> = outcome.trace.outcomes().map(|o| o.status).collect();
    assert_eq!(
        all,
        vec![
            OutcomeStatus::Applied,
            OutcomeStatus::SkippedDuplicate,
            OutcomeStatus::SkippedDuplicate,
            OutcomeStatus::SkippedStreak,
        ]
    );
    assert_eq!(model.calls(), 4);
    assert!(outcome.reply.starts_with("Summary for 2026-10-17 (Sat)"));
    assert!(outcome.reply.contains("Haircut"));
    assert!(outcome.modified_entity_ids.is_empty());
}

#[tokio::test]
async fn applied_reads_never_exceed_the_streak_cap() {
    let h = Harness::new().await;
    let script = (1..=5)
        .map(|day| {
            actions(vec![(
                "get_day_log",
                json!({ "date": format!("2026-10-{:02}", day) }),
            )])
        })
        .collect();
    let settings = OrchestratorSettings {
        read_streak_cap: 2,
        ..OrchestratorSettings::default()
    };

    let outcome = h.run(Arc::new(ScriptedModel::new(script)), settings, "logs?").await;

    let applied_reads = outcome.trace.outcomes().filter(|o| o.is_applied_read()).count();
    assert_eq!(applied_reads, 2);
    assert_eq!(outcome.trace.rounds.len(), 3);
    assert_eq!(outcome.trace.termination_reason, TerminationReason::StreakCap);
}

#[tokio::test]
async fn delete_then_recreate_in_one_round() {
    let h = Harness::new().await;
    h.store
        .transaction(|s| s.insert_custom_task(today(), "Gym", "18:00", ""))
        .unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        actions(vec![
            ("delete_custom_task", json!({"task_id": 1})),
            ("create_custom_task", json!({"date": "2026-10-17", "name": "Gym", "time": "19:00"})),
        ]),
        reply("Moved the gym to 19:00."),
    ]));

    let outcome = h.run(model, OrchestratorSettings::default(), "move gym to 7pm").await;

    assert_eq!(
        statuses(&outcome.trace.rounds[0]),
        vec![OutcomeStatus::Applied, OutcomeStatus::Applied]
    );
    assert_eq!(outcome.modified_entity_ids, vec!["custom_task:1", "custom_task:2"]);
    assert_eq!(h.task_count(), 1);
}

#[tokio::test]
async fn model_failure_on_round_two_keeps_round_one() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        actions(vec![("create_custom_task", json!({"name": "Call mum", "time": "20:00"}))]),
        Err(ModelError::Status {
            status: 500,
            body: "upstream exploded".to_string(),
        }),
    ]));

    let outcome = h.run(model, OrchestratorSettings::default(), "remind me to call mum").await;

    assert_eq!(outcome.trace.termination_reason, TerminationReason::Error);
    assert_eq!(outcome.trace.rounds.len(), 2);
    assert!(outcome.trace.rounds[1].actions.is_empty());
    assert_eq!(outcome.modified_entity_ids, vec!["custom_task:1"]);
    assert!(outcome.reply.contains("Added task 'Call mum'"));
    assert!(!outcome.reply.contains("upstream exploded"));
    assert_eq!(h.task_count(), 1);
}

#[tokio::test]
async fn model_failure_on_first_round_leaves_no_trace() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Malformed(
        "no choices".to_string(),
    ))]));

    let outcome = h.run(model, OrchestratorSettings::default(), "hello").await;

    assert!(outcome.trace.is_empty());
    assert_eq!(outcome.trace.termination_reason, TerminationReason::Error);
    assert!(!outcome.reply.contains("no choices"));
}

#[tokio::test]
async fn immediate_answer_has_empty_trace() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![reply("<think>easy</think>Hello there!")]));

    let outcome = h.run(model, OrchestratorSettings::default(), "hi").await;

    assert!(outcome.trace.is_empty());
    assert_eq!(outcome.trace.termination_reason, TerminationReason::Completed);
    assert_eq!(outcome.reply, "Hello there!");
    assert!(outcome.modified_entity_ids.is_empty());
}

#[tokio::test]
async fn rounds_are_bounded_by_the_round_cap() {
    let h = Harness::new().await;
    let script = (0..6)
        .map(|i| actions(vec![("create_custom_task", json!({ "name": format!("Task {}", i) }))]))
        .collect();
    let settings = OrchestratorSettings {
        max_rounds: 2,
        ..OrchestratorSettings::default()
    };
    let model = Arc::new(ScriptedModel::new(script));

    let outcome = h.run(model.clone(), settings, "make lots of tasks").await;

    assert_eq!(outcome.trace.termination_reason, TerminationReason::RoundCap);
    assert_eq!(outcome.trace.rounds.len(), 2);
    assert_eq!(model.calls(), 2);
    assert!(outcome.reply.starts_with("Done:"));
    assert!(outcome.reply.contains("stopped after 2 round(s)"));
    assert_eq!(h.task_count(), 2);
}

#[tokio::test]
async fn identical_mutation_is_applied_once() {
    let h = Harness::new().await;
    let create = || actions(vec![("create_custom_task", json!({"name": "Dentist", "time": "15:00"}))]);
    let model = Arc::new(ScriptedModel::new(vec![
        create(),
        actions(vec![("create_custom_task", json!({"name": " Dentist", "time": "15:00"}))]),
    ]));

    let outcome = h.run(model, OrchestratorSettings::default(), "dentist at 3").await;

    let all: Vec<OutcomeStatus> = outcome.trace.outcomes().map(|o| o.status).collect();
    assert_eq!(all, vec![OutcomeStatus::Applied, OutcomeStatus::SkippedDuplicate]);
    assert_eq!(h.task_count(), 1);
}

#[tokio::test]
async fn validation_errors_are_recorded_and_the_loop_continues() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![
        actions(vec![
            ("create_custom_task", json!({"date": "tomorrow", "name": "X"})),
            ("no_such_action", json!({})),
        ]),
        reply("Let me work out the date first."),
    ]));

    let outcome = h.run(model.clone(), OrchestratorSettings::default(), "add X tomorrow").await;

    let round = &outcome.trace.rounds[0];
    assert_eq!(statuses(round), vec![OutcomeStatus::Error, OutcomeStatus::Error]);
    assert!(round.actions[0].message.contains("calc_*"));
    assert_eq!(outcome.trace.termination_reason, TerminationReason::Completed);
    assert_eq!(h.task_count(), 0);

    // Both calls get a tool result so the next request stays well-formed
    let conversation = model.conversation(1);
    let tool_ids: Vec<&str> = conversation
        .iter()
        .filter(|m| m.role == "tool")
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(tool_ids, vec!["call_0", "call_1"]);
}

#[tokio::test]
async fn slow_model_times_out_as_an_error() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel {
        delay: Some(Duration::from_secs(5)),
        ..ScriptedModel::new(vec![reply("too late")])
    });
    let settings = OrchestratorSettings {
        model_timeout: Duration::from_millis(50),
        ..OrchestratorSettings::default()
    };

    let outcome = h.run(model, settings, "hi").await;

    assert_eq!(outcome.trace.termination_reason, TerminationReason::Error);
    assert_ne!(outcome.reply, "too late");
}

#[tokio::test]
async fn cancellation_is_honoured_between_rounds() {
    let h = Harness::new().await;
    let cancel = CancellationToken::new();
    let model = Arc::new(ScriptedModel {
        cancel_on_call: Some(cancel.clone()),
        ..ScriptedModel::new(vec![
            actions(vec![("create_custom_task", json!({"name": "Keep me"}))]),
            reply("never reached"),
        ])
    });
    let snapshot = ScheduleSnapshot::empty(today());

    let outcome = h
        .executor(model.clone(), OrchestratorSettings::default())
        .process_chat_turn(&[ConversationMessage::user("add a task")], &snapshot, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.trace.termination_reason, TerminationReason::Cancelled);
    assert_eq!(outcome.trace.rounds.len(), 1);
    assert_eq!(model.calls(), 1);
    assert_eq!(outcome.modified_entity_ids, vec!["custom_task:1"]);
    assert!(outcome.reply.contains("cancelled"));
}

#[tokio::test]
async fn history_must_end_with_a_user_message() {
    let h = Harness::new().await;
    let executor = h.executor(
        Arc::new(ScriptedModel::new(vec![])),
        OrchestratorSettings::default(),
    );
    let snapshot = ScheduleSnapshot::empty(today());
    let cancel = CancellationToken::new();

    let history = vec![
        ConversationMessage::user("hi"),
        ConversationMessage::assistant("hello", None),
    ];
    assert!(executor
        .process_chat_turn(&history, &snapshot, &cancel)
        .await
        .is_err());
    assert!(executor.process_chat_turn(&[], &snapshot, &cancel).await.is_err());
}

#[tokio::test]
async fn history_is_windowed_and_stripped_of_trace_blocks() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![reply("ok")]));
    let settings = OrchestratorSettings {
        history_window: 3,
        ..OrchestratorSettings::default()
    };
    let traced = codec::encode_trace(
        "Added it.",
        &ExecutionTrace {
            rounds: vec![ExecutionRound {
                round_index: 0,
                actions: Vec::new(),
                model_narrative: None,
            }],
            termination_reason: TerminationReason::Completed,
        },
    );
    let history = vec![
        ConversationMessage::user("oldest"),
        ConversationMessage::assistant("old reply", None),
        ConversationMessage::user("add it"),
        ConversationMessage::assistant(traced, None),
        ConversationMessage::user("thanks"),
    ];

    h.executor(model.clone(), settings)
        .process_chat_turn(&history, &ScheduleSnapshot::empty(today()), &CancellationToken::new())
        .await
        .unwrap();

    let conversation = model.conversation(0);
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation[0].role, "system");
    assert_eq!(conversation[1].content.as_deref(), Some("add it"));
    assert_eq!(conversation[2].content.as_deref(), Some("Added it."));
    assert_eq!(conversation[3].content.as_deref(), Some("thanks"));
}

#[tokio::test]
async fn user_text_that_looks_like_a_trace_block_is_kept() {
    let h = Harness::new().await;
    let model = Arc::new(ScriptedModel::new(vec![reply("ok")]));
    let text = "what does this mean?\n[[EXEC_TRACE_B64:e30=]]";

    h.executor(model.clone(), OrchestratorSettings::default())
        .process_chat_turn(
            &[ConversationMessage::user(text)],
            &ScheduleSnapshot::empty(today()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(model.conversation(0)[1].content.as_deref(), Some(text));
}

#[tokio::test]
async fn identical_scripts_produce_identical_traces() {
    let script = || {
        vec![
            actions(vec![
                ("create_custom_task", json!({"name": "A", "time": "08:00"})),
                ("get_daily_summary", json!({})),
            ]),
            actions(vec![("toggle_custom_task", json!({"task_id": 1}))]),
            reply("Done."),
        ]
    };

    let first = Harness::new().await;
    let a = first
        .run(Arc::new(ScriptedModel::new(script())), OrchestratorSettings::default(), "go")
        .await;
    let second = Harness::new().await;
    let b = second
        .run(Arc::new(ScriptedModel::new(script())), OrchestratorSettings::default(), "go")
        .await;

    assert_eq!(a.trace, b.trace);
    assert_eq!(a.modified_entity_ids, b.modified_entity_ids);
}
