//! Execution coordinator — drives one task through the agent runtime.
//!
//! The coordinator subscribes to the session event stream before invoking
//! dispatch, maps every lifecycle event to a progress record as it arrives,
//! and accumulates the response text from assistant messages. Exactly one
//! terminal outcome is produced per task, after all of its progress events.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::error::RuntimeError;
use crate::protocol::{OutputRecord, ProgressKind, TaskOutcome, TaskRequest};
use crate::publish::ResultPublisher;
use crate::runtime::{AgentRuntime, ContentBlock, MessageRole, SessionEvent};

/// Lifecycle phase of a dispatched task.
///
/// An idle worker has no phase: idleness is the empty current-task slot, and
/// the transition into `Dispatched` is the dequeue that leads here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Dispatched,
    Streaming,
    Completed,
    Failed,
    Aborted,
}

/// Bridges one dequeued task to the agent runtime.
pub struct TaskCoordinator {
    runtime: Arc<dyn AgentRuntime>,
    publisher: ResultPublisher,
}

impl TaskCoordinator {
    pub fn new(runtime: Arc<dyn AgentRuntime>, publisher: ResultPublisher) -> Self {
        Self { runtime, publisher }
    }

    /// Execute a task to its terminal outcome.
    ///
    /// The event subscription is dropped on every exit path, which is the
    /// unsubscribe; buffered events are drained first so the caller can
    /// publish the terminal result after all progress.
    pub async fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let task_id = task.id.as_deref();

        // Subscription happens-before invocation: no event can be missed
        // between dispatch and the first emission.
        let mut events = self.runtime.subscribe();
        let mut phase = TaskPhase::Dispatched;
        tracing::debug!(id = task_id.unwrap_or("-"), "Task dispatched");

        let mut response = String::new();
        let mut stream_open = true;

        let dispatch = self.runtime.dispatch(&task.prompt);
        tokio::pin!(dispatch);

        let result = loop {
            tokio::select! {
                result = &mut dispatch => break result,
                event = events.recv(), if stream_open => match event {
                    Ok(event) => {
                        if phase == TaskPhase::Dispatched {
                            phase = TaskPhase::Streaming;
                        }
                        self.handle_event(task_id, event, &mut response).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session event stream lagged");
                    }
                    Err(RecvError::Closed) => stream_open = false,
                },
            }
        };

        // Events emitted just before the dispatch resolved may still be
        // buffered in the receiver; drain them so every progress event for
        // this task precedes its terminal result.
        loop {
            match events.try_recv() {
                Ok(event) => self.handle_event(task_id, event, &mut response).await,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session event stream lagged");
                }
                Err(_) => break,
            }
        }

        let (phase, outcome) = match result {
            Ok(()) => (TaskPhase::Completed, TaskOutcome::Success(response)),
            Err(RuntimeError::Aborted) => (TaskPhase::Aborted, TaskOutcome::Aborted),
            Err(e) => (TaskPhase::Failed, TaskOutcome::Failed(e.to_string())),
        };
        tracing::debug!(id = task_id.unwrap_or("-"), ?phase, "Task reached terminal phase");
        outcome
    }

    /// Map one session event to its progress record, accumulating assistant
    /// text along the way. Non-assistant messages produce no progress event.
    async fn handle_event(&self, task_id: Option<&str>, event: SessionEvent, response: &mut String) {
        let id = task_id.map(str::to_string);
        match event {
            SessionEvent::MessageStart { role } => {
                if role == MessageRole::Assistant {
                    self.publisher
                        .progress(OutputRecord::progress(id, ProgressKind::LlmStart, None))
                        .await;
                }
            }
            SessionEvent::MessageEnd { role, content } => {
                if role != MessageRole::Assistant {
                    return;
                }
                // Sole mechanism for building the response: text blocks of
                // assistant messages, in emission order.
                for block in &content {
                    if let ContentBlock::Text(text) = block {
                        response.push_str(text);
                    }
                }
                self.publisher
                    .progress(OutputRecord::progress(id, ProgressKind::LlmEnd, None))
                    .await;
            }
            SessionEvent::ToolStart { name, args } => {
                self.publisher
                    .progress(OutputRecord::progress(
                        id,
                        ProgressKind::ToolStart,
                        Some(json!({ "tool": name, "args": args })),
                    ))
                    .await;
            }
            SessionEvent::ToolEnd {
                name,
                result,
                is_error,
            } => {
                self.publisher
                    .progress(OutputRecord::progress(
                        id,
                        ProgressKind::ToolEnd,
                        Some(json!({ "tool": name, "result": result, "isError": is_error })),
                    ))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::publish::OutputSink;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{Notify, broadcast};

    struct RecordingSink {
        records: StdMutex<Vec<OutputRecord>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: StdMutex::new(Vec::new()),
            })
        }

        fn records(&self) -> Vec<OutputRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl OutputSink for RecordingSink {
        async fn publish(&self, record: &OutputRecord) -> Result<(), PublishError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Runtime that replays a fixed event script when dispatched.
    struct ScriptedRuntime {
        script: Vec<SessionEvent>,
        outcome: Result<(), RuntimeError>,
        tx: broadcast::Sender<SessionEvent>,
        hold_until_abort: bool,
        aborted: Notify,
    }

    impl ScriptedRuntime {
        fn new(script: Vec<SessionEvent>, outcome: Result<(), RuntimeError>) -> Arc<Self> {
            let (tx, _) = broadcast::channel(64);
            Arc::new(Self {
                script,
                outcome,
                tx,
                hold_until_abort: false,
                aborted: Notify::new(),
            })
        }

        fn held(script: Vec<SessionEvent>) -> Arc<Self> {
            let (tx, _) = broadcast::channel(64);
            Arc::new(Self {
                script,
                outcome: Ok(()),
                tx,
                hold_until_abort: true,
                aborted: Notify::new(),
            })
        }
    }

    #[async_trait::async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn dispatch(&self, _prompt: &str) -> Result<(), RuntimeError> {
            for event in &self.script {
                let _ = self.tx.send(event.clone());
            }
            if self.hold_until_abort {
                self.aborted.notified().await;
                return Err(RuntimeError::Aborted);
            }
            self.outcome.clone()
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            self.tx.subscribe()
        }

        fn abort(&self) {
            self.aborted.notify_one();
        }

        async fn steer(&self, _message: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn reset_session(&self) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn assistant_turn(text: &str) -> Vec<SessionEvent> {
        vec![
            SessionEvent::MessageStart {
                role: MessageRole::Assistant,
            },
            SessionEvent::MessageEnd {
                role: MessageRole::Assistant,
                content: vec![ContentBlock::Text(text.to_string())],
            },
        ]
    }

    fn task(id: &str, prompt: &str) -> TaskRequest {
        TaskRequest {
            id: Some(id.to_string()),
            prompt: prompt.to_string(),
            source: None,
            reset: false,
        }
    }

    fn events_of(records: &[OutputRecord]) -> Vec<ProgressKind> {
        records
            .iter()
            .filter_map(|r| match r {
                OutputRecord::Progress { event, .. } => Some(*event),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn simple_task_streams_and_accumulates() {
        let runtime = ScriptedRuntime::new(assistant_turn("hi"), Ok(()));
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t1", "hello")).await;

        assert_eq!(outcome, TaskOutcome::Success("hi".to_string()));
        let records = sink.records();
        assert_eq!(
            events_of(&records),
            vec![ProgressKind::LlmStart, ProgressKind::LlmEnd]
        );
        for record in &records {
            let json = serde_json::to_value(record).unwrap();
            assert_eq!(json["id"], "t1");
        }
    }

    #[tokio::test]
    async fn tool_events_map_one_to_one() {
        let mut script = vec![
            SessionEvent::MessageStart {
                role: MessageRole::Assistant,
            },
            SessionEvent::ToolStart {
                name: "x".to_string(),
                args: json!({"query": "q"}),
            },
            SessionEvent::ToolEnd {
                name: "x".to_string(),
                result: json!("ok"),
                is_error: false,
            },
        ];
        script.push(SessionEvent::MessageEnd {
            role: MessageRole::Assistant,
            content: vec![ContentBlock::Text("done".to_string())],
        });

        let runtime = ScriptedRuntime::new(script, Ok(()));
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t2", "run tool")).await;

        assert_eq!(outcome, TaskOutcome::Success("done".to_string()));
        let records = sink.records();
        assert_eq!(
            events_of(&records),
            vec![
                ProgressKind::LlmStart,
                ProgressKind::ToolStart,
                ProgressKind::ToolEnd,
                ProgressKind::LlmEnd,
            ]
        );

        let tool_start = serde_json::to_value(&records[1]).unwrap();
        assert_eq!(tool_start["data"]["tool"], "x");
        assert_eq!(tool_start["data"]["args"]["query"], "q");
        let tool_end = serde_json::to_value(&records[2]).unwrap();
        assert_eq!(tool_end["data"]["result"], "ok");
        assert_eq!(tool_end["data"]["isError"], false);
    }

    #[tokio::test]
    async fn non_assistant_messages_produce_nothing() {
        let mut script = vec![
            SessionEvent::MessageStart {
                role: MessageRole::User,
            },
            SessionEvent::MessageEnd {
                role: MessageRole::User,
                content: vec![ContentBlock::Text("never accumulated".to_string())],
            },
            SessionEvent::MessageStart {
                role: MessageRole::System,
            },
            SessionEvent::MessageEnd {
                role: MessageRole::System,
                content: vec![ContentBlock::Text("nor this".to_string())],
            },
        ];
        script.extend(assistant_turn("only this"));

        let runtime = ScriptedRuntime::new(script, Ok(()));
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t3", "hi")).await;

        assert_eq!(outcome, TaskOutcome::Success("only this".to_string()));
        assert_eq!(
            events_of(&sink.records()),
            vec![ProgressKind::LlmStart, ProgressKind::LlmEnd]
        );
    }

    #[tokio::test]
    async fn text_blocks_concatenate_in_order() {
        let script = vec![
            SessionEvent::MessageStart {
                role: MessageRole::Assistant,
            },
            SessionEvent::MessageEnd {
                role: MessageRole::Assistant,
                content: vec![
                    ContentBlock::Text("a".to_string()),
                    ContentBlock::Other(json!({"type": "tool_use"})),
                    ContentBlock::Text("b".to_string()),
                ],
            },
            SessionEvent::MessageStart {
                role: MessageRole::Assistant,
            },
            SessionEvent::MessageEnd {
                role: MessageRole::Assistant,
                content: vec![ContentBlock::Text("c".to_string())],
            },
        ];

        let runtime = ScriptedRuntime::new(script, Ok(()));
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t4", "hi")).await;
        assert_eq!(outcome, TaskOutcome::Success("abc".to_string()));
    }

    #[tokio::test]
    async fn abort_yields_aborted_outcome() {
        let runtime = ScriptedRuntime::held(vec![SessionEvent::MessageStart {
            role: MessageRole::Assistant,
        }]);
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime.clone(), ResultPublisher::new(sink.clone()));

        let request = task("t5", "long running");
        let handle = tokio::spawn(async move { coordinator.execute(&request).await });

        // Let the dispatch start streaming, then abort it.
        tokio::task::yield_now().await;
        runtime.abort();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, TaskOutcome::Aborted);
        assert_eq!(events_of(&sink.records()), vec![ProgressKind::LlmStart]);
    }

    #[tokio::test]
    async fn failure_yields_raw_description() {
        let runtime = ScriptedRuntime::new(
            Vec::new(),
            Err(RuntimeError::Session("model unavailable".to_string())),
        );
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t6", "hi")).await;
        match outcome {
            TaskOutcome::Failed(message) => assert!(message.contains("model unavailable")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn progress_precedes_terminal_even_when_events_race_completion() {
        // The script is emitted synchronously inside dispatch, so every event
        // is still buffered when the dispatch future resolves. The drain pass
        // must deliver them all before execute returns.
        let runtime = ScriptedRuntime::new(assistant_turn("hi"), Ok(()));
        let sink = RecordingSink::new();
        let coordinator =
            TaskCoordinator::new(runtime, ResultPublisher::new(sink.clone()));

        let outcome = coordinator.execute(&task("t7", "hello")).await;
        assert_eq!(outcome, TaskOutcome::Success("hi".to_string()));
        assert_eq!(sink.records().len(), 2);
    }
}
