//! Run state and the event → effect translation for one streamed response.
//!
//! [`translate`] is pure: it mutates the [`RunState`] and returns the chat
//! side effects the orchestrator has to perform, in order. The caller passes
//! the clock reading so partial-update throttling can be driven by tests.

use crate::agent::{RunEvent, StepKind, ToolCallRequest};
use crate::chat::AiState;
use std::time::{Duration, Instant};

/// Minimum spacing between two partial text updates of one message
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Shown when the provider fails a run without a message
pub const GENERIC_ERROR: &str = "Error generating the message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Streaming,
    AwaitingToolOutputs,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled)
    }
}

/// Something the orchestrator must do in the chat or against the assistant
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Indicator(AiState),
    ClearIndicator,
    /// Throttled snapshot of the text accumulated so far
    PartialText(String),
    /// Authoritative text; never throttled
    FinalText(String),
    RunTools {
        run_id: String,
        tool_calls: Vec<ToolCallRequest>,
    },
}

/// Mutable state of one run, owned by the orchestrator driving it
#[derive(Debug)]
pub struct RunState {
    message_id: String,
    run_id: Option<String>,
    text: String,
    chunk_counter: usize,
    last_flush: Option<Instant>,
    phase: RunPhase,
}

impl RunState {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            run_id: None,
            text: String::new(),
            chunk_counter: 0,
            last_flush: None,
            phase: RunPhase::Idle,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Concatenation of every delta received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunk_counter(&self) -> usize {
        self.chunk_counter
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Tool outputs were submitted and a fresh stream is being consumed
    pub fn resume(&mut self) {
        if self.phase == RunPhase::AwaitingToolOutputs {
            self.phase = RunPhase::Streaming;
        }
    }

    /// Accept a stop request. Only the first request for this message, before
    /// any terminal state, is accepted.
    pub fn accept_stop(&mut self, message_id: &str) -> bool {
        if self.is_done() || message_id != self.message_id {
            return false;
        }
        self.phase = RunPhase::Cancelled;
        true
    }

    /// Fail the run locally, e.g. when the stream goes silent past its bound
    pub fn fail(&mut self, message: Option<String>) -> Vec<Effect> {
        translate(self, RunEvent::RunFailed { message }, Instant::now())
    }
}

/// Apply one stream event to `state` and return the resulting effects
pub fn translate(state: &mut RunState, event: RunEvent, now: Instant) -> Vec<Effect> {
    if state.is_done() {
        return Vec::new();
    }

    match event {
        RunEvent::RunCreated { run_id } => {
            state.run_id = Some(run_id);
            state.phase = RunPhase::Streaming;
            Vec::new()
        }
        RunEvent::MessageDelta { text } => {
            state.phase = RunPhase::Streaming;
            state.text.push_str(&text);
            state.chunk_counter += 1;

            let due = state
                .last_flush
                .map_or(true, |last| now.saturating_duration_since(last) >= FLUSH_INTERVAL);
            if due {
                state.last_flush = Some(now);
                vec![Effect::PartialText(state.text.clone())]
            } else {
                Vec::new()
            }
        }
        RunEvent::RunStepCreated { kind } => {
            state.phase = RunPhase::Streaming;
            match kind {
                StepKind::MessageCreation => vec![Effect::Indicator(AiState::Generating)],
                _ => Vec::new(),
            }
        }
        RunEvent::RequiresAction { run_id, tool_calls } => {
            let run_id = state.run_id.get_or_insert(run_id).clone();
            state.phase = RunPhase::AwaitingToolOutputs;
            vec![
                Effect::Indicator(AiState::ExternalSources),
                Effect::RunTools { run_id, tool_calls },
            ]
        }
        RunEvent::MessageCompleted { text } => {
            state.phase = RunPhase::Completed;
            let text = text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| state.text.clone());
            vec![Effect::FinalText(text), Effect::ClearIndicator]
        }
        RunEvent::RunFailed { message } => {
            state.phase = RunPhase::Failed;
            let message = message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_ERROR.to_string());
            vec![Effect::Indicator(AiState::Error), Effect::FinalText(message)]
        }
        RunEvent::Other(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> RunEvent {
        RunEvent::MessageDelta {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_run_created_records_id() {
        let mut state = RunState::new("m1");
        assert_eq!(state.phase(), RunPhase::Idle);

        let effects = translate(
            &mut state,
            RunEvent::RunCreated {
                run_id: "run_1".to_string(),
            },
            Instant::now(),
        );
        assert!(effects.is_empty());
        assert_eq!(state.run_id(), Some("run_1"));
        assert_eq!(state.phase(), RunPhase::Streaming);
    }

    #[test]
    fn test_deltas_one_ms_apart_flush_once() {
        let mut state = RunState::new("m1");
        let t0 = Instant::now();
        let mut partials = Vec::new();

        for (i, fragment) in ["Hel", "lo ", "world"].iter().enumerate() {
            let now = t0 + Duration::from_millis(i as u64);
            partials.extend(translate(&mut state, delta(fragment), now));
        }

        assert_eq!(partials, vec![Effect::PartialText("Hel".to_string())]);
        assert_eq!(state.text(), "Hello world");
        assert_eq!(state.chunk_counter(), 3);

        let done = translate(&mut state, RunEvent::MessageCompleted { text: None }, t0 + Duration::from_millis(3));
        assert_eq!(
            done,
            vec![Effect::FinalText("Hello world".to_string()), Effect::ClearIndicator]
        );
    }

    #[test]
    fn test_flush_throttled_to_one_per_interval() {
        let mut state = RunState::new("m1");
        let t0 = Instant::now();
        let mut flush_times = Vec::new();

        // 30 deltas, 100ms apart
        for i in 0..30u64 {
            let now = t0 + Duration::from_millis(i * 100);
            if !translate(&mut state, delta("x"), now).is_empty() {
                flush_times.push(i * 100);
            }
        }

        assert_eq!(flush_times, vec![0, 1000, 2000]);
        assert_eq!(state.text(), "x".repeat(30));
        for pair in flush_times.windows(2) {
            assert!(pair[1] - pair[0] >= 1000);
        }
    }

    #[test]
    fn test_buffer_is_concatenation_regardless_of_timing() {
        let fragments = ["a", "", "bc", " ", "déf", "\n", "g"];
        let gaps = [0u64, 5, 1200, 3, 999, 1001, 0];
        let mut state = RunState::new("m1");
        let mut now = Instant::now();

        for (fragment, gap) in fragments.iter().zip(gaps) {
            now += Duration::from_millis(gap);
            translate(&mut state, delta(fragment), now);
        }

        assert_eq!(state.text(), fragments.concat());
        assert_eq!(state.chunk_counter(), fragments.len());
    }

    #[test]
    fn test_message_step_sets_generating() {
        let mut state = RunState::new("m1");
        let now = Instant::now();
        assert_eq!(
            translate(
                &mut state,
                RunEvent::RunStepCreated {
                    kind: StepKind::MessageCreation
                },
                now
            ),
            vec![Effect::Indicator(AiState::Generating)]
        );
        assert!(translate(
            &mut state,
            RunEvent::RunStepCreated {
                kind: StepKind::ToolCalls
            },
            now
        )
        .is_empty());
    }

    #[test]
    fn test_requires_action_pauses_for_tools() {
        let mut state = RunState::new("m1");
        let calls = vec![ToolCallRequest {
            id: "call_1".to_string(),
            function_name: "web_search".to_string(),
            arguments: r#"{"query":"weather today"}"#.to_string(),
        }];

        let effects = translate(
            &mut state,
            RunEvent::RequiresAction {
                run_id: "run_9".to_string(),
                tool_calls: calls.clone(),
            },
            Instant::now(),
        );

        assert_eq!(
            effects,
            vec![
                Effect::Indicator(AiState::ExternalSources),
                Effect::RunTools {
                    run_id: "run_9".to_string(),
                    tool_calls: calls
                },
            ]
        );
        assert_eq!(state.phase(), RunPhase::AwaitingToolOutputs);
        assert_eq!(state.run_id(), Some("run_9"));

        state.resume();
        assert_eq!(state.phase(), RunPhase::Streaming);
    }

    #[test]
    fn test_completed_prefers_event_text() {
        let mut state = RunState::new("m1");
        let now = Instant::now();
        translate(&mut state, delta("stale"), now);

        let effects = translate(
            &mut state,
            RunEvent::MessageCompleted {
                text: Some("authoritative".to_string()),
            },
            now,
        );
        assert_eq!(effects[0], Effect::FinalText("authoritative".to_string()));
        assert_eq!(state.phase(), RunPhase::Completed);
    }

    #[test]
    fn test_run_failed_surfaces_message() {
        let mut state = RunState::new("m1");
        let effects = translate(
            &mut state,
            RunEvent::RunFailed {
                message: Some("rate limited".to_string()),
            },
            Instant::now(),
        );
        assert_eq!(
            effects,
            vec![
                Effect::Indicator(AiState::Error),
                Effect::FinalText("rate limited".to_string())
            ]
        );
        assert_eq!(state.phase(), RunPhase::Failed);

        let mut state = RunState::new("m2");
        let effects = state.fail(None);
        assert_eq!(effects[1], Effect::FinalText(GENERIC_ERROR.to_string()));
    }

    #[test]
    fn test_terminal_state_ignores_everything() {
        let now = Instant::now();
        let late_events = vec![
            delta("late"),
            RunEvent::RunStepCreated {
                kind: StepKind::MessageCreation,
            },
            RunEvent::RunFailed { message: None },
            RunEvent::MessageCompleted { text: None },
            RunEvent::RequiresAction {
                run_id: "run_1".to_string(),
                tool_calls: Vec::new(),
            },
        ];

        for terminal in [
            RunEvent::MessageCompleted { text: None },
            RunEvent::RunFailed { message: None },
        ] {
            let mut state = RunState::new("m1");
            translate(&mut state, terminal, now);
            let phase = state.phase();

            for event in late_events.clone() {
                assert!(translate(&mut state, event, now).is_empty());
            }
            assert!(!state.accept_stop("m1"));
            assert_eq!(state.phase(), phase);
            assert_eq!(state.text(), "");
        }
    }

    #[test]
    fn test_stop_requests() {
        let mut state = RunState::new("m1");
        assert!(!state.accept_stop("other"));
        assert_eq!(state.phase(), RunPhase::Idle);

        assert!(state.accept_stop("m1"));
        assert_eq!(state.phase(), RunPhase::Cancelled);
        assert!(!state.accept_stop("m1"));
        assert!(translate(&mut state, delta("x"), Instant::now()).is_empty());
    }
}
