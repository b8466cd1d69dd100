//! Session Loop (C6): drives one task's LLM conversation to completion —
//! streaming generation, intercepting tool blocks, executing them for
//! real, splicing results back, and evaluating step/token/timeout/loop
//! budgets after every round. The heart of the orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use taskwright_core::catalog::Catalog;
use taskwright_core::config::BudgetConfig;
use taskwright_core::types::{
    ResultStatus, Step, StepKind, StepPayload, TaskSpec, TerminationReason, ToolResult,
    TrajectoryResult, UsageCounters,
};
use taskwright_llm::{ChatMessage, ChatRequest, LlmProvider, StreamDelta};

use crate::block_parser::parse_tool_block;
use crate::error::ParseError;
use crate::executor::Executor;
use crate::fingerprint::{fingerprint_invocation, fingerprint_parse_error, LoopDetector};
use crate::formatter::format_results;
use crate::prompt::{build_system_prompt, build_user_message};
use crate::tokenizer::{TokenEvent, Tokenizer};

/// Drive one task to completion. Owns no shared state: everything it
/// touches (`catalog`, `executor`, `llm`) is handed in by reference/Arc
/// from the Runtime Controller, which owns the process-wide singletons.
pub struct SessionRunner {
    task: TaskSpec,
    catalog: Arc<Catalog>,
    executor: Arc<Executor>,
    llm: Arc<dyn LlmProvider>,
    model: String,
    budgets: BudgetConfig,
}

/// Internal mutable state threaded through one run — mirrors the `Session`
/// entity of §3 (the data-model fields the spec names for Session).
struct SessionState {
    /// The assistant's running transcript: its own prior text/tool-block
    /// output interleaved with our injected result blocks, resent as a
    /// single assistant-role continuation so each new stream call resumes
    /// as if the model never stopped writing.
    running_transcript: String,
    steps: Vec<Step>,
    next_step_id: u64,
    usage: UsageCounters,
    loop_detector: LoopDetector,
}

impl SessionRunner {
    pub fn new(
        task: TaskSpec,
        catalog: Arc<Catalog>,
        executor: Arc<Executor>,
        llm: Arc<dyn LlmProvider>,
        model: String,
        budgets: BudgetConfig,
    ) -> Self {
        Self {
            task,
            catalog,
            executor,
            llm,
            model,
            budgets,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> SessionOutcome {
        let span = tracing::info_span!("session", task_id = %self.task.task_id, task_type = ?self.task.task_type);
        let _entered = span.enter();

        let started_at = Utc::now();
        let deadline = Instant::now() + Duration::from_secs(self.task.timeout_s);

        let system_prompt = build_system_prompt(&self.catalog, self.task.task_type);
        let user_message = build_user_message(&self.task);

        let mut state = SessionState {
            running_transcript: String::new(),
            steps: Vec::new(),
            next_step_id: 0,
            usage: UsageCounters::default(),
            loop_detector: LoopDetector::new(self.budgets.loop_window, self.budgets.loop_repeat_threshold),
        };

        let effective_max_steps = self.task.effective_max_steps();
        let termination;
        let mut final_answer = None;

        'rounds: loop {
            if cancel.is_cancelled() {
                self.push_error_step(&mut state, "cancelled", "session cancelled");
                termination = TerminationReason::Cancelled;
                break 'rounds;
            }
            if Instant::now() >= deadline {
                self.push_error_step(&mut state, "timeout", "wall clock timeout elapsed");
                termination = TerminationReason::Timeout;
                break 'rounds;
            }
            if state.next_step_id >= effective_max_steps as u64 {
                self.push_error_step(&mut state, "max_steps", "step budget exhausted");
                termination = TerminationReason::MaxSteps;
                break 'rounds;
            }
            if let Some(max_tokens) = self.task.max_tokens {
                if state.usage.prompt_tokens + state.usage.completion_tokens > max_tokens {
                    self.push_error_step(&mut state, "max_tokens", "token budget exhausted");
                    termination = TerminationReason::MaxTokens;
                    break 'rounds;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let round_outcome = tokio::time::timeout(
                remaining,
                self.run_one_round(&system_prompt, &user_message, &mut state, cancel.clone()),
            )
            .await;

            let round_result = match round_outcome {
                Ok(r) => r,
                Err(_) => {
                    self.push_error_step(&mut state, "timeout", "wall clock timeout elapsed mid-stream");
                    termination = TerminationReason::Timeout;
                    break 'rounds;
                }
            };

            match round_result {
                RoundOutcome::Answered(text) => {
                    final_answer = Some(text);
                    termination = TerminationReason::Answer;
                    break 'rounds;
                }
                RoundOutcome::Cancelled => {
                    self.push_error_step(&mut state, "cancelled", "session cancelled mid-stream");
                    termination = TerminationReason::Cancelled;
                    break 'rounds;
                }
                RoundOutcome::LoopDetected => {
                    self.push_error_step(&mut state, "loop_detected", "identical tool invocation repeated");
                    termination = TerminationReason::LoopDetected;
                    break 'rounds;
                }
                RoundOutcome::FatalError(msg) => {
                    self.push_error_step(&mut state, "fatal_error", &msg);
                    termination = TerminationReason::FatalError;
                    break 'rounds;
                }
                RoundOutcome::Continue => continue 'rounds,
            }
        }

        let ended_at = Utc::now();
        let total_duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        let success = matches!(termination, TerminationReason::Answer);

        info!(
            task_id = %self.task.task_id,
            ?termination,
            success,
            steps = state.steps.len(),
            "session finished"
        );

        SessionOutcome {
            result: TrajectoryResult {
                task_id: self.task.task_id.clone(),
                success,
                final_answer,
                steps: state.steps,
                started_at,
                ended_at,
                total_duration_ms,
                usage: state.usage,
                termination_reason: termination,
            },
            raw_transcript: state.running_transcript,
        }
    }

    /// Run one LLM stream to its natural conclusion: a tool block closing,
    /// an answer closing, or the stream simply ending. Returns what the
    /// outer loop should do next.
    async fn run_one_round(
        &self,
        system_prompt: &str,
        user_message: &str,
        state: &mut SessionState,
        cancel: CancellationToken,
    ) -> RoundOutcome {
        let mut messages = vec![ChatMessage::user(user_message)];
        if !state.running_transcript.is_empty() {
            messages.push(ChatMessage::assistant(state.running_transcript.clone()));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            system: Some(system_prompt.to_string()),
            messages,
            max_tokens: None,
        };

        let mut stream = match self.llm.stream(request, Some(cancel.clone())).await {
            Ok(s) => s,
            Err(e) => return RoundOutcome::FatalError(format!("llm stream failed to start: {}", e)),
        };

        let mut tokenizer = Tokenizer::new();
        let mut thought_buffer = String::new();
        // Fallback estimate, used only if the provider never reports real
        // usage on `Done` — never added alongside the real count (§4.6).
        let mut estimated_completion_tokens: u64 = 0;

        loop {
            let delta = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RoundOutcome::Cancelled,
                next = futures::StreamExt::next(&mut stream) => next,
            };

            let delta = match delta {
                Some(Ok(d)) => d,
                Some(Err(e)) => return RoundOutcome::FatalError(format!("llm stream error: {}", e)),
                None => {
                    // Stream ended with no terminator: flush any thought
                    // text as its own step and let the outer loop try again
                    // (the step budget bounds this).
                    self.flush_thought(state, &mut thought_buffer);
                    return RoundOutcome::Continue;
                }
            };

            match delta {
                StreamDelta::Text(text) => {
                    let events = match tokenizer.feed(&text) {
                        Ok(events) => events,
                        Err(e) => return RoundOutcome::FatalError(format!("tokenize error: {}", e)),
                    };
                    estimated_completion_tokens += estimate_tokens(&text);
                    for event in events {
                        match self.handle_event(event, state, &mut thought_buffer, &cancel).await {
                            EventOutcome::Continue => {}
                            EventOutcome::RoundDone(outcome) => return outcome,
                        }
                    }
                }
                StreamDelta::Done { usage, .. } => {
                    match usage {
                        Some(u) => {
                            state.usage.prompt_tokens += u.input_tokens;
                            state.usage.completion_tokens += u.output_tokens;
                        }
                        None => state.usage.completion_tokens += estimated_completion_tokens,
                    }
                    self.flush_thought(state, &mut thought_buffer);
                    return RoundOutcome::Continue;
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: TokenEvent,
        state: &mut SessionState,
        thought_buffer: &mut String,
        cancel: &CancellationToken,
    ) -> EventOutcome {
        match event {
            TokenEvent::Text(text) => {
                thought_buffer.push_str(&text);
                state.running_transcript.push_str(&text);
                EventOutcome::Continue
            }
            TokenEvent::AnswerBlock(text) => {
                self.flush_thought(state, thought_buffer);
                state.running_transcript.push_str(&format!("<answer>{}</answer>", text));
                let step_id = self.next_id(state);
                state.steps.push(Step {
                    step_id,
                    kind: StepKind::Answer,
                    started_at: Utc::now(),
                    duration_ms: 0,
                    payload: StepPayload::Answer { text: text.clone() },
                });
                EventOutcome::RoundDone(RoundOutcome::Answered(text))
            }
            TokenEvent::ToolBlockStart(_) => EventOutcome::Continue,
            TokenEvent::ToolBlockEnd(raw_block) => {
                self.flush_thought(state, thought_buffer);
                state.running_transcript.push_str(&raw_block);
                self.handle_tool_block(raw_block, state, cancel).await
            }
            TokenEvent::StreamEnd => EventOutcome::Continue,
        }
    }

    async fn handle_tool_block(
        &self,
        raw_block: String,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> EventOutcome {
        let started = Instant::now();
        let parsed = parse_tool_block(&raw_block, &self.catalog);

        let invocation = match parsed {
            Ok(p) => {
                for warning in &p.warnings {
                    debug!(warning, "tool block warning");
                }
                p.invocation
            }
            Err(e) => {
                let fp = fingerprint_parse_error(&raw_block);
                if state.loop_detector.record_and_check(&fp) {
                    return EventOutcome::RoundDone(RoundOutcome::LoopDetected);
                }
                let hint = parse_error_hint(&e);
                let step_id = self.next_id(state);
                state.steps.push(Step {
                    step_id,
                    kind: StepKind::Error,
                    started_at: Utc::now(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    payload: StepPayload::Error {
                        reason: "parse_error".to_string(),
                        detail: hint.clone(),
                    },
                });
                let synthetic = vec![ToolResult::error(
                    0,
                    ResultStatus::ParseError,
                    format!("parse_error: {}", hint),
                    0,
                )];
                let rendered = format_results(&synthetic);
                state.running_transcript.push_str(&rendered);
                return EventOutcome::Continue;
            }
        };

        let fp = fingerprint_invocation(&invocation);
        if state.loop_detector.record_and_check(&fp) {
            return EventOutcome::RoundDone(RoundOutcome::LoopDetected);
        }

        let step_id = self.next_id(state);
        state.steps.push(Step {
            step_id,
            kind: StepKind::ToolCall,
            started_at: Utc::now(),
            duration_ms: 0,
            payload: StepPayload::ToolCall {
                raw_block: raw_block.clone(),
                invocation: invocation.clone(),
            },
        });

        let results = self.executor.execute(&invocation, cancel.clone()).await;
        state.usage.tool_calls += results.len() as u64;

        let rendered = format_results(&results);
        state.running_transcript.push_str(&rendered);

        state.steps.push(Step {
            step_id,
            kind: StepKind::Observation,
            started_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            payload: StepPayload::Observation { results },
        });

        EventOutcome::Continue
    }

    fn flush_thought(&self, state: &mut SessionState, thought_buffer: &mut String) {
        if thought_buffer.is_empty() {
            return;
        }
        let text = std::mem::take(thought_buffer);
        let step_id = self.next_id(state);
        state.steps.push(Step {
            step_id,
            kind: StepKind::Thought,
            started_at: Utc::now(),
            duration_ms: 0,
            payload: StepPayload::Thought { text },
        });
    }

    fn push_error_step(&self, state: &mut SessionState, reason: &str, detail: &str) {
        let step_id = self.next_id(state);
        state.steps.push(Step {
            step_id,
            kind: StepKind::Error,
            started_at: Utc::now(),
            duration_ms: 0,
            payload: StepPayload::Error {
                reason: reason.to_string(),
                detail: detail.to_string(),
            },
        });
    }

    fn next_id(&self, state: &mut SessionState) -> u64 {
        let id = state.next_step_id;
        state.next_step_id += 1;
        id
    }
}

/// A finished Session's result plus the byte-level transcript the Writer
/// needs for the raw record — `TrajectoryResult` alone doesn't carry it.
pub struct SessionOutcome {
    pub result: TrajectoryResult,
    pub raw_transcript: String,
}

enum RoundOutcome {
    Continue,
    Answered(String),
    Cancelled,
    LoopDetected,
    FatalError(String),
}

enum EventOutcome {
    Continue,
    RoundDone(RoundOutcome),
}

fn parse_error_hint(e: &ParseError) -> String {
    match e {
        ParseError::EmptyBlock => "the tool block was empty; emit a server/action tag before <execute_tools />".to_string(),
        ParseError::UnknownServer(s) => format!("unknown server '{}'; check the tool catalog", s),
        ParseError::UnknownAction(s, a) => format!("unknown action '{}' on server '{}'", a, s),
        ParseError::MissingParameter(p) => format!("missing required parameter '{}'", p),
        ParseError::Malformed(m) => format!("malformed tool block: {}", m),
        ParseError::BadPlaceholder(k, i) => {
            format!("{{results[{}]}} on step {} does not refer to an earlier sibling", k, i)
        }
    }
}

/// Fallback token estimate when a provider doesn't report usage (§4.6).
fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(if text.is_empty() { 0 } else { 1 })
}
