use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::brain::{ChatModel, CompletionRequest, SYSTEM_PROMPT};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::history::ConversationState;
use crate::page::{Capability, Page};
use crate::tools::{self, Tool};
use crate::types::{ActionOutcome, Content, ErrorKind, Message, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    AwaitingInput,
    Deciding,
    Executing,
    Done,
    Failed,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Done | AgentState::Failed)
    }
}

/// Progress notifications for whoever owns the loop.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking,
    Step { number: usize, tool: String, arguments: String },
    StepError { kind: ErrorKind, message: String },
    AwaitingInput { message: String },
    TaskComplete { summary: String },
    TaskFailed { reason: String },
    Fatal { task: Option<String>, message: String },
}

/// Final state of a loop, handed back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReport {
    pub state: AgentState,
    pub task: Option<String>,
    /// Model's closing text for `Done`/`Failed`, or the fatal error.
    pub summary: Option<String>,
    pub steps: usize,
}

/// One agent driving one page through model-chosen tool calls.
///
/// The page is borrowed for the agent's lifetime; opening and closing it
/// belongs to the caller.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    page: Arc<dyn Page>,
    config: AgentConfig,
    history: ConversationState,
    tools: Value,
    state: AgentState,
    task: Option<String>,
    pending: Option<ToolCall>,
    failed_responses: u32,
    task_steps: usize,
    total_steps: usize,
    summary: Option<String>,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, page: Arc<dyn Page>, config: AgentConfig) -> Self {
        let history = ConversationState::new(SYSTEM_PROMPT, config.history);
        Self {
            model,
            page,
            config,
            history,
            tools: tools::tool_schema(),
            state: AgentState::AwaitingInput,
            task: None,
            pending: None,
            failed_responses: 0,
            task_steps: 0,
            total_steps: 0,
            summary: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn history(&self) -> &ConversationState {
        &self.history
    }

    pub fn report(&self) -> AgentReport {
        AgentReport {
            state: self.state,
            task: self.task.clone(),
            summary: self.summary.clone(),
            steps: self.total_steps,
        }
    }

    /// Give the page back once the agent is finished with it.
    pub fn release(self) -> Arc<dyn Page> {
        self.page
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Append new task text and start deciding. Only valid while awaiting input.
    pub async fn submit_task(&mut self, text: impl Into<String>) -> Result<(), AgentError> {
        if self.state != AgentState::AwaitingInput {
            return Err(AgentError::InvalidState("a task can only be submitted while awaiting input"));
        }
        let text = text.into();
        info!(task = %text, "task received");

        let message = if self.config.vision && self.page.supports(Capability::ReadDom) {
            match self.page.screenshot().await {
                Ok(png) => Message::user_content(Content::text_with_image(text.clone(), &png)),
                Err(e) if e.is_fatal() => return Err(self.fail(Some(text), e)),
                Err(e) => {
                    warn!(error = %e, "screenshot for task message failed");
                    Message::user(text.clone())
                }
            }
        } else {
            Message::user(text.clone())
        };

        self.history.push(message);
        self.history.trim();
        self.task = Some(text);
        self.task_steps = 0;
        self.failed_responses = 0;
        self.state = AgentState::Deciding;
        Ok(())
    }

    /// Run one transition. Recoverable problems come back in the outcome;
    /// an error means the loop has moved to `Failed`.
    pub async fn step(&mut self) -> Result<ActionOutcome, AgentError> {
        let outcome = match self.state {
            AgentState::Deciding => self.decide().await,
            AgentState::Executing => self.execute().await,
            AgentState::AwaitingInput => return Err(AgentError::InvalidState("waiting for task input")),
            AgentState::Done | AgentState::Failed => return Err(AgentError::InvalidState("the loop has finished")),
        };
        self.history.trim();
        outcome
    }

    async fn decide(&mut self) -> Result<ActionOutcome, AgentError> {
        if self.task_steps >= self.config.max_steps_per_task {
            let message = format!(
                "I have taken {} steps on this task without finishing it. How should I continue?",
                self.task_steps
            );
            return Ok(self.pause(message));
        }

        self.emit(AgentEvent::Thinking);
        let request = CompletionRequest::new(self.history.messages().to_vec(), self.tools.clone());
        let reply = match self.model.complete(request).await {
            Ok(reply) if !reply.is_empty() => reply,
            Ok(_) => {
                warn!("model returned an empty response");
                return Ok(self.bad_response("the model returned an empty response"));
            }
            Err(e) => {
                warn!(error = %e, "model request failed");
                return Ok(self.bad_response(&format!("the model request failed: {e}")));
            }
        };
        self.failed_responses = 0;

        let text = reply.text().map(str::to_string);
        let mut calls = reply.tool_calls.into_iter();
        if let Some(call) = calls.next() {
            let ignored = calls.count();
            if ignored > 0 {
                warn!(ignored, "model requested several tool calls; only the first runs");
            }
            info!(tool = %call.function.name, arguments = %call.function.arguments, "model chose a tool");
            self.history.push(Message::assistant_tool_call(text, call.clone()));
            self.pending = Some(call);
            self.state = AgentState::Executing;
            return Ok(ActionOutcome::proceed());
        }

        let text = text.unwrap_or_default();
        self.history.push(Message::assistant(text.clone()));
        match completion_signal(&text) {
            Some((AgentState::Done, summary)) => {
                info!(summary = %summary, "task complete");
                self.state = AgentState::Done;
                self.summary = Some(summary.clone());
                self.emit(AgentEvent::TaskComplete { summary });
                Ok(ActionOutcome::finished())
            }
            Some((_, reason)) => {
                info!(reason = %reason, "task failed");
                self.state = AgentState::Failed;
                self.summary = Some(reason.clone());
                self.emit(AgentEvent::TaskFailed { reason });
                Ok(ActionOutcome::finished())
            }
            None => {
                info!("model replied without a tool call; waiting for input");
                self.state = AgentState::AwaitingInput;
                self.emit(AgentEvent::AwaitingInput { message: text });
                Ok(ActionOutcome::awaiting_input())
            }
        }
    }

    fn bad_response(&mut self, reason: &str) -> ActionOutcome {
        self.failed_responses += 1;
        self.emit(AgentEvent::StepError {
            kind: ErrorKind::ModelEmptyResponse,
            message: reason.to_string(),
        });
        if self.failed_responses < self.config.max_failed_responses {
            return ActionOutcome::proceed().with_error(ErrorKind::ModelEmptyResponse);
        }
        let message = format!(
            "I could not get a usable answer after {} attempts ({reason}). Could you clarify or rephrase the task?",
            self.failed_responses
        );
        self.failed_responses = 0;
        self.pause(message).with_error(ErrorKind::ModelEmptyResponse)
    }

    fn pause(&mut self, message: String) -> ActionOutcome {
        self.history.push(Message::assistant(message.clone()));
        self.state = AgentState::AwaitingInput;
        self.emit(AgentEvent::AwaitingInput { message });
        ActionOutcome::awaiting_input()
    }

    async fn execute(&mut self) -> Result<ActionOutcome, AgentError> {
        let Some(call) = self.pending.take() else {
            self.state = AgentState::Deciding;
            return Err(AgentError::InvalidState("no tool call to execute"));
        };
        self.task_steps += 1;
        self.total_steps += 1;
        self.emit(AgentEvent::Step {
            number: self.total_steps,
            tool: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        });

        let output = match Tool::parse(&call.function.name, &call.function.arguments) {
            Ok(tool) => match tools::dispatch(&tool, self.page.as_ref(), &self.config).await {
                Ok(output) => output,
                Err(e) => return Err(self.fail(self.task.clone(), e)),
            },
            Err(e) => tools::ToolOutput {
                text: format!("Error: {e}"),
                error: Some(e.kind()),
            },
        };

        if let Some(kind) = output.error {
            warn!(tool = %call.function.name, ?kind, "tool did not complete");
            self.emit(AgentEvent::StepError {
                kind,
                message: output.text.lines().next().unwrap_or_default().to_string(),
            });
        }
        self.history.push(Message::tool_result(&call, output.text));
        self.state = AgentState::Deciding;

        let outcome = ActionOutcome::proceed();
        Ok(match output.error {
            Some(kind) => outcome.with_error(kind),
            None => outcome,
        })
    }

    fn fail(&mut self, task: Option<String>, source: crate::error::PageError) -> AgentError {
        let err = AgentError::PageClosed {
            task: task.clone(),
            source,
        };
        error!(error = %err, "agent failed");
        self.state = AgentState::Failed;
        self.pending = None;
        self.summary = Some(err.to_string());
        self.emit(AgentEvent::Fatal {
            task,
            message: err.to_string(),
        });
        err
    }

    /// Drive the loop until it finishes, the task channel closes, or
    /// `cancel` fires. Cancellation is honoured only between steps.
    pub async fn run(&mut self, tasks: &mut mpsc::Receiver<String>, cancel: CancellationToken) -> AgentReport {
        loop {
            match self.state {
                AgentState::Done | AgentState::Failed => break,
                AgentState::AwaitingInput => {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        task = tasks.recv() => task,
                    };
                    let Some(task) = next else { break };
                    if self.submit_task(task).await.is_err() {
                        break;
                    }
                }
                AgentState::Deciding | AgentState::Executing => {
                    if cancel.is_cancelled() {
                        info!("agent cancelled");
                        break;
                    }
                    if self.step().await.is_err() && self.state.is_terminal() {
                        break;
                    }
                }
            }
        }
        self.report()
    }
}

/// `TASK COMPLETE` or `TASK FAILED` at the start of the reply, any case.
fn completion_signal(text: &str) -> Option<(AgentState, String)> {
    let trimmed = text.trim_start();
    [("TASK COMPLETE", AgentState::Done), ("TASK FAILED", AgentState::Failed)]
        .into_iter()
        .find(|(marker, _)| trimmed.get(..marker.len()).is_some_and(|head| head.eq_ignore_ascii_case(marker)))
        .map(|(marker, state)| {
            let rest = trimmed[marker.len()..].trim_start_matches([':', '-', '.', ' ', '\t']).trim();
            let summary = if rest.is_empty() { trimmed.trim().to_string() } else { rest.to_string() };
            (state, summary)
        })
}
