//! Interactive session engine.
//!
//! Drives one user request from prompt to outcome: tool selection, context
//! aggregation, the suggestion loop (confirm, edit, regenerate, explain,
//! decline), execution and the fix loop. In follow-up mode the engine keeps
//! a rolling conversation history and keeps asking for new prompts until
//! the user quits.
//!
//! State transitions are strictly sequential. The only concurrency lives in
//! the leaf operations ([`crate::context::collect`] and the executor).

use crate::backends::BackendConfig;
use crate::context::{self, ContextBundle};
use crate::editor::CommandEditor;
use crate::errors::NlshError;
use crate::executor::{CommandRunner, ExecutionOutcome, ExitKind};
use crate::llm_client::{ChatMessage, ChatRequest, Completion, ImageAttachment, ModelClient, StreamEvent};
use crate::log_sink::{EntryKind, LogEntry, LogSink};
use crate::prompt::{PromptBuilder, strip_markdown};
use crate::selector::{SelectionMode, ToolSelector};
use crate::tools::ToolDescriptor;
use crate::truncate::{estimate_tokens, truncate_middle};
use crate::ui::{FailureChoice, Interaction, StreamSource};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMMAND_MAX_TOKENS: u32 = 500;
const EXPLANATION_MAX_TOKENS: u32 = 1000;
const HISTORY_OUTPUT_CHARS: usize = 1000;

// =============================================================================
// State machine
// =============================================================================

/// The user's answer to a suggested command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    Confirm,
    Edit,
    Regenerate,
    Explain,
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionState {
    Suggested,
    Editing,
    Regenerating,
    Explaining,
    Executing,
    Fixing,
    Done,
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Choice(UserChoice),
    Edited,
    Explained,
    SuggestionReady,
    GenerationFailed,
    CommandSucceeded,
    CommandFailed { fix: bool },
    /// A new prompt in follow-up mode.
    FollowUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: SuggestionState,
    pub event: SessionEvent,
}

impl SuggestionState {
    /// Where each choice leads from `Suggested`. Total over [`UserChoice`].
    pub fn after_choice(choice: UserChoice) -> SuggestionState {
        match choice {
            UserChoice::Confirm => SuggestionState::Executing,
            UserChoice::Edit => SuggestionState::Editing,
            UserChoice::Regenerate => SuggestionState::Regenerating,
            UserChoice::Explain => SuggestionState::Explaining,
            UserChoice::Decline => SuggestionState::Done,
        }
    }

    pub fn next(self, event: SessionEvent) -> Result<SuggestionState, InvalidTransition> {
        use SessionEvent as Ev;
        use SuggestionState::*;

        match (self, event) {
            (Suggested, Ev::Choice(choice)) => Ok(Self::after_choice(choice)),
            (Editing, Ev::Edited) | (Explaining, Ev::Explained) => Ok(Suggested),
            (Regenerating | Fixing, Ev::SuggestionReady) => Ok(Suggested),
            (Regenerating | Fixing, Ev::GenerationFailed) => Ok(Done),
            (Executing, Ev::CommandSucceeded) => Ok(Done),
            (Executing, Ev::CommandFailed { fix: true }) => Ok(Fixing),
            (Executing, Ev::CommandFailed { fix: false }) => Ok(Done),
            (Done, Ev::FollowUp) => Ok(Suggested),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

// =============================================================================
// Request and session data
// =============================================================================

/// Sampling temperature for consecutive regenerations:
/// `min(ceiling, floor + n * step)`, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSchedule {
    pub floor: f64,
    pub step: f64,
    pub ceiling: f64,
}

impl Default for TemperatureSchedule {
    fn default() -> Self {
        Self {
            floor: 0.2,
            step: 0.1,
            ceiling: 1.0,
        }
    }
}

impl TemperatureSchedule {
    pub fn temperature(&self, regenerations: u32) -> f64 {
        let raw = (self.floor + f64::from(regenerations) * self.step).min(self.ceiling);
        (raw * 100.0).round() / 100.0
    }
}

/// The chain of suggestions for one user intent. Reset on every new prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestThread {
    pub intent: String,
    /// Every command the user rejected with `r`, oldest first.
    pub declined: Vec<String>,
    pub regenerations: u32,
}

impl RequestThread {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            declined: Vec::new(),
            regenerations: 0,
        }
    }

    /// Records a rejected suggestion before the next regeneration.
    pub fn reject(&mut self, command: &str) {
        if !self.declined.iter().any(|c| c == command) {
            self.declined.push(command.to_string());
        }
        self.regenerations += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Initial,
    Regeneration,
    Fix,
}

/// One generation attempt and, once run, its result.
#[derive(Debug, Clone)]
pub struct Turn {
    pub kind: TurnKind,
    pub prompt: String,
    pub selected_tools: Vec<String>,
    pub context_bundle: ContextBundle,
    pub request_temperature: f64,
    pub suggested_command: String,
    pub reasoning_text: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the model call failed or returned nothing usable.
    /// `suggested_command` then holds whatever arrived before the failure.
    pub failure: Option<String>,
}

/// Turns of this run plus the conversation history used in follow-up mode.
#[derive(Debug, Clone)]
pub struct Session {
    turns: Vec<Turn>,
    history: Vec<ChatMessage>,
    max_history_tokens: usize,
}

impl Session {
    pub fn new(max_history_tokens: usize) -> Self {
        Self {
            turns: Vec::new(),
            history: Vec::new(),
            max_history_tokens,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    fn last_turn_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    /// Adds a finished request to the history: the prompt, the final command
    /// and an optional note on what happened to it.
    pub fn remember(&mut self, prompt: &str, command: &str, note: Option<String>) {
        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::assistant(command));
        if let Some(note) = note {
            self.history.push(ChatMessage::user(note));
        }
        self.trim();
    }

    pub fn history_tokens(&self) -> usize {
        self.history.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    /// Drops the oldest messages until the history fits the window.
    fn trim(&mut self) {
        let mut dropped = 0;
        while self.history_tokens() > self.max_history_tokens && !self.history.is_empty() {
            self.history.remove(0);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Trimmed {} messages from session history", dropped);
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Resolved settings the engine runs with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub shell: String,
    pub temperatures: TemperatureSchedule,
    pub max_fix_output_chars: usize,
    pub context_window_tokens: usize,
    pub follow_up: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            temperatures: TemperatureSchedule::default(),
            max_fix_output_chars: 4000,
            context_window_tokens: 4096,
            follow_up: false,
        }
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn ModelClient>,
    pub runner: Arc<dyn CommandRunner>,
    pub editor: Arc<dyn CommandEditor>,
    pub log_sink: Option<Arc<dyn LogSink>>,
}

/// Context gathered once per request and reused by every Turn in it.
struct RequestContext {
    selected_tools: Vec<String>,
    bundle: ContextBundle,
}

/// A model call that ended in an error, with whatever streamed before it.
struct FailedCall {
    error: NlshError,
    partial: Completion,
}

pub struct SessionEngine<I: Interaction> {
    backend: BackendConfig,
    deps: Collaborators,
    selector: ToolSelector,
    tools: Vec<ToolDescriptor>,
    prompts: PromptBuilder,
    settings: SessionSettings,
    image: Option<ImageAttachment>,
    ui: I,
    state: SuggestionState,
    session: Session,
}

impl<I: Interaction> SessionEngine<I> {
    pub fn new(
        backend: BackendConfig,
        deps: Collaborators,
        selector: ToolSelector,
        tools: Vec<ToolDescriptor>,
        settings: SessionSettings,
        ui: I,
    ) -> Self {
        Self {
            prompts: PromptBuilder::new(settings.shell.clone()),
            session: Session::new(settings.context_window_tokens),
            backend,
            deps,
            selector,
            tools,
            settings,
            image: None,
            ui,
            state: SuggestionState::Suggested,
        }
    }

    pub fn with_image(mut self, image: Option<ImageAttachment>) -> Self {
        self.image = image;
        self
    }

    pub fn state(&self) -> SuggestionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ui(&self) -> &I {
        &self.ui
    }

    /// Runs the session for `prompt` and returns the exit code to report.
    ///
    /// # Errors
    ///
    /// `SessionCancelled` on Ctrl-C outside follow-up mode, and any model
    /// failure outside follow-up mode.
    pub async fn run(&mut self, prompt: &str) -> Result<i32, NlshError> {
        let mut prompt = prompt.to_string();
        let mut exit_code = 0;

        loop {
            match self.run_request(&prompt).await {
                Ok(code) => exit_code = code,
                Err(NlshError::SessionCancelled) if self.settings.follow_up => {
                    info!("Follow-up session ended");
                    return Ok(exit_code);
                }
                Err(e) => return Err(e),
            }

            if !self.settings.follow_up {
                return Ok(exit_code);
            }
            match self.ui.next_prompt().await {
                Ok(Some(next)) => prompt = next,
                Ok(None) | Err(NlshError::SessionCancelled) => return Ok(exit_code),
                Err(e) => return Err(e),
            }
        }
    }

    /// Follow-up session started without a prompt: reads the first one
    /// interactively.
    pub async fn run_interactive(&mut self) -> Result<i32, NlshError> {
        match self.ui.next_prompt().await {
            Ok(Some(prompt)) => self.run(&prompt).await,
            Ok(None) | Err(NlshError::SessionCancelled) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// One request thread: from a prompt to `Done`.
    async fn run_request(&mut self, prompt: &str) -> Result<i32, NlshError> {
        let mut thread = RequestThread::new(prompt);
        let context = self.prepare_context(prompt).await?;

        let Some(mut command) = self.suggest_or_ask(&thread, &context, TurnKind::Initial, None).await? else {
            return Ok(1);
        };
        if self.state == SuggestionState::Done {
            self.advance(SessionEvent::FollowUp);
        }
        let mut failure: Option<(String, ExecutionOutcome)> = None;

        loop {
            match self.state {
                SuggestionState::Suggested => {
                    let choice = self.ui.choose(&command).await?;
                    self.advance(SessionEvent::Choice(choice));
                    if choice == UserChoice::Decline {
                        self.ui.notice("Command execution cancelled.");
                        self.remember(prompt, &command, Some("I declined that command.".to_string()));
                    }
                }
                SuggestionState::Editing => {
                    match self.deps.editor.edit(&command).await {
                        Ok(edited) => {
                            if edited != command {
                                info!("Command edited: {}", edited);
                                command = edited;
                                if let Some(turn) = self.session.last_turn_mut() {
                                    turn.suggested_command = command.clone();
                                }
                            }
                        }
                        Err(e @ NlshError::EditorAborted(_)) => {
                            self.ui.notice(&format!("{e}; keeping the current command."));
                        }
                        Err(e) => return Err(e),
                    }
                    self.advance(SessionEvent::Edited);
                }
                SuggestionState::Regenerating => {
                    thread.reject(&command);
                    match self.suggest_or_ask(&thread, &context, TurnKind::Regeneration, None).await {
                        Ok(Some(next)) => {
                            command = next;
                            self.advance(SessionEvent::SuggestionReady);
                        }
                        Ok(None) => {
                            self.advance(SessionEvent::GenerationFailed);
                            return Ok(1);
                        }
                        Err(e) => {
                            self.advance(SessionEvent::GenerationFailed);
                            return Err(e);
                        }
                    }
                }
                SuggestionState::Explaining => {
                    match self.explain(&command, &context.bundle).await {
                        Ok(()) => {}
                        Err(NlshError::SessionCancelled) => return Err(NlshError::SessionCancelled),
                        Err(e) => self.ui.error(&format!("Could not explain the command: {e}")),
                    }
                    self.advance(SessionEvent::Explained);
                }
                SuggestionState::Executing => {
                    let outcome = match self.deps.runner.run(&command).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            self.ui.error(&format!("Failed to run command: {e:#}"));
                            self.advance(SessionEvent::CommandFailed { fix: false });
                            return Ok(1);
                        }
                    };
                    self.record_outcome(&outcome);

                    if outcome.exit.success() {
                        self.advance(SessionEvent::CommandSucceeded);
                        self.remember(prompt, &command, Some(execution_note(&outcome)));
                        return Ok(0);
                    }
                    info!("{}", NlshError::CommandExecutionFailed { exit: outcome.exit });
                    if outcome.exit == ExitKind::Interrupted {
                        self.ui.notice("Command interrupted.");
                        self.advance(SessionEvent::CommandFailed { fix: false });
                        return Ok(outcome.exit.code());
                    }

                    let fix = self.ui.confirm_fix(&command, outcome.exit).await?;
                    self.advance(SessionEvent::CommandFailed { fix });
                    if !fix {
                        self.remember(prompt, &command, Some(execution_note(&outcome)));
                        return Ok(outcome.exit.code());
                    }
                    failure = Some((command.clone(), outcome));
                }
                SuggestionState::Fixing => {
                    let Some((failed, outcome)) = failure.take() else {
                        self.advance(SessionEvent::GenerationFailed);
                        return Ok(1);
                    };
                    let failed_run = Some((failed.as_str(), &outcome));
                    match self.suggest_or_ask(&thread, &context, TurnKind::Fix, failed_run).await {
                        Ok(Some(next)) => {
                            if next == failed {
                                warn!("Fix suggestion repeats the failed command");
                            }
                            command = next;
                            self.advance(SessionEvent::SuggestionReady);
                        }
                        Ok(None) => {
                            self.advance(SessionEvent::GenerationFailed);
                            return Ok(outcome.exit.code());
                        }
                        Err(e) => {
                            self.advance(SessionEvent::GenerationFailed);
                            return Err(e);
                        }
                    }
                }
                SuggestionState::Done => return Ok(0),
            }
        }
    }

    fn advance(&mut self, event: SessionEvent) {
        match self.state.next(event) {
            Ok(next) => {
                debug!("Session state {:?} -> {:?}", self.state, next);
                self.state = next;
            }
            Err(e) => {
                warn!("{}", e);
                self.state = SuggestionState::Done;
            }
        }
    }

    /// Selects tools and gathers their context. Ctrl-C cancels.
    async fn prepare_context(&mut self, prompt: &str) -> Result<RequestContext, NlshError> {
        let selector = &self.selector;
        let tools = &self.tools;
        let backend = &self.backend;
        let ui = &mut self.ui;
        let preflight = selector.mode() == SelectionMode::Preflight;

        let work = async move {
            if preflight {
                ui.started(StreamSource::ToolSelection);
            }
            let selection = selector
                .select(prompt, tools, backend, |fragment| {
                    ui.reasoning(StreamSource::ToolSelection, fragment)
                })
                .await;
            if preflight {
                ui.finished(StreamSource::ToolSelection);
            }
            let report = context::collect(&selection.tools).await;
            (selection, report)
        };
        let (selection, report) = tokio::select! {
            done = work => done,
            _ = tokio::signal::ctrl_c() => {
                self.ui.finished(StreamSource::ToolSelection);
                return Err(NlshError::SessionCancelled);
            }
        };

        let selected_tools: Vec<String> = selection.names().iter().map(|n| n.to_string()).collect();
        if let Some(exchange) = &selection.preflight {
            self.log(EntryKind::Preflight, prompt, &exchange.system_prompt, &ContextBundle::default(), &exchange.response);
        }
        if preflight {
            if selected_tools.is_empty() {
                self.ui.notice("No tools selected");
            } else {
                self.ui.notice(&format!("Selected tools: {}", selected_tools.join(", ")));
            }
        }
        info!(
            "Context gathered from {} tool(s), {} degraded",
            report.bundle.len(),
            report.degraded.len()
        );

        Ok(RequestContext {
            selected_tools,
            bundle: report.bundle,
        })
    }

    /// [`Self::suggest`], except that in follow-up mode a failed model call
    /// asks the user how to go on. A retry repeats the same call with the
    /// same thread and context. `None` means the user dropped this request
    /// for a new prompt; quitting ends the session as a cancellation.
    async fn suggest_or_ask(
        &mut self,
        thread: &RequestThread,
        context: &RequestContext,
        kind: TurnKind,
        failure: Option<(&str, &ExecutionOutcome)>,
    ) -> Result<Option<String>, NlshError> {
        loop {
            match self.suggest(thread, context, kind, failure).await {
                Ok(command) => return Ok(Some(command)),
                Err(e @ NlshError::ModelRequestFailed { .. }) if self.settings.follow_up => {
                    self.ui.error(&e.to_string());
                    match self.ui.after_model_failure().await? {
                        FailureChoice::Retry => info!("Retrying {:?} request", kind),
                        FailureChoice::NewPrompt => return Ok(None),
                        FailureChoice::Quit => return Err(NlshError::SessionCancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Asks the model for a command and records the Turn, failed or not.
    async fn suggest(
        &mut self,
        thread: &RequestThread,
        context: &RequestContext,
        kind: TurnKind,
        failure: Option<(&str, &ExecutionOutcome)>,
    ) -> Result<String, NlshError> {
        let (system_prompt, user_prompt, temperature, source, entry_kind) = match failure {
            Some((failed, outcome)) => (
                self.prompts.fix_system_prompt(&context.bundle),
                self.prompts.fix_user_prompt(
                    &thread.intent,
                    failed,
                    &outcome.exit,
                    &outcome.combined_output(),
                    self.settings.max_fix_output_chars,
                ),
                self.settings.temperatures.floor,
                StreamSource::Fix,
                EntryKind::Fix,
            ),
            None => (
                self.prompts.generation_system_prompt(&context.bundle, &thread.declined),
                thread.intent.clone(),
                self.settings.temperatures.temperature(thread.regenerations),
                StreamSource::Generation,
                EntryKind::Generation,
            ),
        };
        info!("Requesting {:?} suggestion at temperature {}", kind, temperature);

        let mut messages = vec![ChatMessage::system(system_prompt.clone())];
        if self.settings.follow_up {
            messages.extend(self.session.history().iter().cloned());
        }
        messages.push(ChatMessage::user(user_prompt.clone()));
        let mut request = ChatRequest::new(messages, temperature).with_image(self.image.clone());
        if !self.backend.reasoning_enabled() {
            request = request.with_max_tokens(COMMAND_MAX_TOKENS);
        }

        let (completion, error) = match self.complete(source, request).await {
            Ok(completion) => (completion, None),
            Err(FailedCall { error: NlshError::SessionCancelled, .. }) => {
                return Err(NlshError::SessionCancelled);
            }
            Err(FailedCall { error, partial }) => (partial, Some(error)),
        };
        self.log(entry_kind, &user_prompt, &system_prompt, &context.bundle, &completion.answer);

        let command = strip_markdown(&completion.answer);
        let error = error.or_else(|| {
            command.is_empty().then(|| NlshError::ModelRequestFailed {
                status: None,
                message: "backend returned an empty command".to_string(),
            })
        });

        self.session.push_turn(Turn {
            kind,
            prompt: thread.intent.clone(),
            selected_tools: context.selected_tools.clone(),
            context_bundle: context.bundle.clone(),
            request_temperature: temperature,
            suggested_command: command.clone(),
            reasoning_text: (!completion.reasoning.is_empty()).then(|| completion.reasoning.clone()),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            failure: error.as_ref().map(|e| e.to_string()),
        });
        match error {
            Some(e) => Err(e),
            None => Ok(command),
        }
    }

    /// Side call that explains `command`. Leaves history and Turns alone.
    async fn explain(&mut self, command: &str, bundle: &ContextBundle) -> Result<(), NlshError> {
        let system_prompt = self.prompts.explanation_system_prompt(bundle);
        let mut request = ChatRequest::new(
            vec![ChatMessage::system(system_prompt.clone()), ChatMessage::user(command)],
            self.settings.temperatures.floor,
        );
        if !self.backend.reasoning_enabled() {
            request = request.with_max_tokens(EXPLANATION_MAX_TOKENS);
        }

        let completion = self
            .complete(StreamSource::Explanation, request)
            .await
            .map_err(|failed| failed.error)?;
        self.log(EntryKind::Explanation, command, &system_prompt, bundle, &completion.answer);
        self.ui.explanation(&completion.answer);
        Ok(())
    }

    /// Streams one model call to completion, handing reasoning and answer
    /// fragments to the UI as they arrive. Ctrl-C drops the stream, which
    /// closes the connection.
    async fn complete(&mut self, source: StreamSource, request: ChatRequest) -> Result<Completion, FailedCall> {
        let client = self.deps.client.clone();
        self.ui.started(source);

        let result = {
            let backend = &self.backend;
            let ui = &mut self.ui;
            let work = async move {
                let mut partial = Completion::default();
                let mut stream = match client.stream(backend, request).await {
                    Ok(stream) => stream,
                    Err(error) => return Err(FailedCall { error, partial }),
                };
                while let Some(event) = stream.next_event().await {
                    match event {
                        StreamEvent::Reasoning(fragment) => {
                            ui.reasoning(source, &fragment);
                            partial.reasoning.push_str(&fragment);
                        }
                        StreamEvent::Answer(fragment) => {
                            ui.answer(source, &fragment);
                            partial.answer.push_str(&fragment);
                        }
                    }
                }
                stream.finish().await.map_err(|error| FailedCall { error, partial })
            };

            tokio::select! {
                result = work => result,
                _ = tokio::signal::ctrl_c() => Err(FailedCall {
                    error: NlshError::SessionCancelled,
                    partial: Completion::default(),
                }),
            }
        };
        self.ui.finished(source);

        if let Err(failed) = &result {
            let partial = failed.partial.answer.trim();
            if !partial.is_empty() {
                self.ui.notice(&format!("Partial response before the failure: {partial}"));
            }
        }
        result
    }

    fn record_outcome(&mut self, outcome: &ExecutionOutcome) {
        if let Some(turn) = self.session.last_turn_mut() {
            turn.exit_code = Some(outcome.exit.code());
            turn.stdout = outcome.stdout.clone();
            turn.stderr = outcome.stderr.clone();
        }
    }

    fn remember(&mut self, prompt: &str, command: &str, note: Option<String>) {
        if self.settings.follow_up {
            self.session.remember(prompt, command, note);
        }
    }

    fn log(&self, kind: EntryKind, prompt: &str, system_prompt: &str, bundle: &ContextBundle, response: &str) {
        let Some(sink) = &self.deps.log_sink else {
            return;
        };
        let entry = LogEntry {
            kind,
            backend: &self.backend,
            prompt,
            system_prompt,
            context: bundle,
            response,
        };
        if let Err(e) = sink.record(&entry) {
            warn!("Failed to write log entry: {:#}", e);
        }
    }
}

/// History note describing how a command ended.
fn execution_note(outcome: &ExecutionOutcome) -> String {
    let output = outcome.combined_output();
    let output = output.trim();
    if output.is_empty() {
        format!("I ran it; it finished with {}.", outcome.exit)
    } else {
        format!(
            "I ran it; it finished with {}. Output:\n{}",
            outcome.exit,
            truncate_middle(output, HISTORY_OUTPUT_CHARS)
        )
    }
}
