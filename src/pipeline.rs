//! Question → SQL → result → summary, as a linear state machine.
//!
//! Every state is visited at most once. Each step yields the next state and
//! at most one event; a failure at any step moves straight to `Failed` and
//! yields the error event. Nothing is retried.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor::{QueryExecutor, TabularResult};
use crate::generation::{SqlGenerator, SummaryGenerator};
use crate::llm::TextGenerator;
use crate::prompt::build_sql_prompt;
use crate::sanitize::sanitize_sql;
use crate::stream::{StreamEmitter, StreamEvent, DONE_PAYLOAD, STATUS_GENERATING};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Buffer between the pipeline task and the transport.
const EVENT_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Start,
    Generating,
    SqlReady { sql: String },
    Executing { result: TabularResult },
    Summarizing,
    Done,
    Failed,
    /// The receiver went away before the request finished.
    Abandoned,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed | PipelineState::Abandoned)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Start => "start",
            PipelineState::Generating => "generating",
            PipelineState::SqlReady { .. } => "sql_ready",
            PipelineState::Executing { .. } => "executing",
            PipelineState::Summarizing => "summarizing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
            PipelineState::Abandoned => "abandoned",
        }
    }
}

/// Result of one step: where to go next and what, if anything, to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: PipelineState,
    pub event: Option<StreamEvent>,
}

impl Transition {
    fn to(next: PipelineState, event: Option<StreamEvent>) -> Self {
        Self { next, event }
    }

    fn fail(err: AgentError) -> Self {
        Self {
            next: PipelineState::Failed,
            event: Some(StreamEvent::Error(format!("Error: {}", err))),
        }
    }
}

/// Drives one request at a time through the stages. Cheap to clone; clones
/// share the model client and configuration.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<AgentConfig>,
    sql_generator: SqlGenerator,
    summary_generator: SummaryGenerator,
    executor: QueryExecutor,
}

impl Pipeline {
    pub fn new(config: Arc<AgentConfig>, llm: Arc<dyn TextGenerator>) -> Self {
        let executor = QueryExecutor::new(config.db_path.clone());
        Self {
            config,
            sql_generator: SqlGenerator::new(llm.clone()),
            summary_generator: SummaryGenerator::new(llm),
            executor,
        }
    }

    /// Advance `state` by one stage.
    pub async fn step(&self, question: &str, state: PipelineState) -> Transition {
        match state {
            PipelineState::Start => Transition::to(
                PipelineState::Generating,
                Some(StreamEvent::Status(STATUS_GENERATING.to_string())),
            ),
            PipelineState::Generating => {
                let prompt = build_sql_prompt(&self.config.schema, question);
                match self.sql_generator.generate(&prompt).await {
                    Ok(raw) => {
                        let sql = sanitize_sql(&raw);
                        info!(sql = %sql, "sql ready");
                        Transition::to(
                            PipelineState::SqlReady { sql: sql.clone() },
                            Some(StreamEvent::Sql(sql)),
                        )
                    }
                    Err(e) => Transition::fail(e),
                }
            }
            PipelineState::SqlReady { sql } => match self.executor.execute(&sql).await {
                Ok(result) => Transition::to(PipelineState::Executing { result }, None),
                Err(e) => Transition::fail(e),
            },
            PipelineState::Executing { result } => {
                match self.summary_generator.summarize(question, &result).await {
                    Ok(summary) => Transition::to(
                        PipelineState::Summarizing,
                        Some(StreamEvent::Text(summary)),
                    ),
                    Err(e) => Transition::fail(e),
                }
            }
            PipelineState::Summarizing => Transition::to(
                PipelineState::Done,
                Some(StreamEvent::Done(DONE_PAYLOAD.to_string())),
            ),
            terminal @ (PipelineState::Done | PipelineState::Failed | PipelineState::Abandoned) => {
                Transition::to(terminal, None)
            }
        }
    }

    /// Run the whole pipeline for `question`, emitting as it goes.
    ///
    /// If the receiver goes away, the step in flight is dropped and no later
    /// stage runs.
    pub async fn run(&self, question: &str, emitter: &mut StreamEmitter) -> PipelineState {
        let mut state = PipelineState::Start;
        while !state.is_terminal() {
            let from = state.name();
            let transition = tokio::select! {
                biased;
                _ = emitter.closed() => {
                    warn!(stage = from, "client disconnected, abandoning request");
                    return PipelineState::Abandoned;
                }
                transition = self.step(question, state) => transition,
            };
            if let Some(event) = transition.event {
                if let StreamEvent::Error(message) = &event {
                    error!(stage = from, "{}", message);
                }
                if emitter.emit(event).await.is_err() {
                    warn!(stage = from, "client disconnected, abandoning request");
                    return PipelineState::Abandoned;
                }
            }
            state = transition.next;
        }
        state
    }

    /// Spawn the pipeline for `question` and hand back the event receiver.
    pub fn ask(&self, question: String) -> mpsc::Receiver<StreamEvent> {
        let (mut emitter, rx) = StreamEmitter::channel(EVENT_BUFFER);
        let pipeline = self.clone();
        let request_id = Uuid::new_v4();
        let span = info_span!("ask", %request_id);
        tokio::spawn(
            async move {
                info!(question = %question, "request started");
                let end = pipeline.run(&question, &mut emitter).await;
                info!(end = end.name(), "request finished");
            }
            .instrument(span),
        );
        rx
    }
}
