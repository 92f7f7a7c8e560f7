pub mod config;
pub mod error;
pub mod executor;
pub mod generation;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;
pub mod schema;
pub mod server;
pub mod stream;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use executor::{CellValue, QueryExecutor, Row, TabularResult};
pub use llm::{GeminiClient, TextGenerator};
pub use pipeline::{Pipeline, PipelineState, Transition};
pub use stream::{StreamEmitter, StreamEvent};
