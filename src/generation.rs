//! The two model-backed stages of the pipeline.

use crate::error::Result;
use crate::executor::TabularResult;
use crate::llm::TextGenerator;
use crate::prompt::build_summary_prompt;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Turns a generation prompt into raw model text.
#[derive(Clone)]
pub struct SqlGenerator {
    llm: Arc<dyn TextGenerator>,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    /// Raw model output. Not cleaned; see [`crate::sanitize::sanitize_sql`].
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let raw = self.llm.generate(prompt).await?;
        debug!(model = self.llm.model_name(), raw_len = raw.len(), "sql generated");
        Ok(raw)
    }
}

/// Produces a one-line prose answer from a question and its query result.
#[derive(Clone)]
pub struct SummaryGenerator {
    llm: Arc<dyn TextGenerator>,
}

impl SummaryGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    pub async fn summarize(&self, question: &str, result: &TabularResult) -> Result<String> {
        let prompt = build_summary_prompt(question, &result.render());
        let response = self.llm.generate(&prompt).await?;
        Ok(flatten_summary(&response))
    }
}

lazy_static::lazy_static! {
    static ref LINE_BREAKS: Regex = Regex::new(r"\r\n|\r|\n").unwrap();
}

/// Drop markdown emphasis markers and fold the text onto a single line.
pub fn flatten_summary(text: &str) -> String {
    let without_emphasis = text.replace("**", "").replace('*', "");
    LINE_BREAKS
        .replace_all(&without_emphasis, " ")
        .trim()
        .to_string()
}
