//! Prompt construction for both model calls.

/// Prompt asking the model to translate `question` into SQLite SQL over `schema`.
pub fn build_sql_prompt(schema: &str, question: &str) -> String {
    format!(
        r#"Given this schema:
{}
Convert the question to a valid SQLite SQL.
Only respond with raw SQL, no explanation, no code fences.

Question: {}
SQL:"#,
        schema.trim(),
        question
    )
}

/// Prompt asking for a plain-language answer given the rendered query result.
pub fn build_summary_prompt(question: &str, rendered_result: &str) -> String {
    format!(
        "The user asked: {}\nHere is the result:\n{}\nGive a human-readable summary.",
        question, rendered_result
    )
}
