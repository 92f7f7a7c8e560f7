//! Cleanup of model output before execution.
//!
//! Purely textual: no parsing, no validation. Anything that is not valid SQL
//! surfaces as an execution error.

const SQL_FENCE: &str = "```sql";
const FENCE: &str = "```";

/// Strip surrounding whitespace and every markdown fence marker, wherever it sits.
pub fn sanitize_sql(raw: &str) -> String {
    raw.trim()
        .replace(SQL_FENCE, "")
        .replace(FENCE, "")
        .trim()
        .to_string()
}
