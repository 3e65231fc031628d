//! System prompt for a session

use crate::data::TableSchema;
use crate::tools::{RUN_SQL, SCHEMA_TOOL};

const SYSTEM_PROMPT: &str = "\
You are a data analyst answering questions about spreadsheet data loaded into a SQL \
database. Work step by step: think, call a tool, read the result, and repeat until you \
can answer.

Tools:
- {schema_tool}(): lists tables, their source files, row counts and columns. Call it \
first, before writing any SQL.
- {run_sql}(query): runs one SQL query and returns the rows, condensed when large.

SQL rules:
- Wrap every table and column name in square brackets, e.g. [t_1].[城市].
- Give computed columns short ASCII aliases, e.g. SUM([金额]) AS total.
- For text filters prefer LIKE '%keyword%' over exact equality; spreadsheet values are \
often inconsistent.
- If a query returns no rows, relax the conditions and verify before concluding.

Answer in the same language as the user's question. When you have the answer, reply \
with it directly and do not call any more tools.";

/// Build the system prompt, listing the tables currently loaded
pub fn build_system_prompt(tables: &[TableSchema]) -> String {
    let mut prompt = SYSTEM_PROMPT
        .replace("{schema_tool}", SCHEMA_TOOL)
        .replace("{run_sql}", RUN_SQL);

    prompt.push_str("\n\nLoaded tables: ");
    if tables.is_empty() {
        prompt.push_str("(none yet)");
    } else {
        let names: Vec<String> = tables
            .iter()
            .map(|t| match &t.source_label {
                Some(label) => format!("{} ({})", t.safe_name, label),
                None => t.safe_name.clone(),
            })
            .collect();
        prompt.push_str(&names.join(", "));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::orders_table;

    #[test]
    fn test_prompt_names_tools_and_tables() {
        let prompt = build_system_prompt(&[orders_table()]);
        assert!(prompt.contains("get_database_schema()"));
        assert!(prompt.contains("run_sql(query)"));
        assert!(prompt.ends_with("Loaded tables: t_1 (orders.xlsx / Sheet1)"));
    }

    #[test]
    fn test_prompt_without_tables() {
        assert!(build_system_prompt(&[]).ends_with("Loaded tables: (none yet)"));
    }
}
