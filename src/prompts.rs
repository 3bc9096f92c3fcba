//! Prompt templates for the three oracle stages.
//!
//! Templates are compiled in and use `{name}` placeholders filled by
//! [`render`]. Each stage gets a system/user pair so the instructions and the
//! actual question stay separate messages.

/// Default business rules injected into analysis and generation prompts.
/// Can be overridden from a file named in the config.
pub const BUSINESS_RULES: &str = "\
## QUERY STANDARDS
- Handle NULL values with COALESCE or IS NOT NULL
- Always include a LIMIT on row-returning queries (default 1000)
- Use meaningful column aliases
- Add ORDER BY when results have a natural ordering
- Filter with WHERE clauses rather than returning everything";

pub const INTENT_SYSTEM: &str = "\
You are an analytics assistant. Analyze the user's question about a SQLite
database and return structured information.

Database schema:
{schema}

Business rules:
{business_rules}

Return ONLY a JSON object with this structure:
{
  \"kind\": \"statistical\" | \"lookup\" | \"trend\" | \"general\",
  \"intent\": \"short description of what the user wants\",
  \"columns\": [\"relevant\", \"columns\"],
  \"aggregation\": \"SUM(amount)\" or null,
  \"group_by\": [\"grouping\", \"columns\"],
  \"filters\": [\"plain-language filter conditions\"]
}

Return ONLY the JSON object, no additional text.";

pub const INTENT_USER: &str = "\
{history}Question: {question}";

pub const SQL_SYSTEM: &str = "\
You are an expert SQL generator for SQLite databases.

Database schema:
{schema}

Business rules:
{business_rules}

Question analysis:
{intent}

Generate one valid SQLite SELECT statement answering the question.

Requirements:
1. Valid SQLite syntax, a single statement
2. Only reference tables and columns from the schema above
3. Use GROUP BY for aggregations and ORDER BY for sorted output
4. Include a LIMIT on row-returning queries
5. Only SELECT: never INSERT, UPDATE, DELETE, DROP, ALTER, CREATE or TRUNCATE

Put the SQL in a ```sql code block.";

pub const SQL_USER: &str = "\
Question: {question}{feedback}";

/// Appended to the user prompt on regeneration after a validator rejection.
pub const SQL_RETRY_FEEDBACK: &str = "\n\nYour previous attempt was rejected: \
{reason}\nGenerate a corrected statement.";

pub const INSIGHT_SYSTEM: &str = "\
You are a business analyst explaining query results to a non-technical
reader.

Original question: {question}

Question analysis:
{intent}

Query results:
{data}

Write a short narrative answer:
1. Answer the question directly, quoting the key numbers
2. Mention notable patterns if any
3. Plain prose, no markdown tables, no SQL";

pub const INSIGHT_USER: &str = "\
Summarize the results for the question: {question}";

/// Replace `{name}` placeholders in a template.
///
/// Unknown placeholders are left in place; literal braces elsewhere in the
/// template (e.g. the JSON example above) are untouched because only exact
/// `{name}` matches from `vars` are substituted.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}
