// Instruction text for the planning, conversational and legacy SQL calls

use crate::error::Result;
use crate::ledger::SCHEMA_DESCRIPTION;
use crate::provider::ChatMessage;
use crate::schema::PlanContract;
use crate::scope::{CallerContext, Role};
use crate::tools::ToolRegistry;

pub const APP_HEADER: &str = r#"
Finance Dashboard AI Assistant. Respond with insights and data-driven visuals.
You help users explore company and personal finance data through concise text and up to three visualizations per reply.
"#;

pub const DEFAULT_PAGE_CONTEXT: &str = "You are on the main finance dashboard.";

pub const PLAN_RULES: &str = r#"
## RESPONSE RULES
Return JSON only, matching the schema below.
- `reply` is plain text for the chat window. No markdown.
- `tool_calls` holds at most 3 calls. Use only tool names from the catalog and scalar argument values.
- `visualizations` holds at most 3 entries. Each `keyword` must be one of the allowed keywords.
- Leave `visualizations` empty when the best answer is conversational.
- Never invent party ids. Scoped callers only ever see their own data; omit `party_id` for them.
- Leaderboard, top_spenders and party_lookup are admin-only.
"#;

pub const EXAMPLE_EXCHANGE: &str = r#"
## EXAMPLE
User request: "Show me my expenses by category for the last 90 days"
Response:
{
  "reply": "Here is your spending by category for the last 90 days.",
  "tool_calls": [
    {"tool": "expenses_by_category", "arguments": {"days": 90}}
  ],
  "visualizations": [
    {"keyword": "expenses_by_category", "title": "Expenses by Category", "chart_type": "doughnut", "x_axis": "category", "y_axis": "total"}
  ]
}
"#;

pub const CONVERSATIONAL_GUIDELINES: &str = r#"
Capabilities:
- Admins can look up parties by id, legacy user or organisation id, or name.
- Individuals can only reference their own accounts.
- Company representatives can only reference their company's accounts.
- Quick insights include 30-day and quarter-to-date summaries, category-specific spend and income reports, and monthly trends with rolling averages.

IMPORTANT: Write in plain text only. Do NOT use markdown formatting (no **, *, # or other markdown symbols).
Use simple line breaks and natural language. For lists, use numbers like "1." or simple sentences.
Provide helpful, concise advice in a friendly tone. Focus on actionable insights.
"#;

pub const SQL_RULES: &str = r#"
CRITICAL RULES:
1. Generate ONLY a single SELECT statement. No comments, no semicolons, no subqueries.
2. This is SQLite: use date('now'), strftime('%Y-%m', ...) and julianday().
3. Use the aliases jl (journal_line), je (journal_entry), a (account), c (category), s (section).
4. Join tables only with JOIN ... ON using the foreign keys shown in the schema, starting from account a. No comma or CROSS joins.
5. For amounts use SUM(ABS(jl.amount)) within one section.
6. ORDER BY the most relevant column (usually total DESC or month ASC).
7. LIMIT results to 100 unless the user asks for more.

Response format:
{
    "sql": "SELECT ... FROM ...",
    "explanation": "Brief description of what the query returns"
}
"#;

/// System prompt for the planning call.
pub fn build_plan_system_prompt(
    caller: &CallerContext,
    registry: &ToolRegistry,
    page_context: Option<&str>,
) -> Result<String> {
    let schema = PlanContract::schema_as_json()?;
    let keywords = registry.allowed_keywords().join(", ");

    let sections = [
        APP_HEADER.trim().to_string(),
        page_context.unwrap_or(DEFAULT_PAGE_CONTEXT).trim().to_string(),
        caller.identity_summary(),
        format!("Database schema:\n{}", SCHEMA_DESCRIPTION.trim()),
        format!("## TOOL CATALOG\n{}", registry.describe_for_prompt()),
        format!("Allowed visualization keywords: {}", keywords),
        PLAN_RULES.trim().to_string(),
        format!("## RESPONSE SCHEMA\n```json\n{}\n```", schema),
        EXAMPLE_EXCHANGE.trim().to_string(),
    ];

    Ok(sections.join("\n\n"))
}

/// User prompt shared by the planning and legacy SQL calls.
pub fn build_user_prompt(
    question: &str,
    financial_summary: Option<&str>,
    history: &[ChatMessage],
) -> String {
    let mut parts = Vec::new();

    if let Some(summary) = financial_summary.filter(|s| !s.trim().is_empty()) {
        parts.push(format!("Financial summary:\n{}", summary.trim()));
    }

    if !history.is_empty() {
        let lines: Vec<String> = history
            .iter()
            .map(|msg| format!("{}: {}", msg.role, msg.content))
            .collect();
        parts.push(format!("Previous conversation:\n{}", lines.join("\n")));
    }

    parts.push(format!("User request: {}", question.trim()));
    parts.join("\n\n")
}

pub fn build_conversational_system_prompt(
    caller: &CallerContext,
    financial_summary: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are a helpful financial assistant providing advice and insights.\n\nUser: {}\nRole: {}\n\n{}",
        caller.display_name,
        caller.role,
        CONVERSATIONAL_GUIDELINES.trim()
    );

    if let Some(summary) = financial_summary.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\n\nFinancial Context:\n{}", summary.trim()));
    }

    prompt
}

/// System prompt for the last-resort generated SQL call.
pub fn build_sql_system_prompt(caller: &CallerContext) -> String {
    let scope_guidance = match caller.role {
        Role::Admin => {
            "Admin scope: you may omit account-party filters when explicitly looking up other parties."
        }
        Role::Company => {
            "Self-scope: add 'AND a.party_id = :company_id' to restrict to the active company's accounts."
        }
        Role::Individual => {
            "Self-scope: add 'AND a.party_id = :person_id' to restrict to the signed-in individual's accounts."
        }
    };

    format!(
        "You are a SQL query generator for a SQLite financial ledger.\n\n{}\n\n{}\n{}",
        SCHEMA_DESCRIPTION.trim(),
        SQL_RULES.trim(),
        scope_guidance
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatRole;

    #[test]
    fn test_plan_prompt_sections() {
        let caller = CallerContext::individual(7, "Grace");
        let registry = ToolRegistry::new();
        let prompt = build_plan_system_prompt(&caller, &registry, None).unwrap();

        assert!(prompt.starts_with("Finance Dashboard AI Assistant"));
        assert!(prompt.contains(DEFAULT_PAGE_CONTEXT));
        assert!(prompt.contains("User: Grace | Role: individual | Data scope: own party only"));
        assert!(prompt.contains(&registry.describe_for_prompt()));
        assert!(prompt.contains("company_employees"));
        assert!(prompt.contains("\"tool_calls\""));
        assert!(!prompt.contains("party_id\": 7"));
    }

    #[test]
    fn test_page_context_overrides_default() {
        let caller = CallerContext::admin("Root");
        let prompt =
            build_plan_system_prompt(&caller, &ToolRegistry::new(), Some("Admin companies page")).unwrap();
        assert!(prompt.contains("Admin companies page"));
        assert!(!prompt.contains(DEFAULT_PAGE_CONTEXT));
    }

    #[test]
    fn test_user_prompt_layout() {
        let history = vec![
            ChatMessage::new(ChatRole::User, "hi"),
            ChatMessage::new(ChatRole::Assistant, "hello"),
        ];
        let prompt = build_user_prompt("show rent", Some("Total Income: €5.00"), &history);

        assert_eq!(
            prompt,
            "Financial summary:\nTotal Income: €5.00\n\nPrevious conversation:\nuser: hi\nassistant: hello\n\nUser request: show rent"
        );
        assert_eq!(build_user_prompt(" q ", None, &[]), "User request: q");
    }

    #[test]
    fn test_sql_prompt_scope_guidance() {
        let prompt = build_sql_system_prompt(&CallerContext::company(3, "Acme"));
        assert!(prompt.contains(":company_id"));
        assert!(prompt.contains("SQLite"));
    }

    #[test]
    fn test_conversational_prompt_includes_summary() {
        let caller = CallerContext::individual(7, "Grace");
        let prompt = build_conversational_system_prompt(&caller, Some("Net Position: €1.00"));
        assert!(prompt.contains("User: Grace\nRole: individual"));
        assert!(prompt.ends_with("Financial Context:\nNet Position: €1.00"));
    }
}
