use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_analytics::*;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const SEED: &str = include_str!("fixtures/ledger.sql");

fn session() -> anyhow::Result<LedgerSession> {
    let conn = Connection::open_in_memory()?;
    create_tables(&conn)?;
    conn.execute_batch(SEED)?;
    let today = NaiveDate::from_ymd_opt(2024, 6, 30).ok_or_else(|| anyhow::anyhow!("bad date"))?;
    Ok(LedgerSession::from_connection(conn)?.with_reference_date(today))
}

/// Provider that replays canned answers and keeps every request it saw.
#[derive(Clone)]
struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn plan(json: &str) -> Self {
        Self::new(vec![Ok(json.to_string())])
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn query(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AnalyticsError::upstream("no scripted reply left")));
        reply.map(|content| Completion {
            content,
            provider_name: "scripted".to_string(),
            model_name: "scripted-1".to_string(),
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }
}

impl ProviderFactory for ScriptedProvider {
    fn create(&self, _identifier: &str) -> Result<Box<dyn CompletionProvider>> {
        Ok(Box::new(self.clone()))
    }
}

fn column<'a>(rows: &'a [Row], key: &str) -> Vec<&'a Value> {
    rows.iter().filter_map(|row| row.get(key)).collect()
}

#[tokio::test]
async fn test_individual_expenses_by_category() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::plan(
        r#"```json
        {
            "reply": "Here is where your money went.",
            "tool_calls": [{"tool": "expenses_by_category", "arguments": {"days": "30"}}],
            "visualizations": [{"keyword": "expenses_by_category", "title": "Spending", "x_axis": "category", "y_axis": "total"}]
        }
        ```"#,
    );
    let orchestrator = Orchestrator::new(Box::new(provider.clone()));

    let request = QueryRequest::new(
        "show expenses by category",
        "claude",
        CallerContext::individual(7, "Grace Hopper"),
    );
    let response = orchestrator.process_query(request, &session).await;

    assert_eq!(response.mode, ResponseMode::Visualization);
    assert_eq!(response.reply_text, "Here is where your money went.");
    assert_eq!(response.visualizations.len(), 1);

    let payload = &response.visualizations[0];
    assert_eq!(payload.keyword, "expenses_by_category");
    assert!(column(&payload.table_data, "category").iter().all(|c| !c.is_null()));
    assert_eq!(
        column(&payload.table_data, "category"),
        vec![&Value::from("Rent"), &Value::from("Groceries")]
    );

    let config = payload.chart_config.as_ref().expect("chart config");
    assert_eq!(config["type"], "bar");
    assert_eq!(config["options"]["plugins"]["title"]["text"], "Spending");
    assert_eq!(response.chart_title.as_deref(), Some("Spending"));
    assert_eq!(provider.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cross_party_request_is_denied_then_template_fallback() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::plan(
        r#"{"reply": "", "tool_calls": [{"tool": "expenses_by_category", "arguments": {"party_id": 1}}]}"#,
    );
    let orchestrator = Orchestrator::new(Box::new(provider));

    let request = QueryRequest::new(
        "show expenses by category",
        "claude",
        CallerContext::individual(7, "Grace Hopper"),
    );
    let response = orchestrator.process_query(request, &session).await;

    let totals: Vec<f64> = column(&response.visualizations[0].table_data, "total")
        .iter()
        .filter_map(|v| v.as_f64())
        .collect();
    assert_eq!(totals, vec![1000.0, 200.0]);
    assert_eq!(response.reply_text, "Here's what I found.");
    Ok(())
}

#[tokio::test]
async fn test_admin_bottom_leaderboard_is_non_decreasing() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::plan(
        r#"{"reply": "Lowest spenders.", "tool_calls": [{"tool": "leaderboard", "arguments": {"direction": "bottom", "limit": 3}}]}"#,
    );
    let orchestrator = Orchestrator::new(Box::new(provider));

    let request = QueryRequest::new("show the lowest spenders", "claude", CallerContext::admin("Root"));
    let response = orchestrator.process_query(request, &session).await;

    let rows = &response.visualizations[0].table_data;
    assert_eq!(rows.len(), 3);
    let totals: Vec<f64> = column(rows, "total").iter().filter_map(|v| v.as_f64()).collect();
    assert!(totals.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(column(rows, "party_id"), vec![&Value::from(42), &Value::from(1), &Value::from(2)]);
    Ok(())
}

#[tokio::test]
async fn test_leaderboard_denied_for_individual() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::new(vec![
        Ok(r#"{"tool_calls": [{"tool": "leaderboard"}]}"#.to_string()),
        Ok("{}".to_string()),
    ]);
    let orchestrator = Orchestrator::new(Box::new(provider));

    let request = QueryRequest::new("show the leaderboard", "claude", CallerContext::individual(7, "Grace Hopper"));
    let response = orchestrator.process_query(request, &session).await;

    assert_eq!(response.mode, ResponseMode::Visualization);
    assert!(response.visualizations.is_empty());
    assert_eq!(response.reply_text, "No data found for your query.");
    Ok(())
}

#[tokio::test]
async fn test_company_snapshot_lists_employees_after_primaries() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::plan(
        r#"{
            "reply": "Company overview.",
            "tool_calls": [
                {"tool": "party_insights"},
                {"tool": "income_by_category", "arguments": {"days": 90}}
            ],
            "visualizations": [{"keyword": "company_employees", "kind": "table", "title": "Team"}]
        }"#,
    );
    let orchestrator = Orchestrator::new(Box::new(provider));

    let request = QueryRequest::new("show my company overview", "claude", CallerContext::company(3, "Acme Ltd"));
    let response = orchestrator.process_query(request, &session).await;

    let keywords: Vec<&str> = response.visualizations.iter().map(|v| v.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["party_insights", "income_by_category", "company_employees"]);

    let employees = &response.visualizations[2];
    assert!(employees.chart_config.is_none());
    assert_eq!(employees.chart_title.as_deref(), Some("Team"));
    assert_eq!(column(&employees.table_data, "employee_name"), vec![&Value::from("Grace Hopper")]);
    Ok(())
}

#[tokio::test]
async fn test_conversational_provider_failure_is_error_mode() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::new(vec![Err(AnalyticsError::upstream("request timed out"))]);
    let orchestrator = Orchestrator::new(Box::new(provider));

    let request = QueryRequest::new("should I pay off my card?", "claude", CallerContext::individual(7, "Grace Hopper"));
    let response = orchestrator.process_query(request, &session).await;

    assert_eq!(response.mode, ResponseMode::Error);
    assert!(response.reply_text.contains("request timed out"));
    assert!(response.visualizations.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_generated_sql_for_another_party_is_rejected() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::new(vec![
        Ok("I am not sure.".to_string()),
        Ok(r#"{"sql": "SELECT jl.amount FROM journal_line jl JOIN account a ON jl.account_id = a.id WHERE a.party_id = 1", "explanation": "Alice"}"#.to_string()),
    ]);
    let orchestrator = Orchestrator::new(Box::new(provider.clone()));

    let request = QueryRequest::new("list alice's transactions", "claude", CallerContext::individual(7, "Grace Hopper"));
    let response = orchestrator.process_query(request, &session).await;

    assert_eq!(provider.request_count(), 2);
    assert!(response.visualizations.is_empty());
    assert_eq!(response.reply_text, "No data found for your query.");
    Ok(())
}

#[tokio::test]
async fn test_explicit_mode_and_rag_summary() -> anyhow::Result<()> {
    let session = session()?;
    let provider = ScriptedProvider::new(vec![Ok("Keep it up.".to_string())]);
    let orchestrator = Orchestrator::new(Box::new(provider.clone()));

    let request = QueryRequest::new("show me a chart", "claude", CallerContext::individual(7, "Grace Hopper"))
        .with_mode(ResponseMode::Conversational)
        .with_summary("Net Position: €42.00");
    let response = orchestrator.process_query(request, &session).await;

    assert_eq!(response.mode, ResponseMode::Conversational);
    assert_eq!(response.reply_text, "Keep it up.");
    let requests = provider.requests.lock().unwrap();
    assert!(requests[0].system.ends_with("Financial Context:\nNet Position: €42.00"));
    Ok(())
}

#[test]
fn test_validator_and_builder_agree_on_scope() -> anyhow::Result<()> {
    let session = session()?;
    let scope = CallerContext::individual(42, "Alina Park").scope();

    let validated = validate_query(
        "SELECT SUM(ABS(jl.amount)) AS total FROM journal_line jl JOIN account a ON jl.account_id = a.id",
        &scope,
    )?;
    let query: BuiltQuery = validated.into();
    let rows = session.fetch(&query)?;
    assert_eq!(rows[0].get("total").and_then(Value::as_f64), Some(20.0));

    let built = LedgerQuery::journal(scope.party_filter(None)?)
        .select("SUM(ABS(jl.amount)) AS total")
        .build();
    let rows = session.fetch(&built)?;
    assert_eq!(rows[0].get("total").and_then(Value::as_f64), Some(20.0));
    Ok(())
}

#[test]
fn test_unconnected_joins_cannot_reach_other_parties() -> anyhow::Result<()> {
    let session = session()?;
    let scope = CallerContext::individual(7, "Grace Hopper").scope();

    for sql in [
        "SELECT DISTINCT p.display_name FROM party p, account a",
        "SELECT DISTINCT x.account_id, x.amount FROM journal_line x JOIN account a ON 1 = 1",
        "SELECT DISTINCT b.party_id FROM account b CROSS JOIN account a",
        "SELECT DISTINCT x.amount FROM journal_line x JOIN account a ON a.id > 0",
    ] {
        let err = validate_query(sql, &scope).err();
        assert!(err.is_some_and(|e| e.is_authorization()), "accepted {}", sql);
    }

    let validated = validate_query(
        "SELECT DISTINCT a.party_id FROM party p JOIN account a ON a.party_id = p.id",
        &scope,
    )?;
    let query: BuiltQuery = validated.into();
    let rows = session.fetch(&query)?;
    assert_eq!(column(&rows, "party_id"), vec![&Value::from(7)]);
    Ok(())
}
