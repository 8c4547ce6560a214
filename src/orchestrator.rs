//! End-to-end handling of one chat turn: mode detection, planning, tool
//! execution, fallbacks and response assembly.

use crate::chart::VisualizationBinder;
use crate::config::ChatbotConfig;
use crate::error::{AnalyticsError, Result};
use crate::ledger::{BuiltQuery, LedgerSession};
use crate::plan::{parse_json_object, parse_plan, Plan};
use crate::prompts::{
    build_conversational_system_prompt, build_plan_system_prompt, build_sql_system_prompt,
    build_user_prompt,
};
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest, ProviderFactory};
use crate::schema::{ChatResponse, ResponseMode, VisualizationPayload};
use crate::scope::{AuthorizationScope, CallerContext};
use crate::sql_guard::validate_query;
use crate::templates::match_template;
use crate::tools::analytics::{financial_summary, trend_narrative};
use crate::tools::{ToolCall, ToolRegistry, ToolResult};
use log::{error, info, warn};
use serde_json::Value;

pub const DEFAULT_REPLY: &str = "Here's what I found.";
pub const NO_DATA_REPLY: &str = "No data found for your query.";
pub const GENERATED_SQL_KEYWORD: &str = "generated_sql";

const VISUALIZATION_KEYWORDS: [&str; 12] = [
    "show", "display", "chart", "graph", "plot", "breakdown", "list", "summary", "report",
    "how much", "what are", "top",
];

const CONVERSATIONAL_KEYWORDS: [&str; 10] = [
    "should i",
    "what do you think",
    "advice",
    "recommend",
    "help me",
    "explain",
    "why",
    "how can i",
    "is it good",
    "is it bad",
];

/// One inbound chat turn.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub provider_id: String,
    pub caller: CallerContext,
    pub history: Vec<ChatMessage>,
    /// Forces a mode instead of keyword detection.
    pub mode: Option<ResponseMode>,
    pub rag_summary: Option<String>,
    pub page_context: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, provider_id: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            question: question.into(),
            provider_id: provider_id.into(),
            caller,
            history: Vec::new(),
            mode: None,
            rag_summary: None,
            page_context: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.rag_summary = Some(summary.into());
        self
    }

    pub fn with_page_context(mut self, page_context: impl Into<String>) -> Self {
        self.page_context = Some(page_context.into());
        self
    }
}

pub struct Orchestrator {
    registry: ToolRegistry,
    binder: VisualizationBinder,
    config: ChatbotConfig,
    providers: Box<dyn ProviderFactory>,
}

impl Orchestrator {
    pub fn new(providers: Box<dyn ProviderFactory>) -> Self {
        Self::with_config(providers, ChatbotConfig::default())
    }

    pub fn with_config(providers: Box<dyn ProviderFactory>, config: ChatbotConfig) -> Self {
        Self {
            registry: ToolRegistry::new(),
            binder: VisualizationBinder::new(config.palette.clone()),
            config,
            providers,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ChatbotConfig {
        &self.config
    }

    /// Never fails: anything unexpected becomes an error-mode response.
    pub async fn process_query(&self, request: QueryRequest, session: &LedgerSession) -> ChatResponse {
        match self.try_process(&request, session).await {
            Ok(response) => response,
            Err(err) => {
                error!("Chat turn failed: {}", err);
                ChatResponse::error(err)
            }
        }
    }

    async fn try_process(&self, request: &QueryRequest, session: &LedgerSession) -> Result<ChatResponse> {
        let mode = match request.mode {
            Some(ResponseMode::Conversational) => ResponseMode::Conversational,
            Some(_) => ResponseMode::Visualization,
            None => detect_mode(&request.question),
        };
        info!("Handling question in {:?} mode for role {}", mode, request.caller.role);

        let scope = request.caller.scope();
        let summary = self.summary_for(request, session, &scope);
        let history = self.recent_history(&request.history);

        match mode {
            ResponseMode::Conversational => {
                self.conversational(request, summary.as_deref(), history).await
            }
            _ => {
                self.visualization(request, session, &scope, summary.as_deref(), history)
                    .await
            }
        }
    }

    async fn conversational(
        &self,
        request: &QueryRequest,
        summary: Option<&str>,
        history: Vec<ChatMessage>,
    ) -> Result<ChatResponse> {
        let provider = self.providers.create(&request.provider_id)?;
        let completion = CompletionRequest::new(
            build_conversational_system_prompt(&request.caller, summary),
            request.question.trim(),
        )
        .with_history(history);

        let completion = provider.query(&completion).await?;
        info!(
            "Conversational reply from {}/{}",
            completion.provider_name, completion.model_name
        );
        Ok(ChatResponse::text(
            completion.content.trim(),
            ResponseMode::Conversational,
        ))
    }

    async fn visualization(
        &self,
        request: &QueryRequest,
        session: &LedgerSession,
        scope: &AuthorizationScope,
        summary: Option<&str>,
        history: Vec<ChatMessage>,
    ) -> Result<ChatResponse> {
        let provider = match self.providers.create(&request.provider_id) {
            Ok(provider) => Some(provider),
            Err(err) => {
                warn!("No provider for '{}': {}", request.provider_id, err);
                None
            }
        };

        let plan = match &provider {
            Some(provider) => self.plan(provider.as_ref(), request, summary, &history).await?,
            None => Plan::empty(),
        };

        let mut calls = plan.tool_calls.clone();
        if calls.is_empty() {
            calls = plan
                .visualizations
                .iter()
                .filter(|d| self.registry.is_known(&d.keyword))
                .map(|d| ToolCall::new(d.keyword.as_str()))
                .collect();
        }

        let mut results = self.run_calls(&calls, session, scope);

        if results.is_empty() && self.config.enable_quick_templates {
            if let Some((template, call)) = match_template(&request.question) {
                info!("Falling back to quick template '{}'", template.name);
                results = self.run_calls(&[call], session, scope);
            }
        }

        if results.is_empty() {
            if let Some(provider) = &provider {
                match self
                    .generated_sql(provider.as_ref(), request, session, scope, summary, &history)
                    .await
                {
                    Ok(Some(result)) => results.push(result),
                    Ok(None) => {}
                    Err(err) => warn!("Generated SQL fallback failed: {}", err),
                }
            }
        }

        let payloads: Vec<VisualizationPayload> = results
            .iter()
            .map(|result| self.binder.bind(result, plan.descriptor_for(&result.keyword)))
            .collect();

        let mut reply = if !plan.reply_text.is_empty() {
            plan.reply_text.clone()
        } else if payloads.is_empty() {
            NO_DATA_REPLY.to_string()
        } else {
            DEFAULT_REPLY.to_string()
        };
        if let Some(narrative) = results.iter().find_map(trend_narrative) {
            reply = format!("{}\n\n{}", reply, narrative);
        }

        Ok(ChatResponse::with_visualizations(reply, payloads))
    }

    /// A provider failure or unusable output gives an empty plan.
    async fn plan(
        &self,
        provider: &dyn CompletionProvider,
        request: &QueryRequest,
        summary: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<Plan> {
        let system = build_plan_system_prompt(
            &request.caller,
            &self.registry,
            request.page_context.as_deref(),
        )?;
        let user = build_user_prompt(&request.question, summary, history);

        match provider.query(&CompletionRequest::new(system, user).structured()).await {
            Ok(completion) => Ok(parse_plan(&completion.content, &self.registry)),
            Err(err) => {
                warn!("Plan generation failed, continuing without a plan: {}", err);
                Ok(Plan::empty())
            }
        }
    }

    fn run_calls(&self, calls: &[ToolCall], session: &LedgerSession, scope: &AuthorizationScope) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }
        self.registry
            .execute_calls(calls, session, scope)
            .into_iter()
            .filter(ToolResult::has_data)
            .map(|mut result| {
                result.rows.truncate(self.config.max_results);
                result
            })
            .collect()
    }

    async fn generated_sql(
        &self,
        provider: &dyn CompletionProvider,
        request: &QueryRequest,
        session: &LedgerSession,
        scope: &AuthorizationScope,
        summary: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<Option<ToolResult>> {
        let completion = CompletionRequest::new(
            build_sql_system_prompt(&request.caller),
            build_user_prompt(&request.question, summary, history),
        )
        .structured();
        let completion = provider.query(&completion).await?;

        let object = parse_json_object(&completion.content)
            .ok_or_else(|| AnalyticsError::upstream("SQL generation returned no JSON object"))?;
        let sql = object
            .get("sql")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AnalyticsError::upstream("SQL generation returned no query"))?;
        let title = object
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or("Query results");

        let validated = validate_query(sql, scope)?;
        let sql_text = validated.sql.clone();
        info!("Executing generated SQL: {}", sql_text);

        let query: BuiltQuery = validated.into();
        let mut rows = session.fetch(&query)?;
        if rows.is_empty() {
            return Ok(None);
        }
        rows.truncate(self.config.max_results);

        let mut result = ToolResult::new(GENERATED_SQL_KEYWORD, title, rows);
        result.sql_query = Some(sql_text);
        Ok(Some(result))
    }

    fn summary_for(&self, request: &QueryRequest, session: &LedgerSession, scope: &AuthorizationScope) -> Option<String> {
        if let Some(summary) = request.rag_summary.as_ref().filter(|s| !s.trim().is_empty()) {
            return Some(summary.clone());
        }
        match financial_summary(session, scope) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!("Financial summary unavailable: {}", err);
                None
            }
        }
    }

    fn recent_history(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let skip = history.len().saturating_sub(self.config.history_window);
        history[skip..].to_vec()
    }
}

/// Visualization keywords win over conversational ones; neither gives visualization.
pub fn detect_mode(question: &str) -> ResponseMode {
    let question = question.to_lowercase();
    if VISUALIZATION_KEYWORDS.iter().any(|kw| question.contains(kw)) {
        ResponseMode::Visualization
    } else if CONVERSATIONAL_KEYWORDS.iter().any(|kw| question.contains(kw)) {
        ResponseMode::Conversational
    } else {
        ResponseMode::Visualization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::seeded_session;
    use crate::provider::{ChatRole, Completion};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned completions in order and records every request.
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<Result<String>>>>,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into_iter().collect())),
                seen: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn query(&self, request: &CompletionRequest) -> Result<Completion> {
            self.seen.lock().unwrap().push(request.clone());
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AnalyticsError::upstream("script exhausted")));
            next.map(|content| Completion {
                content,
                provider_name: "scripted".to_string(),
                model_name: "test".to_string(),
            })
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "test"
        }
    }

    impl ProviderFactory for Scripted {
        fn create(&self, _identifier: &str) -> Result<Box<dyn CompletionProvider>> {
            Ok(Box::new(self.clone()))
        }
    }

    fn orchestrator(script: &Scripted) -> Orchestrator {
        Orchestrator::new(Box::new(script.clone()))
    }

    #[test]
    fn test_detect_mode() {
        assert_eq!(detect_mode("Show my rent"), ResponseMode::Visualization);
        assert_eq!(detect_mode("Should I save more?"), ResponseMode::Conversational);
        assert_eq!(detect_mode("explain and show my spending"), ResponseMode::Visualization);
        assert_eq!(detect_mode("rent"), ResponseMode::Visualization);
    }

    #[tokio::test]
    async fn test_plan_calls_are_bound_with_descriptors() {
        let script = Scripted::new(vec![Ok(r#"{
            "reply": "Your spending by category.",
            "tool_calls": [{"tool": "expenses_by_category", "arguments": {"days": 90}}],
            "visualizations": [{"keyword": "expenses_by_category", "chart_type": "pie"}]
        }"#
        .to_string())]);
        let session = seeded_session();
        let request = QueryRequest::new("show my expenses", "claude", CallerContext::individual(7, "Grace"));

        let response = orchestrator(&script).process_query(request, &session).await;

        assert_eq!(response.mode, ResponseMode::Visualization);
        assert_eq!(response.reply_text, "Your spending by category.");
        assert_eq!(response.visualizations.len(), 1);
        assert_eq!(response.chart_config.as_ref().unwrap()["type"], "pie");

        let seen = script.seen.lock().unwrap();
        assert!(seen[0].structured);
        assert!(seen[0].user.contains("Total Income: €"));
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_template() {
        let script = Scripted::new(vec![Err(AnalyticsError::upstream("timeout"))]);
        let session = seeded_session();
        let request = QueryRequest::new(
            "show expenses by category",
            "claude",
            CallerContext::individual(7, "Grace"),
        );

        let response = orchestrator(&script).process_query(request, &session).await;

        assert_eq!(response.reply_text, DEFAULT_REPLY);
        assert_eq!(response.visualizations[0].keyword, "expenses_by_category");
    }

    #[tokio::test]
    async fn test_generated_sql_is_scoped() {
        let script = Scripted::new(vec![
            Ok("not a plan".to_string()),
            Ok(r#"{"sql": "SELECT a.id AS account_id, COUNT(*) AS count FROM journal_line jl JOIN account a ON jl.account_id = a.id GROUP BY a.id", "explanation": "Lines per account"}"#.to_string()),
        ]);
        let session = seeded_session();
        let request = QueryRequest::new("lines per account", "claude", CallerContext::individual(7, "Grace"));

        let response = orchestrator(&script).process_query(request, &session).await;
        let payload = &response.visualizations[0];

        assert_eq!(payload.keyword, GENERATED_SQL_KEYWORD);
        assert_eq!(payload.chart_title.as_deref(), Some("Lines per account"));
        assert!(payload.sql_query.as_ref().unwrap().contains("a.party_id"));
        let accounts: Vec<i64> = payload
            .table_data
            .iter()
            .filter_map(|row| row.get("account_id").and_then(Value::as_i64))
            .collect();
        assert!(accounts.iter().all(|id| *id == 10 || *id == 15));
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let script = Scripted::new(vec![Ok("{}".to_string()), Ok("{}".to_string())]);
        let session = seeded_session();
        let request = QueryRequest::new("zzz", "claude", CallerContext::individual(7, "Grace"));

        let response = orchestrator(&script).process_query(request, &session).await;
        assert_eq!(response.reply_text, NO_DATA_REPLY);
        assert!(response.visualizations.is_empty());
        assert!(response.chart_config.is_none());
    }

    #[tokio::test]
    async fn test_conversational_reply_and_failure() {
        let script = Scripted::new(vec![Ok("  Save 10% each month.  ".to_string())]);
        let session = seeded_session();
        let history: Vec<ChatMessage> = (0..8)
            .map(|i| ChatMessage::new(ChatRole::User, format!("turn {}", i)))
            .collect();
        let request = QueryRequest::new("should I save more?", "claude", CallerContext::individual(7, "Grace"))
            .with_history(history);

        let response = orchestrator(&script).process_query(request.clone(), &session).await;
        assert_eq!(response.mode, ResponseMode::Conversational);
        assert_eq!(response.reply_text, "Save 10% each month.");
        {
            let seen = script.seen.lock().unwrap();
            assert_eq!(seen[0].history.len(), 6);
            assert_eq!(seen[0].history[0].content, "turn 2");
            assert!(!seen[0].structured);
        }

        let failed = orchestrator(&script).process_query(request, &session).await;
        assert_eq!(failed.mode, ResponseMode::Error);
        assert!(failed.reply_text.starts_with("Sorry, I encountered an error"));
    }

    #[tokio::test]
    async fn test_trend_narrative_appended() {
        let script = Scripted::new(vec![Ok(
            r#"{"tool_calls": [{"tool": "monthly_expense_trend"}]}"#.to_string()
        )]);
        let session = seeded_session();
        let request = QueryRequest::new("show expense trend", "claude", CallerContext::individual(7, "Grace"));

        let response = orchestrator(&script).process_query(request, &session).await;
        assert!(response.reply_text.starts_with(DEFAULT_REPLY));
        assert!(response.reply_text.contains("Latest value"));
    }
}
