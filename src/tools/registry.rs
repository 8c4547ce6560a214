use crate::error::{AnalyticsError, Result};
use crate::ledger::LedgerSession;
use crate::scope::AuthorizationScope;
use crate::tools::{analytics, leaderboard, parties};
use crate::tools::{is_integer_text, ArgValue, PanelRole, ToolArguments, ToolCall, ToolOutput};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// At most this many tool calls run per request.
pub const MAX_TOOL_CALLS: usize = 3;

/// Arguments that name an option rather than a quantity; never coerced to numbers.
const ENUMERATED_ARGUMENTS: [&str; 3] = ["metric", "direction", "party_type"];

/// Keywords of companion panels a tool may emit next to its primary one.
const AUXILIARY_KEYWORDS: [&str; 1] = ["company_employees"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ExpensesByCategory,
    IncomeByCategory,
    MonthlyComparison,
    MonthlyExpenseTrend,
    MonthlyIncomeTrend,
    CategorySpend,
    CategoryIncome,
    ThirtyDaySummary,
    QuarterToDateSummary,
    Leaderboard,
    TopSpenders,
    PartyLookup,
    PartyInsights,
}

impl ToolKind {
    pub const ALL: [ToolKind; 13] = [
        ToolKind::ExpensesByCategory,
        ToolKind::IncomeByCategory,
        ToolKind::MonthlyComparison,
        ToolKind::MonthlyExpenseTrend,
        ToolKind::MonthlyIncomeTrend,
        ToolKind::CategorySpend,
        ToolKind::CategoryIncome,
        ToolKind::ThirtyDaySummary,
        ToolKind::QuarterToDateSummary,
        ToolKind::Leaderboard,
        ToolKind::TopSpenders,
        ToolKind::PartyLookup,
        ToolKind::PartyInsights,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ExpensesByCategory => "expenses_by_category",
            ToolKind::IncomeByCategory => "income_by_category",
            ToolKind::MonthlyComparison => "monthly_comparison",
            ToolKind::MonthlyExpenseTrend => "monthly_expense_trend",
            ToolKind::MonthlyIncomeTrend => "monthly_income_trend",
            ToolKind::CategorySpend => "category_spend",
            ToolKind::CategoryIncome => "category_income",
            ToolKind::ThirtyDaySummary => "thirty_day_summary",
            ToolKind::QuarterToDateSummary => "quarter_to_date_summary",
            ToolKind::Leaderboard => "leaderboard",
            ToolKind::TopSpenders => "top_spenders",
            ToolKind::PartyLookup => "party_lookup",
            ToolKind::PartyInsights => "party_insights",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::ExpensesByCategory => "Expense totals per category over the last N days",
            ToolKind::IncomeByCategory => "Income totals per category over the last N days",
            ToolKind::MonthlyComparison => "Income versus expenses per month",
            ToolKind::MonthlyExpenseTrend => {
                "Monthly expense totals with a 3-month rolling average"
            }
            ToolKind::MonthlyIncomeTrend => "Monthly income totals with a 3-month rolling average",
            ToolKind::CategorySpend => "Monthly spending for one category (argument: category)",
            ToolKind::CategoryIncome => "Monthly income for one category (argument: category)",
            ToolKind::ThirtyDaySummary => "Income, expenses and net over the last 30 days",
            ToolKind::QuarterToDateSummary => "Income, expenses and net for the current quarter",
            ToolKind::Leaderboard => {
                "Admin only. Rank parties by metric (expenses|income|net), direction (top|bottom), optional party_type (individual|company)"
            }
            ToolKind::TopSpenders => "Admin only. Parties with the highest expenses",
            ToolKind::PartyLookup => {
                "Admin only. Find parties by id, legacy user/org id or name prefix (argument: identifier)"
            }
            ToolKind::PartyInsights => {
                "Snapshot of one party: accounts, income, expenses, net, portfolio; companies include employees"
            }
        }
    }

    pub fn default_arguments(&self) -> ToolArguments {
        let pairs: Vec<(&str, ArgValue)> = match self {
            ToolKind::ExpensesByCategory | ToolKind::IncomeByCategory => {
                vec![("days", ArgValue::Int(30)), ("limit", ArgValue::Int(8))]
            }
            ToolKind::MonthlyComparison => vec![("months", ArgValue::Int(6))],
            ToolKind::MonthlyExpenseTrend
            | ToolKind::MonthlyIncomeTrend
            | ToolKind::CategorySpend
            | ToolKind::CategoryIncome => vec![("months", ArgValue::Int(12))],
            ToolKind::ThirtyDaySummary => vec![("days", ArgValue::Int(30))],
            ToolKind::Leaderboard => vec![
                ("metric", ArgValue::from("expenses")),
                ("direction", ArgValue::from("top")),
                ("limit", ArgValue::Int(5)),
                ("days", ArgValue::Int(30)),
            ],
            ToolKind::TopSpenders => vec![("limit", ArgValue::Int(5)), ("days", ArgValue::Int(30))],
            ToolKind::QuarterToDateSummary | ToolKind::PartyLookup | ToolKind::PartyInsights => {
                Vec::new()
            }
        };

        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    pub fn invoke(
        &self,
        session: &LedgerSession,
        scope: &AuthorizationScope,
        arguments: &ToolArguments,
    ) -> Result<ToolOutput> {
        match self {
            ToolKind::ExpensesByCategory => analytics::expenses_by_category(session, scope, arguments),
            ToolKind::IncomeByCategory => analytics::income_by_category(session, scope, arguments),
            ToolKind::MonthlyComparison => analytics::monthly_comparison(session, scope, arguments),
            ToolKind::MonthlyExpenseTrend => analytics::monthly_expense_trend(session, scope, arguments),
            ToolKind::MonthlyIncomeTrend => analytics::monthly_income_trend(session, scope, arguments),
            ToolKind::CategorySpend => analytics::category_spend(session, scope, arguments),
            ToolKind::CategoryIncome => analytics::category_income(session, scope, arguments),
            ToolKind::ThirtyDaySummary => analytics::thirty_day_summary(session, scope, arguments),
            ToolKind::QuarterToDateSummary => {
                analytics::quarter_to_date_summary(session, scope, arguments)
            }
            ToolKind::Leaderboard => leaderboard::leaderboard(session, scope, arguments),
            ToolKind::TopSpenders => leaderboard::top_spenders(session, scope, arguments),
            ToolKind::PartyLookup => parties::party_lookup(session, scope, arguments),
            ToolKind::PartyInsights => parties::party_insights(session, scope, arguments),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| AnalyticsError::UnknownTool(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub name: &'static str,
    pub description: &'static str,
    pub default_arguments: ToolArguments,
}

impl From<ToolKind> for ToolSpec {
    fn from(kind: ToolKind) -> Self {
        Self {
            kind,
            name: kind.name(),
            description: kind.description(),
            default_arguments: kind.default_arguments(),
        }
    }
}

/// Immutable catalog of every tool, in a fixed order.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            specs: ToolKind::ALL.iter().copied().map(ToolSpec::from).collect(),
        }
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        let kind = ToolKind::from_name(name)?;
        self.specs.iter().find(|spec| spec.kind == kind)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Catalog text embedded in the planning prompt. Output is stable.
    pub fn describe_for_prompt(&self) -> String {
        self.specs
            .iter()
            .map(|spec| {
                let defaults = spec
                    .default_arguments
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect::<Vec<_>>();
                if defaults.is_empty() {
                    format!("- {}: {}", spec.name, spec.description)
                } else {
                    format!(
                        "- {}: {} (defaults: {})",
                        spec.name,
                        spec.description,
                        defaults.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Keywords a visualization descriptor may reference.
    pub fn allowed_keywords(&self) -> Vec<&'static str> {
        self.specs
            .iter()
            .map(|spec| spec.name)
            .chain(AUXILIARY_KEYWORDS)
            .collect()
    }

    pub fn is_allowed_keyword(&self, keyword: &str) -> bool {
        self.allowed_keywords().contains(&keyword.trim())
    }

    /// Defaults merged under the caller's arguments, with numeric strings
    /// turned into integers.
    pub fn prepare_arguments(&self, spec: &ToolSpec, arguments: &ToolArguments) -> ToolArguments {
        let mut merged = spec.default_arguments.clone();
        for (key, value) in arguments {
            merged.insert(key.clone(), value.clone());
        }
        coerce_arguments(merged)
    }

    /// Runs up to [`MAX_TOOL_CALLS`] known calls. Unknown tools are skipped
    /// without using a slot, and a failing call only loses its own results. Auxiliary panels are
    /// de-duplicated by keyword and placed after every primary panel.
    pub fn execute_calls(
        &self,
        calls: &[ToolCall],
        session: &LedgerSession,
        scope: &AuthorizationScope,
    ) -> ToolOutput {
        let mut primary = Vec::new();
        let mut auxiliary = Vec::new();
        let mut seen_auxiliary = HashSet::new();

        let known = calls.iter().filter_map(|call| match self.get(&call.tool_name) {
            Some(spec) => Some((call, spec)),
            None => {
                warn!("Skipping unknown tool '{}'", call.tool_name);
                None
            }
        });

        let mut executed = 0;
        for (call, spec) in known.take(MAX_TOOL_CALLS) {
            executed += 1;
            let arguments = self.prepare_arguments(spec, &call.arguments);
            debug!("Running tool {} with {:?}", spec.name, arguments);

            match spec.kind.invoke(session, scope, &arguments) {
                Ok(results) => {
                    for result in results {
                        match result.panel {
                            PanelRole::Primary => primary.push(result),
                            PanelRole::Auxiliary => {
                                if seen_auxiliary.insert(result.keyword.clone()) {
                                    auxiliary.push(result);
                                }
                            }
                        }
                    }
                }
                Err(err) if err.is_authorization() => {
                    warn!("Tool {} denied: {}", spec.name, err);
                }
                Err(err) => {
                    warn!("Tool {} failed: {}", spec.name, err);
                }
            }
        }

        info!(
            "Executed {} tool call(s): {} primary, {} auxiliary result(s)",
            executed,
            primary.len(),
            auxiliary.len()
        );

        primary.extend(auxiliary);
        primary
    }
}

/// Text values that are purely digits, with an optional leading minus,
/// become integers, except for enumerated arguments.
pub fn coerce_arguments(arguments: ToolArguments) -> ToolArguments {
    arguments
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                ArgValue::Text(text)
                    if !ENUMERATED_ARGUMENTS.contains(&key.as_str()) && is_integer_text(&text) =>
                {
                    match text.parse::<i64>() {
                        Ok(number) => ArgValue::Int(number),
                        Err(_) => ArgValue::Text(text),
                    }
                }
                other => other,
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::seeded_session;
    use crate::scope::Role;

    #[test]
    fn test_catalog_is_complete_and_ordered() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.specs().len(), 13);
        assert_eq!(registry.specs()[0].name, "expenses_by_category");

        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert!("drop_tables".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_describe_for_prompt_lists_defaults() {
        let text = ToolRegistry::new().describe_for_prompt();
        assert!(text.starts_with("- expenses_by_category: "));
        assert!(text.contains("(defaults: days=30, limit=8)"));
        assert!(text.contains("(defaults: days=30, direction=top, limit=5, metric=expenses)"));
        assert!(text.contains("- quarter_to_date_summary: Income, expenses and net for the current quarter\n"));
        assert_eq!(text, ToolRegistry::new().describe_for_prompt());
    }

    #[test]
    fn test_allowed_keywords_include_auxiliary() {
        let registry = ToolRegistry::new();
        assert!(registry.is_allowed_keyword("company_employees"));
        assert!(registry.is_allowed_keyword("leaderboard"));
        assert!(!registry.is_allowed_keyword("salary_history"));
    }

    #[test]
    fn test_coercion_skips_enumerated_fields() {
        let mut arguments = ToolArguments::new();
        arguments.insert("days".to_string(), ArgValue::from("90"));
        arguments.insert("metric".to_string(), ArgValue::from("10"));
        arguments.insert("category".to_string(), ArgValue::from("rent"));

        let coerced = coerce_arguments(arguments);
        assert_eq!(coerced["days"], ArgValue::Int(90));
        assert_eq!(coerced["metric"], ArgValue::from("10"));
        assert_eq!(coerced["category"], ArgValue::from("rent"));
    }

    #[test]
    fn test_coercion_rejects_loose_numbers() {
        let mut arguments = ToolArguments::new();
        arguments.insert("days".to_string(), ArgValue::from("+5"));
        arguments.insert("limit".to_string(), ArgValue::from(" 5 "));
        arguments.insert("months".to_string(), ArgValue::from("-3"));
        arguments.insert("party_id".to_string(), ArgValue::from("99999999999999999999"));

        let coerced = coerce_arguments(arguments);
        assert_eq!(coerced["days"], ArgValue::from("+5"));
        assert_eq!(coerced["limit"], ArgValue::from(" 5 "));
        assert_eq!(coerced["months"], ArgValue::Int(-3));
        assert_eq!(coerced["party_id"], ArgValue::from("99999999999999999999"));
    }

    #[test]
    fn test_caller_arguments_override_defaults() {
        let registry = ToolRegistry::new();
        let spec = registry.get("expenses_by_category").unwrap();
        let call = ToolCall::new("expenses_by_category").with_arg("days", "7");

        let merged = registry.prepare_arguments(spec, &call.arguments);
        assert_eq!(merged["days"], ArgValue::Int(7));
        assert_eq!(merged["limit"], ArgValue::Int(8));
    }

    #[test]
    fn test_failing_call_is_isolated() {
        let registry = ToolRegistry::new();
        let scope = AuthorizationScope::new(Role::Individual, Some(7));
        let calls = vec![
            ToolCall::new("leaderboard"),
            ToolCall::new("not_a_tool"),
            ToolCall::new("expenses_by_category"),
        ];

        let results = registry.execute_calls(&calls, &seeded_session(), &scope);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].keyword, "expenses_by_category");
    }

    #[test]
    fn test_only_three_calls_run() {
        let registry = ToolRegistry::new();
        let scope = AuthorizationScope::new(Role::Individual, Some(7));
        let calls = vec![
            ToolCall::new("thirty_day_summary"),
            ToolCall::new("quarter_to_date_summary"),
            ToolCall::new("monthly_comparison"),
            ToolCall::new("expenses_by_category"),
        ];

        let results = registry.execute_calls(&calls, &seeded_session(), &scope);
        let keywords: Vec<&str> = results.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(
            keywords,
            vec!["thirty_day_summary", "quarter_to_date_summary", "monthly_comparison"]
        );
    }

    #[test]
    fn test_unknown_tools_do_not_use_a_slot() {
        let registry = ToolRegistry::new();
        let scope = AuthorizationScope::new(Role::Individual, Some(7));
        let calls = vec![
            ToolCall::new("not_a_tool"),
            ToolCall::new("thirty_day_summary"),
            ToolCall::new("also_unknown"),
            ToolCall::new("quarter_to_date_summary"),
            ToolCall::new("monthly_comparison"),
        ];

        let results = registry.execute_calls(&calls, &seeded_session(), &scope);
        let keywords: Vec<&str> = results.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(
            keywords,
            vec!["thirty_day_summary", "quarter_to_date_summary", "monthly_comparison"]
        );
    }

    #[test]
    fn test_auxiliary_panels_follow_primaries() {
        let registry = ToolRegistry::new();
        let scope = AuthorizationScope::new(Role::Admin, None);
        let calls = vec![
            ToolCall::new("party_insights").with_arg("party_id", ArgValue::Int(3)),
            ToolCall::new("party_insights").with_arg("identifier", "acme"),
            ToolCall::new("top_spenders"),
        ];

        let results = registry.execute_calls(&calls, &seeded_session(), &scope);
        let keywords: Vec<&str> = results.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(
            keywords,
            vec!["party_insights", "party_insights", "top_spenders", "company_employees"]
        );
    }
}
