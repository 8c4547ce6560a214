use crate::error::Result;
use crate::ledger::{LedgerQuery, LedgerSession, Row};
use crate::schema::{AxisFields, ChartType, SortDirection};
use crate::scope::AuthorizationScope;
use crate::tools::{as_f64, column_f64, escape_like, Args, ToolArguments, ToolOutput, ToolResult};
use crate::utils::{iso, quarter_start, window_start_days, window_start_months};
use serde_json::json;

const MONTH_EXPR: &str = "strftime('%Y-%m', je.txn_date)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Income,
    Expense,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Income => "income",
            Section::Expense => "expense",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Section::Income => "Income",
            Section::Expense => "Expenses",
        }
    }
}

fn section_total(section: Section, alias: &str) -> String {
    format!(
        "ROUND(COALESCE(SUM(CASE WHEN s.name = '{}' THEN ABS(jl.amount) ELSE 0 END), 0), 2) AS {}",
        section.as_str(),
        alias
    )
}

pub fn expenses_by_category(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    category_totals(session, scope, args, Section::Expense, "expenses_by_category")
}

pub fn income_by_category(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    category_totals(session, scope, args, Section::Income, "income_by_category")
}

fn category_totals(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
    section: Section,
    keyword: &str,
) -> Result<ToolOutput> {
    let args = Args(args);
    let days = args.int("days", 30).max(1);
    let limit = args.int("limit", 8).clamp(1, 100);
    let filter = scope.party_filter(args.party_id()?)?;
    let today = session.reference_date();

    let query = LedgerQuery::journal(filter)
        .select("c.name AS category")
        .select("ROUND(SUM(ABS(jl.amount)), 2) AS total")
        .and_where("s.name = :section")
        .and_where("c.name IS NOT NULL")
        .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
        .bind("section", section.as_str().to_string())
        .bind("start_date", iso(window_start_days(today, days)))
        .bind("end_date", iso(today))
        .group_by("c.name")
        .order_by("total DESC")
        .order_by("c.name ASC")
        .limit(limit);

    let rows = session.fetch(&query.build())?;

    Ok(vec![ToolResult::new(
        keyword,
        format!("{} by category (last {} days)", section.label(), days),
        rows,
    )
    .chart(ChartType::Bar)
    .axes("category", "total")
    .sorted(SortDirection::Desc)
    .currency()])
}

pub fn monthly_comparison(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let args = Args(args);
    let months = args.int("months", 6).clamp(1, 36);
    let filter = scope.party_filter(args.party_id()?)?;
    let today = session.reference_date();

    let query = LedgerQuery::journal(filter)
        .select(format!("{} AS month", MONTH_EXPR))
        .select(section_total(Section::Income, "income_total"))
        .select(section_total(Section::Expense, "expenses"))
        .and_where("s.name IN ('income', 'expense')")
        .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
        .bind("start_date", iso(window_start_months(today, months)))
        .bind("end_date", iso(today))
        .group_by(MONTH_EXPR)
        .order_by("month ASC");

    let rows = session.fetch(&query.build())?;

    Ok(vec![ToolResult::new(
        "monthly_comparison",
        format!("Monthly income vs expenses (last {} months)", months),
        rows,
    )
    .chart(ChartType::Bar)
    .axes(
        "month",
        AxisFields::Many(vec!["income_total".to_string(), "expenses".to_string()]),
    )
    .sorted(SortDirection::Asc)
    .currency()])
}

pub fn monthly_expense_trend(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    monthly_trend(session, scope, args, Section::Expense, "monthly_expense_trend")
}

pub fn monthly_income_trend(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    monthly_trend(session, scope, args, Section::Income, "monthly_income_trend")
}

/// Month totals with a trailing 3-month rolling average.
fn monthly_trend(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
    section: Section,
    keyword: &str,
) -> Result<ToolOutput> {
    let args = Args(args);
    let months = args.int("months", 12).clamp(1, 36);
    let filter = scope.party_filter(args.party_id()?)?;
    let today = session.reference_date();

    let monthly = LedgerQuery::journal(filter)
        .select(format!("{} AS month", MONTH_EXPR))
        .select("ROUND(SUM(ABS(jl.amount)), 2) AS monthly_total")
        .and_where("s.name = :section")
        .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
        .bind("section", section.as_str().to_string())
        .bind("start_date", iso(window_start_months(today, months)))
        .bind("end_date", iso(today))
        .group_by(MONTH_EXPR)
        .build();

    let query = monthly.wrap(
        "month, monthly_total, \
         ROUND(AVG(monthly_total) OVER (ORDER BY month ROWS BETWEEN 2 PRECEDING AND CURRENT ROW), 2) \
         AS rolling_3_month_avg",
        "monthly",
        "ORDER BY month ASC",
    );

    let rows = session.fetch(&query)?;

    Ok(vec![ToolResult::new(
        keyword,
        format!("{} trend with 3-month rolling average", section.label()),
        rows,
    )
    .chart(ChartType::Line)
    .axes(
        "month",
        AxisFields::Many(vec![
            "monthly_total".to_string(),
            "rolling_3_month_avg".to_string(),
        ]),
    )
    .sorted(SortDirection::Asc)
    .currency()])
}

pub fn category_spend(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    category_by_month(session, scope, args, Section::Expense, "category_spend")
}

pub fn category_income(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    category_by_month(session, scope, args, Section::Income, "category_income")
}

fn category_by_month(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
    section: Section,
    keyword: &str,
) -> Result<ToolOutput> {
    let args = Args(args);
    let months = args.int("months", 12).clamp(1, 36);
    let category = args.text("category");
    let filter = scope.party_filter(args.party_id()?)?;
    let today = session.reference_date();

    let mut query = LedgerQuery::journal(filter)
        .select(format!("{} AS month", MONTH_EXPR))
        .select(format!("ROUND(SUM(ABS(jl.amount)), 2) AS {}", keyword))
        .and_where("s.name = :section")
        .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
        .bind("section", section.as_str().to_string())
        .bind("start_date", iso(window_start_months(today, months)))
        .bind("end_date", iso(today))
        .group_by(MONTH_EXPR)
        .order_by("month ASC");

    query = match &category {
        Some(name) => query
            .and_where("c.name LIKE :category_name ESCAPE '\\'")
            .bind("category_name", format!("%{}%", escape_like(name))),
        None => query.and_where("c.name IS NOT NULL"),
    };

    let rows = session.fetch(&query.build())?;
    let title = match (&category, section) {
        (Some(name), Section::Expense) => format!("Monthly spending on {}", name),
        (Some(name), Section::Income) => format!("Monthly income from {}", name),
        (None, Section::Expense) => "Monthly categorised spending".to_string(),
        (None, Section::Income) => "Monthly categorised income".to_string(),
    };

    Ok(vec![ToolResult::new(keyword, title, rows)
        .chart(ChartType::Line)
        .axes("month", keyword)
        .sorted(SortDirection::Asc)
        .currency()])
}

pub fn thirty_day_summary(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let days = Args(args).int("days", 30).max(1);
    let today = session.reference_date();
    let rows = period_summary(session, scope, args, window_start_days(today, days))?;

    Ok(vec![summary_result(
        "thirty_day_summary",
        format!("Income and expenses over the last {} days", days),
        rows,
    )])
}

pub fn quarter_to_date_summary(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let start = quarter_start(session.reference_date());
    let rows = period_summary(session, scope, args, start)?;

    Ok(vec![summary_result(
        "quarter_to_date_summary",
        "Quarter-to-date income and expenses".to_string(),
        rows,
    )])
}

fn summary_result(keyword: &str, title: String, rows: Vec<Row>) -> ToolResult {
    ToolResult::new(keyword, title, rows)
        .chart(ChartType::Bar)
        .axes("metric", "total")
        .currency()
}

/// Income, Expenses and Net rows for entries dated from `start` to today.
fn period_summary(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
    start: chrono::NaiveDate,
) -> Result<Vec<Row>> {
    let filter = scope.party_filter(Args(args).party_id()?)?;

    let query = LedgerQuery::journal(filter)
        .select(section_total(Section::Income, "income"))
        .select(section_total(Section::Expense, "expenses"))
        .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
        .bind("start_date", iso(start))
        .bind("end_date", iso(session.reference_date()));

    let totals = session.fetch(&query.build())?;
    let (income, expenses) = totals
        .first()
        .map(|row| (column_f64(row, "income"), column_f64(row, "expenses")))
        .unwrap_or((0.0, 0.0));

    Ok(vec![
        metric_row("Income", income),
        metric_row("Expenses", expenses),
        metric_row("Net", round2(income - expenses)),
    ])
}

fn metric_row(metric: &str, total: f64) -> Row {
    let mut row = Row::new();
    row.insert("metric".to_string(), json!(metric));
    row.insert("total".to_string(), json!(total));
    row
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Plain-text income/expense overview used as conversational context.
pub fn financial_summary(session: &LedgerSession, scope: &AuthorizationScope) -> Result<String> {
    let filter = scope.party_filter(None)?;

    let totals = LedgerQuery::journal(filter)
        .select(section_total(Section::Income, "income"))
        .select(section_total(Section::Expense, "expenses"))
        .build();
    let totals = session.fetch(&totals)?;
    let (income, expenses) = totals
        .first()
        .map(|row| (column_f64(row, "income"), column_f64(row, "expenses")))
        .unwrap_or((0.0, 0.0));

    let top = LedgerQuery::journal(filter)
        .select("c.name AS category_name")
        .select("ROUND(SUM(ABS(jl.amount)), 2) AS total")
        .and_where("s.name = 'expense'")
        .and_where("c.name IS NOT NULL")
        .group_by("c.name")
        .order_by("total DESC")
        .order_by("c.name ASC")
        .limit(5)
        .build();
    let top = session.fetch(&top)?;

    let mut summary = format!(
        "Total Income: €{}\nTotal Expenses: €{}\nNet Position: €{}\n\nTop Expense Categories:\n",
        format_amount(income),
        format_amount(expenses),
        format_amount(income - expenses)
    );
    for (i, row) in top.iter().enumerate() {
        let name = row
            .get("category_name")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        summary.push_str(&format!(
            "{}. {}: €{}\n",
            i + 1,
            name,
            format_amount(column_f64(row, "total"))
        ));
    }

    Ok(summary.trim_end().to_string())
}

/// Formats with two decimals and comma thousands separators.
pub fn format_amount(value: f64) -> String {
    let negative = value < 0.0;
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, fraction)
}

/// One-sentence comparison of the latest month against the previous one, for
/// month-keyed results.
pub fn trend_narrative(result: &ToolResult) -> Option<String> {
    let value_key = match result.keyword.as_str() {
        "monthly_expense_trend" | "monthly_income_trend" => "monthly_total",
        "category_spend" => "category_spend",
        "category_income" => "category_income",
        "monthly_comparison" => "income_total",
        _ => return None,
    };
    let time_key = "month";

    let mut ordered: Vec<(&str, f64)> = result
        .rows
        .iter()
        .filter_map(|row| {
            let month = row.get(time_key)?.as_str()?;
            let value = row.get(value_key).map(as_f64)?;
            Some((month, value))
        })
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    if ordered.len() < 2 {
        return None;
    }

    let (latest_month, latest) = ordered[ordered.len() - 1];
    let (previous_month, previous) = ordered[ordered.len() - 2];

    let change = if previous == 0.0 {
        "from zero previously".to_string()
    } else {
        let pct = (latest - previous) / previous * 100.0;
        let direction = if pct >= 0.0 { "increased" } else { "decreased" };
        format!("{} by {:.1}% since {}", direction, pct.abs(), previous_month)
    };

    Some(format!(
        "Latest value {} for {} {}.",
        format_amount(latest),
        latest_month,
        change
    ))
}
