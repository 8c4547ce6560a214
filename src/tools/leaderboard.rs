use crate::error::{AnalyticsError, Result};
use crate::ledger::{LedgerQuery, LedgerSession, JOURNAL_FROM};
use crate::schema::{ChartType, SortDirection};
use crate::scope::{AuthorizationScope, PartyFilter};
use crate::tools::{Args, ToolArguments, ToolOutput, ToolResult};
use crate::utils::{iso, window_start_days};
use log::debug;
use std::str::FromStr;

pub const MAX_LEADERBOARD_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Expenses,
    Income,
    Net,
}

impl Metric {
    fn total_expr(&self) -> &'static str {
        match self {
            Metric::Expenses => {
                "ROUND(COALESCE(SUM(CASE WHEN s.name = 'expense' THEN ABS(jl.amount) ELSE 0 END), 0), 2)"
            }
            Metric::Income => {
                "ROUND(COALESCE(SUM(CASE WHEN s.name = 'income' THEN ABS(jl.amount) ELSE 0 END), 0), 2)"
            }
            Metric::Net => {
                "ROUND(COALESCE(SUM(CASE WHEN s.name = 'income' THEN ABS(jl.amount) \
                 WHEN s.name = 'expense' THEN -ABS(jl.amount) ELSE 0 END), 0), 2)"
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Metric::Expenses => "expenses",
            Metric::Income => "income",
            Metric::Net => "net position",
        }
    }
}

impl FromStr for Metric {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expenses" | "expense" | "spend" | "spending" => Ok(Metric::Expenses),
            "income" => Ok(Metric::Income),
            "net" => Ok(Metric::Net),
            other => Err(AnalyticsError::validation(format!(
                "Unsupported leaderboard metric '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Top,
    Bottom,
}

impl FromStr for Direction {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" | "desc" | "highest" => Ok(Direction::Top),
            "bottom" | "asc" | "lowest" => Ok(Direction::Bottom),
            other => Err(AnalyticsError::validation(format!(
                "Unsupported leaderboard direction '{}'",
                other
            ))),
        }
    }
}

fn parse_party_type(value: &str) -> Result<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "individual" | "person" => Ok("INDIVIDUAL"),
        "company" => Ok("COMPANY"),
        other => Err(AnalyticsError::validation(format!(
            "Unsupported party_type '{}'",
            other
        ))),
    }
}

struct Ranking {
    metric: Metric,
    direction: Direction,
    limit: i64,
    days: i64,
    party_type: Option<&'static str>,
}

pub fn leaderboard(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let args = Args(args);
    let ranking = Ranking {
        metric: args.text("metric").as_deref().unwrap_or("expenses").parse()?,
        direction: args.text("direction").as_deref().unwrap_or("top").parse()?,
        limit: args.int("limit", 5),
        days: args.int("days", 30),
        party_type: args.text("party_type").as_deref().map(parse_party_type).transpose()?,
    };

    let direction = match ranking.direction {
        Direction::Top => "Top",
        Direction::Bottom => "Bottom",
    };
    let title = format!(
        "{} parties by {} (last {} days)",
        direction,
        ranking.metric.label(),
        ranking.days.max(1)
    );

    ranked(session, scope, "leaderboard", title, ranking)
}

pub fn top_spenders(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let args = Args(args);
    let ranking = Ranking {
        metric: Metric::Expenses,
        direction: Direction::Top,
        limit: args.int("limit", 5),
        days: args.int("days", 30),
        party_type: None,
    };
    let title = format!("Top spenders in the last {} days", ranking.days.max(1));

    ranked(session, scope, "top_spenders", title, ranking)
}

/// Ranks every party on one aggregate. Ties fall back to ascending party id.
fn ranked(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    keyword: &str,
    title: String,
    ranking: Ranking,
) -> Result<ToolOutput> {
    let grant = scope.require_admin()?;
    let limit = ranking.limit.clamp(1, MAX_LEADERBOARD_LIMIT);
    let today = session.reference_date();

    let order = match ranking.direction {
        Direction::Top => "total DESC",
        Direction::Bottom => "total ASC",
    };

    let mut query = LedgerQuery::new(
        format!("{} JOIN party p ON p.id = a.party_id", JOURNAL_FROM),
        "a.party_id",
        PartyFilter::AllParties(grant),
    )
    .select("p.id AS party_id")
    .select("p.display_name AS party_name")
    .select("LOWER(p.party_type) AS party_type")
    .select(format!("{} AS total", ranking.metric.total_expr()))
    .and_where("s.name IN ('income', 'expense')")
    .and_where("je.txn_date >= :start_date AND je.txn_date <= :end_date")
    .bind("start_date", iso(window_start_days(today, ranking.days)))
    .bind("end_date", iso(today))
    .group_by("p.id")
    .group_by("p.display_name")
    .group_by("p.party_type")
    .order_by(order)
    .order_by("p.id ASC")
    .limit(limit);

    if let Some(party_type) = ranking.party_type {
        query = query
            .and_where("p.party_type = :party_type")
            .bind("party_type", party_type.to_string());
    }

    let rows = session.fetch(&query.build())?;
    debug!("{} ranked {} parties", keyword, rows.len());

    let sort = match ranking.direction {
        Direction::Top => SortDirection::Desc,
        Direction::Bottom => SortDirection::Asc,
    };

    Ok(vec![ToolResult::new(keyword, title, rows)
        .chart(ChartType::Bar)
        .axes("party_name", "total")
        .sorted(sort)
        .currency()])
}
