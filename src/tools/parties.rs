use crate::error::{AnalyticsError, Result};
use crate::ledger::{LedgerQuery, LedgerSession, Row};
use crate::schema::{AxisFields, ChartType};
use crate::scope::{AdminGrant, AuthorizationScope, PartyFilter};
use crate::tools::{column_f64, escape_like, Args, ToolArguments, ToolOutput, ToolResult};
use crate::utils::iso;
use log::{debug, info};
use serde_json::{json, Value};

pub const MAX_NAME_MATCHES: i64 = 10;
pub const MAX_EMPLOYEES: i64 = 50;

const PARTY_COLUMNS: [&str; 4] = [
    "p.id AS party_id",
    "p.display_name AS party_name",
    "LOWER(p.party_type) AS party_type",
    "p.created_at",
];

fn party_query(grant: AdminGrant, from: &str) -> LedgerQuery {
    PARTY_COLUMNS.iter().fold(
        LedgerQuery::new(from, "p.id", PartyFilter::AllParties(grant)),
        |query, column| query.select(*column),
    )
}

/// Resolves an identifier to party rows: internal id first, then a legacy
/// user or organisation id, then a display-name prefix.
fn find_parties(session: &LedgerSession, grant: AdminGrant, identifier: &str) -> Result<Vec<Row>> {
    if let Ok(id) = identifier.parse::<i64>() {
        let by_id = party_query(grant, "party p")
            .and_where("p.id = :identifier")
            .bind("identifier", id)
            .build();
        let rows = session.fetch(&by_id)?;
        if !rows.is_empty() {
            return Ok(rows);
        }

        for (table, column) in [("user_party_map", "user_id"), ("org_party_map", "org_id")] {
            let legacy = party_query(
                grant,
                &format!("{} m JOIN party p ON p.id = m.party_id", table),
            )
            .and_where(format!("m.{} = :identifier", column))
            .bind("identifier", id)
            .build();
            let rows = session.fetch(&legacy)?;
            if !rows.is_empty() {
                debug!("Resolved legacy {} {} to a party", column, id);
                return Ok(rows);
            }
        }
    }

    let escaped = escape_like(identifier);
    let by_name = party_query(grant, "party p")
        .and_where("LOWER(p.display_name) LIKE LOWER(:prefix) ESCAPE '\\'")
        .bind("prefix", format!("{}%", escaped))
        .order_by("p.display_name ASC")
        .order_by("p.id ASC")
        .limit(MAX_NAME_MATCHES)
        .build();

    session.fetch(&by_name)
}

pub fn party_lookup(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let grant = scope.require_admin()?;
    let identifier = Args(args).required_text("identifier")?;

    let rows = find_parties(session, grant, &identifier)?;
    if rows.is_empty() {
        return Err(AnalyticsError::validation(format!(
            "No party matches '{}'",
            identifier
        )));
    }

    Ok(vec![ToolResult::new(
        "party_lookup",
        format!("Parties matching '{}'", identifier),
        rows,
    )])
}

/// Snapshot of one party, plus its current employees for companies.
pub fn party_insights(
    session: &LedgerSession,
    scope: &AuthorizationScope,
    args: &ToolArguments,
) -> Result<ToolOutput> {
    let args = Args(args);
    let party_id = target_party(session, scope, &args)?;
    let filter = scope.party_filter(Some(party_id))?;

    let party = LedgerQuery::new("party p", "p.id", filter)
        .select("p.id AS party_id")
        .select("p.display_name AS party_name")
        .select("LOWER(p.party_type) AS party_type")
        .build();
    let mut snapshot = session
        .fetch(&party)?
        .into_iter()
        .next()
        .ok_or_else(|| AnalyticsError::validation(format!("No party found with id {}", party_id)))?;

    let accounts = LedgerQuery::new("account a", "a.party_id", filter)
        .select("COUNT(*) AS account_count")
        .build();
    let account_count = session
        .fetch(&accounts)?
        .first()
        .and_then(|row| row.get("account_count").and_then(Value::as_i64))
        .unwrap_or(0);

    let totals = LedgerQuery::journal(filter)
        .select("COALESCE(SUM(CASE WHEN s.name = 'income' THEN ABS(jl.amount) ELSE 0 END), 0) AS income")
        .select("COALESCE(SUM(CASE WHEN s.name = 'expense' THEN ABS(jl.amount) ELSE 0 END), 0) AS expenses")
        .build();
    let (income, expenses) = session
        .fetch(&totals)?
        .first()
        .map(|row| (column_f64(row, "income"), column_f64(row, "expenses")))
        .unwrap_or((0.0, 0.0));

    let holdings = LedgerQuery::new(
        "holding_position h JOIN account a ON h.account_id = a.id",
        "a.party_id",
        filter,
    )
    .select("COALESCE(SUM(h.market_value), 0) AS portfolio_value")
    .build();
    let portfolio_value = session
        .fetch(&holdings)?
        .first()
        .map(|row| column_f64(row, "portfolio_value"))
        .unwrap_or(0.0);

    snapshot.insert("account_count".to_string(), json!(account_count));
    snapshot.insert("total_income".to_string(), json!(round2(income)));
    snapshot.insert("total_expenses".to_string(), json!(round2(expenses)));
    snapshot.insert("net".to_string(), json!(round2(income - expenses)));
    snapshot.insert("portfolio_value".to_string(), json!(round2(portfolio_value)));

    let is_company = snapshot.get("party_type").and_then(Value::as_str) == Some("company");
    let name = snapshot
        .get("party_name")
        .and_then(Value::as_str)
        .unwrap_or("Party")
        .to_string();

    let mut output = vec![ToolResult::new("party_insights", format!("{} snapshot", name), vec![snapshot])
        .chart(ChartType::Bar)
        .axes(
            "party_name",
            AxisFields::Many(vec![
                "total_income".to_string(),
                "total_expenses".to_string(),
                "net".to_string(),
            ]),
        )
        .currency()];

    if is_company {
        let employees = LedgerQuery::new(
            "employment_contract ec JOIN party p ON p.id = ec.employee_party_id",
            "ec.employer_party_id",
            filter,
        )
        .select("p.id AS party_id")
        .select("p.display_name AS employee_name")
        .select("ec.position_title")
        .select("ec.start_date")
        .and_where("ec.start_date <= :today")
        .and_where("ec.end_date IS NULL OR ec.end_date >= :today")
        .bind("today", iso(session.reference_date()))
        .order_by("p.display_name ASC")
        .order_by("p.id ASC")
        .limit(MAX_EMPLOYEES)
        .build();
        let rows = session.fetch(&employees)?;
        info!("Company {} has {} current employees", party_id, rows.len());

        output.push(ToolResult::new("company_employees", format!("{} employees", name), rows).auxiliary());
    }

    Ok(output)
}

/// Non-admins always get their own party. Admins must name one, either by
/// `party_id` or by a lookup `identifier`.
fn target_party(session: &LedgerSession, scope: &AuthorizationScope, args: &Args<'_>) -> Result<i64> {
    let requested = args.party_id()?;
    if let Some(id) = scope.resolve_party_id(requested)? {
        return Ok(id);
    }

    let grant = scope.require_admin()?;
    let identifier = args.text("identifier").ok_or_else(|| {
        AnalyticsError::validation("party_insights needs a party_id or identifier for admin callers")
    })?;

    find_parties(session, grant, &identifier)?
        .first()
        .and_then(|row| row.get("party_id").and_then(Value::as_i64))
        .ok_or_else(|| AnalyticsError::validation(format!("No party matches '{}'", identifier)))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
