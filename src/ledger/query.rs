use crate::scope::PartyFilter;
use rusqlite::types::Value;

/// Standard join path from journal lines to their owning account and section.
pub const JOURNAL_FROM: &str = "journal_line jl \
     JOIN journal_entry je ON jl.entry_id = je.id \
     JOIN account a ON jl.account_id = a.id \
     LEFT JOIN category c ON jl.category_id = c.id \
     LEFT JOIN section s ON c.section_id = s.id";

pub const SCOPE_PARAM: &str = ":scope_party_id";

/// SQL text plus its named parameters, ready for [`LedgerSession::fetch`].
///
/// [`LedgerSession::fetch`]: crate::ledger::LedgerSession::fetch
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Embeds this query as a derived table named `alias` inside an outer select.
    pub fn wrap(self, outer_select: &str, alias: &str, outer_tail: &str) -> Self {
        let mut sql = format!("SELECT {} FROM ({}) {}", outer_select, self.sql, alias);
        if !outer_tail.is_empty() {
            sql.push(' ');
            sql.push_str(outer_tail);
        }
        Self {
            sql,
            params: self.params,
        }
    }
}

/// Read-only query builder that cannot be built without a party filter.
///
/// A [`PartyFilter::Party`] always lands in the WHERE clause as
/// `<party_column> = :scope_party_id`; the only way to skip it is a
/// [`PartyFilter::AllParties`], which requires an admin grant.
#[derive(Debug, Clone)]
pub struct LedgerQuery {
    from: String,
    party_column: String,
    filter: PartyFilter,
    select: Vec<String>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<i64>,
    params: Vec<(String, Value)>,
}

impl LedgerQuery {
    pub fn new(from: impl Into<String>, party_column: impl Into<String>, filter: PartyFilter) -> Self {
        Self {
            from: from.into(),
            party_column: party_column.into(),
            filter,
            select: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            params: Vec::new(),
        }
    }

    /// Journal lines joined to account, category and section, scoped on `a.party_id`.
    pub fn journal(filter: PartyFilter) -> Self {
        Self::new(JOURNAL_FROM, "a.party_id", filter)
    }

    pub fn select(mut self, expr: impl Into<String>) -> Self {
        self.select.push(expr.into());
        self
    }

    pub fn and_where(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        let name = if name.starts_with(':') {
            name.to_string()
        } else {
            format!(":{}", name)
        };
        self.params.push((name, value.into()));
        self
    }

    pub fn group_by(mut self, expr: impl Into<String>) -> Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> BuiltQuery {
        let mut conditions = self.conditions.clone();
        let mut params = self.params.clone();

        if let PartyFilter::Party(id) = self.filter {
            conditions.insert(0, format!("{} = {}", self.party_column, SCOPE_PARAM));
            params.push((SCOPE_PARAM.to_string(), Value::Integer(id)));
        }

        let select = if self.select.is_empty() {
            "*".to_string()
        } else {
            self.select.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", select, self.from);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(
                &conditions
                    .iter()
                    .map(|c| format!("({})", c))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            );
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        BuiltQuery { sql, params }
    }
}
