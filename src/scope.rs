use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Individual,
    Company,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Individual => "individual",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" | "person" | "user" => Ok(Role::Individual),
            "company" => Ok(Role::Company),
            "admin" => Ok(Role::Admin),
            other => Err(AnalyticsError::validation(format!(
                "Unsupported caller role '{}'",
                other
            ))),
        }
    }
}

/// Identity of the signed-in caller, as placed on the request by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub role: Role,
    #[serde(default)]
    pub own_individual_id: Option<i64>,
    #[serde(default)]
    pub own_company_id: Option<i64>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "User".to_string()
}

impl CallerContext {
    pub fn individual(party_id: i64, display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Individual,
            own_individual_id: Some(party_id),
            own_company_id: None,
            display_name: display_name.into(),
        }
    }

    pub fn company(party_id: i64, display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Company,
            own_individual_id: None,
            own_company_id: Some(party_id),
            display_name: display_name.into(),
        }
    }

    pub fn admin(display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            own_individual_id: None,
            own_company_id: None,
            display_name: display_name.into(),
        }
    }

    /// Non-secret one-liner embedded in prompts.
    pub fn identity_summary(&self) -> String {
        let scoped = match self.role {
            Role::Admin => "all parties (explicit lookups allowed)".to_string(),
            _ if self.scope().own_party_id().is_some() => "own party only".to_string(),
            _ => "no party on record".to_string(),
        };
        format!(
            "User: {} | Role: {} | Data scope: {}",
            self.display_name, self.role, scoped
        )
    }

    pub fn scope(&self) -> AuthorizationScope {
        AuthorizationScope::from_context(self)
    }
}

/// Proof that the scope belongs to an administrator.
///
/// Only [`AuthorizationScope::require_admin`] can mint one, so any code path
/// holding a grant has already passed the admin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminGrant {
    _private: (),
}

/// How a ledger query must be restricted by party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyFilter {
    Party(i64),
    AllParties(AdminGrant),
}

impl PartyFilter {
    pub fn party_id(&self) -> Option<i64> {
        match self {
            PartyFilter::Party(id) => Some(*id),
            PartyFilter::AllParties(_) => None,
        }
    }
}

/// Per-request capability. Every data-fetching path goes through
/// [`resolve_party_id`](Self::resolve_party_id) or
/// [`require_admin`](Self::require_admin) before filtering by party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationScope {
    role: Role,
    own_party_id: Option<i64>,
}

impl AuthorizationScope {
    pub fn new(role: Role, own_party_id: Option<i64>) -> Self {
        Self { role, own_party_id }
    }

    pub fn from_context(context: &CallerContext) -> Self {
        let own_party_id = match context.role {
            Role::Company => context.own_company_id,
            Role::Individual => context.own_individual_id,
            Role::Admin => context.own_individual_id.or(context.own_company_id),
        };
        Self::new(context.role, own_party_id)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn own_party_id(&self) -> Option<i64> {
        self.own_party_id
    }

    pub fn resolve_party_id(&self, requested: Option<i64>) -> Result<Option<i64>> {
        if self.is_admin() {
            return Ok(requested);
        }

        let own = self.own_party_id.ok_or_else(|| {
            AnalyticsError::authorization("Caller scope is missing a party id for this request")
        })?;

        match requested {
            Some(id) if id != own => Err(AnalyticsError::authorization(
                "You are not allowed to query data for another party",
            )),
            _ => Ok(Some(own)),
        }
    }

    pub fn require_admin(&self) -> Result<AdminGrant> {
        if self.is_admin() {
            Ok(AdminGrant { _private: () })
        } else {
            Err(AnalyticsError::authorization(
                "This tool is only available to admins",
            ))
        }
    }

    pub fn party_filter(&self, requested: Option<i64>) -> Result<PartyFilter> {
        match self.resolve_party_id(requested)? {
            Some(id) => Ok(PartyFilter::Party(id)),
            None => Ok(PartyFilter::AllParties(self.require_admin()?)),
        }
    }
}
