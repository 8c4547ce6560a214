//! # Ledger Analytics
//!
//! The analytics core of a financial-dashboard chatbot. A natural-language
//! question becomes authorized, read-only aggregate queries over a
//! multi-tenant ledger, and the results come back as Chart.js-style charts
//! and tables.
//!
//! ## Core Concepts
//!
//! - **Authorization scope**: every data path resolves a [`PartyFilter`] from the
//!   caller's [`AuthorizationScope`]. Only admins can mint the unscoped filter.
//! - **Tool catalog**: a closed set of parameterized analytics ([`ToolKind`]) the
//!   model may call by name. Unknown names are dropped.
//! - **Plan**: the model's semi-structured answer, parsed leniently into tool
//!   calls and visualization hints ([`parse_plan`]).
//! - **Visualization binding**: hints are checked against the actual rows
//!   before a chart config is produced ([`VisualizationBinder`]).
//! - **Legacy SQL path**: model-authored SQL is only run after
//!   [`validate_query`] has pinned it to the caller's party.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledger_analytics::*;
//!
//! let session = LedgerSession::open_read_only("ledger.db")?;
//! let orchestrator = Orchestrator::new(Box::new(DefaultProviderFactory::from_env()));
//!
//! let request = QueryRequest::new(
//!     "Show my expenses by category",
//!     "claude",
//!     CallerContext::individual(7, "Grace"),
//! );
//! let response = orchestrator.process_query(request, &session).await;
//! println!("{}", response.reply_text);
//! ```

pub mod chart;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod provider;
pub mod schema;
pub mod scope;
pub mod sql_guard;
pub mod templates;
pub mod tools;
pub mod utils;

pub use chart::{format_for_frontend, ChartBinding, VisualizationBinder};
pub use config::{ChatbotConfig, LlmConfig};
pub use error::{AnalyticsError, Result};
pub use ledger::{create_tables, BuiltQuery, LedgerQuery, LedgerSession, Row};
pub use orchestrator::{detect_mode, Orchestrator, QueryRequest};
pub use plan::{parse_plan, Plan};
pub use provider::{
    resolve_identifier, ChatMessage, ChatRole, Completion, CompletionProvider, CompletionRequest,
    ProviderFactory, ProviderTarget,
};
#[cfg(feature = "providers")]
pub use provider::{AnthropicProvider, DefaultProviderFactory, OllamaProvider, OpenAiProvider};
pub use schema::*;
pub use scope::{AdminGrant, AuthorizationScope, CallerContext, PartyFilter, Role};
pub use sql_guard::{validate_query, ValidatedQuery};
pub use templates::{match_template, QuickTemplate, QUICK_TEMPLATES};
pub use tools::{ArgValue, PanelRole, ToolCall, ToolKind, ToolOutput, ToolRegistry, ToolResult};
