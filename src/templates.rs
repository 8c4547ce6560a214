//! Keyword templates that map a question straight to a catalog tool call.

use crate::tools::{ArgValue, ToolCall};
use regex::Regex;
use std::sync::LazyLock;

static CATEGORY_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:spend on|spent on|spending on|expenses for|income from|revenue from|earnings from)\s+(?P<category>[a-z][a-z\s&-]*)",
    )
    .unwrap()
});

const CATEGORY_STOP_WORDS: [&str; 12] = [
    "this", "last", "in", "over", "during", "per", "by", "since", "for", "the", "past", "each",
];

#[derive(Debug, Clone)]
pub struct QuickTemplate {
    pub name: &'static str,
    pub tool: &'static str,
    pub phrases: &'static [&'static str],
    pub arguments: &'static [(&'static str, i64)],
    pub takes_category: bool,
}

impl QuickTemplate {
    const fn new(name: &'static str, tool: &'static str, phrases: &'static [&'static str]) -> Self {
        Self {
            name,
            tool,
            phrases,
            arguments: &[],
            takes_category: false,
        }
    }

    const fn with_arguments(mut self, arguments: &'static [(&'static str, i64)]) -> Self {
        self.arguments = arguments;
        self
    }

    const fn with_category(mut self) -> Self {
        self.takes_category = true;
        self
    }

    fn matches(&self, question: &str) -> bool {
        self.phrases.iter().any(|phrase| question.contains(phrase))
    }

    fn to_call(&self, question: &str) -> ToolCall {
        let mut call = self
            .arguments
            .iter()
            .fold(ToolCall::new(self.tool), |call, (key, value)| {
                call.with_arg(key, ArgValue::Int(*value))
            });
        if self.takes_category {
            if let Some(category) = extract_category(question) {
                call = call.with_arg("category", category.as_str());
            }
        }
        call
    }
}

/// Checked in order; the first template with a matching phrase wins.
pub const QUICK_TEMPLATES: &[QuickTemplate] = &[
    QuickTemplate::new(
        "expenses_by_category",
        "expenses_by_category",
        &["expenses by category", "spending by category", "where did i spend"],
    ),
    QuickTemplate::new(
        "income_by_category",
        "income_by_category",
        &["income by category", "revenue by category", "where did my money come from"],
    ),
    QuickTemplate::new(
        "monthly_comparison",
        "monthly_comparison",
        &["monthly income vs expenses", "income vs expenses by month"],
    ),
    QuickTemplate::new(
        "thirty_day_summary",
        "thirty_day_summary",
        &["last 30 days", "past month summary", "30 day summary"],
    ),
    QuickTemplate::new(
        "quarter_to_date_summary",
        "quarter_to_date_summary",
        &["quarter to date", "this quarter", "quarter summary"],
    ),
    QuickTemplate::new(
        "category_spend",
        "category_spend",
        &["spend on", "spent on", "spending on", "expenses for"],
    )
    .with_category(),
    QuickTemplate::new(
        "category_income",
        "category_income",
        &["income from", "earnings from", "revenue from"],
    )
    .with_category(),
    QuickTemplate::new(
        "monthly_expense_trend",
        "monthly_expense_trend",
        &["expense trend", "monthly expenses", "spending trend"],
    ),
    QuickTemplate::new(
        "monthly_income_trend",
        "monthly_income_trend",
        &["income trend", "revenue trend", "earnings trend"],
    ),
    QuickTemplate::new(
        "spending_this_month",
        "monthly_comparison",
        &["spending this month", "expenses this month", "how much spent this month"],
    )
    .with_arguments(&[("months", 1)]),
    QuickTemplate::new(
        "spending_last_month",
        "monthly_comparison",
        &["spending last month", "expenses last month", "how much spent last month"],
    )
    .with_arguments(&[("months", 2)]),
];

/// Returns the tool call of the first template whose phrase occurs in the question.
pub fn match_template(question: &str) -> Option<(&'static QuickTemplate, ToolCall)> {
    let question = question.to_lowercase();
    QUICK_TEMPLATES
        .iter()
        .find(|template| template.matches(&question))
        .map(|template| (template, template.to_call(&question)))
}

/// Category named after "spend on", "income from" and similar phrases, cut at
/// the first time qualifier ("groceries this year" gives "groceries").
pub fn extract_category(question: &str) -> Option<String> {
    let question = question.to_lowercase();
    let caps = CATEGORY_PHRASE.captures(&question)?;
    let words: Vec<&str> = caps["category"]
        .split_whitespace()
        .take_while(|word| !CATEGORY_STOP_WORDS.contains(word))
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
