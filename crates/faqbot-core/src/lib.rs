use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Role value that makes a rule apply to every requested role.
pub const COMMON_ROLE: &str = "common";

pub const FALLBACK_ANSWER: &str =
    "Sorry, I don't know that. Please contact the school office for more details.";

/// Header names a rules worksheet must carry, in the order the workbook writer emits them.
pub const REQUIRED_COLUMNS: [&str; 3] = ["role", "keywords", "answer"];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FaqError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// Trim and lowercase, the normalization applied to roles, queries and keyword fragments.
#[must_use]
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// One row of the FAQ table.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Rule {
    role: String,
    keywords: String,
    answer: String,
}

impl Rule {
    /// The role is stored normalized; keywords and answer are kept verbatim.
    #[must_use]
    pub fn new(
        role: impl AsRef<str>,
        keywords: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self { role: normalize(role.as_ref()), keywords: keywords.into(), answer: answer.into() }
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    #[must_use]
    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    #[must_use]
    pub fn applies_to(&self, role: &str) -> bool {
        self.role == role || self.role == COMMON_ROLE
    }

    /// Non-empty, normalized fragments of the comma-separated keyword cell.
    pub fn keyword_fragments(&self) -> impl Iterator<Item = String> + '_ {
        self.keywords.split(',').map(normalize).filter(|fragment| !fragment.is_empty())
    }

    /// First keyword fragment contained in `query`, if any.
    #[must_use]
    pub fn matched_keyword(&self, query: &str) -> Option<String> {
        self.keyword_fragments().find(|fragment| query.contains(fragment.as_str()))
    }
}

/// A chat request whose role and message are normalized and known to be non-empty.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChatQuery {
    role: String,
    message: String,
}

impl ChatQuery {
    /// Normalize `role` and `message`.
    ///
    /// # Errors
    /// Returns [`FaqError::Validation`] when either value is empty after trimming.
    pub fn new(role: &str, message: &str) -> Result<Self, FaqError> {
        let role = normalize(role);
        let message = normalize(message);
        if role.is_empty() || message.is_empty() {
            return Err(FaqError::Validation("role and message are required".to_string()));
        }
        Ok(Self { role, message })
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    /// Zero-based position of the rule in the table.
    pub row: usize,
    /// One-based worksheet row the rule was read from, when it came from a sheet.
    pub sheet_row: Option<usize>,
    pub rule: &'a Rule,
    pub keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSummary {
    pub rows: usize,
    pub roles: Vec<String>,
}

/// Ordered rule table. Row order is match priority.
///
/// Tables read from a worksheet also remember the sheet row of every rule.
/// Equality only looks at the rules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FaqTable {
    rules: Vec<Rule>,
    #[serde(skip)]
    sheet_rows: Vec<usize>,
}

impl FaqTable {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules, sheet_rows: Vec::new() }
    }

    /// Build a table from `(sheet_row, rule)` pairs in match order.
    #[must_use]
    pub fn from_sheet_rows(rows: impl IntoIterator<Item = (usize, Rule)>) -> Self {
        let (sheet_rows, rules) = rows.into_iter().unzip();
        Self { rules, sheet_rows }
    }

    /// One-based worksheet row of the rule at `index`, if the table came from a sheet.
    #[must_use]
    pub fn sheet_row(&self, index: usize) -> Option<usize> {
        self.sheet_rows.get(index).copied()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Scan in stored order for the first rule that applies to `role` and has a
    /// keyword fragment contained in `query`. Both inputs must already be normalized.
    #[must_use]
    pub fn find_match(&self, role: &str, query: &str) -> Option<RuleMatch<'_>> {
        self.rules.iter().enumerate().find_map(|(row, rule)| {
            if !rule.applies_to(role) {
                return None;
            }
            rule.matched_keyword(query).map(|keyword| RuleMatch {
                row,
                sheet_row: self.sheet_row(row),
                rule,
                keyword,
            })
        })
    }

    #[must_use]
    pub fn answer_for(&self, query: &ChatQuery) -> &str {
        match self.find_match(query.role(), query.message()) {
            Some(found) => {
                tracing::debug!(row = found.row, keyword = %found.keyword, "faq rule matched");
                found.rule.answer()
            }
            None => FALLBACK_ANSWER,
        }
    }

    /// Row count and distinct roles, in first-seen order.
    #[must_use]
    pub fn summary(&self) -> TableSummary {
        let mut roles: Vec<String> = Vec::new();
        for rule in &self.rules {
            if !roles.iter().any(|seen| seen == rule.role()) {
                roles.push(rule.role().to_string());
            }
        }
        TableSummary { rows: self.rules.len(), roles }
    }
}

impl PartialEq for FaqTable {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules
    }
}

impl Eq for FaqTable {}

impl FromIterator<Rule> for FaqTable {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Display for TableSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rows ({})", self.rows, self.roles.join(", "))
    }
}

/// Answer a pre-normalized `(role, query)` pair, falling back to [`FALLBACK_ANSWER`].
#[must_use]
pub fn match_answer<'a>(table: &'a FaqTable, role: &str, query: &str) -> &'a str {
    table.find_match(role, query).map_or(FALLBACK_ANSWER, |found| found.rule.answer())
}
