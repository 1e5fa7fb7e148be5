//! Compiling keyword rules into the boolean query syntax of the online
//! asset search engines.
//!
//! The compile algorithm only talks to an [`OperatorTable`]; an engine is
//! nothing more than a table. Supporting another engine means adding a
//! [`SearchEngine`] variant and its table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separates OR-groups in a keyword and AND-groups in an exclude keyword
pub const GROUP_SEPARATOR: &str = "||";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchMode {
    /// The keyword is already a query expression
    SelfExpr,
    #[default]
    Title,
    Body,
}

impl MatchMode {
    /// Unknown modes fall back to title matching.
    pub fn parse(mode: &str) -> Self {
        match mode.trim() {
            "self" => MatchMode::SelfExpr,
            "body" => MatchMode::Body,
            _ => MatchMode::Title,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::SelfExpr => "self",
            MatchMode::Title => "title",
            MatchMode::Body => "body",
        }
    }
}

impl From<String> for MatchMode {
    fn from(mode: String) -> Self {
        MatchMode::parse(&mode)
    }
}

impl From<MatchMode> for String {
    fn from(mode: MatchMode) -> Self {
        mode.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negation {
    /// `body!="x"`
    Infix(&'static str),
    /// `NOT body:"x"`
    Prefix(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorTable {
    pub and: &'static str,
    pub or: &'static str,
    pub title: &'static str,
    pub body: &'static str,
    pub equal: &'static str,
    pub not: Negation,
    pub quote_values: bool,
}

impl OperatorTable {
    fn field(&self, mode: MatchMode) -> &'static str {
        match mode {
            MatchMode::Body => self.body,
            _ => self.title,
        }
    }

    fn value(&self, value: &str) -> String {
        if self.quote_values {
            format!("\"{}\"", value)
        } else {
            value.to_string()
        }
    }

    fn equal_predicate(&self, mode: MatchMode, value: &str) -> String {
        format!("{}{}{}", self.field(mode), self.equal, self.value(value))
    }

    fn not_predicate(&self, value: &str) -> String {
        match self.not {
            Negation::Infix(op) => format!("{}{}{}", self.body, op, self.value(value)),
            Negation::Prefix(op) => format!("{} {}{}{}", op, self.body, self.equal, self.value(value)),
        }
    }
}

pub const FOFA_SYNTAX: OperatorTable = OperatorTable {
    and: "&&",
    or: "||",
    title: "title",
    body: "body",
    equal: "=",
    not: Negation::Infix("!="),
    quote_values: true,
};

pub const QUAKE_SYNTAX: OperatorTable = OperatorTable {
    and: "AND",
    or: "OR",
    title: "title",
    body: "body",
    equal: ":",
    not: Negation::Prefix("NOT"),
    quote_values: true,
};

pub const HUNTER_SYNTAX: OperatorTable = OperatorTable {
    and: "&&",
    or: "||",
    title: "web.title",
    body: "web.body",
    equal: "=",
    not: Negation::Infix("!="),
    quote_values: true,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Fofa,
    Quake,
    Hunter,
}

impl SearchEngine {
    pub const ALL: [SearchEngine; 3] = [SearchEngine::Fofa, SearchEngine::Quake, SearchEngine::Hunter];

    pub fn syntax(self) -> &'static OperatorTable {
        match self {
            SearchEngine::Fofa => &FOFA_SYNTAX,
            SearchEngine::Quake => &QUAKE_SYNTAX,
            SearchEngine::Hunter => &HUNTER_SYNTAX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SearchEngine::Fofa => "fofa",
            SearchEngine::Quake => "quake",
            SearchEngine::Hunter => "hunter",
        }
    }

    pub fn compile(self, mode: MatchMode, keyword: &str, exclude: &str) -> String {
        compile(self.syntax(), mode, keyword, exclude)
    }
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SearchEngine {
    type Err = crate::DispatchError;

    /// Accepts both the plain names and the `x`-prefixed task names (`xfofa`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix('x').unwrap_or(&name);
        match name {
            "fofa" => Ok(SearchEngine::Fofa),
            "quake" => Ok(SearchEngine::Quake),
            "hunter" => Ok(SearchEngine::Hunter),
            _ => Err(crate::DispatchError::InvalidInput(format!("Unknown search engine: {}", s))),
        }
    }
}

pub fn compile(table: &OperatorTable, mode: MatchMode, keyword: &str, exclude: &str) -> String {
    let mut clauses = Vec::with_capacity(2);

    if mode == MatchMode::SelfExpr {
        clauses.push(format!("({})", keyword));
    } else {
        let rules: Vec<String> = keyword
            .split(GROUP_SEPARATOR)
            .map(|kw| table.equal_predicate(mode, kw))
            .collect();
        clauses.push(format!("({})", rules.join(&format!(" {} ", table.or))));
    }

    if !exclude.is_empty() {
        let rules: Vec<String> = exclude
            .split(GROUP_SEPARATOR)
            .map(|kw| table.not_predicate(kw))
            .collect();
        clauses.push(format!("({})", rules.join(&format!(" {} ", table.and))));
    }

    clauses.join(&format!(" {} ", table.and))
}
