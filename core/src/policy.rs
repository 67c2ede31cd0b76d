//! API access policy engine
//!
//! Decides whether an intercepted call is allowed, denied or mocked. Rules
//! live in a tab-separated text file that is re-read on every lookup, so
//! edits apply to the very next call:
//!
//! ```text
//! # method<TAB>matcher...<TAB>verdict
//! android.net.Uri.parse	content://contacts	Deny
//! java.net.URL.openConnection	http://	tracker	Mock
//! ```

use crate::error::PolicyError;
use crate::log_buffer::AGENT_TAG;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How an intercepted call should be treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Let the call through
    #[default]
    Allow,
    /// Block the call
    Deny,
    /// Replace the call's result with a synthetic one
    Mock,
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(Verdict::Allow),
            "Deny" => Ok(Verdict::Deny),
            "Mock" => Ok(Verdict::Mock),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allow => write!(f, "Allow"),
            Verdict::Deny => write!(f, "Deny"),
            Verdict::Mock => write!(f, "Mock"),
        }
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// One policy line: method, resource matchers, verdict.
///
/// Two rules are equal when method and matchers are equal; the verdict is
/// not part of a rule's identity.
#[derive(Debug, Clone)]
pub struct ApiPolicyRule {
    /// Method signature with all whitespace removed
    pub method: String,
    /// Substrings that must all occur in the queried resources
    pub resources: Vec<String>,
    /// Decision when the rule matches
    pub verdict: Verdict,
}

impl ApiPolicyRule {
    /// Create a rule; whitespace is stripped from `method`
    pub fn new(method: &str, resources: Vec<String>, verdict: Verdict) -> Self {
        Self {
            method: strip_whitespace(method),
            resources,
            verdict,
        }
    }

    /// Parse one policy line (`line_no` is 1-based, for error messages).
    ///
    /// Blank lines, comments and lines without a tab yield `Ok(None)`.
    /// Trailing blank fields (stray tabs at the end of a line) are ignored.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Self>, PolicyError> {
        if line.trim().is_empty() || !line.contains('\t') || line.starts_with('#') {
            return Ok(None);
        }

        let mut fields: Vec<&str> = line.split('\t').collect();
        while fields.last().is_some_and(|field| field.trim().is_empty()) {
            fields.pop();
        }
        let (first, rest) = match fields.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        let (last, middle) = match rest.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };

        let verdict_str = last.trim();
        let verdict = verdict_str
            .parse::<Verdict>()
            .map_err(|value| PolicyError::InvalidVerdict {
                line: line_no,
                value,
            })?;

        let resources = middle.iter().map(|s| s.to_string()).collect();
        Ok(Some(Self::new(first, resources, verdict)))
    }

    /// Whether this rule applies to a call of `method` touching `resources`.
    ///
    /// The method must match exactly, ignoring whitespace. Every matcher must
    /// be a substring of all resources concatenated, in any order.
    pub fn affects<S: AsRef<str>>(&self, method: &str, resources: &[S]) -> bool {
        if self.method != strip_whitespace(method) {
            return false;
        }

        let joined: String = resources.iter().map(|r| r.as_ref()).collect();
        self.resources.iter().all(|matcher| joined.contains(matcher.as_str()))
    }
}

impl PartialEq for ApiPolicyRule {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.resources == other.resources
    }
}

impl Eq for ApiPolicyRule {}

impl Hash for ApiPolicyRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.resources.hash(state);
    }
}

/// Rules in file order, unique by identity
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rules: Vec<ApiPolicyRule>,
}

impl PolicyTable {
    /// Empty table: every lookup is `Allow`
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whole policy file body
    pub fn parse(content: &str) -> Result<Self, PolicyError> {
        let mut table = Self::new();
        for (idx, line) in content.lines().enumerate() {
            if let Some(rule) = ApiPolicyRule::parse_line(line, idx + 1)? {
                table.insert(rule);
            }
        }
        Ok(table)
    }

    /// Load the table from `path`; a missing file is an empty table
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).map_err(|e| PolicyError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Add a rule. A rule with the same identity keeps its position and
    /// takes the new verdict.
    pub fn insert(&mut self, rule: ApiPolicyRule) {
        match self.rules.iter_mut().find(|existing| **existing == rule) {
            Some(existing) => existing.verdict = rule.verdict,
            None => self.rules.push(rule),
        }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[ApiPolicyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule in file order
    pub fn find<S: AsRef<str>>(&self, method: &str, resources: &[S]) -> Option<&ApiPolicyRule> {
        self.rules.iter().find(|rule| rule.affects(method, resources))
    }

    /// Verdict of the first matching rule, `Allow` if none matches
    pub fn lookup<S: AsRef<str>>(&self, method: &str, resources: &[S]) -> Verdict {
        self.find(method, resources)
            .map(|rule| rule.verdict)
            .unwrap_or_default()
    }
}

/// File-backed policy lookups
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    path: PathBuf,
}

impl PolicyEngine {
    /// Engine reading rules from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Policy file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verdict for a call, re-reading the policy file.
    ///
    /// Never fails: a missing, unreadable or malformed file means `Allow`.
    pub fn get_policy<S: AsRef<str>>(&self, method: &str, resources: &[S]) -> Verdict {
        match PolicyTable::load(&self.path) {
            Ok(table) => table.lookup(method, resources),
            Err(e) => {
                log::warn!(
                    target: AGENT_TAG,
                    "Policy lookup for {} failed, allowing: {}",
                    method,
                    e
                );
                Verdict::Allow
            }
        }
    }
}
