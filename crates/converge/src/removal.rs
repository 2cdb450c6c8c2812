//! Removal rules - textual predicates over live firewall permissions
//!
//! Grammar:
//!
//! ```text
//! rule  := "port=" int [ ":" int ]
//! int   := [ "-" ] digit+
//! ```
//!
//! `port=22` is shorthand for `port=22:22`. Negative values are accepted
//! because providers use `-1` for "all ports".

use crate::error::ConfigurationError;
use std::fmt;
use std::str::FromStr;

/// A live permission exposing an optional port range
///
/// Absent bounds are distinct from zero: a rule for port 0 never matches a
/// permission without ports.
pub trait PortRange {
    fn from_port(&self) -> Option<i64>;
    fn to_port(&self) -> Option<i64>;
}

/// Matches permissions whose port range is exactly `from_port..=to_port`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRemovalRule {
    pub from_port: i64,
    pub to_port: i64,
}

impl PortRemovalRule {
    pub fn new(from_port: i64, to_port: i64) -> Self {
        Self { from_port, to_port }
    }

    /// Both bounds are present and equal to the rule's
    pub fn matches<P: PortRange + ?Sized>(&self, permission: &P) -> bool {
        permission.from_port() == Some(self.from_port) && permission.to_port() == Some(self.to_port)
    }
}

impl fmt::Display for PortRemovalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port={}:{}", self.from_port, self.to_port)
    }
}

/// A parsed removal rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalRule {
    Port(PortRemovalRule),
}

impl RemovalRule {
    /// Whether `permission` must be pruned under this rule
    pub fn matches<P: PortRange + ?Sized>(&self, permission: &P) -> bool {
        match self {
            Self::Port(rule) => rule.matches(permission),
        }
    }
}

impl fmt::Display for RemovalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(rule) => rule.fmt(f),
        }
    }
}

impl FromStr for RemovalRule {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_removal_rule(s)
    }
}

/// Parse the textual form of a removal rule
pub fn parse_removal_rule(text: &str) -> Result<RemovalRule, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidRemovalRule {
        rule: text.to_string(),
        reason: reason.to_string(),
    };

    let rule = text.trim();
    let Some((key, value)) = rule.split_once('=') else {
        return Err(invalid("expected key=value"));
    };
    if key != "port" {
        return Err(invalid("unknown rule kind, expected port"));
    }

    let (from, to) = value.split_once(':').unwrap_or((value, value));
    let from_port = parse_port(from).ok_or_else(|| invalid("from port is not an integer"))?;
    let to_port = parse_port(to).ok_or_else(|| invalid("to port is not an integer"))?;

    Ok(RemovalRule::Port(PortRemovalRule::new(from_port, to_port)))
}

fn parse_port(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
