//! Types shared by several Stowage CRDs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle phase of a backup or restore request
///
/// Transitions only move forward: `Pending -> Running -> Completed | Failed`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RequestPhase {
    /// Accepted, no worker started yet
    #[default]
    Pending,
    /// A worker Job has been created
    Running,
    /// The worker finished successfully
    Completed,
    /// The request or its worker failed
    Failed,
}

impl RequestPhase {
    /// True for phases no code path leaves
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// The four request kinds a worker can be started for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Namespaced backup
    Backup,
    /// Cluster-scoped backup
    ClusterBackup,
    /// Namespaced restore
    Restore,
    /// Cluster-scoped restore
    ClusterRestore,
}

impl RequestKind {
    /// Kind name as it appears on the API object
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "Backup",
            Self::ClusterBackup => "ClusterBackup",
            Self::Restore => "Restore",
            Self::ClusterRestore => "ClusterRestore",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::Backup | Self::Restore)
    }

    /// Whether this kind produces an archive
    pub fn is_backup(&self) -> bool {
        matches!(self, Self::Backup | Self::ClusterBackup)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Backup" => Ok(Self::Backup),
            "ClusterBackup" => Ok(Self::ClusterBackup),
            "Restore" => Ok(Self::Restore),
            "ClusterRestore" => Ok(Self::ClusterRestore),
            other => Err(Error::unsupported("request kind", other)),
        }
    }
}

/// Whether the request blocks its creator (informational only)
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Fire and forget
    #[default]
    Async,
    /// Caller waits for completion
    Sync,
}

/// Condition status values
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition state is unknown
    Unknown,
}

/// Standard Kubernetes-style status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Reachable)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Reference to an object in the same scope by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Name of the referenced object
    pub name: String,
}

/// Reference to a Secret, optionally in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    /// Secret name
    #[serde(default)]
    pub name: String,

    /// Secret namespace (defaults to the operator namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    /// Namespace to read the secret from
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default)
    }
}

/// Label selector operator
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

/// A label selector requirement (similar to Kubernetes LabelSelectorRequirement)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,

    /// Operator representing the relationship between label and values
    pub operator: LabelSelectorOperator,

    /// Values for `In` and `NotIn`; empty for `Exists` and `DoesNotExist`
    #[serde(default)]
    pub values: Vec<String>,
}

/// Kubernetes label selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// True when the selector matches everything
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Render as an API server label-selector query (`app=web,tier in (a,b)`)
    ///
    /// Returns `None` for an empty selector.
    pub fn to_query(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut terms: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        for req in &self.match_expressions {
            let mut values = req.values.clone();
            values.sort();
            terms.push(match req.operator {
                LabelSelectorOperator::In => format!("{} in ({})", req.key, values.join(",")),
                LabelSelectorOperator::NotIn => {
                    format!("{} notin ({})", req.key, values.join(","))
                }
                LabelSelectorOperator::Exists => req.key.clone(),
                LabelSelectorOperator::DoesNotExist => format!("!{}", req.key),
            });
        }

        Some(terms.join(","))
    }
}

/// Parse a duration such as `90s`, `30m`, `2h` or `1h30m`
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::validation("empty duration"));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 90s, 1h30m",
            input
        ))
    };

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        total += match c {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return Err(invalid()),
        };
    }
    if !digits.is_empty() {
        return Err(invalid());
    }

    Ok(Duration::from_secs(total))
}
