//! Error types for the authorization store
//!
//! Domain failures travel as a [`Fault`]: a reason code plus a warning
//! message plus free-form JSON context, so the route layer can map them to
//! transport status codes without inspecting message text. Persistence
//! failures stay in their own [`StoreError`] variants and are never folded
//! into `DATABASE-ERROR`.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Reason code attached to every recoverable domain failure.
///
/// Wire names are SCREAMING-KEBAB-CASE (`WRONG-FORMAT`, `USER-UNKNOWN`, …);
/// the operator-scoping code abbreviates to `FORBIDDEN-FOR-OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Reason {
    /// Required argument absent, empty, or syntactically unusable
    WrongFormat,
    /// Payload parsed but its content is unusable
    WrongData,
    UserUnknown,
    OperatorUnknown,
    RoleUnknown,
    BranchUnknown,
    FunctionUnknown,
    FuncsetUnknown,
    AgentUnknown,
    AlreadyExists,
    AlreadyEmployed,
    AlreadyUnemployed,
    NoVacantPositions,
    WrongSecret,
    SecretExpired,
    /// Target lies outside the operator's own branch subtree
    #[serde(rename = "FORBIDDEN-FOR-OP")]
    ForbiddenForOperator,
    /// Structurally forbidden edit, e.g. deleting the root branch
    NotAllowed,
    /// Deleting a person who still occupies a position
    UserEmployed,
    NotInSet,
    /// A structural invariant of the stored document is violated
    DatabaseError,
}

impl Reason {
    /// Wire name of the reason code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::WrongFormat => "WRONG-FORMAT",
            Reason::WrongData => "WRONG-DATA",
            Reason::UserUnknown => "USER-UNKNOWN",
            Reason::OperatorUnknown => "OPERATOR-UNKNOWN",
            Reason::RoleUnknown => "ROLE-UNKNOWN",
            Reason::BranchUnknown => "BRANCH-UNKNOWN",
            Reason::FunctionUnknown => "FUNCTION-UNKNOWN",
            Reason::FuncsetUnknown => "FUNCSET-UNKNOWN",
            Reason::AgentUnknown => "AGENT-UNKNOWN",
            Reason::AlreadyExists => "ALREADY-EXISTS",
            Reason::AlreadyEmployed => "ALREADY-EMPLOYED",
            Reason::AlreadyUnemployed => "ALREADY-UNEMPLOYED",
            Reason::NoVacantPositions => "NO-VACANT-POSITIONS",
            Reason::WrongSecret => "WRONG-SECRET",
            Reason::SecretExpired => "SECRET-EXPIRED",
            Reason::ForbiddenForOperator => "FORBIDDEN-FOR-OP",
            Reason::NotAllowed => "NOT-ALLOWED",
            Reason::UserEmployed => "USER-EMPLOYED",
            Reason::NotInSet => "NOT-IN-SET",
            Reason::DatabaseError => "DATABASE-ERROR",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable domain failure: `(reason, message, context)`.
///
/// Serializes as the wire envelope
/// `{"result": false, "reason": …, "warning": …, …context}`.
#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct Fault {
    pub reason: Reason,
    pub message: String,
    pub context: Map<String, Value>,
}

impl Fault {
    /// Build a fault and log it at warning level.
    ///
    /// Internal-consistency faults (`DatabaseError`) log at error level
    /// instead; a malformed branch must be loud but must not take the
    /// service down.
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        let message = message.into();
        match reason {
            Reason::DatabaseError => tracing::error!(reason = %reason, "{message}"),
            _ => warn!(reason = %reason, "{message}"),
        }
        Self {
            reason,
            message,
            context: Map::new(),
        }
    }

    /// Attach a context field to the wire envelope.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl Serialize for Fault {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3 + self.context.len()))?;
        map.serialize_entry("result", &false)?;
        map.serialize_entry("reason", self.reason.as_str())?;
        map.serialize_entry("warning", &self.message)?;
        for (k, v) in &self.context {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Top-level store errors.
///
/// `Io` and `Json` cover the persistence path; they are fatal to the
/// triggering operation and surface distinctly from domain faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] Fault),

    #[error("persistence I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("document serialization failure: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// The domain fault, when this is one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            StoreError::Domain(f) => Some(f),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_wire_names() {
        assert_eq!(Reason::WrongFormat.as_str(), "WRONG-FORMAT");
        assert_eq!(Reason::ForbiddenForOperator.as_str(), "FORBIDDEN-FOR-OP");
        assert_eq!(
            serde_json::to_value(Reason::AlreadyUnemployed).unwrap(),
            serde_json::json!("ALREADY-UNEMPLOYED")
        );
        assert_eq!(
            serde_json::to_value(Reason::ForbiddenForOperator).unwrap(),
            serde_json::json!("FORBIDDEN-FOR-OP")
        );
        assert_eq!(
            serde_json::from_value::<Reason>(serde_json::json!("NOT-IN-SET")).unwrap(),
            Reason::NotInSet
        );
    }

    #[test]
    fn fault_envelope() {
        let fault = Fault::new(Reason::BranchUnknown, "branch 'x' is unknown")
            .with("bad_value", "x");
        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(value["result"], serde_json::json!(false));
        assert_eq!(value["reason"], serde_json::json!("BRANCH-UNKNOWN"));
        assert_eq!(value["warning"], serde_json::json!("branch 'x' is unknown"));
        assert_eq!(value["bad_value"], serde_json::json!("x"));
    }

    #[test]
    fn io_error_is_not_a_domain_fault() {
        let err = StoreError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(err.fault().is_none());
        assert!(err.to_string().contains("persistence I/O failure"));
    }
}
