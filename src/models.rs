//! Shared data models used across modules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two disjoint account kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Teacher,
    Student,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Teacher => "teacher",
            PrincipalKind::Student => "student",
        }
    }

    /// Backing table for accounts of this kind
    pub(crate) fn table(&self) -> &'static str {
        match self {
            PrincipalKind::Teacher => "teachers",
            PrincipalKind::Student => "students",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(PrincipalKind::Teacher),
            "student" => Ok(PrincipalKind::Student),
            other => Err(format!("unknown principal kind: {}", other)),
        }
    }
}

/// An authenticated actor.
///
/// Every authorization decision matches on this enum, so adding a kind is a
/// compile error at each check rather than a silently failing string compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Teacher(i64),
    Student(i64),
}

impl Principal {
    pub fn new(kind: PrincipalKind, id: i64) -> Self {
        match kind {
            PrincipalKind::Teacher => Principal::Teacher(id),
            PrincipalKind::Student => Principal::Student(id),
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Principal::Teacher(id) | Principal::Student(id) => *id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::Teacher(_) => PrincipalKind::Teacher,
            Principal::Student(_) => PrincipalKind::Student,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_round_trips_through_kind() {
        let p = Principal::new(PrincipalKind::Student, 7);
        assert_eq!(p, Principal::Student(7));
        assert_eq!(p.kind(), PrincipalKind::Student);
        assert_eq!(p.id(), 7);
    }

    #[test]
    fn test_principal_kind_parse() {
        assert_eq!("teacher".parse::<PrincipalKind>(), Ok(PrincipalKind::Teacher));
        assert!("admin".parse::<PrincipalKind>().is_err());
    }

    #[test]
    fn test_principal_serializes_tagged() {
        let json = serde_json::to_value(Principal::Teacher(3)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "teacher", "id": 3}));
    }
}
