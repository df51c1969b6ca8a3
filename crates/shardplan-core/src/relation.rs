//! Relation keys: `(user, program, relation)` triples naming stored relations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const DEFAULT_USER: &str = "public";
pub const DEFAULT_PROGRAM: &str = "adhoc";
/// Program under which temporary relations live.
pub const TEMP_PROGRAM: &str = "__TEMP__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    #[serde(rename = "userName")]
    pub user: String,
    #[serde(rename = "programName")]
    pub program: String,
    #[serde(rename = "relationName")]
    pub relation: String,
}

impl RelationKey {
    pub fn new(
        user: impl Into<String>,
        program: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            program: program.into(),
            relation: relation.into(),
        }
    }

    /// Key of the temporary relation `name` (`public:__TEMP__:name`).
    pub fn temp(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_USER, TEMP_PROGRAM, name)
    }

    pub fn is_temp(&self) -> bool {
        self.program == TEMP_PROGRAM
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user, self.program, self.relation)
    }
}

/// Accepts `relation`, `program:relation`, or `user:program:relation`.
impl FromStr for RelationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Parse(format!("invalid relation key `{s}`")));
        }
        match parts.as_slice() {
            [rel] => Ok(Self::new(DEFAULT_USER, DEFAULT_PROGRAM, *rel)),
            [prog, rel] => Ok(Self::new(DEFAULT_USER, *prog, *rel)),
            [user, prog, rel] => Ok(Self::new(*user, *prog, *rel)),
            _ => Err(Error::Parse(format!("invalid relation key `{s}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_defaults() {
        let k: RelationKey = "R".parse().unwrap();
        assert_eq!(k.to_string(), "public:adhoc:R");
        let k: RelationKey = "alice:prog:R".parse().unwrap();
        assert_eq!(k, RelationKey::new("alice", "prog", "R"));
        assert!("a::b".parse::<RelationKey>().is_err());
        assert!("a:b:c:d".parse::<RelationKey>().is_err());
    }

    #[test]
    fn wire_field_names() {
        let v = serde_json::to_value(RelationKey::temp("x")).unwrap();
        assert_eq!(v["userName"], "public");
        assert_eq!(v["programName"], "__TEMP__");
        assert_eq!(v["relationName"], "x");
    }
}
