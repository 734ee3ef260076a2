//! Authorization grants: the center/department visibility scope of a user.

use crate::channel::ChannelId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const WILDCARD: &str = "*";

/// One security dimension of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Wildcard,
    Ids(BTreeSet<i64>),
}

impl Scope {
    pub fn ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        Scope::Ids(ids.into_iter().collect())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Scope::Wildcard)
    }

    pub fn matches(&self, id: i64) -> bool {
        match self {
            Scope::Wildcard => true,
            Scope::Ids(ids) => ids.contains(&id),
        }
    }

    /// Rows without a security value are visible to every grant.
    pub fn admits(&self, value: Option<i64>) -> bool {
        match value {
            None => true,
            Some(id) => self.matches(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Wildcard => f.write_str(WILDCARD),
            Scope::Ids(ids) => {
                let joined = ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                f.write_str(&joined)
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid scope id: {0}")]
pub struct ScopeParseError(pub String);

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed == WILDCARD {
            return Ok(Scope::Wildcard);
        }
        if trimmed.is_empty() {
            return Ok(Scope::Ids(BTreeSet::new()));
        }
        trimmed
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<i64>()
                    .map_err(|_| ScopeParseError(part.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Scope::Ids)
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scope::Wildcard => serializer.serialize_str(WILDCARD),
            Scope::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Ids(BTreeSet<i64>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) if text == WILDCARD => Ok(Scope::Wildcard),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or an id array, got {text:?}"
            ))),
            Raw::Ids(ids) => Ok(Scope::Ids(ids)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub center_ids: Scope,
    pub department_ids: Scope,
}

impl Grant {
    pub fn new(center_ids: Scope, department_ids: Scope) -> Self {
        Self {
            center_ids,
            department_ids,
        }
    }

    pub fn unrestricted() -> Self {
        Self::new(Scope::Wildcard, Scope::Wildcard)
    }

    pub fn admits(&self, center: Option<i64>, department: Option<i64>) -> bool {
        self.center_ids.admits(center) && self.department_ids.admits(department)
    }

    /// Administrative checks use this: both dimensions are wildcards.
    pub fn is_unrestricted(&self) -> bool {
        self.center_ids.is_wildcard() && self.department_ids.is_wildcard()
    }

    pub fn covers(&self, channel: &ChannelId) -> bool {
        self.center_ids.matches(channel.center_id)
            && self.department_ids.matches(channel.department_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Topic;

    #[test]
    fn wildcard_matches_everything_and_sets_only_members() {
        assert!(Scope::Wildcard.matches(99));
        let scope = Scope::ids([1, 3]);
        assert!(scope.matches(1));
        assert!(!scope.matches(2));
    }

    #[test]
    fn null_security_value_is_always_admitted() {
        let grant = Grant::new(Scope::ids([]), Scope::ids([]));
        assert!(grant.admits(None, None));
        assert!(!grant.admits(Some(1), None));
    }

    #[test]
    fn center_grant_filters_rows_by_center() {
        let grant = Grant::new(Scope::ids([1]), Scope::Wildcard);
        assert!(grant.admits(Some(1), Some(8)));
        assert!(!grant.admits(Some(2), Some(8)));
    }

    #[test]
    fn scope_serde_accepts_star_or_array() {
        let grant: Grant =
            serde_json::from_str(r#"{"centerIds":"*","departmentIds":[5,2]}"#).unwrap();
        assert!(grant.center_ids.is_wildcard());
        assert_eq!(grant.department_ids, Scope::ids([2, 5]));

        let encoded = serde_json::to_value(&grant).unwrap();
        assert_eq!(encoded["centerIds"], "*");
        assert_eq!(encoded["departmentIds"], serde_json::json!([2, 5]));

        assert!(serde_json::from_str::<Scope>(r#""all""#).is_err());
    }

    #[test]
    fn scope_text_form_parses_and_renders() {
        assert_eq!("*".parse::<Scope>().unwrap(), Scope::Wildcard);
        assert_eq!(" 3, 1 ".parse::<Scope>().unwrap(), Scope::ids([1, 3]));
        assert_eq!(Scope::ids([3, 1]).to_string(), "1,3");
        assert!("1,x".parse::<Scope>().is_err());
    }

    #[test]
    fn department_only_grant_covers_any_center() {
        let grant = Grant::new(Scope::Wildcard, Scope::ids([5]));
        for center_id in [1, 2, 999] {
            assert!(grant.covers(&ChannelId::new(Topic::Tasks, center_id, 5)));
            assert!(!grant.covers(&ChannelId::new(Topic::Tasks, center_id, 6)));
        }
        assert!(!grant.is_unrestricted());
        assert!(Grant::unrestricted().is_unrestricted());
    }
}
