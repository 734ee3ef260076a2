//! Channel keys of the shape `topic-centerId-departmentId`.

use crate::grant::{Grant, Scope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Tasks,
    CounterRecords,
    Rooms,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Tasks, Topic::CounterRecords, Topic::Rooms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Tasks => "tasks",
            Topic::CounterRecords => "counter-records",
            Topic::Rooms => "rooms",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ChannelParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == value)
            .ok_or_else(|| ChannelParseError::UnknownTopic(value.to_string()))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelParseError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("channel must be topic-center-department: {0}")]
    Shape(String),
    #[error("channel id segment is not an integer: {0}")]
    Id(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub topic: Topic,
    pub center_id: i64,
    pub department_id: i64,
}

impl ChannelId {
    pub fn new(topic: Topic, center_id: i64, department_id: i64) -> Self {
        Self {
            topic,
            center_id,
            department_id,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.topic, self.center_id, self.department_id)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Topics may themselves contain hyphens, so split from the right.
        let mut parts = value.rsplitn(3, '-');
        let department = parts.next();
        let center = parts.next();
        let topic = parts.next();
        let (Some(topic), Some(center), Some(department)) = (topic, center, department) else {
            return Err(ChannelParseError::Shape(value.to_string()));
        };

        let parse_id = |segment: &str| {
            segment
                .parse::<i64>()
                .map_err(|_| ChannelParseError::Id(segment.to_string()))
        };

        Ok(ChannelId {
            topic: topic.parse()?,
            center_id: parse_id(center)?,
            department_id: parse_id(department)?,
        })
    }
}

impl Serialize for ChannelId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The set of channels one grant can see for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    pub topic: Topic,
    pub centers: Scope,
    pub departments: Scope,
}

impl ChannelPattern {
    pub fn for_grant(topic: Topic, grant: &Grant) -> Self {
        Self {
            topic,
            centers: grant.center_ids.clone(),
            departments: grant.department_ids.clone(),
        }
    }

    /// Patterns for every topic, as stored on a push subscription.
    pub fn all_for_grant(grant: &Grant) -> Vec<Self> {
        Topic::ALL
            .into_iter()
            .map(|topic| Self::for_grant(topic, grant))
            .collect()
    }

    pub fn matches(&self, channel: &ChannelId) -> bool {
        self.topic == channel.topic
            && self.centers.matches(channel.center_id)
            && self.departments.matches(channel.department_id)
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.topic, self.centers, self.departments)
    }
}
