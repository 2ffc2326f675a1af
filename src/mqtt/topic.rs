//! Topic names and topic filters
//!
//! Publish topics are plain `/`-separated level paths. Subscription filters may
//! additionally use `+` (exactly one level) and `#` (all remaining levels, only as
//! the final level).
//!
//! ```text
//! home/+/temperature   matches  home/kitchen/temperature
//! home/#               matches  home, home/kitchen, home/kitchen/temperature
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,

    #[error("Wildcard '{wildcard}' must occupy a whole level in '{topic}'")]
    PartialWildcard { topic: String, wildcard: char },

    #[error("Multi-level wildcard '#' must be the last level in '{0}'")]
    MultiLevelNotLast(String),

    #[error("Topic '{0}' must not contain wildcards when publishing")]
    WildcardInTopicName(String),

    #[error("Topic '{0}' must not contain a NUL character")]
    NulCharacter(String),
}

/// Checks that `topic` can be used as a publish target
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter(topic.to_string()));
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopicName(topic.to_string()));
    }
    Ok(())
}

/// A validated subscription filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::Empty);
        }
        if filter.contains('\0') {
            return Err(TopicError::NulCharacter(filter.to_string()));
        }

        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
        let last = levels.len() - 1;
        for (index, level) in levels.iter().enumerate() {
            for wildcard in ['+', '#'] {
                if level.contains(wildcard) && level.len() > 1 {
                    return Err(TopicError::PartialWildcard {
                        topic: filter.to_string(),
                        wildcard,
                    });
                }
            }
            if *level == MULTI_LEVEL && index != last {
                return Err(TopicError::MultiLevelNotLast(filter.to_string()));
            }
        }

        Ok(Self {
            raw: filter.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcards(&self) -> bool {
        self.raw.contains(['+', '#'])
    }

    /// Returns true if a message published on `topic` is selected by this filter
    ///
    /// Topics starting with `$` are never matched by a leading wildcard.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.raw.starts_with(['+', '#']) {
            return false;
        }

        let mut filter_levels = self.raw.split(LEVEL_SEPARATOR);
        let mut topic_levels = topic.split(LEVEL_SEPARATOR);

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some(MULTI_LEVEL), _) => return true,
                (Some(SINGLE_LEVEL), Some(_)) => continue,
                (Some(expected), Some(actual)) if expected == actual => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
