// Cache key conventions.
// Keys are "<resource>:<qualifier>"; mutation flows invalidate a whole resource.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Separator between the resource and the qualifier.
pub const SEPARATOR: char = ':';

/// Marker accepted at the end of an invalidation pattern.
pub const WILDCARD: char = '*';

/// Resource categories cached by the data services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    #[serde(rename = "clientes")]
    Clients,
    #[serde(rename = "ejercicios")]
    Exercises,
    #[serde(rename = "rutinas")]
    Routines,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Clients, Resource::Exercises, Resource::Routines];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Clients => "clientes",
            Resource::Exercises => "ejercicios",
            Resource::Routines => "rutinas",
        }
    }

    /// "clientes:"
    pub fn prefix(&self) -> String {
        format!("{}{}", self.as_str(), SEPARATOR)
    }

    /// "clientes:*", the form mutation flows pass to `invalidate_pattern`.
    pub fn pattern(&self) -> String {
        format!("{}{}", self.prefix(), WILDCARD)
    }

    /// "clientes:<qualifier>"
    pub fn key(&self, qualifier: impl fmt::Display) -> String {
        format!("{}{}", self.prefix(), qualifier)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CacheError::InvalidKey(s.to_string()))
    }
}

/// The resource portion of a key, including the separator.
/// A key without a separator is its own prefix.
pub fn resource_prefix(key: &str) -> &str {
    match key.find(SEPARATOR) {
        Some(idx) => &key[..idx + SEPARATOR.len_utf8()],
        None => key,
    }
}

/// Turn an invalidation pattern into the literal prefix it matches.
pub fn pattern_prefix(pattern: &str) -> &str {
    pattern.strip_suffix(WILDCARD).unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_keys() {
        assert_eq!(Resource::Clients.key(1), "clientes:1");
        assert_eq!(Resource::Exercises.key("activos"), "ejercicios:activos");
        assert_eq!(Resource::Routines.pattern(), "rutinas:*");
    }

    #[test]
    fn test_resource_round_trip() {
        for resource in Resource::ALL {
            assert_eq!(resource.as_str().parse::<Resource>().unwrap(), resource);
        }
        assert!("socios".parse::<Resource>().is_err());
    }

    #[test]
    fn test_resource_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&Resource::Routines).unwrap(),
            "\"rutinas\""
        );
    }

    #[test]
    fn test_resource_prefix() {
        assert_eq!(resource_prefix("clientes:pendientes"), "clientes:");
        assert_eq!(resource_prefix("otros:clientes:3"), "otros:");
        assert_eq!(resource_prefix("plain"), "plain");
    }

    #[test]
    fn test_pattern_prefix_strips_one_trailing_wildcard() {
        assert_eq!(pattern_prefix("clientes:*"), "clientes:");
        assert_eq!(pattern_prefix("clientes:"), "clientes:");
        assert_eq!(pattern_prefix("a**"), "a*");
    }
}
