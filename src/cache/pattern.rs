// Cache key patterns: prefix wildcard, suffix wildcard or exact

use std::fmt;

/// Key pattern used by pattern invalidation.
///
/// `prefix*` matches keys starting with `prefix`, `*suffix` keys ending with
/// `suffix`, anything else only the identical key. Matching ignores ASCII and
/// Unicode case. A trailing `*` takes precedence over a leading one, and `*`
/// alone matches every key. There is no general glob or regex support.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Prefix(String),
    Suffix(String),
    Exact(String),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if let Some(prefix) = pattern.strip_suffix('*') {
            KeyPattern::Prefix(prefix.to_lowercase())
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            KeyPattern::Suffix(suffix.to_lowercase())
        } else {
            KeyPattern::Exact(pattern.to_lowercase())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        match self {
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Suffix(suffix) => key.ends_with(suffix.as_str()),
            KeyPattern::Exact(exact) => key == *exact,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, KeyPattern::Exact(_))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            KeyPattern::Suffix(suffix) => write!(f, "*{}", suffix),
            KeyPattern::Exact(exact) => write!(f, "{}", exact),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        KeyPattern::parse(pattern)
    }
}
