//! Property maps attached to providers and runtimes.
//!
//! Keys keep the spelling they were inserted with, but every lookup is
//! case-insensitive.

use std::{collections::BTreeMap, fmt};

/// Well-known property keys.
pub mod keys {
    /// Discriminator marking a route-group provider.
    pub const ROUTE_GROUP: &str = "route.group";
    /// Discriminator marking a handler provider.
    pub const ROUTE_HANDLER: &str = "route.handler";
    /// Discriminator marking an interceptor provider.
    pub const ROUTE_INTERCEPTOR: &str = "route.interceptor";
    /// Identity assigned by the discovery source.
    pub const SERVICE_ID: &str = "service.id";
    /// Declared provider name.
    pub const NAME: &str = "name";
    /// Route-group path.
    pub const PATH: &str = "path";
    /// Alias for [`PATH`].
    pub const BASE: &str = "base";
    /// Integer rank; higher wins conflicts.
    pub const RANK: &str = "rank";
    /// The group declares itself the default group.
    pub const DEFAULT: &str = "default";
    /// The group wraps externally authored content.
    pub const LEGACY: &str = "legacy";
    /// Filter over runtime properties.
    pub const TARGET: &str = "target";
    /// Filter over route-group properties.
    pub const SELECT: &str = "select";
    /// One or more filters over interceptor properties.
    pub const REQUIRES: &str = "requires";
    /// Handler route template, relative to its group's path.
    pub const ROUTE: &str = "route";
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    Str(String),
    /// A list of values; filters match if any element matches.
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns `true` for `Bool(true)` and for the string `"true"` in any case.
    pub fn is_truthy(&self) -> bool {
        match self {
            PropertyValue::Bool(b) => *b,
            PropertyValue::Str(s) => s.eq_ignore_ascii_case("true"),
            PropertyValue::Int(_) | PropertyValue::List(_) => false,
        }
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as an integer, parsing strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Collects string values, flattening one level of list.
    pub fn strings(&self) -> Vec<&str> {
        match self {
            PropertyValue::Str(s) => vec![s.as_str()],
            PropertyValue::List(items) => items.iter().filter_map(PropertyValue::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value.into())
    }
}

/// Values above `i64::MAX` are kept as their decimal string.
impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(PropertyValue::Int)
            .unwrap_or_else(|_| PropertyValue::Str(value.to_string()))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(value: Vec<T>) -> Self {
        PropertyValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// A string-keyed property map with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, replacing any existing key that differs only by case.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        if let Some(existing) = self.find_key(&key).map(str::to_owned) {
            self.entries.remove(&existing);
        }
        self.entries.insert(key, value.into());
    }

    /// Remove a key, ignoring case.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let existing = self.find_key(key)?.to_owned();
        self.entries.remove(&existing)
    }

    /// Look up a key, ignoring case.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        if let Some(value) = self.entries.get(key) {
            return Some(value);
        }
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Look up a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether the key is present and truthy.
    pub fn is_truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(PropertyValue::is_truthy)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_key(&self, key: &str) -> Option<&str> {
        self.entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}
