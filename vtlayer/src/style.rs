//! Opaque style bags.
//!
//! A [`Style`] is a key/value bag the core never interprets. The only
//! operation on it is a shallow merge where the last writer wins per key;
//! existing unrelated keys are never dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geometry::PropertyValue;

/// Shallow key/value style override bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Style(Map<String, Value>);

impl Style {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a style from a JSON value, `None` unless it is an object.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style single key insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Shallow-merge `other` into `self`.
    ///
    /// Returns `true` if any key was added or changed.
    pub fn merge(&mut self, other: &Style) -> bool {
        let mut changed = false;
        for (key, value) in &other.0 {
            if self.0.get(key) != Some(value) {
                self.0.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Styles keyed by property name, then property value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleTable {
    entries: HashMap<String, HashMap<PropertyValue, Style>>,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: &str, value: &PropertyValue) -> Option<&Style> {
        self.entries.get(property).and_then(|values| values.get(value))
    }

    /// Merge `style` into the entry for `(property, value)`.
    ///
    /// Returns `true` if the recorded style changed.
    pub fn merge(&mut self, property: &str, value: PropertyValue, style: &Style) -> bool {
        let entry = self
            .entries
            .entry(property.to_string())
            .or_default()
            .entry(value)
            .or_default();
        entry.merge(style)
    }

    /// Builder-style variant of [`StyleTable::merge`].
    pub fn with(mut self, property: &str, value: impl Into<PropertyValue>, style: Style) -> Self {
        self.merge(property, value.into(), &style);
        self
    }

    /// True if any style is recorded for `property`.
    pub fn has_property(&self, property: &str) -> bool {
        self.entries.contains_key(property)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `(property, value)` entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_unrelated_keys() {
        let mut style = Style::new().with("color", "red");
        style.merge(&Style::new().with("weight", 2));

        assert_eq!(style.get("color"), Some(&json!("red")));
        assert_eq!(style.get("weight"), Some(&json!(2)));
        assert_eq!(style.len(), 2);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut style = Style::new().with("color", "red");
        assert!(style.merge(&Style::new().with("color", "blue")));
        assert_eq!(style.get("color"), Some(&json!("blue")));
    }

    #[test]
    fn test_merge_reports_no_change() {
        let mut style = Style::new().with("color", "red");
        assert!(!style.merge(&Style::new().with("color", "red")));
        assert!(!style.merge(&Style::new()));
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(Style::from_json(json!({"color": "red"})).is_some());
        assert!(Style::from_json(json!("red")).is_none());
        assert!(Style::from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn test_style_table_merge() {
        let mut table = StyleTable::new();
        assert!(table.merge("kind", "road".into(), &Style::new().with("color", "grey")));
        assert!(table.merge("kind", "road".into(), &Style::new().with("weight", 3)));
        assert!(!table.merge("kind", "road".into(), &Style::new().with("weight", 3)));

        let style = table.get("kind", &"road".into()).unwrap();
        assert_eq!(style.len(), 2);
        assert!(table.get("kind", &"rail".into()).is_none());
        assert_eq!(table.len(), 1);
    }
}
