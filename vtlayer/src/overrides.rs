//! Long-lived style and visibility override tables.
//!
//! The store records every override call here, independent of which tiles
//! happen to be loaded. Newly decoded features are resolved through an
//! [`OverridePolicy`] snapshot of these tables, so the precedence rule is a
//! pure function of the tables and the feature:
//!
//! 1. for each property of the feature, in key order: the initial style,
//!    then the recorded property style
//! 2. the most recently changed matching property toggle
//! 3. the feature-id style, merged last
//! 4. the feature-id visibility, applied last
//!
//! Toggles resolve by recency so that a feature decoded later agrees with
//! loaded copies, where each changing toggle call overwrites the last.

use std::collections::HashMap;

use crate::geometry::{FeatureData, PropertyValue};
use crate::style::{Style, StyleTable};

/// Global override tables owned by the store.
#[derive(Debug, Clone, Default)]
pub struct OverrideTables {
    initial_styles: StyleTable,
    property_styles: StyleTable,
    /// Visibility per `(property, value)`, stamped with the toggle sequence
    /// number of its last change.
    property_visibility: HashMap<String, HashMap<PropertyValue, (bool, u64)>>,
    toggles: u64,
    feature_styles: HashMap<String, Style>,
    feature_visibility: HashMap<String, bool>,
}

impl OverrideTables {
    /// Create tables seeded with the configured initial styles.
    pub fn new(initial_styles: StyleTable) -> Self {
        Self {
            initial_styles,
            ..Default::default()
        }
    }

    /// Record visibility for `(property, value)`.
    ///
    /// Returns `true` if the recorded value changed. A first record always
    /// counts as a change.
    pub fn record_property_visibility(
        &mut self,
        property: &str,
        value: &PropertyValue,
        visible: bool,
    ) -> bool {
        let entries = self
            .property_visibility
            .entry(property.to_string())
            .or_default();
        if entries.get(value).map(|&(on, _)| on) == Some(visible) {
            return false;
        }
        self.toggles += 1;
        entries.insert(value.clone(), (visible, self.toggles));
        true
    }

    /// Merge a style into the `(property, value)` table.
    ///
    /// Returns `true` if the recorded style changed.
    pub fn record_property_style(
        &mut self,
        property: &str,
        value: &PropertyValue,
        style: &Style,
    ) -> bool {
        self.property_styles.merge(property, value.clone(), style)
    }

    /// Merge a style into the feature-id table.
    pub fn record_feature_style(&mut self, id: &str, style: &Style) -> bool {
        self.feature_styles
            .entry(id.to_string())
            .or_default()
            .merge(style)
    }

    /// Record visibility for a single feature id.
    pub fn record_feature_visibility(&mut self, id: &str, visible: bool) -> bool {
        self.feature_visibility.insert(id.to_string(), visible) != Some(visible)
    }

    /// Recorded visibility override for a feature id, if any.
    pub fn feature_visibility(&self, id: &str) -> Option<bool> {
        self.feature_visibility.get(id).copied()
    }

    /// Ids that carry a visibility override.
    pub fn feature_visibility_ids(&self) -> impl Iterator<Item = (&str, bool)> {
        self.feature_visibility
            .iter()
            .map(|(id, visible)| (id.as_str(), *visible))
    }

    /// Ids that carry a style override, with the merged style.
    pub fn feature_styles(&self) -> impl Iterator<Item = (&str, &Style)> {
        self.feature_styles
            .iter()
            .map(|(id, style)| (id.as_str(), style))
    }

    /// Snapshot the tables for resolving a batch of features.
    pub fn policy(&self) -> OverridePolicy<'_> {
        OverridePolicy { tables: self }
    }
}

/// Initial style and visibility for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub style: Style,
    pub visible: bool,
}

/// Read-only view of [`OverrideTables`] passed into tile finalization.
#[derive(Debug, Clone, Copy)]
pub struct OverridePolicy<'a> {
    tables: &'a OverrideTables,
}

impl OverridePolicy<'_> {
    /// Compute the initial style and visibility of a decoded feature.
    pub fn resolve(&self, id: &str, data: &FeatureData) -> Resolved {
        let tables = self.tables;
        let mut style = Style::new();
        let mut visible = true;
        let mut latest_toggle = 0;

        for (property, value) in &data.properties {
            if let Some(initial) = tables.initial_styles.get(property, value) {
                style.merge(initial);
            }
            if let Some(recorded) = tables.property_styles.get(property, value) {
                style.merge(recorded);
            }
            if let Some(&(on, seq)) = tables
                .property_visibility
                .get(property)
                .and_then(|values| values.get(value))
            {
                if seq > latest_toggle {
                    latest_toggle = seq;
                    visible = on;
                }
            }
        }

        if let Some(feature_style) = tables.feature_styles.get(id) {
            style.merge(feature_style);
        }
        if let Some(&on) = tables.feature_visibility.get(id) {
            visible = on;
        }

        Resolved { style, visible }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, Properties};
    use serde_json::json;

    fn data(kind: &str) -> FeatureData {
        let mut properties = Properties::new();
        properties.insert("type".to_string(), kind.into());
        FeatureData::new(Geometry::Point([0.0, 0.0]), properties)
    }

    #[test]
    fn test_defaults_are_visible_and_unstyled() {
        let tables = OverrideTables::default();
        let resolved = tables.policy().resolve("a", &data("point"));
        assert!(resolved.visible);
        assert!(resolved.style.is_empty());
    }

    #[test]
    fn test_first_visibility_record_is_a_change() {
        let mut tables = OverrideTables::default();
        let value = PropertyValue::from("point");
        assert!(tables.record_property_visibility("type", &value, true));
        assert!(!tables.record_property_visibility("type", &value, true));
        assert!(tables.record_property_visibility("type", &value, false));
    }

    #[test]
    fn test_property_style_layers_over_initial() {
        let initial = StyleTable::new().with(
            "type",
            "point",
            Style::new().with("color", "blue").with("radius", 4),
        );
        let mut tables = OverrideTables::new(initial);
        tables.record_property_style("type", &"point".into(), &Style::new().with("color", "green"));

        let style = tables.policy().resolve("a", &data("point")).style;
        assert_eq!(style.get("color"), Some(&json!("green")));
        assert_eq!(style.get("radius"), Some(&json!(4)));
    }

    #[test]
    fn test_feature_id_overrides_win() {
        let mut tables = OverrideTables::default();
        tables.record_property_style("type", &"point".into(), &Style::new().with("color", "green"));
        tables.record_property_visibility("type", &"point".into(), false);
        tables.record_feature_style("a", &Style::new().with("color", "red"));
        tables.record_feature_visibility("a", true);

        let resolved = tables.policy().resolve("a", &data("point"));
        assert_eq!(resolved.style.get("color"), Some(&json!("red")));
        assert!(resolved.visible);

        let other = tables.policy().resolve("b", &data("point"));
        assert_eq!(other.style.get("color"), Some(&json!("green")));
        assert!(!other.visible);
    }

    #[test]
    fn test_feature_style_records_merge() {
        let mut tables = OverrideTables::default();
        assert!(tables.record_feature_style("a", &Style::new().with("color", "red")));
        assert!(tables.record_feature_style("a", &Style::new().with("weight", 2)));
        assert!(!tables.record_feature_style("a", &Style::new().with("weight", 2)));

        let style = tables.policy().resolve("a", &data("x")).style;
        assert_eq!(style.len(), 2);
    }

    #[test]
    fn test_latest_toggle_wins_across_properties() {
        let mut properties = Properties::new();
        properties.insert("kind".to_string(), "x".into());
        properties.insert("type".to_string(), "park".into());
        let both = FeatureData::new(Geometry::Point([0.0, 0.0]), properties);

        let mut tables = OverrideTables::default();
        tables.record_property_visibility("type", &"park".into(), false);
        tables.record_property_visibility("kind", &"x".into(), true);
        assert!(tables.policy().resolve("a", &both).visible);

        tables.record_property_visibility("type", &"park".into(), true);
        tables.record_property_visibility("type", &"park".into(), false);
        assert!(!tables.policy().resolve("a", &both).visible);

        // A repeated toggle is not a change and keeps its old position.
        tables.record_property_visibility("kind", &"x".into(), true);
        assert!(!tables.policy().resolve("a", &both).visible);
    }
}
