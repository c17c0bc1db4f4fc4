//! Form descriptions for token visibility configuration.
//!
//! DESIGN
//! ======
//! The host renders its own configuration UI; this module only maps a
//! [`VisibilityConfig`] to a declarative field list. Field names are the
//! flag keys, so a renderer can write submitted values straight back into
//! the token's flag map.

use serde::Serialize;

use crate::config::{FLAG_MIN_VISIBLE_DISTANCE, FLAG_STEALTH_MODIFIER, FLAG_STEALTH_ON_CREATE, VisibilityConfig};

// =============================================================================
// TYPES
// =============================================================================

/// Current value of a form field, typed by widget kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum FieldValue {
    Number(Option<f64>),
    Integer(i64),
    Checkbox(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    pub hint: &'static str,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormDescription {
    pub title: &'static str,
    pub fields: Vec<FormField>,
}

// =============================================================================
// MAPPING
// =============================================================================

/// Describe the configuration form for one token.
#[must_use]
pub fn config_form(config: &VisibilityConfig) -> FormDescription {
    FormDescription {
        title: "Proximity Visibility",
        fields: vec![
            FormField {
                name: FLAG_MIN_VISIBLE_DISTANCE,
                label: "Minimum visible distance (ft)",
                hint: "Reveal this token when a player token is within this range. Leave empty to manage visibility manually.",
                value: FieldValue::Number(config.min_visibility_distance_feet),
            },
            FormField {
                name: FLAG_STEALTH_ON_CREATE,
                label: "Roll Stealth when placed",
                hint: "Roll a Stealth check for this token when it is added to a scene.",
                value: FieldValue::Checkbox(config.stealth_on_create),
            },
            FormField {
                name: FLAG_STEALTH_MODIFIER,
                label: "Stealth modifier",
                hint: "Flat bonus added to the Stealth roll.",
                value: FieldValue::Integer(config.stealth_modifier),
            },
        ],
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_flag_keys() {
        let form = config_form(&VisibilityConfig::default());
        let names: Vec<&str> = form.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["min_visible_distance", "stealth_on_create", "stealth_modifier"]);
    }

    #[test]
    fn values_mirror_config() {
        let config = VisibilityConfig {
            min_visibility_distance_feet: Some(30.0),
            stealth_on_create: true,
            stealth_modifier: 4,
        };
        let form = config_form(&config);
        assert_eq!(form.fields[0].value, FieldValue::Number(Some(30.0)));
        assert_eq!(form.fields[1].value, FieldValue::Checkbox(true));
        assert_eq!(form.fields[2].value, FieldValue::Integer(4));
    }

    #[test]
    fn description_serializes() {
        let form = config_form(&VisibilityConfig::default());
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["title"], "Proximity Visibility");
        assert_eq!(json["fields"][0]["value"]["kind"], "number");
    }
}
