use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::model::{
    AVERAGE_GROWTH_RATE, AVERAGE_SHRINK_RATE, CATASTROPHE_FREQUENCY, END_TIME, NAME, RATE,
    RESCUE_FREQUENCY, START_TIME, VISIBILITY,
};
use crate::error::SchemaError;

// ---------------------------------------------------------------------------
// Dimension – the physical unit class of a feature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    None,
    Rate,
    StartTime,
    EndTime,
    AverageGrowthRate,
    AverageShrinkRate,
    CatastropheFrequency,
    RescueFrequency,
    Name,
    /// Non-numeric features.
    String,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Dimension::None => "NONE",
            Dimension::Rate => "RATE",
            Dimension::StartTime => "START_TIME",
            Dimension::EndTime => "END_TIME",
            Dimension::AverageGrowthRate => "AVERAGE_GROWTH_RATE",
            Dimension::AverageShrinkRate => "AVERAGE_SHRINK_RATE",
            Dimension::CatastropheFrequency => "CATASTROPHE_FREQUENCY",
            Dimension::RescueFrequency => "RESCUE_FREQUENCY",
            Dimension::Name => "NAME",
            Dimension::String => "STRING",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// FeatureSchema – declared stat features
// ---------------------------------------------------------------------------

/// Declared stat features with their display metadata.
///
/// Declarations are additive: keys keep their first insertion position and
/// a later declaration only overwrites their attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    features: IndexSet<String>,
    names: HashMap<String, String>,
    short_names: HashMap<String, String>,
    dimensions: HashMap<String, Dimension>,
    is_int: HashMap<String, bool>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureSchema {
    /// A schema holding the base stat features.
    pub fn new() -> Self {
        let mut schema = Self::empty();
        schema.declare_base();
        schema
    }

    /// A schema with nothing declared.
    pub fn empty() -> Self {
        Self {
            features: IndexSet::new(),
            names: HashMap::new(),
            short_names: HashMap::new(),
            dimensions: HashMap::new(),
            is_int: HashMap::new(),
        }
    }

    fn declare_base(&mut self) {
        // (key, name, short name, dimension, is_int)
        let base: [(&str, &str, &str, Dimension, bool); 9] = [
            (RATE, "R", "R", Dimension::Rate, false),
            (START_TIME, "Start_time", "Start_time", Dimension::StartTime, true),
            (END_TIME, "End_time", "End_time", Dimension::EndTime, true),
            (
                AVERAGE_GROWTH_RATE,
                "Average_growth_rate",
                "Average_growth_rate",
                Dimension::AverageGrowthRate,
                false,
            ),
            (
                AVERAGE_SHRINK_RATE,
                "Average_shrink_rate",
                "Average_shrink_rate",
                Dimension::AverageShrinkRate,
                false,
            ),
            (
                CATASTROPHE_FREQUENCY,
                "Catastrophe_frequency",
                "Catastrophe_frequency",
                Dimension::CatastropheFrequency,
                false,
            ),
            (
                RESCUE_FREQUENCY,
                "Rescue_frequency",
                "Rescue_frequency",
                Dimension::RescueFrequency,
                false,
            ),
            (NAME, "Name", "Name", Dimension::Name, false),
            (VISIBILITY, "Visibility", "Visibility", Dimension::None, true),
        ];

        for (key, name, short, dim, int) in base {
            self.features.insert(key.to_string());
            self.names.insert(key.to_string(), name.to_string());
            self.short_names.insert(key.to_string(), short.to_string());
            self.dimensions.insert(key.to_string(), dim);
            self.is_int.insert(key.to_string(), int);
        }
    }

    /// Merge a set of feature declarations.
    ///
    /// Every key must have an entry in all four attribute maps. The whole
    /// call is checked before anything is written, so a failed call leaves
    /// the schema untouched.
    pub fn declare<S: AsRef<str>>(
        &mut self,
        keys: &[S],
        names: &HashMap<String, String>,
        short_names: &HashMap<String, String>,
        dimensions: &HashMap<String, Dimension>,
        is_int: &HashMap<String, bool>,
    ) -> Result<(), SchemaError> {
        for key in keys {
            let key = key.as_ref();
            let missing = if !names.contains_key(key) {
                Some("name")
            } else if !short_names.contains_key(key) {
                Some("short-name")
            } else if !dimensions.contains_key(key) {
                Some("dimension")
            } else if !is_int.contains_key(key) {
                Some("isInt")
            } else {
                None
            };
            if let Some(attribute) = missing {
                return Err(SchemaError::MissingAttribute {
                    key: key.to_string(),
                    attribute,
                });
            }
        }

        for key in keys {
            let key = key.as_ref();
            self.features.insert(key.to_string());
            self.names.insert(key.to_string(), names[key].clone());
            self.short_names
                .insert(key.to_string(), short_names[key].clone());
            self.dimensions.insert(key.to_string(), dimensions[key]);
            self.is_int.insert(key.to_string(), is_int[key]);
        }
        Ok(())
    }

    /// Re-declare every feature of `other` on this schema.
    pub fn declare_all_from(&mut self, other: &FeatureSchema) -> Result<(), SchemaError> {
        let keys = other.features();
        self.declare(
            &keys,
            &other.names(),
            &other.short_names(),
            &other.dimensions(),
            &other.is_int(),
        )
    }

    // -- Accessors: all return owned copies --

    /// Declared keys in declaration order.
    pub fn features(&self) -> Vec<String> {
        self.features.iter().cloned().collect()
    }

    pub fn names(&self) -> HashMap<String, String> {
        self.names.clone()
    }

    pub fn short_names(&self) -> HashMap<String, String> {
        self.short_names.clone()
    }

    pub fn dimensions(&self) -> HashMap<String, Dimension> {
        self.dimensions.clone()
    }

    pub fn is_int(&self) -> HashMap<String, bool> {
        self.is_int.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.contains(key)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Verbose listing used in model dumps.
    pub fn echo(&self) -> String {
        let mut str = String::from("stat features:\n - Declared:\n");
        self.append_declarations(&mut str);
        str.push('\n');
        str
    }

    fn append_declarations(&self, str: &mut String) {
        for key in &self.features {
            let name = self.names.get(key).map(String::as_str).unwrap_or("");
            let short = self.short_names.get(key).map(String::as_str).unwrap_or("");
            let dim = self
                .dimensions
                .get(key)
                .copied()
                .unwrap_or(Dimension::None);
            str.push_str(&format!("   - {key}: {name}, '{short}' ({dim})"));
            if self.is_int.get(key).copied().unwrap_or(false) {
                str.push_str(" - integer valued.\n");
            } else {
                str.push_str(" - double valued.\n");
            }
        }
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut str = String::from("stat features declared:\n");
        self.append_declarations(&mut str);
        str.push('\n');
        f.write_str(&str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(key: &str) -> (
        HashMap<String, String>,
        HashMap<String, String>,
        HashMap<String, Dimension>,
        HashMap<String, bool>,
    ) {
        (
            HashMap::from([(key.to_string(), "Length".to_string())]),
            HashMap::from([(key.to_string(), "Len".to_string())]),
            HashMap::from([(key.to_string(), Dimension::Rate)]),
            HashMap::from([(key.to_string(), false)]),
        )
    }

    #[test]
    fn test_base_schema_declares_nine_keys() {
        let schema = FeatureSchema::new();
        assert_eq!(
            schema.features(),
            vec![
                RATE,
                START_TIME,
                END_TIME,
                AVERAGE_GROWTH_RATE,
                AVERAGE_SHRINK_RATE,
                CATASTROPHE_FREQUENCY,
                RESCUE_FREQUENCY,
                NAME,
                VISIBILITY
            ]
        );
        assert!(schema.is_int()[START_TIME]);
        assert_eq!(schema.dimensions()[VISIBILITY], Dimension::None);
        assert_eq!(schema.names()[RATE], "R");
    }

    #[test]
    fn test_declare_appends_in_order() {
        let mut schema = FeatureSchema::new();
        let (n, s, d, i) = attrs("LENGTH");
        schema.declare(&["LENGTH"], &n, &s, &d, &i).unwrap();
        assert_eq!(schema.features().last().map(String::as_str), Some("LENGTH"));
        assert_eq!(schema.short_names()["LENGTH"], "Len");
        assert_eq!(schema.len(), 10);
    }

    #[test]
    fn test_redeclare_keeps_position() {
        let mut schema = FeatureSchema::new();
        let (mut n, s, d, i) = attrs(RATE);
        n.insert(RATE.to_string(), "Rate".to_string());
        schema.declare(&[RATE], &n, &s, &d, &i).unwrap();
        assert_eq!(schema.features()[0], RATE);
        assert_eq!(schema.names()[RATE], "Rate");
        assert_eq!(schema.len(), 9);
    }

    #[test]
    fn test_missing_attribute_fails_without_mutation() {
        let mut schema = FeatureSchema::new();
        let before = schema.clone();

        let (n, s, mut d, i) = attrs("A");
        let (n_b, s_b, _, i_b) = attrs("B");
        let names: HashMap<_, _> = n.into_iter().chain(n_b).collect();
        let shorts: HashMap<_, _> = s.into_iter().chain(s_b).collect();
        let ints: HashMap<_, _> = i.into_iter().chain(i_b).collect();
        d.remove("B");

        let err = schema
            .declare(&["A", "B"], &names, &shorts, &d, &ints)
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingAttribute {
                key: "B".into(),
                attribute: "dimension"
            }
        );
        assert_eq!(err.to_string(), "missing dimension for key B");
        assert_eq!(schema, before);
    }

    #[test]
    fn test_accessors_return_copies() {
        let schema = FeatureSchema::new();
        let mut names = schema.names();
        names.insert(RATE.to_string(), "tampered".to_string());
        assert_eq!(schema.names()[RATE], "R");
    }

    #[test]
    fn test_display_lists_kinds() {
        let schema = FeatureSchema::new();
        let text = schema.to_string();
        assert!(text.starts_with("stat features declared:\n"));
        assert!(text.contains("   - START_TIME: Start_time, 'Start_time' (START_TIME) - integer valued.\n"));
        assert!(text.contains("   - RATE: R, 'R' (RATE) - double valued.\n"));
        assert!(schema.echo().contains(" - Declared:\n"));
    }
}
