//! Run settings: where the stats come from and how to filter them.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::filter::FeatureFilter;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder holding the source kymographs.
    pub directory: Option<String>,
    /// Source file name.
    pub name: Option<String>,
    pub stat_filters: Vec<FeatureFilter>,
    /// Value used to clip low-quality stats before feature filtering.
    pub initial_filter_value: Option<f64>,
    /// Worker threads for filtering. `None` uses the shared pool.
    pub num_threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory: None,
            name: None,
            stat_filters: Vec::new(),
            initial_filter_value: Some(0.0),
            num_threads: None,
        }
    }
}

impl Settings {
    pub fn new(directory: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            directory: Some(directory.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Settings for another source file, with a copy of this filter list.
    ///
    /// The initial filter value and thread count are reset to defaults.
    pub fn copy_on(&self, directory: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stat_filters: self.stat_filters.clone(),
            ..Self::new(directory, name)
        }
    }

    pub fn check_validity(&self) -> Result<(), ConfigError> {
        if self.directory.is_none() {
            return Err(ConfigError::MissingDirectory);
        }
        if self.name.is_none() {
            return Err(ConfigError::MissingName);
        }
        Ok(())
    }

    pub fn add_filter(&mut self, filter: FeatureFilter) {
        self.stat_filters.push(filter);
    }

    /// Remove the first filter equal to `filter`. Returns whether one was found.
    pub fn remove_filter(&mut self, filter: &FeatureFilter) -> bool {
        match self.stat_filters.iter().position(|f| f == filter) {
            Some(idx) => {
                self.stat_filters.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear_filters(&mut self) {
        self.stat_filters.clear();
    }

    pub fn filters(&self) -> &[FeatureFilter] {
        &self.stat_filters
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    fn source_info(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image data:")?;
        writeln!(
            f,
            "in folder: {}\nfile: {}",
            self.directory.as_deref().unwrap_or("<none>"),
            self.name.as_deref().unwrap_or("<none>")
        )
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source_info(f)?;

        writeln!(f)?;
        writeln!(f, "Initial stat filter:")?;
        match self.initial_filter_value {
            Some(value) => writeln!(f, "Initial quality filter value: {value}.")?,
            None => writeln!(f, "No initial quality filter.")?,
        }

        writeln!(f)?;
        writeln!(f, "Stat feature filters:")?;
        if self.stat_filters.is_empty() {
            writeln!(f, "No stat feature filters.")?;
        } else {
            writeln!(f, "Set with {} stat feature filters:", self.stat_filters.len())?;
            for filter in &self.stat_filters {
                writeln!(f, " - {filter}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::RATE;
    use tempfile::tempdir;

    #[test]
    fn test_validity() {
        assert!(matches!(
            Settings::default().check_validity(),
            Err(ConfigError::MissingDirectory)
        ));
        let no_name = Settings {
            directory: Some("/data".into()),
            ..Settings::default()
        };
        assert!(matches!(no_name.check_validity(), Err(ConfigError::MissingName)));
        assert!(Settings::new("/data", "k.tif").check_validity().is_ok());
    }

    #[test]
    fn test_copy_on_duplicates_filters() {
        let mut settings = Settings::new("/a", "one.tif");
        settings.add_filter(FeatureFilter::new(RATE, 1.0, true));
        settings.num_threads = Some(2);

        let mut copy = settings.copy_on("/b", "two.tif");
        assert_eq!(copy.directory.as_deref(), Some("/b"));
        assert_eq!(copy.filters(), settings.filters());
        assert_eq!(copy.num_threads, None);

        copy.clear_filters();
        assert_eq!(settings.filters().len(), 1);
    }

    #[test]
    fn test_remove_filter() {
        let mut settings = Settings::default();
        let f = FeatureFilter::new(RATE, 2.0, false);
        settings.add_filter(f.clone());
        assert!(settings.remove_filter(&f));
        assert!(!settings.remove_filter(&f));
    }

    #[test]
    fn test_json_defaults_and_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"directory": "/d", "stat_filters": [{"feature": "RATE", "value": 0.5, "is_above": true}]}"#,
        )
        .unwrap();

        let settings = Settings::from_json(&path).unwrap();
        assert_eq!(settings.name, None);
        assert_eq!(settings.initial_filter_value, Some(0.0));
        assert_eq!(settings.stat_filters, vec![FeatureFilter::new(RATE, 0.5, true)]);

        let out = dir.path().join("out.json");
        settings.to_json(&out).unwrap();
        assert_eq!(Settings::from_json(&out).unwrap(), settings);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Settings::from_json(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_display() {
        let mut settings = Settings::new("/d", "k.tif");
        settings.add_filter(FeatureFilter::new(RATE, 1.0, true));
        let text = settings.to_string();
        assert!(text.contains("in folder: /d\nfile: k.tif\n"));
        assert!(text.contains("Initial quality filter value: 0."));
        assert!(text.contains("Set with 1 stat feature filters:\n - RATE >= 1.0\n"));
    }
}
