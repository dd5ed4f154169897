use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde_json::Value as JsonValue;

use super::collection::StatCollection;
use super::model::{FeatureValue, IdGenerator, Stat, StatRef};

const ID_COLUMN: &str = "id";
const GROUP_COLUMN: &str = "group";
const NAME_COLUMN: &str = "name";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a stats table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json` – `[{ "group": "...", "id": 3, "RATE": 1.5, ... }, ...]`
/// * `.csv`  – header row; one stat per row
///
/// Every record needs a `group`. `id` is optional: records without one get a
/// fresh ID from `ids`, records with one ratchet `ids` past it. `name` sets the
/// stat name; every other column becomes a feature. Stats are filed with
/// [`StatCollection::add`], so they all start visible.
pub fn load_file(path: &Path, ids: &IdGenerator) -> Result<StatCollection> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let stats = match ext.as_str() {
        "json" => load_json(path, ids)?,
        "csv" => load_csv(path, ids)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    let collection = StatCollection::new();
    for (group, stat) in &stats {
        collection.add(stat, group);
    }
    info!(
        "Loaded {} stats in {} groups from {}",
        stats.len(),
        collection.key_set().len(),
        path.display()
    );
    Ok(collection)
}

/// Build the stat for one record. IDs must be unique within a file, whether
/// given explicitly or issued for a record without one.
/// A repeated ID comes back as the error.
fn new_stat(ids: &IdGenerator, id: Option<i64>, seen: &mut HashSet<i64>) -> Result<Stat, i64> {
    let stat = match id {
        Some(id) => Stat::with_id(ids, id),
        None => Stat::with_features(ids, "", std::iter::empty::<(String, FeatureValue)>()),
    };
    if seen.insert(stat.id()) {
        Ok(stat)
    } else {
        Err(stat.id())
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   {
///     "id": 12,
///     "group": "kymo_01.tif",
///     "name": "MT 3",
///     "RATE": 1.25,
///     "START_TIME": 4
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path, ids: &IdGenerator) -> Result<Vec<(String, StatRef)>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut stats = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let group = obj
            .get(GROUP_COLUMN)
            .and_then(|v| v.as_str())
            .with_context(|| format!("Row {i}: missing or invalid '{GROUP_COLUMN}'"))?;

        let id = match obj.get(ID_COLUMN) {
            None | Some(JsonValue::Null) => None,
            Some(v) => Some(
                v.as_i64()
                    .with_context(|| format!("Row {i}: '{ID_COLUMN}' is not an integer"))?,
            ),
        };

        let stat = new_stat(ids, id, &mut seen)
            .map_err(|dup| anyhow!("Row {i}: duplicate id {dup}"))?;
        for (key, val) in obj {
            match key.as_str() {
                ID_COLUMN | GROUP_COLUMN => {}
                NAME_COLUMN => stat.set_name(val.as_str().unwrap_or_default()),
                _ => {
                    if let Some(value) = json_to_feature(val) {
                        stat.put_feature(key.as_str(), value);
                    }
                }
            }
        }

        stats.push((group.to_string(), Arc::new(stat)));
    }

    Ok(stats)
}

fn json_to_feature(val: &JsonValue) -> Option<FeatureValue> {
    match val {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(FeatureValue::Text(s.clone())),
        JsonValue::Number(n) => Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => FeatureValue::Integer(i),
            (None, Some(f)) => FeatureValue::Real(f),
            (None, None) => FeatureValue::Text(n.to_string()),
        }),
        JsonValue::Bool(b) => Some(FeatureValue::Integer(i64::from(*b))),
        other => Some(FeatureValue::Text(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names, one stat per row.
/// Empty cells are skipped, so the stat simply lacks that feature.
fn load_csv(path: &Path, ids: &IdGenerator) -> Result<Vec<(String, StatRef)>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let group_idx = headers
        .iter()
        .position(|h| h == GROUP_COLUMN)
        .with_context(|| format!("CSV missing '{GROUP_COLUMN}' column"))?;
    let id_idx = headers.iter().position(|h| h == ID_COLUMN);

    let mut stats = Vec::new();
    let mut seen = HashSet::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let group = record.get(group_idx).unwrap_or("").trim();
        if group.is_empty() {
            bail!("CSV row {row_no}: empty '{GROUP_COLUMN}'");
        }

        let id = match id_idx.map(|idx| record.get(idx).unwrap_or("").trim()) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<i64>()
                    .with_context(|| format!("CSV row {row_no}: '{raw}' is not a valid id"))?,
            ),
        };

        let stat = new_stat(ids, id, &mut seen)
            .map_err(|dup| anyhow!("CSV row {row_no}: duplicate id {dup}"))?;
        for (col_idx, value) in record.iter().enumerate() {
            if col_idx == group_idx || Some(col_idx) == id_idx {
                continue;
            }
            let col_name = &headers[col_idx];
            if col_name == NAME_COLUMN {
                stat.set_name(value.trim());
            } else if let Some(feature) = guess_feature_type(value.trim()) {
                stat.put_feature(col_name.as_str(), feature);
            }
        }

        stats.push((group.to_string(), Arc::new(stat)));
    }

    Ok(stats)
}

fn guess_feature_type(s: &str) -> Option<FeatureValue> {
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(FeatureValue::Integer(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(FeatureValue::Real(f));
    }
    Some(FeatureValue::Text(s.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
