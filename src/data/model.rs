use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use crate::error::FeatureError;

// ---------------------------------------------------------------------------
// Feature keys
// ---------------------------------------------------------------------------

pub const RATE: &str = "RATE";
pub const START_TIME: &str = "START_TIME";
pub const END_TIME: &str = "END_TIME";
pub const AVERAGE_GROWTH_RATE: &str = "AVERAGE_GROWTH_RATE";
pub const AVERAGE_SHRINK_RATE: &str = "AVERAGE_SHRINK_RATE";
pub const CATASTROPHE_FREQUENCY: &str = "CATASTROPHE_FREQUENCY";
pub const RESCUE_FREQUENCY: &str = "RESCUE_FREQUENCY";

/// Text feature. Holds the stat's name at construction and is overwritten
/// with the group key once the stat is filed into a collection.
pub const NAME: &str = "NAME";

/// Reserved feature holding `1` (visible) or `0` (hidden).
pub const VISIBILITY: &str = "VISIBILITY";

/// The seven numeric features every stat is created with.
pub const NUMERIC_FEATURES: [&str; 7] = [
    RATE,
    START_TIME,
    END_TIME,
    AVERAGE_GROWTH_RATE,
    AVERAGE_SHRINK_RATE,
    CATASTROPHE_FREQUENCY,
    RESCUE_FREQUENCY,
];

// ---------------------------------------------------------------------------
// FeatureValue – a single cell of a stat's feature map
// ---------------------------------------------------------------------------

/// A dynamically-typed feature value.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Real(f64),
    Integer(i64),
    Text(String),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Real(v) => write!(f, "{v}"),
            FeatureValue::Integer(i) => write!(f, "{i}"),
            FeatureValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl FeatureValue {
    /// Interpret the value as an `f64`; text is not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Real(v) => Some(*v),
            FeatureValue::Integer(i) => Some(*i as f64),
            FeatureValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Real(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Integer(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Text(v)
    }
}

// ---------------------------------------------------------------------------
// IdGenerator – monotone source of stat IDs
// ---------------------------------------------------------------------------

/// Hands out strictly increasing stat IDs.
///
/// The first ID issued by a fresh generator is `0`. Stats rebuilt with an
/// explicit ID ratchet the generator forward so later IDs never collide.
#[derive(Debug)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::seeded(-1)
    }

    /// A generator whose next issued ID is `last + 1`.
    pub fn seeded(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.last.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Advance the counter to at least `id`. Never moves it backwards.
    pub fn ratchet(&self, id: i64) {
        self.last.fetch_max(id, AtomicOrdering::SeqCst);
    }

    /// The most recently issued (or ratcheted) ID, `-1` if none.
    pub fn last_issued(&self) -> i64 {
        self.last.load(AtomicOrdering::SeqCst)
    }

    pub fn reset(&self) {
        self.last.store(-1, AtomicOrdering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Stat – one measured entity
// ---------------------------------------------------------------------------

/// Field values for a freshly measured stat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatFields {
    pub rate: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub average_growth_rate: f64,
    pub average_shrink_rate: f64,
    pub catastrophe_frequency: f64,
    pub rescue_frequency: f64,
    pub name: String,
}

/// Shared handle to a stat. Collections, events and selections all hold the
/// same object, so feature writes are seen everywhere.
pub type StatRef = Arc<Stat>;

/// A uniquely identified record of feature values.
///
/// Identity, equality, hashing and ordering use the ID only. Features live
/// behind a lock so filter workers can write `VISIBILITY` while other threads
/// read.
pub struct Stat {
    id: i64,
    name: RwLock<String>,
    features: RwLock<HashMap<String, FeatureValue>>,
}

impl Stat {
    /// Create a stat with a fresh ID from `ids`.
    pub fn new(ids: &IdGenerator, fields: StatFields) -> Self {
        let stat = Self::blank(ids.next_id());
        stat.put_feature(RATE, fields.rate);
        stat.put_feature(START_TIME, fields.start_time);
        stat.put_feature(END_TIME, fields.end_time);
        stat.put_feature(AVERAGE_GROWTH_RATE, fields.average_growth_rate);
        stat.put_feature(AVERAGE_SHRINK_RATE, fields.average_shrink_rate);
        stat.put_feature(CATASTROPHE_FREQUENCY, fields.catastrophe_frequency);
        stat.put_feature(RESCUE_FREQUENCY, fields.rescue_frequency);
        stat.put_feature(NAME, fields.name.as_str());
        stat.set_name(fields.name);
        stat
    }

    /// Create a stat with a fresh ID and an arbitrary feature set.
    pub fn with_features<K, V>(
        ids: &IdGenerator,
        name: &str,
        features: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<FeatureValue>,
    {
        let stat = Self::blank(ids.next_id());
        stat.set_name(name);
        for (key, value) in features {
            stat.put_feature(key, value);
        }
        stat
    }

    /// Rebuild a stat with a known ID, e.g. when deserializing.
    ///
    /// Ratchets `ids` so that stats created afterwards get larger IDs.
    pub fn with_id(ids: &IdGenerator, id: i64) -> Self {
        ids.ratchet(id);
        Self::blank(id)
    }

    fn blank(id: i64) -> Self {
        Self {
            id,
            name: RwLock::new(String::new()),
            features: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = name.into();
    }

    // -- Features --

    /// The stored value, or `None` if the feature was never set.
    pub fn get_feature(&self, key: &str) -> Option<FeatureValue> {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn put_feature(&self, key: impl Into<String>, value: impl Into<FeatureValue>) {
        self.features
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    /// Snapshot of every stored feature.
    pub fn features(&self) -> HashMap<String, FeatureValue> {
        self.features.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The feature as a number, failing if absent or textual.
    pub fn numeric_feature(&self, key: &str) -> Result<f64, FeatureError> {
        match self.get_feature(key) {
            None => Err(FeatureError::Missing {
                id: self.id,
                key: key.to_string(),
            }),
            Some(value) => value.as_f64().ok_or_else(|| FeatureError::NotNumeric {
                id: self.id,
                key: key.to_string(),
            }),
        }
    }

    /// `self[key] - other[key]`. Anti-symmetric.
    pub fn diff_to(&self, other: &Stat, key: &str) -> Result<f64, FeatureError> {
        Ok(self.numeric_feature(key)? - other.numeric_feature(key)?)
    }

    /// `|a - b| / ((a + b) / 2)`, or `0` when `a == -b`. Symmetric.
    pub fn normalize_diff_to(&self, other: &Stat, key: &str) -> Result<f64, FeatureError> {
        let a = self.numeric_feature(key)?;
        let b = other.numeric_feature(key)?;
        if a == -b {
            return Ok(0.0);
        }
        Ok((a - b).abs() / ((a + b) / 2.0))
    }

    /// Multi-line dump of the stat and its features.
    pub fn echo(&self) -> String {
        let mut s = String::new();
        let name = self.name();
        if name.is_empty() {
            s.push_str("stat: <no name>\n");
        } else {
            s.push_str(&format!("stat: {name}\n"));
        }

        let show = |key: &str| {
            self.get_feature(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<none>".to_string())
        };
        s.push_str(&format!("Start Time: {}\n", show(START_TIME)));
        s.push_str(&format!("End Time: {}\n", show(END_TIME)));

        let features = self.features();
        if features.is_empty() {
            s.push_str("No features calculated\n");
            return s;
        }

        s.push_str("Feature list:\n");
        let mut keys: Vec<&String> = features.keys().collect();
        keys.sort();
        for key in keys {
            let value = &features[key];
            match value.as_f64() {
                Some(v) if v >= 1e4 => s.push_str(&format!("\t{key}: {v:.1e}\n")),
                Some(v) => s.push_str(&format!("\t{key}: {v:.1}\n")),
                None => s.push_str(&format!("\t{key}: {value}\n")),
            }
        }
        s
    }
}

impl PartialEq for Stat {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Stat {}

impl Hash for Stat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Stat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        if name.is_empty() {
            write!(f, "ID{}", self.id)
        } else {
            write!(f, "{name}")
        }
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

/// Sort by `key`, largest value first. Equal values compare equal; stats
/// missing the feature (or holding text) sort after all numeric ones.
pub fn feature_comparator(key: &str) -> impl Fn(&Stat, &Stat) -> Ordering + '_ {
    move |a: &Stat, b: &Stat| {
        let va = a.get_feature(key).and_then(|v| v.as_f64());
        let vb = b.get_feature(key).and_then(|v| v.as_f64());
        match (va, vb) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

pub fn time_comparator() -> impl Fn(&Stat, &Stat) -> Ordering {
    feature_comparator(START_TIME)
}

pub fn frame_comparator() -> impl Fn(&Stat, &Stat) -> Ordering {
    feature_comparator(END_TIME)
}
