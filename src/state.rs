use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};

use crate::data::collection::StatCollection;
use crate::data::filter::FeatureFilter;
use crate::data::model::{FeatureValue, IdGenerator, StatRef, NAME};
use crate::data::schema::{Dimension, FeatureSchema};
use crate::error::SchemaError;
use crate::events::{EventKind, Listener, ListenerId, ModelChangeEvent, StatFlag};

pub const DEFAULT_SPACE_UNITS: &str = "pixels";
pub const DEFAULT_TIME_UNITS: &str = "frames";

// ---------------------------------------------------------------------------
// Transaction state
// ---------------------------------------------------------------------------

/// Pending changes of the current update, flushed when the outermost update
/// ends.
#[derive(Default)]
struct Transaction {
    depth: usize,
    added: HashSet<StatRef>,
    removed: HashSet<StatRef>,
    moved: HashSet<StatRef>,
    updated: HashSet<StatRef>,
    from_group: HashMap<StatRef, String>,
    to_group: HashMap<StatRef, String>,
}

impl Transaction {
    fn is_dirty(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
            && self.updated.is_empty())
    }

    /// Build the coalesced event and reset every dirty set.
    ///
    /// Flags are applied added → removed → moved → updated, later sets
    /// overwriting earlier ones.
    fn drain_event(&mut self) -> ModelChangeEvent {
        let mut event = ModelChangeEvent::new(EventKind::ModelModified);
        let passes = [
            (std::mem::take(&mut self.added), StatFlag::Added),
            (std::mem::take(&mut self.removed), StatFlag::Removed),
            (std::mem::take(&mut self.moved), StatFlag::GroupChanged),
            (std::mem::take(&mut self.updated), StatFlag::Modified),
        ];
        for (stats, flag) in passes {
            for stat in stats {
                event.put_flag(Arc::clone(&stat), flag);
                event.add_stat(stat);
            }
        }
        for (stat, group) in self.from_group.drain() {
            event.put_from_group(stat, group);
        }
        for (stat, group) in self.to_group.drain() {
            event.put_to_group(stat, group);
        }
        event
    }
}

// ---------------------------------------------------------------------------
// UpdateGuard – scoped update bracket
// ---------------------------------------------------------------------------

/// Open update on a [`Model`]. Dropping it ends the update; when the
/// outermost guard drops, listeners receive one coalesced event.
#[must_use = "the update ends as soon as the guard is dropped"]
pub struct UpdateGuard<'a> {
    model: &'a Model,
}

impl UpdateGuard<'_> {
    /// End the update now.
    pub fn end(self) {}
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.model.end_update();
    }
}

// ---------------------------------------------------------------------------
// Model – stats, schema, transactions and listeners
// ---------------------------------------------------------------------------

/// The stat model shared with the UI, analyzers and exporters.
///
/// All methods take `&self`; the transaction depth and dirty sets sit behind
/// one mutex, so mutations from several threads are serialized. Listeners
/// are called after that mutex is released and may call back into the model.
pub struct Model {
    stats: RwLock<Arc<StatCollection>>,
    schema: RwLock<FeatureSchema>,
    transaction: Mutex<Transaction>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    units: RwLock<(String, String)>,
    ids: Arc<IdGenerator>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_ids(Arc::new(IdGenerator::new()))
    }

    /// A model whose stats draw IDs from `ids`.
    pub fn with_ids(ids: Arc<IdGenerator>) -> Self {
        Self {
            stats: RwLock::new(Arc::new(StatCollection::new())),
            schema: RwLock::new(FeatureSchema::new()),
            transaction: Mutex::new(Transaction::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            units: RwLock::new((DEFAULT_SPACE_UNITS.to_string(), DEFAULT_TIME_UNITS.to_string())),
            ids,
        }
    }

    /// ID source for stats created against this model.
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    fn tx(&self) -> std::sync::MutexGuard<'_, Transaction> {
        self.transaction.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- Listeners --

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ModelChangeEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver `event` to every listener, in registration order.
    fn fire(&self, event: &ModelChangeEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    // -- Physical units --

    pub fn set_physical_units(&self, space_units: impl Into<String>, time_units: impl Into<String>) {
        *self.units.write().unwrap_or_else(|e| e.into_inner()) =
            (space_units.into(), time_units.into());
    }

    pub fn space_units(&self) -> String {
        self.units.read().unwrap_or_else(|e| e.into_inner()).0.clone()
    }

    pub fn time_units(&self) -> String {
        self.units.read().unwrap_or_else(|e| e.into_inner()).1.clone()
    }

    // -- Schema --

    /// Copy of the feature schema.
    pub fn schema(&self) -> FeatureSchema {
        self.schema.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn declare_stat_features<S: AsRef<str>>(
        &self,
        keys: &[S],
        names: &HashMap<String, String>,
        short_names: &HashMap<String, String>,
        dimensions: &HashMap<String, Dimension>,
        is_int: &HashMap<String, bool>,
    ) -> Result<(), SchemaError> {
        self.schema
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .declare(keys, names, short_names, dimensions, is_int)
    }

    // -- Update brackets --

    /// Open an update. Changes made until the returned guard (and every
    /// enclosing guard) is dropped are reported as one event.
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        let mut tx = self.tx();
        tx.depth += 1;
        debug!("[Model] begin_update: update level is now {}", tx.depth);
        UpdateGuard { model: self }
    }

    fn end_update(&self) {
        let event = {
            let mut tx = self.tx();
            if tx.depth == 0 {
                warn!("[Model] end_update called with no open update; ignored");
                return;
            }
            tx.depth -= 1;
            debug!("[Model] end_update: update level is now {}", tx.depth);
            if tx.depth > 0 {
                return;
            }
            if !tx.is_dirty() {
                debug!("[Model] end_update: nothing to flush");
                return;
            }
            tx.drain_event()
        };
        debug!("[Model] flushing {} changed stats", event.stats().len());
        self.fire(&event);
    }

    /// Current nesting depth of open updates.
    pub fn update_depth(&self) -> usize {
        self.tx().depth
    }

    // -- Stat mutation (inside an update) --

    /// File `stat` under `group` and record it as added.
    pub fn add_stat_to(&self, stat: StatRef, group: &str) -> StatRef {
        let mut tx = self.tx();
        self.stats().add(&stat, group);
        debug!("[Model] Adding stat {stat} to group {group}");
        tx.to_group.insert(Arc::clone(&stat), group.to_string());
        tx.added.insert(Arc::clone(&stat));
        stat
    }

    /// Remove `stat` from the group it is filed under. `None` if it is not
    /// in that group; nothing is recorded then.
    pub fn remove_stat(&self, stat: &StatRef) -> Option<StatRef> {
        let mut tx = self.tx();
        let group = current_group(stat);
        if !self.stats().remove(stat, &group) {
            debug!("[Model] Stat {stat} cannot be found in group {group}");
            return None;
        }
        debug!("[Model] Removing stat {stat} from group {group}");
        tx.from_group.insert(Arc::clone(stat), group);
        tx.removed.insert(Arc::clone(stat));
        Some(Arc::clone(stat))
    }

    /// Take `stat` out of `group` and file it back under the same key,
    /// recording it as moved. `None` if it is not in `group`.
    pub fn move_stat(&self, stat: &StatRef, group: &str) -> Option<StatRef> {
        let mut tx = self.tx();
        let stats = self.stats();
        if !stats.remove(stat, group) {
            debug!("[Model] Could not find stat {stat} in group {group}");
            return None;
        }
        stats.add(stat, group);
        debug!("[Model] Moving stat {stat} within group {group}");
        tx.from_group.insert(Arc::clone(stat), group.to_string());
        tx.to_group.insert(Arc::clone(stat), group.to_string());
        tx.moved.insert(Arc::clone(stat));
        Some(Arc::clone(stat))
    }

    /// Enlist `stat` for feature recomputation when the update ends.
    pub fn update_features(&self, stat: &StatRef) {
        self.tx().updated.insert(Arc::clone(stat));
    }

    // -- Bulk operations (fire immediately, outside transactions) --

    /// Current stat collection.
    pub fn stats(&self) -> Arc<StatCollection> {
        Arc::clone(&self.stats.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn clear_stats(&self, notify: bool) {
        self.stats().clear();
        info!("[Model] stats cleared");
        if notify {
            self.fire(&ModelChangeEvent::new(EventKind::StatsComputed));
        }
    }

    pub fn set_stats(&self, stats: StatCollection, notify: bool) {
        *self.stats.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(stats);
        info!("[Model] stat collection replaced");
        if notify {
            self.fire(&ModelChangeEvent::new(EventKind::StatsComputed));
        }
    }

    pub fn filter_stats(&self, filters: &[FeatureFilter], notify: bool) {
        let report = self.stats().filter_all(filters);
        info!(
            "[Model] filtered stats with {} filters ({}/{} groups)",
            filters.len(),
            report.completed,
            report.total
        );
        if notify {
            self.fire(&ModelChangeEvent::new(EventKind::StatsFiltered));
        }
    }

    pub fn notify_features_computed(&self) {
        self.fire(&ModelChangeEvent::new(EventKind::FeaturesComputed));
    }

    /// A new model holding the visible stats (same objects), the same units
    /// and the same feature declarations. Listeners are not copied.
    pub fn copy(&self) -> Result<Model, SchemaError> {
        let copy = Model::with_ids(Arc::clone(&self.ids));
        let (space, time) = self.units.read().unwrap_or_else(|e| e.into_inner()).clone();
        copy.set_physical_units(space, time);
        copy.set_stats(StatCollection::from_collection(self.stats().iter(true)), false);
        copy.schema
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .declare_all_from(&self.schema())?;
        Ok(copy)
    }
}

/// The group key a stat was last filed under, `""` if never filed.
fn current_group(stat: &StatRef) -> String {
    match stat.get_feature(NAME) {
        Some(FeatureValue::Text(group)) => group,
        _ => String::new(),
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        writeln!(f)?;
        if stats.key_set().is_empty() {
            writeln!(f, "No stats.")?;
        } else {
            writeln!(f, "Contains {} stats in total.", stats.count(false))?;
        }
        match stats.count(true) {
            0 => writeln!(f, "No filtered stats.")?,
            n => writeln!(f, "Contains {n} filtered stats.")?,
        }
        writeln!(f)?;
        writeln!(
            f,
            "Physical units:\n  space units: {}\n  time units: {}",
            self.space_units(),
            self.time_units()
        )?;
        writeln!(f)?;
        write!(f, "{}", self.schema())
    }
}
