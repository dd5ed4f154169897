//! Set of stats the user has selected, with change notification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::data::model::StatRef;

/// Selection change: each affected stat maps to `true` if it was selected,
/// `false` if it was deselected.
#[derive(Debug, Clone, Default)]
pub struct SelectionChangeEvent {
    stats: HashMap<StatRef, bool>,
}

impl SelectionChangeEvent {
    pub fn stats(&self) -> &HashMap<StatRef, bool> {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

pub type SelectionListener = Arc<dyn Fn(&SelectionChangeEvent) + Send + Sync>;

/// Selected stats. Not thread-safe on its own; owned by the UI thread.
#[derive(Default)]
pub struct SelectionModel {
    selection: HashSet<StatRef>,
    listeners: Vec<SelectionListener>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&SelectionChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    fn fire(&self, stats: HashMap<StatRef, bool>) {
        let event = SelectionChangeEvent { stats };
        debug!(
            "[SelectionModel] sending event with {} stats to {} listeners",
            event.stats.len(),
            self.listeners.len()
        );
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Select one stat. No event if it was already selected.
    pub fn add(&mut self, stat: &StatRef) {
        if !self.selection.insert(Arc::clone(stat)) {
            return;
        }
        debug!("[SelectionModel] Adding stat {stat} to selection");
        self.fire(HashMap::from([(Arc::clone(stat), true)]));
    }

    /// Select several stats. One event listing the newly selected ones.
    pub fn add_all<'a, I>(&mut self, stats: I)
    where
        I: IntoIterator<Item = &'a StatRef>,
    {
        let mut changed = HashMap::new();
        for stat in stats {
            if self.selection.insert(Arc::clone(stat)) {
                changed.insert(Arc::clone(stat), true);
            }
        }
        self.fire(changed);
    }

    /// Deselect one stat. No event if it was not selected.
    pub fn remove(&mut self, stat: &StatRef) {
        if !self.selection.remove(stat) {
            return;
        }
        debug!("[SelectionModel] Removing stat {stat} from selection");
        self.fire(HashMap::from([(Arc::clone(stat), false)]));
    }

    /// Deselect everything. Fires even when the selection was empty.
    pub fn clear(&mut self) {
        let changed = self
            .selection
            .drain()
            .map(|stat| (stat, false))
            .collect();
        self.fire(changed);
    }

    pub fn contains(&self, stat: &StatRef) -> bool {
        self.selection.contains(stat)
    }

    pub fn selection(&self) -> &HashSet<StatRef> {
        &self.selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{IdGenerator, Stat};
    use std::sync::Mutex;

    fn recording(sel: &mut SelectionModel) -> Arc<Mutex<Vec<SelectionChangeEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        sel.add_listener(move |e| sink.lock().unwrap().push(e.clone()));
        log
    }

    #[test]
    fn test_add_and_remove_fire_once() {
        let ids = IdGenerator::new();
        let s: StatRef = Arc::new(Stat::with_id(&ids, 0));
        let mut sel = SelectionModel::new();
        let log = recording(&mut sel);

        sel.add(&s);
        sel.add(&s);
        sel.remove(&s);
        sel.remove(&s);

        let events = log.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stats().get(&s), Some(&true));
        assert_eq!(events[1].stats().get(&s), Some(&false));
    }

    #[test]
    fn test_add_all_reports_only_new() {
        let ids = IdGenerator::new();
        let a: StatRef = Arc::new(Stat::with_id(&ids, 0));
        let b: StatRef = Arc::new(Stat::with_id(&ids, 1));
        let mut sel = SelectionModel::new();
        sel.add(&a);
        let log = recording(&mut sel);

        sel.add_all([&a, &b]);
        let events = log.lock().unwrap();
        assert_eq!(events[0].stats().len(), 1);
        assert!(events[0].stats().contains_key(&b));
        assert_eq!(sel.selection().len(), 2);
    }

    #[test]
    fn test_clear_deselects_everything() {
        let ids = IdGenerator::new();
        let a: StatRef = Arc::new(Stat::with_id(&ids, 0));
        let mut sel = SelectionModel::new();
        sel.add(&a);
        let log = recording(&mut sel);

        sel.clear();
        assert!(!sel.contains(&a));
        assert_eq!(log.lock().unwrap()[0].stats().get(&a), Some(&false));
    }
}
