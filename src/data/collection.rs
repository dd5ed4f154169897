use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, warn};

use super::filter::{passes_all, FeatureFilter};
use super::model::{FeatureValue, Stat, StatRef, NAME, VISIBILITY};
use crate::error::StoreError;
use crate::workers::{FanOutReport, Job, WorkerPool};

/// How long `filter`/`set_visible` wait for their group tasks.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Group key reported by `first_key`/`last_key` on an empty collection.
pub const EMPTY_KEY: &str = "0";

type Group = Arc<RwLock<HashSet<StatRef>>>;

// ---------------------------------------------------------------------------
// Visibility helpers
// ---------------------------------------------------------------------------

fn visibility_flag(visible: bool) -> FeatureValue {
    FeatureValue::Integer(i64::from(visible))
}

/// Whether the stat's `VISIBILITY` is above the hidden sentinel. A stat that
/// was never filed has no visibility and counts as hidden.
pub fn is_visible(stat: &Stat) -> bool {
    stat.get_feature(VISIBILITY)
        .and_then(|v| v.as_f64())
        .is_some_and(|v| v > 0.0)
}

// ---------------------------------------------------------------------------
// StatCollection – stats grouped by source file
// ---------------------------------------------------------------------------

/// Stats grouped by source file key, iterated in ascending key order.
///
/// Safe to share between threads: the group index and each group's set are
/// locked independently, so per-group work can run while other groups are
/// looked up or modified. `filter` and `set_visible` fan out one task per
/// group on a bounded [`WorkerPool`].
///
/// `add` does not remove a stat from any group it was previously filed
/// under; moving a stat is the caller's job (`remove` then `add`).
pub struct StatCollection {
    content: RwLock<BTreeMap<String, Group>>,
    pool: Arc<WorkerPool>,
    timeout: Duration,
}

impl Default for StatCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl StatCollection {
    /// An empty collection running on the shared worker pool.
    pub fn new() -> Self {
        Self {
            content: RwLock::new(BTreeMap::new()),
            pool: WorkerPool::shared(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a collection from stats that already carry a group key in their
    /// `NAME` feature. Visibility is left as it is.
    pub fn from_collection<I>(stats: I) -> Self
    where
        I: IntoIterator<Item = StatRef>,
    {
        let mut map: BTreeMap<String, HashSet<StatRef>> = BTreeMap::new();
        for stat in stats {
            match stat.get_feature(NAME) {
                Some(FeatureValue::Text(key)) => {
                    map.entry(key).or_default().insert(stat);
                }
                _ => warn!("Stat {stat} has no group key; not added to collection"),
            }
        }
        Self::from_map(map)
    }

    /// Wrap a raw group → stats mapping. Nothing is stamped.
    pub fn from_map(source: BTreeMap<String, HashSet<StatRef>>) -> Self {
        let content = source
            .into_iter()
            .map(|(key, stats)| (key, Arc::new(RwLock::new(stats))))
            .collect();
        Self {
            content: RwLock::new(content),
            ..Self::new()
        }
    }

    /// Run parallel operations on a dedicated pool of `num_threads` workers.
    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.pool = Arc::new(WorkerPool::new(num_threads));
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // -- Lock helpers --

    fn group(&self, key: &str) -> Option<Group> {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn groups(&self) -> Vec<Group> {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn group_or_insert(&self, key: &str) -> Group {
        if let Some(group) = self.group(key) {
            return group;
        }
        let mut content = self.content.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(content.entry(key.to_string()).or_default())
    }

    // -- Mutation --

    /// File `stat` under `key`, marking it visible.
    pub fn add(&self, stat: &StatRef, key: &str) {
        let group = self.group_or_insert(key);
        group
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Arc::clone(stat));
        stat.put_feature(NAME, key);
        stat.put_feature(VISIBILITY, visibility_flag(true));
    }

    /// Remove `stat` from group `key`. Returns whether it was there.
    pub fn remove(&self, stat: &Stat, key: &str) -> bool {
        match self.group(key) {
            Some(group) => group.write().unwrap_or_else(|e| e.into_inner()).remove(stat),
            None => false,
        }
    }

    /// Replace the content of group `key`. The new stats start hidden.
    pub fn put<I>(&self, key: &str, stats: I)
    where
        I: IntoIterator<Item = StatRef>,
    {
        let set: HashSet<StatRef> = stats.into_iter().collect();
        for stat in &set {
            stat.put_feature(NAME, key);
            stat.put_feature(VISIBILITY, visibility_flag(false));
        }
        self.content
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::new(RwLock::new(set)));
    }

    /// Drop every hidden stat.
    ///
    /// Must not run concurrently with `filter` or `set_visible`.
    pub fn crop(&self) {
        for group in self.groups() {
            group
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|stat| is_visible(stat));
        }
    }

    pub fn clear(&self) {
        self.content.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    // -- Visibility --

    /// Recompute visibility against a single filter.
    pub fn filter(&self, filter: &FeatureFilter) -> FanOutReport {
        self.filter_all(std::slice::from_ref(filter))
    }

    /// Recompute visibility: a stat stays visible only if it passes every
    /// filter. Blocks until all groups are done or the timeout elapses.
    pub fn filter_all(&self, filters: &[FeatureFilter]) -> FanOutReport {
        let filters = filters.to_vec();
        self.for_each_stat("filter", move |stat| {
            stat.put_feature(VISIBILITY, visibility_flag(passes_all(&filters, stat)));
        })
    }

    /// Set every stat's visibility at once.
    pub fn set_visible(&self, visible: bool) -> FanOutReport {
        self.for_each_stat("set_visible", move |stat| {
            stat.put_feature(VISIBILITY, visibility_flag(visible));
        })
    }

    /// One pool task per group, each applying `op` to its group's stats.
    fn for_each_stat<F>(&self, label: &str, op: F) -> FanOutReport
    where
        F: Fn(&Stat) + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let jobs: Vec<Job> = self
            .groups()
            .into_iter()
            .map(|group| {
                let op = Arc::clone(&op);
                Box::new(move || {
                    let stats = group.read().unwrap_or_else(|e| e.into_inner());
                    for stat in stats.iter() {
                        op(stat.as_ref());
                    }
                }) as Job
            })
            .collect();

        let report = self.pool.run_all(jobs, self.timeout);
        if report.timed_out {
            warn!(
                "[StatCollection::{label}] Timeout of {:?} reached; {} of {} groups processed",
                self.timeout, report.completed, report.total
            );
        } else {
            debug!("[StatCollection::{label}] processed {} groups", report.total);
        }
        report
    }

    // -- Queries --

    /// Number of stats, optionally only the visible ones. O(n).
    pub fn count(&self, visible_only: bool) -> usize {
        self.iter(visible_only).count()
    }

    pub fn count_in(&self, key: &str, visible_only: bool) -> usize {
        self.iter_group(key, visible_only).count()
    }

    /// Linear scan for a stat by ID, visible or not.
    pub fn search(&self, id: i64) -> Option<StatRef> {
        self.iter(false).find(|stat| stat.id() == id)
    }

    /// Smallest group key, or `"0"` when empty.
    pub fn first_key(&self) -> String {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| EMPTY_KEY.to_string())
    }

    /// Largest group key, or `"0"` when empty.
    pub fn last_key(&self) -> String {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .next_back()
            .cloned()
            .unwrap_or_else(|| EMPTY_KEY.to_string())
    }

    /// Group keys in ascending order.
    pub fn key_set(&self) -> Vec<String> {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    // -- Iteration --

    /// Every stat (or every visible stat), groups in key order.
    pub fn iter(&self, visible_only: bool) -> StatIter {
        StatIter::new(self.groups(), visible_only)
    }

    /// The stats of one group; empty if the group does not exist.
    pub fn iter_group(&self, key: &str, visible_only: bool) -> StatIter {
        StatIter::new(self.group(key).into_iter().collect(), visible_only)
    }
}

impl<'a> IntoIterator for &'a StatCollection {
    type Item = StatRef;
    type IntoIter = StatIter;

    fn into_iter(self) -> StatIter {
        self.iter(false)
    }
}

impl fmt::Debug for StatCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatCollection")
            .field("groups", &self.key_set().len())
            .field("stats", &self.count(false))
            .field("visible", &self.count(true))
            .field("threads", &self.num_threads())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Display for StatCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.key_set();
        writeln!(
            f,
            "StatCollection: contains {} stats total in {} different groups, over which {} are visible:",
            self.count(false),
            keys.len(),
            self.count(true)
        )?;
        for key in keys {
            writeln!(f, "\tgroup {key}: {} stats", self.count_in(&key, false))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StatIter – read-only traversal
// ---------------------------------------------------------------------------

/// Read-only iterator over a collection.
///
/// The group list is captured when the iterator is created and each group's
/// members when the iterator reaches it; visibility is checked as each stat
/// is yielded. Concurrent writers never invalidate the traversal.
pub struct StatIter {
    groups: std::vec::IntoIter<Group>,
    current: std::vec::IntoIter<StatRef>,
    visible_only: bool,
}

impl StatIter {
    fn new(groups: Vec<Group>, visible_only: bool) -> Self {
        Self {
            groups: groups.into_iter(),
            current: Vec::new().into_iter(),
            visible_only,
        }
    }

    /// Collection iterators cannot remove; always fails.
    pub fn remove(&mut self) -> Result<(), StoreError> {
        Err(StoreError::UnsupportedOperation)
    }
}

impl Iterator for StatIter {
    type Item = StatRef;

    fn next(&mut self) -> Option<StatRef> {
        loop {
            if let Some(stat) = self.current.next() {
                if !self.visible_only || is_visible(&stat) {
                    return Some(stat);
                }
                continue;
            }
            let group = self.groups.next()?;
            let members: Vec<StatRef> = group
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned()
                .collect();
            self.current = members.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{IdGenerator, RATE, START_TIME};
    use std::thread;

    fn rated(ids: &IdGenerator, rate: f64) -> StatRef {
        Arc::new(Stat::with_features(ids, "", [(RATE, rate)]))
    }

    fn visible_rates(sc: &StatCollection) -> Vec<f64> {
        let mut rates: Vec<f64> = sc
            .iter(true)
            .filter_map(|s| s.get_feature(RATE).and_then(|v| v.as_f64()))
            .collect();
        rates.sort_by(|a, b| a.partial_cmp(b).unwrap());
        rates
    }

    #[test]
    fn test_add_stamps_group_and_visibility() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let s = rated(&ids, 1.0);
        sc.add(&s, "kymo_01.tif");

        assert_eq!(s.get_feature(NAME), Some(FeatureValue::Text("kymo_01.tif".into())));
        assert!(is_visible(&s));
        assert_eq!(sc.count(false), 1);

        // Second add is a set-level no-op but still re-stamps.
        s.put_feature(VISIBILITY, 0i64);
        sc.add(&s, "kymo_01.tif");
        assert_eq!(sc.count_in("kymo_01.tif", false), 1);
        assert!(is_visible(&s));
    }

    #[test]
    fn test_add_to_second_group_keeps_first_membership() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let s = rated(&ids, 1.0);
        sc.add(&s, "A");
        sc.add(&s, "B");

        assert_eq!(sc.count_in("A", false), 1);
        assert_eq!(sc.count_in("B", false), 1);
        assert_eq!(s.get_feature(NAME), Some(FeatureValue::Text("B".into())));
    }

    #[test]
    fn test_remove_reports_presence() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let s = rated(&ids, 1.0);
        sc.add(&s, "A");

        assert!(!sc.remove(&s, "B"));
        assert!(sc.remove(&s, "A"));
        assert!(!sc.remove(&s, "A"));
        assert_eq!(sc.count(false), 0);
        // Features of a removed stat are untouched.
        assert!(is_visible(&s));
    }

    #[test]
    fn test_put_replaces_group_hidden() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let old = rated(&ids, 1.0);
        sc.add(&old, "A");

        let batch = vec![rated(&ids, 2.0), rated(&ids, 3.0)];
        sc.put("A", batch.clone());

        assert_eq!(sc.count_in("A", false), 2);
        assert_eq!(sc.count_in("A", true), 0);
        assert!(sc.search(old.id()).is_none());
        for s in &batch {
            assert_eq!(s.get_feature(NAME), Some(FeatureValue::Text("A".into())));
            assert!(!is_visible(s));
        }
    }

    #[test]
    fn test_filter_above_and_below() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        for (i, rate) in [2.0, 5.0, 8.0].into_iter().enumerate() {
            sc.add(&rated(&ids, rate), &format!("file{i}"));
        }

        let report = sc.filter_all(&[FeatureFilter::new(RATE, 5.0, true)]);
        assert!(report.is_complete());
        assert_eq!(visible_rates(&sc), vec![5.0, 8.0]);

        sc.filter(&FeatureFilter::new(RATE, 5.0, false));
        assert_eq!(visible_rates(&sc), vec![2.0, 5.0]);
    }

    #[test]
    fn test_filter_all_requires_every_predicate() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let both = Arc::new(Stat::with_features(
            &ids,
            "",
            [(RATE, FeatureValue::Real(8.0)), (START_TIME, FeatureValue::Integer(1))],
        ));
        let only_rate = Arc::new(Stat::with_features(
            &ids,
            "",
            [(RATE, FeatureValue::Real(8.0)), (START_TIME, FeatureValue::Integer(9))],
        ));
        let missing = rated(&ids, 9.0);
        sc.add(&both, "A");
        sc.add(&only_rate, "A");
        sc.add(&missing, "B");

        sc.filter_all(&[
            FeatureFilter::new(RATE, 5.0, true),
            FeatureFilter::new(START_TIME, 3.0, false),
        ]);
        assert!(is_visible(&both));
        assert!(!is_visible(&only_rate));
        assert!(!is_visible(&missing));
        assert_eq!(sc.count(true), 1);
    }

    #[test]
    fn test_set_visible_all_groups() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        for key in ["A", "B", "C"] {
            sc.put(key, vec![rated(&ids, 1.0), rated(&ids, 2.0)]);
        }
        assert_eq!(sc.count(true), 0);
        assert!(sc.set_visible(true).is_complete());
        assert_eq!(sc.count(true), 6);
        sc.set_visible(false);
        assert_eq!(sc.count(true), 0);
    }

    #[test]
    fn test_crop_is_idempotent() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        for rate in [1.0, 4.0, 7.0, 10.0] {
            sc.add(&rated(&ids, rate), "A");
        }
        let hidden = rated(&ids, 0.5);
        sc.add(&hidden, "B");
        sc.filter(&FeatureFilter::new(RATE, 5.0, true));

        sc.crop();
        let mut first: Vec<i64> = sc.iter(false).map(|s| s.id()).collect();
        sc.crop();
        let mut second: Vec<i64> = sc.iter(false).map(|s| s.id()).collect();
        first.sort();
        second.sort();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        // Dropped stats keep their last feature values.
        assert!(!is_visible(&hidden));
        assert_eq!(sc.count_in("B", false), 0);
    }

    #[test]
    fn test_iteration_follows_key_order() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        for key in ["c", "a", "b"] {
            sc.add(&rated(&ids, 1.0), key);
        }
        let keys: Vec<String> = sc
            .iter(false)
            .filter_map(|s| s.get_feature(NAME).and_then(|v| v.as_text().map(String::from)))
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(sc.key_set(), vec!["a", "b", "c"]);
        assert_eq!(sc.first_key(), "a");
        assert_eq!(sc.last_key(), "c");
    }

    #[test]
    fn test_empty_keys_use_sentinel() {
        let sc = StatCollection::new();
        assert_eq!(sc.first_key(), "0");
        assert_eq!(sc.last_key(), "0");
        assert_eq!(sc.count(false), 0);
        assert_eq!(sc.iter_group("missing", false).count(), 0);
    }

    #[test]
    fn test_iterator_remove_is_unsupported() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        sc.add(&rated(&ids, 1.0), "A");

        let mut it = sc.iter(false);
        assert!(it.next().is_some());
        assert_eq!(it.remove(), Err(StoreError::UnsupportedOperation));
        assert_eq!(sc.iter_group("A", true).remove(), Err(StoreError::UnsupportedOperation));
        assert_eq!(sc.count(false), 1);
    }

    #[test]
    fn test_search_finds_hidden_stats() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let s = rated(&ids, 1.0);
        sc.put("A", vec![Arc::clone(&s)]);
        assert_eq!(sc.search(s.id()).map(|f| f.id()), Some(s.id()));
        assert!(sc.search(999).is_none());
    }

    #[test]
    fn test_from_collection_preserves_visibility() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        let shown = rated(&ids, 9.0);
        let hidden = rated(&ids, 1.0);
        sc.add(&shown, "A");
        sc.add(&hidden, "B");
        sc.filter(&FeatureFilter::new(RATE, 5.0, true));

        let rebuilt = StatCollection::from_collection(sc.iter(false));
        assert_eq!(rebuilt.key_set(), vec!["A", "B"]);
        assert_eq!(rebuilt.count(false), 2);
        assert_eq!(rebuilt.count(true), 1);

        let orphan = rated(&ids, 3.0);
        let skipped = StatCollection::from_collection(vec![orphan]);
        assert_eq!(skipped.count(false), 0);
    }

    #[test]
    fn test_from_map_does_not_stamp() {
        let ids = IdGenerator::new();
        let s = rated(&ids, 1.0);
        let map = BTreeMap::from([("A".to_string(), HashSet::from([Arc::clone(&s)]))]);
        let sc = StatCollection::from_map(map);
        assert_eq!(sc.count(false), 1);
        assert_eq!(sc.count(true), 0);
        assert_eq!(s.get_feature(NAME), None);
        assert_eq!(s.get_feature(VISIBILITY), None);
    }

    #[test]
    fn test_dedicated_pool_size() {
        let mut sc = StatCollection::new();
        sc.set_num_threads(2);
        assert_eq!(sc.num_threads(), 2);
    }

    #[test]
    fn test_visible_iteration_during_filtering() {
        let ids = IdGenerator::new();
        let sc = Arc::new(StatCollection::new());
        for g in 0..16 {
            for r in 0..64 {
                sc.add(&rated(&ids, r as f64), &format!("g{g:02}"));
            }
        }

        let writer = {
            let sc = Arc::clone(&sc);
            thread::spawn(move || {
                for t in 0..20 {
                    sc.filter(&FeatureFilter::new(RATE, (t % 64) as f64, t % 2 == 0));
                }
            })
        };
        for _ in 0..50 {
            let n = sc.count(true);
            assert!(n <= 16 * 64);
        }
        writer.join().unwrap();
        assert_eq!(sc.count(false), 16 * 64);
    }

    #[test]
    fn test_filter_timeout_returns_partial_report() {
        let ids = IdGenerator::new();
        let mut sc = StatCollection::new();
        sc.set_num_threads(1);
        let sc = sc.with_timeout(Duration::ZERO);
        for g in 0..200 {
            let key = format!("g{g:03}");
            for r in 0..200 {
                sc.add(&rated(&ids, r as f64), &key);
            }
        }

        let report = sc.filter(&FeatureFilter::new(RATE, 100.0, true));
        assert!(report.timed_out);
        assert!(report.completed < report.total);
        assert_eq!(report.total, 200);

        // Late group tasks may still be writing; the store stays usable.
        assert_eq!(sc.count(false), 200 * 200);
        assert!(sc.count(true) <= 200 * 200);
        assert_eq!(sc.key_set().len(), 200);
    }

    #[test]
    fn test_debug_summary() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        sc.add(&rated(&ids, 1.0), "A");
        let text = format!("{sc:?}");
        assert!(text.starts_with("StatCollection { groups: 1, stats: 1, visible: 1"));
    }

    #[test]
    fn test_display_summary() {
        let ids = IdGenerator::new();
        let sc = StatCollection::new();
        sc.add(&rated(&ids, 1.0), "A");
        sc.put("B", vec![rated(&ids, 2.0)]);
        let text = sc.to_string();
        assert!(text.contains("contains 2 stats total in 2 different groups, over which 1 are visible"));
        assert!(text.contains("\tgroup B: 1 stats\n"));
    }
}
