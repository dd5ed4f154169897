//! Change notifications sent by [`Model`](crate::state::Model) to its listeners.
//!
//! Listeners are plain closures invoked synchronously on the thread that
//! closed the outermost update (or called a bulk operation).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::data::model::StatRef;

/// What happened to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The stat collection was replaced or cleared.
    StatsComputed,
    /// Stat visibility was recomputed.
    StatsFiltered,
    /// Stats were added, removed, moved or modified inside an update.
    ModelModified,
    /// Feature values were (re)computed by an analyzer.
    FeaturesComputed,
}

/// Per-stat modification flag of a `ModelModified` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatFlag {
    Added,
    Removed,
    /// Re-filed under a group.
    GroupChanged,
    /// Features need recomputing.
    Modified,
}

impl fmt::Display for StatFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatFlag::Added => "Stat added",
            StatFlag::Removed => "Stat removed",
            StatFlag::GroupChanged => "Stat file changed",
            StatFlag::Modified => "Stat modified",
        };
        f.write_str(label)
    }
}

/// A change notification.
#[derive(Debug, Clone)]
pub struct ModelChangeEvent {
    kind: EventKind,
    stats: HashSet<StatRef>,
    flags: HashMap<StatRef, StatFlag>,
    from_group: HashMap<StatRef, String>,
    to_group: HashMap<StatRef, String>,
}

impl ModelChangeEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            stats: HashSet::new(),
            flags: HashMap::new(),
            from_group: HashMap::new(),
            to_group: HashMap::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stats affected by this event; empty for bulk events.
    pub fn stats(&self) -> &HashSet<StatRef> {
        &self.stats
    }

    pub fn add_stat(&mut self, stat: StatRef) -> bool {
        self.stats.insert(stat)
    }

    pub fn add_all_stats<'a, I>(&mut self, stats: I)
    where
        I: IntoIterator<Item = &'a StatRef>,
    {
        self.stats.extend(stats.into_iter().cloned());
    }

    /// Set the flag for `stat`, returning the one it replaces.
    pub fn put_flag(&mut self, stat: StatRef, flag: StatFlag) -> Option<StatFlag> {
        self.flags.insert(stat, flag)
    }

    pub fn flag(&self, stat: &StatRef) -> Option<StatFlag> {
        self.flags.get(stat).copied()
    }

    pub fn put_from_group(&mut self, stat: StatRef, group: impl Into<String>) -> Option<String> {
        self.from_group.insert(stat, group.into())
    }

    pub fn put_to_group(&mut self, stat: StatRef, group: impl Into<String>) -> Option<String> {
        self.to_group.insert(stat, group.into())
    }

    /// Group a removed or moved stat left.
    pub fn from_group(&self, stat: &StatRef) -> Option<&str> {
        self.from_group.get(stat).map(String::as_str)
    }

    /// Group an added or moved stat was filed under.
    pub fn to_group(&self, stat: &StatRef) -> Option<&str> {
        self.to_group.get(stat).map(String::as_str)
    }
}

impl fmt::Display for ModelChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[ModelChangeEvent]:")?;
        write!(f, " - event type: ")?;
        match self.kind {
            EventKind::StatsComputed => writeln!(f, "Stats computed"),
            EventKind::StatsFiltered => writeln!(f, "Stats filtered"),
            EventKind::FeaturesComputed => writeln!(f, "Features computed"),
            EventKind::ModelModified => {
                writeln!(f, "Model modified, with:")?;
                writeln!(f, "\t- Stats modified: {}", self.stats.len())?;
                let mut stats: Vec<&StatRef> = self.stats.iter().collect();
                stats.sort();
                for stat in stats {
                    match self.flag(stat) {
                        Some(flag) => writeln!(f, "\t\t{stat}: {flag}")?,
                        None => writeln!(f, "\t\t{stat}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Callback registered on a model.
pub type Listener = Arc<dyn Fn(&ModelChangeEvent) + Send + Sync>;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{IdGenerator, Stat};

    #[test]
    fn test_flags_overwrite() {
        let ids = IdGenerator::new();
        let s: StatRef = Arc::new(Stat::with_id(&ids, 3));
        let mut event = ModelChangeEvent::new(EventKind::ModelModified);
        event.add_stat(Arc::clone(&s));
        assert_eq!(event.put_flag(Arc::clone(&s), StatFlag::Added), None);
        assert_eq!(
            event.put_flag(Arc::clone(&s), StatFlag::Modified),
            Some(StatFlag::Added)
        );
        assert_eq!(event.flag(&s), Some(StatFlag::Modified));
    }

    #[test]
    fn test_display_model_modified() {
        let ids = IdGenerator::new();
        let a: StatRef = Arc::new(Stat::with_id(&ids, 1));
        let b: StatRef = Arc::new(Stat::with_id(&ids, 2));
        b.set_name("comet");

        let mut event = ModelChangeEvent::new(EventKind::ModelModified);
        event.add_all_stats([&a, &b]);
        event.put_flag(Arc::clone(&a), StatFlag::Removed);
        event.put_flag(Arc::clone(&b), StatFlag::GroupChanged);

        let text = event.to_string();
        assert!(text.contains("Model modified, with:\n\t- Stats modified: 2\n"));
        assert!(text.contains("\t\tID1: Stat removed\n\t\tcomet: Stat file changed\n"));
    }

    #[test]
    fn test_group_annotations() {
        let ids = IdGenerator::new();
        let s: StatRef = Arc::new(Stat::with_id(&ids, 1));
        let mut event = ModelChangeEvent::new(EventKind::ModelModified);
        event.put_from_group(Arc::clone(&s), "a.tif");
        event.put_to_group(Arc::clone(&s), "b.tif");
        assert_eq!(event.from_group(&s), Some("a.tif"));
        assert_eq!(event.to_group(&s), Some("b.tif"));
        assert_eq!(ModelChangeEvent::new(EventKind::StatsFiltered).from_group(&s), None);
    }
}
