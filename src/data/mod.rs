/// Data layer: stats, feature declarations, grouping and filtering.
///
/// Architecture:
/// ```text
///  .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Stat records
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ StatCollection │  group key → set of shared stats
///   └────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  feature thresholds → VISIBILITY flag, per group in parallel
///   └──────────┘
/// ```
///
/// `schema` declares which features exist and how to display them.

pub mod collection;
pub mod filter;
pub mod loader;
pub mod model;
pub mod schema;
