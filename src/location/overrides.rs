//! Manual corrections for venue strings the provider cannot place.

use std::collections::BTreeMap;

/// Venue strings from the feed that geocode to the wrong place (or nowhere),
/// paired with a query the provider resolves correctly.
const DEFAULT_OVERRIDES: &[(&str, &str)] = &[(
    "Long Beach, Kryemedhenj, golem",
    "Kryemëdhenj, Bashkia Kavajë, Central Albania, Albania",
)];

/// Raw location → canonical query substitution table.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: BTreeMap<String, String>,
}

impl OverrideTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// The built-in corrections.
    pub fn builtin() -> Self {
        Self::new(default_overrides())
    }

    /// Canonical query for `raw`: the override target if one exists, else `raw` itself.
    pub fn resolve<'a>(&'a self, raw: &'a str) -> &'a str {
        self.entries.get(raw).map(String::as_str).unwrap_or(raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn default_overrides() -> BTreeMap<String, String> {
    DEFAULT_OVERRIDES
        .iter()
        .map(|(raw, query)| (raw.to_string(), query.to_string()))
        .collect()
}
