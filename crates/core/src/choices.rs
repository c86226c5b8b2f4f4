//! Soft-enum option lists (vitamin solubility and source).
//!
//! Options come from three places: a hard-coded default set, values already present on
//! loaded vitamins, and a user-added history kept in [`LocalKv`]. The history only ever grows.

use crate::constants::{
    DEFAULT_SOLUBILITY_OPTIONS, DEFAULT_SOURCE_OPTIONS, SOLUBILITY_OPTIONS_KEY,
    SOURCE_OPTIONS_KEY,
};
use crate::entities::Vitamin;
use crate::resolve::locale_cmp;
use crate::store::local::LocalKv;
use crate::{ConsoleError, ConsoleResult};
use nutri_types::NonEmptyText;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Which option list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceKind {
    Solubility,
    Source,
}

impl ChoiceKind {
    pub fn storage_key(self) -> &'static str {
        match self {
            ChoiceKind::Solubility => SOLUBILITY_OPTIONS_KEY,
            ChoiceKind::Source => SOURCE_OPTIONS_KEY,
        }
    }

    pub fn defaults(self) -> &'static [&'static str] {
        match self {
            ChoiceKind::Solubility => DEFAULT_SOLUBILITY_OPTIONS,
            ChoiceKind::Source => DEFAULT_SOURCE_OPTIONS,
        }
    }

    /// The vitamin field this list feeds.
    pub fn value_of(self, vitamin: &Vitamin) -> Option<&str> {
        match self {
            ChoiceKind::Solubility => vitamin.solubility.as_deref(),
            ChoiceKind::Source => vitamin.source.as_deref(),
        }
    }
}

impl std::str::FromStr for ChoiceKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solubility" => Ok(ChoiceKind::Solubility),
            "source" => Ok(ChoiceKind::Source),
            other => Err(ConsoleError::InvalidInput(format!(
                "unknown option list '{other}'"
            ))),
        }
    }
}

/// Merge option sources into one sorted, case-insensitively unique list.
///
/// Values are taken in the order defaults, stored, live; the first spelling seen for a
/// case-insensitive key is the one kept. Blank values are ignored.
pub fn merge_choices<'a>(
    defaults: impl IntoIterator<Item = &'a str>,
    live: impl IntoIterator<Item = Option<&'a str>>,
    stored: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut push = |value: &str| {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            seen.entry(trimmed.to_lowercase())
                .or_insert_with(|| trimmed.to_string());
        }
    };

    defaults.into_iter().for_each(&mut push);
    stored.into_iter().for_each(&mut push);
    live.into_iter().flatten().for_each(&mut push);

    let mut options: Vec<String> = seen.into_values().collect();
    options.sort_by(|a, b| locale_cmp(a, b));
    options
}

/// Option lists backed by local durable storage.
#[derive(Clone, Debug)]
pub struct ChoiceRegistry {
    kv: Arc<LocalKv>,
}

impl ChoiceRegistry {
    pub fn new(kv: Arc<LocalKv>) -> Self {
        Self { kv }
    }

    /// The stored history; anything unreadable counts as empty.
    pub fn stored(&self, kind: ChoiceKind) -> Vec<String> {
        match self.kv.get_raw(kind.storage_key()) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(_) => {
                tracing::warn!(
                    key = kind.storage_key(),
                    "stored option history is not a list; ignoring"
                );
                Vec::new()
            }
        }
    }

    /// Current options for `kind` given the loaded vitamins. The merged list is written back
    /// so values seen on records survive their removal.
    pub fn options(&self, kind: ChoiceKind, vitamins: &[Vitamin]) -> ConsoleResult<Vec<String>> {
        let stored = self.stored(kind);
        let merged = merge_choices(
            kind.defaults().iter().copied(),
            vitamins.iter().map(|v| kind.value_of(v)),
            stored.iter().map(String::as_str),
        );
        self.kv.set(kind.storage_key(), &merged)?;
        Ok(merged)
    }

    /// Add a user-typed value to the history and return it as the selected value.
    ///
    /// # Errors
    ///
    /// `ConsoleError::InvalidInput` when the value is blank.
    pub fn register(&self, kind: ChoiceKind, value: &str) -> ConsoleResult<String> {
        let value = NonEmptyText::new(value)
            .map_err(|_| ConsoleError::InvalidInput("option value must not be empty".into()))?;
        let stored = self.stored(kind);
        let merged = merge_choices(
            kind.defaults().iter().copied(),
            [Some(value.as_str())],
            stored.iter().map(String::as_str),
        );
        self.kv.set(kind.storage_key(), &merged)?;
        tracing::info!(key = kind.storage_key(), value = value.as_str(), "option registered");
        Ok(value.into_inner())
    }
}
