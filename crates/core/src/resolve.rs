//! Display-name resolution over drifting record shapes.
//!
//! Older vitamin records spell the same logical field several ways (`vitaminNameHe`,
//! `vitamin_name_he`, `nameHe`, a nested `data` object, ...). Each logical field has one
//! resolver that tries a fixed list of paths and returns the first value that is neither
//! empty nor a dash placeholder.

use crate::entities::{Entity, Vitamin, VitaminConflict};
use nutri_types::EntityId;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

static PARENTHESISED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DASH_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-–—]+$").unwrap());
static SPACED_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[-–—]\s*").unwrap());

/// Ordering for display labels: case-insensitive first, then by exact text.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn is_hebrew(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}

pub fn has_hebrew(value: &str) -> bool {
    value.chars().any(is_hebrew)
}

/// A value made only of dashes, ignoring whitespace.
pub fn is_placeholder(value: &str) -> bool {
    let normalized = WHITESPACE.replace_all(value, " ");
    DASH_ONLY.is_match(normalized.trim())
}

/// First candidate that is non-empty after trimming and not a placeholder.
pub fn first_non_placeholder<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty() && !is_placeholder(v))
        .unwrap_or_default()
        .to_string()
}

/// Shorten a Hebrew supplement name: drop parenthesised parts and cut at the first dash
/// that sits between two Hebrew letters.
pub fn shorten_hebrew_name(value: &str) -> String {
    let compact = PARENTHESISED.replace_all(value, " ");
    let compact = UNDERSCORES.replace_all(&compact, " ");
    let compact = WHITESPACE.replace_all(&compact, " ");
    let compact = compact.trim();

    for m in SPACED_DASH.find_iter(compact) {
        let before = compact[..m.start()].chars().next_back();
        let after = compact[m.end()..].chars().next();
        if before.is_some_and(is_hebrew) && after.is_some_and(is_hebrew) {
            return compact[..m.start()].trim().to_string();
        }
    }
    compact.to_string()
}

fn top<'a>(vitamin: &'a Vitamin, key: &str) -> Option<&'a str> {
    vitamin.raw.get(key).and_then(Value::as_str)
}

fn nested<'a>(vitamin: &'a Vitamin, key: &str) -> Option<&'a str> {
    vitamin
        .raw
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.get(key))
        .and_then(Value::as_str)
}

pub fn vitamin_name_he(v: &Vitamin) -> String {
    first_non_placeholder([
        Some(v.vitamin_name_he.as_str()),
        nested(v, "vitaminNameHe"),
        top(v, "vitamin_name_he"),
        nested(v, "vitamin_name_he"),
        top(v, "nameHe"),
        nested(v, "nameHe"),
        top(v, "name_he"),
        nested(v, "name_he"),
        v.vitamin_nick_he.as_deref(),
        nested(v, "vitaminNickHe"),
        top(v, "name"),
        v.vitamin_name_en.as_deref(),
        nested(v, "vitaminNameEn"),
        top(v, "nameEn"),
    ])
}

pub fn vitamin_name_en(v: &Vitamin) -> String {
    first_non_placeholder([
        v.vitamin_name_en.as_deref(),
        nested(v, "vitaminNameEn"),
        top(v, "vitamin_name_en"),
        nested(v, "vitamin_name_en"),
        top(v, "nameEn"),
        nested(v, "nameEn"),
        top(v, "name_en"),
    ])
}

pub fn active_form(v: &Vitamin) -> String {
    first_non_placeholder([
        v.active_form.as_deref(),
        nested(v, "activeForm"),
        top(v, "active_form"),
        nested(v, "active_form"),
    ])
}

pub fn vitamin_nick_he(v: &Vitamin) -> String {
    let fallback = vitamin_name_he(v);
    first_non_placeholder([
        v.vitamin_nick_he.as_deref(),
        nested(v, "vitaminNickHe"),
        top(v, "vitamin_nick_he"),
        nested(v, "vitamin_nick_he"),
        top(v, "scientificNameHe"),
        nested(v, "scientificNameHe"),
        Some(fallback.as_str()),
    ])
}

pub fn vitamin_nick_en(v: &Vitamin) -> String {
    let fallback = vitamin_name_en(v);
    first_non_placeholder([
        v.vitamin_nick_en.as_deref(),
        nested(v, "vitaminNickEn"),
        top(v, "vitamin_nick_en"),
        nested(v, "vitamin_nick_en"),
        top(v, "scientificNameEn"),
        nested(v, "scientificNameEn"),
        Some(fallback.as_str()),
    ])
}

/// Short Hebrew label for a vitamin, falling back to English names and finally the id.
pub fn display_name_he(v: &Vitamin) -> String {
    let primary = vitamin_name_he(v);
    let scientific = vitamin_nick_he(v);
    if has_hebrew(&primary) {
        return shorten_hebrew_name(&primary);
    }
    if has_hebrew(&scientific) {
        return shorten_hebrew_name(&scientific);
    }
    let name_en = vitamin_name_en(v);
    let nick_en = vitamin_nick_en(v);
    first_non_placeholder([
        Some(shorten_hebrew_name(&primary).as_str()),
        Some(shorten_hebrew_name(&scientific).as_str()),
        Some(name_en.as_str()),
        Some(nick_en.as_str()),
        Some(v.id().as_str()),
    ])
}

/// Map of record id to primary display name.
pub fn names_by_id<T: Entity>(records: &[T]) -> HashMap<String, String> {
    records
        .iter()
        .map(|r| (r.id().to_string(), r.display_name().to_string()))
        .collect()
}

/// Map of vitamin id to its resolved short Hebrew label.
pub fn vitamin_names_by_id(vitamins: &[Vitamin]) -> HashMap<String, String> {
    vitamins
        .iter()
        .map(|v| (v.id().to_string(), display_name_he(v)))
        .collect()
}

/// Labels for linked ids, sorted. A dangling id is shown as itself.
pub fn labels_from_ids(ids: &[EntityId], names: &HashMap<String, String>) -> Vec<String> {
    let mut labels: Vec<String> = ids
        .iter()
        .map(|id| {
            names
                .get(id.as_str())
                .cloned()
                .unwrap_or_else(|| id.to_string())
        })
        .collect();
    labels.sort_by(|a, b| locale_cmp(a, b));
    labels
}

/// `"name: explanation"` labels for conflicts, or the bare name when there is no explanation.
pub fn labels_from_conflicts(
    conflicts: &[VitaminConflict],
    names: &HashMap<String, String>,
) -> Vec<String> {
    let mut labels: Vec<String> = conflicts
        .iter()
        .map(|c| {
            let label = names
                .get(c.vitamin_id.as_str())
                .cloned()
                .unwrap_or_else(|| c.vitamin_id.to_string());
            let explanation = c.explanation.trim();
            if explanation.is_empty() || explanation == "-" {
                label
            } else {
                format!("{label}: {explanation}")
            }
        })
        .collect();
    labels.sort_by(|a, b| locale_cmp(a, b));
    labels
}
