//! Lab-deficiency text consolidation.
//!
//! Vitamins historically carried three overlapping free-text fields. [`merge_lab_fields`]
//! folds them into one HTML value for `labTestDeficiencyDetails` without repeating content.
//! The same function backs the edit form, the HTTP merge preview and the batch migration and
//! restore tools, so all of them produce identical output for identical input.
//!
//! Sections are accepted in priority order: the existing details, then the short lab value,
//! then the description under a [`DEFICIENCY_DESCRIPTION_LABEL`] heading. A section is skipped
//! when its comparison key already occurs inside the text accumulated so far.

use crate::constants::DEFICIENCY_DESCRIPTION_LABEL;
use crate::entities::Vitamin;
use crate::store::Patch;
use regex::Regex;
use std::sync::LazyLock;

static BR_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static P_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static OPENING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?[a-z][^>]*>").unwrap());
static NBSP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&nbsp;").unwrap());
static AMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&amp;").unwrap());
static LT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&lt;").unwrap());
static GT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&gt;").unwrap());
static QUOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&quot;").unwrap());
static APOS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&#39;").unwrap());
static SPACE_BEFORE_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\n").unwrap());
static NEWLINE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// True when the value contains something that looks like an HTML tag.
pub fn looks_like_html(value: &str) -> bool {
    OPENING_TAG.is_match(value)
}

/// Escape a plain-text value for embedding in HTML.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Reduce HTML to readable plain text: line-break tags become newlines, other tags become
/// spaces, common entities are decoded, and blank-line runs are capped at one.
pub fn to_plain_text(value: &str) -> String {
    let text = BR_TAG.replace_all(value, "\n");
    let text = P_CLOSE.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = NBSP.replace_all(&text, " ");
    let text = AMP.replace_all(&text, "&");
    let text = LT.replace_all(&text, "<");
    let text = GT.replace_all(&text, ">");
    let text = QUOT.replace_all(&text, "\"");
    let text = APOS.replace_all(&text, "'");
    let text = text.replace("\r\n", "\n");
    let text = SPACE_BEFORE_NEWLINE.replace_all(&text, "\n");
    let text = NEWLINE_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Whitespace- and case-insensitive key used to detect repeated content.
pub fn comparison_key(value: &str) -> String {
    WHITESPACE
        .replace_all(&to_plain_text(value), " ")
        .trim()
        .to_lowercase()
}

/// The three legacy lab-deficiency fields of a vitamin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LabFields<'a> {
    pub lab_test_deficiency: &'a str,
    pub description: &'a str,
    pub details: &'a str,
}

impl<'a> LabFields<'a> {
    pub fn of(vitamin: &'a Vitamin) -> Self {
        Self {
            lab_test_deficiency: vitamin.lab_test_deficiency.as_deref().unwrap_or(""),
            description: vitamin
                .lab_test_deficiency_description
                .as_deref()
                .unwrap_or(""),
            details: vitamin.lab_test_deficiency_details.as_deref().unwrap_or(""),
        }
    }

    /// Only `details` set: the shape a record has after consolidation.
    pub fn details_only(details: &'a str) -> Self {
        Self {
            details,
            ..Self::default()
        }
    }
}

fn push_raw_section(sections: &mut Vec<String>, raw: &str) {
    let value = raw.trim();
    if value.is_empty() {
        return;
    }
    let key = comparison_key(value);
    if !key.is_empty() && comparison_key(&sections.join("\n\n")).contains(&key) {
        return;
    }
    if looks_like_html(value) {
        sections.push(value.to_string());
    } else {
        sections.push(escape_html(value).replace('\n', "<br>"));
    }
}

fn push_labeled_section(sections: &mut Vec<String>, base_key: &str, label: &str, raw: &str) {
    let value = raw.trim();
    if value.is_empty() {
        return;
    }
    let value_key = comparison_key(value);
    let labeled_key = comparison_key(&format!("{label}: {value}"));
    let current_key = comparison_key(&sections.join("\n\n"));
    let seen = |key: &str| !key.is_empty() && (base_key.contains(key) || current_key.contains(key));
    if seen(&value_key) || seen(&labeled_key) {
        return;
    }
    let label = escape_html(label);
    if looks_like_html(value) {
        sections.push(format!("<p><strong>{label}:</strong></p>{value}"));
    } else {
        sections.push(format!(
            "<p><strong>{label}:</strong> {}</p>",
            escape_html(value)
        ));
    }
}

/// Fold the legacy fields into a single HTML value.
///
/// Pure and deterministic. Returns an empty string when every field is blank.
pub fn merge_lab_fields(fields: LabFields<'_>) -> String {
    let mut sections = Vec::new();
    push_raw_section(&mut sections, fields.details);
    push_raw_section(&mut sections, fields.lab_test_deficiency);
    let base_key = comparison_key(&sections.join("\n\n"));
    push_labeled_section(
        &mut sections,
        &base_key,
        DEFICIENCY_DESCRIPTION_LABEL,
        fields.description,
    );
    sections.join("<br><br>").trim().to_string()
}

/// Update that stores `merged` as the details and retires the two legacy fields.
pub fn consolidated_lab_patch(merged: &str) -> Patch {
    Patch::new()
        .clear("labTestDeficiency")
        .set("labTestDeficiencyDescription", "")
        .set("labTestDeficiencyDetails", merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn merge(lab: &str, description: &str, details: &str) -> String {
        merge_lab_fields(LabFields {
            lab_test_deficiency: lab,
            description,
            details,
        })
    }

    fn occurrences(haystack: &str, needle: &str) -> usize {
        comparison_key(haystack).matches(needle).count()
    }

    #[test]
    fn plain_text_conversion() {
        assert_eq!(
            to_plain_text("<p>שורה&nbsp;א</p><p>b &amp; c</p>"),
            "שורה א\n b & c"
        );
        assert_eq!(to_plain_text("a<br/>b<BR>c"), "a\nb\nc");
        assert_eq!(to_plain_text("a\r\n \r\nb"), "a\nb");
        assert_eq!(to_plain_text("a\n\n\n\nb"), "a\nb");
        assert_eq!(comparison_key("  Ferritin <b>LOW</b>\n"), "ferritin low");
    }

    #[test]
    fn html_detection_and_escaping() {
        assert!(looks_like_html("<p>x</p>"));
        assert!(looks_like_html("text </EM> more"));
        assert!(!looks_like_html("a < b and 3 > 2"));
        assert_eq!(escape_html(r#"<a href="x">'&'"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;");
    }

    #[test]
    fn keeps_lab_value_when_others_are_empty() {
        assert_eq!(merge("B12 נמוך", "", ""), "B12 נמוך");
    }

    #[test]
    fn merges_all_three_in_priority_order() {
        let merged = merge("Ferritin נמוך", "ערך גבולי", "נדרש מעקב חוזר\nבעוד 6 שבועות");
        assert_eq!(
            merged,
            "נדרש מעקב חוזר<br>בעוד 6 שבועות<br><br>Ferritin נמוך<br><br>\
             <p><strong>תיאור החוסר:</strong> ערך גבולי</p>"
        );
    }

    #[test]
    fn html_description_is_kept_verbatim_under_label() {
        let merged = merge("", "<ul><li>עייפות</li></ul>", "");
        assert_eq!(
            merged,
            "<p><strong>תיאור החוסר:</strong></p><ul><li>עייפות</li></ul>"
        );
    }

    #[test]
    fn labeled_description_already_typed_into_lab_field_is_skipped() {
        let merged = merge("תיאור החוסר: B12 נמוך", "B12 נמוך", "");
        assert_eq!(occurrences(&merged, "b12 נמוך"), 1);
    }

    #[test]
    fn repeated_description_is_suppressed() {
        let merged = merge("X: low", "low", "");
        assert_eq!(occurrences(&merged, "low"), 1);
    }

    #[test]
    fn details_containing_lab_value_absorb_it() {
        let merged = merge("ferritin LOW", "", "<p>Ferritin low, recheck</p>");
        assert_eq!(merged, "<p>Ferritin low, recheck</p>");
    }

    #[test]
    fn patch_clears_legacy_fields() {
        let patch = consolidated_lab_patch("<p>x</p>");
        let doc = patch.to_set_document();
        assert_eq!(doc["labTestDeficiencyDescription"], "");
        assert_eq!(doc["labTestDeficiencyDetails"], "<p>x</p>");
        assert!(matches!(
            patch.get("labTestDeficiency"),
            Some(crate::store::PatchValue::Clear)
        ));
    }

    fn field() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-zA-Z0-9 אבגדהו:.,\\n-]{0,40}").unwrap()
    }

    proptest! {
        /// Merging an already merged value does not change its content.
        #[test]
        fn merge_is_idempotent(lab in field(), description in field(), details in field()) {
            let once = merge(&lab, &description, &details);
            let twice = merge_lab_fields(LabFields::details_only(&once));
            prop_assert_eq!(comparison_key(&twice), comparison_key(&once));
        }

        /// Distinct words in each field all survive the merge.
        #[test]
        fn merge_keeps_distinct_content(a in "[a-f]{6}", b in "[g-m]{6}", c in "[n-t]{6}") {
            let merged = comparison_key(&merge(&a, &b, &c));
            prop_assert!(merged.contains(&a));
            prop_assert!(merged.contains(&b));
            prop_assert!(merged.contains(&c));
        }
    }
}
