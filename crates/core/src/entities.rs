//! Knowledge-base record types.
//!
//! Field names follow the stored document shape: domain fields are camelCase, the shared
//! audit fields are snake_case. Relationship fields hold [`EntityId`]s that may point at
//! records which no longer exist; nothing here resolves them.
//!
//! Stored documents are not always well-formed: older records carry `null` or a bare string
//! in place of an array, numbers in text fields, or no primary name at all. Reading never
//! fails on such a field; collections fall back to empty and text fields to absent.

use nutri_types::EntityId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// An untyped stored record, as exchanged with the transports.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Text from a stored scalar. Numbers and booleans are stringified; anything else is absent.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

fn lenient_scalar<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: From<String> + Default,
{
    Ok(scalar_text(Value::deserialize(deserializer)?)
        .map(T::from)
        .unwrap_or_default())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool())
}

/// A non-array reads as empty; elements of the wrong shape are dropped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Audit and identity fields shared by every record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub is_sample: Option<bool>,
}

impl RecordMeta {
    pub fn with_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A record kind stored in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection / entity name used by the transports.
    const NAME: &'static str;

    /// Build a typed record from a stored document.
    fn from_document(doc: Document) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::Value::Object(doc))
    }

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &EntityId {
        &self.meta().id
    }

    /// Stored field holding the primary display name.
    const NAME_FIELD: &'static str;

    /// Primary display name; required non-empty on save.
    fn display_name(&self) -> &str;

    fn set_display_name(&mut self, name: String);
}

macro_rules! entity {
    ($ty:ty, $name:literal, $field:ident, $stored:literal) => {
        impl Entity for $ty {
            const NAME: &'static str = $name;
            const NAME_FIELD: &'static str = $stored;

            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }

            fn display_name(&self) -> &str {
                &self.$field
            }

            fn set_display_name(&mut self, name: String) {
                self.$field = name;
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitaminConflict {
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub vitamin_id: EntityId,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vitamin {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub vitamin_name_he: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub vitamin_name_en: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub vitamin_nick_he: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub vitamin_nick_en: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub solubility: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_up_to_1_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_up_to_6: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_up_to_10: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_up_to_18: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_adults: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_pregnancy: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage_birth: Option<String>,
    #[serde(
        default,
        rename = "dosageRDA",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub dosage_rda: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub action_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub deficiency_symptoms: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub lab_test_deficiency: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub lab_test_deficiency_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub lab_test_deficiency_details: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub food_sources: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub toxicity: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub case_story: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub combination_vitamin_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub conflict_vitamins: Vec<VitaminConflict>,
    /// The stored document as read, including keys outside the current schema (alternate
    /// name spellings, nested `data` blobs). Read by the name resolvers, never written back.
    #[serde(skip)]
    pub raw: Document,
}

impl Entity for Vitamin {
    const NAME: &'static str = "Vitamin";
    const NAME_FIELD: &'static str = "vitaminNameHe";

    fn from_document(doc: Document) -> serde_json::Result<Self> {
        let mut vitamin: Vitamin = serde_json::from_value(serde_json::Value::Object(doc.clone()))?;
        vitamin.raw = doc;
        Ok(vitamin)
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.vitamin_name_he
    }

    fn set_display_name(&mut self, name: String) {
        self.vitamin_name_he = name;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Food {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub food_name_he: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub food_name_en: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub food_category: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Reverse side of [`DeficiencySymptom::food_ids`].
    #[serde(default, deserialize_with = "lenient_list")]
    pub deficiency_symptoms: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

entity!(Food, "Food", food_name_he, "foodNameHe");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeficiencySymptom {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub symptom_name_he: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub symptom_name_en: Option<String>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<f64>,
    /// Reverse side of [`Vitamin::deficiency_symptoms`].
    #[serde(default, deserialize_with = "lenient_list")]
    pub vitamin_ids: Vec<EntityId>,
    /// Reverse side of [`Food::deficiency_symptoms`].
    #[serde(default, deserialize_with = "lenient_list")]
    pub food_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

entity!(DeficiencySymptom, "DeficiencySymptom", symptom_name_he, "symptomNameHe");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLink {
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub product_name: String,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub product_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disease {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub disease_name_he: String,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub disease_characteristics_he: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub supplement_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub deficiency_symptom_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub product_links: Vec<ProductLink>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

entity!(Disease, "Disease", disease_name_he, "diseaseNameHe");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub title_he: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub food_ids: Vec<EntityId>,
}

entity!(Article, "Article", title_he, "titleHe");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// `"admin"`, `"user"`, or any other free-text role.
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

entity!(User, "User", email, "email");

impl User {
    /// Effective role; a user without one is a plain user.
    pub fn role(&self) -> &str {
        self.role
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(crate::constants::USER_ROLE)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == crate::constants::ADMIN_ROLE
    }
}

/// A locally kept case linking a phenomenon to records of five other kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsCase {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub phenomenon_name: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub supplement_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub symptom_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub deficiency_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub food_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub article_ids: Vec<EntityId>,
    #[serde(default, deserialize_with = "lenient_scalar")]
    pub notes: String,
}

entity!(EffectsCase, "EffectsCase", phenomenon_name, "phenomenonName");

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vitamin_reads_stored_shape_and_keeps_legacy_keys() {
        let doc = json!({
            "id": "v1",
            "created_date": "2025-01-01T00:00:00.000Z",
            "vitaminNameHe": "ויטמין C",
            "dosageRDA": "90mg",
            "dosageUpTo1Year": "40mg",
            "deficiencySymptoms": null,
            "conflictVitamins": [{ "vitaminId": "v2", "explanation": null }],
            "vitamin_name_en": "Vitamin C",
            "data": { "nameHe": "ישן" }
        });
        let vitamin = Vitamin::from_document(doc.as_object().unwrap().clone()).unwrap();

        assert_eq!(vitamin.id(), &EntityId::from("v1"));
        assert_eq!(vitamin.dosage_rda.as_deref(), Some("90mg"));
        assert_eq!(vitamin.dosage_up_to_1_year.as_deref(), Some("40mg"));
        assert!(vitamin.deficiency_symptoms.is_empty());
        assert_eq!(vitamin.conflict_vitamins[0].explanation, "");
        assert!(vitamin.raw.contains_key("vitamin_name_en"));
        assert!(vitamin.raw.contains_key("data"));

        let out = serde_json::to_value(&vitamin).unwrap();
        assert!(out.get("vitamin_name_en").is_none());
        assert_eq!(out["dosageRDA"], "90mg");
    }

    #[test]
    fn user_role_defaults_to_user() {
        let user: User = serde_json::from_value(json!({ "id": "u1", "email": "a@b.c" })).unwrap();
        assert_eq!(user.role(), "user");
        assert!(!user.is_admin());
        let admin = User {
            role: Some("admin".into()),
            ..user
        };
        assert!(admin.is_admin());
    }

    #[test]
    fn malformed_fields_fall_back_instead_of_failing() {
        let doc = json!({
            "id": 42,
            "foodNameHe": "bad",
            "foodNameEn": true,
            "foodCategory": { "nested": 1 },
            "dosage": 2.5,
            "deficiencySymptoms": "abc",
            "is_sample": "yes"
        });
        let food = Food::from_document(doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(food.id(), &EntityId::from("42"));
        assert_eq!(food.food_name_en.as_deref(), Some("true"));
        assert_eq!(food.food_category, None);
        assert_eq!(food.dosage.as_deref(), Some("2.5"));
        assert!(food.deficiency_symptoms.is_empty());
        assert_eq!(food.meta.is_sample, None);

        let disease: Disease = serde_json::from_value(json!({
            "diseaseNameHe": 7,
            "sortOrder": " 3 ",
            "supplementIds": ["v1", 2, null, "v3"],
            "productLinks": [{ "productName": "x" }, "oops"]
        }))
        .unwrap();
        assert_eq!(disease.disease_name_he, "7");
        assert_eq!(disease.sort_order, Some(3.0));
        assert_eq!(disease.supplement_ids, vec![EntityId::from("v1"), EntityId::from("v3")]);
        assert_eq!(disease.product_links.len(), 1);
    }

    #[test]
    fn symptom_null_tags_become_empty() {
        let symptom: DeficiencySymptom =
            serde_json::from_value(json!({ "id": "s1", "symptomNameHe": "עייפות", "tags": null, "sortOrder": null }))
                .unwrap();
        assert!(symptom.tags.is_empty());
        assert_eq!(symptom.sort_order, None);
    }
}
