//! Bidirectional link maintenance.
//!
//! Several relationships are stored on both sides: a Food lists its symptoms in
//! `deficiencySymptoms` and each of those symptoms lists the food in `foodIds`. When one side
//! of such a pair is edited, [`sync_reverse_links`] updates the other side so that
//! `a ∈ b.reverse ⟺ b ∈ a.forward` keeps holding.
//!
//! Updates are sequential and not atomic. The first failure stops the run and is reported as
//! [`ConsoleError::LinkSync`], listing the reverse records already committed; nothing is rolled
//! back and the primary record stays saved.

use crate::entities::{DeficiencySymptom, Entity, Food, Vitamin};
use crate::store::{EntityStore, Patch};
use crate::{ConsoleError, ConsoleResult};
use nutri_types::EntityId;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// The reverse side of a bidirectional relationship, as stored on records of kind `B`.
pub struct ReverseLink<B: Entity> {
    /// Stored field name on `B`.
    pub field: &'static str,
    /// Reads the reverse id list from a loaded `B`.
    pub ids: fn(&B) -> &[EntityId],
}

impl<B: Entity> Clone for ReverseLink<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Entity> Copy for ReverseLink<B> {}

impl<B: Entity> std::fmt::Debug for ReverseLink<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", B::NAME, self.field)
    }
}

fn symptom_vitamin_ids(s: &DeficiencySymptom) -> &[EntityId] {
    &s.vitamin_ids
}

fn symptom_food_ids(s: &DeficiencySymptom) -> &[EntityId] {
    &s.food_ids
}

fn food_symptom_ids(f: &Food) -> &[EntityId] {
    &f.deficiency_symptoms
}

fn vitamin_symptom_ids(v: &Vitamin) -> &[EntityId] {
    &v.deficiency_symptoms
}

/// `DeficiencySymptom.vitaminIds`, reverse of `Vitamin.deficiencySymptoms`.
pub const SYMPTOM_VITAMINS: ReverseLink<DeficiencySymptom> = ReverseLink {
    field: "vitaminIds",
    ids: symptom_vitamin_ids,
};

/// `DeficiencySymptom.foodIds`, reverse of `Food.deficiencySymptoms`.
pub const SYMPTOM_FOODS: ReverseLink<DeficiencySymptom> = ReverseLink {
    field: "foodIds",
    ids: symptom_food_ids,
};

/// `Food.deficiencySymptoms`, reverse of `DeficiencySymptom.foodIds`.
pub const FOOD_SYMPTOMS: ReverseLink<Food> = ReverseLink {
    field: "deficiencySymptoms",
    ids: food_symptom_ids,
};

/// `Vitamin.deficiencySymptoms`, reverse of `DeficiencySymptom.vitaminIds`.
pub const VITAMIN_SYMPTOMS: ReverseLink<Vitamin> = ReverseLink {
    field: "deficiencySymptoms",
    ids: vitamin_symptom_ids,
};

/// A change to the forward link list of one primary record.
#[derive(Clone, Copy, Debug)]
pub struct LinkEdit<'a> {
    /// Entity kind of the edited record.
    pub entity: &'static str,
    pub id: &'a EntityId,
    pub before: &'a [EntityId],
    /// Empty when the primary record was deleted.
    pub after: &'a [EntityId],
}

impl<'a> LinkEdit<'a> {
    pub fn deleted(entity: &'static str, id: &'a EntityId, before: &'a [EntityId]) -> Self {
        Self {
            entity,
            id,
            before,
            after: &[],
        }
    }
}

/// Reverse records touched by one synchronisation run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub updated: Vec<EntityId>,
}

/// New reverse list for `current` or `None` when no write is needed. The new list holds
/// unique, non-empty ids.
fn next_reverse_ids(current: &[EntityId], primary: &EntityId, linked: bool) -> Option<Vec<EntityId>> {
    let present = current.contains(primary);
    if linked == present {
        return None;
    }
    let mut seen = HashSet::new();
    let mut next: Vec<EntityId> = current
        .iter()
        .filter(|id| *id != primary && !id.as_str().is_empty())
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();
    if linked {
        next.push(primary.clone());
    }
    Some(next)
}

/// Bring the reverse side of `link` in line with `edit`.
///
/// Only records in `loaded` are considered: ids in the edit that match no loaded record are
/// skipped. A record whose membership did not change is never written, and neither is one
/// whose reverse list already reflects the new state.
///
/// # Errors
///
/// Returns `ConsoleError::LinkSync` wrapping the first failed update.
pub async fn sync_reverse_links<S, B>(
    store: &S,
    link: ReverseLink<B>,
    edit: LinkEdit<'_>,
    loaded: &[B],
) -> ConsoleResult<SyncReport>
where
    S: EntityStore,
    B: Entity,
{
    let mut report = SyncReport::default();

    for record in loaded {
        let id = record.id();
        let had = edit.before.contains(id);
        let has = edit.after.contains(id);
        if had == has {
            continue;
        }

        let Some(next) = next_reverse_ids((link.ids)(record), edit.id, has) else {
            tracing::debug!(entity = B::NAME, id = %id, "reverse link already consistent");
            continue;
        };

        let ids: Vec<Value> = next.iter().map(|i| Value::String(i.to_string())).collect();
        let patch = Patch::new().set(link.field, Value::Array(ids));
        if let Err(source) = store.update(B::NAME, id.as_str(), patch).await {
            tracing::error!(
                entity = edit.entity,
                id = %edit.id,
                reverse = B::NAME,
                failed = %id,
                "reverse link update failed"
            );
            return Err(ConsoleError::LinkSync {
                entity: edit.entity,
                id: edit.id.clone(),
                committed: report.updated,
                failed_id: id.clone(),
                source: Box::new(source),
            });
        }
        report.updated.push(id.clone());
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entities::Document;
    use crate::store::document::DocumentStore;
    use crate::store::SortSpec;
    use std::sync::Mutex;

    /// Store wrapper that records every update and can fail on chosen ids.
    #[derive(Debug)]
    pub(crate) struct RecordingStore {
        pub(crate) inner: DocumentStore,
        pub(crate) updates: Mutex<Vec<(String, String)>>,
        pub(crate) fail_on: Option<String>,
    }

    impl RecordingStore {
        pub(crate) fn new() -> Self {
            Self {
                inner: DocumentStore::in_memory(),
                updates: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        pub(crate) fn updated_ids(&self) -> Vec<String> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|(_, id)| id.clone())
                .collect()
        }
    }

    impl EntityStore for RecordingStore {
        async fn list(&self, entity: &str, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
            self.inner.list(entity, sort).await
        }

        async fn get(&self, entity: &str, id: &str) -> ConsoleResult<Document> {
            self.inner.get(entity, id).await
        }

        async fn create(&self, entity: &str, data: Patch) -> ConsoleResult<Document> {
            self.inner.create(entity, data).await
        }

        async fn update(&self, entity: &str, id: &str, patch: Patch) -> ConsoleResult<Document> {
            if self.fail_on.as_deref() == Some(id) {
                return Err(ConsoleError::Request {
                    status: 503,
                    message: "unavailable".into(),
                    body: Value::Null,
                    retry_after: None,
                });
            }
            self.updates
                .lock()
                .unwrap()
                .push((entity.to_string(), id.to_string()));
            self.inner.update(entity, id, patch).await
        }

        async fn delete(&self, entity: &str, id: &str) -> ConsoleResult<()> {
            self.inner.delete(entity, id).await
        }
    }

    async fn seed_symptoms(store: &RecordingStore, names: &[&str]) -> Vec<DeficiencySymptom> {
        let mut out = Vec::new();
        for name in names {
            let doc = store
                .create(
                    DeficiencySymptom::NAME,
                    Patch::new().set("symptomNameHe", *name),
                )
                .await
                .unwrap();
            out.push(DeficiencySymptom::from_document(doc).unwrap());
        }
        out
    }

    async fn reload(store: &RecordingStore) -> Vec<DeficiencySymptom> {
        store
            .list(DeficiencySymptom::NAME, None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| DeficiencySymptom::from_document(d).unwrap())
            .collect()
    }

    #[test]
    fn rewritten_reverse_lists_drop_blank_and_repeated_ids() {
        let primary = EntityId::from("v1");
        let current = vec![
            EntityId::from("a"),
            EntityId::from(""),
            EntityId::from("a"),
            EntityId::from("b"),
        ];
        assert_eq!(
            next_reverse_ids(&current, &primary, true),
            Some(vec![EntityId::from("a"), EntityId::from("b"), primary.clone()])
        );
        assert_eq!(next_reverse_ids(&[primary.clone()], &primary, true), None);
    }

    #[tokio::test]
    async fn only_changed_memberships_are_written() {
        let store = RecordingStore::new();
        let symptoms = seed_symptoms(&store, &["x", "y", "z"]).await;
        let (x, y, z) = (
            symptoms[0].meta.id.clone(),
            symptoms[1].meta.id.clone(),
            symptoms[2].meta.id.clone(),
        );
        let food = EntityId::from("food-1");

        sync_reverse_links(
            &store,
            SYMPTOM_FOODS,
            LinkEdit {
                entity: Food::NAME,
                id: &food,
                before: &[],
                after: &[x.clone(), y.clone()],
            },
            &symptoms,
        )
        .await
        .unwrap();
        store.updates.lock().unwrap().clear();

        let loaded = reload(&store).await;
        let report = sync_reverse_links(
            &store,
            SYMPTOM_FOODS,
            LinkEdit {
                entity: Food::NAME,
                id: &food,
                before: &[x.clone(), y.clone()],
                after: &[y.clone(), z.clone()],
            },
            &loaded,
        )
        .await
        .unwrap();

        let mut touched = store.updated_ids();
        touched.sort();
        let mut expected = vec![x.to_string(), z.to_string()];
        expected.sort();
        assert_eq!(touched, expected);
        assert_eq!(report.updated.len(), 2);

        for s in reload(&store).await {
            let linked = s.food_ids.contains(&food);
            assert_eq!(linked, s.meta.id == y || s.meta.id == z);
        }
    }

    #[tokio::test]
    async fn stale_reverse_state_is_not_duplicated_or_rewritten() {
        let store = RecordingStore::new();
        let food = EntityId::from("food-1");
        let doc = store
            .create(
                DeficiencySymptom::NAME,
                Patch::new()
                    .set("symptomNameHe", "s")
                    .set("foodIds", serde_json::json!(["food-1", "food-1"])),
            )
            .await
            .unwrap();
        let symptom = DeficiencySymptom::from_document(doc).unwrap();
        let sid = symptom.meta.id.clone();

        let report = sync_reverse_links(
            &store,
            SYMPTOM_FOODS,
            LinkEdit {
                entity: Food::NAME,
                id: &food,
                before: &[],
                after: &[sid.clone(), EntityId::from("dangling")],
            },
            std::slice::from_ref(&symptom),
        )
        .await
        .unwrap();
        assert!(report.updated.is_empty());
        assert!(store.updated_ids().is_empty());

        sync_reverse_links(
            &store,
            SYMPTOM_FOODS,
            LinkEdit::deleted(Food::NAME, &food, std::slice::from_ref(&sid)),
            &[symptom],
        )
        .await
        .unwrap();
        let reloaded = reload(&store).await;
        assert!(reloaded[0].food_ids.is_empty());
    }

    #[tokio::test]
    async fn first_failure_stops_and_reports_committed_ids() {
        let mut store = RecordingStore::new();
        let symptoms = seed_symptoms(&store, &["a", "b", "c"]).await;
        store.fail_on = Some(symptoms[1].meta.id.to_string());
        let vitamin = EntityId::from("vit-1");
        let all: Vec<EntityId> = symptoms.iter().map(|s| s.meta.id.clone()).collect();

        let err = sync_reverse_links(
            &store,
            SYMPTOM_VITAMINS,
            LinkEdit {
                entity: Vitamin::NAME,
                id: &vitamin,
                before: &[],
                after: &all,
            },
            &symptoms,
        )
        .await
        .unwrap_err();

        match err {
            ConsoleError::LinkSync {
                entity,
                committed,
                failed_id,
                ..
            } => {
                assert_eq!(entity, "Vitamin");
                assert_eq!(committed, vec![all[0].clone()]);
                assert_eq!(failed_id, all[1]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.updated_ids(), vec![all[0].to_string()]);
    }
}
