//! Console operations over the knowledge base.
//!
//! [`Catalog`] is what the HTTP surface and the command-line tools call. It validates input
//! before any write, saves the primary record, and then keeps the bidirectional links in
//! step:
//!
//! | Saved / deleted | Reverse side kept in sync |
//! |---|---|
//! | Vitamin | `DeficiencySymptom.vitaminIds` |
//! | Food | `DeficiencySymptom.foodIds` |
//! | DeficiencySymptom | `Food.deficiencySymptoms`, `Vitamin.deficiencySymptoms` |
//!
//! When a reverse update fails the primary record stays saved and the error is
//! [`ConsoleError::LinkSync`].

use crate::client::EntityClient;
use crate::constants::MAX_GENERATED_TAGS;
use crate::entities::{Article, DeficiencySymptom, Disease, EffectsCase, Entity, Food, Vitamin};
use crate::integrations::{GenerateRequest, TextGenerator};
use crate::merge::{consolidated_lab_patch, merge_lab_fields, LabFields};
use crate::resolve::display_name_he;
use crate::store::{EntityStore, Patch, SortSpec};
use crate::sync::{
    sync_reverse_links, LinkEdit, SyncReport, FOOD_SYMPTOMS, SYMPTOM_FOODS, SYMPTOM_VITAMINS,
    VITAMIN_SYMPTOMS,
};
use crate::{ConsoleError, ConsoleResult};
use nutri_types::{EntityId, NonEmptyText};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Trimmed required display name.
///
/// # Errors
///
/// `ConsoleError::InvalidInput` naming `field` when the value is blank.
pub fn required_name(value: &str, field: &str) -> ConsoleResult<String> {
    NonEmptyText::new(value)
        .map(NonEmptyText::into_inner)
        .map_err(|_| ConsoleError::InvalidInput(format!("{field} is required")))
}

/// Create or update a record that has no reverse links, after checking its display name.
///
/// Used directly for diseases, articles and locally kept effects cases.
pub async fn save_record<T: Entity, S: EntityStore>(
    store: &S,
    id: Option<&str>,
    mut record: T,
) -> ConsoleResult<T> {
    let name = required_name(record.display_name(), T::NAME_FIELD)?;
    record.set_display_name(name);
    let client = EntityClient::<T, S>::new(store);
    let patch = Patch::from_record(&record)?;
    let saved = match id {
        Some(id) => client.update(id, patch).await?,
        None => client.create(patch).await?,
    };
    tracing::info!(entity = T::NAME, id = %saved.id(), "record saved");
    Ok(saved)
}

pub async fn delete_record<T: Entity, S: EntityStore>(store: &S, id: &str) -> ConsoleResult<()> {
    EntityClient::<T, S>::new(store).delete(id).await?;
    tracing::info!(entity = T::NAME, id, "record deleted");
    Ok(())
}

/// Apply a partial update body to a stored record. Keys absent from `changes` keep their
/// stored value; an explicit `null` clears.
pub fn overlay<T: Entity>(stored: &T, changes: Value) -> ConsoleResult<T> {
    let Value::Object(changes) = changes else {
        return Err(ConsoleError::InvalidInput(format!(
            "expected a JSON object updating {}, got {changes}",
            T::NAME
        )));
    };
    let mut doc = match serde_json::to_value(stored)? {
        Value::Object(doc) => doc,
        _ => serde_json::Map::new(),
    };
    doc.extend(changes);
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Effects cases, newest first.
pub async fn effects_cases<S: EntityStore>(store: &S) -> ConsoleResult<Vec<EffectsCase>> {
    EntityClient::<EffectsCase, S>::new(store)
        .list(Some(&SortSpec::desc("updated_date")))
        .await
}

/// Page-level operations over one data-access transport.
#[derive(Clone, Debug)]
pub struct Catalog<S> {
    store: S,
}

impl<S: EntityStore> Catalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn client<T: Entity>(&self) -> EntityClient<'_, T, S> {
        EntityClient::new(&self.store)
    }

    /// Current value of a record, or `None` when it does not exist.
    async fn existing<T: Entity>(&self, id: &str) -> ConsoleResult<Option<T>> {
        match self.client::<T>().get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn symptoms_for_sync(&self) -> ConsoleResult<Vec<DeficiencySymptom>> {
        self.client().list(None).await
    }

    /// Vitamins ordered by their short Hebrew label.
    pub async fn vitamins(&self) -> ConsoleResult<Vec<Vitamin>> {
        let mut vitamins: Vec<Vitamin> = self.client().list(None).await?;
        vitamins.sort_by_cached_key(|v| {
            let label = display_name_he(v);
            (label.to_lowercase(), label)
        });
        Ok(vitamins)
    }

    pub async fn vitamin(&self, id: &str) -> ConsoleResult<Vitamin> {
        self.client().get(id).await
    }

    /// Save a vitamin.
    ///
    /// The legacy lab fields are always consolidated on write: `labTestDeficiency` is cleared,
    /// `labTestDeficiencyDescription` is emptied and `labTestDeficiencyDetails` holds the
    /// merged text. On update a lab field left as `None` keeps its stored value. Afterwards
    /// every symptom whose membership changed has its `vitaminIds` updated.
    ///
    /// # Errors
    ///
    /// `ConsoleError::InvalidInput` for a blank Hebrew name (nothing is written), store
    /// errors from the save, and `ConsoleError::LinkSync` when a symptom update fails after
    /// the vitamin was saved.
    pub async fn save_vitamin(&self, id: Option<&str>, mut vitamin: Vitamin) -> ConsoleResult<Vitamin> {
        vitamin.vitamin_name_he = required_name(&vitamin.vitamin_name_he, Vitamin::NAME_FIELD)?;
        let stored = match id {
            Some(id) => self.existing::<Vitamin>(id).await?,
            None => None,
        };
        let before = match stored {
            Some(stored) => {
                vitamin.lab_test_deficiency = vitamin.lab_test_deficiency.or(stored.lab_test_deficiency);
                vitamin.lab_test_deficiency_description = vitamin
                    .lab_test_deficiency_description
                    .or(stored.lab_test_deficiency_description);
                vitamin.lab_test_deficiency_details = vitamin
                    .lab_test_deficiency_details
                    .or(stored.lab_test_deficiency_details);
                stored.deficiency_symptoms
            }
            None => Vec::new(),
        };

        let merged = merge_lab_fields(LabFields::of(&vitamin));
        let patch = Patch::from_record(&vitamin)?.merge(consolidated_lab_patch(&merged));
        let saved = match id {
            Some(id) => self.client::<Vitamin>().update(id, patch).await?,
            None => self.client::<Vitamin>().create(patch).await?,
        };
        tracing::info!(id = %saved.meta.id, "vitamin saved");

        let symptoms = self.symptoms_for_sync().await?;
        sync_reverse_links(
            &self.store,
            SYMPTOM_VITAMINS,
            LinkEdit {
                entity: Vitamin::NAME,
                id: &saved.meta.id,
                before: &before,
                after: &saved.deficiency_symptoms,
            },
            &symptoms,
        )
        .await?;
        Ok(saved)
    }

    /// Delete a vitamin and remove it from every symptom that listed it.
    pub async fn delete_vitamin(&self, id: &str) -> ConsoleResult<()> {
        let existing = self.existing::<Vitamin>(id).await?;
        self.client::<Vitamin>().delete(id).await?;
        tracing::info!(id, "vitamin deleted");

        let symptoms = self.symptoms_for_sync().await?;
        let vitamin_id = EntityId::from(id);
        let mut before: Vec<EntityId> = existing.map(|v| v.deficiency_symptoms).unwrap_or_default();
        // Symptoms that still point at the vitamin are unlinked even if the vitamin did not
        // list them.
        for symptom in &symptoms {
            if symptom.vitamin_ids.contains(&vitamin_id) && !before.contains(&symptom.meta.id) {
                before.push(symptom.meta.id.clone());
            }
        }
        sync_reverse_links(
            &self.store,
            SYMPTOM_VITAMINS,
            LinkEdit::deleted(Vitamin::NAME, &vitamin_id, &before),
            &symptoms,
        )
        .await?;
        Ok(())
    }

    pub async fn foods(&self) -> ConsoleResult<Vec<Food>> {
        self.client().list(Some(&SortSpec::desc("created_date"))).await
    }

    pub async fn food(&self, id: &str) -> ConsoleResult<Food> {
        self.client().get(id).await
    }

    /// Save a food and update `foodIds` on every symptom whose membership changed.
    pub async fn save_food(&self, id: Option<&str>, mut food: Food) -> ConsoleResult<Food> {
        food.food_name_he = required_name(&food.food_name_he, Food::NAME_FIELD)?;
        let before = match id {
            Some(id) => self
                .existing::<Food>(id)
                .await?
                .map(|f| f.deficiency_symptoms)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let patch = Patch::from_record(&food)?;
        let saved = match id {
            Some(id) => self.client::<Food>().update(id, patch).await?,
            None => self.client::<Food>().create(patch).await?,
        };
        tracing::info!(id = %saved.meta.id, "food saved");

        let symptoms = self.symptoms_for_sync().await?;
        sync_reverse_links(
            &self.store,
            SYMPTOM_FOODS,
            LinkEdit {
                entity: Food::NAME,
                id: &saved.meta.id,
                before: &before,
                after: &saved.deficiency_symptoms,
            },
            &symptoms,
        )
        .await?;
        Ok(saved)
    }

    pub async fn delete_food(&self, id: &str) -> ConsoleResult<()> {
        let before = self
            .existing::<Food>(id)
            .await?
            .map(|f| f.deficiency_symptoms)
            .unwrap_or_default();
        self.client::<Food>().delete(id).await?;
        tracing::info!(id, "food deleted");

        let symptoms = self.symptoms_for_sync().await?;
        let food_id = EntityId::from(id);
        sync_reverse_links(
            &self.store,
            SYMPTOM_FOODS,
            LinkEdit::deleted(Food::NAME, &food_id, &before),
            &symptoms,
        )
        .await?;
        Ok(())
    }

    pub async fn symptoms(&self) -> ConsoleResult<Vec<DeficiencySymptom>> {
        self.client().list(Some(&SortSpec::desc("created_date"))).await
    }

    pub async fn symptom(&self, id: &str) -> ConsoleResult<DeficiencySymptom> {
        self.client().get(id).await
    }

    /// Save a symptom, then update `deficiencySymptoms` on the foods and the vitamins whose
    /// membership changed. Foods are synced first.
    pub async fn save_symptom(
        &self,
        id: Option<&str>,
        mut symptom: DeficiencySymptom,
    ) -> ConsoleResult<DeficiencySymptom> {
        symptom.symptom_name_he = required_name(&symptom.symptom_name_he, DeficiencySymptom::NAME_FIELD)?;
        let previous = match id {
            Some(id) => self.existing::<DeficiencySymptom>(id).await?,
            None => None,
        };
        let (foods_before, vitamins_before) = previous
            .map(|s| (s.food_ids, s.vitamin_ids))
            .unwrap_or_default();

        let patch = Patch::from_record(&symptom)?;
        let saved = match id {
            Some(id) => self.client::<DeficiencySymptom>().update(id, patch).await?,
            None => self.client::<DeficiencySymptom>().create(patch).await?,
        };
        tracing::info!(id = %saved.meta.id, "symptom saved");

        self.sync_symptom_links(
            &saved.meta.id,
            &foods_before,
            &saved.food_ids,
            &vitamins_before,
            &saved.vitamin_ids,
        )
        .await?;
        Ok(saved)
    }

    pub async fn delete_symptom(&self, id: &str) -> ConsoleResult<()> {
        let (foods_before, vitamins_before) = self
            .existing::<DeficiencySymptom>(id)
            .await?
            .map(|s| (s.food_ids, s.vitamin_ids))
            .unwrap_or_default();
        self.client::<DeficiencySymptom>().delete(id).await?;
        tracing::info!(id, "symptom deleted");

        self.sync_symptom_links(&EntityId::from(id), &foods_before, &[], &vitamins_before, &[])
            .await
    }

    async fn sync_symptom_links(
        &self,
        symptom_id: &EntityId,
        foods_before: &[EntityId],
        foods_after: &[EntityId],
        vitamins_before: &[EntityId],
        vitamins_after: &[EntityId],
    ) -> ConsoleResult<()> {
        let foods: Vec<Food> = self.client().list(None).await?;
        sync_reverse_links(
            &self.store,
            FOOD_SYMPTOMS,
            LinkEdit {
                entity: DeficiencySymptom::NAME,
                id: symptom_id,
                before: foods_before,
                after: foods_after,
            },
            &foods,
        )
        .await?;

        let vitamins: Vec<Vitamin> = self.client().list(None).await?;
        sync_reverse_links(
            &self.store,
            VITAMIN_SYMPTOMS,
            LinkEdit {
                entity: DeficiencySymptom::NAME,
                id: symptom_id,
                before: vitamins_before,
                after: vitamins_after,
            },
            &vitamins,
        )
        .await?;
        Ok(())
    }

    /// Backfill `Food.deficiencySymptoms` from every symptom's `foodIds`.
    ///
    /// Only foods that gain an id are written. Food ids that match no food are ignored.
    pub async fn repair_symptom_food_links(&self) -> ConsoleResult<SyncReport> {
        let symptoms = self.symptoms_for_sync().await?;
        let mut foods: HashMap<EntityId, Food> = self
            .client::<Food>()
            .list(None)
            .await?
            .into_iter()
            .map(|f| (f.meta.id.clone(), f))
            .collect();

        let mut report = SyncReport::default();
        for symptom in &symptoms {
            for food_id in &symptom.food_ids {
                let Some(food) = foods.get_mut(food_id) else {
                    continue;
                };
                if food.deficiency_symptoms.contains(&symptom.meta.id) {
                    continue;
                }
                let mut seen = HashSet::new();
                let mut next: Vec<EntityId> = food
                    .deficiency_symptoms
                    .iter()
                    .filter(|id| seen.insert((*id).clone()))
                    .cloned()
                    .collect();
                next.push(symptom.meta.id.clone());

                let ids: Vec<Value> = next.iter().map(|i| Value::String(i.to_string())).collect();
                self.client::<Food>()
                    .update(
                        food_id.as_str(),
                        Patch::new().set(FOOD_SYMPTOMS.field, Value::Array(ids)),
                    )
                    .await?;
                food.deficiency_symptoms = next;
                if !report.updated.contains(food_id) {
                    report.updated.push(food_id.clone());
                }
            }
        }
        tracing::info!(foods = report.updated.len(), "symptom food links repaired");
        Ok(report)
    }

    /// Ask the generator for tags describing a symptom and store up to ten of them.
    pub async fn generate_symptom_tags(
        &self,
        generator: &TextGenerator,
        id: &str,
    ) -> ConsoleResult<DeficiencySymptom> {
        let symptom = self.symptom(id).await?;
        let prompt = format!(
            "Generate 5 short Hebrew tags for deficiency symptom: {}. Return comma separated only.",
            symptom.symptom_name_he
        );
        let reply = generator.generate(&GenerateRequest::new(prompt)).await?;
        let tags = split_tags(&reply);
        tracing::info!(id, count = tags.len(), "symptom tags generated");
        self.client::<DeficiencySymptom>()
            .update(id, Patch::new().set("tags", tags))
            .await
    }

    pub async fn diseases(&self) -> ConsoleResult<Vec<Disease>> {
        self.client().list(Some(&SortSpec::desc("created_date"))).await
    }

    pub async fn disease(&self, id: &str) -> ConsoleResult<Disease> {
        self.client().get(id).await
    }

    pub async fn save_disease(&self, id: Option<&str>, disease: Disease) -> ConsoleResult<Disease> {
        save_record(&self.store, id, disease).await
    }

    pub async fn delete_disease(&self, id: &str) -> ConsoleResult<()> {
        delete_record::<Disease, S>(&self.store, id).await
    }

    pub async fn articles(&self) -> ConsoleResult<Vec<Article>> {
        self.client().list(Some(&SortSpec::desc("created_date"))).await
    }

    pub async fn article(&self, id: &str) -> ConsoleResult<Article> {
        self.client().get(id).await
    }

    pub async fn save_article(&self, id: Option<&str>, article: Article) -> ConsoleResult<Article> {
        save_record(&self.store, id, article).await
    }

    pub async fn delete_article(&self, id: &str) -> ConsoleResult<()> {
        delete_record::<Article, S>(&self.store, id).await
    }
}

/// Split a generated reply on newlines and commas, keeping at most ten non-empty tags.
pub fn split_tags(reply: &str) -> Vec<String> {
    reply
        .split(['\n', ','])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .take(MAX_GENERATED_TAGS)
        .map(str::to_string)
        .collect()
}

/// Prompt asking for a Hebrew overview of a supplement.
pub fn vitamin_overview_prompt(name_he: &str, name_en: &str) -> String {
    let name_he = name_he.trim();
    let name_en = name_en.trim();
    let names = if name_en.is_empty() {
        format!("שם בעברית: {name_he}")
    } else {
        format!("שם בעברית: {name_he}\nשם באנגלית: {name_en}")
    };
    format!(
        "בצע חיפוש מידע על תוסף התזונה לפי השמות הבאים:\n{names}\n\n\
         הצג את כל המידע הקיים והרלוונטי על אותו תוסף בעברית.\n\
         החזר טקסט קריא בלבד (לא JSON), בפורמט קצר עם כותרות:\n\
         מה זה, שמות נרדפים, צורה פעילה נפוצה, שימושים עיקריים, תסמיני חוסר, מינונים מקובלים, \
         בטיחות/רעילות, תופעות לוואי, אינטראקציות, מקורות מזון, הערות חשובות.\n\
         אם יש חוסר ודאות, ציין זאת במפורש."
    )
}

/// Generated overview of a supplement, with internet context enabled.
///
/// # Errors
///
/// `ConsoleError::InvalidInput` when the Hebrew name is blank; generator errors otherwise.
pub async fn vitamin_overview(
    generator: &TextGenerator,
    name_he: &str,
    name_en: &str,
) -> ConsoleResult<String> {
    let name_he = required_name(name_he, Vitamin::NAME_FIELD)?;
    let request = GenerateRequest {
        prompt: vitamin_overview_prompt(&name_he, name_en),
        add_context_from_internet: Some(true),
    };
    let text = generator.generate(&request).await?;
    let text = text.trim();
    Ok(if text.is_empty() {
        "לא נמצא מידע להצגה.".to_string()
    } else {
        text.to_string()
    })
}
