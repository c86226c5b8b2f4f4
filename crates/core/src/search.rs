//! Global search across the knowledge base.

use crate::client::EntityClient;
use crate::constants::MIN_SEARCH_TERM_CHARS;
use crate::entities::{Article, DeficiencySymptom, Disease, Food, Vitamin};
use crate::resolve::{display_name_he, vitamin_name_en};
use crate::store::EntityStore;
use crate::ConsoleResult;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

/// Matches grouped per collection, in collection order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub vitamins: Vec<SearchHit>,
    pub diseases: Vec<SearchHit>,
    pub symptoms: Vec<SearchHit>,
    pub foods: Vec<SearchHit>,
    pub articles: Vec<SearchHit>,
}

impl SearchResults {
    pub fn total(&self) -> usize {
        self.vitamins.len()
            + self.diseases.len()
            + self.symptoms.len()
            + self.foods.len()
            + self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Normalised term, or `None` when it is too short to search for.
pub fn normalize_term(raw: &str) -> Option<String> {
    let term = raw.trim().to_lowercase();
    (term.chars().count() >= MIN_SEARCH_TERM_CHARS).then_some(term)
}

fn matches<'a>(term: &str, fields: impl IntoIterator<Item = Option<&'a str>>) -> bool {
    fields
        .into_iter()
        .flatten()
        .any(|f| f.to_lowercase().contains(term))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Case-insensitive substring search over names, characteristics, tags, descriptions and
/// summaries. The five collections are loaded concurrently.
///
/// # Returns
///
/// Empty results, without touching the store, when the trimmed term is shorter than two
/// characters.
///
/// # Errors
///
/// The first store error from any of the five listings.
pub async fn global_search<S: EntityStore>(store: &S, raw: &str) -> ConsoleResult<SearchResults> {
    let Some(term) = normalize_term(raw) else {
        return Ok(SearchResults::default());
    };

    let vitamin_client = EntityClient::<Vitamin, S>::new(store);
    let disease_client = EntityClient::<Disease, S>::new(store);
    let symptom_client = EntityClient::<DeficiencySymptom, S>::new(store);
    let food_client = EntityClient::<Food, S>::new(store);
    let article_client = EntityClient::<Article, S>::new(store);
    let (vitamins, diseases, symptoms, foods, articles) = tokio::try_join!(
        vitamin_client.list(None),
        disease_client.list(None),
        symptom_client.list(None),
        food_client.list(None),
        article_client.list(None),
    )?;

    let vitamins = vitamins
        .iter()
        .filter_map(|v| {
            let he = display_name_he(v);
            let en = vitamin_name_en(v);
            matches(&term, [Some(v.vitamin_name_he.as_str()), Some(he.as_str()), Some(en.as_str())])
                .then(|| SearchHit {
                    id: v.meta.id.to_string(),
                    label: he,
                    subtitle: non_blank(Some(en.as_str())),
                })
        })
        .collect();

    let diseases = diseases
        .iter()
        .filter(|d| {
            matches(
                &term,
                [Some(d.disease_name_he.as_str()), d.disease_characteristics_he.as_deref()],
            )
        })
        .map(|d| SearchHit {
            id: d.meta.id.to_string(),
            label: d.disease_name_he.clone(),
            subtitle: None,
        })
        .collect();

    let symptoms = symptoms
        .iter()
        .filter(|s| {
            matches(
                &term,
                [Some(s.symptom_name_he.as_str()), s.symptom_name_en.as_deref()]
                    .into_iter()
                    .chain(s.tags.iter().map(|t| Some(t.as_str()))),
            )
        })
        .map(|s| SearchHit {
            id: s.meta.id.to_string(),
            label: s.symptom_name_he.clone(),
            subtitle: (!s.tags.is_empty()).then(|| s.tags.join(", ")),
        })
        .collect();

    let foods = foods
        .iter()
        .filter(|f| {
            matches(
                &term,
                [
                    Some(f.food_name_he.as_str()),
                    f.food_name_en.as_deref(),
                    f.description.as_deref(),
                ],
            )
        })
        .map(|f| SearchHit {
            id: f.meta.id.to_string(),
            label: f.food_name_he.clone(),
            subtitle: non_blank(f.food_category.as_deref()),
        })
        .collect();

    let articles = articles
        .iter()
        .filter(|a| {
            matches(
                &term,
                [Some(a.title_he.as_str()), a.title_en.as_deref(), a.summary.as_deref()],
            )
        })
        .map(|a| SearchHit {
            id: a.meta.id.to_string(),
            label: a.title_he.clone(),
            subtitle: non_blank(a.summary.as_deref()),
        })
        .collect();

    let results = SearchResults {
        vitamins,
        diseases,
        symptoms,
        foods,
        articles,
    };
    tracing::debug!(term = %term, hits = results.total(), "global search");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Entity;
    use crate::store::document::DocumentStore;
    use crate::store::Patch;
    use serde_json::json;

    async fn seeded() -> DocumentStore {
        let store = DocumentStore::in_memory();
        store
            .create(
                Vitamin::NAME,
                Patch::new().set("vitaminNameHe", "ויטמין D").set("vitaminNameEn", "Vitamin D"),
            )
            .await
            .unwrap();
        store
            .create(
                DeficiencySymptom::NAME,
                Patch::new()
                    .set("symptomNameHe", "עייפות")
                    .set("tags", json!(["Fatigue", "אנרגיה"])),
            )
            .await
            .unwrap();
        store
            .create(
                Food::NAME,
                Patch::new()
                    .set("foodNameHe", "סלמון")
                    .set("foodCategory", "דגים")
                    .set("description", "rich in vitamin d"),
            )
            .await
            .unwrap();
        store
            .create(
                Disease::NAME,
                Patch::new()
                    .set("diseaseNameHe", "רככת")
                    .set("diseaseCharacteristicsHe", "חוסר ויטמין D"),
            )
            .await
            .unwrap();
        store
            .create(Article::NAME, Patch::new().set("titleHe", "על שינה").set("summary", "sleep"))
            .await
            .unwrap();
        store
    }

    #[test]
    fn short_terms_are_rejected() {
        assert_eq!(normalize_term(" a "), None);
        assert_eq!(normalize_term("אב"), Some("אב".to_string()));
        assert_eq!(normalize_term("  VIT "), Some("vit".to_string()));
    }

    #[tokio::test]
    async fn single_character_returns_nothing() {
        let store = seeded().await;
        let results = global_search(&store, "D").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn matches_are_case_insensitive_across_collections() {
        let store = seeded().await;
        let results = global_search(&store, "vitamin D").await.unwrap();
        assert_eq!(results.vitamins.len(), 1);
        assert_eq!(results.vitamins[0].subtitle.as_deref(), Some("Vitamin D"));
        assert_eq!(results.foods.len(), 1);
        assert_eq!(results.foods[0].subtitle.as_deref(), Some("דגים"));
        assert!(results.diseases.is_empty());
        assert!(results.articles.is_empty());
    }

    #[tokio::test]
    async fn tags_and_characteristics_are_searched() {
        let store = seeded().await;
        let results = global_search(&store, "fatigue").await.unwrap();
        assert_eq!(results.symptoms.len(), 1);
        assert_eq!(results.symptoms[0].subtitle.as_deref(), Some("Fatigue, אנרגיה"));

        let results = global_search(&store, "ויטמין").await.unwrap();
        assert_eq!(results.diseases.len(), 1);
        assert_eq!(results.vitamins.len(), 1);
        assert_eq!(results.total(), 2);
    }
}
