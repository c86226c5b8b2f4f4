//! Bulk import and export per entity kind.
//!
//! Imports skip any row whose primary name is blank or already known (case-insensitive),
//! including names added earlier in the same file. Exports render the loaded records as CSV
//! with a fixed column set per kind, or as pretty-printed JSON.

use crate::client::EntityClient;
use crate::entities::{Article, DeficiencySymptom, Disease, Document, EffectsCase, Entity, Food, Vitamin};
use crate::resolve::{active_form, display_name_he, vitamin_name_en};
use crate::store::{EntityStore, Patch, SortSpec};
use crate::tabular::{as_optional_number, as_optional_string, as_string_array, to_csv};
use crate::{ConsoleError, ConsoleResult};
use nutri_types::EntityId;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Entity kinds that can be imported and exported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Vitamins,
    Foods,
    Symptoms,
    Diseases,
    Articles,
    EffectsCases,
}

impl TransferKind {
    pub const ALL: [TransferKind; 6] = [
        TransferKind::Vitamins,
        TransferKind::Foods,
        TransferKind::Symptoms,
        TransferKind::Diseases,
        TransferKind::Articles,
        TransferKind::EffectsCases,
    ];

    /// Path segment and file-name prefix.
    pub fn slug(self) -> &'static str {
        match self {
            TransferKind::Vitamins => "vitamins",
            TransferKind::Foods => "foods",
            TransferKind::Symptoms => "symptoms",
            TransferKind::Diseases => "diseases",
            TransferKind::Articles => "articles",
            TransferKind::EffectsCases => "effects-cases",
        }
    }

    pub fn entity(self) -> &'static str {
        match self {
            TransferKind::Vitamins => Vitamin::NAME,
            TransferKind::Foods => Food::NAME,
            TransferKind::Symptoms => DeficiencySymptom::NAME,
            TransferKind::Diseases => Disease::NAME,
            TransferKind::Articles => Article::NAME,
            TransferKind::EffectsCases => EffectsCase::NAME,
        }
    }

    /// True for the kind kept in local storage rather than the shared backend.
    pub fn is_local(self) -> bool {
        self == TransferKind::EffectsCases
    }
}

impl std::str::FromStr for TransferKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferKind::ALL
            .into_iter()
            .find(|k| k.slug() == s || (s == "effects_cases" && k.is_local()))
            .ok_or_else(|| ConsoleError::InvalidInput(format!("unknown entity kind '{s}'")))
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv;charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(ConsoleError::InvalidInput(format!(
                "unknown export format '{other}'"
            ))),
        }
    }
}

/// `<kind>_<millis>.<ext>`, e.g. `foods_1700000000000.csv`.
pub fn export_file_name(kind: TransferKind, format: ExportFormat, millis: i64) -> String {
    format!(
        "{}_{millis}.{}",
        kind.slug().replace('-', "_"),
        format.extension()
    )
}

fn known_names<'a>(names: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

fn put_string(patch: Patch, field: &str, value: Option<String>) -> Patch {
    match value {
        Some(v) => patch.set(field, v),
        None => patch,
    }
}

fn put_number(patch: Patch, field: &str, value: Option<f64>) -> Patch {
    match value {
        Some(v) => patch.set(field, v),
        None => patch,
    }
}

/// Creation payload for one imported row under its trimmed primary name.
fn import_payload(kind: TransferKind, row: &Document, name: String) -> Patch {
    let s = |field: &str| as_optional_string(row.get(field));
    let base = Patch::new();
    match kind {
        TransferKind::Vitamins => {
            let p = base.set("vitaminNameHe", name);
            let p = put_string(p, "vitaminNameEn", s("vitaminNameEn"));
            let p = put_string(p, "activeForm", s("activeForm"));
            let p = put_string(p, "solubility", s("solubility"));
            let p = put_string(p, "source", s("source"));
            put_string(p, "notes", s("notes"))
        }
        TransferKind::Foods => {
            let p = base.set("foodNameHe", name);
            let p = put_string(p, "foodNameEn", s("foodNameEn"));
            let p = put_string(p, "foodCategory", s("foodCategory"));
            let p = put_string(p, "dosage", s("dosage"));
            let p = put_string(p, "imageUrl", s("imageUrl"));
            let p = put_string(p, "description", s("description"));
            put_string(p, "notes", s("notes"))
        }
        TransferKind::Symptoms => {
            let p = base
                .set("symptomNameHe", name)
                .set("tags", as_string_array(row.get("tags")));
            let p = put_string(p, "symptomNameEn", s("symptomNameEn"));
            let p = put_number(p, "sortOrder", as_optional_number(row.get("sortOrder")));
            put_string(p, "notes", s("notes"))
        }
        TransferKind::Diseases => {
            let p = base.set("diseaseNameHe", name);
            let p = put_string(p, "diseaseCharacteristicsHe", s("diseaseCharacteristicsHe"));
            put_string(p, "notes", s("notes"))
        }
        TransferKind::Articles => {
            let p = base.set("titleHe", name);
            let p = put_string(p, "titleEn", s("titleEn"));
            let p = put_string(p, "url", s("url"));
            put_string(p, "summary", s("summary"))
        }
        TransferKind::EffectsCases => {
            let mut p = base.set("phenomenonName", name);
            for field in ["supplementIds", "symptomIds", "deficiencyIds", "foodIds", "articleIds"] {
                p = p.set(field, as_string_array(row.get(field)));
            }
            p.set("notes", s("notes").unwrap_or_default())
        }
    }
}

async fn load<T: Entity, S: EntityStore>(store: &S) -> ConsoleResult<Vec<T>> {
    EntityClient::<T, S>::new(store).list(None).await
}

/// Names already present, lowercased. Vitamins contribute both resolved names.
async fn existing_names<S: EntityStore>(store: &S, kind: TransferKind) -> ConsoleResult<HashSet<String>> {
    Ok(match kind {
        TransferKind::Vitamins => {
            let vitamins = load::<Vitamin, S>(store).await?;
            let names: Vec<String> = vitamins
                .iter()
                .flat_map(|v| [display_name_he(v), vitamin_name_en(v)])
                .collect();
            known_names(names.iter().map(String::as_str))
        }
        TransferKind::Foods => {
            let foods = load::<Food, S>(store).await?;
            known_names(foods.iter().map(Entity::display_name))
        }
        TransferKind::Symptoms => {
            let symptoms = load::<DeficiencySymptom, S>(store).await?;
            known_names(symptoms.iter().map(Entity::display_name))
        }
        TransferKind::Diseases => {
            let diseases = load::<Disease, S>(store).await?;
            known_names(diseases.iter().map(Entity::display_name))
        }
        TransferKind::Articles => {
            let articles = load::<Article, S>(store).await?;
            known_names(articles.iter().map(Entity::display_name))
        }
        TransferKind::EffectsCases => {
            let cases = load::<EffectsCase, S>(store).await?;
            known_names(cases.iter().map(Entity::display_name))
        }
    })
}

fn name_field(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Vitamins => Vitamin::NAME_FIELD,
        TransferKind::Foods => Food::NAME_FIELD,
        TransferKind::Symptoms => DeficiencySymptom::NAME_FIELD,
        TransferKind::Diseases => Disease::NAME_FIELD,
        TransferKind::Articles => Article::NAME_FIELD,
        TransferKind::EffectsCases => EffectsCase::NAME_FIELD,
    }
}

/// Create a record for every row whose name is new.
///
/// Rows are created one at a time; the first store error stops the import.
///
/// # Arguments
///
/// * `store` - The shared backend, or the local store for effects cases.
/// * `kind` - Which entity the rows describe.
/// * `rows` - Loosely typed rows from [`crate::tabular::parse_import`].
pub async fn import_rows<S: EntityStore>(
    store: &S,
    kind: TransferKind,
    rows: &[Document],
) -> ConsoleResult<ImportSummary> {
    let mut known = existing_names(store, kind).await?;
    let mut summary = ImportSummary::default();

    for row in rows {
        let Some(name) = as_optional_string(row.get(name_field(kind))) else {
            summary.skipped += 1;
            continue;
        };
        let key = name.to_lowercase();
        let name_en = match kind {
            TransferKind::Vitamins => as_optional_string(row.get("vitaminNameEn")).map(|n| n.to_lowercase()),
            _ => None,
        };
        if known.contains(&key) || name_en.as_ref().is_some_and(|en| known.contains(en)) {
            summary.skipped += 1;
            continue;
        }

        store
            .create(kind.entity(), import_payload(kind, row, name))
            .await?;
        known.insert(key);
        known.extend(name_en);
        summary.added += 1;
    }

    tracing::info!(kind = kind.slug(), added = summary.added, skipped = summary.skipped, "import finished");
    Ok(summary)
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn joined(ids: &[EntityId]) -> String {
    ids.iter().map(EntityId::as_str).collect::<Vec<_>>().join("|")
}

fn default_sort(kind: TransferKind) -> Option<SortSpec> {
    match kind {
        TransferKind::Vitamins => None,
        TransferKind::EffectsCases => Some(SortSpec::desc("updated_date")),
        _ => Some(SortSpec::desc("created_date")),
    }
}

/// Header plus one row per record.
async fn export_rows<S: EntityStore>(store: &S, kind: TransferKind) -> ConsoleResult<Vec<Vec<String>>> {
    let sort = default_sort(kind);
    let sort = sort.as_ref();
    let header = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();

    let mut rows = Vec::new();
    match kind {
        TransferKind::Vitamins => {
            rows.push(header(&["id", "vitaminNameHe", "vitaminNameEn", "activeForm", "solubility", "updated_date"]));
            for v in EntityClient::<Vitamin, S>::new(store).list(sort).await? {
                rows.push(vec![
                    v.meta.id.to_string(),
                    display_name_he(&v),
                    vitamin_name_en(&v),
                    active_form(&v),
                    opt(&v.solubility),
                    opt(&v.meta.updated_date),
                ]);
            }
        }
        TransferKind::Foods => {
            rows.push(header(&["id", "foodNameHe", "foodNameEn", "foodCategory", "dosage", "imageUrl", "updated_date"]));
            for f in EntityClient::<Food, S>::new(store).list(sort).await? {
                rows.push(vec![
                    f.meta.id.to_string(),
                    f.food_name_he.clone(),
                    opt(&f.food_name_en),
                    opt(&f.food_category),
                    opt(&f.dosage),
                    opt(&f.image_url),
                    opt(&f.meta.updated_date),
                ]);
            }
        }
        TransferKind::Symptoms => {
            rows.push(header(&["id", "symptomNameHe", "symptomNameEn", "sortOrder", "tags", "updated_date"]));
            for s in EntityClient::<DeficiencySymptom, S>::new(store).list(sort).await? {
                rows.push(vec![
                    s.meta.id.to_string(),
                    s.symptom_name_he.clone(),
                    opt(&s.symptom_name_en),
                    number(s.sort_order),
                    s.tags.join("|"),
                    opt(&s.meta.updated_date),
                ]);
            }
        }
        TransferKind::Diseases => {
            rows.push(header(&["id", "diseaseNameHe", "sortOrder", "diseaseCharacteristicsHe", "updated_date"]));
            for d in EntityClient::<Disease, S>::new(store).list(sort).await? {
                rows.push(vec![
                    d.meta.id.to_string(),
                    d.disease_name_he.clone(),
                    number(d.sort_order),
                    opt(&d.disease_characteristics_he),
                    opt(&d.meta.updated_date),
                ]);
            }
        }
        TransferKind::Articles => {
            rows.push(header(&["id", "titleHe", "titleEn", "url", "summary", "updated_date"]));
            for a in EntityClient::<Article, S>::new(store).list(sort).await? {
                rows.push(vec![
                    a.meta.id.to_string(),
                    a.title_he.clone(),
                    opt(&a.title_en),
                    opt(&a.url),
                    opt(&a.summary),
                    opt(&a.meta.updated_date),
                ]);
            }
        }
        TransferKind::EffectsCases => {
            rows.push(header(&[
                "id",
                "phenomenonName",
                "supplementIds",
                "symptomIds",
                "deficiencyIds",
                "foodIds",
                "articleIds",
                "notes",
                "updated_date",
            ]));
            for c in EntityClient::<EffectsCase, S>::new(store).list(sort).await? {
                rows.push(vec![
                    c.meta.id.to_string(),
                    c.phenomenon_name.clone(),
                    joined(&c.supplement_ids),
                    joined(&c.symptom_ids),
                    joined(&c.deficiency_ids),
                    joined(&c.food_ids),
                    joined(&c.article_ids),
                    c.notes.clone(),
                    opt(&c.meta.updated_date),
                ]);
            }
        }
    }
    Ok(rows)
}

/// Render every record of `kind` in `format`.
pub async fn export<S: EntityStore>(
    store: &S,
    kind: TransferKind,
    format: ExportFormat,
) -> ConsoleResult<String> {
    match format {
        ExportFormat::Csv => to_csv(export_rows(store, kind).await?),
        ExportFormat::Json => {
            let docs = store.list(kind.entity(), default_sort(kind).as_ref()).await?;
            let docs: Vec<Value> = docs.into_iter().map(Value::Object).collect();
            Ok(serde_json::to_string_pretty(&docs)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::document::DocumentStore;
    use crate::store::local::{LocalKv, LocalStore};
    use crate::tabular::{parse_import, parse_rows};
    use std::sync::Arc;

    #[test]
    fn kinds_parse_from_slugs() {
        assert_eq!("effects-cases".parse::<TransferKind>().unwrap(), TransferKind::EffectsCases);
        assert_eq!("foods".parse::<TransferKind>().unwrap(), TransferKind::Foods);
        assert!("users".parse::<TransferKind>().is_err());
        assert_eq!(
            export_file_name(TransferKind::EffectsCases, ExportFormat::Csv, 5),
            "effects_cases_5.csv"
        );
    }

    #[tokio::test]
    async fn food_import_skips_known_and_repeated_names() {
        let store = DocumentStore::in_memory();
        store
            .create(Food::NAME, Patch::new().set("foodNameHe", "תרד"))
            .await
            .unwrap();

        let text = "foodNameHe,foodCategory\nתרד,ירקות\nעדשים,קטניות\n עדשים ,\n,ריק\n";
        let rows = parse_import("foods.csv", text).unwrap();
        let summary = import_rows(&store, TransferKind::Foods, &rows).await.unwrap();
        assert_eq!(summary, ImportSummary { added: 1, skipped: 3 });

        let foods = EntityClient::<Food, _>::new(&store).list(None).await.unwrap();
        let lentils = foods.iter().find(|f| f.food_name_he == "עדשים").unwrap();
        assert_eq!(lentils.food_category.as_deref(), Some("קטניות"));
    }

    #[tokio::test]
    async fn vitamin_import_dedups_on_either_name() {
        let store = DocumentStore::in_memory();
        store
            .create(
                Vitamin::NAME,
                Patch::new().set("vitaminNameHe", "ויטמין C").set("vitaminNameEn", "Vitamin C"),
            )
            .await
            .unwrap();
        let rows = parse_import(
            "v.json",
            r#"[{"vitaminNameHe":"חומצה אסקורבית","vitaminNameEn":"vitamin c"},
                {"vitaminNameHe":"ברזל","vitaminNameEn":"Iron","solubility":"מים"}]"#,
        )
        .unwrap();
        let summary = import_rows(&store, TransferKind::Vitamins, &rows).await.unwrap();
        assert_eq!(summary, ImportSummary { added: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn symptom_import_coerces_tags_and_numbers() {
        let store = DocumentStore::in_memory();
        let rows = parse_import(
            "s.csv",
            "symptomNameHe,sortOrder,tags\nעייפות,3,\"a|b\"\nחולשה,abc,\n",
        )
        .unwrap();
        import_rows(&store, TransferKind::Symptoms, &rows).await.unwrap();

        let symptoms = EntityClient::<DeficiencySymptom, _>::new(&store)
            .list(Some(&SortSpec::asc("symptomNameHe")))
            .await
            .unwrap();
        let tired = symptoms.iter().find(|s| s.symptom_name_he == "עייפות").unwrap();
        assert_eq!(tired.sort_order, Some(3.0));
        assert_eq!(tired.tags, vec!["a", "b"]);
        let weak = symptoms.iter().find(|s| s.symptom_name_he == "חולשה").unwrap();
        assert_eq!(weak.sort_order, None);
    }

    #[tokio::test]
    async fn effects_cases_export_joins_ids() {
        let store = LocalStore::new(Arc::new(LocalKv::in_memory()));
        let rows = parse_import(
            "cases.json",
            r#"[{"phenomenonName":"כאב ראש","supplementIds":"v1|v2","foodIds":["f1"]}]"#,
        )
        .unwrap();
        import_rows(&store, TransferKind::EffectsCases, &rows).await.unwrap();

        let csv = export(&store, TransferKind::EffectsCases, ExportFormat::Csv).await.unwrap();
        let parsed = parse_rows(&csv).unwrap();
        assert_eq!(parsed[0][1], "phenomenonName");
        assert_eq!(parsed[1][1], "כאב ראש");
        assert_eq!(parsed[1][2], "v1|v2");
        assert_eq!(parsed[1][5], "f1");
    }

    #[tokio::test]
    async fn json_export_is_pretty_array() {
        let store = DocumentStore::in_memory();
        store
            .create(Article::NAME, Patch::new().set("titleHe", "מאמר"))
            .await
            .unwrap();
        let json = export(&store, TransferKind::Articles, ExportFormat::Json).await.unwrap();
        assert!(json.starts_with("[\n"));
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["titleHe"], "מאמר");
    }
}
