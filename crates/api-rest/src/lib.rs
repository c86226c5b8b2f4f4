//! # API REST
//!
//! REST API for the nutrition console.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Every handler delegates to `nutri-core`; no business rules live here.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use nutri_core::{
    auth::{list_users, set_role, Identity},
    catalog::{delete_record, effects_cases, overlay, save_record, vitamin_overview, Catalog},
    client::EntityClient,
    choices::{ChoiceKind, ChoiceRegistry},
    entities::{Article, DeficiencySymptom, Disease, EffectsCase, Food, User, Vitamin},
    integrations::{GenerateRequest, TextGenerator, Uploader},
    merge::{merge_lab_fields, LabFields},
    search::{global_search, SearchResults},
    store::{local::LocalKv, local::LocalStore, Backend, EntityStore},
    tabular::parse_import,
    transfer::{export, export_file_name, import_rows, ExportFormat, TransferKind},
    ConsoleConfig, ConsoleError, ConsoleResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    catalog: Arc<Catalog<Backend>>,
    local: LocalStore,
    choices: ChoiceRegistry,
    generator: Arc<TextGenerator>,
    uploader: Arc<Uploader>,
    identity: Arc<Identity>,
}

impl AppState {
    pub fn new(
        backend: Backend,
        kv: Arc<LocalKv>,
        generator: TextGenerator,
        uploader: Uploader,
        identity: Identity,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(backend)),
            local: LocalStore::new(kv.clone()),
            choices: ChoiceRegistry::new(kv),
            generator: Arc::new(generator),
            uploader: Arc::new(uploader),
            identity: Arc::new(identity),
        }
    }

    /// Build the transports and integrations selected by `cfg`.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be constructed or the local state file
    /// cannot be opened.
    pub fn from_config(cfg: &ConsoleConfig) -> ConsoleResult<Self> {
        let backend = Backend::from_config(cfg)?;
        let kv = Arc::new(LocalKv::open(cfg.local_state_file())?);
        let generator = TextGenerator::from_config(cfg, &backend);
        let uploader = Uploader::from_config(cfg, &backend);
        let identity = Identity::from_config(cfg, &backend);
        tracing::info!(backend = ?backend.kind(), "console state ready");
        Ok(Self::new(backend, kv, generator, uploader, identity))
    }

    fn store(&self) -> &Backend {
        self.catalog.store()
    }
}

/// A [`ConsoleError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(ConsoleError);

impl From<ConsoleError> for ApiError {
    fn from(err: ConsoleError) -> Self {
        ApiError(err)
    }
}

/// HTTP status for a console error.
pub fn status_for(err: &ConsoleError) -> StatusCode {
    match err {
        ConsoleError::InvalidInput(_) | ConsoleError::UnsupportedImport(_) | ConsoleError::Csv(_) => {
            StatusCode::BAD_REQUEST
        }
        ConsoleError::NotFound { .. } => StatusCode::NOT_FOUND,
        ConsoleError::Request { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ConsoleError::Transport(_)
        | ConsoleError::TextGeneration(_)
        | ConsoleError::Upload(_)
        | ConsoleError::LinkSync { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        } else {
            tracing::warn!("Request rejected: {}", self.0);
        }
        let body = ErrorRes {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RoleReq {
    pub role: String,
}

#[derive(Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LabMergeReq {
    pub lab_test_deficiency: String,
    pub lab_test_deficiency_description: String,
    pub lab_test_deficiency_details: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LabMergeRes {
    pub merged: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChoiceReq {
    pub value: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChoicesRes {
    /// The value as stored, when one was registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportReq {
    /// Decides the parser: `.csv` or `.json`.
    pub file_name: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ImportRes {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct GenerateReq {
    pub prompt: String,
    #[serde(default)]
    pub add_context_from_internet: Option<bool>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverviewReq {
    pub name_he: String,
    #[serde(default)]
    pub name_en: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct GenerateRes {
    pub text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub file_name: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UploadRes {
    pub file_url: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RepairRes {
    pub updated: Vec<String>,
}

/// CRUD handlers for one catalog entity kind.
macro_rules! catalog_crud {
    (
        $ty:ty, $tag:tt, $collection:tt, $item:tt,
        $list:ident => $c_list:ident,
        $read:ident => $c_read:ident,
        $create:ident, $update:ident => $c_save:ident,
        $delete:ident => $c_delete:ident
    ) => {
        #[utoipa::path(
            get,
            path = $collection,
            tag = $tag,
            responses(
                (status = 200, description = "All records", body = [serde_json::Value]),
                (status = 502, description = "Backend unavailable", body = ErrorRes)
            )
        )]
        #[axum::debug_handler]
        async fn $list(State(state): State<AppState>) -> ApiResult<Json<Vec<$ty>>> {
            Ok(Json(state.catalog.$c_list().await?))
        }

        #[utoipa::path(
            get,
            path = $item,
            tag = $tag,
            params(("id" = String, Path, description = "Record id")),
            responses(
                (status = 200, description = "The record", body = serde_json::Value),
                (status = 404, description = "No such record", body = ErrorRes)
            )
        )]
        #[axum::debug_handler]
        async fn $read(
            State(state): State<AppState>,
            AxumPath(id): AxumPath<String>,
        ) -> ApiResult<Json<$ty>> {
            Ok(Json(state.catalog.$c_read(&id).await?))
        }

        #[utoipa::path(
            post,
            path = $collection,
            tag = $tag,
            request_body = serde_json::Value,
            responses(
                (status = 201, description = "Record created", body = serde_json::Value),
                (status = 400, description = "Required name missing", body = ErrorRes)
            )
        )]
        #[axum::debug_handler]
        async fn $create(
            State(state): State<AppState>,
            Json(record): Json<$ty>,
        ) -> ApiResult<(StatusCode, Json<$ty>)> {
            let saved = state.catalog.$c_save(None, record).await?;
            Ok((StatusCode::CREATED, Json(saved)))
        }

        #[utoipa::path(
            put,
            path = $item,
            tag = $tag,
            params(("id" = String, Path, description = "Record id")),
            request_body = serde_json::Value,
            responses(
                (status = 200, description = "Record updated", body = serde_json::Value),
                (status = 400, description = "Required name missing", body = ErrorRes),
                (status = 404, description = "No such record", body = ErrorRes)
            )
        )]
        #[axum::debug_handler]
        async fn $update(
            State(state): State<AppState>,
            AxumPath(id): AxumPath<String>,
            Json(changes): Json<serde_json::Value>,
        ) -> ApiResult<Json<$ty>> {
            let stored = state.catalog.$c_read(&id).await?;
            let record = overlay(&stored, changes)?;
            Ok(Json(state.catalog.$c_save(Some(&id), record).await?))
        }

        #[utoipa::path(
            delete,
            path = $item,
            tag = $tag,
            params(("id" = String, Path, description = "Record id")),
            responses(
                (status = 204, description = "Record deleted"),
                (status = 404, description = "No such record", body = ErrorRes)
            )
        )]
        #[axum::debug_handler]
        async fn $delete(
            State(state): State<AppState>,
            AxumPath(id): AxumPath<String>,
        ) -> ApiResult<StatusCode> {
            state.catalog.$c_delete(&id).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    };
}

catalog_crud!(
    Vitamin, "vitamins", "/vitamins", "/vitamins/{id}",
    list_vitamins => vitamins,
    read_vitamin => vitamin,
    create_vitamin, update_vitamin => save_vitamin,
    delete_vitamin => delete_vitamin
);

catalog_crud!(
    Food, "foods", "/foods", "/foods/{id}",
    list_foods => foods,
    read_food => food,
    create_food, update_food => save_food,
    delete_food => delete_food
);

catalog_crud!(
    DeficiencySymptom, "symptoms", "/symptoms", "/symptoms/{id}",
    list_symptoms => symptoms,
    read_symptom => symptom,
    create_symptom, update_symptom => save_symptom,
    delete_symptom => delete_symptom
);

catalog_crud!(
    Disease, "diseases", "/diseases", "/diseases/{id}",
    list_diseases => diseases,
    read_disease => disease,
    create_disease, update_disease => save_disease,
    delete_disease => delete_disease
);

catalog_crud!(
    Article, "articles", "/articles", "/articles/{id}",
    list_articles => articles,
    read_article => article,
    create_article, update_article => save_article,
    delete_article => delete_article
);

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        me,
        list_vitamins,
        read_vitamin,
        create_vitamin,
        update_vitamin,
        delete_vitamin,
        list_foods,
        read_food,
        create_food,
        update_food,
        delete_food,
        list_symptoms,
        read_symptom,
        create_symptom,
        update_symptom,
        delete_symptom,
        list_diseases,
        read_disease,
        create_disease,
        update_disease,
        delete_disease,
        list_articles,
        read_article,
        create_article,
        update_article,
        delete_article,
        list_effects_cases,
        create_effects_case,
        update_effects_case,
        delete_effects_case,
        users,
        update_user_role,
        search,
        merge_lab_fields_preview,
        choice_options,
        register_choice,
        import_entities,
        export_entities,
        generate_symptom_tags,
        repair_symptom_food_links,
        generate_text,
        generate_vitamin_overview,
        upload_file,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        RoleReq,
        LabMergeReq,
        LabMergeRes,
        ChoiceReq,
        ChoicesRes,
        ImportReq,
        ImportRes,
        GenerateReq,
        OverviewReq,
        GenerateRes,
        RepairRes,
        UploadRes,
    ))
)]
struct ApiDoc;

/// Build the console router with OpenAPI docs and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/me", get(me))
        .route("/vitamins", get(list_vitamins).post(create_vitamin))
        .route(
            "/vitamins/:id",
            get(read_vitamin).put(update_vitamin).delete(delete_vitamin),
        )
        .route("/foods", get(list_foods).post(create_food))
        .route("/foods/:id", get(read_food).put(update_food).delete(delete_food))
        .route("/symptoms", get(list_symptoms).post(create_symptom))
        .route("/symptoms/repair-food-links", post(repair_symptom_food_links))
        .route(
            "/symptoms/:id",
            get(read_symptom).put(update_symptom).delete(delete_symptom),
        )
        .route("/symptoms/:id/ai-tags", post(generate_symptom_tags))
        .route("/diseases", get(list_diseases).post(create_disease))
        .route(
            "/diseases/:id",
            get(read_disease).put(update_disease).delete(delete_disease),
        )
        .route("/articles", get(list_articles).post(create_article))
        .route(
            "/articles/:id",
            get(read_article).put(update_article).delete(delete_article),
        )
        .route(
            "/effects-cases",
            get(list_effects_cases).post(create_effects_case),
        )
        .route(
            "/effects-cases/:id",
            put(update_effects_case).delete(delete_effects_case),
        )
        .route("/users", get(users))
        .route("/users/:id/role", put(update_user_role))
        .route("/search", get(search))
        .route("/lab-fields/merge", post(merge_lab_fields_preview))
        .route("/choices/:kind", get(choice_options).post(register_choice))
        .route("/import/:entity", post(import_entities))
        .route("/export/:entity", get(export_entities))
        .route("/ai/generate", post(generate_text))
        .route("/ai/vitamin-overview", post(generate_vitamin_overview))
        .route("/upload", post(upload_file))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// # Returns
/// * `Json<HealthRes>` - Always `ok: true` while the process serves requests
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Nutri console API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "The signed-in user", body = serde_json::Value),
        (status = 502, description = "Identity lookup failed", body = ErrorRes)
    )
)]
/// The user operating the console.
///
/// In document mode the console user is created with the default role on first call.
#[axum::debug_handler]
async fn me(State(state): State<AppState>) -> ApiResult<Json<User>> {
    Ok(Json(state.identity.me().await?))
}

#[utoipa::path(
    get,
    path = "/effects-cases",
    tag = "effects-cases",
    responses(
        (status = 200, description = "Locally kept cases, newest first", body = [serde_json::Value])
    )
)]
#[axum::debug_handler]
async fn list_effects_cases(State(state): State<AppState>) -> ApiResult<Json<Vec<EffectsCase>>> {
    Ok(Json(effects_cases(&state.local).await?))
}

#[utoipa::path(
    post,
    path = "/effects-cases",
    tag = "effects-cases",
    request_body = serde_json::Value,
    responses(
        (status = 201, description = "Case created", body = serde_json::Value),
        (status = 400, description = "Phenomenon name missing", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn create_effects_case(
    State(state): State<AppState>,
    Json(case): Json<EffectsCase>,
) -> ApiResult<(StatusCode, Json<EffectsCase>)> {
    let saved = save_record(&state.local, None, case).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[utoipa::path(
    put,
    path = "/effects-cases/{id}",
    tag = "effects-cases",
    params(("id" = String, Path, description = "Case id")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Case updated", body = serde_json::Value),
        (status = 404, description = "No such case", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn update_effects_case(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(changes): Json<serde_json::Value>,
) -> ApiResult<Json<EffectsCase>> {
    let stored = EntityClient::<EffectsCase, _>::new(&state.local).get(&id).await?;
    let case = overlay(&stored, changes)?;
    Ok(Json(save_record(&state.local, Some(&id), case).await?))
}

#[utoipa::path(
    delete,
    path = "/effects-cases/{id}",
    tag = "effects-cases",
    params(("id" = String, Path, description = "Case id")),
    responses(
        (status = 204, description = "Case deleted"),
        (status = 404, description = "No such case", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn delete_effects_case(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<StatusCode> {
    delete_record::<EffectsCase, _>(&state.local, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    responses(
        (status = 200, description = "All users, newest first", body = [serde_json::Value])
    )
)]
#[axum::debug_handler]
async fn users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(list_users(state.store()).await?))
}

#[utoipa::path(
    put,
    path = "/users/{id}/role",
    tag = "users",
    params(("id" = String, Path, description = "User id")),
    request_body = RoleReq,
    responses(
        (status = 200, description = "Role updated", body = serde_json::Value),
        (status = 400, description = "Blank role", body = ErrorRes)
    )
)]
/// Change a user's role.
///
/// # Errors
/// Returns `400 Bad Request` for a blank role and `404 Not Found` for an unknown user.
#[axum::debug_handler]
async fn update_user_role(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<RoleReq>,
) -> ApiResult<Json<User>> {
    Ok(Json(set_role(state.store(), &id, &req.role).await?))
}

#[utoipa::path(
    get,
    path = "/search",
    params(("q" = String, Query, description = "Search term, at least two characters")),
    responses(
        (status = 200, description = "Matches grouped by collection", body = serde_json::Value)
    )
)]
#[axum::debug_handler]
async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResults>> {
    Ok(Json(global_search(state.store(), &query.q).await?))
}

#[utoipa::path(
    post,
    path = "/lab-fields/merge",
    request_body = LabMergeReq,
    responses(
        (status = 200, description = "Consolidated lab text", body = LabMergeRes)
    )
)]
/// Preview the consolidated lab-deficiency text without saving anything.
#[axum::debug_handler]
async fn merge_lab_fields_preview(Json(req): Json<LabMergeReq>) -> Json<LabMergeRes> {
    let merged = merge_lab_fields(LabFields {
        lab_test_deficiency: &req.lab_test_deficiency,
        description: &req.lab_test_deficiency_description,
        details: &req.lab_test_deficiency_details,
    });
    Json(LabMergeRes { merged })
}

#[utoipa::path(
    get,
    path = "/choices/{kind}",
    params(("kind" = String, Path, description = "`solubility` or `source`")),
    responses(
        (status = 200, description = "Merged option list", body = ChoicesRes),
        (status = 400, description = "Unknown option list", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn choice_options(
    State(state): State<AppState>,
    AxumPath(kind): AxumPath<String>,
) -> ApiResult<Json<ChoicesRes>> {
    let kind: ChoiceKind = kind.parse()?;
    let vitamins = state.catalog.vitamins().await?;
    let options = state.choices.options(kind, &vitamins)?;
    Ok(Json(ChoicesRes {
        value: None,
        options,
    }))
}

#[utoipa::path(
    post,
    path = "/choices/{kind}",
    params(("kind" = String, Path, description = "`solubility` or `source`")),
    request_body = ChoiceReq,
    responses(
        (status = 200, description = "Value registered", body = ChoicesRes),
        (status = 400, description = "Unknown list or blank value", body = ErrorRes)
    )
)]
/// Add a value to an option list's history.
///
/// # Returns
/// The stored spelling (an existing case-insensitive match wins) and the refreshed list.
#[axum::debug_handler]
async fn register_choice(
    State(state): State<AppState>,
    AxumPath(kind): AxumPath<String>,
    Json(req): Json<ChoiceReq>,
) -> ApiResult<Json<ChoicesRes>> {
    let kind: ChoiceKind = kind.parse()?;
    let value = state.choices.register(kind, &req.value)?;
    let vitamins = state.catalog.vitamins().await?;
    let options = state.choices.options(kind, &vitamins)?;
    Ok(Json(ChoicesRes {
        value: Some(value),
        options,
    }))
}

#[utoipa::path(
    post,
    path = "/import/{entity}",
    params(("entity" = String, Path, description = "vitamins, foods, symptoms, diseases, articles or effects-cases")),
    request_body = ImportReq,
    responses(
        (status = 200, description = "Import finished", body = ImportRes),
        (status = 400, description = "Unsupported or malformed file", body = ErrorRes)
    )
)]
/// Import rows from an uploaded CSV or JSON file.
///
/// # Errors
/// Returns `400 Bad Request` if:
/// - the entity kind is unknown,
/// - the file is neither `.csv` nor `.json`, or
/// - the file cannot be parsed.
#[axum::debug_handler]
async fn import_entities(
    State(state): State<AppState>,
    AxumPath(entity): AxumPath<String>,
    Json(req): Json<ImportReq>,
) -> ApiResult<Json<ImportRes>> {
    let kind: TransferKind = entity.parse()?;
    let rows = parse_import(&req.file_name, &req.content)?;
    let summary = if kind.is_local() {
        import_rows(&state.local, kind, &rows).await?
    } else {
        import_rows(state.store(), kind, &rows).await?
    };
    Ok(Json(ImportRes {
        added: summary.added,
        skipped: summary.skipped,
    }))
}

#[utoipa::path(
    get,
    path = "/export/{entity}",
    params(
        ("entity" = String, Path, description = "vitamins, foods, symptoms, diseases, articles or effects-cases"),
        ("format" = Option<String>, Query, description = "`csv` (default) or `json`")
    ),
    responses(
        (status = 200, description = "File download"),
        (status = 400, description = "Unknown entity or format", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn export_entities(
    State(state): State<AppState>,
    AxumPath(entity): AxumPath<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let kind: TransferKind = entity.parse()?;
    let format: ExportFormat = query.format.as_deref().unwrap_or("csv").parse()?;
    let body = if kind.is_local() {
        export(&state.local, kind, format).await?
    } else {
        export(state.store(), kind, format).await?
    };
    let file_name = export_file_name(kind, format, chrono::Utc::now().timestamp_millis());
    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, body).into_response())
}

#[utoipa::path(
    post,
    path = "/symptoms/{id}/ai-tags",
    tag = "symptoms",
    params(("id" = String, Path, description = "Symptom id")),
    responses(
        (status = 200, description = "Symptom with generated tags", body = serde_json::Value),
        (status = 502, description = "Generator unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn generate_symptom_tags(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<DeficiencySymptom>> {
    Ok(Json(
        state
            .catalog
            .generate_symptom_tags(&state.generator, &id)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/symptoms/repair-food-links",
    tag = "symptoms",
    responses(
        (status = 200, description = "Foods whose symptom lists were rewritten", body = RepairRes)
    )
)]
/// Backfill `Food.deficiencySymptoms` from every symptom's `foodIds`.
#[axum::debug_handler]
async fn repair_symptom_food_links(State(state): State<AppState>) -> ApiResult<Json<RepairRes>> {
    let report = state.catalog.repair_symptom_food_links().await?;
    Ok(Json(RepairRes {
        updated: report.updated.into_iter().map(|id| id.to_string()).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/ai/generate",
    request_body = GenerateReq,
    responses(
        (status = 200, description = "Generated text", body = GenerateRes),
        (status = 502, description = "Generator unavailable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn generate_text(
    State(state): State<AppState>,
    Json(req): Json<GenerateReq>,
) -> ApiResult<Json<GenerateRes>> {
    let request = GenerateRequest {
        prompt: req.prompt,
        add_context_from_internet: req.add_context_from_internet,
    };
    let text = state.generator.generate(&request).await?;
    Ok(Json(GenerateRes { text }))
}

#[utoipa::path(
    post,
    path = "/ai/vitamin-overview",
    request_body = OverviewReq,
    responses(
        (status = 200, description = "Hebrew overview of the vitamin", body = GenerateRes),
        (status = 400, description = "Hebrew name missing", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn generate_vitamin_overview(
    State(state): State<AppState>,
    Json(req): Json<OverviewReq>,
) -> ApiResult<Json<GenerateRes>> {
    let text = vitamin_overview(&state.generator, &req.name_he, &req.name_en).await?;
    Ok(Json(GenerateRes { text }))
}

#[utoipa::path(
    post,
    path = "/upload",
    params(("fileName" = String, Query, description = "Original file name")),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Stored file URL", body = UploadRes),
        (status = 502, description = "Upload rejected", body = ErrorRes)
    )
)]
/// Store an uploaded file (e.g. a food image) and return its URL.
#[axum::debug_handler]
async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: axum::body::Bytes,
) -> ApiResult<Json<UploadRes>> {
    let file_url = state.uploader.upload(&query.file_name, body.to_vec()).await?;
    Ok(Json(UploadRes { file_url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use nutri_core::store::document::DocumentStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> AppState {
        let store = DocumentStore::in_memory();
        let identity = Identity::Document {
            store: store.clone(),
            user_id: "local-admin".into(),
            default_role: "admin".into(),
        };
        AppState::new(
            Backend::Document(store),
            Arc::new(LocalKv::in_memory()),
            TextGenerator::Unconfigured,
            Uploader::Local {
                dir: std::env::temp_dir().join("nutri-api-uploads"),
            },
            identity,
        )
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_alive() {
        let app = router(state());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn food_crud_and_validation() {
        let app = router(state());
        let (status, created) = call(&app, "POST", "/foods", Some(json!({ "foodNameHe": " תרד " }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["foodNameHe"], "תרד");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, "POST", "/foods", Some(json!({ "foodNameHe": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid input: foodNameHe is required");

        let (status, _) = call(&app, "DELETE", &format!("/foods/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, "GET", &format!("/foods/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn vitamin_save_links_symptoms() {
        let app = router(state());
        let (_, symptom) = call(&app, "POST", "/symptoms", Some(json!({ "symptomNameHe": "עייפות" }))).await;
        let symptom_id = symptom["id"].as_str().unwrap().to_string();

        let (status, vitamin) = call(
            &app,
            "POST",
            "/vitamins",
            Some(json!({
                "vitaminNameHe": "ברזל",
                "deficiencySymptoms": [symptom_id],
                "labTestDeficiency": "פריטין",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(vitamin.get("labTestDeficiency").is_none());
        assert_eq!(vitamin["labTestDeficiencyDetails"], "פריטין");

        let (_, symptom) = call(&app, "GET", &format!("/symptoms/{symptom_id}"), None).await;
        assert_eq!(symptom["vitaminIds"], json!([vitamin["id"]]));

        let vitamin_id = vitamin["id"].as_str().unwrap().to_string();
        let (status, renamed) = call(
            &app,
            "PUT",
            &format!("/vitamins/{vitamin_id}"),
            Some(json!({ "vitaminNameHe": "ברזל דו ערכי" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["vitaminNameHe"], "ברזל דו ערכי");
        assert_eq!(renamed["labTestDeficiencyDetails"], "פריטין");
        assert_eq!(renamed["deficiencySymptoms"], json!([symptom_id]));
        let (_, symptom) = call(&app, "GET", &format!("/symptoms/{symptom_id}"), None).await;
        assert_eq!(symptom["vitaminIds"], json!([vitamin_id]));

        let (status, _) = call(&app, "PUT", &format!("/vitamins/{vitamin_id}"), Some(json!([1]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_and_lab_merge() {
        let app = router(state());
        call(&app, "POST", "/articles", Some(json!({ "titleHe": "שינה", "summary": "Sleep hygiene" }))).await;

        let (_, results) = call(&app, "GET", "/search?q=s", None).await;
        assert_eq!(results["articles"], json!([]));
        let (_, results) = call(&app, "GET", "/search?q=SLEEP", None).await;
        assert_eq!(results["articles"][0]["label"], "שינה");

        let (status, merged) = call(
            &app,
            "POST",
            "/lab-fields/merge",
            Some(json!({ "labTestDeficiencyDetails": "<p>a</p>", "labTestDeficiency": "b" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merged["merged"], "<p>a</p><br><br>b");
    }

    #[tokio::test]
    async fn choices_start_from_defaults() {
        let app = router(state());
        let (status, body) = call(&app, "GET", "/choices/solubility", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["options"], json!(["מים", "שמן"]));

        let (status, body) = call(&app, "POST", "/choices/source", Some(json!({ "value": "תוסף" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "תוסף");
        assert!(body["options"].as_array().unwrap().contains(&json!("תוסף")));

        let (status, _) = call(&app, "GET", "/choices/colour", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn import_then_export_effects_cases() {
        let app = router(state());
        let (status, summary) = call(
            &app,
            "POST",
            "/import/effects-cases",
            Some(json!({
                "fileName": "cases.csv",
                "content": "phenomenonName,foodIds\nכאב ראש,f1|f2\nכאב ראש,\n",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary, json!({ "added": 1, "skipped": 1 }));

        let request = Request::builder()
            .uri("/export/effects-cases?format=csv")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"effects_cases_"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("\"f1|f2\""));

        let (status, _) = call(
            &app,
            "POST",
            "/import/foods",
            Some(json!({ "fileName": "foods.xlsx", "content": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn me_and_role_management() {
        let app = router(state());
        let (status, me) = call(&app, "GET", "/me", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["role"], "admin");

        let (status, user) = call(&app, "PUT", "/users/local-admin/role", Some(json!({ "role": "user" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["role"], "user");

        let (status, _) = call(&app, "PUT", "/users/local-admin/role", Some(json!({ "role": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, users) = call(&app, "GET", "/users", None).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_returns_file_url() {
        let app = router(state());
        let request = Request::builder()
            .method("POST")
            .uri("/upload?fileName=my%20photo.png")
            .body(Body::from(vec![1u8, 2, 3]))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let url = body["file_url"].as_str().unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("_my_photo.png"));
    }

    #[tokio::test]
    async fn unconfigured_generator_is_a_gateway_error() {
        let app = router(state());
        let (status, body) = call(&app, "POST", "/ai/generate", Some(json!({ "prompt": "hi" }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["message"].as_str().unwrap().contains("NUTRI_AI_ENDPOINT_URL"));
    }
}
