use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use censo_agro_api::{
    parse_kind, ApiError, ByStateResult, CategoryTableResult, CensoAgroApi, ChartData,
    CompareResult, MunicipalitySearchResult, Overview, ResellerWithCount, SummaryResult,
    TerritoryResult, API_CONTRACT_VERSION,
};
use censo_agro_core::{CensoError, StateInfo};
use censo_agro_store_sqlite::{NewReseller, Reseller, ResellerUpdate};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Clone)]
struct ServiceState {
    api: Arc<CensoAgroApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteResponse {
    deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct StateQuery {
    state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartQuery {
    n: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompareQuery {
    a: String,
    b: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "censo-agro-service")]
#[command(about = "Local HTTP service for Brazilian agricultural census analytics")]
struct Args {
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    #[arg(long, default_value = "./censo_agro.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4017")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Map facade errors onto HTTP statuses: the two core kinds stay distinct
/// (404 vs 422), boundary validation is 400, duplicate CNPJ 409.
fn service_error(err: &ApiError) -> ServiceError {
    let status = match err {
        ApiError::Core(CensoError::CategoryNotFound(_)) | ApiError::ResellerNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ApiError::Core(CensoError::EmptyDataset) => StatusCode::UNPROCESSABLE_ENTITY,
        ApiError::UnknownKind(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        ApiError::DuplicateCnpj(_) => StatusCode::CONFLICT,
        ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ServiceError {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        status,
        error: err.to_string(),
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/states", get(states))
        .route("/v1/overview", get(overview))
        .route("/v1/datasets/:kind/categories", get(dataset_categories))
        .route("/v1/datasets/:kind/categories/:name", get(dataset_category_table))
        .route("/v1/datasets/:kind/categories/:name/chart", get(dataset_chart))
        .route("/v1/datasets/:kind/categories/:name/summary", get(dataset_summary))
        .route("/v1/datasets/:kind/categories/:name/by-state", get(dataset_by_state))
        .route("/v1/datasets/:kind/categories/:name/export", get(dataset_export))
        .route("/v1/datasets/:kind/compare", get(dataset_compare))
        .route("/v1/municipalities/search", get(municipality_search))
        .route("/v1/resellers", get(reseller_list).post(reseller_create))
        .route(
            "/v1/resellers/:id",
            get(reseller_show).put(reseller_update).delete(reseller_delete),
        )
        .route("/v1/resellers/:id/territory", get(reseller_territory))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();
    let api = CensoAgroApi::new(&args.data_dir, args.db);
    let state = ServiceState { api: Arc::new(api) };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "censo-agro service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn states(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<&'static [StateInfo]>> {
    Json(envelope(state.api.list_states()))
}

async fn overview(State(state): State<ServiceState>) -> Json<ServiceEnvelope<Overview>> {
    Json(envelope(state.api.overview()))
}

async fn dataset_categories(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
) -> Result<Json<ServiceEnvelope<Vec<String>>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(state.api.categories(kind))))
}

async fn dataset_category_table(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<StateQuery>,
) -> Result<Json<ServiceEnvelope<CategoryTableResult>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let result = state
        .api
        .category_table(kind, &name, query.state.as_deref())
        .map_err(|err| service_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn dataset_chart(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<ServiceEnvelope<ChartData>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let chart = state
        .api
        .chart_top(kind, &name, query.n.unwrap_or(20))
        .map_err(|err| service_error(&err))?;
    Ok(Json(envelope(chart)))
}

async fn dataset_summary(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<StateQuery>,
) -> Result<Json<ServiceEnvelope<SummaryResult>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let summary = state
        .api
        .summary(kind, &name, query.state.as_deref())
        .map_err(|err| service_error(&err))?;
    Ok(Json(envelope(summary)))
}

async fn dataset_by_state(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<StateQuery>,
) -> Result<Json<ServiceEnvelope<ByStateResult>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let result = state
        .api
        .by_state(kind, &name, query.state.as_deref())
        .map_err(|err| service_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn dataset_export(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<StateQuery>,
) -> Result<Response, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let bundle = state
        .api
        .export(kind, &name, query.state.as_deref())
        .map_err(|err| service_error(&err))?;

    let headers = [
        (header::CONTENT_TYPE.as_str(), XLSX_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION.as_str(),
            format!("attachment; filename=\"{}\"", bundle.filename),
        ),
        ("x-checksum-sha256", bundle.sha256),
    ];
    Ok((headers, bundle.bytes).into_response())
}

async fn dataset_compare(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<ServiceEnvelope<CompareResult>>, ServiceError> {
    let kind = parse_kind(&kind).map_err(|err| service_error(&err))?;
    let result =
        state.api.compare(kind, &query.a, &query.b).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn municipality_search(
    State(state): State<ServiceState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ServiceEnvelope<Vec<MunicipalitySearchResult>>>, ServiceError> {
    let results = state
        .api
        .search_municipalities(query.q.as_deref().unwrap_or(""))
        .map_err(|err| service_error(&err))?;
    Ok(Json(envelope(results)))
}

async fn reseller_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<ResellerWithCount>>>, ServiceError> {
    let resellers = state.api.list_resellers().map_err(|err| service_error(&err))?;
    Ok(Json(envelope(resellers)))
}

async fn reseller_create(
    State(state): State<ServiceState>,
    Json(request): Json<NewReseller>,
) -> Result<(StatusCode, Json<ServiceEnvelope<Reseller>>), ServiceError> {
    let reseller = state.api.create_reseller(request).map_err(|err| service_error(&err))?;
    Ok((StatusCode::CREATED, Json(envelope(reseller))))
}

async fn reseller_show(
    State(state): State<ServiceState>,
    Path(id): Path<i64>,
) -> Result<Json<ServiceEnvelope<Reseller>>, ServiceError> {
    let reseller = state.api.get_reseller(id).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(reseller)))
}

async fn reseller_update(
    State(state): State<ServiceState>,
    Path(id): Path<i64>,
    Json(request): Json<ResellerUpdate>,
) -> Result<Json<ServiceEnvelope<Reseller>>, ServiceError> {
    let reseller = state.api.update_reseller(id, request).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(reseller)))
}

async fn reseller_delete(
    State(state): State<ServiceState>,
    Path(id): Path<i64>,
) -> Result<Json<ServiceEnvelope<DeleteResponse>>, ServiceError> {
    state.api.delete_reseller(id).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(DeleteResponse { deleted: true })))
}

async fn reseller_territory(
    State(state): State<ServiceState>,
    Path(id): Path<i64>,
) -> Result<Json<ServiceEnvelope<TerritoryResult>>, ServiceError> {
    let territory = state.api.territory(id).map_err(|err| service_error(&err))?;
    Ok(Json(envelope(territory)))
}
