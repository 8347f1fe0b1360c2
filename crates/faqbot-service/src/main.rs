use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use faqbot_api::{
    AdminCredentials, AdminGate, ApiError, ChatRequest, ChatResponse, DashboardStats, FaqBotApi,
    SessionManager, UploadResult, DEFAULT_SESSION_TTL, MAX_UPLOAD_BYTES, SESSION_COOKIE,
};
use faqbot_store_xlsx::FaqStore;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const UPLOAD_FIELD: &str = "faq_file";

#[derive(Debug, Clone)]
struct ServiceState {
    api: FaqBotApi,
    admin: Arc<AdminGate>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service_contract_version: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Serialize)]
struct SessionResponse {
    logged_in: bool,
}

#[derive(Debug, Parser)]
#[command(name = "faqbot-service")]
#[command(about = "HTTP service for the FAQ chatbot")]
struct Args {
    #[arg(long, default_value = "./faq.xlsx")]
    faq: PathBuf,
    #[arg(long, default_value = "./uploads")]
    upload_dir: PathBuf,
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    #[arg(long, env = "ADMIN_USER", default_value = "admin")]
    admin_user: String,
    #[arg(long, env = "ADMIN_PASS", default_value = "password", hide_env_values = true)]
    admin_pass: String,
    #[arg(long, env = "SECRET_KEY", default_value = "change-me-please", hide_env_values = true)]
    secret_key: String,
    /// Admin session lifetime in seconds.
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = DEFAULT_SESSION_TTL.as_secs())]
    session_ttl_secs: u64,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Replace(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl ServiceState {
    fn new(args: &Args) -> Self {
        let store = Arc::new(FaqStore::open(&args.faq));
        let api = FaqBotApi::new(store, args.upload_dir.clone());
        let session_ttl = Duration::from_secs(args.session_ttl_secs);
        let admin = AdminGate::new(
            AdminCredentials::new(args.admin_user.clone(), args.admin_pass.clone()),
            SessionManager::with_ttl(&args.secret_key, session_ttl),
        );
        Self { api, admin: Arc::new(admin) }
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then_some(value)
        })
}

fn session_set_cookie(value: &str) -> String {
    format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax")
}

fn session_clear_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn spreadsheet_content_type(filename: &str) -> &'static str {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/chat", post(chat))
        .route("/admin/login", post(admin_login))
        .route("/admin/logout", post(admin_logout))
        .route("/admin/dashboard", get(admin_dashboard).post(admin_upload))
        .route("/uploads/:filename", get(uploaded_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    let _ = dotenv::dotenv();
    let args = Args::parse();
    init_tracing();

    std::fs::create_dir_all(&args.upload_dir).with_context(|| {
        format!("failed to create upload directory {}", args.upload_dir.display())
    })?;
    let state = ServiceState::new(&args);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, faq = %args.faq.display(), "faqbot service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", service_contract_version: SERVICE_CONTRACT_VERSION })
}

async fn chat(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ServiceError> {
    // malformed JSON is treated like an empty object
    let request: ChatRequest = serde_json::from_slice(&body).unwrap_or_default();
    let response = state.api.chat(&request)?;
    Ok(Json(response))
}

async fn admin_login(
    State(state): State<ServiceState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ServiceError> {
    let cookie = state.admin.login(&form.username, &form.password)?;
    Ok(([(SET_COOKIE, session_set_cookie(&cookie))], Json(SessionResponse { logged_in: true }))
        .into_response())
}

async fn admin_logout(State(state): State<ServiceState>, headers: HeaderMap) -> Response {
    state.admin.logout(session_cookie(&headers));
    ([(SET_COOKIE, session_clear_cookie())], Json(SessionResponse { logged_in: false }))
        .into_response()
}

async fn admin_dashboard(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<DashboardStats>, ServiceError> {
    state.admin.require_admin(session_cookie(&headers))?;
    Ok(Json(state.api.dashboard()))
}

async fn admin_upload(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, ServiceError> {
    state.admin.require_admin(session_cookie(&headers))?;

    let multipart_error = |err: axum::extract::multipart::MultipartError| {
        ServiceError::new(err.status(), err.body_text())
    };
    let mut upload: Option<(Option<String>, Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(ToString::to_string);
        let contents = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, contents));
        break;
    }

    let (filename, contents) = upload.unwrap_or_default();
    let result = state.api.upload(filename.as_deref(), &contents)?;
    tracing::info!(stored_as = %result.stored_as, rows = result.rows, "faq upload applied");
    Ok(Json(result))
}

async fn uploaded_file(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Response, ServiceError> {
    if !state.admin.is_admin(session_cookie(&headers)) {
        return Ok((StatusCode::FORBIDDEN, "Forbidden").into_response());
    }
    let path = state.api.uploaded_file(&filename)?;
    let contents = std::fs::read(&path).map_err(ApiError::from)?;
    Ok(([(CONTENT_TYPE, spreadsheet_content_type(&filename))], contents).into_response())
}
