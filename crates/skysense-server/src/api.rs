use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use skysense_shared::constants::{
    APP_NAME, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MIN_PASSWORD_LEN, PROTOCOL_VERSION,
};
use skysense_shared::protocol::SensorReading;
use skysense_shared::types::{AuthUser, ChannelKind, MessageId, Role, ThreadId, UserId, UserStatus};
use skysense_store::{
    ChatMessage, DailyAggregate, NewReading, NewUser, Page, ReadingFilter, StoredReading,
    ThreadSummary, UserFilter, UserSummary, UserUpdate,
};

use crate::auth::{hash_password, require_admin, verify_password, Authenticator};
use crate::chat::ChatRouter;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::ingest::LatestReading;
use crate::registry::SessionRegistry;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub auth: Arc<Authenticator>,
    pub sensor_sessions: SessionRegistry,
    pub chat_sessions: SessionRegistry,
    pub chat: ChatRouter,
    pub latest: LatestReading,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(gateway: Gateway, auth: Authenticator, config: ServerConfig) -> Self {
        let chat_sessions = SessionRegistry::new(ChannelKind::Chat);
        Self {
            chat: ChatRouter::new(gateway.clone(), chat_sessions.clone()),
            gateway,
            auth: Arc::new(auth),
            sensor_sessions: SessionRegistry::new(ChannelKind::Sensor),
            chat_sessions,
            latest: LatestReading::new(),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(banner))
        .route("/health", get(health_check))
        // Real-time channels
        .route("/ws/sensor", get(ws::sensor_ws))
        .route("/ws/chat", get(ws::chat_ws))
        // Sensor data
        .route("/insert", post(insert_reading))
        .route("/avgdata", get(daily_averages))
        .route("/latest", get(latest_reading))
        // Accounts
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/me", get(me))
        .route("/admin/pending-users", get(admin_pending_users))
        .route("/admin/users", get(admin_list_users).post(admin_create_user))
        .route("/admin/users/:id/status", patch(admin_set_status))
        .route(
            "/admin/users/:id",
            patch(admin_update_user).delete(admin_delete_user),
        )
        // Sensor logs
        .route("/admin/sensor-logs", get(admin_sensor_logs))
        .route("/admin/sensor-logs/export.csv", get(admin_export_logs))
        .route("/admin/sensor-logs/:id", delete(admin_delete_log))
        // Chat history
        .route("/chat/thread", get(client_thread))
        .route("/admin/chat/threads", get(admin_threads))
        .route("/chat/threads/:id/messages", get(thread_messages))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ─── Health ───

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
    sensor_sessions: usize,
    chat_sessions: usize,
    chat_users: usize,
    ingestion: bool,
}

async fn banner() -> String {
    format!("{APP_NAME} Server Running")
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        sensor_sessions: state.sensor_sessions.session_count().await,
        chat_sessions: state.chat_sessions.session_count().await,
        chat_users: state.chat_sessions.user_count().await,
        ingestion: state.config.ecowitt.is_configured(),
    })
}

// ─── Sensor data ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest {
    wind_speed: Option<f64>,
    temperature: Option<f64>,
    wind_degree: Option<f64>,
    humidity: Option<f64>,
    ldr: Option<f64>,
    rain_rate: Option<f64>,
}

async fn insert_reading(
    State(state): State<AppState>,
    Json(req): Json<InsertRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let (Some(wind_speed), Some(temperature), Some(wind_direction), Some(humidity), Some(light)) =
        (req.wind_speed, req.temperature, req.wind_degree, req.humidity, req.ldr)
    else {
        return Err(ServerError::BadRequest("All fields are required".into()));
    };

    let id = state
        .gateway
        .insert_reading(NewReading {
            wind_speed: Some(wind_speed),
            temperature: Some(temperature),
            wind_direction: Some(wind_direction),
            humidity: Some(humidity),
            light: Some(light),
            rain_rate: req.rain_rate,
        })
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Data inserted successfully",
        "id": id,
    })))
}

async fn daily_averages(
    State(state): State<AppState>,
) -> Result<Json<Vec<DailyAggregate>>, ServerError> {
    Ok(Json(state.gateway.daily_aggregates().await?))
}

async fn latest_reading(State(state): State<AppState>) -> Result<Json<SensorReading>, ServerError> {
    state
        .latest
        .get()
        .map(Json)
        .ok_or_else(|| ServerError::NotFound("No reading yet".into()))
}

// ─── Accounts ───

#[derive(Deserialize)]
struct RegisterRequest {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user: UserSummary,
}

#[derive(Serialize)]
struct UserResponse {
    message: &'static str,
    user: UserSummary,
}

/// A trimmed, non-empty string or `None`.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Passwords are taken verbatim; only an all-blank one counts as missing.
fn password_field(value: Option<String>) -> Option<String> {
    value.filter(|p| !p.trim().is_empty())
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ServerError> {
    let (Some(name), Some(email), Some(password)) =
        (non_empty(req.name), non_empty(req.email), password_field(req.password))
    else {
        return Err(ServerError::BadRequest("name, email and password are required".into()));
    };

    let user = create_account(&state, name, email, password, Role::Client, UserStatus::Pending).await?;
    info!(user = %user.id, "Client registered, awaiting approval");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "Registered. Waiting for admin approval.",
            user,
        }),
    ))
}

async fn create_account(
    state: &AppState,
    name: String,
    email: String,
    password: String,
    role: Role,
    status: UserStatus,
) -> Result<UserSummary, ServerError> {
    let password_hash = hash_password(password).await?;
    let id = state
        .gateway
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role,
            status,
        })
        .await?;

    state
        .gateway
        .get_user(id)
        .await?
        .map(|u| u.summary())
        .ok_or_else(|| ServerError::Internal(format!("user {id} vanished after insert")))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let (Some(email), Some(password)) = (non_empty(req.email), password_field(req.password))
    else {
        return Err(ServerError::BadRequest("email and password are required".into()));
    };

    let bad_credentials = || ServerError::Unauthorized("Wrong email or password".into());

    let user = state
        .gateway
        .find_user_by_email(email)
        .await?
        .ok_or_else(bad_credentials)?;

    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(bad_credentials());
    }

    if user.role == Role::Client && user.status != UserStatus::Approved {
        return Err(ServerError::Forbidden("Account not approved yet".into()));
    }

    let token = state.auth.issue(AuthUser {
        id: user.id,
        role: user.role,
    })?;
    info!(user = %user.id, role = %user.role, "User logged in");

    Ok(Json(LoginResponse {
        token,
        user: user.summary(),
    }))
}

async fn me(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = state.auth.authenticate(&headers)?;
    let user = state
        .gateway
        .get_user(caller.id)
        .await?
        .ok_or_else(|| ServerError::NotFound("User not found".into()))?;

    Ok(Json(serde_json::json!({ "user": user.summary() })))
}

/// Authenticate the bearer token and require the admin role.
fn admin(headers: &HeaderMap, state: &AppState) -> Result<AuthUser, ServerError> {
    let caller = state.auth.authenticate(headers)?;
    require_admin(&caller)?;
    Ok(caller)
}

async fn admin_pending_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    admin(&headers, &state)?;
    Ok(Json(state.gateway.pending_users().await?))
}

#[derive(Deserialize)]
struct UserListQuery {
    status: Option<String>,
    role: Option<String>,
}

async fn admin_list_users(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    admin(&headers, &state)?;

    let filter = UserFilter {
        status: non_empty(query.status)
            .map(|s| s.parse::<UserStatus>())
            .transpose()
            .map_err(|e| ServerError::BadRequest(e.to_string()))?,
        role: non_empty(query.role)
            .map(|r| r.parse::<Role>())
            .transpose()
            .map_err(|e| ServerError::BadRequest(e.to_string()))?,
    };

    Ok(Json(state.gateway.list_users(filter).await?))
}

#[derive(Deserialize)]
struct StatusRequest {
    status: Option<String>,
}

async fn admin_set_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = admin(&headers, &state)?;

    let status = non_empty(req.status)
        .ok_or_else(|| ServerError::BadRequest("status is required".into()))?
        .parse::<UserStatus>()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    if !state.gateway.set_user_status(UserId(id), status).await? {
        return Err(ServerError::NotFound("User not found".into()));
    }

    info!(admin = %caller.id, user = id, %status, "User status changed");
    Ok(Json(serde_json::json!({ "message": "Status updated", "id": id, "status": status })))
}

#[derive(Deserialize)]
struct AdminCreateUserRequest {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    role: Option<Role>,
    status: Option<UserStatus>,
}

async fn admin_create_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminCreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ServerError> {
    let caller = admin(&headers, &state)?;

    let (Some(name), Some(email), Some(password)) =
        (non_empty(req.name), non_empty(req.email), password_field(req.password))
    else {
        return Err(ServerError::BadRequest("name, email and password are required".into()));
    };

    let user = create_account(
        &state,
        name,
        email,
        password,
        req.role.unwrap_or(Role::Client),
        req.status.unwrap_or(UserStatus::Approved),
    )
    .await?;
    info!(admin = %caller.id, user = %user.id, role = %user.role, "Admin created user");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "User created",
            user,
        }),
    ))
}

#[derive(Deserialize)]
struct AdminUpdateUserRequest {
    name: Option<String>,
    email: Option<String>,
    role: Option<Role>,
    status: Option<UserStatus>,
    password: Option<String>,
}

async fn admin_update_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = admin(&headers, &state)?;
    let target = UserId(id);
    if !target.is_valid() {
        return Err(ServerError::BadRequest("Invalid id".into()));
    }

    if caller.id == target && req.role.is_some_and(|r| r != Role::Admin) {
        return Err(ServerError::BadRequest("Cannot demote your own admin account".into()));
    }

    let password = password_field(req.password);
    if password
        .as_ref()
        .is_some_and(|p| p.trim().chars().count() < MIN_PASSWORD_LEN)
    {
        return Err(ServerError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let update = UserUpdate {
        name: non_empty(req.name),
        email: non_empty(req.email),
        role: req.role,
        status: req.status,
    };

    if update.is_empty() && password.is_none() {
        return Err(ServerError::BadRequest("Nothing to update".into()));
    }

    if !update.is_empty() && !state.gateway.update_user(target, update).await? {
        return Err(ServerError::NotFound("User not found".into()));
    }

    if let Some(password) = password {
        let hash = hash_password(password).await?;
        if !state.gateway.update_user_password(target, hash).await? {
            return Err(ServerError::NotFound("User not found".into()));
        }
    }

    info!(admin = %caller.id, user = id, "Admin updated user");
    Ok(Json(serde_json::json!({ "message": "User updated", "id": id })))
}

async fn admin_delete_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = admin(&headers, &state)?;
    let target = UserId(id);
    if !target.is_valid() {
        return Err(ServerError::BadRequest("Invalid id".into()));
    }
    if caller.id == target {
        return Err(ServerError::BadRequest("Cannot delete your own account".into()));
    }

    if !state.gateway.delete_user(target).await? {
        return Err(ServerError::NotFound("User not found".into()));
    }

    info!(admin = %caller.id, user = id, "Admin deleted user");
    Ok(Json(serde_json::json!({ "message": "User deleted", "id": id })))
}

// ─── Sensor logs ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    date_from: Option<String>,
    date_to: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl LogQuery {
    fn filter(&self) -> Result<ReadingFilter, ServerError> {
        Ok(ReadingFilter {
            from: parse_bound(self.date_from.as_deref(), false)?,
            to: parse_bound(self.date_to.as_deref(), true)?,
        })
    }

    fn page(&self) -> Page {
        Page {
            limit: clamp_limit(self.limit),
            offset: self.offset.unwrap_or(0),
        }
    }
}

#[derive(Serialize)]
struct LogPage {
    total: u64,
    limit: u32,
    offset: u32,
    rows: Vec<StoredReading>,
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Parse a date filter: an RFC 3339 instant, or a bare `YYYY-MM-DD` that
/// covers the whole day (start of day for `from`, end of day for `to`).
fn parse_bound(raw: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, ServerError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ServerError::BadRequest(format!("Invalid date: {raw}")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    Ok(time.map(|t| Utc.from_utc_datetime(&day.and_time(t))))
}

async fn admin_sensor_logs(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogPage>, ServerError> {
    admin(&headers, &state)?;

    let page = query.page();
    let (rows, total) = state.gateway.list_readings(query.filter()?, page).await?;

    Ok(Json(LogPage {
        total,
        limit: page.limit,
        offset: page.offset,
        rows,
    }))
}

async fn admin_delete_log(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    admin(&headers, &state)?;
    if id <= 0 {
        return Err(ServerError::BadRequest("Invalid id".into()));
    }

    if !state.gateway.delete_reading(id).await? {
        return Err(ServerError::NotFound("Log not found".into()));
    }
    Ok(Json(serde_json::json!({ "message": "Log deleted", "id": id })))
}

async fn admin_export_logs(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ServerError> {
    admin(&headers, &state)?;

    let rows = state.gateway.export_readings(query.filter()?).await?;
    let body = readings_to_csv(&rows);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"sensor_logs.csv\"",
            ),
        ],
        body,
    ))
}

const CSV_HEADER: [&str; 8] = [
    "id",
    "wind_speed",
    "temperature",
    "wind_degree",
    "humidity",
    "ldr",
    "rain_rate",
    "timestamp",
];

fn readings_to_csv(rows: &[StoredReading]) -> String {
    let number = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.join(","));
    for r in rows {
        let fields = [
            r.id.to_string(),
            number(r.wind_speed),
            number(r.temperature),
            number(r.wind_direction),
            number(r.humidity),
            number(r.light),
            number(r.rain_rate),
            r.created_at.to_rfc3339(),
        ];
        lines.push(
            fields
                .iter()
                .map(|f| csv_field(f))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

/// Quote a field when it contains a comma, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ─── Chat history ───

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientThreadResponse {
    thread_id: ThreadId,
    admin: UserSummary,
}

async fn client_thread(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<ClientThreadResponse>, ServerError> {
    let caller = state.auth.authenticate(&headers)?;
    if caller.role != Role::Client {
        return Err(ServerError::Forbidden("Client only".into()));
    }

    let admin = state
        .gateway
        .any_admin()
        .await?
        .ok_or_else(|| ServerError::Internal("no admin account exists".into()))?;
    let thread = state
        .gateway
        .get_or_create_thread(caller.id, admin.id)
        .await?;

    Ok(Json(ClientThreadResponse {
        thread_id: thread.id,
        admin,
    }))
}

async fn admin_threads(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ThreadSummary>>, ServerError> {
    let caller = admin(&headers, &state)?;
    Ok(Json(state.gateway.list_threads_for_admin(caller.id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesQuery {
    limit: Option<u32>,
    before_id: Option<i64>,
}

async fn thread_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let caller = state.auth.authenticate(&headers)?;
    let thread = state.gateway.get_thread(ThreadId(id)).await?;

    if !thread.has_participant(caller.id) {
        return Err(ServerError::Forbidden("Not a participant of this thread".into()));
    }

    let messages = state
        .gateway
        .list_messages(
            thread.id,
            clamp_limit(query.limit),
            query.before_id.map(MessageId),
        )
        .await?;
    Ok(Json(messages))
}

/// Bind a full server on an ephemeral port over a fresh database.
#[cfg(test)]
pub(crate) async fn spawn_test_server() -> (std::net::SocketAddr, AppState, tempfile::TempDir) {
    use skysense_shared::token::generate_signing_key;

    let (gateway, dir) = crate::gateway::test_gateway();
    let auth = Authenticator::new(generate_signing_key(), chrono::Duration::hours(1));
    let state = AppState::new(gateway, auth, ServerConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, dir)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode as Http;
    use serde_json::{json, Value};

    use super::*;

    struct TestApp {
        base: String,
        state: AppState,
        http: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let (addr, state, dir) = spawn_test_server().await;
            Self {
                base: format!("http://{addr}"),
                state,
                http: reqwest::Client::new(),
                _dir: dir,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn seed_user(&self, email: &str, password: &str, role: Role, status: UserStatus) -> AuthUser {
            let user = create_account(
                &self.state,
                email.to_string(),
                email.to_string(),
                password.to_string(),
                role,
                status,
            )
            .await
            .unwrap();
            AuthUser { id: user.id, role }
        }

        async fn admin_token(&self) -> (AuthUser, String) {
            let admin = self
                .seed_user("root@x.io", "hunter22", Role::Admin, UserStatus::Approved)
                .await;
            (admin, self.state.auth.issue(admin).unwrap())
        }
    }

    #[tokio::test]
    async fn test_banner_and_health() {
        let app = TestApp::new().await;

        let banner = app.http.get(app.url("/")).send().await.unwrap().text().await.unwrap();
        assert_eq!(banner, "SkySense Server Running");

        let health: Value = app.http.get(app.url("/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["chatSessions"], 0);
        assert_eq!(health["ingestion"], false);
    }

    #[tokio::test]
    async fn test_insert_requires_all_fields() {
        let app = TestApp::new().await;

        let missing = app
            .http
            .post(app.url("/insert"))
            .json(&json!({"windSpeed": 1.0, "temperature": 20.0, "windDegree": 90.0, "humidity": 50.0}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), Http::BAD_REQUEST);

        let ok = app
            .http
            .post(app.url("/insert"))
            .json(&json!({"windSpeed": 1.0, "temperature": 20.0, "windDegree": 90.0, "humidity": 50.0, "ldr": 300.0}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), Http::OK);

        let days: Vec<Value> = app.http.get(app.url("/avgdata")).send().await.unwrap().json().await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0]["avg_temperature"], 20.0);
    }

    #[tokio::test]
    async fn test_latest_is_404_until_ingested() {
        let app = TestApp::new().await;
        let resp = app.http.get(app.url("/latest")).send().await.unwrap();
        assert_eq!(resp.status(), Http::NOT_FOUND);

        app.state.latest.replace(SensorReading {
            temperature: Some(18.5),
            humidity: None,
            wind_speed: None,
            wind_direction: None,
            rain_rate: None,
            light: None,
            timestamp: 7,
        });
        let latest: Value = app.http.get(app.url("/latest")).send().await.unwrap().json().await.unwrap();
        assert_eq!(latest["temperature"], 18.5);
        assert_eq!(latest["timestamp"], 7);
    }

    #[tokio::test]
    async fn test_register_login_and_approval_flow() {
        let app = TestApp::new().await;
        let (_admin, admin_token) = app.admin_token().await;

        let body = json!({"name": "Ana", "email": "ana@x.io", "password": "pw1234"});
        let created = app.http.post(app.url("/auth/register")).json(&body).send().await.unwrap();
        assert_eq!(created.status(), Http::CREATED);
        let created: Value = created.json().await.unwrap();
        assert_eq!(created["user"]["status"], "pending");
        assert!(created["user"].get("password_hash").is_none());

        let dup = app.http.post(app.url("/auth/register")).json(&body).send().await.unwrap();
        assert_eq!(dup.status(), Http::CONFLICT);

        let login = json!({"email": "ana@x.io", "password": "pw1234"});
        let pending = app.http.post(app.url("/auth/login")).json(&login).send().await.unwrap();
        assert_eq!(pending.status(), Http::FORBIDDEN);

        let wrong = app
            .http
            .post(app.url("/auth/login"))
            .json(&json!({"email": "ana@x.io", "password": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), Http::UNAUTHORIZED);

        let queue: Vec<Value> = app
            .http
            .get(app.url("/admin/pending-users"))
            .bearer_auth(&admin_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        let id = queue[0]["id"].as_i64().unwrap();

        let approved = app
            .http
            .patch(app.url(&format!("/admin/users/{id}/status")))
            .bearer_auth(&admin_token)
            .json(&json!({"status": "approved"}))
            .send()
            .await
            .unwrap();
        assert_eq!(approved.status(), Http::OK);

        let session: Value = app
            .http
            .post(app.url("/auth/login"))
            .json(&login)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = session["token"].as_str().unwrap();

        let me: Value = app
            .http
            .get(app.url("/me"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(me["user"]["email"], "ana@x.io");

        let forbidden = app
            .http
            .get(app.url("/admin/users"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(forbidden.status(), Http::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_guards_on_self() {
        let app = TestApp::new().await;
        let (admin, token) = app.admin_token().await;

        let demote = app
            .http
            .patch(app.url(&format!("/admin/users/{}", admin.id)))
            .bearer_auth(&token)
            .json(&json!({"role": "client"}))
            .send()
            .await
            .unwrap();
        assert_eq!(demote.status(), Http::BAD_REQUEST);

        let delete = app
            .http
            .delete(app.url(&format!("/admin/users/{}", admin.id)))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(delete.status(), Http::BAD_REQUEST);

        let unauthenticated = app.http.get(app.url("/admin/users")).send().await.unwrap();
        assert_eq!(unauthenticated.status(), Http::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_user_crud() {
        let app = TestApp::new().await;
        let (_admin, token) = app.admin_token().await;

        let created: Value = app
            .http
            .post(app.url("/admin/users"))
            .bearer_auth(&token)
            .json(&json!({"name": "Budi", "email": "budi@x.io", "password": "pw1234"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created["user"]["role"], "client");
        assert_eq!(created["user"]["status"], "approved");
        let id = created["user"]["id"].as_i64().unwrap();

        let short = app
            .http
            .patch(app.url(&format!("/admin/users/{id}")))
            .bearer_auth(&token)
            .json(&json!({"password": "abc"}))
            .send()
            .await
            .unwrap();
        assert_eq!(short.status(), Http::BAD_REQUEST);

        let renamed = app
            .http
            .patch(app.url(&format!("/admin/users/{id}")))
            .bearer_auth(&token)
            .json(&json!({"name": "Budi S", "password": "newpass"}))
            .send()
            .await
            .unwrap();
        assert_eq!(renamed.status(), Http::OK);

        let login = app
            .http
            .post(app.url("/auth/login"))
            .json(&json!({"email": "budi@x.io", "password": "newpass"}))
            .send()
            .await
            .unwrap();
        assert_eq!(login.status(), Http::OK);

        let clients: Vec<Value> = app
            .http
            .get(app.url("/admin/users?role=client"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["name"], "Budi S");

        let bad_filter = app
            .http
            .get(app.url("/admin/users?status=banned"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(bad_filter.status(), Http::BAD_REQUEST);

        let deleted = app
            .http
            .delete(app.url(&format!("/admin/users/{id}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), Http::OK);

        let again = app
            .http
            .delete(app.url(&format!("/admin/users/{id}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), Http::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sensor_logs_paging_delete_and_export() {
        let app = TestApp::new().await;
        let (_admin, token) = app.admin_token().await;
        for t in [10.0, 11.0, 12.0] {
            app.state
                .gateway
                .insert_reading(NewReading {
                    temperature: Some(t),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let page: Value = app
            .http
            .get(app.url("/admin/sensor-logs?limit=2&offset=0"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["total"], 3);
        assert_eq!(page["limit"], 2);
        assert_eq!(page["rows"].as_array().unwrap().len(), 2);
        let newest = page["rows"][0]["id"].as_i64().unwrap();

        let deleted = app
            .http
            .delete(app.url(&format!("/admin/sensor-logs/{newest}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), Http::OK);

        let csv = app
            .http
            .get(app.url("/admin/sensor-logs/export.csv"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(csv.status(), Http::OK);
        assert!(csv.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        let body = csv.text().await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(lines.len(), 3);

        let future = app
            .http
            .get(app.url("/admin/sensor-logs?dateFrom=2999-01-01"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert_eq!(future["total"], 0);
    }

    #[tokio::test]
    async fn test_chat_thread_and_history_access() {
        let app = TestApp::new().await;
        let (admin, admin_token) = app.admin_token().await;
        let ana = app
            .seed_user("ana@x.io", "pw1234", Role::Client, UserStatus::Approved)
            .await;
        let budi = app
            .seed_user("budi@x.io", "pw1234", Role::Client, UserStatus::Approved)
            .await;
        let ana_token = app.state.auth.issue(ana).unwrap();

        let thread: Value = app
            .http
            .get(app.url("/chat/thread"))
            .bearer_auth(&ana_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(thread["admin"]["id"], admin.id.0);
        let thread_id = thread["threadId"].as_i64().unwrap();

        let again: Value = app
            .http
            .get(app.url("/chat/thread"))
            .bearer_auth(&ana_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(again["threadId"], thread_id);

        let as_admin = app
            .http
            .get(app.url("/chat/thread"))
            .bearer_auth(&admin_token)
            .send()
            .await
            .unwrap();
        assert_eq!(as_admin.status(), Http::FORBIDDEN);

        app.state
            .gateway
            .insert_message(skysense_store::NewMessage {
                thread_id: ThreadId(thread_id),
                sender_id: ana.id,
                sender_role: Role::Client,
                message: "halo".to_string(),
            })
            .await
            .unwrap();

        let inbox: Vec<Value> = app
            .http
            .get(app.url("/admin/chat/threads"))
            .bearer_auth(&admin_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0]["last_message"], "halo");

        let history: Vec<Value> = app
            .http
            .get(app.url(&format!("/chat/threads/{thread_id}/messages")))
            .bearer_auth(&ana_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["message"], "halo");

        let snooping = app
            .http
            .get(app.url(&format!("/chat/threads/{thread_id}/messages")))
            .bearer_auth(app.state.auth.issue(budi).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(snooping.status(), Http::FORBIDDEN);

        let other_admin = app
            .seed_user("second@x.io", "hunter22", Role::Admin, UserStatus::Approved)
            .await;
        let foreign = app
            .http
            .get(app.url(&format!("/chat/threads/{thread_id}/messages")))
            .bearer_auth(app.state.auth.issue(other_admin).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(foreign.status(), Http::FORBIDDEN);

        let own_admin = app
            .http
            .get(app.url(&format!("/chat/threads/{thread_id}/messages")))
            .bearer_auth(&admin_token)
            .send()
            .await
            .unwrap();
        assert_eq!(own_admin.status(), Http::OK);
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");

        let row = StoredReading {
            id: 1,
            wind_speed: None,
            temperature: Some(21.5),
            wind_direction: None,
            humidity: None,
            light: None,
            rain_rate: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let csv = readings_to_csv(&[row]);
        assert_eq!(csv.lines().nth(1), Some("1,,21.5,,,,,2024-01-02T03:04:05+00:00"));
    }

    #[test]
    fn test_date_bounds() {
        let from = parse_bound(Some("2024-03-01"), false).unwrap().unwrap();
        let to = parse_bound(Some("2024-03-01"), true).unwrap().unwrap();
        assert_eq!(from.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(to > from && to.date_naive() == from.date_naive());

        assert!(parse_bound(Some("2024-03-01T10:00:00Z"), false).unwrap().is_some());
        assert!(parse_bound(None, false).unwrap().is_none());
        assert!(parse_bound(Some("yesterday"), false).is_err());
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(100_000)), MAX_PAGE_LIMIT);
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_LIMIT);
    }
}
