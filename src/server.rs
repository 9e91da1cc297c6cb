//! HTTP endpoints for profiles, elements, engagement, and analytics.

use anyhow::Result;
use axum::{
    extract::{Path, Query as AxumQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use uuid::Uuid;

use crate::{
    engagement::{self, BadgePolicy, DayCount, ReferrerCount, Stats},
    model::{BadgeKind, Element, ElementContent, Profile},
    storage::{NewElement, NewProfile, ProfilePatch, Store, StoreError},
};

/// Days covered by the analytics series when the client does not ask.
const DEFAULT_SERIES_DAYS: u32 = 7;
/// Upper bound on the requested series length.
const MAX_SERIES_DAYS: u32 = 90;

#[derive(Clone)]
struct HttpState {
    store: Store,
    policy: BadgePolicy,
    top_referrers: usize,
    verbose: bool,
}

impl HttpState {
    fn log(&self, line: impl AsRef<str>) {
        if self.verbose {
            println!("[http] {}", line.as_ref());
        }
    }

    /// Resolve the bearer token, if any, to an identity.
    fn identity(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        self.store.resolve_session(token)
    }

    /// Like [`identity`](Self::identity) but required.
    fn require_identity(&self, headers: &HeaderMap) -> Result<String, StoreError> {
        self.identity(headers).ok_or(StoreError::Unauthorized)
    }

    /// Best-effort badge evaluation after a state-changing action. A
    /// failure here never rolls back or fails the action that triggered it.
    fn evaluate_badges(&self, profile: &Profile) {
        if let Err(e) = engagement::evaluate_and_award(&self.store, profile, &self.policy) {
            self.log(format!("badge evaluation failed for {}: {e}", profile.handle));
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Conflict => StatusCode::CONFLICT,
            StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Transient(_) | StoreError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Start the HTTP server.
pub async fn serve_http(
    addr: SocketAddr,
    store: Store,
    policy: BadgePolicy,
    top_referrers: usize,
    verbose: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let state = Arc::new(HttpState {
        store,
        policy,
        top_referrers,
        verbose,
    });
    let app = router(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/healthz", get(healthz))
        .route("/profiles", post(create_profile))
        .route("/profiles/me", get(my_profile))
        .route("/profiles/:id", patch(update_profile).delete(delete_profile))
        .route("/profiles/:id/elements", post(add_element))
        .route(
            "/profiles/:id/elements/:eid/position",
            patch(update_position),
        )
        .route("/profiles/:id/elements/:eid/content", patch(update_content))
        .route("/profiles/:id/elements/:eid", delete(remove_element))
        .route("/p/:handle", get(profile_page))
        .route("/p/:handle/views", post(record_view))
        .route("/p/:handle/likes", post(like))
        .route("/p/:handle/likes/:visitor", delete(unlike))
        .route("/p/:handle/analytics", get(analytics))
        .route("/explore", get(explore))
        .with_state(state)
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

async fn healthz(State(state): State<Arc<HttpState>>) -> Json<Health> {
    state.log("GET /healthz");
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Service information document.
#[derive(Serialize, Deserialize)]
struct ServiceInfo {
    name: String,
    software: String,
    version: String,
}

async fn service_info(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    state.log("GET /");
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(ServiceInfo {
            name: "ridged".into(),
            software: "ridged".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }),
    )
}

/// Profile as shown to visitors; the owning identity stays private.
#[derive(Serialize, Deserialize)]
struct PublicProfile {
    id: Uuid,
    handle: String,
    display_name: Option<String>,
    bio: Option<String>,
    avatar_url: Option<String>,
    background_url: Option<String>,
    theme_color: String,
    is_public: bool,
    show_badges: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Profile> for PublicProfile {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id,
            handle: p.handle.clone(),
            display_name: p.display_name.clone(),
            bio: p.bio.clone(),
            avatar_url: p.avatar_url.clone(),
            background_url: p.background_url.clone(),
            theme_color: p.theme_color.clone(),
            is_public: p.is_public,
            show_badges: p.show_badges,
            created_at: p.created_at,
        }
    }
}

async fn create_profile(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(new): Json<NewProfile>,
) -> Result<impl IntoResponse, StoreError> {
    let identity = state.require_identity(&headers)?;
    let profile = state.store.create_profile(&identity, new)?;
    state.log(format!("POST /profiles -> {}", profile.handle));
    state.evaluate_badges(&profile);
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn my_profile(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Result<Json<Profile>, StoreError> {
    let identity = state.require_identity(&headers)?;
    let profile = state.store.profile_by_owner(&identity)?;
    state.log(format!("GET /profiles/me -> {}", profile.handle));
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, StoreError> {
    let identity = state.require_identity(&headers)?;
    let profile = state.store.update_profile(id, &identity, patch)?;
    state.log(format!("PATCH /profiles/{id}"));
    Ok(Json(profile))
}

async fn delete_profile(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StoreError> {
    let identity = state.require_identity(&headers)?;
    state.store.delete_profile(id, &identity)?;
    state.log(format!("DELETE /profiles/{id}"));
    Ok(StatusCode::NO_CONTENT)
}

async fn add_element(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(new): Json<NewElement>,
) -> Result<impl IntoResponse, StoreError> {
    let identity = state.require_identity(&headers)?;
    let element = state.store.add_element(id, &identity, new)?;
    state.log(format!("POST /profiles/{id}/elements -> z={}", element.z_index));
    if let Ok(profile) = state.store.profile_by_id(id) {
        state.evaluate_badges(&profile);
    }
    Ok((StatusCode::CREATED, Json(element)))
}

/// Drag-release position commit.
#[derive(Deserialize)]
struct PositionCommit {
    x: f64,
    y: f64,
    /// Monotonic per-element counter; stale commits get 409.
    revision: u64,
}

async fn update_position(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((id, eid)): Path<(Uuid, Uuid)>,
    Json(commit): Json<PositionCommit>,
) -> Result<Json<Element>, StoreError> {
    let identity = state.require_identity(&headers)?;
    let element = state
        .store
        .update_position(id, eid, &identity, commit.x, commit.y, commit.revision)?;
    state.log(format!("PATCH /profiles/{id}/elements/{eid}/position"));
    Ok(Json(element))
}

async fn update_content(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((id, eid)): Path<(Uuid, Uuid)>,
    Json(content): Json<ElementContent>,
) -> Result<Json<Element>, StoreError> {
    let identity = state.require_identity(&headers)?;
    let element = state.store.update_content(id, eid, &identity, content)?;
    state.log(format!("PATCH /profiles/{id}/elements/{eid}/content"));
    Ok(Json(element))
}

async fn remove_element(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((id, eid)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StoreError> {
    let identity = state.require_identity(&headers)?;
    state.store.remove_element(id, eid, &identity)?;
    state.log(format!("DELETE /profiles/{id}/elements/{eid}"));
    Ok(StatusCode::NO_CONTENT)
}

/// Everything a visitor-facing page needs in one load.
#[derive(Serialize, Deserialize)]
struct PagePayload {
    profile: PublicProfile,
    elements: Vec<Element>,
    view_count: u64,
    like_count: u64,
    /// Whether the requesting visitor currently likes this profile.
    liked: bool,
    /// Absent when the owner disabled badge display.
    #[serde(skip_serializing_if = "Option::is_none")]
    badges: Option<Vec<BadgeKind>>,
}

#[derive(Deserialize)]
struct PageParams {
    /// Visitor token, when the client wants its like state back.
    #[serde(default)]
    visitor: Option<String>,
}

async fn profile_page(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    AxumQuery(params): AxumQuery<PageParams>,
) -> Result<Json<PagePayload>, StoreError> {
    let caller = state.identity(&headers);
    let profile = state.store.profile_by_handle(&handle, caller.as_deref())?;
    state.evaluate_badges(&profile);
    let elements = state.store.list_elements(profile.id)?;
    let view_count = state.store.views(profile.id)?.len() as u64;
    let like_count = state.store.like_count(profile.id)?;
    let liked = params
        .visitor
        .map(|v| state.store.has_liked(profile.id, &v))
        .unwrap_or(false);
    let badges = if profile.show_badges {
        Some(engagement::display_badges(&state.store, &profile, &state.policy)?)
    } else {
        None
    };
    state.log(format!("GET /p/{handle} -> {} elements", elements.len()));
    Ok(Json(PagePayload {
        profile: PublicProfile::from(&profile),
        elements,
        view_count,
        like_count,
        liked,
        badges,
    }))
}

#[derive(Deserialize)]
struct ViewBody {
    visitor_id: String,
    #[serde(default)]
    referrer: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ViewReceipt {
    recorded: bool,
    view_count: u64,
}

async fn record_view(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(body): Json<ViewBody>,
) -> Result<Json<ViewReceipt>, StoreError> {
    let caller = state.identity(&headers);
    let profile = state.store.profile_by_handle(&handle, caller.as_deref())?;
    let recorded =
        state
            .store
            .record_view(profile.id, &body.visitor_id, body.referrer, caller.as_deref())?;
    state.log(format!("POST /p/{handle}/views recorded={recorded}"));
    Ok(Json(ViewReceipt {
        recorded,
        view_count: state.store.views(profile.id)?.len() as u64,
    }))
}

#[derive(Deserialize)]
struct LikeBody {
    visitor_id: String,
}

#[derive(Serialize, Deserialize)]
struct LikeReceipt {
    liked: bool,
    like_count: u64,
}

async fn like(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(body): Json<LikeBody>,
) -> Result<Json<LikeReceipt>, StoreError> {
    let caller = state.identity(&headers);
    let profile = state.store.profile_by_handle(&handle, caller.as_deref())?;
    state.store.like(profile.id, &body.visitor_id)?;
    state.evaluate_badges(&profile);
    let like_count = state.store.like_count(profile.id)?;
    state.log(format!("POST /p/{handle}/likes -> {like_count}"));
    Ok(Json(LikeReceipt {
        liked: true,
        like_count,
    }))
}

async fn unlike(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((handle, visitor)): Path<(String, String)>,
) -> Result<Json<LikeReceipt>, StoreError> {
    let caller = state.identity(&headers);
    let profile = state.store.profile_by_handle(&handle, caller.as_deref())?;
    state.store.unlike(profile.id, &visitor)?;
    let like_count = state.store.like_count(profile.id)?;
    state.log(format!("DELETE /p/{handle}/likes -> {like_count}"));
    Ok(Json(LikeReceipt {
        liked: false,
        like_count,
    }))
}

#[derive(Deserialize)]
struct AnalyticsParams {
    /// Viewer timezone as minutes east of UTC; day buckets follow it.
    #[serde(default)]
    tz_offset: Option<i32>,
    #[serde(default)]
    days: Option<u32>,
}

/// Owner-facing analytics payload.
#[derive(Serialize, Deserialize)]
struct Analytics {
    #[serde(flatten)]
    stats: Stats,
    views_by_day: Vec<DayCount>,
    top_referrers: Vec<ReferrerCount>,
}

async fn analytics(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    AxumQuery(params): AxumQuery<AnalyticsParams>,
) -> Result<Json<Analytics>, StoreError> {
    let identity = state.require_identity(&headers)?;
    let profile = state.store.profile_by_handle(&handle, Some(&identity))?;
    if profile.user_id != identity {
        return Err(StoreError::Unauthorized);
    }
    let tz_offset = params.tz_offset.unwrap_or(0);
    let days = params.days.unwrap_or(DEFAULT_SERIES_DAYS).clamp(1, MAX_SERIES_DAYS);
    let views = state.store.views(profile.id)?;
    let today = engagement::local_today(tz_offset);
    let payload = Analytics {
        stats: engagement::stats(&state.store, profile.id, tz_offset)?,
        views_by_day: engagement::views_by_day(&views, today, days, tz_offset),
        top_referrers: engagement::top_referrers(&views, state.top_referrers),
    };
    state.log(format!("GET /p/{handle}/analytics ({days} days)"));
    Ok(Json(payload))
}

#[derive(Deserialize)]
struct ExploreParams {
    #[serde(default)]
    q: Option<String>,
}

async fn explore(
    State(state): State<Arc<HttpState>>,
    AxumQuery(params): AxumQuery<ExploreParams>,
) -> Result<Json<Vec<PublicProfile>>, StoreError> {
    let profiles = state.store.public_profiles(params.q.as_deref())?;
    state.log(format!("GET /explore -> {} profiles", profiles.len()));
    Ok(Json(
        profiles.iter().map(PublicProfile::from).collect(),
    ))
}
