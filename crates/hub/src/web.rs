//! JSON + server-sent-events API for dashboards. Operator requests are
//! validated here before they reach the dispatcher.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::dispatch::{CommandDispatcher, Publisher, SwitchState};
use crate::events::EventSender;
use crate::mqtt::LinkStatus;
use crate::registry::ZoneId;
use crate::state::{ZoneState, ZoneStateStore};

// ---------------------------------------------------------------------------
// Shared handler state
// ---------------------------------------------------------------------------

pub struct AppState<P> {
    pub store: ZoneStateStore,
    pub dispatcher: CommandDispatcher<P>,
    pub events: EventSender,
    pub link: LinkStatus,
    pub stale_threshold_secs: u64,
    pub started_at: Instant,
}

impl<P: Clone> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            link: self.link.clone(),
            stale_threshold_secs: self.stale_threshold_secs,
            started_at: self.started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub stale_threshold_secs: u64,
    pub zones: Vec<ZoneStatus>,
}

#[derive(Serialize)]
pub struct ZoneStatus {
    pub zone_id: ZoneId,
    pub name: String,
    pub position: Option<[u32; 2]>,
    #[serde(flatten)]
    pub state: ZoneState,
}

#[derive(Deserialize)]
pub struct RelayRequest {
    pub state: SwitchState,
}

#[derive(Deserialize)]
pub struct DeviceConfigRequest {
    #[serde(default)]
    pub zone: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

enum ApiError {
    UnknownZone(String),
    Incomplete,
    InvalidDeviceId(String),
    Transport(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownZone(zone) => (StatusCode::NOT_FOUND, format!("unknown zone '{zone}'")),
            ApiError::Incomplete => (
                StatusCode::BAD_REQUEST,
                "configuration cancelled or incomplete".to_string(),
            ),
            ApiError::InvalidDeviceId(id) => (
                StatusCode::BAD_REQUEST,
                format!("device id '{id}' must not contain '+', '#' or '/'"),
            ),
            ApiError::Transport(e) => {
                warn!("publish failed: {e:#}");
                (StatusCode::BAD_GATEWAY, format!("publish failed: {e}"))
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router<P: Publisher>(state: AppState<P>) -> Router {
    Router::new()
        .route("/api/status", get(api_status::<P>))
        .route("/api/zones/{zone}", get(api_zone::<P>))
        .route("/api/events", get(api_events::<P>))
        .route("/api/zones/{zone}/relay", post(api_relay::<P>))
        .route("/api/devices/{device_id}/config", post(api_device_config::<P>))
        .with_state(state)
}

async fn api_status<P: Publisher>(State(app): State<AppState<P>>) -> Json<StatusResponse> {
    let mut snapshots = app.store.snapshot_all().await;
    let zones = app
        .store
        .registry()
        .iter()
        .filter_map(|info| {
            let state = snapshots.remove(info.zone_id.as_str())?;
            Some(ZoneStatus {
                zone_id: info.zone_id.clone(),
                name: info.name.clone(),
                position: info.position,
                state,
            })
        })
        .collect();

    Json(StatusResponse {
        uptime_secs: app.started_at.elapsed().as_secs(),
        mqtt_connected: app.link.is_connected(),
        stale_threshold_secs: app.stale_threshold_secs,
        zones,
    })
}

async fn api_zone<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(zone): Path<String>,
) -> Result<Json<ZoneStatus>, ApiError> {
    let info = app
        .store
        .registry()
        .get(&zone)
        .ok_or(ApiError::UnknownZone(zone.clone()))?;
    let state = app
        .store
        .snapshot(&zone)
        .await
        .ok_or(ApiError::UnknownZone(zone.clone()))?;

    Ok(Json(ZoneStatus {
        zone_id: info.zone_id.clone(),
        name: info.name.clone(),
        position: info.position,
        state,
    }))
}

async fn api_events<P: Publisher>(
    State(app): State<AppState<P>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Lagged receivers skip what they missed; the next status poll catches up.
    let stream = BroadcastStream::new(app.events.subscribe())
        .filter_map(|msg| msg.ok().and_then(|ev| Event::default().json_data(ev).ok()))
        .map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn api_relay<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(zone): Path<String>,
    Json(body): Json<RelayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let zone_id = app
        .store
        .registry()
        .resolve(&zone)
        .ok_or(ApiError::UnknownZone(zone.clone()))?;

    app.dispatcher
        .send_actuator_command(zone_id, body.state)
        .await
        .map_err(ApiError::Transport)?;

    Ok((StatusCode::ACCEPTED, Json(Accepted { status: "sent" })))
}

async fn api_device_config<P: Publisher>(
    State(app): State<AppState<P>>,
    Path(device_id): Path<String>,
    Json(body): Json<DeviceConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = device_id.trim();
    let zone = body.zone.trim();
    let device_type = body.device_type.trim();
    if device_id.is_empty() || zone.is_empty() || device_type.is_empty() {
        info!("configuration cancelled or incomplete");
        return Err(ApiError::Incomplete);
    }
    // The id becomes the last topic level; wildcards and separators would
    // change which topic is published to.
    if device_id.contains(['+', '#', '/']) {
        return Err(ApiError::InvalidDeviceId(device_id.to_string()));
    }

    app.dispatcher
        .send_device_config(device_id, zone, device_type)
        .await
        .map_err(ApiError::Transport)?;

    Ok((StatusCode::ACCEPTED, Json(Accepted { status: "sent" })))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<P: Publisher>(state: AppState<P>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::RecordingPublisher;
    use crate::events;
    use crate::registry::ZoneRegistry;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use time::macros::datetime;
    use tower::ServiceExt;

    fn app_with(publisher: RecordingPublisher) -> AppState<RecordingPublisher> {
        let registry = ZoneRegistry::new([
            ("living_room", "Living room".to_string(), Some([200, 300])),
            ("bedroom", "Bedroom".to_string(), Some([500, 300])),
        ]);
        AppState {
            store: ZoneStateStore::new(&registry, std::time::Duration::from_secs(600)),
            dispatcher: CommandDispatcher::new(publisher, "RELAY", "CONFIG/"),
            events: events::channel(),
            link: LinkStatus::default(),
            stale_threshold_secs: 600,
            started_at: Instant::now(),
        }
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    // -- status ---------------------------------------------------------

    #[tokio::test]
    async fn status_lists_zones_in_registry_order() {
        let app = app_with(RecordingPublisher::default());
        app.store
            .apply("bedroom", 21.0, 48.0, datetime!(2024-05-01 12:00 UTC))
            .await;

        let resp = router(app)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["mqtt_connected"], false);
        assert_eq!(json["stale_threshold_secs"], 600);
        let zones = json["zones"].as_array().unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0]["zone_id"], "living_room");
        assert_eq!(zones[0]["freshness"], "NEVER");
        assert!(zones[0]["temperature"].is_null());
        assert_eq!(zones[1]["zone_id"], "bedroom");
        assert_eq!(zones[1]["name"], "Bedroom");
        assert_eq!(zones[1]["position"], serde_json::json!([500, 300]));
        assert_eq!(zones[1]["temperature"], 21.0);
        assert_eq!(zones[1]["last_update"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test]
    async fn single_zone_snapshot() {
        let app = app_with(RecordingPublisher::default());
        app.store
            .apply("living_room", 22.5, 55.0, datetime!(2024-05-01 12:00 UTC))
            .await;

        let resp = router(app.clone())
            .oneshot(Request::get("/api/zones/living_room").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["zone_id"], "living_room");
        assert_eq!(json["temperature"], 22.5);
        assert_eq!(json["humidity"], 55.0);

        let resp = router(app)
            .oneshot(Request::get("/api/zones/garage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // -- relay ----------------------------------------------------------

    #[tokio::test]
    async fn relay_request_publishes_command() {
        let publisher = RecordingPublisher::default();
        let resp = router(app_with(publisher.clone()))
            .oneshot(post_json("/api/zones/living_room/relay", r#"{"state":"ON"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            publisher.sent(),
            vec![(
                "RELAY".to_string(),
                r#"{"zone":"living_room","state":"ON"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn relay_unknown_zone_is_404() {
        let publisher = RecordingPublisher::default();
        let resp = router(app_with(publisher.clone()))
            .oneshot(post_json("/api/zones/garage/relay", r#"{"state":"OFF"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn relay_bad_state_is_rejected() {
        let publisher = RecordingPublisher::default();
        let resp = router(app_with(publisher.clone()))
            .oneshot(post_json("/api/zones/bedroom/relay", r#"{"state":"TOGGLE"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn relay_transport_failure_is_502() {
        let resp = router(app_with(RecordingPublisher::failing()))
            .oneshot(post_json("/api/zones/bedroom/relay", r#"{"state":"ON"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    // -- device config ----------------------------------------------------

    #[tokio::test]
    async fn device_config_publishes_to_device_topic() {
        let publisher = RecordingPublisher::default();
        let resp = router(app_with(publisher.clone()))
            .oneshot(post_json(
                "/api/devices/dev1/config",
                r#"{"zone":"bedroom","type":"thermostat"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            publisher.sent(),
            vec![(
                "CONFIG/dev1".to_string(),
                r#"{"zone":"bedroom","type":"thermostat"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn incomplete_device_config_is_not_sent() {
        let publisher = RecordingPublisher::default();
        for body in [
            r#"{"zone":"bedroom"}"#,
            r#"{"zone":"  ","type":"thermostat"}"#,
            r#"{"type":"thermostat"}"#,
        ] {
            let resp = router(app_with(publisher.clone()))
                .oneshot(post_json("/api/devices/dev1/config", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body}");
            let json = body_json(resp).await;
            assert_eq!(json["error"], "configuration cancelled or incomplete");
        }
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn device_id_with_topic_wildcards_is_400() {
        let publisher = RecordingPublisher::default();
        for uri in [
            "/api/devices/%23/config",
            "/api/devices/a%2Bb/config",
            "/api/devices/a%2Fb/config",
        ] {
            let resp = router(app_with(publisher.clone()))
                .oneshot(post_json(uri, r#"{"zone":"bedroom","type":"thermostat"}"#))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri {uri}");
            let json = body_json(resp).await;
            assert!(json["error"].as_str().unwrap().contains("device id"));
        }
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn blank_device_id_is_not_sent() {
        let publisher = RecordingPublisher::default();
        let resp = router(app_with(publisher.clone()))
            .oneshot(post_json(
                "/api/devices/%20/config",
                r#"{"zone":"bedroom","type":"thermostat"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.sent().is_empty());
    }
}
