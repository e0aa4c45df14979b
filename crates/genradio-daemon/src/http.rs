use crate::core::CoreEvent;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use genradio_proto::protocol::{Command, DaemonState};
use genradio_proto::session::PlaybackSession;
use genradio_proto::state::StateManager;
use genradio_proto::station::DEFAULT_GENRES;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    tag: String,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<CoreEvent>) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/session", get(get_session))
        .route("/api/select/:idx", get(select_station).post(select_station))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/random", get(random_station).post(random_station))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/top", get(load_top).post(load_top))
        .route("/api/search", get(search).post(search))
        .route("/api/genre/:tag", get(genre).post(genre))
        .route("/api/genres", get(genres))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
        error!("Failed to forward command, core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonState> {
    Json(state.state_manager.get_state().await)
}

async fn get_session(State(state): State<HttpState>) -> Json<PlaybackSession> {
    Json(state.state_manager.session().await)
}

async fn select_station(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    if state.state_manager.station_at(idx).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    send(&state, Command::Select { station_idx: idx }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Toggle).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Prev).await
}

async fn random_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Random).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    send(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let session = state.state_manager.session().await;
    let volume = (session.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn load_top(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::LoadTop { limit: None }).await
}

async fn search(State(state): State<HttpState>, Query(params): Query<SearchParams>) -> StatusCode {
    send(
        &state,
        Command::Search {
            text: params.q,
            tag: params.tag,
        },
    )
    .await
}

async fn genre(State(state): State<HttpState>, Path(tag): Path<String>) -> StatusCode {
    send(&state, Command::Genre { tag }).await
}

async fn genres() -> Json<Vec<&'static str>> {
    Json(DEFAULT_GENRES.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use genradio_proto::station::Station;
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<StateManager>, mpsc::Receiver<CoreEvent>) {
        let sm = Arc::new(StateManager::new(PlaybackSession::new(0.5)));
        let (tx, rx) = mpsc::channel(8);
        (router(sm.clone(), tx), sm, rx)
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn next_command(rx: &mut mpsc::Receiver<CoreEvent>) -> Command {
        match rx.try_recv() {
            Ok(CoreEvent::Command(cmd)) => cmd,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_state_and_session() {
        let (app, _sm, _rx) = setup();
        let (status, body) = call(app.clone(), "GET", "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let state: DaemonState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.session.volume, 0.5);

        let (status, body) = call(app, "GET", "/api/session").await;
        assert_eq!(status, StatusCode::OK);
        let session: PlaybackSession = serde_json::from_slice(&body).unwrap();
        assert!(session.station.is_none());
    }

    #[tokio::test]
    async fn test_volume_routes() {
        let (app, _sm, mut rx) = setup();
        let (status, _) = call(app.clone(), "POST", "/api/volume/150").await;
        assert_eq!(status, StatusCode::OK);
        match next_command(&mut rx) {
            Command::Volume { value } => assert_eq!(value, 1.0),
            other => panic!("unexpected {:?}", other),
        }

        let (_, body) = call(app, "GET", "/api/volume").await;
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["volume"], 50);
    }

    #[tokio::test]
    async fn test_select_checks_listing() {
        let (app, sm, mut rx) = setup();
        let (status, _) = call(app.clone(), "POST", "/api/select/0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());

        sm.set_listing(
            "Top",
            vec![Station {
                id: "a".into(),
                name: "A".into(),
                stream_url: "https://a.example/live".into(),
                ..Station::default()
            }],
        )
        .await;
        let (status, _) = call(app, "GET", "/api/select/0").await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(
            next_command(&mut rx),
            Command::Select { station_idx: 0 }
        ));
    }

    #[tokio::test]
    async fn test_directory_routes() {
        let (app, _sm, mut rx) = setup();

        call(app.clone(), "GET", "/api/search?q=groove&tag=ambient").await;
        match next_command(&mut rx) {
            Command::Search { text, tag } => {
                assert_eq!(text, "groove");
                assert_eq!(tag, "ambient");
            }
            other => panic!("unexpected {:?}", other),
        }

        call(app.clone(), "POST", "/api/genre/jazz").await;
        assert!(matches!(next_command(&mut rx), Command::Genre { tag } if tag == "jazz"));

        call(app.clone(), "POST", "/api/top").await;
        assert!(matches!(next_command(&mut rx), Command::LoadTop { limit: None }));

        call(app.clone(), "POST", "/api/toggle").await;
        assert!(matches!(next_command(&mut rx), Command::Toggle));

        let (_, body) = call(app, "GET", "/api/genres").await;
        let genres: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(genres.len(), DEFAULT_GENRES.len());
        assert!(genres.iter().any(|g| g == "Jazz"));
    }

    #[tokio::test]
    async fn test_core_gone_is_service_unavailable() {
        let (app, _sm, rx) = setup();
        drop(rx);
        let (status, _) = call(app, "POST", "/api/next").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
