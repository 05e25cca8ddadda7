//! Exercises the WebDriver client against an in-process stub driver speaking
//! just enough of the W3C wire protocol.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use base64::Engine as _;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use maplapse::{
    MaplapseError,
    webdriver::{ELEMENT_KEY, Locator, WebDriverClient},
};

#[derive(Default)]
struct StubState {
    current_url: String,
    session_alive: bool,
}

type Shared = Arc<Mutex<StubState>>;

fn png_base64() -> String {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn stub_router(state: Shared) -> Router {
    async fn status() -> Json<Value> {
        Json(json!({ "value": { "ready": true, "message": "stub ready" } }))
    }

    async fn new_session(State(state): State<Shared>) -> Json<Value> {
        state.lock().unwrap().session_alive = true;
        Json(json!({ "value": { "sessionId": "stub-session", "capabilities": {} } }))
    }

    async fn set_url(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
        state.lock().unwrap().current_url = body["url"].as_str().unwrap_or("").to_string();
        Json(json!({ "value": null }))
    }

    async fn get_url(State(state): State<Shared>) -> Json<Value> {
        Json(json!({ "value": state.lock().unwrap().current_url }))
    }

    async fn source() -> Json<Value> {
        Json(json!({ "value": "<html><body><canvas id=\"map\"></canvas></body></html>" }))
    }

    async fn find_element(Json(body): Json<Value>) -> impl IntoResponse {
        let selector = body["value"].as_str().unwrap_or("");
        if selector == "#map" || selector.contains("Heat Map") {
            let mut element = serde_json::Map::new();
            element.insert(ELEMENT_KEY.to_string(), json!("el-7"));
            (StatusCode::OK, Json(json!({ "value": element })))
        } else {
            (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "value": {
                        "error": "no such element",
                        "message": format!("unable to locate element: {selector}")
                    }
                })),
            )
        }
    }

    async fn click() -> Json<Value> {
        Json(json!({ "value": null }))
    }

    async fn execute(Json(body): Json<Value>) -> Json<Value> {
        // Echo the first argument back so the test can see args round-trip.
        Json(json!({ "value": body["args"][0] }))
    }

    async fn screenshot() -> Json<Value> {
        Json(json!({ "value": png_base64() }))
    }

    async fn delete_session(State(state): State<Shared>) -> Json<Value> {
        state.lock().unwrap().session_alive = false;
        Json(json!({ "value": null }))
    }

    Router::new()
        .route("/status", get(status))
        .route("/session", post(new_session))
        .route("/session/{id}/url", post(set_url).get(get_url))
        .route("/session/{id}/source", get(source))
        .route("/session/{id}/element", post(find_element))
        .route("/session/{id}/element/{el}/click", post(click))
        .route("/session/{id}/execute/sync", post(execute))
        .route("/session/{id}/screenshot", get(screenshot))
        .route("/session/{id}", delete(delete_session))
        .with_state(state)
}

struct StubDriver {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StubDriver {
    fn start(state: Shared) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();
        let app = stub_router(state);
        let (tx, rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        }
    }

    fn base(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }
}

impl Drop for StubDriver {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(5))
        .build()
}

fn connect(stub: &StubDriver) -> WebDriverClient {
    WebDriverClient::new_session(agent(), stub.base(), json!({ "alwaysMatch": {} })).unwrap()
}

#[test]
fn session_lifecycle_round_trips() {
    let state: Shared = Arc::default();
    let stub = StubDriver::start(state.clone());

    assert!(WebDriverClient::driver_ready(&agent(), &stub.base()));

    let client = connect(&stub);
    assert_eq!(client.session_id(), "stub-session");
    assert!(state.lock().unwrap().session_alive);

    client.goto("http://127.0.0.1:1234/").unwrap();
    assert_eq!(client.current_url().unwrap(), "http://127.0.0.1:1234/");
    assert!(client.page_source().unwrap().contains("id=\"map\""));

    client.quit().unwrap();
    assert!(!state.lock().unwrap().session_alive);
}

#[test]
fn find_element_maps_absence_to_control_not_found() {
    let stub = StubDriver::start(Arc::default());
    let client = connect(&stub);

    let element = client.find_element(Locator::Css, "#map").unwrap();
    assert_eq!(element, "el-7");
    client.click(&element).unwrap();

    let err = client.find_element(Locator::Css, "#missing").unwrap_err();
    assert!(matches!(err, MaplapseError::ControlNotFound(_)));
    assert!(err.to_string().contains("#missing"));
}

#[test]
fn execute_passes_arguments_through() {
    let stub = StubDriver::start(Arc::default());
    let client = connect(&stub);

    let value = client
        .execute("return arguments[0];", vec![json!("#dateSlider"), json!(42)])
        .unwrap();
    assert_eq!(value, json!("#dateSlider"));
}

#[test]
fn screenshot_decodes_to_png_bytes() {
    let stub = StubDriver::start(Arc::default());
    let client = connect(&stub);

    let png = client.screenshot_png().unwrap();
    let image = image::load_from_memory(&png).unwrap();
    assert_eq!((image.width(), image.height()), (2, 2));
}

#[test]
fn driver_ready_is_false_for_a_dead_port() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_millis(300))
        .build();
    assert!(!WebDriverClient::driver_ready(
        &agent,
        &format!("http://127.0.0.1:{port}")
    ));
}
