use std::{
    net::SocketAddr,
    path::Path,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use axum::{Json, Router, extract::State, response::Html, routing::get};
use tokio::sync::oneshot;

use crate::{
    dataset::Dataset,
    error::{MaplapseError, MaplapseResult},
};

/// Built-in visualization page: a map anchor, a date slider and the view-mode
/// buttons the automation drives. Deployments with a real map page point
/// [`MapHost::start_with_page`] at their own file instead.
const DEFAULT_PAGE: &str = include_str!("../assets/map.html");

struct HostState {
    dataset: Arc<Dataset>,
    page: String,
}

/// Local HTTP host serving the visualization page and the loaded dataset for
/// the duration of one pipeline run.
///
/// The server lives on a background thread so it stays responsive while the
/// coordinating thread performs blocking navigation and capture calls against
/// it. Both routes are read-only, so concurrent requests (page assets plus the
/// data fetch) need no serialization.
pub struct MapHost {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MapHost {
    /// Bind a loopback port and start serving in the background. The bind is
    /// synchronous, so the returned host always knows its endpoint; actual
    /// reachability is still confirmed via [`MapHost::wait_reachable`].
    pub fn start(dataset: Arc<Dataset>) -> MaplapseResult<Self> {
        Self::start_inner(dataset, DEFAULT_PAGE.to_string())
    }

    /// Same as [`MapHost::start`], serving a caller-provided page file.
    pub fn start_with_page(dataset: Arc<Dataset>, page_path: &Path) -> MaplapseResult<Self> {
        let page = std::fs::read_to_string(page_path).map_err(|e| {
            MaplapseError::data_unavailable(format!(
                "cannot read page '{}': {e}",
                page_path.display()
            ))
        })?;
        Self::start_inner(dataset, page)
    }

    fn start_inner(dataset: Arc<Dataset>, page: String) -> MaplapseResult<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .context("bind render host listener on 127.0.0.1")?;
        let addr = listener.local_addr().context("resolve render host address")?;
        listener
            .set_nonblocking(true)
            .context("set render host listener non-blocking")?;

        let state = Arc::new(HostState { dataset, page });
        let app = Router::new()
            .route("/", get(serve_page))
            .route("/data", get(serve_data))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("maplapse-host".to_string())
            .spawn(move || host_thread(listener, app, shutdown_rx))
            .context("spawn render host thread")?;

        tracing::info!(%addr, "render host started");
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Base URL the browser navigates to.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/", self.addr.port())
    }

    /// Poll the endpoint with backoff until it answers or the deadline passes.
    ///
    /// This replaces a fixed startup sleep: the bind is synchronous but the
    /// accept loop comes up on another thread, so reachability is the only
    /// signal worth trusting.
    pub fn wait_reachable(&self, timeout: Duration) -> MaplapseResult<()> {
        let endpoint = self.endpoint();
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(25);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match ureq::get(&endpoint).call() {
                Ok(_) | Err(ureq::Error::Status(_, _)) => {
                    tracing::debug!(attempts, "render host reachable");
                    return Ok(());
                }
                Err(err) => {
                    if Instant::now() + backoff > deadline {
                        return Err(MaplapseError::host_unreachable(format!(
                            "{endpoint} not reachable after {attempts} attempt(s) in {timeout:?}: {err}"
                        )));
                    }
                }
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(400));
        }
    }

    /// Shut the server down and join its thread. Safe to call repeatedly and
    /// safe to call if startup never fully completed.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::info!(addr = %self.addr, "render host stopped");
        }
    }
}

impl Drop for MapHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn host_thread(listener: std::net::TcpListener, app: Router, shutdown_rx: oneshot::Receiver<()>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(%err, "render host runtime failed to start");
            return;
        }
    };

    let result = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    if let Err(err) = result {
        tracing::error!(%err, "render host exited with error");
    }
}

async fn serve_page(State(state): State<Arc<HostState>>) -> Html<String> {
    Html(state.page.clone())
}

async fn serve_data(State(state): State<Arc<HostState>>) -> Json<Vec<crate::dataset::GeoRecord>> {
    Json(state.dataset.records().to_vec())
}
