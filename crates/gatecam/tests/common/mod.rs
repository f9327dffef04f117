//! Test helpers: controllable capture devices, a mock network device and an
//! in-process server bound to ephemeral ports.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use gatecam::capture::synthetic::SyntheticDevice;
use gatecam::capture::{CaptureDevice, CaptureError};
use gatecam::config::CameraConfig;
use gatecam::frame::RawFrame;
use gatecam::source::SourceKind;
use gatecam::{App, Config};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Knobs shared between a test and the devices it opened
#[derive(Clone, Default)]
pub struct FaultSwitch {
    /// Reads fail while set
    pub failing: Arc<AtomicBool>,
    /// The handle reports itself closed while set; cleared by a reopen
    pub unplugged: Arc<AtomicBool>,
    /// Opens fail while set
    pub refuse_open: Arc<AtomicBool>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
    /// Every read blocks this long, in milliseconds
    pub stall_ms: Arc<AtomicU64>,
}

impl FaultSwitch {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    /// Source whose devices obey this switch
    pub fn source(&self, resolution: (u32, u32)) -> SourceKind {
        let switch = self.clone();
        SourceKind::Device(Arc::new(
            move |_: (u32, u32)| -> Result<Box<dyn CaptureDevice>, CaptureError> {
                switch.opens.fetch_add(1, Ordering::SeqCst);
                if switch.refuse_open.load(Ordering::SeqCst) {
                    return Err(CaptureError::Open("flaky".into(), "refused".into()));
                }
                switch.unplugged.store(false, Ordering::SeqCst);
                Ok(Box::new(FlakyDevice {
                    inner: SyntheticDevice::new(resolution),
                    switch: switch.clone(),
                }))
            },
        ))
    }
}

/// Synthetic device with injectable faults
pub struct FlakyDevice {
    inner: SyntheticDevice,
    switch: FaultSwitch,
}

impl CaptureDevice for FlakyDevice {
    fn is_open(&self) -> bool {
        !self.switch.unplugged.load(Ordering::SeqCst)
    }

    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        self.switch.reads.fetch_add(1, Ordering::SeqCst);
        let stall = self.switch.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        if self.switch.failing.load(Ordering::SeqCst) {
            return Err(CaptureError::Read("injected failure".into()));
        }
        self.inner.read()
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        self.inner.set_resolution(width, height);
    }

    fn resolution(&self) -> (u32, u32) {
        self.inner.resolution()
    }

    fn close(&mut self) {
        self.switch.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }
}

pub fn camera_config(yaml: &str) -> CameraConfig {
    serde_yaml::from_str(yaml).unwrap()
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Axum server echoing every request back
pub struct EchoDevice {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl EchoDevice {
    pub async fn spawn() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().fallback(echo).with_state(hits.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, hits, task }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for EchoDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Replies 201 with the request body, the method and URI in `x-echo-*`
/// headers, and every `x-test-*` request header mirrored
async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let mut response = (StatusCode::CREATED, body).into_response();
    let out = response.headers_mut();
    out.insert(
        HeaderName::from_static("x-echo-method"),
        HeaderValue::from_str(method.as_str()).unwrap(),
    );
    out.insert(
        HeaderName::from_static("x-echo-uri"),
        HeaderValue::from_str(&uri.to_string()).unwrap(),
    );
    for (name, value) in headers.iter() {
        if name.as_str().starts_with("x-test-") {
            out.insert(name.clone(), value.clone());
        }
    }
    if let Some(content_type) = headers.get("content-type") {
        out.insert("content-type", content_type.clone());
    }
    response
}

/// Gatecam serving on ephemeral internal and external ports
pub struct TestServer {
    pub internal: SocketAddr,
    pub external: SocketAddr,
    pub app: gatecam::http::AppState,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn(yaml: &str) -> Self {
        let config = Config::parse(yaml).unwrap();
        let app = App::from_config(config).unwrap();
        let state = app.state().clone();

        let internal = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let external = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let internal_addr = internal.local_addr().unwrap();
        let external_addr = external.local_addr().unwrap();

        let shutdown = watch::Sender::new(false);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                app.serve(internal, Some(external), shutdown).await.unwrap();
            }
        });

        let server = Self {
            internal: internal_addr,
            external: external_addr,
            app: state,
            shutdown,
            task: Some(task),
        };
        server.wait_ready().await;
        server
    }

    /// Poll `/health` until the server answers
    async fn wait_ready(&self) {
        let client = reqwest::Client::new();
        let url = self.internal_url("/health");
        for _ in 0..200 {
            if let Ok(response) = client.get(&url).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not become ready");
    }

    pub fn internal_url(&self, path: &str) -> String {
        format!("http://{}{}", self.internal, path)
    }

    pub fn external_url(&self, path: &str) -> String {
        format!("http://{}{}", self.external, path)
    }

    /// Signal shutdown and wait for the servers and cameras to finish
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("server did not shut down")
                .unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
