//! Process bring-up and the server run loop.
//!
//! Every camera is built independently: one that cannot be opened is logged
//! and left out of the registry while the rest of the system comes up.

use crate::camera::Camera;
use crate::config::Config;
use crate::detector::ObjectDetector;
use crate::device::DeviceRegistry;
use crate::http::{external_router, internal_router, AppState};
use crate::processor::{FrameProcessor, ImageProcessor};
use crate::proxy::{DeviceProxy, ProxyError};
use crate::registry::CameraRegistry;
use std::future::IntoFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Build with the default frame processor and no detector
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        Self::build(config, Arc::new(ImageProcessor), None)
    }

    pub fn build(
        config: Config,
        processor: Arc<dyn FrameProcessor>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<Self, AppError> {
        let cameras = CameraRegistry::new();
        for camera_config in &config.cameras {
            match Camera::open(camera_config, processor.clone(), detector.clone()) {
                Ok(camera) => {
                    cameras.add(camera);
                }
                Err(e) => log::error!("{}", e),
            }
        }
        log::info!(
            "{} of {} camera(s) available",
            cameras.len(),
            config.cameras.len()
        );

        let devices = DeviceRegistry::from_configs(&config.devices);
        let state = AppState {
            cameras: Arc::new(cameras),
            devices: Arc::new(devices),
            proxy: Arc::new(DeviceProxy::new()?),
        };
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn cameras(&self) -> &Arc<CameraRegistry> {
        &self.state.cameras
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.state.devices
    }

    /// Bind the configured listeners and serve until `shutdown_tx` holds true
    pub async fn run(self, shutdown_tx: watch::Sender<bool>) -> Result<(), AppError> {
        let api = &self.config.api;
        let internal = bind(&api.bind, api.port).await?;
        let external = match api.external_port {
            Some(port) => Some(bind(&api.bind, port).await?),
            None => None,
        };
        self.serve(internal, external, shutdown_tx).await
    }

    /// Start the cameras and serve on already-bound listeners. On shutdown
    /// every camera is stopped, the servers drain and the pipelines are joined.
    pub async fn serve(
        self,
        internal: TcpListener,
        external: Option<TcpListener>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Result<(), AppError> {
        self.state.cameras.start_all();

        // Stopping the cameras seals their slots, which ends open streams so
        // the servers can drain.
        let closer = tokio::spawn({
            let cameras = self.state.cameras.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            async move {
                wait_for_shutdown(shutdown_rx).await;
                cameras.shutdown().await;
            }
        });

        let internal_app = internal_router(self.state.clone(), &self.config.api.cors_origins);
        log_listener("Internal", &internal);
        let internal_server = axum::serve(internal, internal_app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_tx.subscribe()));

        let result = match external {
            Some(listener) => {
                log_listener("External", &listener);
                let external_server = axum::serve(listener, external_router(self.state.clone()))
                    .with_graceful_shutdown(wait_for_shutdown(shutdown_tx.subscribe()));
                let (internal_result, external_result) =
                    tokio::join!(internal_server.into_future(), external_server.into_future());
                internal_result.and(external_result)
            }
            None => internal_server.await,
        };

        log::info!("Servers stopped, shutting down cameras");
        closer.abort();
        self.state.cameras.shutdown().await;
        self.state.cameras.join_all().await;
        result.map_err(AppError::Serve)
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, AppError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Bind(addr, e))
}

fn log_listener(kind: &str, listener: &TcpListener) {
    match listener.local_addr() {
        Ok(addr) => log::info!("{} HTTP server listening on {}", kind, addr),
        Err(e) => log::warn!("{} HTTP server address unknown: {}", kind, e),
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    // A dropped sender also means shutdown
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
