//! Gatecam: serves live camera and screen sources as independently
//! configured HTTP streams, and proxies requests to auxiliary devices.

pub mod app;
pub mod auth;
pub mod cache;
pub mod camera;
pub mod capture;
pub mod config;
pub mod detector;
pub mod device;
pub mod frame;
pub mod http;
pub mod pipeline;
pub mod processor;
pub mod proxy;
pub mod registry;
pub mod source;

pub use app::App;
pub use camera::Camera;
pub use config::Config;
