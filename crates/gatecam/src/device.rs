//! Auxiliary network devices reachable through the proxy.

use crate::camera::read_secret;
use crate::config::DeviceConfig;
use crate::registry::{Registered, Registry};

#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    order: Option<u32>,
    ip: String,
    port: u16,
    access_key_env: Option<String>,
}

impl Device {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            name: config.name.clone(),
            order: config.order,
            ip: config.ip.clone(),
            port: config.port,
            access_key_env: config.access_key_env.clone(),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// Upstream URL for `endpoint`, which may include a query string
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url(), endpoint)
        } else {
            format!("{}/{}", self.base_url(), endpoint)
        }
    }

    /// Access secret from the environment, read on every call
    pub fn access_key(&self) -> Option<String> {
        read_secret(self.access_key_env.as_deref())
    }
}

impl Registered for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> Option<u32> {
        self.order
    }
}

pub type DeviceRegistry = Registry<Device>;

impl Registry<Device> {
    pub fn from_configs(configs: &[DeviceConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            let device = registry.add(Device::new(config));
            log::info!("Device '{}' -> {}", device.name(), device.base_url());
        }
        registry
    }
}
