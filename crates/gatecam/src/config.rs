use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// Output family produced by one mode of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    /// JPEG frames served as a multipart stream
    JpegStream,
    /// Raw 8-bit luma frames
    GrayscaleFrame,
    /// Raw RGB565 (big-endian) frames
    ColorFrame,
}

impl ModeKind {
    pub const ALL: [ModeKind; 3] = [
        ModeKind::JpegStream,
        ModeKind::GrayscaleFrame,
        ModeKind::ColorFrame,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeKind::JpegStream => "jpeg_stream",
            ModeKind::GrayscaleFrame => "grayscale_frame",
            ModeKind::ColorFrame => "color_frame",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clockwise rotation applied before any other transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// True when the rotation swaps width and height
    pub fn is_transposing(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(format!(
                "unsupported rotation {}, expected one of 0, 90, 180, 270",
                other
            )),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        match rotation {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Mirror axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "FlipRepr")]
pub enum Flip {
    #[default]
    None,
    /// Mirror around the x axis (upside down)
    X,
    /// Mirror around the y axis (left/right)
    Y,
    Both,
}

/// Accepts either the name or the legacy OpenCV flip code (-1, 0, 1).
#[derive(Deserialize)]
#[serde(untagged)]
enum FlipRepr {
    Name(String),
    Code(i64),
}

impl TryFrom<FlipRepr> for Flip {
    type Error = String;

    fn try_from(repr: FlipRepr) -> Result<Self, Self::Error> {
        match repr {
            FlipRepr::Name(name) => match name.to_lowercase().as_str() {
                "none" => Ok(Flip::None),
                "x" => Ok(Flip::X),
                "y" => Ok(Flip::Y),
                "both" => Ok(Flip::Both),
                other => Err(format!("unknown flip axis '{}'", other)),
            },
            FlipRepr::Code(-1) => Ok(Flip::Both),
            FlipRepr::Code(0) => Ok(Flip::X),
            FlipRepr::Code(1) => Ok(Flip::Y),
            FlipRepr::Code(other) => Err(format!("unknown flip code {}", other)),
        }
    }
}

/// Capture backend used for a camera
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Platform backend (V4L2 devices, screen capture for displays)
    #[default]
    Auto,
    /// Generated test pattern, no hardware required
    Synthetic,
}

/// Per-mode transform settings as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    #[serde(default)]
    pub brightness: f64,
    #[serde(default = "default_contrast")]
    pub contrast: f64,
    #[serde(default)]
    pub rotate: Rotation,
    #[serde(default)]
    pub flip: Flip,
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    /// JPEG quality (1-100), only used by `jpeg_stream`
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Output width, 0 = source native resolution
    #[serde(default)]
    pub out_frame_width: u32,
    /// Output height, 0 = source native resolution
    #[serde(default)]
    pub out_frame_height: u32,
    /// Overrides the camera frame rate for this mode
    #[serde(default)]
    pub frame_rate: Option<u32>,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: default_contrast(),
            rotate: Rotation::None,
            flip: Flip::None,
            saturation: default_saturation(),
            quality: default_quality(),
            out_frame_width: 0,
            out_frame_height: 0,
            frame_rate: None,
        }
    }
}

fn default_contrast() -> f64 {
    1.0
}

fn default_saturation() -> f64 {
    1.0
}

fn default_quality() -> u8 {
    80
}

/// Fully resolved configuration of one mode.
///
/// Produced once when the camera is built; every field is explicit, output
/// dimensions are never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeConfig {
    pub kind: ModeKind,
    pub brightness: f64,
    pub contrast: f64,
    pub rotation: Rotation,
    pub flip: Flip,
    pub saturation: f64,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl ModeConfig {
    /// Tick period of the production loop
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis((1000 / u64::from(self.frame_rate.max(1))).max(1))
    }
}

/// Where a camera's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSpec {
    /// Capture device index (`/dev/video<N>` on Linux)
    Device(u32),
    /// Screen capture of a display
    Display(u32),
}

/// Configuration for a single camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique name for the camera (also the Basic Auth username)
    pub name: String,
    /// Optional numeric alias used in URLs
    #[serde(default)]
    pub order: Option<u32>,
    /// Capture device index
    #[serde(default)]
    pub device: u32,
    /// Capture a display instead of a device
    #[serde(default)]
    pub is_display: bool,
    #[serde(default)]
    pub display_index: u32,
    #[serde(default)]
    pub backend: BackendKind,
    /// Environment variable holding the access secret
    #[serde(default)]
    pub access_key_env: Option<String>,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Desired capture width, 0 = device default
    #[serde(default)]
    pub frame_width: u32,
    /// Desired capture height, 0 = device default
    #[serde(default)]
    pub frame_height: u32,
    #[serde(default)]
    pub modes: BTreeMap<ModeKind, ModeSettings>,
}

fn default_frame_rate() -> u32 {
    15
}

impl CameraConfig {
    pub fn source(&self) -> SourceSpec {
        if self.is_display {
            SourceSpec::Display(self.display_index)
        } else {
            SourceSpec::Device(self.device)
        }
    }

    /// Resolve every configured mode against the source's native resolution.
    ///
    /// Zero output dimensions fall back to `native`, swapped when the mode
    /// rotates by 90 or 270 degrees.
    pub fn resolve_modes(&self, native: (u32, u32)) -> Vec<ModeConfig> {
        self.modes
            .iter()
            .map(|(kind, settings)| {
                let (native_w, native_h) = if settings.rotate.is_transposing() {
                    (native.1, native.0)
                } else {
                    native
                };
                let (width, height) =
                    if settings.out_frame_width == 0 || settings.out_frame_height == 0 {
                        (native_w, native_h)
                    } else {
                        (settings.out_frame_width, settings.out_frame_height)
                    };
                ModeConfig {
                    kind: *kind,
                    brightness: settings.brightness,
                    contrast: settings.contrast,
                    rotation: settings.rotate,
                    flip: settings.flip,
                    saturation: settings.saturation,
                    quality: settings.quality,
                    width: width.max(1),
                    height: height.max(1),
                    frame_rate: settings.frame_rate.unwrap_or(self.frame_rate),
                }
            })
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        validate_name("camera", &self.name)?;
        validate_frame_rate(&self.name, self.frame_rate)?;
        for (kind, settings) in &self.modes {
            if let Some(rate) = settings.frame_rate {
                validate_frame_rate(&format!("{}/{}", self.name, kind), rate)?;
            }
            if !(1..=100).contains(&settings.quality) {
                return Err(ConfigError::ValidationError(format!(
                    "camera '{}' mode {}: quality must be within 1..=100, got {}",
                    self.name, kind, settings.quality
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for an auxiliary network device reachable through the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub order: Option<u32>,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub access_key_env: Option<String>,
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_name("device", &self.name)?;
        if self.ip.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "device '{}' has an empty ip",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(format!(
                "device '{}' has port 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port of the internal (unauthenticated) server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Port of the externally-exposed (Basic Auth) server, disabled when absent
    #[serde(default)]
    pub external_port: Option<u16>,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed by CORS on the internal server
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            external_port: None,
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
        "http://localhost:3002".to_string(),
    ]
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for camera in &self.cameras {
            camera.validate()?;
        }
        for device in &self.devices {
            device.validate()?;
        }
        ensure_unique(
            "camera",
            self.cameras.iter().map(|c| (c.name.as_str(), c.order)),
        )?;
        ensure_unique(
            "device",
            self.devices.iter().map(|d| (d.name.as_str(), d.order)),
        )?;
        if self.api.external_port == Some(self.api.port) {
            return Err(ConfigError::ValidationError(format!(
                "internal and external servers share port {}",
                self.api.port
            )));
        }
        Ok(())
    }
}

/// True for identifiers that would be parsed as an order by registry lookups
pub fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

fn validate_name(kind: &str, name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{} name must not be empty",
            kind
        )));
    }
    if is_numeric_id(name) {
        return Err(ConfigError::ValidationError(format!(
            "{} name '{}' is numeric and would be ambiguous with order lookup",
            kind, name
        )));
    }
    Ok(())
}

fn validate_frame_rate(owner: &str, rate: u32) -> Result<(), ConfigError> {
    if !(1..=1000).contains(&rate) {
        return Err(ConfigError::ValidationError(format!(
            "'{}': frame rate must be within 1..=1000, got {}",
            owner, rate
        )));
    }
    Ok(())
}

fn ensure_unique<'a>(
    kind: &str,
    entries: impl Iterator<Item = (&'a str, Option<u32>)>,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut orders = HashSet::new();
    for (name, order) in entries {
        if !names.insert(name) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate {} name '{}'",
                kind, name
            )));
        }
        if let Some(order) = order {
            if !orders.insert(order) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate {} order {} ('{}')",
                    kind, order, name
                )));
            }
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
api:
  port: 9000
  external_port: 9443
cameras:
  - name: "gate"
    order: 1
    device: 0
    frame_rate: 10
    frame_width: 640
    frame_height: 480
    access_key_env: GATE_KEY
    modes:
      jpeg_stream:
        quality: 70
        rotate: 90
        flip: x
      grayscale_frame:
        out_frame_width: 160
        out_frame_height: 128
  - name: "desk"
    is_display: true
    display_index: 1
devices:
  - name: "barrier"
    order: 1
    ip: "192.168.1.40"
    port: 80
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.external_port, Some(9443));
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].source(), SourceSpec::Device(0));
        assert_eq!(config.cameras[1].source(), SourceSpec::Display(1));
        assert_eq!(config.cameras[1].frame_rate, 15); // default

        let jpeg = &config.cameras[0].modes[&ModeKind::JpegStream];
        assert_eq!(jpeg.quality, 70);
        assert_eq!(jpeg.rotate, Rotation::Cw90);
        assert_eq!(jpeg.flip, Flip::X);
        assert_eq!(jpeg.contrast, 1.0); // default

        assert_eq!(config.devices[0].port, 80);
        assert_eq!(config.devices[0].order, Some(1));
    }

    #[test]
    fn test_legacy_flip_codes() {
        let yaml = r#"
cameras:
  - name: "gate"
    modes:
      jpeg_stream: { flip: -1 }
      color_frame: { flip: 1 }
"#;
        let config = Config::parse(yaml).unwrap();
        let modes = &config.cameras[0].modes;
        assert_eq!(modes[&ModeKind::JpegStream].flip, Flip::Both);
        assert_eq!(modes[&ModeKind::ColorFrame].flip, Flip::Y);
    }

    #[test]
    fn test_rejects_bad_rotation() {
        let yaml = r#"
cameras:
  - name: "gate"
    modes:
      jpeg_stream: { rotate: 45 }
"#;
        assert!(matches!(
            Config::parse(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_numeric_name() {
        let yaml = r#"
cameras:
  - name: "42"
"#;
        assert!(matches!(
            Config::parse(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_order() {
        let yaml = r#"
devices:
  - { name: "a", order: 2, ip: "10.0.0.1", port: 80 }
  - { name: "b", order: 2, ip: "10.0.0.2", port: 80 }
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate device order 2"));
    }

    #[test]
    fn test_rejects_zero_frame_rate() {
        let yaml = r#"
cameras:
  - name: "gate"
    frame_rate: 0
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_resolve_modes_defaults_to_native() {
        let yaml = r#"
cameras:
  - name: "gate"
    frame_rate: 20
    modes:
      jpeg_stream: { rotate: 270 }
      grayscale_frame: { out_frame_width: 160, out_frame_height: 128, frame_rate: 5 }
      color_frame: { out_frame_width: 160 }
"#;
        let config = Config::parse(yaml).unwrap();
        let modes = config.cameras[0].resolve_modes((640, 480));
        assert_eq!(modes.len(), 3);

        let jpeg = modes.iter().find(|m| m.kind == ModeKind::JpegStream).unwrap();
        assert_eq!((jpeg.width, jpeg.height), (480, 640));
        assert_eq!(jpeg.frame_rate, 20);

        let gray = modes
            .iter()
            .find(|m| m.kind == ModeKind::GrayscaleFrame)
            .unwrap();
        assert_eq!((gray.width, gray.height), (160, 128));
        assert_eq!(gray.frame_rate, 5);
        assert_eq!(gray.interval(), std::time::Duration::from_millis(200));

        let fastest = ModeConfig {
            frame_rate: 5000,
            ..gray.clone()
        };
        assert_eq!(fastest.interval(), std::time::Duration::from_millis(1));

        // Only one dimension set: both fall back to native
        let color = modes.iter().find(|m| m.kind == ModeKind::ColorFrame).unwrap();
        assert_eq!((color.width, color.height), (640, 480));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "cameras: []\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!(config.cameras.is_empty());
        assert_eq!(config.api.port, 8080);

        let missing = Config::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("0"));
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id(""));
        assert!(!is_numeric_id("cam1"));
        assert!(!is_numeric_id("-1"));
    }
}
