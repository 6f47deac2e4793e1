use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REDIRECT_URL: &str = "/contests/";
pub const DEFAULT_STATE_DIR: &str = "./.proctor-state";
pub const DEFAULT_FRAMES_DIR: &str = "./frames";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub registry: RegistryConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub contest_id: String,
    pub csrf_token: String,
    pub request_timeout: Duration,
}

/// Timing and thresholds for the sampling loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub initial_check_delay: Duration,
    pub acquisition_timeout: Duration,
    pub redirect_delay: Duration,
    pub redirect_url: String,
    pub max_warnings: u32,
    pub capture_width: u32,
    pub capture_height: u32,
    pub jpeg_quality: f32,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_interval: Duration,
    pub freshness_window: Duration,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub frames_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            contest_id: String::new(),
            csrf_token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(3000),
            initial_check_delay: Duration::from_millis(2000),
            acquisition_timeout: Duration::from_millis(10_000),
            redirect_delay: Duration::from_millis(10_000),
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            max_warnings: 2,
            capture_width: 320,
            capture_height: 240,
            jpeg_quality: 0.8,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(5000),
            freshness_window: Duration::from_millis(300_000),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from(DEFAULT_FRAMES_DIR),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let server_defaults = ServerConfig::default();
        let monitor_defaults = MonitorConfig::default();
        let registry_defaults = RegistryConfig::default();

        Self {
            server: ServerConfig {
                base_url: env::var("PROCTOR_SERVER_URL")
                    .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
                contest_id: env::var("PROCTOR_CONTEST_ID").unwrap_or_default(),
                csrf_token: env::var("PROCTOR_CSRF_TOKEN").unwrap_or_default(),
                request_timeout: Duration::from_secs(parse_var(
                    "PROCTOR_REQUEST_TIMEOUT_SECS",
                    server_defaults.request_timeout.as_secs(),
                )),
            },
            monitor: MonitorConfig {
                check_interval: millis_var(
                    "PROCTOR_CHECK_INTERVAL_MS",
                    monitor_defaults.check_interval,
                ),
                initial_check_delay: millis_var(
                    "PROCTOR_INITIAL_CHECK_DELAY_MS",
                    monitor_defaults.initial_check_delay,
                ),
                acquisition_timeout: millis_var(
                    "PROCTOR_ACQUISITION_TIMEOUT_MS",
                    monitor_defaults.acquisition_timeout,
                ),
                redirect_delay: millis_var(
                    "PROCTOR_REDIRECT_DELAY_MS",
                    monitor_defaults.redirect_delay,
                ),
                redirect_url: env::var("PROCTOR_REDIRECT_URL")
                    .unwrap_or_else(|_| DEFAULT_REDIRECT_URL.to_string()),
                max_warnings: parse_var("PROCTOR_MAX_WARNINGS", monitor_defaults.max_warnings),
                capture_width: parse_var("PROCTOR_CAPTURE_WIDTH", monitor_defaults.capture_width),
                capture_height: parse_var(
                    "PROCTOR_CAPTURE_HEIGHT",
                    monitor_defaults.capture_height,
                ),
                jpeg_quality: parse_var("PROCTOR_JPEG_QUALITY", monitor_defaults.jpeg_quality)
                    .clamp(0.0, 1.0),
            },
            registry: RegistryConfig {
                heartbeat_interval: millis_var(
                    "CAMERA_HEARTBEAT_INTERVAL_MS",
                    registry_defaults.heartbeat_interval,
                ),
                freshness_window: millis_var(
                    "CAMERA_STATE_FRESHNESS_MS",
                    registry_defaults.freshness_window,
                ),
                state_dir: env::var("CAMERA_STATE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(registry_defaults.state_dir),
            },
            camera: CameraConfig {
                frames_dir: env::var("CAMERA_FRAMES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_FRAMES_DIR)),
            },
        }
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn server_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    var = %name,
                    value = %raw,
                    default = %default,
                    "Unparseable configuration value, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

fn millis_var(name: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_var(name, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_defaults() {
        let monitor = MonitorConfig::default();
        assert_eq!(monitor.check_interval, Duration::from_secs(3));
        assert_eq!(monitor.initial_check_delay, Duration::from_secs(2));
        assert_eq!(monitor.acquisition_timeout, Duration::from_secs(10));
        assert_eq!(monitor.redirect_delay, Duration::from_secs(10));
        assert_eq!(monitor.max_warnings, 2);
        assert_eq!((monitor.capture_width, monitor.capture_height), (320, 240));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = RegistryConfig::default();
        assert_eq!(registry.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(registry.freshness_window, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("PROCTOR_TEST_GARBAGE_U32", "not-a-number");
        assert_eq!(parse_var("PROCTOR_TEST_GARBAGE_U32", 7u32), 7);
        env::remove_var("PROCTOR_TEST_GARBAGE_U32");
    }

    #[test]
    fn test_millis_var_reads_value() {
        env::set_var("PROCTOR_TEST_INTERVAL_MS", "1500");
        assert_eq!(
            millis_var("PROCTOR_TEST_INTERVAL_MS", Duration::from_secs(3)),
            Duration::from_millis(1500)
        );
        env::remove_var("PROCTOR_TEST_INTERVAL_MS");
    }

    #[test]
    fn test_server_url_trims_trailing_slash() {
        let config = Config {
            server: ServerConfig {
                base_url: "http://localhost:8000/".to_string(),
                ..ServerConfig::default()
            },
            monitor: MonitorConfig::default(),
            registry: RegistryConfig::default(),
            camera: CameraConfig::default(),
        };

        assert_eq!(config.server_url(), "http://localhost:8000");
    }
}
