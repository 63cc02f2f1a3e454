use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ConnectArgs;

/// Relay server used when neither the command line nor the config file names
/// one.
pub const DEFAULT_SERVER: &str = "wss://webhooker.site";

/// Optional YAML configuration file. Every field has a default, and command
/// line flags override whatever the file sets.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default)]
    pub forward: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            forward: None,
            verbose: false,
            forward_timeout_secs: default_forward_timeout(),
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// File to append delivery events to. Events go to stdout when unset.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            event_log: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_forward_timeout() -> u64 {
    ws_relay::DEFAULT_FORWARD_TIMEOUT.as_secs()
}

fn default_backoff() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    load_from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

pub fn load_from_str(yaml: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(yaml)
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Invalid or missing settings, detected before the first connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("account token required")]
    MissingToken,

    #[error("--forward URL required")]
    MissingForward,

    #[error("invalid forward URL {url:?}: {reason}")]
    InvalidForward { url: String, reason: String },

    #[error("invalid server URL {url:?}: {reason}")]
    InvalidServer { url: String, reason: String },

    #[error("{field} must be at least one second")]
    ZeroDuration { field: &'static str },
}

/// Everything the relay needs for the life of the process, merged from the
/// config file and the command line and validated. Read-only once built.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub server: String,
    pub token: String,
    pub forward: String,
    pub verbose: bool,
    pub backoff: Duration,
    pub forward_timeout: Duration,
    pub log_level: String,
    pub event_log: Option<PathBuf>,
}

impl ForwardConfig {
    /// Apply `args` on top of `file` and validate the result.
    pub fn resolve(args: ConnectArgs, file: Config) -> Result<Self, ConfigError> {
        if args.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let server = args.server.unwrap_or(file.server);
        check_url(&server, &["ws", "wss"]).map_err(|reason| ConfigError::InvalidServer {
            url: server.clone(),
            reason,
        })?;

        let forward = args
            .forward
            .or(file.forward)
            .filter(|f| !f.is_empty())
            .ok_or(ConfigError::MissingForward)?;
        check_url(&forward, &["http", "https"]).map_err(|reason| ConfigError::InvalidForward {
            url: forward.clone(),
            reason,
        })?;

        let backoff = nonzero_secs("reconnect.backoff_secs", file.reconnect.backoff_secs)?;
        let forward_timeout = nonzero_secs("forward_timeout_secs", file.forward_timeout_secs)?;

        Ok(Self {
            server,
            token: args.token,
            forward,
            verbose: args.verbose || file.verbose,
            backoff,
            forward_timeout,
            log_level: file.logging.level,
            event_log: file.logging.event_log,
        })
    }

    /// The relay endpoint for this account: `<server>/api/v1/connect/<token>`,
    /// with one trailing `/` dropped from the server first.
    pub fn upstream_url(&self) -> String {
        let server = self.server.strip_suffix('/').unwrap_or(&self.server);
        format!("{server}/api/v1/connect/{}", self.token)
    }
}

fn nonzero_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroDuration { field });
    }
    Ok(Duration::from_secs(secs))
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<(), String> {
    let url = reqwest::Url::parse(raw).map_err(|e| e.to_string())?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "unsupported scheme {:?}, expected {}",
            url.scheme(),
            schemes.join(" or ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(token: &str, forward: Option<&str>) -> ConnectArgs {
        ConnectArgs {
            token: token.to_string(),
            forward: forward.map(str::to_string),
            ..ConnectArgs::default()
        }
    }

    #[test]
    fn defaults_when_file_is_empty() {
        let config = load_from_str("{}").unwrap();
        assert_eq!(config.server, DEFAULT_SERVER);
        assert_eq!(config.forward, None);
        assert!(!config.verbose);
        assert_eq!(config.forward_timeout_secs, 30);
        assert_eq!(config.reconnect.backoff_secs, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.event_log.is_none());
    }

    #[test]
    fn load_full_file() {
        let yaml = r#"
server: "wss://relay.internal"
forward: "http://localhost:8080/webhooks"
verbose: true
forward_timeout_secs: 10
reconnect:
  backoff_secs: 1
logging:
  level: debug
  event_log: /tmp/webhooker/events.jsonl
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.server, "wss://relay.internal");
        assert_eq!(config.forward.as_deref(), Some("http://localhost:8080/webhooks"));
        assert!(config.verbose);
        assert_eq!(config.forward_timeout_secs, 10);
        assert_eq!(config.reconnect.backoff_secs, 1);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.event_log,
            Some(PathBuf::from("/tmp/webhooker/events.jsonl"))
        );
    }

    #[test]
    fn load_from_nonexistent_file() {
        let err = load(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "reconnect: [not, a, map]").unwrap();

        let err = load(&path).unwrap_err();
        assert!(
            err.to_string().contains("failed to parse config file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn resolve_uses_defaults() {
        let resolved =
            ForwardConfig::resolve(args("abc123", Some("http://localhost:3000")), Config::default())
                .unwrap();

        assert_eq!(resolved.server, DEFAULT_SERVER);
        assert_eq!(resolved.forward, "http://localhost:3000");
        assert_eq!(resolved.backoff, Duration::from_secs(5));
        assert_eq!(resolved.forward_timeout, Duration::from_secs(30));
        assert!(!resolved.verbose);
        assert_eq!(
            resolved.upstream_url(),
            "wss://webhooker.site/api/v1/connect/abc123"
        );
    }

    #[test]
    fn command_line_overrides_file() {
        let file = load_from_str(
            "server: wss://file.example\nforward: http://file.example\n",
        )
        .unwrap();
        let mut cli = args("tok", Some("http://cli.example:3000"));
        cli.server = Some("ws://127.0.0.1:9000/".to_string());
        cli.verbose = true;

        let resolved = ForwardConfig::resolve(cli, file).unwrap();
        assert_eq!(resolved.forward, "http://cli.example:3000");
        assert!(resolved.verbose);
        assert_eq!(resolved.upstream_url(), "ws://127.0.0.1:9000/api/v1/connect/tok");
    }

    #[test]
    fn forward_may_come_from_file() {
        let file = load_from_str("forward: http://localhost:4000\n").unwrap();
        let resolved = ForwardConfig::resolve(args("tok", None), file).unwrap();
        assert_eq!(resolved.forward, "http://localhost:4000");
    }

    #[test]
    fn missing_token_is_rejected() {
        let cli = args("  ", Some("http://localhost:3000"));
        let err = ForwardConfig::resolve(cli, Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let cases = [
            ("reconnect:\n  backoff_secs: 0\n", "reconnect.backoff_secs"),
            ("forward_timeout_secs: 0\n", "forward_timeout_secs"),
        ];
        for (yaml, expected) in cases {
            let file = load_from_str(yaml).unwrap();
            let err = ForwardConfig::resolve(args("tok", Some("http://localhost:3000")), file)
                .unwrap_err();
            match err {
                ConfigError::ZeroDuration { field } => assert_eq!(field, expected),
                other => panic!("unexpected error for {yaml:?}: {other}"),
            }
        }
    }

    #[test]
    fn only_one_trailing_slash_is_dropped_from_server() {
        let mut cli = args("tok", Some("http://localhost:3000"));
        cli.server = Some("wss://relay.example/base//".to_string());

        let resolved = ForwardConfig::resolve(cli, Config::default()).unwrap();
        assert_eq!(
            resolved.upstream_url(),
            "wss://relay.example/base//api/v1/connect/tok"
        );
    }

    #[test]
    fn missing_forward_is_rejected() {
        let err = ForwardConfig::resolve(args("tok", None), Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingForward));
        assert_eq!(err.to_string(), "--forward URL required");

        let err = ForwardConfig::resolve(args("tok", Some("")), Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingForward));
    }

    #[test]
    fn invalid_forward_is_rejected() {
        for forward in ["localhost:3000", "not a url", "ftp://localhost/"] {
            let err = ForwardConfig::resolve(args("tok", Some(forward)), Config::default())
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidForward { .. }),
                "unexpected error for {forward}: {err}"
            );
        }
    }

    #[test]
    fn invalid_server_is_rejected() {
        let mut cli = args("tok", Some("http://localhost:3000"));
        cli.server = Some("https://webhooker.site".to_string());

        let err = ForwardConfig::resolve(cli, Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServer { .. }), "unexpected error: {err}");
    }
}
