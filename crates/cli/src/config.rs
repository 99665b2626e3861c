use gateway::DispatchServer;
use proto::{ConfigError, PeerInfo};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tools::{CommandOutput, RecordingSandbox};
use tracing::debug;

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Identity announced to clients during the handshake.
    #[serde(default)]
    pub server: ServerConfig,

    /// Listener and channel settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Dry-run sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
        }
    }
}

fn default_server_name() -> String {
    "desktop-server".to_string()
}

fn default_server_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Address `serve` listens on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Per-direction channel capacity.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            buffer: default_buffer(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_buffer() -> usize {
    gateway::DEFAULT_BUFFER
}

/// The CLI never drives a real desktop; it binds a recording sandbox whose
/// canned responses come from here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SandboxConfig {
    /// PNG returned by `screenshot`. Empty image when unset.
    #[serde(default)]
    pub capture_path: Option<String>,
    /// Stdout returned by `bash_command`.
    #[serde(default)]
    pub command_stdout: String,
    /// Stderr returned by `bash_command`.
    #[serde(default)]
    pub command_stderr: String,
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("deskpilot.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".deskpilot").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        if let Ok(listen) = std::env::var("DESKPILOT_LISTEN") {
            config.transport.listen = listen;
        }
        if let Ok(capture) = std::env::var("DESKPILOT_CAPTURE") {
            config.sandbox.capture_path = Some(capture);
        }

        config.validate()?;
        debug!(
            server = %config.server.name,
            listen = %config.transport.listen,
            "Config loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.transport.buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transport.buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parsed `transport.listen`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.transport
            .listen
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "transport.listen".to_string(),
                reason: e.to_string(),
            })
    }

    pub fn server_info(&self) -> PeerInfo {
        PeerInfo::new(&self.server.name, &self.server.version)
    }

    /// Builds the dry-run sandbox described by `[sandbox]`.
    pub fn build_sandbox(&self) -> Result<RecordingSandbox, ConfigError> {
        let capture = match &self.sandbox.capture_path {
            Some(path) => std::fs::read(path)?,
            None => Vec::new(),
        };
        Ok(RecordingSandbox::new()
            .with_capture(capture)
            .with_command_output(CommandOutput::new(
                &self.sandbox.command_stdout,
                &self.sandbox.command_stderr,
            )))
    }

    /// Dispatch server announcing `[server]`, bound to the dry-run sandbox.
    pub fn build_server(&self) -> proto::Result<DispatchServer> {
        let server = DispatchServer::new(self.server_info());
        server.bind_sandbox(Arc::new(self.build_sandbox()?))?;
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{with_env_vars, with_locked_env};

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.name, "desktop-server");
        assert_eq!(cfg.server.version, "1.0.0");
        assert_eq!(cfg.transport.listen, "127.0.0.1:7878");
        assert_eq!(cfg.transport.buffer, 64);
        assert!(cfg.sandbox.capture_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_reads_explicit_file_path() {
        with_locked_env(|| {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("deskpilot.toml");
            write_file(
                &config_path,
                r#"
[server]
name = "lab-desktop"
version = "2.1.0"

[transport]
listen = "0.0.0.0:9000"
buffer = 8

[sandbox]
command_stdout = "hi\n"
"#,
            );
            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            assert_eq!(cfg.server_info(), PeerInfo::new("lab-desktop", "2.1.0"));
            assert_eq!(cfg.transport.buffer, 8);
            assert_eq!(
                cfg.listen_addr().expect("addr"),
                "0.0.0.0:9000".parse::<SocketAddr>().expect("literal")
            );
            assert_eq!(cfg.sandbox.command_stdout, "hi\n");
        });
    }

    #[test]
    fn load_returns_toml_error_for_invalid_content() {
        with_locked_env(|| {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("deskpilot.toml");
            write_file(&config_path, "[server\nname = \"broken\"");
            let err = Config::load(Some(&config_path)).expect_err("invalid toml must fail");
            assert!(err.to_string().contains("TOML parse error"));
        });
    }

    #[test]
    fn load_rejects_bad_listen_address_and_zero_buffer() {
        with_locked_env(|| {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("deskpilot.toml");

            write_file(&config_path, "[transport]\nlisten = \"not-an-address\"\n");
            let err = Config::load(Some(&config_path)).expect_err("bad address");
            assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "transport.listen"));

            write_file(&config_path, "[transport]\nbuffer = 0\n");
            let err = Config::load(Some(&config_path)).expect_err("zero buffer");
            assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "transport.buffer"));
        });
    }

    #[test]
    fn load_applies_env_overrides() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config_path = tmp.path().join("deskpilot.toml");
        write_file(&config_path, "[transport]\nlisten = \"127.0.0.1:1\"\n");

        let vars = [
            ("DESKPILOT_LISTEN", "127.0.0.1:4242"),
            ("DESKPILOT_CAPTURE", "/tmp/capture.png"),
        ];
        let cfg = with_env_vars(&vars, || Config::load(Some(&config_path))).expect("config load");
        assert_eq!(cfg.transport.listen, "127.0.0.1:4242");
        assert_eq!(cfg.sandbox.capture_path.as_deref(), Some("/tmp/capture.png"));
    }

    #[tokio::test]
    async fn build_sandbox_uses_capture_file_and_canned_output() {
        use tools::Sandbox;

        let tmp = tempfile::tempdir().expect("tempdir");
        let png = tmp.path().join("shot.png");
        std::fs::write(&png, [0x89, b'P', b'N', b'G']).expect("write png");

        let mut cfg = Config::default();
        cfg.sandbox.capture_path = Some(png.display().to_string());
        cfg.sandbox.command_stdout = "out".to_string();

        let sandbox = cfg.build_sandbox().expect("sandbox");
        assert_eq!(
            sandbox.capture().await.expect("capture"),
            vec![0x89, b'P', b'N', b'G']
        );
        assert_eq!(sandbox.run("ls").await.expect("run").stdout, "out");

        cfg.sandbox.capture_path = Some(tmp.path().join("missing.png").display().to_string());
        assert!(matches!(cfg.build_sandbox(), Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn build_server_binds_the_configured_sandbox() {
        let mut cfg = Config::default();
        cfg.server.name = "lab-desktop".to_string();
        cfg.sandbox.command_stdout = "hi\n".to_string();

        let server = cfg.build_server().expect("server");
        assert!(server.is_bound());
        assert_eq!(server.info(), &PeerInfo::new("lab-desktop", "1.0.0"));
        let result = server
            .call_tool(proto::CallToolRequest::new(
                "bash_command",
                serde_json::json!({"command": "echo hi"}),
            ))
            .await
            .expect("bash");
        assert_eq!(result.first_text(), Some("hi\n"));
    }

    #[test]
    fn build_server_wraps_sandbox_errors_as_config_errors() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = Config::default();
        cfg.sandbox.capture_path = Some(tmp.path().join("missing.png").display().to_string());
        let err = cfg.build_server().err().expect("missing capture");
        assert!(matches!(err, proto::Error::Config(ConfigError::Io(_))));
        assert!(err.to_string().starts_with("Config error:"));
    }
}
