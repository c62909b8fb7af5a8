//! Server configuration: built-in defaults, then an optional TOML file, then
//! `SLUICE_`-prefixed environment variables. Nested keys are separated by
//! `__` in the environment, e.g. `SLUICE_RUNTIME__IO_MODE=handshake`.
use crate::errors::RemoteResult;
use crate::proxy::ProxyBackend;
use crate::socket::Endpoint;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use sluice_engine::backend::{Compiler, DaemonBackend, DaemonConfig, SimBackend};
use sluice_engine::configuration::RuntimeConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Forward compiles to another server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `host:port` or `unix:<path>`
    pub endpoint: String,
    /// the back end the other server should compile with
    #[serde(default = "ProxyConfig::default_backend")]
    pub backend: String,
}

impl ProxyConfig {
    fn default_backend() -> String {
        "sim".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The TCP listener's address. Port 0 picks a free port.
    pub address: String,
    pub port: u16,
    /// Also listen on this filesystem path
    pub path: Option<PathBuf>,
    /// Threads for compiles and open-loop runs
    pub workers: usize,
    /// How long the dispatch loop sleeps waiting for input
    pub poll_timeout_ms: u64,
    /// Bound on any single length-prefixed field of a message
    pub max_message_bytes: usize,
    pub runtime: RuntimeConfig,
    pub daemon: Option<DaemonConfig>,
    pub proxy: Option<ProxyConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8800,
            path: Some(PathBuf::from("./sluice_sock")),
            workers: 8,
            poll_timeout_ms: 10,
            max_message_bytes: 64 << 20,
            runtime: RuntimeConfig::default(),
            daemon: None,
            proxy: None,
        }
    }
}

impl ServerConfig {
    /// The layered sources, without extracting them.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment =
            Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("SLUICE_").split("__"))
    }

    pub fn load(file: Option<&Path>) -> RemoteResult<Self> {
        if let Some(file) = file.filter(|f| !f.exists()) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no configuration file at {}", file.display()),
            )
            .into());
        }
        Ok(Self::figment(file).extract()?)
    }

    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// The back ends this configuration enables. `sim` is always present.
    pub fn compiler(&self) -> RemoteResult<Compiler> {
        let mut compiler = Compiler::new();
        compiler.register(SimBackend);
        if let Some(daemon) = &self.daemon {
            compiler.register(DaemonBackend::new(daemon.clone()));
        }
        if let Some(proxy) = &self.proxy {
            let endpoint: Endpoint = proxy.endpoint.parse()?;
            compiler.register(ProxyBackend::new(
                endpoint,
                proxy.backend.clone(),
                self.max_message_bytes,
            ));
        }
        Ok(compiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use sluice_opt::IoMode;
    use std::io::Write;

    #[test]
    fn files_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 9000
workers = 2

[runtime]
io_mode = "handshake"

[proxy]
endpoint = "unix:/tmp/upstream"
"#
        )
        .unwrap();
        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 2);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.runtime.io_mode, IoMode::Handshake);
        let proxy = config.proxy.as_ref().unwrap();
        assert_eq!(proxy.backend, "sim");
        assert_eq!(config.compiler().unwrap().names(), vec!["proxy", "sim"]);
    }

    #[test]
    fn missing_files_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.toml");
        let err = ServerConfig::load(Some(&absent)).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Io(ref e) if e.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn ill_typed_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"eighty\"").unwrap();
        assert!(matches!(
            ServerConfig::load(Some(file.path())),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn malformed_proxy_endpoints_are_rejected() {
        let config = ServerConfig {
            proxy: Some(ProxyConfig {
                endpoint: "nowhere".to_string(),
                backend: "sim".to_string(),
            }),
            ..Default::default()
        };
        assert!(matches!(config.compiler(), Err(RemoteError::Endpoint(_))));
    }
}
