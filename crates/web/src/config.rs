//! Server settings, read from the environment

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use shogi_analyzer_core::{Error, Result};

pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub static_dir: PathBuf,
    /// Exit instead of serving in degraded mode when the engine fails to start
    pub require_engine: bool,
}

impl ServerConfig {
    /// Reads `HOST`, `PORT`, `STATIC_DIR` and `REQUIRE_ENGINE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host: IpAddr = match lookup("HOST") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("HOST is not an IP address: '{}'", raw)))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port: u16 = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a port number: '{}'", raw)))?,
            None => 3000,
        };
        let static_dir = lookup("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("public"));
        let require_engine = match lookup("REQUIRE_ENGINE").as_deref().map(str::trim) {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(Error::Config(format!(
                    "REQUIRE_ENGINE must be true or false, got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            host,
            port,
            static_dir,
            require_engine,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
