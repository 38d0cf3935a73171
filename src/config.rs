use std::env;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

/// Server settings, read from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Provision the default floors when the inventory is empty.
    pub seed_rooms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roomledger".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            seed_rooms: false,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("ROOMLEDGER_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "ROOMLEDGER_PORT").unwrap_or(defaults.port),
            data_dir: lookup("ROOMLEDGER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("ROOMLEDGER_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "ROOMLEDGER_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "ROOMLEDGER_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "ROOMLEDGER_METRICS_PORT"),
            tls_cert: lookup("ROOMLEDGER_TLS_CERT"),
            tls_key: lookup("ROOMLEDGER_TLS_KEY"),
            seed_rooms: lookup("ROOMLEDGER_SEED_ROOMS")
                .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hotel.wal")
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

/// Build a TLS acceptor from PEM files. Both paths or neither.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "ROOMLEDGER_TLS_CERT and ROOMLEDGER_TLS_KEY must be set together",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/hotel.wal"));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("ROOMLEDGER_PORT", "6543"),
            ("ROOMLEDGER_MAX_CONNECTIONS", "lots"),
            ("ROOMLEDGER_METRICS_PORT", "9100"),
            ("ROOMLEDGER_DATA_DIR", "/var/lib/hotel"),
            ("ROOMLEDGER_SEED_ROOMS", "TRUE"),
        ]));
        assert_eq!(config.port, 6543);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/hotel/hotel.wal"));
        assert!(config.seed_rooms);
    }

    #[test]
    fn tls_needs_both_halves() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
        let err = load_tls_acceptor(Some("cert.pem"), None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
