use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::auth::Credentials;
use crate::permission::{Grant, GrantTable};

pub const WAL_FILE_NAME: &str = "operating_hours.wal";

/// Server settings, read once from `OPSHOURS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    /// `user:password` pairs; when non-empty only these users may log in.
    pub users: Vec<(String, String)>,
    pub admins: Vec<String>,
    pub grants_file: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5434,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "opshours".into(),
            users: Vec::new(),
            admins: Vec::new(),
            grants_file: None,
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let mut config = Self::default();
        if let Some(v) = get("OPSHOURS_PORT") {
            config.port = parse_var("OPSHOURS_PORT", &v)?;
        }
        if let Some(v) = get("OPSHOURS_BIND") {
            config.bind = v;
        }
        if let Some(v) = get("OPSHOURS_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OPSHOURS_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = get("OPSHOURS_USERS") {
            config.users = parse_users(&v)?;
        }
        if let Some(v) = get("OPSHOURS_ADMINS") {
            config.admins = split_list(&v).map(str::to_string).collect();
        }
        config.grants_file = get("OPSHOURS_GRANTS_FILE").map(PathBuf::from);
        if let Some(v) = get("OPSHOURS_MAX_CONNECTIONS") {
            config.max_connections = parse_var("OPSHOURS_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("OPSHOURS_COMPACT_THRESHOLD") {
            config.compact_threshold = parse_var("OPSHOURS_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("OPSHOURS_METRICS_PORT") {
            config.metrics_port = Some(parse_var("OPSHOURS_METRICS_PORT", &v)?);
        }
        config.tls_cert = get("OPSHOURS_TLS_CERT");
        config.tls_key = get("OPSHOURS_TLS_KEY");
        config.check_grantees_authenticate()?;
        Ok(config)
    }

    /// Grants are keyed by login name, so a granted name must not be
    /// claimable with the shared password.
    fn check_grantees_authenticate(&self) -> io::Result<()> {
        if self.users.is_empty() {
            if !self.admins.is_empty() || self.grants_file.is_some() {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "OPSHOURS_ADMINS and OPSHOURS_GRANTS_FILE require OPSHOURS_USERS",
                ));
            }
            return Ok(());
        }
        match self
            .admins
            .iter()
            .find(|admin| !self.users.iter().any(|(user, _)| user == *admin))
        {
            Some(admin) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("OPSHOURS_ADMINS: {admin} is not listed in OPSHOURS_USERS"),
            )),
            None => Ok(()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn credentials(&self) -> Credentials {
        self.users
            .iter()
            .fold(Credentials::shared(&*self.password), |creds, (user, pw)| {
                creds.with_user(user.as_str(), pw.as_str())
            })
    }

    /// Admin grants followed by the grants file, if any.
    pub fn grant_table(&self) -> io::Result<GrantTable> {
        let mut table = match &self.grants_file {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                GrantTable::from_json(&json)
                    .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?
            }
            None => GrantTable::default(),
        };
        for admin in &self.admins {
            table.push(Grant::admin(admin.as_str()));
        }
        Ok(table)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> io::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("{key}={value}: {e}")))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_users(value: &str) -> io::Result<Vec<(String, String)>> {
    split_list(value)
        .map(|pair| match pair.split_once(':') {
            Some((user, pw)) if !user.is_empty() => Ok((user.to_string(), pw.to_string())),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("OPSHOURS_USERS: expected user:password, got {pair:?}"),
            )),
        })
        .collect()
}

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
                "both OPSHOURS_TLS_CERT and OPSHOURS_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
