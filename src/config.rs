//! Runtime configuration
//!
//! Configuration is resolved exactly once in `main` from CLI flags, their
//! environment overrides, an optional TOML file and built-in defaults (highest
//! precedence first). The resulting [`Config`] is immutable and handed to the
//! certificate issuer and the webhook server by value.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Port the webhook listens on when nothing else is configured
pub const DEFAULT_PORT: u16 = 8443;

/// Directory bootstrapped certificates are written to
pub const DEFAULT_CERT_DIR: &str = "/etc/kgv/certs";

/// Config file picked up implicitly when present
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kgv/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Only one half of the certificate/key pair was configured
    #[error("both --tls-cert and --tls-key must be set (got only {0})")]
    IncompleteTlsPair(&'static str),

    /// A configured path does not exist on disk
    #[error("configured file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// The listen port is unusable
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    /// The config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`ConfigFile`]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Log output format
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Flags of the `start` subcommand
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Port where to listen for requests [default: 8443]
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// TLS certificate for the HTTPS server
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS key for the HTTPS server
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Directory for bootstrapped certificates when no cert/key is given
    /// [default: /etc/kgv/certs]
    #[arg(long, env = "KGV_CERT_DIR")]
    pub cert_dir: Option<PathBuf>,

    /// Extra DNS names for a bootstrapped server certificate
    #[arg(long = "dns-name", env = "KGV_DNS_NAMES", value_delimiter = ',')]
    pub dns_names: Vec<String>,

    /// TOML config file [default: /etc/kgv/config.toml, if present]
    #[arg(long, env = "KGV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "KGV_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// On-disk configuration. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    pub port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
    #[serde(default)]
    pub dns_names: Vec<String>,
}

impl ConfigFile {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read the file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Load the explicitly requested file, or the default one if it exists.
    ///
    /// An explicit path that does not exist is an error; a missing default is not.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) if !path.exists() => Err(ConfigError::MissingFile(path.to_path_buf())),
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Where the server's TLS material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsSource {
    /// Operator-supplied certificate and key, both verified to exist
    Provided { cert: PathBuf, key: PathBuf },
    /// Generate (or reuse) a self-signed pair in this directory
    Bootstrap { dir: PathBuf },
}

/// Immutable runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub tls: TlsSource,
    /// DNS SANs added to a bootstrapped leaf certificate
    pub dns_names: Vec<String>,
}

impl Config {
    /// Resolve configuration from CLI arguments plus the discovered config file
    pub fn from_args(args: &StartArgs) -> Result<Self, ConfigError> {
        let file = ConfigFile::discover(args.config.as_deref())?;
        Self::resolve(args, file)
    }

    /// Merge CLI arguments over a parsed config file and validate the result
    pub fn resolve(args: &StartArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }

        let cert = non_empty(args.tls_cert.clone()).or_else(|| non_empty(file.tls_cert.clone()));
        let key = non_empty(args.tls_key.clone()).or_else(|| non_empty(file.tls_key.clone()));

        let tls = match (cert, key) {
            (None, None) => TlsSource::Bootstrap {
                dir: args
                    .cert_dir
                    .clone()
                    .or(file.cert_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_DIR)),
            },
            (Some(_), None) => return Err(ConfigError::IncompleteTlsPair("--tls-cert")),
            (None, Some(_)) => return Err(ConfigError::IncompleteTlsPair("--tls-key")),
            (Some(cert), Some(key)) => {
                for path in [&cert, &key] {
                    if !path.exists() {
                        return Err(ConfigError::MissingFile(path.clone()));
                    }
                }
                TlsSource::Provided { cert, key }
            }
        };

        let dns_names = if args.dns_names.is_empty() {
            file.dns_names
        } else {
            args.dns_names.clone()
        };

        Ok(Self {
            port,
            tls,
            dns_names,
        })
    }

    /// Address the TLS listener binds to (all interfaces)
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}
