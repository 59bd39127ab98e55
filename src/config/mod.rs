//! Connection constants and inventory for the hosts under test.
//!
//! Values are merged from built-in defaults, an optional TOML file and
//! environment variables, in that order of increasing precedence:
//!
//! - `CERTCHECK_PKI_BIN`: path of the `pki` client
//! - `CERTCHECK_NSSDB`: client NSS database directory
//! - `CERTCHECK_NSSDB_PASSWORD`: NSS database password
//! - `CERTCHECK_HOSTNAME`: server hostname passed to `pki -h`
//! - `CERTCHECK_PROTOCOL`: `https` (default) or `http`
//! - `CERTCHECK_TRANSPORT`: `local` (default) or `ssh`
//! - `CERTCHECK_<SUBSYSTEM>_PORT`: e.g. `CERTCHECK_TPS_PORT=25443`


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

const ENV_PREFIX: &str = "CERTCHECK_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Local,
    Ssh,
}

impl Transport {
    /// Parse a transport name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "ssh" => Some(Self::Ssh),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PkiSettings {
    pub binary: String,
    pub nssdb: String,
    pub nssdb_password: Option<String>,
    pub hostname: Option<String>,
    pub protocol: String,
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            binary: "pki".to_string(),
            nssdb: "/opt/pkitest/certdb".to_string(),
            nssdb_password: None,
            hostname: None,
            protocol: "https".to_string(),
        }
    }
}

// Custom Debug masks the password so the struct is safe to log.
impl std::fmt::Debug for PkiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkiSettings")
            .field("binary", &self.binary)
            .field("nssdb", &self.nssdb)
            .field(
                "nssdb_password",
                &self.nssdb_password.as_deref().map(|_| "<redacted>"),
            )
            .field("hostname", &self.hostname)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Inventory {
    pub transport: Transport,
    pub default_group: String,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            transport: Transport::Local,
            default_group: "master".to_string(),
            groups: BTreeMap::new(),
        }
    }
}

impl Inventory {
    /// Hosts of `group`. Under the local transport every group is the
    /// machine itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the ssh transport is selected and the group is
    /// unknown or lists no hosts.
    pub fn hosts(&self, group: &str) -> anyhow::Result<Vec<String>> {
        match self.transport {
            Transport::Local => Ok(vec!["localhost".to_string()]),
            Transport::Ssh => {
                let hosts = self
                    .groups
                    .get(group)
                    .ok_or_else(|| anyhow::anyhow!("unknown inventory group: {group}"))?;
                if hosts.is_empty() {
                    anyhow::bail!("inventory group {group} has no hosts");
                }
                Ok(hosts.clone())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub pki: PkiSettings,
    /// HTTPS port per subsystem, keyed by lowercase subsystem name.
    pub ports: BTreeMap<String, u16>,
    pub inventory: Inventory,
}

impl Default for Settings {
    fn default() -> Self {
        let ports = [
            ("ca", 20443),
            ("kra", 21443),
            ("ocsp", 22443),
            ("tks", 23443),
            ("tps", 25443),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            pki: PkiSettings::default(),
            ports,
            inventory: Inventory::default(),
        }
    }
}

impl Settings {
    /// Port bound to `subsystem` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if no port is configured for the subsystem.
    pub fn port_for(&self, subsystem: &str) -> anyhow::Result<u16> {
        let key = subsystem.to_ascii_lowercase();
        self.ports
            .get(&key)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no port configured for subsystem {subsystem}"))
    }

    /// Parse settings from TOML, filling unspecified fields with defaults.
    /// Ports from the file are merged over the default port table.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or has unknown keys.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let Self {
            pki,
            ports: file_ports,
            inventory,
        } = toml::from_str(text)?;
        let mut ports = Self::default().ports;
        ports.extend(
            file_ports
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v)),
        );
        Ok(Self {
            pki,
            ports,
            inventory,
        })
    }

    /// Apply `CERTCHECK_*` overrides from `vars`. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "PKI_BIN" => self.pki.binary = value,
                "NSSDB" => self.pki.nssdb = value,
                "NSSDB_PASSWORD" => self.pki.nssdb_password = Some(value),
                "HOSTNAME" => self.pki.hostname = Some(value),
                "PROTOCOL" => self.pki.protocol = value,
                "TRANSPORT" => match Transport::parse(&value) {
                    Some(t) => self.inventory.transport = t,
                    None => tracing::warn!("ignoring {key}={value:?}: expected local or ssh"),
                },
                other => {
                    let Some(subsystem) = other.strip_suffix("_PORT") else {
                        continue;
                    };
                    if subsystem.is_empty() {
                        continue;
                    }
                    match value.parse::<u16>() {
                        Ok(port) if port != 0 => {
                            self.ports.insert(subsystem.to_ascii_lowercase(), port);
                        }
                        _ => tracing::warn!(
                            "ignoring {key}={value:?}: not a valid port number (1-65535)"
                        ),
                    }
                }
            }
        }
    }
}

/// Default settings file: `{config_dir}/certcheck/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("certcheck").join("config.toml"))
}

/// Read settings from `path`. Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn try_load_file(path: &Path) -> anyhow::Result<Option<Settings>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("failed to read config file: {}", path.display())));
        }
    };
    let settings = Settings::from_toml(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(Some(settings))
}

/// Load settings: defaults, then the config file, then the environment.
///
/// An explicit `path` must exist; the default location is optional.
///
/// # Errors
///
/// Returns an error if the explicit file is missing, or any file that exists
/// cannot be read or parsed.
pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(p) => try_load_file(p)?
            .ok_or_else(|| anyhow::anyhow!("config file not found: {}", p.display()))?,
        None => match default_config_path() {
            Some(p) => try_load_file(&p)?.unwrap_or_default(),
            None => Settings::default(),
        },
    };
    settings.apply_env(std::env::vars());
    tracing::debug!(?settings, "settings loaded");
    Ok(settings)
}
