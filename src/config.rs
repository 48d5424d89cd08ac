//! Per-subsystem configuration structs and the YAML-file-plus-CLI-
//! overrides binder.
//!
//! Each struct derives [`serde::Deserialize`] directly rather than
//! walking a generic scalar/sequence/mapping/object visitor over a
//! configuration tree. A config is built by (1) optionally reading a
//! YAML file with `serde_yaml`, then (2) applying
//! `--section.key=value` CLI overrides on top via [`merge_overrides`].

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::book::side::SideKind;
use crate::moldudp::PacerConfig;

/// Errors loading or merging configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("malformed override {raw:?}: expected section.key=value")]
    MalformedOverride { raw: String },
    #[error("failed to apply override {raw:?}: {source}")]
    ApplyOverride {
        raw: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Book-engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    /// `map` or `array`.
    #[serde(rename = "type")]
    pub kind: BookKindConfig,
    /// Array-side dense window width; must be in `(0, 10000]`.
    pub max_size: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        BookConfig {
            kind: BookKindConfig::Array,
            max_size: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookKindConfig {
    Map,
    Array,
}

impl BookConfig {
    /// Resolve to the [`SideKind`] the engine is actually constructed
    /// with, validating `max_size`'s legal bound.
    pub fn side_kind(&self) -> Result<SideKind, ConfigError> {
        match self.kind {
            BookKindConfig::Map => Ok(SideKind::Map),
            BookKindConfig::Array => {
                if self.max_size == 0 || self.max_size > 10_000 {
                    return Err(ConfigError::ApplyOverride {
                        raw: format!("book-config.max-size={}", self.max_size),
                        source: serde::de::Error::custom("max_size must be in (0, 10000]"),
                    });
                }
                Ok(SideKind::Array {
                    max_size: self.max_size,
                })
            }
        }
    }
}

/// MoldUDP pacer configuration, re-exported at the crate root so
/// `--pacer.*` overrides resolve the same way every other config
/// struct's do. [`crate::moldudp::PacerConfig`] already derives
/// `Serialize`/`Deserialize`.
pub type PacerCfg = PacerConfig;

/// etcd coordination-daemon configuration (`--etcd.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Coordination service endpoint, e.g. `http://127.0.0.1:2379`.
    pub endpoint: String,
    /// Desired lease TTL, in milliseconds.
    pub lease_ttl_ms: u64,
    /// Keep-alive refresh ratio: refresh every `actual_ttl / ka_ratio`.
    pub ka_ratio: u32,
    /// Election name (key prefix) to campaign under.
    pub election_name: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        EtcdConfig {
            endpoint: "http://127.0.0.1:2379".to_string(),
            lease_ttl_ms: 5_000,
            ka_ratio: 5,
            election_name: "jaybeams/election".to_string(),
        }
    }
}

/// Admin/control-surface configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 0,
        }
    }
}

impl AdminConfig {
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.host, self.port)
    }
}

/// Resolve the configuration-file search path: a
/// per-program `<PROGRAM>_ROOT` variable, then the generic
/// `JAYBEAMS_ROOT`, falling back to a compiled-in `sysconfdir`.
pub fn search_path(program: &str, file_name: &str) -> PathBuf {
    let program_root = format!("{}_ROOT", program.to_uppercase().replace('-', "_"));
    for var in [program_root.as_str(), "JAYBEAMS_ROOT"] {
        if let Ok(root) = std::env::var(var) {
            return Path::new(&root).join(file_name);
        }
    }
    let sysconfdir = option_env!("JAYBEAMS_SYSCONFDIR").unwrap_or("/etc/jaybeams");
    Path::new(sysconfdir).join(file_name)
}

/// Load a `T: Deserialize` config struct from a YAML file, if it
/// exists; otherwise fall back to `T::default()` (callers decide
/// whether a missing file is fatal — the daemons treat a missing file
/// as "use defaults").
pub fn load_yaml<T: for<'de> Deserialize<'de> + Default>(
    path: Option<&Path>,
) -> Result<T, ConfigError> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply a list of repeated `--section.key=value` flags on top of an
/// already-loaded config, by round-tripping through a
/// [`serde_yaml::Value`] mapping rather than walking a generic visitor
/// over scalar/sequence/mapping/object nodes.
pub fn merge_overrides<T: Serialize + for<'de> Deserialize<'de>>(
    base: T,
    overrides: &[String],
) -> Result<T, ConfigError> {
    let mut value = serde_yaml::to_value(&base).expect("config structs always serialize");
    for raw in overrides {
        let (path, scalar) = raw.split_once('=').ok_or_else(|| ConfigError::MalformedOverride {
            raw: raw.clone(),
        })?;
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(scalar).unwrap_or_else(|_| serde_yaml::Value::String(scalar.to_string()));
        set_path(&mut value, path, parsed).map_err(|source| ConfigError::ApplyOverride {
            raw: raw.clone(),
            source,
        })?;
    }
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<overrides>"),
        source,
    })
}

fn set_path(root: &mut serde_yaml::Value, path: &str, leaf: serde_yaml::Value) -> Result<(), serde_yaml::Error> {
    let mut cursor = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let key = segment.replace('-', "_");
        if !cursor.is_mapping() {
            *cursor = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let mapping = cursor.as_mapping_mut().expect("just ensured mapping");
        let entry = mapping
            .entry(serde_yaml::Value::String(key))
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        if i + 1 == segments.len() {
            *entry = leaf.clone();
            return Ok(());
        }
        cursor = entry;
    }
    Ok(())
}

/// Parse repeatable `--section.key=value` CLI arguments that weren't
/// claimed by `clap`'s typed flags, grouping them in encounter order.
/// Used by daemon `main`s before calling [`merge_overrides`].
pub fn collect_raw_overrides<'a>(args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    args.into_iter()
        .filter(|a| a.contains('.') && a.contains('='))
        .map(str::to_string)
        .collect()
}

/// A small convenience grouping every per-daemon config struct, for
/// daemons (like `coordination-daemon`) that want one `--config` file
/// covering book, pacer, etcd and admin sections at once.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub book: BookConfig,
    pub pacer: PacerCfg,
    pub etcd: EtcdConfig,
    pub admin: AdminConfig,
}

/// Render a config struct back to YAML, for the `/config` admin
/// handler's echo.
pub fn to_yaml<T: Serialize>(value: &T) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|e| format!("# failed to render config: {e}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_config_defaults_to_array_5000() {
        let cfg = BookConfig::default();
        assert_eq!(cfg.kind, BookKindConfig::Array);
        assert_eq!(cfg.max_size, 5_000);
        assert!(matches!(
            cfg.side_kind().unwrap(),
            SideKind::Array { max_size: 5_000 }
        ));
    }

    #[test]
    fn oversized_max_size_is_rejected() {
        let cfg = BookConfig {
            kind: BookKindConfig::Array,
            max_size: 20_000,
        };
        assert!(cfg.side_kind().is_err());
    }

    #[test]
    fn merge_overrides_applies_nested_dotted_keys() {
        let base = BookConfig::default();
        let merged: BookConfig =
            merge_overrides(base, &["max-size=1000".to_string(), "type=map".to_string()]).unwrap();
        assert_eq!(merged.max_size, 1_000);
        assert_eq!(merged.kind, BookKindConfig::Map);
    }

    #[test]
    fn merge_overrides_on_nested_daemon_config() {
        let base = DaemonConfig::default();
        let merged: DaemonConfig = merge_overrides(
            base,
            &[
                "book.max-size=2500".to_string(),
                "etcd.lease-ttl-ms=9000".to_string(),
            ],
        )
        .unwrap();
        assert_eq!(merged.book.max_size, 2_500);
        assert_eq!(merged.etcd.lease_ttl_ms, 9_000);
    }

    #[test]
    fn malformed_override_is_rejected() {
        let base = BookConfig::default();
        assert!(merge_overrides(base, &["no-equals-sign".to_string()]).is_err());
    }

    #[test]
    fn load_yaml_falls_back_to_default_when_file_absent() {
        let cfg: BookConfig = load_yaml(Some(Path::new("/nonexistent/jaybeams.yaml"))).unwrap();
        assert_eq!(cfg, BookConfig::default());
    }

    #[test]
    fn load_yaml_reads_an_actual_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.yaml");
        std::fs::write(&path, "type: map\nmax-size: 777\n").unwrap();
        let cfg: BookConfig = load_yaml(Some(&path)).unwrap();
        assert_eq!(cfg.kind, BookKindConfig::Map);
        assert_eq!(cfg.max_size, 777);
    }

    #[test]
    fn search_path_prefers_program_root_over_generic_root() {
        // SAFETY: test-local env mutation, restored at the end; no
        // other test in this process reads these two variables.
        unsafe {
            std::env::set_var("FEED_HANDLER_ROOT", "/opt/feed-handler");
            std::env::set_var("JAYBEAMS_ROOT", "/opt/generic");
        }
        let path = search_path("feed-handler", "jaybeams.yaml");
        assert_eq!(path, PathBuf::from("/opt/feed-handler/jaybeams.yaml"));
        unsafe {
            std::env::remove_var("FEED_HANDLER_ROOT");
            std::env::remove_var("JAYBEAMS_ROOT");
        }
    }
}
