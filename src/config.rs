//! Configuration loading for the RC8 daemon

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;
use crate::cache::CachePolicy;
use crate::position::PositionPolicy;
use crate::transport::ControllerSpec;
use crate::{RC8Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub controller: Option<ConnectionConfig>,
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: Option<u64>,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub machine: Option<String>,
    pub option: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub variables: CachePolicy,
    pub preload: Option<bool>,
    pub position: Option<PositionPolicy>,
}

impl DaemonConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading daemon config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = serde_yaml::from_str(contents)?;
        if let Some(controller) = &config.controller {
            controller.validate()?;
        }
        Ok(config)
    }

    /// Get cache configuration with defaults
    pub fn cache(&self) -> CacheConfig {
        self.cache.clone().unwrap_or_default()
    }
}

impl ConnectionConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RC8Error::Config("controller.host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(RC8Error::Config("controller.port must be nonzero".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(RC8Error::Config("controller.timeout_ms must be nonzero".to_string()));
        }
        Ok(())
    }

    /// Get connection timeout with default fallback
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS)
    }

    /// Controller object parameters, falling back to the VRC provider on localhost
    pub fn controller_spec(&self) -> ControllerSpec {
        let defaults = ControllerSpec::default();
        ControllerSpec {
            name: self.name.clone().unwrap_or(defaults.name),
            provider: self.provider.clone().unwrap_or(defaults.provider),
            machine: self.machine.clone().unwrap_or(defaults.machine),
            option: self.option.clone().unwrap_or(defaults.option),
        }
    }
}

impl CacheConfig {
    /// Whether to open every variable handle at start (persistent policy only)
    pub fn preload(&self) -> bool {
        self.preload.unwrap_or(false)
    }

    /// Position handling, `release` under on-demand and `hold` otherwise
    pub fn position(&self) -> PositionPolicy {
        self.position.unwrap_or(match self.variables {
            CachePolicy::OnDemand => PositionPolicy::Release,
            CachePolicy::Persistent | CachePolicy::Lazy => PositionPolicy::Hold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DEFAULT_PROVIDER;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::load_from_str("{}").unwrap();
        assert!(config.controller.is_none());
        let cache = config.cache();
        assert_eq!(cache.variables, CachePolicy::Lazy);
        assert!(!cache.preload());
        assert_eq!(cache.position(), PositionPolicy::Hold);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
controller:
  host: 192.168.0.1
  port: 5007
  timeout_ms: 1500
  machine: rc8-cell-2
cache:
  variables: on_demand
"#;
        let config = DaemonConfig::load_from_str(yaml).unwrap();
        let controller = config.controller.as_ref().unwrap();
        assert_eq!(controller.host, "192.168.0.1");
        assert_eq!(controller.port, 5007);
        assert_eq!(controller.timeout_ms(), 1500);

        let spec = controller.controller_spec();
        assert_eq!(spec.provider, DEFAULT_PROVIDER);
        assert_eq!(spec.machine, "rc8-cell-2");

        let cache = config.cache();
        assert_eq!(cache.variables, CachePolicy::OnDemand);
        assert_eq!(cache.position(), PositionPolicy::Release);
    }

    #[test]
    fn test_explicit_position_policy_wins() {
        let yaml = "cache:\n  variables: on_demand\n  position: hold\n";
        let config = DaemonConfig::load_from_str(yaml).unwrap();
        assert_eq!(config.cache().position(), PositionPolicy::Hold);
    }

    #[test]
    fn test_invalid_controller_rejected() {
        let yaml = "controller:\n  host: ''\n  port: 5007\n";
        assert!(matches!(DaemonConfig::load_from_str(yaml), Err(RC8Error::Config(_))));

        let yaml = "controller:\n  host: 10.0.0.1\n  port: 5007\n  timeout_ms: 0\n";
        assert!(matches!(DaemonConfig::load_from_str(yaml), Err(RC8Error::Config(_))));
    }

    #[test]
    fn test_unknown_policy_is_yaml_error() {
        let yaml = "cache:\n  variables: forever\n";
        assert!(matches!(DaemonConfig::load_from_str(yaml), Err(RC8Error::Yaml(_))));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "controller:\n  host: localhost\n  port: 5007\ncache:\n  variables: persistent\n  preload: true").unwrap();

        let config = DaemonConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.controller.as_ref().unwrap().timeout_ms(), ConnectionConfig::DEFAULT_TIMEOUT_MS);
        assert!(config.cache().preload());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = DaemonConfig::load_from_path(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(RC8Error::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
