//! YAML loader with custom tag support
//!
//! - `!include path` - Include another YAML file, relative to the including one
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, to detect circular includes
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Yaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let v = self.process_value(v, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let path = self.include_path(&tagged.value, source_path)?;
                self.load_file(path)
            }
            "!secret" => {
                let key = scalar_string(&tagged.value, "!secret")?;
                Ok(Value::String(self.secrets.get(&key)?.to_string()))
            }
            "!env_var" => {
                let arg = scalar_string(&tagged.value, "!env_var")?;
                env_var(&arg).map(Value::String)
            }
            _ => {
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    /// Resolve an include path relative to the file that includes it
    fn include_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(path) = value else {
            return Err(ConfigError::BadInclude {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };

        if Path::new(path).is_absolute() {
            return Ok(PathBuf::from(path));
        }
        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        Ok(base_dir.join(path))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn scalar_string(value: &Value, tag: &str) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(ConfigError::InvalidValue {
            key: tag.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// `NAME` or `NAME default value`
fn env_var(arg: &str) -> ConfigResult<String> {
    let (name, default) = match arg.trim().split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (arg.trim(), None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.get(key).unwrap()
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "plates/hall.yaml", "topic: hasp/hall\n");
        write_file(dir.path(), "plates/all.yaml", "hall: !include hall.yaml\n");
        write_file(dir.path(), "config.yaml", "openhasp: !include plates/all.yaml\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let topic = get(get(get(&value, "openhasp"), "hall"), "topic");
        assert_eq!(topic.as_str(), Some("hasp/hall"));
    }

    #[test]
    fn test_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "mqtt_password: secret123\n");
        write_file(dir.path(), "config.yaml", "password: !secret mqtt_password\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(&value, "password").as_str(), Some("secret123"));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "password: !secret nonexistent\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::MissingSecret { .. })));
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HASP_CONFIG_TEST_HOST", "broker.lan");
        write_file(
            dir.path(),
            "config.yaml",
            "host: !env_var HASP_CONFIG_TEST_HOST\nport: !env_var HASP_CONFIG_TEST_UNSET 1884\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(get(&value, "host").as_str(), Some("broker.lan"));
        assert_eq!(get(&value, "port").as_str(), Some("1884"));

        std::env::remove_var("HASP_CONFIG_TEST_HOST");
    }

    #[test]
    fn test_env_var_missing() {
        assert!(matches!(
            env_var("HASP_CONFIG_TEST_NEVER_SET"),
            Err(ConfigError::MissingEnvVar { .. })
        ));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }
}
