//! Configuration loading.
//!
//! Settings are a flat string map: built-in defaults, overlaid by
//! `~/.config/imessages-ai/config` (shell-style `KEY=VALUE` lines), overlaid
//! by environment variables. An environment variable only counts when it is
//! set and non-empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const MODEL: &str = "MODEL";
pub const MAX_TOKENS: &str = "MAX_TOKENS";
pub const TRIGGER_PREFIX: &str = "TRIGGER_PREFIX";
pub const POLL_INTERVAL: &str = "POLL_INTERVAL";
pub const ITALIC: &str = "ITALIC";
pub const MESSAGES_DB: &str = "MESSAGES_DB";
pub const LOG_DIR: &str = "LOG_DIR";

const DEFAULTS: &[(&str, &str)] = &[
    (OPENAI_API_KEY, ""),
    (MODEL, "gpt-4o"),
    (MAX_TOKENS, "1024"),
    (TRIGGER_PREFIX, "@"),
    (POLL_INTERVAL, "2"),
    (ITALIC, "true"),
    (MESSAGES_DB, ""),
    (LOG_DIR, ""),
];

/// Application directories under the user's home.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub messages_db: PathBuf,
}

impl Paths {
    pub fn from_home(home: &Path) -> Self {
        Self {
            config_file: home.join(".config").join("imessages-ai").join("config"),
            log_dir: home.join("Library").join("Logs").join("imessages-ai"),
            messages_db: crate::store::ChatDb::default_path(home),
        }
    }

    /// Resolve from `$HOME`, falling back to the current directory.
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::from_home(Path::new(&home))
    }
}

/// Flat key/value settings with source precedence applied.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Defaults only.
    pub fn defaults() -> Self {
        Self {
            values: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Overlay `KEY=VALUE` lines. Blank lines, `#` comments and lines without
    /// `=` are ignored; one layer of surrounding quotes is stripped.
    pub fn merge_file_contents(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            let value = value.strip_prefix('\'').unwrap_or(value);
            let value = value.strip_suffix('\'').unwrap_or(value);
            self.values.insert(key.trim().to_string(), value.to_string());
        }
    }

    /// Overlay the config file if it exists.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(path)?;
        self.merge_file_contents(&contents);
        Ok(())
    }

    /// Let `lookup` override every known key. Empty values are ignored.
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, value) in self.values.iter_mut() {
            if let Some(env_value) = lookup(key).filter(|v| !v.is_empty()) {
                *value = env_value;
            }
        }
    }

    pub fn merge_env(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Defaults, then the file at `path`, then the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::defaults();
        settings.merge_file(path)?;
        settings.merge_env();
        Ok(settings)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }
}

/// Typed configuration for the responder.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u64,
    pub trigger_prefix: String,
    pub poll_interval: Duration,
    pub italic: bool,
    pub messages_db: PathBuf,
    pub log_dir: PathBuf,
}

impl Config {
    /// Validate settings. `paths` supplies locations not overridden in `settings`.
    pub fn from_settings(settings: &Settings, paths: &Paths) -> Result<Self, ConfigError> {
        let api_key = settings.get_or_empty(OPENAI_API_KEY);
        if api_key.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: OPENAI_API_KEY.to_string(),
                hint: format!(
                    "Set it in {} or export {}=sk-...",
                    paths.config_file.display(),
                    OPENAI_API_KEY
                ),
            });
        }

        let trigger_prefix = settings.get_or_empty(TRIGGER_PREFIX).to_string();
        if trigger_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: TRIGGER_PREFIX.to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let poll_secs = parse_number::<u64>(settings, POLL_INTERVAL)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: POLL_INTERVAL.to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            api_key: SecretString::from(api_key.to_string()),
            model: settings.get_or_empty(MODEL).to_string(),
            max_tokens: parse_number(settings, MAX_TOKENS)?,
            trigger_prefix,
            poll_interval: Duration::from_secs(poll_secs),
            italic: parse_flag(settings.get_or_empty(ITALIC)),
            messages_db: path_or(settings.get_or_empty(MESSAGES_DB), &paths.messages_db),
            log_dir: resolve_log_dir(settings, paths),
        })
    }
}

/// Log directory, available before the rest of the config is validated.
pub fn resolve_log_dir(settings: &Settings, paths: &Paths) -> PathBuf {
    path_or(settings.get_or_empty(LOG_DIR), &paths.log_dir)
}

/// `true`, `1` and `yes` (any case) are on; everything else is off.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_number<T: std::str::FromStr>(settings: &Settings, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = settings.get_or_empty(key);
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn path_or(value: &str, fallback: &Path) -> PathBuf {
    if value.trim().is_empty() {
        fallback.to_path_buf()
    } else {
        PathBuf::from(value.trim())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn paths() -> Paths {
        Paths::from_home(Path::new("/Users/me"))
    }

    fn settings_with(pairs: &[(&str, &str)]) -> Settings {
        let mut settings = Settings::defaults();
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        settings.merge_env_with(|k| env.get(k).cloned());
        settings
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::defaults();
        assert_eq!(s.get(MODEL), Some("gpt-4o"));
        assert_eq!(s.get(MAX_TOKENS), Some("1024"));
        assert_eq!(s.get(TRIGGER_PREFIX), Some("@"));
        assert_eq!(s.get(POLL_INTERVAL), Some("2"));
        assert_eq!(s.get(ITALIC), Some("true"));
        assert_eq!(s.get(OPENAI_API_KEY), Some(""));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut s = Settings::defaults();
        s.merge_file_contents(
            "# comment\n\nOPENAI_API_KEY=\"sk-file\"\nMODEL='gpt-4o-mini'\n  TRIGGER_PREFIX = !ai \nnot a pair\nCUSTOM=x=y\n",
        );
        assert_eq!(s.get(OPENAI_API_KEY), Some("sk-file"));
        assert_eq!(s.get(MODEL), Some("gpt-4o-mini"));
        assert_eq!(s.get(TRIGGER_PREFIX), Some("!ai"));
        assert_eq!(s.get("CUSTOM"), Some("x=y"));
        assert_eq!(s.get(POLL_INTERVAL), Some("2"));
    }

    #[test]
    fn env_overrides_file_but_not_when_empty() {
        let mut s = Settings::defaults();
        s.merge_file_contents("MODEL=from-file\nMAX_TOKENS=256\nEXTRA=file");
        let env: HashMap<&str, &str> = HashMap::from([
            ("MODEL", "from-env"),
            ("MAX_TOKENS", ""),
            ("EXTRA", "env"),
            ("UNKNOWN", "ignored"),
        ]);
        s.merge_env_with(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.get(MODEL), Some("from-env"));
        assert_eq!(s.get(MAX_TOKENS), Some("256"));
        assert_eq!(s.get("EXTRA"), Some("env"));
        assert_eq!(s.get("UNKNOWN"), None);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Settings::defaults();
        s.merge_file(&dir.path().join("config")).unwrap();
        assert_eq!(s.get(MODEL), Some("gpt-4o"));
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "POLL_INTERVAL=5\nITALIC=false\n").unwrap();
        let mut s = Settings::defaults();
        s.merge_file(&path).unwrap();
        assert_eq!(s.get(POLL_INTERVAL), Some("5"));
        assert_eq!(s.get(ITALIC), Some("false"));
    }

    #[test]
    fn config_requires_api_key() {
        let err = Config::from_settings(&Settings::defaults(), &paths()).unwrap_err();
        match err {
            ConfigError::MissingRequired { key, hint } => {
                assert_eq!(key, OPENAI_API_KEY);
                assert!(hint.contains("/Users/me/.config/imessages-ai/config"));
            }
            other => panic!("expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn config_from_defaults_and_key() {
        let cfg = Config::from_settings(&settings_with(&[("OPENAI_API_KEY", "sk-test")]), &paths()).unwrap();
        assert_eq!(cfg.api_key.expose_secret(), "sk-test");
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.max_tokens, 1024);
        assert_eq!(cfg.trigger_prefix, "@");
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert!(cfg.italic);
        assert_eq!(cfg.messages_db, PathBuf::from("/Users/me/Library/Messages/chat.db"));
        assert_eq!(cfg.log_dir, PathBuf::from("/Users/me/Library/Logs/imessages-ai"));
    }

    #[test]
    fn config_path_overrides() {
        let cfg = Config::from_settings(
            &settings_with(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("MESSAGES_DB", "/tmp/chat.db"),
                ("LOG_DIR", "/tmp/logs"),
            ]),
            &paths(),
        )
        .unwrap();
        assert_eq!(cfg.messages_db, PathBuf::from("/tmp/chat.db"));
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_settings(
            &settings_with(&[("OPENAI_API_KEY", "sk-test"), ("POLL_INTERVAL", "soon")]),
            &paths(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == POLL_INTERVAL));

        let err = Config::from_settings(
            &settings_with(&[("OPENAI_API_KEY", "sk-test"), ("POLL_INTERVAL", "0")]),
            &paths(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = Config::from_settings(
            &settings_with(&[("OPENAI_API_KEY", "sk-test"), ("MAX_TOKENS", "-5")]),
            &paths(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == MAX_TOKENS));
    }

    #[test]
    fn flag_parsing() {
        for on in ["true", "TRUE", "1", "yes", " Yes "] {
            assert!(parse_flag(on), "{on}");
        }
        for off in ["false", "0", "no", "", "on"] {
            assert!(!parse_flag(off), "{off}");
        }
    }
}
