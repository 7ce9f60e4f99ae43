use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CatmanduConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "catmandu.toml",
    "catmandu.yaml",
    "catmandu.yml",
    "catmandu.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CatmanduConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./catmandu.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/catmandu/catmandu.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CatmanduConfig::default()` if no config file is found or the
/// file fails to parse. Env overrides are applied in every case.
pub fn discover_and_load() -> CatmanduConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                CatmanduConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            CatmanduConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/catmandu/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "catmandu").map(|d| d.config_dir().to_path_buf())
}

/// Apply `CATMANDU_*` environment variable overrides on top of file config.
pub fn apply_env_overrides(config: &mut CatmanduConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut CatmanduConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = parse_override::<usize>(&lookup, "CATMANDU_MAX_MESSAGES") {
        config.accumulator.max_messages = v;
    }
    if let Some(v) = parse_override::<usize>(&lookup, "CATMANDU_MAX_MESSAGE_LENGTH") {
        config.accumulator.max_message_length = v;
    }
    if let Some(raw) = lookup("CATMANDU_FEEDBACK_ENABLED") {
        match parse_bool(&raw) {
            Some(v) => config.accumulator.feedback_enabled = v,
            None => warn!(value = %raw, "ignoring CATMANDU_FEEDBACK_ENABLED: not a boolean"),
        }
    }
    if let Some(dir) = lookup("CATMANDU_HANDLERS_DIR").filter(|d| !d.trim().is_empty()) {
        config.handlers.dir = PathBuf::from(dir);
    }
    if let Some(dir) = lookup("CATMANDU_CHAT_LOGS_DIR").filter(|d| !d.trim().is_empty()) {
        config.chat_log.dir = PathBuf::from(dir);
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = %name, value = %raw, "ignoring unparsable env override");
            None
        },
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CatmanduConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest, std::collections::HashMap};

    #[rstest]
    #[case("catmandu.toml", "[accumulator]\nmax_messages = 7\n")]
    #[case("catmandu.yaml", "accumulator:\n  max_messages: 7\n")]
    #[case("catmandu.json", r#"{"accumulator": {"max_messages": 7}}"#)]
    fn loads_every_supported_format(#[case] file: &str, #[case] body: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file);
        std::fs::write(&path, body).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.accumulator.max_messages, 7);
        assert_eq!(cfg.accumulator.max_message_length, 1000);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catmandu.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains(".ini"));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CATMANDU_MAX_MESSAGES", "5"),
            ("CATMANDU_FEEDBACK_ENABLED", "off"),
            ("CATMANDU_HANDLERS_DIR", "/opt/handlers"),
            ("CATMANDU_CHAT_LOGS_DIR", "/var/log/catmandu"),
        ]);
        let mut cfg = CatmanduConfig::default();
        apply_env_overrides_with(&mut cfg, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.accumulator.max_messages, 5);
        assert!(!cfg.accumulator.feedback_enabled);
        assert_eq!(cfg.handlers.dir, PathBuf::from("/opt/handlers"));
        assert_eq!(cfg.chat_log.dir, PathBuf::from("/var/log/catmandu"));
        assert_eq!(cfg.accumulator.max_message_length, 1000);
    }

    #[test]
    fn invalid_env_overrides_are_ignored() {
        let mut cfg = CatmanduConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "CATMANDU_MAX_MESSAGES" => Some("lots".into()),
            "CATMANDU_FEEDBACK_ENABLED" => Some("maybe".into()),
            _ => None,
        });
        assert_eq!(cfg, CatmanduConfig::default());
    }
}
