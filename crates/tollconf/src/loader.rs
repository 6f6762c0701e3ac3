//! File tiers, TOML merging, and the environment overlay.

use crate::{ConfigError, TollConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Where the effective configuration came from: the files that were merged,
/// in order, and the environment variables that overrode them.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// The config tiers, least specific first: machine-wide, per-user, working
/// directory. A `--config` path stands in for the working-directory tier.
///
/// Candidates are returned whether or not they exist; the loader skips
/// missing files, so every tier stays optional.
pub fn config_file_candidates(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user_tier =
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("tollbooth/config.toml"));
    let local_tier = cli_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("tollbooth.toml"));

    let mut candidates = vec![PathBuf::from("/etc/tollbooth/config.toml")];
    candidates.extend(user_tier);
    candidates.push(local_tier);
    candidates
}

/// Read a config file into a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`: tables merge recursively, any other
/// value in the overlay replaces the base value.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into the typed config.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<TollConfig, ConfigError> {
    table.try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })
}

/// Apply `TOLLBOOTH_*` environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TollConfig, sources: &mut ConfigSources) {
    let set_string = |var: &str, target: &mut String, sources: &mut ConfigSources| {
        if let Ok(v) = env::var(var) {
            *target = v;
            sources.env_overrides.push(var.to_string());
        }
    };

    // Database
    set_string("TOLLBOOTH_DB_URL", &mut config.database.url, sources);
    set_string("TOLLBOOTH_DB_USER", &mut config.database.user, sources);
    set_string("TOLLBOOTH_DB_PASSWORD", &mut config.database.password, sources);
    set_string("TOLLBOOTH_DB_HOST", &mut config.database.host, sources);
    set_string("TOLLBOOTH_DB_NAME", &mut config.database.name, sources);
    set_string("TOLLBOOTH_DB_SSL_MODE", &mut config.database.ssl_mode, sources);
    set_string(
        "TOLLBOOTH_DB_MIGRATIONS_PATH",
        &mut config.database.migrations_path,
        sources,
    );
    if let Some(port) = env_port("TOLLBOOTH_DB_PORT", sources) {
        config.database.port = port;
    }

    // Listeners
    set_string("TOLLBOOTH_HTTP_ADDR", &mut config.http.addr, sources);
    if let Some(port) = env_port("TOLLBOOTH_HTTP_PORT", sources) {
        config.http.port = port;
    }
    set_string("TOLLBOOTH_METRICS_ADDR", &mut config.metrics.addr, sources);
    if let Some(port) = env_port("TOLLBOOTH_METRICS_PORT", sources) {
        config.metrics.port = port;
    }

    // Telemetry; RUST_LOG also honored for the level
    set_string("TOLLBOOTH_LOG_LEVEL", &mut config.telemetry.log_level, sources);
    set_string("RUST_LOG", &mut config.telemetry.log_level, sources);
    set_string("TOLLBOOTH_LOG_FORMAT", &mut config.telemetry.log_format, sources);

    // Auth
    set_string("TOLLBOOTH_JWT_SECRET", &mut config.auth.jwt_secret, sources);
    set_string("TOLLBOOTH_JWT_ISSUER", &mut config.auth.jwt_issuer, sources);
    set_string("TOLLBOOTH_JWT_AUDIENCE", &mut config.auth.jwt_audience, sources);
    set_string("TOLLBOOTH_TOKEN_TTL", &mut config.auth.token_ttl, sources);
    set_string("TOLLBOOTH_COOKIE_SECRET", &mut config.auth.cookie_secret, sources);
    set_string("TOLLBOOTH_COOKIE_NAME", &mut config.auth.cookie_name, sources);
    if let Ok(v) = env::var("TOLLBOOTH_COOKIE_MAX_AGE") {
        if let Ok(secs) = v.parse() {
            config.auth.cookie_max_age = secs;
            sources.env_overrides.push("TOLLBOOTH_COOKIE_MAX_AGE".to_string());
        }
    }

    // Stripe
    set_string("TOLLBOOTH_STRIPE_KEY", &mut config.stripe.api_key, sources);
    set_string(
        "TOLLBOOTH_STRIPE_WEBHOOK_SECRET",
        &mut config.stripe.webhook_secret,
        sources,
    );
    set_string("TOLLBOOTH_STRIPE_SUCCESS_URL", &mut config.stripe.success_url, sources);
    set_string("TOLLBOOTH_STRIPE_CANCEL_URL", &mut config.stripe.cancel_url, sources);

    // Rate limiting
    if let Ok(v) = env::var("TOLLBOOTH_RATE_LIMIT") {
        if let Ok(n) = v.parse() {
            config.rate_limit.per_second = n;
            sources.env_overrides.push("TOLLBOOTH_RATE_LIMIT".to_string());
        }
    }
    if let Ok(v) = env::var("TOLLBOOTH_RATE_BURST") {
        if let Ok(n) = v.parse() {
            config.rate_limit.burst = n;
            sources.env_overrides.push("TOLLBOOTH_RATE_BURST".to_string());
        }
    }

    // Heartbeat
    set_string(
        "TOLLBOOTH_HEARTBEAT_INTERVAL",
        &mut config.heartbeat.interval,
        sources,
    );
    set_string(
        "TOLLBOOTH_HEARTBEAT_ERROR_INCREMENT",
        &mut config.heartbeat.error_increment,
        sources,
    );
    set_string(
        "TOLLBOOTH_HEARTBEAT_PATH",
        &mut config.heartbeat.health_path,
        sources,
    );
    set_string(
        "TOLLBOOTH_HEARTBEAT_TIMEOUT",
        &mut config.heartbeat.client_timeout,
        sources,
    );

    // Proxy
    set_string("TOLLBOOTH_STRIP_PREFIX", &mut config.proxy.strip_prefix, sources);
    set_string(
        "TOLLBOOTH_NOT_FOUND_URL",
        &mut config.proxy.not_found_redirect_url,
        sources,
    );
    set_string(
        "TOLLBOOTH_NO_ROLE_URL",
        &mut config.proxy.no_role_redirect_url,
        sources,
    );
    if let Ok(v) = env::var("TOLLBOOTH_FRONTEND_DIR") {
        config.proxy.frontend_dir = PathBuf::from(v);
        sources.env_overrides.push("TOLLBOOTH_FRONTEND_DIR".to_string());
    }

    // Mail
    set_string("TOLLBOOTH_SMTP_HOST", &mut config.mail.smtp_host, sources);
    if let Some(port) = env_port("TOLLBOOTH_SMTP_PORT", sources) {
        config.mail.smtp_port = port;
    }
    set_string("TOLLBOOTH_MAIL_SENDER", &mut config.mail.sender_email, sources);
    set_string(
        "TOLLBOOTH_MAIL_PASSWORD",
        &mut config.mail.sender_password,
        sources,
    );
}

fn env_port(var: &str, sources: &mut ConfigSources) -> Option<u16> {
    let v = env::var(var).ok()?;
    let port = v.parse().ok()?;
    sources.env_overrides.push(var.to_string());
    Some(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_candidate_tiers_are_ordered() {
        let candidates = config_file_candidates(None);
        assert_eq!(
            candidates.first().unwrap(),
            &PathBuf::from("/etc/tollbooth/config.toml")
        );
        assert_eq!(candidates.last().unwrap(), &PathBuf::from("tollbooth.toml"));
    }

    #[test]
    fn test_cli_path_replaces_the_local_tier() {
        let candidates = config_file_candidates(Some(Path::new("/tmp/override.toml")));
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from("/tmp/override.toml")
        );
        assert!(!candidates.contains(&PathBuf::from("tollbooth.toml")));
    }

    #[test]
    fn test_merge_tables_nested() {
        let mut base: toml::Table = r#"
[http]
addr = "127.0.0.1"
port = 8089
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[http]
port = 9000
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);

        let http = base.get("http").unwrap().as_table().unwrap();
        assert_eq!(http.get("addr").unwrap().as_str(), Some("127.0.0.1"));
        assert_eq!(http.get("port").unwrap().as_integer(), Some(9000));
    }

    #[test]
    fn test_load_table_missing_file() {
        let err = load_table(Path::new("/nonexistent/tollbooth.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_load_table_bad_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not valid toml [").unwrap();
        let err = load_table(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
