use serde::Deserialize;

use crate::tokens::RedemptionMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// Where file bytes live. `file:///path` or `s3://bucket?region=..`.
    pub content_store_url: String,
    /// Lifetime of a file access grant, in seconds.
    /// Set via PREVIEW_FILE_TOKEN_TTL_SECS. Default: 300.
    pub file_token_ttl_secs: u64,
    /// Set via PREVIEW_FILE_TOKEN_MODE (`single-use` | `reusable`).
    pub file_token_mode: RedemptionMode,
    /// Interval of the background sweep of expired file access tokens.
    /// 0 = disabled (grants and redemptions still sweep lazily).
    pub sweep_interval_secs: u64,
    /// Shared secret the upstream auth proxy presents in `X-Upstream-Key`.
    /// When unset, the tenant header is trusted as is.
    pub upstream_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/preview".into(),
            database_max_connections: 10,
            content_store_url: "file:///var/lib/preview/content".into(),
            file_token_ttl_secs: 300,
            file_token_mode: RedemptionMode::SingleUse,
            sweep_interval_secs: 900,
            upstream_key: None,
        }
    }
}

/// Upper bound on a file access grant's lifetime: one day.
pub const MAX_FILE_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

impl Config {
    pub fn file_token_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.file_token_ttl_secs.min(MAX_FILE_TOKEN_TTL_SECS) as i64)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let file_token_mode = match std::env::var("PREVIEW_FILE_TOKEN_MODE") {
        Ok(v) if !v.trim().is_empty() => v.parse()?,
        _ => defaults.file_token_mode,
    };

    let file_token_ttl_secs = check_file_token_ttl(
        env_parse("PREVIEW_FILE_TOKEN_TTL_SECS").unwrap_or(defaults.file_token_ttl_secs),
    )?;

    let upstream_key = std::env::var("PREVIEW_UPSTREAM_KEY")
        .ok()
        .filter(|k| !k.is_empty());
    if upstream_key.is_none() {
        eprintln!("⚠️  PREVIEW_UPSTREAM_KEY is not set; X-Tenant-Id is trusted without verification.");
    }

    Ok(Config {
        port: env_parse("PREVIEW_PORT").unwrap_or(defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
            .unwrap_or(defaults.database_max_connections),
        content_store_url: std::env::var("CONTENT_STORE_URL").unwrap_or(defaults.content_store_url),
        file_token_ttl_secs,
        file_token_mode,
        sweep_interval_secs: env_parse("PREVIEW_SWEEP_INTERVAL_SECS")
            .unwrap_or(defaults.sweep_interval_secs),
        upstream_key,
    })
}

fn check_file_token_ttl(secs: u64) -> anyhow::Result<u64> {
    if secs == 0 {
        anyhow::bail!("PREVIEW_FILE_TOKEN_TTL_SECS must be greater than zero");
    }
    if secs > MAX_FILE_TOKEN_TTL_SECS {
        anyhow::bail!(
            "PREVIEW_FILE_TOKEN_TTL_SECS must be at most {} (got {})",
            MAX_FILE_TOKEN_TTL_SECS,
            secs
        );
    }
    Ok(secs)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.file_token_ttl_secs, 300);
        assert_eq!(cfg.file_token_mode, RedemptionMode::SingleUse);
        assert_eq!(cfg.file_token_validity(), chrono::Duration::minutes(5));
        assert!(cfg.upstream_key.is_none());
    }

    #[test]
    fn test_file_token_ttl_bounds() {
        assert!(check_file_token_ttl(0).is_err());
        assert_eq!(check_file_token_ttl(1).unwrap(), 1);
        assert_eq!(check_file_token_ttl(MAX_FILE_TOKEN_TTL_SECS).unwrap(), MAX_FILE_TOKEN_TTL_SECS);
        assert!(check_file_token_ttl(MAX_FILE_TOKEN_TTL_SECS + 1).is_err());
        assert!(check_file_token_ttl(u64::MAX).is_err());
    }

    #[test]
    fn test_validity_is_capped_for_hand_built_config() {
        let cfg = Config {
            file_token_ttl_secs: u64::MAX,
            ..Config::default()
        };
        assert_eq!(cfg.file_token_validity(), chrono::Duration::days(1));
    }
}
