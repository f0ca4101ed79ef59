use crate::committer::CommitPolicy;
use crate::eligibility::RegionMatching;
use crate::engine::EngineSettings;
use std::time::Duration;

pub const DEFAULT_GEOCODER_URL: &str = "https://api.pdok.nl/bzk/locatieserver";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub geocoder_base_url: String,
    pub geocoder_timeout_ms: u64,
    pub max_recipients_per_lead: usize,
    pub commit_max_attempts: u32,
    pub commit_backoff_ms: u64,
    pub promote_on_conflict: bool,
    pub region_matching: RegionMatching,
    /// Shared secret for the campaign webhook. Webhook is open when unset.
    pub webhook_secret: Option<String>,
    /// Where distribution notices are posted. Log-only when unset.
    pub notify_webhook_url: Option<String>,
    pub run_migrations: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T, hint: &str) -> anyhow::Result<T> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be {}", name, hint)),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match var(name).map(|s| s.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("{} must be true or false, got '{}'", name, v),
    }
}

/// Upper bound on K. Keeps the cap representable in the i32 storage counters.
const MAX_RECIPIENT_CAP: usize = 100;

fn recipient_cap(k: usize) -> anyhow::Result<usize> {
    if k == 0 || k > MAX_RECIPIENT_CAP {
        anyhow::bail!(
            "MAX_RECIPIENTS_PER_LEAD must be between 1 and {}, got {}",
            MAX_RECIPIENT_CAP,
            k
        );
    }
    Ok(k)
}

/// First `n` characters, for logging connection strings.
fn url_prefix(url: &str, n: usize) -> String {
    url.chars().take(n).collect()
}

fn http_url(name: &str, raw: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: parse_var("PORT", 3000, "a valid number between 1-65535")?,
            geocoder_base_url: http_url(
                "GEOCODER_BASE_URL",
                var("GEOCODER_BASE_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            )?,
            geocoder_timeout_ms: parse_var("GEOCODER_TIMEOUT_MS", 3000, "a number of milliseconds")?,
            max_recipients_per_lead: parse_var("MAX_RECIPIENTS_PER_LEAD", 2, "a positive number")
                .and_then(recipient_cap)?,
            commit_max_attempts: parse_var("COMMIT_MAX_ATTEMPTS", 3, "a positive number")
                .and_then(|n: u32| {
                    if n == 0 {
                        anyhow::bail!("COMMIT_MAX_ATTEMPTS must be at least 1");
                    }
                    Ok(n)
                })?,
            commit_backoff_ms: parse_var("COMMIT_BACKOFF_MS", 200, "a number of milliseconds")?,
            promote_on_conflict: parse_bool("PROMOTE_ON_CONFLICT", true)?,
            region_matching: match var("REGION_MATCHING") {
                Some(raw) => raw.parse::<RegionMatching>().map_err(|e| anyhow::anyhow!(e))?,
                None => RegionMatching::default(),
            },
            webhook_secret: var("WEBHOOK_SECRET"),
            notify_webhook_url: var("NOTIFY_WEBHOOK_URL")
                .map(|url| http_url("NOTIFY_WEBHOOK_URL", url))
                .transpose()?,
            run_migrations: parse_bool("RUN_MIGRATIONS", true)?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            url_prefix(&config.database_url, 20)
        );
        tracing::debug!("Geocoder URL: {}", config.geocoder_base_url);
        tracing::debug!(
            "Max recipients per lead: {}, region matching: {:?}",
            config.max_recipients_per_lead,
            config.region_matching
        );
        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set, campaign webhook accepts unauthenticated calls");
        }
        if let Some(ref url) = config.notify_webhook_url {
            tracing::info!("Distribution notices posted to {}", url);
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_recipients_per_lead: self.max_recipients_per_lead,
            geocode_timeout: Duration::from_millis(self.geocoder_timeout_ms),
            region_matching: self.region_matching,
            commit: CommitPolicy {
                max_attempts: self.commit_max_attempts,
                backoff: Duration::from_millis(self.commit_backoff_ms),
                promote_on_conflict: self.promote_on_conflict,
            },
        }
    }
}
