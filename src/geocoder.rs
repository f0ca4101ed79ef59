//! Postcode geocoding.
//!
//! The engine only sees the [`Geocoder`] trait. "Not found" is a normal
//! answer; `GeocodeError` is reserved for the service itself failing, so the
//! caller can tell a bad postcode apart from an outage.

use crate::circuit_breaker::{create_geocoder_circuit_breaker, ServiceBreaker};
use crate::errors::AppError;
use crate::geo::Coordinates;
use crate::leads::clean_postcode;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as _;
use moka::future::Cache;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding service unavailable: {0}")]
    Unavailable(String),
    /// The service did not answer in time. Not an answer about the postcode.
    #[error("geocoding timed out: {0}")]
    TimedOut(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a postcode. Malformed input is `NotFound`, never an error.
    async fn geocode(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError>;
}

fn postcode_regex() -> &'static Regex {
    static POSTCODE: OnceLock<Regex> = OnceLock::new();
    POSTCODE.get_or_init(|| Regex::new(r"^[1-9][0-9]{3}[A-Z]{2}$").expect("postcode regex is valid"))
}

/// Normalize a Dutch postcode ("8011 aa" -> "8011AA"), or `None` if it is not one.
pub fn parse_postcode(raw: &str) -> Option<String> {
    clean_postcode(raw).filter(|pc| postcode_regex().is_match(pc))
}

/// Parse a WKT point, `POINT(lon lat)`.
pub fn parse_wkt_point(wkt: &str) -> Option<Coordinates> {
    let inner = wkt
        .trim()
        .strip_prefix("POINT(")
        .and_then(|s| s.strip_suffix(')'))?;
    let mut parts = inner.split_whitespace();
    let lng: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Coordinates::new(lat, lng)
}

#[derive(Debug, Deserialize)]
struct PdokResponse {
    response: PdokDocs,
}

#[derive(Debug, Deserialize)]
struct PdokDocs {
    #[serde(default)]
    docs: Vec<PdokDoc>,
}

#[derive(Debug, Deserialize)]
struct PdokDoc {
    centroide_ll: Option<String>,
}

/// Client for a PDOK Locatieserver compatible search endpoint.
#[derive(Clone)]
pub struct PdokGeocoder {
    client: reqwest::Client,
    base_url: String,
    breaker: ServiceBreaker,
}

impl PdokGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create geocoder client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker: create_geocoder_circuit_breaker(),
        })
    }

    async fn lookup(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError> {
        let q = format!("postcode:{}", postcode);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search/v3_1/free", self.base_url),
            &[("q", q.as_str()), ("fq", "type:postcode"), ("rows", "1")],
        )
        .map_err(|e| GeocodeError::Unavailable(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Geocoding postcode {}", postcode);

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                tracing::warn!("Geocoder timed out for {}", postcode);
                return Err(GeocodeError::TimedOut(format!("postcode {}", postcode)));
            }
            Err(e) => {
                return Err(GeocodeError::Unavailable(format!(
                    "Geocoder request failed: {}",
                    e
                )))
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GeocodeError::Unavailable(format!(
                "Geocoder returned {}: {}",
                status, error_text
            )));
        }

        let body: PdokResponse = response.json().await.map_err(|e| {
            GeocodeError::Unavailable(format!("Failed to parse geocoder response: {}", e))
        })?;

        let found = body
            .response
            .docs
            .iter()
            .filter_map(|doc| doc.centroide_ll.as_deref())
            .find_map(parse_wkt_point);

        Ok(match found {
            Some(coordinates) => GeocodeOutcome::Found(coordinates),
            None => GeocodeOutcome::NotFound,
        })
    }
}

#[async_trait]
impl Geocoder for PdokGeocoder {
    async fn geocode(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError> {
        let Some(postcode) = parse_postcode(postcode) else {
            tracing::debug!("Not a valid postcode, skipping lookup: {:?}", postcode);
            return Ok(GeocodeOutcome::NotFound);
        };

        match self.breaker.call(self.lookup(&postcode)).await {
            Ok(outcome) => Ok(outcome),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(GeocodeError::Unavailable(
                "geocoder circuit open".to_string(),
            )),
        }
    }
}

/// Caches definitive answers (found and not found). Errors, timeouts
/// included, are never cached.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Cache<String, Option<Coordinates>>,
}

impl<G: Geocoder> CachedGeocoder<G> {
    /// 24 hour TTL, postcodes do not move.
    pub fn new(inner: G) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(86400))
            .max_capacity(100_000)
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn geocode(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError> {
        let Some(key) = parse_postcode(postcode) else {
            return Ok(GeocodeOutcome::NotFound);
        };

        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!("Geocode cache hit for {}", key);
            return Ok(cached.map_or(GeocodeOutcome::NotFound, GeocodeOutcome::Found));
        }

        let outcome = self.inner.geocode(&key).await?;
        let value = match outcome {
            GeocodeOutcome::Found(c) => Some(c),
            GeocodeOutcome::NotFound => None,
        };
        self.cache.insert(key, value).await;
        Ok(outcome)
    }
}

/// Fixed postcode table. Used for tests and offline simulation.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    entries: HashMap<String, Coordinates>,
    unavailable: bool,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A geocoder whose service is down.
    pub fn unavailable() -> Self {
        Self {
            entries: HashMap::new(),
            unavailable: true,
        }
    }

    pub fn with(mut self, postcode: &str, coordinates: Coordinates) -> Self {
        if let Some(pc) = parse_postcode(postcode) {
            self.entries.insert(pc, coordinates);
        }
        self
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn geocode(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError> {
        if self.unavailable {
            return Err(GeocodeError::Unavailable("static geocoder offline".to_string()));
        }
        Ok(parse_postcode(postcode)
            .and_then(|pc| self.entries.get(&pc).copied())
            .map_or(GeocodeOutcome::NotFound, GeocodeOutcome::Found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_postcode() {
        assert_eq!(parse_postcode("8011 aa").as_deref(), Some("8011AA"));
        assert_eq!(parse_postcode(" 1012AB ").as_deref(), Some("1012AB"));
        assert_eq!(parse_postcode("0123AB"), None);
        assert_eq!(parse_postcode("8011"), None);
        assert_eq!(parse_postcode("SW1A 1AA"), None);
        assert_eq!(parse_postcode(""), None);
    }

    #[test]
    fn test_parse_wkt_point() {
        let c = parse_wkt_point("POINT(6.0944 52.5125)").unwrap();
        assert_eq!(c.lat, 52.5125);
        assert_eq!(c.lng, 6.0944);
        assert!(parse_wkt_point("POINT(6.0944)").is_none());
        assert!(parse_wkt_point("LINESTRING(1 2, 3 4)").is_none());
        assert!(parse_wkt_point("POINT(200 52)").is_none());
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Geocoder for Counting {
        async fn geocode(&self, postcode: &str) -> Result<GeocodeOutcome, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if postcode == "9999ZZ" {
                return Err(GeocodeError::Unavailable("down".to_string()));
            }
            if postcode == "1012AB" && self.calls.load(Ordering::SeqCst) == 1 {
                return Err(GeocodeError::TimedOut(postcode.to_string()));
            }
            Ok(GeocodeOutcome::Found(Coordinates::new(52.0, 5.0).unwrap()))
        }
    }

    #[tokio::test]
    async fn test_cache_hits_skip_inner_and_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let geocoder = CachedGeocoder::new(Counting {
            calls: calls.clone(),
        });

        geocoder.geocode("8011AA").await.unwrap();
        geocoder.geocode("8011 aa").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(geocoder.geocode("9999ZZ").await.is_err());
        assert!(geocoder.geocode("9999ZZ").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // malformed never reaches the inner geocoder
        assert_eq!(
            geocoder.geocode("not a postcode").await.unwrap(),
            GeocodeOutcome::NotFound
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_not_cached_as_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let geocoder = CachedGeocoder::new(Counting {
            calls: calls.clone(),
        });

        assert!(matches!(
            geocoder.geocode("1012AB").await,
            Err(GeocodeError::TimedOut(_))
        ));
        assert!(matches!(
            geocoder.geocode("1012AB").await.unwrap(),
            GeocodeOutcome::Found(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_geocoder() {
        let zwolle = Coordinates::new(52.5125, 6.0944).unwrap();
        let geocoder = StaticGeocoder::new().with("8011AA", zwolle);
        assert_eq!(
            geocoder.geocode("8011 AA").await.unwrap(),
            GeocodeOutcome::Found(zwolle)
        );
        assert_eq!(
            geocoder.geocode("1012AB").await.unwrap(),
            GeocodeOutcome::NotFound
        );
        assert!(StaticGeocoder::unavailable().geocode("8011AA").await.is_err());
    }
}
