//! Abstract metadata oracle and its HTTP adapter.

use crate::error::{SettlementError, SettlementResult};
use mercury_core::{ConditionId, Outcome};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::debug;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Resolution metadata for one market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub condition_id: ConditionId,
    pub resolved: bool,
    pub resolution: Option<Outcome>,
}

impl MarketInfo {
    pub fn unresolved(condition_id: ConditionId) -> Self {
        Self {
            condition_id,
            resolved: false,
            resolution: None,
        }
    }

    pub fn resolved(condition_id: ConditionId, outcome: Outcome) -> Self {
        Self {
            condition_id,
            resolved: true,
            resolution: Some(outcome),
        }
    }
}

/// The metadata oracle seam. A missing market (404) is `None`, not an
/// error.
pub trait MarketInfoSource: Send + Sync {
    fn get_market_info(
        &self,
        condition_id: &ConditionId,
        use_cache: bool,
    ) -> BoxFuture<'_, SettlementResult<Option<MarketInfo>>>;
}

#[derive(Debug, Deserialize)]
struct GammaMarketResponse {
    #[serde(default)]
    resolved: bool,
    #[serde(default)]
    resolution: Option<String>,
}

/// HTTP adapter for the Gamma metadata API, with a per-condition TTL
/// cache so the settlement poll does not hammer the endpoint.
pub struct GammaClient {
    http: reqwest::Client,
    base_url: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<ConditionId, (Instant, MarketInfo)>>,
}

impl GammaClient {
    pub fn new(base_url: impl Into<String>, cache_ttl: Duration) -> SettlementResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, condition_id: &ConditionId) -> Option<MarketInfo> {
        let cache = self.cache.lock();
        cache.get(condition_id).and_then(|(at, info)| {
            (at.elapsed() < self.cache_ttl).then(|| info.clone())
        })
    }

    fn parse_info(condition_id: &ConditionId, body: &Value) -> SettlementResult<MarketInfo> {
        let parsed: GammaMarketResponse = serde_json::from_value(body.clone())
            .map_err(|e| SettlementError::Oracle(format!("bad market payload: {e}")))?;
        let resolution = match parsed.resolution.as_deref() {
            Some("YES") | Some("Yes") => Some(Outcome::Yes),
            Some("NO") | Some("No") => Some(Outcome::No),
            _ => None,
        };
        Ok(MarketInfo {
            condition_id: condition_id.clone(),
            resolved: parsed.resolved && resolution.is_some(),
            resolution,
        })
    }
}

impl MarketInfoSource for GammaClient {
    fn get_market_info(
        &self,
        condition_id: &ConditionId,
        use_cache: bool,
    ) -> BoxFuture<'_, SettlementResult<Option<MarketInfo>>> {
        let condition_id = condition_id.clone();
        Box::pin(async move {
            if use_cache {
                if let Some(info) = self.cached(&condition_id) {
                    debug!(%condition_id, "oracle cache hit");
                    return Ok(Some(info));
                }
            }

            let url = format!("{}/markets/{}", self.base_url, condition_id);
            let response = self.http.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(SettlementError::Oracle(format!(
                    "oracle returned {} for {condition_id}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            let info = Self::parse_info(&condition_id, &body)?;
            self.cache
                .lock()
                .insert(condition_id, (Instant::now(), info.clone()));
            Ok(Some(info))
        })
    }
}
