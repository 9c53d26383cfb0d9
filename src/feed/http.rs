use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::feed::{PriceFeed, StrategyEvaluator};
use crate::models::{Bar, Signal, Tick, Timeframe};

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(50);
const TICK_CACHE_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TickResponse {
    bid: f64,
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Vec<RawBar>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    time: DateTime<Utc>,
    #[serde(default)]
    open: f64,
    high: f64,
    low: f64,
    #[serde(default)]
    close: f64,
}

#[derive(Debug, Deserialize)]
struct SignalsResponse {
    #[serde(default)]
    signals: Vec<Signal>,
}

/// Price feed and strategy evaluator backed by the market-data service's
/// HTTP API.
pub struct HttpFeed {
    client: Client,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
    tick_cache: Mutex<HashMap<String, (Instant, Tick)>>,
}

impl HttpFeed {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.feed_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.feed_url.trim_end_matches('/').to_string(),
            last_request: Mutex::new(None),
            tick_cache: Mutex::new(HashMap::new()),
        })
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limit().await;

        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Feed error {} on {}: {}", status, path, body);
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))
    }
}

#[async_trait]
impl PriceFeed for HttpFeed {
    async fn current_tick(&self, symbol: &str) -> Result<Tick> {
        if let Some((cached_at, tick)) = self.tick_cache.lock().await.get(symbol) {
            if cached_at.elapsed() < TICK_CACHE_TTL {
                return Ok(*tick);
            }
        }

        let data: TickResponse = self.get_json(&format!("/tick/{}", symbol), &[]).await?;
        let tick = Tick::new(data.bid, data.ask);
        if !tick.is_valid() {
            anyhow::bail!("Invalid tick for {}: bid={} ask={}", symbol, tick.bid, tick.ask);
        }

        self.tick_cache
            .lock()
            .await
            .insert(symbol.to_string(), (Instant::now(), tick));
        Ok(tick)
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let data: BarsResponse = self
            .get_json(
                &format!("/bars/{}", symbol),
                &[
                    ("timeframe", Timeframe::M1.to_string()),
                    ("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        let mut bars: Vec<Bar> = data
            .bars
            .into_iter()
            .map(|rb| Bar {
                open_time: rb.time,
                open: rb.open,
                high: rb.high,
                low: rb.low,
                close: rb.close,
            })
            .collect();

        bars.sort_by_key(|b| b.open_time);
        Ok(bars)
    }
}

#[async_trait]
impl StrategyEvaluator for HttpFeed {
    async fn evaluate(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Signal>> {
        let data: SignalsResponse = self
            .get_json(&format!("/signals/{}/{}", symbol, timeframe), &[])
            .await?;
        Ok(data.signals)
    }
}
