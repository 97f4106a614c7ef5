//! Current conditions from the KMA ultra-short-term nowcast API

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use dtalks_core::{Situation, SituationProvider};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{build_http_client, ensure_success};
use crate::{InfraError, Result};

const SERVICE: &str = "weather";
const NORMAL_SERVICE: &str = "00";

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub url: String,
    pub service_key: String,
    /// Forecast grid coordinates of the office
    pub nx: i32,
    pub ny: i32,
    pub location: String,
    pub timeout: Duration,
}

impl WeatherConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            nx: 61,
            ny: 125,
            location: Situation::DEFAULT_LOCATION.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_grid(mut self, nx: i32, ny: i32, location: impl Into<String>) -> Self {
        self.nx = nx;
        self.ny = ny;
        self.location = location.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct NowcastEnvelope {
    response: NowcastResponse,
}

#[derive(Debug, Deserialize)]
struct NowcastResponse {
    header: NowcastHeader,
    #[serde(default)]
    body: Option<NowcastBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NowcastHeader {
    result_code: String,
    #[serde(default)]
    result_msg: String,
}

#[derive(Debug, Deserialize)]
struct NowcastBody {
    items: NowcastItems,
}

#[derive(Debug, Deserialize)]
struct NowcastItems {
    #[serde(default)]
    item: Vec<NowcastItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NowcastItem {
    category: String,
    obsr_value: String,
}

pub struct WeatherSituationProvider {
    client: Client,
    config: WeatherConfig,
    clock: fn() -> DateTime<Local>,
}

impl WeatherSituationProvider {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            config,
            clock: Local::now,
        })
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    /// Observations are published 40 minutes past the hour
    fn base_time(now: DateTime<Local>) -> (String, String) {
        let published = now - ChronoDuration::minutes(40);
        (
            published.format("%Y%m%d").to_string(),
            published.format("%H00").to_string(),
        )
    }

    async fn fetch(&self, now: DateTime<Local>) -> Result<HashMap<String, String>> {
        let (base_date, base_time) = Self::base_time(now);
        let nx = self.config.nx.to_string();
        let ny = self.config.ny.to_string();
        let response = self
            .client
            .get(&self.config.url)
            .query(&[
                ("serviceKey", self.config.service_key.as_str()),
                ("pageNo", "1"),
                ("numOfRows", "10"),
                ("dataType", "JSON"),
                ("base_date", base_date.as_str()),
                ("base_time", base_time.as_str()),
                ("nx", nx.as_str()),
                ("ny", ny.as_str()),
            ])
            .send()
            .await?;
        let envelope: NowcastEnvelope = ensure_success(SERVICE, response).await?.json().await?;

        let header = envelope.response.header;
        if header.result_code != NORMAL_SERVICE {
            return Err(InfraError::external(
                SERVICE,
                format!("{} {}", header.result_code, header.result_msg),
            ));
        }

        Ok(envelope
            .response
            .body
            .map(|b| b.items.item)
            .unwrap_or_default()
            .into_iter()
            .map(|i| (i.category, i.obsr_value))
            .collect())
    }
}

#[async_trait]
impl SituationProvider for WeatherSituationProvider {
    async fn current(&self) -> dtalks_core::Result<Situation> {
        let now = (self.clock)();
        let observed = self.fetch(now).await?;
        debug!(categories = observed.len(), "Fetched weather observations");

        let fallback = Situation::fallback(now);
        let value = |code: &str, default: String| observed.get(code).cloned().unwrap_or(default);
        Ok(Situation {
            now,
            location: self.config.location.clone(),
            temperature: value("T1H", fallback.temperature),
            rainfall: value("RN1", fallback.rainfall),
            humidity: value("REH", fallback.humidity),
        })
    }
}
