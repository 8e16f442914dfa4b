//! Upstream meetings provider.
//!
//! One endpoint matters: `GET {base}/form/meetingslist?meetingDate=YYYY-MM-DD&apiKey=...`.
//! The body is either `{"payLoad": [...]}` or a bare array of meetings.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.puntingform.com.au/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTrack {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub track_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub abbrev: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMeeting {
    #[serde(default, deserialize_with = "string_or_number")]
    pub meeting_id: String,
    #[serde(default)]
    pub track: UpstreamTrack,
    pub stage: Option<String>,
    pub tab_meeting: Option<bool>,
    pub rail_position: Option<String>,
    pub expected_condition: Option<String>,
    pub is_barrier_trial: Option<bool>,
    pub is_jumps: Option<bool>,
    pub has_sectionals: Option<bool>,
    pub form_updated: Option<String>,
    pub results_updated: Option<String>,
    pub sectionals_updated: Option<String>,
    #[serde(alias = "ratings_updated", alias = "RatingsUpdated")]
    pub ratings_updated: Option<String>,
}

/// Ids arrive as numbers or strings depending on the endpoint version.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MeetingsList {
    Bare(Vec<UpstreamMeeting>),
    Wrapped {
        #[serde(rename = "payLoad", default)]
        pay_load: Option<Vec<UpstreamMeeting>>,
    },
}

impl MeetingsList {
    fn into_meetings(self) -> Vec<UpstreamMeeting> {
        match self {
            MeetingsList::Bare(meetings) => meetings,
            MeetingsList::Wrapped { pay_load } => pay_load.unwrap_or_default(),
        }
    }
}

/// Source of meeting listings, one call per date.
#[async_trait]
pub trait MeetingsSource: Send + Sync {
    async fn meetings_for_date(&self, date: NaiveDate) -> Result<Vec<UpstreamMeeting>>;
}

/// HTTP client for the meetings provider.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build upstream HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl MeetingsSource for UpstreamClient {
    async fn meetings_for_date(&self, date: NaiveDate) -> Result<Vec<UpstreamMeeting>> {
        let date = date.format("%Y-%m-%d").to_string();
        debug!(meeting_date = %date, "Fetching upstream meetings list");

        let response = self
            .client
            .get(format!("{}/form/meetingslist", self.base_url))
            .query(&[("meetingDate", date.as_str()), ("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("upstream meetings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("upstream returned {status}: {body}");
        }

        let list: MeetingsList = response
            .json()
            .await
            .map_err(|e| e.without_url())
            .context("decode upstream meetings list")?;
        Ok(list.into_meetings())
    }
}
