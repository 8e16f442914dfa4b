use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{info, warn};

use pacer_core::{HandlerError, HandlerOutcome, TaskConfig, TaskHandler};

use crate::import::{parse_config, utc_today, MeetingsImporter, Today};
use crate::meetings::{MeetingRepository, MeetingSummary};
use crate::upstream::{MeetingsSource, UpstreamMeeting};

/// Parse the timestamp shapes the provider has been seen to emit.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Whether the upstream ratings timestamp supersedes the local one.
///
/// A missing local timestamp is always stale. Anything unparseable is never newer.
pub fn is_ratings_newer(upstream: Option<&str>, local: Option<&str>) -> bool {
    let Some(upstream) = upstream.filter(|s| !s.trim().is_empty()) else {
        return false;
    };
    let Some(local) = local.filter(|s| !s.trim().is_empty()) else {
        return true;
    };
    match (parse_timestamp(upstream), parse_timestamp(local)) {
        (Some(up), Some(loc)) => up > loc,
        _ => false,
    }
}

fn default_days_back() -> u32 {
    7
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RatingsConfig {
    #[serde(default = "default_days_back")]
    days_back: u32,
    #[serde(default = "enabled")]
    auto_refresh: bool,
}

/// `ratings_check`: find recent meetings whose upstream ratings moved on and
/// optionally re-import their dates.
pub struct RatingsCheckHandler {
    source: Arc<dyn MeetingsSource>,
    repo: Arc<dyn MeetingRepository>,
    importer: Arc<MeetingsImporter>,
    today: Today,
}

impl RatingsCheckHandler {
    pub fn new(
        source: Arc<dyn MeetingsSource>,
        repo: Arc<dyn MeetingRepository>,
        importer: Arc<MeetingsImporter>,
    ) -> Self {
        Self {
            source,
            repo,
            importer,
            today: utc_today,
        }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    /// Meetings whose upstream ratings are newer than what is stored. Upstream
    /// lists are fetched once per date; a failed fetch means "not stale".
    async fn find_stale(&self, meetings: &[MeetingSummary]) -> Vec<MeetingSummary> {
        let mut listings: HashMap<NaiveDate, Vec<UpstreamMeeting>> = HashMap::new();
        let mut stale = Vec::new();

        for meeting in meetings {
            let date = meeting.meeting_date;
            if !listings.contains_key(&date) {
                let listing = match self.source.meetings_for_date(date).await {
                    Ok(listing) => listing,
                    Err(e) => {
                        warn!(meeting_date = %date, error = %format!("{e:#}"), "Ratings lookup failed");
                        Vec::new()
                    }
                };
                listings.insert(date, listing);
            }

            let upstream = listings
                .get(&date)
                .and_then(|l| l.iter().find(|m| m.meeting_id == meeting.pf_meeting_id))
                .and_then(|m| m.ratings_updated.as_deref());
            if is_ratings_newer(upstream, meeting.ratings_updated.as_deref()) {
                stale.push(meeting.clone());
            }
        }
        stale
    }
}

#[async_trait]
impl TaskHandler for RatingsCheckHandler {
    fn name(&self) -> &str {
        "ratings_check"
    }

    async fn execute(&self, config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
        let config: RatingsConfig = parse_config(config)?;
        let since = (self.today)()
            .checked_sub_days(Days::new(u64::from(config.days_back)))
            .ok_or_else(|| HandlerError::new("days_back out of range"))?;

        let meetings = self
            .repo
            .active_since(since)
            .await
            .map_err(|e| HandlerError::new(format!("Ratings polling failed: {e:#}")))?;
        if meetings.is_empty() {
            return Ok(HandlerOutcome::message("No recent meetings found"));
        }

        let checked = meetings.len() as u64;
        let stale = self.find_stale(&meetings).await;
        let mut outcome = HandlerOutcome {
            processed: checked,
            message: format!(
                "Found {} meetings with updated ratings out of {checked} checked",
                stale.len()
            ),
            ..Default::default()
        };
        if !config.auto_refresh || stale.is_empty() {
            return Ok(outcome);
        }

        let dates: BTreeSet<NaiveDate> = stale.iter().map(|m| m.meeting_date).collect();
        let mut refreshed_dates = BTreeSet::new();
        for date in dates {
            match self.importer.import_date(date).await {
                Ok(summary) if summary.total > 0 => {
                    outcome.inserted += summary.inserted;
                    outcome.updated += summary.updated;
                    refreshed_dates.insert(date);
                }
                Ok(_) => warn!(meeting_date = %date, "Refresh returned no meetings"),
                Err(e) => warn!(meeting_date = %date, error = %format!("{e:#}"), "Refresh failed"),
            }
        }
        let refreshed = stale
            .iter()
            .filter(|m| refreshed_dates.contains(&m.meeting_date))
            .count();

        info!(checked, stale = stale.len(), refreshed, "Ratings poll finished");
        outcome.message = format!(
            "Polling complete: {} updates found, {refreshed} successfully refreshed",
            stale.len()
        );
        Ok(outcome)
    }
}
