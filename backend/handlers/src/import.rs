use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use pacer_core::{HandlerError, HandlerOutcome, TaskConfig, TaskHandler};

use crate::meetings::{MeetingRecord, MeetingRepository, UpsertOutcome};
use crate::upstream::MeetingsSource;

/// Clock for "today". Injected so date-relative behaviour is testable.
pub type Today = fn() -> NaiveDate;

pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Counts from importing one date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub total: u64,
    pub inserted: u64,
    pub updated: u64,
    pub errors: u64,
}

impl ImportSummary {
    pub fn message(&self) -> String {
        if self.total == 0 {
            return "No meetings found for this date".to_string();
        }
        format!(
            "Processed {} meetings: {} inserted, {} updated, {} errors",
            self.total, self.inserted, self.updated, self.errors
        )
    }
}

/// Fetches one date's meetings and upserts them. Shared by both handlers.
pub struct MeetingsImporter {
    source: Arc<dyn MeetingsSource>,
    repo: Arc<dyn MeetingRepository>,
}

impl MeetingsImporter {
    pub fn new(source: Arc<dyn MeetingsSource>, repo: Arc<dyn MeetingRepository>) -> Self {
        Self { source, repo }
    }

    /// A failed fetch fails the import; a bad individual meeting only counts
    /// as an error.
    pub async fn import_date(&self, date: NaiveDate) -> Result<ImportSummary> {
        let meetings = self
            .source
            .meetings_for_date(date)
            .await
            .with_context(|| format!("Import failed for {date}"))?;

        let mut summary = ImportSummary {
            total: meetings.len() as u64,
            ..Default::default()
        };
        for meeting in &meetings {
            let outcome = match MeetingRecord::from_upstream(meeting, date) {
                Ok(record) => self.repo.upsert(&record).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(meeting_id = %meeting.meeting_id, error = %format!("{e:#}"), "Failed to store meeting");
                }
            }
        }
        Ok(summary)
    }
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ImportConfig {
    #[serde(default = "enabled")]
    auto_date: bool,
    #[serde(default)]
    import_date: Option<NaiveDate>,
    #[serde(default = "enabled")]
    archive_old_meetings: bool,
}

pub(crate) fn parse_config<T: for<'de> Deserialize<'de>>(config: &TaskConfig) -> Result<T, HandlerError> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| HandlerError::new(format!("invalid task config: {e}")))
}

/// `meetings_import`: archive yesterday's meetings, then import the target date.
pub struct MeetingsImportHandler {
    importer: Arc<MeetingsImporter>,
    repo: Arc<dyn MeetingRepository>,
    today: Today,
}

impl MeetingsImportHandler {
    pub fn new(importer: Arc<MeetingsImporter>, repo: Arc<dyn MeetingRepository>) -> Self {
        Self {
            importer,
            repo,
            today: utc_today,
        }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    async fn archive(&self, cutoff: NaiveDate) -> u64 {
        match self.repo.archive_before(cutoff).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Archiving old meetings failed; continuing with import");
                0
            }
        }
    }
}

#[async_trait]
impl TaskHandler for MeetingsImportHandler {
    fn name(&self) -> &str {
        "meetings_import"
    }

    async fn execute(&self, config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
        let config: ImportConfig = parse_config(config)?;
        let today = (self.today)();
        let date = if config.auto_date {
            today
                .checked_add_days(Days::new(1))
                .ok_or_else(|| HandlerError::new("date out of range"))?
        } else {
            config.import_date.unwrap_or(today)
        };

        let archived = if config.archive_old_meetings {
            self.archive(today).await
        } else {
            0
        };

        let summary = self.importer.import_date(date).await?;
        let mut message = summary.message();
        if archived > 0 {
            message.push_str(&format!(" | Archived {archived} old meetings"));
        }
        info!(import_date = %date, archived, inserted = summary.inserted, updated = summary.updated, "Meetings import finished");

        Ok(HandlerOutcome {
            processed: summary.total,
            inserted: summary.inserted,
            updated: summary.updated,
            message,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use serde_json::json;

    use crate::meetings::SqliteMeetingRepository;
    use crate::upstream::{UpstreamMeeting, UpstreamTrack};

    /// Canned upstream keyed by date; unknown dates fail. Records every call.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub by_date: HashMap<NaiveDate, Vec<UpstreamMeeting>>,
        pub calls: Mutex<Vec<NaiveDate>>,
    }

    #[async_trait]
    impl MeetingsSource for FakeSource {
        async fn meetings_for_date(&self, date: NaiveDate) -> Result<Vec<UpstreamMeeting>> {
            self.calls.lock().unwrap().push(date);
            self.by_date
                .get(&date)
                .cloned()
                .ok_or_else(|| anyhow!("upstream returned 500 Internal Server Error"))
        }
    }

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    pub(crate) fn fixed_today() -> NaiveDate {
        day(17)
    }

    pub(crate) fn upstream(id: &str, ratings: Option<&str>) -> UpstreamMeeting {
        UpstreamMeeting {
            meeting_id: id.into(),
            track: UpstreamTrack {
                name: format!("Track {id}"),
                ..Default::default()
            },
            ratings_updated: ratings.map(String::from),
            ..Default::default()
        }
    }

    fn config(value: serde_json::Value) -> TaskConfig {
        value.as_object().cloned().unwrap_or_default()
    }

    fn handler(source: FakeSource) -> (MeetingsImportHandler, Arc<SqliteMeetingRepository>, Arc<FakeSource>) {
        let source = Arc::new(source);
        let repo = Arc::new(SqliteMeetingRepository::in_memory().unwrap());
        let importer = Arc::new(MeetingsImporter::new(source.clone(), repo.clone()));
        let handler = MeetingsImportHandler::new(importer, repo.clone()).with_today(fixed_today);
        (handler, repo, source)
    }

    #[tokio::test]
    async fn auto_date_imports_tomorrow_and_archives() {
        let mut source = FakeSource::default();
        source
            .by_date
            .insert(day(16), vec![upstream("old", None)]);
        source
            .by_date
            .insert(day(18), vec![upstream("a", None), upstream("b", None), upstream("", None)]);
        let (handler, repo, source) = handler(source);

        // yesterday's meeting, imported earlier
        handler.importer.import_date(day(16)).await.unwrap();

        let outcome = handler.execute(&TaskConfig::new()).await.unwrap();
        assert_eq!(source.calls.lock().unwrap().last(), Some(&day(18)));
        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(
            outcome.message,
            "Processed 3 meetings: 2 inserted, 0 updated, 1 errors | Archived 1 old meetings"
        );
        assert_eq!(repo.active_since(day(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn explicit_date_without_archiving() {
        let mut source = FakeSource::default();
        source.by_date.insert(day(12), vec![upstream("x", None)]);
        let (handler, _repo, _) = handler(source);
        handler.importer.import_date(day(12)).await.unwrap();

        let outcome = handler
            .execute(&config(json!({
                "auto_date": false,
                "import_date": "2026-10-12",
                "archive_old_meetings": false
            })))
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.message, "Processed 1 meetings: 0 inserted, 1 updated, 0 errors");
    }

    #[tokio::test]
    async fn upstream_failure_is_a_handler_error() {
        let (handler, _, _) = handler(FakeSource::default());
        let err = handler.execute(&TaskConfig::new()).await.unwrap_err();
        assert!(err.message.contains("Import failed for 2026-10-18"));
        assert!(err.message.contains("500"));
    }

    #[tokio::test]
    async fn malformed_config_is_rejected() {
        let (handler, _, _) = handler(FakeSource::default());
        let err = handler
            .execute(&config(json!({"auto_date": false, "import_date": "18/10/2026"})))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("invalid task config"));
    }
}
