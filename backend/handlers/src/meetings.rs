//! Meetings persistence: the local catalog the import and ratings handlers
//! write to and read from.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::upstream::UpstreamMeeting;

const DATE_FMT: &str = "%Y-%m-%d";

/// A meeting as stored locally, keyed by the provider's meeting id.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRecord {
    pub pf_meeting_id: String,
    pub track_name: String,
    pub track_id: String,
    pub track_state: String,
    pub track_location: String,
    pub track_abbreviation: String,
    pub meeting_date: NaiveDate,
    pub stage: String,
    pub tab_meeting: bool,
    pub rail_position: String,
    pub expected_condition: String,
    pub is_barrier_trial: bool,
    pub is_jumps: bool,
    pub has_sectionals: bool,
    pub form_updated: Option<String>,
    pub results_updated: Option<String>,
    pub sectionals_updated: Option<String>,
    pub ratings_updated: Option<String>,
}

impl MeetingRecord {
    pub fn from_upstream(meeting: &UpstreamMeeting, date: NaiveDate) -> Result<Self> {
        if meeting.meeting_id.is_empty() {
            return Err(anyhow!("meeting without meetingId"));
        }
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        Ok(Self {
            pf_meeting_id: meeting.meeting_id.clone(),
            track_name: meeting.track.name.clone(),
            track_id: meeting.track.track_id.clone(),
            track_state: meeting.track.state.clone(),
            track_location: meeting.track.location.clone(),
            track_abbreviation: meeting.track.abbrev.clone(),
            meeting_date: date,
            stage: meeting.stage.clone().unwrap_or_else(|| "A".to_string()),
            tab_meeting: meeting.tab_meeting.unwrap_or(true),
            rail_position: meeting.rail_position.clone().unwrap_or_default(),
            expected_condition: meeting.expected_condition.clone().unwrap_or_default(),
            is_barrier_trial: meeting.is_barrier_trial.unwrap_or(false),
            is_jumps: meeting.is_jumps.unwrap_or(false),
            has_sectionals: meeting.has_sectionals.unwrap_or(false),
            form_updated: non_empty(&meeting.form_updated),
            results_updated: non_empty(&meeting.results_updated),
            sectionals_updated: non_empty(&meeting.sectionals_updated),
            ratings_updated: non_empty(&meeting.ratings_updated),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// The fields the ratings poll needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingSummary {
    pub pf_meeting_id: String,
    pub track_name: String,
    pub meeting_date: NaiveDate,
    pub ratings_updated: Option<String>,
}

#[async_trait]
pub trait MeetingRepository: Send + Sync {
    async fn upsert(&self, record: &MeetingRecord) -> Result<UpsertOutcome>;

    /// Mark active meetings dated before `cutoff` as archived. Returns how many changed.
    async fn archive_before(&self, cutoff: NaiveDate) -> Result<u64>;

    /// Active meetings dated on or after `since`, oldest first.
    async fn active_since(&self, since: NaiveDate) -> Result<Vec<MeetingSummary>>;
}

pub struct SqliteMeetingRepository {
    conn: Mutex<Connection>,
}

impl SqliteMeetingRepository {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open meetings database")?;
        Self::init(conn)
    }

    /// In-memory repository (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory meetings database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS meetings (
                pf_meeting_id      TEXT PRIMARY KEY,
                track_name         TEXT NOT NULL DEFAULT '',
                track_id           TEXT NOT NULL DEFAULT '',
                track_state        TEXT NOT NULL DEFAULT '',
                track_country      TEXT NOT NULL DEFAULT 'Australia',
                track_location     TEXT NOT NULL DEFAULT '',
                track_abbreviation TEXT NOT NULL DEFAULT '',
                meeting_date       TEXT NOT NULL,
                stage              TEXT NOT NULL DEFAULT 'A',
                tab_meeting        INTEGER NOT NULL DEFAULT 1,
                rail_position      TEXT NOT NULL DEFAULT '',
                expected_condition TEXT NOT NULL DEFAULT '',
                is_barrier_trial   INTEGER NOT NULL DEFAULT 0,
                is_jumps           INTEGER NOT NULL DEFAULT 0,
                has_sectionals     INTEGER NOT NULL DEFAULT 0,
                form_updated       TEXT,
                results_updated    TEXT,
                sectionals_updated TEXT,
                ratings_updated    TEXT,
                status             TEXT NOT NULL DEFAULT 'active',
                archived_at        TEXT,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS meetings_status_date ON meetings(status, meeting_date);
            "#,
        )
        .context("create meetings schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("meetings connection poisoned"))?;
        f(&conn)
    }
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl MeetingRepository for SqliteMeetingRepository {
    async fn upsert(&self, r: &MeetingRecord) -> Result<UpsertOutcome> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM meetings WHERE pf_meeting_id = ?1",
                    params![r.pf_meeting_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            let now = now_ts();
            let date = r.meeting_date.format(DATE_FMT).to_string();

            if exists {
                conn.execute(
                    "UPDATE meetings SET
                        track_name = ?2, track_id = ?3, track_state = ?4, track_location = ?5,
                        track_abbreviation = ?6, meeting_date = ?7, stage = ?8, tab_meeting = ?9,
                        rail_position = ?10, expected_condition = ?11, is_barrier_trial = ?12,
                        is_jumps = ?13, has_sectionals = ?14, form_updated = ?15,
                        results_updated = ?16, sectionals_updated = ?17, ratings_updated = ?18,
                        status = 'active', updated_at = ?19
                     WHERE pf_meeting_id = ?1",
                    params![
                        r.pf_meeting_id,
                        r.track_name,
                        r.track_id,
                        r.track_state,
                        r.track_location,
                        r.track_abbreviation,
                        date,
                        r.stage,
                        r.tab_meeting,
                        r.rail_position,
                        r.expected_condition,
                        r.is_barrier_trial,
                        r.is_jumps,
                        r.has_sectionals,
                        r.form_updated,
                        r.results_updated,
                        r.sectionals_updated,
                        r.ratings_updated,
                        now,
                    ],
                )
                .with_context(|| format!("update meeting {}", r.pf_meeting_id))?;
                Ok(UpsertOutcome::Updated)
            } else {
                conn.execute(
                    "INSERT INTO meetings
                     (pf_meeting_id, track_name, track_id, track_state, track_location,
                      track_abbreviation, meeting_date, stage, tab_meeting, rail_position,
                      expected_condition, is_barrier_trial, is_jumps, has_sectionals,
                      form_updated, results_updated, sectionals_updated, ratings_updated,
                      status, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,'active',?19,?19)",
                    params![
                        r.pf_meeting_id,
                        r.track_name,
                        r.track_id,
                        r.track_state,
                        r.track_location,
                        r.track_abbreviation,
                        date,
                        r.stage,
                        r.tab_meeting,
                        r.rail_position,
                        r.expected_condition,
                        r.is_barrier_trial,
                        r.is_jumps,
                        r.has_sectionals,
                        r.form_updated,
                        r.results_updated,
                        r.sectionals_updated,
                        r.ratings_updated,
                        now,
                    ],
                )
                .with_context(|| format!("insert meeting {}", r.pf_meeting_id))?;
                Ok(UpsertOutcome::Inserted)
            }
        })
    }

    async fn archive_before(&self, cutoff: NaiveDate) -> Result<u64> {
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE meetings SET status = 'archived', archived_at = ?2, updated_at = ?2
                     WHERE status = 'active' AND meeting_date < ?1",
                    params![cutoff.format(DATE_FMT).to_string(), now_ts()],
                )
                .context("archive old meetings")?;
            Ok(n as u64)
        })
    }

    async fn active_since(&self, since: NaiveDate) -> Result<Vec<MeetingSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pf_meeting_id, track_name, meeting_date, ratings_updated
                 FROM meetings
                 WHERE status = 'active' AND meeting_date >= ?1
                 ORDER BY meeting_date, pf_meeting_id",
            )?;
            let rows = stmt.query_map(params![since.format(DATE_FMT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;

            let mut meetings = Vec::new();
            for row in rows {
                let (pf_meeting_id, track_name, date, ratings_updated) = row?;
                let meeting_date = NaiveDate::parse_from_str(&date, DATE_FMT)
                    .with_context(|| format!("bad meeting_date '{date}' for {pf_meeting_id}"))?;
                meetings.push(MeetingSummary {
                    pf_meeting_id,
                    track_name,
                    meeting_date,
                    ratings_updated,
                });
            }
            Ok(meetings)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamTrack;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn meeting(id: &str, ratings: Option<&str>) -> UpstreamMeeting {
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

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let repo = SqliteMeetingRepository::in_memory().unwrap();
        let record = MeetingRecord::from_upstream(&meeting("100", None), day(18)).unwrap();
        assert_eq!(record.stage, "A");
        assert!(record.tab_meeting);

        assert_eq!(repo.upsert(&record).await.unwrap(), UpsertOutcome::Inserted);
        let mut changed = record.clone();
        changed.ratings_updated = Some("2026-10-17T08:00:00Z".into());
        assert_eq!(repo.upsert(&changed).await.unwrap(), UpsertOutcome::Updated);

        let active = repo.active_since(day(1)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ratings_updated.as_deref(), Some("2026-10-17T08:00:00Z"));
    }

    #[tokio::test]
    async fn archive_hides_old_meetings() {
        let repo = SqliteMeetingRepository::in_memory().unwrap();
        for (id, d) in [("1", 10), ("2", 16), ("3", 17), ("4", 18)] {
            let record = MeetingRecord::from_upstream(&meeting(id, None), day(d)).unwrap();
            repo.upsert(&record).await.unwrap();
        }

        assert_eq!(repo.archive_before(day(17)).await.unwrap(), 2);
        assert_eq!(repo.archive_before(day(17)).await.unwrap(), 0);

        let ids: Vec<String> = repo
            .active_since(day(1))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.pf_meeting_id)
            .collect();
        assert_eq!(ids, vec!["3", "4"]);
    }

    #[test]
    fn meeting_without_id_is_rejected() {
        assert!(MeetingRecord::from_upstream(&meeting("", None), day(18)).is_err());
    }
}
