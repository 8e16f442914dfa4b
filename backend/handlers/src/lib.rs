//! Business handlers dispatched by the Pacer scheduler.

pub mod import;
pub mod meetings;
pub mod ratings;
pub mod upstream;

pub use import::{ImportSummary, MeetingsImportHandler, MeetingsImporter};
pub use meetings::{MeetingRecord, MeetingRepository, MeetingSummary, SqliteMeetingRepository};
pub use ratings::{is_ratings_newer, RatingsCheckHandler};
pub use upstream::{MeetingsSource, UpstreamClient, UpstreamMeeting, DEFAULT_BASE_URL};
