/// Jobs are identified by the opaque string the Grid hands out on claim.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
