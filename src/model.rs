//! Records the worker writes to the shared store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used in log entries.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The job currently held by this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentJob {
    pub job_id: String,
    /// Pipeline whose pending queue the job was popped from.
    pub pipeline: String,
}

/// One line in the shared log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub worker_id: String,
    pub job_id: Option<String>,
    pub timestamp: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        worker_id: impl Into<String>,
        job_id: Option<String>,
        at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            job_id,
            timestamp: at.format(LOG_TIMESTAMP_FORMAT).to_string(),
            message: message.into(),
        }
    }
}

/// Outcome pushed once per job onto the results stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Success {
        job_id: String,
        result: serde_json::Value,
    },
    Failure {
        job_id: String,
        error: String,
    },
}

impl ResultRecord {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Success { job_id, .. } | Self::Failure { job_id, .. } => job_id,
        }
    }
}

/// Liveness value: unix seconds as a decimal string.
pub fn liveness_timestamp(at: DateTime<Utc>) -> String {
    at.timestamp().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn success_record_shape() {
        let record = ResultRecord::Success {
            job_id: "j1".into(),
            result: json!({"y": 2}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"job_id": "j1", "result": {"y": 2}}));
    }

    #[test]
    fn failure_record_shape() {
        let record = ResultRecord::Failure {
            job_id: "j1".into(),
            error: "boom".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"job_id": "j1", "error": "boom"}));

        let parsed: ResultRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.job_id(), "j1");
    }

    #[test]
    fn log_entry_shape() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let entry = LogEntry::new("w1", None, at, "hello");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "worker_id": "w1",
                "job_id": null,
                "timestamp": "2024-03-09 14:05:07",
                "message": "hello"
            })
        );
    }

    #[test]
    fn liveness_is_unix_seconds() {
        let at = Utc.with_ymd_and_hms(1970, 1, 1, 0, 1, 40).unwrap();
        assert_eq!(liveness_timestamp(at), "100");
    }
}
