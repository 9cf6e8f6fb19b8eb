//! Text encodings for dates and times stored in SQLite.

use chrono::{NaiveDate, NaiveTime};
use presence_core::{PartitionId, StoreError, TimeRecord};

const TIME_FORMAT: &str = "%H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

pub fn encode_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn encode_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// `NULL` and empty strings both mean "not set".
pub fn decode_time(raw: Option<String>) -> Result<Option<NaiveTime>, StoreError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveTime::parse_from_str(s, TIME_FORMAT)
            .map(Some)
            .map_err(|e| StoreError::Unavailable(format!("corrupt time {s:?}: {e}"))),
    }
}

pub fn decode_day(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DAY_FORMAT)
        .map_err(|e| StoreError::Unavailable(format!("corrupt day {raw:?}: {e}")))
}

/// Row shape of a day table before time parsing.
pub struct RawRecord {
    pub name: String,
    pub employee_id: Option<String>,
    pub entry_time: Option<String>,
    pub exit_time: Option<String>,
}

impl RawRecord {
    pub const COLUMNS: &'static str = "name, employee_id, entry_time, exit_time";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            employee_id: row.get(1)?,
            entry_time: row.get(2)?,
            exit_time: row.get(3)?,
        })
    }

    pub fn into_record(self, partition: &PartitionId) -> Result<TimeRecord, StoreError> {
        Ok(TimeRecord {
            day: partition.day(),
            name: self.name,
            employee_id: self.employee_id.filter(|id| !id.is_empty()),
            entry_time: decode_time(self.entry_time)?,
            exit_time: decode_time(self.exit_time)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_text_form() {
        let t = NaiveTime::from_hms_opt(7, 5, 9).unwrap();
        assert_eq!(encode_time(t), "07:05:09");
        assert_eq!(decode_time(Some("07:05:09".into())).unwrap(), Some(t));
    }

    #[test]
    fn test_empty_time_is_none() {
        assert_eq!(decode_time(None).unwrap(), None);
        assert_eq!(decode_time(Some(String::new())).unwrap(), None);
    }

    #[test]
    fn test_corrupt_time_is_error() {
        assert!(matches!(decode_time(Some("25:99".into())), Err(StoreError::Unavailable(_))));
    }
}
