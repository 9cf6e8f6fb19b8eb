use std::io::Write;

use presence_core::session::{NotificationSink, SessionError};
use presence_core::PresenceDelta;

/// Writes each delta as one JSON line.
pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> NotificationSink for JsonSink<W> {
    fn notify(&mut self, delta: &PresenceDelta) -> Result<(), SessionError> {
        let line = serde_json::to_string(delta).map_err(|e| SessionError::Sink(e.to_string()))?;
        writeln!(self.out, "{line}")
            .and_then(|_| self.out.flush())
            .map_err(|e| SessionError::Sink(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use presence_core::{Anomaly, AnomalyKind};
    use std::collections::BTreeSet;

    #[test]
    fn test_json_line_shape() {
        let delta = PresenceDelta {
            at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap(),
            entered: BTreeSet::from(["Alice".to_string()]),
            exited: BTreeSet::new(),
            anomalies: vec![Anomaly { name: "Zed".into(), kind: AnomalyKind::Unregistered }],
        };
        let mut sink = JsonSink::new(Vec::new());
        sink.notify(&delta).unwrap();

        let text = String::from_utf8(sink.out).unwrap();
        assert!(text.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(v["at"], "2024-01-01T09:00:00");
        assert_eq!(v["entered"][0], "Alice");
        assert_eq!(v["anomalies"][0]["kind"], "unregistered");
    }
}
