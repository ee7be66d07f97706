use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Record;

/// The final structured record for one document. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub record: Record,
    pub provenance: Provenance,
}

/// Where a record came from and what it cost to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub run_id: Uuid,
    pub document_id: String,
    /// Model round-trips used.
    pub turns: u32,
    /// Tool calls dispatched.
    pub tool_calls: u32,
    /// Corrective turns issued after failed schema verification.
    pub corrections: u32,
    pub model: String,
    pub completed_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(record: Record, provenance: Provenance) -> Self {
        Self { record, provenance }
    }

    pub fn document_id(&self) -> &str {
        &self.provenance.document_id
    }

    /// The record as a JSON object keyed by field name.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.record.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_keeps_field_order() {
        let mut record = Record::new();
        record.insert("title".to_string(), json!("Report"));
        record.insert("timestamp".to_string(), json!("2024-01-05"));
        let result = ExtractionResult::new(
            record,
            Provenance {
                run_id: Uuid::new_v4(),
                document_id: "doc-1".to_string(),
                turns: 2,
                tool_calls: 1,
                corrections: 0,
                model: "test".to_string(),
                completed_at: Utc::now(),
            },
        );
        assert_eq!(
            result.to_json().to_string(),
            r#"{"title":"Report","timestamp":"2024-01-05"}"#
        );
        assert_eq!(result.document_id(), "doc-1");
    }
}
