//! Per-record validation (§4.4 Validation).

use claudelens_core::{ContentPayload, MessageType};

use super::pipeline::IngestRecord;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Validates one raw record, collecting every failing field rather than
/// stopping at the first (per-record detail surfaced in `ValidationFailure`,
/// §7).
pub fn validate_record(record: &IngestRecord) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if record.uuid.trim().is_empty() {
        errors.push(FieldError {
            field: "uuid",
            message: "must be a non-empty identifier".to_string(),
        });
    }

    if record.session_id.trim().is_empty() {
        errors.push(FieldError {
            field: "session_id",
            message: "must be non-empty".to_string(),
        });
    }

    if record.message_type == MessageType::Assistant && record.content.is_none() {
        errors.push(FieldError {
            field: "message",
            message: "assistant records must carry a message payload".to_string(),
        });
    }

    if let Some(cost) = record.cost {
        if !(0.0..100.0).contains(&cost) {
            errors.push(FieldError {
                field: "cost",
                message: "must be in [0, 100)".to_string(),
            });
        }
    }

    errors
}

/// `true` when `content` is present and carries at least an empty text body
/// -- used only to check "is a payload present at all", not its shape.
#[must_use]
pub fn has_payload(content: &Option<ContentPayload>) -> bool {
    content.is_some()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn base_record() -> IngestRecord {
        IngestRecord {
            uuid: "u1".to_string(),
            session_id: "s1".to_string(),
            parent_uuid: None,
            message_type: MessageType::User,
            content: Some(ContentPayload::Text("hi".to_string())),
            timestamp: Utc::now(),
            cost: None,
            model: None,
            usage: None,
            latency_ms: None,
            git_branch: None,
            cwd: "/proj".to_string(),
        }
    }

    #[test]
    fn valid_record_has_no_errors() {
        assert!(validate_record(&base_record()).is_empty());
    }

    #[test]
    fn empty_uuid_is_rejected() {
        let mut record = base_record();
        record.uuid = String::new();
        let errors = validate_record(&record);
        assert!(errors.iter().any(|e| e.field == "uuid"));
    }

    #[test]
    fn assistant_without_payload_is_rejected() {
        let mut record = base_record();
        record.message_type = MessageType::Assistant;
        record.content = None;
        let errors = validate_record(&record);
        assert!(errors.iter().any(|e| e.field == "message"));
    }

    #[test]
    fn cost_out_of_range_is_rejected() {
        let mut record = base_record();
        record.cost = Some(100.0);
        let errors = validate_record(&record);
        assert!(errors.iter().any(|e| e.field == "cost"));

        record.cost = Some(-1.0);
        let errors = validate_record(&record);
        assert!(errors.iter().any(|e| e.field == "cost"));
    }
}
