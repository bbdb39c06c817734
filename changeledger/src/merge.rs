use crate::entry::ChangeEntry;

/// Combine a stored entry with an incoming save for the same `change_id`.
///
/// The stored identity (`change_id`, `execution_id`, `author`) wins; every
/// descriptive field comes from `incoming`. Without a stored entry the
/// incoming one is returned as-is.
pub fn merge(existing: Option<&ChangeEntry>, incoming: ChangeEntry) -> ChangeEntry {
    match existing {
        None => incoming,
        Some(stored) => ChangeEntry {
            change_id: stored.change_id.clone(),
            execution_id: stored.execution_id.clone(),
            author: stored.author.clone(),
            ..incoming
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ChangeState, ChangeType};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn stored() -> ChangeEntry {
        ChangeEntry::new("exec-1", "c1", "alice", "com.acme.V1ChangeLog").with_change_set_method("first")
    }

    #[test]
    fn first_write_takes_incoming_verbatim() {
        let incoming = stored();
        assert_eq!(merge(None, incoming.clone()), incoming);
    }

    #[test]
    fn identity_is_pinned_to_stored_values() {
        let existing = stored();
        let incoming = ChangeEntry::new("exec-2", "c1", "mallory", "com.acme.V2ChangeLog");

        let merged = merge(Some(&existing), incoming);
        assert_eq!(merged.change_id, "c1");
        assert_eq!(merged.execution_id, "exec-1");
        assert_eq!(merged.author, "alice");
        assert_eq!(merged.change_log_class, "com.acme.V2ChangeLog");
    }

    #[test]
    fn descriptive_fields_are_replaced_wholesale() {
        let existing = stored().with_metadata(json!({"attempt": 1}));
        let mut incoming = ChangeEntry::new("exec-1", "c1", "alice", "com.acme.V1ChangeLog")
            .with_state(Some(ChangeState::Failed))
            .with_execution_millis(250);
        incoming.change_type = ChangeType::BeforeExecution;
        incoming.error_trace = Some("boom".into());
        incoming.timestamp = Utc::now() + Duration::seconds(30);
        incoming.system_change = true;

        let merged = merge(Some(&existing), incoming.clone());
        assert_eq!(merged.state, Some(ChangeState::Failed));
        assert_eq!(merged.change_type, ChangeType::BeforeExecution);
        assert_eq!(merged.execution_millis, 250);
        assert_eq!(merged.error_trace.as_deref(), Some("boom"));
        assert_eq!(merged.timestamp, incoming.timestamp);
        assert!(merged.system_change);
        // absent optional fields clear the stored ones
        assert_eq!(merged.metadata, None);
        assert_eq!(merged.change_set_method, "");
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = stored();
        let incoming = ChangeEntry::new("exec-9", "c1", "bob", "Other");
        let once = merge(Some(&existing), incoming.clone());
        let twice = merge(Some(&once), incoming);
        assert_eq!(once, twice);
    }
}
