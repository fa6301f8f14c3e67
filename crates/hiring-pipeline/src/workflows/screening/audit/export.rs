use std::io::Write;

use serde::Serialize;

use super::AuditEvent;

#[derive(Debug, thiserror::Error)]
pub enum AuditExportError {
    #[error("failed to write audit csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush audit csv: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct AuditCsvRow<'a> {
    sequence: u64,
    timestamp: String,
    actor: &'a str,
    role: &'static str,
    action: &'static str,
    target_type: &'static str,
    target_id: &'a str,
    notes: &'a str,
}

/// Writes the events as CSV in log order.
pub fn export_csv<W: Write>(events: &[AuditEvent], writer: W) -> Result<(), AuditExportError> {
    let mut ordered: Vec<&AuditEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.order_key());

    let mut csv = csv::Writer::from_writer(writer);
    for event in ordered {
        csv.serialize(AuditCsvRow {
            sequence: event.sequence,
            timestamp: event.timestamp.to_rfc3339(),
            actor: &event.actor.id,
            role: event.actor.role.label(),
            action: event.action.label(),
            target_type: event.target.kind(),
            target_id: event.target.id().unwrap_or(""),
            notes: &event.notes,
        })?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::screening::audit::{
        AuditAction, AuditEntry, AuditSequencer, AuditTarget,
    };
    use crate::workflows::screening::domain::{Actor, JobId};
    use chrono::Utc;

    #[test]
    fn export_writes_header_and_rows() {
        let mut sequencer = AuditSequencer::default();
        let now = Utc::now();
        let events = vec![
            sequencer.stamp(
                AuditEntry::new(
                    Actor::admin("ada"),
                    AuditAction::ApprovedJob,
                    AuditTarget::Job(JobId::from("job-000001")),
                )
                .notes("risk none, approved, \"looks fine\""),
                now,
            ),
            sequencer.stamp(
                AuditEntry::new(
                    Actor::admin("ada"),
                    AuditAction::UpdatedScoringWeights,
                    AuditTarget::Global,
                ),
                now,
            ),
        ];

        let mut buffer = Vec::new();
        export_csv(&events, &mut buffer).expect("export succeeds");
        let output = String::from_utf8(buffer).expect("utf8");
        let mut lines = output.lines();

        assert_eq!(
            lines.next(),
            Some("sequence,timestamp,actor,role,action,target_type,target_id,notes")
        );
        let first = lines.next().expect("first row");
        assert!(first.starts_with("0,"));
        assert!(first.contains("ada,admin,Approved job,job,job-000001"));
        assert!(first.contains("\"risk none, approved, \"\"looks fine\"\"\""));
        let second = lines.next().expect("second row");
        assert!(second.contains("Updated scoring weights,global,,"));
    }
}
