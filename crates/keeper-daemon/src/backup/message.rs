//! Notification text for a finished run

use super::BackupOutcome;

/// Render the operator message for `outcome`.
pub fn render(data_source: &str, outcome: &BackupOutcome) -> String {
    let mut text = format!("ℹ️ Data Source: {data_source}\n\n");

    match outcome {
        BackupOutcome::Success { archive, skipped, .. } => {
            text.push_str(&format!("✅ Backup successful: {archive}"));
            if !skipped.is_empty() {
                let names: Vec<&str> = skipped.iter().map(|s| s.data_set.as_str()).collect();
                text.push_str(&format!("\n⚠️ Skipped data sets: {}", names.join(", ")));
            }
        },
        BackupOutcome::Failure { stage, cause } => {
            text.push_str(&format!("❌ Backup failed during {}: {}", stage.label(), cause));
        },
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::RunStage;
    use crate::dump::SkippedDataSet;

    #[test]
    fn test_success_message() {
        let outcome = BackupOutcome::Success {
            archive: "dump_20260101_020000.zip".to_string(),
            remote_id: "abc".to_string(),
            records: 10,
            skipped: Vec::new(),
        };
        assert_eq!(
            render("prod-cluster", &outcome),
            "ℹ️ Data Source: prod-cluster\n\n✅ Backup successful: dump_20260101_020000.zip"
        );
    }

    #[test]
    fn test_success_lists_skipped() {
        let outcome = BackupOutcome::Success {
            archive: "dump.zip".to_string(),
            remote_id: "abc".to_string(),
            records: 0,
            skipped: vec![
                SkippedDataSet {
                    data_set: "orders".to_string(),
                    reason: "cursor killed".to_string(),
                },
                SkippedDataSet {
                    data_set: "audit".to_string(),
                    reason: "timeout".to_string(),
                },
            ],
        };
        assert!(render("x", &outcome).ends_with("\n⚠️ Skipped data sets: orders, audit"));
    }

    #[test]
    fn test_failure_names_stage() {
        let outcome = BackupOutcome::Failure {
            stage: RunStage::Enumeration,
            cause: "server selection timeout".to_string(),
        };
        assert_eq!(
            render("", &outcome),
            "ℹ️ Data Source: \n\n❌ Backup failed during collection: server selection timeout"
        );
    }
}
