//! Transfer status recompute.
//!
//! Status is never patched incrementally. Every writer recomputes it from
//! the evidence rows present, so the outcome does not depend on the order in
//! which transfers and their evidence arrive.

use bridgeindex_storage::{TransferEvidence, TransferStatus};

/// `SIGNED` if confirmed; otherwise the kind of the most recent approval or
/// rejection (a tie goes to `NOT_APPROVED`); otherwise `default`.
pub fn recompute(evidence: &TransferEvidence, default: TransferStatus) -> TransferStatus {
    if evidence.has_confirmation {
        return TransferStatus::Signed;
    }
    match (evidence.latest_approval, evidence.latest_rejection) {
        (None, None) => default,
        (Some(_), None) => TransferStatus::Approved,
        (None, Some(_)) => TransferStatus::NotApproved,
        (Some(approved), Some(rejected)) if approved > rejected => TransferStatus::Approved,
        (Some(_), Some(_)) => TransferStatus::NotApproved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Option<chrono::DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn no_evidence_keeps_core_status() {
        let ev = TransferEvidence::default();
        assert_eq!(recompute(&ev, TransferStatus::Initialized), TransferStatus::Initialized);
        assert_eq!(recompute(&ev, TransferStatus::Approved), TransferStatus::Approved);
    }

    #[test]
    fn confirmation_wins_over_everything() {
        let ev = TransferEvidence {
            has_confirmation: true,
            latest_approval: at(1),
            latest_rejection: at(2),
        };
        assert_eq!(recompute(&ev, TransferStatus::Initialized), TransferStatus::Signed);
    }

    #[test]
    fn latest_decision_wins() {
        let approved_later = TransferEvidence {
            has_confirmation: false,
            latest_approval: at(20),
            latest_rejection: at(10),
        };
        let rejected_later = TransferEvidence {
            latest_approval: at(10),
            latest_rejection: at(20),
            ..approved_later
        };
        assert_eq!(recompute(&approved_later, TransferStatus::Initialized), TransferStatus::Approved);
        assert_eq!(recompute(&rejected_later, TransferStatus::Initialized), TransferStatus::NotApproved);
    }

    #[test]
    fn tie_goes_to_not_approved() {
        let ev = TransferEvidence {
            has_confirmation: false,
            latest_approval: at(5),
            latest_rejection: at(5),
        };
        assert_eq!(recompute(&ev, TransferStatus::Initialized), TransferStatus::NotApproved);
    }

    #[test]
    fn single_kind_of_evidence() {
        let approved = TransferEvidence {
            latest_approval: at(1),
            ..Default::default()
        };
        let rejected = TransferEvidence {
            latest_rejection: at(1),
            ..Default::default()
        };
        assert_eq!(recompute(&approved, TransferStatus::Signed), TransferStatus::Approved);
        assert_eq!(recompute(&rejected, TransferStatus::Initialized), TransferStatus::NotApproved);
    }
}
