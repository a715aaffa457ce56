use crate::models::{Member, MemberStatus};
use serde::Serialize;

/// Payment progress of a group's roster.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PaymentSummary {
    pub total_members: u32,
    pub paid_members: u32,
    pub pending_members: u32,
    pub failed_members: u32,
    pub total_collected: i64,
    pub all_paid: bool,
}

/// Pure read over member rows; rows off the roster are ignored.
pub fn summarize(members: &[Member]) -> PaymentSummary {
    let mut summary = PaymentSummary::default();
    for member in members.iter().filter(|m| m.status.is_on_roster()) {
        summary.total_members += 1;
        match member.status {
            MemberStatus::Paid => {
                summary.paid_members += 1;
                summary.total_collected += member.amount_paid;
            }
            MemberStatus::Approved | MemberStatus::PaymentPending => summary.pending_members += 1,
            MemberStatus::PaymentFailed => summary.failed_members += 1,
            _ => {}
        }
    }
    summary.all_paid = summary.total_members > 0 && summary.paid_members == summary.total_members;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn member(status: MemberStatus, amount_paid: i64) -> Member {
        let now = Utc::now();
        Member {
            id: Uuid::new_v4(),
            group_id: Uuid::nil(),
            user_id: "u".into(),
            status,
            payment_status: None,
            amount_paid,
            payment_id: None,
            joined_at: now,
            paid_at: None,
            package_approved_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_roster_is_not_all_paid() {
        let summary = summarize(&[member(MemberStatus::Pending, 0)]);
        assert_eq!(summary.total_members, 0);
        assert!(!summary.all_paid);
    }

    #[test]
    fn test_summary_counts() {
        let summary = summarize(&[
            member(MemberStatus::Paid, 5000),
            member(MemberStatus::Paid, 5100),
            member(MemberStatus::PaymentPending, 0),
            member(MemberStatus::Approved, 0),
            member(MemberStatus::PaymentFailed, 0),
            member(MemberStatus::Cancelled, 0),
            member(MemberStatus::Rejected, 0),
        ]);
        assert_eq!(
            summary,
            PaymentSummary {
                total_members: 5,
                paid_members: 2,
                pending_members: 2,
                failed_members: 1,
                total_collected: 10_100,
                all_paid: false,
            }
        );
    }

    #[test]
    fn test_all_paid() {
        let summary = summarize(&[
            member(MemberStatus::Paid, 5000),
            member(MemberStatus::Cancelled, 0),
        ]);
        assert!(summary.all_paid);
    }
}
