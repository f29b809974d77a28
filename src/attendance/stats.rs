use serde::{Deserialize, Serialize};

use crate::models::{AttendanceRecord, AttendanceStatus};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttendanceSummary {
    pub present: u32,
    pub absent: u32,
    pub total: u32,
    pub percentage: u32,
}

/// Reduces statuses to counts. Late and excused count toward `total` only.
/// The percentage rounds half up.
pub fn summarize<I>(statuses: I) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut summary = AttendanceSummary::default();

    for status in statuses {
        summary.total += 1;
        match status {
            AttendanceStatus::Present => summary.present += 1,
            AttendanceStatus::Absent => summary.absent += 1,
            AttendanceStatus::Late | AttendanceStatus::Excused => {}
        }
    }

    summary.percentage = percentage(summary.present, summary.total);
    summary
}

pub fn summarize_records<'a, I>(records: I) -> AttendanceSummary
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    summarize(records.into_iter().map(|r| r.status))
}

fn percentage(present: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (present, total) = (u64::from(present), u64::from(total));
    ((present * 200 + total) / (total * 2)) as u32
}
