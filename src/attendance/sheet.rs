use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{AttendanceRecord, AttendanceStatus, NewAttendanceRecord};

use super::{AttendanceStore, InFlightCommits};

/// A student's pending mark for one day. `Unmarked` is never persisted: it is
/// represented in the store by the absence of a row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    #[default]
    Unmarked,
    Present,
    Absent,
}

impl Mark {
    pub fn status(&self) -> Option<AttendanceStatus> {
        match self {
            Mark::Unmarked => None,
            Mark::Present => Some(AttendanceStatus::Present),
            Mark::Absent => Some(AttendanceStatus::Absent),
        }
    }
}

impl TryFrom<AttendanceStatus> for Mark {
    type Error = AppError;

    fn try_from(status: AttendanceStatus) -> Result<Self, Self::Error> {
        if !status.is_writable() {
            return Err(AppError::Validation(format!(
                "Status '{}' cannot be recorded",
                status
            )));
        }

        Ok(match status {
            AttendanceStatus::Absent => Mark::Absent,
            _ => Mark::Present,
        })
    }
}

/// The editable attendance of one course on one day.
///
/// `marks` only holds marked students; `notes` may hold notes for unmarked
/// students too, but those are dropped when the sheet is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySheet {
    pub course_id: i64,
    pub date: NaiveDate,
    marks: BTreeMap<i64, Mark>,
    notes: BTreeMap<i64, String>,
}

impl DaySheet {
    pub fn new(course_id: i64, date: NaiveDate) -> Self {
        Self {
            course_id,
            date,
            marks: BTreeMap::new(),
            notes: BTreeMap::new(),
        }
    }

    /// Seeds a sheet from stored rows. Rows of other days or courses are
    /// ignored, as are statuses the sheet cannot represent.
    pub fn from_records(course_id: i64, date: NaiveDate, records: &[AttendanceRecord]) -> Self {
        let mut sheet = Self::new(course_id, date);

        for record in records
            .iter()
            .filter(|r| r.course_id == course_id && r.date == date)
        {
            match Mark::try_from(record.status) {
                Ok(mark) => {
                    sheet.marks.insert(record.student_id, mark);
                }
                Err(_) => {
                    warn!(
                        student_id = record.student_id,
                        status = %record.status,
                        "Skipping attendance row with a read-only status"
                    );
                    continue;
                }
            }
            sheet
                .notes
                .insert(record.student_id, record.notes.clone().unwrap_or_default());
        }

        sheet
    }

    /// Builds a sheet from explicit marks, as sent by a client holding the
    /// whole day. `None` means unmarked.
    pub fn from_marks(
        course_id: i64,
        date: NaiveDate,
        marks: impl IntoIterator<Item = (i64, Option<AttendanceStatus>)>,
        notes: impl IntoIterator<Item = (i64, String)>,
    ) -> Result<Self, AppError> {
        let mut sheet = Self::new(course_id, date);

        for (student_id, status) in marks {
            if let Some(status) = status {
                sheet.marks.insert(student_id, Mark::try_from(status)?);
            }
        }
        sheet.notes.extend(notes);

        Ok(sheet)
    }

    pub fn mark(&self, student_id: i64) -> Mark {
        self.marks.get(&student_id).copied().unwrap_or_default()
    }

    pub fn note(&self, student_id: i64) -> Option<&str> {
        self.notes.get(&student_id).map(String::as_str)
    }

    #[cfg(test)]
    pub fn marks(&self) -> &BTreeMap<i64, Mark> {
        &self.marks
    }

    pub fn marked_count(&self) -> usize {
        self.marks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty() && self.notes.is_empty()
    }

    /// Clicking the status a student already has clears it; any other
    /// writable status replaces it. Returns the student's new mark.
    pub fn toggle_status(
        &mut self,
        student_id: i64,
        status: AttendanceStatus,
    ) -> Result<Mark, AppError> {
        let requested = Mark::try_from(status)?;

        if self.mark(student_id) == requested {
            self.marks.remove(&student_id);
            Ok(Mark::Unmarked)
        } else {
            self.marks.insert(student_id, requested);
            Ok(requested)
        }
    }

    pub fn set_note(&mut self, student_id: i64, text: impl Into<String>) {
        self.notes.insert(student_id, text.into());
    }

    /// The rows a commit writes: one per marked student, carrying the note
    /// when it is non-empty.
    pub fn to_records(&self) -> Vec<NewAttendanceRecord> {
        self.marks
            .iter()
            .filter_map(|(student_id, mark)| {
                let status = mark.status()?;
                let notes = self
                    .notes
                    .get(student_id)
                    .filter(|n| !n.is_empty())
                    .cloned();

                Some(NewAttendanceRecord {
                    course_id: self.course_id,
                    student_id: *student_id,
                    date: self.date,
                    status,
                    notes,
                })
            })
            .collect()
    }
}

/// Loads the stored attendance of a day. A day without records yields an
/// empty sheet.
#[instrument(skip(store))]
pub async fn load_day<S>(store: &S, course_id: i64, date: NaiveDate) -> Result<DaySheet, AppError>
where
    S: AttendanceStore + ?Sized,
{
    info!("Loading attendance day");
    let records = store.list_attendance(course_id, Some(date)).await?;
    Ok(DaySheet::from_records(course_id, date, &records))
}

/// Replaces the stored day with the sheet's marks. Refuses to start while
/// another commit for the same course and day is running. The sheet itself
/// is never modified.
#[instrument(skip(store, in_flight, sheet), fields(course_id = sheet.course_id, date = %sheet.date))]
pub async fn commit_day<S>(
    store: &S,
    in_flight: &InFlightCommits,
    sheet: &DaySheet,
) -> Result<usize, AppError>
where
    S: AttendanceStore + ?Sized,
{
    let _ticket = in_flight.begin(sheet.course_id, sheet.date)?;

    let records = sheet.to_records();
    store
        .replace_day(sheet.course_id, sheet.date, &records)
        .await?;

    info!(written = records.len(), "Attendance day committed");
    Ok(records.len())
}
