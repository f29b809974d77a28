use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::AppError;

/// Tracks (course, date) pairs with a commit in progress so a second save of
/// the same day is refused instead of racing the first.
#[derive(Debug, Default)]
pub struct InFlightCommits {
    days: Mutex<HashSet<(i64, NaiveDate)>>,
}

#[derive(Debug)]
pub struct CommitTicket<'a> {
    owner: &'a InFlightCommits,
    key: (i64, NaiveDate),
}

impl InFlightCommits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, course_id: i64, date: NaiveDate) -> Result<CommitTicket<'_>, AppError> {
        let key = (course_id, date);
        let mut days = self.days.lock().unwrap_or_else(|e| e.into_inner());

        if !days.insert(key) {
            return Err(AppError::Conflict(format!(
                "Attendance for course {} on {} is already being saved",
                course_id, date
            )));
        }

        Ok(CommitTicket { owner: self, key })
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, course_id: i64, date: NaiveDate) -> bool {
        self.days
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(course_id, date))
    }
}

impl Drop for CommitTicket<'_> {
    fn drop(&mut self) {
        self.owner
            .days
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
