//! Attendance persistence. `SqliteAttendanceStore` builds its queries at
//! runtime with `sqlx::query`/`query_as`, as `crate::db` does, so its SQL is
//! checked by the store tests in `src/test/attendance.rs` instead of at
//! compile time.

use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tracing::{error, info, instrument, warn};

use crate::error::AppError;
use crate::models::{
    AttendanceRecord, DbAttendanceRecord, NewAttendanceRecord, ProfileSummary,
};

/// The persistence seam the day sheet is loaded from and committed to.
#[rocket::async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn list_enrolled_students(
        &self,
        course_id: i64,
    ) -> Result<Vec<ProfileSummary>, AppError>;

    async fn list_attendance(
        &self,
        course_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, AppError>;

    /// Removes every record of the day. Deleting an empty day is not an error.
    async fn delete_attendance(&self, course_id: i64, date: NaiveDate) -> Result<u64, AppError>;

    async fn insert_attendance(&self, records: &[NewAttendanceRecord]) -> Result<(), AppError>;

    /// Replaces the day's records with `records`.
    ///
    /// The default runs delete then insert as two calls. When the insert
    /// fails the previous rows are written back; if that also fails the day
    /// is left empty and `AppError::PartialCommit` is returned. Stores with
    /// transactions override this with an atomic version.
    async fn replace_day(
        &self,
        course_id: i64,
        date: NaiveDate,
        records: &[NewAttendanceRecord],
    ) -> Result<(), AppError> {
        let previous: Vec<NewAttendanceRecord> = self
            .list_attendance(course_id, Some(date))
            .await?
            .iter()
            .map(NewAttendanceRecord::from)
            .collect();

        self.delete_attendance(course_id, date).await?;

        if records.is_empty() {
            return Ok(());
        }

        let insert_error = match self.insert_attendance(records).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!(course_id, %date, error = %insert_error, "Insert failed after delete, restoring previous records");

        if previous.is_empty() {
            return Err(insert_error);
        }

        match self.insert_attendance(&previous).await {
            Ok(()) => Err(insert_error),
            Err(restore_error) => {
                error!(course_id, %date, error = %restore_error, "Failed to restore attendance");
                Err(AppError::PartialCommit(format!(
                    "attendance for course {} on {} was cleared but not rewritten: {}",
                    course_id, date, insert_error
                )))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteAttendanceStore {
    pool: Pool<Sqlite>,
}

impl SqliteAttendanceStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

const INSERT_ATTENDANCE: &str =
    "INSERT INTO attendance (course_id, student_id, date, status, notes) VALUES (?, ?, ?, ?, ?)";

#[rocket::async_trait]
impl AttendanceStore for SqliteAttendanceStore {
    #[instrument(skip(self))]
    async fn list_enrolled_students(
        &self,
        course_id: i64,
    ) -> Result<Vec<ProfileSummary>, AppError> {
        info!("Listing enrolled students");
        let rows = sqlx::query_as::<_, ProfileSummary>(
            "SELECT p.id, p.full_name, p.email
             FROM enrollments e
             JOIN profiles p ON p.id = e.student_id
             WHERE e.course_id = ?
             ORDER BY e.id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn list_attendance(
        &self,
        course_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, AppError> {
        info!("Listing attendance");
        let rows = sqlx::query_as::<_, DbAttendanceRecord>(
            "SELECT id, course_id, student_id, date, status, notes
             FROM attendance
             WHERE course_id = ? AND (? IS NULL OR date = ?)
             ORDER BY date DESC, student_id",
        )
        .bind(course_id)
        .bind(date)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AttendanceRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn delete_attendance(&self, course_id: i64, date: NaiveDate) -> Result<u64, AppError> {
        info!("Deleting attendance for day");
        let res = sqlx::query("DELETE FROM attendance WHERE course_id = ? AND date = ?")
            .bind(course_id)
            .bind(date)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected())
    }

    #[instrument(skip_all, fields(count = records.len()))]
    async fn insert_attendance(&self, records: &[NewAttendanceRecord]) -> Result<(), AppError> {
        info!("Inserting attendance records");
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(INSERT_ATTENDANCE)
                .bind(record.course_id)
                .bind(record.student_id)
                .bind(record.date)
                .bind(record.status.as_str())
                .bind(record.notes.as_deref())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn replace_day(
        &self,
        course_id: i64,
        date: NaiveDate,
        records: &[NewAttendanceRecord],
    ) -> Result<(), AppError> {
        info!("Replacing attendance for day");
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM attendance WHERE course_id = ? AND date = ?")
            .bind(course_id)
            .bind(date)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for record in records {
            sqlx::query(INSERT_ATTENDANCE)
                .bind(record.course_id)
                .bind(record.student_id)
                .bind(record.date)
                .bind(record.status.as_str())
                .bind(record.notes.as_deref())
                .execute(&mut *tx)
                .await?;
        }

        // Dropping the transaction on an early return rolls both phases back
        tx.commit().await?;

        info!(deleted, inserted = records.len(), "Attendance day replaced");
        Ok(())
    }
}
