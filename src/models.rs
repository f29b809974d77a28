use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourse {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl From<DbCourse> for Course {
    fn from(course: DbCourse) -> Self {
        Self {
            id: course.id.unwrap_or_default(),
            title: course.title.unwrap_or_default(),
            description: course.description.unwrap_or_default(),
        }
    }
}

/// A course as listed on a teacher's dashboard.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct TaughtCourse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub enrollment_count: i64,
    pub teacher_count: i64,
}

/// One profile as listed on a course: a teacher, an enrolled student, or a
/// student available for enrollment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProfileSummary {
    pub id: i64,
    pub full_name: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(AppError::Validation(format!(
                "Unknown attendance status: {}",
                s
            ))),
        }
    }

    /// Late and excused can be read and displayed but nothing writes them.
    pub fn is_writable(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Absent)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbAttendanceRecord {
    pub id: Option<i64>,
    pub course_id: Option<i64>,
    pub student_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

impl TryFrom<DbAttendanceRecord> for AttendanceRecord {
    type Error = AppError;

    fn try_from(db: DbAttendanceRecord) -> Result<Self, Self::Error> {
        let date = db
            .date
            .ok_or_else(|| AppError::Internal("Attendance row without a date".to_string()))?;

        Ok(Self {
            id: db.id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            date,
            status: AttendanceStatus::from_str(&db.status.unwrap_or_default())?,
            notes: db.notes,
        })
    }
}

/// A record to be written; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendanceRecord {
    pub course_id: i64,
    pub student_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

impl From<&AttendanceRecord> for NewAttendanceRecord {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            course_id: record.course_id,
            student_id: record.student_id,
            date: record.date,
            status: record.status,
            notes: record.notes.clone(),
        }
    }
}

/// An attendance row joined with its course title, for student views that
/// span several courses.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CourseAttendanceRecord {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub course_title: String,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbCourseAttendanceRecord {
    #[sqlx(flatten)]
    pub record: DbAttendanceRecord,
    pub course_title: Option<String>,
}

impl TryFrom<DbCourseAttendanceRecord> for CourseAttendanceRecord {
    type Error = AppError;

    fn try_from(db: DbCourseAttendanceRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            record: AttendanceRecord::try_from(db.record)?,
            course_title: db.course_title.unwrap_or_default(),
        })
    }
}
