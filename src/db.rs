//! Profile, session, course and enrollment queries.
//!
//! Queries are built at runtime with `sqlx::query`/`query_as` rather than the
//! `query!` macros, so building the crate needs no `DATABASE_URL` and no
//! prepared query cache. Row shapes are checked by the tests under
//! `src/test/`, which run every query against the migrated schema.

use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::models::{
    Course, CourseAttendanceRecord, DbCourse, DbCourseAttendanceRecord, ProfileSummary,
    TaughtCourse,
};

const PROFILE_COLUMNS: &str = "SELECT id, email, full_name, role FROM profiles";

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching profile by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE id = ?", PROFILE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "Profile with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Finding profile by email");
    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE email = ?", PROFILE_COLUMNS))
        .bind(email)
        .fetch_optional(pool)
        .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        password: String,
    }

    let row = sqlx::query_as::<_, Credentials>("SELECT id, password FROM profiles WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(credentials) => match bcrypt::verify(password, &credentials.password) {
            Ok(true) => Ok(Some(get_user(pool, credentials.id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(email, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    full_name: &str,
    role: Role,
) -> Result<i64, AppError> {
    info!("Creating new profile");

    if find_user_by_email(pool, email).await?.is_some() {
        return Err(AppError::Conflict(format!("Email '{}' already exists", email)));
    }

    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;

    let res = sqlx::query(
        "INSERT INTO profiles (email, password, full_name, role) VALUES (?, ?, ?, ?)",
    )
    .bind(email)
    .bind(hashed_password)
    .bind(full_name)
    .bind(role.as_str())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    info!("Getting all profiles");
    let rows = sqlx::query_as::<_, DbUser>(&format!("{} ORDER BY id", PROFILE_COLUMNS))
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(User::try_from).collect()
}

#[instrument]
pub async fn update_user_role(pool: &Pool<Sqlite>, user_id: i64, role: Role) -> Result<(), AppError> {
    info!("Updating profile role");
    let res = sqlx::query("UPDATE profiles SET role = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Profile with id {} not found in database",
            user_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    title: &str,
    description: &str,
) -> Result<i64, AppError> {
    info!("Creating course");
    let res = sqlx::query("INSERT INTO courses (title, description) VALUES (?, ?)")
        .bind(title)
        .bind(description)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Course, AppError> {
    info!("Getting course");
    let row = sqlx::query_as::<_, DbCourse>("SELECT id, title, description FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(course) => Ok(Course::from(course)),
        _ => Err(AppError::NotFound(format!(
            "Course with id {} not found in database",
            course_id
        ))),
    }
}

#[instrument]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    title: &str,
    description: &str,
) -> Result<(), AppError> {
    info!("Updating course");
    let res = sqlx::query("UPDATE courses SET title = ?, description = ? WHERE id = ?")
        .bind(title)
        .bind(description)
        .bind(course_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Course with id {} not found in database",
            course_id
        )));
    }

    Ok(())
}

#[instrument]
pub async fn assign_teacher(
    pool: &Pool<Sqlite>,
    course_id: i64,
    teacher_id: i64,
) -> Result<(), AppError> {
    info!("Assigning teacher to course");
    sqlx::query("INSERT OR IGNORE INTO course_teachers (course_id, teacher_id) VALUES (?, ?)")
        .bind(course_id)
        .bind(teacher_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn is_course_teacher(
    pool: &Pool<Sqlite>,
    course_id: i64,
    teacher_id: i64,
) -> Result<bool, AppError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM course_teachers WHERE course_id = ? AND teacher_id = ?")
            .bind(course_id)
            .bind(teacher_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.is_some())
}

#[instrument]
pub async fn get_course_teachers(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<ProfileSummary>, AppError> {
    info!("Getting course teachers");
    let rows = sqlx::query_as::<_, ProfileSummary>(
        "SELECT p.id, p.full_name, p.email
         FROM course_teachers ct
         JOIN profiles p ON p.id = ct.teacher_id
         WHERE ct.course_id = ?
         ORDER BY p.full_name",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_teacher_courses(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
) -> Result<Vec<TaughtCourse>, AppError> {
    info!("Getting courses for teacher");
    let rows = sqlx::query_as::<_, TaughtCourse>(
        "SELECT c.id, c.title, COALESCE(c.description, '') AS description,
            (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count,
            (SELECT COUNT(*) FROM course_teachers t WHERE t.course_id = c.id) AS teacher_count
         FROM course_teachers ct
         JOIN courses c ON c.id = ct.course_id
         WHERE ct.teacher_id = ?
         ORDER BY c.title",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_student_courses(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<Course>, AppError> {
    info!("Getting enrolled courses for student");
    let rows = sqlx::query_as::<_, DbCourse>(
        "SELECT c.id, c.title, c.description
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ?
         ORDER BY c.title",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument]
pub async fn is_enrolled(
    pool: &Pool<Sqlite>,
    course_id: i64,
    student_id: i64,
) -> Result<bool, AppError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?")
            .bind(course_id)
            .bind(student_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.is_some())
}

#[instrument]
pub async fn enroll_student(
    pool: &Pool<Sqlite>,
    course_id: i64,
    student_id: i64,
) -> Result<i64, AppError> {
    info!("Enrolling student");

    if is_enrolled(pool, course_id, student_id).await? {
        return Err(AppError::Conflict(format!(
            "Student {} is already enrolled in course {}",
            student_id, course_id
        )));
    }

    let res = sqlx::query("INSERT INTO enrollments (course_id, student_id) VALUES (?, ?)")
        .bind(course_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn remove_enrollment(
    pool: &Pool<Sqlite>,
    course_id: i64,
    student_id: i64,
) -> Result<(), AppError> {
    info!("Removing enrollment");
    let res = sqlx::query("DELETE FROM enrollments WHERE course_id = ? AND student_id = ?")
        .bind(course_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student {} is not enrolled in course {}",
            student_id, course_id
        )));
    }

    Ok(())
}

/// Students who could still be enrolled in the course.
#[instrument]
pub async fn get_available_students(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<ProfileSummary>, AppError> {
    info!("Getting students available for enrollment");
    let rows = sqlx::query_as::<_, ProfileSummary>(
        "SELECT p.id, p.full_name, p.email FROM profiles p
         WHERE p.role = 'student'
           AND p.id NOT IN (SELECT student_id FROM enrollments WHERE course_id = ?)
         ORDER BY p.full_name",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_student_attendance(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: Option<i64>,
) -> Result<Vec<CourseAttendanceRecord>, AppError> {
    info!("Getting attendance for student");
    let rows = sqlx::query_as::<_, DbCourseAttendanceRecord>(
        "SELECT a.id, a.course_id, a.student_id, a.date, a.status, a.notes,
            c.title AS course_title
         FROM attendance a
         JOIN courses c ON c.id = a.course_id
         WHERE a.student_id = ? AND (? IS NULL OR a.course_id = ?)
         ORDER BY a.date DESC, c.title",
    )
    .bind(student_id)
    .bind(course_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CourseAttendanceRecord::try_from).collect()
}
