use chrono::{NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use tracing::info;
use validator::Validate;

use crate::attendance::{
    AttendanceStore, AttendanceSummary, DaySheet, InFlightCommits, Mark, SqliteAttendanceStore,
    commit_day, load_day, summarize, summarize_records,
};
use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::db::{
    assign_teacher, authenticate_user, create_course, create_user, create_user_session,
    enroll_student, get_all_users, get_available_students, get_course, get_course_teachers,
    get_student_attendance, get_student_courses, get_teacher_courses, get_user, invalidate_session,
    is_course_teacher, is_enrolled, remove_enrollment, update_course, update_user_role,
};
use crate::error::AppError;
use crate::models::{
    AttendanceRecord, AttendanceStatus, Course, CourseAttendanceRecord, ProfileSummary,
    TaughtCourse,
};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse,
    ValidationResponse,
};

const SESSION_HOURS: i64 = 1;

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role.to_string(),
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, message = "Full name is required"))]
    full_name: String,
    #[validate(email(message = "A valid email is required"))]
    email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

async fn open_session(
    db: &Pool<Sqlite>,
    cookies: &CookieJar<'_>,
    user: &User,
) -> Result<(), AppError> {
    let token = UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(SESSION_HOURS);

    create_user_session(db, user.id, &token, expires_at.naive_utc()).await?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(SESSION_HOURS)),
    );

    Ok(())
}

fn login_success(user: User) -> LoginResponse {
    let redirect_url = user.role.dashboard_path().to_string();
    LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
        redirect_url: Some(redirect_url),
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            open_session(db, cookies, &user).await.validate_custom()?;
            info!(user_id = user.id, role = %user.role, "Login succeeded");
            Ok(Json(login_success(user)))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
            redirect_url: None,
        })),
    }
}

#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<SignupRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<LoginResponse>>, ApiError> {
    let validated = signup.validate_custom()?;

    let user_id = create_user(
        db,
        &validated.email,
        &validated.password,
        validated.full_name.trim(),
        Role::Student,
    )
    .await
    .validate_custom()?;

    let user = get_user(db, user_id).await.validate_custom()?;
    open_session(db, cookies, &user).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(login_success(user))))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Result<Json<UserData>, Status> {
    user.require_permission(Permission::ViewOwnProfile)?;

    Ok(Json(UserData::from(user)))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[get("/admin/profiles")]
pub async fn api_get_all_profiles(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserData>>, Status> {
    user.require_permission(Permission::ViewAllProfiles)?;

    let users = get_all_users(db).await?;

    Ok(Json(users.into_iter().map(UserData::from).collect()))
}

#[derive(Deserialize)]
pub struct RoleUpdateRequest {
    role: String,
}

#[put("/admin/profiles/<id>/role", data = "<update>")]
pub async fn api_update_role(
    id: i64,
    update: Json<RoleUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::EditUserRoles)
        .validate_custom()?;

    let role = Role::from_str(&update.role)
        .map_err(|e| AppError::Validation(e.to_string()))
        .validate_custom()?;

    update_user_role(db, id, role).await.validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
pub struct CourseRequest {
    #[validate(length(min = 1, message = "Course title is required"))]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[post("/admin/courses", data = "<course>")]
pub async fn api_create_course(
    course: Json<CourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    user.require_permission(Permission::CreateCourses)
        .validate_custom()?;
    let validated = course.validate_custom()?;

    let id = create_course(db, validated.title.trim(), &validated.description)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[derive(Deserialize)]
pub struct AssignTeacherRequest {
    teacher_id: i64,
}

#[post("/admin/courses/<id>/teachers", data = "<request>")]
pub async fn api_assign_teacher(
    id: i64,
    request: Json<AssignTeacherRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::AssignTeachers)
        .validate_custom()?;

    get_course(db, id).await.validate_custom()?;
    let teacher = get_user(db, request.teacher_id).await.validate_custom()?;
    if teacher.role != Role::Teacher {
        return Err(AppError::Validation(format!(
            "Profile {} is not a teacher",
            teacher.id
        ))
        .to_validation_response());
    }

    assign_teacher(db, id, teacher.id).await.validate_custom()?;

    Ok(Status::Ok)
}

#[get("/teacher/courses")]
pub async fn api_get_teacher_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<TaughtCourse>>, Status> {
    user.require_permission(Permission::ViewCourseRoster)?;

    Ok(Json(get_teacher_courses(db, user.id).await?))
}

#[get("/student/courses")]
pub async fn api_get_student_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Course>>, Status> {
    user.require_permission(Permission::ViewOwnAttendance)?;

    Ok(Json(get_student_courses(db, user.id).await?))
}

#[derive(Serialize, Deserialize)]
pub struct StudentAttendanceResponse {
    pub records: Vec<CourseAttendanceRecord>,
    pub stats: AttendanceSummary,
}

impl From<Vec<CourseAttendanceRecord>> for StudentAttendanceResponse {
    fn from(records: Vec<CourseAttendanceRecord>) -> Self {
        let stats = summarize(records.iter().map(|r| r.record.status));
        Self { records, stats }
    }
}

#[get("/student/attendance")]
pub async fn api_get_student_attendance(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<StudentAttendanceResponse>, Status> {
    user.require_permission(Permission::ViewOwnAttendance)?;

    let records = get_student_attendance(db, user.id, None).await?;

    Ok(Json(StudentAttendanceResponse::from(records)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CourseAccess {
    Teaching,
    Enrolled,
}

/// Resolves how `user` relates to the course: an assigned teacher (or an
/// admin managing every course), an enrolled student, or neither.
async fn course_access(
    db: &Pool<Sqlite>,
    user: &User,
    course_id: i64,
) -> Result<(Course, CourseAccess), AppError> {
    let course = get_course(db, course_id).await?;

    if user.has_permission(Permission::ManageAllCourses) {
        return Ok((course, CourseAccess::Teaching));
    }

    match user.role {
        Role::Teacher if is_course_teacher(db, course_id, user.id).await? => {
            Ok((course, CourseAccess::Teaching))
        }
        Role::Student if is_enrolled(db, course_id, user.id).await? => {
            Ok((course, CourseAccess::Enrolled))
        }
        _ => Err(AppError::Authorization(format!(
            "Profile {} has no access to course {}",
            user.id, course_id
        ))),
    }
}

async fn require_teaching(
    db: &Pool<Sqlite>,
    user: &User,
    course_id: i64,
    permission: Permission,
) -> Result<Course, ApiError> {
    user.require_permission(permission).validate_custom()?;

    match course_access(db, user, course_id).await.validate_custom()? {
        (course, CourseAccess::Teaching) => Ok(course),
        _ => Err(Status::Forbidden.to_validation_response()),
    }
}

#[derive(Serialize, Deserialize)]
pub struct CourseDetailResponse {
    pub course: Course,
    pub teachers: Vec<ProfileSummary>,
    pub students: Vec<ProfileSummary>,
    pub available_students: Option<Vec<ProfileSummary>>,
    pub attendance: Option<Vec<AttendanceRecord>>,
    pub stats: Option<AttendanceSummary>,
    pub can_edit_course: bool,
    pub can_mark_attendance: bool,
}

#[get("/courses/<id>")]
pub async fn api_get_course(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<SqliteAttendanceStore>,
) -> Result<Json<CourseDetailResponse>, ApiError> {
    let (course, access) = course_access(db, &user, id).await.validate_custom()?;

    let teachers = get_course_teachers(db, id).await.validate_custom()?;
    let students = store.list_enrolled_students(id).await.validate_custom()?;

    let mut response = CourseDetailResponse {
        course,
        teachers,
        students,
        available_students: None,
        attendance: None,
        stats: None,
        can_edit_course: false,
        can_mark_attendance: false,
    };

    if access == CourseAccess::Teaching {
        let records = store.list_attendance(id, None).await.validate_custom()?;

        response.stats = Some(summarize_records(&records));
        response.attendance = Some(records);
        response.available_students = Some(get_available_students(db, id).await.validate_custom()?);
        response.can_edit_course = user.has_permission(Permission::EditCourses);
        response.can_mark_attendance = user.has_permission(Permission::MarkAttendance);
    }

    Ok(Json(response))
}

#[put("/courses/<id>", data = "<course>")]
pub async fn api_update_course(
    id: i64,
    course: Json<CourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Course>, ApiError> {
    require_teaching(db, &user, id, Permission::EditCourses).await?;
    let validated = course.validate_custom()?;

    update_course(db, id, validated.title.trim(), &validated.description)
        .await
        .validate_custom()?;

    Ok(Json(get_course(db, id).await.validate_custom()?))
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    student_id: i64,
}

#[post("/courses/<id>/enrollments", data = "<request>")]
pub async fn api_enroll_student(
    id: i64,
    request: Json<EnrollRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    require_teaching(db, &user, id, Permission::ManageEnrollments).await?;

    let student = get_user(db, request.student_id).await.validate_custom()?;
    if student.role != Role::Student {
        return Err(AppError::Validation(format!(
            "Profile {} is not a student",
            student.id
        ))
        .to_validation_response());
    }

    enroll_student(db, id, student.id).await.validate_custom()?;

    Ok(Status::Created)
}

#[delete("/courses/<id>/enrollments/<student_id>")]
pub async fn api_remove_enrollment(
    id: i64,
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    require_teaching(db, &user, id, Permission::ManageEnrollments).await?;

    remove_enrollment(db, id, student_id)
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!("'{}' is not a calendar date (YYYY-MM-DD)", raw))
    })
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DaySheetRow {
    pub student: ProfileSummary,
    pub mark: Mark,
    pub note: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DaySheetResponse {
    pub course_id: i64,
    pub date: NaiveDate,
    pub total_students: usize,
    pub marked_count: usize,
    pub rows: Vec<DaySheetRow>,
}

impl DaySheetResponse {
    fn new(roster: Vec<ProfileSummary>, sheet: &DaySheet) -> Self {
        let rows: Vec<DaySheetRow> = roster
            .into_iter()
            .map(|student| DaySheetRow {
                mark: sheet.mark(student.id),
                note: sheet.note(student.id).unwrap_or_default().to_string(),
                student,
            })
            .collect();

        Self {
            course_id: sheet.course_id,
            date: sheet.date,
            total_students: rows.len(),
            marked_count: rows.iter().filter(|r| r.mark != Mark::Unmarked).count(),
            rows,
        }
    }
}

async fn roster_ids(store: &SqliteAttendanceStore, course_id: i64) -> Result<HashSet<i64>, AppError> {
    Ok(store
        .list_enrolled_students(course_id)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect())
}

fn ensure_on_roster<'a>(
    roster: &HashSet<i64>,
    student_ids: impl IntoIterator<Item = &'a i64>,
) -> Result<(), AppError> {
    for student_id in student_ids {
        if !roster.contains(student_id) {
            return Err(AppError::Validation(format!(
                "Student {} is not enrolled in this course",
                student_id
            )));
        }
    }
    Ok(())
}

async fn day_sheet_response(
    store: &SqliteAttendanceStore,
    course_id: i64,
    date: NaiveDate,
) -> Result<DaySheetResponse, AppError> {
    let roster = store.list_enrolled_students(course_id).await?;
    let sheet = load_day(store, course_id, date).await?;
    Ok(DaySheetResponse::new(roster, &sheet))
}

#[get("/courses/<id>/attendance?<date>")]
pub async fn api_get_day_sheet(
    id: i64,
    date: Option<&str>,
    user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<SqliteAttendanceStore>,
) -> Result<Json<DaySheetResponse>, ApiError> {
    require_teaching(db, &user, id, Permission::MarkAttendance).await?;

    let date = match date {
        Some(raw) => parse_date(raw).validate_custom()?,
        None => Utc::now().date_naive(),
    };

    Ok(Json(day_sheet_response(store, id, date).await.validate_custom()?))
}

#[derive(Deserialize)]
pub struct CommitDayRequest {
    #[serde(default)]
    marks: HashMap<i64, Option<AttendanceStatus>>,
    #[serde(default)]
    notes: HashMap<i64, String>,
}

#[put("/courses/<id>/attendance/<date>", data = "<request>")]
pub async fn api_commit_day(
    id: i64,
    date: &str,
    request: Json<CommitDayRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<SqliteAttendanceStore>,
    in_flight: &State<InFlightCommits>,
) -> Result<Json<DaySheetResponse>, ApiError> {
    require_teaching(db, &user, id, Permission::MarkAttendance).await?;
    let date = parse_date(date).validate_custom()?;

    let CommitDayRequest { marks, notes } = request.into_inner();

    let roster = roster_ids(store, id).await.validate_custom()?;
    ensure_on_roster(&roster, marks.keys().chain(notes.keys())).validate_custom()?;

    let sheet = DaySheet::from_marks(id, date, marks, notes).validate_custom()?;
    if sheet.marked_count() == 0 {
        return Err(Custom(
            Status::BadRequest,
            Json(ValidationResponse::with_error(
                "marks",
                "Mark at least one student before saving",
            )),
        ));
    }

    commit_day(store.inner(), in_flight, &sheet)
        .await
        .validate_custom()?;

    Ok(Json(day_sheet_response(store, id, date).await.validate_custom()?))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Toggle(AttendanceStatus),
    Note(String),
}

#[derive(Deserialize, Debug, Clone)]
pub struct SheetEdit {
    student_id: i64,
    #[serde(flatten)]
    action: EditAction,
}

#[derive(Deserialize)]
pub struct EditDayRequest {
    edits: Vec<SheetEdit>,
}

/// Applies toggles and notes on top of the stored day, then commits. Unlike
/// the full-sheet save, this may leave the day with no marks at all.
#[post("/courses/<id>/attendance/<date>/edits", data = "<request>")]
pub async fn api_edit_day(
    id: i64,
    date: &str,
    request: Json<EditDayRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<SqliteAttendanceStore>,
    in_flight: &State<InFlightCommits>,
) -> Result<Json<DaySheetResponse>, ApiError> {
    require_teaching(db, &user, id, Permission::MarkAttendance).await?;
    let date = parse_date(date).validate_custom()?;

    let roster = roster_ids(store, id).await.validate_custom()?;
    ensure_on_roster(&roster, request.edits.iter().map(|e| &e.student_id)).validate_custom()?;

    let mut sheet = load_day(store.inner(), id, date).await.validate_custom()?;
    for edit in &request.edits {
        match &edit.action {
            EditAction::Toggle(status) => {
                sheet
                    .toggle_status(edit.student_id, *status)
                    .validate_custom()?;
            }
            EditAction::Note(text) => sheet.set_note(edit.student_id, text.clone()),
        }
    }

    commit_day(store.inner(), in_flight, &sheet)
        .await
        .validate_custom()?;

    Ok(Json(day_sheet_response(store, id, date).await.validate_custom()?))
}

#[derive(Serialize, Deserialize)]
pub struct MyAttendanceResponse {
    pub course: Course,
    pub records: Vec<CourseAttendanceRecord>,
    pub stats: AttendanceSummary,
}

#[get("/courses/<id>/my-attendance")]
pub async fn api_get_my_attendance(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MyAttendanceResponse>, ApiError> {
    user.require_permission(Permission::ViewOwnAttendance)
        .validate_custom()?;

    let course = match course_access(db, &user, id).await.validate_custom()? {
        (course, CourseAccess::Enrolled) => course,
        _ => return Err(Status::Forbidden.to_validation_response()),
    };

    let records = get_student_attendance(db, user.id, Some(id))
        .await
        .validate_custom()?;
    let StudentAttendanceResponse { records, stats } = StudentAttendanceResponse::from(records);

    Ok(Json(MyAttendanceResponse {
        course,
        records,
        stats,
    }))
}
