#[cfg(test)]
pub mod test_db {
    use crate::attendance::{AttendanceStore, SqliteAttendanceStore};
    use crate::auth::Role;
    use crate::db::{assign_teacher, create_course, create_user, enroll_student};
    use crate::error::AppError;
    use crate::models::{AttendanceStatus, NewAttendanceRecord};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        courses: Vec<TestCourse>,
        teachings: Vec<(String, String)>,
        enrollments: Vec<(String, String)>,
        attendance: Vec<TestAttendance>,
    }

    pub struct TestUser {
        pub email: String,
        pub full_name: String,
        pub role: Role,
    }

    pub struct TestCourse {
        pub title: String,
        pub description: String,
    }

    pub struct TestAttendance {
        pub course_title: String,
        pub student_email: String,
        pub date: NaiveDate,
        pub status: AttendanceStatus,
        pub notes: Option<String>,
    }

    pub fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("Invalid test date")
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, email: &str, full_name: &str, role: Role) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                full_name: full_name.to_string(),
                role,
            });
            self
        }

        pub fn student(self, email: &str, full_name: &str) -> Self {
            self.user(email, full_name, Role::Student)
        }

        pub fn teacher(self, email: &str, full_name: &str) -> Self {
            self.user(email, full_name, Role::Teacher)
        }

        pub fn admin(self, email: &str, full_name: &str) -> Self {
            self.user(email, full_name, Role::Admin)
        }

        pub fn course(mut self, title: &str, description: &str) -> Self {
            self.courses.push(TestCourse {
                title: title.to_string(),
                description: description.to_string(),
            });
            self
        }

        pub fn teaches(mut self, teacher_email: &str, course_title: &str) -> Self {
            self.teachings
                .push((course_title.to_string(), teacher_email.to_string()));
            self
        }

        pub fn enroll(mut self, student_email: &str, course_title: &str) -> Self {
            self.enrollments
                .push((course_title.to_string(), student_email.to_string()));
            self
        }

        pub fn attendance(
            mut self,
            course_title: &str,
            student_email: &str,
            day: &str,
            status: AttendanceStatus,
            notes: Option<&str>,
        ) -> Self {
            self.attendance.push(TestAttendance {
                course_title: course_title.to_string(),
                student_email: student_email.to_string(),
                date: date(day),
                status,
                notes: notes.map(String::from),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // One long-lived connection keeps the in-memory database alive
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut course_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.email,
                    STANDARD_PASSWORD,
                    &user.full_name,
                    user.role,
                )
                .await?;

                user_id_map.insert(user.email.clone(), user_id);
            }

            for course in &self.courses {
                let course_id = create_course(&pool, &course.title, &course.description).await?;
                course_id_map.insert(course.title.clone(), course_id);
            }

            let lookup = |map: &HashMap<String, i64>, key: &str| {
                map.get(key)
                    .copied()
                    .ok_or_else(|| AppError::NotFound(format!("Unknown test fixture '{}'", key)))
            };

            for (course_title, teacher_email) in &self.teachings {
                assign_teacher(
                    &pool,
                    lookup(&course_id_map, course_title)?,
                    lookup(&user_id_map, teacher_email)?,
                )
                .await?;
            }

            for (course_title, student_email) in &self.enrollments {
                enroll_student(
                    &pool,
                    lookup(&course_id_map, course_title)?,
                    lookup(&user_id_map, student_email)?,
                )
                .await?;
            }

            let mut records = Vec::new();
            for a in &self.attendance {
                records.push(NewAttendanceRecord {
                    course_id: lookup(&course_id_map, &a.course_title)?,
                    student_id: lookup(&user_id_map, &a.student_email)?,
                    date: a.date,
                    status: a.status,
                    notes: a.notes.clone(),
                });
            }
            if !records.is_empty() {
                SqliteAttendanceStore::new(pool.clone())
                    .insert_attendance(&records)
                    .await?;
            }

            Ok(TestDb {
                pool,
                user_id_map,
                course_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub course_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> Option<i64> {
            self.user_id_map.get(email).copied()
        }

        pub fn course_id(&self, title: &str) -> Option<i64> {
            self.course_id_map.get(title).copied()
        }

        pub fn store(&self) -> SqliteAttendanceStore {
            SqliteAttendanceStore::new(self.pool.clone())
        }

        pub async fn attendance_count(
            &self,
            course_id: i64,
            day: NaiveDate,
        ) -> Result<i64, sqlx::Error> {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM attendance WHERE course_id = ? AND date = ?")
                    .bind(course_id)
                    .bind(day)
                    .fetch_one(&self.pool)
                    .await?;

            Ok(count)
        }

        pub async fn student_row_count(
            &self,
            course_id: i64,
            student_id: i64,
            day: NaiveDate,
        ) -> Result<i64, sqlx::Error> {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM attendance WHERE course_id = ? AND student_id = ? AND date = ?",
            )
            .bind(course_id)
            .bind(student_id)
            .bind(day)
            .fetch_one(&self.pool)
            .await?;

            Ok(count)
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::init_rocket;
    use crate::models::AttendanceStatus::{Absent, Present};

    pub const ADMIN: &str = "admin@school.test";
    pub const TEACHER: &str = "teacher@school.test";
    pub const OTHER_TEACHER: &str = "other.teacher@school.test";
    pub const ALICE: &str = "alice@school.test";
    pub const BOB: &str = "bob@school.test";
    pub const CAROL: &str = "carol@school.test";
    pub const ALGEBRA: &str = "Algebra";
    pub const HISTORY: &str = "History";

    /// Two courses: Algebra (Alice and Bob, two recorded days) and History
    /// (Alice, one day). Carol is a student with no enrollments.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin(ADMIN, "Ada Admin")
            .teacher(TEACHER, "Terry Teacher")
            .teacher(OTHER_TEACHER, "Olive Other")
            .student(ALICE, "Alice Anders")
            .student(BOB, "Bob Brown")
            .student(CAROL, "Carol Clark")
            .course(ALGEBRA, "Linear equations")
            .course(HISTORY, "")
            .teaches(TEACHER, ALGEBRA)
            .teaches(OTHER_TEACHER, HISTORY)
            .enroll(ALICE, ALGEBRA)
            .enroll(BOB, ALGEBRA)
            .enroll(ALICE, HISTORY)
            .attendance(ALGEBRA, ALICE, "2025-09-01", Present, None)
            .attendance(ALGEBRA, BOB, "2025-09-01", Absent, Some("sick"))
            .attendance(ALGEBRA, ALICE, "2025-09-02", Present, None)
            .attendance(ALGEBRA, BOB, "2025-09-02", Present, None)
            .attendance(HISTORY, ALICE, "2025-09-01", Absent, None)
            .build()
            .await
            .expect("Failed to build standard test DB")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone()).await;
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to create test client");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, email: &str) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        response.cookies().iter().cloned().collect()
    }
}
