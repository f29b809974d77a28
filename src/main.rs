#[macro_use]
extern crate rocket;

mod api;
mod attendance;
mod auth;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_assign_teacher, api_commit_day, api_create_course, api_edit_day, api_enroll_student,
    api_get_all_profiles, api_get_course, api_get_day_sheet, api_get_my_attendance,
    api_get_student_attendance, api_get_student_courses, api_get_teacher_courses, api_login,
    api_logout, api_me, api_remove_enrollment, api_signup, api_update_course, api_update_role,
    health,
};
use attendance::{InFlightCommits, SqliteAttendanceStore};
use auth::{forbidden_api, unauthorized_api};
use db::clean_expired_sessions;
use error::AppError;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use tracing::info;

const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Rocket(#[from] rocket::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let _telemetry = telemetry::init_tracing();

    let database_url = env::database_url();
    let pool = SqlitePoolOptions::new().connect(&database_url).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    spawn_session_cleanup(pool.clone());

    let _rocket = init_rocket(pool).await.launch().await?;

    Ok(())
}

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ))
            .await;
        }
    });
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting attendance tracker");

    rocket::build()
        .manage(SqliteAttendanceStore::new(pool.clone()))
        .manage(InFlightCommits::new())
        .manage(pool)
        .mount(
            "/api",
            routes![
                api_login,
                api_signup,
                api_logout,
                api_me,
                api_get_all_profiles,
                api_update_role,
                api_create_course,
                api_assign_teacher,
                api_get_teacher_courses,
                api_get_student_courses,
                api_get_student_attendance,
                api_get_course,
                api_update_course,
                api_enroll_student,
                api_remove_enrollment,
                api_get_day_sheet,
                api_commit_day,
                api_edit_day,
                api_get_my_attendance,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(telemetry::TelemetryFairing)
}
