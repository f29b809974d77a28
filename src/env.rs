use std::path::Path;

use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://attendance.db?mode=rwc";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    for env_file in env_files_for_profile(&current_profile()) {
        load_env_file(env_file)?;
    }

    Ok(())
}

pub fn current_profile() -> String {
    dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string())
}

fn env_files_for_profile(profile: &str) -> Vec<&'static str> {
    if profile == "production" {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    }
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

pub fn database_url() -> String {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            warn!(
                default = DEFAULT_DATABASE_URL,
                "DATABASE_URL not set, using default"
            );
            DEFAULT_DATABASE_URL.to_string()
        }
    }
}
