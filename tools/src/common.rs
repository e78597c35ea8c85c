// Common functions between tools

use std::path::{Path, PathBuf};

use blackbird::{BlackbirdError, CloudClient, SessionData, Settings, fit, record};
use tracing::info;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[allow(dead_code)]
pub fn load_settings(config: Option<&String>) -> Result<Settings, String> {
    let settings = Settings::load(config.map(PathBuf::from).as_deref())
        .map_err(|e| format!("Unable to read settings: {e}"))?;
    std::fs::create_dir_all(&settings.data_dir)
        .map_err(|e| format!("Unable to create {}: {e}", settings.data_dir.display()))?;
    Ok(settings)
}

/// Loads the cached session. When none is cached and the settings
/// carry credentials, logs in with them and caches the result.
#[allow(dead_code)]
pub async fn require_session(settings: &Settings) -> Result<SessionData, BlackbirdError> {
    if let Some(session) = SessionData::load(&settings.session_file()).await {
        return Ok(session);
    }
    let (Some(username), Some(password)) = (&settings.username, &settings.password) else {
        return Err(BlackbirdError::NoSession);
    };
    info!("no cached session, attempting auto-login");
    let cloud = CloudClient::new(settings.clone())?;
    let session = cloud.login(None, username, password).await?;
    session.save(&settings.session_file()).await?;
    Ok(session)
}

/// Parse, render, compress, upload. The whole pipeline for one record.
#[allow(dead_code)]
pub async fn upload_fit(
    cloud: &CloudClient,
    session: &SessionData,
    fit_file: &Path,
    device_type: &str,
    sn: &str,
) -> Result<(), BlackbirdError> {
    let activity = fit::parse_file(fit_file)?;
    let xml = record::generate_xml(&activity, account_id(session))?;
    let (record_id, fittime) = record::record_params(activity.start_time_ms)?;
    let zip = record::compress_record(&xml, &record_id).await?;
    cloud
        .upload_record(zip, &session.ton, &record_id, &fittime, device_type, sn)
        .await?;
    Ok(())
}

#[allow(dead_code)]
pub fn account_id(session: &SessionData) -> i64 {
    session.account_id.parse().unwrap_or(0)
}
