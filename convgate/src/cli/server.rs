use std::path::PathBuf;

use clap::ArgMatches;
use server::config::Config;
use server::StartError;

/// Starts the gateway with `CONVGATE_*` settings, command line values winning.
pub async fn run(matches: &ArgMatches) -> Result<(), StartError> {
    server::init_tracing();

    let mut config = Config::from_env()?;
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config.data_dir.clone_from(dir);
    }

    tracing::info!(
        "data: {} max upload: {} bytes retention: {}s",
        config.data_dir.display(),
        config.max_upload_bytes,
        config.retention.as_secs()
    );
    let result = server::run(config).await;
    if let Err(e) = &result {
        tracing::error!("gateway stopped: {e}");
    }
    result
}
