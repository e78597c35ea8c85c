// Convert and upload one .fit file

use std::path::PathBuf;

use blackbird::{CloudClient, UploadHistory};
use clap::{Arg, Command};

mod common;

#[tokio::main]
async fn main() {
    common::init_logging();

    let matches = Command::new("bb_upload")
        .about("Convert and upload a .fit file to the server")
        .arg(
            Arg::new("fit_file")
                .value_name("FIT_FILE")
                .required(true)
                .index(1)
                .help("The .fit file to upload"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the settings file"),
        )
        .arg(
            Arg::new("device_type")
                .long("device-type")
                .value_name("TYPE")
                .help("Device type; defaults to the settings value"),
        )
        .arg(
            Arg::new("sn")
                .long("sn")
                .value_name("SERIAL")
                .help("Device serial number; defaults to the settings value"),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("about") {
        println!("bb_upload - upload a single record");
        return;
    }

    let settings = match common::load_settings(matches.get_one::<String>("config")) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    let session = match common::require_session(&settings).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let fit_file = PathBuf::from(matches.get_one::<String>("fit_file").unwrap());
    if !fit_file.exists() {
        eprintln!("File not found: {}", fit_file.display());
        std::process::exit(1);
    }
    let device_type = matches
        .get_one::<String>("device_type")
        .unwrap_or(&settings.device_type)
        .clone();
    let sn = matches
        .get_one::<String>("sn")
        .unwrap_or(&settings.device_sn)
        .clone();

    let cloud = CloudClient::new(settings.clone()).expect("Unable to build http client");
    if let Err(e) = common::upload_fit(&cloud, &session, &fit_file, &device_type, &sn).await {
        eprintln!("Error during upload: {e}");
        std::process::exit(1);
    }

    if let Some(name) = fit_file.file_name().and_then(|n| n.to_str()) {
        let mut history = UploadHistory::load(&settings.history_file()).await;
        history.insert(name);
        if let Err(e) = history.save(&settings.history_file()).await {
            eprintln!("Unable to update the upload history: {e}");
        }
    }
    println!("Upload successful");
}
