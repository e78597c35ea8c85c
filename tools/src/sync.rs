// Sync records from the device, then upload anything new

use std::path::PathBuf;
use std::time::Duration;

use blackbird::{Bb16Client, BleConnection, CloudClient, Settings, UploadHistory};
use clap::{Arg, Command};

mod common;

#[tokio::main]
async fn main() {
    common::init_logging();

    let matches = Command::new("bb_sync")
        .about("Sync records from the device and upload new ones")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the settings file"),
        )
        .arg(
            Arg::new("address")
                .long("address")
                .value_name("ADDRESS")
                .help("Bluetooth address of the device; overrides the settings file"),
        )
        .arg(
            Arg::new("skip_upload")
                .long("skip-upload")
                .help("Download records but do not upload them")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("loop")
                .long("loop")
                .help("Keep syncing at the configured interval")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("about") {
        println!("bb_sync - sync a BB16 device with the cloud");
        return;
    }

    let settings = match common::load_settings(matches.get_one::<String>("config")) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    let Some(address) = matches
        .get_one::<String>("address")
        .cloned()
        .or_else(|| settings.ble_address.clone())
    else {
        eprintln!("No bluetooth address. Set ble_address in the settings file or pass --address.");
        return;
    };

    let skip_upload = matches.get_flag("skip_upload");
    loop {
        if let Err(e) = sync_once(&settings, &address, skip_upload).await {
            eprintln!("Sync failed: {e}");
        }
        if !matches.get_flag("loop") {
            break;
        }
        tokio::time::sleep(Duration::from_secs(settings.sync_interval_secs)).await;
    }
}

async fn sync_once(settings: &Settings, address: &str, skip_upload: bool) -> Result<(), String> {
    println!("Connecting to {address}...");
    let link = BleConnection::connect(address)
        .await
        .map_err(|e| format!("unable to connect: {e}"))?;
    let mut device = Bb16Client::open(link)
        .await
        .map_err(|e| format!("unable to open the session: {e}"))?;

    let result = device.sync_records(&settings.data_dir).await;
    if let Err(e) = device.close().await {
        eprintln!("Trouble closing the session: {e}");
    }
    let new_records = result.map_err(|e| format!("device sync failed: {e}"))?;
    println!("Downloaded {} new records: {new_records:?}", new_records.len());

    if skip_upload {
        return Ok(());
    }
    let session = common::require_session(settings)
        .await
        .map_err(|e| e.to_string())?;
    let cloud = CloudClient::new(settings.clone()).expect("Unable to build http client");
    let mut history = UploadHistory::load(&settings.history_file()).await;

    let mut fresh: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(&settings.data_dir)
        .await
        .map_err(|e| format!("unable to list {}: {e}", settings.data_dir.display()))?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) == Some("fit") && !history.contains(name) {
            fresh.push(path);
        }
    }
    if fresh.is_empty() {
        println!("All records already uploaded.");
        return Ok(());
    }
    println!("Found {} new records to upload.", fresh.len());

    for path in fresh {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        println!("Uploading {name}...");
        match common::upload_fit(&cloud, &session, &path, &settings.device_type, &settings.device_sn)
            .await
        {
            Ok(()) => {
                history.insert(name);
                if let Err(e) = history.save(&settings.history_file()).await {
                    eprintln!("Unable to update the upload history: {e}");
                }
            }
            Err(e) => eprintln!("Failed to upload {name}: {e}"),
        }
    }
    println!("Sync completed.");
    Ok(())
}
