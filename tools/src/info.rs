// Print the profile behind the cached session

use blackbird::CloudClient;
use clap::{Arg, Command};

mod common;

#[tokio::main]
async fn main() {
    common::init_logging();

    let matches = Command::new("bb_info")
        .about("Show user info for the cached session")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the settings file"),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("about") {
        println!("bb_info - show the logged-in user's profile");
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

    let cloud = CloudClient::new(settings).expect("Unable to build http client");
    match cloud.user_info(&session).await {
        Ok(info) => println!(
            "{}",
            serde_json::to_string_pretty(&info).expect("serializable json")
        ),
        Err(e) => {
            eprintln!("Failed to get info: {e}");
            std::process::exit(1);
        }
    }
}
