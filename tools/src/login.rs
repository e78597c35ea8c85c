// Log in to the Blackbird Sport cloud and cache the session

use blackbird::CloudClient;
use clap::{Arg, Command};

mod common;

#[tokio::main]
async fn main() {
    common::init_logging();

    let matches = Command::new("bb_login")
        .about("Log in and cache the session token")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the settings file"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .value_name("USER_ID")
                .required(true)
                .help("Account email or id"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .value_name("PASSWORD")
                .required(true)
                .help("Account password"),
        )
        .arg(
            Arg::new("ton")
                .long("ton")
                .value_name("TOKEN")
                .help("Existing session token; registered automatically when omitted"),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("about") {
        println!("bb_login - log in to the Blackbird Sport cloud");
        return;
    }

    let settings = match common::load_settings(matches.get_one::<String>("config")) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let user = matches.get_one::<String>("user").unwrap();
    let password = matches.get_one::<String>("password").unwrap();
    let ton = matches.get_one::<String>("ton").cloned();

    let cloud = CloudClient::new(settings.clone()).expect("Unable to build http client");
    let session = match cloud.login(ton, user, password).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Login failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = session.save(&settings.session_file()).await {
        eprintln!("Unable to cache the session: {e}");
        std::process::exit(1);
    }
    println!(
        "Login successful! Session cached. Account ID: {}",
        session.account_id
    );
}
