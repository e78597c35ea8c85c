// Convert a .fit file to the upload XML and print it

use std::path::PathBuf;

use blackbird::{fit, record};
use clap::{Arg, Command};

mod common;

// pure conversion has no session; the app uses a throwaway account id
const DUMMY_ACCOUNT_ID: i64 = 123456;

#[tokio::main]
async fn main() {
    common::init_logging();

    let matches = Command::new("bb_convert")
        .about("Convert a .fit file to the record XML")
        .arg(
            Arg::new("fit_file")
                .value_name("FIT_FILE")
                .required(true)
                .index(1)
                .help("The .fit file to convert"),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("about") {
        println!("bb_convert - render the proprietary record XML");
        return;
    }

    let fit_file = PathBuf::from(matches.get_one::<String>("fit_file").unwrap());
    if !fit_file.exists() {
        eprintln!("File not found: {}", fit_file.display());
        std::process::exit(1);
    }

    let activity = match fit::parse_file(&fit_file) {
        Ok(activity) => activity,
        Err(e) => {
            eprintln!("Conversion failed: {e}");
            std::process::exit(1);
        }
    };
    match record::generate_xml(&activity, DUMMY_ACCOUNT_ID) {
        Ok(xml) => println!("{xml}"),
        Err(e) => {
            eprintln!("Conversion failed: {e}");
            std::process::exit(1);
        }
    }
}
