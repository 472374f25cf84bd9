use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, crate_name, value_parser, ArgAction, Command};
use client::ConvertParams;
use kernel::Category;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(
            Command::new(cli::VERSION_SUBCOMMAND)
                .about(cli::VERSION_DESCRIPTION)
                .arg(
                    arg!(--json)
                        .action(ArgAction::SetTrue)
                        .help("Print as JSON"),
                ),
        )
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(
                    arg!(-p --port <PORT>)
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on (overrides CONVGATE_PORT)"),
                )
                .arg(
                    arg!(-d --"data-dir" <DIR>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Storage root (overrides CONVGATE_DATA_DIR)"),
                ),
        )
        .subcommand(
            Command::new(cli::CONVERT_SUBCOMMAND)
                .about(cli::CONVERT_DESCRIPTION)
                .arg(
                    arg!(-u --uri <URI>)
                        .default_value(cli::DEFAULT_URI)
                        .help("Gateway URI"),
                )
                .arg(
                    arg!(-f --file <FILE>)
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the file to convert"),
                )
                .arg(
                    arg!(-c --category <CATEGORY>)
                        .required(true)
                        .value_parser(["document", "image", "video", "audio", "archive"])
                        .help("Conversion category"),
                )
                .arg(
                    arg!(-t --target <FORMAT>)
                        .required(true)
                        .help("Target format, e.g. pdf, png, mp3, zip"),
                )
                .arg(
                    arg!(-o --output <DIR>)
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to save the converted file into"),
                ),
        )
        .subcommand(
            Command::new(cli::FORMATS_SUBCOMMAND)
                .about(cli::FORMATS_DESCRIPTION)
                .arg(
                    arg!(-u --uri <URI>)
                        .default_value(cli::DEFAULT_URI)
                        .help("Gateway URI"),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
        .get_matches();

    if let Some(matches) = cli.subcommand_matches(cli::VERSION_SUBCOMMAND) {
        cli::version::run(matches.get_flag("json"));
    } else if cli.subcommand_matches(cli::BUGREPORT_SUBCOMMAND).is_some() {
        cli::bugreport::run();
    } else if let Some(matches) = cli.subcommand_matches(cli::SERVER_SUBCOMMAND) {
        if let Err(e) = cli::server::run(matches).await {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    } else if let Some(matches) = cli.subcommand_matches(cli::CONVERT_SUBCOMMAND) {
        let category = matches
            .get_one::<String>("category")
            .and_then(|c| c.parse::<Category>().ok());
        let (Some(uri), Some(file), Some(category), Some(target), Some(output_dir)) = (
            matches.get_one::<String>("uri"),
            matches.get_one::<PathBuf>("file"),
            category,
            matches.get_one::<String>("target"),
            matches.get_one::<PathBuf>("output"),
        ) else {
            return ExitCode::FAILURE;
        };
        let params = ConvertParams {
            uri: uri.clone(),
            file: file.clone(),
            category,
            target: target.clone(),
            output_dir: output_dir.clone(),
        };
        if let Err(e) = cli::client::convert_file(params).await {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    } else if let Some(matches) = cli.subcommand_matches(cli::FORMATS_SUBCOMMAND) {
        let uri = matches
            .get_one::<String>("uri")
            .map_or(cli::DEFAULT_URI, String::as_str);
        if let Err(e) = cli::client::list_formats(uri).await {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
