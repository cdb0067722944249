use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use log::info;

use plc_mirror::cli::{handle_subcommands, run_service};

fn build_cli() -> Command {
    Command::new("plc-mirror")
        .version(plc_mirror::VERSION)
        .about("Mirrors PLC data blocks into typed records and writes edits back")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("Path to the TOML configuration (defaults to the built-in demo)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("stats-interval")
                .long("stats-interval")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Seconds between pipeline statistics reports"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the mirror until Ctrl+C")
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many seconds"),
                )
                .arg(
                    Arg::new("dump")
                        .long("dump")
                        .action(ArgAction::SetTrue)
                        .help("Print a JSON snapshot of all records on exit"),
                ),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write the default configuration file")
                .arg(Arg::new("path").help("Target file [default: plc_mirror.toml]"))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve an offset address (<byte> or <byte>.<bit>)")
                .arg(Arg::new("offset").required(true))
                .arg(
                    Arg::new("base")
                        .long("base")
                        .help("Record base offset the address is relative to"),
                ),
        )
        .subcommand(
            Command::new("decode")
                .about("Decode hex device bytes as a PLC type")
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .required(true)
                        .help("bcd, s5time, time, date, tod, dt, bool, byte, short, int, long, float, double"),
                )
                .arg(Arg::new("hex").required(true)),
        )
        .subcommand(
            Command::new("encode")
                .about("Encode an IEC literal (S5T#, T#, D#, TOD#, DT#) into device bytes")
                .arg(Arg::new("literal").required(true)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("🏭 PLC Mirror v{}", plc_mirror::VERSION);

    if !handle_subcommands(&matches).await? {
        run_service(&matches, None, false).await?;
    }
    Ok(())
}
