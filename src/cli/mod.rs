pub mod actions;

use clap::{Arg, ArgMatches, Command};

use crate::core::config::DEFAULT_CONFIG_FILE;

const MODES: [&str; 4] = ["slave", "serial-slave", "discover", "accept"];

fn other_modes(mode: &str) -> Vec<&'static str> {
    MODES.into_iter().filter(|other| *other != mode).collect()
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

pub fn command() -> Command {
    Command::new("asciibus")
        .about("Modbus ASCII slave, discovery client and reverse-connection acceptor")
        .arg(
            Arg::new("slave")
                .long("slave")
                .help("Serve the configured units over ASCII-over-TCP (JSONL output)")
                .value_name("HOST:PORT")
                .conflicts_with_all(other_modes("slave")),
        )
        .arg(
            Arg::new("serial-slave")
                .long("serial-slave")
                .help("Serve the configured units on a serial port (JSONL output)")
                .value_name("PORT")
                .conflicts_with_all(other_modes("serial-slave")),
        )
        .arg(
            Arg::new("discover")
                .long("discover")
                .help("Dial a slave and report which candidate units answer")
                .value_name("HOST:PORT")
                .conflicts_with_all(other_modes("discover")),
        )
        .arg(
            Arg::new("accept")
                .long("accept")
                .help("Listen for slaves dialing in and keep a pool of discovered devices")
                .value_name("HOST:PORT")
                .conflicts_with_all(other_modes("accept")),
        )
        .arg(
            Arg::new("unit")
                .long("unit")
                .help("Unit id served when the configuration declares none")
                .value_name("ID")
                .default_value("1")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("units")
                .long("units")
                .help("Candidate unit ids to probe, comma separated")
                .value_name("IDS")
                .value_delimiter(',')
                .default_value("1")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Configuration file")
                .value_name("FILE")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .help("Serial baud rate")
                .value_name("BAUD")
                .default_value("9600")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .help("Stop after this many seconds instead of running until killed")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64)),
        )
}
