use asciibus::cli::{actions, parse_args};

fn main() {
    env_logger::init();
    let matches = parse_args();

    if let Err(err) = actions::run(&matches) {
        log::error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
