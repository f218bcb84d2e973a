use anyhow::{anyhow, Result};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::ArgMatches;

use crate::{
    api::modbus::{
        ConnectionAcceptor, DiscoveryFactory, DiscoveryTransport, ModbusSlave, PooledTransport,
        SlaveStore,
    },
    core::config::{DiscoveryConfig, ProbeOverrides, SlaveConfig},
};

/// Snapshot of one discovered device, printed as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct DeviceReport {
    name: String,
    units: BTreeSet<u8>,
    connected: bool,
}

impl From<&DiscoveryTransport> for DeviceReport {
    fn from(transport: &DiscoveryTransport) -> Self {
        Self {
            name: transport.name(),
            units: transport.units().clone(),
            connected: transport.is_connected(),
        }
    }
}

/// Run the mode selected on the command line.
pub fn run(matches: &ArgMatches) -> Result<()> {
    if let Some(addr) = matches.get_one::<String>("slave") {
        run_slave(addr, matches)
    } else if let Some(port) = matches.get_one::<String>("serial-slave") {
        run_serial_slave(port, matches)
    } else if let Some(addr) = matches.get_one::<String>("discover") {
        run_discover(addr, matches)
    } else if let Some(addr) = matches.get_one::<String>("accept") {
        run_accept(addr, matches)
    } else {
        Err(anyhow!(
            "No mode given, use one of --slave, --serial-slave, --discover or --accept"
        ))
    }
}

fn config_path(matches: &ArgMatches) -> Result<&String> {
    matches
        .get_one::<String>("config")
        .ok_or_else(|| anyhow!("Missing --config"))
}

fn candidates(matches: &ArgMatches) -> Vec<u8> {
    matches
        .get_many::<u8>("units")
        .map(|units| units.copied().collect())
        .unwrap_or_default()
}

fn deadline(matches: &ArgMatches) -> Option<Instant> {
    matches
        .get_one::<u64>("duration")
        .map(|secs| Instant::now() + Duration::from_secs(*secs))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Splits `HOST:PORT`, keeping bracketed IPv6 hosts intact.
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Expected HOST:PORT, got {addr}"))?;
    let port = port
        .parse::<u16>()
        .map_err(|err| anyhow!("Invalid port in {addr}: {err}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("Missing host in {addr}"));
    }
    Ok((host.to_string(), port))
}

fn load_slave(matches: &ArgMatches) -> Result<(Arc<SlaveStore>, SlaveConfig)> {
    let config = SlaveConfig::load(config_path(matches)?)?;
    let unit = matches.get_one::<u8>("unit").copied().unwrap_or(1);
    let store = Arc::new(config.build_store(unit)?);
    Ok((store, config))
}

fn print_events(slave: &ModbusSlave, deadline: Option<Instant>) -> Result<()> {
    while !expired(deadline) {
        if let Some(event) = slave.recv_timeout(Duration::from_millis(200)) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}

fn run_slave(addr: &str, matches: &ArgMatches) -> Result<()> {
    let (host, port) = split_host_port(addr)?;
    let (store, config) = load_slave(matches)?;
    let slave = ModbusSlave::start(&host, port, store, &config)?;
    if let Some(local) = slave.local_addr() {
        log::info!("Slave listening on {local}");
    }

    let result = print_events(&slave, deadline(matches));
    slave.stop();
    result
}

fn run_serial_slave(port: &str, matches: &ArgMatches) -> Result<()> {
    let baud = matches.get_one::<u32>("baud").copied().unwrap_or(9600);
    let (store, config) = load_slave(matches)?;
    let slave = ModbusSlave::start_serial(port, baud, store, &config)?;

    let result = print_events(&slave, deadline(matches));
    slave.stop();
    result
}

fn run_discover(addr: &str, matches: &ArgMatches) -> Result<()> {
    let config = DiscoveryConfig::load(config_path(matches)?);
    let transport = DiscoveryTransport::connect(
        addr,
        &config,
        &ProbeOverrides::default(),
        candidates(matches),
    )
    .map_err(|err| anyhow!("Failed to discover units on {addr}: {err}"))?;

    println!("{}", serde_json::to_string(&DeviceReport::from(&transport))?);
    transport.disconnect()?;
    Ok(())
}

fn run_accept(addr: &str, matches: &ArgMatches) -> Result<()> {
    let (host, port) = split_host_port(addr)?;
    let config = DiscoveryConfig::load(config_path(matches)?);
    let factory = DiscoveryFactory::new(config, candidates(matches));
    let handle = ConnectionAcceptor::new(host, port, factory).spawn()?;
    log::info!("Accepting devices on {}", handle.local_addr());

    let deadline = deadline(matches);
    let mut last: Vec<DeviceReport> = Vec::new();
    while !expired(deadline) && handle.is_running() {
        let pool: Vec<DeviceReport> = handle
            .transports()
            .iter()
            .map(|transport| DeviceReport::from(transport.as_ref()))
            .collect();
        if pool != last {
            println!("{}", serde_json::to_string(&pool)?);
            last = pool;
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    handle.stop();
    Ok(())
}
