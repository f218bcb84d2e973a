use std::{
    collections::BTreeSet,
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use asciibus::{
    serve_connection, AsciiTransport, ByteChannel, ConnectionAcceptor, DiscoveryConfig,
    DiscoveryFactory, DiscoveryTransport, ModbusCommands, ModbusError, ModbusSlave,
    ProbeOverrides, ProcessImage, SlaveConfig, SlaveStore, SocketChannel, UnitRegistry,
};

fn fast_probe() -> ProbeOverrides {
    ProbeOverrides::new().with_search_timeout_ms(300)
}

fn slave_config() -> SlaveConfig {
    SlaveConfig {
        read_timeout_ms: 100,
        ..SlaveConfig::default()
    }
}

fn start_slave(store: SlaveStore) -> (ModbusSlave, SocketAddr) {
    let slave = ModbusSlave::start("127.0.0.1", 0, Arc::new(store), &slave_config()).unwrap();
    let addr = slave.local_addr().unwrap();
    (slave, addr)
}

fn units(ids: &[u8]) -> BTreeSet<u8> {
    ids.iter().copied().collect()
}

fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_discovery_finds_the_served_unit() {
    let store = SlaveStore::single(10, ProcessImage::new().with_input_registers([45; 13]));
    let (slave, addr) = start_slave(store);

    let master = DiscoveryTransport::connect(
        addr,
        &DiscoveryConfig::default(),
        &fast_probe(),
        [1, 2, 3, 10],
    )
    .unwrap();
    assert_eq!(master.units(), &units(&[10]));
    assert_eq!(master.read_input_registers(10, 0, 4).unwrap(), vec![45; 4]);
    assert_eq!(master.read_input_registers(10, 0, 13).unwrap(), vec![45; 13]);
    assert!(master.is_open());

    let event = slave.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.unit_id, 10);
    assert_eq!(event.function_code, 0x04);
    slave.stop();
}

#[test]
fn test_units_keep_separate_images_over_the_wire() {
    let registry = UnitRegistry::with_images([
        (1, ProcessImage::new().with_holding_registers([0; 4]).with_coils([false; 8])),
        (2, ProcessImage::new().with_holding_registers([0; 4]).with_coils([false; 8])),
    ])
    .unwrap();
    let (slave, addr) = start_slave(SlaveStore::multiple(registry));

    let overrides = fast_probe().with_search_register(0);
    let master =
        DiscoveryTransport::connect(addr, &DiscoveryConfig::default(), &overrides, [1, 2, 3])
            .unwrap();
    // Both units hold no input registers, so the probe is answered with an
    // exception; the unit still counts as present.
    assert_eq!(master.units(), &units(&[1, 2]));

    master.write_single_register(1, 2, 77).unwrap();
    master.write_multiple_registers(2, 0, &[5, 6, 7]).unwrap();
    assert_eq!(master.read_holding_registers(1, 0, 4).unwrap(), vec![0, 0, 77, 0]);
    assert_eq!(master.read_holding_registers(2, 0, 4).unwrap(), vec![5, 6, 7, 0]);

    assert!(master.write_single_coil(2, 3, true).unwrap());
    master.write_multiple_coils(1, 0, &[true, false, true]).unwrap();
    assert_eq!(
        master.read_coils(1, 0, 4).unwrap(),
        vec![true, false, true, false]
    );
    assert_eq!(
        master.read_coils(2, 0, 4).unwrap(),
        vec![false, false, false, true]
    );
    slave.stop();
}

#[test]
fn test_out_of_range_read_reports_exception() {
    let store = SlaveStore::single(10, ProcessImage::new().with_input_registers([45; 13]));
    let (slave, addr) = start_slave(store);
    let master =
        DiscoveryTransport::connect(addr, &DiscoveryConfig::default(), &fast_probe(), [10])
            .unwrap();

    let err = master.read_input_registers(10, 12, 2).unwrap_err();
    match err {
        ModbusError::Command { request, source } => {
            assert_eq!(request, "0a 04 00 0c 00 02");
            assert!(matches!(
                *source,
                ModbusError::Exception {
                    function_code: 0x04,
                    exception_code: 0x02
                }
            ));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The connection survives an exception response.
    assert_eq!(master.read_input_registers(10, 12, 1).unwrap(), vec![45]);
    slave.stop();
}

#[test]
fn test_unsupported_commands_stay_off_the_wire() {
    let store = SlaveStore::single(10, ProcessImage::new().with_input_registers([45; 13]));
    let (slave, addr) = start_slave(store);
    let master =
        DiscoveryTransport::connect(addr, &DiscoveryConfig::default(), &fast_probe(), [10])
            .unwrap();
    // Drain the probe.
    assert!(slave.recv_timeout(Duration::from_secs(5)).is_some());

    assert!(matches!(
        master.report_slave_id(10),
        Err(ModbusError::NotImplemented(_))
    ));
    assert!(matches!(
        master.comm_event_log(10),
        Err(ModbusError::NotImplemented(_))
    ));
    assert!(slave.recv_timeout(Duration::from_millis(300)).is_none());
    slave.stop();
}

/// Dials `acceptor` and serves `unit_id` on the outgoing connection, the
/// way a field device behind NAT reports in.
fn dial_in(acceptor: SocketAddr, unit_id: u8) -> thread::JoinHandle<()> {
    let stream = TcpStream::connect(acceptor).unwrap();
    let channel = SocketChannel::new(stream).unwrap();
    channel.set_timeout(Duration::from_millis(100)).unwrap();
    let transport = AsciiTransport::new(Arc::new(channel)).unwrap();
    let store = SlaveStore::single(unit_id, ProcessImage::new().with_input_registers([1; 16]));
    thread::spawn(move || serve_connection(&transport, &store, None))
}

#[test]
fn test_acceptor_replaces_reconnected_device() {
    let factory = DiscoveryFactory::new(DiscoveryConfig::default(), [5, 6])
        .with_overrides(fast_probe());
    let handle = ConnectionAcceptor::new("127.0.0.1", 0, factory)
        .spawn()
        .unwrap();
    let addr = handle.local_addr();

    let first = dial_in(addr, 5);
    wait_for(|| handle.transports().len() == 1);
    let pooled = handle.transports();
    assert_eq!(pooled[0].units(), &units(&[5]));
    let first_name = pooled[0].name();

    // The same device dials in again from a new socket.
    let second = dial_in(addr, 5);
    wait_for(|| {
        let pool = handle.transports();
        pool.len() == 1 && pool[0].name() != first_name
    });
    // Closing the replaced transport ends the first device's session.
    first.join().unwrap();

    let current = handle.transports();
    assert_eq!(current[0].read_input_registers(5, 0, 2).unwrap(), vec![1, 1]);

    handle.stop();
    second.join().unwrap();
}

#[test]
fn test_acceptor_keeps_distinct_devices() {
    let factory = DiscoveryFactory::new(DiscoveryConfig::default(), [5, 6])
        .with_overrides(fast_probe());
    let handle = ConnectionAcceptor::new("127.0.0.1", 0, factory)
        .spawn()
        .unwrap();
    let addr = handle.local_addr();

    let first = dial_in(addr, 5);
    wait_for(|| handle.transports().len() == 1);
    let second = dial_in(addr, 6);
    wait_for(|| handle.transports().len() == 2);

    let found: BTreeSet<BTreeSet<u8>> = handle
        .transports()
        .iter()
        .map(|transport| transport.units().clone())
        .collect();
    assert_eq!(found, [units(&[5]), units(&[6])].into_iter().collect());

    handle.stop();
    first.join().unwrap();
    second.join().unwrap();
}
