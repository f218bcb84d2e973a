use std::{
    collections::BTreeSet,
    fmt,
    net::ToSocketAddrs,
    sync::Arc,
    time::{Duration, Instant},
};

use super::traits::{ModbusCommands, PooledTransport, TransportFactory};
use crate::{
    core::config::{DiscoveryConfig, ProbeOverrides, ProbeSettings},
    protocol::{
        channel::{ByteChannel, SocketChannel},
        error::{ModbusError, ModbusResult},
        modbus::{
            check_quantity, Message, ModbusRequest, ModbusResponse, Pdu, RequestPdu,
            ResponsePdu, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
        },
        transport::{AsciiTransport, ModbusTransport},
    },
};

/// Master-side transport that learns which unit ids answer on its channel.
///
/// Construction probes every candidate id in order with a one-register
/// input read; ids that answer before the probe timeout make up
/// [`DiscoveryTransport::units`]. Probe failures never abort discovery and
/// never close the channel. Two discovery transports are equal when they
/// discovered the same unit set, which is how the acceptor recognizes a
/// device that reconnected.
pub struct DiscoveryTransport {
    transport: Arc<dyn ModbusTransport>,
    settings: ProbeSettings,
    units: BTreeSet<u8>,
}

impl DiscoveryTransport {
    pub fn new(
        channel: Arc<dyn ByteChannel>,
        config: &DiscoveryConfig,
        candidates: impl IntoIterator<Item = u8>,
    ) -> ModbusResult<Self> {
        Self::with_overrides(channel, config, &ProbeOverrides::default(), candidates)
    }

    pub fn with_overrides(
        channel: Arc<dyn ByteChannel>,
        config: &DiscoveryConfig,
        overrides: &ProbeOverrides,
        candidates: impl IntoIterator<Item = u8>,
    ) -> ModbusResult<Self> {
        let transport = Arc::new(AsciiTransport::new(channel)?);
        Ok(Self::discover(
            transport,
            ProbeSettings::resolve(config, overrides),
            candidates,
        ))
    }

    /// Dials a slave over TCP, then runs discovery on the connection.
    pub fn connect(
        addr: impl ToSocketAddrs,
        config: &DiscoveryConfig,
        overrides: &ProbeOverrides,
        candidates: impl IntoIterator<Item = u8>,
    ) -> ModbusResult<Self> {
        let settings = ProbeSettings::resolve(config, overrides);
        let channel = SocketChannel::connect(addr, settings.timeout)?;
        let transport = Arc::new(AsciiTransport::new(Arc::new(channel))?);
        Ok(Self::discover(transport, settings, candidates))
    }

    /// Probes `candidates` over an already built transport.
    pub fn discover(
        transport: Arc<dyn ModbusTransport>,
        settings: ProbeSettings,
        candidates: impl IntoIterator<Item = u8>,
    ) -> Self {
        let peer = transport.peer();
        let mut units = BTreeSet::new();
        for unit_id in candidates {
            match probe(transport.as_ref(), &settings, unit_id) {
                Ok(()) => {
                    log::info!("Unit {unit_id} answered on {peer}");
                    units.insert(unit_id);
                }
                Err(err) if err.is_timeout() => {
                    log::debug!("Unit {unit_id} did not answer on {peer}: {err}")
                }
                Err(err) => log::warn!("Probing unit {unit_id} on {peer} failed: {err}"),
            }
        }
        log::info!("Discovered units {units:?} on {peer}");
        Self {
            transport,
            settings,
            units,
        }
    }

    pub fn units(&self) -> &BTreeSet<u8> {
        &self.units
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn ModbusTransport> {
        &self.transport
    }

    pub fn set_timeout(&self, timeout: Duration) -> ModbusResult<()> {
        self.transport.set_timeout(timeout)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn name(&self) -> String {
        format!("DiscoveryTransport[{}]", self.transport.peer())
    }

    /// One request/response exchange; every failure carries the request.
    pub fn execute(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.exchange(request).map_err(|source| ModbusError::Command {
            request: request.hex_message(),
            source: Box::new(source),
        })
    }

    fn exchange(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.transport.write_message(request)?;
        let deadline = Instant::now() + self.settings.timeout;
        let response = read_from_unit(self.transport.as_ref(), request.unit_id, deadline)?;
        match response.pdu {
            ResponsePdu::Exception {
                function_code,
                exception_code,
            } => Err(ModbusError::Exception {
                function_code,
                exception_code,
            }),
            ref pdu if pdu.function_code() != request.pdu.function_code() => {
                Err(ModbusError::UnexpectedResponse {
                    expected: request.pdu.function_code(),
                    received: pdu.function_code(),
                })
            }
            _ => Ok(response),
        }
    }

    fn request(&self, unit_id: u8, pdu: RequestPdu) -> ModbusResult<ResponsePdu> {
        Ok(self.execute(&ModbusRequest::new(unit_id, pdu))?.pdu)
    }
}

fn probe(transport: &dyn ModbusTransport, settings: &ProbeSettings, unit_id: u8) -> ModbusResult<()> {
    transport.set_timeout(settings.timeout)?;
    let request = ModbusRequest::new(
        unit_id,
        RequestPdu::ReadInputRegisters {
            reference: settings.register,
            count: 1,
        },
    );
    transport.write_message(&request)?;
    // Any answer from the unit, exceptions included, proves it is there.
    read_from_unit(transport, unit_id, Instant::now() + settings.timeout).map(|_| ())
}

/// Reads responses until one comes from `unit_id`, skipping stale frames
/// from other units until `deadline`.
fn read_from_unit(
    transport: &dyn ModbusTransport,
    unit_id: u8,
    deadline: Instant,
) -> ModbusResult<ModbusResponse> {
    loop {
        let response = transport.read_response()?;
        if response.unit_id == unit_id {
            return Ok(response);
        }
        log::debug!(
            "Skipping response from unit {} while waiting for {unit_id}",
            response.unit_id
        );
        if Instant::now() >= deadline {
            return Err(ModbusError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("unit {unit_id} did not answer"),
            )));
        }
    }
}

fn malformed_count(expected: usize, received: usize) -> ModbusError {
    ModbusError::MalformedMessage(format!("expected {expected} values, received {received}"))
}

impl ModbusCommands for DiscoveryTransport {
    fn read_coils(&self, unit_id: u8, reference: u16, count: u16) -> ModbusResult<Vec<bool>> {
        check_quantity(count as usize, MAX_READ_BITS)?;
        match self.request(unit_id, RequestPdu::ReadCoils { reference, count })? {
            ResponsePdu::ReadCoils { mut coils } if coils.len() >= count as usize => {
                coils.truncate(count as usize);
                Ok(coils)
            }
            ResponsePdu::ReadCoils { coils } => Err(malformed_count(count as usize, coils.len())),
            other => Err(ModbusError::UnexpectedResponse {
                expected: 0x01,
                received: other.function_code(),
            }),
        }
    }

    fn read_discrete_inputs(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        check_quantity(count as usize, MAX_READ_BITS)?;
        match self.request(unit_id, RequestPdu::ReadDiscreteInputs { reference, count })? {
            ResponsePdu::ReadDiscreteInputs { mut inputs } if inputs.len() >= count as usize => {
                inputs.truncate(count as usize);
                Ok(inputs)
            }
            ResponsePdu::ReadDiscreteInputs { inputs } => {
                Err(malformed_count(count as usize, inputs.len()))
            }
            other => Err(ModbusError::UnexpectedResponse {
                expected: 0x02,
                received: other.function_code(),
            }),
        }
    }

    fn read_holding_registers(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        check_quantity(count as usize, MAX_READ_REGISTERS)?;
        match self.request(unit_id, RequestPdu::ReadHoldingRegisters { reference, count })? {
            ResponsePdu::ReadHoldingRegisters { values } if values.len() == count as usize => {
                Ok(values)
            }
            ResponsePdu::ReadHoldingRegisters { values } => {
                Err(malformed_count(count as usize, values.len()))
            }
            other => Err(ModbusError::UnexpectedResponse {
                expected: 0x03,
                received: other.function_code(),
            }),
        }
    }

    fn read_input_registers(
        &self,
        unit_id: u8,
        reference: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        check_quantity(count as usize, MAX_READ_REGISTERS)?;
        match self.request(unit_id, RequestPdu::ReadInputRegisters { reference, count })? {
            ResponsePdu::ReadInputRegisters { values } if values.len() == count as usize => {
                Ok(values)
            }
            ResponsePdu::ReadInputRegisters { values } => {
                Err(malformed_count(count as usize, values.len()))
            }
            other => Err(ModbusError::UnexpectedResponse {
                expected: 0x04,
                received: other.function_code(),
            }),
        }
    }

    fn write_single_coil(&self, unit_id: u8, reference: u16, value: bool) -> ModbusResult<bool> {
        match self.request(unit_id, RequestPdu::WriteSingleCoil { reference, value })? {
            ResponsePdu::WriteSingleCoil { value, .. } => Ok(value),
            other => Err(ModbusError::UnexpectedResponse {
                expected: 0x05,
                received: other.function_code(),
            }),
        }
    }

    fn write_single_register(&self, unit_id: u8, reference: u16, value: u16) -> ModbusResult<()> {
        self.request(unit_id, RequestPdu::WriteSingleRegister { reference, value })?;
        Ok(())
    }

    fn write_multiple_coils(
        &self,
        unit_id: u8,
        reference: u16,
        coils: &[bool],
    ) -> ModbusResult<()> {
        check_quantity(coils.len(), MAX_WRITE_COILS)?;
        self.request(
            unit_id,
            RequestPdu::WriteMultipleCoils {
                reference,
                coils: coils.to_vec(),
            },
        )?;
        Ok(())
    }

    fn write_multiple_registers(
        &self,
        unit_id: u8,
        reference: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        check_quantity(values.len(), MAX_WRITE_REGISTERS)?;
        self.request(
            unit_id,
            RequestPdu::WriteMultipleRegisters {
                reference,
                values: values.to_vec(),
            },
        )?;
        Ok(())
    }
}

impl PartialEq for DiscoveryTransport {
    fn eq(&self, other: &Self) -> bool {
        self.units == other.units
    }
}

impl PooledTransport for DiscoveryTransport {
    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    fn disconnect(&self) -> ModbusResult<()> {
        self.transport.close()
    }

    fn describe(&self) -> String {
        format!("{} units {:?}", self.name(), self.units)
    }
}

impl fmt::Debug for DiscoveryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryTransport")
            .field("peer", &self.transport.peer())
            .field("units", &self.units)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Builds a [`DiscoveryTransport`] for each device that dials in.
#[derive(Debug, Clone)]
pub struct DiscoveryFactory {
    config: DiscoveryConfig,
    overrides: ProbeOverrides,
    candidates: Vec<u8>,
}

impl DiscoveryFactory {
    pub fn new(config: DiscoveryConfig, candidates: impl IntoIterator<Item = u8>) -> Self {
        Self {
            config,
            overrides: ProbeOverrides::default(),
            candidates: candidates.into_iter().collect(),
        }
    }

    pub fn with_overrides(mut self, overrides: ProbeOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl TransportFactory for DiscoveryFactory {
    type Transport = DiscoveryTransport;

    fn create(&self, channel: SocketChannel) -> ModbusResult<Arc<DiscoveryTransport>> {
        let transport = DiscoveryTransport::with_overrides(
            Arc::new(channel),
            &self.config,
            &self.overrides,
            self.candidates.iter().copied(),
        )?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::UnitFilter;
    use parking_lot::Mutex;
    use std::io;

    /// Scripted transport: answers probes only for the listed units and
    /// records every written frame.
    struct FakeTransport {
        present: BTreeSet<u8>,
        written: Mutex<Vec<String>>,
        last_unit: Mutex<Option<u8>>,
        timeouts: Mutex<Vec<Duration>>,
        open: bool,
        chatter: Option<u8>,
    }

    impl FakeTransport {
        fn new(present: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                present: present.iter().copied().collect(),
                written: Mutex::new(Vec::new()),
                last_unit: Mutex::new(None),
                timeouts: Mutex::new(Vec::new()),
                open: true,
                chatter: None,
            })
        }

        /// Every read returns a frame from `unit_id`, like a busy shared line.
        fn chattering(unit_id: u8) -> Arc<Self> {
            Arc::new(Self {
                present: BTreeSet::new(),
                written: Mutex::new(Vec::new()),
                last_unit: Mutex::new(None),
                timeouts: Mutex::new(Vec::new()),
                open: true,
                chatter: Some(unit_id),
            })
        }
    }

    impl ModbusTransport for FakeTransport {
        fn write_message(&self, message: &dyn Message) -> ModbusResult<()> {
            self.written.lock().push(message.hex_message());
            *self.last_unit.lock() = Some(message.unit_id());
            Ok(())
        }

        fn read_request(&self, _units: &dyn UnitFilter) -> ModbusResult<ModbusRequest> {
            Err(ModbusError::NotImplemented("read request"))
        }

        fn read_response(&self) -> ModbusResult<ModbusResponse> {
            if let Some(unit_id) = self.chatter {
                std::thread::sleep(Duration::from_millis(5));
                return Ok(ModbusResponse::new(
                    unit_id,
                    ResponsePdu::ReadInputRegisters { values: vec![1] },
                ));
            }
            match self.last_unit.lock().take() {
                Some(unit_id) if self.present.contains(&unit_id) => Ok(ModbusResponse::new(
                    unit_id,
                    ResponsePdu::ReadInputRegisters { values: vec![45] },
                )),
                _ => Err(ModbusError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "silent",
                ))),
            }
        }

        fn set_timeout(&self, timeout: Duration) -> ModbusResult<()> {
            self.timeouts.lock().push(timeout);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&self) -> ModbusResult<()> {
            Ok(())
        }

        fn peer(&self) -> String {
            "fake".to_string()
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            register: 10,
            timeout: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_discovery_is_independent_of_probe_order() {
        for candidates in [vec![1, 2, 3], vec![3, 2, 1], vec![2, 1, 3]] {
            let fake = FakeTransport::new(&[2]);
            let discovery = DiscoveryTransport::discover(fake.clone(), settings(), candidates);
            assert_eq!(discovery.units(), &BTreeSet::from([2]));
            assert!(discovery.is_open());
            assert_eq!(fake.written.lock().len(), 3);
            assert!(fake
                .timeouts
                .lock()
                .iter()
                .all(|timeout| *timeout == Duration::from_millis(250)));
        }
    }

    #[test]
    fn test_probe_requests_one_input_register() {
        let fake = FakeTransport::new(&[10]);
        let settings = ProbeSettings {
            register: 0x20,
            timeout: Duration::from_millis(100),
        };
        DiscoveryTransport::discover(fake.clone(), settings, [10]);
        assert_eq!(fake.written.lock().as_slice(), &["0a 04 00 20 00 01".to_string()]);
    }

    #[test]
    fn test_unsupported_operations_do_not_touch_the_wire() {
        let fake = FakeTransport::new(&[10]);
        let discovery = DiscoveryTransport::discover(fake.clone(), settings(), [10]);
        let before = fake.written.lock().len();

        assert!(matches!(
            discovery.read_exception_status(10),
            Err(ModbusError::NotImplemented(_))
        ));
        assert!(matches!(
            discovery.diagnostics(10, 0, &[]),
            Err(ModbusError::NotImplemented(_))
        ));
        assert!(matches!(
            discovery.comm_event_counter(10),
            Err(ModbusError::NotImplemented(_))
        ));
        assert!(matches!(
            discovery.comm_event_log(10),
            Err(ModbusError::NotImplemented(_))
        ));
        assert!(matches!(
            discovery.report_slave_id(10),
            Err(ModbusError::NotImplemented(_))
        ));
        assert!(matches!(
            discovery.read_file_record(10, 1, 0, 1),
            Err(ModbusError::NotImplemented(_))
        ));
        assert_eq!(fake.written.lock().len(), before);
    }

    #[test]
    fn test_command_failure_carries_the_request() {
        let fake = FakeTransport::new(&[10]);
        let discovery = DiscoveryTransport::discover(fake, settings(), [10]);
        let err = discovery.read_input_registers(11, 10, 1).unwrap_err();
        match err {
            ModbusError::Command { request, source } => {
                assert_eq!(request, "0b 04 00 0a 00 01");
                assert!(source.is_timeout());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_foreign_traffic_does_not_stall_commands() {
        let discovery = DiscoveryTransport::discover(FakeTransport::chattering(7), settings(), [10]);
        assert!(discovery.units().is_empty());

        let started = Instant::now();
        let err = discovery.read_input_registers(10, 0, 1).unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_quantities_are_checked_before_sending() {
        let fake = FakeTransport::new(&[10]);
        let discovery = DiscoveryTransport::discover(fake.clone(), settings(), [10]);
        let before = fake.written.lock().len();
        assert!(matches!(
            discovery.read_holding_registers(10, 0, 126),
            Err(ModbusError::IllegalQuantity { .. })
        ));
        assert!(matches!(
            discovery.write_multiple_coils(10, 0, &[]),
            Err(ModbusError::IllegalQuantity { .. })
        ));
        assert_eq!(fake.written.lock().len(), before);
    }

    #[test]
    fn test_equality_follows_discovered_units() {
        let first = DiscoveryTransport::discover(FakeTransport::new(&[1, 2]), settings(), [1, 2, 3]);
        let second = DiscoveryTransport::discover(FakeTransport::new(&[1, 2]), settings(), [2, 1]);
        let third = DiscoveryTransport::discover(FakeTransport::new(&[3]), settings(), [1, 2, 3]);
        assert!(first == second);
        assert!(first != third);
    }
}
