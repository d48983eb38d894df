use std::io::Write;

use ev_telemetry::{
    CompiledLayout, DecodeError, DecodedRecord, ExpectedLen, decode_all,
    channel::{ChannelError, ChannelResult, FlowControlOpts, RequestChannel},
    config::{load_tables_from_file, tables_to_string},
    hardware::SimulationChannel,
    layout::CompiledKind,
    vehicles::VehicleModel,
};

/// Simulated vehicle which answers through a callback
pub struct VehicleSimEcu<T: Fn(u32, &[u8]) -> Option<Vec<u8>> + Send> {
    on_request: T,
}

impl<T: Fn(u32, &[u8]) -> Option<Vec<u8>> + Send> VehicleSimEcu<T> {
    pub fn new(on_request: T) -> Self {
        Self { on_request }
    }
}

impl<T: Fn(u32, &[u8]) -> Option<Vec<u8>> + Send> RequestChannel for VehicleSimEcu<T> {
    fn send_request(
        &mut self,
        command: &[u8],
        rx_id: u32,
        tx_id: u32,
        flow_control: Option<&FlowControlOpts>,
    ) -> ChannelResult<Vec<u8>> {
        println!(
            "VehicleSimEcu: send_request Called. Tx: {command:02X?}, tx_id: {tx_id:08X}, rx_id: {rx_id:08X}, fc: {flow_control:?}"
        );
        match (self.on_request)(tx_id, command) {
            Some(resp) => {
                println!("-- Sending {resp:02X?} back to decoder");
                Ok(resp)
            }
            None => {
                println!("-- NO DATA");
                Err(ChannelError::NoData)
            }
        }
    }
}

fn frame(header: &[u8], len: usize, values: &[(usize, &[u8])]) -> Vec<u8> {
    let mut f = vec![0u8; len];
    f[..header.len()].copy_from_slice(header);
    for (idx, bytes) in values {
        f[*idx..*idx + bytes.len()].copy_from_slice(bytes);
    }
    f
}

fn assert_close(record: &DecodedRecord, name: &str, want: f64) {
    let got = record
        .get(name)
        .unwrap_or_else(|| panic!("{name} missing from {record:?}"));
    assert!((got - want).abs() < 1e-6, "{name}: got {got}, want {want}");
}

fn ioniq_sim() -> SimulationChannel {
    let mut sim = SimulationChannel::new();
    sim.add_response(
        0x7E4,
        &[0x21, 0x01],
        &frame(
            &[0x61, 0x01],
            61,
            &[
                (6, &[0xA0]),
                (11, &[0xA0]),
                (12, &[0xFF, 0x9C]),
                (14, &[0x0F, 0xA0]),
                (18, &[20, 21, 22, 23, 24]),
            ],
        ),
    );
    for (cmd, first_byte) in [(0x02u8, 0xC8u8), (0x03, 0xC8), (0x04, 0xC8)] {
        sim.add_response(0x7E4, &[0x21, cmd], &frame(&[0x61, cmd], 38, &[(6, &[first_byte; 32])]));
    }
    sim.add_response(
        0x7E4,
        &[0x21, 0x05],
        &frame(
            &[0x61, 0x05],
            45,
            &[(11, &[25; 7]), (27, &[0x03, 0xE8]), (33, &[0xA2])],
        ),
    );
    sim.add_response(0x7E6, &[0x21, 0x80], &frame(&[0x61, 0x80], 25, &[(14, &[100])]));
    sim.add_response(0x7E2, &[0x21, 0x01], &frame(&[0x61, 0x01], 22, &[(7, &[0b1000])]));
    sim
}

#[test]
pub fn test_ioniq_decode_pass() {
    let _ = env_logger::try_init();
    let layout = VehicleModel::IoniqBev.compile().unwrap();
    let mut sim = ioniq_sim();

    let record = decode_all(&layout, &mut sim, 1).unwrap();
    assert_close(&record, "SOC_BMS", 80.0);
    assert_close(&record, "dcBatteryCurrent", -10.0);
    assert_close(&record, "dcBatteryVoltage", 400.0);
    assert_close(&record, "dcBatteryPower", -4.0);
    assert_close(&record, "cellVoltage01", 4.0);
    assert_close(&record, "cellVoltage96", 4.0);
    assert!(!record.contains("cellVoltage97"));
    assert_close(&record, "soh", 100.0);
    assert_close(&record, "SOC_DISPLAY", 81.0);
    assert_close(&record, "externalTemperature", 10.0);
    assert_close(&record, "batteryAvgTemperature", 23.75);
    assert_eq!(record.get("charging"), Some(1.0));
    assert_eq!(record.get("normalChargePort"), Some(1.0));
    assert_eq!(record.get("rapidChargePort"), Some(0.0));
    assert_eq!(record.get("vmcu_gear_d"), Some(1.0));
    assert_eq!(record.get("isParked"), Some(0.0));

    // Optional modules did not answer
    assert!(!record.contains("odo"));
    assert!(!record.contains("tire_fl_pres"));
    assert_eq!(sim.attempts(0x7C6, &[0x22, 0xB0, 0x02]), 2);
    assert_eq!(sim.attempts(0x7E4, &[0x21, 0x01]), 1);
}

#[test]
pub fn test_ioniq_odometer() {
    let layout = VehicleModel::IoniqBev.compile().unwrap();
    let mut sim = ioniq_sim();
    sim.add_response(
        0x7C6,
        &[0x22, 0xB0, 0x02],
        &frame(&[0x62, 0xB0, 0x02], 15, &[(9, &[0x01, 0x23, 0x45])]),
    );
    let record = decode_all(&layout, &mut sim, 0).unwrap();
    assert_eq!(record.get("odo"), Some(74565.0));
}

#[test]
pub fn test_ioniq_mandatory_command_missing() {
    let layout = VehicleModel::IoniqBev.compile().unwrap();
    let mut sim = SimulationChannel::new();
    let err = decode_all(&layout, &mut sim, 2).unwrap_err();
    assert!(matches!(err, DecodeError::NoData { attempts: 3, .. }));
    // Nothing after the first mandatory command was sent
    assert_eq!(sim.request_log().len(), 3);
}

fn e_gmp_sim(bms_len: usize) -> SimulationChannel {
    let mut sim = SimulationChannel::new();
    sim.add_response(
        0x7B3,
        &[0x22, 0x01, 0x00],
        &frame(&[0x62, 0x01, 0x00], 9, &[(7, &[100]), (8, &[110])]),
    );
    sim.add_response(
        0x7E4,
        &[0x22, 0x01, 0x01],
        &frame(
            &[0x62, 0x01, 0x01],
            bms_len,
            &[
                (6, &[0xA0]),
                (11, &[0x20]),
                (12, &[0x00, 0x64]),
                (14, &[0x0F, 0xA0]),
                (18, &[30; 5]),
            ],
        ),
    );
    for pid in [0x02u8, 0x03, 0x04, 0x0A, 0x0B, 0x0C] {
        sim.add_response(
            0x7E4,
            &[0x22, 0x01, pid],
            &frame(&[0x62, 0x01, pid], 40, &[(6, &[0xC8; 32])]),
        );
    }
    sim.add_response(
        0x7E4,
        &[0x22, 0x01, 0x05],
        &frame(
            &[0x62, 0x01, 0x05],
            46,
            &[(11, &[30; 7]), (27, &[0x03, 0xDE]), (41, &[30; 4])],
        ),
    );
    sim.add_response(
        0x7C6,
        &[0x22, 0xB0, 0x02],
        &frame(&[0x62, 0xB0, 0x02], 11, &[(8, &[0x01, 0x23, 0x45])]),
    );
    sim
}

#[test]
pub fn test_e_gmp_positions_and_padding() {
    let _ = env_logger::try_init();
    let layout = VehicleModel::EGmp.compile().unwrap();
    let mut sim = e_gmp_sim(56);

    let record = decode_all(&layout, &mut sim, 0).unwrap();
    assert_close(&record, "externalTemperature", 10.0);
    assert_close(&record, "internalTemperature", 15.0);
    assert_close(&record, "SOC_BMS", 80.0);
    assert_close(&record, "dcBatteryPower", 4.0);
    assert_close(&record, "cellVoltage001", 4.0);
    assert_close(&record, "cellVoltage192", 4.0);
    assert_close(&record, "soh", 99.0);
    assert_close(&record, "batteryAvgTemperature", 30.0);
    assert_eq!(record.get("rapidChargePort"), Some(1.0));
    assert_eq!(record.get("normalChargePort"), Some(0.0));
    assert_eq!(record.get("charging"), Some(1.0));
    assert_eq!(record.get("odo"), Some(74565.0));
    assert!(!record.contains("tire_fl_pres"));

    // 220101 ends at `ay`, the trailing 3 bytes were learnt
    let bms = layout
        .commands()
        .iter()
        .find(|c| c.spec().command == [0x22, 0x01, 0x01])
        .unwrap();
    match bms.kind() {
        CompiledKind::Frame(f) => {
            assert_eq!(f.base_len(), 53);
            assert_eq!(f.learned_padding(), Some(3));
        }
        other => panic!("unexpected layout {other:?}"),
    }

    // Firmware drift after learning is reported, not absorbed
    let mut drifted = e_gmp_sim(53);
    let err = decode_all(&layout, &mut drifted, 0).unwrap_err();
    match err {
        DecodeError::LengthMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, ExpectedLen::Exactly(56));
            assert_eq!(actual, 53);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
pub fn test_e_gmp_average_temperature_stops_at_cold_module() {
    let layout = VehicleModel::EGmp.compile().unwrap();
    let mut sim = e_gmp_sim(56);
    sim.add_response(
        0x7E4,
        &[0x22, 0x01, 0x01],
        &frame(
            &[0x62, 0x01, 0x01],
            56,
            &[(6, &[0xA0]), (18, &[30, 30, 0, 30, 30])],
        ),
    );
    let record = decode_all(&layout, &mut sim, 0).unwrap();
    assert_close(&record, "cellTemp04", 30.0);
    assert_close(&record, "batteryAvgTemperature", 20.0);
}

#[test]
pub fn test_zoe_simple_commands() {
    let _ = env_logger::try_init();
    let layout = VehicleModel::ZoeZe50.compile().unwrap();
    let mut ecu = VehicleSimEcu::new(|tx_id, cmd| {
        let value: &[u8] = match (tx_id, cmd) {
            (0x18DADAF1, [0x22, 0x20, 0x05]) => &[0x04, 0xB0],
            (0x18DADEF1, [0x22, 0x50, 0x17]) => &[0x03],
            (0x18DADBF1, [0x22, 0x90, 0x02]) => &[0x1F, 0x40],
            (0x18DADBF1, [0x22, 0x90, 0x01]) => &[0x1F, 0x72],
            (0x18DADBF1, [0x22, 0x90, 0x06]) => &[0x00, 0x06, 0x1A, 0x80],
            (0x18DADBF1, [0x22, 0x92, 0x45]) => &[0x00, 0x98, 0x96, 0x80],
            (0x18DADAF1, [0x22, 0x20, 0x06]) => &[0x01, 0x23, 0x45],
            (0x18DADBF1, [0x22, 0x92, 0x57]) => &[0x83, 0xE8],
            _ => return None,
        };
        let mut resp = cmd.to_vec();
        resp[0] += 0x40;
        resp.extend_from_slice(value);
        Some(resp)
    });

    let record = decode_all(&layout, &mut ecu, 0).unwrap();
    assert_close(&record, "auxBatteryVoltage", 12.0);
    assert_close(&record, "SOC_DISPLAY", 80.0);
    assert_close(&record, "SOC_BMS", 80.5);
    assert_close(&record, "dcBatteryVoltage", 400.0);
    assert_close(&record, "cumulativeEnergyCharged", 10000.0);
    assert_close(&record, "cumulativeEnergyDischarged", 10000.0);
    assert_close(&record, "dcBatteryCurrent", -10.0);
    assert_close(&record, "dcBatteryPower", -4.0);
    assert_eq!(record.get("odo"), Some(74565.0));
    assert_eq!(record.get("charging"), Some(1.0));
    assert_eq!(record.get("rapidChargePort"), Some(1.0));
    assert_eq!(record.get("normalChargePort"), Some(0.0));
}

#[test]
pub fn test_zoe_simple_command_too_long() {
    let layout = VehicleModel::ZoeZe50.compile().unwrap();
    let mut sim = SimulationChannel::new();
    sim.add_response(
        0x18DADAF1,
        &[0x22, 0x20, 0x05],
        &[0x62, 0x20, 0x05, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    );
    let err = decode_all(&layout, &mut sim, 0).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::LengthMismatch {
            expected: ExpectedLen::Between(4, 11),
            actual: 12,
            ..
        }
    ));
}

#[test]
pub fn test_bolt_autopad() {
    let layout = VehicleModel::ChevyBolt.compile().unwrap();
    let ecu = |pad: usize| {
        VehicleSimEcu::new(move |_tx_id, cmd: &[u8]| {
            let mut resp = vec![cmd[0] + 0x40, cmd[1], cmd[2]];
            match cmd {
                [0x22, 0x43, 0xAF] => resp.extend_from_slice(&[0xFF, 0xFF]),
                [0x22, 0x45, 0x31] => resp.push(0x01),
                [0x22, 0x43, 0x2D] | [0x22, 0x43, 0x56] | [0x22, 0x00, 0x42] => {
                    resp.extend_from_slice(&[0x00, 0x00])
                }
                _ => resp.push(0x00),
            }
            resp.extend(std::iter::repeat_n(0xAA, pad));
            Some(resp)
        })
    };

    let record = decode_all(&layout, &mut ecu(4), 0).unwrap();
    assert_close(&record, "SOC_BMS", 100.0);
    assert_close(&record, "batteryMaxTemperature", -40.0);
    assert_eq!(record.get("charging"), Some(1.0));
    assert_eq!(record.get("normalChargePort"), Some(1.0));
    assert_eq!(record.get("rapidChargePort"), Some(0.0));
    for cmd in layout.commands().iter().filter(|c| !c.spec().computed) {
        match cmd.kind() {
            CompiledKind::Frame(f) => assert_eq!(f.learned_padding(), Some(4)),
            other => panic!("unexpected layout {other:?}"),
        }
    }

    // Same padding again is fine, a different amount is not
    assert!(decode_all(&layout, &mut ecu(4), 0).is_ok());
    assert!(matches!(
        decode_all(&layout, &mut ecu(0), 0),
        Err(DecodeError::LengthMismatch { .. })
    ));
}

#[test]
pub fn test_tables_survive_json_files() {
    let commands = VehicleModel::IoniqBev.commands();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(tables_to_string(&commands).unwrap().as_bytes())
        .unwrap();

    let loaded = load_tables_from_file(file.path()).unwrap();
    assert_eq!(loaded, commands);

    let layout = CompiledLayout::compile(&loaded).unwrap();
    let record = decode_all(&layout, &mut ioniq_sim(), 0).unwrap();
    assert_close(&record, "batteryAvgTemperature", 23.75);
}
