//! Hyundai Ioniq Electric 28kWh

use crate::{
    command::CommandSpec,
    expr::Expr,
    field::{FieldSpec, FieldWidth},
    poller::VehicleProfile,
};

use super::{battery_power, flag};

const BMS_RX: u32 = 0x7EC;
const BMS_TX: u32 = 0x7E4;
const TIRE_PRESSURE_SCALE: f64 = 0.2 / 14.504;

fn cell_voltages(cmd: u8, first: usize) -> CommandSpec {
    CommandSpec::new(&[0x21, cmd], BMS_RX, BMS_TX)
        .field(FieldSpec::padding(6))
        .field(FieldSpec::new("cellVoltage%02d", FieldWidth::One).repeat(first, 32).scale(0.02))
}

fn tire(corner: &str) -> [FieldSpec; 3] {
    [
        FieldSpec::new(format!("tire_{corner}_pres"), FieldWidth::One).scale(TIRE_PRESSURE_SCALE),
        FieldSpec::new(format!("tire_{corner}_temp"), FieldWidth::One).offset(-55.0),
        FieldSpec::padding(2),
    ]
}

/// Vehicle table
pub fn commands() -> Vec<CommandSpec> {
    use FieldWidth::*;
    vec![
        CommandSpec::new(&[0x21, 0x01], BMS_RX, BMS_TX).fields([
            FieldSpec::padding(6),
            FieldSpec::new("SOC_BMS", One).scale(0.5),
            FieldSpec::new("availableChargePower", Two).scale(0.01),
            FieldSpec::new("availableDischargePower", Two).scale(0.01),
            FieldSpec::new("bmsBits1", One),
            FieldSpec::new("dcBatteryCurrent", Two).signed().scale(0.1),
            FieldSpec::new("dcBatteryVoltage", Two).scale(0.1),
            FieldSpec::new("batteryMaxTemperature", One).signed(),
            FieldSpec::new("batteryMinTemperature", One).signed(),
            FieldSpec::new("cellTemp%02d", One).repeat(1, 5).signed(),
            FieldSpec::padding(1),
            FieldSpec::new("batteryInletTemperature", One).signed(),
            FieldSpec::new("maxCellVoltage", One).scale(0.02),
            FieldSpec::new("maxCellVoltageNumber", One),
            FieldSpec::new("minCellVoltage", One).scale(0.02),
            FieldSpec::new("minCellVoltageNumber", One),
            FieldSpec::new("fanStatus", One),
            FieldSpec::new("fanFeedback", One).scale(100.0),
            FieldSpec::new("auxBatteryVoltage", One).scale(0.1),
            FieldSpec::new("cumulativeChargeCurrent", Four).scale(0.1),
            FieldSpec::new("cumulativeDischargeCurrent", Four).scale(0.1),
            FieldSpec::new("cumulativeEnergyCharged", Four).scale(0.1),
            FieldSpec::new("cumulativeEnergyDischarged", Four).scale(0.1),
            FieldSpec::new("operatingSeconds", Four),
            FieldSpec::new("bmsBits2", One),
            FieldSpec::new("inverterCapacitorVoltage", Two),
            FieldSpec::new("driveMotorSpeed1", Two).signed(),
            FieldSpec::new("driveMotorSpeed2", Two).signed(),
            FieldSpec::new("isolationResistance", Two),
        ]),
        cell_voltages(0x02, 1),
        cell_voltages(0x03, 33),
        cell_voltages(0x04, 65),
        CommandSpec::new(&[0x21, 0x05], BMS_RX, BMS_TX).fields([
            FieldSpec::padding(11),
            FieldSpec::new("cellTemp%02d", One).repeat(6, 7).signed(),
            FieldSpec::padding(4),
            FieldSpec::new("cellVoltageDeviation", One).scale(0.02),
            FieldSpec::padding(1),
            FieldSpec::new("airbagWireDuty", One),
            FieldSpec::new("batteryHeater1Temperature", One).signed(),
            FieldSpec::new("batteryHeater2Temperature", One).signed(),
            FieldSpec::new("soh", Two).scale(0.1),
            FieldSpec::new("maxCellDeteriorationNo", One),
            FieldSpec::new("minCellDeterioration", Two).scale(0.1),
            FieldSpec::new("minCellDeteriorationNo", One),
            FieldSpec::new("SOC_DISPLAY", One).scale(0.5),
            FieldSpec::padding(11),
        ]),
        CommandSpec::new(&[0x21, 0x80], 0x7EE, 0x7E6).fields([
            FieldSpec::padding(14),
            FieldSpec::new("externalTemperature", One).scale(0.5).offset(-40.0),
            FieldSpec::padding(10),
        ]),
        CommandSpec::new(&[0x22, 0xB0, 0x02], 0x7CE, 0x7C6)
            .optional()
            .fields([
                FieldSpec::padding(9),
                FieldSpec::new("odo", Three),
                FieldSpec::padding(3),
            ]),
        CommandSpec::new(&[0x22, 0xC0, 0x0B], 0x7A8, 0x7A0)
            .optional()
            .field(FieldSpec::padding(7))
            .fields(["fl", "fr", "rl", "rr"].into_iter().flat_map(tire)),
        CommandSpec::new(&[0x21, 0x01], 0x7EA, 0x7E2).fields([
            FieldSpec::padding(7),
            FieldSpec::new("gearBits", One),
            FieldSpec::new("brakeBits", One),
            FieldSpec::padding(5),
            FieldSpec::new("vmcu_accel", One),
            FieldSpec::padding(7),
        ]),
        CommandSpec::computed(vec![
            battery_power(),
            flag("charging", "bmsBits1", 0x80),
            flag("normalChargePort", "bmsBits1", 0x20),
            flag("rapidChargePort", "bmsBits1", 0x40),
            flag("isParked", "gearBits", 0b0001),
            flag("vmcu_gear_p", "gearBits", 0b0001),
            flag("vmcu_gear_r", "gearBits", 0b0010),
            flag("vmcu_gear_n", "gearBits", 0b0100),
            flag("vmcu_gear_d", "gearBits", 0b1000),
            flag("vmcu_brake_lamp", "brakeBits", 0b01),
            flag("vmcu_brake_on", "brakeBits", 0b10),
            FieldSpec::computed(
                "batteryAvgTemperature",
                Expr::Mean {
                    pattern: "cellTemp%02d".into(),
                    start: 1,
                    count: 12,
                },
            ),
        ]),
    ]
}

/// Static vehicle data
pub fn profile() -> VehicleProfile {
    VehicleProfile {
        model: "IONIQ_BEV".into(),
        abrp_model: Some("hyundai:ioniq:17:28:other".into()),
        capacity_kwh: 28.0,
        slow_speed_kw: 2.3,
        normal_speed_kw: 4.6,
        fast_speed_kw: 50.0,
    }
}
