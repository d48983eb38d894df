//! Hyundai / Kia E-GMP platform
//!
//! Positions follow the platform's published Torque PID file.

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

fn cell_voltages(pid: u8, first: usize) -> CommandSpec {
    CommandSpec::new(&[0x22, 0x01, pid], BMS_RX, BMS_TX).field(
        FieldSpec::new("cellVoltage%03d", FieldWidth::One)
            .repeat(first, 32)
            .scale(0.02)
            .at("e"),
    )
}

/// Vehicle table
pub fn commands() -> Vec<CommandSpec> {
    use FieldWidth::*;
    vec![
        CommandSpec::new(&[0x22, 0x01, 0x00], 0x7BB, 0x7B3).fields([
            FieldSpec::new("externalTemperature", One).scale(0.5).offset(-40.0).at("f"),
            FieldSpec::new("internalTemperature", One).scale(0.5).offset(-40.0).at("g"),
        ]),
        CommandSpec::new(&[0x22, 0x01, 0x01], BMS_RX, BMS_TX).fields([
            FieldSpec::new("SOC_BMS", One).scale(0.5).at("e"),
            FieldSpec::new("charging_bits1", One).at("j"),
            FieldSpec::new("dcBatteryCurrent", Two).signed().scale(0.1).at("k"),
            FieldSpec::new("dcBatteryVoltage", Two).scale(0.1).at("m"),
            FieldSpec::new("batteryMaxTemperature", One).signed().at("o"),
            FieldSpec::new("batteryMinTemperature", One).signed().at("p"),
            FieldSpec::new("cellTemp%02d", One).repeat(1, 5).signed().at("q"),
            FieldSpec::new("cumulativeChargeCurrent", Four).scale(0.1).at("ae"),
            FieldSpec::new("cumulativeDischargeCurrent", Four).scale(0.1).at("ai"),
            FieldSpec::new("cumulativeEnergyCharged", Four).scale(0.1).at("am"),
            FieldSpec::new("cumulativeEnergyDischarged", Four).scale(0.1).at("aq"),
            // seconds
            FieldSpec::new("operatingTime", Four).at("au"),
            FieldSpec::new("charging_bits2", One).at("ay"),
        ]),
        cell_voltages(0x02, 1),
        cell_voltages(0x03, 33),
        cell_voltages(0x04, 65),
        CommandSpec::new(&[0x22, 0x01, 0x05], BMS_RX, BMS_TX).fields([
            FieldSpec::new("cellTemp%02d", One).repeat(6, 7).signed().at("j"),
            FieldSpec::new("batteryInletTemperature", One).signed().at("x"),
            FieldSpec::new("soh", Two).scale(0.1).at("z"),
            FieldSpec::new("SOC_DISPLAY", One).scale(0.5).at("af"),
            FieldSpec::new("cellTemp%02d", One).repeat(13, 4).signed().at("an"),
        ]),
        cell_voltages(0x0A, 97),
        cell_voltages(0x0B, 129),
        cell_voltages(0x0C, 161),
        CommandSpec::new(&[0x22, 0xB0, 0x02], 0x7CE, 0x7C6)
            .optional()
            .field(FieldSpec::new("odo", Three).at("g")),
        CommandSpec::new(&[0x22, 0xC0, 0x0B], 0x7A8, 0x7A0)
            .optional()
            .fields([
                FieldSpec::new("tire_fl_pres", One).scale(TIRE_PRESSURE_SCALE).at("e"),
                FieldSpec::new("tire_fl_temp", One).offset(-50.0).at("f"),
                FieldSpec::new("tire_fr_pres", One).scale(TIRE_PRESSURE_SCALE).at("j"),
                FieldSpec::new("tire_fr_temp", One).offset(-50.0).at("k"),
                FieldSpec::new("tire_rl_pres", One).scale(TIRE_PRESSURE_SCALE).at("o"),
                FieldSpec::new("tire_rl_temp", One).offset(-50.0).at("p"),
                FieldSpec::new("tire_rr_pres", One).scale(TIRE_PRESSURE_SCALE).at("t"),
                FieldSpec::new("tire_rr_temp", One).offset(-50.0).at("u"),
            ]),
        CommandSpec::computed(vec![
            battery_power(),
            flag("normalChargePort", "charging_bits1", 0x10),
            flag("rapidChargePort", "charging_bits1", 0x20),
            FieldSpec::computed(
                "charging",
                Expr::Any(vec![
                    Expr::field("normalChargePort"),
                    Expr::field("rapidChargePort"),
                ]),
            ),
            // Stops at the first module temperature <= 0, which is still counted
            FieldSpec::computed(
                "batteryAvgTemperature",
                Expr::MeanUntilNonPositive {
                    pattern: "cellTemp%02d".into(),
                    start: 1,
                    count: 16,
                },
            ),
        ]),
    ]
}

/// Static vehicle data
pub fn profile() -> VehicleProfile {
    VehicleProfile {
        model: "E-GMP".into(),
        abrp_model: None,
        capacity_kwh: 64.0,
        slow_speed_kw: 2.3,
        normal_speed_kw: 4.6,
        fast_speed_kw: 50.0,
    }
}
