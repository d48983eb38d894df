//! Chevrolet Bolt EV
//!
//! Every identifier answers with an undocumented amount of trailing data, so all
//! commands learn their padding from the first response.

use crate::{
    command::CommandSpec,
    expr::{BinaryOp, Expr},
    field::{FieldSpec, FieldWidth},
    poller::VehicleProfile,
};

use super::battery_power;

const BMS_RX: u32 = 0x7EC;
const BMS_TX: u32 = 0x7E4;
const ECM_RX: u32 = 0x7E8;
const ECM_TX: u32 = 0x7E0;

fn read(did: u16, rx: u32, tx: u32, field: FieldSpec) -> CommandSpec {
    let [hi, lo] = did.to_be_bytes();
    CommandSpec::new(&[0x22, hi, lo], rx, tx)
        .autopad()
        .field(FieldSpec::padding(3))
        .field(field)
}

/// Vehicle table
pub fn commands() -> Vec<CommandSpec> {
    use FieldWidth::*;
    vec![
        read(0x43AF, BMS_RX, BMS_TX, FieldSpec::new("SOC_BMS", Two).scale(100.0 / 65535.0)),
        read(0x8334, BMS_RX, BMS_TX, FieldSpec::new("SOC_DISPLAY", One).scale(100.0 / 255.0)),
        read(0x4349, BMS_RX, BMS_TX, FieldSpec::new("batteryMaxTemperature", One).offset(-40.0)),
        read(0x434A, BMS_RX, BMS_TX, FieldSpec::new("batteryMinTemperature", One).offset(-40.0)),
        read(0x41A4, BMS_RX, BMS_TX, FieldSpec::new("batteryInletTemperature", One).offset(-40.0)),
        read(0x432D, BMS_RX, BMS_TX, FieldSpec::new("dcBatteryVoltage", Two).scale(0.52)),
        read(
            0x4356,
            BMS_RX,
            BMS_TX,
            FieldSpec::new("dcBatteryCurrent", Two).signed().scale(1.0 / -6.675),
        ),
        read(0x0042, ECM_RX, ECM_TX, FieldSpec::new("auxBatteryVoltage", Two).scale(0.001)),
        read(0x4531, BMS_RX, BMS_TX, FieldSpec::new("bmsBits", One)),
        read(0x0046, ECM_RX, ECM_TX, FieldSpec::new("externalTemperature", One).offset(-40.0)),
        CommandSpec::computed(vec![
            battery_power(),
            FieldSpec::computed(
                "charging",
                Expr::binary(BinaryOp::Ne, Expr::field("bmsBits"), Expr::Const(0.0)),
            ),
            FieldSpec::computed(
                "normalChargePort",
                Expr::OneOf(Box::new(Expr::field("bmsBits")), vec![1.0, 2.0]),
            ),
            FieldSpec::computed("rapidChargePort", Expr::equals("bmsBits", 3.0)),
        ]),
    ]
}

/// Static vehicle data
pub fn profile() -> VehicleProfile {
    VehicleProfile {
        model: "CHEVY_BOLT".into(),
        abrp_model: None,
        capacity_kwh: 60.0,
        slow_speed_kw: 2.3,
        normal_speed_kw: 7.2,
        fast_speed_kw: 55.0,
    }
}
