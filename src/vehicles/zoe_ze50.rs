//! Renault Zoe Z.E.50
//!
//! Most values are read with simple commands: the ECU echoes the request and
//! appends a single integer whose width depends on the identifier.

use crate::{
    command::CommandSpec,
    expr::{BinaryOp, Expr},
    field::{FieldSpec, FieldWidth},
    poller::VehicleProfile,
};

use super::battery_power;

/// Battery controller
const LBC_RX: u32 = 0x18DAF1DB;
const LBC_TX: u32 = 0x18DADBF1;
/// Vehicle controller
const EVC_RX: u32 = 0x18DAF1DA;
const EVC_TX: u32 = 0x18DADAF1;
/// Charger
const BCB_RX: u32 = 0x18DAF1DE;
const BCB_TX: u32 = 0x18DADEF1;

/// 0: not charging, 1: AC mono, 2: AC tri, 3: DC, 4: AC bi
const CMD_CHARGE_STATE: [u8; 3] = [0x22, 0x50, 0x17];

fn simple(cmd: [u8; 3], rx: u32, tx: u32, field: FieldSpec) -> CommandSpec {
    CommandSpec::new(&cmd, rx, tx).simple().field(field)
}

/// Vehicle table
pub fn commands() -> Vec<CommandSpec> {
    use FieldWidth::One;
    vec![
        simple(
            [0x22, 0x20, 0x05],
            EVC_RX,
            EVC_TX,
            FieldSpec::new("auxBatteryVoltage", One).scale(0.01),
        ),
        simple(CMD_CHARGE_STATE, BCB_RX, BCB_TX, FieldSpec::new("charge_state", One)),
        simple(
            [0x22, 0x90, 0x02],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("SOC_DISPLAY", One).scale(0.01),
        ),
        simple(
            [0x22, 0x90, 0x01],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("SOC_BMS", One).scale(0.01),
        ),
        simple(
            [0x22, 0x90, 0x06],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("dcBatteryVoltage", One).scale(0.001),
        ),
        // Both energy counters are read from the same identifier
        simple(
            [0x22, 0x92, 0x45],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("cumulativeEnergyCharged", One).scale(0.001),
        ),
        CommandSpec::new(&[0x22, 0x20, 0x06], EVC_RX, EVC_TX).fields([
            FieldSpec::padding(3),
            FieldSpec::new("odo", FieldWidth::Three),
        ]),
        simple(
            [0x22, 0x92, 0x45],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("cumulativeEnergyDischarged", One).scale(0.001),
        ),
        simple(
            [0x22, 0x92, 0x57],
            LBC_RX,
            LBC_TX,
            FieldSpec::new("dcBatteryCurrent", One)
                .scale(-0.01)
                .offset(f64::from(1u32 << 15) * 0.01),
        ),
        CommandSpec::computed(vec![
            battery_power(),
            FieldSpec::computed(
                "charging",
                Expr::binary(BinaryOp::Ne, Expr::field("charge_state"), Expr::Const(0.0)),
            ),
            FieldSpec::computed(
                "normalChargePort",
                Expr::OneOf(Box::new(Expr::field("charge_state")), vec![1.0, 2.0, 4.0]),
            ),
            FieldSpec::computed("rapidChargePort", Expr::equals("charge_state", 3.0)),
        ]),
    ]
}

/// Static vehicle data
pub fn profile() -> VehicleProfile {
    VehicleProfile {
        model: "ZOE_ZE50".into(),
        abrp_model: None,
        capacity_kwh: 52.0,
        slow_speed_kw: 2.3,
        normal_speed_kw: 22.0,
        fast_speed_kw: 50.0,
    }
}
