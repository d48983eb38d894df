#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate for decoding the diagnostic responses of electric vehicles into telemetry records
//!
//! Vehicles expose battery, motor and charging state through manufacturer specific
//! UDS / KWP style requests carried over ISO-TP. Every model answers with its own
//! binary layout, so this crate does not hard-code any of them. Instead it provides
//! a table driven decoder:
//!
//! ## Vehicle tables
//!
//! A vehicle is described by a list of [CommandSpec]s: the request to send, the CAN
//! IDs to use and the [FieldSpec]s found in the response. Fields can be placed with
//! explicit padding or with Torque style letter positions, can repeat (cell voltages,
//! module temperatures), can be 3 bytes wide (odometers) and can be derived from other
//! values with a small [Expr] language. Tables are plain data and can be loaded from
//! JSON (see [config]) or from Torque PID files (see [torque]).
//!
//! ## Layout compilation
//!
//! At startup a table is compiled into a [CompiledLayout]. All table errors (bad
//! widths, overlapping positions, missing names) are reported here, never while polling.
//!
//! ## Decoding
//!
//! [decode_all] sends every request through a [RequestChannel], retries requests the
//! ECU did not answer, skips optional commands, learns vendor padding and produces
//! a [DecodedRecord]. [VehiclePoller] wraps this into the polling loop of a telemetry agent.
//!
//! ## Hardware
//!
//! The crate does not drive CAN adapters itself. Any transport implementing
//! [RequestChannel] can be used. A [SimulationChannel](hardware::SimulationChannel)
//! is provided for testing vehicle tables without a car.

use channel::ChannelError;

pub mod channel;
pub mod command;
#[cfg(feature = "serde")]
pub mod config;
pub mod decoder;
pub mod expr;
pub mod field;
pub mod hardware;
pub mod layout;
pub mod poller;
pub mod position;
pub mod record;
pub mod torque;
pub mod vehicles;

pub use channel::{FlowControlOpts, IsoTpFlags, RequestChannel};
pub use command::CommandSpec;
pub use decoder::{CancelToken, CommandOutcome, DecoderOptions, decode_all, decode_all_with};
pub use expr::{BinaryOp, EvalContext, Expr};
pub use field::{Derivation, FieldSpec, FieldWidth, OddWidthOrder};
pub use layout::{CompiledLayout, ExpectedLen, LayoutError, LayoutResult};
pub use poller::{PollConfig, PollOutcome, VehiclePoller, VehicleProfile};
pub use record::DecodedRecord;

/// Decoder result
pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, thiserror::Error)]
/// Unrecoverable failure of a decode pass
pub enum DecodeError {
    /// A mandatory command was not answered, even after retrying
    #[error("Command {command} returned no data after {attempts} attempt(s)")]
    NoData {
        /// Command label
        command: String,
        /// Number of requests sent
        attempts: usize,
    },
    /// The channel reported a bus or adapter failure
    #[error("Bus error while sending command {command}")]
    BusError {
        /// Command label
        command: String,
        /// Channel error
        #[source]
        source: ChannelError,
    },
    /// Diagnostic error code from the ECU itself
    #[error("ECU Negative response to {command}. Error 0x{code:02X}, definition: {def}")]
    NegativeResponse {
        /// Command label
        command: String,
        /// Raw negative response code
        code: u8,
        /// Negative response code definition
        def: String,
    },
    /// ECU responded with a message that wasn't a reply for the sent request
    #[error("Command {command} expected response SID 0x{want:02X}, but received 0x{received:02X}")]
    WrongMessage {
        /// Command label
        command: String,
        /// Expected positive response SID
        want: u8,
        /// Received first byte
        received: u8,
    },
    /// The response length does not match the compiled layout
    #[error("Command {command} expected {expected} byte(s), but received {actual}")]
    LengthMismatch {
        /// Command label
        command: String,
        /// Length the layout expects
        expected: ExpectedLen,
        /// Length received
        actual: usize,
        /// The full response
        raw: Vec<u8>,
    },
    /// The caller cancelled the decode pass between two commands
    #[error("Decode pass was cancelled")]
    Cancelled,
}

impl DecodeError {
    /// True if the ECU simply did not answer (car asleep or module absent)
    pub fn is_no_data(&self) -> bool {
        matches!(self, DecodeError::NoData { .. })
    }

    /// True if the failure came from the bus itself rather than the ECU
    pub fn is_bus_error(&self) -> bool {
        matches!(self, DecodeError::BusError { .. })
    }
}
