//! Frame decoder
//!
//! One decode pass sends every request of a [CompiledLayout] in declaration order,
//! unpacks the responses and finally evaluates computed fields against the record
//! built so far. Requests are strictly sequential, the bus only carries one
//! diagnostic request at a time.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use automotive_diag::uds::UdsErrorByte;

use crate::{
    DecodeError, DecodeResult,
    channel::{ChannelError, RequestChannel},
    expr::EvalContext,
    layout::{CompiledCommand, CompiledKind, CompiledLayout, ExpectedLen},
    record::DecodedRecord,
};

/// First byte of a negative response
const NEGATIVE_RESPONSE_SID: u8 = 0x7F;
/// Offset between a request SID and its positive response SID
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// NRC: busy, repeat request
const NRC_BUSY_REPEAT_REQUEST: u8 = 0x21;
/// NRC: request correctly received, response pending
const NRC_RESPONSE_PENDING: u8 = 0x78;

/// Decoder tuning
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DecoderOptions {
    /// Number of times an unanswered request is repeated. A request is sent at most
    /// `max_retries + 1` times
    pub max_retries: usize,
    /// Require the first response byte to be the positive response SID of the request
    pub check_response_sid: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            check_response_sid: true,
        }
    }
}

/// Cancels a decode pass (or a polling loop) from another thread.
///
/// Cancellation is checked between commands, a request already on the bus
/// always runs until it is answered or times out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [Self::cancel] has been called on any clone of this token
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Resolution of a single command within a decode pass
#[derive(Debug)]
pub enum CommandOutcome {
    /// The response was decoded into these values
    Decoded(DecodedRecord),
    /// Optional command the ECU did not answer. Its fields stay absent
    Skipped,
    /// The decode pass must stop
    Failed(DecodeError),
}

enum RequestFailure {
    NoData { attempts: usize },
    Negative(u8),
    Bus(ChannelError),
}

/// Runs one decode pass with default options and the given retry count
pub fn decode_all<C: RequestChannel + ?Sized>(
    layout: &CompiledLayout,
    channel: &mut C,
    max_retries: usize,
) -> DecodeResult<DecodedRecord> {
    let opts = DecoderOptions {
        max_retries,
        ..Default::default()
    };
    decode_all_with(layout, channel, &opts, None)
}

/// Runs one decode pass.
///
/// Request commands are resolved in declaration order, then computed blocks are
/// evaluated in declaration order. The first failed command aborts the pass.
pub fn decode_all_with<C: RequestChannel + ?Sized>(
    layout: &CompiledLayout,
    channel: &mut C,
    opts: &DecoderOptions,
    cancel: Option<&CancelToken>,
) -> DecodeResult<DecodedRecord> {
    let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
    let mut record = DecodedRecord::new();

    for cmd in layout.commands().iter().filter(|c| !c.spec().computed) {
        if cancelled() {
            return Err(DecodeError::Cancelled);
        }
        match decode_command(cmd, channel, opts, &record) {
            CommandOutcome::Decoded(values) => record.extend(values),
            CommandOutcome::Skipped => {}
            CommandOutcome::Failed(e) => return Err(e),
        }
    }

    for cmd in layout.commands().iter().filter(|c| c.spec().computed) {
        if cancelled() {
            return Err(DecodeError::Cancelled);
        }
        if let CommandOutcome::Decoded(values) = decode_command(cmd, channel, opts, &record) {
            record.extend(values);
        }
    }
    Ok(record)
}

/// Sends one request command and decodes its response.
///
/// `record` holds the values decoded earlier in the pass, formula fields may refer to them.
/// Computed blocks never touch the channel, they are evaluated against `record`.
pub fn decode_command<C: RequestChannel + ?Sized>(
    cmd: &CompiledCommand,
    channel: &mut C,
    opts: &DecoderOptions,
    record: &DecodedRecord,
) -> CommandOutcome {
    let spec = cmd.spec();
    let label = spec.label();

    if let CompiledKind::Computed(fields) = cmd.kind() {
        let mut scope = record.clone();
        let mut values = DecodedRecord::new();
        for f in fields {
            let value = f.eval(&EvalContext::record(&scope));
            if value.is_none() {
                log::debug!("Computed field {} has no value this pass", f.name);
            }
            scope.insert(f.name.clone(), value);
            values.insert(f.name.clone(), value);
        }
        return CommandOutcome::Decoded(values);
    }

    let bytes = match request(cmd, channel, opts.max_retries) {
        Ok(bytes) => bytes,
        Err(RequestFailure::NoData { attempts }) => {
            if spec.optional {
                log::info!("Optional command {label} not answered after {attempts} attempt(s), skipping");
                return CommandOutcome::Skipped;
            }
            log::error!("Command {label} not answered after {attempts} attempt(s)");
            return CommandOutcome::Failed(DecodeError::NoData {
                command: label,
                attempts,
            });
        }
        Err(RequestFailure::Negative(code)) => {
            let def = format!("{:02X?}", UdsErrorByte::from(code));
            if spec.optional {
                log::info!("Optional command {label} rejected by ECU ({def}), skipping");
                return CommandOutcome::Skipped;
            }
            log::error!("ECU Negative response to {label}: 0x{code:02X} {def}");
            return CommandOutcome::Failed(DecodeError::NegativeResponse {
                command: label,
                code,
                def,
            });
        }
        Err(RequestFailure::Bus(e)) => {
            log::error!("Channel error on {label}: {e}");
            return CommandOutcome::Failed(DecodeError::BusError {
                command: label,
                source: e,
            });
        }
    };

    if let (true, Some(&sid)) = (opts.check_response_sid, spec.command.first()) {
        let want = sid.wrapping_add(POSITIVE_RESPONSE_OFFSET);
        if let Some(&received) = bytes.first() {
            if received != want {
                log::error!("Command {label} expected response SID 0x{want:02X}, got {bytes:02X?}");
                return CommandOutcome::Failed(DecodeError::WrongMessage {
                    command: label,
                    want,
                    received,
                });
            }
        }
    }

    let mismatch = |expected: ExpectedLen| {
        log::error!(
            "Length mismatch on {label}: expected {expected} byte(s), got {}. Layout: {}. Raw: {bytes:02X?}",
            bytes.len(),
            cmd.describe()
        );
        CommandOutcome::Failed(DecodeError::LengthMismatch {
            command: label.clone(),
            expected,
            actual: bytes.len(),
            raw: bytes.clone(),
        })
    };

    let mut values = DecodedRecord::new();
    match cmd.kind() {
        CompiledKind::Frame(layout) => {
            if let Err(expected) = layout.accept_len(bytes.len()) {
                return mismatch(expected);
            }
            for f in layout.fields() {
                values.insert(f.name.clone(), f.decode(&bytes));
            }
        }
        CompiledKind::Simple(field) => match field.decode(&bytes, spec.command.len()) {
            Ok(v) => values.insert(field.name.clone(), Some(v)),
            Err(expected) => return mismatch(expected),
        },
        CompiledKind::Formula { fields, min_len } => {
            if bytes.len() < *min_len {
                return mismatch(ExpectedLen::AtLeast(*min_len));
            }
            // Later formulas may refer to earlier ones of the same response
            let mut scope = record.clone();
            for f in fields {
                let v = f.eval(&EvalContext::frame(&bytes, &scope));
                scope.insert(f.name.clone(), v);
                values.insert(f.name.clone(), v);
            }
        }
        CompiledKind::Computed(_) => {}
    }
    log::debug!("Decoded {} value(s) from {label}", values.len());
    CommandOutcome::Decoded(values)
}

fn request<C: RequestChannel + ?Sized>(
    cmd: &CompiledCommand,
    channel: &mut C,
    max_retries: usize,
) -> Result<Vec<u8>, RequestFailure> {
    let spec = cmd.spec();
    let total = max_retries + 1;
    for attempt in 1..=total {
        log::debug!("Sending req to ECU 0x{:03X}: {:02X?}", spec.tx_id, spec.command);
        match channel.send_request(
            &spec.command,
            spec.rx_id,
            spec.tx_id,
            spec.flow_control.as_ref(),
        ) {
            Ok(bytes) => {
                log::debug!("ECU Response: {bytes:02X?}");
                if bytes.first() != Some(&NEGATIVE_RESPONSE_SID) {
                    return Ok(bytes);
                }
                let code = bytes.get(2).copied().unwrap_or(0);
                if code == NRC_BUSY_REPEAT_REQUEST || code == NRC_RESPONSE_PENDING {
                    log::debug!("ECU is busy (attempt {attempt}/{total})");
                    continue;
                }
                return Err(RequestFailure::Negative(code));
            }
            Err(e) if e.is_no_data() => {
                log::debug!("No data from ECU (attempt {attempt}/{total}): {e}");
            }
            Err(e) => return Err(RequestFailure::Bus(e)),
        }
    }
    Err(RequestFailure::NoData { attempts: total })
}
