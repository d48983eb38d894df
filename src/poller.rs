//! Vehicle polling loop
//!
//! [VehiclePoller] owns everything needed to poll one vehicle: the compiled table,
//! the bus channel, static vehicle data and the poll timing. Each poll runs one
//! decode pass and decides when the next one should happen.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    DecodeError,
    channel::RequestChannel,
    command::CommandSpec,
    decoder::{CancelToken, DecoderOptions, decode_all_with},
    layout::{CompiledLayout, LayoutResult},
    record::DecodedRecord,
};

/// Delay before the next attempt after a bus fault or an unanswered poll
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Static data of a vehicle model, merged into every record
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VehicleProfile {
    /// Model identifier reported to telemetry sinks (`IONIQ_BEV`, `E-GMP`, ...)
    pub model: String,
    /// Model identifier used by route planners, if known
    pub abrp_model: Option<String>,
    /// Usable battery capacity in kWh
    pub capacity_kwh: f64,
    /// Charge power on a household socket in kW
    pub slow_speed_kw: f64,
    /// AC charge power in kW
    pub normal_speed_kw: f64,
    /// DC charge power in kW
    pub fast_speed_kw: f64,
}

impl VehicleProfile {
    /// Values added to every record
    pub fn base_data(&self) -> DecodedRecord {
        [
            ("CAPACITY", self.capacity_kwh),
            ("SLOW_SPEED", self.slow_speed_kw),
            ("NORMAL_SPEED", self.normal_speed_kw),
            ("FAST_SPEED", self.fast_speed_kw),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Some(v)))
        .collect()
    }
}

/// Poll timing
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PollConfig {
    /// Time between two polls
    pub interval_ms: u64,
    /// Time between two polls while charging. Defaults to `interval_ms`
    pub charge_interval_ms: Option<u64>,
    /// Decoder tuning
    pub decoder: DecoderOptions,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            charge_interval_ms: None,
            decoder: DecoderOptions::default(),
        }
    }
}

impl PollConfig {
    fn interval(&self, charging: bool) -> Duration {
        let ms = match self.charge_interval_ms {
            Some(ms) if charging => ms,
            _ => self.interval_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Result of a single poll
#[derive(Debug)]
pub enum PollOutcome {
    /// A complete record
    Data(DecodedRecord),
    /// The bus or adapter failed. The next poll is attempted after [RETRY_DELAY]
    BusFault(DecodeError),
    /// The vehicle did not answer a mandatory command
    NoData,
    /// Polling is paused until the vehicle is available again
    Paused,
    /// The vehicle answered with something the table cannot decode
    DecodeFailed(DecodeError),
    /// The poll was cancelled
    Cancelled,
}

/// Polls one vehicle
pub struct VehiclePoller<C: RequestChannel> {
    layout: CompiledLayout,
    channel: C,
    profile: VehicleProfile,
    config: PollConfig,
    paused: bool,
    next_delay: Duration,
    car_available: Box<dyn FnMut() -> bool + Send>,
}

impl<C: RequestChannel> std::fmt::Debug for VehiclePoller<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehiclePoller")
            .field("profile", &self.profile)
            .field("config", &self.config)
            .field("paused", &self.paused)
            .field("next_delay", &self.next_delay)
            .finish()
    }
}

impl<C: RequestChannel> VehiclePoller<C> {
    /// Creates a poller for an already compiled table
    pub fn new(layout: CompiledLayout, channel: C, profile: VehicleProfile, config: PollConfig) -> Self {
        Self {
            layout,
            channel,
            profile,
            config,
            paused: false,
            next_delay: Duration::ZERO,
            car_available: Box::new(|| true),
        }
    }

    /// Compiles `commands` and creates a poller
    pub fn from_table(
        commands: &[CommandSpec],
        channel: C,
        profile: VehicleProfile,
        config: PollConfig,
    ) -> LayoutResult<Self> {
        Ok(Self::new(CompiledLayout::compile(commands)?, channel, profile, config))
    }

    /// Sets the check used to detect that the car is switched on (usually the
    /// 12V supply voltage). Without it the car is always assumed available
    pub fn with_availability<F: FnMut() -> bool + Send + 'static>(mut self, available: F) -> Self {
        self.car_available = Box::new(available);
        self
    }

    /// The compiled vehicle table
    pub fn layout(&self) -> &CompiledLayout {
        &self.layout
    }

    /// Static vehicle data
    pub fn profile(&self) -> &VehicleProfile {
        &self.profile
    }

    /// Poll timing
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// The bus channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// True while polling is paused because the car was found switched off
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Delay to wait before the next [Self::poll_once]
    pub fn next_poll_delay(&self) -> Duration {
        self.next_delay
    }

    /// Runs one decode pass and schedules the next one
    pub fn poll_once(&mut self, cancel: Option<&CancelToken>) -> PollOutcome {
        if self.paused {
            if !(self.car_available)() {
                self.next_delay = RETRY_DELAY;
                return PollOutcome::Paused;
            }
            log::info!("Resume polling.");
            self.paused = false;
        }

        let decoded = decode_all_with(&self.layout, &mut self.channel, &self.config.decoder, cancel);
        match decoded {
            Ok(values) => {
                let record = self.finish_record(values);
                let charging = record.get("charging").is_some_and(|v| v != 0.0);
                self.next_delay = self.config.interval(charging);
                PollOutcome::Data(record)
            }
            Err(DecodeError::Cancelled) => PollOutcome::Cancelled,
            Err(e) if e.is_bus_error() => {
                log::warn!("{e}");
                self.next_delay = RETRY_DELAY;
                PollOutcome::BusFault(e)
            }
            Err(e) if e.is_no_data() => {
                log::info!("NO DATA");
                self.next_delay = RETRY_DELAY;
                if !(self.car_available)() {
                    log::info!("Car off detected. Stop polling until car on.");
                    self.paused = true;
                }
                PollOutcome::NoData
            }
            Err(e) => {
                log::warn!("Poll failed: {e}");
                self.next_delay = self.config.interval(false);
                PollOutcome::DecodeFailed(e)
            }
        }
    }

    fn finish_record(&self, values: DecodedRecord) -> DecodedRecord {
        let mut record = self.profile.base_data();
        record.extend(values);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs_f64());
        record.insert("timestamp", timestamp);

        if let Some(speed) = record.entry("realVehicleSpeed") {
            record.insert("speed", speed);
        }
        let plugged = ["charging", "normalChargePort", "rapidChargePort"]
            .iter()
            .any(|k| record.get(k).is_some_and(|v| v != 0.0));
        if plugged {
            record.insert("speed", Some(0.0));
        }
        record
    }

    /// Polls until `cancel` is cancelled, handing every record to `sink`
    pub fn run<F: FnMut(&DecodedRecord)>(&mut self, cancel: &CancelToken, mut sink: F) {
        while !cancel.is_cancelled() {
            match self.poll_once(Some(cancel)) {
                PollOutcome::Data(record) => sink(&record),
                PollOutcome::Cancelled => break,
                _ => {}
            }
            let mut remaining = self.next_delay;
            while !remaining.is_zero() && !cancel.is_cancelled() {
                let slice = remaining.min(SLEEP_SLICE);
                std::thread::sleep(slice);
                remaining -= slice;
            }
        }
        log::debug!("Polling loop for {} stopped", self.profile.model);
    }
}
