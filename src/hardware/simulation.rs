//! Simulation hardware for unit testing the decoder and vehicle tables
//!
//! [SimulationChannel] answers requests from a table keyed by the ECU's
//! transmit ID and the request bytes. Each key can hold a queue of scripted
//! outcomes which are consumed in order, and a fixed fallback response used
//! once the queue is empty. Unknown requests are answered with no data.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::channel::{ChannelError, ChannelResult, FlowControlOpts, RequestChannel};

/// One scripted reaction of the simulated ECU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimResponse {
    /// Positive (or raw) response payload
    Data(Vec<u8>),
    /// The ECU stays quiet
    NoData,
    /// The adapter reports a bus failure
    BusError,
}

#[derive(Debug, Default)]
struct SimState {
    fixed: HashMap<(u32, Vec<u8>), Vec<u8>>,
    scripted: HashMap<(u32, Vec<u8>), VecDeque<SimResponse>>,
    attempts: HashMap<(u32, Vec<u8>), usize>,
    log: Vec<(u32, Vec<u8>)>,
}

/// Simulated request channel. Cloning shares the response table, so a test can keep
/// a handle while the decoder owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulationChannel {
    state: Arc<Mutex<SimState>>,
}

impl SimulationChannel {
    /// Creates an empty simulation (every request answers no data)
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answers `req` sent to `tx_id` with `resp` every time
    pub fn add_response(&mut self, tx_id: u32, req: &[u8], resp: &[u8]) {
        self.state()
            .fixed
            .insert((tx_id, req.to_vec()), resp.to_vec());
    }

    /// Queues a one-shot outcome for `req` sent to `tx_id`. Queued outcomes take
    /// priority over the fixed response.
    pub fn push_outcome(&mut self, tx_id: u32, req: &[u8], outcome: SimResponse) {
        self.state()
            .scripted
            .entry((tx_id, req.to_vec()))
            .or_default()
            .push_back(outcome);
    }

    /// Number of times `req` was sent to `tx_id`
    pub fn attempts(&self, tx_id: u32, req: &[u8]) -> usize {
        self.state()
            .attempts
            .get(&(tx_id, req.to_vec()))
            .copied()
            .unwrap_or(0)
    }

    /// Every request seen so far, in order
    pub fn request_log(&self) -> Vec<(u32, Vec<u8>)> {
        self.state().log.clone()
    }

    /// Removes all responses and counters
    pub fn clear_map(&mut self) {
        *self.state() = SimState::default();
    }
}

impl RequestChannel for SimulationChannel {
    fn send_request(
        &mut self,
        command: &[u8],
        _rx_id: u32,
        tx_id: u32,
        _flow_control: Option<&FlowControlOpts>,
    ) -> ChannelResult<Vec<u8>> {
        let mut state = self.state();
        let key = (tx_id, command.to_vec());
        *state.attempts.entry(key.clone()).or_insert(0) += 1;
        state.log.push(key.clone());

        let scripted = state.scripted.get_mut(&key).and_then(|queue| queue.pop_front());
        let outcome = match scripted {
            Some(o) => Some(o),
            None => state.fixed.get(&key).cloned().map(SimResponse::Data),
        };

        match outcome {
            Some(SimResponse::Data(bytes)) => Ok(bytes),
            Some(SimResponse::NoData) | None => Err(ChannelError::NoData),
            Some(SimResponse::BusError) => Err(ChannelError::APIError {
                api_name: "simulation".into(),
                code: 0xFF,
                desc: "simulated bus failure".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_outcomes_take_priority() {
        let mut sim = SimulationChannel::new();
        sim.add_response(0x7E4, &[0x21, 0x01], &[0x61, 0x01, 0xAA]);
        sim.push_outcome(0x7E4, &[0x21, 0x01], SimResponse::NoData);

        let mut ch = sim.clone();
        assert!(ch.send_request(&[0x21, 0x01], 0x7EC, 0x7E4, None).unwrap_err().is_no_data());
        assert_eq!(
            ch.send_request(&[0x21, 0x01], 0x7EC, 0x7E4, None).unwrap(),
            vec![0x61, 0x01, 0xAA]
        );
        assert_eq!(sim.attempts(0x7E4, &[0x21, 0x01]), 2);
        // Same request on another ECU is unknown
        assert!(ch.send_request(&[0x21, 0x01], 0x7EE, 0x7E6, None).is_err());
        assert_eq!(sim.request_log().len(), 3);
    }

    #[test]
    fn bus_error_is_not_no_data() {
        let mut sim = SimulationChannel::new();
        sim.push_outcome(0x7E4, &[0x22, 0xB0, 0x02], SimResponse::BusError);
        let err = sim.send_request(&[0x22, 0xB0, 0x02], 0x7EC, 0x7E4, None).unwrap_err();
        assert!(!err.is_no_data());
        sim.clear_map();
        assert_eq!(sim.attempts(0x7E4, &[0x22, 0xB0, 0x02]), 0);
    }
}
