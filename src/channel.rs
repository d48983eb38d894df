//! Module for the request/response bus channel consumed by the decoder
//!
//! The decoder never talks to CAN hardware itself. Everything it needs from the
//! bus is a single operation, [RequestChannel::send_request], which sends one
//! diagnostic request and returns the reassembled ISO-TP response payload.
//!
//! The error returned by a channel must keep two conditions apart:
//! * "no data" (the ECU stayed quiet, see [ChannelError::is_no_data]), which the decoder may retry
//! * every other failure, which is a bus error and is never retried by the decoder

use bitflags::bitflags;

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// The ECU did not answer the request
    NoData,
    /// Timeout when reading from the channel
    ReadTimeout,
    /// The channel's Rx buffer is empty. Only applies when read timeout is 0
    BufferEmpty,
    /// Underlying IO Error with channel
    IOError(std::io::Error),
    /// Timeout when writing data to the channel
    WriteTimeout,
    /// The interface is not open
    InterfaceNotOpen,
    /// Underlying API error with hardware
    APIError {
        /// Name of the API EG: 'socketCAN', 'simulation'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
}

impl ChannelError {
    /// Returns true if the error means the ECU did not respond (transient, retryable),
    /// rather than the bus or adapter malfunctioning
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            ChannelError::NoData | ChannelError::ReadTimeout | ChannelError::BufferEmpty
        )
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NoData => write!(f, "no data"),
            ChannelError::ReadTimeout => write!(f, "timeout reading from channel"),
            ChannelError::BufferEmpty => write!(f, "channel's Receive buffer is empty"),
            ChannelError::IOError(e) => write!(f, "IO error: {e}"),
            ChannelError::WriteTimeout => write!(f, "timeout writing to channel"),
            ChannelError::InterfaceNotOpen => write!(f, "channel's interface is not open"),
            ChannelError::APIError {
                api_name,
                code,
                desc,
            } => write!(f, "underlying {api_name} API error ({code}): {desc}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::IOError(io_err) = self {
            Some(io_err)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::ReadTimeout,
            _ => Self::IOError(err),
        }
    }
}

bitflags! {
    /// ISO-TP socket option flags (mirrors the `CAN_ISOTP_*` option bits of the Linux kernel)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct IsoTpFlags: u32 {
        /// Use extended addressing
        const EXTEND_ADDR = 0x02;
        /// Pad transmitted frames
        const TX_PADDING = 0x04;
        /// Expect padded received frames
        const RX_PADDING = 0x08;
        /// Check the length of received padded frames
        const CHK_PAD_LEN = 0x10;
        /// Check the content of received padding
        const CHK_PAD_DATA = 0x20;
    }
}

impl Default for IsoTpFlags {
    fn default() -> Self {
        Self::TX_PADDING | Self::RX_PADDING | Self::CHK_PAD_LEN
    }
}

/// ISO-TP flow control tuning for a single request.
///
/// The decoder does not interpret these values, it only hands them to the channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowControlOpts {
    /// Block size sent in our flow control frames (0 = send everything)
    pub block_size: u8,
    /// Minimum separation time between consecutive frames (In milliseconds)
    pub st_min: u8,
    /// Maximum number of wait frames to accept
    pub wft_max: u8,
    /// Socket option flags
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: IsoTpFlags,
}

impl FlowControlOpts {
    /// Packs the flow control parameters the way the kernel `CAN_ISOTP_RECV_FC` option expects them
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.block_size, self.st_min, self.wft_max]
    }
}

impl Default for FlowControlOpts {
    fn default() -> Self {
        Self {
            block_size: 0,
            st_min: 0,
            wft_max: 0,
            flags: IsoTpFlags::default(),
        }
    }
}

/// Request/response channel to the vehicle's diagnostic bus.
///
/// The bus is a half-duplex, one-request-at-a-time resource, so the channel is
/// borrowed mutably for every request.
pub trait RequestChannel: Send {
    /// Sends a request and waits for the ECU's complete response
    ///
    /// ## Parameters
    /// * command - Raw request bytes (Service ID followed by the identifier)
    /// * rx_id - CAN ID the ECU answers on
    /// * tx_id - CAN ID the ECU listens on
    /// * flow_control - Optional ISO-TP tuning for this request
    fn send_request(
        &mut self,
        command: &[u8],
        rx_id: u32,
        tx_id: u32,
        flow_control: Option<&FlowControlOpts>,
    ) -> ChannelResult<Vec<u8>>;
}

impl<T: RequestChannel + ?Sized> RequestChannel for Box<T> {
    fn send_request(
        &mut self,
        command: &[u8],
        rx_id: u32,
        tx_id: u32,
        flow_control: Option<&FlowControlOpts>,
    ) -> ChannelResult<Vec<u8>> {
        (**self).send_request(command, rx_id, tx_id, flow_control)
    }
}

impl<T: RequestChannel + ?Sized> RequestChannel for &mut T {
    fn send_request(
        &mut self,
        command: &[u8],
        rx_id: u32,
        tx_id: u32,
        flow_control: Option<&FlowControlOpts>,
    ) -> ChannelResult<Vec<u8>> {
        (**self).send_request(command, rx_id, tx_id, flow_control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_classification() {
        assert!(ChannelError::NoData.is_no_data());
        assert!(ChannelError::ReadTimeout.is_no_data());
        assert!(ChannelError::BufferEmpty.is_no_data());
        assert!(!ChannelError::WriteTimeout.is_no_data());
        assert!(!ChannelError::InterfaceNotOpen.is_no_data());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down");
        assert!(!ChannelError::from(io).is_no_data());
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "quiet");
        assert!(ChannelError::from(timeout).is_no_data());
    }

    #[test]
    fn flow_control_packing() {
        let fc = FlowControlOpts {
            block_size: 8,
            st_min: 20,
            wft_max: 1,
            ..Default::default()
        };
        assert_eq!(fc.to_bytes(), [8, 20, 1]);
        assert!(fc.flags.contains(IsoTpFlags::TX_PADDING));
        assert!(!fc.flags.contains(IsoTpFlags::EXTEND_ADDR));
    }
}
