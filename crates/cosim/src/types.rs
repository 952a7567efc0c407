//! Data model shared by both sides of a co-simulation connection.

use std::fmt;

use bitflags::bitflags;

use crate::error::{CoSimError, Result};

/// Simulated time in nanoseconds.
pub type SimulationTime = i64;

pub const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

pub fn simulation_time_to_seconds(simulation_time: SimulationTime) -> f64 {
    simulation_time as f64 / NANOSECONDS_PER_SECOND as f64
}

/// Maximum payload bytes of a CAN message.
pub const CAN_MESSAGE_MAX_LENGTH: usize = 64;
/// Maximum payload bytes of an Ethernet message.
pub const ETH_MESSAGE_MAX_LENGTH: usize = 1500;
/// Maximum payload bytes of a LIN message.
pub const LIN_MESSAGE_MAX_LENGTH: usize = 8;
/// Length of an Ethernet MAC address.
pub const ETH_ADDRESS_LENGTH: usize = 6;

/// Opaque identifier of an I/O signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IoSignalId(pub u32);

impl fmt::Display for IoSignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for IoSignalId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Opaque identifier of a bus controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusControllerId(pub u32);

impl fmt::Display for BusControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for BusControllerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// How the two sides are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Remote,
    Local,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Remote => write!(f, "Remote"),
            ConnectionKind::Local => write!(f, "Local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Simulation command, exchanged in `PingOk` and `StepOk` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Command {
    #[default]
    None = 0,
    Step = 1,
    Start = 2,
    Stop = 3,
    Terminate = 4,
    Pause = 5,
    Continue = 6,
    TerminateFinished = 7,
    Ping = 8,
}

impl Command {
    pub(crate) fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Command::None,
            1 => Command::Step,
            2 => Command::Start,
            3 => Command::Stop,
            4 => Command::Terminate,
            5 => Command::Pause,
            6 => Command::Continue,
            7 => Command::TerminateFinished,
            8 => Command::Ping,
            _ => return Err(CoSimError::Protocol(format!("unknown command {value}"))),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::None => "None",
            Command::Step => "Step",
            Command::Start => "Start",
            Command::Stop => "Stop",
            Command::Terminate => "Terminate",
            Command::Pause => "Pause",
            Command::Continue => "Continue",
            Command::TerminateFinished => "TerminateFinished",
            Command::Ping => "Ping",
        };
        write!(f, "{name}")
    }
}

/// Why a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TerminateReason {
    Finished = 0,
    Error = 1,
}

impl TerminateReason {
    pub(crate) fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => TerminateReason::Finished,
            1 => TerminateReason::Error,
            _ => {
                return Err(CoSimError::Protocol(format!(
                    "unknown terminate reason {value}"
                )))
            }
        })
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminateReason::Finished => write!(f, "Finished"),
            TerminateReason::Error => write!(f, "Error"),
        }
    }
}

/// Opaque simulation state reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationState(pub u32);

/// Opaque connect mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(pub u32);

/// Element type of an I/O signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    UInt8 = 6,
    UInt16 = 7,
    UInt32 = 8,
    UInt64 = 9,
    Float32 = 10,
    Float64 = 11,
}

impl DataType {
    /// Element width in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub(crate) fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            1 => DataType::Bool,
            2 => DataType::Int8,
            3 => DataType::Int16,
            4 => DataType::Int32,
            5 => DataType::Int64,
            6 => DataType::UInt8,
            7 => DataType::UInt16,
            8 => DataType::UInt32,
            9 => DataType::UInt64,
            10 => DataType::Float32,
            11 => DataType::Float64,
            _ => return Err(CoSimError::Protocol(format!("unknown data type {value}"))),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "Bool",
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::UInt8 => "UInt8",
            DataType::UInt16 => "UInt16",
            DataType::UInt32 => "UInt32",
            DataType::UInt64 => "UInt64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        };
        write!(f, "{name}")
    }
}

/// Whether a signal always carries `length` elements or up to `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SizeKind {
    Fixed = 0,
    Variable = 1,
}

impl SizeKind {
    pub(crate) fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => SizeKind::Fixed,
            1 => SizeKind::Variable,
            _ => return Err(CoSimError::Protocol(format!("unknown size kind {value}"))),
        })
    }
}

impl fmt::Display for SizeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeKind::Fixed => write!(f, "Fixed"),
            SizeKind::Variable => write!(f, "Variable"),
        }
    }
}

/// Descriptor of an I/O signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSignal {
    pub id: IoSignalId,
    /// Maximum element count. At least 1.
    pub length: u32,
    pub data_type: DataType,
    pub size_kind: SizeKind,
    pub name: String,
}

impl IoSignal {
    /// Storage size in bytes: `length × element width`.
    pub fn size_in_bytes(&self) -> usize {
        self.length as usize * self.data_type.size()
    }
}

/// Descriptor of a CAN controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanController {
    pub id: BusControllerId,
    pub queue_size: u32,
    pub bits_per_second: u64,
    pub flexible_data_rate_bits_per_second: u64,
    pub name: String,
    pub channel_name: String,
    pub cluster_name: String,
}

/// Descriptor of an Ethernet controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthController {
    pub id: BusControllerId,
    pub queue_size: u32,
    pub bits_per_second: u64,
    pub mac_address: [u8; ETH_ADDRESS_LENGTH],
    pub name: String,
    pub channel_name: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LinControllerType {
    Responder = 0,
    Commander = 1,
}

impl LinControllerType {
    pub(crate) fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => LinControllerType::Responder,
            1 => LinControllerType::Commander,
            _ => {
                return Err(CoSimError::Protocol(format!(
                    "unknown LIN controller type {value}"
                )))
            }
        })
    }
}

impl fmt::Display for LinControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinControllerType::Responder => write!(f, "Responder"),
            LinControllerType::Commander => write!(f, "Commander"),
        }
    }
}

/// Descriptor of a LIN controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinController {
    pub id: BusControllerId,
    pub queue_size: u32,
    pub bits_per_second: u64,
    pub controller_type: LinControllerType,
    pub name: String,
    pub channel_name: String,
    pub cluster_name: String,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CanMessageFlags: u32 {
        const LOOPBACK = 1;
        const ERROR = 2;
        const DROP = 4;
        const EXTENDED_ID = 8;
        const BIT_RATE_SWITCH = 16;
        const FLEXIBLE_DATA_RATE_FORMAT = 32;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EthMessageFlags: u32 {
        const LOOPBACK = 1;
        const ERROR = 2;
        const DROP = 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinMessageFlags: u32 {
        const LOOPBACK = 1;
        const ERROR = 2;
        const DROP = 4;
        const HEADER = 8;
        const RESPONSE = 16;
        const WAKE_EVENT = 32;
        const SLEEP_EVENT = 64;
        const ENHANCED_CHECKSUM = 128;
        const TRANSFER_ONCE = 256;
        const PARITY_FAILURE = 512;
        const COLLISION = 1024;
        const NO_RESPONSE = 2048;
    }
}

/// A CAN message queued for or taken from a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanMessage {
    pub controller_id: BusControllerId,
    pub id: u32,
    pub timestamp: SimulationTime,
    pub flags: CanMessageFlags,
    pub length: u32,
    pub data: [u8; CAN_MESSAGE_MAX_LENGTH],
}

impl CanMessage {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            controller_id: BusControllerId::default(),
            id: 0,
            timestamp: 0,
            flags: CanMessageFlags::default(),
            length: 0,
            data: [0; CAN_MESSAGE_MAX_LENGTH],
        }
    }
}

/// An Ethernet message queued for or taken from a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthMessage {
    pub controller_id: BusControllerId,
    pub timestamp: SimulationTime,
    pub flags: EthMessageFlags,
    pub length: u32,
    pub data: [u8; ETH_MESSAGE_MAX_LENGTH],
}

impl EthMessage {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

impl Default for EthMessage {
    fn default() -> Self {
        Self {
            controller_id: BusControllerId::default(),
            timestamp: 0,
            flags: EthMessageFlags::default(),
            length: 0,
            data: [0; ETH_MESSAGE_MAX_LENGTH],
        }
    }
}

/// A LIN message queued for or taken from a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinMessage {
    pub controller_id: BusControllerId,
    pub id: u32,
    pub timestamp: SimulationTime,
    pub flags: LinMessageFlags,
    pub length: u32,
    pub data: [u8; LIN_MESSAGE_MAX_LENGTH],
}

impl LinMessage {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

impl Default for LinMessage {
    fn default() -> Self {
        Self {
            controller_id: BusControllerId::default(),
            id: 0,
            timestamp: 0,
            flags: LinMessageFlags::default(),
            length: 0,
            data: [0; LIN_MESSAGE_MAX_LENGTH],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_sizes() {
        assert_eq!(DataType::Bool.size(), 1);
        assert_eq!(DataType::Int8.size(), 1);
        assert_eq!(DataType::UInt16.size(), 2);
        assert_eq!(DataType::Int32.size(), 4);
        assert_eq!(DataType::Float32.size(), 4);
        assert_eq!(DataType::UInt64.size(), 8);
        assert_eq!(DataType::Float64.size(), 8);
    }

    #[test]
    fn signal_size_in_bytes() {
        let signal = IoSignal {
            id: IoSignalId(1),
            length: 4,
            data_type: DataType::UInt16,
            size_kind: SizeKind::Fixed,
            name: "Signal".to_string(),
        };
        assert_eq!(signal.size_in_bytes(), 8);
    }

    #[test]
    fn command_wire_roundtrip() {
        for command in [
            Command::None,
            Command::Step,
            Command::Start,
            Command::Stop,
            Command::Terminate,
            Command::Pause,
            Command::Continue,
            Command::TerminateFinished,
            Command::Ping,
        ] {
            assert_eq!(Command::from_wire(command as u32).unwrap(), command);
        }
        assert!(Command::from_wire(99).is_err());
    }

    #[test]
    fn simulation_time_conversion() {
        assert_eq!(simulation_time_to_seconds(1_000_000_000), 1.0);
        assert_eq!(simulation_time_to_seconds(500_000_000), 0.5);
    }
}
