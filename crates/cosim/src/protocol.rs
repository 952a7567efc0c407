//! Frame kinds and typed payload codecs.
//!
//! Every frame starts with a one-byte [`FrameKind`] followed by
//! kind-specific payload, all carried inside one channel frame. Payload
//! integers are little-endian; strings are length-prefixed UTF-8; vectors
//! are count-prefixed. String and vector lengths are sanity-checked before
//! allocation.

use std::fmt;

use cosim_channel::{ChannelReader, ChannelWriter};

use crate::bus_buffer::BusBuffer;
use crate::callbacks::Callbacks;
use crate::error::{CoSimError, Result};
use crate::io_buffer::IoBuffer;
use crate::types::{
    CanController, Command, EthController, IoSignal, IoSignalId, LinController,
    LinControllerType, Mode, SimulationState, SimulationTime, TerminateReason,
    BusControllerId, DataType, SizeKind, ETH_ADDRESS_LENGTH,
};

/// Version of the wire protocol spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for any string on the wire.
pub(crate) const MAX_STRING_LENGTH: u32 = 4096;
/// Upper bound for signal and controller list counts.
pub(crate) const MAX_LIST_COUNT: u32 = 4096;
/// Upper bound for the changed-signal count of one step.
pub(crate) const MAX_SIGNAL_COUNT: u32 = 1 << 20;
/// Upper bound for the bus message count of one step and bus kind.
pub(crate) const MAX_BUS_MESSAGE_COUNT: u32 = 1 << 20;

/// Frame kinds. Values are stable; new kinds append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Ok = 0,
    Error = 1,
    Ping = 2,
    PingOk = 3,
    Connect = 4,
    ConnectOk = 5,
    Start = 6,
    Stop = 7,
    Terminate = 8,
    Pause = 9,
    Continue = 10,
    Step = 11,
    StepOk = 12,
    GetPort = 13,
    GetPortOk = 14,
    SetPort = 15,
    UnsetPort = 16,
}

impl FrameKind {
    fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            0 => FrameKind::Ok,
            1 => FrameKind::Error,
            2 => FrameKind::Ping,
            3 => FrameKind::PingOk,
            4 => FrameKind::Connect,
            5 => FrameKind::ConnectOk,
            6 => FrameKind::Start,
            7 => FrameKind::Stop,
            8 => FrameKind::Terminate,
            9 => FrameKind::Pause,
            10 => FrameKind::Continue,
            11 => FrameKind::Step,
            12 => FrameKind::StepOk,
            13 => FrameKind::GetPort,
            14 => FrameKind::GetPortOk,
            15 => FrameKind::SetPort,
            16 => FrameKind::UnsetPort,
            _ => {
                return Err(CoSimError::Protocol(format!(
                    "unknown frame kind {value}"
                )))
            }
        })
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Ok => "Ok",
            FrameKind::Error => "Error",
            FrameKind::Ping => "Ping",
            FrameKind::PingOk => "PingOk",
            FrameKind::Connect => "Connect",
            FrameKind::ConnectOk => "ConnectOk",
            FrameKind::Start => "Start",
            FrameKind::Stop => "Stop",
            FrameKind::Terminate => "Terminate",
            FrameKind::Pause => "Pause",
            FrameKind::Continue => "Continue",
            FrameKind::Step => "Step",
            FrameKind::StepOk => "StepOk",
            FrameKind::GetPort => "GetPort",
            FrameKind::GetPortOk => "GetPortOk",
            FrameKind::SetPort => "SetPort",
            FrameKind::UnsetPort => "UnsetPort",
        };
        write!(f, "{name}")
    }
}

/// Payload of a `Connect` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectData {
    pub protocol_version: u32,
    pub mode: Mode,
    pub server_name: String,
    pub client_name: String,
}

/// Payload of a `ConnectOk` frame.
///
/// Signal directions are from the receiver's point of view: `incoming`
/// signals are the ones the receiver will be sent values for.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOkData {
    pub protocol_version: u32,
    pub mode: Mode,
    pub step_size: SimulationTime,
    pub simulation_state: SimulationState,
    pub incoming_signals: Vec<IoSignal>,
    pub outgoing_signals: Vec<IoSignal>,
    pub can_controllers: Vec<CanController>,
    pub eth_controllers: Vec<EthController>,
    pub lin_controllers: Vec<LinController>,
}

/// Read the frame kind header of the next frame.
pub fn receive_header(reader: &mut ChannelReader) -> Result<FrameKind> {
    FrameKind::from_wire(reader.read_u8()?)
}

pub fn send_ok(writer: &mut ChannelWriter) -> Result<()> {
    writer.write_u8(FrameKind::Ok as u8)?;
    writer.end_write()?;
    Ok(())
}

pub fn send_error(writer: &mut ChannelWriter, message: &str) -> Result<()> {
    writer.write_u8(FrameKind::Error as u8)?;
    writer.write_string(message)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_error(reader: &mut ChannelReader) -> Result<String> {
    read_string(reader)
}

pub fn send_ping(writer: &mut ChannelWriter) -> Result<()> {
    writer.write_u8(FrameKind::Ping as u8)?;
    writer.end_write()?;
    Ok(())
}

pub fn send_ping_ok(writer: &mut ChannelWriter, command: Command) -> Result<()> {
    writer.write_u8(FrameKind::PingOk as u8)?;
    writer.write_u32(command as u32)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_ping_ok(reader: &mut ChannelReader) -> Result<Command> {
    Command::from_wire(reader.read_u32()?)
}

pub fn send_connect(writer: &mut ChannelWriter, data: &ConnectData) -> Result<()> {
    writer.write_u8(FrameKind::Connect as u8)?;
    writer.write_u32(data.protocol_version)?;
    writer.write_u32(data.mode.0)?;
    writer.write_string(&data.server_name)?;
    writer.write_string(&data.client_name)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_connect(reader: &mut ChannelReader) -> Result<ConnectData> {
    Ok(ConnectData {
        protocol_version: reader.read_u32()?,
        mode: Mode(reader.read_u32()?),
        server_name: read_string(reader)?,
        client_name: read_string(reader)?,
    })
}

pub fn send_connect_ok(writer: &mut ChannelWriter, data: &ConnectOkData) -> Result<()> {
    writer.write_u8(FrameKind::ConnectOk as u8)?;
    writer.write_u32(data.protocol_version)?;
    writer.write_u32(data.mode.0)?;
    writer.write_i64(data.step_size)?;
    writer.write_u32(data.simulation_state.0)?;
    write_signals(writer, &data.incoming_signals)?;
    write_signals(writer, &data.outgoing_signals)?;
    write_can_controllers(writer, &data.can_controllers)?;
    write_eth_controllers(writer, &data.eth_controllers)?;
    write_lin_controllers(writer, &data.lin_controllers)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_connect_ok(reader: &mut ChannelReader) -> Result<ConnectOkData> {
    Ok(ConnectOkData {
        protocol_version: reader.read_u32()?,
        mode: Mode(reader.read_u32()?),
        step_size: reader.read_i64()?,
        simulation_state: SimulationState(reader.read_u32()?),
        incoming_signals: read_signals(reader)?,
        outgoing_signals: read_signals(reader)?,
        can_controllers: read_can_controllers(reader)?,
        eth_controllers: read_eth_controllers(reader)?,
        lin_controllers: read_lin_controllers(reader)?,
    })
}

pub fn send_start(writer: &mut ChannelWriter, simulation_time: SimulationTime) -> Result<()> {
    send_time_frame(writer, FrameKind::Start, simulation_time)
}

pub fn read_start(reader: &mut ChannelReader) -> Result<SimulationTime> {
    reader.read_i64().map_err(Into::into)
}

pub fn send_stop(writer: &mut ChannelWriter, simulation_time: SimulationTime) -> Result<()> {
    send_time_frame(writer, FrameKind::Stop, simulation_time)
}

pub fn read_stop(reader: &mut ChannelReader) -> Result<SimulationTime> {
    reader.read_i64().map_err(Into::into)
}

pub fn send_pause(writer: &mut ChannelWriter, simulation_time: SimulationTime) -> Result<()> {
    send_time_frame(writer, FrameKind::Pause, simulation_time)
}

pub fn read_pause(reader: &mut ChannelReader) -> Result<SimulationTime> {
    reader.read_i64().map_err(Into::into)
}

pub fn send_continue(writer: &mut ChannelWriter, simulation_time: SimulationTime) -> Result<()> {
    send_time_frame(writer, FrameKind::Continue, simulation_time)
}

pub fn read_continue(reader: &mut ChannelReader) -> Result<SimulationTime> {
    reader.read_i64().map_err(Into::into)
}

pub fn send_terminate(
    writer: &mut ChannelWriter,
    simulation_time: SimulationTime,
    reason: TerminateReason,
) -> Result<()> {
    writer.write_u8(FrameKind::Terminate as u8)?;
    writer.write_i64(simulation_time)?;
    writer.write_u32(reason as u32)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_terminate(reader: &mut ChannelReader) -> Result<(SimulationTime, TerminateReason)> {
    let simulation_time = reader.read_i64()?;
    let reason = TerminateReason::from_wire(reader.read_u32()?)?;
    Ok((simulation_time, reason))
}

/// Send a `Step` frame: time plus the outgoing signal snapshot and bus
/// messages. Drains the dirty set and the transmit queues.
pub fn send_step(
    writer: &mut ChannelWriter,
    simulation_time: SimulationTime,
    io_buffer: &mut IoBuffer,
    bus_buffer: &mut BusBuffer,
) -> Result<()> {
    writer.write_u8(FrameKind::Step as u8)?;
    writer.write_i64(simulation_time)?;
    io_buffer.serialize(writer)?;
    bus_buffer.serialize(writer)?;
    writer.end_write()?;
    Ok(())
}

/// Read a `Step` frame and apply its payload to the incoming buffers,
/// firing the registered callbacks.
pub fn read_step(
    reader: &mut ChannelReader,
    io_buffer: &mut IoBuffer,
    bus_buffer: &mut BusBuffer,
    callbacks: &mut Callbacks,
) -> Result<SimulationTime> {
    let simulation_time = reader.read_i64()?;
    io_buffer.deserialize(reader, simulation_time, callbacks)?;
    bus_buffer.deserialize(reader, simulation_time, callbacks)?;
    Ok(simulation_time)
}

/// Send a `StepOk` frame: time, the next command for the peer, and this
/// side's outgoing data.
pub fn send_step_ok(
    writer: &mut ChannelWriter,
    simulation_time: SimulationTime,
    next_command: Command,
    io_buffer: &mut IoBuffer,
    bus_buffer: &mut BusBuffer,
) -> Result<()> {
    writer.write_u8(FrameKind::StepOk as u8)?;
    writer.write_i64(simulation_time)?;
    writer.write_u32(next_command as u32)?;
    io_buffer.serialize(writer)?;
    bus_buffer.serialize(writer)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_step_ok(
    reader: &mut ChannelReader,
    io_buffer: &mut IoBuffer,
    bus_buffer: &mut BusBuffer,
    callbacks: &mut Callbacks,
) -> Result<(SimulationTime, Command)> {
    let simulation_time = reader.read_i64()?;
    let next_command = Command::from_wire(reader.read_u32()?)?;
    io_buffer.deserialize(reader, simulation_time, callbacks)?;
    bus_buffer.deserialize(reader, simulation_time, callbacks)?;
    Ok((simulation_time, next_command))
}

pub fn send_get_port(writer: &mut ChannelWriter, name: &str) -> Result<()> {
    writer.write_u8(FrameKind::GetPort as u8)?;
    writer.write_string(name)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_get_port(reader: &mut ChannelReader) -> Result<String> {
    read_string(reader)
}

pub fn send_get_port_ok(writer: &mut ChannelWriter, port: u16) -> Result<()> {
    writer.write_u8(FrameKind::GetPortOk as u8)?;
    writer.write_u16(port)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_get_port_ok(reader: &mut ChannelReader) -> Result<u16> {
    reader.read_u16().map_err(Into::into)
}

pub fn send_set_port(writer: &mut ChannelWriter, name: &str, port: u16) -> Result<()> {
    writer.write_u8(FrameKind::SetPort as u8)?;
    writer.write_string(name)?;
    writer.write_u16(port)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_set_port(reader: &mut ChannelReader) -> Result<(String, u16)> {
    let name = read_string(reader)?;
    let port = reader.read_u16()?;
    Ok((name, port))
}

pub fn send_unset_port(writer: &mut ChannelWriter, name: &str) -> Result<()> {
    writer.write_u8(FrameKind::UnsetPort as u8)?;
    writer.write_string(name)?;
    writer.end_write()?;
    Ok(())
}

pub fn read_unset_port(reader: &mut ChannelReader) -> Result<String> {
    read_string(reader)
}

fn send_time_frame(
    writer: &mut ChannelWriter,
    kind: FrameKind,
    simulation_time: SimulationTime,
) -> Result<()> {
    writer.write_u8(kind as u8)?;
    writer.write_i64(simulation_time)?;
    writer.end_write()?;
    Ok(())
}

pub(crate) fn read_string(reader: &mut ChannelReader) -> Result<String> {
    let length = reader.read_u32()?;
    if length > MAX_STRING_LENGTH {
        return Err(CoSimError::Protocol(format!(
            "string length {length} exceeds limit {MAX_STRING_LENGTH}"
        )));
    }
    let mut bytes = vec![0u8; length as usize];
    reader.read(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| CoSimError::Protocol("string is not valid UTF-8".to_string()))
}

fn read_list_count(reader: &mut ChannelReader) -> Result<u32> {
    let count = reader.read_u32()?;
    if count > MAX_LIST_COUNT {
        return Err(CoSimError::Protocol(format!(
            "list count {count} exceeds limit {MAX_LIST_COUNT}"
        )));
    }
    Ok(count)
}

fn write_signals(writer: &mut ChannelWriter, signals: &[IoSignal]) -> Result<()> {
    writer.write_u32(signals.len() as u32)?;
    for signal in signals {
        writer.write_u32(signal.id.0)?;
        writer.write_u32(signal.length)?;
        writer.write_u32(signal.data_type as u32)?;
        writer.write_u32(signal.size_kind as u32)?;
        writer.write_string(&signal.name)?;
    }
    Ok(())
}

fn read_signals(reader: &mut ChannelReader) -> Result<Vec<IoSignal>> {
    let count = read_list_count(reader)?;
    let mut signals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        signals.push(IoSignal {
            id: IoSignalId(reader.read_u32()?),
            length: reader.read_u32()?,
            data_type: DataType::from_wire(reader.read_u32()?)?,
            size_kind: SizeKind::from_wire(reader.read_u32()?)?,
            name: read_string(reader)?,
        });
    }
    Ok(signals)
}

fn write_can_controllers(writer: &mut ChannelWriter, controllers: &[CanController]) -> Result<()> {
    writer.write_u32(controllers.len() as u32)?;
    for controller in controllers {
        writer.write_u32(controller.id.0)?;
        writer.write_u32(controller.queue_size)?;
        writer.write_u64(controller.bits_per_second)?;
        writer.write_u64(controller.flexible_data_rate_bits_per_second)?;
        writer.write_string(&controller.name)?;
        writer.write_string(&controller.channel_name)?;
        writer.write_string(&controller.cluster_name)?;
    }
    Ok(())
}

fn read_can_controllers(reader: &mut ChannelReader) -> Result<Vec<CanController>> {
    let count = read_list_count(reader)?;
    let mut controllers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        controllers.push(CanController {
            id: BusControllerId(reader.read_u32()?),
            queue_size: reader.read_u32()?,
            bits_per_second: reader.read_u64()?,
            flexible_data_rate_bits_per_second: reader.read_u64()?,
            name: read_string(reader)?,
            channel_name: read_string(reader)?,
            cluster_name: read_string(reader)?,
        });
    }
    Ok(controllers)
}

fn write_eth_controllers(writer: &mut ChannelWriter, controllers: &[EthController]) -> Result<()> {
    writer.write_u32(controllers.len() as u32)?;
    for controller in controllers {
        writer.write_u32(controller.id.0)?;
        writer.write_u32(controller.queue_size)?;
        writer.write_u64(controller.bits_per_second)?;
        writer.write(&controller.mac_address)?;
        writer.write_string(&controller.name)?;
        writer.write_string(&controller.channel_name)?;
        writer.write_string(&controller.cluster_name)?;
    }
    Ok(())
}

fn read_eth_controllers(reader: &mut ChannelReader) -> Result<Vec<EthController>> {
    let count = read_list_count(reader)?;
    let mut controllers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = BusControllerId(reader.read_u32()?);
        let queue_size = reader.read_u32()?;
        let bits_per_second = reader.read_u64()?;
        let mut mac_address = [0u8; ETH_ADDRESS_LENGTH];
        reader.read(&mut mac_address)?;
        controllers.push(EthController {
            id,
            queue_size,
            bits_per_second,
            mac_address,
            name: read_string(reader)?,
            channel_name: read_string(reader)?,
            cluster_name: read_string(reader)?,
        });
    }
    Ok(controllers)
}

fn write_lin_controllers(writer: &mut ChannelWriter, controllers: &[LinController]) -> Result<()> {
    writer.write_u32(controllers.len() as u32)?;
    for controller in controllers {
        writer.write_u32(controller.id.0)?;
        writer.write_u32(controller.queue_size)?;
        writer.write_u64(controller.bits_per_second)?;
        writer.write_u32(controller.controller_type as u32)?;
        writer.write_string(&controller.name)?;
        writer.write_string(&controller.channel_name)?;
        writer.write_string(&controller.cluster_name)?;
    }
    Ok(())
}

fn read_lin_controllers(reader: &mut ChannelReader) -> Result<Vec<LinController>> {
    let count = read_list_count(reader)?;
    let mut controllers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        controllers.push(LinController {
            id: BusControllerId(reader.read_u32()?),
            queue_size: reader.read_u32()?,
            bits_per_second: reader.read_u64()?,
            controller_type: LinControllerType::from_wire(reader.read_u32()?)?,
            name: read_string(reader)?,
            channel_name: read_string(reader)?,
            cluster_name: read_string(reader)?,
        });
    }
    Ok(controllers)
}
