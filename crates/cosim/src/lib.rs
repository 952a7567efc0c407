//! Co-simulation runtime.
//!
//! Couples an external simulation client to a simulation server in
//! lock-step: within each step the two sides exchange I/O signal values
//! and CAN/Ethernet/LIN bus messages over a framed channel, either across
//! hosts (TCP) or on one host (shared memory or Unix domain socket). A
//! small port mapper on a well-known port resolves server names to ports.

mod bus_buffer;
mod callbacks;
mod client;
mod environment;
mod error;
mod io_buffer;
mod logging;
mod port_mapper;
mod protocol;
mod ring_buffer;
mod server;
mod types;

pub use bus_buffer::{BusBuffer, DEFAULT_QUEUE_SIZE};
pub use callbacks::{
    Callbacks, CanMessageReceivedCallback, EthMessageReceivedCallback,
    IncomingSignalChangedCallback, LinMessageReceivedCallback, SimulationCallback,
    SimulationTerminatedCallback,
};
pub use client::{ConnectConfig, ConnectResult, CoSimClient};
pub use environment::{
    is_port_mapper_client_verbose, is_port_mapper_server_verbose, port_mapper_port,
    DEFAULT_PORT_MAPPER_PORT,
};
pub use error::{CoSimError, Result};
pub use io_buffer::IoBuffer;
pub use logging::{set_log_callback, LogCallback, Severity};
pub use port_mapper::{
    port_mapper_get_port, port_mapper_set_port, port_mapper_unset_port, PortMapperServer,
};
pub use protocol::{
    read_connect, read_connect_ok, read_continue, read_error, read_get_port, read_get_port_ok,
    read_pause, read_ping_ok, read_set_port, read_start, read_step, read_step_ok, read_stop,
    read_terminate, read_unset_port, receive_header, send_connect, send_connect_ok, send_continue,
    send_error, send_get_port, send_get_port_ok, send_ok, send_pause, send_ping, send_ping_ok,
    send_set_port, send_start, send_step, send_step_ok, send_stop, send_terminate,
    send_unset_port, ConnectData, ConnectOkData, FrameKind, PROTOCOL_VERSION,
};
pub use server::{CoSimServer, CoSimServerConfig};
pub use types::{
    simulation_time_to_seconds, BusControllerId, CanController, CanMessage, CanMessageFlags,
    Command, ConnectionKind, ConnectionState, DataType, EthController, EthMessage,
    EthMessageFlags, IoSignal, IoSignalId, LinController, LinControllerType, LinMessage,
    LinMessageFlags, Mode, SimulationState, SimulationTime, SizeKind, TerminateReason,
    CAN_MESSAGE_MAX_LENGTH, ETH_ADDRESS_LENGTH, ETH_MESSAGE_MAX_LENGTH, LIN_MESSAGE_MAX_LENGTH,
    NANOSECONDS_PER_SECOND,
};
