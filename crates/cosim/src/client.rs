//! Client-side connection lifecycle and step loop.

use std::time::Duration;

use cosim_channel::Channel;
use cosim_transport::try_connect_tcp;
use tracing::debug;

use crate::bus_buffer::BusBuffer;
use crate::callbacks::Callbacks;
use crate::error::{CoSimError, Result};
use crate::io_buffer::IoBuffer;
use crate::logging::log_info;
use crate::port_mapper::port_mapper_get_port;
use crate::protocol::{self, ConnectData, ConnectOkData, FrameKind, PROTOCOL_VERSION};
use crate::types::{Command, ConnectionKind, ConnectionState, Mode, SimulationTime, TerminateReason};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Options recognised by [`CoSimClient::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    /// Where to reach the server. Empty means the local host; the client
    /// then prefers the local channel and falls back to TCP on loopback.
    pub remote_ip_address: String,
    /// Name of the server to connect to; also the port-mapper key.
    pub server_name: String,
    pub client_name: String,
    /// Zero resolves the port through the port mapper.
    pub remote_port: u16,
    /// Zero picks an ephemeral local port.
    pub local_port: u16,
}

/// What the server reported in its `ConnectOk` response.
pub type ConnectResult = ConnectOkData;

/// The client side of a co-simulation connection.
#[derive(Default)]
pub struct CoSimClient {
    channel: Option<Channel>,
    io_buffer: Option<IoBuffer>,
    bus_buffer: Option<BusBuffer>,
    connection_state: ConnectionState,
    current_time: SimulationTime,
    next_command: Command,
}

impl CoSimClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a server and perform the connect handshake.
    pub fn connect(&mut self, config: &ConnectConfig) -> Result<ConnectResult> {
        let mut channel = establish_channel(config)?;

        protocol::send_connect(
            channel.writer(),
            &ConnectData {
                protocol_version: PROTOCOL_VERSION,
                mode: Mode(0),
                server_name: config.server_name.clone(),
                client_name: config.client_name.clone(),
            },
        )?;

        let data = match protocol::receive_header(channel.reader())? {
            FrameKind::ConnectOk => protocol::read_connect_ok(channel.reader())?,
            FrameKind::Error => {
                let message = protocol::read_error(channel.reader())?;
                return Err(CoSimError::Protocol(message));
            }
            other => {
                return Err(CoSimError::Protocol(format!(
                    "received unexpected frame {other}"
                )))
            }
        };

        self.io_buffer = Some(IoBuffer::new(
            data.incoming_signals.clone(),
            data.outgoing_signals.clone(),
        )?);
        self.bus_buffer = Some(BusBuffer::new(
            data.can_controllers.clone(),
            data.eth_controllers.clone(),
            data.lin_controllers.clone(),
        )?);
        self.channel = Some(channel);
        self.connection_state = ConnectionState::Connected;

        log_info(format!(
            "Connected to server '{}'.",
            config.server_name
        ));
        Ok(data)
    }

    /// Tear down the connection. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.disconnect();
        }
        self.channel = None;
        self.connection_state = ConnectionState::Disconnected;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Queue the command delivered to the server with the next `StepOk` or
    /// `PingOk` response.
    pub fn set_next_command(&mut self, command: Command) {
        self.next_command = command;
    }

    pub fn io_buffer(&self) -> Option<&IoBuffer> {
        self.io_buffer.as_ref()
    }

    pub fn io_buffer_mut(&mut self) -> Option<&mut IoBuffer> {
        self.io_buffer.as_mut()
    }

    pub fn bus_buffer_mut(&mut self) -> Option<&mut BusBuffer> {
        self.bus_buffer.as_mut()
    }

    /// Serve frames until the server terminates the simulation or the
    /// connection fails.
    ///
    /// Data callbacks fire while a `Step` payload is applied; the begin and
    /// end step callbacks bracket the window in which outgoing values for
    /// the reply may be written. A connection failure invokes the
    /// terminated callback with [`TerminateReason::Error`] exactly once and
    /// tears the connection down.
    pub fn run_callback_based_co_simulation(&mut self, mut callbacks: Callbacks) -> Result<()> {
        let result = self.run_loop(&mut callbacks);
        if let Err(err) = &result {
            debug!(%err, "step loop failed");
            if let Some(callback) = callbacks.simulation_terminated.as_mut() {
                callback(self.current_time, TerminateReason::Error);
            }
            self.disconnect();
        }
        result
    }

    fn run_loop(&mut self, callbacks: &mut Callbacks) -> Result<()> {
        loop {
            let Self {
                channel,
                io_buffer,
                bus_buffer,
                ..
            } = self;
            let channel = channel.as_mut().ok_or(CoSimError::Disconnected)?;
            let io_buffer = io_buffer.as_mut().ok_or(CoSimError::Disconnected)?;
            let bus_buffer = bus_buffer.as_mut().ok_or(CoSimError::Disconnected)?;

            match protocol::receive_header(channel.reader())? {
                FrameKind::Step => {
                    let simulation_time =
                        protocol::read_step(channel.reader(), io_buffer, bus_buffer, callbacks)?;
                    self.current_time = simulation_time;

                    if let Some(callback) = callbacks.simulation_begin_step.as_mut() {
                        callback(simulation_time);
                    }
                    if let Some(callback) = callbacks.simulation_end_step.as_mut() {
                        callback(simulation_time);
                    }

                    let next_command = std::mem::take(&mut self.next_command);
                    let Self {
                        channel,
                        io_buffer,
                        bus_buffer,
                        ..
                    } = self;
                    let channel = channel.as_mut().ok_or(CoSimError::Disconnected)?;
                    protocol::send_step_ok(
                        channel.writer(),
                        simulation_time,
                        next_command,
                        io_buffer.as_mut().ok_or(CoSimError::Disconnected)?,
                        bus_buffer.as_mut().ok_or(CoSimError::Disconnected)?,
                    )?;
                }
                FrameKind::Start => {
                    let simulation_time = protocol::read_start(channel.reader())?;
                    self.current_time = simulation_time;
                    if let Some(callback) = callbacks.simulation_started.as_mut() {
                        callback(simulation_time);
                    }
                }
                FrameKind::Stop => {
                    let simulation_time = protocol::read_stop(channel.reader())?;
                    self.current_time = simulation_time;
                    io_buffer.clear_data();
                    bus_buffer.clear_data();
                    if let Some(callback) = callbacks.simulation_stopped.as_mut() {
                        callback(simulation_time);
                    }
                }
                FrameKind::Pause => {
                    let simulation_time = protocol::read_pause(channel.reader())?;
                    self.current_time = simulation_time;
                    if let Some(callback) = callbacks.simulation_paused.as_mut() {
                        callback(simulation_time);
                    }
                }
                FrameKind::Continue => {
                    let simulation_time = protocol::read_continue(channel.reader())?;
                    self.current_time = simulation_time;
                    if let Some(callback) = callbacks.simulation_continued.as_mut() {
                        callback(simulation_time);
                    }
                }
                FrameKind::Terminate => {
                    let (simulation_time, reason) = protocol::read_terminate(channel.reader())?;
                    self.current_time = simulation_time;
                    if let Some(callback) = callbacks.simulation_terminated.as_mut() {
                        callback(simulation_time, reason);
                    }
                    self.disconnect();
                    return Ok(());
                }
                FrameKind::Ping => {
                    let next_command = std::mem::take(&mut self.next_command);
                    protocol::send_ping_ok(channel.writer(), next_command)?;
                }
                other => {
                    return Err(CoSimError::Protocol(format!(
                        "received unexpected frame {other}"
                    )))
                }
            }
        }
    }
}

fn establish_channel(config: &ConnectConfig) -> Result<Channel> {
    let connection_kind = if config.remote_ip_address.is_empty() {
        ConnectionKind::Local
    } else {
        ConnectionKind::Remote
    };
    debug!(%connection_kind, server_name = %config.server_name, "establishing channel");

    if connection_kind == ConnectionKind::Local {
        // Prefer the shared-memory channel, then the Unix domain socket,
        // then TCP on loopback.
        #[cfg(target_os = "linux")]
        match cosim_channel::connect_local(&config.server_name) {
            Ok(channel) => {
                debug!(server_name = %config.server_name, "using local shared-memory channel");
                return Ok(channel);
            }
            Err(err) => debug!(%err, "local shared-memory channel unavailable"),
        }

        #[cfg(unix)]
        match cosim_transport::connect_uds(&config.server_name) {
            Ok(stream) => {
                debug!(server_name = %config.server_name, "using unix domain socket channel");
                return Ok(Channel::from_stream(stream)?);
            }
            Err(err) => debug!(%err, "unix domain socket channel unavailable"),
        }
    }

    let remote_port = if config.remote_port != 0 {
        config.remote_port
    } else {
        port_mapper_get_port(&config.remote_ip_address, &config.server_name)?
    };

    let stream = try_connect_tcp(
        &config.remote_ip_address,
        remote_port,
        config.local_port,
        CONNECT_TIMEOUT,
    )?
    .ok_or(CoSimError::Timeout(CONNECT_TIMEOUT))?;
    Ok(Channel::from_stream(stream)?)
}
