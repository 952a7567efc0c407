//! Server-side connection lifecycle and step driving.

use std::time::{Duration, Instant};

use cosim_channel::Channel;
use cosim_transport::{TcpChannelServer, ACCEPT_POLL_PERIOD};
use tracing::debug;

use crate::bus_buffer::BusBuffer;
use crate::callbacks::Callbacks;
use crate::error::{CoSimError, Result};
use crate::io_buffer::IoBuffer;
use crate::logging::{log_info, log_trace};
use crate::port_mapper::{self, port_mapper_set_port, port_mapper_unset_port};
use crate::protocol::{self, ConnectOkData, FrameKind, PROTOCOL_VERSION};
use crate::types::{
    CanController, Command, EthController, IoSignal, LinController, SimulationState,
    SimulationTime, TerminateReason,
};

#[cfg(target_os = "linux")]
use cosim_channel::LocalChannelServer;

/// Options for [`CoSimServer::new`].
#[derive(Debug, Clone)]
pub struct CoSimServerConfig {
    /// Name this server registers with the port mapper; also the name of
    /// its local channel endpoints.
    pub server_name: String,
    /// Simulated time advanced per step, in nanoseconds.
    pub step_size: SimulationTime,
    /// Zero picks an ephemeral port.
    pub local_port: u16,
    pub enable_remote_access: bool,
    pub register_at_port_mapper: bool,
    /// Signals this server receives from the client.
    pub incoming_signals: Vec<IoSignal>,
    /// Signals this server sends to the client.
    pub outgoing_signals: Vec<IoSignal>,
    pub can_controllers: Vec<CanController>,
    pub eth_controllers: Vec<EthController>,
    pub lin_controllers: Vec<LinController>,
}

impl Default for CoSimServerConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            step_size: 1_000_000,
            local_port: 0,
            enable_remote_access: false,
            register_at_port_mapper: true,
            incoming_signals: Vec::new(),
            outgoing_signals: Vec::new(),
            can_controllers: Vec::new(),
            eth_controllers: Vec::new(),
            lin_controllers: Vec::new(),
        }
    }
}

/// The server side of a co-simulation connection. Serves one client.
pub struct CoSimServer {
    config: CoSimServerConfig,
    tcp_server: TcpChannelServer,
    #[cfg(target_os = "linux")]
    local_server: Option<LocalChannelServer>,
    channel: Option<Channel>,
    io_buffer: Option<IoBuffer>,
    bus_buffer: Option<BusBuffer>,
    registered: bool,
    current_time: SimulationTime,
}

impl CoSimServer {
    /// Bind the server's channels and register it with the port mapper.
    pub fn new(config: CoSimServerConfig) -> Result<Self> {
        let tcp_server = TcpChannelServer::new(config.local_port, config.enable_remote_access)?;

        #[cfg(target_os = "linux")]
        let local_server = match LocalChannelServer::new(&config.server_name) {
            Ok(server) => Some(server),
            Err(err) => {
                log_trace(format!("Local channel server not available: {err}"));
                None
            }
        };

        let mut registered = false;
        if config.register_at_port_mapper {
            port_mapper::ensure_local_server();
            port_mapper_set_port(&config.server_name, tcp_server.local_port())?;
            registered = true;
        }

        log_info(format!(
            "Server '{}' listening on port {}.",
            config.server_name,
            tcp_server.local_port()
        ));

        Ok(Self {
            config,
            tcp_server,
            #[cfg(target_os = "linux")]
            local_server,
            channel: None,
            io_buffer: None,
            bus_buffer: None,
            registered,
            current_time: 0,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.tcp_server.local_port()
    }

    /// Wait for a client and perform the connect handshake.
    ///
    /// Returns `false` when the timeout elapses without a connection.
    pub fn try_accept(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            #[cfg(target_os = "linux")]
            if let Some(local_server) = self.local_server.as_ref() {
                if let Some(channel) = local_server.try_accept(Duration::ZERO)? {
                    self.handshake(channel)?;
                    return Ok(true);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let slice = (deadline - now).min(ACCEPT_POLL_PERIOD);
            if let Some(stream) = self.tcp_server.try_accept(slice)? {
                self.handshake(Channel::from_stream(stream)?)?;
                return Ok(true);
            }
        }
    }

    /// Wait for a client (blocking).
    pub fn accept(&mut self) -> Result<()> {
        while !self.try_accept(Duration::from_secs(1))? {}
        Ok(())
    }

    fn handshake(&mut self, mut channel: Channel) -> Result<()> {
        match protocol::receive_header(channel.reader())? {
            FrameKind::Connect => {}
            other => {
                return Err(CoSimError::Protocol(format!(
                    "received unexpected frame {other}"
                )))
            }
        }

        let data = protocol::read_connect(channel.reader())?;

        if data.protocol_version != PROTOCOL_VERSION {
            let message = format!(
                "Protocol version {} is not supported.",
                data.protocol_version
            );
            protocol::send_error(channel.writer(), &message)?;
            return Err(CoSimError::Protocol(message));
        }

        if !data.server_name.is_empty() && data.server_name != self.config.server_name {
            let message = format!("Server '{}' is not known here.", data.server_name);
            protocol::send_error(channel.writer(), &message)?;
            return Err(CoSimError::Protocol(message));
        }

        // The response describes the connection from the client's point of
        // view, so the signal directions swap.
        protocol::send_connect_ok(
            channel.writer(),
            &ConnectOkData {
                protocol_version: PROTOCOL_VERSION,
                mode: data.mode,
                step_size: self.config.step_size,
                simulation_state: SimulationState(0),
                incoming_signals: self.config.outgoing_signals.clone(),
                outgoing_signals: self.config.incoming_signals.clone(),
                can_controllers: self.config.can_controllers.clone(),
                eth_controllers: self.config.eth_controllers.clone(),
                lin_controllers: self.config.lin_controllers.clone(),
            },
        )?;

        self.io_buffer = Some(IoBuffer::new(
            self.config.incoming_signals.clone(),
            self.config.outgoing_signals.clone(),
        )?);
        self.bus_buffer = Some(BusBuffer::new(
            self.config.can_controllers.clone(),
            self.config.eth_controllers.clone(),
            self.config.lin_controllers.clone(),
        )?);
        self.channel = Some(channel);

        log_info(format!("Client '{}' connected.", data.client_name));
        Ok(())
    }

    /// Tear down the client connection. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.disconnect();
        }
        self.channel = None;
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

    /// Advance the simulation by one step: send this side's outgoing data
    /// with a `Step` frame and apply the client's `StepOk` reply.
    ///
    /// Returns the client's acknowledged time and its pending command.
    pub fn step(
        &mut self,
        simulation_time: SimulationTime,
        callbacks: &mut Callbacks,
    ) -> Result<(SimulationTime, Command)> {
        self.current_time = simulation_time;

        let Self {
            channel,
            io_buffer,
            bus_buffer,
            ..
        } = self;
        let channel = channel.as_mut().ok_or(CoSimError::Disconnected)?;
        let io_buffer = io_buffer.as_mut().ok_or(CoSimError::Disconnected)?;
        let bus_buffer = bus_buffer.as_mut().ok_or(CoSimError::Disconnected)?;

        protocol::send_step(channel.writer(), simulation_time, io_buffer, bus_buffer)?;

        match protocol::receive_header(channel.reader())? {
            FrameKind::StepOk => {}
            other => {
                return Err(CoSimError::Protocol(format!(
                    "received unexpected frame {other}"
                )))
            }
        }
        protocol::read_step_ok(channel.reader(), io_buffer, bus_buffer, callbacks)
    }

    pub fn start(&mut self, simulation_time: SimulationTime) -> Result<()> {
        self.current_time = simulation_time;
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_start(channel.writer(), simulation_time)
    }

    /// Stop the simulation. Clears the data of both buffers.
    pub fn stop(&mut self, simulation_time: SimulationTime) -> Result<()> {
        self.current_time = simulation_time;
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_stop(channel.writer(), simulation_time)?;
        if let Some(io_buffer) = self.io_buffer.as_mut() {
            io_buffer.clear_data();
        }
        if let Some(bus_buffer) = self.bus_buffer.as_mut() {
            bus_buffer.clear_data();
        }
        Ok(())
    }

    pub fn pause(&mut self, simulation_time: SimulationTime) -> Result<()> {
        self.current_time = simulation_time;
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_pause(channel.writer(), simulation_time)
    }

    pub fn continue_simulation(&mut self, simulation_time: SimulationTime) -> Result<()> {
        self.current_time = simulation_time;
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_continue(channel.writer(), simulation_time)
    }

    pub fn terminate(
        &mut self,
        simulation_time: SimulationTime,
        reason: TerminateReason,
    ) -> Result<()> {
        self.current_time = simulation_time;
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_terminate(channel.writer(), simulation_time, reason)
    }

    /// Probe the client for its pending command.
    pub fn ping(&mut self) -> Result<Command> {
        let channel = self.channel.as_mut().ok_or(CoSimError::Disconnected)?;
        protocol::send_ping(channel.writer())?;
        match protocol::receive_header(channel.reader())? {
            FrameKind::PingOk => protocol::read_ping_ok(channel.reader()),
            other => Err(CoSimError::Protocol(format!(
                "received unexpected frame {other}"
            ))),
        }
    }

    /// Drive the simulation until the client requests termination or the
    /// connection fails.
    ///
    /// Holds the tick: starts at the current time and advances by the
    /// configured step size per round, dispatching commands the client
    /// returns with `StepOk`.
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
        let mut simulation_time = self.current_time;

        self.start(simulation_time)?;
        if let Some(callback) = callbacks.simulation_started.as_mut() {
            callback(simulation_time);
        }

        loop {
            if let Some(callback) = callbacks.simulation_begin_step.as_mut() {
                callback(simulation_time);
            }
            let (_, command) = self.step(simulation_time, callbacks)?;
            if let Some(callback) = callbacks.simulation_end_step.as_mut() {
                callback(simulation_time);
            }

            match command {
                Command::None | Command::Step => {}
                Command::Stop => {
                    self.stop(simulation_time)?;
                    if let Some(callback) = callbacks.simulation_stopped.as_mut() {
                        callback(simulation_time);
                    }
                }
                Command::Pause => {
                    self.pause(simulation_time)?;
                    if let Some(callback) = callbacks.simulation_paused.as_mut() {
                        callback(simulation_time);
                    }
                }
                Command::Continue => {
                    self.continue_simulation(simulation_time)?;
                    if let Some(callback) = callbacks.simulation_continued.as_mut() {
                        callback(simulation_time);
                    }
                }
                Command::Terminate | Command::TerminateFinished => {
                    let reason = if command == Command::Terminate {
                        TerminateReason::Error
                    } else {
                        TerminateReason::Finished
                    };
                    self.terminate(simulation_time, reason)?;
                    if let Some(callback) = callbacks.simulation_terminated.as_mut() {
                        callback(simulation_time, reason);
                    }
                    self.disconnect();
                    return Ok(());
                }
                Command::Start | Command::Ping => {}
            }

            simulation_time += self.config.step_size;
            self.current_time = simulation_time;
        }
    }
}

impl Drop for CoSimServer {
    fn drop(&mut self) {
        if self.registered {
            let _ = port_mapper_unset_port(&self.config.server_name);
        }
    }
}
