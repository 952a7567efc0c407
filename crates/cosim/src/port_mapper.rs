//! Name→port registry served on a well-known TCP port.
//!
//! The server owns its map on a dedicated thread; external callers touch it
//! only through request frames. Each client connection carries exactly one
//! request and is then dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use cosim_channel::Channel;
use cosim_transport::{try_connect_tcp, TcpChannelServer, ACCEPT_POLL_PERIOD};

use crate::environment;
use crate::error::{CoSimError, Result};
use crate::logging::{log_error, log_trace};
use crate::protocol::{self, FrameKind};

const CLIENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// The port-mapper server.
///
/// Runs an accept loop on its own thread until dropped; the stop signal is
/// observed with at most the accept poll period of latency.
pub struct PortMapperServer {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_port: u16,
}

impl PortMapperServer {
    /// Bind the well-known port and start serving requests.
    pub fn start(enable_remote_access: bool) -> Result<Self> {
        let server = TcpChannelServer::new(environment::port_mapper_port(), enable_remote_access)?;
        let local_port = server.local_port();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("port-mapper".to_string())
            .spawn(move || run(server, &stop_flag))
            .map_err(|err| CoSimError::System {
                message: format!("could not spawn port mapper thread: {err}"),
                code: err.raw_os_error().unwrap_or(0),
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
            local_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl Drop for PortMapperServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Start the in-process port-mapper singleton if no one serves the port yet.
///
/// A server instance in another process is fine; registration then goes
/// through the client functions against that instance.
pub(crate) fn ensure_local_server() {
    static SERVER: OnceLock<Option<PortMapperServer>> = OnceLock::new();
    SERVER.get_or_init(|| match PortMapperServer::start(true) {
        Ok(server) => Some(server),
        Err(err) => {
            log_trace(format!(
                "Port mapper not started, assuming an external instance: {err}"
            ));
            None
        }
    });
}

fn run(server: TcpChannelServer, stop: &AtomicBool) {
    let mut ports: HashMap<String, u16> = HashMap::new();

    while !stop.load(Ordering::SeqCst) {
        match server.try_accept(ACCEPT_POLL_PERIOD) {
            Ok(Some(stream)) => {
                let result =
                    Channel::from_stream(stream).map_err(Into::into).and_then(
                        |mut channel: Channel| handle_client(&mut channel, &mut ports),
                    );
                if let Err(err) = result {
                    log_error(format!("Error in port mapper request: {err}"));
                }
            }
            Ok(None) => {}
            Err(err) => log_error(format!("Error in port mapper accept: {err}")),
        }
    }
}

fn handle_client(channel: &mut Channel, ports: &mut HashMap<String, u16>) -> Result<()> {
    let frame_kind = protocol::receive_header(channel.reader())?;
    match frame_kind {
        FrameKind::GetPort => {
            let name = protocol::read_get_port(channel.reader())?;
            if environment::is_port_mapper_server_verbose() {
                log_trace(format!("Get '{name}'"));
            }
            match ports.get(&name) {
                Some(&port) => protocol::send_get_port_ok(channel.writer(), port)?,
                None => protocol::send_error(
                    channel.writer(),
                    &format!("Could not find port for server '{name}'."),
                )?,
            }
        }
        FrameKind::SetPort => {
            let (name, port) = protocol::read_set_port(channel.reader())?;
            if environment::is_port_mapper_server_verbose() {
                log_trace(format!("Set '{name}':{port}"));
            }
            ports.insert(name, port);
            if environment::is_port_mapper_server_verbose() {
                dump_entries(ports);
            }
            protocol::send_ok(channel.writer())?;
        }
        FrameKind::UnsetPort => {
            let name = protocol::read_unset_port(channel.reader())?;
            if environment::is_port_mapper_server_verbose() {
                log_trace(format!("Unset '{name}'"));
            }
            ports.remove(&name);
            if environment::is_port_mapper_server_verbose() {
                dump_entries(ports);
            }
            protocol::send_ok(channel.writer())?;
        }
        other => {
            return Err(CoSimError::Protocol(format!(
                "received unexpected frame {other}"
            )))
        }
    }
    Ok(())
}

fn dump_entries(ports: &HashMap<String, u16>) {
    if ports.is_empty() {
        log_trace("No port mapper entries.");
    } else {
        log_trace("Port mapper entries:");
        for (name, port) in ports {
            log_trace(format!("  '{name}': {port}"));
        }
    }
}

fn connect_to_port_mapper(ip_address: &str) -> Result<Channel> {
    let stream = try_connect_tcp(ip_address, environment::port_mapper_port(), 0, CLIENT_TIMEOUT)?
        .ok_or(CoSimError::Timeout(CLIENT_TIMEOUT))?;
    Ok(Channel::from_stream(stream)?)
}

/// Look up the port registered for `server_name` on `ip_address`.
pub fn port_mapper_get_port(ip_address: &str, server_name: &str) -> Result<u16> {
    if environment::is_port_mapper_client_verbose() {
        log_trace(format!(
            "PortMapper_GetPort(ipAddress: '{ip_address}', serverName: '{server_name}')"
        ));
    }

    let mut channel = connect_to_port_mapper(ip_address)?;
    protocol::send_get_port(channel.writer(), server_name)?;

    match protocol::receive_header(channel.reader())? {
        FrameKind::GetPortOk => Ok(protocol::read_get_port_ok(channel.reader())?),
        FrameKind::Error => {
            let message = protocol::read_error(channel.reader())?;
            Err(CoSimError::NotFound(message))
        }
        other => Err(CoSimError::Protocol(format!(
            "received unexpected frame {other}"
        ))),
    }
}

/// Register `name → port` with the local port mapper.
pub fn port_mapper_set_port(name: &str, port: u16) -> Result<()> {
    if environment::is_port_mapper_client_verbose() {
        log_trace(format!("PortMapper_SetPort(name: '{name}', port: {port})"));
    }

    let mut channel = connect_to_port_mapper("127.0.0.1")?;
    protocol::send_set_port(channel.writer(), name, port)?;
    expect_ok(&mut channel)
}

/// Remove the registration of `name`. Succeeds even if absent.
pub fn port_mapper_unset_port(name: &str) -> Result<()> {
    if environment::is_port_mapper_client_verbose() {
        log_trace(format!("PortMapper_UnsetPort(name: '{name}')"));
    }

    let mut channel = connect_to_port_mapper("127.0.0.1")?;
    protocol::send_unset_port(channel.writer(), name)?;
    expect_ok(&mut channel)
}

fn expect_ok(channel: &mut Channel) -> Result<()> {
    match protocol::receive_header(channel.reader())? {
        FrameKind::Ok => Ok(()),
        FrameKind::Error => {
            let message = protocol::read_error(channel.reader())?;
            Err(CoSimError::NotFound(message))
        }
        other => Err(CoSimError::Protocol(format!(
            "received unexpected frame {other}"
        ))),
    }
}
