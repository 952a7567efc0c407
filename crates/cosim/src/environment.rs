//! Environment configuration, read once at first use.

use std::sync::OnceLock;

const PORT_MAPPER_PORT_VARIABLE: &str = "DSVEOSCOSIM_PORTMAPPER_PORT";
const PORT_MAPPER_SERVER_VERBOSE_VARIABLE: &str = "DSVEOSCOSIM_PORTMAPPER_SERVER_VERBOSE";
const PORT_MAPPER_CLIENT_VERBOSE_VARIABLE: &str = "DSVEOSCOSIM_PORTMAPPER_CLIENT_VERBOSE";

/// Well-known port of the port mapper.
pub const DEFAULT_PORT_MAPPER_PORT: u16 = 27027;

/// The TCP port the port mapper listens on.
pub fn port_mapper_port() -> u16 {
    static PORT: OnceLock<u16> = OnceLock::new();
    *PORT.get_or_init(|| {
        std::env::var(PORT_MAPPER_PORT_VARIABLE)
            .ok()
            .and_then(|value| parse_port(&value))
            .unwrap_or(DEFAULT_PORT_MAPPER_PORT)
    })
}

/// Whether the port mapper server traces every request.
pub fn is_port_mapper_server_verbose() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| read_bool(PORT_MAPPER_SERVER_VERBOSE_VARIABLE))
}

/// Whether port mapper clients trace their requests.
pub fn is_port_mapper_client_verbose() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| read_bool(PORT_MAPPER_CLIENT_VERBOSE_VARIABLE))
}

fn read_bool(variable: &str) -> bool {
    std::env::var(variable)
        .map(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}
