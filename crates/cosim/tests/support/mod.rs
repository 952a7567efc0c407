//! Shared test helpers: deterministic data generation and channel pairs.

#![allow(dead_code)]

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use cosim::{
    BusControllerId, CanController, CanMessage, CanMessageFlags, DataType, EthController,
    EthMessage, EthMessageFlags, IoSignal, IoSignalId, LinController, LinControllerType,
    LinMessage, LinMessageFlags, SimulationTime, SizeKind, CAN_MESSAGE_MAX_LENGTH,
    ETH_ADDRESS_LENGTH, ETH_MESSAGE_MAX_LENGTH, LIN_MESSAGE_MAX_LENGTH,
};
use cosim_channel::Channel;
use cosim_transport::{try_connect_tcp, TcpChannelServer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Process-wide deterministic generator.
fn rng() -> &'static Mutex<StdRng> {
    static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();
    RNG.get_or_init(|| Mutex::new(StdRng::seed_from_u64(42)))
}

pub fn generate_u8() -> u8 {
    rng().lock().unwrap().gen()
}

pub fn generate_u16() -> u16 {
    rng().lock().unwrap().gen()
}

pub fn generate_u32() -> u32 {
    rng().lock().unwrap().gen_range(0..123_456_789)
}

pub fn generate_u64() -> u64 {
    rng().lock().unwrap().gen()
}

pub fn generate_i64() -> i64 {
    rng().lock().unwrap().gen()
}

pub fn generate_simulation_time() -> SimulationTime {
    rng().lock().unwrap().gen_range(0..i64::MAX)
}

pub fn generate_string(prefix: &str) -> String {
    format!("{prefix}{}", generate_u32())
}

pub fn fill_with_random(data: &mut [u8]) {
    rng().lock().unwrap().fill(data);
}

pub fn create_signal(data_type: DataType, size_kind: SizeKind) -> IoSignal {
    let length = rng().lock().unwrap().gen_range(1..=10);
    IoSignal {
        id: IoSignalId(generate_u32()),
        length,
        data_type,
        size_kind,
        name: generate_string("Signal名前😀"),
    }
}

pub fn create_signals(count: usize) -> Vec<IoSignal> {
    (0..count)
        .map(|_| {
            let data_type = random_data_type();
            let size_kind = if generate_u8() % 2 == 0 {
                SizeKind::Fixed
            } else {
                SizeKind::Variable
            };
            create_signal(data_type, size_kind)
        })
        .collect()
}

fn random_data_type() -> DataType {
    match generate_u8() % 11 {
        0 => DataType::Bool,
        1 => DataType::Int8,
        2 => DataType::Int16,
        3 => DataType::Int32,
        4 => DataType::Int64,
        5 => DataType::UInt8,
        6 => DataType::UInt16,
        7 => DataType::UInt32,
        8 => DataType::UInt64,
        9 => DataType::Float32,
        _ => DataType::Float64,
    }
}

pub fn create_can_controller() -> CanController {
    CanController {
        id: BusControllerId(generate_u32()),
        queue_size: 100,
        bits_per_second: generate_u64(),
        flexible_data_rate_bits_per_second: generate_u64(),
        name: generate_string("CanController名前😀"),
        channel_name: generate_string("CanChannel名前😀"),
        cluster_name: generate_string("CanCluster名前😀"),
    }
}

pub fn create_can_controllers(count: usize) -> Vec<CanController> {
    (0..count).map(|_| create_can_controller()).collect()
}

pub fn create_eth_controller() -> EthController {
    let mut mac_address = [0u8; ETH_ADDRESS_LENGTH];
    fill_with_random(&mut mac_address);
    EthController {
        id: BusControllerId(generate_u32()),
        queue_size: 100,
        bits_per_second: generate_u64(),
        mac_address,
        name: generate_string("EthController名前😀"),
        channel_name: generate_string("EthChannel名前😀"),
        cluster_name: generate_string("EthCluster名前😀"),
    }
}

pub fn create_eth_controllers(count: usize) -> Vec<EthController> {
    (0..count).map(|_| create_eth_controller()).collect()
}

pub fn create_lin_controller() -> LinController {
    LinController {
        id: BusControllerId(generate_u32()),
        queue_size: 100,
        bits_per_second: generate_u64(),
        controller_type: if generate_u8() % 2 == 0 {
            LinControllerType::Responder
        } else {
            LinControllerType::Commander
        },
        name: generate_string("LinController名前😀"),
        channel_name: generate_string("LinChannel名前😀"),
        cluster_name: generate_string("LinCluster名前😀"),
    }
}

pub fn create_lin_controllers(count: usize) -> Vec<LinController> {
    (0..count).map(|_| create_lin_controller()).collect()
}

pub fn create_can_message(controller_id: BusControllerId) -> CanMessage {
    let length = rng().lock().unwrap().gen_range(1..=CAN_MESSAGE_MAX_LENGTH as u32);
    let mut data = [0u8; CAN_MESSAGE_MAX_LENGTH];
    fill_with_random(&mut data[..length as usize]);
    CanMessage {
        controller_id,
        id: generate_u32(),
        timestamp: generate_simulation_time(),
        flags: CanMessageFlags::FLEXIBLE_DATA_RATE_FORMAT,
        length,
        data,
    }
}

pub fn create_eth_message(controller_id: BusControllerId) -> EthMessage {
    let length = rng().lock().unwrap().gen_range(1..=ETH_MESSAGE_MAX_LENGTH as u32);
    let mut data = [0u8; ETH_MESSAGE_MAX_LENGTH];
    fill_with_random(&mut data[..length as usize]);
    EthMessage {
        controller_id,
        timestamp: generate_simulation_time(),
        flags: EthMessageFlags::empty(),
        length,
        data,
    }
}

pub fn create_lin_message(controller_id: BusControllerId) -> LinMessage {
    let length = rng().lock().unwrap().gen_range(1..=LIN_MESSAGE_MAX_LENGTH as u32);
    let mut data = [0u8; LIN_MESSAGE_MAX_LENGTH];
    fill_with_random(&mut data[..length as usize]);
    LinMessage {
        controller_id,
        id: generate_u32(),
        timestamp: generate_simulation_time(),
        flags: LinMessageFlags::empty(),
        length,
        data,
    }
}

/// A connected pair of TCP channels: (sender, receiver).
pub fn tcp_channel_pair() -> (Channel, Channel) {
    let server = TcpChannelServer::new(0, false).expect("server should bind");
    let port = server.local_port();

    let connector = std::thread::spawn(move || {
        try_connect_tcp("127.0.0.1", port, 0, Duration::from_secs(1))
            .expect("connect should not fail")
            .expect("connect should not time out")
    });

    let accepted = server.accept().expect("accept should succeed");
    let connected = connector.join().expect("connector thread should finish");

    (
        Channel::from_stream(connected).expect("channel from connected stream"),
        Channel::from_stream(accepted).expect("channel from accepted stream"),
    )
}

/// Connected channel pairs over every available transport: (sender, receiver).
pub fn channel_pairs(tag: &str) -> Vec<(Channel, Channel)> {
    let mut pairs = vec![tcp_channel_pair()];

    #[cfg(target_os = "linux")]
    {
        use cosim_channel::{connect_local, LocalChannelServer};

        let name = format!("{tag}-{}", std::process::id());
        let server = LocalChannelServer::new(&name).expect("local server should bind");
        let connector = std::thread::spawn(move || connect_local(&name).expect("local connect"));
        let accepted = server
            .try_accept(Duration::from_secs(2))
            .expect("local accept should not fail")
            .expect("local client should connect");
        let connected = connector.join().expect("connector thread should finish");
        pairs.push((connected, accepted));
    }

    #[cfg(not(target_os = "linux"))]
    let _ = tag;

    pairs
}
