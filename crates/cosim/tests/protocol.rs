//! Round-trip tests for every frame kind over every available transport.

mod support;

use cosim::{
    read_connect, read_connect_ok, read_continue, read_error, read_get_port, read_get_port_ok,
    read_pause, read_ping_ok, read_set_port, read_start, read_step, read_step_ok, read_stop,
    read_terminate, read_unset_port, receive_header, send_connect, send_connect_ok, send_continue,
    send_error, send_get_port, send_get_port_ok, send_ok, send_pause, send_ping, send_ping_ok,
    send_set_port, send_start, send_step, send_step_ok, send_stop, send_terminate,
    send_unset_port, BusBuffer, Callbacks, Command, ConnectData, ConnectOkData, FrameKind,
    IoBuffer, Mode, SimulationState, TerminateReason,
};

use support::*;

fn empty_buffers() -> (IoBuffer, BusBuffer) {
    (
        IoBuffer::new(Vec::new(), Vec::new()).unwrap(),
        BusBuffer::new(Vec::new(), Vec::new(), Vec::new()).unwrap(),
    )
}

#[test]
fn send_and_receive_ok() {
    for (mut sender, mut receiver) in channel_pairs("proto-ok") {
        send_ok(sender.writer()).unwrap();
        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Ok);
    }
}

#[test]
fn send_and_receive_error() {
    for (mut sender, mut receiver) in channel_pairs("proto-error") {
        let message = generate_string("Errorメッセージ");
        send_error(sender.writer(), &message).unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Error);
        assert_eq!(read_error(receiver.reader()).unwrap(), message);
    }
}

#[test]
fn send_and_receive_ping() {
    for (mut sender, mut receiver) in channel_pairs("proto-ping") {
        send_ping(sender.writer()).unwrap();
        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Ping);
    }
}

#[test]
fn send_and_receive_ping_ok() {
    for (mut sender, mut receiver) in channel_pairs("proto-ping-ok") {
        send_ping_ok(sender.writer(), Command::Stop).unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::PingOk);
        assert_eq!(read_ping_ok(receiver.reader()).unwrap(), Command::Stop);
    }
}

#[test]
fn send_and_receive_connect() {
    for (mut sender, mut receiver) in channel_pairs("proto-connect") {
        let data = ConnectData {
            protocol_version: generate_u32(),
            mode: Mode(0),
            server_name: generate_string("Server名前"),
            client_name: generate_string("Client名前"),
        };
        send_connect(sender.writer(), &data).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::Connect
        );
        assert_eq!(read_connect(receiver.reader()).unwrap(), data);
    }
}

#[test]
fn send_and_receive_connect_ok() {
    for (mut sender, mut receiver) in channel_pairs("proto-connect-ok") {
        let data = ConnectOkData {
            protocol_version: generate_u32(),
            mode: Mode(0),
            step_size: generate_i64(),
            simulation_state: SimulationState(0),
            incoming_signals: create_signals(2),
            outgoing_signals: create_signals(3),
            can_controllers: create_can_controllers(4),
            eth_controllers: create_eth_controllers(5),
            lin_controllers: create_lin_controllers(6),
        };
        send_connect_ok(sender.writer(), &data).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::ConnectOk
        );
        assert_eq!(read_connect_ok(receiver.reader()).unwrap(), data);
    }
}

#[test]
fn send_and_receive_start() {
    for (mut sender, mut receiver) in channel_pairs("proto-start") {
        let simulation_time = generate_i64();
        send_start(sender.writer(), simulation_time).unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Start);
        assert_eq!(read_start(receiver.reader()).unwrap(), simulation_time);
    }
}

#[test]
fn send_and_receive_stop() {
    for (mut sender, mut receiver) in channel_pairs("proto-stop") {
        let simulation_time = generate_i64();
        send_stop(sender.writer(), simulation_time).unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Stop);
        assert_eq!(read_stop(receiver.reader()).unwrap(), simulation_time);
    }
}

#[test]
fn send_and_receive_terminate() {
    for (mut sender, mut receiver) in channel_pairs("proto-terminate") {
        let simulation_time = generate_i64();
        send_terminate(sender.writer(), simulation_time, TerminateReason::Finished).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::Terminate
        );
        assert_eq!(
            read_terminate(receiver.reader()).unwrap(),
            (simulation_time, TerminateReason::Finished)
        );
    }
}

#[test]
fn send_and_receive_pause() {
    for (mut sender, mut receiver) in channel_pairs("proto-pause") {
        let simulation_time = generate_i64();
        send_pause(sender.writer(), simulation_time).unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Pause);
        assert_eq!(read_pause(receiver.reader()).unwrap(), simulation_time);
    }
}

#[test]
fn send_and_receive_continue() {
    for (mut sender, mut receiver) in channel_pairs("proto-continue") {
        let simulation_time = generate_i64();
        send_continue(sender.writer(), simulation_time).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::Continue
        );
        assert_eq!(read_continue(receiver.reader()).unwrap(), simulation_time);
    }
}

#[test]
fn send_and_receive_step() {
    for (mut sender, mut receiver) in channel_pairs("proto-step") {
        let simulation_time = generate_i64();
        let (mut sender_io, mut sender_bus) = empty_buffers();
        let (mut receiver_io, mut receiver_bus) = empty_buffers();
        let mut callbacks = Callbacks::default();

        send_step(
            sender.writer(),
            simulation_time,
            &mut sender_io,
            &mut sender_bus,
        )
        .unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Step);
        let received_time = read_step(
            receiver.reader(),
            &mut receiver_io,
            &mut receiver_bus,
            &mut callbacks,
        )
        .unwrap();
        assert_eq!(received_time, simulation_time);
    }
}

#[test]
fn send_and_receive_step_ok() {
    for (mut sender, mut receiver) in channel_pairs("proto-step-ok") {
        let simulation_time = generate_i64();
        let (mut sender_io, mut sender_bus) = empty_buffers();
        let (mut receiver_io, mut receiver_bus) = empty_buffers();
        let mut callbacks = Callbacks::default();

        send_step_ok(
            sender.writer(),
            simulation_time,
            Command::Terminate,
            &mut sender_io,
            &mut sender_bus,
        )
        .unwrap();

        assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::StepOk);
        let (received_time, next_command) = read_step_ok(
            receiver.reader(),
            &mut receiver_io,
            &mut receiver_bus,
            &mut callbacks,
        )
        .unwrap();
        assert_eq!(received_time, simulation_time);
        assert_eq!(next_command, Command::Terminate);
    }
}

#[test]
fn send_and_receive_get_port() {
    for (mut sender, mut receiver) in channel_pairs("proto-get-port") {
        let name = generate_string("Server名前");
        send_get_port(sender.writer(), &name).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::GetPort
        );
        assert_eq!(read_get_port(receiver.reader()).unwrap(), name);
    }
}

#[test]
fn send_and_receive_get_port_ok() {
    for (mut sender, mut receiver) in channel_pairs("proto-get-port-ok") {
        let port = generate_u16();
        send_get_port_ok(sender.writer(), port).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::GetPortOk
        );
        assert_eq!(read_get_port_ok(receiver.reader()).unwrap(), port);
    }
}

#[test]
fn send_and_receive_set_port() {
    for (mut sender, mut receiver) in channel_pairs("proto-set-port") {
        let name = generate_string("Server名前");
        let port = generate_u16();
        send_set_port(sender.writer(), &name, port).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::SetPort
        );
        assert_eq!(read_set_port(receiver.reader()).unwrap(), (name, port));
    }
}

#[test]
fn send_and_receive_unset_port() {
    for (mut sender, mut receiver) in channel_pairs("proto-unset-port") {
        let name = generate_string("Server名前");
        send_unset_port(sender.writer(), &name).unwrap();

        assert_eq!(
            receive_header(receiver.reader()).unwrap(),
            FrameKind::UnsetPort
        );
        assert_eq!(read_unset_port(receiver.reader()).unwrap(), name);
    }
}

#[test]
fn unknown_frame_kind_is_fatal() {
    let (mut sender, mut receiver) = tcp_channel_pair();

    // A raw frame with an unassigned kind byte.
    sender.writer().write(&[0xEE]).unwrap();
    sender.writer().end_write().unwrap();

    let result = receive_header(receiver.reader());
    assert!(matches!(result, Err(cosim::CoSimError::Protocol(_))));
}

#[test]
fn truncated_frame_is_fatal() {
    let (mut sender, mut receiver) = tcp_channel_pair();

    // An Error frame announcing a long string, then disconnect.
    sender.writer().write(&[FrameKind::Error as u8]).unwrap();
    sender.writer().write(&100u32.to_le_bytes()).unwrap();
    sender.writer().write(b"short").unwrap();
    sender.writer().end_write().unwrap();
    drop(sender);

    assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Error);
    let result = read_error(receiver.reader());
    assert!(matches!(result, Err(cosim::CoSimError::Disconnected)));
}

#[test]
fn oversized_string_is_rejected() {
    let (mut sender, mut receiver) = tcp_channel_pair();

    sender.writer().write(&[FrameKind::Error as u8]).unwrap();
    sender.writer().write(&u32::MAX.to_le_bytes()).unwrap();
    sender.writer().end_write().unwrap();

    assert_eq!(receive_header(receiver.reader()).unwrap(), FrameKind::Error);
    let result = read_error(receiver.reader());
    assert!(matches!(result, Err(cosim::CoSimError::Protocol(_))));
}
