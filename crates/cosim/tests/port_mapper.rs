//! Port-mapper end-to-end scenario.

use cosim::{
    port_mapper_get_port, port_mapper_set_port, port_mapper_unset_port, CoSimError,
    PortMapperServer,
};

// The whole scenario runs in one test so the well-known port is only bound
// once per process.
#[test]
fn set_get_unset_roundtrip() {
    // Use a non-default port so a port mapper of a real deployment on this
    // host does not interfere. Must happen before the first port lookup.
    std::env::set_var("DSVEOSCOSIM_PORTMAPPER_PORT", "47027");

    let _server = PortMapperServer::start(false).expect("port mapper should start");

    port_mapper_set_port("srv", 40000).expect("set should succeed");
    assert_eq!(port_mapper_get_port("127.0.0.1", "srv").unwrap(), 40000);

    // Overwrites any prior binding.
    port_mapper_set_port("srv", 40001).expect("set should succeed");
    assert_eq!(port_mapper_get_port("127.0.0.1", "srv").unwrap(), 40001);

    port_mapper_unset_port("srv").expect("unset should succeed");

    let missing = port_mapper_get_port("127.0.0.1", "srv");
    match missing {
        Err(CoSimError::NotFound(message)) => {
            assert_eq!(message, "Could not find port for server 'srv'.");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    // Unset of an absent name still succeeds.
    port_mapper_unset_port("srv").expect("unset of absent name should succeed");

    // An empty ip address targets the local host.
    port_mapper_set_port("other", 40002).unwrap();
    assert_eq!(port_mapper_get_port("", "other").unwrap(), 40002);
}
