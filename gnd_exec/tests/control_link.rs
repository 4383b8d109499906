//! End to end tests of the control plane, from operator input to actuator frames.

use comms_if::{
    ctrl::{CommandSchema, ControlCommand, WireEncoding},
    net::TransportKind,
};
use gnd_lib::{
    ctrl_client::{CtrlClient, SenderExit},
    input::{script::ScriptSource, InputMapper, InputMapping, NeutralSource},
    params::GndExecParams,
};
use mech_lib::{
    act_bridge::ActuatorBridge,
    ctrl_server::{CtrlServer, LinkStats},
    params::MechExecParams,
    sink::{ActuatorSink, SinkError},
};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};
use util::{
    slot::SharedLatestSlot,
    task::{LoopTask, Shutdown},
};

#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
}

impl ActuatorSink for RecordingSink {
    fn write_frame(&mut self, frame: &str) -> Result<(), SinkError> {
        self.frames.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".into()
    }
}

/// The vehicle side of the link: a running control server and a bridge cycled by the test.
struct Vehicle {
    addr: SocketAddr,
    stats: Arc<LinkStats>,
    bridge: ActuatorBridge<RecordingSink>,
    sink: RecordingSink,
    shutdown: Shutdown,
    task: LoopTask<()>,
}

fn vehicle(transport: TransportKind) -> Vehicle {
    let params = MechExecParams {
        bind_address: "127.0.0.1".into(),
        bind_port: 0,
        transport,
        recv_timeout_ms: 20,
        ..Default::default()
    };

    let slot = SharedLatestSlot::new();
    let server = CtrlServer::new(&params, slot.clone()).unwrap();
    let addr = server.local_addr();
    let stats = server.stats();

    let sink = RecordingSink::default();
    let bridge = ActuatorBridge::new(&params, slot, sink.clone()).unwrap();

    let shutdown = Shutdown::new();
    let task_shutdown = shutdown.clone();
    let task = LoopTask::spawn("ctrl_server", move |state| server.run(&task_shutdown, state))
        .unwrap();

    Vehicle {
        addr,
        stats,
        bridge,
        sink,
        shutdown,
        task,
    }
}

fn ground(addr: SocketAddr, transport: TransportKind, encoding: WireEncoding) -> GndExecParams {
    GndExecParams {
        remote_address: addr.ip().to_string(),
        ctrl_port: addr.port(),
        transport,
        encoding,
        ..Default::default()
    }
}

fn wait_for<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for the vehicle");
        thread::sleep(Duration::from_millis(5));
    }
}

fn demand(steering: i32, throttle: i32) -> ControlCommand {
    ControlCommand {
        steering,
        throttle,
        ..CommandSchema::default().neutral()
    }
}

fn mapper() -> InputMapper {
    InputMapper::new(InputMapping::default(), CommandSchema::default()).unwrap()
}

#[test]
fn test_udp_json_latest_wins() {
    let mut v = vehicle(TransportKind::Udp);
    let mut client =
        CtrlClient::connect(&ground(v.addr, TransportKind::Udp, WireEncoding::Json)).unwrap();

    v.bridge.cycle();

    client.send(&demand(45, 0)).unwrap();
    client.send(&demand(46, 0)).unwrap();
    let stats = v.stats.clone();
    wait_for(|| stats.snapshot().published == 2);

    for _ in 0..6 {
        v.bridge.cycle();
    }

    let mut expected = vec!["S90\n".to_string()];
    expected.extend(vec!["S46\n".to_string(); 6]);
    assert_eq!(*v.sink.frames.lock().unwrap(), expected);

    v.shutdown.request();
    v.task.join_timeout(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_udp_script_ends_with_neutral() {
    let mut v = vehicle(TransportKind::Udp);
    let client =
        CtrlClient::connect(&ground(v.addr, TransportKind::Udp, WireEncoding::Text)).unwrap();

    // Full right lock then let go
    let script = ScriptSource::parse(
        "test",
        "0.0: {\"axes\": [1.0, 1.0, 1.0, 1.0]};\n0.1: {\"axes\": [0.0, 1.0, 1.0, 1.0]};",
    )
    .unwrap();

    let (exit, client_stats) = client.run(script, &mapper(), &Shutdown::new(), &Default::default());
    assert_eq!(exit, SenderExit::SourceExhausted);

    let stats = v.stats.clone();
    wait_for(|| stats.snapshot().published == client_stats.sent);
    assert_eq!(stats.snapshot().rejected, 0);

    v.bridge.cycle();
    assert_eq!(*v.sink.frames.lock().unwrap(), vec!["S90\n".to_string()]);

    v.shutdown.request();
    v.task.join_timeout(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_tcp_text_until_vehicle_goes() {
    let mut v = vehicle(TransportKind::Tcp);
    let mut client =
        CtrlClient::connect(&ground(v.addr, TransportKind::Tcp, WireEncoding::Text)).unwrap();

    client.send(&demand(30, 55)).unwrap();
    let stats = v.stats.clone();
    wait_for(|| stats.snapshot().published == 1);

    v.bridge.cycle();
    assert_eq!(*v.sink.frames.lock().unwrap(), vec!["S30\n".to_string()]);

    // Stop the vehicle, the client notices on a following write
    v.shutdown.request();
    v.task.join_timeout(Duration::from_secs(1)).unwrap();

    let task_shutdown = Shutdown::new();
    let task = LoopTask::spawn("ctrl_client", move |state| {
        client.run(NeutralSource::new(), &mapper(), &task_shutdown, state)
    })
    .unwrap();

    wait_for(|| task.is_finished());
    let (exit, stats) = task.join_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(exit, SenderExit::PeerDisconnected);
    assert!(stats.send_failures >= 1);
}
