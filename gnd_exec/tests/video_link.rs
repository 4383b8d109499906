//! End to end tests of the video plane, from captured image to displayed frame.

use cam_lib::{
    params::CamExecParams,
    source::{FrameSource, TestPattern},
    stream::{FrameSender, SendOutcome},
};
use gnd_lib::{
    cam_client::{FrameReceiver, ReceivedFrame, ReceiverStats},
    params::GndExecParams,
};
use std::{
    net::UdpSocket,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use util::{
    slot::SharedLatestSlot,
    task::{LoopTask, Shutdown},
};

struct Ground {
    slot: SharedLatestSlot<Arc<ReceivedFrame>>,
    shutdown: Shutdown,
    task: LoopTask<ReceiverStats>,
    port: u16,
}

fn ground() -> Ground {
    let slot = SharedLatestSlot::new();
    let receiver = FrameReceiver::bind(
        &GndExecParams {
            video_bind_address: "127.0.0.1".into(),
            video_port: 0,
            recv_timeout_ms: 20,
            ..Default::default()
        },
        slot.clone(),
    )
    .unwrap();
    let port = receiver.local_addr().port();

    let shutdown = Shutdown::new();
    let task_shutdown = shutdown.clone();
    let task = LoopTask::spawn("frame_receiver", move |state| {
        receiver.run(&task_shutdown, state)
    })
    .unwrap();

    Ground {
        slot,
        shutdown,
        task,
        port,
    }
}

fn sender(port: u16, width: u32, height: u32) -> FrameSender {
    FrameSender::new(&CamExecParams {
        remote_address: "127.0.0.1".into(),
        remote_port: port,
        stream_width: width,
        stream_height: height,
        ..Default::default()
    })
    .unwrap()
}

fn wait_for_seq(slot: &SharedLatestSlot<Arc<ReceivedFrame>>, seq: u64) -> Arc<ReceivedFrame> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(frame) = slot.peek() {
            if frame.seq >= seq {
                return frame;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for frame {}", seq);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_corrupt_datagram_between_frames() {
    let g = ground();
    let mut tx = sender(g.port, 320, 240);
    let mut camera = TestPattern::new(320, 240);

    assert!(matches!(
        tx.send_frame(&camera.capture().unwrap()),
        SendOutcome::Sent(_)
    ));
    let first = wait_for_seq(&g.slot, 1);
    assert_eq!(first.image.to_rgb8().dimensions(), (320, 240));

    // Garbage from somewhere else on the network
    let junk = UdpSocket::bind("127.0.0.1:0").unwrap();
    junk.send_to(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01], ("127.0.0.1", g.port))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(g.slot.peek().unwrap().seq, 1);

    assert!(matches!(
        tx.send_frame(&camera.capture().unwrap()),
        SendOutcome::Sent(_)
    ));
    let second = wait_for_seq(&g.slot, 2);
    assert_eq!(second.image.to_rgb8().dimensions(), (320, 240));

    g.shutdown.request();
    let stats = g.task.join_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(stats.datagrams, 3);
    assert_eq!(stats.decoded, 2);
    assert_eq!(stats.decode_failures, 1);
}

#[test]
fn test_streaming_loop_to_receiver() {
    let g = ground();
    let tx = sender(g.port, 160, 120);
    let cam_shutdown = Shutdown::new();
    let task_shutdown = cam_shutdown.clone();
    let cam_task = LoopTask::spawn("frame_sender", move |state| {
        tx.run(TestPattern::new(160, 120), &task_shutdown, state)
    })
    .unwrap();

    let frame = wait_for_seq(&g.slot, 5);
    assert_eq!(frame.image.to_rgb8().dimensions(), (160, 120));
    assert!(!frame.data.is_empty());

    cam_shutdown.request();
    let sent = cam_task
        .join_timeout(Duration::from_secs(1))
        .unwrap()
        .unwrap();

    g.shutdown.request();
    let received = g.task.join_timeout(Duration::from_secs(1)).unwrap();

    assert!(received.decoded >= 5);
    assert!(received.decoded <= sent.sent);
    assert_eq!(received.decode_failures, 0);
}
