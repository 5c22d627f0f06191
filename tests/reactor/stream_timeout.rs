//! Tests for per-stream idle timers

use std::time::{Duration, Instant};

use h2_reactor::codec::frame;
use h2_reactor::codec::{error_code, settings_id, FrameKind, H2Header, HpackEncoder, CONNECTION_PREFACE};
use h2_reactor::{protocol, Channel, Config, Core, Event, SessionId};

use crate::support::{core_with, parse_frames, record, MockSocket};

fn open_idle_stream(socket: &MockSocket) {
    let mut input = CONNECTION_PREFACE.to_vec();
    input.extend_from_slice(&frame::settings(&[]));
    input.extend_from_slice(&frame::settings_ack());
    let block = HpackEncoder::new().encode(&[
        H2Header::new(":method", "POST"),
        H2Header::new(":scheme", "http"),
        H2Header::new(":path", "/upload"),
    ]);
    input.extend_from_slice(&frame::headers(1, &block, false, true));
    socket.push_input(&input);
}

/// Open stream 1 with a complete GET after the client announces `window` as its
/// initial stream window.
fn open_request_with_window(socket: &MockSocket, window: u32) {
    let mut input = CONNECTION_PREFACE.to_vec();
    input.extend_from_slice(&frame::settings(&[(settings_id::INITIAL_WINDOW_SIZE, window)]));
    input.extend_from_slice(&frame::settings_ack());
    let block = HpackEncoder::new().encode(&[
        H2Header::new(":method", "GET"),
        H2Header::new(":scheme", "http"),
        H2Header::new(":path", "/"),
    ]);
    input.extend_from_slice(&frame::headers(1, &block, true, true));
    socket.push_input(&input);
}

fn respond_with_body(core: &mut Core, id: SessionId, body: &[u8]) {
    let proto = core.protocol_mut(id).unwrap();
    proto
        .submit_response(1, &[H2Header::new(":status", "200")], Some(body.to_vec()))
        .unwrap();
    protocol::pump(core, id).unwrap();
    core.dispatch_pending().unwrap();
}

#[test]
fn test_idle_stream_is_reset_and_session_shut_down() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let deleted = record(&mut core, &[Channel::SessionDeleted]);

    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    core.dispatch_pending().unwrap();
    open_idle_stream(&socket);
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();
    socket.take_output();

    let proto = core.protocol(id).unwrap();
    assert_eq!(proto.streams().len(), 1);
    assert!(!core.timers().is_active(proto.settings_timer()));

    // Well inside the idle timeout nothing happens
    assert_eq!(core.fire_timers(Instant::now() + Duration::from_secs(5)).unwrap(), 0);

    assert_eq!(core.fire_timers(Instant::now() + Duration::from_secs(60)).unwrap(), 1);
    core.dispatch_pending().unwrap();

    let frames = parse_frames(&socket.take_output());
    assert_eq!(frames, vec![(1, FrameKind::RstStream { error_code: error_code::INTERNAL_ERROR })]);
    assert!(core.session(id).is_none());
    assert!(core.protocol(id).is_none());
    assert_eq!(*deleted.borrow(), vec![Event::SessionDeleted(id)]);
    assert!(core.timers().is_empty());
}

#[test]
fn test_data_extends_recv_timer() {
    let config = Config {
        stream_recv_timeout: Duration::from_secs(10),
        ..Config::default()
    };
    let (_poll, mut core) = core_with(config);
    protocol::install(&mut core);

    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    core.dispatch_pending().unwrap();
    open_idle_stream(&socket);
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();

    let before = core.timers().next_deadline().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    socket.push_input(&frame::data(1, b"chunk", false));
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();

    let after = core.timers().next_deadline().unwrap();
    assert!(after > before);
    let proto = core.protocol(id).unwrap();
    assert_eq!(proto.streams().get(1).unwrap().received(), 5);
}

#[test]
fn test_blocked_response_arms_send_timer_without_window() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);

    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    core.dispatch_pending().unwrap();
    open_request_with_window(&socket, 0);
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();
    socket.take_output();

    // Only HEADERS can leave; the body waits for a window that never opens
    respond_with_body(&mut core, id, b"0123456789");
    let frames = parse_frames(&socket.take_output());
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], (1, FrameKind::Headers { end_stream: false, .. })));

    let proto = core.protocol(id).unwrap();
    let stream = proto.streams().get(1).unwrap();
    assert!(stream.is_send_timer_active(core.timers()));
    assert!(!stream.is_recv_timer_active(core.timers()));

    assert_eq!(core.fire_timers(Instant::now() + Duration::from_secs(60)).unwrap(), 1);
    core.dispatch_pending().unwrap();

    let frames = parse_frames(&socket.take_output());
    assert_eq!(frames, vec![(1, FrameKind::RstStream { error_code: error_code::INTERNAL_ERROR })]);
    assert!(core.session(id).is_none());
    assert!(core.protocol(id).is_none());
    assert!(core.timers().is_empty());
}

#[test]
fn test_send_timer_follows_flow_control() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);

    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    core.dispatch_pending().unwrap();
    open_request_with_window(&socket, 4);
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();
    socket.take_output();

    respond_with_body(&mut core, id, b"0123456789");
    let frames = parse_frames(&socket.take_output());
    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[1], (1, FrameKind::Data { end_stream: false, flow_len: 4, .. })));
    let stream = core.protocol(id).unwrap().streams().get(1).unwrap();
    assert!(stream.is_send_timer_active(core.timers()));

    socket.push_input(&frame::window_update(1, 100));
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();

    let frames = parse_frames(&socket.take_output());
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], (1, FrameKind::Data { end_stream: true, flow_len: 6, .. })));
    let proto = core.protocol(id).unwrap();
    assert!(proto.streams().is_empty());
    assert!(core.timers().next_deadline().is_none());
    assert!(core.session(id).is_some());
}
