//! Tests for request/response exchange through the protocol layer

use std::time::{Duration, Instant};

use h2_reactor::codec::frame;
use h2_reactor::codec::hpack::find;
use h2_reactor::codec::{error_code, settings_id, FrameKind, H2Header, HpackDecoder, HpackEncoder, CONNECTION_PREFACE};
use h2_reactor::{handler, protocol, Channel, Config, Core, Event, SessionId};

use crate::support::{core_with, parse_frames, record, MockSocket};

fn request(path: &str) -> Vec<u8> {
    HpackEncoder::new().encode(&[
        H2Header::new(":method", "GET"),
        H2Header::new(":scheme", "http"),
        H2Header::new(":authority", "localhost"),
        H2Header::new(":path", path),
    ])
}

fn client_hello() -> Vec<u8> {
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(&frame::settings(&[]));
    bytes
}

fn connect(core: &mut Core) -> (SessionId, MockSocket) {
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    core.dispatch_pending().unwrap();
    (id, socket)
}

fn deliver(core: &mut Core, id: SessionId, socket: &MockSocket, bytes: &[u8]) {
    socket.push_input(bytes);
    core.handle_readable(id).unwrap();
    core.dispatch_pending().unwrap();
}

#[test]
fn test_server_settings_sent_on_connect() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let (id, socket) = connect(&mut core);

    let frames = parse_frames(&socket.take_output());
    assert_eq!(
        frames,
        vec![(
            0,
            FrameKind::Settings { ack: false, settings: vec![(settings_id::MAX_CONCURRENT_STREAMS, 100)] }
        )]
    );
    let proto = core.protocol(id).unwrap();
    assert!(core.timers().is_active(proto.settings_timer()));
    assert!(!proto.is_shutting_down());
}

#[test]
fn test_get_answered_with_200_and_stream_removed() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    handler::install_http2(&mut core);
    let (id, socket) = connect(&mut core);
    socket.take_output();

    let mut input = client_hello();
    input.extend_from_slice(&frame::settings_ack());
    input.extend_from_slice(&frame::headers(1, &request("/"), true, true));
    deliver(&mut core, id, &socket, &input);

    let frames = parse_frames(&socket.take_output());
    assert!(frames.contains(&(0, FrameKind::Settings { ack: true, settings: vec![] })));
    let (block, end_stream) = frames
        .iter()
        .find_map(|(stream, kind)| match kind {
            FrameKind::Headers { header_block, end_stream } if *stream == 1 => {
                Some((header_block.clone(), *end_stream))
            }
            _ => None,
        })
        .expect("response headers on stream 1");
    assert!(end_stream);
    let headers = HpackDecoder::new().decode(&block).unwrap();
    assert_eq!(find(&headers, ":status"), Some("200"));
    assert!(!frames.iter().any(|(_, kind)| matches!(kind, FrameKind::Data { .. })));

    let proto = core.protocol(id).unwrap();
    assert!(proto.streams().is_empty());
    assert!(!proto.engine().is_stream_open(1));
    assert!(!core.timers().is_active(proto.settings_timer()));
    assert!(core.session(id).is_some());
}

#[test]
fn test_response_written_once_when_socket_blocks() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    handler::install_http2(&mut core);
    let (id, socket) = connect(&mut core);
    socket.take_output();
    let emptied = record(&mut core, &[Channel::SendBufferEmpty]);

    socket.set_write_budget(0);
    let mut input = client_hello();
    input.extend_from_slice(&frame::settings_ack());
    input.extend_from_slice(&frame::headers(1, &request("/"), true, true));
    deliver(&mut core, id, &socket, &input);

    assert_eq!(socket.output_len(), 0);
    assert!(socket.interest().is_some_and(|interest| interest.is_writable()));
    assert!(emptied.borrow().is_empty());

    socket.set_write_budget(usize::MAX);
    core.handle_writable(id).unwrap();
    core.dispatch_pending().unwrap();

    let frames = parse_frames(&socket.take_output());
    let responses = frames
        .iter()
        .filter(|(stream, kind)| *stream == 1 && matches!(kind, FrameKind::Headers { .. }))
        .count();
    assert_eq!(responses, 1);
    assert_eq!(*emptied.borrow(), vec![Event::SendBufferEmpty(id)]);
    assert!(!socket.interest().is_some_and(|interest| interest.is_writable()));
}

#[test]
fn test_request_split_across_reads() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    handler::install_http2(&mut core);
    let (id, socket) = connect(&mut core);
    socket.take_output();

    let mut input = client_hello();
    input.extend_from_slice(&frame::headers(1, &request("/split"), false, true));
    input.extend_from_slice(&frame::data(1, b"body", true));
    let (first, second) = input.split_at(input.len() - 7);

    deliver(&mut core, id, &socket, first);
    let proto = core.protocol(id).unwrap();
    let stream = proto.streams().get(1).expect("stream open");
    assert_eq!(find(stream.headers(), ":path"), Some("/split"));
    assert!(stream.is_recv_timer_active(core.timers()));

    deliver(&mut core, id, &socket, second);
    let frames = parse_frames(&socket.take_output());
    assert!(frames
        .iter()
        .any(|(stream, kind)| *stream == 1 && matches!(kind, FrameKind::Headers { end_stream: true, .. })));
    assert!(core.protocol(id).unwrap().streams().is_empty());
}

#[test]
fn test_bad_preface_sends_goaway_and_closes() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let (id, socket) = connect(&mut core);
    socket.take_output();

    deliver(&mut core, id, &socket, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

    let frames = parse_frames(&socket.take_output());
    assert_eq!(
        frames,
        vec![(0, FrameKind::GoAway { last_stream_id: 0, error_code: error_code::PROTOCOL_ERROR })]
    );
    assert!(core.session(id).is_none());
    assert!(core.protocol(id).is_none());
}

#[test]
fn test_settings_timeout_terminates_session() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let (id, socket) = connect(&mut core);
    socket.take_output();

    assert_eq!(core.fire_timers(Instant::now()).unwrap(), 0);
    assert_eq!(core.fire_timers(Instant::now() + Duration::from_secs(11)).unwrap(), 1);
    core.dispatch_pending().unwrap();

    let frames = parse_frames(&socket.take_output());
    assert_eq!(
        frames,
        vec![(0, FrameKind::GoAway { last_stream_id: 0, error_code: error_code::SETTINGS_TIMEOUT })]
    );
    assert!(core.session(id).is_none());
    assert!(core.timers().is_empty());
}

#[test]
fn test_peer_goaway_closes_idle_session() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let (id, socket) = connect(&mut core);

    deliver(&mut core, id, &socket, &client_hello());
    assert!(core.session(id).is_some());

    deliver(&mut core, id, &socket, &frame::goaway(0, error_code::NO_ERROR));
    assert!(core.session(id).is_none());
}
