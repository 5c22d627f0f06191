//! Tests for read/write watcher toggling around the buffer watermarks

use mio::Interest;

use h2_reactor::{Channel, Config, Event};

use crate::support::{core_with, record, MockSocket};

#[test]
fn test_write_watcher_follows_send_buffer() {
    let (_poll, mut core) = core_with(Config::default());
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    let seen = record(&mut core, &[Channel::SendBufferEmpty]);

    assert!(!core.session(id).unwrap().is_writing());
    assert_eq!(socket.interest(), Some(Interest::READABLE));

    socket.set_write_budget(0);
    assert_eq!(core.session_send(id, b"x").unwrap(), 1);
    let session = core.session(id).unwrap();
    assert!(session.is_writing());
    assert_eq!(session.send_buffer().used_space(), 1);
    assert_eq!(socket.interest(), Some(Interest::READABLE | Interest::WRITABLE));

    socket.set_write_budget(usize::MAX);
    core.handle_writable(id).unwrap();
    let session = core.session(id).unwrap();
    assert!(!session.is_writing());
    assert!(session.send_buffer().is_empty());
    assert_eq!(socket.interest(), Some(Interest::READABLE));
    assert_eq!(socket.take_output(), b"x");

    core.dispatch_pending().unwrap();
    assert_eq!(*seen.borrow(), vec![Event::SendBufferEmpty(id)]);
}

#[test]
fn test_write_watcher_stays_on_for_partial_flush() {
    let (_poll, mut core) = core_with(Config::default());
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    let seen = record(&mut core, &[Channel::SendBufferEmpty]);

    socket.set_write_budget(3);
    core.session_send(id, b"abcdef").unwrap();
    core.flush_send_buffer(id).unwrap();

    let session = core.session(id).unwrap();
    assert!(session.is_writing());
    assert_eq!(session.send_buffer().used_space(), 3);
    core.dispatch_pending().unwrap();
    assert!(seen.borrow().is_empty());

    socket.set_write_budget(usize::MAX);
    core.handle_writable(id).unwrap();
    assert_eq!(socket.take_output(), b"abcdef");
    assert!(!core.session(id).unwrap().is_writing());
}

#[test]
fn test_low_watermark_delays_write_watcher() {
    let config = Config {
        send_low_watermark: 4,
        ..Config::default()
    };
    let (_poll, mut core) = core_with(config);
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();

    core.session_send(id, b"abcd").unwrap();
    assert!(!core.session(id).unwrap().is_writing());
    core.session_send(id, b"e").unwrap();
    assert!(core.session(id).unwrap().is_writing());
}

#[test]
fn test_read_watcher_pauses_above_high_watermark() {
    let config = Config {
        recv_buffer_size: 16,
        recv_high_watermark: 8,
        ..Config::default()
    };
    let (_poll, mut core) = core_with(config);
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    let seen = record(&mut core, &[Channel::DataReceived]);

    socket.push_input(b"0123456789ab");
    core.handle_readable(id).unwrap();
    let session = core.session(id).unwrap();
    assert_eq!(session.recv_buffer().used_space(), 12);
    assert!(!session.is_reading());
    assert_eq!(socket.interest(), None);

    core.dispatch_pending().unwrap();
    assert_eq!(*seen.borrow(), vec![Event::DataReceived(id)]);

    let mut chunk = [0u8; 4];
    assert_eq!(core.session_recv(id, &mut chunk).unwrap(), 4);
    assert_eq!(&chunk, b"0123");
    assert!(core.session(id).unwrap().is_reading());
    assert_eq!(socket.interest(), Some(Interest::READABLE));
}

#[test]
fn test_full_recv_buffer_stops_reading() {
    let config = Config {
        recv_buffer_size: 8,
        recv_high_watermark: 8,
        ..Config::default()
    };
    let (_poll, mut core) = core_with(config);
    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();

    socket.push_input(b"0123456789");
    core.handle_readable(id).unwrap();
    let session = core.session(id).unwrap();
    assert!(session.recv_buffer().is_full());
    assert!(!session.is_reading());

    let mut all = [0u8; 8];
    core.session_recv(id, &mut all).unwrap();
    assert!(core.session(id).unwrap().is_reading());
    assert_eq!(core.session(id).unwrap().recv_buffer().used_space(), 0);

    // The rest is still waiting on the socket
    core.handle_readable(id).unwrap();
    assert_eq!(core.session(id).unwrap().recv_buffer().used_space(), 2);
}
