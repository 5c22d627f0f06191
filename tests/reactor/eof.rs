//! Tests for peers that disconnect

use std::io;

use h2_reactor::{protocol, Channel, Config, Event};

use crate::support::{core_with, record, MockSocket};

#[test]
fn test_close_without_data_deletes_session() {
    let (_poll, mut core) = core_with(Config::default());
    protocol::install(&mut core);
    let seen = record(&mut core, &[Channel::DataReceived, Channel::SessionDeleted]);

    let socket = MockSocket::new();
    let id = core.add_session(Box::new(socket.clone()), "mock".into()).unwrap();
    socket.close_input();

    core.handle_readable(id).unwrap();
    assert!(core.session(id).is_none());
    assert_eq!(socket.interest(), None);

    core.dispatch_pending().unwrap();
    assert_eq!(*seen.borrow(), vec![Event::SessionDeleted(id)]);
    assert!(core.protocol(id).is_none());
    assert_eq!(core.session_count(), 0);
}

#[test]
fn test_delete_session_is_idempotent() {
    let (_poll, mut core) = core_with(Config::default());
    let seen = record(&mut core, &[Channel::SessionDeleted]);
    let id = core.add_session(Box::new(MockSocket::new()), "mock".into()).unwrap();

    core.delete_session(id).unwrap();
    core.delete_session(id).unwrap();
    core.dispatch_pending().unwrap();
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn test_pending_events_cancelled_on_delete() {
    let (_poll, mut core) = core_with(Config::default());
    let seen = record(&mut core, &[Channel::SessionInitialized, Channel::DataReceived]);

    let keep = core.add_session(Box::new(MockSocket::new()), "keep".into()).unwrap();
    let socket = MockSocket::new();
    let gone = core.add_session(Box::new(socket.clone()), "gone".into()).unwrap();
    socket.push_input(b"hi");
    core.handle_readable(gone).unwrap();
    core.delete_session(gone).unwrap();

    core.dispatch_pending().unwrap();
    assert_eq!(*seen.borrow(), vec![Event::SessionInitialized(keep)]);
}

#[test]
fn test_disconnect_error_deletes_session() {
    struct Reset;

    impl io::Read for Reset {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::ConnectionReset.into())
        }
    }

    impl io::Write for Reset {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl mio::event::Source for Reset {
        fn register(&mut self, _: &mio::Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            Ok(())
        }

        fn reregister(&mut self, _: &mio::Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            Ok(())
        }

        fn deregister(&mut self, _: &mio::Registry) -> io::Result<()> {
            Ok(())
        }
    }

    let (_poll, mut core) = core_with(Config::default());
    let reader = core.add_session(Box::new(Reset), "reset".into()).unwrap();
    core.handle_readable(reader).unwrap();
    assert!(core.session(reader).is_none());

    let writer = core.add_session(Box::new(Reset), "pipe".into()).unwrap();
    core.session_send(writer, b"data").unwrap();
    core.flush_send_buffer(writer).unwrap();
    assert!(core.session(writer).is_none());
}

#[test]
fn test_write_accepting_nothing_deletes_session() {
    struct Stalled;

    impl io::Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl io::Write for Stalled {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl mio::event::Source for Stalled {
        fn register(&mut self, _: &mio::Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            Ok(())
        }

        fn reregister(&mut self, _: &mio::Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            Ok(())
        }

        fn deregister(&mut self, _: &mio::Registry) -> io::Result<()> {
            Ok(())
        }
    }

    let (_poll, mut core) = core_with(Config::default());
    let deleted = record(&mut core, &[Channel::SessionDeleted, Channel::SendBufferEmpty]);
    let id = core.add_session(Box::new(Stalled), "stalled".into()).unwrap();
    core.session_send(id, b"data").unwrap();
    core.flush_send_buffer(id).unwrap();
    core.dispatch_pending().unwrap();

    assert!(core.session(id).is_none());
    assert_eq!(*deleted.borrow(), vec![Event::SessionDeleted(id)]);
}
