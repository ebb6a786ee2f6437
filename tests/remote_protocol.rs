//! Frame grab protocol over a real loopback socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use adns_rs::adns3080::Adns3080;
use adns_rs::frame::FRAME_PIXELS;
use adns_rs::mock::MockBus;
use adns_rs::server::{CommandServer, SessionEnd, FAILURE_REPLY};
use adns_rs::spi::SpiTiming;
use pretty_assertions::assert_eq;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn start_server(
    bus: &MockBus,
    sessions: usize,
    client_timeout: Option<Duration>,
) -> (SocketAddr, thread::JoinHandle<Vec<SessionEnd>>) {
    let sensor = Adns3080::new(bus.clone(), SpiTiming::default());
    let mut server = CommandServer::bind("127.0.0.1:0", sensor)
        .unwrap()
        .with_client_timeout(client_timeout);
    let addr = server.local_addr().unwrap();
    let handle = thread::spawn(move || {
        (0..sessions)
            .map(|_| server.accept_one().unwrap())
            .collect()
    });
    (addr, handle)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    stream
}

fn expected_frame() -> Vec<u8> {
    (0..FRAME_PIXELS).map(|n| (n % 64) as u8).collect()
}

#[test]
fn grab_returns_a_full_frame() {
    let bus = MockBus::new();
    bus.set_pixel_stream(MockBus::synthetic_pixel_stream(40));
    let (addr, handle) = start_server(&bus, 1, None);

    let mut client = connect(addr);
    client.write_all(b"grab\n").unwrap();
    let mut reply = vec![0u8; FRAME_PIXELS];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply, expected_frame());

    client.write_all(b"quit\n").unwrap();
    assert_eq!(handle.join().unwrap(), vec![SessionEnd::Quit]);
}

#[test]
fn bus_failure_replies_with_one_byte() {
    let bus = MockBus::new();
    bus.set_failing(true);
    let (addr, handle) = start_server(&bus, 1, None);

    let mut client = connect(addr);
    client.write_all(b"g").unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply, FAILURE_REPLY);

    client.write_all(b"q").unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert_eq!(handle.join().unwrap(), vec![SessionEnd::Quit]);
}

#[test]
fn next_client_is_served_after_quit() {
    let bus = MockBus::new();
    bus.set_pixel_stream(MockBus::synthetic_pixel_stream(0));
    let (addr, handle) = start_server(&bus, 2, None);

    let mut first = connect(addr);
    first.write_all(b"exit\n").unwrap();
    let mut rest = Vec::new();
    first.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    let mut second = connect(addr);
    second.write_all(b"g\n").unwrap();
    let mut reply = vec![0u8; FRAME_PIXELS];
    second.read_exact(&mut reply).unwrap();
    assert_eq!(reply, expected_frame());
    drop(second);

    assert_eq!(
        handle.join().unwrap(),
        vec![SessionEnd::Quit, SessionEnd::Disconnected]
    );
}

#[test]
fn idle_client_is_dropped_after_timeout() {
    let bus = MockBus::new();
    let (addr, handle) = start_server(&bus, 1, Some(Duration::from_millis(100)));

    let mut client = connect(addr);
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert_eq!(handle.join().unwrap(), vec![SessionEnd::TimedOut]);
    assert!(bus.transactions().is_empty());
}
