//! Remote frame grab server.
//!
//! A deliberately serial TCP server: one client is served at a time and the
//! next connection is only accepted once the current client quits or
//! disconnects. Pending connections wait in the listen backlog. This keeps
//! the wire protocol free of any framing.
//!
//! # Wire Format
//!
//! Commands are short text tokens. Each receive is one message; a message may
//! carry several tokens separated by newlines. Matching is exact and case
//! sensitive:
//!
//! | Token | Action |
//! |-------|--------|
//! | `quit`, `exit`, `q` | close this client, go back to listening |
//! | `grab`, `g` | capture a raw frame |
//! | anything else | ignored, no reply |
//!
//! A grab is answered with exactly [`FRAME_PIXELS`] bytes (the frame, row
//! major, one pixel per byte) or exactly one byte if the capture failed.
//! There is no header; the reply length is the status.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Listening --accept--> ClientConnected --quit | disconnect | timeout--> Listening
//!                        (grab handled in place)
//! ```
//!
//! Only a failure of `accept` itself ends the server.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};

use crate::adns3080::Adns3080;
use crate::errors::Result;
use crate::frame::FRAME_PIXELS;
use crate::spi::Bus;

/// Reply sent instead of a frame when a capture fails.
pub const FAILURE_REPLY: [u8; 1] = [0x00];

const RECEIVE_BUFFER_SIZE: usize = 256;

/// Anything that can capture a raw frame on request.
pub trait FrameSource {
    /// Same contract as [`Adns3080::read_frame_burst`]: pixels written, or an
    /// error if the bus failed.
    fn grab(&mut self, frame: &mut [u8; FRAME_PIXELS]) -> Result<usize>;
}

impl<B: Bus> FrameSource for Adns3080<B> {
    fn grab(&mut self, frame: &mut [u8; FRAME_PIXELS]) -> Result<usize> {
        self.read_frame_burst(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Grab,
}

impl Command {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "quit" | "exit" | "q" => Some(Command::Quit),
            "grab" | "g" => Some(Command::Grab),
            _ => None,
        }
    }
}

/// Split one received message into command tokens.
fn tokens(message: &[u8]) -> impl Iterator<Item = String> + '_ {
    message
        .split(|&b| b == b'\n' || b == b'\r' || b == 0)
        .filter(|t| !t.is_empty())
        .map(|t| String::from_utf8_lossy(t).into_owned())
}

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Disconnected,
    TimedOut,
}

pub struct CommandServer<S: FrameSource> {
    listener: TcpListener,
    source: S,
    client_timeout: Option<Duration>,
}

impl<S: FrameSource> CommandServer<S> {
    /// Bind the listening socket.
    pub fn bind<A: ToSocketAddrs>(addr: A, source: S) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            source,
            client_timeout: None,
        })
    }

    /// Drop clients that send nothing for `timeout`. `None` waits forever.
    pub fn with_client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Serve clients one after another until `accept` fails.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.accept_one()?;
        }
    }

    /// Wait for one client and serve it until it leaves.
    pub fn accept_one(&mut self) -> Result<SessionEnd> {
        info!("listen");
        let (mut stream, peer) = self.listener.accept()?;
        info!("client connected: {}", peer);

        if let Err(e) = stream.set_read_timeout(self.client_timeout) {
            warn!("failed to set client read timeout: {}", e);
        }

        let end = self.serve_client(&mut stream);
        match end {
            SessionEnd::Quit => info!("connection closed by client: {}", peer),
            SessionEnd::Disconnected => info!("client disconnected: {}", peer),
            SessionEnd::TimedOut => warn!("client timed out: {}", peer),
        }
        let _ = stream.shutdown(Shutdown::Both);
        Ok(end)
    }

    /// Run the command loop on an accepted connection.
    pub fn serve_client<T: Read + Write>(&mut self, stream: &mut T) -> SessionEnd {
        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        loop {
            let n = match stream.read(&mut buffer) {
                Ok(0) => return SessionEnd::Disconnected,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return SessionEnd::TimedOut
                }
                Err(e) => {
                    debug!("client read failed: {}", e);
                    return SessionEnd::Disconnected;
                }
            };

            for token in tokens(&buffer[..n]) {
                match Command::parse(&token) {
                    Some(Command::Quit) => {
                        debug!("socket: termination signal received");
                        return SessionEnd::Quit;
                    }
                    Some(Command::Grab) => {
                        debug!("socket: raw frame request received");
                        if let Err(e) = self.reply_frame(stream) {
                            debug!("client write failed: {}", e);
                            return SessionEnd::Disconnected;
                        }
                    }
                    None => debug!("socket: ignoring {:?}", token),
                }
            }
        }
    }

    fn reply_frame<W: Write>(&mut self, stream: &mut W) -> std::io::Result<()> {
        let mut pixels = [0u8; FRAME_PIXELS];
        let reply: &[u8] = match self.source.grab(&mut pixels) {
            Ok(n) if n >= FRAME_PIXELS => &pixels,
            Ok(n) => {
                debug!("raw frame capture failed: {} pixels", n);
                &FAILURE_REPLY
            }
            Err(e) => {
                warn!("raw frame capture failed: {}", e);
                &FAILURE_REPLY
            }
        };
        stream.write_all(reply)?;
        stream.flush()
    }
}
