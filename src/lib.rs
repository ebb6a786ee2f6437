//! ADNS-3080 optical flow sensor driver for Linux spidev.
//!
//! The crate talks to the sensor over a synchronous SPI bus, reads motion
//! bursts and raw 30x30 frames, controls frame rate and shutter bounds, and
//! can serve raw frame grabs to a single remote client over TCP.
//!
//! # Bus Transactions
//!
//! Every register access is one full-duplex transfer of `(address, data)`
//! byte pairs. Reads are pipelined: the sensor answers a register address two
//! bytes later, so the value for the k-th read lands at `rx[2k + 3]` and a
//! trailing dummy pair is always appended.
//!
//! # Frame Capture
//!
//! A capture is triggered by a write to the frame capture register, then the
//! pixel burst register is dumped. Pixels start at the first byte with both
//! top bits set; the low six bits of each of the following 900 bytes are the
//! frame in row-major order.

pub mod adns3080;
pub mod config;
pub mod errors;
pub mod frame;
pub mod i2c;
pub mod logging;
pub mod mock;
pub mod registers;
pub mod sample_log;
pub mod server;
pub mod spi;

pub use adns3080::{Adns3080, Configuration, ExtendedConfig, MotionStatus, SensorState};
pub use errors::*;
pub use frame::{RawFrame, FRAME_PIXELS, FRAME_WIDTH};
pub use server::{CommandServer, FrameSource, SessionEnd};
pub use spi::{Bus, SpiMode, SpiSettings, SpiTiming, SpidevBus};
