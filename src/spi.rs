//! Synchronous SPI bus transport.
//!
//! Every sensor operation is a single full-duplex transfer: the bytes clocked
//! out are the register transaction, the bytes clocked in have the same length.
//! The Linux implementation drives `/dev/spidevB.C` through the spidev ioctls.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use log::{debug, trace};

use crate::errors::{DriverError, Result};

const DEFAULT_DEVICE: &str = "/dev/spidev0.0";
const DEFAULT_SPEED_HZ: u32 = 500_000;
const DEFAULT_DELAY_USECS: u16 = 75;
const DEFAULT_BITS_PER_WORD: u8 = 8;

/// Per-transfer timing handed to the driver with every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTiming {
    /// Delay after the transfer before chip select is released.
    pub delay_usecs: u16,
    pub speed_hz: u32,
    pub bits_per_word: u8,
}

impl Default for SpiTiming {
    fn default() -> Self {
        Self {
            delay_usecs: DEFAULT_DELAY_USECS,
            speed_hz: DEFAULT_SPEED_HZ,
            bits_per_word: DEFAULT_BITS_PER_WORD,
        }
    }
}

bitflags::bitflags! {
    /// spidev mode flags (`SPI_CPHA`, `SPI_CPOL`, ...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpiMode: u8 {
        const CPHA = 0x01;
        const CPOL = 0x02;
        const CS_HIGH = 0x04;
        const LSB_FIRST = 0x08;
        const THREE_WIRE = 0x10;
        const LOOPBACK = 0x20;
        const NO_CS = 0x40;
        /// Slave pulls low to pause.
        const READY = 0x80;
    }
}

/// Everything needed to open a bus session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiSettings {
    pub device: PathBuf,
    pub mode: SpiMode,
    pub timing: SpiTiming,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            mode: SpiMode::empty(),
            timing: SpiTiming::default(),
        }
    }
}

/// A register-addressed synchronous bus.
///
/// `transact` returns exactly `tx.len()` received bytes or fails. There are no
/// retries at this level; a failed transfer means a wiring or driver fault.
pub trait Bus: Send {
    fn transact(&mut self, tx: &[u8], timing: &SpiTiming) -> Result<Vec<u8>>;
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn transact(&mut self, tx: &[u8], timing: &SpiTiming) -> Result<Vec<u8>> {
        (**self).transact(tx, timing)
    }
}

mod ioctl {
    const SPI_IOC_MAGIC: u8 = b'k';

    /// Mirror of `struct spi_ioc_transfer` from `linux/spi/spidev.h`.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct SpiIocTransfer {
        pub tx_buf: u64,
        pub rx_buf: u64,
        pub len: u32,
        pub speed_hz: u32,
        pub delay_usecs: u16,
        pub bits_per_word: u8,
        pub cs_change: u8,
        pub tx_nbits: u8,
        pub rx_nbits: u8,
        pub word_delay_usecs: u8,
        pub pad: u8,
    }

    nix::ioctl_write_ptr!(write_mode, SPI_IOC_MAGIC, 1, u8);
    nix::ioctl_read!(read_mode, SPI_IOC_MAGIC, 1, u8);
    nix::ioctl_write_ptr!(write_bits_per_word, SPI_IOC_MAGIC, 3, u8);
    nix::ioctl_read!(read_bits_per_word, SPI_IOC_MAGIC, 3, u8);
    nix::ioctl_write_ptr!(write_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
    nix::ioctl_read!(read_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
    nix::ioctl_write_buf!(message, SPI_IOC_MAGIC, 0, SpiIocTransfer);
}

/// An open spidev session. Mode, word size and clock are fixed at open time.
pub struct SpidevBus {
    file: File,
}

impl SpidevBus {
    /// Open the device and apply the session configuration.
    ///
    /// Each setting is written and then read back, as the kernel may adjust it.
    /// Any failure here is fatal for the session.
    pub fn open(settings: &SpiSettings) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&settings.device)
            .map_err(|e| {
                DriverError::Session(format!(
                    "can't open {}: {e}",
                    settings.device.display()
                ))
            })?;
        let fd = file.as_raw_fd();

        let mut mode = settings.mode.bits();
        let mut bits = settings.timing.bits_per_word;
        let mut speed = settings.timing.speed_hz;

        // SAFETY: fd is an open spidev descriptor and every pointer refers to a
        // live local of the size the request code encodes.
        unsafe {
            ioctl::write_mode(fd, &mode).map_err(|e| session_err("can't set spi mode", e))?;
            ioctl::read_mode(fd, &mut mode).map_err(|e| session_err("can't get spi mode", e))?;
            ioctl::write_bits_per_word(fd, &bits)
                .map_err(|e| session_err("can't set bits per word", e))?;
            ioctl::read_bits_per_word(fd, &mut bits)
                .map_err(|e| session_err("can't get bits per word", e))?;
            ioctl::write_max_speed_hz(fd, &speed)
                .map_err(|e| session_err("can't set max speed hz", e))?;
            ioctl::read_max_speed_hz(fd, &mut speed)
                .map_err(|e| session_err("can't get max speed hz", e))?;
        }

        debug!(
            "spi session open: device={}, mode={:#04x}, bits_per_word={}, max_speed={} Hz ({} kHz)",
            settings.device.display(),
            mode,
            bits,
            speed,
            speed / 1000
        );

        Ok(Self { file })
    }
}

fn session_err(what: &str, errno: nix::Error) -> DriverError {
    DriverError::Session(format!("{what}: {errno}"))
}

impl Bus for SpidevBus {
    fn transact(&mut self, tx: &[u8], timing: &SpiTiming) -> Result<Vec<u8>> {
        let mut rx = vec![0u8; tx.len()];
        let len = u32::try_from(tx.len())
            .map_err(|_| DriverError::Transport(format!("transfer too long: {}", tx.len())))?;
        let transfer = ioctl::SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len,
            speed_hz: timing.speed_hz,
            delay_usecs: timing.delay_usecs,
            bits_per_word: timing.bits_per_word,
            ..Default::default()
        };

        // SAFETY: tx and rx both outlive the ioctl and are `len` bytes long.
        let transferred = unsafe { ioctl::message(self.file.as_raw_fd(), &[transfer]) }
            .map_err(|e| DriverError::Transport(format!("can't send spi message: {e}")))?;

        let transferred = usize::try_from(transferred).unwrap_or(0);
        trace!("spi read/wrote {} of {} bytes", transferred, tx.len());
        if transferred < tx.len() {
            return Err(DriverError::ShortTransfer {
                requested: tx.len(),
                transferred,
            });
        }
        trace!("spi tx: {:02X?}", tx);
        trace!("spi rx: {:02X?}", rx);
        Ok(rx)
    }
}
