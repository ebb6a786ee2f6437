//! Auxiliary I2C telemetry (servo position and brightness sensors).
//!
//! The board behind `/dev/i2c-N` is treated as an opaque word source: write
//! the register address, read back a little-endian 16-bit word.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;

use log::debug;

use crate::errors::{DriverError, Result};

/// Slave address of the telemetry board.
pub const TELEMETRY_SLAVE_ADDRESS: u16 = 0x18;

pub const SERVO_REGISTER: u8 = 0x32;

/// Brightness channels 0..3, in log column order.
pub const BRIGHTNESS_REGISTERS: [u8; 4] = [0x76, 0x78, 0x72, 0x74];

mod ioctl {
    const I2C_SLAVE: u16 = 0x0703;

    nix::ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);
}

/// Anything that can answer a 16-bit register read.
pub trait WordSource {
    fn read_word(&mut self, register: u8) -> Result<u16>;
}

/// One telemetry sample appended to a log row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryReading {
    pub servo: u16,
    pub brightness: [u16; 4],
}

impl TelemetryReading {
    pub fn read<S: WordSource + ?Sized>(source: &mut S) -> Result<Self> {
        let servo = source.read_word(SERVO_REGISTER)?;
        let mut brightness = [0u16; 4];
        for (value, reg) in brightness.iter_mut().zip(BRIGHTNESS_REGISTERS) {
            *value = source.read_word(reg)?;
        }
        Ok(Self { servo, brightness })
    }
}

/// An i2c-dev character device bound to one slave address.
pub struct I2cDevice {
    file: File,
}

impl I2cDevice {
    pub fn open<P: AsRef<Path>>(path: P, slave: u16) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DriverError::Telemetry(format!("can't open {}: {e}", path.display())))?;

        // SAFETY: fd is an open i2c-dev descriptor; I2C_SLAVE takes the address by value.
        unsafe { ioctl::set_slave_address(file.as_raw_fd(), slave as i32) }.map_err(|e| {
            DriverError::Telemetry(format!("can't select i2c slave {slave:#04x}: {e}"))
        })?;

        debug!("i2c device open: {} slave={:#04x}", path.display(), slave);
        Ok(Self { file })
    }
}

impl WordSource for I2cDevice {
    fn read_word(&mut self, register: u8) -> Result<u16> {
        read_word_from(&mut self.file, register)
    }
}

fn read_word_from<T: Read + Write>(io: &mut T, register: u8) -> Result<u16> {
    io.write_all(&[register])
        .map_err(|e| DriverError::Telemetry(format!("register {register:#04x} select: {e}")))?;
    let mut word = [0u8; 2];
    io.read_exact(&mut word)
        .map_err(|e| DriverError::Telemetry(format!("register {register:#04x} read: {e}")))?;
    Ok(u16::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    struct FakeBoard(HashMap<u8, u16>);

    impl WordSource for FakeBoard {
        fn read_word(&mut self, register: u8) -> Result<u16> {
            self.0
                .get(&register)
                .copied()
                .ok_or_else(|| DriverError::Telemetry(format!("no register {register:#04x}")))
        }
    }

    struct Wire {
        sent: Vec<u8>,
        reply: Cursor<Vec<u8>>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn word_is_little_endian() {
        let mut wire = Wire {
            sent: Vec::new(),
            reply: Cursor::new(vec![0x34, 0x12]),
        };
        assert_eq!(read_word_from(&mut wire, 0x76).unwrap(), 0x1234);
        assert_eq!(wire.sent, vec![0x76]);
    }

    #[test]
    fn short_reply_is_a_telemetry_error() {
        let mut wire = Wire {
            sent: Vec::new(),
            reply: Cursor::new(vec![0x34]),
        };
        assert!(matches!(
            read_word_from(&mut wire, 0x32),
            Err(DriverError::Telemetry(_))
        ));
    }

    #[test]
    fn reading_collects_servo_and_brightness_in_column_order() {
        let mut board = FakeBoard(HashMap::from([
            (0x32, 1500),
            (0x76, 10),
            (0x78, 20),
            (0x72, 30),
            (0x74, 40),
        ]));
        let reading = TelemetryReading::read(&mut board).unwrap();
        assert_eq!(
            reading,
            TelemetryReading {
                servo: 1500,
                brightness: [10, 20, 30, 40]
            }
        );
    }

    #[test]
    fn missing_device_fails_to_open() {
        assert!(I2cDevice::open("/nonexistent/i2c-9", TELEMETRY_SLAVE_ADDRESS).is_err());
    }
}
