//! Mock bus emulating an ADNS-3080 register file for testing.
//!
//! Reads answer one byte pair late, like the real sensor, writes land in the
//! register file, and the pixel burst address streams a caller-supplied
//! pixel dump. Failures can be injected to exercise transport error paths.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{DriverError, Result};
use crate::frame::{PIXEL_DUMP_LEN, START_OF_FRAME};
use crate::registers::{Register, WRITE_BIT};
use crate::spi::{Bus, SpiTiming};

const REGISTER_SPACE: usize = 0x80;

/// Cloneable handle; all clones share one emulated sensor.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

struct MockBusInner {
    registers: [u8; REGISTER_SPACE],
    pixel_stream: Vec<u8>,
    transactions: Vec<Vec<u8>>,
    failing: bool,
    truncate: Option<usize>,
    busy_polls: u32,
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            inner: Arc::new(Mutex::new(MockBusInner {
                registers: [0; REGISTER_SPACE],
                pixel_stream: Vec::new(),
                transactions: Vec::new(),
                failing: false,
                truncate: None,
                busy_polls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockBusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_register(&self, reg: Register, value: u8) {
        self.lock().registers[reg.addr() as usize] = value;
    }

    pub fn register(&self, reg: Register) -> u8 {
        self.lock().registers[reg.addr() as usize]
    }

    /// Bytes returned after the pixel burst address byte.
    pub fn set_pixel_stream(&self, stream: Vec<u8>) {
        self.lock().pixel_stream = stream;
    }

    /// Fail every transaction with a transport error while set.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Return at most `len` received bytes per transaction.
    pub fn set_truncate(&self, len: Option<usize>) {
        self.lock().truncate = len;
    }

    /// Report the busy flag for the next `polls` Extended_Config reads.
    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls = polls;
    }

    /// Every transmitted buffer, in order.
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.lock().transactions.clone()
    }

    /// A pixel dump with `lead` filler bytes before the start marker, where
    /// pixel `n` of the frame has value `n % 64`.
    pub fn synthetic_pixel_stream(lead: usize) -> Vec<u8> {
        (0..PIXEL_DUMP_LEN - 1)
            .map(|i| {
                if i < lead {
                    0x00
                } else if i == lead {
                    START_OF_FRAME
                } else {
                    0x80 | ((i - lead) % 64) as u8
                }
            })
            .collect()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBusInner {
    fn read_register(&mut self, addr: u8) -> u8 {
        let mut value = self.registers[addr as usize];
        if addr == Register::ExtendedConfig.addr() && self.busy_polls > 0 {
            self.busy_polls -= 1;
            value |= 0x80;
        }
        value
    }
}

impl Bus for MockBus {
    fn transact(&mut self, tx: &[u8], _timing: &SpiTiming) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(DriverError::Transport("mock bus failure".into()));
        }
        inner.transactions.push(tx.to_vec());

        let mut rx = vec![0u8; tx.len()];
        for (k, pair) in tx.chunks(2).enumerate() {
            let addr = pair[0];
            if addr & WRITE_BIT != 0 {
                if let Some(&value) = pair.get(1) {
                    inner.registers[(addr & !WRITE_BIT) as usize] = value;
                }
            } else if addr == Register::PixelBurst.addr() {
                let start = 2 * k + 1;
                let stream = inner.pixel_stream.clone();
                for (dst, src) in rx[start..].iter_mut().zip(stream) {
                    *dst = src;
                }
                break;
            } else {
                let value = inner.read_register(addr);
                if let Some(slot) = rx.get_mut(2 * k + 3) {
                    *slot = value;
                }
            }
        }

        if let Some(len) = inner.truncate {
            rx.truncate(len);
        }
        Ok(rx)
    }
}
