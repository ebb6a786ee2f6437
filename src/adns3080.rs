//! ADNS-3080 protocol engine.
//!
//! This module turns register transactions into decoded sensor state and
//! implements the two acquisition modes of the sensor:
//!
//! - **Motion burst**: one transfer reading identity, motion, quality and
//!   exposure registers as a consistent snapshot.
//! - **Frame burst**: trigger a frame capture, wait out the exposure, then
//!   pull the serialized pixel stream and synchronise on its start marker.
//!
//! # Read latency
//!
//! Reads are addressed one register at a time. The sensor answers an address
//! one byte pair later, so a read of `n` registers is sent as `n` address
//! pairs plus one trailing pair, and the k-th value sits at offset `2k + 3`
//! of the received buffer.
//!
//! # State ownership
//!
//! [`SensorState`] lives inside [`Adns3080`]. It is only replaced after a
//! transfer completed; a failed transfer leaves the previous snapshot as is.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::errors::{DriverError, Result};
use crate::frame::{self, RawFrame, FRAME_PIXELS, PIXEL_DUMP_LEN};
use crate::registers::{
    self, Register, CLOCKS_PER_US, DEFAULT_FRAME_PERIOD, FRAME_CAPTURE_TRIGGER, PRODUCT_ID,
};
use crate::spi::{Bus, SpiTiming};

// ============================================================================
// Constants
// ============================================================================

/// Offset of the first read value in a received buffer.
const REPLY_OFFSET: usize = 3;

/// Lower frame period bound programmed by `set_fps_bounds`, in clock cycles.
pub const FRAME_PERIOD_MIN_BOUND: u16 = 3200;

/// Default number of extended config polls before giving up on a busy sensor.
pub const DEFAULT_BUSY_POLL_LIMIT: u32 = 1000;

/// Fixed part of the frame capture wait.
const CAPTURE_SETTLE: Duration = Duration::from_micros(10);

/// Frame periods to wait after triggering a capture.
const CAPTURE_FRAME_PERIODS: u64 = 3;

const MOTION_BURST: [Register; 13] = [
    Register::ProductId,
    Register::RevisionId,
    Register::Motion,
    Register::DeltaX,
    Register::DeltaY,
    Register::Squal,
    Register::PixelSum,
    Register::MaximumPixel,
    Register::ShutterUpper,
    Register::ShutterLower,
    Register::FramePeriodUpper,
    Register::FramePeriodLower,
    Register::InverseProductId,
];

const BOUNDS_READ: [Register; 6] = [
    Register::FramePeriodMaxBoundUpper,
    Register::FramePeriodMaxBoundLower,
    Register::FramePeriodMinBoundUpper,
    Register::FramePeriodMinBoundLower,
    Register::ShutterMaxBoundUpper,
    Register::ShutterMaxBoundLower,
];

// ============================================================================
// Register Views
// ============================================================================

/// Decoded Motion register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionStatus {
    /// MOT: motion occurred since the last report; deltas are meaningful.
    pub motion: bool,
    /// OVF: the delta registers overflowed since the last report.
    pub overflow: bool,
    /// RES: resolution bit as reported by the sensor.
    pub res: bool,
}

impl MotionStatus {
    const MOT: u8 = 1 << 7;
    const OVF: u8 = 1 << 4;
    const RES: u8 = 1 << 0;

    pub fn from_bits(bits: u8) -> Self {
        Self {
            motion: bits & Self::MOT != 0,
            overflow: bits & Self::OVF != 0,
            res: bits & Self::RES != 0,
        }
    }
}

/// Decoded Extended_Config register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedConfig {
    /// Bound registers are still being loaded; writes must wait.
    pub busy: bool,
    pub serial_npu: bool,
    /// NAGC: automatic gain control disabled.
    pub fixed_gain: bool,
    /// Fixed_FR: frame rate fixed at the max bound instead of auto.
    pub fixed_frame_rate: bool,
}

impl ExtendedConfig {
    const BUSY: u8 = 1 << 7;
    const SERIAL_NPU: u8 = 1 << 2;
    const NAGC: u8 = 1 << 1;
    const FIXED_FR: u8 = 1 << 0;

    /// Fixed frame rate and shutter at the programmed bounds.
    pub fn manual() -> Self {
        Self {
            fixed_gain: true,
            fixed_frame_rate: true,
            ..Default::default()
        }
    }

    /// Sensor picks frame rate and shutter on its own.
    pub fn automatic() -> Self {
        Self::default()
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            busy: bits & Self::BUSY != 0,
            serial_npu: bits & Self::SERIAL_NPU != 0,
            fixed_gain: bits & Self::NAGC != 0,
            fixed_frame_rate: bits & Self::FIXED_FR != 0,
        }
    }

    pub fn bits(self) -> u8 {
        (if self.busy { Self::BUSY } else { 0 })
            | (if self.serial_npu { Self::SERIAL_NPU } else { 0 })
            | (if self.fixed_gain { Self::NAGC } else { 0 })
            | (if self.fixed_frame_rate { Self::FIXED_FR } else { 0 })
    }
}

/// Configuration_bits register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Configuration {
    /// 1600 counts per inch instead of 400.
    pub high_resolution: bool,
}

impl Configuration {
    const RES: u8 = 1 << 4;

    pub fn bits(self) -> u8 {
        if self.high_resolution {
            Self::RES
        } else {
            0
        }
    }
}

// ============================================================================
// Sensor State
// ============================================================================

/// Last known register values of the sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorState {
    pub product_id: u8,
    pub inverse_product_id: u8,
    pub revision: u8,
    pub motion: MotionStatus,
    /// Only meaningful when `motion.motion` is set for this sample.
    pub delta_x: i8,
    pub delta_y: i8,
    /// Surface quality, already scaled by 4 from the raw register.
    pub squal: u16,
    pub pixel_sum: u8,
    pub maximum_pixel: u8,
    pub shutter: u16,
    pub frame_period: u16,
    pub frame_period_max: u16,
    pub frame_period_min: u16,
    pub shutter_max: u16,
    pub ext_config: ExtendedConfig,
}

impl SensorState {
    /// `product_id + inverse_product_id`; 0xFF on a good read.
    pub fn id_checksum(&self) -> u16 {
        self.product_id as u16 + self.inverse_product_id as u16
    }

    pub fn is_identity_valid(&self) -> bool {
        self.id_checksum() == 0xFF
    }

    pub fn frame_rate_hz(&self) -> Option<f64> {
        registers::frame_rate_hz(self.frame_period)
    }
}

// ============================================================================
// Register Transactions
// ============================================================================

/// Byte sequence for one bus transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTransaction {
    tx: Vec<u8>,
}

impl RegisterTransaction {
    /// Addressed reads of `regs`, followed by the trailing pair that clocks
    /// out the last value.
    pub fn read(regs: &[Register]) -> Self {
        let mut tx = Vec::with_capacity(2 * regs.len() + 2);
        for reg in regs {
            tx.extend_from_slice(&[reg.addr(), 0x00]);
        }
        tx.extend_from_slice(&[0x00, 0x00]);
        Self { tx }
    }

    /// Register writes, one `(address | write bit, value)` pair each.
    pub fn write(pairs: &[(Register, u8)]) -> Self {
        let tx = pairs
            .iter()
            .flat_map(|&(reg, value)| [reg.write_addr(), value])
            .collect();
        Self { tx }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.tx
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Value of the `index`-th register of a read transaction.
    pub fn read_value(rx: &[u8], index: usize) -> u8 {
        rx[2 * index + REPLY_OFFSET]
    }

    /// Big-endian 16-bit value from two consecutive reads, upper register first.
    pub fn read_u16(rx: &[u8], upper_index: usize) -> u16 {
        u16::from_be_bytes([
            Self::read_value(rx, upper_index),
            Self::read_value(rx, upper_index + 1),
        ])
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Time to wait between triggering a frame capture and reading it out.
pub fn capture_wait(frame_period: u16) -> Duration {
    let period = if frame_period == 0 {
        DEFAULT_FRAME_PERIOD
    } else {
        frame_period
    };
    let cycles = CAPTURE_FRAME_PERIODS * period as u64;
    CAPTURE_SETTLE + Duration::from_micros(cycles.div_ceil(CLOCKS_PER_US))
}

/// ADNS-3080 driver.
///
/// # Example
/// ```ignore
/// let bus = SpidevBus::open(&SpiSettings::default())?;
/// let mut sensor = Adns3080::new(bus, SpiTiming::default());
///
/// let state = sensor.read_motion_burst()?;
/// println!("dx={} dy={} squal={}", state.delta_x, state.delta_y, state.squal);
///
/// let mut pixels = [0u8; FRAME_PIXELS];
/// if sensor.read_frame_burst(&mut pixels)? == FRAME_PIXELS { /* use frame */ }
/// ```
pub struct Adns3080<B: Bus> {
    bus: B,
    timing: SpiTiming,
    state: SensorState,
    busy_poll_limit: Option<u32>,
}

impl<B: Bus> Adns3080<B> {
    pub fn new(bus: B, timing: SpiTiming) -> Self {
        Self {
            bus,
            timing,
            state: SensorState::default(),
            busy_poll_limit: Some(DEFAULT_BUSY_POLL_LIMIT),
        }
    }

    /// Bound the busy poll before bound writes. `None` polls forever.
    pub fn with_busy_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.busy_poll_limit = limit;
        self
    }

    pub fn state(&self) -> &SensorState {
        &self.state
    }


    // ------------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------------

    /// Read all motion and exposure registers in one transfer.
    pub fn read_motion_burst(&mut self) -> Result<&SensorState> {
        let rx = self.transact(&RegisterTransaction::read(&MOTION_BURST))?;
        let value = |i| RegisterTransaction::read_value(&rx, i);

        let mut next = self.state.clone();
        next.product_id = value(0);
        next.revision = value(1);
        next.motion = MotionStatus::from_bits(value(2));
        next.delta_x = value(3) as i8;
        next.delta_y = value(4) as i8;
        next.squal = 4 * value(5) as u16;
        next.pixel_sum = value(6);
        next.maximum_pixel = value(7);
        next.shutter = RegisterTransaction::read_u16(&rx, 8);
        next.frame_period = RegisterTransaction::read_u16(&rx, 10);
        next.inverse_product_id = value(12);
        self.state = next;

        let s = &self.state;
        if s.product_id != PRODUCT_ID || !s.is_identity_valid() {
            debug!(
                "unexpected identity: product_id={:#04x}, inverse={:#04x}",
                s.product_id, s.inverse_product_id
            );
        }
        debug!(
            "motion burst: mot={} ovf={} res={} dx={} dy={} squal={} pixel_sum={} max_pixel={} shutter={} frame_period={} ({:.1} Hz)",
            s.motion.motion,
            s.motion.overflow,
            s.motion.res,
            s.delta_x,
            s.delta_y,
            s.squal,
            s.pixel_sum,
            s.maximum_pixel,
            s.shutter,
            s.frame_period,
            s.frame_rate_hz().unwrap_or(0.0)
        );
        Ok(&self.state)
    }

    /// Capture one raw frame into `frame`.
    ///
    /// Returns the number of pixels written: [`FRAME_PIXELS`] on success, 0 if
    /// the pixel stream could not be synchronised (in which case `frame` is
    /// untouched). Bus failures are returned as errors. Every call triggers a
    /// new exposure.
    pub fn read_frame_burst(&mut self, frame: &mut [u8; FRAME_PIXELS]) -> Result<usize> {
        match self.capture_into(frame) {
            Err(DriverError::SyncLost(reason)) => {
                warn!("raw frame capture failed: {}", reason);
                Ok(0)
            }
            other => other,
        }
    }

    /// Capture one raw frame, reporting a lost sync as an error.
    pub fn capture_frame(&mut self) -> Result<RawFrame> {
        let mut frame = RawFrame::new();
        self.capture_into(frame.pixels_mut())?;
        Ok(frame)
    }

    fn capture_into(&mut self, frame: &mut [u8; FRAME_PIXELS]) -> Result<usize> {
        debug!("raw frame capture");
        self.transact(&RegisterTransaction::write(&[(
            Register::FrameCapture,
            FRAME_CAPTURE_TRIGGER,
        )]))?;

        let wait = capture_wait(self.state.frame_period);
        trace!("waiting {:?} for frame capture", wait);
        thread::sleep(wait);

        // Reading Frame_Capture resets the pixel counter; without it the
        // first pixel of the dump is lost.
        self.transact(&RegisterTransaction {
            tx: vec![Register::FrameCapture.addr(), 0x00],
        })?;

        let mut dump = RegisterTransaction {
            tx: vec![0u8; PIXEL_DUMP_LEN],
        };
        dump.tx[0] = Register::PixelBurst.addr();
        let rx = self.transact(&dump)?;

        frame::extract_frame(&rx, frame)
    }

    // ------------------------------------------------------------------------
    // Configuration Readback
    // ------------------------------------------------------------------------

    /// Read the frame period and shutter bound registers.
    pub fn get_fps_bounds(&mut self) -> Result<&SensorState> {
        let rx = self.transact(&RegisterTransaction::read(&BOUNDS_READ))?;
        self.state.frame_period_max = RegisterTransaction::read_u16(&rx, 0);
        self.state.frame_period_min = RegisterTransaction::read_u16(&rx, 2);
        self.state.shutter_max = RegisterTransaction::read_u16(&rx, 4);
        debug!(
            "bounds: frame_period_max={} frame_period_min={} shutter_max={}",
            self.state.frame_period_max, self.state.frame_period_min, self.state.shutter_max
        );
        Ok(&self.state)
    }

    /// Read Extended_Config.
    pub fn get_ext_conf(&mut self) -> Result<ExtendedConfig> {
        let rx = self.transact(&RegisterTransaction::read(&[Register::ExtendedConfig]))?;
        let conf = ExtendedConfig::from_bits(RegisterTransaction::read_value(&rx, 0));
        trace!("extended config: {:?}", conf);
        self.state.ext_config = conf;
        Ok(conf)
    }

    // ------------------------------------------------------------------------
    // Configuration Control
    // ------------------------------------------------------------------------

    /// Write Configuration_bits. No readback.
    pub fn set_conf(&mut self, conf: Configuration) -> Result<()> {
        debug!("set configuration: {:?}", conf);
        self.transact(&RegisterTransaction::write(&[(
            Register::Configuration,
            conf.bits(),
        )]))
        .map(|_| ())
    }

    /// Write Extended_Config. The busy bit is read-only and never written.
    pub fn set_ext_conf(&mut self, conf: ExtendedConfig) -> Result<()> {
        let bits = ExtendedConfig { busy: false, ..conf }.bits();
        debug!("set extended configuration: {:#04x}", bits);
        self.transact(&RegisterTransaction::write(&[(
            Register::ExtendedConfig,
            bits,
        )]))
        .map(|_| ())
    }

    /// Program the exposure bounds for a given maximum shutter.
    ///
    /// The minimum frame period is fixed at [`FRAME_PERIOD_MIN_BOUND`] and the
    /// maximum leaves room for the shutter on top of it. Waits for the busy
    /// flag to clear first.
    pub fn set_fps_bounds(&mut self, shutter_max: u16) -> Result<()> {
        let frame_period_min = FRAME_PERIOD_MIN_BOUND;
        let frame_period_max = frame_period_min.checked_add(shutter_max).ok_or_else(|| {
            DriverError::Config(format!(
                "shutter bound {shutter_max} exceeds the frame period range"
            ))
        })?;

        let [fp_max_hi, fp_max_lo] = frame_period_max.to_be_bytes();
        let [fp_min_hi, fp_min_lo] = frame_period_min.to_be_bytes();
        let [sh_max_hi, sh_max_lo] = shutter_max.to_be_bytes();

        // Lower byte first; the sensor latches a bound when its upper byte lands.
        let tx = RegisterTransaction::write(&[
            (Register::FramePeriodMaxBoundLower, fp_max_lo),
            (Register::FramePeriodMaxBoundUpper, fp_max_hi),
            (Register::FramePeriodMinBoundLower, fp_min_lo),
            (Register::FramePeriodMinBoundUpper, fp_min_hi),
            (Register::ShutterMaxBoundLower, sh_max_lo),
            (Register::ShutterMaxBoundUpper, sh_max_hi),
        ]);

        self.wait_until_idle()?;
        self.transact(&tx)?;

        self.state.frame_period_max = frame_period_max;
        self.state.frame_period_min = frame_period_min;
        self.state.shutter_max = shutter_max;
        debug!(
            "bounds written: frame_period_max={} frame_period_min={} shutter_max={}",
            frame_period_max, frame_period_min, shutter_max
        );
        Ok(())
    }

    /// Poll Extended_Config until the busy flag clears.
    ///
    /// Returns the number of polls. Fails with `DeviceBusyTimeout` once the
    /// configured limit is reached; with no limit this can block forever.
    pub fn wait_until_idle(&mut self) -> Result<u32> {
        let mut polls = 0u32;
        loop {
            polls = polls.saturating_add(1);
            if !self.get_ext_conf()?.busy {
                return Ok(polls);
            }
            if let Some(limit) = self.busy_poll_limit {
                if polls >= limit {
                    return Err(DriverError::DeviceBusyTimeout { polls });
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn transact(&mut self, tx: &RegisterTransaction) -> Result<Vec<u8>> {
        let rx = self.bus.transact(tx.bytes(), &self.timing)?;
        if rx.len() < tx.len() {
            return Err(DriverError::ShortTransfer {
                requested: tx.len(),
                transferred: rx.len(),
            });
        }
        Ok(rx)
    }
}
