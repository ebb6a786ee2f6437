//! ADNS-3080 register map.
//!
//! Only the registers this driver touches are listed. Addresses are 7 bit;
//! the MSB of the address byte selects a write.

/// Set on the address byte of a register write.
pub const WRITE_BIT: u8 = 0x80;

/// Product_ID value reported by a healthy ADNS-3080.
pub const PRODUCT_ID: u8 = 0x17;

/// Internal pixel clock. Frame period and shutter registers count its cycles.
pub const PIXEL_CLOCK_HZ: u32 = 24_000_000;

/// Clock cycles per microsecond.
pub const CLOCKS_PER_US: u64 = (PIXEL_CLOCK_HZ / 1_000_000) as u64;

/// Frame_Period_Max_Bound after power-up. Used when no frame period is known yet.
pub const DEFAULT_FRAME_PERIOD: u16 = 0x7E0E;

/// Value written to Frame_Capture to arm a pixel dump.
pub const FRAME_CAPTURE_TRIGGER: u8 = 0x83;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    ProductId = 0x00,
    RevisionId = 0x01,
    Motion = 0x02,
    DeltaX = 0x03,
    DeltaY = 0x04,
    Squal = 0x05,
    PixelSum = 0x06,
    MaximumPixel = 0x07,
    Configuration = 0x0a,
    ExtendedConfig = 0x0b,
    ShutterLower = 0x0e,
    ShutterUpper = 0x0f,
    FramePeriodLower = 0x10,
    FramePeriodUpper = 0x11,
    FrameCapture = 0x13,
    FramePeriodMaxBoundLower = 0x19,
    FramePeriodMaxBoundUpper = 0x1a,
    FramePeriodMinBoundLower = 0x1b,
    FramePeriodMinBoundUpper = 0x1c,
    ShutterMaxBoundLower = 0x1d,
    ShutterMaxBoundUpper = 0x1e,
    InverseProductId = 0x3f,
    PixelBurst = 0x40,
}

impl Register {
    /// Raw address for a read.
    #[inline]
    pub fn addr(self) -> u8 {
        self as u8
    }

    /// Address byte for a write.
    #[inline]
    pub fn write_addr(self) -> u8 {
        self.addr() | WRITE_BIT
    }
}

/// Convert a frame period in pixel clock cycles to a frame rate.
pub fn frame_rate_hz(frame_period: u16) -> Option<f64> {
    (frame_period > 0).then(|| PIXEL_CLOCK_HZ as f64 / frame_period as f64)
}
