//! Command line and file configuration for `adns-connect`.
//!
//! Settings come from an optional TOML file and are overridden by explicit
//! command line flags. Both are resolved into [`Settings`] once at startup.
//!
//! ```toml
//! [bus]
//! device = "/dev/spidev0.0"
//! speed_hz = 500000
//! delay_usecs = 75
//! bits_per_word = 8
//! cpha = true
//! cpol = true
//!
//! [server]
//! listen = "0.0.0.0:3080"
//! client_timeout_ms = 60000
//!
//! [sensor]
//! busy_poll_limit = 1000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::adns3080::DEFAULT_BUSY_POLL_LIMIT;
use crate::errors::{DriverError, Result};
use crate::spi::{SpiMode, SpiSettings, SpiTiming};

const DEFAULT_LISTEN: &str = "0.0.0.0:3080";
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-0";

#[derive(Parser, Debug, Default)]
#[command(
    name = "adns-connect",
    about = "Read motion and raw frames from an ADNS-3080 over spidev"
)]
pub struct Cli {
    /// TOML file with bus, server and sensor defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    // general
    /// Log file to write motion samples to (default: stdout)
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,
    /// Grab a single raw frame and print it
    #[arg(short = 'g', long)]
    pub grab: bool,
    /// Log auxiliary I2C telemetry from this device (e.g. /dev/i2c-0)
    #[arg(short = 'i', long = "i2c", num_args = 0..=1, default_missing_value = DEFAULT_I2C_DEVICE)]
    pub i2c: Option<PathBuf>,
    /// Serve raw frame grabs over TCP
    #[arg(short = 'k', long)]
    pub socket: bool,
    /// Address to listen on in socket mode
    #[arg(long)]
    pub listen: Option<String>,
    /// Drop socket clients idle for this long, 0 disables
    #[arg(long)]
    pub client_timeout_ms: Option<u64>,
    /// Keep sampling until interrupted
    #[arg(short = 'r', long)]
    pub run: bool,
    /// Sampling run time in seconds
    #[arg(short = 't', long, default_value_t = 0.0)]
    pub time: f64,
    /// Be verbose
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// Be very verbose
    #[arg(short = 'w', long)]
    pub werbose: bool,

    // ADNS specific
    /// Set auto frame and shutter period
    #[arg(short = 'a', long = "auto")]
    pub automatic: bool,
    /// Set fixed frame and shutter period
    #[arg(short = 'm', long)]
    pub manual: bool,
    /// Set shutter period maximum bound
    #[arg(short = 'S', long)]
    pub shutter: Option<u16>,
    /// Set resolution to high (1600 cpi)
    #[arg(short = 'X', long)]
    pub highres: bool,
    /// Extended config polls before a bounds write gives up, 0 polls forever
    #[arg(long)]
    pub busy_polls: Option<u32>,

    // SPI specific
    /// SPI device to use
    #[arg(short = 'D', long)]
    pub device: Option<PathBuf>,
    /// Max speed (Hz)
    #[arg(short = 's', long)]
    pub speed: Option<u32>,
    /// Delay (usec)
    #[arg(short = 'd', long)]
    pub delay: Option<u16>,
    /// Bits per word
    #[arg(short = 'b', long)]
    pub bpw: Option<u8>,
    /// Chip select active high
    #[arg(short = 'C', long)]
    pub cs_high: bool,
    /// Clock phase
    #[arg(short = 'H', long)]
    pub cpha: bool,
    /// Clock polarity
    #[arg(short = 'O', long)]
    pub cpol: bool,
    /// Loopback
    #[arg(short = 'l', long = "loop")]
    pub loopback: bool,
    /// Least significant bit first
    #[arg(short = 'L', long)]
    pub lsb: bool,
    /// SI/SO signals shared
    #[arg(short = '3', long = "3wire")]
    pub three_wire: bool,
    /// No chip select
    #[arg(short = 'N', long)]
    pub no_cs: bool,
    /// Slave pulls low to pause
    #[arg(short = 'R', long)]
    pub ready: bool,
}

impl Cli {
    /// 0 = environment level, 1 = debug, 2 = trace.
    pub fn verbosity(&self) -> u8 {
        if self.werbose {
            2
        } else if self.verbose {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bus: BusSection,
    pub server: ServerSection,
    pub sensor: SensorSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSection {
    pub device: PathBuf,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cpha: bool,
    pub cpol: bool,
    pub cs_high: bool,
    pub lsb_first: bool,
    pub three_wire: bool,
    pub loopback: bool,
    pub no_cs: bool,
    pub ready: bool,
}

impl Default for BusSection {
    fn default() -> Self {
        let spi = SpiSettings::default();
        Self {
            device: spi.device,
            speed_hz: spi.timing.speed_hz,
            delay_usecs: spi.timing.delay_usecs,
            bits_per_word: spi.timing.bits_per_word,
            cpha: false,
            cpol: false,
            cs_high: false,
            lsb_first: false,
            three_wire: false,
            loopback: false,
            no_cs: false,
            ready: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub listen: String,
    /// 0 disables the timeout.
    pub client_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSection {
    /// 0 polls the busy flag without limit.
    pub busy_poll_limit: u32,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            busy_poll_limit: DEFAULT_BUSY_POLL_LIMIT,
        }
    }
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| DriverError::Config(e.to_string()))
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub spi: SpiSettings,
    pub listen: String,
    pub client_timeout: Option<Duration>,
    pub busy_poll_limit: Option<u32>,
}

impl Settings {
    /// Apply command line overrides on top of the file configuration.
    pub fn resolve(file: FileConfig, cli: &Cli) -> Result<Self> {
        let bus = file.bus;
        let timing = SpiTiming {
            delay_usecs: cli.delay.unwrap_or(bus.delay_usecs),
            speed_hz: cli.speed.unwrap_or(bus.speed_hz),
            bits_per_word: cli.bpw.unwrap_or(bus.bits_per_word),
        };
        if timing.speed_hz == 0 {
            return Err(DriverError::Config("spi speed must be non-zero".into()));
        }
        if timing.bits_per_word == 0 {
            return Err(DriverError::Config("bits per word must be non-zero".into()));
        }

        let mut mode = SpiMode::empty();
        for (flag, enabled) in [
            (SpiMode::CPHA, bus.cpha || cli.cpha),
            (SpiMode::CPOL, bus.cpol || cli.cpol),
            (SpiMode::CS_HIGH, bus.cs_high || cli.cs_high),
            (SpiMode::LSB_FIRST, bus.lsb_first || cli.lsb),
            (SpiMode::THREE_WIRE, bus.three_wire || cli.three_wire),
            (SpiMode::LOOPBACK, bus.loopback || cli.loopback),
            (SpiMode::NO_CS, bus.no_cs || cli.no_cs),
            (SpiMode::READY, bus.ready || cli.ready),
        ] {
            mode.set(flag, enabled);
        }

        let timeout_ms = cli
            .client_timeout_ms
            .unwrap_or(file.server.client_timeout_ms);
        let polls = cli.busy_polls.unwrap_or(file.sensor.busy_poll_limit);

        Ok(Self {
            spi: SpiSettings {
                device: cli.device.clone().unwrap_or(bus.device),
                mode,
                timing,
            },
            listen: cli.listen.clone().unwrap_or(file.server.listen),
            client_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            busy_poll_limit: (polls > 0).then_some(polls),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_without_file_or_flags() {
        let cli = Cli::try_parse_from(["adns-connect"]).unwrap();
        let settings = Settings::resolve(FileConfig::default(), &cli).unwrap();
        assert_eq!(settings.spi, SpiSettings::default());
        assert_eq!(settings.listen, "0.0.0.0:3080");
        assert_eq!(settings.client_timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.busy_poll_limit, Some(1000));
    }

    #[test]
    fn file_values_are_overridden_by_flags() {
        let file = FileConfig::from_toml(
            r#"
            [bus]
            device = "/dev/spidev1.0"
            speed_hz = 1000000
            cpha = true

            [server]
            listen = "127.0.0.1:9000"
            client_timeout_ms = 0

            [sensor]
            busy_poll_limit = 0
            "#,
        )
        .unwrap();
        let cli =
            Cli::try_parse_from(["adns-connect", "-s", "250000", "-O", "-d", "20"]).unwrap();
        let settings = Settings::resolve(file, &cli).unwrap();

        assert_eq!(settings.spi.device, PathBuf::from("/dev/spidev1.0"));
        assert_eq!(settings.spi.timing.speed_hz, 250_000);
        assert_eq!(settings.spi.timing.delay_usecs, 20);
        assert_eq!(settings.spi.timing.bits_per_word, 8);
        assert_eq!(settings.spi.mode, SpiMode::CPHA | SpiMode::CPOL);
        assert_eq!(settings.listen, "127.0.0.1:9000");
        assert_eq!(settings.client_timeout, None);
        assert_eq!(settings.busy_poll_limit, None);
    }

    #[test]
    fn every_mode_flag_maps_to_its_spidev_bit() {
        let cli = Cli::try_parse_from([
            "adns-connect", "-C", "-H", "-l", "-L", "-O", "-3", "-N", "-R",
        ])
        .unwrap();
        let settings = Settings::resolve(FileConfig::default(), &cli).unwrap();
        assert_eq!(settings.spi.mode, SpiMode::all());
        assert_eq!(settings.spi.mode.bits(), 0xff);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::from_toml("[bus]\nbaud = 9600\n").is_err());
    }

    #[test]
    fn short_flags_parse() {
        let cli = Cli::try_parse_from([
            "adns-connect", "-D", "/dev/spidev0.1", "-S", "500", "-m", "-X", "-k", "-w", "-3",
        ])
        .unwrap();
        assert_eq!(cli.device, Some(PathBuf::from("/dev/spidev0.1")));
        assert_eq!(cli.shutter, Some(500));
        assert!(cli.manual && cli.highres && cli.socket && cli.three_wire);
        assert_eq!(cli.verbosity(), 2);
    }

    #[test]
    fn i2c_flag_takes_optional_device() {
        let cli = Cli::try_parse_from(["adns-connect", "-i", "/dev/i2c-1"]).unwrap();
        assert_eq!(cli.i2c, Some(PathBuf::from("/dev/i2c-1")));
        let cli = Cli::try_parse_from(["adns-connect", "--i2c"]).unwrap();
        assert_eq!(cli.i2c, Some(PathBuf::from("/dev/i2c-0")));
    }

    #[test]
    fn zero_speed_is_rejected() {
        let cli = Cli::try_parse_from(["adns-connect", "-s", "0"]).unwrap();
        assert!(matches!(
            Settings::resolve(FileConfig::default(), &cli),
            Err(DriverError::Config(_))
        ));
    }
}
