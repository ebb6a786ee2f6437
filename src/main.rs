use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::exit;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use adns_rs::adns3080::{Adns3080, Configuration, ExtendedConfig};
use adns_rs::config::{Cli, FileConfig, Settings};
use adns_rs::i2c::{I2cDevice, TelemetryReading, TELEMETRY_SLAVE_ADDRESS};
use adns_rs::logging::init_rust_logging;
use adns_rs::sample_log::SampleLog;
use adns_rs::server::CommandServer;
use adns_rs::spi::{Bus, SpidevBus};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_rust_logging(cli.verbosity());

    let file_config = match &cli.config {
        Some(path) => FileConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(file_config, &cli)?;

    info!("ADNS connect tool");
    let bus = SpidevBus::open(&settings.spi).context("SPI initialization failed")?;
    let mut sensor =
        Adns3080::new(bus, settings.spi.timing).with_busy_poll_limit(settings.busy_poll_limit);

    configure(&mut sensor, &cli)?;

    if cli.grab || cli.socket {
        warn!("sensor needs to be manually reset after frame grabbing is finished");
    }

    if cli.socket {
        info!("setup server socket on {}", settings.listen);
        let mut server = CommandServer::bind(settings.listen.as_str(), sensor)
            .with_context(|| format!("binding {}", settings.listen))?
            .with_client_timeout(settings.client_timeout);
        server.run()?;
        return Ok(());
    }

    if cli.grab {
        let frame = sensor.capture_frame().context("raw frame capture failed")?;
        print!("{}", frame.hex_dump());
        return Ok(());
    }

    let out: Box<dyn Write> = match &cli.file {
        Some(path) => {
            info!("save values to file: {}", path.display());
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    let mut telemetry = match &cli.i2c {
        Some(path) => Some(I2cDevice::open(path, TELEMETRY_SLAVE_ADDRESS)?),
        None => None,
    };

    let mut log = SampleLog::new(out, telemetry.is_some())?;
    sample(&mut sensor, &mut log, telemetry.as_mut(), &cli)?;
    log.flush()?;
    info!("{} samples written", log.rows());
    Ok(())
}

/// Apply exposure and resolution settings from the command line.
fn configure<B: Bus>(sensor: &mut Adns3080<B>, cli: &Cli) -> Result<()> {
    if cli.manual {
        info!("set frame and shutter period to maximum bounds");
        sensor.set_ext_conf(ExtendedConfig::manual())?;
    }

    if let Some(shutter) = cli.shutter.filter(|&s| s > 0) {
        info!("set shutter period maximum bounds: {}", shutter);
        sensor.set_fps_bounds(shutter)?;
    }

    if cli.automatic {
        info!("set auto frame and shutter period");
        sensor.set_ext_conf(ExtendedConfig::automatic())?;
    }

    if cli.highres {
        info!("set resolution to high");
    }
    sensor.set_conf(Configuration {
        high_resolution: cli.highres,
    })?;
    Ok(())
}

/// Poll motion bursts until the run time elapses, or forever with `--run`.
fn sample<B: Bus, W: Write>(
    sensor: &mut Adns3080<B>,
    log: &mut SampleLog<W>,
    mut telemetry: Option<&mut I2cDevice>,
    cli: &Cli,
) -> Result<()> {
    sensor.get_fps_bounds()?;
    let run_time = Duration::try_from_secs_f64(cli.time).unwrap_or(Duration::ZERO);
    let t0 = Instant::now();

    loop {
        let elapsed = t0.elapsed();
        let state = sensor.read_motion_burst()?.clone();
        let reading = match telemetry.as_deref_mut() {
            Some(device) => Some(TelemetryReading::read(device)?),
            None => None,
        };
        log.write_row(elapsed.as_secs_f64(), &state, reading.as_ref())?;

        thread::sleep(SAMPLE_INTERVAL);
        if !cli.run && elapsed >= run_time {
            return Ok(());
        }
    }
}
