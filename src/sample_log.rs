//! Tab-separated motion sample log.

use std::io::Write;

use crate::adns3080::SensorState;
use crate::errors::Result;
use crate::i2c::TelemetryReading;

/// Columns written for every motion burst sample.
pub const SAMPLE_COLUMNS: [&str; 10] = [
    "t", "MOT", "dX", "dY", "SQUAL", "shut", "pxSum", "OVF", "RES", "valid",
];

/// Extra columns when I2C telemetry is logged.
pub const TELEMETRY_COLUMNS: [&str; 5] = ["servo", "bright 0", "bright 1", "bright 2", "bright 3"];

/// Writes a header on creation and one row per sample afterwards.
pub struct SampleLog<W: Write> {
    out: W,
    telemetry: bool,
    rows: u64,
}

impl<W: Write> SampleLog<W> {
    pub fn new(mut out: W, telemetry: bool) -> Result<Self> {
        let mut header = SAMPLE_COLUMNS.join("\t");
        if telemetry {
            header.push('\t');
            header.push_str(&TELEMETRY_COLUMNS.join("\t"));
        }
        writeln!(out, "{header}")?;
        Ok(Self {
            out,
            telemetry,
            rows: 0,
        })
    }

    /// Append one sample. `t` is seconds since logging started.
    ///
    /// When the log carries telemetry columns and `telemetry` is `None`, the
    /// columns are left empty so rows stay aligned.
    pub fn write_row(
        &mut self,
        t: f64,
        state: &SensorState,
        telemetry: Option<&TelemetryReading>,
    ) -> Result<()> {
        write!(
            self.out,
            "{:.6}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:#x}",
            t,
            state.motion.motion as u8,
            state.delta_x,
            state.delta_y,
            state.squal,
            state.shutter,
            state.pixel_sum,
            state.motion.overflow as u8,
            state.motion.res as u8,
            state.id_checksum()
        )?;

        if self.telemetry {
            match telemetry {
                Some(t) => write!(
                    self.out,
                    "\t{}\t{}\t{}\t{}\t{}",
                    t.servo, t.brightness[0], t.brightness[1], t.brightness[2], t.brightness[3]
                )?,
                None => write!(self.out, "\t\t\t\t\t")?,
            }
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adns3080::MotionStatus;
    use pretty_assertions::assert_eq;

    fn sample() -> SensorState {
        SensorState {
            product_id: 0x17,
            inverse_product_id: 0xE8,
            motion: MotionStatus::from_bits(0x80),
            delta_x: -3,
            delta_y: 12,
            squal: 84,
            pixel_sum: 99,
            shutter: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn header_and_row_without_telemetry() {
        let mut log = SampleLog::new(Vec::new(), false).unwrap();
        log.write_row(0.25, &sample(), None).unwrap();
        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "t\tMOT\tdX\tdY\tSQUAL\tshut\tpxSum\tOVF\tRES\tvalid");
        assert_eq!(lines[1], "0.250000\t1\t-3\t12\t84\t1024\t99\t0\t0\t0xff");
    }

    #[test]
    fn telemetry_columns_follow_sample() {
        let mut log = SampleLog::new(Vec::new(), true).unwrap();
        let reading = TelemetryReading {
            servo: 1500,
            brightness: [1, 2, 3, 4],
        };
        log.write_row(1.0, &sample(), Some(&reading)).unwrap();
        log.write_row(2.0, &sample(), None).unwrap();
        assert_eq!(log.rows(), 2);

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("valid\tservo\tbright 0\tbright 1\tbright 2\tbright 3"));
        assert!(lines[1].ends_with("0xff\t1500\t1\t2\t3\t4"));
        assert_eq!(lines[2].split('\t').count(), 15);
    }

    #[test]
    fn invalid_identity_shows_in_checksum_column() {
        let mut state = sample();
        state.inverse_product_id = 0;
        let mut log = SampleLog::new(Vec::new(), false).unwrap();
        log.write_row(0.0, &state, None).unwrap();
        let text = String::from_utf8(log.into_inner()).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("\t0x17"));
    }

    #[test]
    fn writes_to_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut log = SampleLog::new(file.reopen().unwrap(), false).unwrap();
            log.write_row(0.0, &sample(), None).unwrap();
            log.flush().unwrap();
        }
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
