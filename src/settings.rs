//! Run-time settings
//!
//! # Design
//! All binaries share one [Settings] tree. It is built from the defaults, then a JSON file
//! (`--config <path>`, missing keys keep their defaults) and finally individual values addressed
//! by their path (`--set /thermostat/loops/0/pid/kp=6.5`, the value is JSON). `--dump` prints the
//! effective settings and exits.
use std::path::Path;

use ad7124::{DataRate, Iout, Pga};
use arbitrary_int::{u4, u5};
use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

use crate::acquisition::{Poll, SENSORS};
use crate::convert::Calibration;
use crate::thermostat::{default_loops, ControlLoop, LOOPS};
use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Spi {
    /// SPI bus number (`/dev/spidevB.x`)
    pub bus: Leaf<u8>,
    /// Chip select (`/dev/spidevx.S`)
    pub chip_select: Leaf<u8>,
    /// Clock frequency (Hz)
    pub clock: Leaf<u32>,
    /// SPI mode (0 to 3)
    pub mode: Leaf<u8>,
}

impl Default for Spi {
    fn default() -> Self {
        Self {
            bus: Leaf(0),
            chip_select: Leaf(0),
            clock: Leaf(50_000),
            mode: Leaf(3),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Adc {
    pub data_rate: Leaf<DataRate>,
    pub gain: Leaf<Pga>,
    /// Excitation current output pin (AIN)
    pub excitation_pin: Leaf<u4>,
    pub excitation: Leaf<Iout>,
    /// (AINP, AINM) input pair of each sensor
    pub inputs: Leaf<[[u5; 2]; SENSORS]>,
    /// Data-ready poll interval (µs)
    pub poll_interval: Leaf<u32>,
    /// Data-ready timeout (µs)
    pub poll_timeout: Leaf<u32>,
}

impl Default for Adc {
    fn default() -> Self {
        let setup = ad7124::Setup::default();
        let poll = Poll::default();
        Self {
            data_rate: Leaf(setup.data_rate),
            gain: Leaf(setup.gain),
            excitation_pin: Leaf(setup.excitation_pin),
            excitation: Leaf(setup.excitation),
            inputs: Leaf(crate::acquisition::INPUTS),
            poll_interval: Leaf(poll.interval.ticks()),
            poll_timeout: Leaf(poll.timeout.ticks()),
        }
    }
}

impl Adc {
    pub fn setup(&self) -> ad7124::Setup {
        ad7124::Setup {
            data_rate: *self.data_rate,
            gain: *self.gain,
            excitation_pin: *self.excitation_pin,
            excitation: *self.excitation,
            ..Default::default()
        }
    }

    pub fn poll(&self) -> Poll {
        Poll {
            interval: fugit::MicrosDurationU32::from_ticks(*self.poll_interval),
            timeout: fugit::MicrosDurationU32::from_ticks(*self.poll_timeout),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Supply {
    /// I2C bus number (`/dev/i2c-N`)
    pub bus: Leaf<u8>,
    /// 7 bit PMBus address
    pub address: Leaf<u8>,
    /// Installed module pages
    pub pages: Leaf<heapless::Vec<u8, { pmbus::PAGES }>>,
}

impl Default for Supply {
    fn default() -> Self {
        Self {
            bus: Leaf(1),
            address: Leaf(pmbus::ADDRESS),
            pages: Leaf(
                heapless::Vec::from_slice(&[1, 2, 3, 4]).unwrap_or_default(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Thermostat {
    /// Control cycle period (ms)
    pub period: Leaf<u32>,
    pub loops: [ControlLoop; LOOPS],
}

impl Default for Thermostat {
    fn default() -> Self {
        Self {
            period: Leaf(1000),
            loops: default_loops(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Telemetry {
    /// Measurement name of temperature and control points
    pub measurement: Leaf<String>,
    /// CSV log of temperatures and control outputs
    pub csv: Leaf<Option<String>>,
    /// Line protocol log of temperatures and control outputs
    pub line_protocol: Leaf<Option<String>>,
    /// CSV log of module read-backs
    pub module_log: Leaf<Option<String>>,
    /// Module read-back interval (s)
    pub module_interval: Leaf<u32>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            measurement: Leaf("stand".into()),
            csv: Leaf(Some("temperatures.csv".into())),
            line_protocol: Leaf(None),
            module_log: Leaf(Some("module_log.csv".into())),
            module_interval: Leaf(5),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Settings {
    /// Log level filter
    pub log_level: Leaf<LogLevel>,
    pub spi: Spi,
    pub adc: Adc,
    /// ADC code to resistance anchors
    pub calibration: Calibration,
    pub supply: Supply,
    pub thermostat: Thermostat,
    pub telemetry: Telemetry,
}

/// Log level filter with an `Info` default.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub log::LevelFilter);

impl Default for LogLevel {
    fn default() -> Self {
        Self(log::LevelFilter::Info)
    }
}

impl Settings {
    pub fn log_level(&self) -> log::LevelFilter {
        let LogLevel(level) = *self.log_level;
        level
    }

    /// Load from a JSON file. Missing keys take their default.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Apply a `/path=value` override with a JSON value.
    pub fn set(&mut self, assignment: &str) -> Result<(), Error> {
        let (path, value) = assignment.split_once('=').ok_or_else(|| {
            Error::Settings(format!("expected /path=value: {assignment}"))
        })?;
        miniconf::json::set(self, path, value.as_bytes())
            .map_err(|e| Error::Settings(format!("{path}: {e:?}")))?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Settings and remaining positional arguments of a command line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub settings: Settings,
    /// `--dump` was given
    pub dump: bool,
    pub free: Vec<String>,
}

impl Args {
    /// Parse `--config <path>`, `--set /path=value` (repeatable) and `--dump`.
    ///
    /// The config file is applied before any override regardless of argument order.
    pub fn parse<I>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = None;
        let mut overrides = Vec::new();
        let mut dump = false;
        let mut free = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = Some(args.next().ok_or_else(|| {
                        Error::Settings("--config needs a path".into())
                    })?);
                }
                "--set" | "-s" => {
                    overrides.push(args.next().ok_or_else(|| {
                        Error::Settings("--set needs /path=value".into())
                    })?);
                }
                "--dump" => dump = true,
                _ => free.push(arg),
            }
        }
        let mut settings = match config {
            Some(path) => Settings::load(Path::new(&path))?,
            None => Settings::default(),
        };
        for o in overrides.iter() {
            settings.set(o)?;
        }
        Ok(Self {
            settings,
            dump,
            free,
        })
    }

    /// Parse the process arguments. Prints the settings and exits for `--dump`.
    pub fn from_env() -> Result<Self, Error> {
        let args = Self::parse(std::env::args().skip(1))?;
        if args.dump {
            println!("{}", args.settings.to_json()?);
            std::process::exit(0);
        }
        Ok(args)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::convert::Anchor;
    use crate::thermostat::Quantity;

    fn args(a: &[&str]) -> Result<Args, Error> {
        Args::parse(a.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.log_level(), log::LevelFilter::Info);
        assert_eq!(*s.spi.clock, 50_000);
        assert_eq!(*s.spi.mode, 3);
        assert_eq!(*s.supply.address, 0x50);
        assert_eq!(&s.supply.pages[..], [1, 2, 3, 4]);
        assert_eq!(*s.adc.poll_interval, 1_000);
        assert_eq!(*s.adc.poll_timeout, 500_000);
        assert_eq!(*s.calibration.high.code, 11_054_300);
        assert_eq!(*s.telemetry.module_interval, 5);
        assert_eq!(*s.thermostat.period, 1000);
    }

    #[test]
    fn overrides() {
        let a = args(&[
            "read-volt",
            "--set",
            "/thermostat/loops/1/pid/kp=2.5",
            "-s",
            "/thermostat/loops/1/quantity=\"Current\"",
            "--set",
            "/supply/pages=[1,4]",
            "4",
        ])
        .unwrap();
        assert_eq!(a.free, ["read-volt", "4"]);
        let l = &a.settings.thermostat.loops[1];
        assert_eq!(*l.pid.kp, 2.5);
        assert_eq!(*l.quantity, Quantity::Current);
        assert_eq!(&a.settings.supply.pages[..], [1, 4]);
        assert!(!a.dump);
    }

    #[test]
    fn bad_override() {
        assert!(matches!(
            args(&["--set", "/thermostat/period"]),
            Err(Error::Settings(_))
        ));
        assert!(args(&["--set", "/nope=1"]).is_err());
        assert!(args(&["--set", "/spi/mode=\"x\""]).is_err());
        assert!(args(&["--config"]).is_err());
    }

    #[test]
    fn json_roundtrip() {
        let mut s = Settings::default();
        *s.thermostat.loops[2].enabled = true;
        *s.telemetry.csv = None;
        let json = s.to_json().unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        let partial: Settings =
            serde_json::from_str(r#"{"spi": {"clock": 100000}}"#).unwrap();
        assert_eq!(*partial.spi.clock, 100_000);
        assert_eq!(*partial.spi.mode, 3);
        assert_eq!(partial.adc, Adc::default());
    }

    #[test]
    fn partial_calibration() {
        let s: Settings = serde_json::from_str(
            r#"{"calibration": {"high": {"code": 11054300, "ohms": 199.5}}}"#,
        )
        .unwrap();
        assert_eq!(s.calibration, Calibration::default());

        let s: Settings = serde_json::from_str(
            r#"{"calibration": {"low": {"code": 1600000, "ohms": 30.5}}}"#,
        )
        .unwrap();
        assert_eq!(s.calibration.high, Calibration::default().high);
        assert_eq!(s.calibration.low, Anchor::new(1_600_000, 30.5));

        // Half an anchor is rejected
        assert!(serde_json::from_str::<Settings>(
            r#"{"calibration": {"low": {"ohms": 30.5}}}"#
        )
        .is_err());
    }
}
