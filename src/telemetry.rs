//! Flat telemetry logs
//!
//! Measurements are reported as [Point]s: a measurement name, a timestamp and a list of named
//! fields. A field without value (e.g. a sensor without valid reading) is reported as missing
//! rather than as a number.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_hal::i2c::I2c;
use pmbus::PowerSupply;

use crate::acquisition::SensorSet;
use crate::thermostat::LOOPS;

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    /// Time since the UNIX epoch.
    pub time: Duration,
    pub fields: Vec<Field>,
}

/// Current time since the UNIX epoch.
pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

impl Point {
    pub fn new(measurement: &str, time: Duration) -> Self {
        Self {
            measurement: measurement.into(),
            time,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
        self
    }

    /// RTD temperatures (K) as `rtd0` to `rtd3`.
    pub fn temperatures(mut self, readings: &SensorSet) -> Self {
        for (i, r) in readings.iter().enumerate() {
            self = self.field(format!("rtd{i}"), r.kelvin());
        }
        self
    }

    /// Control loop outputs as `loop0` to `loop3`.
    pub fn outputs(mut self, outputs: &[Option<f64>; LOOPS]) -> Self {
        for (i, y) in outputs.iter().enumerate() {
            self = self.field(format!("loop{i}"), *y);
        }
        self
    }

    pub fn module(mut self, module: &Module) -> Self {
        let p = module.page;
        self = self.field(format!("module{p}_temperature"), module.temperature);
        self = self.field(format!("module{p}_voltage"), module.voltage);
        self = self.field(format!("module{p}_current"), module.current);
        self.field(format!("module{p}_power"), module.power)
    }
}

pub trait Sink {
    fn write(&mut self, point: &Point) -> io::Result<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, point: &Point) -> io::Result<()> {
        (**self).write(point)
    }
}

impl<S: Sink> Sink for Vec<S> {
    fn write(&mut self, point: &Point) -> io::Result<()> {
        self.iter_mut().try_for_each(|s| s.write(point))
    }
}

/// Comma separated rows with a header line derived from the first point.
///
/// Timestamps are UNIX seconds with millisecond resolution. Missing values are empty cells.
/// The column layout is fixed by the first point. Later points are written positionally.
pub struct Csv<W> {
    writer: W,
    header: bool,
}

impl<W: Write> Csv<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for Csv<W> {
    fn write(&mut self, point: &Point) -> io::Result<()> {
        if !self.header {
            write!(self.writer, "time")?;
            for f in point.fields.iter() {
                write!(self.writer, ",{}", f.name)?;
            }
            writeln!(self.writer)?;
            self.header = true;
        }
        write!(self.writer, "{:.3}", point.time.as_secs_f64())?;
        for f in point.fields.iter() {
            match f.value {
                Some(v) => write!(self.writer, ",{v}")?,
                None => write!(self.writer, ",")?,
            }
        }
        writeln!(self.writer)?;
        self.writer.flush()
    }
}

/// Time-series line protocol: `measurement field=value,... timestamp_ns`.
///
/// Missing values are omitted. Points without any value are dropped.
pub struct LineProtocol<W> {
    writer: W,
}

impl<W: Write> LineProtocol<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl<W: Write> Sink for LineProtocol<W> {
    fn write(&mut self, point: &Point) -> io::Result<()> {
        let fields: Vec<_> = point
            .fields
            .iter()
            .filter_map(|f| {
                f.value.map(|v| {
                    format!("{}={v:?}", escape(&f.name, &[',', '=', ' ']))
                })
            })
            .collect();
        if fields.is_empty() {
            return Ok(());
        }
        writeln!(
            self.writer,
            "{} {} {}",
            escape(&point.measurement, &[',', ' ']),
            fields.join(","),
            point.time.as_nanos()
        )?;
        self.writer.flush()
    }
}

/// Read-back of one power supply module.
///
/// Quantities that failed to read are missing.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub page: u8,
    /// °C
    pub temperature: Option<f64>,
    /// V
    pub voltage: Option<f64>,
    /// A
    pub current: Option<f64>,
    /// W
    pub power: Option<f64>,
}

impl Module {
    pub fn read<I: I2c>(supply: &mut PowerSupply<I>, page: u8) -> Self {
        fn ok(page: u8, what: &str, r: Result<f64, pmbus::Error>) -> Option<f64> {
            r.map_err(|e| log::warn!("Module {page} {what}: {e}")).ok()
        }
        let temperature = ok(page, "temperature", supply.read_temperature(page));
        let voltage = ok(page, "voltage", supply.read_voltage(page));
        let current = ok(page, "current", supply.read_current(page));
        Self {
            page,
            temperature,
            voltage,
            current,
            power: voltage.zip(current).map(|(v, i)| v * i),
        }
    }
}

/// Read back the given modules.
///
/// The supply is locked for each module, so other users of the bus (the control loop) interleave
/// only between modules and never between PAGE and a command.
pub fn read_modules<I: I2c>(
    supply: &Mutex<PowerSupply<I>>,
    pages: &[u8],
) -> Vec<Module> {
    pages
        .iter()
        .map(|&page| {
            let mut supply =
                supply.lock().unwrap_or_else(PoisonError::into_inner);
            Module::read(&mut *supply, page)
        })
        .collect()
}

/// Periodically log the read-back of the given modules until `stop` is set.
///
/// Sleeps `interval` between rows. Unpark the calling thread after setting `stop` to end the wait
/// early.
pub fn log_modules<I: I2c>(
    supply: &Mutex<PowerSupply<I>>,
    pages: &[u8],
    measurement: &str,
    sink: &mut dyn Sink,
    interval: Duration,
    stop: &AtomicBool,
) -> io::Result<()> {
    while !stop.load(Ordering::Relaxed) {
        let point = read_modules(supply, pages)
            .iter()
            .fold(Point::new(measurement, now()), |p, m| p.module(m));
        sink.write(&point)?;
        std::thread::park_timeout(interval);
    }
    Ok(())
}
