//! Periodic RTD temperature readout.
//!
//! Prints a CSV row of the four RTD temperatures (K, empty if not valid) every
//! `/thermostat/period` ms, `COUNT` times or forever. Also appends to `/telemetry/line_protocol`
//! if set.
use std::fs::File;
use std::time::{Duration, Instant};

use cryostand::{
    hardware, logger,
    settings::Args,
    telemetry::{now, Csv, LineProtocol, Point, Sink},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args { settings, free, .. } = Args::from_env()?;
    logger::init(settings.log_level());
    let count = free.first().map(|c| c.parse::<u64>()).transpose()?;
    let period = Duration::from_millis((*settings.thermostat.period).into());

    let mut sinks: Vec<Box<dyn Sink>> =
        vec![Box::new(Csv::new(std::io::stdout()))];
    if let Some(path) = &*settings.telemetry.line_protocol {
        sinks.push(Box::new(LineProtocol::new(
            File::options().create(true).append(true).open(path)?,
        )));
    }

    let mut acquisition = hardware::adc(&settings)?;
    let mut n = 0;
    while count.map_or(true, |c| n < c) {
        let start = Instant::now();
        let readings = acquisition.acquire()?;
        sinks.write(
            &Point::new(&settings.telemetry.measurement, now())
                .temperatures(&readings),
        )?;
        n += 1;
        std::thread::sleep(period.saturating_sub(start.elapsed()));
    }
    Ok(())
}
