//! PID regulation of the module heaters from RTD temperatures.
//!
//! ```bash
//! thermostat --config stand.json --set /thermostat/loops/0/pid/setpoint=330 [CYCLES]
//! ```
//!
//! Every `/thermostat/period` ms all RTDs are scanned, each enabled loop updates its module
//! setpoint and a row of temperatures and outputs goes to the telemetry logs. A second thread
//! logs the read-back of all modules every `/telemetry/module_interval` seconds. Both threads
//! share the supply behind one lock.
use std::fs::File;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Mutex};
use std::time::Duration;

use cryostand::{
    hardware, logger,
    settings::{self, Args},
    telemetry::{log_modules, Csv, LineProtocol, Sink},
    thermostat::{self, Thermostat},
    Error,
};

fn sinks(
    cfg: &settings::Telemetry,
) -> Result<Vec<Box<dyn Sink + Send>>, Error> {
    let mut sinks: Vec<Box<dyn Sink + Send>> = Vec::new();
    if let Some(path) = &*cfg.csv {
        sinks.push(Box::new(Csv::new(File::create(path)?)));
    }
    if let Some(path) = &*cfg.line_protocol {
        sinks.push(Box::new(LineProtocol::new(
            File::options().create(true).append(true).open(path)?,
        )));
    }
    Ok(sinks)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args { settings, free, .. } = Args::from_env()?;
    logger::init(settings.log_level());
    let cycles = free.first().map(|c| c.parse::<u64>()).transpose()?;

    let mut thermostat =
        Thermostat::new(&settings.thermostat.loops, &settings.supply.pages)?;
    let mut acquisition = hardware::adc(&settings)?;
    // One owner of the PMBus page register for both threads
    let supply = Mutex::new(hardware::supply(
        hardware::i2c(&settings.supply)?,
        &settings.supply,
    ));
    let mut sinks = sinks(&settings.telemetry)?;
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| -> Result<(), Box<dyn std::error::Error>> {
        let modules = match &*settings.telemetry.module_log {
            Some(path) => {
                let mut sink = Csv::new(File::create(path)?);
                let interval = Duration::from_secs(
                    (*settings.telemetry.module_interval).into(),
                );
                let (supply, stop) = (&supply, &stop);
                let pages = &settings.supply.pages;
                Some(s.spawn(move || {
                    log_modules(
                        supply, pages, "modules", &mut sink, interval, stop,
                    )
                }))
            }
            None => None,
        };

        let result = thermostat::run(
            &mut acquisition,
            &mut thermostat,
            &mut &supply,
            &mut sinks,
            &settings.telemetry.measurement,
            Duration::from_millis((*settings.thermostat.period).into()),
            cycles,
        );
        if let Err(e) = &result {
            log::error!("Control loop stopped: {e}");
        }

        stop.store(true, Ordering::Relaxed);
        if let Some(modules) = modules {
            modules.thread().unpark();
            match modules.join() {
                Ok(r) => r?,
                Err(_) => log::error!("Module logger panicked"),
            }
        }
        Ok(result?)
    })
}
