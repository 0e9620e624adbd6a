//! One-shot PMBus module commands.
//!
//! ```text
//! psu on|off PAGE
//! psu set-volt PAGE VOLTS
//! psu set-curr PAGE AMPS
//! psu read-volt|read-curr|read-temp|read-power PAGE
//! psu temp-limits PAGE WARN FAULT
//! psu log [PAGE...]
//! ```
//!
//! `log` writes a row of temperature, voltage, current and power of every given (default: all
//! configured) module to `/telemetry/module_log` (stdout if unset) every
//! `/telemetry/module_interval` seconds.
use std::fs::File;
use std::str::FromStr;
use std::sync::{atomic::AtomicBool, Mutex};
use std::time::Duration;

use cryostand::{
    hardware, logger,
    settings::Args,
    telemetry::{log_modules, Csv, Sink},
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn arg<T: FromStr>(free: &[String], i: usize, what: &str) -> Result<T>
where
    T::Err: std::error::Error + 'static,
{
    let a = free.get(i).ok_or_else(|| format!("missing {what}"))?;
    Ok(a.parse()?)
}

fn main() -> Result<()> {
    let Args { settings, free, .. } = Args::from_env()?;
    logger::init(settings.log_level());
    let cmd = free.first().ok_or(
        "command: on, off, set-volt, set-curr, read-volt, read-curr, read-temp, read-power, \
         temp-limits, log",
    )?;

    let mut psu =
        hardware::supply(hardware::i2c(&settings.supply)?, &settings.supply);

    if cmd == "log" {
        let pages = if free.len() > 1 {
            (1..free.len())
                .map(|i| arg(&free, i, "page"))
                .collect::<Result<Vec<u8>>>()?
        } else {
            psu.pages().to_vec()
        };
        let mut sink: Box<dyn Sink> = match &*settings.telemetry.module_log {
            Some(path) => Box::new(Csv::new(File::create(path)?)),
            None => Box::new(Csv::new(std::io::stdout())),
        };
        log_modules(
            &Mutex::new(psu),
            &pages,
            "modules",
            &mut sink,
            Duration::from_secs((*settings.telemetry.module_interval).into()),
            &AtomicBool::new(false),
        )?;
        return Ok(());
    }

    let page: u8 = arg(&free, 1, "page")?;
    match cmd.as_str() {
        "on" => psu.on(page)?,
        "off" => psu.off(page)?,
        "set-volt" => {
            let v = arg(&free, 2, "voltage")?;
            psu.set_voltage(page, v)?;
            println!("Module {page} voltage set to {v} V");
        }
        "set-curr" => {
            let i = arg(&free, 2, "current")?;
            psu.set_current(page, i)?;
            println!("Module {page} current set to {i} A");
        }
        "read-volt" => println!("{} V", psu.read_voltage(page)?),
        "read-curr" => println!("{} A", psu.read_current(page)?),
        "read-temp" => println!("{} °C", psu.read_temperature(page)?),
        "read-power" => println!("{} W", psu.read_power(page)?),
        "temp-limits" => {
            psu.set_temp_warning_limit(page, arg(&free, 2, "warning limit")?)?;
            psu.set_temp_fault_limit(page, arg(&free, 3, "fault limit")?)?;
        }
        c => return Err(format!("unknown command {c}").into()),
    }
    Ok(())
}
