pub mod acquisition;
pub mod convert;
pub mod hardware;
pub mod logger;
pub mod settings;
pub mod telemetry;
pub mod thermostat;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ADC: {0}")]
    Adc(#[from] ad7124::Error),
    #[error("Power supply: {0}")]
    Supply(#[from] pmbus::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Settings: {0}")]
    Settings(String),
    #[error("Settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SPI: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[error("I2C: {0}")]
    I2c(#[from] rppal::i2c::Error),
}
