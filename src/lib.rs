//! # BattLab One RS
//!
//! A Rust library for driving the BattLab One battery power-analysis
//! instrument over its USB-serial link.
//!
//! The instrument speaks a conversational single-byte protocol: every
//! command is one ASCII byte and every response has a fixed length known in
//! advance. This library provides the command/response transaction engine,
//! the calibration store fetched at connect time, the session state machine
//! tracking the active voltage and current ranges, and the decoder that
//! turns raw 16-bit ADC samples into milliamp readings.
//!
//! ## Features
//!
//! - **Device discovery**: finds the instrument among the attached serial
//!   ports by its FTDI USB ids and `BB` serial-number prefix
//! - **Typed transaction results**: every command decodes into a [`Value`]
//!   variant callers can match exhaustively
//! - **Calibration management**: per-voltage-range scale and offset factors,
//!   loaded once per connection
//! - **Sampling mode**: a typestate [`SamplingSession`] streams decoded
//!   current readings and makes ordinary commands statically unavailable
//!   while raw samples are on the wire
//!
//! ## Examples
//!
//! ### Connect and query the instrument
//!
//! ```rust,no_run
//! use battlab_one::{BattLabConnector, Value};
//!
//! let mut session = BattLabConnector::connect()?;
//! if let Value::Number(version) = session.execute("get_version")? {
//!     println!("firmware {version}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Capture current samples
//!
//! ```rust,no_run
//! use battlab_one::BattLabConnector;
//!
//! let mut session = BattLabConnector::connect()?;
//! session.execute("set_voltage_3v7")?;
//! session.execute("set_current_high")?;
//! session.execute("set_psu_on")?;
//!
//! let mut sampling = session.start_sampling().map_err(|(_, e)| e)?;
//! for reading in sampling.samples().take(1000) {
//!     println!("{:.4} mA", reading?);
//! }
//! let mut session = sampling.stop()?;
//! session.execute("set_psu_off")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calibration;
pub mod command;
pub mod connector;
pub mod session;
pub mod transport;

// Re-export the main types for convenience
pub use calibration::{CalibrationError, CalibrationTable};
pub use command::{CommandSpec, Decode, FirmwareRevision, Value};
pub use connector::{BattLabConnector, BattLabDevice, ConnectorError};
pub use session::{
    decode_sample, SamplingSession, Session, SessionConfig, SessionError, SessionState,
};
pub use transport::Transport;
