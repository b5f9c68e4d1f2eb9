//! One live connection to the instrument: the transaction engine, the
//! session state it mutates, and the raw-sample decoder.
//!
//! The protocol is strictly conversational. Every command has a fixed
//! response size known in advance, so the engine never parses framing from
//! the stream; it writes the command byte, reads exactly the agreed number
//! of bytes and hands them to the decoder. A short read or write leaves the
//! conversation desynchronized with no way to recover, so nothing here
//! retries.

use std::io::ErrorKind;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::calibration::{CalibrationError, CalibrationTable};
use crate::command::{self, CommandSpec, Decode, FirmwareRevision, Value};
use crate::transport::Transport;

/// Settle time after commands that produce no response payload.
///
/// The firmware sends no acknowledgement for those, so the host waits a
/// fixed interval instead of racing the next command against its internal
/// processing.
pub const DEFAULT_COMMAND_SETTLE: Duration = Duration::from_millis(10);

/// Settle time after `reset` while the firmware reinitializes.
pub const DEFAULT_RESET_SETTLE: Duration = Duration::from_secs(1);

/// Current value of one raw ADC count, in milliamps.
pub const SAMPLE_LSB_MA: f64 = 0.0025;

/// Fixed sense divisor used while the low-current range is active.
pub const LOW_RANGE_SENSE_SCALE: f64 = 99.0;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("short response for '{command}': expected {expected} bytes")]
    ShortResponse { command: String, expected: usize },

    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("no voltage or current range selected yet")]
    InvalidState,
}

/// Tunables for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub revision: FirmwareRevision,
    /// Wait after zero-length-response commands.
    pub command_settle: Duration,
    /// Additional wait after `reset`.
    pub reset_settle: Duration,
    /// Subtract the sleep-current offset in the sample formula. The firmware
    /// calibration carries the offsets but the reference behavior leaves the
    /// subtraction disabled; flipping this changes numeric output.
    pub subtract_sleep_offset: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            revision: FirmwareRevision::default(),
            command_settle: DEFAULT_COMMAND_SETTLE,
            reset_settle: DEFAULT_RESET_SETTLE,
            subtract_sleep_offset: false,
        }
    }
}

/// Ranges selected so far on this connection.
///
/// Sample decoding depends on state set by earlier commands; only the
/// transaction engine mutates this, synchronously within the transaction
/// that triggers the change.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionState {
    active_cal_adj: Option<f64>,
    active_offset: Option<u16>,
    low_current_enabled: Option<bool>,
}

impl SessionState {
    /// Calibration adjustment factor of the active voltage range, if one
    /// has been selected.
    pub fn active_cal_adj(&self) -> Option<f64> {
        self.active_cal_adj
    }

    /// Sleep-current offset of the active voltage range, if one has been
    /// selected.
    pub fn active_offset(&self) -> Option<u16> {
        self.active_offset
    }

    /// Whether the low-current range is active; `None` until a current
    /// range has been selected.
    pub fn low_current_enabled(&self) -> Option<bool> {
        self.low_current_enabled
    }
}

/// Convert one raw 2-byte big-endian sample into milliamps.
///
/// Fails with [`SessionError::InvalidState`] until both a voltage range and
/// a current range have been selected on the session. While the low-current
/// range is active the fixed [`LOW_RANGE_SENSE_SCALE`] divisor applies
/// regardless of the voltage range's calibration factor.
pub fn decode_sample(
    raw: [u8; 2],
    state: &SessionState,
    subtract_sleep_offset: bool,
) -> Result<f64, SessionError> {
    let (Some(cal_adj), Some(offset), Some(low_range)) = (
        state.active_cal_adj,
        state.active_offset,
        state.low_current_enabled,
    ) else {
        return Err(SessionError::InvalidState);
    };

    let mut counts = f64::from(u16::from_be_bytes(raw));
    if subtract_sleep_offset {
        counts -= f64::from(offset);
    }

    let scale = if low_range {
        LOW_RANGE_SENSE_SCALE
    } else {
        cal_adj
    };
    Ok(counts * SAMPLE_LSB_MA / scale)
}

/// One exclusive connection to a BattLab One.
///
/// Commands are strictly serialized; the wire protocol has no request
/// identifiers, so a connection must never be shared without external
/// synchronization.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    calibration: CalibrationTable,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Open a session over an already-open transport with default config.
    ///
    /// Fetches the calibration table before anything else; the session is
    /// not usable until that transaction succeeds.
    pub fn connect(transport: T) -> Result<Self, SessionError> {
        Self::connect_with(transport, SessionConfig::default())
    }

    /// Open a session with explicit configuration.
    pub fn connect_with(mut transport: T, config: SessionConfig) -> Result<Self, SessionError> {
        let spec = command::lookup("get_calibration", config.revision)
            .ok_or_else(|| SessionError::UnknownCommand {
                name: "get_calibration".to_string(),
            })?;
        let raw = transact(&mut transport, &config, spec)?;
        let calibration = CalibrationTable::parse(&raw)?;
        log::debug!("calibration table loaded: {:?}", calibration.entries());

        Ok(Self {
            transport,
            config,
            calibration,
            state: SessionState::default(),
        })
    }

    /// Execute one command by name and return its decoded response.
    ///
    /// Side effects on the session state (range selection) are applied
    /// before this returns, so a subsequent sample decode always sees
    /// consistent state.
    pub fn execute(&mut self, name: &str) -> Result<Value, SessionError> {
        let spec = command::lookup(name, self.config.revision).ok_or_else(|| {
            SessionError::UnknownCommand {
                name: name.to_string(),
            }
        })?;

        let raw = transact(&mut self.transport, &self.config, spec)?;
        self.apply_side_effects(spec)?;
        decode_value(spec, &raw)
    }

    /// The calibration table fetched at connect time.
    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Snapshot of the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter sampling mode.
    ///
    /// Consumes the session: while the instrument streams raw samples the
    /// stream cannot carry ordinary command responses, so `execute` is
    /// statically unavailable until [`SamplingSession::stop`] hands the
    /// session back.
    pub fn start_sampling(mut self) -> Result<SamplingSession<T>, (Self, SessionError)> {
        match self.execute("set_sample_on") {
            Ok(_) => Ok(SamplingSession { inner: self }),
            Err(e) => Err((self, e)),
        }
    }

    fn apply_side_effects(&mut self, spec: &CommandSpec) -> Result<(), SessionError> {
        match spec.name {
            name if name.starts_with("set_voltage_") => {
                self.state.active_cal_adj = Some(self.calibration.scale_for(name)?);
                self.state.active_offset = Some(self.calibration.offset_for(name)?);
                log::debug!(
                    "voltage range {name}: cal_adj={:?} offset={:?}",
                    self.state.active_cal_adj,
                    self.state.active_offset
                );
            }
            "set_current_low" => self.state.low_current_enabled = Some(true),
            "set_current_high" => self.state.low_current_enabled = Some(false),
            _ => {}
        }
        Ok(())
    }
}

/// One transaction: write the wire bytes, read the fixed-size response,
/// wait out the settle delays.
fn transact<T: Transport>(
    transport: &mut T,
    config: &SessionConfig,
    spec: &CommandSpec,
) -> Result<Vec<u8>, SessionError> {
    log::trace!(
        "tx '{}' ({:?}), expecting {} byte response",
        spec.name,
        spec.wire,
        spec.response_len
    );
    transport.write_all(spec.wire)?;

    let mut raw = vec![0u8; spec.response_len];
    if spec.response_len > 0 {
        transport.read_exact(&mut raw).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                SessionError::ShortResponse {
                    command: spec.name.to_string(),
                    expected: spec.response_len,
                }
            } else {
                SessionError::Transport(e)
            }
        })?;
    } else {
        // No acknowledgement to wait for, only the settle interval.
        thread::sleep(config.command_settle);
    }

    if spec.reset_settle {
        thread::sleep(config.reset_settle);
    }

    Ok(raw)
}

fn decode_value(spec: &CommandSpec, raw: &[u8]) -> Result<Value, SessionError> {
    match spec.decode {
        Decode::Unit => Ok(Value::Unit),
        Decode::Hex => Ok(Value::Hex(hex::encode(raw))),
        Decode::VersionRatio => match raw {
            [hi, lo] => Ok(Value::Number(
                f64::from(u16::from_be_bytes([*hi, *lo])) / 1000.0,
            )),
            _ => Err(SessionError::ShortResponse {
                command: spec.name.to_string(),
                expected: spec.response_len,
            }),
        },
        Decode::Calibration => Ok(Value::Calibration(CalibrationTable::parse(raw)?)),
    }
}

/// A session in sampling mode: the stream carries a continuous sequence of
/// raw 2-byte current samples instead of command/response pairs.
pub struct SamplingSession<T: Transport> {
    inner: Session<T>,
}

impl<T: Transport> SamplingSession<T> {
    /// Read and decode the next sample, in milliamps.
    pub fn read_sample(&mut self) -> Result<f64, SessionError> {
        let mut raw = [0u8; 2];
        self.inner.transport.read_exact(&mut raw)?;
        decode_sample(
            raw,
            &self.inner.state,
            self.inner.config.subtract_sleep_offset,
        )
    }

    /// Lazy stream of decoded samples.
    pub fn samples(&mut self) -> impl Iterator<Item = Result<f64, SessionError>> + '_ {
        std::iter::from_fn(move || Some(self.read_sample()))
    }

    /// Snapshot of the session state the samples are decoded against.
    pub fn state(&self) -> SessionState {
        self.inner.state
    }

    /// Leave sampling mode and hand the session back.
    ///
    /// Sample bytes still in flight when `set_sample_off` lands are
    /// discarded so they cannot be mistaken for the next response.
    pub fn stop(mut self) -> Result<Session<T>, SessionError> {
        let spec = command::lookup("set_sample_off", self.inner.config.revision).ok_or_else(
            || SessionError::UnknownCommand {
                name: "set_sample_off".to_string(),
            },
        )?;
        transact(&mut self.inner.transport, &self.inner.config, spec)?;
        self.inner.transport.discard_input()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Instant;

    /// Calibration payload with scale slots `[s0..s7]` (×1000) and offset
    /// slots `[o8..o16]`.
    fn cal_payload(entries: [u16; 17]) -> Vec<u8> {
        entries.iter().flat_map(|e| e.to_be_bytes()).collect()
    }

    /// Sequential table 1000, 1100, .. 2600.
    fn sequential_entries() -> [u16; 17] {
        let mut entries = [0u16; 17];
        for (i, e) in entries.iter_mut().enumerate() {
            *e = 1000 + i as u16 * 100;
        }
        entries
    }

    fn connect(responses: Vec<u8>) -> Session<MockTransport> {
        Session::connect(MockTransport::new(responses)).unwrap()
    }

    fn connect_with(responses: Vec<u8>, config: SessionConfig) -> Session<MockTransport> {
        Session::connect_with(MockTransport::new(responses), config).unwrap()
    }

    #[test]
    fn connect_fetches_calibration_first() {
        let session = connect(cal_payload(sequential_entries()));
        assert_eq!(session.transport.written, b"j");
        assert_eq!(session.calibration().entries()[0], 1000);
        assert_eq!(session.state(), SessionState::default());
    }

    #[test]
    fn connect_fails_on_short_calibration_payload() {
        let err = Session::connect(MockTransport::new(vec![0u8; 10])).unwrap_err();
        assert!(matches!(err, SessionError::ShortResponse { .. }));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut session = connect(cal_payload(sequential_entries()));
        let err = session.execute("set_voltage_9v9").unwrap_err();
        assert!(matches!(err, SessionError::UnknownCommand { .. }));
        // Nothing reached the wire.
        assert_eq!(session.transport.written, b"j");
    }

    #[test]
    fn version_decode() {
        let mut responses = cal_payload(sequential_entries());
        responses.extend_from_slice(&[0x03, 0xE9, 0x03, 0xEA]);
        let mut session = connect(responses);

        assert_eq!(session.execute("get_version").unwrap(), Value::Number(1.001));
        assert_eq!(session.execute("get_version").unwrap(), Value::Number(1.002));
        assert_eq!(session.transport.written, b"jpp");
    }

    #[test]
    fn config_decodes_as_hex() {
        let mut responses = cal_payload(sequential_entries());
        responses.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut session = connect(responses);

        assert_eq!(
            session.execute("get_config").unwrap(),
            Value::Hex("deadbeef".to_string())
        );
    }

    #[test]
    fn voltage_selection_updates_state_last_write_wins() {
        let mut session = connect(cal_payload(sequential_entries()));

        assert_eq!(session.execute("set_voltage_1v2").unwrap(), Value::Unit);
        assert_eq!(session.state().active_cal_adj(), Some(1.0));
        assert_eq!(session.state().active_offset(), Some(1800));

        session.execute("set_voltage_3v7").unwrap();
        assert_eq!(session.state().active_cal_adj(), Some(1.5));
        assert_eq!(session.state().active_offset(), Some(2400));

        assert_eq!(session.transport.written, b"jae");
    }

    #[test]
    fn current_range_selection_updates_state() {
        let mut session = connect(cal_payload(sequential_entries()));
        assert_eq!(session.state().low_current_enabled(), None);

        session.execute("set_current_low").unwrap();
        assert_eq!(session.state().low_current_enabled(), Some(true));

        session.execute("set_current_high").unwrap();
        assert_eq!(session.state().low_current_enabled(), Some(false));
    }

    #[test]
    fn non_selecting_commands_leave_state_alone() {
        let mut session = connect(cal_payload(sequential_entries()));
        session.execute("set_psu_on").unwrap();
        session.execute("set_averages_16").unwrap();
        assert_eq!(session.state(), SessionState::default());
    }

    #[test]
    fn decode_sample_high_range_uses_cal_adj() {
        let state = SessionState {
            active_cal_adj: Some(2.0),
            active_offset: Some(0),
            low_current_enabled: Some(false),
        };
        let ma = decode_sample([0x00, 0x64], &state, false).unwrap();
        assert!((ma - 0.125).abs() < 1e-12, "got {ma}");
    }

    #[test]
    fn decode_sample_low_range_uses_fixed_divisor() {
        let state = SessionState {
            active_cal_adj: Some(2.0),
            active_offset: Some(0),
            low_current_enabled: Some(true),
        };
        let ma = decode_sample([0x00, 0x64], &state, false).unwrap();
        assert!((ma - 100.0 * SAMPLE_LSB_MA / 99.0).abs() < 1e-12, "got {ma}");
    }

    #[test]
    fn decode_sample_requires_both_ranges() {
        assert!(matches!(
            decode_sample([0, 100], &SessionState::default(), false),
            Err(SessionError::InvalidState)
        ));

        let voltage_only = SessionState {
            active_cal_adj: Some(1.0),
            active_offset: Some(0),
            low_current_enabled: None,
        };
        assert!(matches!(
            decode_sample([0, 100], &voltage_only, false),
            Err(SessionError::InvalidState)
        ));

        let current_only = SessionState {
            active_cal_adj: None,
            active_offset: None,
            low_current_enabled: Some(false),
        };
        assert!(matches!(
            decode_sample([0, 100], &current_only, false),
            Err(SessionError::InvalidState)
        ));
    }

    #[test]
    fn sleep_offset_term_is_off_by_default_and_configurable() {
        let state = SessionState {
            active_cal_adj: Some(1.0),
            active_offset: Some(40),
            low_current_enabled: Some(false),
        };
        let plain = decode_sample([0x00, 0x64], &state, false).unwrap();
        let corrected = decode_sample([0x00, 0x64], &state, true).unwrap();
        assert!((plain - 0.25).abs() < 1e-12);
        assert!((corrected - 0.15).abs() < 1e-12);
    }

    #[test]
    fn zero_length_commands_incur_settle_delay() {
        let config = SessionConfig {
            command_settle: Duration::from_millis(30),
            ..SessionConfig::default()
        };
        let mut session = connect_with(cal_payload(sequential_entries()), config);

        let start = Instant::now();
        session.execute("set_psu_on").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn reset_incurs_its_settle_delay() {
        let config = SessionConfig {
            command_settle: Duration::from_millis(1),
            reset_settle: Duration::from_millis(60),
            ..SessionConfig::default()
        };
        let mut session = connect_with(cal_payload(sequential_entries()), config);

        let start = Instant::now();
        session.execute("reset").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(session.transport.written, b"jw");
    }

    #[test]
    fn reboot_on_early_firmware_settles_like_any_void_command() {
        let config = SessionConfig {
            revision: FirmwareRevision::Early,
            command_settle: Duration::from_millis(25),
            ..SessionConfig::default()
        };
        let mut session = connect_with(cal_payload(sequential_entries()), config);

        let start = Instant::now();
        session.execute("reboot").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));

        // The later revision's name is not available here.
        assert!(matches!(
            session.execute("reset"),
            Err(SessionError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn sampling_mode_streams_and_stops_clean() {
        // Scale slot 0 = 2000 -> cal_adj 2.0.
        let mut entries = sequential_entries();
        entries[0] = 2000;
        let mut responses = cal_payload(entries);
        // Two samples plus one in-flight byte that must be discarded on stop.
        responses.extend_from_slice(&[0x00, 0x64, 0x00, 0xC8, 0x00]);

        let mut session = connect(responses);
        session.execute("set_voltage_1v2").unwrap();
        session.execute("set_current_high").unwrap();

        let mut sampling = session.start_sampling().map_err(|(_, e)| e).unwrap();
        assert!((sampling.read_sample().unwrap() - 0.125).abs() < 1e-12);
        assert!((sampling.read_sample().unwrap() - 0.25).abs() < 1e-12);

        let session = sampling.stop().unwrap();
        assert_eq!(session.transport.written, b"jalzy");
        assert_eq!(session.transport.discards, 1);
        assert!(session.transport.unread().is_empty());
    }

    #[test]
    fn sampling_before_range_selection_is_invalid_state() {
        let mut responses = cal_payload(sequential_entries());
        responses.extend_from_slice(&[0x00, 0x64]);
        let session = connect(responses);

        let mut sampling = session.start_sampling().map_err(|(_, e)| e).unwrap();
        assert!(matches!(
            sampling.read_sample(),
            Err(SessionError::InvalidState)
        ));
    }

    #[test]
    fn samples_iterator_is_lazy() {
        let mut entries = sequential_entries();
        entries[0] = 1000;
        let mut responses = cal_payload(entries);
        responses.extend_from_slice(&[0x00, 0x0A, 0x00, 0x14, 0x00, 0x1E]);

        let mut session = connect(responses);
        session.execute("set_voltage_1v2").unwrap();
        session.execute("set_current_high").unwrap();

        let mut sampling = session.start_sampling().map_err(|(_, e)| e).unwrap();
        let first_two: Vec<f64> = sampling.samples().take(2).map(Result::unwrap).collect();
        assert_eq!(first_two, vec![10.0 * SAMPLE_LSB_MA, 20.0 * SAMPLE_LSB_MA]);
        // The third sample is still unread on the wire.
        assert_eq!(sampling.inner.transport.unread(), &[0x00, 0x1E]);
    }
}
