//! The BattLab One wire dialect: one ASCII byte per command, fixed-length
//! binary responses. This table is the single source of truth for the
//! protocol and has to match the firmware byte-for-byte.

/// Decoded result of a transaction.
///
/// Every command's response decodes into exactly one of these shapes, so
/// callers can match exhaustively instead of downcasting.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Commands with no response payload.
    Unit,
    /// Raw payload rendered as a lowercase hex string (`get_config`).
    Hex(String),
    /// A parsed numeric value (`get_version`, e.g. `1.001`).
    Number(f64),
    /// The 17-entry calibration table (`get_calibration`).
    Calibration(crate::calibration::CalibrationTable),
}

/// How a response payload is turned into a [`Value`].
///
/// Plain data rather than function pointers so the table stays `const` and
/// the engine can dispatch with a single match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    Unit,
    Hex,
    /// Big-endian u16 divided by 1000 (firmware version encoding).
    VersionRatio,
    /// 17 big-endian u16 calibration entries.
    Calibration,
}

/// Which revision of the protocol the connected firmware speaks.
///
/// The `w` byte is the only point of divergence: early firmware calls it
/// `reboot` and returns immediately, firmware newer than 1.002 calls it
/// `reset` and needs a settle period before it accepts the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareRevision {
    /// Firmware up to 1.002: the `w` byte answers to `reboot`.
    Early,
    /// Firmware newer than 1.002: the `w` byte answers to `reset`.
    #[default]
    Later,
}

/// One entry of the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub wire: &'static [u8],
    pub response_len: usize,
    pub decode: Decode,
    /// `reset` needs a long settle while the firmware reinitializes.
    pub reset_settle: bool,
}

impl CommandSpec {
    const fn new(
        name: &'static str,
        wire: &'static [u8],
        response_len: usize,
        decode: Decode,
    ) -> Self {
        Self {
            name,
            wire,
            response_len,
            decode,
            reset_settle: false,
        }
    }

    /// A command with no response payload.
    const fn unit(name: &'static str, wire: &'static [u8]) -> Self {
        Self::new(name, wire, 0, Decode::Unit)
    }
}

/// Largest response payload of any registered command.
pub const MAX_RESPONSE_LEN: usize = 34;

pub(crate) const COMMANDS: &[CommandSpec] = &[
    CommandSpec::unit("set_voltage_1v2", b"a"),
    CommandSpec::unit("set_voltage_1v5", b"b"),
    CommandSpec::unit("set_voltage_2v4", b"c"),
    CommandSpec::unit("set_voltage_3v0", b"d"),
    CommandSpec::unit("set_voltage_3v2", b"o"),
    CommandSpec::unit("set_voltage_3v6", b"n"),
    CommandSpec::unit("set_voltage_3v7", b"e"),
    CommandSpec::unit("set_voltage_4v2", b"f"),
    CommandSpec::unit("set_voltage_4v5", b"g"),
    CommandSpec::unit("set_psu_on", b"h"),
    CommandSpec::unit("set_psu_off", b"i"),
    CommandSpec::new("get_calibration", b"j", 34, Decode::Calibration),
    CommandSpec::new("get_config", b"m", 4, Decode::Hex),
    CommandSpec::new("get_version", b"p", 2, Decode::VersionRatio),
    CommandSpec::unit("set_current_low", b"k"),
    CommandSpec::unit("set_current_high", b"l"),
    CommandSpec::unit("set_averages_1", b"s"), // only in firmware > 1.001
    CommandSpec::unit("set_averages_4", b"t"),
    CommandSpec::unit("set_averages_16", b"u"),
    CommandSpec::unit("set_averages_64", b"v"),
    // Early firmware names the `w` byte `reboot`; > 1.002 names it `reset`
    // and expects the host to wait out the reinitialization.
    CommandSpec::unit("reboot", b"w"),
    CommandSpec {
        name: "reset",
        wire: b"w",
        response_len: 0,
        decode: Decode::Unit,
        reset_settle: true,
    },
    CommandSpec::unit("set_sample_trig", b"x"),
    CommandSpec::unit("set_sample_off", b"y"),
    CommandSpec::unit("set_sample_on", b"z"),
];

/// Look up a command by name under the given firmware revision.
///
/// `reboot`/`reset` are two names for the same wire byte; only the one the
/// active revision defines resolves, the other behaves like any unknown name.
/// The table itself carries no firmware-version gating beyond that: checking
/// the decoded version before issuing gated commands is the caller's job.
pub fn lookup(name: &str, revision: FirmwareRevision) -> Option<&'static CommandSpec> {
    let spec = COMMANDS.iter().find(|c| c.name == name)?;
    match (spec.name, revision) {
        ("reboot", FirmwareRevision::Later) | ("reset", FirmwareRevision::Early) => None,
        _ => Some(spec),
    }
}
