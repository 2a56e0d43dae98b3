//! SCPI vocabulary used by the scan.
//!
//! Only the commands the measurement needs are modelled. IEEE 488.2 common
//! commands first, then the instrument-specific subsystem commands.

/// Identification query
pub const IDN: &str = "*IDN?";
/// Clear status
pub const CLS: &str = "*CLS";
/// Operation-complete query (completion barrier)
pub const OPC_QUERY: &str = "*OPC?";
/// Status byte query
pub const STB: &str = "*STB?";
/// Reset instrument to defaults
pub const RST: &str = "*RST";

/// Pop one entry from the error queue
pub const SYST_ERR: &str = "SYST:ERR?";
/// Byte order of binary transfers (SWAP = little endian, NORM = big endian)
pub const BYTE_ORDER_QUERY: &str = "FORM:BORD?";

/// Set sweep start frequency
pub const FREQ_START: &str = "SENS1:FREQ:STAR";
/// Set sweep stop frequency
pub const FREQ_STOP: &str = "SENS1:FREQ:STOP";
/// Set IF bandwidth
pub const BANDWIDTH: &str = "SENS1:BWID";
/// Set sweep point count
pub const SWEEP_POINTS: &str = "SENS1:SWE:POIN";
/// Let the instrument choose the sweep time
pub const SWEEP_TIME_AUTO: &str = "SENS1:SWE:TIME:AUTO 1";
/// Query sweep duration in seconds
pub const SWEEP_TIME_QUERY: &str = "SENS1:SWE:TIME?";

/// Trigger one sweep and hold command processing until it completes
pub const INIT_IMMEDIATE_WAIT: &str = "INIT1:IMM; *WAI";
/// Continuous sweep on all channels
pub const CONTINUOUS_ALL: &str = "INIT:CONT:ALL";
/// Display refresh
pub const DISPLAY_UPDATE: &str = "SYST:DISP:UPD";

/// Fetch the raw scattering payload of the active trace
pub const FETCH_SDATA: &str = "CALC:DATA? SDAT";

/// Status byte bit flagging a non-empty error queue (bit 2)
pub const ERROR_QUEUE_BIT: u16 = 1 << 2;

/// Phrase contained in the error-queue sentinel reply (`0,"No error"`)
pub const NO_ERROR_SENTINEL: &str = "no error";

/// Entries collected from the error queue before giving up
pub const MAX_ERROR_QUEUE_ENTRIES: usize = 50;

/// Marker appended when the error queue never reports empty
pub const ERROR_QUEUE_OVERFLOW: &str = "Cannot clear the error queue";

/// Format a setter command with a numeric argument.
pub fn with_value(header: &str, value: impl std::fmt::Display) -> String {
    format!("{} {}", header, value)
}

/// Format an ON/OFF switch command.
pub fn switch(header: &str, enabled: bool) -> String {
    format!("{} {}", header, if enabled { "ON" } else { "OFF" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_setters() {
        assert_eq!(with_value(FREQ_START, 2.3e9), "SENS1:FREQ:STAR 2300000000");
        assert_eq!(with_value(SWEEP_POINTS, 7401), "SENS1:SWE:POIN 7401");
        assert_eq!(switch(CONTINUOUS_ALL, false), "INIT:CONT:ALL OFF");
        assert_eq!(switch(DISPLAY_UPDATE, true), "SYST:DISP:UPD ON");
    }

    #[test]
    fn error_bit_is_mask_four() {
        assert_eq!(ERROR_QUEUE_BIT, 4);
    }
}
