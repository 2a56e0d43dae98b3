//! Reply parsing.
//!
//! The instrument answers in ASCII. Scattering data arrives as one
//! comma-delimited line of decimal values where even-indexed values are real
//! parts and odd-indexed values the imaginary parts of the same sample.

use num_complex::Complex64;
use scan_core::{ScanError, ScanResult};

/// Decode a `CALC:DATA? SDAT` payload into complex samples.
///
/// # Errors
/// [`ScanError::Decode`] on a non-numeric token or an odd token count.
pub fn decode_sdat(payload: &str) -> ScanResult<Vec<Complex64>> {
    let values = payload
        .trim()
        .split(',')
        .enumerate()
        .map(|(i, token)| {
            let token = token.trim();
            token.parse::<f64>().map_err(|_| {
                ScanError::Decode(format!("non-numeric token '{}' at index {}", token, i))
            })
        })
        .collect::<ScanResult<Vec<f64>>>()?;

    if values.len() % 2 != 0 {
        return Err(ScanError::Decode(format!(
            "odd number of values ({}) in scattering payload",
            values.len()
        )));
    }

    Ok(values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect())
}

/// Parse a `*STB?` reply.
///
/// Accepts `4`, `+4` and the `4.0` form some firmware returns.
pub fn parse_status_byte(reply: &str) -> ScanResult<u16> {
    let reply = reply.trim();
    let unsigned = reply.strip_prefix('+').unwrap_or(reply);
    if let Ok(value) = unsigned.parse::<u16>() {
        return Ok(value);
    }
    match unsigned.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&value) => {
            Ok(value as u16)
        }
        _ => Err(ScanError::Decode(format!(
            "invalid status byte reply '{}'",
            reply
        ))),
    }
}

/// Parse a sweep duration reply in seconds.
pub fn parse_seconds(reply: &str) -> ScanResult<f64> {
    let reply = reply.trim();
    match reply.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(ScanError::Decode(format!(
            "invalid sweep time reply '{}'",
            reply
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_interleaved_pairs() {
        let samples = decode_sdat("1,2,3,4").unwrap();
        assert_eq!(samples, vec![Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)]);
    }

    #[test]
    fn decodes_scientific_notation_with_spaces() {
        let samples = decode_sdat(" 1.5E-03, -2.0e-1 ,0,+7\n").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], Complex64::new(1.5e-3, -0.2));
        assert_eq!(samples[1], Complex64::new(0.0, 7.0));
    }

    #[test]
    fn rejects_odd_token_count() {
        let err = decode_sdat("1,2,3").unwrap_err();
        assert!(matches!(err, ScanError::Decode(msg) if msg.contains("odd")));
    }

    #[test]
    fn rejects_non_numeric_token() {
        let err = decode_sdat("1,2,abc,4").unwrap_err();
        assert!(matches!(err, ScanError::Decode(msg) if msg.contains("abc")));
    }

    #[test]
    fn rejects_empty_payload() {
        assert!(decode_sdat("").is_err());
    }

    #[test]
    fn status_byte_forms() {
        assert_eq!(parse_status_byte("4").unwrap(), 4);
        assert_eq!(parse_status_byte("+0\n").unwrap(), 0);
        assert_eq!(parse_status_byte("68.0").unwrap(), 68);
        assert!(parse_status_byte("ready").is_err());
        assert!(parse_status_byte("-1").is_err());
    }

    #[test]
    fn sweep_time_forms() {
        assert_eq!(parse_seconds("1.5E+00").unwrap(), 1.5);
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
    }
}
