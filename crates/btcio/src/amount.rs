//! Conversion between the BTC floats the node reports and the satoshi
//! integers used everywhere else.

use thiserror::Error;

pub const SATS_PER_BTC: u64 = 100_000_000;

/// Total supply cap, in BTC.
const MAX_BTC: f64 = 21_000_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmountError {
    #[error("invalid bitcoin amount {0}")]
    Invalid(f64),

    #[error("exceeded max bitcoin amount {0}")]
    AboveMax(f64),

    #[error("bitcoin amount {0} cannot be less than zero")]
    Negative(f64),
}

/// Converts a BTC amount to satoshis, rounding half away from zero at the 8th
/// decimal.
pub fn get_satoshis(btc: f64) -> Result<u64, AmountError> {
    if btc.is_nan() || btc.is_infinite() {
        return Err(AmountError::Invalid(btc));
    }
    if btc > MAX_BTC {
        return Err(AmountError::AboveMax(btc));
    }
    if btc < 0.0 {
        return Err(AmountError::Negative(btc));
    }

    // `f64::round` rounds half away from zero
    Ok((btc * SATS_PER_BTC as f64).round() as u64)
}

/// Satoshis as a BTC float, for log and error messages.
pub fn sats_to_btc(sats: u64) -> f64 {
    sats as f64 / SATS_PER_BTC as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_satoshis() {
        assert_eq!(get_satoshis(0.00078640).unwrap(), 78_640);
        assert_eq!(get_satoshis(21_000_000.0).unwrap(), 21_000_000 * SATS_PER_BTC);
        assert_eq!(get_satoshis(0.0).unwrap(), 0);
        // 1.5 sats rounds up, 0.49 sats rounds down
        assert_eq!(get_satoshis(0.000000015).unwrap(), 2);
        assert_eq!(get_satoshis(0.0000000049).unwrap(), 0);
    }

    #[test]
    fn test_get_satoshis_rejects() {
        assert!(matches!(get_satoshis(f64::NAN), Err(AmountError::Invalid(_))));
        assert!(matches!(get_satoshis(f64::INFINITY), Err(AmountError::Invalid(_))));
        assert!(matches!(get_satoshis(f64::NEG_INFINITY), Err(AmountError::Invalid(_))));
        assert!(matches!(get_satoshis(21_000_000.1), Err(AmountError::AboveMax(_))));
        assert!(matches!(get_satoshis(-0.00000001), Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_sats_to_btc_display() {
        assert_eq!(sats_to_btc(2_163_107_432).to_string(), "21.63107432");
        assert_eq!(sats_to_btc(2_164_000_000).to_string(), "21.64");
    }
}
