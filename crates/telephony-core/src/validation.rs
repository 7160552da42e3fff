//! Input validation for dial strings and DTMF tones

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{TelephonyError, TelephonyResult};

static PHONE_NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9*#]{1,80}$").unwrap());
static TONES_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9*#A-Da-dpP]+$").unwrap());

/// Check a number against the dial grammar
pub fn is_valid_phone_number(number: &str) -> bool {
    PHONE_NUMBER_REGEX.is_match(number)
}

/// Check a DTMF string; `p`/`P` insert a pause
pub fn is_valid_tones(tones: &str) -> bool {
    TONES_REGEX.is_match(tones)
}

pub fn validate_phone_number(name: &str, number: &str) -> TelephonyResult<()> {
    if is_valid_phone_number(number) {
        Ok(())
    } else {
        Err(TelephonyError::invalid_argument(name, format!("{:?} is not a dialable number", number)))
    }
}

pub fn validate_tones(tones: &str) -> TelephonyResult<()> {
    if is_valid_tones(tones) {
        Ok(())
    } else {
        Err(TelephonyError::invalid_argument("tones", format!("{:?} contains invalid tones", tones)))
    }
}
