//! Human-facing booking references (`#AH-####`) and 4-digit OTP codes.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

const PREFIX: &str = "#AH-";
const LOW: u16 = 1000;
const HIGH: u16 = 9999;

/// Booking reference. Unique among active bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookingReference(u16);

impl BookingReference {
    /// Uniform draw over 1000..=9999.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(LOW..=HIGH))
    }

    pub fn number(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.0)
    }
}

impl FromStr for BookingReference {
    type Err = Error;

    /// Accepts `#AH-1234`, and `AH-1234` since `#` rarely survives a URL path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix(PREFIX)
            .or_else(|| trimmed.strip_prefix(&PREFIX[1..]))
            .ok_or_else(|| Error::Validation(format!("Invalid booking reference: {}", s)))?;

        parse_four_digits(digits)
            .map(Self)
            .ok_or_else(|| Error::Validation(format!("Invalid booking reference: {}", s)))
    }
}

/// One-time passcode the client shows the provider on arrival.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OtpCode(u16);

impl OtpCode {
    /// Independent draw over 1000..=9999. No uniqueness requirement.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(LOW..=HIGH))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        parse_four_digits(candidate.trim()) == Some(self.0)
    }
}

impl fmt::Display for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Keep codes out of logs.
impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpCode(****)")
    }
}

impl FromStr for OtpCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_four_digits(s.trim())
            .map(Self)
            .ok_or_else(|| Error::Validation("OTP must be 4 digits".to_string()))
    }
}

fn parse_four_digits(s: &str) -> Option<u16> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u16>().ok().filter(|n| (LOW..=HIGH).contains(n))
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(BookingReference);
string_serde!(OtpCode);
