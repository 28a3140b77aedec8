use std::str::FromStr;

use thiserror::Error;

/// Fixed-width hexadecimal fields as the BP35A1 prints them: zero-padded,
/// uppercase, 2/4/16 digits for 8/16/64 bit values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HexParseError {
    #[error("expected {expected} hex digits, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

fn parse_fixed_width(s: &str, width: usize) -> Result<u64, HexParseError> {
    let digits: Vec<char> = s.chars().take(width).collect();
    if digits.len() < width {
        return Err(HexParseError::TooShort {
            expected: width,
            got: digits.len(),
        });
    }
    let mut value: u64 = 0;
    for ch in digits {
        let nibble = ch
            .to_digit(16)
            .ok_or(HexParseError::InvalidDigit(ch))?;
        value = (value << 4) | u64::from(nibble);
    }
    Ok(value)
}

// HexedU8 {{{
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HexedU8(pub u8);

impl std::fmt::Display for HexedU8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl std::fmt::Debug for HexedU8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl FromStr for HexedU8 {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_width(s, 2).map(|v| Self(v as u8))
    }
}

impl From<u8> for HexedU8 {
    fn from(v: u8) -> Self {
        Self(v)
    }
} // }}}

// HexedU16 {{{
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HexedU16(pub u16);

impl std::fmt::Display for HexedU16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl std::fmt::Debug for HexedU16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl FromStr for HexedU16 {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_width(s, 4).map(|v| Self(v as u16))
    }
}

impl From<u16> for HexedU16 {
    fn from(v: u16) -> Self {
        Self(v)
    }
} // }}}

// HexedU64 {{{
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HexedU64(pub u64);

impl std::fmt::Display for HexedU64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl std::fmt::Debug for HexedU64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for HexedU64 {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_width(s, 16).map(Self)
    }
}

impl From<u64> for HexedU64 {
    fn from(v: u64) -> Self {
        Self(v)
    }
} // }}}
