use std::str::FromStr;

use thiserror::Error;

use crate::hexed::{HexParseError, HexedU16};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("expected 8 colon separated groups, got {0}")]
    WrongGroupCount(usize),
    #[error("group {index} is {width} digits, expected 4")]
    BadGroupWidth { index: usize, width: usize },
    #[error("group {index}: {source}")]
    BadGroup {
        index: usize,
        source: HexParseError,
    },
}

/// Link-local address as the BP35A1 prints it: eight 4-digit hex groups,
/// colon separated, no zero compression.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IPv6Addr(pub [HexedU16; 8]);

impl std::fmt::Display for IPv6Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]
        )
    }
}

impl std::fmt::Debug for IPv6Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for IPv6Addr {
    type Err = AddrParseError;

    /// All or nothing: a string with fewer or more than 8 groups, or any
    /// malformed group, parses to an error, never a partial address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let groups: Vec<&str> = s.split(':').collect();
        if groups.len() != 8 {
            return Err(AddrParseError::WrongGroupCount(groups.len()));
        }
        let mut fields = [HexedU16::default(); 8];
        for (index, group) in groups.iter().enumerate() {
            if group.len() != 4 {
                return Err(AddrParseError::BadGroupWidth {
                    index,
                    width: group.len(),
                });
            }
            fields[index] = group
                .parse()
                .map_err(|source| AddrParseError::BadGroup { index, source })?;
        }
        Ok(Self(fields))
    }
}
