use chrono::{DateTime, FixedOffset, LocalResult, TimeZone};
use num_enum::IntoPrimitive;

use crate::echonet::frame::EchonetLiteProp;

/// Property codes of the low-voltage smart electric energy meter class
/// (and its device superclass).
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive)]
#[repr(u8)]
pub enum Epc {
    OperationStatus = 0x80,
    InstallationLocation = 0x81,
    FaultStatus = 0x88,
    ManufacturerCode = 0x8A,
    Coefficient = 0xD3,
    EffectiveDigits = 0xD7,
    UnitForCumulativeAmounts = 0xE1,
    DayForHistoricalData1 = 0xE5,
    InstantaneousPower = 0xE7,
    InstantaneousCurrents = 0xE8,
    CumulativeAtFixedTime = 0xEA,
    DayForHistoricalData2 = 0xED,
}

// typed property values {{{

/// Multiplier for cumulative readings. Meters that omit it use 1.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Coefficient(pub u32);

impl Default for Coefficient {
    fn default() -> Self {
        Self(1)
    }
}

/// Significant digit count of the cumulative register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EffectiveDigits(pub u8);

/// Unit code for cumulative amounts; maps to a power of ten of 1 kWh.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Unit(pub u8);

impl Unit {
    fn find(&self) -> Option<(i8, &'static str)> {
        match self.0 {
            0x00 => Some((0, "*1 kwh")),
            0x01 => Some((-1, "*0.1 kwh")),
            0x02 => Some((-2, "*0.01 kwh")),
            0x03 => Some((-3, "*0.001 kwh")),
            0x04 => Some((-4, "*0.0001 kwh")),
            0x0A => Some((1, "*10 kwh")),
            0x0B => Some((2, "*100 kwh")),
            0x0C => Some((3, "*1000 kwh")),
            0x0D => Some((4, "*10000 kwh")),
            _ => None,
        }
    }

    pub fn powers_of_10(&self) -> Option<i8> {
        self.find().map(|(e, _)| e)
    }

    pub fn description(&self) -> Option<&'static str> {
        self.find().map(|(_, d)| d)
    }
}

/// Instantaneous power in watts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InstantWatt(pub u32);

impl std::fmt::Display for InstantWatt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} W", self.0)
    }
}

/// Instantaneous current per phase, in tenths of an ampere.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InstantAmpere {
    pub r_deciampere: u16,
    pub t_deciampere: u16,
}

impl InstantAmpere {
    pub fn ampere_r(&self) -> f64 {
        f64::from(self.r_deciampere) / 10.0
    }

    pub fn ampere_t(&self) -> f64 {
        f64::from(self.t_deciampere) / 10.0
    }
}

impl std::fmt::Display for InstantAmpere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R: {:.1} A, T: {:.1} A", self.ampere_r(), self.ampere_t())
    }
}

/// Cumulative watt-hours measured at a fixed time, kept as the raw
/// 11-byte payload the meter sent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CumulativeWattHour(pub [u8; 11]);

impl CumulativeWattHour {
    pub fn year(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn month(&self) -> u8 {
        self.0[2]
    }

    pub fn day(&self) -> u8 {
        self.0[3]
    }

    pub fn hour(&self) -> u8 {
        self.0[4]
    }

    pub fn minutes(&self) -> u8 {
        self.0[5]
    }

    pub fn seconds(&self) -> u8 {
        self.0[6]
    }

    pub fn raw_watt_hour(&self) -> u32 {
        u32::from_be_bytes([self.0[7], self.0[8], self.0[9], self.0[10]])
    }

    /// The meter sometimes reports 0xFF in the seconds field; such a
    /// reading carries no usable timestamp.
    pub fn valid(&self) -> bool {
        self.seconds() <= 60
    }

    /// Timestamp as UNIX time. The measurement clock runs in JST.
    pub fn to_unix_time(&self) -> Option<i64> {
        self.to_datetime().map(|dt| dt.timestamp())
    }

    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        if !self.valid() {
            return None;
        }
        let jst = FixedOffset::east_opt(9 * 3600)?;
        match jst.with_ymd_and_hms(
            i32::from(self.year()),
            u32::from(self.month()),
            u32::from(self.day()),
            u32::from(self.hour()),
            u32::from(self.minutes()),
            u32::from(self.seconds()),
        ) {
            LocalResult::Single(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn to_iso8601(&self) -> Option<String> {
        if !self.valid() {
            return None;
        }
        Some(format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}+09:00",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minutes(),
            self.seconds()
        ))
    }
}

impl std::fmt::Display for CumulativeWattHour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02} {:02}:{:02}:{:02} {}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minutes(),
            self.seconds(),
            self.raw_watt_hour()
        )
    }
} // }}}

/// A value decoded from one meter property.
#[derive(Clone, PartialEq, Debug)]
pub enum MeterValue {
    Coefficient(Coefficient),
    EffectiveDigits(EffectiveDigits),
    Unit(Unit),
    InstantWatt(InstantWatt),
    InstantAmpere(InstantAmpere),
    CumulativeWattHour(CumulativeWattHour),
}

/// Result of inspecting one property record. `Ignored` covers valid but
/// electrically uninteresting device state; `Error` covers malformed
/// records and unknown codes.
#[derive(Clone, PartialEq, Debug)]
pub enum Pickup {
    Value(MeterValue),
    Ignored(String),
    Error(String),
}

/// Interpret one property record of the meter class.
pub fn pick_meter_data(prop: &EchonetLiteProp) -> Pickup {
    match prop.epc {
        0x80 => match prop.edt.as_slice() {
            [0x30] => Pickup::Ignored("operation status: ON".to_string()),
            [0x31] => Pickup::Ignored("operation status: OFF".to_string()),
            [other] => Pickup::Ignored(format!("operation status: 0x{:02X}", other)),
            _ => Pickup::Error(format!(
                "operation status: pdc should be 1 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0x81 => match prop.edt.len() {
            1 => Pickup::Ignored(format!("installation location: 0x{:02X}", prop.edt[0])),
            17 => Pickup::Ignored("installation location".to_string()),
            n => Pickup::Error(format!(
                "installation location: pdc should be 1 or 17 bytes, this is {} bytes",
                n
            )),
        },
        0x88 => match prop.edt.as_slice() {
            [0x41] => Pickup::Ignored("fault status: fault occurred".to_string()),
            [0x42] => Pickup::Ignored("fault status: no fault".to_string()),
            [other] => Pickup::Ignored(format!("fault status: 0x{:02X}", other)),
            _ => Pickup::Error(format!(
                "fault status: pdc should be 1 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0x8A => match prop.edt.as_slice() {
            [a, b, c] => Pickup::Ignored(format!("manufacturer: 0x{:02X}{:02X}{:02X}", a, b, c)),
            _ => Pickup::Error(format!(
                "manufacturer code: pdc should be 3 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xD3 => {
            // A missing or oddly sized coefficient means "multiply by 1",
            // unlike every other property where a bad length is an error.
            let coefficient = match prop.edt.as_slice() {
                [a, b, c, d] => Coefficient(u32::from_be_bytes([*a, *b, *c, *d])),
                _ => Coefficient::default(),
            };
            Pickup::Value(MeterValue::Coefficient(coefficient))
        }
        0xD7 => match prop.edt.as_slice() {
            [digits] => Pickup::Value(MeterValue::EffectiveDigits(EffectiveDigits(*digits))),
            _ => Pickup::Error(format!(
                "effective digits: pdc should be 1 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xE1 => match prop.edt.as_slice() {
            [code] => {
                let unit = Unit(*code);
                if unit.find().is_none() {
                    Pickup::Error(format!("invalid unit: 0x{:02X}", code))
                } else {
                    Pickup::Value(MeterValue::Unit(unit))
                }
            }
            _ => Pickup::Error(format!(
                "unit: pdc should be 1 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xE5 => match prop.edt.as_slice() {
            [day] => Pickup::Ignored(format!("day of historical 1: ({})", day)),
            _ => Pickup::Error(format!(
                "day of historical 1: pdc should be 1 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xE7 => match prop.edt.as_slice() {
            [a, b, c, d] => Pickup::Value(MeterValue::InstantWatt(InstantWatt(
                u32::from_be_bytes([*a, *b, *c, *d]),
            ))),
            _ => Pickup::Error(format!(
                "instantaneous power: pdc should be 4 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xE8 => match prop.edt.as_slice() {
            [a, b, c, d] => Pickup::Value(MeterValue::InstantAmpere(InstantAmpere {
                r_deciampere: u16::from_be_bytes([*a, *b]),
                t_deciampere: u16::from_be_bytes([*c, *d]),
            })),
            _ => Pickup::Error(format!(
                "instantaneous currents: pdc should be 4 bytes, this is {} bytes",
                prop.edt.len()
            )),
        },
        0xEA => {
            if prop.edt.len() == 11 {
                let mut payload = [0u8; 11];
                payload.copy_from_slice(&prop.edt);
                Pickup::Value(MeterValue::CumulativeWattHour(CumulativeWattHour(payload)))
            } else {
                Pickup::Error(format!(
                    "cumulative watt hour: pdc should be 11 bytes, this is {} bytes",
                    prop.edt.len()
                ))
            }
        }
        0xED => match prop.edt.len() {
            7 => Pickup::Ignored(format!("day of historical 2: [{}]", hex::encode_upper(&prop.edt))),
            n => Pickup::Error(format!(
                "day of historical 2: pdc should be 7 bytes, this is {} bytes",
                n
            )),
        },
        epc => Pickup::Error(format!("unknown epc: 0x{:02X}", epc)),
    }
}

/// Cumulative energy in kWh: coefficient × raw × 10^unit-exponent.
/// An unmapped unit falls back to exponent 0.
pub fn cumulative_kilowatt_hours(
    cwh: &CumulativeWattHour,
    coefficient: Coefficient,
    unit: Unit,
) -> f64 {
    let exponent = unit.powers_of_10().unwrap_or(0);
    f64::from(coefficient.0) * f64::from(cwh.raw_watt_hour()) * 10f64.powi(i32::from(exponent))
}

/// Exact kWh string for display: the decimal point is shifted by the
/// unit's power of ten instead of going through floating point.
pub fn format_cumulative_kwh_string(
    cwh: &CumulativeWattHour,
    coefficient: Option<Coefficient>,
    unit: Unit,
) -> String {
    let coefficient = coefficient.unwrap_or_default();
    let value = u64::from(coefficient.0) * u64::from(cwh.raw_watt_hour());
    let mut kwh = value.to_string();
    let exponent = unit.powers_of_10().unwrap_or(0);
    if exponent > 0 {
        kwh.push_str(&"0".repeat(exponent as usize));
        kwh.push('.');
    } else if exponent == 0 {
        kwh.push('.');
    } else {
        let fractional = (-exponent) as usize;
        while kwh.len() < fractional + 1 {
            kwh.insert(0, '0');
        }
        kwh.insert(kwh.len() - fractional, '.');
    }
    kwh
}
