use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::echonet::properties::{
    Coefficient, CumulativeWattHour, EffectiveDigits, InstantAmpere, InstantWatt, Unit,
};

/// Latest decoded readings from the meter. The session task is the only
/// writer; display and telemetry consumers read snapshots.
#[derive(Clone, Default, Debug)]
pub struct ElectricPowerData {
    pub coefficient: Option<Coefficient>,
    pub unit: Option<Unit>,
    pub effective_digits: Option<EffectiveDigits>,
    pub instant_watt: Option<(DateTime<Utc>, InstantWatt)>,
    pub instant_ampere: Option<(DateTime<Utc>, InstantAmpere)>,
    pub cumulative_watt_hour: Option<CumulativeWattHour>,
}

#[derive(Clone, Default)]
pub struct TelemetryRepository {
    inner: Arc<RwLock<ElectricPowerData>>,
}

impl TelemetryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ElectricPowerData {
        self.inner.read().unwrap().clone()
    }

    pub fn set_coefficient(&self, coefficient: Coefficient) {
        self.inner.write().unwrap().coefficient = Some(coefficient);
    }

    pub fn set_unit(&self, unit: Unit) {
        self.inner.write().unwrap().unit = Some(unit);
    }

    pub fn set_effective_digits(&self, digits: EffectiveDigits) {
        self.inner.write().unwrap().effective_digits = Some(digits);
    }

    pub fn set_instant_watt(&self, at: DateTime<Utc>, watt: InstantWatt) {
        self.inner.write().unwrap().instant_watt = Some((at, watt));
    }

    pub fn set_instant_ampere(&self, at: DateTime<Utc>, ampere: InstantAmpere) {
        self.inner.write().unwrap().instant_ampere = Some((at, ampere));
    }

    pub fn set_cumulative_watt_hour(&self, cwh: CumulativeWattHour) {
        self.inner.write().unwrap().cumulative_watt_hour = Some(cwh);
    }

    /// Age of the cached cumulative reading against its own measurement
    /// timestamp, in whole minutes. `None` when nothing valid is cached.
    pub fn cumulative_age_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        let cwh = self.inner.read().unwrap().cumulative_watt_hour?;
        let measured = cwh.to_unix_time()?;
        Some((now.timestamp() - measured) / 60)
    }

    /// Drop readings that described the previous PANA session.
    pub fn clear_instant_readings(&self) {
        let mut data = self.inner.write().unwrap();
        data.instant_watt = None;
        data.instant_ampere = None;
    }
}
