//! Recurring schedules and their calendar arithmetic.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, PaymentMethod, ResultEngine, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Length of one cycle in calendar months.
    #[must_use]
    pub const fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Yearly => 12,
        }
    }

    /// Due date of cycle `n` counted from `start` (cycle 0 is `start` itself).
    ///
    /// Always computed from the anchor, so a day clamped at the end of a short
    /// month (Jan 31 → Feb 29) does not carry over into later cycles.
    pub fn nth_due(self, start: NaiveDate, n: u32) -> ResultEngine<NaiveDate> {
        n.checked_mul(self.months())
            .and_then(|months| start.checked_add_months(Months::new(months)))
            .ok_or_else(|| EngineError::Validation("schedule date out of range".to_string()))
    }

    /// First due date for a schedule starting on `start`.
    pub fn first_due(self, start: NaiveDate) -> ResultEngine<NaiveDate> {
        self.nth_due(start, 1)
    }

    /// Due date following `previous` on the schedule anchored at `start`.
    pub fn next_due_after(self, start: NaiveDate, previous: NaiveDate) -> ResultEngine<NaiveDate> {
        let elapsed = (previous.year() - start.year()) * 12 + previous.month() as i32
            - start.month() as i32;
        let cycles = u32::try_from(elapsed.max(0)).unwrap_or(0) / self.months();

        let mut n = cycles + 1;
        loop {
            let candidate = self.nth_due(start, n)?;
            if candidate > previous {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

impl core::fmt::Display for Frequency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Frequency {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" | "annually" => Ok(Self::Yearly),
            other => Err(EngineError::UnsupportedFrequency(other.to_string())),
        }
    }
}

impl FromStr for Frequency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<&str> for ScheduleStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::InvalidState(format!(
                "unknown schedule status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: Uuid,
    pub donor_id: String,
    pub campaign_id: String,
    pub origin_donation_id: Uuid,
    pub amount_minor: i64,
    pub frequency: Frequency,
    pub method: PaymentMethod,
    /// Normalized MSISDN, captured once the origin donation's push starts.
    pub phone: Option<String>,
    pub next_due_date: NaiveDate,
    pub status: ScheduleStatus,
    pub start_date: NaiveDate,
    pub consecutive_failures: i32,
    pub last_failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringSchedule {
    pub fn new(
        donor_id: String,
        campaign_id: String,
        origin_donation_id: Uuid,
        amount_minor: i64,
        frequency: Frequency,
        method: PaymentMethod,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        let start_date = created_at.date_naive();
        Ok(Self {
            id: Uuid::new_v4(),
            donor_id,
            campaign_id,
            origin_donation_id,
            amount_minor,
            frequency,
            method,
            phone: None,
            next_due_date: frequency.first_due(start_date)?,
            status: ScheduleStatus::Active,
            start_date,
            consecutive_failures: 0,
            last_failure: None,
            created_at,
            updated_at: created_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "recurring_schedules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub donor_id: String,
    pub campaign_id: String,
    pub origin_donation_id: String,
    pub amount_minor: i64,
    pub frequency: String,
    pub method: String,
    pub phone: Option<String>,
    pub next_due_date: Date,
    pub status: String,
    pub start_date: Date,
    pub consecutive_failures: i32,
    pub last_failure: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&RecurringSchedule> for ActiveModel {
    fn from(value: &RecurringSchedule) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            donor_id: ActiveValue::Set(value.donor_id.clone()),
            campaign_id: ActiveValue::Set(value.campaign_id.clone()),
            origin_donation_id: ActiveValue::Set(value.origin_donation_id.to_string()),
            amount_minor: ActiveValue::Set(value.amount_minor),
            frequency: ActiveValue::Set(value.frequency.as_str().to_string()),
            method: ActiveValue::Set(value.method.as_str().to_string()),
            phone: ActiveValue::Set(value.phone.clone()),
            next_due_date: ActiveValue::Set(value.next_due_date),
            status: ActiveValue::Set(value.status.as_str().to_string()),
            start_date: ActiveValue::Set(value.start_date),
            consecutive_failures: ActiveValue::Set(value.consecutive_failures),
            last_failure: ActiveValue::Set(value.last_failure.clone()),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for RecurringSchedule {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "schedule")?,
            donor_id: model.donor_id,
            campaign_id: model.campaign_id,
            origin_donation_id: parse_uuid(&model.origin_donation_id, "donation")?,
            amount_minor: model.amount_minor,
            frequency: Frequency::try_from(model.frequency.as_str())?,
            method: PaymentMethod::try_from(model.method.as_str())?,
            phone: model.phone,
            next_due_date: model.next_due_date,
            status: ScheduleStatus::try_from(model.status.as_str())?,
            start_date: model.start_date,
            consecutive_failures: model.consecutive_failures,
            last_failure: model.last_failure,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn first_due_is_one_interval_after_start() {
        let start = date(2024, 1, 15);
        assert_eq!(Frequency::Monthly.first_due(start).unwrap(), date(2024, 2, 15));
        assert_eq!(Frequency::Quarterly.first_due(start).unwrap(), date(2024, 4, 15));
        assert_eq!(Frequency::Yearly.first_due(start).unwrap(), date(2025, 1, 15));
    }

    #[test]
    fn advances_exactly_one_interval() {
        let start = date(2024, 1, 15);
        assert_eq!(
            Frequency::Monthly.next_due_after(start, date(2024, 2, 15)).unwrap(),
            date(2024, 3, 15)
        );
        assert_eq!(
            Frequency::Quarterly.next_due_after(start, date(2024, 4, 15)).unwrap(),
            date(2024, 7, 15)
        );
    }

    #[test]
    fn month_end_clamping_does_not_drift() {
        let start = date(2024, 1, 31);
        let feb = Frequency::Monthly.first_due(start).unwrap();
        assert_eq!(feb, date(2024, 2, 29));

        let mar = Frequency::Monthly.next_due_after(start, feb).unwrap();
        assert_eq!(mar, date(2024, 3, 31));

        let apr = Frequency::Monthly.next_due_after(start, mar).unwrap();
        assert_eq!(apr, date(2024, 4, 30));

        let may = Frequency::Monthly.next_due_after(start, apr).unwrap();
        assert_eq!(may, date(2024, 5, 31));
    }

    #[test]
    fn leap_day_yearly_schedule() {
        let start = date(2024, 2, 29);
        let first = Frequency::Yearly.first_due(start).unwrap();
        assert_eq!(first, date(2025, 2, 28));
        assert_eq!(
            Frequency::Yearly.next_due_after(start, date(2027, 2, 28)).unwrap(),
            date(2028, 2, 29)
        );
    }

    #[test]
    fn unknown_frequency_is_rejected() {
        assert_eq!(
            Frequency::try_from("weekly"),
            Err(EngineError::UnsupportedFrequency("weekly".to_string()))
        );
        assert_eq!("Monthly".parse::<Frequency>().unwrap(), Frequency::Monthly);
    }
}
