//! Privacy budget key/unit model and the consume request/response shapes.
//!
//! Wire format is camelCase JSON, with reporting windows as RFC 3339 timestamps:
//!
//! ```json
//! { "privacyBudgetKey": "k1", "reportingWindow": "2024-05-01T13:00:00Z" }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest number of units accepted in a single consume request.
pub const MAX_UNITS_PER_REQUEST: usize = 30_000;

/// Granularity of reporting windows, in seconds.
pub const REPORTING_WINDOW_SECS: i64 = 3600;

/// Truncate an event time down to the start of its reporting window.
pub fn truncate_to_window(event_time: DateTime<Utc>) -> DateTime<Utc> {
    // duration_trunc only fails for spans that do not fit in i64 nanoseconds
    event_time
        .duration_trunc(TimeDelta::seconds(REPORTING_WINDOW_SECS))
        .unwrap_or(event_time)
}

/// Storage-side identity of one chargeable budget: key plus reporting window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrivacyBudgetKey {
    pub key: String,
    pub reporting_window: DateTime<Utc>,
}

impl PrivacyBudgetKey {
    pub fn new(key: impl Into<String>, reporting_window: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            reporting_window,
        }
    }
}

/// Client-facing budget unit carried in requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyBudgetUnit {
    pub privacy_budget_key: String,
    pub reporting_window: DateTime<Utc>,
}

impl PrivacyBudgetUnit {
    pub fn new(privacy_budget_key: impl Into<String>, reporting_window: DateTime<Utc>) -> Self {
        Self {
            privacy_budget_key: privacy_budget_key.into(),
            reporting_window,
        }
    }

    /// Build a unit for an event, bucketing the event time into its window.
    pub fn for_event(privacy_budget_key: impl Into<String>, event_time: DateTime<Utc>) -> Self {
        Self::new(privacy_budget_key, truncate_to_window(event_time))
    }
}

impl fmt::Display for PrivacyBudgetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.privacy_budget_key,
            self.reporting_window.to_rfc3339()
        )
    }
}

/// Parses the `key@timestamp` form produced by `Display`. The timestamp is
/// bucketed into its reporting window.
impl FromStr for PrivacyBudgetUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, at) = s.rsplit_once('@').ok_or_else(|| {
            Error::InvalidArgument(format!("expected <key>@<rfc3339>, got {:?}", s))
        })?;
        let event_time = DateTime::parse_from_rfc3339(at)
            .map_err(|e| Error::InvalidArgument(format!("bad timestamp {:?}: {}", at, e)))?;
        Ok(Self::for_event(key, event_time.with_timezone(&Utc)))
    }
}

impl From<PrivacyBudgetKey> for PrivacyBudgetUnit {
    fn from(k: PrivacyBudgetKey) -> Self {
        Self::new(k.key, k.reporting_window)
    }
}

impl From<&PrivacyBudgetUnit> for PrivacyBudgetKey {
    fn from(u: &PrivacyBudgetUnit) -> Self {
        Self::new(u.privacy_budget_key.clone(), u.reporting_window)
    }
}

/// Persisted ledger row for one (origin, key, window).
///
/// `consumed_budget_count` never decreases and never exceeds the limit in force
/// when it was last incremented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyBudgetRecord {
    pub privacy_budget_key: String,
    pub reporting_window: DateTime<Utc>,
    pub consumed_budget_count: u32,
}

impl PrivacyBudgetRecord {
    pub fn new(key: &PrivacyBudgetKey, consumed_budget_count: u32) -> Self {
        Self {
            privacy_budget_key: key.key.clone(),
            reporting_window: key.reporting_window,
            consumed_budget_count,
        }
    }

    pub fn is_exhausted(&self, limit: u32) -> bool {
        self.consumed_budget_count >= limit
    }
}

/// A batch of units to charge on behalf of one reporting origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumePrivacyBudgetRequest {
    /// Reporting origin (ad-tech site) the budget is charged to.
    attribution_report_to: String,
    privacy_budget_units: Vec<PrivacyBudgetUnit>,
    /// Overrides the coordinator's default limit for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    privacy_budget_limit: Option<u32>,
}

impl ConsumePrivacyBudgetRequest {
    /// Build a validated request.
    pub fn new(
        attribution_report_to: impl Into<String>,
        privacy_budget_units: Vec<PrivacyBudgetUnit>,
    ) -> Result<Self> {
        let request = Self {
            attribution_report_to: attribution_report_to.into(),
            privacy_budget_units,
            privacy_budget_limit: None,
        };
        request.validate()?;
        Ok(request)
    }

    /// Same request with an explicit per-call budget limit.
    pub fn with_limit(mut self, limit: u32) -> Result<Self> {
        self.privacy_budget_limit = Some(limit);
        self.validate()?;
        Ok(self)
    }

    pub fn attribution_report_to(&self) -> &str {
        &self.attribution_report_to
    }

    pub fn units(&self) -> &[PrivacyBudgetUnit] {
        &self.privacy_budget_units
    }

    pub fn privacy_budget_limit(&self) -> Option<u32> {
        self.privacy_budget_limit
    }

    /// Structural checks. Deserialized requests must be validated before use.
    pub fn validate(&self) -> Result<()> {
        if self.attribution_report_to.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "attributionReportTo cannot be empty".into(),
            ));
        }
        if self.privacy_budget_units.is_empty() {
            return Err(Error::InvalidArgument(
                "privacyBudgetUnits was empty; a non-empty list must be provided".into(),
            ));
        }
        if self.privacy_budget_units.len() > MAX_UNITS_PER_REQUEST {
            return Err(Error::InvalidArgument(format!(
                "privacyBudgetUnits has {} entries; at most {} are allowed",
                self.privacy_budget_units.len(),
                MAX_UNITS_PER_REQUEST
            )));
        }
        let empty_keys: Vec<String> = self
            .privacy_budget_units
            .iter()
            .filter(|u| u.privacy_budget_key.is_empty())
            .map(|u| u.to_string())
            .collect();
        if !empty_keys.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "privacyBudgetKey cannot be empty; offending units: [{}]",
                empty_keys.join(", ")
            )));
        }
        if self.privacy_budget_limit == Some(0) {
            return Err(Error::InvalidArgument(
                "privacyBudgetLimit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Units from the request that could not be charged.
///
/// Ordered by first appearance in the request, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumePrivacyBudgetResponse {
    pub exhausted_privacy_budget_units: Vec<PrivacyBudgetUnit>,
}

impl ConsumePrivacyBudgetResponse {
    /// Every unit in the request was charged.
    pub fn budget_available_for_all() -> Self {
        Self::default()
    }

    pub fn exhausted(units: Vec<PrivacyBudgetUnit>) -> Self {
        let mut seen = HashSet::new();
        let exhausted_privacy_budget_units =
            units.into_iter().filter(|u| seen.insert(u.clone())).collect();
        Self {
            exhausted_privacy_budget_units,
        }
    }

    pub fn is_fully_cleared(&self) -> bool {
        self.exhausted_privacy_budget_units.is_empty()
    }

    pub fn is_exhausted(&self, unit: &PrivacyBudgetUnit) -> bool {
        self.exhausted_privacy_budget_units.contains(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_unit_wire_shape() {
        let unit = PrivacyBudgetUnit::new("k1", t0());
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["privacyBudgetKey"], "k1");
        assert_eq!(json["reportingWindow"], "2024-05-01T13:00:00Z");

        let parsed: PrivacyBudgetUnit = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, unit);
    }

    #[test]
    fn test_for_event_truncates_to_hour() {
        let event = Utc.with_ymd_and_hms(2024, 5, 1, 13, 42, 17).unwrap();
        let unit = PrivacyBudgetUnit::for_event("k", event);
        assert_eq!(unit.reporting_window, t0());
    }

    #[test]
    fn test_parse_unit() {
        let unit: PrivacyBudgetUnit = "campaign@42@2024-05-01T13:42:00+02:00".parse().unwrap();
        assert_eq!(unit.privacy_budget_key, "campaign@42");
        assert_eq!(unit.reporting_window, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());

        let shown = PrivacyBudgetUnit::new("k1", t0()).to_string();
        assert_eq!(shown.parse::<PrivacyBudgetUnit>().unwrap(), PrivacyBudgetUnit::new("k1", t0()));

        assert!("no-timestamp".parse::<PrivacyBudgetUnit>().is_err());
        assert!("k@yesterday".parse::<PrivacyBudgetUnit>().is_err());
    }

    #[test]
    fn test_key_equality_needs_both_fields() {
        let a = PrivacyBudgetKey::new("k", t0());
        let b = PrivacyBudgetKey::new("k", t0() + TimeDelta::hours(1));
        let c = PrivacyBudgetKey::new("other", t0());
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, PrivacyBudgetKey::new("k", t0()));
    }

    #[test]
    fn test_request_rejects_empty_units() {
        let err = ConsumePrivacyBudgetRequest::new("abc.com", vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_request_rejects_empty_origin() {
        let err = ConsumePrivacyBudgetRequest::new("", vec![PrivacyBudgetUnit::new("k", t0())])
            .unwrap_err();
        assert!(err.to_string().contains("attributionReportTo"));
    }

    #[test]
    fn test_request_names_empty_keys() {
        let units = vec![PrivacyBudgetUnit::new("ok", t0()), PrivacyBudgetUnit::new("", t0())];
        let err = ConsumePrivacyBudgetRequest::new("abc.com", units).unwrap_err();
        assert!(err.to_string().contains("@2024-05-01T13:00:00"));
    }

    #[test]
    fn test_request_rejects_oversized_batch() {
        let units = (0..=MAX_UNITS_PER_REQUEST)
            .map(|i| PrivacyBudgetUnit::new(format!("k-{i}"), t0()))
            .collect();
        assert!(ConsumePrivacyBudgetRequest::new("abc.com", units).is_err());
    }

    #[test]
    fn test_request_rejects_zero_limit() {
        let req =
            ConsumePrivacyBudgetRequest::new("abc.com", vec![PrivacyBudgetUnit::new("k", t0())])
                .unwrap();
        assert!(req.clone().with_limit(0).is_err());
        assert_eq!(req.with_limit(3).unwrap().privacy_budget_limit(), Some(3));
    }

    #[test]
    fn test_request_wire_shape_omits_absent_limit() {
        let req =
            ConsumePrivacyBudgetRequest::new("abc.com", vec![PrivacyBudgetUnit::new("k", t0())])
                .unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["attributionReportTo"], "abc.com");
        assert!(json["privacyBudgetUnits"].is_array());
        assert!(json.get("privacyBudgetLimit").is_none());
    }

    #[test]
    fn test_response_dedupes_units() {
        let k = PrivacyBudgetUnit::new("k", t0());
        let resp = ConsumePrivacyBudgetResponse::exhausted(vec![k.clone(), k.clone()]);
        assert_eq!(resp.exhausted_privacy_budget_units.len(), 1);
        assert!(resp.is_exhausted(&k));
        assert!(!resp.is_fully_cleared());
        assert!(ConsumePrivacyBudgetResponse::budget_available_for_all().is_fully_cleared());
    }

    #[test]
    fn test_record_exhaustion() {
        let record = PrivacyBudgetRecord::new(&PrivacyBudgetKey::new("k", t0()), 1);
        assert!(record.is_exhausted(1));
        assert!(!record.is_exhausted(2));
    }
}
