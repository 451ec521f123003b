use serde::{Serialize, Serializer};
use std::fmt;

/// A percentage held as integer hundredths, so it always renders with
/// exactly two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Percentage {
    hundredths: u64,
}

impl Percentage {
    pub const ZERO: Percentage = Percentage { hundredths: 0 };

    pub fn of(part: u64, whole: u64) -> Self {
        if whole == 0 {
            return Self::ZERO;
        }
        let scaled = u128::from(part) * 10_000;
        let whole = u128::from(whole);
        let hundredths = (scaled + whole / 2) / whole;
        Self {
            hundredths: u64::try_from(hundredths).unwrap_or(u64::MAX),
        }
    }

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self { hundredths }
    }

    pub const fn hundredths(self) -> u64 {
        self.hundredths
    }

    pub fn as_f64(self) -> f64 {
        self.hundredths as f64 / 100.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.hundredths / 100, self.hundredths % 100)
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_servers: u64,
    pub total_compliant: u64,
    pub total_non_compliant: u64,
    pub compliance_percentage: Percentage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    pub compliant: u64,
    pub non_compliant: u64,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compliant: 0,
            non_compliant: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.compliant.saturating_add(self.non_compliant)
    }

    pub fn percentage(&self) -> Percentage {
        Percentage::of(self.compliant, self.total())
    }
}

pub type RegionTotals = Bucket;
pub type AppTotals = Bucket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedRegion {
    pub app: String,
    pub region: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedApp {
    pub app: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub totals: Totals,
    pub by_region: Vec<RegionTotals>,
    pub by_app: Vec<AppTotals>,
    pub excluded_regions: Vec<ExcludedRegion>,
    pub excluded_apps: Vec<ExcludedApp>,
}

impl Aggregates {
    pub fn region(&self, name: &str) -> Option<&RegionTotals> {
        self.by_region.iter().find(|b| b.name == name)
    }

    pub fn app(&self, name: &str) -> Option<&AppTotals> {
        self.by_app.iter().find(|b| b.name == name)
    }

    pub fn has_exclusions(&self) -> bool {
        !self.excluded_regions.is_empty() || !self.excluded_apps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_up_to_two_decimals() {
        assert_eq!(Percentage::of(1, 2).to_string(), "50.00");
        assert_eq!(Percentage::of(1, 3).to_string(), "33.33");
        assert_eq!(Percentage::of(2, 3).to_string(), "66.67");
        assert_eq!(Percentage::of(1, 8).to_string(), "12.50");
        assert_eq!(Percentage::of(7, 7).to_string(), "100.00");
        assert_eq!(Percentage::of(0, 0), Percentage::ZERO);
        assert_eq!(Percentage::ZERO.to_string(), "0.00");
    }

    #[test]
    fn percentage_serializes_as_number() {
        let v = serde_json::to_value(Percentage::of(1, 2)).unwrap();
        assert_eq!(v, serde_json::json!(50.0));
    }

    #[test]
    fn bucket_percentage_uses_its_own_pair() {
        let bucket = Bucket {
            name: "eu".to_string(),
            compliant: 3,
            non_compliant: 1,
        };
        assert_eq!(bucket.total(), 4);
        assert_eq!(bucket.percentage().to_string(), "75.00");
    }
}
