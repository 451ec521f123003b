use std::fmt;
use std::marker::PhantomData;

use anyhow::{Context, Result, bail};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_APP: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, alias = "imageName", deserialize_with = "null_as_default")]
    pub image_name: String,
    #[serde(default, alias = "imageId", deserialize_with = "null_as_default")]
    pub image_id: String,
    #[serde(default, alias = "imageYear", skip_serializing_if = "Option::is_none")]
    pub image_year: Option<i32>,
    #[serde(default, alias = "imageWeek", skip_serializing_if = "Option::is_none")]
    pub image_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Counts and server lists of a region that answered.
///
/// The counts and the lists are independent: `compliant + non_compliant`
/// is not checked against `total_servers`, and neither is checked against
/// the list lengths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionCounts {
    pub total_servers: u64,
    pub compliant: u64,
    pub non_compliant: u64,
    pub good_servers: Vec<ServerRecord>,
    pub bad_servers: Vec<ServerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRegionReport")]
pub enum RegionReport {
    Failed { error: String },
    Reported(RegionCounts),
}

impl RegionReport {
    pub fn counts(&self) -> Option<&RegionCounts> {
        match self {
            RegionReport::Reported(counts) => Some(counts),
            RegionReport::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RegionReport::Failed { error } => Some(error),
            RegionReport::Reported(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRegionReport {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "totalServers", deserialize_with = "null_as_default")]
    total_servers: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    compliant: u64,
    #[serde(default, alias = "nonCompliant", deserialize_with = "null_as_default")]
    non_compliant: u64,
    #[serde(default, alias = "goodServers", deserialize_with = "null_as_default")]
    good_servers: Vec<ServerRecord>,
    #[serde(default, alias = "badServers", deserialize_with = "null_as_default")]
    bad_servers: Vec<ServerRecord>,
}

impl From<RawRegionReport> for RegionReport {
    fn from(raw: RawRegionReport) -> Self {
        // An empty error string is not a failure marker.
        if let Some(error) = raw.error.filter(|e| !e.is_empty()) {
            return RegionReport::Failed { error };
        }
        RegionReport::Reported(RegionCounts {
            total_servers: raw.total_servers,
            compliant: raw.compliant,
            non_compliant: raw.non_compliant,
            good_servers: raw.good_servers,
            bad_servers: raw.bad_servers,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AppReport {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
    #[serde(default, rename = "timestamp", deserialize_with = "lenient_timestamp")]
    pub generated_at: Option<String>,
    #[serde(default, deserialize_with = "ordered_entries")]
    pub regions: Vec<(String, RegionReport)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    MultiApp {
        apps: Vec<(String, AppReport)>,
    },
    SingleApp {
        app_name: String,
        regions: Vec<(String, RegionReport)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawPayload")]
pub struct CompliancePayload {
    pub current_week: u32,
    pub current_year: i32,
    pub generated_at: Option<String>,
    pub shape: PayloadShape,
}

#[derive(Debug, Clone, Copy)]
pub struct AppSection<'a> {
    pub name: &'a str,
    pub error: Option<&'a str>,
    pub regions: &'a [(String, RegionReport)],
}

impl CompliancePayload {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        // Derived struct decoding also takes sequences; only an object is a payload.
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => {}
            Some(_) => bail!("compliance payload must be a JSON object"),
            None => bail!("compliance payload is empty"),
        }
        serde_json::from_slice(bytes).context("failed to decode compliance payload")
    }

    pub fn is_multi_app(&self) -> bool {
        matches!(self.shape, PayloadShape::MultiApp { .. })
    }

    pub fn sections(&self) -> Vec<AppSection<'_>> {
        match &self.shape {
            PayloadShape::MultiApp { apps } => apps
                .iter()
                .map(|(name, app)| AppSection {
                    name: name.as_str(),
                    error: app.error.as_deref(),
                    regions: app.regions.as_slice(),
                })
                .collect(),
            PayloadShape::SingleApp { app_name, regions } => vec![AppSection {
                name: app_name.as_str(),
                error: None,
                regions: regions.as_slice(),
            }],
        }
    }

    pub fn app_names(&self) -> Vec<String> {
        self.sections()
            .into_iter()
            .map(|s| s.name.to_string())
            .collect()
    }

    pub fn reference_week_label(&self) -> String {
        if self.current_week == 0 {
            return "Week N/A".to_string();
        }
        format!("Week {}, {}", self.current_week, self.current_year)
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default, alias = "currentWeek", deserialize_with = "null_as_default")]
    current_week: u32,
    #[serde(default, alias = "currentYear", deserialize_with = "null_as_default")]
    current_year: i32,
    #[serde(default, alias = "appName", deserialize_with = "non_empty_string")]
    app_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "optional_ordered_entries")]
    apps: Option<Vec<(String, AppReport)>>,
    #[serde(default, deserialize_with = "optional_ordered_entries")]
    regions: Option<Vec<(String, RegionReport)>>,
}

impl From<RawPayload> for CompliancePayload {
    fn from(raw: RawPayload) -> Self {
        let shape = match (raw.apps, raw.regions) {
            (Some(apps), _) => PayloadShape::MultiApp { apps },
            (None, regions) => PayloadShape::SingleApp {
                app_name: raw.app_name.unwrap_or_else(|| UNKNOWN_APP.to_string()),
                regions: regions.unwrap_or_default(),
            },
        };
        Self {
            current_week: raw.current_week,
            current_year: raw.current_year,
            generated_at: raw.timestamp,
            shape,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.trim().is_empty()))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(optional_ordered_entries(deserializer)?.unwrap_or_default())
}

fn optional_ordered_entries<'de, D, T>(
    deserializer: D,
) -> Result<Option<Vec<(String, T)>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<OrderedEntries<T>>::deserialize(deserializer)?.map(|e| e.0))
}

struct OrderedEntries<T>(Vec<(String, T)>);

impl<'de, T> Deserialize<'de> for OrderedEntries<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for EntriesVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = OrderedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map keyed by name")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_app_shape_with_defaults() {
        let payload = CompliancePayload::from_json(
            br#"{
                "current_week": 10,
                "current_year": 2024,
                "regions": {
                    "us-east": {
                        "total_servers": 1,
                        "compliant": 1,
                        "good_servers": [{"name": "s1", "image_name": "img", "image_id": "i-1"}]
                    }
                }
            }"#,
        )
        .unwrap();

        assert!(!payload.is_multi_app());
        let PayloadShape::SingleApp { app_name, regions } = &payload.shape else {
            panic!("expected single-app shape");
        };
        assert_eq!(app_name, UNKNOWN_APP);
        let counts = regions[0].1.counts().unwrap();
        assert_eq!(counts.non_compliant, 0);
        assert!(counts.bad_servers.is_empty());
        assert_eq!(counts.good_servers[0].image_year, None);
    }

    #[test]
    fn apps_key_wins_over_regions_key() {
        let payload = CompliancePayload::from_json(
            br#"{"apps": {"b": {"regions": {}}, "a": {"regions": {}}}, "regions": {"x": {}}}"#,
        )
        .unwrap();
        assert!(payload.is_multi_app());
        assert_eq!(payload.app_names(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn keeps_region_order_from_document() {
        let payload = CompliancePayload::from_json(
            br#"{"app_name": "svc", "regions": {"zeta": {}, "alpha": {}, "mid": {}}}"#,
        )
        .unwrap();
        let sections = payload.sections();
        let names: Vec<&str> = sections[0].regions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn error_marker_and_camel_case_aliases() {
        let payload = CompliancePayload::from_json(
            br#"{
                "appName": "svcA",
                "currentWeek": 3,
                "regions": {
                    "down": {"error": "timeout"},
                    "blank-error": {"error": "", "totalServers": 2, "nonCompliant": 2},
                    "nulls": {"compliant": null, "bad_servers": null}
                }
            }"#,
        )
        .unwrap();
        let sections = payload.sections();
        let regions = sections[0].regions;
        assert_eq!(sections[0].name, "svcA");
        assert_eq!(payload.current_week, 3);
        assert_eq!(regions[0].1.error(), Some("timeout"));
        assert_eq!(regions[1].1.counts().unwrap().non_compliant, 2);
        assert_eq!(regions[2].1.counts().unwrap().compliant, 0);
    }

    #[test]
    fn missing_both_shapes_is_an_empty_single_app_payload() {
        let payload = CompliancePayload::from_json(br#"{"current_week": 1}"#).unwrap();
        assert_eq!(
            payload.shape,
            PayloadShape::SingleApp {
                app_name: UNKNOWN_APP.to_string(),
                regions: vec![],
            }
        );
        assert_eq!(payload.reference_week_label(), "Week 1, 0");
    }

    #[test]
    fn rejects_non_object_payload() {
        for body in [
            &b"[1, 2]"[..],
            b"[]",
            b"[10, 2024]",
            b"null",
            b"42",
            b"\"week\"",
            b"  ",
            b"not json",
        ] {
            assert!(
                CompliancePayload::from_json(body).is_err(),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
        let err = CompliancePayload::from_json(b" []").unwrap_err();
        assert!(err.to_string().contains("JSON object"), "{err}");

        let payload = CompliancePayload::from_json(b"\n  {\"current_week\": 3}").unwrap();
        assert_eq!(payload.reference_week_label(), "Week 3, 0");
    }
}
