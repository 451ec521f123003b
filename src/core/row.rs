use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const COMPLIANT_REASON: &str = "Current week";
pub const UNKNOWN_REASON: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Compliant,
    NonCompliant,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Compliant => "compliant",
            Status::NonCompliant => "non-compliant",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Status::Compliant => "Compliant",
            Status::NonCompliant => "Non-Compliant",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compliant" => Ok(Status::Compliant),
            "non-compliant" | "noncompliant" | "non_compliant" => Ok(Status::NonCompliant),
            other => Err(format!(
                "invalid status: {other} (expected compliant|non-compliant)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub app: String,
    pub region: String,
    pub server_name: String,
    pub image_name: String,
    pub image_id: String,
    pub status: Status,
    pub image_year: Option<i32>,
    pub image_week: Option<u32>,
    pub reason: String,
}

impl Row {
    pub fn image_week_label(&self) -> String {
        match (self.image_year, self.image_week) {
            (Some(year), Some(week)) if year != 0 && week != 0 => format!("{year}-W{week:02}"),
            _ => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowField {
    App,
    Region,
    ServerName,
    ImageName,
    ImageId,
    Status,
    ImageYear,
    ImageWeek,
    Reason,
}

impl RowField {
    pub const ALL: [RowField; 9] = [
        RowField::App,
        RowField::Region,
        RowField::ServerName,
        RowField::ImageName,
        RowField::ImageId,
        RowField::Status,
        RowField::ImageYear,
        RowField::ImageWeek,
        RowField::Reason,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RowField::App => "app",
            RowField::Region => "region",
            RowField::ServerName => "server",
            RowField::ImageName => "image",
            RowField::ImageId => "image-id",
            RowField::Status => "status",
            RowField::ImageYear => "year",
            RowField::ImageWeek => "week",
            RowField::Reason => "reason",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RowField::App => "App",
            RowField::Region => "Region",
            RowField::ServerName => "Server Name",
            RowField::ImageName => "Image Name",
            RowField::ImageId => "Image ID",
            RowField::Status => "Status",
            RowField::ImageYear => "Image Year",
            RowField::ImageWeek => "Image Week",
            RowField::Reason => "Reason",
        }
    }
}

impl fmt::Display for RowField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        match key.as_str() {
            "app" => Ok(RowField::App),
            "region" => Ok(RowField::Region),
            "server" | "server-name" | "servername" => Ok(RowField::ServerName),
            "image" | "image-name" | "imagename" => Ok(RowField::ImageName),
            "image-id" | "imageid" => Ok(RowField::ImageId),
            "status" => Ok(RowField::Status),
            "year" | "image-year" | "imageyear" => Ok(RowField::ImageYear),
            "week" | "image-week" | "imageweek" => Ok(RowField::ImageWeek),
            "reason" => Ok(RowField::Reason),
            _ => Err(format!(
                "invalid sort key: {s} (expected app|region|server|image|image-id|status|year|week|reason)"
            )),
        }
    }
}
