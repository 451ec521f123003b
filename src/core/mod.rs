mod payload;
mod row;
mod summary;

pub use payload::{
    AppReport, AppSection, CompliancePayload, PayloadShape, RegionCounts, RegionReport,
    ServerRecord, UNKNOWN_APP,
};
pub use row::{COMPLIANT_REASON, Row, RowField, Status, UNKNOWN_REASON};
pub use summary::{
    Aggregates, AppTotals, Bucket, ExcludedApp, ExcludedRegion, Percentage, RegionTotals, Totals,
};
