use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::core::{Row, RowField, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice<T> {
    All,
    Only(T),
}

impl<T> Default for Choice<T> {
    fn default() -> Self {
        Choice::All
    }
}

impl<T: PartialEq> Choice<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Choice::All => true,
            Choice::Only(want) => want == value,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Choice::All)
    }
}

impl<T: fmt::Display> fmt::Display for Choice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::All => f.write_str("all"),
            Choice::Only(v) => v.fmt(f),
        }
    }
}

impl<T: Serialize> Serialize for Choice<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Choice::All => serializer.serialize_str("all"),
            Choice::Only(v) => v.serialize(serializer),
        }
    }
}

pub type StatusFilter = Choice<Status>;

impl FromStr for Choice<Status> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Choice::All);
        }
        s.parse::<Status>()
            .map(Choice::Only)
            .map_err(|_| format!("invalid status filter: {s} (expected all|compliant|non-compliant)"))
    }
}

impl FromStr for Choice<String> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(Choice::All)
        } else {
            Ok(Choice::Only(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub search_term: String,
    pub status: StatusFilter,
    pub region: Choice<String>,
    pub app: Choice<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.search_term.is_empty()
            && self.status.is_all()
            && self.region.is_all()
            && self.app.is_all()
    }

    pub fn matches(&self, row: &Row) -> bool {
        matches_search(&self.search_term, row)
            && self.status.admits(&row.status)
            && self.region.admits(&row.region)
            && self.app.admits(&row.app)
    }
}

fn matches_search(term: &str, row: &Row) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    row.server_name.to_lowercase().contains(&needle)
        || row.image_name.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            SortDirection::Asc => "↑",
            SortDirection::Desc => "↓",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortState {
    pub key: Option<RowField>,
    pub direction: SortDirection,
}

impl SortState {
    pub fn by(key: RowField, direction: SortDirection) -> Self {
        Self {
            key: Some(key),
            direction,
        }
    }

    pub fn toggle(&mut self, key: RowField) {
        if self.key == Some(key) {
            self.direction = self.direction.flipped();
        } else {
            self.key = Some(key);
            self.direction = SortDirection::Asc;
        }
    }

    pub fn clear(&mut self) {
        *self = SortState::default();
    }
}

pub fn compare_rows(a: &Row, b: &Row, key: RowField) -> Ordering {
    match key {
        RowField::App => a.app.cmp(&b.app),
        RowField::Region => a.region.cmp(&b.region),
        RowField::ServerName => a.server_name.cmp(&b.server_name),
        RowField::ImageName => a.image_name.cmp(&b.image_name),
        RowField::ImageId => a.image_id.cmp(&b.image_id),
        RowField::Status => a.status.as_str().cmp(b.status.as_str()),
        RowField::ImageYear => a.image_year.cmp(&b.image_year),
        RowField::ImageWeek => a.image_week.cmp(&b.image_week),
        RowField::Reason => a.reason.cmp(&b.reason),
    }
}

pub fn select_indices(rows: &[Row], filter: &FilterState, sort: &SortState) -> Vec<usize> {
    let mut out: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| filter.matches(row))
        .map(|(idx, _)| idx)
        .collect();

    if let Some(key) = sort.key {
        // `sort_by` is stable: ties keep flatten order in both directions.
        out.sort_by(|&a, &b| {
            let ord = compare_rows(&rows[a], &rows[b], key);
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    out
}

pub fn select(rows: &[Row], filter: &FilterState, sort: &SortState) -> Vec<Row> {
    select_indices(rows, filter, sort)
        .into_iter()
        .map(|idx| rows[idx].clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub apps: Vec<String>,
}

impl FilterOptions {
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut opts = FilterOptions::default();
        for row in rows {
            if !opts.regions.contains(&row.region) {
                opts.regions.push(row.region.clone());
            }
            if !opts.apps.contains(&row.app) {
                opts.apps.push(row.app.clone());
            }
        }
        opts
    }

    pub fn show_app_column(&self) -> bool {
        self.apps.len() > 1
    }
}

pub fn cycle_choice(current: &Choice<String>, options: &[String], forward: bool) -> Choice<String> {
    if options.is_empty() {
        return Choice::All;
    }
    let pos = match current {
        Choice::All => None,
        Choice::Only(v) => options.iter().position(|o| o == v),
    };
    let len = options.len() + 1;
    let slot = pos.map(|p| p + 1).unwrap_or(0);
    let next = if forward {
        (slot + 1) % len
    } else {
        (slot + len - 1) % len
    };
    match next {
        0 => Choice::All,
        n => Choice::Only(options[n - 1].clone()),
    }
}

pub fn cycle_status(current: StatusFilter) -> StatusFilter {
    match current {
        Choice::All => Choice::Only(Status::Compliant),
        Choice::Only(Status::Compliant) => Choice::Only(Status::NonCompliant),
        Choice::Only(Status::NonCompliant) => Choice::All,
    }
}
