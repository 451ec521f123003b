use crate::core::{
    Aggregates, AppTotals, Bucket, CompliancePayload, ExcludedApp, ExcludedRegion, Percentage,
    RegionReport, Totals,
};

/// Totals and per-region/per-app breakdowns, read from the count fields only.
///
/// Server lists are never consulted, so a payload whose lists were truncated
/// upstream still aggregates correctly. Regions and apps that report an error
/// contribute nothing and are listed in the `excluded_*` fields instead.
pub fn aggregate(payload: &CompliancePayload) -> Aggregates {
    let mut out = Aggregates::default();
    let multi_app = payload.is_multi_app();

    for section in payload.sections() {
        if let Some(error) = section.error {
            out.excluded_apps.push(ExcludedApp {
                app: section.name.to_string(),
                error: error.to_string(),
            });
            continue;
        }

        let mut app_bucket: Option<AppTotals> = None;
        for (region, report) in section.regions {
            let counts = match report {
                RegionReport::Reported(counts) => counts,
                RegionReport::Failed { error } => {
                    out.excluded_regions.push(ExcludedRegion {
                        app: section.name.to_string(),
                        region: region.clone(),
                        error: error.clone(),
                    });
                    continue;
                }
            };

            add_totals(&mut out.totals, counts.total_servers, counts.compliant, counts.non_compliant);

            let bucket = region_bucket(&mut out.by_region, region);
            add_pair(bucket, counts.compliant, counts.non_compliant);

            let app = app_bucket.get_or_insert_with(|| Bucket::new(section.name));
            add_pair(app, counts.compliant, counts.non_compliant);
        }

        if multi_app {
            out.by_app.extend(app_bucket);
        }
    }

    out.totals.compliance_percentage =
        Percentage::of(out.totals.total_compliant, out.totals.total_servers);
    out
}

fn add_totals(totals: &mut Totals, servers: u64, compliant: u64, non_compliant: u64) {
    totals.total_servers = totals.total_servers.saturating_add(servers);
    totals.total_compliant = totals.total_compliant.saturating_add(compliant);
    totals.total_non_compliant = totals.total_non_compliant.saturating_add(non_compliant);
}

fn add_pair(bucket: &mut Bucket, compliant: u64, non_compliant: u64) {
    bucket.compliant = bucket.compliant.saturating_add(compliant);
    bucket.non_compliant = bucket.non_compliant.saturating_add(non_compliant);
}

fn region_bucket<'a>(buckets: &'a mut Vec<Bucket>, name: &str) -> &'a mut Bucket {
    let idx = match buckets.iter().position(|b| b.name == name) {
        Some(idx) => idx,
        None => {
            buckets.push(Bucket::new(name));
            buckets.len() - 1
        }
    };
    &mut buckets[idx]
}
