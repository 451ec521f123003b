use crate::core::{
    COMPLIANT_REASON, CompliancePayload, RegionReport, Row, ServerRecord, Status, UNKNOWN_REASON,
};

pub fn flatten(payload: &CompliancePayload) -> Vec<Row> {
    let mut rows = Vec::new();

    for section in payload.sections() {
        if section.error.is_some() {
            continue;
        }
        for (region, report) in section.regions {
            let RegionReport::Reported(counts) = report else {
                continue;
            };
            rows.extend(
                counts
                    .good_servers
                    .iter()
                    .map(|server| server_row(section.name, region, server, Status::Compliant)),
            );
            rows.extend(
                counts
                    .bad_servers
                    .iter()
                    .map(|server| server_row(section.name, region, server, Status::NonCompliant)),
            );
        }
    }

    rows
}

fn server_row(app: &str, region: &str, server: &ServerRecord, status: Status) -> Row {
    let reason = match status {
        Status::Compliant => COMPLIANT_REASON.to_string(),
        Status::NonCompliant => server
            .reason
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(UNKNOWN_REASON)
            .to_string(),
    };

    Row {
        app: app.to_string(),
        region: region.to_string(),
        server_name: server.name.clone(),
        image_name: server.image_name.clone(),
        image_id: server.image_id.clone(),
        status,
        image_year: server.image_year,
        image_week: server.image_week,
        reason,
    }
}
