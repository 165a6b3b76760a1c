//! `kiln status`: shows what the pipeline database recorded per asset.

use std::collections::HashMap;

use kiln_common::Guid;
use kiln_db::ReportRow;
use kiln_pipeline::builder::BUILD_REPORT;

use crate::project::Project;
use crate::{GlobalArgs, StatusArgs};

/// Runs the `kiln status` command.
///
/// Prints one line per asset: GUID, type, recorded fingerprint and the
/// outcome of its last build.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = Project::load(global)?;
    let db = project.open_db()?;

    let types: HashMap<Guid, &str> = project
        .config
        .assets
        .iter()
        .map(|a| (a.guid, a.asset_type.as_str()))
        .collect();
    let reports = db.reports(BUILD_REPORT)?;

    for guid in project.roots(&args.guids) {
        let hash = db
            .get_dependency(guid)?
            .map(|h| h.to_string())
            .unwrap_or_else(|| "not built".to_string());
        let outcome = last_outcome(&reports, guid).unwrap_or("-");
        let asset_type = types.get(&guid).copied().unwrap_or("?");
        println!("{guid}  {asset_type:<8}  {hash:<32}  {outcome}");
    }
    db.close();
    Ok(0)
}

fn last_outcome(reports: &[ReportRow], guid: Guid) -> Option<&str> {
    reports
        .iter()
        .rev()
        .find(|row| row.guid == guid)
        .and_then(|row| row.values.get("outcome"))
        .map(String::as_str)
}
