//! Folder station against a temporary directory tree.

use chrono::{Duration as ChronoDuration, Utc};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use stationwatch::config::{parse_config, StationConfig};
use stationwatch::criteria::{Criterion, OpCode};
use stationwatch::memory::InstanceMemory;
use stationwatch::pipeline::Pipeline;
use stationwatch::search::Search;
use stationwatch::station_folder::FolderStation;
use stationwatch::traits::{Station, StationContext, StationRegistry};

const TWO_HOURS: Duration = Duration::from_secs(2 * 60 * 60);

fn write(path: &Path, age: Option<Duration>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"<order/>").unwrap();
    if let Some(age) = age {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }
}

/// waiting/1001.xml (old), waiting/1002.XML, waiting/readme.txt,
/// waiting/sub/1004.xml, error/999.pdf, done/1003.xml (old).
fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();
    write(&home.join("waiting/1001.xml"), Some(TWO_HOURS));
    write(&home.join("waiting/1002.XML"), None);
    write(&home.join("waiting/readme.txt"), None);
    write(&home.join("waiting/sub/1004.xml"), None);
    write(&home.join("error/999.pdf"), None);
    write(&home.join("done/1003.xml"), Some(TWO_HOURS));
    dir
}

fn station_config(home: &Path, extra: &str) -> StationConfig {
    let toml = format!(
        r#"
[[station]]
type = "folder"
description = "inbound"
home_path = "{home}"
entity_name = "ORDER"
extensions = [".xml", "PDF"]
age_limit_secs = 3600
{extra}

  [[station.folders]]
  name = "waiting"
  status = "WAITING"

  [[station.folders]]
  name = "error"
  status = "ERROR"

  [[station.folders]]
  name = "done"
  status = "COMPLETE"

  [[station.folders]]
  name = "not-there"
"#,
        home = home.display().to_string().replace('\\', "/"),
        extra = extra
    );
    parse_config(&toml).unwrap().stations.remove(0)
}

fn station(home: &Path, extra: &str) -> Arc<dyn Station> {
    FolderStation::create(&station_config(home, extra), &StationContext::default()).unwrap()
}

fn ids(station: &dyn Station, criteria: &[Criterion]) -> Vec<String> {
    station
        .do_search(criteria)
        .unwrap()
        .into_iter()
        .filter_map(|i| i.id)
        .collect()
}

#[test]
fn lists_matching_files_in_folder_order() {
    let dir = fixture();
    let s = station(dir.path(), "");

    assert_eq!(s.station_type(), "folder");
    assert_eq!(ids(s.as_ref(), &[]), vec!["1001", "1002", "999", "1003"]);

    let found = s.do_search(&[Criterion::binary("ID", OpCode::Equal, "999")]).unwrap();
    assert_eq!(found.len(), 1);
    let item = &found[0];
    assert_eq!(item.entity_name, "ORDER");
    assert_eq!(item.status.as_deref(), Some("ERROR"));
    assert_eq!(item.location.as_deref(), Some("error/999.pdf"));
    assert_eq!(item.unique_id.as_deref(), Some("error/999.pdf"));
    assert_eq!(item.size, Some(8));
    assert_eq!(item.fields.get("FILE_NAME").map(String::as_str), Some("999.pdf"));
}

#[test]
fn id_criteria_compare_numerically() {
    let dir = fixture();
    let s = station(dir.path(), "");

    let ge = [Criterion::binary("ID", OpCode::GreaterThanOrEqual, "1000")];
    assert_eq!(ids(s.as_ref(), &ge), vec!["1001", "1002", "1003"]);

    let range = [
        Criterion::binary("ID", OpCode::GreaterThan, "1001"),
        Criterion::binary("ID", OpCode::LessThanOrEqual, "1003"),
    ];
    assert_eq!(ids(s.as_ref(), &range), vec!["1002", "1003"]);

    let ne = [Criterion::binary("ID", OpCode::NotEqual, "1002")];
    assert_eq!(ids(s.as_ref(), &ne), vec!["1001", "999", "1003"]);

    let err = s
        .do_search(&[Criterion::binary("ID", OpCode::Like, "10%")])
        .unwrap_err();
    assert_eq!(err.chain_message(), "Can't use LIKE operator with ID based on file name");
}

#[test]
fn status_criteria_select_folders() {
    let dir = fixture();
    let s = station(dir.path(), "");

    let eq = [Criterion::binary("STATUS", OpCode::Equal, "error")];
    assert_eq!(ids(s.as_ref(), &eq), vec!["999"]);

    let either = [
        Criterion::binary("STATUS", OpCode::Equal, "ERROR"),
        Criterion::binary("STATUS", OpCode::Equal, "COMPLETE"),
    ];
    assert_eq!(ids(s.as_ref(), &either), vec!["999", "1003"]);

    let ne = [Criterion::binary("STATUS", OpCode::NotEqual, "WAITING")];
    assert_eq!(ids(s.as_ref(), &ne), vec!["999", "1003"]);
}

#[test]
fn stuck_items_are_old_and_unfinished() {
    let dir = fixture();
    let s = station(dir.path(), "");

    // done/1003.xml is old too, but finished folders are never stuck
    assert_eq!(ids(s.as_ref(), &[Criterion::status(OpCode::Stuck)]), vec!["1001"]);
}

#[test]
fn update_date_bounds() {
    let dir = fixture();
    let s = station(dir.path(), "");
    let hour_ago = (Utc::now() - ChronoDuration::hours(1)).to_rfc3339();

    let older = [Criterion::binary("UPDATE_DATE", OpCode::LessThan, &hour_ago)];
    assert_eq!(ids(s.as_ref(), &older), vec!["1001", "1003"]);

    let newer = [Criterion::binary("UPDATE_DATE", OpCode::GreaterThanOrEqual, &hour_ago)];
    assert_eq!(ids(s.as_ref(), &newer), vec!["1002", "999"]);

    let bad_op = [Criterion::binary("UPDATE_DATE", OpCode::Equal, &hour_ago)];
    assert!(s.do_search(&bad_op).is_err());
}

#[test]
fn subfolders_and_result_limit() {
    let dir = fixture();

    let nested = station(dir.path(), "include_subfolders = true");
    let found = nested
        .do_search(&[Criterion::binary("ID", OpCode::Equal, "1004")])
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].location.as_deref(), Some("waiting/sub/1004.xml"));
    assert_eq!(found[0].status.as_deref(), Some("WAITING"));

    let limited = station(dir.path(), "max_search_results = 2");
    assert_eq!(ids(limited.as_ref(), &[]), vec!["1001", "1002"]);
}

#[test]
fn station_without_accessible_folders_fails_to_build() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StationContext::default();
    let err = FolderStation::create(&station_config(dir.path(), ""), &ctx)
        .err()
        .unwrap();
    assert!(err.to_string().starts_with("No folders accessible"));
    assert!(ctx.pool().is_empty());
}

#[test]
fn failed_search_releases_its_lease() {
    let dir = fixture();
    let ctx = StationContext::default();
    let s = FolderStation::create(&station_config(dir.path(), ""), &ctx).unwrap();
    assert!(ctx.pool().is_empty());

    let err = s
        .do_search(&[Criterion::binary("ID", OpCode::Like, "10%")])
        .unwrap_err();
    assert_eq!(err.chain_message(), "Can't use LIKE operator with ID based on file name");
    assert!(ctx.pool().is_empty());

    let bad_date = [Criterion::binary("UPDATE_DATE", OpCode::GreaterThan, "yesterday")];
    assert!(s.do_search(&bad_date).is_err());
    assert!(ctx.pool().is_empty());

    // the share is leased afresh for the next search
    assert_eq!(ids(s.as_ref(), &[]).len(), 4);
    assert!(ctx.pool().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn searched_through_the_coordinator_and_lease_released() {
    let dir = fixture();
    let home = dir.path().display().to_string().replace('\\', "/");
    let toml = format!(
        r#"
[[station]]
type = "folder"
description = "inbound"
home_path = "{home}"
entity_name = "ORDER"
  [[station.folders]]
  name = "waiting"
  status = "WAITING"
"#
    );
    let config = parse_config(&toml).unwrap();
    let ctx = StationContext::default();
    let pipeline = Arc::new(Pipeline::from_config(&config, &StationRegistry::with_builtins(), &ctx));
    assert!(!pipeline.has_error(), "{:?}", pipeline.errors());

    let search = Search::new(pipeline, Arc::new(InstanceMemory::new()));
    let outcome = search
        .search(&[Criterion::binary("ID", OpCode::LessThan, "1002")], None)
        .await;

    assert_eq!(outcome.instance_ids(), vec!["1001"]);
    assert!(outcome.station_errors().next().is_none());
    assert_eq!(ctx.pool().use_count(&home), None);
    assert!(ctx.pool().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_search_through_the_coordinator_releases_its_lease() {
    let dir = fixture();
    let home = dir.path().display().to_string().replace('\\', "/");
    let toml = format!(
        r#"
[[station]]
type = "folder"
description = "inbound"
home_path = "{home}"
entity_name = "ORDER"
  [[station.folders]]
  name = "waiting"
"#
    );
    let config = parse_config(&toml).unwrap();
    let ctx = StationContext::default();
    let pipeline = Arc::new(Pipeline::from_config(&config, &StationRegistry::with_builtins(), &ctx));
    let search = Search::new(pipeline, Arc::new(InstanceMemory::new()));

    let outcome = search
        .search(&[Criterion::binary("ID", OpCode::Like, "10%")], None)
        .await;

    assert_eq!(
        outcome.result_sets[0].error.as_deref(),
        Some("Can't use LIKE operator with ID based on file name")
    );
    assert!(ctx.pool().is_empty());
}
