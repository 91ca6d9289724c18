//! Folder station: items are files in a set of status folders.
//!
//! Each configured folder under `home_path` stands for one status
//! (`waiting`, `error`, `done`, ...). A file's stem is the item id. The home
//! path may be a network share; it is leased from the connection pool for
//! every search.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::StationConfig;
use crate::criteria::{field, has_stuck_criterion, status, Criterion, OpCode};
use crate::error::StationError;
use crate::models::Instance;
use crate::pool::{ConnectionLease, ConnectionPool};
use crate::traits::{Station, StationContext, StationCore};

#[derive(Debug, Deserialize, Clone)]
pub struct FolderSettings {
    pub home_path: String,
    pub entity_name: String,
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    /// With or without the leading dot; case-insensitive. Empty means all files.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub include_subfolders: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FolderEntry {
    pub name: String,
    /// Defaults to the folder name.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
struct Folder {
    name: String,
    status: String,
    path: PathBuf,
}

pub struct FolderStation {
    core: StationCore,
    pool: ConnectionPool,
    home_path: String,
    entity_name: String,
    folders: Vec<Folder>,
    extensions: Option<GlobSet>,
    include_subfolders: bool,
    user: Option<String>,
    password: Option<String>,
}

impl FolderStation {
    /// Factory registered under `"folder"`.
    pub fn create(config: &StationConfig, ctx: &StationContext) -> Result<Arc<dyn Station>> {
        let settings: FolderSettings = config.settings()?;
        let core = StationCore::from_config(config)?;
        Ok(Arc::new(Self::new(core, settings, ctx.pool().clone())?))
    }

    /// Keeps only the configured folders that exist; fails if none do.
    pub fn new(core: StationCore, settings: FolderSettings, pool: ConnectionPool) -> Result<Self> {
        if settings.folders.is_empty() {
            bail!("No folders configured for folder station '{}'", core.description());
        }

        let extensions = build_extension_set(&settings.extensions)?;

        let lease = pool.get_connection(
            settings.user.as_deref(),
            settings.password.as_deref(),
            &settings.home_path,
        )?;

        let home = Path::new(&settings.home_path);
        let mut folders = Vec::new();
        for entry in &settings.folders {
            let path = home.join(&entry.name);
            if path.is_dir() {
                folders.push(Folder {
                    name: entry.name.clone(),
                    status: entry.status.clone().unwrap_or_else(|| entry.name.clone()),
                    path,
                });
            } else {
                warn!(station = %core.description(), "directory not found: {}", path.display());
            }
        }

        if folders.is_empty() {
            match lease.error_message() {
                Some(connect_error) => bail!(
                    "No folders accessible for folder station '{}'; {}",
                    core.description(),
                    connect_error
                ),
                None => bail!("No folders accessible for folder station '{}'", core.description()),
            }
        }
        drop(lease);

        Ok(Self {
            core,
            pool,
            home_path: settings.home_path,
            entity_name: settings.entity_name,
            folders,
            extensions,
            include_subfolders: settings.include_subfolders,
            user: settings.user,
            password: settings.password,
        })
    }

    fn lease(&self) -> Result<ConnectionLease, StationError> {
        self.pool
            .get_connection(self.user.as_deref(), self.password.as_deref(), &self.home_path)
            .map_err(|e| StationError::Other(e.into()))
    }

    fn limit_reached(&self, found: &[Instance]) -> bool {
        self.core
            .max_search_results()
            .is_some_and(|max| found.len() >= max)
    }

    /// Should `folder` be searched at all, given the status criteria?
    fn include_folder(&self, folder: &Folder, criteria: &[Criterion]) -> bool {
        if has_stuck_criterion(criteria) && !can_be_stuck(folder) {
            return false;
        }

        let status_criteria: Vec<&Criterion> = criteria
            .iter()
            .filter(|c| c.field_is(field::INSTANCE_STATUS))
            .collect();
        let matches_folder = |c: &&Criterion| {
            c.value
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case(&folder.status))
        };

        if status_criteria
            .iter()
            .filter(|c| c.operation == OpCode::NotEqual)
            .any(matches_folder)
        {
            return false;
        }

        let mut equal = status_criteria
            .iter()
            .filter(|c| c.operation == OpCode::Equal)
            .peekable();
        if equal.peek().is_some() && !equal.any(matches_folder) {
            return false;
        }

        true
    }

    /// Nested folders of `folder`, depth first, named `parent/child`.
    fn subfolders(&self, folder: &Folder) -> Result<Vec<Folder>, StationError> {
        let mut found = Vec::new();
        for entry in WalkDir::new(&folder.path).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&folder.path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            found.push(Folder {
                name: format!("{}/{}", folder.name, relative),
                status: folder.status.clone(),
                path: entry.path().to_path_buf(),
            });
        }
        Ok(found)
    }

    fn search_folder(
        &self,
        criteria: &[Criterion],
        folder: &Folder,
        found: &mut Vec<Instance>,
    ) -> Result<(), StationError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&folder.path).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(set) = &self.extensions {
                if !set.is_match(&file_name) {
                    continue;
                }
            }
            files.push((entry.path().to_path_buf(), file_name));
        }

        let now = SystemTime::now();
        for (path, file_name) in files {
            if self.limit_reached(found) {
                break;
            }

            let metadata = std::fs::metadata(&path)?;
            let modified = metadata.modified()?;
            let created = metadata.created().unwrap_or(modified);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file_name.clone());

            let file = FileFacts {
                stem: &stem,
                modified,
                created,
                now,
            };
            if !self.file_matches(&file, criteria)? {
                continue;
            }

            let location = format!("{}/{}", folder.name, file_name);
            found.push(Instance {
                id: Some(stem.clone()),
                unique_id: Some(location.clone()),
                entity_name: self.entity_name.clone(),
                status: Some(folder.status.clone()),
                arrival_date: Some(DateTime::<Utc>::from(created)),
                update_date: Some(DateTime::<Utc>::from(modified)),
                location: Some(location),
                size: Some(metadata.len()),
                fields: [
                    ("FILE_NAME".to_string(), file_name),
                    ("PATH".to_string(), path.display().to_string()),
                ]
                .into_iter()
                .collect(),
            });
        }
        Ok(())
    }

    fn file_matches(&self, file: &FileFacts<'_>, criteria: &[Criterion]) -> Result<bool, StationError> {
        for c in criteria {
            let keep = if c.field_is(field::ENTITY_ID) {
                let ordering = compare_integer_or_string(file.stem, c.value.as_deref().unwrap_or_default());
                match c.operation {
                    OpCode::Equal => ordering == Ordering::Equal,
                    OpCode::NotEqual => ordering != Ordering::Equal,
                    OpCode::GreaterThan => ordering == Ordering::Greater,
                    OpCode::GreaterThanOrEqual => ordering != Ordering::Less,
                    OpCode::LessThan => ordering == Ordering::Less,
                    OpCode::LessThanOrEqual => ordering != Ordering::Greater,
                    ref op => {
                        return Err(anyhow::anyhow!("Can't use {} operator with ID based on file name", op).into())
                    }
                }
            } else if c.field_is(field::INSTANCE_UPDATE_DATE) {
                compare_date(file.modified, c, "Update Date")?
            } else if c.field_is(field::INSTANCE_ARRIVAL_DATE) {
                compare_date(file.created, c, "Arrival Date")?
            } else if c.operation == OpCode::Stuck {
                match self.core.age_limit() {
                    Some(limit) => file
                        .now
                        .duration_since(file.modified)
                        .is_ok_and(|age| age > limit),
                    None => false,
                }
            } else {
                true
            };

            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

struct FileFacts<'a> {
    stem: &'a str,
    modified: SystemTime,
    created: SystemTime,
    now: SystemTime,
}

impl Station for FolderStation {
    fn core(&self) -> &StationCore {
        &self.core
    }

    fn station_type(&self) -> &str {
        "folder"
    }

    fn do_search(&self, criteria: &[Criterion]) -> Result<Vec<Instance>, StationError> {
        let _lease = self.lease()?;

        let mut found = Vec::new();
        for folder in &self.folders {
            if !self.include_folder(folder, criteria) {
                continue;
            }
            if self.limit_reached(&found) {
                break;
            }

            self.search_folder(criteria, folder, &mut found)?;

            if self.include_subfolders {
                for sub in self.subfolders(folder)? {
                    if self.limit_reached(&found) {
                        break;
                    }
                    self.search_folder(criteria, &sub, &mut found)?;
                }
            }
        }

        debug!(station = %self.core.description(), found = found.len(), "folder search done");
        Ok(found)
    }
}

/// Folders holding finished items are never searched for stuck ones.
fn can_be_stuck(folder: &Folder) -> bool {
    folder.status != status::COMPLETE && folder.status != status::ARCHIVE
}

/// Compare as integers when both sides parse, otherwise as strings.
pub fn compare_integer_or_string(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// RFC 3339 timestamp, or a plain `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_criterion_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    bail!("Invalid date: '{}'. Expected RFC 3339 or YYYY-MM-DD", value)
}

fn compare_date(time: SystemTime, c: &Criterion, label: &str) -> Result<bool, StationError> {
    let bound = parse_criterion_date(c.value.as_deref().unwrap_or_default())?;
    let time = DateTime::<Utc>::from(time);
    match c.operation {
        OpCode::GreaterThan => Ok(time > bound),
        OpCode::GreaterThanOrEqual => Ok(time >= bound),
        OpCode::LessThan => Ok(time < bound),
        OpCode::LessThanOrEqual => Ok(time <= bound),
        ref op => Err(anyhow::anyhow!("Can't use {} operator with {}", op, label).into()),
    }
}

fn build_extension_set(extensions: &[String]) -> Result<Option<GlobSet>> {
    if extensions.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim();
        if ext.is_empty() {
            bail!("Property is empty: extension");
        }
        let pattern = format!("*.{}", ext.trim_start_matches('.'));
        builder.add(GlobBuilder::new(&pattern).case_insensitive(true).build()?);
    }
    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_or_string_comparison() {
        assert_eq!(compare_integer_or_string("9", "10"), Ordering::Less);
        assert_eq!(compare_integer_or_string("010", "10"), Ordering::Equal);
        assert_eq!(compare_integer_or_string("9a", "10"), Ordering::Greater);
        assert_eq!(compare_integer_or_string("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn criterion_dates() {
        let d = parse_criterion_date("2024-03-01").unwrap();
        assert_eq!(d.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        let t = parse_criterion_date("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T10:30:00+00:00");
        assert!(parse_criterion_date("March 1st").is_err());
    }

    #[test]
    fn extension_set_ignores_case_and_dot() {
        let set = build_extension_set(&[".XML".to_string(), "pdf".to_string()])
            .unwrap()
            .unwrap();
        assert!(set.is_match("order.xml"));
        assert!(set.is_match("scan.PDF"));
        assert!(!set.is_match("notes.txt"));
        assert!(build_extension_set(&[]).unwrap().is_none());
        assert!(build_extension_set(&[" ".to_string()]).is_err());
    }

    #[test]
    fn finished_folders_are_not_stuck_candidates() {
        let folder = |status: &str| Folder {
            name: "x".into(),
            status: status.into(),
            path: PathBuf::from("x"),
        };
        assert!(!can_be_stuck(&folder("COMPLETE")));
        assert!(!can_be_stuck(&folder("ARCHIVE")));
        assert!(can_be_stuck(&folder("WAITING")));
    }
}
