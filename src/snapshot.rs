//! Btrfs snapshots of the postgres volume
//!
//! Snapshots are btrfs subvolume copies of the docker volume backing the
//! postgres service, stored under a fixed tree and named
//! `<label>@<timestamp>`. The postgres container is stopped around every
//! mutating operation and started again afterwards, even when the
//! operation itself fails.

use crate::compose::resolver::{COMPOSE_BIN_KEY, DEFAULT_COMPOSE_BIN};
use crate::error::{Result, SigilError};
use crate::settings::{Project, SettingsStore};
use chrono::NaiveDateTime;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Tree holding one snapshot directory per docker volume
pub const SNAPSHOT_DIR: &str = "/var/lib/docker/subvolumes";

/// Tree holding the live docker volumes
const VOLUME_DIR: &str = "/var/lib/docker/volumes";

/// Timestamp layout inside snapshot names
const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One snapshot found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Directory name under the snapshot tree
    pub name: String,
    /// Creation time parsed out of the name, when present
    pub taken_at: Option<NaiveDateTime>,
}

/// Compose a snapshot name from a label and a timestamp
pub fn snapshot_name(label: &str, taken_at: NaiveDateTime) -> String {
    format!("{}@{}", label, taken_at.format(SNAPSHOT_DATE_FORMAT))
}

/// Recover the timestamp a snapshot name carries, if any. Only the part
/// after the last separator is considered, clamped to the stamp width.
pub fn parse_snapshot_date(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.rsplit('@').next().unwrap_or(name);
    let stamp = stamp.get(..19).unwrap_or(stamp);
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_DATE_FORMAT).ok()
}

/// Name of the docker volume backing postgres, read from the resolved
/// compose document
pub fn postgres_volume_name(doc: &Value) -> Result<String> {
    doc.get("volumes")
        .and_then(|volumes| volumes.get("ODOO_POSTGRES_VOLUME"))
        .and_then(|volume| volume.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            SigilError::Snapshot("the composed document does not name a postgres volume".into())
        })
}

/// Snapshot operations for one project
pub struct SnapshotManager<'a> {
    project: &'a Project,
    compose_bin: String,
    volume_name: String,
}

impl<'a> SnapshotManager<'a> {
    /// Manager for a project; reads the volume name out of the composed
    /// destination file
    pub fn new(project: &'a Project, settings: &SettingsStore) -> Result<Self> {
        let destination = project.compose_destination();
        let text = std::fs::read_to_string(&destination).map_err(|_| {
            SigilError::Snapshot(format!(
                "no composed file at {}, run reload first",
                destination.display()
            ))
        })?;
        let doc: Value = serde_yaml::from_str(&text).map_err(|e| {
            SigilError::Snapshot(format!("cannot parse {}: {}", destination.display(), e))
        })?;
        Ok(Self {
            project,
            compose_bin: settings.get_or(COMPOSE_BIN_KEY, DEFAULT_COMPOSE_BIN).to_string(),
            volume_name: postgres_volume_name(&doc)?,
        })
    }

    /// Snapshots on disk, oldest first by name
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let dir = self.subvolume_dir()?;
        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| SnapshotInfo {
                taken_at: parse_snapshot_date(&name),
                name,
            })
            .collect())
    }

    /// Take a read-only snapshot of the postgres volume
    pub fn save(&self, label: &str) -> Result<String> {
        let dir = self.subvolume_dir()?;
        let name = snapshot_name(label, chrono::Local::now().naive_local());
        let target = dir.join(&name);

        self.dc(&["stop", "-t", "1", "postgres"])?;
        let result = run_checked(
            btrfs_command()
                .arg("snapshot")
                .arg("-r")
                .arg(self.volume_path())
                .arg(&target),
        );
        self.dc(&["up", "-d", "postgres"])?;
        result?;

        tracing::info!("Created snapshot {}", target.display());
        Ok(name)
    }

    /// Replace the live volume with a writable copy of a snapshot
    pub fn restore(&self, name: &str) -> Result<()> {
        let source = self.subvolume_dir()?.join(name);
        if !source.exists() {
            return Err(SigilError::Snapshot(format!("no snapshot named {}", name)));
        }

        self.dc(&["stop", "-t", "1", "postgres"])?;
        let result = self.swap_volume(&source);
        self.dc(&["up", "-d", "postgres"])?;
        result?;

        tracing::info!("Restored snapshot {}", name);
        Ok(())
    }

    /// Delete a snapshot
    pub fn remove(&self, name: &str) -> Result<()> {
        let target = self.subvolume_dir()?.join(name);
        if !target.exists() {
            return Err(SigilError::Snapshot(format!("no snapshot named {}", name)));
        }

        self.dc(&["stop", "-t", "1", "postgres"])?;
        let result = run_checked(btrfs_command().arg("delete").arg(&target));
        self.dc(&["up", "-d", "postgres"])?;
        result?;

        tracing::info!("Removed snapshot {}", name);
        Ok(())
    }

    /// Directory holding this volume's snapshots, created on demand
    fn subvolume_dir(&self) -> Result<PathBuf> {
        let dir = Path::new(SNAPSHOT_DIR).join(&self.volume_name);
        if !dir.exists() {
            run_checked(Command::new("sudo").args(["mkdir", "-p"]).arg(&dir))?;
        }
        Ok(dir)
    }

    /// Live path of the docker volume
    fn volume_path(&self) -> PathBuf {
        Path::new(VOLUME_DIR).join(&self.volume_name)
    }

    fn swap_volume(&self, source: &Path) -> Result<()> {
        let volume = self.volume_path();
        if volume.exists() {
            run_checked(btrfs_command().arg("delete").arg(&volume))?;
        }
        run_checked(btrfs_command().arg("snapshot").arg(source).arg(&volume))
    }

    /// Run docker-compose against the composed destination file
    fn dc(&self, args: &[&str]) -> Result<()> {
        let mut command = Command::new(&self.compose_bin);
        command
            .arg("-f")
            .arg(self.project.compose_destination())
            .arg("-p")
            .arg(&self.project.name)
            .args(args);
        run_checked(&mut command)
    }
}

/// btrfs subvolume invocation through sudo
fn btrfs_command() -> Command {
    let mut command = Command::new("sudo");
    command.arg("/usr/bin/btrfs").arg("subvolume");
    command
}

/// Run a command to completion, turning failures into snapshot errors
fn run_checked(command: &mut Command) -> Result<()> {
    let rendered = format!("{:?}", command);
    let status = command
        .status()
        .map_err(|e| SigilError::Snapshot(format!("cannot run {}: {}", rendered, e)))?;
    if !status.success() {
        return Err(SigilError::Snapshot(format!(
            "{} exited with {}",
            rendered, status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_snapshot_name_round_trip() {
        let taken = at(2024, 3, 9, 14, 30, 5);
        let name = snapshot_name("before-upgrade", taken);
        assert_eq!(name, "before-upgrade@2024-03-09T14:30:05");
        assert_eq!(parse_snapshot_date(&name), Some(taken));
    }

    #[test]
    fn test_parse_tolerates_foreign_names() {
        assert_eq!(parse_snapshot_date("manual-backup"), None);
        assert_eq!(parse_snapshot_date(""), None);
        // label may itself contain the separator
        assert_eq!(
            parse_snapshot_date("a@b@2025-01-01T00:00:00"),
            Some(at(2025, 1, 1, 0, 0, 0))
        );
        // trailing precision beyond seconds is clamped away
        assert_eq!(
            parse_snapshot_date("x@2024-03-09T14:30:05.123456"),
            Some(at(2024, 3, 9, 14, 30, 5))
        );
    }

    #[test]
    fn test_postgres_volume_name_extraction() {
        let doc: Value = serde_yaml::from_str(
            r#"
services: {}
volumes:
  ODOO_POSTGRES_VOLUME:
    name: acme_postgres
"#,
        )
        .unwrap();
        assert_eq!(postgres_volume_name(&doc).unwrap(), "acme_postgres");

        let empty: Value = serde_yaml::from_str("services: {}\n").unwrap();
        assert!(postgres_volume_name(&empty).is_err());
    }
}
