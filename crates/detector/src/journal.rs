//! On-disk opportunity log
//!
//! The log is a single pretty-printed JSON array. Every append rewrites it
//! through `<path>.tmp` and an atomic rename, so a crash mid-write leaves
//! the previously committed log intact.

use chrono::Local;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use arb_core::{ArbitrageOpportunity, JournalError, JournalResult};

/// `<path><suffix>`, keeping the full original file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Bounded append-only log of opportunities
#[derive(Debug, Clone)]
pub struct OpportunityJournal {
    path: PathBuf,
    max_entries: usize,
}

impl OpportunityJournal {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Committed records, oldest first. A missing or blank file is empty.
    pub fn load(&self) -> JournalResult<Vec<ArbitrageOpportunity>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read(&self.path)?;
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_slice(&content)?)
    }

    /// Append records, dropping the oldest beyond the cap
    pub fn append(&self, opportunities: &[ArbitrageOpportunity]) -> JournalResult<()> {
        if opportunities.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut records = match self.load() {
            Ok(records) => records,
            Err(JournalError::Serialization(e)) => {
                warn!("Could not parse existing opportunity log: {}", e);
                self.set_aside("backup")?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        records.extend_from_slice(opportunities);
        if records.len() > self.max_entries {
            let excess = records.len() - self.max_entries;
            records.drain(..excess);
            info!("Truncated opportunity log to last {} entries", self.max_entries);
        }

        self.commit(&records)?;
        debug!(
            "Saved {} opportunities to {}",
            opportunities.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Move the current log aside as `<path>.archive_<timestamp>`
    pub fn archive(&self) -> JournalResult<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let target = with_suffix(&self.path, &format!(".archive_{}", timestamp()));
        fs::rename(&self.path, &target)?;
        info!("Previous opportunities archived as {}", target.display());
        Ok(Some(target))
    }

    /// Rename the current log aside; the log is never overwritten unless this succeeds
    fn set_aside(&self, label: &str) -> JournalResult<()> {
        let target = with_suffix(&self.path, &format!(".{}_{}", label, timestamp()));
        if let Err(e) = fs::rename(&self.path, &target) {
            warn!("Could not back up {}: {}", self.path.display(), e);
            return Err(e.into());
        }

        info!("Corrupted log backed up as {}", target.display());
        Ok(())
    }

    fn commit(&self, records: &[ArbitrageOpportunity]) -> JournalResult<()> {
        let tmp = with_suffix(&self.path, ".tmp");

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
