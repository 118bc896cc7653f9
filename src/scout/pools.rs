/// Per-account pool snapshots
///
/// `active_pool.csv` is the current discovery snapshot; history pools keep
/// every (id, address) seen on a given day.

use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::{EngineResult, PoolCandidate};

#[derive(Debug, Clone)]
pub struct PoolStore {
    data_dir: PathBuf,
}

impl PoolStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn active_path(&self, account: &str) -> PathBuf {
        self.data_dir.join(account).join("active_pool.csv")
    }

    pub fn history_path(&self, account: &str, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(account)
            .join("history_pools")
            .join(format!("history_pool_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Current snapshot; empty when discovery has not run yet
    pub fn load_active(&self, account: &str) -> EngineResult<Vec<PoolCandidate>> {
        read_pools(&self.active_path(account))
    }

    pub fn load_history(&self, account: &str, date: NaiveDate) -> EngineResult<Vec<PoolCandidate>> {
        read_pools(&self.history_path(account, date))
    }

    /// Known `address -> pair_address` mappings: the active snapshot first,
    /// then today's and yesterday's history. Earlier sources win.
    pub fn known_pairs(&self, account: &str, today: NaiveDate) -> EngineResult<HashMap<String, String>> {
        let mut pairs = HashMap::new();
        let sources = [
            self.load_active(account)?,
            self.load_history(account, today)?,
            self.load_history(account, today - Duration::days(1))?,
        ];
        for pool in sources.iter().flatten() {
            if let Some(pair) = pool.resolved_pair() {
                pairs
                    .entry(pool.address.clone())
                    .or_insert_with(|| pair.to_string());
            }
        }
        Ok(pairs)
    }

    /// Replace the snapshot, carrying over pair addresses resolved earlier
    pub fn replace_active(
        &self,
        account: &str,
        mut pools: Vec<PoolCandidate>,
        today: NaiveDate,
    ) -> EngineResult<Vec<PoolCandidate>> {
        let known = self.known_pairs(account, today)?;
        let mut carried = 0;
        for pool in pools.iter_mut().filter(|p| p.resolved_pair().is_none()) {
            if let Some(pair) = known.get(&pool.address) {
                pool.pair_address = Some(pair.clone());
                carried += 1;
            }
        }
        self.write_active(account, &pools)?;
        debug!(account, pools = pools.len(), carried, "Active pool replaced");
        Ok(pools)
    }

    pub fn write_active(&self, account: &str, pools: &[PoolCandidate]) -> EngineResult<()> {
        let path = self.active_path(account);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for pool in pools {
                writer.serialize(pool)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Record resolved pair addresses in the active snapshot
    pub fn set_pairs(&self, account: &str, resolved: &HashMap<String, String>) -> EngineResult<()> {
        if resolved.is_empty() {
            return Ok(());
        }
        let mut pools = self.load_active(account)?;
        for pool in pools.iter_mut() {
            if let Some(pair) = resolved.get(&pool.address) {
                pool.pair_address = Some(pair.clone());
            }
        }
        self.write_active(account, &pools)
    }

    /// Append pools not yet present (by id and address) in that day's history
    pub fn append_history(&self, account: &str, pools: &[PoolCandidate], date: NaiveDate) -> EngineResult<usize> {
        let path = self.history_path(account, date);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut seen: HashSet<(i64, String)> = read_pools(&path)?
            .into_iter()
            .map(|p| (p.id, p.address))
            .collect();
        let fresh: Vec<&PoolCandidate> = pools
            .iter()
            .filter(|p| seen.insert((p.id, p.address.clone())))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for pool in &fresh {
            writer.serialize(pool)?;
        }
        writer.flush()?;
        info!(account, added = fresh.len(), %date, "History pool updated");
        Ok(fresh.len())
    }
}

fn read_pools(path: &Path) -> EngineResult<Vec<PoolCandidate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut pools = Vec::new();
    for row in reader.deserialize() {
        pools.push(row?);
    }
    Ok(pools)
}
