/// Kline series files shared by the refresh subsystem and the signal engine

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{Bar, EngineError, EngineResult};

/// Read access to per-asset OHLCV series
pub trait SeriesSource: Send + Sync {
    fn load(&self, chain: &str, symbol: &str, address: &str) -> EngineResult<Vec<Bar>>;
}

/// Replace characters that are not safe in file names
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| match c {
            '/' | ':' | '*' | '?' | '\'' | '"' | ' ' => '-',
            other => other,
        })
        .collect()
}

/// Merge freshly fetched bars into an existing series: one bar per open time,
/// ascending, fresh data winning on conflicts
pub fn merge_bars(existing: Vec<Bar>, fresh: Vec<Bar>) -> Vec<Bar> {
    let mut by_time = BTreeMap::new();
    for bar in existing.into_iter().chain(fresh) {
        by_time.insert(bar.candle_begin_time, bar);
    }
    by_time.into_values().collect()
}

/// Drop all but the newest `keep` bars of an ascending series
pub fn retain_latest(mut bars: Vec<Bar>, keep: usize) -> Vec<Bar> {
    if bars.len() > keep {
        bars.drain(..bars.len() - keep);
    }
    bars
}

/// CSV series under `<data_dir>/klines/<chain>/`
#[derive(Debug, Clone)]
pub struct KlineStore {
    root: PathBuf,
}

impl KlineStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("klines"),
        }
    }

    pub fn chain_dir(&self, chain: &str) -> PathBuf {
        self.root.join(chain)
    }

    pub fn flag_dir(&self, chain: &str) -> PathBuf {
        self.chain_dir(chain).join("flags")
    }

    pub fn series_path(&self, chain: &str, symbol: &str, address: &str) -> PathBuf {
        self.chain_dir(chain)
            .join(format!("{}_{}.csv", sanitize_symbol(symbol), address))
    }

    pub fn ensure_dirs(&self, chain: &str) -> EngineResult<()> {
        fs::create_dir_all(self.flag_dir(chain))?;
        Ok(())
    }

    /// Existing bars, or an empty series when nothing was written yet
    pub fn read_or_empty(&self, chain: &str, symbol: &str, address: &str) -> EngineResult<Vec<Bar>> {
        let path = self.series_path(chain, symbol, address);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_bars(&path)
    }

    pub fn write(&self, chain: &str, symbol: &str, address: &str, bars: &[Bar]) -> EngineResult<()> {
        self.ensure_dirs(chain)?;
        let path = self.series_path(chain, symbol, address);
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for bar in bars {
                writer.serialize(bar)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl SeriesSource for KlineStore {
    fn load(&self, chain: &str, symbol: &str, address: &str) -> EngineResult<Vec<Bar>> {
        let path = self.series_path(chain, symbol, address);
        if !path.exists() {
            return Err(EngineError::MissingSeries {
                symbol: symbol.to_string(),
                path: path.display().to_string(),
            });
        }
        read_bars(&path)
    }
}

fn read_bars(path: &Path) -> EngineResult<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = Vec::new();
    for row in reader.deserialize() {
        bars.push(row?);
    }
    bars.sort_by_key(|bar: &Bar| bar.candle_begin_time);
    Ok(bars)
}
