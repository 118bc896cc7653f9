/// Durable position ledger: one active file per account plus daily history files
///
/// Layout under the data directory:
///
/// ```text
/// <account>/active_position.csv
/// <account>/history_positions/history_position_YYYY-MM-DD.csv
/// ```
///
/// The active file only ever holds `open` rows. Terminal rows are appended to
/// the history file of the day they became terminal and are never rewritten.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::{EngineResult, Position};

/// Column order of every ledger file
pub const POSITION_COLUMNS: [&str; 19] = [
    "update_time",
    "account_name",
    "strategy",
    "chain",
    "symbol",
    "address",
    "pair_address",
    "entry_time",
    "exit_time",
    "entry_price",
    "exit_price",
    "initial_amount",
    "balance",
    "quote_coin_symbol",
    "quote_coin_amount",
    "quote_recovered",
    "take_profit",
    "status",
    "pnl",
];

#[derive(Debug, Clone)]
pub struct PositionStore {
    data_dir: PathBuf,
}

impl PositionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.data_dir.join(account)
    }

    pub fn active_path(&self, account: &str) -> PathBuf {
        self.account_dir(account).join("active_position.csv")
    }

    pub fn history_dir(&self, account: &str) -> PathBuf {
        self.account_dir(account).join("history_positions")
    }

    pub fn history_path(&self, account: &str, date: NaiveDate) -> PathBuf {
        self.history_dir(account)
            .join(format!("history_position_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Create the account directories and an empty active ledger if missing
    pub fn ensure_account(&self, account: &str) -> EngineResult<()> {
        fs::create_dir_all(self.history_dir(account))?;
        let active = self.active_path(account);
        if !active.exists() {
            write_rows::<Position>(&active, &[])?;
            debug!(path = %active.display(), "Created empty active ledger");
        }
        Ok(())
    }

    /// Open positions of an account. A missing ledger is an empty book.
    pub fn load_active(&self, account: &str) -> EngineResult<Vec<Position>> {
        let path = self.active_path(account);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut positions = Vec::new();
        for position in read_rows(&path)? {
            if !position.is_open() {
                warn!(
                    account,
                    address = %position.address,
                    status = %position.status,
                    "Terminal row found in active ledger, ignoring"
                );
                continue;
            }
            if !seen.insert(position.address.clone()) {
                warn!(
                    account,
                    address = %position.address,
                    "Duplicate open position in active ledger, keeping the first"
                );
                continue;
            }
            positions.push(position);
        }
        Ok(positions)
    }

    /// Atomically replace the active ledger with the open rows of `positions`
    pub fn write_active(&self, account: &str, positions: &[Position]) -> EngineResult<()> {
        fs::create_dir_all(self.account_dir(account))?;
        let open: Vec<&Position> = positions.iter().filter(|p| p.is_open()).collect();
        let path = self.active_path(account);
        let tmp = path.with_extension("csv.tmp");
        write_rows(&tmp, &open)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append terminal records to the history file of their transition date
    pub fn append_history(&self, account: &str, records: &[Position]) -> EngineResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.history_dir(account))?;

        for record in records {
            let date = transition_date(record);
            let path = self.history_path(account, date);
            let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(needs_header)
                .from_writer(file);
            writer.serialize(record)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn load_history(&self, account: &str, date: NaiveDate) -> EngineResult<Vec<Position>> {
        let path = self.history_path(account, date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_rows(&path)
    }

    /// Persist one cycle's outcome: active ledger first, then history
    pub fn commit(&self, account: &str, active: &[Position], terminal: &[Position]) -> EngineResult<()> {
        self.write_active(account, active)?;
        self.append_history(account, terminal)
    }
}

fn transition_date(record: &Position) -> NaiveDate {
    let at: DateTime<Utc> = record.exit_time.unwrap_or(record.update_time);
    at.date_naive()
}

fn read_rows(path: &Path) -> EngineResult<Vec<Position>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn write_rows<P: std::borrow::Borrow<Position>>(path: &Path, rows: &[P]) -> EngineResult<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(POSITION_COLUMNS)?;
    for row in rows {
        writer.serialize(row.borrow())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PositionStatus;
    use chrono::TimeZone;

    fn position(address: &str, status: PositionStatus) -> Position {
        let entry = Utc.with_ymd_and_hms(2025, 4, 20, 23, 55, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2025, 4, 21, 0, 10, 0).unwrap();
        let terminal = status.is_terminal();
        Position {
            update_time: if terminal { exit } else { entry },
            account_name: "account_1".into(),
            strategy: "sma".into(),
            chain: "solana".into(),
            symbol: "WIF".into(),
            address: address.into(),
            pair_address: "pair".into(),
            entry_time: entry,
            exit_time: terminal.then_some(exit),
            entry_price: 0.000123,
            exit_price: terminal.then_some(0.0002),
            initial_amount: 81_300_813,
            balance: if terminal { 0 } else { 81_300_813 },
            quote_coin_symbol: "SOL".into(),
            quote_coin_amount: 10_000_000,
            quote_recovered: 0,
            take_profit: false,
            status,
            pnl: if terminal { 0.0063 } else { 0.0 },
        }
    }

    #[test]
    fn empty_ledger_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path());
        store.ensure_account("account_1").unwrap();

        let content = fs::read_to_string(store.active_path("account_1")).unwrap();
        assert_eq!(content.trim_end(), POSITION_COLUMNS.join(","));
        assert!(store.load_active("account_1").unwrap().is_empty());
        assert!(store.history_dir("account_1").is_dir());
    }

    #[test]
    fn active_ledger_keeps_open_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path());
        let rows = vec![
            position("a", PositionStatus::Open),
            position("b", PositionStatus::Closed),
            position("c", PositionStatus::StopLoss),
        ];
        store.write_active("account_1", &rows).unwrap();

        let loaded = store.load_active("account_1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], rows[0]);
        assert!(!store.active_path("account_1").with_extension("csv.tmp").exists());
    }

    #[test]
    fn history_is_partitioned_by_exit_date_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path());
        store
            .append_history("account_1", &[position("b", PositionStatus::Closed)])
            .unwrap();
        store
            .append_history("account_1", &[position("c", PositionStatus::StopLoss)])
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 4, 21).unwrap();
        let history = store.load_history("account_1", day).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, PositionStatus::Closed);
        assert_eq!(history[1].status, PositionStatus::StopLoss);
        assert_eq!(history[1].exit_price, Some(0.0002));

        let entry_day = NaiveDate::from_ymd_opt(2025, 4, 20).unwrap();
        assert!(store.load_history("account_1", entry_day).unwrap().is_empty());
    }

    #[test]
    fn duplicate_open_rows_collapse_to_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path());
        let mut second = position("a", PositionStatus::Open);
        second.balance = 1;
        store
            .write_active("account_1", &[position("a", PositionStatus::Open), second])
            .unwrap();

        let loaded = store.load_active("account_1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].balance, 81_300_813);
    }
}
