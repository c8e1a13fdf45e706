//! Day CSV artifacts in the format `COPY ... WITH (FORMAT csv, NULL '\N')` reads.
//!
//! Per day partition there are two files, `trades_<YYYYMMDD>.csv` and
//! `trade_participants_<YYYYMMDD>.csv`: comma delimited, no header, column order matching
//! [`TRADE_COLUMNS`] / [`PARTICIPANT_COLUMNS`]. An absent value is the unquoted `\N` sentinel.
//! An empty string is an empty field, which COPY reads as `''` because the NULL marker is `\N`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{EmitError, FieldError};
use crate::models::{DayKey, ParticipantRecord, ReconstructedTrade, Side};

pub const NULL_SENTINEL: &str = "\\N";

pub const TRADE_COLUMNS: [&str; 7] = ["id", "coin", "time", "price", "size", "hash", "trade_dir_override"];

pub const PARTICIPANT_COLUMNS: [&str; 7] = [
    "trade_id",
    "user_address",
    "side",
    "start_pos",
    "order_id",
    "strategy_id",
    "client_order_id",
];

/// Character limits of the production text columns.
pub const TRADE_TEXT_LIMITS: [(&str, usize); 3] = [("coin", 64), ("hash", 66), ("trade_dir_override", 32)];

pub const PARTICIPANT_TEXT_LIMITS: [(&str, usize); 3] = [("user_address", 66), ("side", 1), ("client_order_id", 66)];

pub fn trades_file_name(day: DayKey) -> String {
    format!("trades_{}.csv", day)
}

pub fn participants_file_name(day: DayKey) -> String {
    format!("trade_participants_{}.csv", day)
}

fn text_limit(column: &str) -> Option<usize> {
    TRADE_TEXT_LIMITS
        .iter()
        .chain(PARTICIPANT_TEXT_LIMITS.iter())
        .find(|(name, _)| *name == column)
        .map(|(_, max)| *max)
}

fn check_text(column: &'static str, value: &str) -> Result<(), FieldError> {
    if value == NULL_SENTINEL {
        return Err(FieldError::NullSentinel { column });
    }
    if let Some(max) = text_limit(column) {
        let len = value.chars().count();
        if len > max {
            return Err(FieldError::TooLong { column, len, max });
        }
    }
    Ok(())
}

/// Reject values COPY would load differently than written (the literal sentinel) or that
/// overflow a production column.
pub fn check_fields(trade: &ReconstructedTrade) -> Result<(), FieldError> {
    check_text("coin", &trade.coin)?;
    check_text("time", &trade.time)?;
    check_text("hash", &trade.hash)?;
    if let Some(dir) = trade.trade_dir_override.as_deref() {
        check_text("trade_dir_override", dir)?;
    }
    for participant in &trade.participants {
        check_text("user_address", &participant.user_address)?;
        if let Some(cloid) = participant.client_order_id.as_deref() {
            check_text("client_order_id", cloid)?;
        }
    }
    Ok(())
}

fn nullable(value: Option<&str>) -> &str {
    value.unwrap_or(NULL_SENTINEL)
}

pub fn trade_record(id: i64, trade: &ReconstructedTrade) -> [String; 7] {
    [
        id.to_string(),
        trade.coin.clone(),
        trade.time.clone(),
        trade.price.to_string(),
        trade.size.to_string(),
        trade.hash.clone(),
        nullable(trade.trade_dir_override.as_deref()).to_string(),
    ]
}

pub fn participant_record(trade_id: i64, participant: &ParticipantRecord) -> [String; 7] {
    let strategy_id = participant.strategy_id.map(|id| id.to_string());
    [
        trade_id.to_string(),
        participant.user_address.clone(),
        participant.side.tag().to_string(),
        participant.start_pos.to_string(),
        participant.order_id.to_string(),
        nullable(strategy_id.as_deref()).to_string(),
        nullable(participant.client_order_id.as_deref()).to_string(),
    ]
}

/// A finished day CSV pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayArtifacts {
    pub day: DayKey,
    pub trades_path: PathBuf,
    pub participants_path: PathBuf,
    pub trades: u64,
    pub participants: u64,
    pub first_id: i64,
    pub last_id: i64,
}

struct OpenFiles {
    trades: csv::Writer<File>,
    participants: csv::Writer<File>,
}

/// Writer for one day partition.
///
/// Files are created on the first trade and written as `*.partial`; `finish` renames them into
/// place. A day with no trades leaves nothing on disk, and a writer dropped without `finish`
/// removes its partial files.
pub struct DayCsvWriter {
    day: DayKey,
    trades_path: PathBuf,
    participants_path: PathBuf,
    files: Option<OpenFiles>,
    trades: u64,
    participants: u64,
    first_id: Option<i64>,
    last_id: i64,
    created: bool,
    finished: bool,
}

impl DayCsvWriter {
    pub fn new(output_dir: &Path, day: DayKey) -> Self {
        Self {
            day,
            trades_path: output_dir.join(trades_file_name(day)),
            participants_path: output_dir.join(participants_file_name(day)),
            files: None,
            trades: 0,
            participants: 0,
            first_id: None,
            last_id: 0,
            created: false,
            finished: false,
        }
    }

    fn partial(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".partial");
        PathBuf::from(name)
    }

    fn create_files(&self) -> Result<OpenFiles, EmitError> {
        if let Some(parent) = self.trades_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EmitError::io(parent, e))?;
        }
        let trades_partial = Self::partial(&self.trades_path);
        let participants_partial = Self::partial(&self.participants_path);
        let trades = File::create(&trades_partial).map_err(|e| EmitError::io(&trades_partial, e))?;
        let participants =
            File::create(&participants_partial).map_err(|e| EmitError::io(&participants_partial, e))?;
        Ok(OpenFiles {
            trades: Self::csv_writer(trades),
            participants: Self::csv_writer(participants),
        })
    }

    fn csv_writer(file: File) -> csv::Writer<File> {
        WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Necessary)
            .from_writer(file)
    }

    /// Write one trade row and one row per participant. `id` must already be allocated.
    pub fn write_trade(&mut self, id: i64, trade: &ReconstructedTrade) -> Result<(), EmitError> {
        check_fields(trade)?;
        let mut files = match self.files.take() {
            Some(files) => files,
            None => {
                self.created = true;
                self.create_files()?
            }
        };

        let trades_partial = Self::partial(&self.trades_path);
        files
            .trades
            .write_record(&trade_record(id, trade))
            .map_err(|e| EmitError::csv(&trades_partial, e))?;
        let participants_partial = Self::partial(&self.participants_path);
        for participant in &trade.participants {
            files
                .participants
                .write_record(&participant_record(id, participant))
                .map_err(|e| EmitError::csv(&participants_partial, e))?;
        }
        self.files = Some(files);

        self.trades += 1;
        self.participants += trade.participants.len() as u64;
        self.first_id.get_or_insert(id);
        self.last_id = id;
        Ok(())
    }

    pub fn trades_written(&self) -> u64 {
        self.trades
    }

    /// Flush and move the files into place. `None` when the day produced no trades.
    pub fn finish(mut self) -> Result<Option<DayArtifacts>, EmitError> {
        let Some(mut files) = self.files.take() else {
            return Ok(None);
        };

        for (writer, final_path) in [
            (&mut files.trades, &self.trades_path),
            (&mut files.participants, &self.participants_path),
        ] {
            let partial = Self::partial(final_path);
            writer.flush().map_err(|e| EmitError::io(&partial, e))?;
            writer.get_ref().sync_all().map_err(|e| EmitError::io(&partial, e))?;
        }
        drop(files);

        for final_path in [&self.trades_path, &self.participants_path] {
            let partial = Self::partial(final_path);
            fs::rename(&partial, final_path).map_err(|e| EmitError::io(final_path, e))?;
        }
        self.finished = true;

        Ok(Some(DayArtifacts {
            day: self.day,
            trades_path: self.trades_path.clone(),
            participants_path: self.participants_path.clone(),
            trades: self.trades,
            participants: self.participants,
            first_id: self.first_id.unwrap_or_default(),
            last_id: self.last_id,
        }))
    }
}

impl Drop for DayCsvWriter {
    fn drop(&mut self) {
        if self.finished || !self.created {
            return;
        }
        self.files = None;
        for path in [&self.trades_path, &self.participants_path] {
            let partial = Self::partial(path);
            if let Err(e) = fs::remove_file(&partial) {
                tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial CSV");
            }
        }
    }
}

/// One row of a trades CSV as read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRow {
    pub id: i64,
    pub coin: String,
    pub time: String,
    pub price: Decimal,
    pub size: Decimal,
    pub hash: String,
    pub trade_dir_override: Option<String>,
}

/// One row of a participants CSV as read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantRow {
    pub trade_id: i64,
    pub user_address: String,
    pub side: Side,
    pub start_pos: Decimal,
    pub order_id: i64,
    pub strategy_id: Option<i64>,
    pub client_order_id: Option<String>,
}

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).filter(|value| *value != NULL_SENTINEL)
}

fn required<'r>(record: &'r StringRecord, idx: usize, column: &str) -> Result<&'r str, String> {
    field(record, idx).ok_or_else(|| format!("{} is NULL", column))
}

fn parse_col<T: FromStr>(record: &StringRecord, idx: usize, column: &str) -> Result<T, String> {
    let raw = required(record, idx, column)?;
    raw.parse()
        .map_err(|_| format!("invalid {}: {}", column, raw))
}

fn parse_optional_col<T: FromStr>(record: &StringRecord, idx: usize, column: &str) -> Result<Option<T>, String> {
    match field(record, idx) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid {}: {}", column, raw)),
    }
}

fn read_rows<T>(
    path: &Path,
    width: usize,
    convert: impl Fn(&StringRecord) -> Result<T, String>,
) -> Result<Vec<T>, EmitError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EmitError::csv(path, e))?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EmitError::csv(path, e))?;
        let line = record.position().map_or(idx + 1, |pos| pos.line() as usize);
        let row = if record.len() == width {
            convert(&record)
        } else {
            Err(format!("expected {} columns, found {}", width, record.len()))
        };
        rows.push(row.map_err(|reason| EmitError::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason,
        })?);
    }
    Ok(rows)
}

pub fn read_trades_csv(path: &Path) -> Result<Vec<TradeRow>, EmitError> {
    read_rows(path, TRADE_COLUMNS.len(), |r| {
        Ok(TradeRow {
            id: parse_col(r, 0, "id")?,
            coin: required(r, 1, "coin")?.to_string(),
            time: required(r, 2, "time")?.to_string(),
            price: parse_col(r, 3, "price")?,
            size: parse_col(r, 4, "size")?,
            hash: required(r, 5, "hash")?.to_string(),
            trade_dir_override: field(r, 6).map(str::to_string),
        })
    })
}

pub fn read_participants_csv(path: &Path) -> Result<Vec<ParticipantRow>, EmitError> {
    read_rows(path, PARTICIPANT_COLUMNS.len(), |r| {
        Ok(ParticipantRow {
            trade_id: parse_col(r, 0, "trade_id")?,
            user_address: required(r, 1, "user_address")?.to_string(),
            side: parse_col(r, 2, "side")?,
            start_pos: parse_col(r, 3, "start_pos")?,
            order_id: parse_col(r, 4, "order_id")?,
            strategy_id: parse_optional_col(r, 5, "strategy_id")?,
            client_order_id: field(r, 6).map(str::to_string),
        })
    })
}

/// Join read-back rows into trades keyed by id. Participants keep file order.
pub fn assemble_trades(
    trades: Vec<TradeRow>,
    participants: Vec<ParticipantRow>,
) -> BTreeMap<i64, ReconstructedTrade> {
    let mut assembled: BTreeMap<i64, ReconstructedTrade> = trades
        .into_iter()
        .map(|row| {
            (
                row.id,
                ReconstructedTrade {
                    tid: None,
                    coin: row.coin,
                    time: row.time,
                    price: row.price,
                    size: row.size,
                    hash: row.hash,
                    trade_dir_override: row.trade_dir_override,
                    participants: Vec::new(),
                },
            )
        })
        .collect();

    for row in participants {
        if let Some(trade) = assembled.get_mut(&row.trade_id) {
            trade.participants.push(ParticipantRecord {
                user_address: row.user_address,
                side: row.side,
                start_pos: row.start_pos,
                order_id: row.order_id,
                strategy_id: row.strategy_id,
                client_order_id: row.client_order_id,
            });
        }
    }
    assembled
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade() -> ReconstructedTrade {
        ReconstructedTrade {
            tid: None,
            coin: "BTC".to_string(),
            time: "2025-10-06T12:00:00.123".to_string(),
            price: dec!(62000.50),
            size: dec!(0.01),
            hash: "0xabc".to_string(),
            trade_dir_override: None,
            participants: vec![
                ParticipantRecord {
                    user_address: "0xA".to_string(),
                    side: Side::Bid,
                    start_pos: dec!(-1.5),
                    order_id: 11,
                    strategy_id: Some(7),
                    client_order_id: Some("tag,with \"quotes\"\nand newline".to_string()),
                },
                ParticipantRecord {
                    user_address: "0xB".to_string(),
                    side: Side::Ask,
                    start_pos: dec!(0),
                    order_id: 12,
                    strategy_id: None,
                    client_order_id: Some(String::new()),
                },
            ],
        }
    }

    #[test]
    fn null_and_empty_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let day: DayKey = "20251006".parse().unwrap();
        let mut writer = DayCsvWriter::new(dir.path(), day);
        writer.write_trade(5, &sample_trade()).unwrap();
        let artifacts = writer.finish().unwrap().unwrap();

        assert_eq!(
            fs::read_to_string(&artifacts.trades_path).unwrap(),
            "5,BTC,2025-10-06T12:00:00.123,62000.50,0.01,0xabc,\\N\n"
        );
        let participants = fs::read_to_string(&artifacts.participants_path).unwrap();
        assert!(participants.ends_with("5,0xB,A,0,12,\\N,\n"));

        let rows = read_participants_csv(&artifacts.participants_path).unwrap();
        assert_eq!(rows[1].strategy_id, None);
        assert_eq!(rows[1].client_order_id.as_deref(), Some(""));
    }

    #[test]
    fn quoted_empty_reads_as_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_participants_20251006.csv");
        fs::write(&path, "1,0xa,B,0,1,\\N,\"\"\n1,0xb,A,0,2,3,\\N\n").unwrap();

        let rows = read_participants_csv(&path).unwrap();
        assert_eq!(rows[0].client_order_id.as_deref(), Some(""));
        assert_eq!(rows[1].client_order_id, None);
        assert_eq!(rows[1].strategy_id, Some(3));
    }

    #[test]
    fn field_check_flags_overflow_and_literal_sentinel() {
        let mut trade = sample_trade();
        assert_eq!(check_fields(&trade), Ok(()));

        trade.trade_dir_override = Some("x".repeat(40));
        assert_eq!(
            check_fields(&trade),
            Err(FieldError::TooLong {
                column: "trade_dir_override",
                len: 40,
                max: 32
            })
        );

        let mut trade = sample_trade();
        trade.participants[0].client_order_id = Some(NULL_SENTINEL.to_string());
        assert_eq!(
            check_fields(&trade),
            Err(FieldError::NullSentinel { column: "client_order_id" })
        );

        let dir = tempfile::tempdir().unwrap();
        let mut writer = DayCsvWriter::new(dir.path(), "20251006".parse().unwrap());
        assert!(matches!(writer.write_trade(1, &trade), Err(EmitError::Field(_))));
        assert_eq!(writer.trades_written(), 0);
    }

    #[test]
    fn empty_day_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let day: DayKey = "20251006".parse().unwrap();
        let writer = DayCsvWriter::new(dir.path(), day);
        assert_eq!(writer.finish().unwrap(), None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropped_writer_removes_partials() {
        let dir = tempfile::tempdir().unwrap();
        let day: DayKey = "20251006".parse().unwrap();
        {
            let mut writer = DayCsvWriter::new(dir.path(), day);
            writer.write_trade(1, &sample_trade()).unwrap();
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn written_day_reads_back_field_for_field() {
        let dir = tempfile::tempdir().unwrap();
        let day: DayKey = "20251006".parse().unwrap();
        let mut writer = DayCsvWriter::new(dir.path(), day);
        writer.write_trade(10, &sample_trade()).unwrap();
        writer.write_trade(11, &sample_trade()).unwrap();
        let artifacts = writer.finish().unwrap().unwrap();

        assert_eq!(artifacts.trades, 2);
        assert_eq!(artifacts.participants, 4);
        assert_eq!((artifacts.first_id, artifacts.last_id), (10, 11));
        assert!(artifacts.trades_path.ends_with("trades_20251006.csv"));

        let trades = read_trades_csv(&artifacts.trades_path).unwrap();
        let participants = read_participants_csv(&artifacts.participants_path).unwrap();
        let assembled = assemble_trades(trades, participants);
        assert_eq!(assembled.len(), 2);
        assert_eq!(assembled[&10], sample_trade());
        assert_eq!(assembled[&11], sample_trade());
    }

    #[test]
    fn reader_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades_20251006.csv");
        fs::write(&path, "1,BTC\n").unwrap();
        assert!(matches!(
            read_trades_csv(&path),
            Err(EmitError::MalformedRow { line: 1, .. })
        ));
    }
}
