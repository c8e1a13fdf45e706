#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use sea_orm::{Database, DatabaseConnection, DbErr};
use std::env;

use twap_ingest::services::day_processor::IngestOptions;

/// Set up test database connection
/// Uses TEST_DATABASE_URL environment variable or falls back to default
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let database_url = env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://twap_user@localhost:5432/twap_test".to_string());

    Database::connect(&database_url).await
}

/// A `node_trades` line; `twap_a`/`twap_b` are JSON literals (`"7"` or `"null"`).
pub fn node_trade(hash: &str, twap_a: &str, twap_b: &str) -> String {
    format!(
        r#"{{"coin":"BTC","side":"A","time":"2025-10-06T12:00:00.123","px":"62000.5","sz":"0.01","hash":"{hash}","trade_dir_override":"Na","side_info":[{{"user":"0xa1","start_pos":"0","oid":11,"twap_id":{twap_a},"cloid":null}},{{"user":"0xb2","start_pos":"1.5","oid":12,"twap_id":{twap_b},"cloid":"0xc1"}}]}}"#
    )
}

/// One `node_fills_by_block` event.
pub fn fill(user: &str, side: &str, tid: i64, twap: &str) -> String {
    format!(
        r#"["{user}",{{"coin":"ETH","px":"2500.1","sz":"0.4","side":"{side}","time":1759752000123,"startPosition":"0","dir":"Open Long","hash":"0xh{tid}","oid":5,"tid":{tid},"cloid":null,"twapId":{twap}}}]"#
    )
}

pub fn block(events: &[String]) -> String {
    format!(
        r#"{{"block_time":"2025-10-06T12:00:00.5","block_number":42,"events":[{}]}}"#,
        events.join(",")
    )
}

/// Write `<source>/hourly/<day>/<hour>` with one line per entry.
pub fn write_hour(source: &Path, day: &str, hour: u32, lines: &[String]) -> PathBuf {
    let dir = source.join("hourly").join(day);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(hour.to_string());
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

pub fn options(output_dir: &Path) -> IngestOptions {
    IngestOptions {
        output_dir: output_dir.to_path_buf(),
        ..IngestOptions::default()
    }
}

pub fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
