//! 结果审计日志

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;

use crate::race::AccountReport;

/// 账号最终结果的落盘接口
pub trait OutcomeRecorder: Send + Sync {
    fn record(&self, report: &AccountReport) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct Line<'a> {
    recorded_at: String,
    #[serde(flatten)]
    report: &'a AccountReport,
}

/// 以 JSON Lines 追加写入文件
pub struct JsonlRecorder {
    file: Mutex<File>,
}

impl JsonlRecorder {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        tracing::info!("结果审计日志: {}", path.as_ref().display());
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl OutcomeRecorder for JsonlRecorder {
    fn record(&self, report: &AccountReport) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&Line {
            recorded_at: Utc::now().to_rfc3339(),
            report,
        })?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::RaceOutcome;

    #[test]
    fn test_appends_one_line_per_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let recorder = JsonlRecorder::open(&path).unwrap();
        recorder
            .record(&AccountReport::without_run("u1", RaceOutcome::Interrupted, None))
            .unwrap();
        recorder
            .record(&AccountReport::without_run(
                "u2",
                RaceOutcome::Error,
                Some("没有可提交的档位".to_string()),
            ))
            .unwrap();
        drop(recorder);

        // 再次打开继续追加
        JsonlRecorder::open(&path)
            .unwrap()
            .record(&AccountReport::without_run("u3", RaceOutcome::TimedOut, None))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["account_id"], "u1");
        assert_eq!(lines[0]["outcome"], "interrupted");
        assert_eq!(lines[1]["last_error"], "没有可提交的档位");
        assert!(lines[2]["recorded_at"].is_string());
    }
}
