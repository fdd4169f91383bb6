// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder untuk jejak controller:
// - market snapshot tiap cycle, action yang diajukan, executor yang di-store
// - BufWriter, flush tiap 1s dan/atau tiap 1000 event
// - parent directory dibuat otomatis
// - kalau tulis gagal, coba reopen sekali lalu lanjut
//
// ENV: `RECORD_FILE=/path/to/controller.jsonl` (lihat config.rs).
//
use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

pub struct Recorder {
    path: PathBuf,
    writer: BufWriter<File>,
    since_last_flush: u32,
}

impl Recorder {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = Self::open_writer(&path).await?;
        Ok(Self { path, writer, since_last_flush: 0 })
    }

    async fn open_writer(path: &Path) -> std::io::Result<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(BufWriter::new(file))
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await
    }

    /// Serialize and append one event; a failed write gets one reopen + retry.
    pub async fn record(&mut self, ev: &Event) -> std::io::Result<()> {
        let line = serde_json::to_vec(ev)?;
        if let Err(e) = self.write_line(&line).await {
            error!(?e, path = %self.path.display(), "recorder: write failed, attempting reopen");
            self.writer = Self::open_writer(&self.path).await?;
            self.write_line(&line).await?;
        }
        self.since_last_flush += 1;
        if self.since_last_flush >= FLUSH_EVERY_N_EVENTS {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.since_last_flush = 0;
        self.writer.flush().await
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut recorder = match Recorder::open(&path).await {
        Ok(r) => r,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        if let Err(e) = recorder.record(&ev).await {
                            error!(?e, "recorder: drop event");
                        }
                    }
                    None => {
                        let _ = recorder.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                let _ = recorder.flush().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ProcessedMarketData};

    #[tokio::test]
    async fn events_are_appended_as_json_lines() {
        let dir = std::env::temp_dir().join(format!("mm_grid_rec_{}", std::process::id()));
        let path = dir.join("nested").join("events.jsonl");
        let _ = std::fs::remove_dir_all(&dir);

        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(rx, path.to_string_lossy().into_owned()));
        tx.send(Event::Market { ts_ms: 1, data: ProcessedMarketData { reference_price: 100.0, spread_multiplier: 1.0 } })
            .await
            .unwrap();
        tx.send(Event::Action { ts_ms: 1, action: Action::stop("ex-1") }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"stop_executor\""));
        assert!(lines[1].contains("ex-1"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
