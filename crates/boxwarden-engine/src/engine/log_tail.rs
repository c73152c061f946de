//! Incremental tailing of the engine's log file.
//!
//! Each tick reads only the bytes appended since the previous tick,
//! sanitizes them line by line and buffers the result until drained.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{watch, Mutex};

/// Read position within the tailed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    pub path: PathBuf,
    pub offset: u64,
    /// Whether the previous tick found the file.
    pub seen: bool,
}

impl LogCursor {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            seen: false,
        }
    }
}

pub struct LogTailer {
    tag: String,
    cursor: Mutex<LogCursor>,
    buffer: Mutex<Vec<String>>,
}

impl LogTailer {
    /// Archives any log left over from a previous run, then starts with an
    /// empty cursor.
    pub fn new(path: impl Into<PathBuf>, engine_name: &str) -> Self {
        let path = path.into();
        archive_existing(&path);
        Self {
            tag: format!("[{} LOG]", engine_name),
            cursor: Mutex::new(LogCursor::new(path)),
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub async fn cursor(&self) -> LogCursor {
        self.cursor.lock().await.clone()
    }

    /// Poll the file once. Returns the number of lines buffered.
    pub async fn tick(&self) -> usize {
        let mut cursor = self.cursor.lock().await;

        let mut file = match tokio::fs::File::open(&cursor.path).await {
            Ok(f) => f,
            Err(_) => {
                cursor.seen = false;
                return 0;
            }
        };
        let size = match file.metadata().await {
            Ok(m) => m.len(),
            Err(e) => {
                log::debug!("stat {} failed: {}", cursor.path.display(), e);
                return 0;
            }
        };

        if !cursor.seen {
            cursor.seen = true;
            cursor.offset = 0;
        } else if size < cursor.offset {
            log::debug!("{} shrank to {} bytes, rereading", cursor.path.display(), size);
            cursor.offset = 0;
        }
        if size == cursor.offset {
            return 0;
        }

        let mut chunk = Vec::with_capacity((size - cursor.offset) as usize);
        let read = async {
            file.seek(SeekFrom::Start(cursor.offset)).await?;
            (&mut file).take(size - cursor.offset).read_to_end(&mut chunk).await
        }
        .await;
        if let Err(e) = read {
            log::debug!("read {} failed: {}", cursor.path.display(), e);
            return 0;
        }

        let lines: Vec<String> = chunk
            .split(|b| *b == b'\n')
            .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
            .map(sanitize_bytes)
            .filter(|l| !l.is_empty())
            .map(|l| format!("{} {}", self.tag, l))
            .collect();
        cursor.offset = size;
        drop(cursor);

        let n = lines.len();
        if n > 0 {
            self.buffer.lock().await.extend(lines);
        }
        n
    }

    /// Take everything buffered so far.
    pub async fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.buffer.lock().await)
    }

    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
        }
        log::debug!("log tailer stopped");
    }
}

/// Move `path` aside as `<path>.<YYYYMMDD_HHMMSS>`; remove it if that fails.
pub fn archive_existing(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut archived = path.as_os_str().to_owned();
    archived.push(format!(".{}", stamp));
    let archived = PathBuf::from(archived);

    match std::fs::rename(path, &archived) {
        Ok(()) => Some(archived),
        Err(e) => {
            log::warn!("could not archive {}: {}", path.display(), e);
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("could not remove {}: {}", path.display(), e);
            }
            None
        }
    }
}

/// Decode one raw line, replacing each invalid UTF-8 sequence with `?`.
fn sanitize_bytes(raw: &[u8]) -> String {
    let mut decoded = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        decoded.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            decoded.push('?');
        }
    }
    sanitize_line(&decoded)
}

/// Fold typographic punctuation to ASCII, blank out control characters
/// (tab, CR and LF survive) and trim.
pub fn sanitize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.trim().chars() {
        match c {
            '\u{00A0}' => out.push(' '),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 32 => out.push(' '),
            c if (127..160).contains(&(c as u32)) => out.push(' '),
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, data: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
    }

    fn padded_line(len: usize, text: &str) -> Vec<u8> {
        let mut line = text.as_bytes().to_vec();
        line.resize(len - 1, b' ');
        line.push(b'\n');
        line
    }

    #[tokio::test]
    async fn appended_bytes_become_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sing-box.log");
        let tailer = LogTailer::new(&path, "sing-box");

        append(&path, &padded_line(100, "boot"));
        assert_eq!(tailer.tick().await, 1);
        assert_eq!(tailer.cursor().await.offset, 100);
        tailer.drain().await;

        let mut grow = padded_line(75, "INFO inbound/tun started");
        grow.extend(padded_line(75, "WARN dns \u{201C}slow\u{201D}"));
        append(&path, &grow);

        assert_eq!(tailer.tick().await, 2);
        assert_eq!(tailer.cursor().await.offset, 250);
        assert_eq!(
            tailer.drain().await,
            vec![
                "[sing-box LOG] INFO inbound/tun started",
                "[sing-box LOG] WARN dns \"slow\"",
            ]
        );
        assert!(tailer.drain().await.is_empty());
    }

    #[tokio::test]
    async fn shrunk_file_is_reread_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sing-box.log");
        let tailer = LogTailer::new(&path, "sing-box");

        let mut big = Vec::new();
        for i in 0..90 {
            big.extend(padded_line(100, &format!("old {}", i)));
        }
        append(&path, &big);
        assert_eq!(tailer.tick().await, 90);
        assert_eq!(tailer.cursor().await.offset, 9000);
        tailer.drain().await;

        std::fs::write(&path, padded_line(40, "fresh start")).unwrap();
        assert_eq!(tailer.tick().await, 1);
        assert_eq!(tailer.cursor().await.offset, 40);
        assert_eq!(tailer.drain().await, vec!["[sing-box LOG] fresh start"]);
    }

    #[tokio::test]
    async fn offset_advances_even_when_nothing_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.log");
        let tailer = LogTailer::new(&path, "e");
        append(&path, b"   \n\x01\x02\n\n");
        assert_eq!(tailer.tick().await, 0);
        assert_eq!(tailer.cursor().await.offset, 8);
        assert_eq!(tailer.tick().await, 0);
        assert_eq!(tailer.cursor().await.offset, 8);
    }

    #[tokio::test]
    async fn missing_file_is_tolerated_and_reset_to_unseen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.log");
        let tailer = LogTailer::new(&path, "e");
        assert_eq!(tailer.tick().await, 0);
        assert!(!tailer.cursor().await.seen);

        append(&path, b"a\n");
        tailer.tick().await;
        assert!(tailer.cursor().await.seen);

        std::fs::remove_file(&path).unwrap();
        tailer.tick().await;
        assert!(!tailer.cursor().await.seen);

        append(&path, b"a\nb\n");
        assert_eq!(tailer.tick().await, 2);
    }

    #[tokio::test]
    async fn offset_never_moves_backwards_while_growing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.log");
        let tailer = LogTailer::new(&path, "e");
        let mut last = 0;
        for i in 0..10 {
            append(&path, format!("line {}\n", i).as_bytes());
            tailer.tick().await;
            let offset = tailer.cursor().await.offset;
            assert!(offset >= last);
            last = offset;
        }
        assert_eq!(tailer.drain().await.len(), 10);
    }

    #[test]
    fn previous_log_is_archived_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sing-box.log");
        std::fs::write(&path, b"last run").unwrap();

        let _tailer = LogTailer::new(&path, "sing-box");

        assert!(!path.exists());
        let archived: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(archived.len(), 1);
        let suffix = archived[0].strip_prefix("sing-box.log.").unwrap();
        assert_eq!(suffix.len(), 15);
        assert_eq!(&suffix[8..9], "_");
    }

    #[test]
    fn sanitize_folds_typography() {
        assert_eq!(
            sanitize_line("\u{00A0}it\u{2019}s \u{201C}ok\u{201D} \u{2013} wait\u{2026} "),
            "it's \"ok\" - wait..."
        );
        assert_eq!(sanitize_line("a\u{0007}b\u{0085}c"), "a b c");
        assert_eq!(sanitize_line("col1\tcol2"), "col1\tcol2");
    }

    #[test]
    fn invalid_utf8_becomes_question_mark() {
        assert_eq!(sanitize_bytes(b"bad \xff byte"), "bad ? byte");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "plain",
            "  \u{2014}dash\u{2014}  ",
            "\u{0001}\u{0002}x\u{009F}",
            "tab\there\r",
            "\u{2026}\u{2026}",
            "unicode ok: héllo 世界",
            "",
        ];
        for s in samples {
            let once = sanitize_line(s);
            assert_eq!(sanitize_line(&once), once, "input {:?}", s);
        }
    }
}
