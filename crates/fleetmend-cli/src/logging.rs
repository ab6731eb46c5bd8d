//! Log sinks: stdout plus a size-rotated file, identical lines in both.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::ChronoLocal};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fleetmend_core::FleetConfig;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the console + rotating file subscriber described by `config`.
pub fn init(config: &FleetConfig) -> io::Result<()> {
    let file = RotatingFile::open(&config.log_file, config.log_max_bytes, config.log_backups)?;
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_target(false)
                .with_ansi(false)
                .with_writer(io::stdout),
        )
        .with(
            fmt::layer()
                .with_timer(timer)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

/// Console-only subscriber for failures that happen before the config
/// (and so the log file location) is known. A no-op if a subscriber is
/// already installed.
pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .with_ansi(false)
        .try_init();
}

/// A log file that is moved aside to `<path>.1` once it would grow past
/// `max_bytes`. Older backups shift up to `<path>.<backups>`; anything
/// beyond that is deleted.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open (appending) or create the file and its parent directory.
    pub fn open(path: &Path, max_bytes: u64, backups: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    replace(&from, &self.backup_path(index + 1))?;
                }
            }
            replace(&self.path, &self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        }

        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Rename `from` over `to`, removing `to` first where rename won't.
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/fleetmend.log");

        let mut file = RotatingFile::open(&path, 1024, 3).unwrap();
        file.write_all(b"first line\n").unwrap();

        assert_eq!(read(&path), "first line\n");
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.log");
        fs::write(&path, "previous run\n").unwrap();

        let mut file = RotatingFile::open(&path, 1024, 3).unwrap();
        file.write_all(b"this run\n").unwrap();

        assert_eq!(read(&path), "previous run\nthis run\n");
    }

    #[test]
    fn rotates_when_line_would_exceed_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.log");

        let mut file = RotatingFile::open(&path, 20, 3).unwrap();
        file.write_all(b"0123456789abcde\n").unwrap(); // 16 bytes
        file.write_all(b"second line\n").unwrap(); // would make 28

        assert_eq!(read(&path), "second line\n");
        assert_eq!(read(&dir.path().join("fleetmend.log.1")), "0123456789abcde\n");
    }

    #[test]
    fn keeps_at_most_backups_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.log");

        let mut file = RotatingFile::open(&path, 8, 2).unwrap();
        for line in ["line-1\n", "line-2\n", "line-3\n", "line-4\n"] {
            file.write_all(line.as_bytes()).unwrap();
        }

        assert_eq!(read(&path), "line-4\n");
        assert_eq!(read(&dir.path().join("fleetmend.log.1")), "line-3\n");
        assert_eq!(read(&dir.path().join("fleetmend.log.2")), "line-2\n");
        assert!(!dir.path().join("fleetmend.log.3").exists());
    }

    #[test]
    fn zero_backups_truncates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.log");

        let mut file = RotatingFile::open(&path, 8, 0).unwrap();
        file.write_all(b"line-1\n").unwrap();
        file.write_all(b"line-2\n").unwrap();

        assert_eq!(read(&path), "line-2\n");
        assert!(!dir.path().join("fleetmend.log.1").exists());
    }

    #[test]
    fn oversized_line_still_written_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.log");

        let mut file = RotatingFile::open(&path, 4, 1).unwrap();
        file.write_all(b"much longer than four bytes\n").unwrap();

        assert_eq!(read(&path), "much longer than four bytes\n");
    }
}
