//! Append-only destinations for formatted records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::ChannelConfig;
use crate::error::AuditError;

/// A destination owned by the writer thread.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send {
    /// Human readable name used when reporting failures.
    fn describe(&self) -> String;

    /// Appends one formatted record followed by a newline.
    fn write_line(&mut self, line: &str) -> Result<(), AuditError>;

    fn flush(&mut self) -> Result<(), AuditError>;
}

/// Size-based rolling file.
///
/// Before a write that would take the file to `max_bytes` or beyond, the file
/// is renamed to `<path>.1`, `<path>.1` to `<path>.2` and so on, keeping at
/// most `backup_count` generations. Rollover is disabled when either limit is
/// zero.
#[derive(Debug)]
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: Option<File>,
    size: u64,
}

impl RotatingFileSink {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            backup_count,
            file: None,
            size: 0,
        }
    }

    pub fn from_channel(path: impl Into<PathBuf>, channel: &ChannelConfig) -> Self {
        Self::new(path, channel.max_bytes, channel.backup_count)
    }

    fn io_error(&self, source: io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn ensure_open(&mut self) -> Result<(), AuditError> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error(err))?;
        self.size = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    fn should_rollover(&self, incoming: u64) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.size > 0
            && self.size + incoming >= self.max_bytes
    }

    fn backup_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", generation));
        PathBuf::from(name)
    }

    fn rollover(&mut self) -> Result<(), AuditError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|err| self.io_error(err))?;
        }
        for generation in (1..self.backup_count).rev() {
            let source = self.backup_path(generation);
            if source.exists() {
                let target = self.backup_path(generation + 1);
                if target.exists() {
                    fs::remove_file(&target).map_err(|err| self.io_error(err))?;
                }
                fs::rename(&source, &target).map_err(|err| self.io_error(err))?;
            }
        }
        let first = self.backup_path(1);
        if first.exists() {
            fs::remove_file(&first).map_err(|err| self.io_error(err))?;
        }
        if self.path.exists() {
            fs::rename(&self.path, &first).map_err(|err| self.io_error(err))?;
        }
        self.size = 0;
        Ok(())
    }
}

impl Sink for RotatingFileSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn write_line(&mut self, line: &str) -> Result<(), AuditError> {
        let incoming = line.len() as u64 + 1;
        self.ensure_open()?;
        if self.should_rollover(incoming) {
            self.rollover()?;
            self.ensure_open()?;
        }
        let written = match self.file.as_mut() {
            Some(file) => file
                .write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n")),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "sink file unavailable",
            )),
        };
        written.map_err(|err| self.io_error(err))?;
        self.size += incoming;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AuditError> {
        let flushed = match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        };
        flushed.map_err(|err| self.io_error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn creates_parent_directories_on_first_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/logs/api.log");
        let mut sink = RotatingFileSink::new(&path, 0, 0);
        sink.write_line(r#"{"a":1}"#).expect("write");
        sink.flush().expect("flush");
        assert_eq!(read(&path), "{\"a\":1}\n");
        assert_eq!(sink.describe(), path.display().to_string());
    }

    #[test]
    fn rolls_over_before_reaching_max_bytes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("audit.log");
        let mut sink = RotatingFileSink::new(&path, 20, 2);
        for line in ["first-line", "second-line", "third-line", "fourth-line"] {
            sink.write_line(line).expect("write");
        }
        sink.flush().expect("flush");

        assert_eq!(read(&path), "fourth-line\n");
        assert_eq!(read(&sink.backup_path(1)), "third-line\n");
        assert_eq!(read(&sink.backup_path(2)), "second-line\n");
        assert!(!sink.backup_path(3).exists());
    }

    #[test]
    fn zero_backup_count_disables_rollover() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("login.log");
        let mut sink = RotatingFileSink::new(&path, 10, 0);
        sink.write_line("0123456789").expect("write");
        sink.write_line("abcdefghij").expect("write");
        sink.flush().expect("flush");
        assert_eq!(read(&path), "0123456789\nabcdefghij\n");
        assert!(!sink.backup_path(1).exists());
    }

    #[test]
    fn appends_to_existing_file_and_counts_its_size() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        fs::write(&path, "0123456789\n").expect("seed");
        let mut sink = RotatingFileSink::new(&path, 15, 1);
        sink.write_line("abcd").expect("write");
        sink.flush().expect("flush");
        assert_eq!(read(&path), "abcd\n");
        assert_eq!(read(&sink.backup_path(1)), "0123456789\n");
    }

    #[test]
    fn unwritable_path_reports_io_error() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").expect("seed");
        let mut sink = RotatingFileSink::new(blocker.join("api.log"), 0, 0);
        let err = sink.write_line("x").unwrap_err();
        assert!(matches!(err, AuditError::Io { .. }));
    }
}
