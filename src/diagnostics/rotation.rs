//! Size-bounded log file with numbered backups.
//!
//! Layout for an active file `thermo_daq.log` and a retention of 5:
//!
//! ```text
//! thermo_daq.log      active
//! thermo_daq.log.1    newest backup
//! ...
//! thermo_daq.log.5    oldest backup
//! ```
//!
//! Before each write the file is rotated if it is non-empty and the write would
//! take it past `max_bytes`. A single record larger than the threshold is
//! still written whole; the following write then rotates.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file that rotates when it grows past a size threshold.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    /// Open (or create) the active file, creating its directory if needed.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let mut rotating = Self {
            path: path.into(),
            max_bytes,
            backup_count,
            file: None,
            size: 0,
        };
        rotating.ensure_open()?;
        Ok(rotating)
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the active file as tracked by this writer.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path of backup number `n` (1 = newest).
    pub fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Append one line, rotating first if it would overflow the threshold.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let incoming = line.len() as u64 + 1;
        if self.should_rotate(incoming) {
            self.rotate()?;
        }

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let file = self.ensure_open()?;
        file.write_all(&buf)?;
        file.flush()?;
        self.size += incoming;
        Ok(())
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        self.size > 0 && self.size + incoming > self.max_bytes
    }

    /// Close the active file, shift backups up by one and start a fresh file.
    pub fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        if self.backup_count == 0 {
            remove_if_exists(&self.path)?;
        } else {
            remove_if_exists(&self.backup_path(self.backup_count))?;
            for n in (1..self.backup_count).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            if self.path.exists() {
                fs::rename(&self.path, self.backup_path(1))?;
            }
        }

        self.size = 0;
        self.ensure_open()?;
        Ok(())
    }

    fn ensure_open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(dir) = self.path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    /// Flush buffered data to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
