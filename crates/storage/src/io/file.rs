#![forbid(unsafe_code)]

use super::{SeekFrom, TraceIo, resolve_seek};
use crate::TraceError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

const READLINE_BLOCK: u64 = 4096;

/// A trace kept in a plain file, such as a locally stored archive.
#[derive(Debug)]
pub struct FileTraceIo {
    file: File,
    path: PathBuf,
    size: u64,
    tell: u64,
    writable: bool,
}

impl FileTraceIo {
    /// Opens an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path,
            size,
            tell: 0,
            writable: false,
        })
    }

    /// Creates (or empties) a writable file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            size: 0,
            tell: 0,
            writable: true,
        })
    }

    fn require_writable(&self, operation: &'static str) -> Result<(), TraceError> {
        if self.writable {
            Ok(())
        } else {
            Err(TraceError::NotSupported(operation))
        }
    }
}

impl TraceIo for FileTraceIo {
    fn size(&self) -> u64 {
        self.size
    }

    fn tell(&self) -> u64 {
        self.tell
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, TraceError> {
        let position = resolve_seek(pos, self.tell, self.size)?;
        self.file.seek(SeekFrom::Start(position))?;
        self.tell = position;
        Ok(position)
    }

    fn read(&mut self, length: Option<u64>) -> Result<Vec<u8>, TraceError> {
        let remaining = self.size - self.tell;
        let wanted = length.map_or(remaining, |length| length.min(remaining));
        let mut out = Vec::with_capacity(wanted as usize);
        (&mut self.file).take(wanted).read_to_end(&mut out)?;
        self.tell += out.len() as u64;
        Ok(out)
    }

    fn readline(&mut self) -> Result<Vec<u8>, TraceError> {
        let mut out = Vec::new();
        while !self.eof() {
            let block = self.read(Some(READLINE_BLOCK))?;
            if block.is_empty() {
                break;
            }
            if let Some(newline) = block.iter().position(|&byte| byte == b'\n') {
                out.extend_from_slice(&block[..=newline]);
                let unread = (block.len() - newline - 1) as u64;
                self.tell -= unread;
                self.file.seek(SeekFrom::Start(self.tell))?;
                break;
            }
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TraceError> {
        self.require_writable("write")?;
        self.file.write_all(data)?;
        self.tell += data.len() as u64;
        self.size = self.size.max(self.tell);
        Ok(data.len())
    }

    fn truncate(&mut self, offset: u64) -> Result<(), TraceError> {
        self.require_writable("truncate")?;
        if offset > self.size {
            return Err(TraceError::PositionOutOfRange {
                position: i128::from(offset),
                size: self.size,
            });
        }
        if offset == self.size {
            return Ok(());
        }
        self.file.set_len(offset)?;
        self.size = offset;
        if self.tell > offset {
            self.tell = offset;
            self.file.seek(SeekFrom::Start(offset))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        if self.writable {
            self.file.flush()?;
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
