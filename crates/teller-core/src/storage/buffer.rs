//! # File Buffers
//!
//! Append-only files holding telemetry between seals. The chain buffer may
//! start with a chain-head header line; [`FileBuffer::size`] counts payload
//! bytes only.
//!
//! Buffers are not internally synchronized. All access goes through
//! [`Buffers`] behind one async mutex so that append, seal and the billing
//! merge never interleave.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::domain::{header_line, parse_header, BufferError, ContentId};

/// Chain buffer file name inside the home directory.
pub const CHAIN_BUFFER_FILE: &str = "data.txt";

/// Default energy buffer file name inside the home directory.
pub const ENERGY_BUFFER_FILE: &str = "energy.txt";

/// One growable buffer file.
#[derive(Debug)]
pub struct FileBuffer {
    path: PathBuf,
    header_len: u64,
    head: Option<ContentId>,
}

impl FileBuffer {
    /// Open a plain buffer, creating the file if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let path = path.into();
        touch(&path)?;
        Ok(Self {
            path,
            header_len: 0,
            head: None,
        })
    }

    /// Open a chain buffer, recovering the chain head from its header line.
    pub fn open_chain(path: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let mut buffer = Self::open(path)?;
        let contents = buffer.read_all()?;
        if let Some((head, len)) = parse_header(&contents) {
            buffer.header_len = len as u64;
            buffer.head = Some(head);
        }
        Ok(buffer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chain head named in the header line, if any.
    pub fn head(&self) -> Option<&ContentId> {
        self.head.as_ref()
    }

    /// Append bytes at the end of the file, recreating it if it vanished.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.write_all(bytes).map_err(|e| self.io(e))?;
        file.flush().map_err(|e| self.io(e))
    }

    /// Payload length in bytes, header excluded.
    pub fn size(&self) -> Result<u64, BufferError> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(self.io(e)),
        };
        Ok(len.saturating_sub(self.header_len))
    }

    /// Full file contents, header included.
    pub fn read_all(&self) -> Result<Vec<u8>, BufferError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io(e)),
        }
    }

    /// Read the full contents, then truncate and recreate the file empty.
    pub fn drain(&mut self) -> Result<Vec<u8>, BufferError> {
        let contents = self.read_all()?;
        self.replace(b"")?;
        self.header_len = 0;
        self.head = None;
        Ok(contents)
    }

    /// Recreate the file holding only the header line for `head`.
    pub fn reset_with_header(&mut self, head: &ContentId) -> Result<(), BufferError> {
        let line = header_line(head);
        self.replace(line.as_bytes())?;
        self.header_len = line.len() as u64;
        self.head = Some(head.clone());
        Ok(())
    }

    /// Recreate the file with exactly `bytes` as contents.
    pub fn replace(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        // Write-then-rename so a crash never leaves a half written buffer.
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|e| self.io(e))?;
        file.write_all(bytes).map_err(|e| self.io(e))?;
        file.sync_all().map_err(|e| self.io(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io(e))?;
        self.header_len = 0;
        self.head = None;
        Ok(())
    }

    fn io(&self, source: io::Error) -> BufferError {
        BufferError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn touch(path: &Path) -> Result<(), BufferError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| BufferError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// The chain buffer and the energy buffer, guarded together.
#[derive(Debug)]
pub struct Buffers {
    pub chain: FileBuffer,
    pub energy: FileBuffer,
    accepting: bool,
}

impl Buffers {
    /// Open both buffers inside `home`.
    pub fn open(home: &Path, energy_path: Option<&Path>) -> Result<Self, BufferError> {
        let energy = match energy_path {
            Some(path) => path.to_path_buf(),
            None => home.join(ENERGY_BUFFER_FILE),
        };
        Ok(Self {
            chain: FileBuffer::open_chain(home.join(CHAIN_BUFFER_FILE))?,
            energy: FileBuffer::open(energy)?,
            accepting: true,
        })
    }

    /// Append streamed telemetry to the chain buffer.
    pub fn append_telemetry(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if !self.accepting {
            return Err(BufferError::Closed);
        }
        self.chain.append(bytes)
    }

    /// Refuse further telemetry. Seals and reads stay available.
    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let buffer = FileBuffer::open(dir.path().join("data.txt")).unwrap();
        assert!(buffer.path().exists());
        assert_eq!(buffer.size().unwrap(), 0);
    }

    #[test]
    fn test_size_is_sum_of_appends() {
        let dir = TempDir::new().unwrap();
        let mut buffer = FileBuffer::open(dir.path().join("data.txt")).unwrap();
        buffer.append(b"hello").unwrap();
        buffer.append(b" world").unwrap();
        buffer.append(b"").unwrap();
        assert_eq!(buffer.size().unwrap(), 11);
        assert_eq!(buffer.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn test_drain_returns_contents_and_empties() {
        let dir = TempDir::new().unwrap();
        let mut buffer = FileBuffer::open(dir.path().join("data.txt")).unwrap();
        buffer.append(b"abc").unwrap();
        assert_eq!(buffer.drain().unwrap(), b"abc");
        assert_eq!(buffer.size().unwrap(), 0);
        assert!(buffer.path().exists());
    }

    #[test]
    fn test_header_not_counted_in_size() {
        let dir = TempDir::new().unwrap();
        let mut buffer = FileBuffer::open_chain(dir.path().join("data.txt")).unwrap();
        buffer.reset_with_header(&ContentId::new("QmHead")).unwrap();
        assert_eq!(buffer.size().unwrap(), 0);

        buffer.append(b"12345").unwrap();
        assert_eq!(buffer.size().unwrap(), 5);
        assert_eq!(
            buffer.read_all().unwrap(),
            b"IPFSHASHCHAIN: QmHead\n12345".to_vec()
        );
    }

    #[test]
    fn test_reopen_recovers_head() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        {
            let mut buffer = FileBuffer::open_chain(&path).unwrap();
            buffer.reset_with_header(&ContentId::new("QmPrev")).unwrap();
            buffer.append(b"xy").unwrap();
        }
        let buffer = FileBuffer::open_chain(&path).unwrap();
        assert_eq!(buffer.head(), Some(&ContentId::new("QmPrev")));
        assert_eq!(buffer.size().unwrap(), 2);
    }

    #[test]
    fn test_append_recreates_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut buffer = FileBuffer::open(dir.path().join("data.txt")).unwrap();
        std::fs::remove_file(buffer.path()).unwrap();
        assert_eq!(buffer.size().unwrap(), 0);
        buffer.append(b"z").unwrap();
        assert_eq!(buffer.size().unwrap(), 1);
    }

    #[test]
    fn test_closed_buffers_reject_telemetry() {
        let dir = TempDir::new().unwrap();
        let mut buffers = Buffers::open(dir.path(), None).unwrap();
        buffers.append_telemetry(b"ok").unwrap();
        buffers.stop_accepting();
        assert!(matches!(
            buffers.append_telemetry(b"late"),
            Err(BufferError::Closed)
        ));
        assert_eq!(buffers.chain.size().unwrap(), 2);
    }
}
