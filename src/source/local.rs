//! The Local Source Adapter (spec §4.2): the same `read_at` contract over an
//! already-open local file, minus the network machinery.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::source::ReadAt;

pub struct LocalSource {
    file: File,
    content_length: u64,
}

impl LocalSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(CoreError::Io)?;
        let content_length = file.metadata().map_err(CoreError::Io)?.len();
        Ok(Self { file, content_length })
    }
}

impl ReadAt for LocalSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let available = self.content_length.saturating_sub(offset).min(buf.len() as u64) as usize;
        if available == 0 {
            return Ok(0);
        }
        self.file.read_at(&mut buf[..available], offset).map_err(CoreError::Io)
    }

    fn content_length(&self) -> u64 {
        self.content_length
    }
}
