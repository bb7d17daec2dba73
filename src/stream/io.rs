//! `std::io` adapter over an open stream

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::container::Container;

use super::StreamId;

/// Borrows the container and drives one open stream through the standard
/// `Read`/`Write`/`Seek` traits.
///
/// Unlike [`Container::read`], `Read::read` returns a short count at the
/// end of the stream instead of failing.
pub struct StreamIo<'a> {
    container: &'a mut Container,
    id: StreamId,
}

impl<'a> StreamIo<'a> {
    pub(crate) fn new(container: &'a mut Container, id: StreamId) -> Self {
        Self { container, id }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Read for StreamIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.container.handle(self.id)?.remaining() as usize;
        let len = buf.len().min(remaining);
        self.container.read(self.id, &mut buf[..len])?;
        Ok(len)
    }
}

impl Write for StreamIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.container.write(self.id, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for StreamIo<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.container.seek(self.id, pos)?)
    }
}
