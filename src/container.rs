//! Container Module
//!
//! The open compound file: owns the file handle and the in-memory image,
//! and coordinates the allocators, the directory and open streams.
//!
//! ## Responsibilities
//! - Open existing files (validating the header) and create new ones
//! - Resolve paths like `Book/Sheet1` to directory entries
//! - Create and remove storages and streams
//! - Hand out stream handles and route reads/writes to them
//! - Write the image back on flush/close

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::alloc::{AllocationTable, SmallBlockTable};
use crate::config::Config;
use crate::directory::{DirEntry, DirIter, Directory, EntryKind};
use crate::error::{OleError, Result};
use crate::format::{
    blocks_for, BlockPointer, FileImage, Header, BIG_BLOCK_SIZE, END_OF_CHAIN, ROOT_INDEX,
};
use crate::stream::{
    release_stale_chain, Backing, BlockStore, HandleTable, StreamHandle, StreamId, StreamIo,
    StreamMode,
};

/// Summary of one directory entry, as reported by [`Container::stat`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    pub index: u32,
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
    pub start: u32,
    /// Block size a stream lives in; `None` for storages
    pub backing: Option<Backing>,
    /// Number of children; 0 for streams
    pub children: usize,
}

/// Result of a full consistency walk, see [`Container::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Storages reachable from the root (root excluded)
    pub storages: usize,
    pub streams: usize,
    /// Bytes held by all streams
    pub stream_bytes: u64,
    /// Big-block slots marked in use
    pub big_blocks_in_use: u32,
    /// Small-block slots marked in use
    pub small_blocks_in_use: u32,
}

/// An open compound container
pub struct Container {
    /// Settings the container was opened with
    config: Config,

    /// Backing file path
    path: PathBuf,

    /// Backing file handle
    file: File,

    /// False when opened read-only
    writable: bool,

    /// Whole-file byte image
    image: FileImage,

    /// Big-block allocation table
    bat: AllocationTable,

    /// Small-block table and small-block file
    small: SmallBlockTable,

    /// Directory chain
    dir: Directory,

    /// Open stream handles
    streams: HandleTable,
}

impl Container {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open an existing container with the default config
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Config::default())
    }

    /// Open an existing container
    ///
    /// Opens read-write when possible and falls back to read-only when the
    /// file is not writable.
    pub fn open_with(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();

        // Step 1: Must be a regular file
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(OleError::InvalidArgument(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        // Step 2: Open, read-write if we can
        let (mut file, writable) = if config.read_only {
            (OpenOptions::new().read(true).open(path)?, false)
        } else {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => (file, true),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    tracing::warn!(path = %path.display(), "File is not writable, opening read-only");
                    (OpenOptions::new().read(true).open(path)?, false)
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Step 3: Load the whole file
        let mut bytes = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut bytes)?;
        if bytes.len() <= 0x4c {
            return Err(OleError::Format(format!(
                "file too short for a header ({} bytes)",
                bytes.len()
            )));
        }
        if bytes.len() % BIG_BLOCK_SIZE != 0 {
            tracing::warn!(
                len = bytes.len(),
                "File length is not a whole number of blocks, padding the tail"
            );
        }
        let image = FileImage::from_bytes(bytes);

        // Step 4: Validate the header and load the tables
        let header = image.header()?;
        let bat = AllocationTable::load(&image, &config)?;
        let dir = Directory::load(&image, &bat)?;
        let root = dir.entry(&image, ROOT_INDEX)?;
        let small = SmallBlockTable::load(&image, &bat, root.start)?;
        if root.size != small.payload_size() {
            tracing::warn!(
                declared = root.size,
                actual = small.payload_size(),
                "Root entry size disagrees with the small-block file"
            );
        }

        tracing::info!(
            path = %path.display(),
            blocks = image.block_count(),
            descriptors = header.bat_count,
            writable,
            "Container opened"
        );

        Ok(Self {
            config,
            path: path.to_path_buf(),
            file,
            writable,
            image,
            bat,
            small,
            dir,
            streams: HandleTable::default(),
        })
    }

    /// Create (or truncate) a container with the default config
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, Config::default())
    }

    /// Create (or truncate) a container holding only the root storage
    pub fn create_with(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let image = FileImage::bootstrap();
        let bat = AllocationTable::load(&image, &config)?;
        let dir = Directory::load(&image, &bat)?;
        let small = SmallBlockTable::load(&image, &bat, END_OF_CHAIN)?;

        let mut container = Self {
            config,
            path: path.to_path_buf(),
            file,
            writable: true,
            image,
            bat,
            small,
            dir,
            streams: HandleTable::default(),
        };
        container.flush()?;

        tracing::info!(path = %path.display(), "Container created");
        Ok(container)
    }

    /// Persist open writers' sizes and write the image back if it changed
    pub fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }

        for id in self.streams.ids() {
            let (mut store, streams) = self.split();
            let handle = streams.get(id)?;
            if handle.mode() == StreamMode::Write {
                handle.sync_entry(&mut store)?;
            }
        }

        if !self.image.is_dirty() {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(self.image.as_bytes())?;
        self.file.set_len(self.image.len() as u64)?;
        if self.config.sync_on_close {
            self.file.sync_all()?;
        }
        self.image.mark_clean();

        tracing::debug!(bytes = self.image.len(), "Container flushed");
        Ok(())
    }

    /// Flush and release the file
    pub fn close(mut self) -> Result<()> {
        let open = self.streams.len();
        if open > 0 {
            tracing::warn!(open, "Closing container with open streams");
        }
        self.flush()?;
        tracing::info!(path = %self.path.display(), "Container closed");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(OleError::ReadOnly)
        }
    }

    fn split(&mut self) -> (BlockStore<'_>, &mut HandleTable) {
        (
            BlockStore {
                image: &mut self.image,
                bat: &mut self.bat,
                small: &mut self.small,
                dir: &self.dir,
            },
            &mut self.streams,
        )
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Current header fields
    pub fn header(&self) -> Result<Header> {
        self.image.header()
    }

    /// Big blocks the file covers
    pub fn block_count(&self) -> u32 {
        self.image.block_count()
    }

    /// Length of the file image in bytes
    pub fn file_len(&self) -> usize {
        self.image.len()
    }

    /// Blocks of the directory chain
    pub fn directory_blocks(&self) -> &[u32] {
        self.dir.chain()
    }

    /// Blocks of the small-block table chain
    pub fn small_table_blocks(&self) -> &[u32] {
        self.small.descriptors()
    }

    /// Blocks of the small-block file chain
    pub fn small_file_blocks(&self) -> &[u32] {
        self.small.payload()
    }

    /// Number of open stream handles
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    // =========================================================================
    // Directory
    // =========================================================================

    pub fn root(&self) -> Result<DirEntry> {
        self.dir.entry(&self.image, ROOT_INDEX)
    }

    pub fn entry(&self, index: u32) -> Result<DirEntry> {
        self.dir.entry(&self.image, index)
    }

    /// Iterate the children of storage `dir`
    pub fn enter(&self, dir: u32) -> Result<DirIter<'_>> {
        self.dir.enter(&self.image, dir)
    }

    /// Children of storage `dir`, decoded
    pub fn entries(&self, dir: u32) -> Result<Vec<DirEntry>> {
        self.enter(dir)?
            .map(|index| index.and_then(|i| self.entry(i)))
            .collect()
    }

    pub fn lookup(&self, parent: u32, name: &str) -> Result<u32> {
        self.dir.lookup(&self.image, parent, name)
    }

    /// Resolve a `/`-separated path from the root. Empty components are
    /// ignored, so `""` and `"/"` name the root.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        let mut current = ROOT_INDEX;
        for name in components(path) {
            current = self.lookup(current, name).map_err(|e| match e {
                OleError::NotFound(_) => OleError::NotFound(path.to_string()),
                other => other,
            })?;
        }
        Ok(current)
    }

    /// Children of the storage at `path`
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.entries(self.resolve(path)?)
    }

    pub fn stat(&self, path: &str) -> Result<EntryStat> {
        let entry = self.entry(self.resolve(path)?)?;
        let (backing, children) = if entry.is_stream() {
            (Some(Backing::for_size(entry.size)), 0)
        } else {
            (None, self.enter(entry.index)?.count())
        };
        Ok(EntryStat {
            index: entry.index,
            name: entry.name,
            kind: entry.kind,
            size: entry.size,
            start: entry.start,
            backing,
            children,
        })
    }

    /// Storage or root holding `index`
    pub fn parent_of(&self, index: u32) -> Result<Option<u32>> {
        self.dir.parent_of(&self.image, index)
    }

    pub fn create_storage(&mut self, parent: u32, name: &str) -> Result<u32> {
        self.ensure_writable()?;
        self.dir
            .create_entry(&mut self.image, &mut self.bat, parent, name, EntryKind::Storage)
    }

    pub fn create_stream(&mut self, parent: u32, name: &str) -> Result<u32> {
        self.ensure_writable()?;
        self.dir
            .create_entry(&mut self.image, &mut self.bat, parent, name, EntryKind::Stream)
    }

    /// Resolve `path`, creating missing storages along the way
    pub fn ensure_storage(&mut self, path: &str) -> Result<u32> {
        let mut current = ROOT_INDEX;
        for name in components(path) {
            current = match self.lookup(current, name) {
                Ok(index) => {
                    if !self.entry(index)?.is_storage() {
                        return Err(OleError::InvalidArgument(format!(
                            "{:?} in {:?} is a stream",
                            name, path
                        )));
                    }
                    index
                }
                Err(OleError::NotFound(_)) => self.create_storage(current, name)?,
                Err(e) => return Err(e),
            };
        }
        Ok(current)
    }

    /// Remove an entry and release its blocks.
    ///
    /// Only a sole child can be removed; storages must be empty.
    pub fn remove(&mut self, index: u32) -> Result<()> {
        self.ensure_writable()?;
        let entry = self.entry(index)?;
        if self.streams.is_open(index) {
            return Err(OleError::StreamBusy(index));
        }

        let backing = Backing::for_size(entry.size);
        let owns_chain = entry.is_stream() && entry.size > 0;
        if owns_chain {
            match backing {
                Backing::Big => self.bat.chain(&self.image, entry.start)?,
                Backing::Small => self.small.chain(&self.image, entry.start)?,
            };
        }

        self.dir.unlink(&mut self.image, index)?;

        if owns_chain {
            let freed = match backing {
                Backing::Big => self.bat.free_chain(&mut self.image, entry.start)?,
                Backing::Small => {
                    self.small
                        .free_chain(&mut self.image, &mut self.bat, entry.start)?
                }
            };
            tracing::debug!(index, freed, %backing, "Released stream blocks");
        } else if entry.is_stream() && entry.start != END_OF_CHAIN {
            let (mut store, _) = self.split();
            release_stale_chain(&mut store, &entry)?;
        }
        Ok(())
    }

    pub fn remove_path(&mut self, path: &str) -> Result<()> {
        let index = self.resolve(path)?;
        self.remove(index)
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Open the stream at directory index `entry`
    pub fn open_stream(&mut self, entry: u32, mode: StreamMode) -> Result<StreamId> {
        let dir_entry = self.entry(entry)?;
        if !dir_entry.is_stream() {
            return Err(OleError::InvalidArgument(format!(
                "{:?} is a {}, not a stream",
                dir_entry.name, dir_entry.kind
            )));
        }
        match mode {
            StreamMode::Write => {
                self.ensure_writable()?;
                if self.streams.is_open(entry) {
                    return Err(OleError::StreamBusy(entry));
                }
            }
            StreamMode::Read => {
                if self.streams.writer_open(entry) {
                    return Err(OleError::StreamBusy(entry));
                }
            }
        }

        let (mut store, streams) = self.split();
        let handle = StreamHandle::open(&mut store, &dir_entry, mode)?;
        let id = streams.insert(handle);

        tracing::trace!(entry, name = %dir_entry.name, ?mode, "Stream opened");
        self.verify_handle(id)?;
        Ok(id)
    }

    /// Open the stream at `path`. In write mode missing storages and the
    /// stream itself are created when the config allows it.
    pub fn open_path(&mut self, path: &str, mode: StreamMode) -> Result<StreamId> {
        if mode == StreamMode::Read || !self.config.create_missing {
            let index = self.resolve(path)?;
            return self.open_stream(index, mode);
        }

        self.ensure_writable()?;
        let mut parts: Vec<&str> = components(path).collect();
        let name = parts
            .pop()
            .ok_or_else(|| OleError::InvalidArgument("the root is not a stream".to_string()))?;
        let parent = self.ensure_storage(&parts.join("/"))?;
        let index = match self.lookup(parent, name) {
            Ok(index) => index,
            Err(OleError::NotFound(_)) => self.create_stream(parent, name)?,
            Err(e) => return Err(e),
        };
        self.open_stream(index, mode)
    }

    /// Read exactly `buf.len()` bytes
    pub fn read(&mut self, id: StreamId, buf: &mut [u8]) -> Result<()> {
        self.streams
            .get_mut(id)?
            .read(&self.image, &self.small, buf)?;
        self.verify_handle(id)
    }

    /// Borrow `len` bytes from the image without copying. `None` when the
    /// bytes are not stored contiguously; fall back to [`Container::read`].
    pub fn read_in_place(&mut self, id: StreamId, len: usize) -> Result<Option<&[u8]>> {
        self.verify_handle(id)?;
        let Container {
            streams,
            image,
            small,
            ..
        } = self;
        streams.get_mut(id)?.read_in_place(image, small, len)
    }

    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<()> {
        let (mut store, streams) = self.split();
        streams.get_mut(id)?.write(&mut store, data)?;
        self.verify_handle(id)
    }

    /// Move the cursor; the target is clamped to the stream
    pub fn seek(&mut self, id: StreamId, pos: SeekFrom) -> Result<u64> {
        Ok(self.streams.get_mut(id)?.seek(pos))
    }

    pub fn tell(&self, id: StreamId) -> Result<u64> {
        Ok(self.streams.get(id)?.position() as u64)
    }

    pub fn handle(&self, id: StreamId) -> Result<&StreamHandle> {
        self.streams.get(id)
    }

    /// Close a stream; writers persist their final size
    pub fn close_stream(&mut self, id: StreamId) -> Result<()> {
        let handle = self.streams.remove(id)?;
        if handle.mode() == StreamMode::Write {
            let (mut store, _) = self.split();
            handle.sync_entry(&mut store)?;
        }
        tracing::trace!(entry = handle.entry(), size = handle.size(), "Stream closed");
        Ok(())
    }

    /// `std::io` view of an open stream
    pub fn io(&mut self, id: StreamId) -> Result<StreamIo<'_>> {
        self.streams.get(id)?;
        Ok(StreamIo::new(self, id))
    }

    fn verify_handle(&self, id: StreamId) -> Result<()> {
        if !self.config.verify_streams {
            return Ok(());
        }
        self.streams
            .get(id)?
            .verify(&self.image, &self.bat, &self.small)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    pub fn next_block(&self, block: u32) -> Result<BlockPointer> {
        self.bat.next(&self.image, block)
    }

    pub fn set_next_block(&mut self, block: u32, next: BlockPointer) -> Result<()> {
        self.ensure_writable()?;
        self.bat.set_next(&mut self.image, block, next)
    }

    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        self.bat.chain(&self.image, start)
    }

    pub fn allocate_block(&mut self) -> Result<u32> {
        self.ensure_writable()?;
        self.bat.allocate(&mut self.image)
    }

    pub fn free_chain(&mut self, start: u32) -> Result<usize> {
        self.ensure_writable()?;
        self.bat.free_chain(&mut self.image, start)
    }

    /// Blocks the allocation table can currently describe
    pub fn block_capacity(&self) -> u32 {
        self.bat.capacity()
    }

    pub fn next_small_block(&self, block: u32) -> Result<BlockPointer> {
        self.small.next(&self.image, block)
    }

    pub fn set_next_small_block(&mut self, block: u32, next: BlockPointer) -> Result<()> {
        self.ensure_writable()?;
        self.small.set_next(&mut self.image, block, next)
    }

    pub fn small_chain(&self, start: u32) -> Result<Vec<u32>> {
        self.small.chain(&self.image, start)
    }

    pub fn allocate_small_block(&mut self) -> Result<u32> {
        self.ensure_writable()?;
        let (block, payload_grew) = self.small.allocate(&mut self.image, &mut self.bat)?;
        if payload_grew {
            self.dir.set_root_payload(
                &mut self.image,
                self.small.payload_start(),
                self.small.payload_size(),
            )?;
        }
        Ok(block)
    }

    pub fn free_small_chain(&mut self, start: u32) -> Result<usize> {
        self.ensure_writable()?;
        self.small.free_chain(&mut self.image, &mut self.bat, start)
    }

    /// Small blocks usable without growing
    pub fn small_block_capacity(&self) -> u32 {
        self.small.capacity()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Walk the whole tree and check every stream's chain: well formed,
    /// exactly as long as its size needs and not shared. Every slot marked
    /// in use must belong to some chain.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut big_owned: HashSet<u32> = HashSet::new();
        let mut small_owned: HashSet<u32> = HashSet::new();

        for &block in self
            .dir
            .chain()
            .iter()
            .chain(self.bat.descriptors())
            .chain(self.small.descriptors())
            .chain(self.small.payload())
        {
            if !big_owned.insert(block) {
                return Err(OleError::corrupt(block, "block shared by two structural chains"));
            }
        }

        let mut pending = vec![ROOT_INDEX];
        let mut visited = HashSet::new();
        while let Some(storage) = pending.pop() {
            if !visited.insert(storage) {
                return Err(OleError::corrupt(storage, "storage reachable twice"));
            }
            for child in self.enter(storage)? {
                let entry = self.entry(child?)?;
                match entry.kind {
                    EntryKind::Storage => {
                        report.storages += 1;
                        pending.push(entry.index);
                    }
                    EntryKind::Stream => {
                        report.streams += 1;
                        report.stream_bytes += entry.size as u64;
                        if entry.size == 0 {
                            continue;
                        }
                        let backing = Backing::for_size(entry.size);
                        let (blocks, owned) = match backing {
                            Backing::Big => (self.chain(entry.start)?, &mut big_owned),
                            Backing::Small => (self.small_chain(entry.start)?, &mut small_owned),
                        };
                        let needed = blocks_for(entry.size, backing.block_size());
                        if blocks.len() != needed {
                            return Err(OleError::corrupt(
                                entry.start,
                                format!(
                                    "stream {:?} of {} bytes has {} blocks, expected {}",
                                    entry.name,
                                    entry.size,
                                    blocks.len(),
                                    needed
                                ),
                            ));
                        }
                        for block in blocks {
                            if !owned.insert(block) {
                                return Err(OleError::corrupt(
                                    block,
                                    format!("stream {:?} shares a block", entry.name),
                                ));
                            }
                        }
                    }
                    EntryKind::Root => {
                        return Err(OleError::Format(format!(
                            "root entry appears as child {}",
                            entry.index
                        )));
                    }
                }
            }
        }

        for block in 0..self.bat.capacity() {
            if !self.bat.next(&self.image, block)?.is_unused() && !big_owned.contains(&block) {
                return Err(OleError::corrupt(block, "block in use but owned by no chain"));
            }
        }
        for block in 0..self.small.slot_count() {
            if !self.small.next(&self.image, block)?.is_unused() && !small_owned.contains(&block) {
                return Err(OleError::corrupt(
                    block,
                    "small block in use but owned by no chain",
                ));
            }
        }

        report.big_blocks_in_use = self.bat.used_blocks(&self.image)?;
        report.small_blocks_in_use = self.small.used_blocks(&self.image)?;
        Ok(report)
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}
