//! Tests for the container lifecycle
//!
//! These tests verify:
//! - Creating a fresh container and its bootstrap layout on disk
//! - Open-time validation (missing files, directories, bad headers)
//! - Read-only access and config validation
//! - Persistence across close/reopen and flush (unchanged state is not rewritten)
//! - Block release on removal and reuse afterwards, including chains
//!   left behind by empty streams
//! - Allocation-table growth and the descriptor ceiling
//! - The consistency report and unowned-block detection

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use msole::{Backing, BlockPointer, Config, Container, EntryKind, OleError, StreamMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.ole");
    (temp_dir, path)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn write_stream(container: &mut Container, path: &str, data: &[u8]) {
    let id = container.open_path(path, StreamMode::Write).unwrap();
    container.write(id, data).unwrap();
    container.close_stream(id).unwrap();
}

fn read_stream(container: &mut Container, path: &str) -> Vec<u8> {
    let id = container.open_path(path, StreamMode::Read).unwrap();
    let mut data = vec![0u8; container.handle(id).unwrap().size() as usize];
    container.read(id, &mut data).unwrap();
    container.close_stream(id).unwrap();
    data
}

/// Overwrite a little-endian u32 in the file on disk
fn patch_u32(path: &PathBuf, offset: usize, value: u32) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    fs::write(path, bytes).unwrap();
}

fn read_u32(path: &PathBuf, offset: usize) -> u32 {
    let bytes = fs::read(path).unwrap();
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// Write a 100-byte stream, then zero its size on disk so only the
/// start block points at the old chain
fn setup_empty_stream_with_chain(path: &PathBuf) {
    let mut container = Container::create(path).unwrap();
    write_stream(&mut container, "Data", &pattern(100));
    let index = container.stat("Data").unwrap().index as usize;
    let dir_block = container.directory_blocks()[0] as usize;
    container.close().unwrap();

    patch_u32(path, (dir_block + 1) * 512 + index * 128 + 0x78, 0);
}

// =============================================================================
// Create Tests
// =============================================================================

#[test]
fn test_create_writes_bootstrap_file() {
    let (_temp, path) = setup_temp_dir();

    let container = Container::create(&path).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 1536);
    assert_eq!(container.block_count(), 2);
    assert_eq!(container.directory_blocks(), &[1]);
    assert!(container.small_table_blocks().is_empty());
    assert!(container.is_writable());
}

#[test]
fn test_create_has_empty_root() {
    let (_temp, path) = setup_temp_dir();

    let container = Container::create(&path).unwrap();

    let root = container.root().unwrap();
    assert_eq!(root.name, "Root Entry");
    assert_eq!(root.kind, EntryKind::Root);
    assert_eq!(root.size, 0);
    assert!(container.list("/").unwrap().is_empty());
}

#[test]
fn test_create_truncates_existing_file() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Data", &pattern(9000));
    container.close().unwrap();

    let container = Container::create(&path).unwrap();

    assert!(container.list("/").unwrap().is_empty());
    assert_eq!(fs::metadata(&path).unwrap().len(), 1536);
}

#[test]
fn test_created_file_reopens() {
    let (_temp, path) = setup_temp_dir();
    Container::create(&path).unwrap().close().unwrap();

    let container = Container::open(&path).unwrap();

    let header = container.header().unwrap();
    assert_eq!(header.bat_count, 1);
    assert_eq!(header.root_start, 1);
}

// =============================================================================
// Open Validation Tests
// =============================================================================

#[test]
fn test_open_missing_file() {
    let (_temp, path) = setup_temp_dir();

    let result = Container::open(&path);

    assert!(matches!(result, Err(OleError::Io(_))));
}

#[test]
fn test_open_directory_rejected() {
    let (temp, _path) = setup_temp_dir();

    let result = Container::open(temp.path());

    assert!(matches!(result, Err(OleError::InvalidArgument(_))));
}

#[test]
fn test_open_short_file() {
    let (_temp, path) = setup_temp_dir();
    fs::write(&path, [0xd0, 0xcf, 0x11, 0xe0]).unwrap();

    assert!(matches!(Container::open(&path), Err(OleError::Format(_))));
}

#[test]
fn test_open_bad_magic() {
    let (_temp, path) = setup_temp_dir();
    Container::create(&path).unwrap().close().unwrap();
    let mut bytes = fs::read(&path).unwrap();
    bytes[1] = 0x00;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(Container::open(&path), Err(OleError::Format(_))));
}

#[test]
fn test_open_tolerates_ragged_tail() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Data", &pattern(100));
    container.close().unwrap();
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0u8; 100]).unwrap();
    drop(file);

    let mut container = Container::open(&path).unwrap();

    assert_eq!(container.file_len() % 512, 0);
    assert_eq!(read_stream(&mut container, "Data"), pattern(100));
}

#[test]
fn test_invalid_config_rejected() {
    let (_temp, path) = setup_temp_dir();

    let zero_growth = Config::builder().growth_blocks(0).build();
    let too_many = Config::builder().max_bat_blocks(110).build();

    assert!(matches!(
        Container::create_with(&path, zero_growth),
        Err(OleError::Config(_))
    ));
    assert!(matches!(
        Container::create_with(&path, too_many),
        Err(OleError::Config(_))
    ));
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_read_only_rejects_mutation() {
    let (_temp, path) = setup_temp_dir();
    Container::create(&path).unwrap().close().unwrap();
    let before = fs::read(&path).unwrap();

    let config = Config::builder().read_only(true).build();
    let mut container = Container::open_with(&path, config).unwrap();

    assert!(matches!(
        container.create_storage(0, "Book"),
        Err(OleError::ReadOnly)
    ));
    assert!(matches!(container.allocate_block(), Err(OleError::ReadOnly)));
    container.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_workbook_round_trip() {
    let (_temp, path) = setup_temp_dir();
    let data = pattern(5000);
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Book/Sheet1", &data);
    container.close().unwrap();

    let mut container = Container::open(&path).unwrap();

    let book = container.stat("Book").unwrap();
    assert_eq!(book.kind, EntryKind::Storage);
    assert_eq!(book.children, 1);
    let sheet = container.stat("Book/Sheet1").unwrap();
    assert_eq!(sheet.size, 5000);
    assert_eq!(sheet.backing, Some(Backing::Big));
    assert_eq!(read_stream(&mut container, "Book/Sheet1"), data);
}

#[test]
fn test_mixed_streams_round_trip() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Small", &pattern(200));
    write_stream(&mut container, "Big", &pattern(10_000));
    write_stream(&mut container, "Dir/Nested", &pattern(64));
    container.close().unwrap();

    let mut container = Container::open(&path).unwrap();

    assert_eq!(read_stream(&mut container, "Small"), pattern(200));
    assert_eq!(read_stream(&mut container, "Big"), pattern(10_000));
    assert_eq!(read_stream(&mut container, "Dir/Nested"), pattern(64));
    let names: Vec<String> = container
        .list("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["Small", "Big", "Dir"]);
}

#[test]
fn test_flush_persists_without_close() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    let id = container.open_path("Data", StreamMode::Write).unwrap();
    container.write(id, &pattern(300)).unwrap();

    container.flush().unwrap();

    let mut reader = Container::open(&path).unwrap();
    assert_eq!(reader.stat("Data").unwrap().size, 300);
    assert_eq!(read_stream(&mut reader, "Data"), pattern(300));
}

#[test]
fn test_flush_without_changes_leaves_file_alone() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    let id = container.open_path("Data", StreamMode::Write).unwrap();
    container.write(id, &pattern(100)).unwrap();
    container.flush().unwrap();

    // Last allocation-table list slot, never used by a file this size
    patch_u32(&path, 0x1fc, 0x1234_5678);
    container.flush().unwrap();
    assert_eq!(read_u32(&path, 0x1fc), 0x1234_5678);

    // A real change still rewrites the file
    container.write(id, &pattern(10)).unwrap();
    container.flush().unwrap();
    assert_eq!(read_u32(&path, 0x1fc), 0xffff_ffff);
}

#[test]
fn test_close_with_open_writer_persists_size() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    let id = container.open_path("Data", StreamMode::Write).unwrap();
    container.write(id, &pattern(700)).unwrap();

    container.close().unwrap();

    let mut container = Container::open(&path).unwrap();
    assert_eq!(read_stream(&mut container, "Data"), pattern(700));
}

// =============================================================================
// Removal Tests
// =============================================================================

#[test]
fn test_remove_small_stream_releases_table() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Data", &pattern(100));
    assert_eq!(container.small_table_blocks(), &[2]);

    container.remove_path("Data").unwrap();

    assert!(container.small_table_blocks().is_empty());
    assert!(matches!(container.stat("Data"), Err(OleError::NotFound(_))));

    // The freed table block is the lowest free block again
    assert_eq!(container.allocate_small_block().unwrap(), 0);
    assert_eq!(container.small_table_blocks(), &[2]);
}

#[test]
fn test_remove_big_stream_releases_blocks() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Data", &pattern(5000));
    let used = container.verify().unwrap().big_blocks_in_use;

    container.remove_path("Data").unwrap();

    assert_eq!(container.verify().unwrap().big_blocks_in_use, used - 10);
}

#[test]
fn test_removal_survives_reopen() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "Book/Sheet1", &pattern(300));
    container.remove_path("Book/Sheet1").unwrap();
    container.remove_path("Book").unwrap();
    container.close().unwrap();

    let container = Container::open(&path).unwrap();

    assert!(container.list("/").unwrap().is_empty());
    let report = container.verify().unwrap();
    assert_eq!(report.streams, 0);
    assert_eq!(report.storages, 0);
}

#[test]
fn test_remove_empty_stream_releases_stale_chain() {
    let (_temp, path) = setup_temp_dir();
    setup_empty_stream_with_chain(&path);
    let mut container = Container::open(&path).unwrap();

    container.remove_path("Data").unwrap();

    let report = container.verify().unwrap();
    assert_eq!(report.streams, 0);
    assert_eq!(report.small_blocks_in_use, 0);
    assert!(container.small_table_blocks().is_empty());
}

#[test]
fn test_rewriting_empty_stream_releases_stale_chain() {
    let (_temp, path) = setup_temp_dir();
    setup_empty_stream_with_chain(&path);
    let mut container = Container::open(&path).unwrap();

    let id = container.open_path("Data", StreamMode::Write).unwrap();
    container.close_stream(id).unwrap();

    assert_eq!(container.stat("Data").unwrap().start, 0xffff_fffe);
    assert_eq!(container.verify().unwrap().small_blocks_in_use, 0);

    // The released blocks are handed out again
    write_stream(&mut container, "Other", &pattern(100));
    assert_eq!(container.small_chain(container.stat("Other").unwrap().start).unwrap(), vec![0, 1]);
    container.verify().unwrap();
}

#[test]
fn test_reading_empty_stream_leaves_stale_chain() {
    let (_temp, path) = setup_temp_dir();
    setup_empty_stream_with_chain(&path);
    let mut container = Container::open(&path).unwrap();

    assert!(read_stream(&mut container, "Data").is_empty());
    assert_eq!(container.stat("Data").unwrap().start, 0);
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_large_stream_grows_allocation_table() {
    let (_temp, path) = setup_temp_dir();
    let data = pattern(100 * 1024);
    let mut container = Container::create(&path).unwrap();

    write_stream(&mut container, "Data", &data);

    assert_eq!(container.header().unwrap().bat_count, 2);
    assert_eq!(container.block_capacity(), 256);
    container.close().unwrap();

    let mut container = Container::open(&path).unwrap();
    assert_eq!(read_stream(&mut container, "Data"), data);
    container.verify().unwrap();
}

#[test]
fn test_descriptor_ceiling() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().max_bat_blocks(1).build();
    let mut container = Container::create_with(&path, config).unwrap();
    let id = container.open_path("Data", StreamMode::Write).unwrap();

    let result = container.write(id, &pattern(70_000));

    assert!(matches!(result, Err(OleError::CapacityExceeded(_))));
    assert_eq!(container.header().unwrap().bat_count, 1);
}

#[test]
fn test_growth_increment_applies() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().growth_blocks(16).build();
    let mut container = Container::create_with(&path, config).unwrap();

    container.allocate_block().unwrap();
    container.close().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 19 * 512);
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_report_counts() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "A", &pattern(100));
    write_stream(&mut container, "Book/B", &pattern(5000));
    container.create_storage(0, "Empty").unwrap();

    let report = container.verify().unwrap();

    assert_eq!(report.storages, 2);
    assert_eq!(report.streams, 2);
    assert_eq!(report.stream_bytes, 5100);
    assert_eq!(report.small_blocks_in_use, 2);
}

#[test]
fn test_verify_detects_shared_block() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "A", &pattern(5000));
    write_stream(&mut container, "B", &pattern(5000));
    let a = container.chain(container.stat("A").unwrap().start).unwrap();
    let b = container.chain(container.stat("B").unwrap().start).unwrap();

    // Splice B's tail onto A's ninth block
    container
        .set_next_block(a[8], BlockPointer::Next(b[9]))
        .unwrap();

    assert!(matches!(
        container.verify(),
        Err(OleError::CorruptChain { .. })
    ));
}

#[test]
fn test_verify_detects_unowned_block() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "A", &pattern(5000));
    container.verify().unwrap();

    container.allocate_block().unwrap();

    assert!(matches!(
        container.verify(),
        Err(OleError::CorruptChain { .. })
    ));
}

#[test]
fn test_verify_detects_unowned_small_block() {
    let (_temp, path) = setup_temp_dir();
    let mut container = Container::create(&path).unwrap();
    write_stream(&mut container, "A", &pattern(100));

    container.allocate_small_block().unwrap();

    assert!(matches!(
        container.verify(),
        Err(OleError::CorruptChain { .. })
    ));
}
