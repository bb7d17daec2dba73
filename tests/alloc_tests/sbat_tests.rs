//! Tests for small-block allocation
//!
//! These tests verify:
//! - Lazy creation of the small-block table and small-block file
//! - Growth of each chain as small blocks are handed out
//! - Small-block addressing through the small-block file
//! - Chain corruption detection at small-block granularity
//! - Shrinking the table after frees

use msole::alloc::{AllocationTable, SmallBlockTable};
use msole::format::address::big_block_offset;
use msole::format::{BlockPointer, FileImage, END_OF_CHAIN};
use msole::{Config, OleError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (FileImage, AllocationTable, SmallBlockTable) {
    let image = FileImage::bootstrap();
    let bat = AllocationTable::load(&image, &Config::default()).unwrap();
    let small = SmallBlockTable::load(&image, &bat, END_OF_CHAIN).unwrap();
    (image, bat, small)
}

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_empty_table() {
    let (_image, _bat, small) = setup();

    assert_eq!(small.capacity(), 0);
    assert!(small.descriptors().is_empty());
    assert!(small.payload().is_empty());
    assert_eq!(small.payload_start(), END_OF_CHAIN);
    assert_eq!(small.payload_size(), 0);
}

#[test]
fn test_first_allocation_creates_both_chains() {
    let (mut image, mut bat, mut small) = setup();

    let (block, payload_grew) = small.allocate(&mut image, &mut bat).unwrap();

    assert_eq!(block, 0);
    assert!(payload_grew);
    assert_eq!(small.descriptors(), &[2]);
    assert_eq!(small.payload(), &[3]);
    assert_eq!(small.capacity(), 8);
    assert_eq!(image.sbat_start(), 2);
    assert_eq!(image.sbat_count(), 1);
    assert_eq!(small.payload_start(), 3);
    assert_eq!(small.payload_size(), 512);
}

#[test]
fn test_payload_grows_every_eight_blocks() {
    let (mut image, mut bat, mut small) = setup();
    for expected in 0..8 {
        let (block, _) = small.allocate(&mut image, &mut bat).unwrap();
        assert_eq!(block, expected);
    }
    assert_eq!(small.payload().len(), 1);

    let (block, payload_grew) = small.allocate(&mut image, &mut bat).unwrap();

    assert_eq!(block, 8);
    assert!(payload_grew);
    assert_eq!(small.payload().len(), 2);
    assert_eq!(bat.chain(&image, small.payload_start()).unwrap(), small.payload());
}

#[test]
fn test_table_grows_past_128_slots() {
    let (mut image, mut bat, mut small) = setup();

    for _ in 0..129 {
        small.allocate(&mut image, &mut bat).unwrap();
    }

    assert_eq!(small.descriptors().len(), 2);
    assert_eq!(small.payload().len(), 17);
    assert_eq!(image.sbat_count(), 2);
    assert_eq!(bat.chain(&image, image.sbat_start()).unwrap(), small.descriptors());
}

// =============================================================================
// Addressing Tests
// =============================================================================

#[test]
fn test_block_offset_follows_payload_chain() {
    let (mut image, mut bat, mut small) = setup();
    for _ in 0..10 {
        small.allocate(&mut image, &mut bat).unwrap();
    }
    let payload = small.payload().to_vec();

    assert_eq!(small.block_offset(0).unwrap(), big_block_offset(payload[0]));
    assert_eq!(small.block_offset(3).unwrap(), big_block_offset(payload[0]) + 192);
    assert_eq!(small.block_offset(9).unwrap(), big_block_offset(payload[1]) + 64);
    assert!(small.block_offset(16).is_err());
}

// =============================================================================
// Chain Tests
// =============================================================================

#[test]
fn test_small_chain_follows_links() {
    let (mut image, mut bat, mut small) = setup();
    let (a, _) = small.allocate(&mut image, &mut bat).unwrap();
    let (b, _) = small.allocate(&mut image, &mut bat).unwrap();
    small.set_next(&mut image, a, BlockPointer::Next(b)).unwrap();

    assert_eq!(small.chain(&image, a).unwrap(), vec![a, b]);
}

#[test]
fn test_small_chain_through_unused_is_corrupt() {
    let (mut image, mut bat, mut small) = setup();
    let (a, _) = small.allocate(&mut image, &mut bat).unwrap();
    small.set_next(&mut image, a, BlockPointer::Next(1)).unwrap();

    let result = small.chain(&image, a);

    assert!(matches!(result, Err(OleError::CorruptChain { .. })));
}

#[test]
fn test_small_chain_past_payload_is_corrupt() {
    let (mut image, mut bat, mut small) = setup();
    let (a, _) = small.allocate(&mut image, &mut bat).unwrap();
    small.set_next(&mut image, a, BlockPointer::Next(50)).unwrap();

    assert!(matches!(
        small.chain(&image, a),
        Err(OleError::CorruptChain { block: 50, .. })
    ));
}

#[test]
fn test_load_rejects_used_slot_beyond_payload() {
    let (mut image, mut bat, mut small) = setup();
    small.allocate(&mut image, &mut bat).unwrap();
    small.set_next(&mut image, 20, BlockPointer::EndOfChain).unwrap();

    let result = SmallBlockTable::load(&image, &bat, small.payload_start());

    assert!(matches!(result, Err(OleError::Format(_))));
}

#[test]
fn test_load_round_trip() {
    let (mut image, mut bat, mut small) = setup();
    for _ in 0..12 {
        small.allocate(&mut image, &mut bat).unwrap();
    }

    let reloaded = SmallBlockTable::load(&image, &bat, small.payload_start()).unwrap();

    assert_eq!(reloaded.descriptors(), small.descriptors());
    assert_eq!(reloaded.payload(), small.payload());
    assert_eq!(reloaded.used_blocks(&image).unwrap(), 12);
}

// =============================================================================
// Free / Shrink Tests
// =============================================================================

#[test]
fn test_free_reuses_lowest_block() {
    let (mut image, mut bat, mut small) = setup();
    for _ in 0..4 {
        small.allocate(&mut image, &mut bat).unwrap();
    }

    small.free_chain(&mut image, &mut bat, 1).unwrap();

    let (block, payload_grew) = small.allocate(&mut image, &mut bat).unwrap();
    assert_eq!(block, 1);
    assert!(!payload_grew);
}

#[test]
fn test_free_last_block_releases_table() {
    let (mut image, mut bat, mut small) = setup();
    let (block, _) = small.allocate(&mut image, &mut bat).unwrap();
    let table_block = small.descriptors()[0];

    assert_eq!(small.free_chain(&mut image, &mut bat, block).unwrap(), 1);

    assert!(small.descriptors().is_empty());
    assert_eq!(image.sbat_start(), END_OF_CHAIN);
    assert_eq!(image.sbat_count(), 0);
    assert_eq!(bat.next(&image, table_block).unwrap(), BlockPointer::Unused);
    // The small-block file is kept
    assert_eq!(small.payload().len(), 1);
}

#[test]
fn test_shrink_keeps_table_in_use() {
    let (mut image, mut bat, mut small) = setup();
    small.allocate(&mut image, &mut bat).unwrap();
    let (second, _) = small.allocate(&mut image, &mut bat).unwrap();

    small.free_chain(&mut image, &mut bat, second).unwrap();

    assert_eq!(small.descriptors().len(), 1);
    assert_eq!(small.used_blocks(&image).unwrap(), 1);
}

#[test]
fn test_shrink_releases_only_trailing_table_blocks() {
    let (mut image, mut bat, mut small) = setup();
    for _ in 0..129 {
        small.allocate(&mut image, &mut bat).unwrap();
    }
    assert_eq!(small.descriptors().len(), 2);
    let first_table = small.descriptors()[0];

    small.free_chain(&mut image, &mut bat, 128).unwrap();

    assert_eq!(small.descriptors(), &[first_table]);
    assert_eq!(bat.next(&image, first_table).unwrap(), BlockPointer::EndOfChain);
    assert_eq!(image.sbat_count(), 1);
}

#[test]
fn test_table_regrows_after_shrink() {
    let (mut image, mut bat, mut small) = setup();
    let (block, _) = small.allocate(&mut image, &mut bat).unwrap();
    small.free_chain(&mut image, &mut bat, block).unwrap();

    let (block, payload_grew) = small.allocate(&mut image, &mut bat).unwrap();

    assert_eq!(block, 0);
    assert!(!payload_grew);
    assert_eq!(small.descriptors().len(), 1);
    assert_eq!(image.sbat_start(), small.descriptors()[0]);
}
