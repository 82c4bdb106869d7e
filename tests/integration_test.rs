use bhl::bhl_format::{BhlReader, BhlWriter, Metadata};
use bhl::hash_index::{FileInfo, HashIndexStore, MemoryHashIndex};
use bhl::reassembler::Reassembler;
use bhl::scanner::Scanner;
use bhl::source_image::SourceImage;
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;

fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

fn encode(data: &[u8], block_size: u32, filename: &str) -> bhl::bhl_format::BhlFile {
    let mut meta = Metadata::new();
    meta.set_filename(filename);
    let mut out = Vec::new();
    BhlWriter::write(Cursor::new(data), block_size, data.len() as u64, &meta, &mut out).unwrap();
    BhlReader::read(Cursor::new(out)).unwrap()
}

fn register(index: &mut MemoryHashIndex, file_id: u32, bhl: &bhl::bhl_format::BhlFile) {
    let entries: Vec<(u64, [u8; 32])> =
        bhl.scannable_digests().iter().enumerate().map(|(i, d)| (i as u64, *d)).collect();
    index.add_entries(file_id, &entries).unwrap();
    index
        .set_file_info(
            file_id,
            FileInfo {
                block_size: bhl.block_size,
                file_size: bhl.file_size,
                filename: bhl.metadata.filename().map(|s| s.to_string()),
                mtime: bhl.metadata.mtime(),
                tail_blob: bhl.tail_blob.clone(),
                global_digest: bhl.global_digest,
            },
        )
        .unwrap();
}

/// S2: a file whose digests are all identical (a repeated run) recovers
/// completely from a single window in the image.
#[test]
fn duplicate_blocks_all_fill_from_one_window() {
    let data = vec![b'x'; 4096];
    let block_size = 512u32;
    let bhl = encode(&data, block_size, "run.bin");
    assert_eq!(bhl.scannable_digests().len(), 8);
    let distinct: std::collections::HashSet<_> = bhl.scannable_digests().iter().collect();
    assert_eq!(distinct.len(), 1, "all blocks should hash identically");

    let mut image_bytes = vec![0u8; 1 << 16];
    image_bytes[12345..12345 + 512].copy_from_slice(&vec![b'x'; 512]);
    let img = write_image(&image_bytes);
    let (source, _) = SourceImage::open(0, img.path()).unwrap();

    let mut index = MemoryHashIndex::new();
    register(&mut index, 0, &bhl);

    let mut scanner = Scanner::new(vec![block_size]);
    let total = bhl.scannable_digests().len();
    scanner.scan(&[source], &mut index, total).unwrap();

    let dest = tempfile::tempdir().unwrap();
    let info = index.file_info(0).unwrap().unwrap();
    let report = Reassembler::reassemble(
        0,
        &info,
        &index,
        &[SourceImage::open(0, img.path()).unwrap().0],
        dest.path(),
        "run",
    )
    .unwrap();

    assert_eq!(report.placed_blocks, report.total_blocks);
    assert_eq!(std::fs::read(&report.output_path).unwrap(), data);
}

/// S3: two files scanned from one combined image; one is block-aligned and
/// recovers, the other is misaligned by a few bytes and comes back empty.
#[test]
fn misaligned_file_among_two_sources_reports_incomplete() {
    let block_size = 512u32;
    let f1 = vec![1u8; 1024];
    let f2 = vec![2u8; 1000];
    let bhl1 = encode(&f1, block_size, "f1.bin");
    let bhl2 = encode(&f2, block_size, "f2.bin");

    // image = F2 || garbage(7) || F1
    let mut image_bytes = f2.clone();
    image_bytes.extend_from_slice(&[0xAAu8; 7]);
    image_bytes.extend_from_slice(&f1);
    let img = write_image(&image_bytes);
    let (source, _) = SourceImage::open(0, img.path()).unwrap();

    let mut index = MemoryHashIndex::new();
    register(&mut index, 0, &bhl1);
    register(&mut index, 1, &bhl2);

    let total = bhl1.scannable_digests().len() + bhl2.scannable_digests().len();
    let mut scanner = Scanner::new(vec![block_size]); // step = gcd(512,512) = 512
    scanner.scan(&[source], &mut index, total).unwrap();

    let dest = tempfile::tempdir().unwrap();

    let info1 = index.file_info(0).unwrap().unwrap();
    let report1 = Reassembler::reassemble(
        0,
        &info1,
        &index,
        &[SourceImage::open(0, img.path()).unwrap().0],
        dest.path(),
        "f1",
    )
    .unwrap();
    assert_eq!(report1.placed_blocks, report1.total_blocks);
    assert_eq!(std::fs::read(&report1.output_path).unwrap(), f1);

    let info2 = index.file_info(1).unwrap().unwrap();
    let err2 = Reassembler::reassemble(
        1,
        &info2,
        &index,
        &[SourceImage::open(0, img.path()).unwrap().0],
        dest.path(),
        "f2",
    )
    .unwrap_err();
    assert!(matches!(err2, bhl::BhlError::IncompleteRecovery { .. }));
}

/// S5: an empty file encodes with zero digests and round-trips to an empty
/// output with a hash match, with no scanning required.
#[test]
fn empty_file_round_trips_without_scanning() {
    let bhl = encode(&[], 512, "empty.bin");
    assert_eq!(bhl.digests.len(), 0);
    assert!(!bhl.has_tail());

    let mut index = MemoryHashIndex::new();
    register(&mut index, 0, &bhl);

    let dest = tempfile::tempdir().unwrap();
    let info = index.file_info(0).unwrap().unwrap();
    let report = Reassembler::reassemble(0, &info, &index, &[], dest.path(), "empty").unwrap();

    assert_eq!(report.placed_blocks, report.total_blocks);
    assert_eq!(std::fs::read(&report.output_path).unwrap(), Vec::<u8>::new());
}

/// S6: scanning with the wrong offset/step combination never finds a block
/// that an aligned scan finds trivially.
#[test]
fn offset_and_step_must_match_placement() {
    let block_size = 64u32;
    let data = vec![9u8; block_size as usize];
    let bhl = encode(&data, block_size, "aligned.bin");

    let placed_at = 131072u64;
    let mut image_bytes = vec![0u8; placed_at as usize + block_size as usize + 4096];
    image_bytes[placed_at as usize..placed_at as usize + block_size as usize]
        .copy_from_slice(&data);
    let img = write_image(&image_bytes);

    // Correct offset + step: found immediately.
    {
        let (source, _) = SourceImage::open(0, img.path()).unwrap();
        let mut index = MemoryHashIndex::new();
        register(&mut index, 0, &bhl);
        let mut scanner = Scanner::new(vec![block_size]).with_offset(placed_at);
        let placed = scanner.scan(&[source], &mut index, 1).unwrap();
        assert_eq!(placed, 1);
    }

    // Wrong offset + misaligned step: never found.
    {
        let (source, _) = SourceImage::open(0, img.path()).unwrap();
        let mut index = MemoryHashIndex::new();
        register(&mut index, 0, &bhl);
        let mut scanner = Scanner::new(vec![block_size]).with_offset(0).with_step(block_size + 1);
        let placed = scanner.scan(&[source], &mut index, 1).unwrap();
        assert_eq!(placed, 0);
    }
}

/// Splitting one file's blocks across two separate source images still
/// recovers the whole file: the scanner must claim from both sources, not
/// just the first one handed to it.
#[test]
fn file_split_across_two_source_images_still_recovers() {
    let block_size = 16u32;
    let data: Vec<u8> = (0..8u8).flat_map(|b| vec![b; block_size as usize]).collect(); // 8 distinct blocks
    let bhl = encode(&data, block_size, "split.bin");
    assert_eq!(bhl.scannable_digests().len(), 8);

    let half = data.len() / 2;
    let img_a = write_image(&data[..half]); // blocks 0..4
    let img_b = write_image(&data[half..]); // blocks 4..8

    let (source_a, _) = SourceImage::open(0, img_a.path()).unwrap();
    let (source_b, _) = SourceImage::open(1, img_b.path()).unwrap();

    let mut index = MemoryHashIndex::new();
    register(&mut index, 0, &bhl);

    let total = bhl.scannable_digests().len();
    let mut scanner = Scanner::new(vec![block_size]);
    let placed = scanner.scan(&[source_a, source_b], &mut index, total).unwrap();
    assert_eq!(placed, total);

    let dest = tempfile::tempdir().unwrap();
    let info = index.file_info(0).unwrap().unwrap();
    let sources = [
        SourceImage::open(0, img_a.path()).unwrap().0,
        SourceImage::open(1, img_b.path()).unwrap().0,
    ];
    let report = Reassembler::reassemble(0, &info, &index, &sources, dest.path(), "split").unwrap();

    assert_eq!(report.placed_blocks, report.total_blocks);
    assert_eq!(std::fs::read(&report.output_path).unwrap(), data);
}
