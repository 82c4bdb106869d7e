use bhl::bhl_format::{BhlReader, BhlWriter, Metadata};
use bhl::hash_index::{FileInfo, HashIndexStore, MemoryHashIndex};
use bhl::scanner::Scanner;
use bhl::source_image::SourceImage;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;

fn scan_one_mib_image(c: &mut Criterion) {
    let block_size = 4096u32;
    let data = vec![0x5Au8; block_size as usize];

    let mut meta = Metadata::new();
    meta.set_filename("bench.bin");
    let mut bhl_bytes = Vec::new();
    BhlWriter::write(Cursor::new(&data), block_size, data.len() as u64, &meta, &mut bhl_bytes).unwrap();
    let bhl = BhlReader::read(Cursor::new(bhl_bytes)).unwrap();

    let mut image_bytes = vec![0u8; 1024 * 1024];
    let placed_at = image_bytes.len() - block_size as usize;
    image_bytes[placed_at..].copy_from_slice(&data);
    let mut img = NamedTempFile::new().unwrap();
    img.write_all(&image_bytes).unwrap();
    img.flush().unwrap();

    c.bench_function("scan_1mib_single_block_size", |b| {
        b.iter(|| {
            let (source, _) = SourceImage::open(0, img.path()).unwrap();
            let mut index = MemoryHashIndex::new();
            let entries: Vec<(u64, [u8; 32])> =
                bhl.scannable_digests().iter().enumerate().map(|(i, d)| (i as u64, *d)).collect();
            index.add_entries(0, &entries).unwrap();
            index
                .set_file_info(
                    0,
                    FileInfo {
                        block_size: bhl.block_size,
                        file_size: bhl.file_size,
                        filename: None,
                        mtime: None,
                        tail_blob: bhl.tail_blob.clone(),
                        global_digest: bhl.global_digest,
                    },
                )
                .unwrap();
            let mut scanner = Scanner::new(vec![block_size]);
            let placed = scanner.scan(black_box(&[source]), &mut index, 1).unwrap();
            black_box(placed);
        })
    });
}

criterion_group!(benches, scan_one_mib_image);
criterion_main!(benches);
