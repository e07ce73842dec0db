use std::io::Write;

use kuber_crypto::{
    BlockwiseAesCtr, ChunkedPipeline, CipherKey, CryptoWriter, CtrEngine, StreamOptions,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_writer_encrypt(bencher: divan::Bencher, size: usize) {
    let key = CipherKey::from_bytes(vec![0xABu8; 32]);
    let iv = [0x01u8; 16];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut w = CryptoWriter::new(
                Vec::with_capacity(size),
                &key,
                &iv,
                StreamOptions::encrypt(),
            )
            .unwrap();
            w.write_all(divan::black_box(&data)).unwrap();
            w.into_inner().unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_writer_blockwise(bencher: divan::Bencher, size: usize) {
    let key = CipherKey::from_bytes(vec![0xABu8; 32]);
    let iv = [0x01u8; 16];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let engine =
                CtrEngine::new(BlockwiseAesCtr::new(), &key, &iv, StreamOptions::encrypt())
                    .unwrap();
            let mut w = CryptoWriter::with_engine(Vec::with_capacity(size), engine);
            w.write_all(divan::black_box(&data)).unwrap();
            w.into_inner().unwrap()
        });
}

#[divan::bench(args = [4096, 102400])]
fn bench_pipeline_chunk_size(bencher: divan::Bencher, chunk_size: usize) {
    let key = CipherKey::from_bytes(vec![0xABu8; 32]);
    let iv = [0x01u8; 16];
    let data = make_data(1048576);
    let pipeline = ChunkedPipeline::new(chunk_size).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(data.len()))
        .bench(|| {
            let w = CryptoWriter::new(
                Vec::with_capacity(data.len()),
                &key,
                &iv,
                StreamOptions::encrypt(),
            )
            .unwrap();
            pipeline.run(divan::black_box(&data[..]), w).unwrap()
        });
}

fn main() {
    divan::main();
}
