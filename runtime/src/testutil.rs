//! Archive fixtures shared by unit tests.

use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;

/// Deterministic incompressible bytes.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn append_files<W: std::io::Write>(builder: &mut tar::Builder<W>, files: &[(&str, &[u8])]) {
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
}

/// Uncompressed tar holding `files`.
pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append_files(&mut builder, files);
    builder.into_inner().unwrap()
}

/// Gzipped tar holding `files` plus a noise member, so the archive is
/// always long enough for compression detection.
pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let noise = noise(1024);
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), flate2::Compression::default()));
    append_files(&mut builder, files);
    append_files(&mut builder, &[(".noise", &noise)]);
    builder.into_inner().unwrap().finish().unwrap()
}

/// Gzip stream of `data`, which need not be a tar.
pub fn gz_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn write_tar(path: &Path, files: &[(&str, &[u8])]) {
    std::fs::write(path, tar_bytes(files)).unwrap();
}

pub fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
    std::fs::write(path, tar_gz_bytes(files)).unwrap();
}
