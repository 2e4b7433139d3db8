use std::fs;
use std::path::Path;

use assert_cmd::Command;
use sha2::{Digest, Sha256};

fn cmd() -> Command {
    Command::cargo_bin("vdisk-convert").unwrap()
}

fn striped_image(blocks: usize, block: usize) -> Vec<u8> {
    let mut image = vec![0u8; blocks * block];
    for b in (0..blocks).step_by(2) {
        for (i, byte) in image[b * block..(b + 1) * block].iter_mut().enumerate() {
            *byte = ((b * 31 + i) % 250) as u8 + 1;
        }
    }
    image
}

fn write_image(path: &Path, data: &[u8]) {
    fs::write(path, data).unwrap();
}

#[test]
fn raw_image_roundtrips_through_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.img");
    let output = dir.path().join("out.img");
    let image = striped_image(8, 4096);
    write_image(&input, &image);

    cmd()
        .arg(&input)
        .arg(&output)
        .arg("--quiet")
        .assert()
        .success();

    assert_eq!(fs::read(&output).unwrap(), image);
}

#[test]
fn hash_is_printed_and_matches() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.img");
    let output = dir.path().join("out.img");
    let image = striped_image(4, 4096);
    write_image(&input, &image);

    let expected: String = Sha256::digest(&image)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    cmd()
        .arg(&input)
        .arg(&output)
        .arg("--quiet")
        .arg("--hash")
        .arg("sha256")
        .assert()
        .success()
        .stdout(format!("sha256  {expected}\n"));
}

#[test]
fn existing_output_requires_force() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.img");
    let output = dir.path().join("out.img");
    write_image(&input, &striped_image(2, 4096));
    write_image(&output, b"already here");

    cmd()
        .arg(&input)
        .arg(&output)
        .arg("--quiet")
        .assert()
        .failure();

    cmd()
        .arg(&input)
        .arg(&output)
        .arg("--quiet")
        .arg("--force")
        .assert()
        .success();
    assert_eq!(fs::read(&output).unwrap().len(), 2 * 4096);
}

#[test]
fn multi_part_input_is_concatenated() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("disk.001");
    let second = dir.path().join("disk.002");
    let output = dir.path().join("joined.img");

    let a = vec![0x11u8; 2048];
    let b = vec![0x22u8; 1024];
    write_image(&first, &a);
    write_image(&second, &b);

    cmd()
        .arg(&first)
        .arg(&output)
        .arg("--source-kind")
        .arg("multi-part")
        .arg("--quiet")
        .assert()
        .success();

    let mut expected = a;
    expected.extend_from_slice(&b);
    assert_eq!(fs::read(&output).unwrap(), expected);
}

#[test]
fn unknown_hash_algorithm_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.img");
    write_image(&input, &[0u8; 512]);

    cmd()
        .arg(&input)
        .arg(dir.path().join("out.img"))
        .arg("--hash")
        .arg("crc32")
        .assert()
        .failure();
}

#[test]
fn zero_chunk_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.img");
    write_image(&input, &[0u8; 512]);

    cmd()
        .arg(&input)
        .arg(dir.path().join("out.img"))
        .arg("--chunk-size-bytes")
        .arg("0")
        .assert()
        .failure();
}
