use std::fs;
use std::path::Path;

use vdisk_provider::{
    discover_segments, MultiSegmentProvider, Provider, ProviderError,
};

fn write_segment(dir: &Path, name: &str, byte: u8, len: usize) {
    fs::write(dir.join(name), vec![byte; len]).unwrap();
}

#[test]
fn discovery_finds_and_orders_all_segments() {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=10 {
        write_segment(dir.path(), &format!("img.{i:03}"), i as u8, 100);
    }
    // Unrelated files must not participate.
    write_segment(dir.path(), "other.001", 0xEE, 100);
    write_segment(dir.path(), "img.txt", 0xEE, 100);

    let segments = discover_segments(&dir.path().join("img.001")).unwrap();
    assert_eq!(segments.len(), 10);
    let names: Vec<_> = segments
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert_eq!(names.first().unwrap(), "img.001");
    assert_eq!(names.last().unwrap(), "img.010");
}

#[test]
fn missing_segments_fail_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = discover_segments(&dir.path().join("img.001")).unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[test]
fn logical_extent_is_concatenation_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=4 {
        write_segment(dir.path(), &format!("img.{i:03}"), i as u8, 256);
    }

    let mut provider = MultiSegmentProvider::open(dir.path().join("img.001"), false).unwrap();
    assert_eq!(provider.length(), 4 * 256);

    // Reading across a boundary equals reading the segments independently.
    let mut joined = vec![0u8; 512];
    assert_eq!(provider.read_at(128, &mut joined).unwrap(), 512);
    let mut expected = vec![1u8; 128];
    expected.extend(vec![2u8; 256]);
    expected.extend(vec![3u8; 128]);
    assert_eq!(joined, expected);
}

#[test]
fn boundary_spanning_write_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=3 {
        write_segment(dir.path(), &format!("img.{i:03}"), 0, 256);
    }

    let mut provider = MultiSegmentProvider::open(dir.path().join("img.001"), true).unwrap();
    assert!(provider.is_writable());

    let data: Vec<u8> = (0u16..300).map(|v| (v % 256) as u8).collect();
    assert_eq!(provider.write_at(200, &data).unwrap(), data.len());
    provider.flush().unwrap();

    let mut back = vec![0u8; data.len()];
    assert_eq!(provider.read_at(200, &mut back).unwrap(), data.len());
    assert_eq!(back, data);

    // The bytes really live in the underlying segment files.
    let seg1 = fs::read(dir.path().join("img.001")).unwrap();
    assert_eq!(&seg1[200..], &data[..56]);
    let seg2 = fs::read(dir.path().join("img.002")).unwrap();
    assert_eq!(&seg2[..244], &data[56..]);
    assert!(seg2[244..].iter().all(|b| *b == 0));
}
