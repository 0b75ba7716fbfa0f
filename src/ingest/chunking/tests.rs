use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn chunk_text_overlapping_windows() {
    let chunks = chunk_text("abcdefghij", 5, 2).expect("should chunk");
    assert_eq!(chunks, vec!["abcde", "defgh", "ghij"]);
}

#[test]
fn chunk_text_stops_at_final_window() {
    let chunks = chunk_text("abcdefghi", 5, 2).expect("should chunk");
    assert_eq!(chunks, vec!["abcde", "defgh", "ghi"]);
}

#[test]
fn chunk_text_shorter_than_size() {
    let chunks = chunk_text("abc", 5, 2).expect("should chunk");
    assert_eq!(chunks, vec!["abc"]);
}

#[test]
fn chunk_text_empty_input() {
    let chunks = chunk_text("", 5, 2).expect("should chunk");
    assert!(chunks.is_empty());
}

#[test]
fn chunk_text_counts_code_points() {
    let text = "😀😃😄😁😆😅";
    let chunks = chunk_text(text, 5, 2).expect("should chunk");

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], "😀😃😄😁😆");
    assert_eq!(chunks[1], "😁😆😅");
    assert_eq!(chunks[0].chars().count(), 5);
    assert_eq!(chunks[1].chars().count(), 3);
}

#[test]
fn chunk_text_zero_overlap() {
    let chunks = chunk_text("abcdef", 3, 0).expect("should chunk");
    assert_eq!(chunks, vec!["abc", "def"]);
}

#[test]
fn chunk_text_windows_cover_input() {
    let text = "the quick brown fox jumps over the lazy dog";
    let (size, overlap) = (7, 3);
    let chunks = chunk_text(text, size, overlap).expect("should chunk");

    let step = size - overlap;
    let mut rebuilt = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        assert!(chunk.chars().count() <= size);
        if i == 0 {
            rebuilt.push_str(chunk);
        } else {
            rebuilt.extend(chunk.chars().skip(size - step));
        }
    }
    assert_eq!(rebuilt, text);
}

#[test]
fn chunk_text_rejects_zero_size() {
    assert!(matches!(
        chunk_text("abc", 0, 0),
        Err(ChunkError::InvalidChunkSize(0))
    ));
}

#[test]
fn chunk_text_rejects_overlap_not_below_size() {
    assert!(matches!(
        chunk_text("abc", 3, 3),
        Err(ChunkError::InvalidChunkOverlap {
            overlap: 3,
            size: 3
        })
    ));
    assert!(matches!(
        chunk_text("abc", 3, 7),
        Err(ChunkError::InvalidChunkOverlap { .. })
    ));
}

#[test]
fn chunk_file_strips_bom() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let path = temp_dir.path().join("bom.txt");
    let mut bytes = UTF8_BOM.to_vec();
    bytes.extend_from_slice(b"hello");
    fs::write(&path, bytes).expect("should write file");

    let source = chunk_file(&path, 10, 0).expect("should chunk file");
    assert_eq!(source.chunks, vec!["hello"]);
    assert_eq!(source.source, path.display().to_string());
}

#[test]
fn chunk_file_rejects_invalid_utf8() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let path = temp_dir.path().join("binary.bin");
    fs::write(&path, [0xFF, 0xFE, 0x00, 0x80]).expect("should write file");

    assert!(matches!(
        chunk_file(&path, 10, 0),
        Err(ChunkError::InvalidUtf8 { .. })
    ));
}

#[test]
fn chunk_files_skips_bad_inputs() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let good = temp_dir.path().join("good.txt");
    let empty = temp_dir.path().join("empty.txt");
    let binary = temp_dir.path().join("binary.bin");
    fs::write(&good, "some text").expect("should write file");
    fs::write(&empty, "").expect("should write file");
    fs::write(&binary, [0xC3, 0x28]).expect("should write file");

    let sources = chunk_files(&[good.clone(), empty, binary], 4, 1).expect("should chunk files");

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source, good.display().to_string());
    assert_eq!(sources[0].chunks, vec!["some", "e te", "ext"]);
}

#[test]
fn chunk_files_propagates_invalid_parameters() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let good = temp_dir.path().join("good.txt");
    fs::write(&good, "some text").expect("should write file");

    assert!(matches!(
        chunk_files(&[good], 4, 4),
        Err(ChunkError::InvalidChunkOverlap { .. })
    ));
}

#[test]
fn chunk_reader_uses_source_name() {
    let source = chunk_reader("piped-data", "abcdefghij".as_bytes(), 5, 2).expect("should chunk");
    assert_eq!(source.source, "piped-data");
    assert_eq!(source.chunks, vec!["abcde", "defgh", "ghij"]);
}
