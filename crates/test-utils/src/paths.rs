//! Scratch directories for cache persistence tests.

/// A temporary directory removed on drop.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("grid-decode-test")
        .tempdir()
        .expect("Failed to create temporary test directory")
}
