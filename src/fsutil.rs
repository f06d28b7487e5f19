use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{error, info};

/// Decompresses `<name>.gz` into a sibling `<name>` and returns the
/// decompressed path. On failure the original path is returned and the
/// caller proceeds with it.
fn gunzip_if_needed(path: &Path) -> PathBuf {
    if path.extension().map_or(true, |ext| ext != "gz") {
        return path.to_path_buf();
    }
    let dst = path.with_extension("");
    info!(
        "Auto-Decompressing {} -> {}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        dst.file_name().unwrap_or_default().to_string_lossy()
    );
    let result = File::open(path).and_then(|f_in| {
        let mut decoder = GzDecoder::new(f_in);
        let mut f_out = File::create(&dst)?;
        io::copy(&mut decoder, &mut f_out)?;
        Ok(())
    });
    match result {
        Ok(()) => dst,
        Err(e) => {
            error!("Failed to decompress {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

/// Gzip-transparent lookup: a `.gz` path is decompressed in place; a
/// plain path with only a `.gz` sibling present gets the same
/// treatment; otherwise the path is returned as-is when it exists.
pub fn resolve_path(path: &Path) -> Option<PathBuf> {
    if path.extension().map_or(false, |ext| ext == "gz") {
        if path.exists() {
            return Some(gunzip_if_needed(path));
        }
    } else {
        let mut with_gz = path.as_os_str().to_owned();
        with_gz.push(".gz");
        let gz_candidate = PathBuf::from(with_gz);
        if gz_candidate.exists() {
            return Some(gunzip_if_needed(&gz_candidate));
        }
    }

    if path.exists() {
        return Some(path.to_path_buf());
    }
    None
}

const BAR_LENGTH: usize = 40;

/// Carriage-return transfer bar: `Tx: |####----| 50.0% Complete`.
pub struct Progress {
    total: u64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        let progress = Self { total };
        progress.update(0);
        progress
    }

    pub fn update(&self, done: u64) {
        if self.total == 0 {
            return;
        }
        let percent = 100.0 * done as f64 / self.total as f64;
        let filled = (BAR_LENGTH as u64 * done / self.total) as usize;
        let bar: String = "#".repeat(filled) + &"-".repeat(BAR_LENGTH - filled);
        print!("\rTx: |{}| {:.1}% Complete", bar, percent);
        if done >= self.total {
            println!();
        }
        let _ = io::stdout().flush();
    }
}

#[test]
fn test_resolve_plain_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bin");
    std::fs::write(&path, b"payload").unwrap();
    assert_eq!(resolve_path(&path), Some(path));
    assert_eq!(resolve_path(&dir.path().join("missing.bin")), None);
}

#[test]
fn test_resolve_decompresses_gz() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let dir = tempfile::tempdir().unwrap();
    let gz_path = dir.path().join("rootfs.subimg.gz");
    let mut encoder = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
    encoder.write_all(b"rootfs contents").unwrap();
    encoder.finish().unwrap();

    // Explicit .gz path
    let resolved = resolve_path(&gz_path).unwrap();
    assert_eq!(resolved, dir.path().join("rootfs.subimg"));
    assert_eq!(std::fs::read(&resolved).unwrap(), b"rootfs contents");

    // Plain path with only the .gz sibling on disk
    std::fs::remove_file(&resolved).unwrap();
    let resolved = resolve_path(&dir.path().join("rootfs.subimg")).unwrap();
    assert_eq!(std::fs::read(resolved).unwrap(), b"rootfs contents");
}
