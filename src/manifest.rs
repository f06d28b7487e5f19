use std::collections::HashMap;
use std::fs;
use std::path::Path;

use csv::ReaderBuilder;

use crate::consts::{IMG_TYPE_BL, IMG_TYPE_GPT, IMG_TYPE_OPTEE, IMG_TYPE_SM};
use crate::errors::{Result, ToolError};

/// One line of the partition list: name plus MiB-granular placement.
/// A zero start means "directly after the previous partition".
#[derive(Debug, Clone)]
pub struct PartitionDesc {
    pub name: String,
    pub start_mb: u64,
    pub size_mb: u64,
}

/// Per-target ordered image lists parsed from `emmc_image_list`.
/// Targets are `b1`/`b2` for the eMMC boot areas and `sd<N>` for
/// user-area partitions (1-based).
#[derive(Debug, Default)]
pub struct ImageActionMap {
    targets: HashMap<String, Vec<String>>,
}

impl ImageActionMap {
    fn insert(&mut self, target: String, filename: String) {
        let files = self.targets.entry(target).or_default();
        if !files.iter().any(|f| f == &filename) {
            files.push(filename);
        }
    }

    pub fn files_for(&self, target: &str) -> Option<&[String]> {
        self.targets.get(target).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Accepts `0x…` hex or decimal.
fn parse_number(field: &str) -> Option<u64> {
    let lower = field.trim().to_lowercase();
    match lower.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => lower.parse().ok(),
    }
}

/// Parses `emmc_part_list`: comma-separated (name, start_mb, size_mb)
/// with a whitespace fallback, `#` comments, and tolerated encoding
/// errors. Entries with size 0 are dropped.
pub fn parse_part_list(path: &Path) -> Result<Vec<PartitionDesc>> {
    let raw = fs::read(path).map_err(|_| {
        ToolError::ManifestError(format!("partition list not found: {}", path.display()))
    })?;
    let text = String::from_utf8_lossy(&raw);

    let mut parts = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields: Vec<&str> = line
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 3 {
            fields = line.split_whitespace().collect();
            if fields.len() < 3 {
                continue;
            }
        }
        let start_mb = parse_number(fields[1]).ok_or_else(|| {
            ToolError::ManifestError(format!("bad start field in line: {}", line))
        })?;
        let size_mb = parse_number(fields[2])
            .ok_or_else(|| ToolError::ManifestError(format!("bad size field in line: {}", line)))?;
        if size_mb == 0 {
            continue;
        }
        parts.push(PartitionDesc {
            name: fields[0].to_string(),
            start_mb,
            size_mb,
        });
    }
    Ok(parts)
}

/// Parses `emmc_image_list`: CSV lines of (filename, target, ...) with
/// `#` comments. Targets are lowercased; duplicate filenames per target
/// are suppressed; signed rootfs images are mapped to their gzipped
/// deliverable name. A missing file yields an empty map.
pub fn parse_image_list(path: &Path) -> Result<ImageActionMap> {
    let mut map = ImageActionMap::default();
    if !path.exists() {
        return Ok(map);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ToolError::ManifestError(e.to_string()))?;

    for record in reader.records() {
        let record = record.map_err(|e| ToolError::ManifestError(e.to_string()))?;
        if record.len() < 2 || record[0].is_empty() {
            continue;
        }
        let mut filename = record[0].to_string();
        let target = record[1].to_lowercase();
        if filename.contains("rootfs_s.subimg") {
            filename = "rootfs.subimg.gz".to_string();
        }
        map.insert(target, filename);
    }
    Ok(map)
}

/// Derives the image type tag the firmware expects from a partition
/// name. Every plain data partition gets the generic eMMC tag.
pub fn image_type_for(part_name: &str) -> u32 {
    let name = part_name.to_lowercase();
    if name.contains("sysmgr") {
        return IMG_TYPE_SM;
    }
    if name.contains("bl") && !name.contains("m52") {
        return IMG_TYPE_BL;
    }
    if name.contains("tzk") {
        return IMG_TYPE_OPTEE;
    }
    IMG_TYPE_GPT
}

#[test]
fn test_parse_part_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emmc_part_list");
    fs::write(
        &path,
        "# name, start_mb, size_mb\n\
         boot, 1, 64\n\
         rootfs, 0, 0x200\n\
         \n\
         swap 0 128\n\
         home, 0, 0\n\
         junk,1\n",
    )
    .unwrap();

    let parts = parse_part_list(&path).unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].name, "boot");
    assert_eq!(parts[0].start_mb, 1);
    assert_eq!(parts[0].size_mb, 64);
    // hex size and whitespace fallback both accepted
    assert_eq!(parts[1].size_mb, 512);
    assert_eq!(parts[2].name, "swap");
    assert_eq!(parts[2].size_mb, 128);
}

#[test]
fn test_parse_part_list_missing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        parse_part_list(&dir.path().join("nope")),
        Err(ToolError::ManifestError(_))
    ));
}

#[test]
fn test_parse_image_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emmc_image_list");
    fs::write(
        &path,
        "# file, target\n\
         emmc.subimg, B1\n\
         emmc.subimg, b2\n\
         sysmgr.subimg, sd1\n\
         rootfs_s.subimg, sd3\n\
         rootfs_s.subimg, sd3\n\
         erase, sd4\n",
    )
    .unwrap();

    let map = parse_image_list(&path).unwrap();
    assert_eq!(map.files_for("b1").unwrap(), ["emmc.subimg"]);
    assert_eq!(map.files_for("b2").unwrap(), ["emmc.subimg"]);
    assert_eq!(map.files_for("sd1").unwrap(), ["sysmgr.subimg"]);
    // rewritten and deduplicated
    assert_eq!(map.files_for("sd3").unwrap(), ["rootfs.subimg.gz"]);
    assert_eq!(map.files_for("sd4").unwrap(), ["erase"]);
    assert!(map.files_for("sd9").is_none());
}

#[test]
fn test_parse_image_list_missing_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let map = parse_image_list(&dir.path().join("nope")).unwrap();
    assert!(map.is_empty());
}

#[test]
fn test_image_type_classification() {
    assert_eq!(image_type_for("sysmgr"), IMG_TYPE_SM);
    assert_eq!(image_type_for("BL_A"), IMG_TYPE_BL);
    assert_eq!(image_type_for("m52bl"), IMG_TYPE_GPT);
    assert_eq!(image_type_for("tzk"), IMG_TYPE_OPTEE);
    assert_eq!(image_type_for("rootfs"), IMG_TYPE_GPT);
    assert_eq!(image_type_for("whatever"), IMG_TYPE_GPT);
}
