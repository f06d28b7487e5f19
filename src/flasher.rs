use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::thread;

use log::info;
use prettytable::{row, Table};

use crate::consts::{
    ADDR_AC_LOAD, BLOCK_SIZE, CHUNK_SIZE_MB, DEFAULT_TIMEOUT, EMMC_ERASE, EMMC_INIT,
    EMMC_OP_TIMEOUT, EMMC_READBACK, EMMC_SELECT_AREA, EMMC_WRITE, IMG_TYPE_GPT, IMG_TYPE_SM,
    LARGE_FILE_THRESHOLD_MB, MB_SIZE, SETTLE_BOOT_ERASE, SETTLE_BOOT_INIT, SETTLE_BOOT_SELECT,
    SETTLE_BOOT_WRITE, SETTLE_NONE, SETTLE_SHORT,
};
use crate::device::Device;
use crate::errors::{Result, ToolError};
use crate::fsutil;
use crate::gpt::{self, PartitionExtent};
use crate::manifest::{self, ImageActionMap, PartitionDesc};

// User-area slot reserved for SM image updates
const SM_IMAGE_LBA: u64 = 98304;

fn blocks_for(len: u64) -> u64 {
    (len + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
}

/// Per-chunk (lba, blocks) schedule for the large-file path. Each chunk
/// is zero-padded to a block boundary, so only the last entry can carry
/// a partial chunk's worth of blocks.
fn chunk_plan(len: u64, start_lba: u64) -> Vec<(u64, u64)> {
    let chunk_bytes = (CHUNK_SIZE_MB * MB_SIZE) as u64;
    let mut plan = Vec::new();
    let mut offset = 0u64;
    let mut lba = start_lba;
    while offset < len {
        let take = chunk_bytes.min(len - offset);
        let blocks = blocks_for(take);
        plan.push((lba, blocks));
        offset += take;
        lba += blocks;
    }
    plan
}

fn print_partition_plan(extents: &[PartitionExtent]) {
    let mut table = Table::new();
    table.add_row(row!["Partition", "LBA Start", "LBA End", "Size (MB)"]);
    for extent in extents {
        table.add_row(row![
            extent.name,
            extent.start_lba,
            extent.end_lba,
            extent.size_lbas() * BLOCK_SIZE as u64 / MB_SIZE as u64
        ]);
    }
    table.printstd();
}

/// Uploads a file > 100 MiB in bounded chunks, flashing each into its
/// LBA window before the next is read. Returns the total block count
/// written; the caller advances its partition offset by exactly that.
fn flash_chunked(dev: &mut Device, path: &Path, start_lba: u64, img_type: u32) -> Result<u64> {
    let file_size = fs::metadata(path)?.len();
    info!(
        "CHUNKED MODE: {} ({:.2} MB) in {}MB chunks",
        path.file_name().unwrap_or_default().to_string_lossy(),
        file_size as f64 / MB_SIZE as f64,
        CHUNK_SIZE_MB
    );

    let plan = chunk_plan(file_size, start_lba);
    let chunk_bytes = (CHUNK_SIZE_MB * MB_SIZE) as u64;
    let mut buffer = vec![0u8; CHUNK_SIZE_MB * MB_SIZE];
    let mut file = File::open(path)?;
    let mut remaining = file_size;

    for (chunk_num, (lba, blocks)) in plan.iter().enumerate() {
        let raw = remaining.min(chunk_bytes) as usize;
        file.read_exact(&mut buffer[..raw])?;
        let padded = (*blocks as usize) * BLOCK_SIZE;
        buffer[raw..padded].fill(0);

        info!("  Chunk {}: {} blocks @ LBA {:#X}", chunk_num + 1, blocks, lba);
        dev.upload_chunk(&buffer[..padded], ADDR_AC_LOAD, img_type)?;
        dev.emmc_op(EMMC_ERASE, *lba as u32, *blocks as u32, EMMC_OP_TIMEOUT, SETTLE_SHORT)?;
        dev.emmc_op(EMMC_WRITE, *lba as u32, *blocks as u32, EMMC_OP_TIMEOUT, SETTLE_SHORT)?;
        dev.emmc_op(
            EMMC_READBACK,
            *lba as u32,
            *blocks as u32,
            EMMC_OP_TIMEOUT,
            SETTLE_SHORT,
        )?;
        remaining -= raw as u64;
    }

    Ok(plan.iter().map(|(_, blocks)| blocks).sum())
}

fn flash_boot_areas(dev: &mut Device, img_dir: &Path, actions: &ImageActionMap) -> Result<()> {
    for boot_id in [1u32, 2u32] {
        let key = format!("b{}", boot_id);
        let files = match actions.files_for(&key) {
            Some(files) => files,
            None => continue,
        };
        for fname in files {
            let path = fsutil::resolve_path(&img_dir.join(fname)).ok_or_else(|| {
                ToolError::MissingImage {
                    file: fname.clone(),
                    target: key.clone(),
                }
            })?;
            let fblks = blocks_for(fs::metadata(&path)?.len()) as u32;
            info!("[{}] Flashing {} to Boot{}...", key, fname, boot_id);
            dev.upload_file(&path, ADDR_AC_LOAD, IMG_TYPE_GPT)?;
            dev.emmc_op(EMMC_INIT, 0, 0, DEFAULT_TIMEOUT, SETTLE_BOOT_INIT)?;
            dev.emmc_op(EMMC_SELECT_AREA, boot_id, 0, DEFAULT_TIMEOUT, SETTLE_BOOT_SELECT)?;
            dev.emmc_op(EMMC_ERASE, 0, fblks, EMMC_OP_TIMEOUT, SETTLE_BOOT_ERASE)?;
            dev.emmc_op(EMMC_WRITE, 0, fblks, EMMC_OP_TIMEOUT, SETTLE_BOOT_WRITE)?;
            dev.emmc_op(EMMC_READBACK, 0, fblks, EMMC_OP_TIMEOUT, SETTLE_NONE)?;
            info!("[{}] Done.", key);
        }
    }
    Ok(())
}

fn flash_partition_file(
    dev: &mut Device,
    path: &Path,
    extent: &PartitionExtent,
    target: &str,
    fname: &str,
    current_offset: u64,
) -> Result<u64> {
    let fsize = fs::metadata(path)?.len();
    let fblks = blocks_for(fsize);
    let fsize_mb = fsize as f64 / MB_SIZE as f64;
    let img_type = manifest::image_type_for(&extent.name);
    let target_lba = extent.start_lba + current_offset;

    if target_lba + fblks - 1 > extent.end_lba {
        return Err(ToolError::PartitionOverflow {
            file: fname.to_string(),
            partition: extent.name.clone(),
        });
    }

    info!(
        "[{}] Flashing {} -> {} (Type: {:#X}, Size: {:.2} MB)",
        target, fname, extent.name, img_type, fsize_mb
    );
    thread::sleep(SETTLE_SHORT);

    dev.emmc_op(EMMC_INIT, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_SELECT_AREA, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;

    if fsize_mb > LARGE_FILE_THRESHOLD_MB as f64 {
        info!(
            "  Using CHUNKED mode (file > {}MB) with {}MB Chunks",
            LARGE_FILE_THRESHOLD_MB, CHUNK_SIZE_MB
        );
        let written = flash_chunked(dev, path, target_lba, img_type)?;
        info!("[{}] Chunked flash complete.", target);
        Ok(written)
    } else {
        dev.upload_file(path, ADDR_AC_LOAD, img_type)?;
        dev.emmc_op(
            EMMC_ERASE,
            target_lba as u32,
            fblks as u32,
            EMMC_OP_TIMEOUT,
            SETTLE_SHORT,
        )?;
        dev.emmc_op(
            EMMC_WRITE,
            target_lba as u32,
            fblks as u32,
            EMMC_OP_TIMEOUT,
            SETTLE_SHORT,
        )?;
        dev.emmc_op(
            EMMC_READBACK,
            target_lba as u32,
            fblks as u32,
            EMMC_OP_TIMEOUT,
            SETTLE_SHORT,
        )?;
        info!("[{}] Flashed.", target);
        Ok(fblks)
    }
}

fn flash_user_partitions(
    dev: &mut Device,
    img_dir: &Path,
    extents: &[PartitionExtent],
    actions: &ImageActionMap,
) -> Result<()> {
    for (idx, extent) in extents.iter().enumerate() {
        let target = format!("sd{}", idx + 1);
        let files = match actions.files_for(&target) {
            Some(files) => files,
            None => continue,
        };

        // Flash offset within the partition, in LBAs
        let mut current_offset = 0u64;

        for fname in files {
            if fname.eq_ignore_ascii_case("format") {
                continue;
            }
            if fname.eq_ignore_ascii_case("erase") {
                info!("[{}] Erasing {}...", target, extent.name);
                dev.emmc_op(EMMC_INIT, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
                dev.emmc_op(EMMC_SELECT_AREA, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
                dev.emmc_op(
                    EMMC_ERASE,
                    extent.start_lba as u32,
                    extent.size_lbas() as u32,
                    EMMC_OP_TIMEOUT,
                    SETTLE_SHORT,
                )?;
                continue;
            }

            let path = match fsutil::resolve_path(&img_dir.join(fname)) {
                Some(path) => path,
                None if extent.name.contains("home") => continue,
                None => {
                    return Err(ToolError::MissingImage {
                        file: fname.clone(),
                        target: target.clone(),
                    })
                }
            };

            current_offset +=
                flash_partition_file(dev, &path, extent, &target, fname, current_offset)?;
        }
    }
    Ok(())
}

/// Full eMMC provisioning from a staging directory holding
/// `emmc_part_list`, `emmc_image_list`, and the image files.
pub fn provision_from_dir(dev: &mut Device, img_dir: &Path) -> Result<()> {
    let parts = manifest::parse_part_list(&img_dir.join("emmc_part_list"))?;
    let actions = manifest::parse_image_list(&img_dir.join("emmc_image_list"))?;
    if actions.is_empty() {
        return Err(ToolError::ManifestError(
            "emmc_image_list missing or empty".to_string(),
        ));
    }

    let extents = gpt::layout_partitions(&parts);
    print_partition_plan(&extents);

    info!("--- PHASE A: FLASHING GPT ---");
    flash_gpt(dev, img_dir, &parts)?;
    info!("GPT Flashed.");

    flash_boot_areas(dev, img_dir, &actions)?;
    flash_user_partitions(dev, img_dir, &extents, &actions)?;

    info!("=== ALL OPERATIONS COMPLETE ===");
    Ok(())
}

fn flash_gpt(dev: &mut Device, img_dir: &Path, parts: &[PartitionDesc]) -> Result<()> {
    let (gpt_bin, _table_lbas) = gpt::build_gpt_primary(parts);
    let gpt_path = img_dir.join("gpt.bin");
    fs::write(&gpt_path, &gpt_bin)?;

    let gpt_blocks = blocks_for(gpt_bin.len() as u64) as u32;
    dev.upload_file(&gpt_path, ADDR_AC_LOAD, IMG_TYPE_GPT)?;
    dev.emmc_op(EMMC_INIT, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_SELECT_AREA, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_ERASE, 0, gpt_blocks, EMMC_OP_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_WRITE, 0, gpt_blocks, EMMC_OP_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_READBACK, 0, gpt_blocks, EMMC_OP_TIMEOUT, SETTLE_SHORT)?;
    Ok(())
}

/// The `emmc-sm` op: one SM image into its reserved user-area slot.
pub fn flash_sm_image(dev: &mut Device, sm_path: &Path) -> Result<()> {
    let fblks = blocks_for(fs::metadata(sm_path)?.len()) as u32;

    dev.emmc_op(EMMC_INIT, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
    dev.emmc_op(EMMC_SELECT_AREA, 0, 0, DEFAULT_TIMEOUT, SETTLE_SHORT)?;
    dev.upload_file(sm_path, ADDR_AC_LOAD, IMG_TYPE_SM)?;
    dev.emmc_op(
        EMMC_ERASE,
        SM_IMAGE_LBA as u32,
        fblks,
        EMMC_OP_TIMEOUT,
        SETTLE_SHORT,
    )?;
    dev.emmc_op(
        EMMC_WRITE,
        SM_IMAGE_LBA as u32,
        fblks,
        EMMC_OP_TIMEOUT,
        SETTLE_SHORT,
    )?;
    dev.emmc_op(
        EMMC_READBACK,
        SM_IMAGE_LBA as u32,
        fblks,
        EMMC_OP_TIMEOUT,
        SETTLE_SHORT,
    )?;
    info!("=== SM FLASH OPERATION COMPLETED ===");
    Ok(())
}

#[test]
fn test_blocks_for() {
    assert_eq!(blocks_for(0), 0);
    assert_eq!(blocks_for(1), 1);
    assert_eq!(blocks_for(512), 1);
    assert_eq!(blocks_for(513), 2);
    assert_eq!(blocks_for(10 * MB_SIZE as u64), 20480);
}

#[test]
fn test_chunk_plan_aligned() {
    // 160 MiB at LBA 10000: five full 32 MiB chunks of 65536 blocks
    let plan = chunk_plan(160 * MB_SIZE as u64, 10000);
    assert_eq!(plan.len(), 5);
    assert_eq!(
        plan,
        [
            (10000, 65536),
            (75536, 65536),
            (141072, 65536),
            (206608, 65536),
            (272144, 65536),
        ]
    );
    let total: u64 = plan.iter().map(|(_, blocks)| blocks).sum();
    assert_eq!(total, blocks_for(160 * MB_SIZE as u64));
}

#[test]
fn test_chunk_plan_ragged_tail() {
    let len = 2 * (CHUNK_SIZE_MB * MB_SIZE) as u64 + 700;
    let plan = chunk_plan(len, 0);
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[2], (2 * 65536, 2)); // 700 bytes pad to 2 blocks
    let total: u64 = plan.iter().map(|(_, blocks)| blocks).sum();
    assert_eq!(total, blocks_for(len));
}
