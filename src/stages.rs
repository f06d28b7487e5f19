use std::fs;
use std::path::Path;
use std::time::Instant;

use log::info;

use crate::consts::{
    ADDR_AC_LOAD, ADDR_SM_LOAD, IMG_TYPE_BL, IMG_TYPE_SM, IMG_TYPE_TZK, MB_SIZE, SPK_OP_KEYS,
    SPK_OP_M52BL, SPK_OP_SPK, USB_PAIRS_ROM, USB_PAIRS_SM,
};
use crate::device::Device;
use crate::errors::{Result, ToolError};
use crate::flasher;
use crate::fsutil;
use crate::serial;

fn resolve_port(port: Option<&str>, pairs: &[(u16, u16)]) -> Result<String> {
    match port {
        Some(port) => Ok(port.to_string()),
        None => serial::auto_detect_cdc_port(pairs),
    }
}

fn resolve_image(path: &Path, target: &str) -> Result<std::path::PathBuf> {
    fsutil::resolve_path(path).ok_or_else(|| ToolError::MissingImage {
        file: path.display().to_string(),
        target: target.to_string(),
    })
}

/// One boot-package file over the ROM-level framing. The ROM expects a
/// fresh port open per transfer.
fn upload_boot_package(port: &str, baud: u32, op: u8, path: &Path) -> Result<()> {
    let payload = fs::read(path)?;
    let size = payload.len();
    let mut dev = Device::open(port, baud, true)?;
    let started = Instant::now();
    dev.send_spk(op, &payload)?;
    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "{} UPLOADED ({:.2}s @ {:.2} MB/s)",
        path.file_name().unwrap_or_default().to_string_lossy(),
        elapsed,
        size as f64 / MB_SIZE as f64 / elapsed
    );
    Ok(())
}

/// Hands the signed boot package to the ROM: keys, SPK, then the M52
/// bootloader.
pub fn run_spk(port: Option<&str>, baud: u32, keys: &Path, spk: &Path, m52bl: &Path) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_ROM)?;
    for (op, path) in [
        (SPK_OP_KEYS, keys),
        (SPK_OP_SPK, spk),
        (SPK_OP_M52BL, m52bl),
    ] {
        let resolved = resolve_image(path, "run-spk")?;
        upload_boot_package(&cdc_port, baud, op, &resolved)?;
    }
    Ok(())
}

/// Raw-mode VERSION against the M52 bootloader.
pub fn version_bl(port: Option<&str>, baud: u32) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_ROM)?;
    let mut dev = Device::open(&cdc_port, baud, true)?;
    let (major, minor) = dev.version()?;
    println!("BL Version: {}.{}", major, minor);
    Ok(())
}

/// Host-API VERSION against a running SM.
pub fn version_sm(port: Option<&str>, baud: u32) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_SM)?;
    let mut dev = Device::open(&cdc_port, baud, false)?;
    let (major, minor) = dev.version()?;
    println!("SM Version: {}.{}", major, minor);
    Ok(())
}

/// Uploads the system-manager image into its RAM slot and starts it.
pub fn run_sm(port: Option<&str>, baud: u32, sm: &Path) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_ROM)?;
    let sm_path = resolve_image(sm, "run-sm")?;
    let mut dev = Device::open(&cdc_port, baud, true)?;
    dev.upload_file(&sm_path, ADDR_SM_LOAD, IMG_TYPE_SM)?;
    info!("Sending RUN (0x0B)...");
    dev.run(ADDR_SM_LOAD)
}

/// A-core bring-up: BL then TZK into the A-core load address, with an
/// EXEC handoff after each.
pub fn run_acore(port: Option<&str>, baud: u32, bl: &Path, tzk: &Path) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_SM)?;
    let bl_path = resolve_image(bl, "run-acore")?;
    let tzk_path = resolve_image(tzk, "run-acore")?;

    let mut dev = Device::open(&cdc_port, baud, false)?;
    dev.upload_file(&bl_path, ADDR_AC_LOAD, IMG_TYPE_BL)?;
    dev.exec()?;
    dev.upload_file(&tzk_path, ADDR_AC_LOAD, IMG_TYPE_TZK)?;
    dev.exec()?;
    info!("A-Core Sequence Complete.");
    Ok(())
}

/// Full eMMC provisioning from a staging directory.
pub fn emmc(port: Option<&str>, baud: u32, img_dir: &Path) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_SM)?;
    let mut dev = Device::open(&cdc_port, baud, false)?;
    flasher::provision_from_dir(&mut dev, img_dir)
}

/// Reflash only the SM image in the eMMC user area.
pub fn emmc_sm(port: Option<&str>, baud: u32, sm_image: &Path) -> Result<()> {
    let cdc_port = resolve_port(port, USB_PAIRS_SM)?;
    let sm_path = resolve_image(sm_image, "emmc-sm")?;
    let mut dev = Device::open(&cdc_port, baud, false)?;
    flasher::flash_sm_image(&mut dev, &sm_path)
}
