use std::io::Write;
use std::path::PathBuf;
use std::process::exit;
use std::thread;

use clap::{Parser, ValueEnum};
use log::error;

mod consts;
mod device;
mod errors;
mod flasher;
mod fsutil;
mod gpt;
mod manifest;
mod serial;
mod stages;
mod wire;

use consts::{DEFAULT_BAUD, STAGE_SETTLE};
use errors::{Result, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Op {
    VersionBl,
    VersionSm,
    RunSpk,
    RunSm,
    RunAcore,
    Emmc,
    EmmcSm,
}

#[derive(Debug, Parser)]
struct Arguments {
    /// Operation to perform
    #[arg(long, value_enum)]
    op: Op,
    /// Serial port (leave empty for auto-detect)
    #[arg(long)]
    port: Option<String>,
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,
    /// Directory for eMMC images
    #[arg(long)]
    img_dir: Option<PathBuf>,
    /// Signed boot-package (SPK) image file
    #[arg(long, default_value = "spk.bin")]
    spk: PathBuf,
    /// Boot-package keys file
    #[arg(long, default_value = "key.bin")]
    keys: PathBuf,
    /// M52 bootloader image file
    #[arg(long, default_value = "m52bl.bin")]
    m52bl: PathBuf,
    /// System-manager image to upload and run
    #[arg(long)]
    sm: Option<PathBuf>,
    /// A-core bootloader image
    #[arg(long)]
    bl: Option<PathBuf>,
    /// Trusted-kernel image
    #[arg(long)]
    tzk: Option<PathBuf>,
    /// System-manager image to flash into eMMC
    #[arg(long)]
    sm_image: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let args = Arguments::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        exit(1);
    }
}

fn run(args: &Arguments) -> Result<()> {
    let port = args.port.as_deref();
    match args.op {
        Op::RunSpk => run_spk(args),
        Op::VersionBl => {
            run_spk(args)?;
            thread::sleep(STAGE_SETTLE);
            stages::version_bl(port, args.baud)
        }
        Op::VersionSm => {
            run_spk(args)?;
            thread::sleep(STAGE_SETTLE);
            run_sm(args)?;
            thread::sleep(STAGE_SETTLE);
            stages::version_sm(port, args.baud)
        }
        Op::RunSm => {
            run_spk(args)?;
            thread::sleep(STAGE_SETTLE);
            run_sm(args)
        }
        Op::RunAcore => {
            run_spk(args)?;
            thread::sleep(STAGE_SETTLE);
            run_sm(args)?;
            thread::sleep(STAGE_SETTLE);
            let bl = require(&args.bl, "Run A-Core requires explicit paths: --bl <path> --tzk <path>")?;
            let tzk = require(&args.tzk, "Run A-Core requires explicit paths: --bl <path> --tzk <path>")?;
            stages::run_acore(port, args.baud, bl, tzk)
        }
        Op::Emmc => {
            let img_dir = require(&args.img_dir, "Requires --img-dir <folder>")?;
            stages::emmc(port, args.baud, img_dir)
        }
        Op::EmmcSm => {
            run_spk(args)?;
            thread::sleep(STAGE_SETTLE);
            run_sm(args)?;
            thread::sleep(STAGE_SETTLE);
            let sm_image = require(&args.sm_image, "Requires --sm-image <path>")?;
            stages::emmc_sm(port, args.baud, sm_image)
        }
    }
}

fn run_spk(args: &Arguments) -> Result<()> {
    stages::run_spk(
        args.port.as_deref(),
        args.baud,
        &args.keys,
        &args.spk,
        &args.m52bl,
    )
}

fn run_sm(args: &Arguments) -> Result<()> {
    let sm = require(&args.sm, "Run SM requires explicit path: --sm <path>")?;
    stages::run_sm(args.port.as_deref(), args.baud, sm)
}

fn require<'a, T>(option: &'a Option<T>, message: &str) -> Result<&'a T> {
    option
        .as_ref()
        .ok_or_else(|| ToolError::Usage(message.to_string()))
}
