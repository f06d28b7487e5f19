use std::time::Duration;

// Serial defaults
pub const DEFAULT_BAUD: u32 = 230400;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const EMMC_OP_TIMEOUT: Duration = Duration::from_secs(240);
pub const UPLOAD_ACK_TIMEOUT: Duration = Duration::from_secs(20);

// Framing
pub const SYNC1: u8 = 0x5B;
pub const SYNC2: u8 = 0x5A;
pub const OP_HEADER_SIZE: usize = 32;
pub const HOST_HEADER_SIZE: usize = 8;

// Service IDs
pub const SERVICE_ID_BOOT: u8 = 0x33;
pub const HOST_API_SERVICE_ID: u8 = 0x0D;

// Operation opcodes
pub const OPCODE_VERSION: u8 = 0x0A;
pub const OPCODE_RUN_IMG: u8 = 0x0B;
pub const OPCODE_EXEC: u8 = 0x0C;
pub const OPCODE_EMMC_OP: u8 = 0x0F;
pub const OPCODE_UPLOAD: u8 = 0x12;

// Host-API opcodes (outer envelope)
pub const HOST_OPCODE_GENERIC: u8 = 0x12;
pub const HOST_OPCODE_EMMC: u8 = 0x0F;
pub const HOST_OPCODE_VERSION: u8 = 0x0A;
pub const HOST_OPCODE_EXEC: u8 = 0x0C;

// Boot-package opcodes (legacy SPK framing)
pub const SPK_OP_KEYS: u8 = 0x01;
pub const SPK_OP_SPK: u8 = 0x02;
pub const SPK_OP_M52BL: u8 = 0x04;

// eMMC sub-commands, carried in the num_words slot of the inner header
pub const EMMC_INIT: u32 = 0;
pub const EMMC_SELECT_AREA: u32 = 2;
pub const EMMC_READBACK: u32 = 3;
pub const EMMC_WRITE: u32 = 4;
pub const EMMC_ERASE: u32 = 5;

// Target load addresses
pub const ADDR_SM_LOAD: u32 = 0xB4A0_0000;
pub const ADDR_AC_LOAD: u32 = 0xBA10_0000;

// Image type tags, interpreted by firmware
pub const IMG_TYPE_BL: u32 = 0x0002_0017;
pub const IMG_TYPE_TZK: u32 = 0x0002_0014;
pub const IMG_TYPE_SM: u32 = 0x0000_0012;
pub const IMG_TYPE_GPT: u32 = 0x10;
pub const IMG_TYPE_OPTEE: u32 = IMG_TYPE_TZK;
pub const IMG_TYPE_GENERIC: u32 = 0x0000_0000;

// Sizes
pub const BLOCK_SIZE: usize = 512;
pub const MB_SIZE: usize = 1024 * 1024;
pub const LBAS_PER_MB: u64 = (MB_SIZE / BLOCK_SIZE) as u64;
pub const CHUNK_SIZE_MB: usize = 32;
pub const LARGE_FILE_THRESHOLD_MB: u64 = 100;
pub const STREAM_CHUNK_SIZE: usize = 3 * 1024 * 1024;

// Settle delays after eMMC sub-commands
pub const SETTLE_SHORT: Duration = Duration::from_millis(100);
pub const SETTLE_BOOT_INIT: Duration = Duration::from_millis(200);
pub const SETTLE_BOOT_SELECT: Duration = Duration::from_secs(12);
pub const SETTLE_BOOT_ERASE: Duration = Duration::from_secs(3);
pub const SETTLE_BOOT_WRITE: Duration = Duration::from_secs(7);
pub const SETTLE_NONE: Duration = Duration::ZERO;

// Pause between stages that re-enumerate the CDC endpoint
pub const STAGE_SETTLE: Duration = Duration::from_secs(2);
// Pause between a VERSION request and its reply read
pub const VERSION_SETTLE: Duration = Duration::from_millis(200);

// USB personalities per boot stage. The ROM/SPK loader and the M52
// bootloader enumerate with the same pair; the SM image re-enumerates
// with its own.
pub const USB_PAIRS_ROM: &[(u16, u16)] = &[(0x06CB, 0x019E)];
pub const USB_PAIRS_SM: &[(u16, u16)] = &[(0xCAFE, 0x4002)];
