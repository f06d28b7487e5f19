use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};
use uuid::{uuid, Uuid};

use crate::consts::{BLOCK_SIZE, LBAS_PER_MB};
use crate::manifest::PartitionDesc;

pub const PART_ENTRIES: usize = 128;
pub const PART_ENTRY_SIZE: usize = 128;
pub const GPT_TABLE_SIZE: usize = 0x4000;
pub const GPT_HEADER_SIZE: usize = 92;
pub const GPT_REVISION: u32 = 0x0001_0000;
const PART_NAME_BYTES: usize = 72;

// Microsoft basic data; the firmware accepts it for every user partition
const PART_TYPE_GUID: Uuid = uuid!("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7");

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A partition descriptor solved into absolute LBAs.
#[derive(Debug, Clone)]
pub struct PartitionExtent {
    pub name: String,
    pub start_lba: u64,
    pub end_lba: u64,
}

impl PartitionExtent {
    pub fn size_lbas(&self) -> u64 {
        self.end_lba - self.start_lba + 1
    }
}

/// Solves descriptor (start_mb, size_mb) pairs into LBA extents. A zero
/// start places the partition immediately after the previous one's last
/// LBA (LBA 1 for the first).
pub fn layout_partitions(parts: &[PartitionDesc]) -> Vec<PartitionExtent> {
    let mut previous_end_lba = 0u64;
    parts
        .iter()
        .map(|part| {
            let start_lba = if part.start_mb > 0 {
                part.start_mb * LBAS_PER_MB
            } else {
                previous_end_lba + 1
            };
            let end_lba = start_lba + part.size_mb * LBAS_PER_MB - 1;
            previous_end_lba = end_lba;
            PartitionExtent {
                name: part.name.clone(),
                start_lba,
                end_lba,
            }
        })
        .collect()
}

/// GPT stores the first three GUID groups byte-reversed and the last
/// eight bytes verbatim.
fn guid_to_gpt_bytes(guid: &Uuid) -> [u8; 16] {
    let b = guid.as_bytes();
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&[b[3], b[2], b[1], b[0]]);
    out[4..6].copy_from_slice(&[b[5], b[4]]);
    out[6..8].copy_from_slice(&[b[7], b[6]]);
    out[8..16].copy_from_slice(&b[8..16]);
    out
}

/// LBA 0: a single 0xEE entry spanning the disk so legacy tools leave
/// the GPT alone.
fn build_protective_mbr() -> [u8; BLOCK_SIZE] {
    let mut mbr = [0u8; BLOCK_SIZE];
    let entry: [u8; 16] = [
        0x00, // not bootable
        0x00, 0x02, 0x00, // first CHS
        0xEE, // GPT protective
        0xFF, 0xFF, 0xFF, // last CHS
        0x01, 0x00, 0x00, 0x00, // first LBA = 1
        0xFF, 0xFF, 0xFF, 0xFF, // sector count
    ];
    mbr[0x1BE..0x1BE + 16].copy_from_slice(&entry);
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

fn build_partition_entry(name: &str, start_lba: u64, end_lba: u64) -> [u8; PART_ENTRY_SIZE] {
    let mut entry = [0u8; PART_ENTRY_SIZE];
    entry[0..16].copy_from_slice(&guid_to_gpt_bytes(&PART_TYPE_GUID));
    entry[16..32].copy_from_slice(&guid_to_gpt_bytes(&Uuid::new_v4()));
    LittleEndian::write_u64(&mut entry[32..40], start_lba);
    LittleEndian::write_u64(&mut entry[40..48], end_lba);
    // Attribute flags at 48..56 stay zero
    let mut name_utf16 = Vec::with_capacity(PART_NAME_BYTES);
    for unit in name.encode_utf16() {
        name_utf16.extend_from_slice(&unit.to_le_bytes());
    }
    name_utf16.truncate(PART_NAME_BYTES);
    entry[56..56 + name_utf16.len()].copy_from_slice(&name_utf16);
    entry
}

/// Builds the primary GPT image: protective MBR (LBA 0), header (LBA 1),
/// partition entry array (LBA 2+). Returns the image and the entry-array
/// size in LBAs. No backup GPT is produced; the firmware mirrors it.
pub fn build_gpt_primary(parts: &[PartitionDesc]) -> (Vec<u8>, u64) {
    let mut part_bytes = vec![0u8; PART_ENTRIES * PART_ENTRY_SIZE];
    let mut max_used_lba = 0u64;

    for (idx, extent) in layout_partitions(parts)
        .iter()
        .take(PART_ENTRIES)
        .enumerate()
    {
        let entry = build_partition_entry(&extent.name, extent.start_lba, extent.end_lba);
        part_bytes[idx * PART_ENTRY_SIZE..(idx + 1) * PART_ENTRY_SIZE].copy_from_slice(&entry);
        if extent.end_lba > max_used_lba {
            max_used_lba = extent.end_lba;
        }
    }

    part_bytes.resize(GPT_TABLE_SIZE, 0);
    let part_array_crc = CRC32.checksum(&part_bytes);

    let mut header = [0u8; BLOCK_SIZE];
    header[0..8].copy_from_slice(b"EFI PART");
    LittleEndian::write_u32(&mut header[8..12], GPT_REVISION);
    LittleEndian::write_u32(&mut header[12..16], GPT_HEADER_SIZE as u32);
    // header CRC at 16..20 stays zero until the header is complete
    LittleEndian::write_u64(&mut header[24..32], 1); // current LBA
    LittleEndian::write_u64(&mut header[32..40], 0); // backup LBA
    LittleEndian::write_u64(&mut header[40..48], 34); // first usable LBA
    LittleEndian::write_u64(&mut header[48..56], max_used_lba);
    header[56..72].copy_from_slice(&guid_to_gpt_bytes(&Uuid::new_v4()));
    LittleEndian::write_u64(&mut header[72..80], 2); // partition entry LBA
    LittleEndian::write_u32(&mut header[80..84], PART_ENTRIES as u32);
    LittleEndian::write_u32(&mut header[84..88], PART_ENTRY_SIZE as u32);
    LittleEndian::write_u32(&mut header[88..92], part_array_crc);

    let header_crc = CRC32.checksum(&header[..GPT_HEADER_SIZE]);
    LittleEndian::write_u32(&mut header[16..20], header_crc);

    let mut image = Vec::with_capacity(2 * BLOCK_SIZE + GPT_TABLE_SIZE);
    image.extend_from_slice(&build_protective_mbr());
    image.extend_from_slice(&header);
    image.extend_from_slice(&part_bytes);
    (image, (GPT_TABLE_SIZE / BLOCK_SIZE) as u64)
}

#[cfg(test)]
fn desc(name: &str, start_mb: u64, size_mb: u64) -> PartitionDesc {
    PartitionDesc {
        name: name.to_string(),
        start_mb,
        size_mb,
    }
}

#[test]
fn test_guid_gpt_serialization() {
    let bytes = guid_to_gpt_bytes(&PART_TYPE_GUID);
    assert_eq!(
        bytes,
        [
            0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26,
            0x99, 0xC7,
        ]
    );
}

#[test]
fn test_protective_mbr_layout() {
    let mbr = build_protective_mbr();
    assert_eq!(
        &mbr[0x1BE..0x1CE],
        &[
            0x00, 0x00, 0x02, 0x00, 0xEE, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF,
            0xFF, 0xFF,
        ]
    );
    assert_eq!(&mbr[510..512], &[0x55, 0xAA]);
}

#[test]
fn test_layout_auto_placement() {
    let extents = layout_partitions(&[desc("boot", 1, 64), desc("rootfs", 0, 512)]);
    assert_eq!(extents[0].start_lba, 2048);
    assert_eq!(extents[0].end_lba, 133119);
    assert_eq!(extents[1].start_lba, 133120);
    assert_eq!(extents[1].end_lba, 1181695);
    assert_eq!(extents[1].size_lbas(), 512 * 2048);

    // First partition with no explicit start lands at LBA 1
    let auto = layout_partitions(&[desc("a", 0, 1)]);
    assert_eq!(auto[0].start_lba, 1);
    assert_eq!(auto[0].end_lba, 2048);
}

#[test]
fn test_gpt_image_crcs() {
    let (image, table_lbas) = build_gpt_primary(&[desc("boot", 1, 64), desc("rootfs", 0, 512)]);
    assert_eq!(table_lbas, 32);
    assert_eq!(image.len(), 2 * BLOCK_SIZE + GPT_TABLE_SIZE);

    let header = &image[BLOCK_SIZE..2 * BLOCK_SIZE];
    assert_eq!(&header[0..8], b"EFI PART");
    assert_eq!(LittleEndian::read_u32(&header[8..12]), GPT_REVISION);
    assert_eq!(LittleEndian::read_u64(&header[40..48]), 34);
    assert_eq!(LittleEndian::read_u64(&header[48..56]), 1181695);

    // Header CRC is over the 92 header bytes with the CRC field zeroed
    let mut zeroed = header[..GPT_HEADER_SIZE].to_vec();
    let stored_crc = LittleEndian::read_u32(&zeroed[16..20]);
    zeroed[16..20].fill(0);
    assert_eq!(CRC32.checksum(&zeroed), stored_crc);

    // Entry array CRC is over the full 16 KiB
    let part_bytes = &image[2 * BLOCK_SIZE..];
    assert_eq!(
        CRC32.checksum(part_bytes),
        LittleEndian::read_u32(&header[88..92])
    );

    let first = &part_bytes[..PART_ENTRY_SIZE];
    assert_eq!(LittleEndian::read_u64(&first[32..40]), 2048);
    assert_eq!(LittleEndian::read_u64(&first[40..48]), 133119);
    assert_eq!(&first[56..64], &[b'b', 0, b'o', 0, b'o', 0, b't', 0]);
}

#[test]
fn test_partition_name_truncation() {
    let long_name = "x".repeat(64);
    let entry = build_partition_entry(&long_name, 1, 2);
    // 64 UTF-16LE units are 128 bytes; only 72 fit
    assert_eq!(entry[56], b'x');
    assert_eq!(entry[126], b'x');
    assert_eq!(entry[127], 0);
}
