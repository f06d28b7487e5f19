use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use log::info;

use crate::consts::{
    HOST_API_SERVICE_ID, HOST_HEADER_SIZE, HOST_OPCODE_EMMC, HOST_OPCODE_EXEC,
    HOST_OPCODE_GENERIC, HOST_OPCODE_VERSION, OPCODE_EMMC_OP, OPCODE_EXEC, OPCODE_RUN_IMG,
    OPCODE_UPLOAD, OPCODE_VERSION, OP_HEADER_SIZE, SERVICE_ID_BOOT, STREAM_CHUNK_SIZE,
    UPLOAD_ACK_TIMEOUT, VERSION_SETTLE,
};
use crate::errors::{Result, ToolError};
use crate::fsutil::Progress;
use crate::serial::Transport;
use crate::wire::{self, ReplyHeader};

/// One boot-channel session. `raw_mode` selects whether inner frames go
/// out bare or wrapped in the host-API envelope; the choice is fixed for
/// the session and the wire codec itself never sees it.
pub struct Device {
    transport: Transport,
    raw_mode: bool,
}

/// Reads one reply header (plus data block in host-API mode) and
/// extracts the return code. An empty host-API data block means rc 0.
fn read_rc(transport: &mut Transport, raw_mode: bool) -> Result<u32> {
    let header = ReplyHeader::parse(&transport.read_exact(HOST_HEADER_SIZE)?)?;
    if raw_mode {
        return Ok(header.raw_rc());
    }
    let data_len = header.data_len() as usize;
    if data_len == 0 {
        return Ok(0);
    }
    let data = transport.read_exact(data_len)?;
    if data_len < 4 {
        return Err(ToolError::ShortRead {
            expected: 4,
            got: data_len,
        });
    }
    Ok(LittleEndian::read_u32(&data[..4]))
}

fn check_rc(rc: u32) -> Result<()> {
    if rc != 0 {
        return Err(ToolError::FirmwareFailure(rc));
    }
    Ok(())
}

impl Device {
    pub fn open(port: &str, baud: u32, raw_mode: bool) -> Result<Self> {
        Ok(Self {
            transport: Transport::open(port, baud)?,
            raw_mode,
        })
    }

    fn build_frame(
        &self,
        opcode: u8,
        host_opcode: u8,
        addr: u32,
        img_type: u32,
        num_words: Option<u32>,
        payload: &[u8],
    ) -> Vec<u8> {
        let padded = wire::pad_word_aligned(payload);
        let num_words = num_words.unwrap_or((padded.len() / 4) as u32);
        let inner_len = OP_HEADER_SIZE + padded.len();

        let mut frame = Vec::with_capacity(HOST_HEADER_SIZE + inner_len);
        if !self.raw_mode {
            frame.extend_from_slice(&wire::host_header(
                HOST_API_SERVICE_ID,
                host_opcode,
                inner_len as u32,
            ));
        }
        frame.extend_from_slice(&wire::op_header(
            SERVICE_ID_BOOT,
            opcode,
            addr,
            img_type,
            false,
            num_words,
        ));
        frame.extend_from_slice(&padded);
        frame
    }

    /// Writes one request frame and reads its reply, optionally under a
    /// temporary deadline. Never pipelines.
    fn transact(&mut self, frame: &[u8], timeout: Option<Duration>) -> Result<u32> {
        self.transport.write_all(frame)?;
        self.transport.flush()?;
        let raw_mode = self.raw_mode;
        match timeout {
            Some(t) => self
                .transport
                .with_timeout(t, |transport| read_rc(transport, raw_mode)),
            None => read_rc(&mut self.transport, raw_mode),
        }
    }

    /// VERSION (0x0A): the reply carries a packed (major << 16 | minor)
    /// word; raw-mode devices put it in the reply header's rc slot.
    pub fn version(&mut self) -> Result<(u16, u16)> {
        let frame = self.build_frame(OPCODE_VERSION, HOST_OPCODE_VERSION, 0, 0, None, &[]);
        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        thread::sleep(VERSION_SETTLE);

        let raw_mode = self.raw_mode;
        let word = read_rc(&mut self.transport, raw_mode)?;
        if raw_mode {
            // Raw replies trail four bytes we do not interpret
            let _ = self.transport.read_exact(4);
        }
        Ok(((word >> 16) as u16, word as u16))
    }

    /// RUN (0x0B): start the image previously uploaded to `addr`.
    pub fn run(&mut self, addr: u32) -> Result<()> {
        let frame = self.build_frame(OPCODE_RUN_IMG, HOST_OPCODE_GENERIC, addr, 0, None, &[]);
        let rc = self.transact(&frame, None)?;
        check_rc(rc)
    }

    /// EXEC (0x0C): hand control to the image between A-core uploads.
    pub fn exec(&mut self) -> Result<()> {
        let frame = self.build_frame(OPCODE_EXEC, HOST_OPCODE_EXEC, 0, 0, None, &[]);
        let rc = self.transact(&frame, None)?;
        check_rc(rc)
    }

    /// eMMC sub-command (0x0F). The (subcmd, param1, param2) triple
    /// rides in the (num_words, addr, img_type) slots of the inner
    /// header. Waits `settle` after a successful reply so the device
    /// can finish the operation before the next request.
    pub fn emmc_op(
        &mut self,
        subcmd: u32,
        param1: u32,
        param2: u32,
        timeout: Duration,
        settle: Duration,
    ) -> Result<()> {
        self.transport.reset_input()?;
        let frame = self.build_frame(
            OPCODE_EMMC_OP,
            HOST_OPCODE_EMMC,
            param1,
            param2,
            Some(subcmd),
            &[],
        );
        let rc = self.transact(&frame, Some(timeout))?;
        check_rc(rc)?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    /// Two-phase UPLOAD (0x12) of a file into target RAM.
    pub fn upload_file(&mut self, path: &Path, addr: u32, img_type: u32) -> Result<()> {
        let size = std::fs::metadata(path)?.len();
        info!(
            "Upload {} ({} bytes) to {:#X}...",
            path.file_name().unwrap_or_default().to_string_lossy(),
            size,
            addr
        );
        let mut file = File::open(path)?;
        self.upload_stream(&mut file, size, addr, img_type)
    }

    /// Same upload path for an in-memory block (the chunked flasher).
    pub fn upload_chunk(&mut self, data: &[u8], addr: u32, img_type: u32) -> Result<()> {
        let mut source = data;
        self.upload_stream(&mut source, data.len() as u64, addr, img_type)
    }

    fn upload_stream(
        &mut self,
        source: &mut impl Read,
        size: u64,
        addr: u32,
        img_type: u32,
    ) -> Result<()> {
        // Setup frame: num_words carries the full byte size, no payload
        let setup = self.build_frame(
            OPCODE_UPLOAD,
            HOST_OPCODE_GENERIC,
            addr,
            img_type,
            Some(size as u32),
            &[],
        );
        let rc = self.transact(&setup, None)?;
        check_rc(rc)?;

        let started = Instant::now();
        let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
        let mut sent = 0u64;
        let progress = Progress::new(size);
        loop {
            let n = source.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            self.transport.write_all(&buffer[..n])?;
            self.transport.flush()?;
            sent += n as u64;
            progress.update(sent);
        }

        info!("Data sent. Waiting for verification...");
        let raw_mode = self.raw_mode;
        let final_rc = self
            .transport
            .with_timeout(UPLOAD_ACK_TIMEOUT, |transport| read_rc(transport, raw_mode))?;
        check_rc(final_rc)?;

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            "Upload Done: {:.4}s ({:.2} KB/s)",
            elapsed,
            size as f64 / 1024.0 / elapsed
        );
        Ok(())
    }

    /// Boot-package handoff over the ROM-level framing: 32-byte header
    /// with the payload length in the first word slot, the raw file
    /// bytes, then an 8-byte reply whose trailing word is the rc.
    pub fn send_spk(&mut self, op: u8, payload: &[u8]) -> Result<()> {
        let header = wire::spk_header(op, payload.len() as u32);
        self.transport.write_all(&header)?;
        self.transport.write_all(payload)?;
        self.transport.flush()?;
        let reply = self.transport.read_exact(HOST_HEADER_SIZE)?;
        let rc = LittleEndian::read_u32(&reply[4..8]);
        check_rc(rc)
    }
}
