//! DfuSe protocol engine.
//!
//! Drives the STM32 bootloader through erase/write/verify sequencing over
//! class control transfers: sector erase and chunked DNLOAD writes per
//! segment, full-chip erase, and the final manifest phase that boots the new
//! firmware. Every wait is a cooperative sleep-and-repoll loop bounded by the
//! configured budget; the device's GETSTATUS answer is read fresh on every
//! poll because the device is the authority.

use std::time::Duration;

use log::{debug, info};
use tokio::time::{sleep, Instant};

use super::config::{
    DfuTimeouts, CMD_ERASE, CMD_SET_ADDRESS, DFU_ABORT, DFU_CLRSTATUS, DFU_DNLOAD, DFU_GETSTATUS,
    FIRST_DATA_BLOCK, FLASH_BASE_ADDRESS, MIN_POLL_INTERVAL, STATE_DFU_DNLOAD_IDLE, STATE_DFU_ERROR,
    STATE_DFU_IDLE, STATUS_LENGTH, TRANSFER_CHUNK_SIZE,
};
use super::error::{DfuError, DfuResult};
use super::firmware::{parse_dfu_file, DfuSegment};
use super::transport::UsbTransport;

/// One GETSTATUS answer. Never cached across polls.
#[derive(Debug, Clone, Copy)]
pub struct DfuStatus {
    /// Raw status code (bStatus).
    pub status: u8,
    /// Minimum wait the device requests before the next request (bwPollTimeout).
    pub poll_timeout: Duration,
    /// Device state (bState).
    pub state: u8,
}

impl DfuStatus {
    /// Decode the 6-byte GETSTATUS payload.
    pub fn parse(buf: &[u8]) -> DfuResult<Self> {
        if buf.len() < STATUS_LENGTH {
            return Err(DfuError::ShortStatus { len: buf.len() });
        }
        let poll_ms =
            u32::from(buf[1]) | (u32::from(buf[2]) << 8) | (u32::from(buf[3]) << 16);
        Ok(Self {
            status: buf[0],
            poll_timeout: Duration::from_millis(u64::from(poll_ms)),
            state: buf[4],
        })
    }

    pub fn is_idle(&self) -> bool {
        self.state == STATE_DFU_IDLE || self.state == STATE_DFU_DNLOAD_IDLE
    }

    pub fn is_error(&self) -> bool {
        self.state == STATE_DFU_ERROR
    }
}

/// DfuSe flashing engine over a claimed DFU interface.
///
/// Failures never cross this boundary as errors: both public operations
/// report a boolean outcome plus a human-readable progress log. A failed
/// flash leaves the chip as-is — retrying without a mass erase first is
/// unsafe, so no automatic retry or rollback is attempted.
pub struct DfuSeEngine<T: UsbTransport> {
    transport: T,
    timeouts: DfuTimeouts,
}

impl<T: UsbTransport> DfuSeEngine<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeouts(transport, DfuTimeouts::default())
    }

    pub fn with_timeouts(transport: T, timeouts: DfuTimeouts) -> Self {
        Self {
            transport,
            timeouts,
        }
    }

    /// Parse `image` and program every segment, then boot the new firmware.
    ///
    /// Images without the DfuSe signature are written whole to the flash
    /// base address.
    pub async fn flash_firmware<F: Fn(&str)>(&mut self, image: &[u8], on_progress: F) -> bool {
        match self.flash(image, &on_progress).await {
            Ok(()) => true,
            Err(e) => {
                on_progress(&format!("Flash failed: {}", e));
                false
            }
        }
    }

    async fn flash<F: Fn(&str)>(&mut self, image: &[u8], on_progress: &F) -> DfuResult<()> {
        // Abandon any half-finished operation and clear a stale error state.
        self.transport.control_out(DFU_ABORT, 0, &[])?;
        self.ensure_idle()?;

        let mut segments = parse_dfu_file(image);
        if segments.is_empty() {
            on_progress(&format!(
                "Binary image detected, flashing to 0x{:08X}",
                FLASH_BASE_ADDRESS
            ));
            segments.push(DfuSegment {
                address: FLASH_BASE_ADDRESS,
                data: image.to_vec(),
            });
        } else {
            on_progress(&format!("Container parsed: {} segments", segments.len()));
        }

        for (index, segment) in segments.iter().enumerate() {
            on_progress(&format!(
                "Segment {}: erasing sector 0x{:08X}",
                index + 1,
                segment.address
            ));
            if let Err(e) = self.erase_sector(segment.address).await {
                on_progress("Erase failed (is the chip write-protected?)");
                return Err(e);
            }

            on_progress(&format!("Writing {} bytes", segment.data.len()));
            if let Err(e) = self.write_segment(segment).await {
                on_progress("Write failed");
                return Err(e);
            }
        }

        on_progress("Done, resetting device");
        self.leave_dfu_mode().await;
        Ok(())
    }

    /// Erase the whole chip and wait for the device to report idle again.
    pub async fn full_chip_erase<F: Fn(&str)>(&mut self, on_progress: F) -> bool {
        match self.mass_erase(&on_progress).await {
            Ok(()) => true,
            Err(e) => {
                on_progress(&format!("Mass erase failed: {}", e));
                false
            }
        }
    }

    async fn mass_erase<F: Fn(&str)>(&mut self, on_progress: &F) -> DfuResult<()> {
        on_progress("Preparing mass erase");
        self.ensure_idle()?;

        on_progress("Sending mass erase command");
        self.transport.control_out(DFU_DNLOAD, 0, &[CMD_ERASE])?;

        on_progress("Erasing, this can take a while");
        let deadline = Instant::now() + self.timeouts.mass_erase;
        while Instant::now() < deadline {
            let status = self.get_status()?;

            if status.is_error() {
                self.transport.control_out(DFU_CLRSTATUS, 0, &[]).ok();
                return Err(DfuError::DeviceError {
                    status: status.status,
                });
            }
            if status.is_idle() {
                on_progress("Mass erase complete");
                return Ok(());
            }

            sleep(self.timeouts.mass_erase_poll).await;
        }

        Err(DfuError::StatusTimeout)
    }

    async fn erase_sector(&mut self, address: u32) -> DfuResult<()> {
        debug!("erasing sector at 0x{:08X}", address);
        let mut cmd = [0u8; 5];
        cmd[0] = CMD_ERASE;
        cmd[1..5].copy_from_slice(&address.to_le_bytes());
        self.transport.control_out(DFU_DNLOAD, 0, &cmd)?;
        self.wait_for_idle(self.timeouts.erase).await
    }

    async fn write_segment(&mut self, segment: &DfuSegment) -> DfuResult<()> {
        self.set_address(segment.address).await?;

        let mut block = FIRST_DATA_BLOCK;
        for chunk in segment.data.chunks(TRANSFER_CHUNK_SIZE) {
            self.transport.control_out(DFU_DNLOAD, block, chunk)?;
            self.wait_for_idle(self.timeouts.chunk_write).await?;
            block = block.wrapping_add(1);
        }

        info!(
            "wrote {} bytes at 0x{:08X}",
            segment.data.len(),
            segment.address
        );
        Ok(())
    }

    async fn set_address(&mut self, address: u32) -> DfuResult<()> {
        let mut cmd = [0u8; 5];
        cmd[0] = CMD_SET_ADDRESS;
        cmd[1..5].copy_from_slice(&address.to_le_bytes());
        self.transport.control_out(DFU_DNLOAD, 0, &cmd)?;
        self.wait_for_idle(self.timeouts.chunk_write).await
    }

    /// Point the device back at the flash base and issue the zero-length
    /// DNLOAD that starts the manifest phase. The device may already be
    /// rebooting into the new firmware when the final GETSTATUS goes out, so
    /// nothing here is treated as an error.
    async fn leave_dfu_mode(&mut self) {
        let _ = self.set_address(FLASH_BASE_ADDRESS).await;
        let _ = self.transport.control_out(DFU_DNLOAD, 0, &[]);
        let mut buf = [0u8; STATUS_LENGTH];
        let _ = self.transport.control_in(DFU_GETSTATUS, 0, &mut buf);
    }

    fn get_status(&mut self) -> DfuResult<DfuStatus> {
        let mut buf = [0u8; STATUS_LENGTH];
        let n = self.transport.control_in(DFU_GETSTATUS, 0, &mut buf)?;
        DfuStatus::parse(&buf[..n])
    }

    /// Clear a stale error status so the next command starts from idle.
    fn ensure_idle(&mut self) -> DfuResult<()> {
        let status = self.get_status()?;
        if status.is_error() {
            self.transport.control_out(DFU_CLRSTATUS, 0, &[])?;
        }
        Ok(())
    }

    /// Poll GETSTATUS until the device is idle, honoring the device-reported
    /// poll interval with a floor so a zero answer does not spin.
    async fn wait_for_idle(&mut self, timeout: Duration) -> DfuResult<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let status = self.get_status()?;

            if status.is_idle() {
                return Ok(());
            }
            if status.is_error() {
                self.transport.control_out(DFU_CLRSTATUS, 0, &[]).ok();
                return Err(DfuError::DeviceError {
                    status: status.status,
                });
            }

            sleep(status.poll_timeout.max(MIN_POLL_INTERVAL)).await;
        }

        Err(DfuError::StatusTimeout)
    }
}
