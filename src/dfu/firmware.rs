//! DfuSe firmware container parsing.
//!
//! A DfuSe file is a "DfuSe"-signed prefix followed by repeated "Target"
//! records, each declaring a count of {address, size, payload} elements.
//! Files without the signature are plain binaries and are flashed whole at
//! the flash base address by the engine.

use std::path::Path;

use super::error::DfuResult;

/// ASCII signature at offset 0 of a DfuSe container.
pub const DFUSE_SIGNATURE: &[u8] = b"DfuSe";

const TARGET_SIGNATURE: &[u8] = b"Target";

/// Offset of the little-endian element count within a Target record.
const ELEMENT_COUNT_OFFSET: usize = 267;

/// Offset of the first element within a Target record.
const ELEMENTS_OFFSET: usize = 274;

/// A contiguous unit of flash to program: absolute address plus the exact
/// bytes to write there. Segments never overlap and imply no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuSegment {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Parse a DfuSe container into its segments, in file order.
///
/// Returns an empty list when the signature is absent; the caller falls back
/// to flat-binary mode. Truncated or corrupt files yield only the segments
/// fully contained in the buffer — parsing never fails.
pub fn parse_dfu_file(bytes: &[u8]) -> Vec<DfuSegment> {
    let mut segments = Vec::new();

    if bytes.len() <= 10 || &bytes[..DFUSE_SIGNATURE.len()] != DFUSE_SIGNATURE {
        return segments;
    }

    let mut pos = 0;
    while pos < bytes.len() - 10 {
        if bytes.len() - pos >= TARGET_SIGNATURE.len()
            && &bytes[pos..pos + TARGET_SIGNATURE.len()] == TARGET_SIGNATURE
        {
            let count_at = pos + ELEMENT_COUNT_OFFSET;
            if count_at + 2 > bytes.len() {
                break;
            }
            let element_count =
                u16::from_le_bytes([bytes[count_at], bytes[count_at + 1]]) as usize;

            let mut element_pos = pos + ELEMENTS_OFFSET;
            for _ in 0..element_count {
                if element_pos + 8 > bytes.len() {
                    break;
                }

                let address = read_u32_le(bytes, element_pos);
                let size = read_u32_le(bytes, element_pos + 4) as usize;
                element_pos += 8;

                let Some(end) = element_pos.checked_add(size) else {
                    break;
                };
                if size > 0 && end <= bytes.len() {
                    segments.push(DfuSegment {
                        address,
                        data: bytes[element_pos..end].to_vec(),
                    });
                }
                element_pos = end;
            }
            pos = element_pos;
        } else {
            pos += 1;
        }
    }

    segments
}

/// Load a firmware image from disk for flashing.
pub fn read_firmware_file<P: AsRef<Path>>(path: P) -> DfuResult<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{build_dfuse, build_target};
    use super::*;

    #[test]
    fn test_missing_signature_yields_no_segments() {
        assert!(parse_dfu_file(&[]).is_empty());
        assert!(parse_dfu_file(b"not a dfu file at all").is_empty());
        // Signature present but anywhere other than offset 0 does not count.
        assert!(parse_dfu_file(b"xxDfuSe padding padding padding").is_empty());
    }

    #[test]
    fn test_parse_single_target_in_order() {
        let payload_a: &[u8] = &[0xAA; 16];
        let payload_b: &[u8] = &[0x5A, 0xA5, 0x00, 0xFF];
        let file = build_dfuse(&[build_target(
            2,
            &[(0x0800_0000, payload_a), (0x0800_4000, payload_b)],
        )]);

        let segments = parse_dfu_file(&file);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].address, 0x0800_0000);
        assert_eq!(segments[0].data, payload_a);
        assert_eq!(segments[1].address, 0x0800_4000);
        assert_eq!(segments[1].data, payload_b);
    }

    #[test]
    fn test_parse_multiple_targets() {
        let file = build_dfuse(&[
            build_target(1, &[(0x0800_0000, &[1, 2, 3])]),
            build_target(1, &[(0x0801_0000, &[4, 5, 6, 7])]),
        ]);

        let segments = parse_dfu_file(&file);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].address, 0x0800_0000);
        assert_eq!(segments[1].address, 0x0801_0000);
        assert_eq!(segments[1].data, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_truncated_element_is_dropped() {
        // Second element declares 64 bytes but the file ends after 4.
        let mut file = build_dfuse(&[build_target(
            2,
            &[(0x0800_0000, &[9, 9, 9, 9]), (0x0800_8000, &[1, 1, 1, 1])],
        )]);
        // Rewrite the second element's size to something past the buffer end.
        let second_size_at = file.len() - 4 - 4;
        file[second_size_at..second_size_at + 4].copy_from_slice(&64u32.to_le_bytes());

        let segments = parse_dfu_file(&file);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].data, vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_declared_count_beyond_buffer_does_not_panic() {
        let file = build_dfuse(&[build_target(40, &[(0x0800_0000, &[7; 8])])]);

        let segments = parse_dfu_file(&file);

        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_zero_size_element_is_skipped() {
        let file = build_dfuse(&[build_target(
            2,
            &[(0x0800_0000, &[]), (0x0800_2000, &[3, 3])],
        )]);

        let segments = parse_dfu_file(&file);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].address, 0x0800_2000);
    }

    #[test]
    fn test_read_firmware_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("firmware.dfu");
        std::fs::write(&path, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let bytes = read_firmware_file(&path).unwrap();
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        assert!(read_firmware_file(dir.path().join("missing.dfu")).is_err());
    }
}
