//! Pure PMD (Polar Measurement Data) and standard HR-service frame codecs.
//!
//! Kept free of any BLE transport dependency so the byte-level decoding can
//! be exercised without a device, grounded on the constants and parsing
//! logic in `app/acquisition/polar_client.py`.

pub const PMD_CMD_GET_SETTINGS: u8 = 0x01;
pub const PMD_CMD_START: u8 = 0x02;
pub const PMD_CMD_STOP: u8 = 0x03;
pub const PMD_TYPE_PPI: u8 = 0x03;

const PMD_RESPONSE_PREFIX: u8 = 0xF0;
const PMD_RESPONSE_STATUS_OK: u8 = 0x00;
const PMD_HEADER_SIZE: usize = 10;
const PMD_SAMPLE_SIZE: usize = 6;
const PMD_FRAME_MIN_SIZE: usize = 16;

/// One decoded 6-byte PPI sample from a PMD data frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpiSample {
    pub ppi_ms: u16,
    pub error_estimate_ms: u16,
    pub skin_contact: bool,
    pub contact_supported: bool,
    pub rr_valid: bool,
}

/// A fully decoded PMD data notification carrying a PPI batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PpiFrame {
    pub samples: Vec<PpiSample>,
}

/// Build the `[op, measurement_type, ...]` control-point command to start
/// PPI streaming.
pub fn encode_start_ppi() -> Vec<u8> {
    vec![PMD_CMD_START, PMD_TYPE_PPI]
}

pub fn encode_stop_ppi() -> Vec<u8> {
    vec![PMD_CMD_STOP, PMD_TYPE_PPI]
}

pub fn encode_get_settings_ppi() -> Vec<u8> {
    vec![PMD_CMD_GET_SETTINGS, PMD_TYPE_PPI]
}

/// Whether a control-point response indicates the echoed command succeeded.
///
/// Response layout: `0xF0, op, measurement_type, status, ...`. Any frame
/// shorter than 4 bytes or with a non-OK status is treated as a failure.
pub fn decode_control_response(data: &[u8]) -> Result<(), String> {
    if data.len() < 4 || data[0] != PMD_RESPONSE_PREFIX {
        return Err(format!("malformed PMD control response: {data:?}"));
    }
    if data[3] != PMD_RESPONSE_STATUS_OK {
        return Err(format!("PMD command rejected, status={}", data[3]));
    }
    Ok(())
}

/// Decode a PMD data notification into a PPI batch.
///
/// Frames shorter than 16 bytes are silently dropped (returns `None`),
/// matching the reference client's tolerance for short/garbled notifications.
/// The embedded 8-byte device timestamp is parsed for validation only — it
/// is not trustworthy as a wall-clock reference and callers should stamp
/// arrival with local receipt time instead.
pub fn decode_ppi_frame(data: &[u8]) -> Option<PpiFrame> {
    if data.len() < PMD_FRAME_MIN_SIZE {
        return None;
    }
    if data[0] != PMD_TYPE_PPI {
        return None;
    }
    // bytes[1..9] are the device timestamp (uint64 LE); intentionally unused.
    if data[9] != 0x00 {
        return None;
    }

    let payload = &data[PMD_HEADER_SIZE..];
    let n_samples = payload.len() / PMD_SAMPLE_SIZE;
    let mut samples = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        let base = i * PMD_SAMPLE_SIZE;
        let chunk = &payload[base..base + PMD_SAMPLE_SIZE];
        // chunk[0] is an HR byte, always present but ignored per the PMD spec.
        let ppi_ms = u16::from_le_bytes([chunk[1], chunk[2]]);
        let error_estimate_ms = u16::from_le_bytes([chunk[3], chunk[4]]);
        let flags = chunk[5];
        samples.push(PpiSample {
            ppi_ms,
            error_estimate_ms,
            skin_contact: flags & 0b001 != 0,
            contact_supported: flags & 0b010 != 0,
            rr_valid: flags & 0b100 != 0,
        });
    }

    Some(PpiFrame { samples })
}

/// Decode a standard Bluetooth Heart Rate Measurement characteristic value.
///
/// byte 0 is a flags byte; bit 0 selects an 8-bit (false) or 16-bit (true,
/// little-endian) heart-rate value starting at byte 1.
pub fn decode_standard_hr_frame(data: &[u8]) -> Option<u16> {
    if data.is_empty() {
        return None;
    }
    let is_16_bit = data[0] & 0x01 != 0;
    if is_16_bit {
        if data.len() < 3 {
            return None;
        }
        Some(u16::from_le_bytes([data[1], data[2]]))
    } else {
        data.get(1).map(|&hr| hr as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(hr: u8, ppi_ms: u16, error_ms: u16, flags: u8) -> [u8; 6] {
        let ppi = ppi_ms.to_le_bytes();
        let err = error_ms.to_le_bytes();
        [hr, ppi[0], ppi[1], err[0], err[1], flags]
    }

    fn frame_with_samples(samples: &[[u8; 6]]) -> Vec<u8> {
        let mut data = vec![PMD_TYPE_PPI];
        data.extend_from_slice(&0u64.to_le_bytes());
        data.push(0x00);
        for s in samples {
            data.extend_from_slice(s);
        }
        data
    }

    #[test]
    fn decodes_single_ppi_sample_with_full_contact() {
        let frame = frame_with_samples(&[sample_bytes(0, 800, 16, 0b111)]);
        let decoded = decode_ppi_frame(&frame).unwrap();
        assert_eq!(decoded.samples.len(), 1);
        assert_eq!(decoded.samples[0].ppi_ms, 800);
        assert_eq!(decoded.samples[0].error_estimate_ms, 16);
        assert!(decoded.samples[0].skin_contact);
        assert!(decoded.samples[0].contact_supported);
        assert!(decoded.samples[0].rr_valid);
    }

    #[test]
    fn decodes_multiple_samples_in_one_frame() {
        let frame = frame_with_samples(&[
            sample_bytes(0, 800, 0, 0b111),
            sample_bytes(0, 810, 0, 0b111),
            sample_bytes(0, 790, 0, 0b101),
        ]);
        let decoded = decode_ppi_frame(&frame).unwrap();
        assert_eq!(decoded.samples.len(), 3);
        assert!(!decoded.samples[2].contact_supported);
    }

    #[test]
    fn frames_shorter_than_16_bytes_are_dropped() {
        let short = vec![PMD_TYPE_PPI, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(decode_ppi_frame(&short).is_none());
    }

    #[test]
    fn wrong_measurement_type_is_rejected() {
        let mut frame = frame_with_samples(&[sample_bytes(0, 800, 0, 0b111)]);
        frame[0] = 0x01; // not PMD_TYPE_PPI
        assert!(decode_ppi_frame(&frame).is_none());
    }

    #[test]
    fn wrong_frame_type_byte_is_rejected() {
        let mut frame = frame_with_samples(&[sample_bytes(0, 800, 0, 0b111)]);
        frame[9] = 0x01;
        assert!(decode_ppi_frame(&frame).is_none());
    }

    #[test]
    fn control_response_ok_status_succeeds() {
        let data = [PMD_RESPONSE_PREFIX, PMD_CMD_START, PMD_TYPE_PPI, 0x00];
        assert!(decode_control_response(&data).is_ok());
    }

    #[test]
    fn control_response_error_status_fails() {
        let data = [PMD_RESPONSE_PREFIX, PMD_CMD_START, PMD_TYPE_PPI, 0x01];
        assert!(decode_control_response(&data).is_err());
    }

    #[test]
    fn control_response_too_short_fails() {
        assert!(decode_control_response(&[PMD_RESPONSE_PREFIX, 0x02]).is_err());
    }

    #[test]
    fn standard_hr_frame_decodes_8_bit_value() {
        let data = [0x00, 72];
        assert_eq!(decode_standard_hr_frame(&data), Some(72));
    }

    #[test]
    fn standard_hr_frame_decodes_16_bit_value() {
        let hr: u16 = 320;
        let bytes = hr.to_le_bytes();
        let data = [0x01, bytes[0], bytes[1]];
        assert_eq!(decode_standard_hr_frame(&data), Some(320));
    }

    #[test]
    fn empty_hr_frame_returns_none() {
        assert_eq!(decode_standard_hr_frame(&[]), None);
    }
}
