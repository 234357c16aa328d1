//! Content sniffing on the first downloaded bytes.

use crate::constants::SPMIDI_SEARCH_LIMIT;

use super::PcmFormat;

/// Scan the leading bytes of a MIDI file for the SP-MIDI system exclusive
/// signature `F0 ?? 7F ?? 0B 01`.
///
/// Returns `false` for inputs shorter than the signature.
pub fn detect_sp_midi(data: &[u8]) -> bool {
    if data.len() < 6 {
        return false;
    }
    let max_search = SPMIDI_SEARCH_LIMIT.min(data.len() - 5);
    (0..max_search).any(|i| {
        data[i] == 0xF0 && data[i + 2] == 0x7F && data[i + 4] == 0x0B && data[i + 5] == 0x01
    })
}

/// Read the sample layout from a RIFF/WAVE header once the `fmt ` chunk
/// has arrived.
pub fn wav_format(data: &[u8]) -> Option<PcmFormat> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return None;
    }
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let id = &data[offset..offset + 4];
        let size = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().ok()?) as usize;
        let body = offset + 8;
        if id == b"fmt " {
            if size < 16 || body + 16 > data.len() {
                return None;
            }
            let field = |at: usize, len: usize| &data[body + at..body + at + len];
            let channels = u16::from_le_bytes(field(2, 2).try_into().ok()?);
            let sample_rate = u32::from_le_bytes(field(4, 4).try_into().ok()?);
            let bits = u16::from_le_bytes(field(14, 2).try_into().ok()?);
            return Some(PcmFormat {
                sample_rate,
                channels,
                bits,
            });
        }
        offset = body + size + (size & 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_signature_at_start_and_inside_window() {
        assert!(detect_sp_midi(&[0xF0, 0x05, 0x7F, 0x7F, 0x0B, 0x01]));

        let mut data = vec![0u8; 600];
        data[300..306].copy_from_slice(&[0xF0, 0x00, 0x7F, 0x10, 0x0B, 0x01]);
        assert!(detect_sp_midi(&data));
    }

    #[test]
    fn ignores_signature_beyond_search_window() {
        let mut data = vec![0u8; 1024];
        data[600..606].copy_from_slice(&[0xF0, 0x00, 0x7F, 0x10, 0x0B, 0x01]);
        assert!(!detect_sp_midi(&data));
    }

    #[test]
    fn short_or_mismatched_input_is_not_sp_midi() {
        assert!(!detect_sp_midi(&[0xF0, 0x00, 0x7F, 0x00, 0x0B]));
        assert!(!detect_sp_midi(&[0xF0, 0x00, 0x7E, 0x00, 0x0B, 0x01]));
        assert!(!detect_sp_midi(b"MThd\0\0\0\x06\0\0\0\x01\0\x60"));
    }

    fn wav_header(rate: u32, channels: u16, bits: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&[1, 2, 3, 0]);
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        let block = channels * bits / 8;
        out.extend_from_slice(&(rate * block as u32).to_le_bytes());
        out.extend_from_slice(&block.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out
    }

    #[test]
    fn wav_format_skips_padded_chunks() {
        let header = wav_header(8000, 1, 8);
        assert_eq!(
            wav_format(&header),
            Some(PcmFormat {
                sample_rate: 8000,
                channels: 1,
                bits: 8
            })
        );
        assert_eq!(wav_format(&header[..header.len() - 1]), None);
        assert_eq!(wav_format(b"MThd\0\0\0\x06"), None);
    }
}
