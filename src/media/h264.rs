//! H.264 keyframe detection on RTP payloads
//!
//! A GOP boundary is an IDR slice (NAL type 5). Single-NAL payloads carry
//! the type directly; FU-A/FU-B fragments carry the real type in the FU
//! header, and only the fragment with the start bit set opens a NAL.

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;
const FU_START_BIT: u8 = 0x80;

/// Whether an H.264 RTP payload starts an IDR picture.
pub fn is_keyframe(payload: &[u8]) -> bool {
    let Some(&header) = payload.first() else {
        return false;
    };

    let real_nal = match header & 0x1f {
        t if t <= 23 => header,
        NAL_TYPE_FU_A | NAL_TYPE_FU_B => {
            let Some(&fu_header) = payload.get(1) else {
                return false;
            };
            // continuation fragments never open a NAL
            if fu_header & FU_START_BIT == 0 {
                return false;
            }
            fu_header
        }
        _ => return false,
    };

    real_nal & 0x1f == NAL_TYPE_IDR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_nal_idr() {
        assert!(is_keyframe(&[0x65, 0x88, 0x84]));
    }

    #[test]
    fn test_single_nal_non_idr() {
        // type 1: non-IDR slice
        assert!(!is_keyframe(&[0x61, 0x9a]));
        // type 7/8: SPS and PPS are not keyframes by themselves
        assert!(!is_keyframe(&[0x67, 0x42]));
        assert!(!is_keyframe(&[0x68, 0xce]));
    }

    #[test]
    fn test_fu_a_start_of_idr() {
        // FU indicator type 28, FU header start bit + type 5
        assert!(is_keyframe(&[0x7c, 0x85, 0x00]));
    }

    #[test]
    fn test_fu_a_continuation_is_not_keyframe() {
        // same inner type but no start bit
        assert!(!is_keyframe(&[0x7c, 0x05, 0x00]));
        // end fragment
        assert!(!is_keyframe(&[0x7c, 0x45, 0x00]));
    }

    #[test]
    fn test_fu_b_start_of_idr() {
        assert!(is_keyframe(&[0x7d, 0x85, 0x00]));
    }

    #[test]
    fn test_fu_a_start_of_non_idr() {
        assert!(!is_keyframe(&[0x7c, 0x81, 0x00]));
    }

    #[test]
    fn test_stap_a_is_not_keyframe() {
        // type 24 (STAP-A) is outside both branches
        assert!(!is_keyframe(&[0x78, 0x00]));
    }

    #[test]
    fn test_short_payloads() {
        assert!(!is_keyframe(&[]));
        assert!(!is_keyframe(&[0x7c]));
    }
}
