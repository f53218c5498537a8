//! Frame-level reconstruction tests for the Theora core.

use transcode_theora::{
    CodingMode, FrameData, FrameType, Fragment, MotionVector, Plane, QuantInfo, QuantRanges,
    TheoraConfig, TheoraDecoder, TheoraError,
};

/// Quantizer info whose DC dequantization factor is 32 everywhere, so the
/// DC-only transform reproduces the DC value, and with the loop filter off.
fn identity_dc_info() -> QuantInfo {
    let flat = QuantRanges::flat([8; 64]);
    QuantInfo {
        dc_scale: [100; 64],
        ac_scale: [100; 64],
        loop_filter_limits: [0; 64],
        qi_ranges: [
            [flat.clone(), flat.clone(), flat.clone()],
            [flat.clone(), flat.clone(), flat],
        ],
    }
}

fn dc_fragment(dc: i16) -> Fragment {
    let mut coeffs = [0i16; 64];
    coeffs[0] = dc;
    Fragment::intra(coeffs)
}

fn block_value(picture: &[u8], width: usize, bx: usize, by: usize) -> Option<u8> {
    let first = picture[by * 8 * width + bx * 8];
    for y in 0..8 {
        for x in 0..8 {
            if picture[(by * 8 + y) * width + bx * 8 + x] != first {
                return None;
            }
        }
    }
    Some(first)
}

/// Decoder holding the four-block key frame with DC residuals 10, 20, 5, 0.
fn decoded_key_frame() -> TheoraDecoder {
    let config = TheoraConfig::new(16, 16).unwrap();
    let mut decoder = TheoraDecoder::new(config, &identity_dc_info()).unwrap();
    let mut frame = FrameData::blank_key_frame(decoder.layout(), 0);
    for (i, dc) in [10, 20, 5, 0].into_iter().enumerate() {
        frame.fragments[i] = dc_fragment(dc);
    }
    decoder.decode_frame(&frame).unwrap();
    decoder
}

mod key_frame_tests {
    use super::*;

    #[test]
    fn test_dc_only_key_frame() {
        let decoder = decoded_key_frame();
        let luma = decoder.picture(Plane::Y);
        assert_eq!(luma.len(), 256);

        // Block 0 has no neighbors: DC 10.
        // Block 1 predicts from the left: 10 + 20 = 30.
        // Block 2 predicts from up (10) with up-right weight 0: 10 + 5 = 15.
        // Block 3: (29 * 15 - 26 * 10 + 29 * 30) / 32 = 32.
        assert_eq!(block_value(&luma, 16, 0, 0), Some(138));
        assert_eq!(block_value(&luma, 16, 1, 0), Some(158));
        assert_eq!(block_value(&luma, 16, 0, 1), Some(143));
        assert_eq!(block_value(&luma, 16, 1, 1), Some(160));

        assert!(decoder.picture(Plane::U).iter().all(|&p| p == 128));
        assert!(decoder.picture(Plane::V).iter().all(|&p| p == 128));
    }

    #[test]
    fn test_key_frame_updates_golden() {
        let decoder = decoded_key_frame();
        assert_eq!(
            decoder.buffers().golden_frame(),
            decoder.buffers().last_frame()
        );
    }

    #[test]
    fn test_borders_replicate_edges() {
        let decoder = decoded_key_frame();
        let layout = *decoder.layout().plane(Plane::Y);
        let pix = decoder.reference().plane(Plane::Y);
        // top-left corner of the border carries block 0, bottom-right block 3
        assert_eq!(pix[0], 138);
        assert_eq!(pix[layout.buffer_len() - 1], 160);
    }
}

mod inter_frame_tests {
    use super::*;

    fn only(decoder: &TheoraDecoder, index: usize, frag: Fragment) -> FrameData {
        let mut frame = FrameData::skipped(decoder.layout(), 0);
        frame.fragments[index] = frag;
        frame
    }

    #[test]
    fn test_whole_pixel_motion() {
        let mut decoder = decoded_key_frame();
        // block 3 copies block 0: eight pixels left and up
        let frame = only(
            &decoder,
            3,
            Fragment::inter(CodingMode::InterMv, MotionVector::new(-16, -16), [0; 64]),
        );
        decoder.decode_frame(&frame).unwrap();
        let luma = decoder.picture(Plane::Y);
        assert_eq!(block_value(&luma, 16, 1, 1), Some(138));
        assert_eq!(block_value(&luma, 16, 1, 0), Some(158));
        assert_eq!(block_value(&luma, 16, 0, 1), Some(143));
    }

    #[test]
    fn test_half_pixel_motion() {
        let mut decoder = decoded_key_frame();
        // half a pixel left, eight up: first column averages blocks 0 and 1
        let frame = only(
            &decoder,
            3,
            Fragment::inter(CodingMode::InterMv, MotionVector::new(-1, -16), [0; 64]),
        );
        decoder.decode_frame(&frame).unwrap();
        let luma = decoder.picture(Plane::Y);
        for y in 8..16 {
            assert_eq!(luma[y * 16 + 8], 148);
            for x in 9..16 {
                assert_eq!(luma[y * 16 + x], 158);
            }
        }
    }

    #[test]
    fn test_golden_reference() {
        let mut decoder = decoded_key_frame();

        // overwrite block 0 with an intra block in a predicted frame
        let frame = only(&decoder, 0, dc_fragment(-40));
        decoder.decode_frame(&frame).unwrap();
        let luma = decoder.picture(Plane::Y);
        assert_eq!(block_value(&luma, 16, 0, 0), Some(88));

        // then restore it from the golden frame
        let frame = only(
            &decoder,
            0,
            Fragment::inter(CodingMode::InterGolden, MotionVector::zero(), [0; 64]),
        );
        decoder.decode_frame(&frame).unwrap();
        let luma = decoder.picture(Plane::Y);
        assert_eq!(block_value(&luma, 16, 0, 0), Some(138));
        // predicted frames leave golden alone
        assert_ne!(
            decoder.buffers().golden_frame(),
            &transcode_theora::FrameBuffer::new(decoder.layout())
        );
    }

    #[test]
    fn test_inter_dc_residual() {
        let mut decoder = decoded_key_frame();
        let mut coeffs = [0i16; 64];
        coeffs[0] = 7;
        let frame = only(
            &decoder,
            1,
            Fragment::inter(CodingMode::InterNoMv, MotionVector::zero(), coeffs),
        );
        decoder.decode_frame(&frame).unwrap();
        let luma = decoder.picture(Plane::Y);
        // no inter neighbor and no inter history: DC is the residual itself
        assert_eq!(block_value(&luma, 16, 1, 0), Some(165));
    }

    #[test]
    fn test_out_of_range_vector_fails_frame() {
        let mut decoder = decoded_key_frame();
        let before = decoder.picture(Plane::Y);
        let frame = only(
            &decoder,
            0,
            Fragment::inter(CodingMode::InterGoldenMv, MotionVector::new(0, 33), [0; 64]),
        );
        let err = decoder.decode_frame(&frame).unwrap_err();
        assert!(matches!(err, TheoraError::MotionVectorOutOfRange { .. }));
        assert_eq!(decoder.picture(Plane::Y), before);
    }

    #[test]
    fn test_predicted_frame_type_flag() {
        let decoder = decoded_key_frame();
        let frame = FrameData::skipped(decoder.layout(), 0);
        assert_eq!(frame.frame_type, FrameType::Predicted);
        assert_eq!(frame.coded_count(), 0);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_malformed_quant_info_rejected() {
        let mut info = identity_dc_info();
        info.qi_ranges[1][2].sizes = vec![30, 30];
        info.qi_ranges[1][2].base_matrices.push([8; 64]);
        let config = TheoraConfig::new(16, 16).unwrap();
        assert!(matches!(
            TheoraDecoder::new(config, &info),
            Err(TheoraError::InvalidQuantInfo(_))
        ));
    }

    #[test]
    fn test_picture_cropping() {
        let config = TheoraConfig::new(20, 12).unwrap();
        let mut decoder = TheoraDecoder::new(config, &QuantInfo::vp3_default()).unwrap();
        let frame = FrameData::blank_key_frame(decoder.layout(), 30);
        decoder.decode_frame(&frame).unwrap();
        assert_eq!(decoder.picture(Plane::Y).len(), 20 * 12);
        assert_eq!(decoder.picture(Plane::U).len(), 10 * 6);
    }
}
