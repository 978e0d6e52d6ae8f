//! G.711 µ-law (PCMU) and the resampling between the 48 kHz device rate and
//! the 8 kHz wire rate.

pub const DEVICE_RATE: u32 = 48_000;
pub const WIRE_RATE: u32 = 8_000;
const RATIO: usize = (DEVICE_RATE / WIRE_RATE) as usize;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) as i32 | mantissa) as u8
}

pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode 8 kHz float samples.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|s| linear_to_ulaw((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
        .collect()
}

pub fn decode(payload: &[u8]) -> Vec<f32> {
    payload
        .iter()
        .map(|b| ulaw_to_linear(*b) as f32 / i16::MAX as f32)
        .collect()
}

/// 48 kHz → 8 kHz by averaging each group of six samples.
pub fn downsample(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(RATIO)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

/// 8 kHz → 48 kHz by linear interpolation.
pub fn upsample(samples: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len() * RATIO);
    for (i, &current) in samples.iter().enumerate() {
        let next = samples.get(i + 1).copied().unwrap_or(current);
        for step in 0..RATIO {
            let t = step as f32 / RATIO as f32;
            out.push(current + (next - current) * t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_known_values() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(-1), 0x7F);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN + 1), 0x00);
        assert_eq!(ulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn ulaw_error_is_bounded() {
        for pcm in (-32_000i32..32_000).step_by(97) {
            let decoded = ulaw_to_linear(linear_to_ulaw(pcm as i16)) as i32;
            // Quantization step grows with magnitude; 1/16 relative plus a floor.
            let tolerance = pcm.abs() / 16 + 8;
            assert!(
                (decoded - pcm).abs() <= tolerance,
                "pcm {pcm} decoded as {decoded}"
            );
        }
    }

    #[test]
    fn float_encode_keeps_sign_and_scale() {
        let decoded = decode(&encode(&[0.5, -0.5, 0.0]));
        assert!((decoded[0] - 0.5).abs() < 0.02);
        assert!((decoded[1] + 0.5).abs() < 0.02);
        assert!(decoded[2].abs() < 0.001);
    }

    #[test]
    fn resampling_lengths() {
        let frame_48k = vec![0.25f32; 960];
        let frame_8k = downsample(&frame_48k);
        assert_eq!(frame_8k.len(), 160);
        assert!(frame_8k.iter().all(|s| (s - 0.25).abs() < 1e-6));

        let back = upsample(&frame_8k);
        assert_eq!(back.len(), 960);
        assert!(back.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn upsample_interpolates() {
        let out = upsample(&[0.0, 0.6]);
        assert!((out[3] - 0.3).abs() < 1e-6);
        assert_eq!(out[6], 0.6);
    }
}
