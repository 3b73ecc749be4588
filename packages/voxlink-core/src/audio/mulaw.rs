//! ITU-T G.711 μ-law companding.
//!
//! Telephony carriers deliver 8-bit μ-law samples; the model wants linear
//! 16-bit PCM. These conversions are the standard G.711 algorithm (bias 0x84,
//! 8 segments, 4-bit mantissa) and are exact inverses up to the μ-law
//! quantization step.

/// Companding bias added before segment search (G.711).
const BIAS: i32 = 0x84;

/// Clip level for linear input. Values above this saturate to the top
/// μ-law code instead of wrapping.
const CLIP: i32 = 32_635;

/// Encodes one linear 16-bit sample to its μ-law code.
#[inline]
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = i32::from(sample).abs().min(CLIP);
    magnitude += BIAS;

    // Segment = position of the highest set bit in bits 7..14.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        mask >>= 1;
        exponent -= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decodes one μ-law code to a linear 16-bit sample.
#[inline]
pub fn ulaw_to_linear(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = (code >> 4) & 0x07;
    let mantissa = i32::from(code & 0x0F);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Decodes a μ-law byte slice into linear samples.
pub fn decode_slice(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| ulaw_to_linear(b)).collect()
}

/// Encodes linear samples into μ-law bytes.
pub fn encode_slice(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| linear_to_ulaw(s)).collect()
}
