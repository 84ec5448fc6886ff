use serde::{Deserialize, Serialize};

/// Colormap used to turn a scalar field into RGB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    /// Perceptually uniform black → purple → orange → pale yellow.
    #[default]
    Magma,
    /// Perceptually uniform purple → teal → yellow.
    Viridis,
    /// Blue → cyan → yellow → red (OpenCV `COLORMAP_JET`).
    Jet,
    /// Linear grayscale.
    Gray,
}

// Polynomial fits of the matplotlib colormaps, degree 6, per channel.
const MAGMA: [[f32; 3]; 7] = [
    [-0.002_136_485, -0.000_749_655, -0.005_386_128],
    [0.251_660_54, 0.677_523_24, 2.494_026_6],
    [8.353_717, -3.577_719_5, 0.314_467_9],
    [-27.668_733, 14.264_731, -13.649_213],
    [52.176_14, -27.943_606, 12.944_169],
    [-50.768_525, 29.046_583, 4.234_153],
    [18.655_705, -11.489_774, -5.601_961_5],
];

const VIRIDIS: [[f32; 3]; 7] = [
    [0.277_727_33, 0.005_407_344_5, 0.334_099_8],
    [0.105_093_04, 1.404_613_5, 1.384_590_1],
    [-0.330_861_83, 0.214_847_56, 0.095_095_16],
    [-4.634_230_6, -5.799_101, -19.332_441],
    [6.228_27, 14.179_933, 56.690_55],
    [4.776_385, -13.745_145, -65.353_035],
    [-5.435_456, 4.645_852_6, 26.312_435],
];

impl Colormap {
    /// Map `t` ∈ [0, 1] to RGB [0, 255]. `t` outside the range is clamped.
    ///
    /// # Example
    /// ```
    /// use dx_core::color::Colormap;
    /// assert_eq!(Colormap::Gray.map(1.0), (255, 255, 255));
    /// assert_eq!(Colormap::Jet.map(0.0), (0, 0, 128));
    /// let (r, g, b) = Colormap::Magma.map(0.0);
    /// assert!(r < 5 && g < 5 && b < 5);
    /// ```
    #[inline]
    #[must_use]
    pub fn map(self, t: f32) -> (u8, u8, u8) {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Self::Magma => polynomial(&MAGMA, t),
            Self::Viridis => polynomial(&VIRIDIS, t),
            Self::Jet => jet(t),
            Self::Gray => {
                let v = to_byte(t);
                (v, v, v)
            }
        }
    }

    /// 256-entry lookup table, index = quantized intensity.
    #[must_use]
    pub fn lut(self) -> [(u8, u8, u8); 256] {
        let mut lut = [(0u8, 0u8, 0u8); 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = self.map(i as f32 / 255.0);
        }
        lut
    }
}

fn polynomial(coeffs: &[[f32; 3]; 7], t: f32) -> (u8, u8, u8) {
    let mut out = [0.0f32; 3];
    for (ch, slot) in out.iter_mut().enumerate() {
        // Horner
        let mut acc = coeffs[6][ch];
        for k in (0..6).rev() {
            acc = acc * t + coeffs[k][ch];
        }
        *slot = acc;
    }
    (to_byte(out[0]), to_byte(out[1]), to_byte(out[2]))
}

fn jet(t: f32) -> (u8, u8, u8) {
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    (to_byte(r), to_byte(g), to_byte(b))
}

#[inline]
fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convertit sRGB [0,255] → CIELAB (illuminant D65). L ∈ [0, 100].
///
/// # Example
/// ```
/// use dx_core::color::rgb_to_lab;
/// let (l, a, b) = rgb_to_lab(255, 255, 255);
/// assert!((l - 100.0).abs() < 0.1);
/// assert!(a.abs() < 0.1 && b.abs() < 0.1);
/// ```
#[must_use]
pub fn rgb_to_lab(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let lin = |c: u8| -> f32 {
        let c = f32::from(c) / 255.0;
        if c > 0.040_45 {
            ((c + 0.055) / 1.055).powf(2.4)
        } else {
            c / 12.92
        }
    };
    let (r, g, b) = (lin(r), lin(g), lin(b));

    let x = 0.412_453 * r + 0.357_580 * g + 0.180_423 * b;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = 0.019_334 * r + 0.119_193 * g + 0.950_227 * b;

    // D65 white point
    let (xn, yn, zn) = (0.950_456, 1.0, 1.088_754);
    let f = |t: f32| -> f32 {
        if t > 0.008_856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x / xn), f(y / yn), f(z / zn));

    let l = if y / yn > 0.008_856 {
        116.0 * fy - 16.0
    } else {
        903.3 * (y / yn)
    };
    (l, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magma_endpoints_match_matplotlib() {
        let (r, g, b) = Colormap::Magma.map(1.0);
        // matplotlib magma(1.0) ≈ (252, 253, 191)
        assert!(r > 240 && g > 240, "got {r},{g},{b}");
        assert!((170..=210).contains(&b), "got {b}");
    }

    #[test]
    fn viridis_starts_purple() {
        let (r, g, b) = Colormap::Viridis.map(0.0);
        assert!(b > r && r > g, "got {r},{g},{b}");
    }

    #[test]
    fn jet_is_red_at_top() {
        assert_eq!(Colormap::Jet.map(1.0), (128, 0, 0));
        assert_eq!(Colormap::Jet.map(0.5), (128, 255, 128));
    }

    #[test]
    fn lut_is_monotonic_for_gray() {
        let lut = Colormap::Gray.lut();
        for w in lut.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
    }

    #[test]
    fn lab_black_and_red() {
        let (l, _, _) = rgb_to_lab(0, 0, 0);
        assert!(l.abs() < 1e-3);
        let (l, a, b) = rgb_to_lab(255, 0, 0);
        // skimage: (53.24, 80.09, 67.20)
        assert!((l - 53.24).abs() < 0.5, "L={l}");
        assert!((a - 80.09).abs() < 1.0, "a={a}");
        assert!((b - 67.20).abs() < 1.0, "b={b}");
    }
}
