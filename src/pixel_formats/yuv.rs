// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! RGB to YUV conversion matrices for planar readback.

/// Which YUV encoding planar reads produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YuvColorSpace {
    /// Full range BT.601.
    Jpeg,
    /// Limited range BT.601.
    Rec601,
    /// Limited range BT.709.
    Rec709,
    /// Y = G, U = B, V = R.
    Identity,
}

/// A 4x5 row-major color matrix. Each row computes one output channel from
/// `[r, g, b, a, 1]`, with the translate column in normalized units.
pub type ColorMatrix = [f32; 20];

const HALF: f32 = 128.0 / 255.0;
const SIXTEEN: f32 = 16.0 / 255.0;

impl YuvColorSpace {
    /// Rows are Y, U, V and a pass-through alpha row.
    pub fn rgb_to_yuv(self) -> ColorMatrix {
        let [y, u, v]: [[f32; 5]; 3] = match self {
            YuvColorSpace::Jpeg => [
                [0.299, 0.587, 0.114, 0.0, 0.0],
                [-0.168736, -0.331264, 0.5, 0.0, HALF],
                [0.5, -0.418688, -0.081312, 0.0, HALF],
            ],
            YuvColorSpace::Rec601 => [
                [0.256788, 0.504129, 0.0979059, 0.0, SIXTEEN],
                [-0.148223, -0.290993, 0.439216, 0.0, HALF],
                [0.439216, -0.367788, -0.0714274, 0.0, HALF],
            ],
            YuvColorSpace::Rec709 => [
                [0.182586, 0.614231, 0.0620071, 0.0, SIXTEEN],
                [-0.100644, -0.338572, 0.439216, 0.0, HALF],
                [0.439216, -0.398942, -0.0402735, 0.0, HALF],
            ],
            YuvColorSpace::Identity => [
                [0.0, 1.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0, 0.0],
            ],
        };
        let mut m = [0.0; 20];
        m[0..5].copy_from_slice(&y);
        m[5..10].copy_from_slice(&u);
        m[10..15].copy_from_slice(&v);
        m[18] = 1.0;
        m
    }
}

/// A matrix that writes row `row` of `base` into the alpha output and zeroes the rest.
pub(crate) fn row_to_alpha(base: &ColorMatrix, row: usize) -> ColorMatrix {
    let mut m = [0.0; 20];
    m[15..20].copy_from_slice(&base[row * 5..row * 5 + 5]);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_white_is_full_luma_neutral_chroma() {
        let m = YuvColorSpace::Jpeg.rgb_to_yuv();
        let apply = |row: usize| m[row * 5] + m[row * 5 + 1] + m[row * 5 + 2] + m[row * 5 + 4];
        assert!((apply(0) - 1.0).abs() < 1e-5);
        assert!((apply(1) - HALF).abs() < 1e-5);
        assert!((apply(2) - HALF).abs() < 1e-5);
        assert_eq!(&m[15..20], &[0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn row_to_alpha_moves_row() {
        let m = YuvColorSpace::Rec709.rgb_to_yuv();
        let u = row_to_alpha(&m, 1);
        assert!(u[..15].iter().all(|v| *v == 0.0));
        assert_eq!(&u[15..], &m[5..10]);
    }
}
