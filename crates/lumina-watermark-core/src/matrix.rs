//! Per-frame texture sample transform.

/// 4×4 column-major sample transform for the external video texture.
///
/// Recomputed by every texture import; it carries orientation and crop of the
/// current frame and has no identity across frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix(pub [f32; 16]);

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformMatrix {
    /// Identity transform.
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Vertical flip (`v -> 1 - v`), the transform used before any frame
    /// has been imported.
    pub const FLIP_VERTICAL: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 1.0,
    ]);

    /// Builds a crop transform selecting `[x0, x0 + sx] × [y0, y0 + sy]`
    /// of the texture, optionally flipped vertically.
    pub fn crop(x0: f32, y0: f32, sx: f32, sy: f32, flip_vertical: bool) -> Self {
        let (sy, ty) = if flip_vertical { (-sy, y0 + sy) } else { (sy, y0) };
        Self([
            sx, 0.0, 0.0, 0.0, //
            0.0, sy, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            x0, ty, 0.0, 1.0,
        ])
    }

    /// Element at `row`, `col`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0[col * 4 + row]
    }

    /// Applies the transform to texture coordinates `(u, v)`.
    #[inline]
    pub fn transform_uv(&self, u: f32, v: f32) -> (f32, f32) {
        let m = &self.0;
        let x = m[0] * u + m[4] * v + m[12];
        let y = m[1] * u + m[5] * v + m[13];
        let w = m[3] * u + m[7] * v + m[15];
        if w != 0.0 && w != 1.0 {
            (x / w, y / w)
        } else {
            (x, y)
        }
    }

    /// Returns true if every element is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_noop() {
        assert_eq!(TransformMatrix::IDENTITY.transform_uv(0.25, 0.75), (0.25, 0.75));
    }

    #[test]
    fn test_flip_vertical() {
        let m = TransformMatrix::FLIP_VERTICAL;
        assert_eq!(m.transform_uv(0.0, 0.0), (0.0, 1.0));
        assert_eq!(m.transform_uv(1.0, 1.0), (1.0, 0.0));
        assert_eq!(m.get(1, 3), 1.0);
    }

    #[test]
    fn test_crop_matches_flip_for_full_frame() {
        assert_eq!(
            TransformMatrix::crop(0.0, 0.0, 1.0, 1.0, true),
            TransformMatrix::FLIP_VERTICAL
        );
        let half = TransformMatrix::crop(0.5, 0.0, 0.5, 1.0, false);
        assert_eq!(half.transform_uv(0.0, 0.5), (0.5, 0.5));
        assert_eq!(half.transform_uv(1.0, 0.5), (1.0, 0.5));
    }
}
