//! Module grid sampling for unrotated, unskewed symbols
//!
//! Certificates embed the symbol as a clean raster: axis aligned, square
//! modules, possibly cropped right up to the finder patterns. The grid is
//! recovered from the outermost black pixels and the module size measured
//! across the top-left finder pattern.

use super::binarizer::BitMatrix;

/// Smallest and largest symbol side in modules
pub const MIN_DIMENSION: usize = 21;
pub const MAX_DIMENSION: usize = 177;

/// Sample one bit per module, or `None` when the black pixels do not form a
/// plausible square symbol
pub fn extract_pure_bits(image: &BitMatrix) -> Option<BitMatrix> {
    let (left, top) = image.top_left_on_bit()?;
    let (mut right, bottom) = image.bottom_right_on_bit()?;
    let module_size = module_size((left, top), image)?;

    if left >= right || top >= bottom {
        return None;
    }
    if bottom - top != right - left {
        // The last row may end before the right edge; trust the height
        right = left + (bottom - top);
        if right >= image.width() {
            return None;
        }
    }

    let matrix_width = ((right - left + 1) as f32 / module_size).round() as usize;
    let matrix_height = ((bottom - top + 1) as f32 / module_size).round() as usize;
    if matrix_width == 0 || matrix_height == 0 || matrix_width != matrix_height {
        return None;
    }
    let dimension = matrix_width;
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dimension) || dimension % 4 != 1 {
        return None;
    }

    // Sample at module centres, pulling back if that overshoots the symbol
    let nudge = (module_size / 2.0) as usize;
    let mut top = top + nudge;
    let mut left = left + nudge;
    let span = ((dimension - 1) as f32 * module_size) as usize;

    let too_far_right = (left + span).saturating_sub(right);
    if too_far_right > 0 {
        if too_far_right > nudge {
            return None;
        }
        left -= too_far_right;
    }
    let too_far_down = (top + span).saturating_sub(bottom);
    if too_far_down > 0 {
        if too_far_down > nudge {
            return None;
        }
        top -= too_far_down;
    }

    let mut bits = BitMatrix::new(dimension, dimension);
    for y in 0..dimension {
        let row = top + (y as f32 * module_size) as usize;
        for x in 0..dimension {
            if image.get(left + (x as f32 * module_size) as usize, row) {
                bits.set(x, y);
            }
        }
    }
    Some(bits)
}

/// Walk the diagonal from the top-left corner through the finder pattern.
/// Its 1:1:3:1:1 rings produce five colour changes over seven modules.
fn module_size(start: (usize, usize), image: &BitMatrix) -> Option<f32> {
    let (mut x, mut y) = start;
    let mut in_black = true;
    let mut transitions = 0;
    while x < image.width() && y < image.height() {
        if in_black != image.get(x, y) {
            transitions += 1;
            if transitions == 5 {
                break;
            }
            in_black = !in_black;
        }
        x += 1;
        y += 1;
    }
    if x == image.width() || y == image.height() {
        return None;
    }
    Some((x - start.0) as f32 / 7.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Draw a module grid at `scale` pixels per module with a white border
    fn render(modules: &BitMatrix, scale: usize, border: usize) -> BitMatrix {
        let side = modules.width() * scale + 2 * border;
        let mut image = BitMatrix::new(side, side);
        for y in 0..side {
            for x in 0..side {
                if x < border || y < border {
                    continue;
                }
                if modules.get((x - border) / scale, (y - border) / scale) {
                    image.set(x, y);
                }
            }
        }
        image
    }

    /// Three finder patterns on a 21x21 grid with one extra dark module
    fn finder_grid() -> BitMatrix {
        let mut grid = BitMatrix::new(21, 21);
        for (ox, oy) in [(0, 0), (14, 0), (0, 14)] {
            for y in 0..7 {
                for x in 0..7 {
                    let ring = x == 0 || x == 6 || y == 0 || y == 6;
                    let core = (2..=4).contains(&x) && (2..=4).contains(&y);
                    if ring || core {
                        grid.set(ox + x, oy + y);
                    }
                }
            }
        }
        grid.set(20, 20);
        grid.set(10, 8);
        grid
    }

    #[test]
    fn test_samples_grid_at_any_scale() {
        let grid = finder_grid();
        for (scale, border) in [(1, 0), (3, 0), (4, 7), (7, 2)] {
            let bits = extract_pure_bits(&render(&grid, scale, border)).unwrap();
            assert_eq!(bits, grid, "scale {} border {}", scale, border);
        }
    }

    #[test]
    fn test_rejects_empty_and_implausible_shapes() {
        assert!(extract_pure_bits(&BitMatrix::new(30, 30)).is_none());

        // A lone dot has no finder pattern to measure
        let mut dot = BitMatrix::new(30, 30);
        dot.set(10, 10);
        assert!(extract_pure_bits(&dot).is_none());

        // A solid block never changes colour along the diagonal
        let mut block = BitMatrix::new(40, 40);
        for y in 5..35 {
            for x in 5..35 {
                block.set(x, y);
            }
        }
        assert!(extract_pure_bits(&block).is_none());
    }

    #[test]
    fn test_rejects_invalid_dimension() {
        // 23 modules is not a symbol size
        let mut grid = BitMatrix::new(23, 23);
        let reference = finder_grid();
        for y in 0..21 {
            for x in 0..21 {
                if reference.get(x, y) {
                    grid.set(x, y);
                }
            }
        }
        grid.set(22, 22);
        assert!(extract_pure_bits(&render(&grid, 2, 1)).is_none());
    }
}
