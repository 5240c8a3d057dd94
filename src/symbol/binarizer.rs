//! Luminance to black/white conversion
//!
//! Images at least 40 pixels on each side use a local block threshold: the
//! image is cut into 8x8 blocks, each block gets a black point from its own
//! brightness range, and every pixel is compared against the average black
//! point of the 5x5 blocks around it. Smaller images fall back to a single
//! threshold picked from the luminance histogram.

use crate::pdf::RasterImage;

const BLOCK_SIZE_POWER: usize = 3;
const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_POWER;
const MINIMUM_DIMENSION: usize = BLOCK_SIZE * 5;
const MIN_DYNAMIC_RANGE: u32 = 24;

const LUMINANCE_BITS: usize = 5;
const LUMINANCE_SHIFT: usize = 8 - LUMINANCE_BITS;
const LUMINANCE_BUCKETS: usize = 1 << LUMINANCE_BITS;

/// A grid of black (true) and white (false) pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMatrix {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl BitMatrix {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Out of range coordinates read as white
    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.bits[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize) {
        if x < self.width && y < self.height {
            self.bits[y * self.width + x] = true;
        }
    }

    /// First black pixel in row-major order, as (x, y)
    pub fn top_left_on_bit(&self) -> Option<(usize, usize)> {
        self.bits
            .iter()
            .position(|&b| b)
            .map(|i| (i % self.width, i / self.width))
    }

    /// Last black pixel in row-major order, as (x, y)
    pub fn bottom_right_on_bit(&self) -> Option<(usize, usize)> {
        self.bits
            .iter()
            .rposition(|&b| b)
            .map(|i| (i % self.width, i / self.width))
    }
}

/// Binarize an image, or `None` when no usable threshold exists
pub fn binarize(image: &RasterImage) -> Option<BitMatrix> {
    if image.width >= MINIMUM_DIMENSION && image.height >= MINIMUM_DIMENSION {
        Some(hybrid(image))
    } else {
        global_histogram(image)
    }
}

fn hybrid(image: &RasterImage) -> BitMatrix {
    let (width, height) = (image.width, image.height);
    let sub_width = width.div_ceil(BLOCK_SIZE);
    let sub_height = height.div_ceil(BLOCK_SIZE);
    let black_points = black_points(image, sub_width, sub_height);

    let mut matrix = BitMatrix::new(width, height);
    let max_y_offset = height - BLOCK_SIZE;
    let max_x_offset = width - BLOCK_SIZE;

    for y in 0..sub_height {
        let y_offset = (y << BLOCK_SIZE_POWER).min(max_y_offset);
        let top = cap(y, sub_height - 3);
        for x in 0..sub_width {
            let x_offset = (x << BLOCK_SIZE_POWER).min(max_x_offset);
            let left = cap(x, sub_width - 3);

            let mut sum = 0u32;
            for row in &black_points[top - 2..=top + 2] {
                sum += row[left - 2..=left + 2].iter().sum::<u32>();
            }
            let threshold = sum / 25;

            for yy in 0..BLOCK_SIZE {
                for xx in 0..BLOCK_SIZE {
                    let (px, py) = (x_offset + xx, y_offset + yy);
                    if image.luminance(px, py) as u32 <= threshold {
                        matrix.set(px, py);
                    }
                }
            }
        }
    }

    matrix
}

/// Clamp a block index so the 5x5 neighbourhood stays inside the grid
fn cap(value: usize, max: usize) -> usize {
    if value < 2 {
        2
    } else {
        value.min(max)
    }
}

/// One black point per 8x8 block
fn black_points(image: &RasterImage, sub_width: usize, sub_height: usize) -> Vec<Vec<u32>> {
    let max_y_offset = image.height - BLOCK_SIZE;
    let max_x_offset = image.width - BLOCK_SIZE;
    let mut points = vec![vec![0u32; sub_width]; sub_height];

    for y in 0..sub_height {
        let y_offset = (y << BLOCK_SIZE_POWER).min(max_y_offset);
        for x in 0..sub_width {
            let x_offset = (x << BLOCK_SIZE_POWER).min(max_x_offset);

            let (mut sum, mut min, mut max) = (0u32, u32::MAX, 0u32);
            for yy in 0..BLOCK_SIZE {
                for xx in 0..BLOCK_SIZE {
                    let pixel = image.luminance(x_offset + xx, y_offset + yy) as u32;
                    sum += pixel;
                    min = min.min(pixel);
                    max = max.max(pixel);
                }
            }

            let mut average = sum >> (2 * BLOCK_SIZE_POWER);
            if max - min <= MIN_DYNAMIC_RANGE {
                // Flat block: assume it is background unless the blocks
                // above and to the left say it sits inside a dark area
                average = min / 2;
                if y > 0 && x > 0 {
                    let neighbours =
                        (points[y - 1][x] + 2 * points[y][x - 1] + points[y - 1][x - 1]) / 4;
                    if min < neighbours {
                        average = neighbours;
                    }
                }
            }
            points[y][x] = average;
        }
    }

    points
}

fn global_histogram(image: &RasterImage) -> Option<BitMatrix> {
    let (width, height) = (image.width, image.height);
    let mut buckets = [0u32; LUMINANCE_BUCKETS];

    // Sample four rows across the middle three fifths of the image
    for y in 1..5 {
        let row = height * y / 5;
        for x in width / 5..width * 4 / 5 {
            buckets[(image.luminance(x, row) as usize) >> LUMINANCE_SHIFT] += 1;
        }
    }

    let black_point = estimate_black_point(&buckets)?;
    let mut matrix = BitMatrix::new(width, height);
    for y in 0..height {
        for x in 0..width {
            if (image.luminance(x, y) as u32) < black_point {
                matrix.set(x, y);
            }
        }
    }
    Some(matrix)
}

/// Threshold at the deepest valley between the two main histogram peaks
fn estimate_black_point(buckets: &[u32; LUMINANCE_BUCKETS]) -> Option<u32> {
    let mut first_peak = 0;
    let mut first_peak_size = 0;
    let mut max_bucket_count = 0;
    for (x, &count) in buckets.iter().enumerate() {
        if count > first_peak_size {
            first_peak = x;
            first_peak_size = count;
        }
        max_bucket_count = max_bucket_count.max(count);
    }

    let mut second_peak = 0;
    let mut second_peak_score = 0u64;
    for (x, &count) in buckets.iter().enumerate() {
        let distance = x.abs_diff(first_peak) as u64;
        let score = count as u64 * distance * distance;
        if score > second_peak_score {
            second_peak = x;
            second_peak_score = score;
        }
    }
    // Only one populated bucket
    if second_peak_score == 0 {
        return None;
    }

    if first_peak > second_peak {
        std::mem::swap(&mut first_peak, &mut second_peak);
    }
    if second_peak - first_peak <= LUMINANCE_BUCKETS / 16 {
        return None;
    }

    let mut best_valley = second_peak - 1;
    let mut best_valley_score = -1i64;
    for x in (first_peak + 1..second_peak).rev() {
        let from_first = (x - first_peak) as i64;
        let score = from_first
            * from_first
            * (second_peak - x) as i64
            * (max_bucket_count - buckets[x]) as i64;
        if score > best_valley_score {
            best_valley = x;
            best_valley_score = score;
        }
    }

    Some((best_valley << LUMINANCE_SHIFT) as u32)
}
