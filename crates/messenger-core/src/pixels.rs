//! Pixel grids and the packed RGBA representation used on the wire.

use crate::wire::PAYLOAD_PIXELS;

/// Largest width or height a peer will send or reassemble.
pub const MAX_IMAGE_DIMENSION: u64 = 16_384;

/// One RGBA pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// R<<24 | G<<16 | B<<8 | A
    pub const fn pack(self) -> u32 {
        (self.r as u32) << 24 | (self.g as u32) << 16 | (self.b as u32) << 8 | self.a as u32
    }

    pub const fn unpack(word: u32) -> Self {
        Self {
            r: (word >> 24) as u8,
            g: (word >> 16) as u8,
            b: (word >> 8) as u8,
            a: word as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("image has no pixels ({width}x{height})")]
    Empty { width: usize, height: usize },

    #[error("row {row} has {got} pixels, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("image {width}x{height} exceeds maximum dimension {}", MAX_IMAGE_DIMENSION)]
    TooLarge { width: usize, height: usize },
}

/// `height` rows of `width` pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

impl PixelGrid {
    /// A transparent black grid.
    pub fn new(width: usize, height: usize) -> Result<Self, GridError> {
        check_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![Rgba::default(); width * height],
        })
    }

    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> Rgba,
    ) -> Result<Self, GridError> {
        let mut grid = Self::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                grid.pixels[y * width + x] = f(x, y);
            }
        }
        Ok(grid)
    }

    pub fn from_rows(rows: Vec<Vec<Rgba>>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        check_dimensions(width, height)?;

        let mut pixels = Vec::with_capacity(width * height);
        for (row, line) in rows.into_iter().enumerate() {
            if line.len() != width {
                return Err(GridError::Ragged {
                    row,
                    expected: width,
                    got: line.len(),
                });
            }
            pixels.extend(line);
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn row(&self, y: usize) -> &[Rgba] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [Rgba] {
        &mut self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    pub fn into_rows(self) -> Vec<Vec<Rgba>> {
        self.pixels
            .chunks(self.width)
            .map(<[Rgba]>::to_vec)
            .collect()
    }
}

fn check_dimensions(width: usize, height: usize) -> Result<(), GridError> {
    if width == 0 || height == 0 {
        return Err(GridError::Empty { width, height });
    }
    if width as u64 > MAX_IMAGE_DIMENSION || height as u64 > MAX_IMAGE_DIMENSION {
        return Err(GridError::TooLarge { width, height });
    }
    Ok(())
}

/// Number of PAYLOAD_PIXELS blocks needed to cover one row.
pub fn blocks_per_row(width: u64) -> u64 {
    width.div_ceil(PAYLOAD_PIXELS as u64)
}

/// Packets in a complete transfer: `height * ceil(width / PAYLOAD_PIXELS)`.
pub fn expected_packet_count(width: u64, height: u64) -> u64 {
    height * blocks_per_row(width)
}
