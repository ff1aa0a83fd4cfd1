// launch.rs — Parallel decomposition of per-pixel work.
//
// A launch is a (block, grid) pair:
//
//   block — units of work per block (x, y, z). One unit = one pixel.
//   grid  — blocks per launch (x, y), derived by ceiling division so the
//           grid always covers the image:
//
//             grid.x = ceil(width  / block.x)
//             grid.y = ceil(height / block.y)
//
// When the image is not a multiple of the block size the last block row and
// column overshoot. Units outside the image do nothing — the compute kernel
// guards on `x >= width || y >= height`.
//
// On the wgpu backend a block is a workgroup and the grid is the dispatch
// size; block dimensions are baked into the WGSL source per pipeline.

use std::fmt;

use serde::Serialize;

/// Units of work per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockShape {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockShape {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        BlockShape { x, y, z }
    }

    /// Square 2D block (n × n × 1).
    pub const fn square(n: u32) -> Self {
        BlockShape { x: n, y: n, z: 1 }
    }

    /// Total units of work per block (x * y * z), saturating at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y).saturating_mul(self.z)
    }
}

impl fmt::Display for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}×{} ({} units)", self.x, self.y, self.z, self.total())
    }
}

/// Blocks per launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridShape {
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.x, self.y)
    }
}

/// A complete launch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchConfig {
    pub block: BlockShape,
    pub grid: GridShape,
}

impl LaunchConfig {
    /// Derive the grid that covers a `width × height` image with `block`.
    /// Extents beyond `u32::MAX` saturate, so the result may not cover them;
    /// check with [`LaunchConfig::covers`].
    ///
    /// # Panics
    /// Panics if `block.x` or `block.y` is zero.
    pub fn covering(block: BlockShape, width: usize, height: usize) -> Self {
        assert!(block.x > 0 && block.y > 0, "block dimensions must be non-zero (got {block})");
        LaunchConfig {
            block,
            grid: GridShape {
                x: saturating_u32(width).div_ceil(block.x),
                y: saturating_u32(height).div_ceil(block.y),
            },
        }
    }

    /// Total units of work launched, including overshoot.
    pub fn total_units(&self) -> u64 {
        let b = self.block;
        [b.x, b.y, b.z, self.grid.x, self.grid.y]
            .into_iter()
            .fold(1u64, |acc, n| acc.saturating_mul(u64::from(n)))
    }

    /// True when every pixel of a `width × height` image is assigned a unit.
    pub fn covers(&self, width: usize, height: usize) -> bool {
        self.block.x as u64 * self.grid.x as u64 >= width as u64
            && self.block.y as u64 * self.grid.y as u64 >= height as u64
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} grid {}", self.block, self.grid)
    }
}

/// A block shape with a display name, as offered for tuning/benchmarking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedLaunchConfig {
    pub name: String,
    pub block: BlockShape,
}

impl NamedLaunchConfig {
    pub fn new(name: impl Into<String>, block: BlockShape) -> Self {
        NamedLaunchConfig { name: name.into(), block }
    }

    /// Resolve against an image size.
    pub fn for_image(&self, width: usize, height: usize) -> LaunchConfig {
        LaunchConfig::covering(self.block, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covering_exact() {
        let cfg = LaunchConfig::covering(BlockShape::square(16), 640, 480);
        assert_eq!(cfg.grid, GridShape { x: 40, y: 30 });
        assert!(cfg.covers(640, 480));
    }

    #[test]
    fn test_covering_ceiling() {
        // 100 / 8 = 12.5 → 13 blocks; the last one covers pixels 96..104.
        let cfg = LaunchConfig::covering(BlockShape::square(8), 100, 100);
        assert_eq!(cfg.grid, GridShape { x: 13, y: 13 });
        assert_eq!(cfg.total_units(), 13 * 13 * 64);
        assert!(cfg.covers(100, 100));
    }

    #[test]
    fn test_covering_tiny_image() {
        let cfg = LaunchConfig::covering(BlockShape::square(32), 1, 1);
        assert_eq!(cfg.grid, GridShape { x: 1, y: 1 });
    }

    #[test]
    fn test_undersized_grid_does_not_cover() {
        let cfg = LaunchConfig {
            block: BlockShape::square(8),
            grid: GridShape { x: 1, y: 2 },
        };
        assert!(!cfg.covers(16, 16));
        assert!(cfg.covers(8, 16));
    }

    #[test]
    fn test_block_total() {
        assert_eq!(BlockShape::new(16, 8, 1).total(), 128);
        assert_eq!(BlockShape::square(32).total(), 1024);
    }

    #[test]
    fn test_block_total_saturates() {
        assert_eq!(BlockShape::new(65536, 65536, 1).total(), u32::MAX);
        assert_eq!(BlockShape::new(u32::MAX, 2, 2).total(), u32::MAX);
        let cfg = LaunchConfig {
            block: BlockShape::new(u32::MAX, u32::MAX, u32::MAX),
            grid: GridShape { x: u32::MAX, y: u32::MAX },
        };
        assert_eq!(cfg.total_units(), u64::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_covering_saturates_huge_extent() {
        let width = u32::MAX as usize + 10;
        let cfg = LaunchConfig::covering(BlockShape::square(1), width, 4);
        assert_eq!(cfg.grid, GridShape { x: u32::MAX, y: 4 });
        assert!(!cfg.covers(width, 4));

        let cfg = LaunchConfig::covering(BlockShape::square(2), width, 4);
        assert!(cfg.covers(width, 4));
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_block_panics() {
        let _ = LaunchConfig::covering(BlockShape::new(0, 8, 1), 10, 10);
    }
}
