use bevy::prelude::*;

use super::cell::TILE_SIZE;

/// Dimensions of the fluid grid.
///
/// Width and height are always powers of two. Depth is carried for the
/// uniform block only; the simulation is 2D and depth is always 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

impl GridSize {
    /// Rounds both dimensions up to the next power of two.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: round_dimension(width),
            height: round_dimension(height),
            depth: 1,
        }
    }

    /// Grid for a configured extent. The z axis is ignored.
    pub fn from_extent(extent: UVec3) -> Self {
        Self::new(extent.x, extent.y)
    }

    pub fn extent(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.depth)
    }

    /// Number of cells in every fluid buffer.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major buffer index of `(x, y)`.
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Whole tiles per axis. Grids below the tile size dispatch zero tiles.
    pub fn workgroups(&self) -> UVec3 {
        UVec3::new(self.width / TILE_SIZE, self.height / TILE_SIZE, 1)
    }

    /// Whether every cell is covered by a dispatch.
    pub fn is_tileable(&self) -> bool {
        self.width >= TILE_SIZE && self.height >= TILE_SIZE
    }

    /// Cell centre in normalized texture space.
    pub fn cell_uv(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn round_dimension(value: u32) -> u32 {
    value.max(1).checked_next_power_of_two().unwrap_or(1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_up_to_power_of_two() {
        let size = GridSize::new(100, 17);
        assert_eq!(size.width, 128);
        assert_eq!(size.height, 32);
        assert_eq!(size.depth, 1);

        let exact = GridSize::new(64, 64);
        assert_eq!((exact.width, exact.height), (64, 64));

        let zero = GridSize::new(0, 0);
        assert_eq!((zero.width, zero.height), (1, 1));
    }

    #[test]
    fn test_from_extent_pins_depth() {
        let size = GridSize::from_extent(UVec3::new(2000, 2048, 3));
        assert_eq!(size.extent(), UVec3::new(2048, 2048, 1));
        assert_eq!(GridSize::from_extent(UVec3::new(16, 16, 0)).depth, 1);
    }

    #[test]
    fn test_workgroups_cover_grid() {
        let size = GridSize::new(64, 128);
        assert_eq!(size.workgroups(), UVec3::new(4, 8, 1));
        assert!(size.is_tileable());
        assert_eq!(size.cell_count(), 64 * 128);
    }

    #[test]
    fn test_below_tile_dispatches_nothing() {
        let size = GridSize::new(8, 64);
        assert_eq!(size.workgroups(), UVec3::new(0, 4, 1));
        assert!(!size.is_tileable());
    }

    #[test]
    fn test_index_is_row_major() {
        let size = GridSize::new(16, 16);
        assert_eq!(size.index(0, 0), 0);
        assert_eq!(size.index(3, 0), 3);
        assert_eq!(size.index(0, 1), 16);
        assert_eq!(size.index(15, 15), 255);
    }

    #[test]
    fn test_uv_mapping() {
        let size = GridSize::new(64, 64);
        assert_eq!(size.cell_uv(0, 0), Vec2::splat(0.5 / 64.0));
        assert_eq!(size.cell_uv(63, 31), Vec2::new(63.5 / 64.0, 31.5 / 64.0));
    }
}
