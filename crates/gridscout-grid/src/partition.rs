//! Bounding box to search cell partitioning.

use crate::cell::SearchCell;
use crate::error::{GridError, Result};
use gridscout_core::{Bounds, CellKey, GeoPoint};

/// Largest accepted grid dimension (4096 cells).
pub const MAX_GRID_SIZE: u32 = 64;

/// Rough kilometres per degree, ignoring the Earth's curvature.
const KM_PER_DEGREE: f64 = 111.0;

/// Areas above this trigger a warning; the crawl still proceeds.
const LARGE_AREA_KM2: f64 = 1_000_000.0;

/// Split `bounds` into `grid_size × grid_size` cells in row-major order.
///
/// Row `r` covers the r-th latitude band counted from `min_lat`, column `c`
/// the c-th longitude band from `min_lng`. Adjacent cells share their edge
/// exactly and the outermost edges equal the input bounds, so the cells cover
/// the box with no gap.
///
/// # Errors
/// Returns [`GridError`] if the bounds are degenerate or out of range, the
/// grid size is outside `1..=MAX_GRID_SIZE`, or the zoom is outside `1..=21`.
pub fn partition(bounds: &Bounds, grid_size: u32, zoom: u8) -> Result<Vec<SearchCell>> {
    bounds.validate()?;
    if grid_size == 0 || grid_size > MAX_GRID_SIZE {
        return Err(GridError::InvalidGridSize {
            got: grid_size,
            max: MAX_GRID_SIZE,
        });
    }
    if !(1..=21).contains(&zoom) {
        return Err(GridError::InvalidZoom(zoom));
    }

    let n = f64::from(grid_size);
    let lat_step = bounds.lat_span() / n;
    let lng_step = bounds.lng_span() / n;

    let edge = |min: f64, max: f64, step: f64, i: u32| {
        if i == grid_size {
            max
        } else {
            min + f64::from(i) * step
        }
    };

    let mut cells = Vec::with_capacity((grid_size * grid_size) as usize);
    for i in 0..grid_size {
        for j in 0..grid_size {
            let cell_bounds = Bounds {
                min_lat: edge(bounds.min_lat, bounds.max_lat, lat_step, i),
                max_lat: edge(bounds.min_lat, bounds.max_lat, lat_step, i + 1),
                min_lng: edge(bounds.min_lng, bounds.max_lng, lng_step, j),
                max_lng: edge(bounds.min_lng, bounds.max_lng, lng_step, j + 1),
            };
            cells.push(SearchCell::new(CellKey::new(i + 1, j + 1), cell_bounds, zoom));
        }
    }

    Ok(cells)
}

/// A partitioned search area with lookup helpers.
#[derive(Debug, Clone)]
pub struct GridPartitioner {
    bounds: Bounds,
    grid_size: u32,
    zoom: u8,
    cells: Vec<SearchCell>,
}

impl GridPartitioner {
    /// Partition the area; see [`partition`].
    pub fn new(bounds: Bounds, grid_size: u32, zoom: u8) -> Result<Self> {
        let cells = partition(&bounds, grid_size, zoom)?;
        let grid = Self {
            bounds,
            grid_size,
            zoom,
            cells,
        };

        let area = grid.total_area_km2();
        if area > LARGE_AREA_KM2 {
            tracing::warn!(
                area_km2 = area,
                "Large search area - this may take a very long time"
            );
        }
        tracing::debug!(
            cells = grid.cells.len(),
            grid_size,
            zoom,
            "Created search grid"
        );

        Ok(grid)
    }

    /// The whole search area.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Cells per side.
    #[must_use]
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Zoom shared by every cell.
    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> &[SearchCell] {
        &self.cells
    }

    /// Number of cells, `grid_size²`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always `false` for a validated grid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell with `key`, or `None` if the key lies outside this grid.
    #[must_use]
    pub fn cell_by_key(&self, key: &CellKey) -> Option<&SearchCell> {
        if key.row() == 0 || key.col() == 0 || key.row() > self.grid_size || key.col() > self.grid_size
        {
            return None;
        }
        let idx = (key.row() - 1) * self.grid_size + (key.col() - 1);
        self.cells.get(idx as usize)
    }

    /// First cell in row-major order containing the point. Points on a
    /// shared edge resolve to the lower-indexed cell.
    pub fn cell_containing(&self, point: GeoPoint) -> Option<&SearchCell> {
        self.cells.iter().find(|cell| cell.contains(point))
    }

    /// The up-to-eight cells surrounding `cell`, in row-major order.
    pub fn neighbours(&self, cell: &SearchCell) -> Vec<&SearchCell> {
        let (row, col) = (i64::from(cell.row()), i64::from(cell.col()));
        let mut out = Vec::with_capacity(8);
        for dr in -1..=1_i64 {
            for dc in -1..=1_i64 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (r, c) = (row + dr, col + dc);
                if r < 1 || c < 1 {
                    continue;
                }
                if let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) {
                    if let Some(n) = self.cell_by_key(&CellKey::new(r, c)) {
                        out.push(n);
                    }
                }
            }
        }
        out
    }

    /// Approximate area of the whole box in km².
    pub fn total_area_km2(&self) -> f64 {
        self.bounds.lat_span() * KM_PER_DEGREE * self.bounds.lng_span() * KM_PER_DEGREE
    }

    /// Approximate area of one cell in km².
    pub fn cell_area_km2(&self) -> f64 {
        self.total_area_km2() / f64::from(self.grid_size * self.grid_size)
    }
}
