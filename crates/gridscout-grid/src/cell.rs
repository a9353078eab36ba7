//! Grid cell value type.

use gridscout_core::{Bounds, CellKey, GeoPoint};
use serde::{Deserialize, Serialize};

/// One rectangular sub-region of the search area.
///
/// Cells are created once by the partitioner and never mutated; the
/// [`CellKey`] is the unit of completion tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCell {
    key: CellKey,
    bounds: Bounds,
    center: GeoPoint,
    zoom: u8,
}

impl SearchCell {
    pub(crate) fn new(key: CellKey, bounds: Bounds, zoom: u8) -> Self {
        Self {
            key,
            center: bounds.center(),
            bounds,
            zoom,
        }
    }

    /// Stable key used for completion tracking.
    #[must_use]
    pub fn key(&self) -> &CellKey {
        &self.key
    }

    /// 1-based row (latitude band, counted from the southern edge).
    pub fn row(&self) -> u32 {
        self.key.row()
    }

    /// 1-based column (longitude band, counted from the western edge).
    pub fn col(&self) -> u32 {
        self.key.col()
    }

    /// Sub-rectangle covered by this cell.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Midpoint of the cell; the agent searches around it.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        self.center
    }

    /// Zoom hint for the agent.
    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Map URL centered on this cell at its zoom level.
    pub fn maps_url(&self) -> String {
        format!(
            "https://www.google.com/maps/@{},{},{}z",
            self.center.lat, self.center.lng, self.zoom
        )
    }

    /// Whether `point` lies inside the cell, edges included.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        self.bounds.contains(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_center_and_url() {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 2.0).expect("valid bounds");
        let cell = SearchCell::new(CellKey::new(1, 1), bounds, 12);

        assert_eq!(cell.center(), GeoPoint::new(0.5, 1.0));
        assert_eq!(cell.maps_url(), "https://www.google.com/maps/@0.5,1,12z");
        assert_eq!(cell.key().to_string(), "1_1");
        assert!(cell.contains(GeoPoint::new(1.0, 2.0)));
    }
}
