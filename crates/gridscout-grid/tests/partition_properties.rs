use gridscout_core::{Bounds, GeoPoint};
use gridscout_grid::partition;

fn sample_bounds() -> Vec<Bounds> {
    vec![
        Bounds::new(0.0, 0.0, 2.0, 2.0).expect("valid"),
        Bounds::new(43.6, -79.5, 43.9, -79.2).expect("valid"),
        Bounds::new(-33.95, 151.1, -33.8, 151.3).expect("valid"),
        Bounds::new(-10.0, -170.0, 10.0, 170.0).expect("valid"),
        Bounds::new(51.4, -0.3, 51.400_3, -0.299_9).expect("valid"),
    ]
}

#[test]
fn test_cell_count_is_grid_squared() {
    for bounds in sample_bounds() {
        for n in 1..=8 {
            let cells = partition(&bounds, n, 12).expect("partition");
            assert_eq!(cells.len(), (n * n) as usize);
        }
    }
}

#[test]
fn test_cells_tile_the_box_without_gaps() {
    for bounds in sample_bounds() {
        for n in 1..=7 {
            let cells = partition(&bounds, n, 12).expect("partition");
            let n = n as usize;

            for row in 0..n {
                let band = &cells[row * n..(row + 1) * n];
                // Each row spans the full width with shared edges.
                assert_eq!(band[0].bounds().min_lng, bounds.min_lng);
                assert_eq!(band[n - 1].bounds().max_lng, bounds.max_lng);
                for pair in band.windows(2) {
                    assert_eq!(pair[0].bounds().max_lng, pair[1].bounds().min_lng);
                    assert_eq!(pair[0].bounds().min_lat, pair[1].bounds().min_lat);
                }
            }

            for col in 0..n {
                assert_eq!(cells[col].bounds().min_lat, bounds.min_lat);
                assert_eq!(cells[(n - 1) * n + col].bounds().max_lat, bounds.max_lat);
                for row in 0..n - 1 {
                    assert_eq!(
                        cells[row * n + col].bounds().max_lat,
                        cells[(row + 1) * n + col].bounds().min_lat
                    );
                }
            }

            let area: f64 = cells
                .iter()
                .map(|c| c.bounds().lat_span() * c.bounds().lng_span())
                .sum();
            let expected = bounds.lat_span() * bounds.lng_span();
            assert!((area - expected).abs() <= expected * 1e-9);
        }
    }
}

#[test]
fn test_every_interior_point_is_covered() {
    let bounds = Bounds::new(43.6, -79.5, 43.9, -79.2).expect("valid");
    let cells = partition(&bounds, 5, 12).expect("partition");

    for i in 0..=20 {
        for j in 0..=20 {
            let point = GeoPoint::new(
                bounds.min_lat + bounds.lat_span() * f64::from(i) / 20.0,
                bounds.min_lng + bounds.lng_span() * f64::from(j) / 20.0,
            );
            if !bounds.contains(point) {
                continue;
            }
            assert!(
                cells.iter().any(|c| c.contains(point)),
                "point {point} not covered"
            );
        }
    }
}

#[test]
fn test_partition_is_deterministic() {
    for bounds in sample_bounds() {
        let first = partition(&bounds, 4, 13).expect("partition");
        let second = partition(&bounds, 4, 13).expect("partition");
        assert_eq!(first, second);

        let keys: Vec<String> = first.iter().map(|c| c.key().to_string()).collect();
        let expected: Vec<String> = (1..=4)
            .flat_map(|r| (1..=4).map(move |c| format!("{r}_{c}")))
            .collect();
        assert_eq!(keys, expected);
    }
}
