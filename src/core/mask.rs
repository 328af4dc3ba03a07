//! Raster/mask utilities: rasterize polygons onto a pixel grid and vectorize
//! binary masks back into world-coordinate polygons.

use std::collections::HashMap;

use geo::{Area, BoundingRect, Contains, Intersects, LineString, MultiPolygon, Point, Polygon, Rect, coord};
use ndarray::Array2;

use crate::types::GeoTransform;

/// Pixel-inclusion convention when rasterizing a polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelInclusion {
    /// A pixel is inside when its center is inside (calibration/classification default)
    CenterOnly,
    /// A pixel is inside when the polygon touches any part of it (cropping)
    AllTouched,
}

/// Rasterize a polygon onto a grid: true inside, false outside.
pub fn mask_raster_by_polygon(
    dims: (usize, usize),
    transform: &GeoTransform,
    polygon: &MultiPolygon<f64>,
    inclusion: PixelInclusion,
) -> Array2<bool> {
    let (rows, cols) = dims;
    let mut mask = Array2::from_elem(dims, false);

    let Some(rect) = polygon.bounding_rect() else {
        return mask;
    };

    // restrict the scan to the polygon's pixel window
    let (c0, r0) = transform.world_to_pixel(rect.min().x, rect.min().y);
    let (c1, r1) = transform.world_to_pixel(rect.max().x, rect.max().y);
    let row_lo = r0.min(r1).floor().max(0.0) as usize;
    let row_hi = (r0.max(r1).ceil() as usize + 1).min(rows);
    let col_lo = c0.min(c1).floor().max(0.0) as usize;
    let col_hi = (c0.max(c1).ceil() as usize + 1).min(cols);

    for r in row_lo..row_hi {
        for c in col_lo..col_hi {
            let inside = match inclusion {
                PixelInclusion::CenterOnly => {
                    let (x, y) = transform.pixel_center(r, c);
                    polygon.contains(&Point::new(x, y))
                }
                PixelInclusion::AllTouched => {
                    let (x0, y0) = transform.pixel_to_world(c as f64, r as f64);
                    let (x1, y1) = transform.pixel_to_world(c as f64 + 1.0, r as f64 + 1.0);
                    let cell = Rect::new(
                        coord! { x: x0.min(x1), y: y0.min(y1) },
                        coord! { x: x0.max(x1), y: y0.max(y1) },
                    )
                    .to_polygon();
                    polygon.intersects(&cell)
                }
            };
            mask[[r, c]] = inside;
        }
    }
    mask
}

/// Vectorize a binary mask into world-coordinate polygons.
///
/// Regions are 4-connected; each region becomes one polygon with holes.
/// Polygons with an area below `min_area` are discarded. An empty mask yields
/// an empty list.
pub fn mask_to_polygons(
    mask: &Array2<bool>,
    transform: &GeoTransform,
    min_area: f64,
) -> Vec<Polygon<f64>> {
    let rings = trace_boundary_rings(mask);
    if rings.is_empty() {
        return Vec::new();
    }

    let to_world = |ring: &[(i64, i64)]| -> LineString<f64> {
        LineString::from(
            ring.iter()
                .map(|&(c, r)| transform.pixel_to_world(c as f64, r as f64))
                .collect::<Vec<_>>(),
        )
    };

    // positively-oriented rings (pixel space) are region exteriors, the rest
    // are holes to be attached to whichever exterior encloses them
    let mut shells: Vec<(Polygon<f64>, Vec<LineString<f64>>)> = Vec::new();
    let mut holes: Vec<(Point<f64>, LineString<f64>)> = Vec::new();
    for ring in &rings {
        if pixel_signed_area(ring) > 0.0 {
            shells.push((Polygon::new(to_world(ring), vec![]), Vec::new()));
        } else {
            let rep = hole_interior_point(ring, transform);
            holes.push((rep, to_world(ring)));
        }
    }

    for (rep, ring) in holes {
        if let Some((_, ring_holes)) = shells
            .iter_mut()
            .find(|(shell, _)| shell.contains(&rep))
        {
            ring_holes.push(ring);
        }
    }

    shells
        .into_iter()
        .map(|(shell, ring_holes)| {
            let (exterior, _) = shell.into_inner();
            Polygon::new(exterior, ring_holes)
        })
        .filter(|p| p.unsigned_area() >= min_area)
        .collect()
}

/// Reduce a collection to its largest member by an area measure. NaN areas
/// rank below everything else.
pub fn largest_by_area<T>(items: Vec<T>, area: impl Fn(&T) -> f64) -> Option<T> {
    let key = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    items
        .into_iter()
        .max_by(|a, b| key(area(a)).total_cmp(&key(area(b))))
}

/// Reduce a polygon set to its largest member by area
pub fn largest_polygon(polygons: Vec<Polygon<f64>>) -> Option<Polygon<f64>> {
    largest_by_area(polygons, |p| p.unsigned_area())
}

/// Trace closed boundary rings on the pixel-corner lattice. Edges are
/// directed with the masked region on their counterclockwise side, so
/// exterior rings and hole rings come out with opposite orientations.
fn trace_boundary_rings(mask: &Array2<bool>) -> Vec<Vec<(i64, i64)>> {
    let (rows, cols) = mask.dim();
    let masked = |r: i64, c: i64| -> bool {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]]
    };

    // start vertex -> outgoing edge ends; vertices are (col, row) corners
    let mut edges: HashMap<(i64, i64), Vec<(i64, i64)>> = HashMap::new();
    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            if !masked(r, c) {
                continue;
            }
            if !masked(r - 1, c) {
                edges.entry((c, r)).or_default().push((c + 1, r));
            }
            if !masked(r, c + 1) {
                edges.entry((c + 1, r)).or_default().push((c + 1, r + 1));
            }
            if !masked(r + 1, c) {
                edges.entry((c + 1, r + 1)).or_default().push((c, r + 1));
            }
            if !masked(r, c - 1) {
                edges.entry((c, r + 1)).or_default().push((c, r));
            }
        }
    }

    let mut rings = Vec::new();
    while let Some(&start) = edges.keys().next() {
        let Some(first) = take_edge(&mut edges, start, None) else {
            break;
        };
        let mut ring = vec![start, first];
        let mut prev = start;
        let mut current = first;
        while current != start {
            let incoming = (current.0 - prev.0, current.1 - prev.1);
            let Some(next) = take_edge(&mut edges, current, Some(incoming)) else {
                break;
            };
            ring.push(next);
            prev = current;
            current = next;
        }
        if current == start {
            rings.push(ring);
        }
    }
    rings
}

/// Remove and return one outgoing edge at `from`. At pinch corners shared by
/// diagonally-touching regions the sharpest counterclockwise turn is taken,
/// which keeps 4-connected regions separate.
fn take_edge(
    edges: &mut HashMap<(i64, i64), Vec<(i64, i64)>>,
    from: (i64, i64),
    incoming: Option<(i64, i64)>,
) -> Option<(i64, i64)> {
    let outs = edges.get_mut(&from)?;
    let idx = match incoming {
        Some(inc) if outs.len() > 1 => {
            let mut best = 0;
            let mut best_cross = i64::MIN;
            for (i, out) in outs.iter().enumerate() {
                let dir = (out.0 - from.0, out.1 - from.1);
                let cross = inc.0 * dir.1 - inc.1 * dir.0;
                if cross > best_cross {
                    best_cross = cross;
                    best = i;
                }
            }
            best
        }
        _ => 0,
    };
    let end = outs.swap_remove(idx);
    if outs.is_empty() {
        edges.remove(&from);
    }
    Some(end)
}

/// Shoelace area of a closed ring in (col, row) pixel space
fn pixel_signed_area(ring: &[(i64, i64)]) -> f64 {
    let mut sum = 0i64;
    for w in ring.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        sum += x0 * y1 - x1 * y0;
    }
    sum as f64 / 2.0
}

/// A world point strictly inside the region enclosed by a hole ring: the cell
/// diagonally inside its topmost-left corner.
fn hole_interior_point(ring: &[(i64, i64)], transform: &GeoTransform) -> Point<f64> {
    let (c, r) = ring
        .iter()
        .min_by_key(|&&(c, r)| (r, c))
        .copied()
        .unwrap_or((0, 0));
    let (x, y) = transform.pixel_center(r as usize, c as usize);
    Point::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn grid() -> GeoTransform {
        // 3 m pixels, north-up, 10x10 raster spanning (0,0)-(30,30)
        GeoTransform::north_up(0.0, 30.0, 3.0, -3.0)
    }

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min_x, y: min_y),
            (x: max_x, y: min_y),
            (x: max_x, y: max_y),
            (x: min_x, y: max_y),
            (x: min_x, y: min_y),
        ]])
    }

    #[test]
    fn test_rasterize_center_only() {
        let poly = square(6.0, 6.0, 15.0, 15.0);
        let mask = mask_raster_by_polygon((10, 10), &grid(), &poly, PixelInclusion::CenterOnly);
        // pixel centers at 7.5, 10.5, 13.5 in both axes fall inside
        assert_eq!(mask.iter().filter(|&&m| m).count(), 9);
    }

    #[test]
    fn test_all_touched_wider_than_center_only() {
        let poly = square(6.5, 6.5, 8.0, 8.0);
        let center = mask_raster_by_polygon((10, 10), &grid(), &poly, PixelInclusion::CenterOnly);
        let touched = mask_raster_by_polygon((10, 10), &grid(), &poly, PixelInclusion::AllTouched);
        let n_center = center.iter().filter(|&&m| m).count();
        let n_touched = touched.iter().filter(|&&m| m).count();
        assert_eq!(n_center, 1);
        assert!(n_touched > n_center);
    }

    #[test]
    fn test_mask_polygon_round_trip_pixel_exact() {
        let poly = square(6.0, 6.0, 15.0, 15.0);
        let mask = mask_raster_by_polygon((10, 10), &grid(), &poly, PixelInclusion::CenterOnly);
        let polys = mask_to_polygons(&mask, &grid(), 0.0);
        assert_eq!(polys.len(), 1);
        let back = mask_raster_by_polygon(
            (10, 10),
            &grid(),
            &MultiPolygon::new(polys),
            PixelInclusion::CenterOnly,
        );
        assert_eq!(mask, back);
    }

    #[test]
    fn test_min_area_filters_single_pixel() {
        let mut mask = Array2::from_elem((10, 10), false);
        mask[[4, 4]] = true;
        // one 3 m pixel = 9 m^2
        assert_eq!(mask_to_polygons(&mask, &grid(), 8.0).len(), 1);
        assert_eq!(mask_to_polygons(&mask, &grid(), 10.0).len(), 0);
    }

    #[test]
    fn test_empty_mask_yields_no_polygons() {
        let mask = Array2::from_elem((10, 10), false);
        assert!(mask_to_polygons(&mask, &grid(), 0.0).is_empty());
    }

    #[test]
    fn test_hole_is_preserved() {
        let mut mask = Array2::from_elem((10, 10), false);
        for r in 2..7 {
            for c in 2..7 {
                mask[[r, c]] = true;
            }
        }
        mask[[4, 4]] = false;
        let polys = mask_to_polygons(&mask, &grid(), 0.0);
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].interiors().len(), 1);
        // 25 pixels minus the hole, at 9 m^2 each
        assert_relative_eq!(polys[0].unsigned_area(), 24.0 * 9.0);
    }

    #[test]
    fn test_diagonal_regions_stay_separate() {
        let mut mask = Array2::from_elem((10, 10), false);
        mask[[2, 2]] = true;
        mask[[3, 3]] = true;
        let polys = mask_to_polygons(&mask, &grid(), 0.0);
        assert_eq!(polys.len(), 2);
        for p in &polys {
            assert_relative_eq!(p.unsigned_area(), 9.0);
        }
    }

    #[test]
    fn test_largest_polygon() {
        let mut mask = Array2::from_elem((10, 10), false);
        mask[[0, 0]] = true;
        for r in 5..9 {
            for c in 5..9 {
                mask[[r, c]] = true;
            }
        }
        let polys = mask_to_polygons(&mask, &grid(), 0.0);
        assert_eq!(polys.len(), 2);
        let biggest = largest_polygon(polys).unwrap();
        assert_relative_eq!(biggest.unsigned_area(), 16.0 * 9.0);
    }

    #[test]
    fn test_largest_by_area_ranks_nan_lowest() {
        let items = vec![(f64::NAN, "degenerate"), (2.0, "small"), (5.0, "big")];
        assert_eq!(largest_by_area(items, |&(a, _)| a).unwrap().1, "big");

        let reversed = vec![(5.0, "big"), (f64::NAN, "degenerate"), (2.0, "small")];
        assert_eq!(largest_by_area(reversed, |&(a, _)| a).unwrap().1, "big");

        let only_nan = vec![(f64::NAN, "degenerate")];
        assert_eq!(largest_by_area(only_nan, |&(a, _)| a).unwrap().1, "degenerate");
    }
}
