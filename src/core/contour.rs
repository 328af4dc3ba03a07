//! Iso-contour extraction on a 2-D scalar field (marching squares).
//!
//! Contours come back as polylines in fractional (row, col) coordinates;
//! crossings are linearly interpolated along cell edges. Closed loops are
//! returned with the first point repeated at the end.

use std::collections::HashMap;

use ndarray::Array2;

type PixelPoint = (f64, f64);
type Segment = (PixelPoint, PixelPoint);

/// Find all contour lines of `field` at the given level.
pub fn find_contours(field: &Array2<f32>, level: f32) -> Vec<Vec<PixelPoint>> {
    let (rows, cols) = field.dim();
    if rows < 2 || cols < 2 {
        return Vec::new();
    }

    let mut segments: Vec<Segment> = Vec::new();
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            cell_segments(field, level, r, c, &mut segments);
        }
    }
    stitch_segments(&segments)
}

/// Interpolation parameter of the level crossing between two corner values
fn crossing(va: f32, vb: f32, level: f32) -> f64 {
    ((level - va) / (vb - va)) as f64
}

/// Emit the contour segments passing through the cell whose top-left sample
/// is (r, c). The ambiguous saddle cases are resolved with the cell mean.
fn cell_segments(field: &Array2<f32>, level: f32, r: usize, c: usize, out: &mut Vec<Segment>) {
    let tl = field[[r, c]];
    let tr = field[[r, c + 1]];
    let br = field[[r + 1, c + 1]];
    let bl = field[[r + 1, c]];
    if !(tl.is_finite() && tr.is_finite() && br.is_finite() && bl.is_finite()) {
        return;
    }

    let mut case = 0u8;
    if tl > level {
        case |= 1;
    }
    if tr > level {
        case |= 2;
    }
    if br > level {
        case |= 4;
    }
    if bl > level {
        case |= 8;
    }
    if case == 0 || case == 15 {
        return;
    }

    let rf = r as f64;
    let cf = c as f64;
    let top = || (rf, cf + crossing(tl, tr, level));
    let bottom = || (rf + 1.0, cf + crossing(bl, br, level));
    let left = || (rf + crossing(tl, bl, level), cf);
    let right = || (rf + crossing(tr, br, level), cf + 1.0);

    match case {
        1 => out.push((left(), top())),
        2 => out.push((top(), right())),
        3 => out.push((left(), right())),
        4 => out.push((right(), bottom())),
        6 => out.push((top(), bottom())),
        7 => out.push((left(), bottom())),
        8 => out.push((bottom(), left())),
        9 => out.push((top(), bottom())),
        11 => out.push((right(), bottom())),
        12 => out.push((right(), left())),
        13 => out.push((top(), right())),
        14 => out.push((left(), top())),
        5 => {
            if (tl + tr + br + bl) / 4.0 > level {
                out.push((top(), right()));
                out.push((left(), bottom()));
            } else {
                out.push((left(), top()));
                out.push((right(), bottom()));
            }
        }
        10 => {
            if (tl + tr + br + bl) / 4.0 > level {
                out.push((left(), top()));
                out.push((right(), bottom()));
            } else {
                out.push((top(), right()));
                out.push((left(), bottom()));
            }
        }
        _ => {}
    }
}

fn quantize(p: PixelPoint) -> (i64, i64) {
    ((p.0 * 1e6).round() as i64, (p.1 * 1e6).round() as i64)
}

/// Chain unordered segments into polylines. Open lines start at endpoints
/// with a single incident segment; whatever remains forms closed loops.
fn stitch_segments(segments: &[Segment]) -> Vec<Vec<PixelPoint>> {
    let mut incident: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, seg) in segments.iter().enumerate() {
        incident.entry(quantize(seg.0)).or_default().push(i);
        incident.entry(quantize(seg.1)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut lines: Vec<Vec<PixelPoint>> = Vec::new();

    let mut walk = |start_seg: usize, used: &mut Vec<bool>| -> Vec<PixelPoint> {
        let (a, b) = segments[start_seg];
        used[start_seg] = true;
        let mut line = vec![a, b];
        loop {
            let tail = *line.last().unwrap_or(&a);
            let key = quantize(tail);
            let Some(next) = incident
                .get(&key)
                .and_then(|ids| ids.iter().copied().find(|&i| !used[i]))
            else {
                break;
            };
            used[next] = true;
            let (p, q) = segments[next];
            line.push(if quantize(p) == key { q } else { p });
        }
        line
    };

    // open lines first so loops are not broken at arbitrary points
    for (key, ids) in incident.clone() {
        if ids.len() != 1 {
            continue;
        }
        let seg = ids[0];
        if used[seg] {
            continue;
        }
        let (a, b) = segments[seg];
        // orient the walk away from the dangling endpoint
        let start = if quantize(a) == key { (a, b) } else { (b, a) };
        used[seg] = true;
        let mut line = vec![start.0, start.1];
        loop {
            let tail = *line.last().unwrap_or(&start.0);
            let tail_key = quantize(tail);
            let Some(next) = incident
                .get(&tail_key)
                .and_then(|ids| ids.iter().copied().find(|&i| !used[i]))
            else {
                break;
            };
            used[next] = true;
            let (p, q) = segments[next];
            line.push(if quantize(p) == tail_key { q } else { p });
        }
        lines.push(line);
    }

    for i in 0..segments.len() {
        if !used[i] {
            lines.push(walk(i, &mut used));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_field<F: Fn(usize, usize) -> bool>(dims: (usize, usize), f: F) -> Array2<f32> {
        Array2::from_shape_fn(dims, |(r, c)| if f(r, c) { 1.0 } else { 0.0 })
    }

    #[test]
    fn test_uniform_field_has_no_contours() {
        assert!(find_contours(&Array2::zeros((8, 8)), 0.5).is_empty());
        assert!(find_contours(&Array2::ones((8, 8)), 0.5).is_empty());
    }

    #[test]
    fn test_half_plane_gives_straight_open_line() {
        let field = binary_field((10, 10), |_, c| c < 5);
        let lines = find_contours(&field, 0.5);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        // vertical crossing between sample columns 4 and 5
        for &(_, col) in line {
            assert!((col - 4.5).abs() < 1e-9, "col {col}");
        }
        assert_eq!(line.len(), 10);
        // open: endpoints differ
        assert_ne!(quantize(line[0]), quantize(*line.last().unwrap()));
    }

    #[test]
    fn test_block_gives_closed_loop() {
        let field = binary_field((12, 12), |r, c| (3..9).contains(&r) && (3..9).contains(&c));
        let lines = find_contours(&field, 0.5);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(quantize(line[0]), quantize(*line.last().unwrap()));
        // all crossings sit half a pixel outside the block samples
        for &(r, c) in line {
            assert!((2.5..=8.5).contains(&r));
            assert!((2.5..=8.5).contains(&c));
        }
    }

    #[test]
    fn test_disk_contour_radius() {
        let (cy, cx, rad) = (20.0f64, 20.0f64, 10.0f64);
        let field = binary_field((41, 41), |r, c| {
            let dr = r as f64 - cy;
            let dc = c as f64 - cx;
            (dr * dr + dc * dc).sqrt() <= rad
        });
        let lines = find_contours(&field, 0.5);
        assert_eq!(lines.len(), 1);
        for &(r, c) in &lines[0] {
            let d = ((r - cy).powi(2) + (c - cx).powi(2)).sqrt();
            assert!((d - rad).abs() < 1.0, "distance {d}");
        }
    }

    #[test]
    fn test_two_blobs_two_contours() {
        let field = binary_field((20, 20), |r, c| {
            ((2..6).contains(&r) && (2..6).contains(&c))
                || ((12..17).contains(&r) && (12..17).contains(&c))
        });
        assert_eq!(find_contours(&field, 0.5).len(), 2);
    }

    #[test]
    fn test_interpolated_crossing_position() {
        // values 0 and 2 around level 0.5 put the crossing a quarter of the
        // way along the edge
        let mut field = Array2::<f32>::zeros((2, 2));
        field[[0, 0]] = 2.0;
        let lines = find_contours(&field, 0.5);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.len(), 2);
        let has = |r: f64, c: f64| {
            line.iter()
                .any(|&(lr, lc)| (lr - r).abs() < 1e-9 && (lc - c).abs() < 1e-9)
        };
        assert!(has(0.0, 0.75));
        assert!(has(0.75, 0.0));
    }
}
