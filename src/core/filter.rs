//! Morphological cleanup for binary masks: majority (median) filtering to
//! knock out speckle, and flood-fill based hole filling.

use std::collections::VecDeque;

use ndarray::Array2;

/// Median filter for a 0/1 mask with an odd square kernel.
///
/// Pixels outside the array count as zero, so features touching the border
/// erode the way a zero-padded median filter erodes them. Implemented with a
/// summed-area table, so the cost is independent of kernel size.
pub fn median_filter_binary(mask: &Array2<u8>, kernel: usize) -> Array2<u8> {
    debug_assert!(kernel % 2 == 1, "kernel must be odd");
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 || kernel <= 1 {
        return mask.clone();
    }
    let half = (kernel / 2) as isize;

    // integral[r][c] = number of ones in mask[0..r, 0..c]
    let mut integral = Array2::<u32>::zeros((rows + 1, cols + 1));
    for r in 0..rows {
        let mut row_sum = 0u32;
        for c in 0..cols {
            row_sum += mask[[r, c]] as u32;
            integral[[r + 1, c + 1]] = integral[[r, c + 1]] + row_sum;
        }
    }

    let window_sum = |r0: isize, c0: isize, r1: isize, c1: isize| -> u32 {
        let r0 = r0.clamp(0, rows as isize) as usize;
        let c0 = c0.clamp(0, cols as isize) as usize;
        let r1 = r1.clamp(0, rows as isize) as usize;
        let c1 = c1.clamp(0, cols as isize) as usize;
        integral[[r1, c1]] + integral[[r0, c0]] - integral[[r0, c1]] - integral[[r1, c0]]
    };

    // the window always holds kernel*kernel samples because out-of-bounds
    // samples are zeros
    let majority = (kernel * kernel / 2) as u32;
    let mut out = Array2::<u8>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let ones = window_sum(
                r as isize - half,
                c as isize - half,
                r as isize + half + 1,
                c as isize + half + 1,
            );
            out[[r, c]] = (ones > majority) as u8;
        }
    }
    out
}

/// Fill enclosed zero regions of a 0/1 mask.
///
/// Zeros reachable from the array border through 4-connected zero paths stay
/// zero; every other zero becomes one.
pub fn fill_holes(mask: &Array2<u8>) -> Array2<u8> {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return mask.clone();
    }

    let mut outside = Array2::<bool>::from_elem((rows, cols), false);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    let mut seed = |r: usize, c: usize, outside: &mut Array2<bool>, queue: &mut VecDeque<(usize, usize)>| {
        if mask[[r, c]] == 0 && !outside[[r, c]] {
            outside[[r, c]] = true;
            queue.push_back((r, c));
        }
    };
    for c in 0..cols {
        seed(0, c, &mut outside, &mut queue);
        seed(rows - 1, c, &mut outside, &mut queue);
    }
    for r in 0..rows {
        seed(r, 0, &mut outside, &mut queue);
        seed(r, cols - 1, &mut outside, &mut queue);
    }

    while let Some((r, c)) = queue.pop_front() {
        let mut visit = |nr: usize, nc: usize| {
            if mask[[nr, nc]] == 0 && !outside[[nr, nc]] {
                outside[[nr, nc]] = true;
                queue.push_back((nr, nc));
            }
        };
        if r > 0 {
            visit(r - 1, c);
        }
        if r + 1 < rows {
            visit(r + 1, c);
        }
        if c > 0 {
            visit(r, c - 1);
        }
        if c + 1 < cols {
            visit(r, c + 1);
        }
    }

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        if mask[[r, c]] == 1 || !outside[[r, c]] {
            1
        } else {
            0
        }
    })
}
