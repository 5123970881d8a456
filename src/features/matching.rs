//! Brute-force descriptor matching with a next-best-ratio test.

use super::descriptor::Descriptor;

/// Match two descriptor sets symmetrically.
///
/// A pair `(i, j)` is kept when `j` is the best match for `i`, `i` is the best
/// match for `j`, the distance is at most `max_dist`, and the second-best
/// candidate is at least `test_next_best` times farther away.
pub fn match_descriptors(
    descs_a: &[Descriptor],
    descs_b: &[Descriptor],
    max_dist: u32,
    test_next_best: f64,
    matches: &mut Vec<(usize, usize)>,
) {
    matches.clear();
    if descs_a.is_empty() || descs_b.is_empty() {
        return;
    }

    let forward: Vec<Option<usize>> = descs_a
        .iter()
        .map(|d| best_match(d, descs_b, max_dist, test_next_best))
        .collect();
    let backward: Vec<Option<usize>> = descs_b
        .iter()
        .map(|d| best_match(d, descs_a, max_dist, test_next_best))
        .collect();

    for (i, fwd) in forward.iter().enumerate() {
        if let Some(j) = fwd {
            if backward[*j] == Some(i) {
                matches.push((i, *j));
            }
        }
    }
}

/// Best candidate index in `pool`, or `None` if the distance or ratio test fails.
fn best_match(
    query: &Descriptor,
    pool: &[Descriptor],
    max_dist: u32,
    test_next_best: f64,
) -> Option<usize> {
    let mut best = u32::MAX;
    let mut second = u32::MAX;
    let mut best_idx = None;

    for (idx, cand) in pool.iter().enumerate() {
        let d = query.distance(cand);
        if d < best {
            second = best;
            best = d;
            best_idx = Some(idx);
        } else if d < second {
            second = d;
        }
    }

    if best > max_dist {
        return None;
    }
    if (second as f64) < (best as f64) * test_next_best {
        return None;
    }
    best_idx
}
