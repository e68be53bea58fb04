//! Match, gap and tail searches over a sliding-Pearson vector.
//!
//! The searches segment one long capture into an ordered list of pattern
//! placements: confident local maxima first, then interior matches predicted
//! inside oversized gaps, then tail probes before the first and after the
//! last confident match.
use log::debug;

use libtrace_core::errors::*;

use crate::stats::{Accumulator, Stat, STAT_AVG, STAT_DEV};

pub const ZCONF_95: f32 = 1.960;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Confident,
    GapPredictable,
    GapUnpredictable,
    Tail,
}

#[derive(Debug, Clone, Copy)]
pub struct SplitEntry {
    pub kind: SplitKind,
    pub index: usize,
    /// Predicted count of interior matches for gap entries.
    pub num: usize,
}

pub struct SearchConfig {
    pub confidence: f32,
    pub avg_len: usize,
    pub max_dev: usize,
    pub expecting: usize,
}

/// The reference pattern's spacing statistics.
#[derive(Debug, Clone)]
pub struct Reference {
    pub mean: f32,
    pub dev: f32,
}

#[derive(Default)]
pub struct SearchResult {
    pub entries: Vec<SplitEntry>,
    pub first_match: Option<usize>,
    pub last_match: Option<usize>,
    pub count_true: usize,
    pub count_predictable: usize,
    pub count_unpredictable: usize,
    pub count_tail: usize,
    pub gap_mean: f32,
    pub gap_dev: f32,
}

fn normalized(x: f32, mean: f32, dev: f32) -> f32 {
    (x - mean) / dev
}

/// Largest Pearson value within `±max_dev` of `base`.
pub fn find_local_max(pearson: &[f32], base: isize, max_dev: usize) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;

    for off in -(max_dev as isize)..max_dev as isize {
        let i = base + off;
        if i < 0 || i as usize >= pearson.len() {
            continue;
        }

        let i = i as usize;
        if best.map(|(_, v)| pearson[i] > v).unwrap_or(true) {
            best = Some((i, pearson[i]));
        }
    }

    best
}

/// Scan for strict local maxima above the confidence threshold.
///
/// Closely clustered maxima often correspond to the same placement, so a
/// timeout of `max_dev` samples must expire before a new match is accepted.
pub fn search_matches(pearson: &[f32], cfg: &SearchConfig) -> SearchResult {
    let mut result = SearchResult {
        gap_mean: 0.0,
        gap_dev: 1.0,
        ..Default::default()
    };

    let mut timeout = 0usize;
    for i in 1..pearson.len().saturating_sub(1) {
        if timeout > 0 {
            timeout -= 1;
        }

        if pearson[i] >= cfg.confidence
            && pearson[i - 1] < pearson[i]
            && pearson[i + 1] < pearson[i]
            && timeout == 0
        {
            debug!("found true match @ {}", i);
            if result.first_match.is_none() {
                result.first_match = Some(i);
            }
            result.last_match = Some(i);
            result.count_true += 1;
            result.entries.push(SplitEntry {
                kind: SplitKind::Confident,
                index: i,
                num: 0,
            });
            timeout = cfg.max_dev;
        }
    }

    result
}

/// Classify the oversized gaps between consecutive confident matches and
/// predict the interior matches of the predictable ones.
pub fn search_gaps(
    pearson: &[f32],
    cfg: &SearchConfig,
    reference: &Reference,
    result: &mut SearchResult,
) -> Result<()> {
    let confident: Vec<usize> = result
        .entries
        .iter()
        .filter(|e| e.kind == SplitKind::Confident)
        .map(|e| e.index)
        .collect();
    if confident.is_empty() {
        return Err(LtError::invalid(
            "cannot search for gaps with an empty split list",
        ));
    }

    let mut acc = Accumulator::single(STAT_AVG | STAT_DEV);
    let mut inserted: Vec<SplitEntry> = Vec::new();

    for pair in confident.windows(2) {
        let (last_index, index) = (pair[0], pair[1]);
        let width = index - last_index;
        if width >= cfg.avg_len - cfg.max_dev && width < cfg.avg_len + cfg.max_dev {
            continue;
        }

        let gap = width as f32 / reference.mean;
        let predicted_mean = width as f32 / gap.round();
        let predictable =
            normalized(predicted_mean, reference.mean, reference.dev).abs() <= ZCONF_95;

        debug!(
            "found {} gap (size {}) @ {} -> {}",
            if predictable { "predictable" } else { "unpredictable" },
            gap,
            last_index,
            index
        );

        if predictable {
            let num = (gap.round() as usize).saturating_sub(1);
            result.count_predictable += num;

            for k in 0..num {
                let base = last_index as isize + ((k + 1) as f32 * reference.mean) as isize;
                if let Some((best_index, best_value)) =
                    find_local_max(pearson, base, cfg.max_dev)
                {
                    acc.accumulate_single(best_value)?;
                    inserted.push(SplitEntry {
                        kind: SplitKind::GapPredictable,
                        index: best_index,
                        num: 1,
                    });
                }
            }
        } else {
            result.count_unpredictable += 1;
            inserted.push(SplitEntry {
                kind: SplitKind::GapUnpredictable,
                index,
                num: 0,
            });
        }
    }

    if acc.count() >= 2 {
        result.gap_mean = acc.get(Stat::Avg, 0)?;
        result.gap_dev = acc.get(Stat::Dev, 0)?.max(f32::EPSILON);
    } else {
        result.gap_mean = cfg.confidence;
        result.gap_dev = 1.0;
    }

    result.entries.extend(inserted);
    result
        .entries
        .sort_by_key(|e| (e.index, e.kind != SplitKind::Confident));
    Ok(())
}

fn confidently_matches(val: f32, result: &SearchResult) -> bool {
    // only reject values sitting below the aggregate gap statistics
    !(val < result.gap_mean
        && normalized(val, result.gap_mean, result.gap_dev).abs() > ZCONF_95)
}

/// Probe each unpredictable gap from both endpoints, walking inward in steps
/// of the reference mean, and accept the interior maxima the two walks agree
/// on (or the agreeing prefixes from each side).
pub fn optimize_gaps(
    pearson: &[f32],
    cfg: &SearchConfig,
    reference: &Reference,
    result: &mut SearchResult,
) -> Result<()> {
    let confident: Vec<usize> = result
        .entries
        .iter()
        .filter(|e| e.kind == SplitKind::Confident)
        .map(|e| e.index)
        .collect();

    let unpredictable: Vec<usize> = result
        .entries
        .iter()
        .filter(|e| e.kind == SplitKind::GapUnpredictable)
        .map(|e| e.index)
        .collect();

    let mut accepted: Vec<SplitEntry> = Vec::new();
    let mut count = 0usize;

    for gap_end in unpredictable {
        let back = gap_end;
        let front = match confident.iter().rev().find(|&&c| c < back) {
            Some(&front) => front,
            None => continue,
        };

        let num = ((back - front) as f32 / reference.mean).round() as usize;
        let num = num.saturating_sub(1);
        if num == 0 {
            continue;
        }

        let mut forwards = Vec::with_capacity(num);
        let mut backwards = vec![None; num];
        for i in 0..num {
            let base = front as isize + ((i + 1) as f32 * reference.mean) as isize;
            forwards.push(find_local_max(pearson, base, cfg.max_dev));

            let base = back as isize - ((i + 1) as f32 * reference.mean) as isize;
            backwards[num - i - 1] = find_local_max(pearson, base, cfg.max_dev);
        }

        // if both runs fully agree and every maximum is confident, take all
        let mut mismatch = false;
        for i in 0..num {
            match (forwards[i], backwards[i]) {
                (Some((fi, fv)), Some((bi, _))) => {
                    if fi != bi || !confidently_matches(fv, result) {
                        mismatch = true;
                        break;
                    }
                }
                _ => {
                    mismatch = true;
                    break;
                }
            }
        }

        if !mismatch {
            for found in forwards.iter().flatten() {
                accepted.push(SplitEntry {
                    kind: SplitKind::GapUnpredictable,
                    index: found.0,
                    num: 1,
                });
            }
            count += num;
            continue;
        }

        // otherwise count agreeing prefixes from each side independently
        for found in forwards.iter().flatten() {
            if !confidently_matches(found.1, result) {
                break;
            }
            accepted.push(SplitEntry {
                kind: SplitKind::GapUnpredictable,
                index: found.0,
                num: 1,
            });
            count += 1;
        }
        for found in backwards.iter().rev().flatten() {
            if !confidently_matches(found.1, result) {
                break;
            }
            accepted.push(SplitEntry {
                kind: SplitKind::GapUnpredictable,
                index: found.0,
                num: 1,
            });
            count += 1;
        }
    }

    // the placeholders served their purpose
    result
        .entries
        .retain(|e| !(e.kind == SplitKind::GapUnpredictable && e.num == 0));
    result.count_unpredictable = count;
    result.entries.extend(accepted);
    result
        .entries
        .sort_by_key(|e| (e.index, e.kind != SplitKind::Confident));
    Ok(())
}

/// Probe `missing` slots before the first and after the last confident
/// match; of the surviving candidates, keep the contiguous run of length
/// `missing` with the highest mean Pearson.
pub fn search_tail(
    pearson: &[f32],
    cfg: &SearchConfig,
    reference: &Reference,
    result: &mut SearchResult,
    missing: usize,
    pattern_size: usize,
) -> Result<()> {
    let (first, last) = match (result.first_match, result.last_match) {
        (Some(first), Some(last)) => (first as isize, last as isize),
        _ => return Ok(()),
    };

    let mut candidates: Vec<Option<(usize, f32)>> = Vec::with_capacity(2 * missing);
    for i in -(missing as isize)..missing as isize {
        let base = i * reference.mean as isize
            + if i < 0 {
                first
            } else {
                last + reference.mean as isize
            };

        let found = find_local_max(pearson, base, cfg.max_dev).filter(|&(index, val)| {
            confidently_matches(val, result) && index + pattern_size < pearson.len()
        });
        candidates.push(found);
    }

    let surviving: Vec<(usize, f32)> = candidates.iter().flatten().copied().collect();
    if surviving.is_empty() {
        return Ok(());
    }

    let take = missing.min(surviving.len());
    let mut best_start = 0usize;
    let mut best_mean = f32::MIN;
    for start in 0..=surviving.len() - take {
        let mean: f32 =
            surviving[start..start + take].iter().map(|c| c.1).sum::<f32>() / take as f32;
        if mean > best_mean {
            best_mean = mean;
            best_start = start;
        }
    }

    for &(index, _) in &surviving[best_start..best_start + take] {
        result.entries.push(SplitEntry {
            kind: SplitKind::Tail,
            index,
            num: 1,
        });
        result.count_tail += 1;
    }

    result
        .entries
        .sort_by_key(|e| (e.index, e.kind != SplitKind::Confident));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaky(positions: &[usize], len: usize) -> Vec<f32> {
        let mut pearson = vec![0.1f32; len];
        for &p in positions {
            if p > 0 && p + 1 < len {
                pearson[p - 1] = 0.5;
                pearson[p] = 0.95;
                pearson[p + 1] = 0.5;
            }
        }
        pearson
    }

    fn cfg() -> SearchConfig {
        SearchConfig {
            confidence: 0.9,
            avg_len: 100,
            max_dev: 10,
            expecting: 0,
        }
    }

    #[test]
    fn confident_matches_found_in_order() {
        let pearson = peaky(&[100, 200, 300], 450);
        let result = search_matches(&pearson, &cfg());

        assert_eq!(result.count_true, 3);
        assert_eq!(result.first_match, Some(100));
        assert_eq!(result.last_match, Some(300));
        let idx: Vec<usize> = result.entries.iter().map(|e| e.index).collect();
        assert_eq!(idx, vec![100, 200, 300]);
    }

    #[test]
    fn clustered_maxima_collapse_via_timeout() {
        // twin peaks 4 samples apart: the second lands inside the timeout
        let mut pearson = peaky(&[100], 300);
        pearson[103] = 0.5;
        pearson[104] = 0.93;
        pearson[105] = 0.5;

        let result = search_matches(&pearson, &cfg());
        assert_eq!(result.count_true, 1);
    }

    #[test]
    fn predictable_gap_yields_interior_matches() {
        // matches at 100, 200, then a double gap to 400 hiding one at ~300
        let pearson = peaky(&[100, 200, 300, 400], 520);
        let mut result = search_matches(&pearson, &cfg());
        // simulate the hidden interior: drop 300 from the confident list
        result.entries.retain(|e| e.index != 300);
        result.count_true = 3;

        let reference = Reference {
            mean: 100.0,
            dev: 3.0,
        };
        search_gaps(&pearson, &cfg(), &reference, &mut result).unwrap();

        assert_eq!(result.count_predictable, 1);
        assert!(result
            .entries
            .iter()
            .any(|e| e.kind == SplitKind::GapPredictable && e.index == 300));
    }

    #[test]
    fn tail_probe_recovers_leading_match() {
        // confident at 200 and 300; one more pattern hiding at 100
        let pearson = peaky(&[100, 200, 300], 520);
        let mut result = search_matches(&pearson, &cfg());
        result.entries.retain(|e| e.index != 100);
        result.count_true = 2;
        result.first_match = Some(200);
        result.gap_mean = 0.9;
        result.gap_dev = 0.05;

        let reference = Reference {
            mean: 100.0,
            dev: 3.0,
        };
        search_tail(&pearson, &cfg(), &reference, &mut result, 1, 50).unwrap();

        assert_eq!(result.count_tail, 1);
        assert!(result
            .entries
            .iter()
            .any(|e| e.kind == SplitKind::Tail && e.index == 100));
    }
}
