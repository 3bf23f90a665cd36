//! Sorted-set index.
//!
//! Members are kept twice: in a `BTreeSet` ordered by `(score, member)` for rank and range
//! queries, and in a `HashMap` from member to score for point lookups. A score change removes
//! the old `(score, member)` pair and inserts the new one, so the ordering never holds a
//! stale slot.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use crate::encoding::parse_float;

/// A score that is never NaN, with `-0.0` folded into `0.0` so equal scores compare equal.
#[derive(Clone, Copy, Debug)]
pub struct Score(f64);

impl Score {
    pub fn new(value: f64) -> Option<Score> {
        if value.is_nan() {
            None
        } else if value == 0.0 {
            Some(Score(0.0))
        } else {
            Some(Score(value))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One end of a score range: `1.5` is inclusive, `(1.5` exclusive, `-inf`/`+inf` open.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> ScoreBound {
        ScoreBound {
            value,
            exclusive: false,
        }
    }

    pub fn exclusive(value: f64) -> ScoreBound {
        ScoreBound {
            value,
            exclusive: true,
        }
    }

    pub fn parse(src: &[u8]) -> Option<ScoreBound> {
        match src {
            [b'(', rest @ ..] => parse_float(rest).map(ScoreBound::exclusive),
            _ => parse_float(src).map(ScoreBound::inclusive),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreRange {
    pub min: ScoreBound,
    pub max: ScoreBound,
}

impl ScoreRange {
    pub fn new(min: ScoreBound, max: ScoreBound) -> ScoreRange {
        ScoreRange { min, max }
    }

    /// Every possible score.
    pub fn all() -> ScoreRange {
        ScoreRange::new(
            ScoreBound::inclusive(f64::NEG_INFINITY),
            ScoreBound::inclusive(f64::INFINITY),
        )
    }

    fn above_min(&self, score: f64) -> bool {
        if self.min.exclusive {
            score > self.min.value
        } else {
            score >= self.min.value
        }
    }

    fn below_max(&self, score: f64) -> bool {
        if self.max.exclusive {
            score < self.max.value
        } else {
            score <= self.max.value
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        self.above_min(score) && self.below_max(score)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortedSet {
    ordered: BTreeSet<(Score, Bytes)>,
    scores: HashMap<Bytes, Score>,
}

impl SortedSet {
    pub fn new() -> SortedSet {
        SortedSet::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).map(|score| score.get())
    }

    /// Inserts `member` or moves it to `score`. Returns true when the member is new.
    pub fn add(&mut self, member: Bytes, score: Score) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(previous) => {
                if previous != score {
                    self.ordered.remove(&(previous, member.clone()));
                    self.ordered.insert((score, member));
                }
                false
            }
            None => {
                self.ordered.insert((score, member));
                true
            }
        }
    }

    /// Adds `delta` to the member's score, treating a missing member as zero. Returns the new
    /// score, or `None` when the sum is not a number (`inf` plus `-inf`).
    pub fn incr(&mut self, member: Bytes, delta: f64) -> Option<f64> {
        let current = self.score(&member).unwrap_or(0.0);
        let score = Score::new(current + delta)?;
        self.add(member, score);
        Some(score.get())
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => {
                self.ordered.remove(&(score, member));
                true
            }
            None => false,
        }
    }

    /// Zero-based position in ascending order.
    ///
    /// The tree keeps no subtree sizes, so this walks outwards from the member in both
    /// directions and stops at the nearer end: linear in the distance to that end.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let (member, score) = self.scores.get_key_value(member)?;
        let key = (*score, member.clone());

        let mut below = self.ordered.range(..key.clone()).rev();
        let mut above = self
            .ordered
            .range((Bound::Excluded(key), Bound::Unbounded));

        let mut steps = 0;
        loop {
            if below.next().is_none() {
                return Some(steps);
            }
            if above.next().is_none() {
                return Some(self.len() - 1 - steps);
            }
            steps += 1;
        }
    }

    /// Zero-based position in descending order.
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|rank| self.len() - 1 - rank)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.ordered
            .iter()
            .map(|(score, member)| (member, score.get()))
    }

    fn rank_bounds(&self, start: i64, stop: i64) -> Option<(usize, usize)> {
        index_range(start, stop, self.len())
    }

    /// Members between two ranks, both inclusive; negative ranks count from the end.
    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<(Bytes, f64)> {
        let Some((start, stop)) = self.rank_bounds(start, stop) else {
            return vec![];
        };

        self.iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(member, score)| (member.clone(), score))
            .collect()
    }

    /// Same as [`SortedSet::range_by_rank`] with ranks counted in descending order.
    pub fn rev_range_by_rank(&self, start: i64, stop: i64) -> Vec<(Bytes, f64)> {
        let Some((start, stop)) = self.rank_bounds(start, stop) else {
            return vec![];
        };

        self.iter()
            .rev()
            .skip(start)
            .take(stop - start + 1)
            .map(|(member, score)| (member.clone(), score))
            .collect()
    }

    fn scan_by_score<'a>(
        &'a self,
        range: &'a ScoreRange,
    ) -> impl Iterator<Item = (&'a Bytes, f64)> + 'a {
        // The empty member sorts before every other member with the same score.
        let from = Score::new(range.min.value)
            .map(|score| Bound::Included((score, Bytes::new())))
            .unwrap_or(Bound::Unbounded);

        self.ordered
            .range((from, Bound::Unbounded))
            .map(|(score, member)| (member, score.get()))
            .skip_while(move |(_, score)| !range.above_min(*score))
            .take_while(move |(_, score)| range.below_max(*score))
    }

    /// Members whose score falls inside `range`, ascending.
    pub fn range_by_score(&self, range: &ScoreRange) -> Vec<(Bytes, f64)> {
        self.scan_by_score(range)
            .map(|(member, score)| (member.clone(), score))
            .collect()
    }

    /// Members whose score falls inside `range`, descending: the ascending order traversed
    /// backward.
    pub fn rev_range_by_score(&self, range: &ScoreRange) -> Vec<(Bytes, f64)> {
        let mut members = self.range_by_score(range);
        members.reverse();
        members
    }

    pub fn count(&self, range: &ScoreRange) -> usize {
        self.scan_by_score(range).count()
    }

    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> usize {
        let doomed = self.range_by_rank(start, stop);
        for (member, _) in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    pub fn remove_range_by_score(&mut self, range: &ScoreRange) -> usize {
        let doomed = self.range_by_score(range);
        for (member, _) in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Every member of any input, scored with the weighted sum of its scores.
    pub fn union<'a>(inputs: impl IntoIterator<Item = (&'a SortedSet, f64)>) -> SortedSet {
        let mut sums: HashMap<Bytes, f64> = HashMap::new();

        for (set, weight) in inputs {
            for (member, score) in set.iter() {
                *sums.entry(member.clone()).or_insert(0.0) += weighted(score, weight);
            }
        }

        SortedSet::from_sums(sums)
    }

    /// Members present in every input, scored with the weighted sum of their scores.
    pub fn intersection<'a>(inputs: impl IntoIterator<Item = (&'a SortedSet, f64)>) -> SortedSet {
        let inputs: Vec<(&SortedSet, f64)> = inputs.into_iter().collect();
        let Some((smallest, _)) = inputs.iter().min_by_key(|(set, _)| set.len()) else {
            return SortedSet::new();
        };

        let sums = smallest
            .iter()
            .filter_map(|(member, _)| {
                let mut sum = 0.0;
                for (set, weight) in &inputs {
                    sum += weighted(set.score(member)?, *weight);
                }
                Some((member.clone(), sum))
            })
            .collect();

        SortedSet::from_sums(sums)
    }

    fn from_sums(sums: HashMap<Bytes, f64>) -> SortedSet {
        let mut set = SortedSet::new();
        for (member, sum) in sums {
            // `inf` plus `-inf` aggregates to zero.
            set.add(member, Score::new(sum).unwrap_or(Score(0.0)));
        }
        set
    }
}

/// Resolves inclusive, possibly negative, indices over a sequence of `len` elements to a
/// `start..=stop` pair of positions. `None` when the range selects nothing.
pub fn index_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };

    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

// `inf * 0` is taken as zero rather than NaN.
fn weighted(score: f64, weight: f64) -> f64 {
    let value = score * weight;
    if value.is_nan() {
        0.0
    } else {
        value
    }
}
