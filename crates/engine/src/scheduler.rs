use std::collections::BTreeMap;

use reqwest::Url;
use rosterwatch_core::{Candidate, DedupCache, Progress, TargetError};

use crate::lifecycle::JobId;

/// Outcome of one admission attempt.
#[derive(Debug)]
pub(crate) enum Admission {
    /// Every slot is taken; nothing was consumed.
    Saturated,
    /// List consumed, jobs still in flight.
    Drain,
    /// List consumed and nothing in flight: the sweep is over.
    Exhausted,
    /// Target already matched; try the next one right away.
    SkipDuplicate { candidate: Candidate },
    /// Target cannot be opened; try the next one after a pause.
    SkipInvalid {
        candidate: Candidate,
        reason: TargetError,
    },
    /// Open a job for this candidate, then [`SweepState::track`] it.
    Open { candidate: Candidate, target: Url },
}

/// State of one sweep: the filtered list, the cursor, and the jobs in flight.
///
/// `cursor` only moves forward and never passes `filtered.len()`; `active`
/// never holds more than `limit` jobs.
#[derive(Debug)]
pub(crate) struct SweepState {
    filtered: Vec<Candidate>,
    cursor: usize,
    limit: usize,
    active: BTreeMap<JobId, Candidate>,
}

impl SweepState {
    pub(crate) fn new(filtered: Vec<Candidate>, limit: usize) -> Self {
        Self {
            filtered,
            cursor: 0,
            limit: limit.max(1),
            active: BTreeMap::new(),
        }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn total(&self) -> usize {
        self.filtered.len()
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn progress(&self) -> Progress {
        Progress {
            current: self.cursor,
            total: self.filtered.len(),
        }
    }

    pub(crate) fn active(&self) -> impl Iterator<Item = (&JobId, &Candidate)> {
        self.active.iter()
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn is_active(&self, job: JobId) -> bool {
        self.active.contains_key(&job)
    }

    /// Claim the next candidate. The cursor moves before the caller does any
    /// asynchronous work, so a re-entrant call never sees the same index twice.
    pub(crate) fn admit_next(&mut self, dedup: &DedupCache) -> Admission {
        if self.cursor >= self.filtered.len() {
            if self.active.is_empty() {
                return Admission::Exhausted;
            }
            return Admission::Drain;
        }
        if self.active.len() >= self.limit {
            return Admission::Saturated;
        }

        let candidate = self.filtered[self.cursor].clone();
        self.cursor += 1;

        if candidate.dedup_key().is_some_and(|key| dedup.contains(key)) {
            return Admission::SkipDuplicate { candidate };
        }
        match candidate.target() {
            Ok(target) => Admission::Open { candidate, target },
            Err(reason) => Admission::SkipInvalid { candidate, reason },
        }
    }

    /// Record the handle of a job opened for `candidate`.
    pub(crate) fn track(&mut self, job: JobId, candidate: Candidate) {
        debug_assert!(self.active.len() < self.limit, "admitted past the limit");
        self.active.insert(job, candidate);
    }

    /// Release `job`'s slot. `None` for handles this sweep does not know.
    pub(crate) fn complete(&mut self, job: JobId) -> Option<Candidate> {
        self.active.remove(&job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new(format!("s{i}"), format!("https://x.test/{i}"), Some(i as i64)))
            .collect()
    }

    fn open(state: &mut SweepState, dedup: &DedupCache, next: &mut u64) -> Option<JobId> {
        loop {
            match state.admit_next(dedup) {
                Admission::Open { candidate, .. } => {
                    let job = JobId(*next);
                    *next += 1;
                    state.track(job, candidate);
                    return Some(job);
                }
                Admission::SkipDuplicate { .. } => continue,
                Admission::SkipInvalid { .. } => continue,
                Admission::Saturated | Admission::Drain | Admission::Exhausted => return None,
            }
        }
    }

    #[test]
    fn fills_up_to_the_limit_then_saturates() {
        let dedup = DedupCache::new();
        let mut state = SweepState::new(list(5), 2);
        let mut next = 1;
        assert!(open(&mut state, &dedup, &mut next).is_some());
        assert!(open(&mut state, &dedup, &mut next).is_some());
        assert!(matches!(state.admit_next(&dedup), Admission::Saturated));
        assert_eq!(state.cursor(), 2);
        assert_eq!(state.active_len(), 2);
    }

    #[test]
    fn drains_then_exhausts() {
        let dedup = DedupCache::new();
        let mut state = SweepState::new(list(2), 3);
        let mut next = 1;
        let a = open(&mut state, &dedup, &mut next).unwrap();
        let b = open(&mut state, &dedup, &mut next).unwrap();
        assert!(matches!(state.admit_next(&dedup), Admission::Drain));
        assert!(state.complete(a).is_some());
        assert!(matches!(state.admit_next(&dedup), Admission::Drain));
        assert!(state.complete(b).is_some());
        assert!(matches!(state.admit_next(&dedup), Admission::Exhausted));
        assert_eq!(state.cursor(), 2);
    }

    #[test]
    fn duplicates_never_open_and_take_no_slot() {
        let mut dedup = DedupCache::new();
        dedup.add("https://x.test/0");
        dedup.add("https://x.test/1");
        let mut state = SweepState::new(list(3), 1);
        match state.admit_next(&dedup) {
            Admission::SkipDuplicate { candidate } => assert_eq!(candidate.label(), "s0"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(state.admit_next(&dedup), Admission::SkipDuplicate { .. }));
        assert_eq!(state.active_len(), 0);
        match state.admit_next(&dedup) {
            Admission::Open { candidate, target } => {
                assert_eq!(candidate.label(), "s2");
                assert_eq!(target.as_str(), "https://x.test/2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_targets_are_skipped() {
        let dedup = DedupCache::new();
        let mut items = list(2);
        items[0].target_url = Some("mailto:someone@example.edu".into());
        items[1].target_url = None;
        let mut state = SweepState::new(items, 2);
        assert!(matches!(
            state.admit_next(&dedup),
            Admission::SkipInvalid { reason: TargetError::Scheme(_), .. }
        ));
        assert!(matches!(
            state.admit_next(&dedup),
            Admission::SkipInvalid { reason: TargetError::Missing, .. }
        ));
        assert!(matches!(state.admit_next(&dedup), Admission::Exhausted));
    }

    #[test]
    fn stale_handles_are_ignored() {
        let dedup = DedupCache::new();
        let mut state = SweepState::new(list(1), 1);
        let mut next = 10;
        let job = open(&mut state, &dedup, &mut next).unwrap();
        assert!(state.complete(JobId(999)).is_none());
        assert!(state.complete(job).is_some());
        assert!(state.complete(job).is_none());
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let state = SweepState::new(list(1), 0);
        assert_eq!(state.limit(), 1);
    }

    // Pseudo-random interleavings of admissions and completions.
    #[test]
    fn cursor_is_monotonic_and_bound_holds_under_interleaving() {
        let mut dedup = DedupCache::new();
        for i in (0..40).step_by(7) {
            dedup.add(&format!("https://x.test/{i}"));
        }
        let mut items = list(40);
        items[13].target_url = Some("not a url".into());

        for seed in 1..=25u64 {
            let mut rng = seed;
            let mut step = || {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                rng >> 33
            };
            let limit = (step() % 4 + 1) as usize;
            let mut state = SweepState::new(items.clone(), limit);
            let mut next = 1;
            let mut in_flight: Vec<JobId> = Vec::new();
            let mut last_cursor = 0;

            for _ in 0..500 {
                if in_flight.is_empty() || step() % 2 == 0 {
                    if let Some(job) = open(&mut state, &dedup, &mut next) {
                        in_flight.push(job);
                    }
                } else {
                    let idx = (step() as usize) % in_flight.len();
                    let job = in_flight.swap_remove(idx);
                    assert!(state.complete(job).is_some());
                }
                assert!(state.active_len() <= limit);
                assert!(state.cursor() >= last_cursor);
                assert!(state.cursor() <= state.total());
                last_cursor = state.cursor();
            }
            while let Some(job) = in_flight.pop() {
                state.complete(job);
            }
            while open(&mut state, &dedup, &mut next).is_some() {
                let job = JobId(next - 1);
                state.complete(job);
            }
            assert!(matches!(state.admit_next(&dedup), Admission::Exhausted));
            assert_eq!(state.cursor(), state.total());
        }
    }
}
