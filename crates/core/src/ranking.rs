//! Candidate ranking.
//!
//! Filters provider snapshots down to those eligible for a job and orders
//! them by ascending distance, descending rating, then ascending provider id.
//! Identical inputs always produce the identical order.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::error::CoreError;
use crate::geo::DistanceProvider;
use crate::models::{Job, ProviderCandidate};
use crate::types::DbId;

/// Default search radius around the job location.
pub const DEFAULT_MAX_RADIUS_KM: f64 = 40.0;

/// Tunables applied on top of the fixed eligibility rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPolicy {
    /// Providers farther than this are not offered the job.
    pub max_radius_km: Option<f64>,
    /// Truncate the ranked list to at most this many providers.
    pub max_candidates: Option<usize>,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            max_radius_km: Some(DEFAULT_MAX_RADIUS_KM),
            max_candidates: None,
        }
    }
}

/// A provider that passed every filter, with the keys it was sorted on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub provider_id: DbId,
    pub distance_km: f64,
    pub rating: f64,
}

/// Ordered candidates for one job, consumed front to back.
///
/// Deliberately not indexable: once a candidate is taken it is gone.
#[derive(Debug)]
pub struct RankedCandidates {
    inner: std::vec::IntoIter<ScoredCandidate>,
}

impl RankedCandidates {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Drain the remaining candidates into their provider ids.
    pub fn into_provider_ids(self) -> Vec<DbId> {
        self.inner.map(|c| c.provider_id).collect()
    }
}

impl Iterator for RankedCandidates {
    type Item = ScoredCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RankedCandidates {}

/// Cheap, synchronous eligibility checks (category, active flag, exclusion).
///
/// The booking-overlap check needs an external lookup and is applied by the
/// caller through the `busy` set passed to [`rank_candidates`].
pub fn is_eligible(provider: &ProviderCandidate, job: &Job, excluded: &HashSet<DbId>) -> bool {
    provider.active && provider.serves(&job.category) && !excluded.contains(&provider.id)
}

/// Rank providers for `job`.
///
/// - `busy`: providers with a confirmed booking overlapping the job window.
/// - `excluded`: providers that must not be offered this job again.
///
/// Returns [`CoreError::NoCandidates`] when nothing survives the filters.
pub fn rank_candidates(
    job: &Job,
    providers: &[ProviderCandidate],
    busy: &HashSet<DbId>,
    excluded: &HashSet<DbId>,
    distance: &dyn DistanceProvider,
    policy: &RankingPolicy,
) -> Result<RankedCandidates, CoreError> {
    let mut scored: Vec<ScoredCandidate> = providers
        .iter()
        .filter(|p| is_eligible(p, job, excluded) && !busy.contains(&p.id))
        .map(|p| ScoredCandidate {
            provider_id: p.id,
            distance_km: distance.distance_km(job.location, p.location),
            rating: p.rating,
        })
        .filter(|c| match policy.max_radius_km {
            Some(radius) => c.distance_km <= radius,
            None => true,
        })
        .collect();

    scored.sort_by(compare_candidates);

    // Duplicate snapshots of one provider keep their best-ranked entry.
    let mut seen = HashSet::with_capacity(scored.len());
    scored.retain(|c| seen.insert(c.provider_id));

    if let Some(cap) = policy.max_candidates {
        scored.truncate(cap);
    }

    if scored.is_empty() {
        return Err(CoreError::NoCandidates { job_id: job.id });
    }

    Ok(RankedCandidates {
        inner: scored.into_iter(),
    })
}

/// Ascending distance, descending rating, ascending id.
fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    sortable(a.distance_km, f64::INFINITY)
        .total_cmp(&sortable(b.distance_km, f64::INFINITY))
        .then_with(|| {
            sortable(b.rating, f64::NEG_INFINITY).total_cmp(&sortable(a.rating, f64::NEG_INFINITY))
        })
        .then_with(|| a.provider_id.cmp(&b.provider_id))
}

/// NaN keys sort as the worst possible value.
fn sortable(value: f64, nan_as: f64) -> f64 {
    if value.is_nan() {
        nan_as
    } else {
        value
    }
}
