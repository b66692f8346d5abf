//! Candidate ranking against live collaborators.
//!
//! Gathers provider snapshots and booking state from the
//! [`ProviderDirectory`] and hands them to the pure ranking algorithm in
//! `dispatch_core::ranking`. Read-only; takes no locks.

use std::collections::HashSet;
use std::sync::Arc;

use dispatch_core::error::CoreError;
use dispatch_core::geo::DistanceProvider;
use dispatch_core::models::Job;
use dispatch_core::ranking::{is_eligible, rank_candidates, RankedCandidates, RankingPolicy};
use dispatch_core::store::ProviderDirectory;
use dispatch_core::types::DbId;

pub struct CandidateRanker {
    directory: Arc<dyn ProviderDirectory>,
    distance: Arc<dyn DistanceProvider>,
    policy: RankingPolicy,
}

impl CandidateRanker {
    pub fn new(
        directory: Arc<dyn ProviderDirectory>,
        distance: Arc<dyn DistanceProvider>,
        policy: RankingPolicy,
    ) -> Self {
        Self {
            directory,
            distance,
            policy,
        }
    }

    /// Rank eligible providers for `job`, skipping `excluded`.
    ///
    /// The booking lookup only runs for providers that pass the cheap
    /// filters.
    pub async fn rank(
        &self,
        job: &Job,
        excluded: &HashSet<DbId>,
    ) -> Result<RankedCandidates, CoreError> {
        let providers = self.directory.providers_in_category(&job.category).await?;

        let mut busy = HashSet::new();
        for provider in providers.iter().filter(|p| is_eligible(p, job, excluded)) {
            if self
                .directory
                .has_confirmed_booking(provider.id, &job.window, job.id)
                .await?
            {
                busy.insert(provider.id);
            }
        }

        let ranked = rank_candidates(
            job,
            &providers,
            &busy,
            excluded,
            self.distance.as_ref(),
            &self.policy,
        )?;
        tracing::debug!(
            job_id = job.id,
            category = %job.category,
            considered = providers.len(),
            busy = busy.len(),
            ranked = ranked.len(),
            "Ranked dispatch candidates",
        );
        Ok(ranked)
    }
}
