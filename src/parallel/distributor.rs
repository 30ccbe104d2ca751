//! Region distribution for parallel batches.
//!
//! Assigns each request an ordered set of target regions under a
//! load-balancing policy, keeping per-region load counters for the
//! least-loaded strategy and the optional rebalancing pass.

use std::collections::BTreeMap;

use rand::seq::index::sample;
use tracing::debug;

use crate::config::LoadBalancingStrategy;
use crate::error::LlmError;

/// One request's region assignment, alive for the duration of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAssignment {
    pub request_id: String,
    /// Ordered list of regions the request may be executed in.
    pub assigned_regions: Vec<String>,
    pub priority: i32,
}

/// Distributes requests across regions.
pub struct RegionDistributor {
    strategy: LoadBalancingStrategy,
    cursor: usize,
    load: BTreeMap<String, usize>,
}

impl RegionDistributor {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            cursor: 0,
            load: BTreeMap::new(),
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Current per-region assignment counters.
    pub fn load_distribution(&self) -> BTreeMap<String, usize> {
        self.load.clone()
    }

    /// Clear counters and the round-robin cursor.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.load.clear();
    }

    /// Assign `target_regions_per_request` regions to every request id.
    ///
    /// Preconditions (rejected with a configuration error): non-empty
    /// requests and regions, `0 < k <= regions.len()`, and no duplicate
    /// request ids.
    pub fn distribute(
        &mut self,
        request_ids: &[String],
        available_regions: &[String],
        target_regions_per_request: usize,
    ) -> Result<Vec<RequestAssignment>, LlmError> {
        if request_ids.is_empty() {
            return Err(LlmError::Configuration(
                "request list cannot be empty".to_string(),
            ));
        }
        if available_regions.is_empty() {
            return Err(LlmError::Configuration(
                "available regions list cannot be empty".to_string(),
            ));
        }
        if target_regions_per_request == 0 {
            return Err(LlmError::Configuration(
                "target_regions_per_request must be at least 1".to_string(),
            ));
        }
        if target_regions_per_request > available_regions.len() {
            return Err(LlmError::Configuration(format!(
                "target_regions_per_request ({target_regions_per_request}) exceeds available \
                 regions ({})",
                available_regions.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for id in request_ids {
            if !seen.insert(id) {
                return Err(LlmError::Configuration(format!(
                    "duplicate request_id '{id}' in batch"
                )));
            }
        }

        for region in available_regions {
            self.load.entry(region.clone()).or_insert(0);
        }

        let mut assignments = Vec::with_capacity(request_ids.len());
        for request_id in request_ids {
            let regions =
                self.assign_regions(available_regions, target_regions_per_request);
            for region in &regions {
                *self.load.entry(region.clone()).or_insert(0) += 1;
            }
            assignments.push(RequestAssignment {
                request_id: request_id.clone(),
                assigned_regions: regions,
                priority: 0,
            });
        }

        debug!(
            requests = assignments.len(),
            strategy = ?self.strategy,
            "distributed batch across regions"
        );
        Ok(assignments)
    }

    fn assign_regions(&mut self, regions: &[String], k: usize) -> Vec<String> {
        match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let start = self.cursor;
                let picked = (0..k)
                    .map(|i| regions[(start + i) % regions.len()].clone())
                    .collect();
                self.cursor = (self.cursor + k) % regions.len();
                picked
            }
            LoadBalancingStrategy::Random => {
                let mut rng = rand::thread_rng();
                sample(&mut rng, regions.len(), k)
                    .into_iter()
                    .map(|i| regions[i].clone())
                    .collect()
            }
            LoadBalancingStrategy::LeastLoaded => {
                // Sort by load with the original region order as tie-break.
                let mut indexed: Vec<(usize, &String)> = regions.iter().enumerate().collect();
                indexed.sort_by_key(|(index, region)| {
                    (*self.load.get(*region).unwrap_or(&0), *index)
                });
                indexed
                    .into_iter()
                    .take(k)
                    .map(|(_, region)| region.clone())
                    .collect()
            }
        }
    }

    /// Rebalance assignments when the max-min load gap exceeds the variance
    /// threshold: a region with the highest load is swapped for the
    /// least-loaded region in assignments that do not already use it.
    pub fn optimize(&mut self, assignments: &mut [RequestAssignment], variance_threshold: usize) {
        loop {
            let Some((max_region, max_load)) = self
                .load
                .iter()
                .max_by_key(|(region, load)| (**load, std::cmp::Reverse(region.as_str())))
                .map(|(region, load)| (region.clone(), *load))
            else {
                return;
            };
            let Some((min_region, min_load)) = self
                .load
                .iter()
                .min_by_key(|(region, load)| (**load, region.as_str()))
                .map(|(region, load)| (region.clone(), *load))
            else {
                return;
            };

            if max_load.saturating_sub(min_load) <= variance_threshold {
                return;
            }

            let Some(assignment) = assignments.iter_mut().find(|a| {
                a.assigned_regions.contains(&max_region)
                    && !a.assigned_regions.contains(&min_region)
            }) else {
                return;
            };

            for region in &mut assignment.assigned_regions {
                if *region == max_region {
                    *region = min_region.clone();
                    break;
                }
            }
            *self.load.entry(max_region).or_insert(1) -= 1;
            *self.load.entry(min_region).or_insert(0) += 1;
        }
    }
}
