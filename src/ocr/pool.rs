//! OCR worker pool with dynamic sub-type specialization (spec §4.8).
//!
//! Grounded on SPEC_FULL §5's capacity-guard note and the teacher's
//! heartbeat-style periodic-reevaluation loop in `worker`; this pool has no
//! direct teacher analogue (the teacher has no OCR pool) so the rebalancing
//! logic below is written fresh, in the same "periodic tokio::select! tick"
//! idiom the worker loop uses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::models::OcrSubKind;
use crate::repository::JobRepository;

/// `workers * per_worker_cpu <= available_cpu` AND `workers * per_worker_ram
/// <= available_ram`, with a fixed 20% headroom subtracted (spec §4.8).
pub struct CapacityGuard {
    pub per_worker_cpu: f64,
    pub per_worker_ram_bytes: u64,
    pub available_cpu: f64,
    pub available_ram_bytes: u64,
}

const HEADROOM_FACTOR: f64 = 0.8;

impl CapacityGuard {
    /// Whether adding one more worker (bringing the total to `workers + 1`)
    /// still fits within 80% of raw capacity.
    pub fn can_add_worker(&self, current_workers: u32) -> bool {
        let next = (current_workers + 1) as f64;
        let cpu_ok = next * self.per_worker_cpu <= self.available_cpu * HEADROOM_FACTOR;
        let ram_ok = next * self.per_worker_ram_bytes as f64
            <= self.available_ram_bytes as f64 * HEADROOM_FACTOR;
        cpu_ok && ram_ok
    }
}

/// Tracks how many OCR workers are currently specialized to each sub-type.
/// `AtomicU32` counters so the periodic rebalancer and the claim loop can
/// both read/adjust without a lock (spec §4.8, P7).
pub struct SubKindAllocation {
    index_workers: AtomicU32,
    deed_workers: AtomicU32,
}

impl SubKindAllocation {
    pub fn new(index_workers: u32, deed_workers: u32) -> Self {
        Self {
            index_workers: AtomicU32::new(index_workers),
            deed_workers: AtomicU32::new(deed_workers),
        }
    }

    pub fn count(&self, sub_kind: OcrSubKind) -> u32 {
        match sub_kind {
            OcrSubKind::Index => self.index_workers.load(Ordering::SeqCst),
            OcrSubKind::Deed => self.deed_workers.load(Ordering::SeqCst),
        }
    }

    /// Demotes one worker from `from` and promotes one to `to`, refusing if
    /// it would leave `from` at zero (spec §4.8 "minimum of one worker per
    /// sub-type so no class starves").
    pub fn rebalance_one(&self, from: OcrSubKind, to: OcrSubKind) -> bool {
        if from == to {
            return false;
        }
        let from_counter = self.counter(from);
        let to_counter = self.counter(to);

        loop {
            let current = from_counter.load(Ordering::SeqCst);
            if current <= 1 {
                return false;
            }
            if from_counter
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                to_counter.fetch_add(1, Ordering::SeqCst);
                return true;
            }
        }
    }

    fn counter(&self, sub_kind: OcrSubKind) -> &AtomicU32 {
        match sub_kind {
            OcrSubKind::Index => &self.index_workers,
            OcrSubKind::Deed => &self.deed_workers,
        }
    }
}

/// Re-evaluates queue depth per sub-type (every 30s per spec §4.8) and
/// rebalances at most one worker toward whichever sub-type is most
/// backlogged relative to its current allocation.
pub async fn rebalance_tick(
    jobs: &dyn JobRepository,
    allocation: &Arc<SubKindAllocation>,
) -> Result<(), crate::repository::ClaimError> {
    let index_depth = jobs.ocr_queue_depth(OcrSubKind::Index).await?;
    let deed_depth = jobs.ocr_queue_depth(OcrSubKind::Deed).await?;

    let index_workers = allocation.count(OcrSubKind::Index) as u64;
    let deed_workers = allocation.count(OcrSubKind::Deed) as u64;

    let index_pressure = index_depth.checked_div(index_workers.max(1)).unwrap_or(index_depth);
    let deed_pressure = deed_depth.checked_div(deed_workers.max(1)).unwrap_or(deed_depth);

    if index_pressure > deed_pressure {
        allocation.rebalance_one(OcrSubKind::Deed, OcrSubKind::Index);
    } else if deed_pressure > index_pressure {
        allocation.rebalance_one(OcrSubKind::Index, OcrSubKind::Deed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_starve_minimum_worker() {
        let allocation = SubKindAllocation::new(1, 3);
        assert!(!allocation.rebalance_one(OcrSubKind::Index, OcrSubKind::Deed));
        assert_eq!(allocation.count(OcrSubKind::Index), 1);
    }

    #[test]
    fn rebalances_when_above_minimum() {
        let allocation = SubKindAllocation::new(2, 3);
        assert!(allocation.rebalance_one(OcrSubKind::Index, OcrSubKind::Deed));
        assert_eq!(allocation.count(OcrSubKind::Index), 1);
        assert_eq!(allocation.count(OcrSubKind::Deed), 4);
    }

    #[test]
    fn capacity_guard_rejects_over_headroom() {
        let guard = CapacityGuard {
            per_worker_cpu: 1.0,
            per_worker_ram_bytes: 1_000_000_000,
            available_cpu: 4.0,
            available_ram_bytes: 4_000_000_000,
        };
        assert!(guard.can_add_worker(2));
        assert!(!guard.can_add_worker(3));
    }
}
