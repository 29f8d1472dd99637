//! Fetch strategy selection.
//!
//! Near the head every block is fetched in full so each operation comes with
//! its real transaction id. Far behind, bulk windows trade identifier
//! completeness for throughput; misses get provisional ids.

use crate::config::WatcherConfig;

/// What the next loop iteration should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Checkpoint is at head.
    Idle,
    /// Full fetch of every block in `from..=to`.
    Step { from: u64, to: u64 },
    /// Bulk window of `count` blocks starting at `start`.
    Bulk { start: u64, count: u64 },
}

/// Chooses between full and bulk fetch from the backlog size.
#[derive(Debug, Clone, Copy)]
pub struct FetchStrategy {
    bulk_threshold: u64,
    max_bulk_window: u64,
    step_batch: u64,
    initial_lookback: u64,
}

impl FetchStrategy {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            bulk_threshold: config.bulk_threshold,
            max_bulk_window: config.max_bulk_window.max(1),
            step_batch: config.step_batch,
            initial_lookback: config.initial_lookback,
        }
    }

    /// First block to ingest given the checkpoint.
    ///
    /// A fresh checkpoint (0) starts a short way behind head instead of
    /// replaying the whole chain.
    pub fn next_block(&self, last_block: u64, head: u64) -> u64 {
        if last_block > 0 {
            last_block + 1
        } else if head > self.initial_lookback {
            head - self.initial_lookback
        } else {
            1
        }
    }

    /// Blocks between the checkpoint and head, not counting `next` itself.
    pub fn backlog(&self, last_block: u64, head: u64) -> u64 {
        head.saturating_sub(self.next_block(last_block, head))
    }

    pub fn plan(&self, last_block: u64, head: u64) -> FetchPlan {
        let next = self.next_block(last_block, head);
        if next > head {
            return FetchPlan::Idle;
        }
        let backlog = head - next;
        if backlog < self.bulk_threshold {
            self.step_from(next, head)
        } else {
            FetchPlan::Bulk {
                start: next,
                count: self.max_bulk_window.min(backlog + 1),
            }
        }
    }

    /// One level safer than `plan`: bulk falls back to step, step has no fallback.
    pub fn fallback(&self, plan: FetchPlan, head: u64) -> Option<FetchPlan> {
        match plan {
            FetchPlan::Bulk { start, .. } => Some(self.step_from(start, head)),
            FetchPlan::Step { .. } | FetchPlan::Idle => None,
        }
    }

    fn step_from(&self, next: u64, head: u64) -> FetchPlan {
        FetchPlan::Step {
            from: next,
            to: head.min(next.saturating_add(self.step_batch)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> FetchStrategy {
        FetchStrategy::new(&WatcherConfig::default())
    }

    #[test]
    fn caught_up_is_idle() {
        assert_eq!(strategy().plan(1000, 1000), FetchPlan::Idle);
    }

    #[test]
    fn small_backlog_steps() {
        assert_eq!(
            strategy().plan(1000, 1010),
            FetchPlan::Step {
                from: 1001,
                to: 1010
            }
        );
        // step batch caps the range
        assert_eq!(
            strategy().plan(1000, 1049),
            FetchPlan::Step {
                from: 1001,
                to: 1049
            }
        );
    }

    #[test]
    fn large_backlog_goes_bulk() {
        assert_eq!(
            strategy().plan(1000, 1051),
            FetchPlan::Bulk {
                start: 1001,
                count: 51
            }
        );
        assert_eq!(
            strategy().plan(1000, 50_000),
            FetchPlan::Bulk {
                start: 1001,
                count: 1000
            }
        );
    }

    #[test]
    fn bulk_falls_back_to_step() {
        let s = strategy();
        let plan = s.plan(1000, 50_000);
        assert_eq!(
            s.fallback(plan, 50_000),
            Some(FetchPlan::Step {
                from: 1001,
                to: 1051
            })
        );
        assert_eq!(s.fallback(FetchPlan::Step { from: 1, to: 2 }, 2), None);
    }

    #[test]
    fn fresh_checkpoint_starts_behind_head() {
        let s = strategy();
        assert_eq!(s.next_block(0, 99_000_000), 99_000_000 - 20);
        assert_eq!(s.next_block(0, 10), 1);
        assert_eq!(s.backlog(0, 99_000_000), 20);
    }
}
