use crate::director::DirectorResult;
use crate::director::cycle::SubmissionConsumer;
use crate::director::scoring::{RankedQueue, RankedQueueList};

/// Submission consumer that only logs where pilots would be placed.
///
/// Queues are taken in rank order. Queues that could not be scored are skipped, and at most
/// `max_queues` queues receive pilots in a single cycle.
pub struct PilotPlacementLog {
    max_queues: Option<usize>,
}

impl PilotPlacementLog {
    pub fn new(max_queues: Option<usize>) -> Self {
        Self { max_queues }
    }

    pub fn placement_order<'a>(&self, ranking: &'a RankedQueueList) -> Vec<&'a RankedQueue> {
        ranking
            .iter()
            .filter(|queue| !queue.score.is_worst())
            .take(self.max_queues.unwrap_or(usize::MAX))
            .collect()
    }
}

impl SubmissionConsumer for PilotPlacementLog {
    fn consume(&mut self, ranking: &RankedQueueList) -> DirectorResult<()> {
        let order = self.placement_order(ranking);
        if order.is_empty() {
            log::warn!("None of {} ranked queue(s) can receive pilots", ranking.len());
            return Ok(());
        }
        for (index, queue) in order.iter().enumerate() {
            log::info!(
                "Pilot placement #{}: {} at {} (CE {}, score {})",
                index + 1,
                queue.queue_name,
                queue.site,
                queue.ce_name,
                queue.score
            );
        }
        Ok(())
    }
}
