use serde::{Deserialize, Serialize};

/// Counters for the two inbound queues combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundQueueStats {
    pub queue_length: u64,
    pub queue_added: u64,
    pub queue_removed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InboundQueueMetrics {
    stats: InboundQueueStats,
}

impl InboundQueueMetrics {
    pub fn new(initial_length: u64) -> Self {
        Self {
            stats: InboundQueueStats {
                queue_length: initial_length,
                ..Default::default()
            },
        }
    }

    /// Record the observed queue length, attributing growth to additions and
    /// shrinkage to removals.
    pub fn update_length(&mut self, new_length: u64) {
        let old = self.stats.queue_length;
        if new_length >= old {
            self.stats.queue_added += new_length - old;
        } else {
            self.stats.queue_removed += old - new_length;
        }
        self.stats.queue_length = new_length;
    }

    /// One entry was taken off a queue.
    pub fn dec_stat(&mut self) {
        self.stats.queue_length = self.stats.queue_length.saturating_sub(1);
        self.stats.queue_removed += 1;
    }

    pub fn get_stats(&self) -> InboundQueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_additions_and_removals() {
        let mut metrics = InboundQueueMetrics::new(2);
        metrics.update_length(5);
        metrics.dec_stat();
        metrics.dec_stat();
        metrics.update_length(1);
        assert_eq!(
            metrics.get_stats(),
            InboundQueueStats {
                queue_length: 1,
                queue_added: 3,
                queue_removed: 4,
            }
        );
    }
}
