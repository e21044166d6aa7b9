// Semaphore-bounded pool gating concurrent background generation jobs
// (room/biome/image generation). Grounded on the teacher's `WorkerPool`
// capacity-tracking shape, adapted from a fixed OS-thread pool to an async
// permit pool since generation work here is I/O-bound, not CPU-bound.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

pub struct GenerationPool {
    semaphore: Semaphore,
    capacity: usize,
}

impl GenerationPool {
    pub fn new(capacity: usize) -> Self {
        GenerationPool {
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Waits for a permit; callers hold the returned guard for the
    /// duration of the generation job.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("generation pool semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generation_pool_reports_capacity() {
        let pool = Arc::new(GenerationPool::new(2));
        assert!(pool.has_capacity());
        let _p1 = pool.acquire().await;
        let _p2 = pool.acquire().await;
        assert!(!pool.has_capacity());
    }
}
