//! Worker pool for optimizer updates.

use kore_core::{KoreError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Build a pool of `num_threads` workers (rayon's default count if None).
pub fn build_pool(num_threads: Option<usize>) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("kore-optim-{i}"));
    if let Some(n) = num_threads {
        if n == 0 {
            return Err(KoreError::ThreadPool("pool needs at least one thread".into()));
        }
        builder = builder.num_threads(n);
    }
    let pool = builder.build().map_err(|e| KoreError::ThreadPool(e.to_string()))?;
    tracing::debug!("optimizer pool: {} threads", pool.current_num_threads());
    Ok(pool)
}
