/// Rayon thread pool owned by a [`DataLoader`](crate::DataLoader).
///
/// Sample decoding and batch augmentation, including the parallel resize in
/// `depthseq-imageproc`, run inside [`ThreadPool::run`]. Any Rayon work they
/// spawn therefore stays on this pool instead of Rayon's global pool, and the
/// number of threads matches [`Config::num_threads`](crate::Config::num_threads).
pub struct ThreadPool {
    /// `None` if the pool could not be built. Work then runs on the calling
    /// thread.
    pool: Option<rayon::ThreadPool>,
}

impl ThreadPool {
    /// Create a pool of `num_threads` threads named `depthseq-loader-{index}`.
    pub fn with_num_threads(num_threads: usize) -> ThreadPool {
        let built = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("depthseq-loader-{}", index))
            .build();

        match built {
            Ok(pool) => ThreadPool { pool: Some(pool) },
            Err(err) => {
                tracing::warn!(
                    num_threads,
                    "failed to create loader thread pool, running on the caller: {}",
                    err
                );
                ThreadPool { pool: None }
            }
        }
    }

    /// Run `op` with this pool as the current Rayon pool.
    pub fn run<R: Send, Op: FnOnce() -> R + Send>(&self, op: Op) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Return the number of threads work is spread over.
    pub fn num_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, |pool| pool.current_num_threads())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rayon::prelude::*;
    use rten_tensor::prelude::*;
    use rten_tensor::NdTensor;

    use super::ThreadPool;

    #[test]
    fn test_thread_pool_run() {
        let pool = ThreadPool::with_num_threads(2);
        assert_eq!(pool.num_threads(), 2);

        let name = pool.run(|| std::thread::current().name().map(|s| s.to_string()));
        assert!(name.unwrap_or_default().starts_with("depthseq-loader-"));

        let sum: i32 = pool.run(|| (0..100).into_par_iter().sum());
        assert_eq!(sum, 4950);
    }

    #[test]
    fn test_nested_parallel_work_stays_on_pool() {
        let pool = ThreadPool::with_num_threads(3);

        // Same shape of loop as the per-image resize: one mutable chunk per
        // image, processed with `par_chunks_mut`.
        let names = Mutex::new(Vec::new());
        let mut data = vec![0u8; 16 * 64];
        let num_threads = pool.run(|| {
            data.par_chunks_mut(64).for_each(|chunk| {
                chunk.fill(1);
                let name = std::thread::current().name().map(|s| s.to_string());
                names.lock().unwrap().push(name.unwrap_or_default());
            });
            rayon::current_num_threads()
        });

        assert_eq!(num_threads, 3);
        assert!(data.iter().all(|&x| x == 1));
        let names = names.into_inner().unwrap();
        assert_eq!(names.len(), 16);
        assert!(names.iter().all(|name| name.starts_with("depthseq-loader-")));

        // Resizing uses the pool it is called from.
        let images = NdTensor::full([4, 6, 8, 3], 10u8);
        let resized = pool
            .run(|| depthseq_imageproc::resize_area(images.view(), 7, 9))
            .unwrap();
        assert_eq!(resized.shape(), [4, 7, 9, 3]);
    }
}
