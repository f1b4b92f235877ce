//! Data-parallel tier backed by rayon's global pool.
//!
//! Inputs are already contiguous slices, which is the native form rayon
//! splits on, so no conversion step is needed before or after the map.

use crate::accel::TierError;
#[cfg(not(feature = "vectorized"))]
use crate::accel::Backend;

/// Initialise the global pool and report its thread count.
#[cfg(feature = "vectorized")]
pub fn initialize() -> Result<usize, String> {
    // Fails harmlessly when another caller already built the global pool.
    let _ = rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("speedify-vector-{i}"))
        .build_global();

    std::panic::catch_unwind(rayon::current_num_threads)
        .map_err(|payload| crate::accel::panic_message(payload.as_ref()))
}

#[cfg(not(feature = "vectorized"))]
pub fn initialize() -> Result<usize, String> {
    Err("built without the `vectorized` feature".to_string())
}

/// Apply `task` to every index in `0..len` across the pool.
///
/// Indexed collection keeps output position `i` bound to input `i`. The first
/// failing task aborts the whole map.
#[cfg(feature = "vectorized")]
pub fn map_indexed<O, T>(len: usize, task: T) -> Result<Vec<O>, TierError>
where
    O: Send,
    T: Fn(usize) -> Result<O, TierError> + Sync + Send,
{
    use rayon::prelude::*;

    (0..len).into_par_iter().map(task).collect()
}

#[cfg(not(feature = "vectorized"))]
pub fn map_indexed<O, T>(_len: usize, _task: T) -> Result<Vec<O>, TierError>
where
    O: Send,
    T: Fn(usize) -> Result<O, TierError> + Sync + Send,
{
    Err(TierError::Unavailable {
        backend: Backend::Vectorized,
    })
}

#[cfg(all(test, feature = "vectorized"))]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_reports_threads() {
        let threads = initialize().unwrap();
        assert!(threads >= 1);
    }

    #[test]
    fn test_map_preserves_order() {
        let out = map_indexed(1000, |i| Ok::<_, TierError>(i * 3)).unwrap();
        assert_eq!(out.len(), 1000);
        assert!(out.iter().enumerate().all(|(i, v)| *v == i * 3));
    }

    #[test]
    fn test_map_reports_failure() {
        let err = map_indexed(64, |i| {
            if i == 17 {
                Err(TierError::Panicked {
                    index: i,
                    message: "bad input".to_string(),
                })
            } else {
                Ok(i)
            }
        })
        .unwrap_err();
        assert!(matches!(err, TierError::Panicked { index: 17, .. }));
    }

    #[test]
    fn test_empty_map() {
        let out: Vec<usize> = map_indexed(0, |i| Ok(i)).unwrap();
        assert!(out.is_empty());
    }
}
