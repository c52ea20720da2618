//! Binary-search seek over a list of record IDs.
//!
//! Used by vendors that only expose "list all open IDs" plus "fetch one by ID":
//! on the first fetch, the IDs older than the first-fetch time are skipped
//! without fetching each of them.

use crate::error::FetchResult;
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use tracing::debug;

/// Looks up the time of a single record by ID.
#[async_trait]
pub trait TimeProbe<Id: Sync>: Send + Sync {
    async fn time_of(&self, id: &Id) -> FetchResult<Timestamp>;
}

/// Returns the suffix of `ids` whose record times reach `target`.
///
/// `ids` must be sorted so that record times are non-decreasing along it. The
/// result starts at the first ID whose time is `>= target`; it is empty when
/// every record is older. Needs at most `ceil(log2 n) + 1` probes.
pub async fn seek<Id, P>(ids: &[Id], target: Timestamp, probe: &P) -> FetchResult<Vec<Id>>
where
    Id: Clone + Sync + std::fmt::Debug,
    P: TimeProbe<Id> + ?Sized,
{
    let mut lo = 0usize;
    let mut hi = ids.len();
    let mut probes = 0usize;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let time = probe.time_of(&ids[mid]).await?;
        probes += 1;
        if time < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    debug!(
        total = ids.len(),
        start = lo,
        probes,
        target = %target,
        "Seek finished"
    );
    Ok(ids[lo..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapProbe {
        times: HashMap<u64, i64>,
        calls: AtomicUsize,
    }

    impl MapProbe {
        fn new(pairs: &[(u64, i64)]) -> Self {
            Self {
                times: pairs.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TimeProbe<u64> for MapProbe {
        async fn time_of(&self, id: &u64) -> FetchResult<Timestamp> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.times
                .get(id)
                .and_then(|secs| Timestamp::from_epoch_secs(*secs))
                .ok_or_else(|| FetchError::Fatal(format!("no time for {}", id)))
        }
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    #[tokio::test]
    async fn test_seek_finds_lower_bound() {
        let probe = MapProbe::new(&[(1, 10), (2, 20), (3, 20), (4, 30), (5, 40)]);
        let ids = vec![1, 2, 3, 4, 5];

        assert_eq!(seek(&ids, ts(20), &probe).await.unwrap(), vec![2, 3, 4, 5]);
        assert_eq!(seek(&ids, ts(25), &probe).await.unwrap(), vec![4, 5]);
        assert_eq!(seek(&ids, ts(0), &probe).await.unwrap(), ids);
        assert!(seek(&ids, ts(41), &probe).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek_empty_list_does_not_probe() {
        let probe = MapProbe::new(&[]);
        let ids: Vec<u64> = vec![];
        assert!(seek(&ids, ts(0), &probe).await.unwrap().is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_seek_probe_count_is_logarithmic() {
        let pairs: Vec<(u64, i64)> = (0..1000).map(|i| (i, i as i64)).collect();
        let probe = MapProbe::new(&pairs);
        let ids: Vec<u64> = (0..1000).collect();

        let result = seek(&ids, ts(777), &probe).await.unwrap();
        assert_eq!(result.first(), Some(&777));
        assert!(probe.calls.load(Ordering::SeqCst) <= 11);
    }

    #[tokio::test]
    async fn test_seek_propagates_probe_error() {
        let probe = MapProbe::new(&[(1, 10)]);
        let ids = vec![1, 2, 3];
        let err = seek(&ids, ts(5), &probe).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
