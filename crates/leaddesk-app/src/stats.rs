// Bucket aggregation over a numeric document field.
//
// Each bucket is its own range query. The queries run concurrently and the
// results are placed by bucket index, so completion order never matters.

use futures_util::future::try_join_all;
use tracing::{debug, info};

use leaddesk_core::config::StatisticsConfig;
use leaddesk_core::{Collection, CoreError, DocumentStore};

use crate::format::compact;

/// `count` fixed-width buckets of `width` starting at zero, plus one
/// overflow bucket `[count * width, ∞)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    width: f64,
    count: usize,
}

impl BucketSpec {
    pub fn new(width: f64, count: usize) -> Result<Self, CoreError> {
        if !width.is_finite() || width <= 0.0 {
            return Err(CoreError::invalid(format!(
                "bucket width must be a positive number, got {width}"
            )));
        }
        if count == 0 {
            return Err(CoreError::invalid("bucket count must be at least 1"));
        }
        Ok(Self { width, count })
    }

    pub fn from_config(config: &StatisticsConfig) -> Result<Self, CoreError> {
        Self::new(config.bucket_width, config.bucket_count)
    }

    /// Number of buckets including the overflow bucket.
    pub fn len(&self) -> usize {
        self.count + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `[lower, upper)` of bucket `index`; the overflow bucket has no upper.
    pub fn bounds(&self, index: usize) -> (f64, Option<f64>) {
        let lower = self.width * index as f64;
        if index < self.count {
            (lower, Some(self.width * (index + 1) as f64))
        } else {
            (self.width * self.count as f64, None)
        }
    }

    /// Human labels: `£0-£200k`, ..., `>£1m`.
    pub fn labels(&self, currency: &str) -> Vec<String> {
        (0..self.len())
            .map(|i| match self.bounds(i) {
                (lower, Some(upper)) => {
                    format!("{}-{}", compact(currency, lower), compact(currency, upper))
                }
                (lower, None) => format!(">{}", compact(currency, lower)),
            })
            .collect()
    }
}

/// One count per bucket, in bucket order.
pub type BucketCounts = Vec<u64>;

/// Count the documents of `collection` in each bucket of `spec` by `field`.
///
/// Any failing range query fails the whole aggregation; no partial counts
/// are returned.
pub async fn aggregate(
    store: &dyn DocumentStore,
    collection: &Collection,
    field: &str,
    spec: &BucketSpec,
) -> Result<BucketCounts, CoreError> {
    collection.validate()?;
    let queries = (0..spec.len()).map(move |index| {
        let (lower, upper) = spec.bounds(index);
        async move {
            let count = store.count_range(collection, field, lower, upper).await?;
            debug!(index, lower, ?upper, count, "bucket counted");
            Ok::<u64, CoreError>(count)
        }
    });
    // try_join_all yields results in input order regardless of completion.
    try_join_all(queries).await
}

/// Counts paired with their labels, ready to show.
#[derive(Debug, Clone, PartialEq)]
pub struct MortgageStats {
    pub labels: Vec<String>,
    pub counts: BucketCounts,
}

impl MortgageStats {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, u64)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.counts.iter().copied())
    }
}

/// Aggregate using the configured statistics layout.
pub async fn load_stats(
    store: &dyn DocumentStore,
    config: &StatisticsConfig,
    currency: &str,
) -> Result<MortgageStats, CoreError> {
    let spec = BucketSpec::from_config(config)?;
    let counts = aggregate(
        store,
        &Collection::group(config.collection.as_str()),
        &config.field,
        &spec,
    )
    .await?;
    let stats = MortgageStats {
        labels: spec.labels(currency),
        counts,
    };
    info!(
        backend = store.backend_tag(),
        total = stats.total(),
        "Statistics loaded"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaddesk_core::memory::MemoryStore;
    use serde_json::json;

    fn store_with_loans(loans: &[serde_json::Value]) -> MemoryStore {
        let store = MemoryStore::new();
        for (i, loan) in loans.iter().enumerate() {
            store.insert(
                &format!("users/u{}/mortgages/m{i}", i % 3),
                json!({ "loan": loan }),
            );
        }
        store
    }

    fn spec() -> BucketSpec {
        BucketSpec::new(200_000.0, 5).unwrap()
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(matches!(
            BucketSpec::new(0.0, 5),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            BucketSpec::new(-1.0, 5),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            BucketSpec::new(f64::NAN, 5),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            BucketSpec::new(200_000.0, 0),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bounds_are_contiguous() {
        let spec = spec();
        assert_eq!(spec.len(), 6);
        for i in 0..spec.len() - 1 {
            let (_, upper) = spec.bounds(i);
            let (next_lower, _) = spec.bounds(i + 1);
            assert_eq!(upper, Some(next_lower));
        }
        assert_eq!(spec.bounds(0), (0.0, Some(200_000.0)));
        assert_eq!(spec.bounds(5), (1_000_000.0, None));
    }

    #[test]
    fn labels_follow_layout() {
        assert_eq!(
            spec().labels("£"),
            vec![
                "£0-£200k",
                "£200k-£400k",
                "£400k-£600k",
                "£600k-£800k",
                "£800k-£1m",
                ">£1m"
            ]
        );
    }

    #[tokio::test]
    async fn boundary_values_land_in_upper_bucket() {
        let store = store_with_loans(&[
            json!(0),
            json!(199_999),
            json!(200_000),
            json!(1_200_000),
        ]);
        let counts = aggregate(&store, &Collection::group("mortgages"), "loan", &spec())
            .await
            .unwrap();
        assert_eq!(counts, vec![2, 1, 0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn multiples_of_width_never_fall_below() {
        let loans: Vec<_> = (0..5).map(|k| json!(k * 200_000)).collect();
        let store = store_with_loans(&loans);
        let counts = aggregate(&store, &Collection::group("mortgages"), "loan", &spec())
            .await
            .unwrap();
        assert_eq!(counts, vec![1, 1, 1, 1, 1, 0]);
    }

    #[tokio::test]
    async fn sum_equals_numeric_record_count() {
        let store = store_with_loans(&[
            json!(5),
            json!(250_000.5),
            json!(999_999.99),
            json!(1_000_000),
            json!(7_500_000),
            json!("not a number"),
            json!(null),
        ]);
        for (width, count) in [(200_000.0, 5), (1.0, 1), (333_333.3, 7), (10_000_000.0, 3)] {
            let spec = BucketSpec::new(width, count).unwrap();
            let counts = aggregate(&store, &Collection::group("mortgages"), "loan", &spec)
                .await
                .unwrap();
            assert_eq!(counts.len(), count + 1);
            assert_eq!(counts.iter().sum::<u64>(), 5, "width={width} count={count}");
        }
    }

    #[tokio::test]
    async fn issues_one_query_per_bucket() {
        let store = store_with_loans(&[json!(1)]);
        aggregate(&store, &Collection::group("mortgages"), "loan", &spec())
            .await
            .unwrap();
        assert_eq!(store.range_query_count(), 6);
    }

    #[tokio::test]
    async fn one_failing_bucket_fails_everything() {
        let store = store_with_loans(&[json!(1), json!(600_000)]);
        store.fail_range_at(Some(400_000.0));
        let err = aggregate(&store, &Collection::group("mortgages"), "loan", &spec())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::QueryFailure(_)));
    }

    #[tokio::test]
    async fn load_stats_pairs_labels_with_counts() {
        let store = store_with_loans(&[json!(100), json!(450_000)]);
        let config = StatisticsConfig {
            collection: "mortgages".into(),
            field: "loan".into(),
            bucket_width: 200_000.0,
            bucket_count: 5,
        };
        let stats = load_stats(&store, &config, "£").await.unwrap();
        let rows: Vec<(&str, u64)> = stats.rows().collect();
        assert_eq!(rows[0], ("£0-£200k", 1));
        assert_eq!(rows[2], ("£400k-£600k", 1));
        assert_eq!(stats.total(), 2);
    }
}
