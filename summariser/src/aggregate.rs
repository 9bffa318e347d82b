use netgauge_summary_model::{MeasurementSet, SummaryStats};

/// Compute [SummaryStats] over the sample values of a set.
///
/// Uses the sample standard deviation (`n - 1` denominator), which is `0.0` for fewer than two
/// samples. An empty set gives [SummaryStats::empty].
pub fn summarize(set: &MeasurementSet) -> SummaryStats {
    summarize_values(set.values())
}

pub(crate) fn summarize_values(values: impl Iterator<Item = f64> + Clone) -> SummaryStats {
    let count = values.clone().count();
    if count == 0 {
        return SummaryStats::empty();
    }

    let (min, max, sum) = values.clone().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), v| (min.min(v), max.max(v), sum + v),
    );
    let mean = sum / count as f64;

    let stddev = if count < 2 {
        0.0
    } else {
        let squares = values.map(|v| (v - mean).powi(2)).sum::<f64>();
        (squares / (count - 1) as f64).sqrt()
    };

    SummaryStats {
        min,
        max,
        mean,
        stddev,
        count,
    }
}

#[cfg(test)]
mod tests {
    use netgauge_summary_model::{Sample, ToolKind};

    use super::*;

    fn set_of(values: &[f64]) -> MeasurementSet {
        MeasurementSet::new(
            ToolKind::NlmtClient,
            values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample::new(i as u64, *v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn known_series() {
        let stats = summarize(&set_of(&[10.0, 20.0, 30.0]));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
        assert!((stats.stddev - 10.0).abs() < 1e-12, "{}", stats.stddev);
    }

    #[test]
    fn stddev_is_zero_below_two_samples() {
        let stats = summarize(&set_of(&[42.0]));
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.count, 1);

        let stats = summarize(&set_of(&[]));
        assert_eq!(stats, SummaryStats::empty());
        assert!(!stats.stddev.is_nan());
    }

    #[test]
    fn repeated_summaries_are_identical() {
        let set = set_of(&[1.5, 2.25, 9.0, 0.125]);
        let before = set.clone();

        let first = summarize(&set);
        let second = summarize(&set);

        assert_eq!(first, second);
        assert_eq!(set, before);
    }
}
