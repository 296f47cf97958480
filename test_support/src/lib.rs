//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Reads samples back out of encoded metrics text for assertions

/// Find the value of one sample in OpenMetrics/Prometheus exposition text.
///
/// `metric` is the full sample name as it appears in the text (for example
/// `app_creates_total` or `app_creates_duration_count`). `labels` is the
/// rendered label set without braces, in encoded order, for example
/// `database="main",driver="pg",status="success"`. Pass an empty string for
/// an unlabelled sample.
pub fn sample(text: &str, metric: &str, labels: &str) -> Option<f64> {
    let prefix = if labels.is_empty() {
        format!("{} ", metric)
    } else {
        format!("{}{{{}}} ", metric, labels)
    };

    text.lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<f64>().ok())
}

/// Sum every sample of `metric` whose label set contains all `fragments`.
pub fn sample_sum(text: &str, metric: &str, fragments: &[&str]) -> f64 {
    let with_labels = format!("{}{{", metric);

    text.lines()
        .filter_map(|line| line.strip_prefix(with_labels.as_str()))
        .filter_map(|rest| rest.split_once("} "))
        .filter(|(labels, _)| fragments.iter().all(|f| labels.contains(f)))
        .filter_map(|(_, value)| value.split_whitespace().next()?.parse::<f64>().ok())
        .sum()
}

/// Render a label set the way the encoder does: `k="v"` pairs joined by commas
pub fn render_labels(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
