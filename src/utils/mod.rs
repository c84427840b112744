use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

pub mod metrics;
pub mod validation;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Raw cosine similarity in [-1, 1]; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

/// Cosine similarity mapped onto the [0, 1] range used for search scores.
pub fn similarity_score(cosine: f32) -> f32 {
    cosine.clamp(0.0, 1.0)
}

pub fn normalize_vector(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// `a * weight_a + b * weight_b`, re-normalized to unit length.
pub fn blend(a: &[f32], weight_a: f32, b: &[f32], weight_b: f32) -> Vec<f32> {
    let mut blended: Vec<f32> = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| x * weight_a + y * weight_b)
        .collect();
    normalize_vector(&mut blended);
    blended
}

/// Weight in (0, 1] that halves every `half_life_days` before `reference`.
pub fn exponential_decay_weight(
    timestamp: DateTime<Utc>,
    reference: DateTime<Utc>,
    half_life_days: f64,
) -> f32 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = reference.signed_duration_since(timestamp).num_seconds().max(0) as f64 / 86_400.0;
    (0.5f64).powf(age_days / half_life_days) as f32
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Runs `operation` up to `max_attempts` times, sleeping with jittered
/// exponential backoff between attempts that `should_retry` accepts.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    max_attempts: usize,
    initial_delay: Duration,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }

                let jitter_ms = rand::thread_rng().gen_range(0..=(delay.as_millis() as u64 / 2).max(1));
                let sleep_for = delay + Duration::from_millis(jitter_ms);
                tracing::warn!(attempt, ?sleep_for, error = ?e, "operation failed, retrying");
                tokio::time::sleep(sleep_for).await;
                delay *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        let a = vec![1.0, 1.0];
        let b = vec![1.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let opposite = vec![-1.0, -1.0];
        assert_eq!(similarity_score(cosine_similarity(&a, &opposite)), 0.0);
    }

    #[test]
    fn test_normalize_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_vector(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_vector(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_blend_is_unit_length_and_between_inputs() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let blended = blend(&a, 0.6, &b, 0.4);
        assert!((l2_norm(&blended) - 1.0).abs() < 1e-6);
        assert!(blended[0] > blended[1]);
        assert!(cosine_similarity(&blended, &a) > 0.0);
        assert!(cosine_similarity(&blended, &b) > 0.0);
    }

    #[test]
    fn test_exponential_decay_weight() {
        let now = Utc::now();
        assert!((exponential_decay_weight(now, now, 30.0) - 1.0).abs() < 1e-6);
        let month_ago = now - chrono::Duration::days(30);
        assert!((exponential_decay_weight(month_ago, now, 30.0) - 0.5).abs() < 1e-3);
        assert_eq!(exponential_decay_weight(month_ago, now, 0.0), 1.0);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("eau de café", 10), "eau de caf");
        assert_eq!(truncate_chars("café", 4), "café");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn test_retry_with_backoff_stops_on_non_retryable() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry_with_backoff(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            5,
            Duration::from_millis(1),
            |e| *e != "fatal",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_eventually_succeeds() {
        let result: Result<usize, &str> = retry_with_backoff(
            |attempt| async move {
                if attempt < 3 {
                    Err("busy")
                } else {
                    Ok(attempt)
                }
            },
            3,
            Duration::from_millis(1),
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(3));
    }
}
