//! Statistical cleanup of raw ambient-brightness bursts.
//!
//! A capture session yields a handful of raw readings that may contain
//! scattered sensor noise (a frame caught mid-exposure) or a monotonic ramp
//! (auto-exposure settling after the device is opened). The strict pass
//! handles the former, the grouped-stability fallback the latter.

/// Deviation above which a sample set is considered noisy.
const STDDEV_THRESHOLD: f64 = 3.0;

/// Window length for the grouped-stability fallback.
const STABLE_WINDOW: usize = 5;

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Reduces a raw sample burst to its trustworthy subset.
///
/// Returns at most `samples.len()` values, in their original order. An empty
/// result means no run of samples ever settled and the caller should request
/// another burst.
pub fn filter(samples: &[f64]) -> Vec<f64> {
    if samples.len() < 2 {
        return samples.to_vec();
    }

    let survivors = strict_pass(samples);

    // A strict pass that threw away more than a third of the burst usually
    // means the burst was a settling ramp, not scattered noise. Fall back to
    // looking for the first stable run in the original order.
    let discarded = samples.len() - survivors.len();
    if discarded * 3 > samples.len() {
        stable_suffix(samples)
    } else {
        survivors
    }
}

/// Iterative mean/stddev rejection: while the set is noisy, drop everything
/// more than one standard deviation from the mean and recompute.
fn strict_pass(samples: &[f64]) -> Vec<f64> {
    let mut current = samples.to_vec();
    while current.len() >= 3 {
        let dev = std_dev(&current);
        if dev <= STDDEV_THRESHOLD {
            break;
        }
        let mean = current.iter().sum::<f64>() / current.len() as f64;
        let kept: Vec<f64> = current
            .iter()
            .copied()
            .filter(|v| (v - mean).abs() <= dev)
            .collect();
        if kept.len() == current.len() {
            break;
        }
        current = kept;
    }
    current
}

/// Finds the first window of `STABLE_WINDOW` consecutive samples whose
/// deviation is within the threshold and returns the suffix starting there.
fn stable_suffix(samples: &[f64]) -> Vec<f64> {
    if samples.len() >= STABLE_WINDOW {
        for start in 0..=(samples.len() - STABLE_WINDOW) {
            if std_dev(&samples[start..start + STABLE_WINDOW]) <= STDDEV_THRESHOLD {
                return samples[start..].to_vec();
            }
        }
    }
    Vec::new()
}
