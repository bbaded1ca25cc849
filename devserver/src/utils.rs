//! Utility functions

use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::errors::DevServerError;

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Stable hash of a build name.
///
/// Every caller in the lab must map the same build to the same devserver, so
/// this cannot use a per-process seeded hasher.
pub fn build_hash(build: &str) -> u64 {
    let digest = Sha256::digest(build.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// A build name that changes on every call, for selection without affinity
pub fn synthetic_build_name() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart {
    // Numbers sort before words, as in distutils' LooseVersion.
    Number(u64),
    Word(String),
}

fn version_parts(version: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut numeric = false;

    let flush = |current: &mut String, numeric: bool, parts: &mut Vec<VersionPart>| {
        if current.is_empty() {
            return;
        }
        let part = if numeric {
            current
                .parse()
                .map(VersionPart::Number)
                .unwrap_or_else(|_| VersionPart::Word(current.clone()))
        } else {
            VersionPart::Word(current.clone())
        };
        parts.push(part);
        current.clear();
    };

    for c in version.chars() {
        if c == '.' {
            flush(&mut current, numeric, &mut parts);
            continue;
        }
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != numeric {
            flush(&mut current, numeric, &mut parts);
        }
        numeric = is_digit;
        current.push(c);
    }
    flush(&mut current, numeric, &mut parts);
    parts
}

/// Compare two version strings component by component (`R20-2226.0.0`)
pub fn compare_loose_versions(a: &str, b: &str) -> Ordering {
    version_parts(a).cmp(&version_parts(b))
}

/// Call `check` every `interval` until it reports true.
///
/// Errors from `check` stop the loop immediately. Running past `timeout`
/// yields [`DevServerError::PollTimeout`] naming `what`.
pub async fn poll_until<F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<(), DevServerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, DevServerError>>,
{
    let started = Instant::now();
    loop {
        if check().await? {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(DevServerError::PollTimeout(format!(
                "{} after {}s",
                what,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_backoff() {
        let options = CooldownOptions::default();

        assert_eq!(calc_exp_backoff(&options, 0), Duration::from_secs(3));
        assert_eq!(calc_exp_backoff(&options, 1), Duration::from_secs(6));
        assert_eq!(calc_exp_backoff(&options, 2), Duration::from_secs(12));
        assert_eq!(calc_exp_backoff(&options, 10), Duration::from_secs(60)); // Capped at max
    }

    #[test]
    fn test_build_hash_is_stable() {
        let a = build_hash("x86-mario-release/R18-1586.0.0-a1-b1514");
        let b = build_hash("x86-mario-release/R18-1586.0.0-a1-b1514");
        assert_eq!(a, b);
        assert_ne!(a, build_hash("x86-mario-release/R18-1587.0.0-a1-b1514"));
    }

    #[test]
    fn test_loose_version_ordering() {
        assert_eq!(
            compare_loose_versions("R20-2226.0.0", "R20-2226.10.0"),
            Ordering::Less
        );
        assert_eq!(
            compare_loose_versions("R21-100.0.0", "R20-9999.0.0"),
            Ordering::Greater
        );
        assert_eq!(compare_loose_versions("1.2", "1.2"), Ordering::Equal);
        assert_eq!(compare_loose_versions("1.2a", "1.2.1"), Ordering::Greater);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let mut calls = 0;
        let result = poll_until("is_staged", Duration::from_secs(10), Duration::from_secs(5), || {
            calls += 1;
            async { Ok(false) }
        })
        .await;

        assert!(matches!(result, Err(DevServerError::PollTimeout(_))));
        assert_eq!(calls, 3);
    }
}
