//! Expiration policy: turns an optional client duration such as `"90m"`,
//! `"12h"` or `"3d"` into an absolute expiration timestamp, clamped to the
//! allowed lifetime window.

use chrono::{DateTime, Duration, Utc};

const DEFAULT_LIFETIME_DAYS: i64 = 7;
const MIN_LIFETIME_MINUTES: i64 = 10;
const MAX_LIFETIME_DAYS: i64 = 30;

/// Outcome of [`ExpirationPolicy::compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    pub expires_at: DateTime<Utc>,
    /// Set only when the requested lifetime had to be clamped.
    pub advisory: Option<String>,
}

/// Lifetime bounds applied to every upload.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    pub default_lifetime: Duration,
    pub min_lifetime: Duration,
    pub max_lifetime: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            default_lifetime: Duration::days(DEFAULT_LIFETIME_DAYS),
            min_lifetime: Duration::minutes(MIN_LIFETIME_MINUTES),
            max_lifetime: Duration::days(MAX_LIFETIME_DAYS),
        }
    }
}

/// A parsed duration request. `Overflow` keeps the sign of a magnitude too
/// large to represent so it still clamps in the right direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requested {
    Lifetime(Duration),
    Overflow { negative: bool },
}

impl ExpirationPolicy {
    /// Compute the expiration for an upload accepted at `uploaded_at`.
    ///
    /// Absent or unparseable requests silently get the default lifetime.
    /// Parseable requests outside `[min_lifetime, max_lifetime]` are clamped
    /// and an advisory describing the adjustment is returned.
    pub fn compute(&self, uploaded_at: DateTime<Utc>, requested: Option<&str>) -> Expiration {
        let Some(requested) = requested.and_then(parse_duration) else {
            return Expiration {
                expires_at: uploaded_at + self.default_lifetime,
                advisory: None,
            };
        };

        match requested {
            Requested::Lifetime(lifetime) if lifetime < self.min_lifetime => {
                self.clamp_to_min(uploaded_at)
            }
            Requested::Overflow { negative: true } => self.clamp_to_min(uploaded_at),
            Requested::Lifetime(lifetime) if lifetime > self.max_lifetime => {
                self.clamp_to_max(uploaded_at)
            }
            Requested::Overflow { negative: false } => self.clamp_to_max(uploaded_at),
            Requested::Lifetime(lifetime) => Expiration {
                expires_at: uploaded_at + lifetime,
                advisory: None,
            },
        }
    }

    fn clamp_to_min(&self, uploaded_at: DateTime<Utc>) -> Expiration {
        Expiration {
            expires_at: uploaded_at + self.min_lifetime,
            advisory: Some(format!(
                "Expiration time too short. Minimum is {}, so it has been adjusted.",
                describe(self.min_lifetime)
            )),
        }
    }

    fn clamp_to_max(&self, uploaded_at: DateTime<Utc>) -> Expiration {
        Expiration {
            expires_at: uploaded_at + self.max_lifetime,
            advisory: Some(format!(
                "Expiration time too long. Maximum is {}, so it has been adjusted.",
                describe(self.max_lifetime)
            )),
        }
    }
}

/// Parse `[+-]<digits><m|h|d>`. Anything else yields `None`.
fn parse_duration(raw: &str) -> Option<Requested> {
    let raw = raw.trim();
    let unit = raw.chars().last()?;
    let body = &raw[..raw.len() - unit.len_utf8()];

    let (negative, digits) = match body.as_bytes().first()? {
        b'-' => (true, &body[1..]),
        b'+' => (false, &body[1..]),
        _ => (false, body),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let overflow = Requested::Overflow { negative };
    let Ok(magnitude) = digits.parse::<i64>() else {
        return Some(overflow);
    };
    let value = if negative { -magnitude } else { magnitude };

    let lifetime = match unit {
        'm' => Duration::try_minutes(value),
        'h' => Duration::try_hours(value),
        'd' => Duration::try_days(value),
        _ => return None,
    };
    Some(lifetime.map_or(overflow, Requested::Lifetime))
}

/// Render a bound like `10 minutes` or `30 days` for advisories.
fn describe(lifetime: Duration) -> String {
    let (value, unit) = if lifetime.num_days() > 0 && lifetime == Duration::days(lifetime.num_days())
    {
        (lifetime.num_days(), "day")
    } else if lifetime.num_hours() > 0
        && lifetime == Duration::hours(lifetime.num_hours())
    {
        (lifetime.num_hours(), "hour")
    } else {
        (lifetime.num_minutes(), "minute")
    };
    if value == 1 {
        format!("{value} {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upload_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn too_short_is_clamped_to_minimum() {
        let t = upload_time();
        let exp = ExpirationPolicy::default().compute(t, Some("5m"));
        assert_eq!(exp.expires_at, t + Duration::minutes(10));
        let advisory = exp.advisory.expect("clamp should explain itself");
        assert!(advisory.contains("too short"), "{advisory}");
        assert!(advisory.contains("10 minutes"), "{advisory}");
    }

    #[test]
    fn too_long_is_clamped_to_maximum() {
        let t = upload_time();
        let exp = ExpirationPolicy::default().compute(t, Some("90d"));
        assert_eq!(exp.expires_at, t + Duration::days(30));
        let advisory = exp.advisory.expect("clamp should explain itself");
        assert!(advisory.contains("too long"), "{advisory}");
        assert!(advisory.contains("30 days"), "{advisory}");
    }

    #[test]
    fn missing_or_malformed_uses_default_silently() {
        let t = upload_time();
        let policy = ExpirationPolicy::default();
        for requested in [None, Some("xyz"), Some(""), Some("12"), Some("h"), Some("3w"), Some("1.5h"), Some("-")] {
            let exp = policy.compute(t, requested);
            assert_eq!(exp.expires_at, t + Duration::days(7), "{requested:?}");
            assert_eq!(exp.advisory, None, "{requested:?}");
        }
    }

    #[test]
    fn in_range_requests_are_honoured() {
        let t = upload_time();
        let policy = ExpirationPolicy::default();
        assert_eq!(policy.compute(t, Some("10m")).expires_at, t + Duration::minutes(10));
        assert_eq!(policy.compute(t, Some("90m")).expires_at, t + Duration::minutes(90));
        assert_eq!(policy.compute(t, Some("12h")).expires_at, t + Duration::hours(12));
        assert_eq!(policy.compute(t, Some(" 30d ")).expires_at, t + Duration::days(30));
        assert_eq!(policy.compute(t, Some("+2d")).advisory, None);
    }

    #[test]
    fn negative_and_overflowing_requests_clamp() {
        let t = upload_time();
        let policy = ExpirationPolicy::default();

        let negative = policy.compute(t, Some("-3h"));
        assert_eq!(negative.expires_at, t + Duration::minutes(10));
        assert!(negative.advisory.is_some());

        let huge = policy.compute(t, Some("99999999999999999999999d"));
        assert_eq!(huge.expires_at, t + Duration::days(30));
        assert!(huge.advisory.is_some());

        let huge_negative = policy.compute(t, Some("-9223372036854775807d"));
        assert_eq!(huge_negative.expires_at, t + Duration::minutes(10));
        assert!(huge_negative.advisory.is_some());
    }

    #[test]
    fn lifetime_always_within_bounds_and_advisory_iff_clamped() {
        let t = upload_time();
        let policy = ExpirationPolicy::default();
        for value in [0i64, 1, 9, 10, 11, 59, 60, 600, 719, 720, 721, 43_199, 43_200, 43_201, 100_000] {
            for unit in ['m', 'h', 'd'] {
                let raw = format!("{value}{unit}");
                let exp = policy.compute(t, Some(&raw));
                let lifetime = exp.expires_at - t;
                assert!(lifetime >= policy.min_lifetime, "{raw}");
                assert!(lifetime <= policy.max_lifetime, "{raw}");

                let requested = match unit {
                    'm' => Duration::minutes(value),
                    'h' => Duration::hours(value),
                    _ => Duration::days(value),
                };
                let clamped = requested < policy.min_lifetime || requested > policy.max_lifetime;
                assert_eq!(exp.advisory.is_some(), clamped, "{raw}");
            }
        }
    }
}
