use chrono::{DateTime, Local, Utc};
use cronwarden_core::{config::ScheduleTimezone, CronExpr, JobDefinition};
use cronwarden_supervisor::ScheduleMemo;

/// Minutes since the Unix epoch. Two instants in the same wall-clock minute
/// share a key in every timezone with whole-minute offsets.
pub fn minute_key(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// Pure match of `expr` against `at` read on the `tz` clock. Seconds are ignored.
pub fn matches_at(expr: &CronExpr, at: DateTime<Utc>, tz: ScheduleTimezone) -> bool {
    match tz {
        ScheduleTimezone::Utc => expr.matches(&at),
        ScheduleTimezone::Local => expr.matches(&at.with_timezone(&Local)),
    }
}

/// Whether `def` is due at `at`, firing at most once per matching minute.
///
/// A `true` answer is recorded in `memo`; later calls within the same minute
/// return `false`.
pub fn is_due(
    def: &JobDefinition,
    memo: &mut ScheduleMemo,
    at: DateTime<Utc>,
    tz: ScheduleTimezone,
) -> bool {
    let minute = minute_key(at);
    if memo.last_fired_minute == Some(minute) {
        return false;
    }
    if !matches_at(&def.start, at, tz) {
        return false;
    }
    memo.last_fired_minute = Some(minute);
    true
}

/// Boot trigger: due exactly once for `start_on_boot` jobs, regardless of
/// schedule. Also claims the boot minute so the first tick cannot fire again.
pub fn is_due_on_boot(def: &JobDefinition, memo: &mut ScheduleMemo, at: DateTime<Utc>) -> bool {
    if !def.start_on_boot || memo.last_fired_minute.is_some() {
        return false;
    }
    memo.last_fired_minute = Some(minute_key(at));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        // 2024-03-04 is a Monday.
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap()
    }

    fn job(start: &str) -> JobDefinition {
        JobDefinition::new("j", "true", CronExpr::parse(start).unwrap())
    }

    #[test]
    fn fires_once_per_matching_minute() {
        let def = job("* * * * *");
        let mut memo = ScheduleMemo::default();
        assert!(is_due(&def, &mut memo, at(9, 30, 0), ScheduleTimezone::Utc));
        assert!(!is_due(&def, &mut memo, at(9, 30, 0), ScheduleTimezone::Utc));
        assert!(!is_due(&def, &mut memo, at(9, 30, 59), ScheduleTimezone::Utc));
        assert!(is_due(&def, &mut memo, at(9, 31, 1), ScheduleTimezone::Utc));
    }

    #[test]
    fn non_matching_minute_leaves_memo_alone() {
        let def = job("*/15 9 * * mon");
        let mut memo = ScheduleMemo::default();
        assert!(!is_due(&def, &mut memo, at(9, 31, 0), ScheduleTimezone::Utc));
        assert_eq!(memo.last_fired_minute, None);
        assert!(is_due(&def, &mut memo, at(9, 45, 10), ScheduleTimezone::Utc));
        assert!(!is_due(&def, &mut memo, at(10, 0, 0), ScheduleTimezone::Utc));
    }

    #[test]
    fn repeated_queries_are_deterministic() {
        let def = job("0-10/5 * * * *");
        let base = at(12, 0, 0);
        for offset in 0..30 {
            let t = base + Duration::minutes(offset);
            let expected = matches_at(&def.start, t, ScheduleTimezone::Utc);
            let mut memo = ScheduleMemo::default();
            assert_eq!(is_due(&def, &mut memo, t, ScheduleTimezone::Utc), expected);
            assert!(!is_due(&def, &mut memo, t, ScheduleTimezone::Utc));
        }
    }

    #[test]
    fn boot_trigger_fires_once_and_claims_the_minute() {
        let mut def = job("0 0 1 1 *");
        def.start_on_boot = true;
        let mut memo = ScheduleMemo::default();
        assert!(is_due_on_boot(&def, &mut memo, at(9, 30, 5)));
        assert!(!is_due_on_boot(&def, &mut memo, at(9, 30, 6)));
        assert_eq!(memo.last_fired_minute, Some(minute_key(at(9, 30, 0))));

        let plain = job("* * * * *");
        let mut memo = ScheduleMemo::default();
        assert!(!is_due_on_boot(&plain, &mut memo, at(9, 30, 5)));
        assert!(is_due(&plain, &mut memo, at(9, 30, 5), ScheduleTimezone::Utc));
    }

    #[test]
    fn minute_key_truncates() {
        assert_eq!(minute_key(at(0, 1, 0)), minute_key(at(0, 1, 59)));
        assert_eq!(minute_key(at(0, 1, 0)) + 1, minute_key(at(0, 2, 0)));
    }
}
