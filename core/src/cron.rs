//! Periodic dispatch time calculation.
//!
//! Daily/weekly/biweekly/monthly anchoring against UTC midnight, built on
//! `chrono` calendar arithmetic instead of hand-rolled modulo math.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::model::{PeriodPreset, SchedulingGroup};

fn midnight(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let this = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
    let next = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).unwrap();
    (next - this).num_days()
}

/// Returns `(period_start, period_size)` for the period containing `now`.
fn period_bounds(now: DateTime<Utc>, group: &SchedulingGroup) -> anyhow::Result<(DateTime<Utc>, Duration)> {
    match group.period_preset {
        None => {
            let period = group
                .period
                .filter(|p| *p > 0)
                .ok_or_else(|| anyhow::anyhow!("expected nonzero period when period_preset is unset"))?
                as i64;
            let secs = now.timestamp();
            let start = secs - secs.rem_euclid(period);
            Ok((
                Utc.timestamp_opt(start, 0).unwrap(),
                Duration::seconds(period),
            ))
        }
        Some(preset) => {
            let mid = midnight(now);
            match preset {
                PeriodPreset::Daily => Ok((mid, Duration::days(1))),
                PeriodPreset::Weekly => {
                    // convert chrono's Monday==0 weekday to Sunday==0.
                    let dow = mid.weekday().num_days_from_sunday() as i64;
                    Ok((mid - Duration::days(dow), Duration::days(7)))
                }
                PeriodPreset::Biweekly => {
                    let month_start = mid.with_day(1).unwrap();
                    let to_sunday = (6 - month_start.weekday().num_days_from_monday() as i64).rem_euclid(7);
                    let mut anchor_day = (month_start + Duration::days(to_sunday)).day() as i64;
                    if mid.day() as i64 - anchor_day >= 14 {
                        anchor_day += 14;
                    }
                    let pt = mid.with_day(anchor_day as u32).unwrap_or(month_start);
                    Ok((pt, Duration::days(14)))
                }
                PeriodPreset::Monthly => {
                    let len = days_in_month(mid.year(), mid.month());
                    Ok((mid.with_day(1).unwrap(), Duration::days(len)))
                }
            }
        }
    }
}

/// The next dispatch instant at or after `now`, for a scheduling group whose
/// `dispatch_times` are offsets in seconds from the start of its period.
/// Empty `dispatch_times` behaves as a single dispatch at offset zero.
pub fn next_time(now: DateTime<Utc>, group: &SchedulingGroup) -> anyhow::Result<DateTime<Utc>> {
    let mut dispatch_times = group.dispatch_times.clone();
    if dispatch_times.is_empty() {
        dispatch_times.push(0);
    }
    dispatch_times.sort_unstable();

    let (period_start, period_size) = period_bounds(now, group)?;
    for &t in &dispatch_times {
        if t as i64 >= period_size.num_seconds() {
            anyhow::bail!(
                "dispatch time {t}s falls outside the {}s period",
                period_size.num_seconds()
            );
        }
    }

    let offset = (now - period_start).num_seconds();
    let idx = dispatch_times.partition_point(|&t| t as i64 <= offset);
    if idx == dispatch_times.len() {
        Ok(period_start + period_size + Duration::seconds(dispatch_times[0] as i64))
    } else {
        Ok(period_start + Duration::seconds(dispatch_times[idx] as i64))
    }
}
