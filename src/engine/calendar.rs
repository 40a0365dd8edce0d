use chrono::NaiveDate;

use crate::limits::{MAX_PROVISION_DAYS, MAX_STAY_NIGHTS};

use super::EngineError;

/// Nights of the half-open stay `[check_in, check_out)`, in order.
pub fn stay_days(check_in: NaiveDate, check_out: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
    expand(check_in, check_out, MAX_STAY_NIGHTS, "stay too long")
}

/// Days of a provisioning range `[from, to)`.
pub fn range_days(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
    expand(from, to, MAX_PROVISION_DAYS, "date range too wide")
}

fn expand(
    start: NaiveDate,
    end: NaiveDate,
    limit: usize,
    too_long: &'static str,
) -> Result<Vec<NaiveDate>, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidDateRange {
            check_in: start,
            check_out: end,
        });
    }
    let len = (end - start).num_days() as usize;
    if len > limit {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(start.iter_days().take(len).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn two_night_stay() {
        let days = stay_days(d(2024, 6, 1), d(2024, 6, 3)).unwrap();
        assert_eq!(days, vec![d(2024, 6, 1), d(2024, 6, 2)]);
    }

    #[test]
    fn checkout_night_not_included() {
        let days = stay_days(d(2024, 6, 5), d(2024, 6, 6)).unwrap();
        assert_eq!(days, vec![d(2024, 6, 5)]);
    }

    #[test]
    fn zero_nights_rejected() {
        let result = stay_days(d(2024, 6, 5), d(2024, 6, 5));
        assert!(matches!(result, Err(EngineError::InvalidDateRange { .. })));
    }

    #[test]
    fn inverted_range_rejected() {
        let result = stay_days(d(2024, 6, 5), d(2024, 6, 1));
        assert!(matches!(result, Err(EngineError::InvalidDateRange { .. })));
    }

    #[test]
    fn crosses_month_and_leap_day() {
        let days = stay_days(d(2024, 2, 28), d(2024, 3, 2)).unwrap();
        assert_eq!(days, vec![d(2024, 2, 28), d(2024, 2, 29), d(2024, 3, 1)]);
    }

    #[test]
    fn stay_length_limit() {
        let start = d(2024, 1, 1);
        let at_limit = start + chrono::Days::new(MAX_STAY_NIGHTS as u64);
        assert_eq!(stay_days(start, at_limit).unwrap().len(), MAX_STAY_NIGHTS);
        let over = start + chrono::Days::new(MAX_STAY_NIGHTS as u64 + 1);
        assert!(matches!(
            stay_days(start, over),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn provisioning_range_is_wider_than_a_stay() {
        let start = d(2024, 1, 1);
        let end = start + chrono::Days::new(MAX_STAY_NIGHTS as u64 + 30);
        assert!(stay_days(start, end).is_err());
        assert_eq!(range_days(start, end).unwrap().len(), MAX_STAY_NIGHTS + 30);
    }
}
