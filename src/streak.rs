use chrono::{Duration, Local, NaiveDate};
use std::collections::BTreeSet;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Number of consecutive days, ending today or yesterday, that carry a
/// completion mark. Duplicate marks count once.
pub fn compute_streak<'a, I>(completed: I, today: NaiveDate) -> u32
where
    I: IntoIterator<Item = &'a NaiveDate>,
{
    let dates: BTreeSet<NaiveDate> = completed.into_iter().copied().collect();
    let mut descending = dates.iter().rev();

    let Some(&latest) = descending.next() else {
        return 0;
    };
    if latest != today && latest != today - Duration::days(1) {
        return 0;
    }

    let mut streak = 1;
    let mut previous = latest;
    for &date in descending {
        if (previous - date).num_days() != 1 {
            break;
        }
        streak += 1;
        previous = date;
    }
    streak
}
