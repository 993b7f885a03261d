use crate::habits::is_completed_on;
use crate::models::{Habit, Task, TaskFilter, TaskStats, TodayProgress};
use crate::streak::today;
use chrono::NaiveDate;
use std::cmp::Ordering;

pub fn compute_stats(tasks: &[Task]) -> TaskStats {
    compute_stats_at(today(), tasks)
}

pub fn compute_stats_at(today: NaiveDate, tasks: &[Task]) -> TaskStats {
    let mut stats = TaskStats {
        total: tasks.len(),
        ..TaskStats::default()
    };

    for task in tasks {
        if task.completed {
            stats.completed += 1;
            continue;
        }
        stats.active += 1;
        if task.due_date.is_some_and(|due| due < today) {
            stats.overdue += 1;
        }
    }

    stats
}

/// Filtered view of `tasks` in display order. The input is left as is and
/// ties keep their input order.
pub fn sort_tasks(tasks: &[Task], filter: TaskFilter) -> Vec<&Task> {
    let mut view: Vec<&Task> = tasks.iter().filter(|task| filter.matches(task)).collect();
    view.sort_by(|a, b| display_order(a, b));
    view
}

fn display_order(a: &Task, b: &Task) -> Ordering {
    a.completed
        .cmp(&b.completed)
        .then_with(|| a.priority.rank().cmp(&b.priority.rank()))
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

pub fn today_progress(habits: &[Habit]) -> TodayProgress {
    today_progress_at(today(), habits)
}

pub fn today_progress_at(today: NaiveDate, habits: &[Habit]) -> TodayProgress {
    let total = habits.len();
    let completed = habits
        .iter()
        .filter(|habit| is_completed_on(habit, today))
        .count();
    let percentage = if total == 0 {
        0
    } else {
        (completed as f64 * 100.0 / total as f64).round() as u32
    };

    TodayProgress {
        completed,
        total,
        percentage,
    }
}
