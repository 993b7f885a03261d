use crate::errors::DomainError;
use crate::models::{DEFAULT_HABIT_COLOR, Habit, HabitUpdate, NewHabit, PlanTier, new_id};
use crate::plans::{ResourceKind, check_limit};
use crate::streak::compute_streak;
use chrono::{NaiveDate, Utc};

pub fn add_habit(
    habits: &mut Vec<Habit>,
    input: NewHabit,
    plan: PlanTier,
) -> Result<Habit, DomainError> {
    check_limit(habits.len(), plan, ResourceKind::Habit)?;

    let title = required_title(&input.title)?;
    let habit = Habit {
        id: new_id(),
        title,
        description: input.description.unwrap_or_default(),
        color: input
            .color
            .filter(|color| !color.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HABIT_COLOR.to_string()),
        completed_dates: Default::default(),
        streak: 0,
        created_at: Utc::now(),
    };
    habits.push(habit.clone());
    Ok(habit)
}

pub fn update_habit(
    habits: &mut [Habit],
    id: &str,
    update: HabitUpdate,
) -> Result<Habit, DomainError> {
    let title = update.title.as_deref().map(required_title).transpose()?;
    let habit = find_mut(habits, id)?;

    if let Some(title) = title {
        habit.title = title;
    }
    if let Some(description) = update.description {
        habit.description = description;
    }
    if let Some(color) = update.color.filter(|color| !color.trim().is_empty()) {
        habit.color = color;
    }
    Ok(habit.clone())
}

pub fn delete_habit(habits: &mut Vec<Habit>, id: &str) -> Result<(), DomainError> {
    let before = habits.len();
    habits.retain(|habit| habit.id != id);
    if habits.len() == before {
        return Err(not_found(id));
    }
    Ok(())
}

/// Marks `date` complete, or clears the mark if it was already there, then
/// recomputes the cached streak against `today`.
pub fn toggle_completion(
    habits: &mut [Habit],
    id: &str,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<Habit, DomainError> {
    let habit = find_mut(habits, id)?;
    if !habit.completed_dates.remove(&date) {
        habit.completed_dates.insert(date);
    }
    habit.streak = compute_streak(&habit.completed_dates, today);
    Ok(habit.clone())
}

pub fn is_completed_on(habit: &Habit, date: NaiveDate) -> bool {
    habit.completed_dates.contains(&date)
}

/// Brings every cached streak up to date. Returns whether any changed.
pub fn refresh_streaks(habits: &mut [Habit], today: NaiveDate) -> bool {
    let mut changed = false;
    for habit in habits.iter_mut() {
        let streak = compute_streak(&habit.completed_dates, today);
        if habit.streak != streak {
            habit.streak = streak;
            changed = true;
        }
    }
    changed
}

fn required_title(raw: &str) -> Result<String, DomainError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DomainError::Validation("Title is required".into()));
    }
    Ok(title.to_string())
}

fn find_mut<'a>(habits: &'a mut [Habit], id: &str) -> Result<&'a mut Habit, DomainError> {
    habits
        .iter_mut()
        .find(|habit| habit.id == id)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> DomainError {
    DomainError::NotFound(format!("Habit not found: {id}"))
}
