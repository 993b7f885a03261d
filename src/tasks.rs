use crate::errors::DomainError;
use crate::models::{NewTask, PlanTier, Priority, Task, TaskUpdate, new_id};
use crate::plans::{ResourceKind, check_limit};
use chrono::Utc;

pub fn active_count(tasks: &[Task]) -> usize {
    tasks.iter().filter(|task| !task.completed).count()
}

/// Adds a task. Plans without priority tags always get `medium`.
pub fn add_task(tasks: &mut Vec<Task>, input: NewTask, plan: PlanTier) -> Result<Task, DomainError> {
    check_limit(active_count(tasks), plan, ResourceKind::ActiveTask)?;

    let title = required_title(&input.title)?;
    let priority = if plan.limits().priorities {
        input.priority.unwrap_or_default()
    } else {
        Priority::Medium
    };
    let task = Task {
        id: new_id(),
        title,
        description: input.description.unwrap_or_default(),
        priority,
        due_date: input.due_date,
        completed: false,
        created_at: Utc::now(),
    };
    tasks.push(task.clone());
    Ok(task)
}

pub fn update_task(
    tasks: &mut [Task],
    id: &str,
    update: TaskUpdate,
    plan: PlanTier,
) -> Result<Task, DomainError> {
    let title = update.title.as_deref().map(required_title).transpose()?;
    let task = find_mut(tasks, id)?;

    if let Some(title) = title {
        task.title = title;
    }
    if let Some(description) = update.description {
        task.description = description;
    }
    if let Some(priority) = update.priority.filter(|_| plan.limits().priorities) {
        task.priority = priority;
    }
    if update.clear_due_date {
        task.due_date = None;
    } else if let Some(due) = update.due_date {
        task.due_date = Some(due);
    }
    if let Some(completed) = update.completed {
        task.completed = completed;
    }
    Ok(task.clone())
}

pub fn delete_task(tasks: &mut Vec<Task>, id: &str) -> Result<(), DomainError> {
    let before = tasks.len();
    tasks.retain(|task| task.id != id);
    if tasks.len() == before {
        return Err(not_found(id));
    }
    Ok(())
}

// Reopening a task is not checked against the active-task cap.
pub fn toggle_task(tasks: &mut [Task], id: &str) -> Result<Task, DomainError> {
    let task = find_mut(tasks, id)?;
    task.completed = !task.completed;
    Ok(task.clone())
}

fn required_title(raw: &str) -> Result<String, DomainError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DomainError::Validation("Title is required".into()));
    }
    Ok(title.to_string())
}

fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Result<&'a mut Task, DomainError> {
    tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> DomainError {
    DomainError::NotFound(format!("Task not found: {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn new_task(title: &str, priority: Option<Priority>) -> NewTask {
        NewTask {
            title: title.to_string(),
            priority,
            ..NewTask::default()
        }
    }

    #[test]
    fn free_plan_forces_medium_priority() {
        let mut tasks = Vec::new();
        let task = add_task(&mut tasks, new_task("Email", Some(Priority::High)), PlanTier::Free)
            .unwrap();
        assert_eq!(task.priority, Priority::Medium);

        let update = TaskUpdate {
            priority: Some(Priority::Low),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut tasks, &task.id, update, PlanTier::Free).unwrap();
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn pro_plan_keeps_priority() {
        let mut tasks = Vec::new();
        let task =
            add_task(&mut tasks, new_task("Email", Some(Priority::High)), PlanTier::Pro).unwrap();
        assert_eq!(task.priority, Priority::High);

        let task = add_task(&mut tasks, new_task("Call", None), PlanTier::Pro).unwrap();
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn limit_counts_only_active_tasks() {
        let mut tasks = Vec::new();
        for i in 0..10 {
            add_task(&mut tasks, new_task(&format!("t{i}"), None), PlanTier::Free).unwrap();
        }
        let err = add_task(&mut tasks, new_task("t10", None), PlanTier::Free).unwrap_err();
        assert_eq!(
            err,
            DomainError::LimitExceeded {
                kind: ResourceKind::ActiveTask,
                limit: 10
            }
        );
        assert_eq!(tasks.len(), 10);

        let first = tasks[0].id.clone();
        toggle_task(&mut tasks, &first).unwrap();
        add_task(&mut tasks, new_task("t10", None), PlanTier::Free).unwrap();
        assert_eq!(tasks.len(), 11);
        assert_eq!(active_count(&tasks), 10);
    }

    #[test]
    fn update_sets_and_clears_due_date() {
        let mut tasks = Vec::new();
        let id = add_task(&mut tasks, new_task("Taxes", None), PlanTier::Free)
            .unwrap()
            .id;
        let due = NaiveDate::from_ymd_opt(2026, 4, 15).unwrap();

        let set = TaskUpdate {
            due_date: Some(due),
            ..TaskUpdate::default()
        };
        assert_eq!(
            update_task(&mut tasks, &id, set, PlanTier::Free)
                .unwrap()
                .due_date,
            Some(due)
        );

        let clear = TaskUpdate {
            clear_due_date: true,
            ..TaskUpdate::default()
        };
        assert_eq!(
            update_task(&mut tasks, &id, clear, PlanTier::Free)
                .unwrap()
                .due_date,
            None
        );
    }

    #[test]
    fn toggle_and_delete_unknown_ids() {
        let mut tasks = Vec::new();
        assert!(matches!(
            toggle_task(&mut tasks, "nope"),
            Err(DomainError::NotFound(_))
        ));
        assert!(matches!(
            delete_task(&mut tasks, "nope"),
            Err(DomainError::NotFound(_))
        ));
    }
}
