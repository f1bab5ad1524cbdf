//! Sequential access rules over the ordered items of a course.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::CourseItem;
use crate::quiz::{QuizState, QuizUnlockController};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemStatus {
    pub watched: bool,
    pub quiz: QuizState,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NotWatched,
    QuizNotPassed,
}

/// The first earlier item that still has to be finished.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub item_id: Uuid,
    pub title: String,
    pub reason: BlockReason,
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            BlockReason::NotWatched => write!(f, "finish watching \"{}\" first", self.title),
            BlockReason::QuizNotPassed => write!(f, "pass the quiz for \"{}\" first", self.title),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Access {
    Allowed,
    Blocked(Blocked),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GatingPolicy {
    pub require_previous_completion: bool,
    pub allow_quiz_skip: bool,
}

pub struct GatingEvaluator<'a> {
    items: Vec<&'a CourseItem>,
    statuses: &'a HashMap<Uuid, ItemStatus>,
    policy: GatingPolicy,
}

impl<'a> GatingEvaluator<'a> {
    /// Items may come in any order; `position` decides the sequence.
    pub fn new(
        items: &'a [CourseItem],
        statuses: &'a HashMap<Uuid, ItemStatus>,
        policy: GatingPolicy,
    ) -> Self {
        let mut items: Vec<&CourseItem> = items.iter().collect();
        items.sort_by_key(|i| i.position);
        Self {
            items,
            statuses,
            policy,
        }
    }

    /// `None` when the item is not part of the course.
    pub fn evaluate(&self, item_id: Uuid) -> Option<Access> {
        let idx = self.items.iter().position(|i| i.id == item_id)?;
        if !self.policy.require_previous_completion {
            return Some(Access::Allowed);
        }
        let blocked = self.items[..idx].iter().find_map(|prev| {
            let status = self.statuses.get(&prev.id).copied().unwrap_or_default();
            self.unsatisfied(prev, status).map(|reason| Blocked {
                item_id: prev.id,
                title: prev.title.clone(),
                reason,
            })
        });
        Some(blocked.map_or(Access::Allowed, Access::Blocked))
    }

    pub fn evaluate_all(&self) -> Vec<(Uuid, Access)> {
        self.items
            .iter()
            .filter_map(|i| self.evaluate(i.id).map(|a| (i.id, a)))
            .collect()
    }

    fn unsatisfied(&self, item: &CourseItem, status: ItemStatus) -> Option<BlockReason> {
        if !status.watched {
            return Some(BlockReason::NotWatched);
        }
        let quiz = if item.quiz_id.is_some() { status.quiz } else { QuizState::None };
        let ctl = QuizUnlockController::new(self.policy.allow_quiz_skip);
        (!ctl.can_advance(true, quiz)).then_some(BlockReason::QuizNotPassed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;

    fn item(position: i32, quiz: bool) -> CourseItem {
        CourseItem {
            id: Uuid::new_v4(),
            course_id: Uuid::nil(),
            kind: ItemKind::Video,
            title: format!("Lesson {position}"),
            url: format!("lesson{position}.mp4"),
            position,
            quiz_id: quiz.then(Uuid::new_v4),
        }
    }

    const STRICT: GatingPolicy = GatingPolicy {
        require_previous_completion: true,
        allow_quiz_skip: false,
    };

    #[test]
    fn first_item_is_always_open() {
        let items = vec![item(0, false), item(1, false)];
        let statuses = HashMap::new();
        let g = GatingEvaluator::new(&items, &statuses, STRICT);
        assert_eq!(g.evaluate(items[0].id), Some(Access::Allowed));
        assert!(matches!(
            g.evaluate(items[1].id),
            Some(Access::Blocked(Blocked { reason: BlockReason::NotWatched, .. }))
        ));
        assert_eq!(g.evaluate(Uuid::new_v4()), None);
    }

    #[test]
    fn quiz_must_be_passed_before_moving_on() {
        let items = vec![item(1, false), item(0, true)];
        let mut statuses = HashMap::new();
        statuses.insert(
            items[1].id,
            ItemStatus {
                watched: true,
                quiz: QuizState::Unlocked,
            },
        );
        let g = GatingEvaluator::new(&items, &statuses, STRICT);
        match g.evaluate(items[0].id) {
            Some(Access::Blocked(b)) => {
                assert_eq!(b.item_id, items[1].id);
                assert_eq!(b.reason, BlockReason::QuizNotPassed);
            }
            other => panic!("unexpected {other:?}"),
        }

        statuses.get_mut(&items[1].id).unwrap().quiz = QuizState::Passed;
        let g = GatingEvaluator::new(&items, &statuses, STRICT);
        assert_eq!(g.evaluate(items[0].id), Some(Access::Allowed));
    }

    #[test]
    fn skipped_quiz_counts_only_when_allowed() {
        let items = vec![item(0, true), item(1, false)];
        let mut statuses = HashMap::new();
        statuses.insert(
            items[0].id,
            ItemStatus {
                watched: true,
                quiz: QuizState::Skipped,
            },
        );
        let g = GatingEvaluator::new(&items, &statuses, STRICT);
        assert!(!g.evaluate(items[1].id).unwrap().is_allowed());

        let lenient = GatingPolicy {
            allow_quiz_skip: true,
            ..STRICT
        };
        let g = GatingEvaluator::new(&items, &statuses, lenient);
        assert!(g.evaluate(items[1].id).unwrap().is_allowed());
    }

    #[test]
    fn unwatched_item_further_back_still_blocks() {
        let items = vec![item(0, false), item(1, false), item(2, false)];
        let mut statuses = HashMap::new();
        statuses.insert(
            items[1].id,
            ItemStatus {
                watched: true,
                quiz: QuizState::None,
            },
        );
        let g = GatingEvaluator::new(&items, &statuses, STRICT);
        assert_eq!(
            g.evaluate(items[2].id),
            Some(Access::Blocked(Blocked {
                item_id: items[0].id,
                title: "Lesson 0".into(),
                reason: BlockReason::NotWatched,
            }))
        );
    }

    #[test]
    fn open_navigation_ignores_progress() {
        let items = vec![item(0, true), item(1, false), item(2, false)];
        let statuses = HashMap::new();
        let policy = GatingPolicy {
            require_previous_completion: false,
            allow_quiz_skip: false,
        };
        let g = GatingEvaluator::new(&items, &statuses, policy);
        assert!(g.evaluate_all().iter().all(|(_, a)| a.is_allowed()));
    }
}
