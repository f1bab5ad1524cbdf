//! Live in-class quiz rounds: random student selection without repeats.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LiveQuizError {
    #[error("roster is empty")]
    EmptyRoster,
    #[error("no live quiz round for this class")]
    NoRound,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Draw {
    pub student: String,
    pub round: u32,
    pub remaining: usize,
}

/// One class's draw state. Everyone is drawn once before anyone repeats.
#[derive(Debug, Clone)]
pub struct LiveRound {
    roster: Vec<String>,
    queue: Vec<String>,
    round: u32,
}

impl LiveRound {
    pub fn new(students: Vec<String>) -> Result<Self, LiveQuizError> {
        let mut roster: Vec<String> = students
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        roster.sort();
        roster.dedup();
        if roster.is_empty() {
            return Err(LiveQuizError::EmptyRoster);
        }
        Ok(Self {
            roster,
            queue: Vec::new(),
            round: 0,
        })
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Draw {
        if self.queue.is_empty() {
            self.queue = self.roster.clone();
            self.queue.shuffle(rng);
            self.round += 1;
        }
        // queue was just refilled from a non-empty roster
        let student = self.queue.pop().unwrap_or_default();
        Draw {
            student,
            round: self.round,
            remaining: self.queue.len(),
        }
    }
}

#[derive(Default)]
pub struct LiveQuizRegistry {
    rounds: Mutex<HashMap<String, LiveRound>>,
}

impl LiveQuizRegistry {
    pub fn start(&self, class_id: &str, students: Vec<String>) -> Result<usize, LiveQuizError> {
        let round = LiveRound::new(students)?;
        let size = round.roster().len();
        self.lock().insert(class_id.to_string(), round);
        tracing::info!(class_id, students = size, "live quiz started");
        Ok(size)
    }

    pub fn draw(&self, class_id: &str) -> Result<Draw, LiveQuizError> {
        let mut rounds = self.lock();
        let round = rounds.get_mut(class_id).ok_or(LiveQuizError::NoRound)?;
        Ok(round.draw(&mut rand::rng()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LiveRound>> {
        self.rounds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn everyone_is_drawn_once_per_round() {
        let roster = vec!["ana".into(), "bia".into(), "caio".into(), "ana".into()];
        let mut round = LiveRound::new(roster).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let first: HashSet<String> = (0..3).map(|_| round.draw(&mut rng).student).collect();
        assert_eq!(first.len(), 3);

        let next = round.draw(&mut rng);
        assert_eq!(next.round, 2);
        assert_eq!(next.remaining, 2);
    }

    #[test]
    fn empty_roster_is_rejected() {
        assert_eq!(
            LiveRound::new(vec![" ".into()]).unwrap_err(),
            LiveQuizError::EmptyRoster
        );
    }

    #[test]
    fn drawing_without_a_round_fails() {
        let reg = LiveQuizRegistry::default();
        assert_eq!(reg.draw("7A"), Err(LiveQuizError::NoRound));
        reg.start("7A", vec!["ana".into()]).unwrap();
        assert_eq!(reg.draw("7A").unwrap().student, "ana");
    }
}
