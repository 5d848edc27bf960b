use rand::seq::SliceRandom;
use rand::thread_rng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub type ParticipantId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub exclusion: Option<ParticipantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Assignment {
    pub giver: ParticipantId,
    pub receiver: ParticipantId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    #[error("at least 2 participants required")]
    TooFewParticipants,
    #[error("duplicate participant id: {0}")]
    DuplicateId(ParticipantId),
    #[error("no valid assignment exists")]
    NoSolution,
}

impl SolveError {
    // Malformed call vs. legitimate "the exclusion graph admits no matching".
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, SolveError::NoSolution)
    }
}

pub fn solve(participants: &[Participant]) -> Result<Vec<Assignment>, SolveError> {
    solve_with_rng(participants, &mut thread_rng())
}

pub fn solve_with_rng<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<Vec<Assignment>, SolveError> {
    if participants.len() < 2 {
        return Err(SolveError::TooFewParticipants);
    }

    let mut seen = HashSet::new();
    for p in participants {
        if !seen.insert(p.id.as_str()) {
            return Err(SolveError::DuplicateId(p.id.clone()));
        }
    }

    // Who each participant may give to: everyone except themselves and their
    // excluded peer. An exclusion naming an unknown id has no effect.
    let candidates: Vec<Vec<&str>> = participants
        .iter()
        .map(|giver| {
            participants
                .iter()
                .filter(|other| {
                    other.id != giver.id && giver.exclusion.as_deref() != Some(other.id.as_str())
                })
                .map(|other| other.id.as_str())
                .collect()
        })
        .collect();

    // Fast rejection before search: a participant with nobody to give to, or
    // nobody permitted to give to them, makes the instance unsolvable.
    for (i, receivers) in candidates.iter().enumerate() {
        if receivers.is_empty() {
            return Err(SolveError::NoSolution);
        }
        let id = participants[i].id.as_str();
        let can_receive = candidates
            .iter()
            .enumerate()
            .any(|(j, others)| j != i && others.contains(&id));
        if !can_receive {
            return Err(SolveError::NoSolution);
        }
    }

    let mut claimed = HashSet::new();
    let mut assignments = Vec::with_capacity(participants.len());
    if backtrack(
        participants,
        &candidates,
        0,
        &mut claimed,
        &mut assignments,
        rng,
    ) {
        Ok(assignments)
    } else {
        Err(SolveError::NoSolution)
    }
}

fn backtrack<'a, R: Rng + ?Sized>(
    participants: &'a [Participant],
    candidates: &[Vec<&'a str>],
    index: usize,
    claimed: &mut HashSet<&'a str>,
    assignments: &mut Vec<Assignment>,
    rng: &mut R,
) -> bool {
    if index == participants.len() {
        return true;
    }

    let mut options = candidates[index].clone();
    options.shuffle(rng);

    for receiver in options {
        if claimed.contains(receiver) {
            continue;
        }

        claimed.insert(receiver);
        assignments.push(Assignment {
            giver: participants[index].id.clone(),
            receiver: receiver.to_string(),
        });

        if backtrack(participants, candidates, index + 1, claimed, assignments, rng) {
            return true;
        }

        assignments.pop();
        claimed.remove(receiver);
    }

    false
}

pub fn validate(participants: &[Participant], assignments: &[Assignment]) -> bool {
    if assignments.len() != participants.len() {
        return false;
    }

    let by_id: HashMap<&str, &Participant> =
        participants.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut givers = HashSet::new();
    let mut receivers = HashSet::new();

    for assignment in assignments {
        let Some(giver) = by_id.get(assignment.giver.as_str()) else {
            return false;
        };

        if assignment.giver == assignment.receiver {
            return false;
        }

        if !by_id.contains_key(assignment.receiver.as_str()) {
            return false;
        }

        if giver.exclusion.as_deref() == Some(assignment.receiver.as_str()) {
            return false;
        }

        if !givers.insert(assignment.giver.as_str())
            || !receivers.insert(assignment.receiver.as_str())
        {
            return false;
        }
    }

    givers.len() == participants.len() && receivers.len() == participants.len()
}
