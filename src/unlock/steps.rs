// Pure next-step resolution. No I/O, no clock, no randomness: the answer
// is a function of the gate's requirement flags and the submission's
// verification flags, nothing else.

use crate::db::models::{Gate, Submission};

/// A visitor's position in the unlock flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Email,
    Soundcloud,
    Instagram,
    Spotify,
    Download,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Email => "email",
            Step::Soundcloud => "soundcloud",
            Step::Instagram => "instagram",
            Step::Spotify => "spotify",
            Step::Download => "download",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// One row of the flow table: when a step applies to a gate and when a
// submission has satisfied it.
struct StepRule {
    step: Step,
    required: fn(&Gate) -> bool,
    satisfied: fn(&Gate, &Submission) -> bool,
}

// Canonical step order. Adding a step to the flow means adding a row here;
// nothing else in the engine hardcodes the sequence.
const STEPS: &[StepRule] = &[
    StepRule {
        step: Step::Soundcloud,
        required: soundcloud_required,
        satisfied: soundcloud_satisfied,
    },
    StepRule {
        step: Step::Instagram,
        required: instagram_required,
        satisfied: instagram_satisfied,
    },
    StepRule {
        step: Step::Spotify,
        required: spotify_required,
        satisfied: spotify_satisfied,
    },
];

fn soundcloud_required(gate: &Gate) -> bool {
    gate.requires_soundcloud()
}

// Both flagged sub-actions must be verified; an unflagged sub-action does
// not count against the visitor.
fn soundcloud_satisfied(gate: &Gate, submission: &Submission) -> bool {
    (!gate.require_soundcloud_repost || submission.soundcloud_repost_verified)
        && (!gate.require_soundcloud_follow || submission.soundcloud_follow_verified)
}

fn instagram_required(gate: &Gate) -> bool {
    gate.require_instagram_click
}

fn instagram_satisfied(_gate: &Gate, submission: &Submission) -> bool {
    submission.instagram_clicked
}

fn spotify_required(gate: &Gate) -> bool {
    gate.require_spotify_connect
}

fn spotify_satisfied(_gate: &Gate, submission: &Submission) -> bool {
    submission.spotify_connected
}

/// The first unmet step for a visitor, or [`Step::Download`] when every
/// required step is satisfied.
///
/// `None` for the submission means the email has not been captured yet,
/// which is always the first step. Steps the gate does not require are
/// skipped entirely and are never returned.
pub fn next_step(gate: &Gate, submission: Option<&Submission>) -> Step {
    let Some(submission) = submission else {
        return Step::Email;
    };

    STEPS
        .iter()
        .find(|rule| (rule.required)(gate) && !(rule.satisfied)(gate, submission))
        .map(|rule| rule.step)
        .unwrap_or(Step::Download)
}
