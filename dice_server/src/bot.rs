//! `BotEngine` capability trait (`SPEC_FULL.md` §4.4, §9 "dynamic config").
//! The distilled spec treats the bot decision engine as an external
//! collaborator reached through `buildTurnRollPayload`/`buildTurnScoreSummary`;
//! this module provides that trait plus a small deterministic reference
//! implementation so `executeBotTurn` has something to drive.

use crate::scoring::score_dice;
use protocol::{Die, DieId};
use rand::Rng;

/// Capability interface a bot decision engine must implement. Wired at
/// `World` construction time per §9's "dynamic config" redesign note.
pub trait BotEngine: Send + Sync {
    /// Rolls `count` dice for a bot's turn.
    fn build_turn_roll_payload(&self, count: u32) -> Vec<Die>;

    /// Chooses which of `dice` to keep and returns `(selected_dice_ids,
    /// points)`. A reference engine simply keeps every scoring die.
    fn build_turn_score_summary(&self, dice: &[Die]) -> (Vec<DieId>, u32);
}

/// Reference `BotEngine`: rolls fair six-sided dice and greedily selects
/// every scoring face (all triples, loose `1`s and `5`s), matching the same
/// farkle-family rule `scoring::score_dice` validates client submissions
/// against.
#[derive(Default)]
pub struct DeterministicBotEngine;

impl BotEngine for DeterministicBotEngine {
    fn build_turn_roll_payload(&self, count: u32) -> Vec<Die> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|i| Die {
                die_id: DieId::new(format!("bot-{}-{}", rng.gen::<u32>(), i)),
                sides: 6,
                value: rng.gen_range(1..=6),
            })
            .collect()
    }

    fn build_turn_score_summary(&self, dice: &[Die]) -> (Vec<DieId>, u32) {
        let mut counts = [0u32; 7];
        for die in dice {
            if (1..=6).contains(&die.value) {
                counts[die.value as usize] += 1;
            }
        }

        let mut keep_count = [0u32; 7];
        for face in 1..=6u8 {
            let mut count = counts[face as usize];
            let triples = count / 3;
            count -= triples * 3;
            keep_count[face as usize] += triples * 3;
            if face == 1 || face == 5 {
                keep_count[face as usize] += count;
            }
        }

        let mut selected = Vec::new();
        let mut remaining = keep_count;
        for die in dice {
            let face = die.value as usize;
            if face < remaining.len() && remaining[face] > 0 {
                selected.push(die.die_id.clone());
                remaining[face] -= 1;
            }
        }

        let selected_dice: Vec<Die> = dice
            .iter()
            .filter(|d| selected.contains(&d.die_id))
            .cloned()
            .collect();
        let points = score_dice(&selected_dice);
        (selected, points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn die(value: u8, id: &str) -> Die {
        Die {
            die_id: DieId::new(id),
            sides: 6,
            value,
        }
    }

    #[test]
    fn selects_only_scoring_dice() {
        let engine = DeterministicBotEngine;
        let dice = vec![die(1, "a"), die(2, "b"), die(5, "c"), die(3, "d")];
        let (selected, points) = engine.build_turn_score_summary(&dice);
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&DieId::new("a")));
        assert!(selected.contains(&DieId::new("c")));
        assert_eq!(points, 150);
    }

    #[test]
    fn keeps_full_triple_over_partial() {
        let engine = DeterministicBotEngine;
        let dice = vec![die(5, "a"), die(5, "b"), die(5, "c"), die(2, "d")];
        let (selected, points) = engine.build_turn_score_summary(&dice);
        assert_eq!(selected.len(), 3);
        assert_eq!(points, 500);
    }

    #[test]
    fn roll_produces_requested_count() {
        let engine = DeterministicBotEngine;
        let dice = engine.build_turn_roll_payload(5);
        assert_eq!(dice.len(), 5);
        assert!(dice.iter().all(|d| (1..=6).contains(&d.value)));
    }
}
