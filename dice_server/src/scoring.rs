//! Pure dice-scoring rule (`SPEC_FULL.md` §4.4 implementation note): a
//! standard "farkle-family" rule used to compute `projectedTotalScore` and
//! to validate a client's declared `points` against something concrete.
//!
//! Triples score `100 * face` (`1`s tripling to `1000`); leftover single `1`s
//! score `100` each and leftover single `5`s score `50` each. Everything else
//! scores zero. This is a deliberately simple member of the farkle family,
//! not a full ruleset (no straights, no four/five/six-of-a-kind bonuses) —
//! the distilled spec treats the rule as an opaque engine computation, so
//! keeping it simple keeps the mismatch check legible.

use protocol::Die;

pub fn score_dice(dice: &[Die]) -> u32 {
    let mut counts = [0u32; 7]; // index by face 1..=6
    for die in dice {
        if (1..=6).contains(&die.value) {
            counts[die.value as usize] += 1;
        }
    }

    let mut total = 0u32;
    for face in 1..=6u8 {
        let mut count = counts[face as usize];
        while count >= 3 {
            total += if face == 1 { 1000 } else { 100 * face as u32 };
            count -= 3;
        }
        match face {
            1 => total += count * 100,
            5 => total += count * 50,
            _ => {}
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DieId;

    fn die(value: u8) -> Die {
        Die {
            die_id: DieId::new(format!("d{value}")),
            sides: 6,
            value,
        }
    }

    #[test]
    fn triple_ones_score_a_thousand() {
        assert_eq!(score_dice(&[die(1), die(1), die(1)]), 1000);
    }

    #[test]
    fn triple_fives_score_five_hundred() {
        assert_eq!(score_dice(&[die(5), die(5), die(5)]), 500);
    }

    #[test]
    fn loose_ones_and_fives() {
        assert_eq!(score_dice(&[die(1), die(5), die(5)]), 200);
    }

    #[test]
    fn non_scoring_faces_are_zero() {
        assert_eq!(score_dice(&[die(2), die(3), die(4)]), 0);
    }

    #[test]
    fn mixed_hand() {
        // Triple 6s (600) + a loose 1 (100) + a loose 5 (50).
        assert_eq!(score_dice(&[die(6), die(6), die(6), die(1), die(5)]), 750);
    }
}
