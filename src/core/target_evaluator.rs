use crate::models::{Direction, Outcome, TradeRecord};

/// Decides whether `price` resolves `record`.
///
/// Stop-loss is checked before any target, so a sample that satisfies both
/// resolves as `StopLossHit`. Targets are scanned in stored order and the
/// first one reached wins. A record that already carries an outcome returns
/// it unchanged, whatever the price.
pub fn evaluate(record: &TradeRecord, price: f64) -> Outcome {
    if record.is_terminal() {
        return record.outcome();
    }
    if !price.is_finite() {
        return Outcome::None;
    }

    match record.direction {
        Direction::Bullish => {
            if price <= record.stop_loss {
                return Outcome::StopLossHit;
            }
            record
                .targets
                .iter()
                .position(|t| price >= t.price)
                .map_or(Outcome::None, Outcome::TargetHit)
        }
        Direction::Bearish => {
            if price >= record.stop_loss {
                return Outcome::StopLossHit;
            }
            record
                .targets
                .iter()
                .position(|t| price <= t.price)
                .map_or(Outcome::None, Outcome::TargetHit)
        }
        // Inert until something reclassifies it
        Direction::Neutral => Outcome::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckUpdate, Resolution, Target};
    use crate::test_helpers::{bearish_record, bullish_record, t0};

    #[test]
    fn bullish_no_change_between_levels() {
        let rec = bullish_record();
        assert_eq!(evaluate(&rec, 2610.0), Outcome::None);
        assert_eq!(evaluate(&rec, 2619.99), Outcome::None);
    }

    #[test]
    fn bullish_first_target_wins() {
        let rec = bullish_record();
        assert_eq!(evaluate(&rec, 2620.0), Outcome::TargetHit(0));
        // Gap through both targets still reports the nearest
        assert_eq!(evaluate(&rec, 2640.0), Outcome::TargetHit(0));
    }

    #[test]
    fn bullish_stop_loss() {
        let rec = bullish_record();
        assert_eq!(evaluate(&rec, 2600.0), Outcome::StopLossHit);
        assert_eq!(evaluate(&rec, 2550.0), Outcome::StopLossHit);
    }

    #[test]
    fn bearish_levels() {
        let rec = bearish_record();
        assert_eq!(evaluate(&rec, 2612.0), Outcome::None);
        assert_eq!(evaluate(&rec, 2605.0), Outcome::TargetHit(0));
        assert_eq!(evaluate(&rec, 2580.0), Outcome::TargetHit(0));
        assert_eq!(evaluate(&rec, 2625.0), Outcome::StopLossHit);
    }

    #[test]
    fn bearish_skips_unreached_first_target() {
        let mut rec = bearish_record();
        // Out-of-order levels: only the second is reached
        rec.targets = vec![Target::at(2580.0), Target::at(2605.0)];
        assert_eq!(evaluate(&rec, 2600.0), Outcome::TargetHit(1));
    }

    #[test]
    fn stop_loss_beats_target_on_same_sample() {
        let mut rec = bullish_record();
        rec.entry_price = 105.0;
        rec.stop_loss = 100.0;
        rec.targets = vec![Target::at(110.0)];
        assert_eq!(evaluate(&rec, 100.0), Outcome::StopLossHit);

        // Levels that overlap: both conditions hold at once
        rec.targets = vec![Target::at(100.0)];
        assert_eq!(evaluate(&rec, 100.0), Outcome::StopLossHit);
        assert_eq!(evaluate(&rec, 99.0), Outcome::StopLossHit);
    }

    #[test]
    fn neutral_is_inert() {
        let mut rec = bullish_record();
        rec.direction = crate::models::Direction::Neutral;
        assert_eq!(evaluate(&rec, 1.0), Outcome::None);
        assert_eq!(evaluate(&rec, 1_000_000.0), Outcome::None);
    }

    #[test]
    fn terminal_outcome_never_flaps() {
        let mut rec = bullish_record();
        let first = evaluate(&rec, 2622.0);
        assert_eq!(first, Outcome::TargetHit(0));
        rec.apply_check(&CheckUpdate {
            checked_at: t0(),
            price: Some(2622.0),
            resolution: Resolution::from_outcome(first, t0()),
        });

        for price in [2500.0, 2600.0, 2635.0, 9999.0] {
            assert_eq!(evaluate(&rec, price), first);
        }
    }

    #[test]
    fn nan_price_is_ignored() {
        let rec = bullish_record();
        assert_eq!(evaluate(&rec, f64::NAN), Outcome::None);
    }
}
