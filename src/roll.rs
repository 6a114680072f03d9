//! Weighted item selection and synthesis of the reel shown while a case opens.
use crate::{
    Error,
    Result,
    catalog::{
        CaseItem,
        CatalogError,
    },
};
use itertools::Itertools;
use rand::Rng;
use tracing::debug;

pub const DEFAULT_REEL_LENGTH: usize = 100;

/// Relative position of the winner within the reel.
pub const WINNER_POSITION_RATIO: f64 = 0.85;

/// Distances before the winner that receive a high-value decoration.
pub const NEAR_MISS_OFFSETS: [usize; 3] = [3, 6, 9];

const HIGH_VALUE_SET_SIZE: usize = 3;

/// Inverse-CDF pick over `items` in their given order.
///
/// Returns the first item whose running cumulative probability reaches `draw`, so an
/// exact boundary belongs to the earlier item. Items with no probability mass are never
/// picked on their own. When floating-point drift leaves the total short of `draw` the
/// last item is returned, which makes the pick total for any non-empty slice.
pub fn roll(items: &[CaseItem], draw: f64) -> Option<&CaseItem> {
    let last = items.last()?;
    let mut cumulative = 0.0;
    for item in items {
        cumulative += item.probability;
        if item.probability > 0.0 && cumulative >= draw {
            return Some(item);
        }
    }
    debug!(draw, cumulative, "cumulative probability fell short of draw");
    Some(last)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReelEntry {
    pub item: CaseItem,
    pub winner: bool,
}

impl ReelEntry {
    fn filler(item: CaseItem) -> Self {
        Self {
            item,
            winner: false,
        }
    }
}

/// Display sequence for one opening. Exactly one entry carries the winner flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Reel {
    entries: Vec<ReelEntry>,
}

impl Reel {
    pub fn entries(&self) -> &[ReelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn winner_index(&self) -> Option<usize> {
        self.entries.iter().position(|entry| entry.winner)
    }

    /// Where the animation stops: the flagged winner, or the last position if none is
    /// flagged.
    pub fn target_index(&self) -> usize {
        self.winner_index()
            .unwrap_or_else(|| self.entries.len().saturating_sub(1))
    }

    pub fn winner(&self) -> Option<&CaseItem> {
        self.winner_index().map(|index| &self.entries[index].item)
    }
}

pub fn winner_position(reel_length: usize) -> usize {
    (reel_length as f64 * WINNER_POSITION_RATIO).floor() as usize
}

/// Up to three of the most valuable items, highest floor price first. Equal prices keep
/// catalog order.
pub fn high_value_set(items: &[CaseItem]) -> Vec<&CaseItem> {
    items
        .iter()
        .sorted_by(|a, b| b.floor_price.total_cmp(&a.floor_price))
        .take(HIGH_VALUE_SET_SIZE)
        .collect()
}

/// Decoration for the near-miss slots: the most valuable item other than the winner.
/// Falls back to the most valuable item when the winner is the only candidate.
pub fn near_miss_item<'a>(items: &'a [CaseItem], winner: &CaseItem) -> Option<&'a CaseItem> {
    let high_value = high_value_set(items);
    high_value
        .iter()
        .copied()
        .find(|item| item.id != winner.id)
        .or_else(|| high_value.first().copied())
}

/// Builds the reel for an outcome that has already been decided.
///
/// Filler positions are independent rolls and carry no meaning. The winner always lands
/// at `floor(reel_length * 0.85)` and the near-miss slots at 3, 6 and 9 positions before
/// it, so only the filler depends on `rng`.
pub fn build_reel<R: Rng>(
    items: &[CaseItem],
    winning_item: &CaseItem,
    reel_length: usize,
    rng: &mut R,
) -> Result<Reel> {
    if items.is_empty() {
        return Err(Error::Catalog(CatalogError::Empty));
    }
    if reel_length == 0 {
        return Err(Error::EmptyReel);
    }

    let mut entries = Vec::with_capacity(reel_length);
    for _ in 0..reel_length {
        let draw: f64 = rng.random();
        let item = roll(items, draw).ok_or(Error::Catalog(CatalogError::Empty))?;
        entries.push(ReelEntry::filler(item.clone()));
    }

    let win_position = winner_position(reel_length);
    entries[win_position] = ReelEntry {
        item: winning_item.clone(),
        winner: true,
    };

    if let Some(decoration) = near_miss_item(items, winning_item) {
        for offset in NEAR_MISS_OFFSETS {
            let Some(position) = win_position.checked_sub(offset) else {
                continue;
            };
            entries[position] = ReelEntry::filler(decoration.clone());
        }
    }

    Ok(Reel { entries })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::catalog::tests::item;
    use rand::{
        SeedableRng,
        rngs::StdRng,
    };

    fn three_items() -> Vec<CaseItem> {
        vec![item(1, 0.6, 0.1), item(2, 0.3, 0.5), item(3, 0.1, 5.0)]
    }

    #[test]
    fn roll__boundary_belongs_to_the_earlier_item() {
        // given
        let items = three_items();

        // then
        assert_eq!(roll(&items, 0.59).unwrap().id, 1);
        assert_eq!(roll(&items, 0.6).unwrap().id, 1);
        assert_eq!(roll(&items, 0.61).unwrap().id, 2);
        assert_eq!(roll(&items, 0.95).unwrap().id, 3);
        assert_eq!(roll(&items, 1.0).unwrap().id, 3);
    }

    #[test]
    fn roll__zero_draw_skips_items_without_probability() {
        // given
        let items = vec![item(1, 0.0, 1.0), item(2, 0.5, 1.0), item(3, 0.5, 1.0)];

        // when
        let picked = roll(&items, 0.0).unwrap();

        // then
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn roll__falls_back_to_last_item_when_sum_falls_short() {
        // given
        let items = vec![item(1, 0.3, 1.0), item(2, 0.3, 1.0)];

        // when
        let picked = roll(&items, 0.9).unwrap();

        // then
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn roll__returns_none_only_for_empty_items() {
        assert_eq!(roll(&[], 0.5), None);
    }

    #[test]
    fn build_reel__places_single_flagged_winner_at_85_percent() {
        // given
        let items = three_items();
        let winner = items[0].clone();
        let mut rng = StdRng::seed_from_u64(7);

        // when
        let reel = build_reel(&items, &winner, 100, &mut rng).unwrap();

        // then
        assert_eq!(reel.len(), 100);
        assert_eq!(reel.entries().iter().filter(|e| e.winner).count(), 1);
        assert_eq!(reel.winner_index(), Some(85));
        assert_eq!(reel.winner(), Some(&winner));
    }

    #[test]
    fn build_reel__fills_every_near_miss_slot_with_the_top_alternative() {
        // given
        let items = vec![
            item(1, 0.5, 0.01),
            item(2, 0.2, 9.0),
            item(3, 0.2, 7.0),
            item(4, 0.05, 3.0),
            item(5, 0.05, 1.0),
        ];
        let winner = items[0].clone();
        let mut rng = StdRng::seed_from_u64(11);

        // when
        let reel = build_reel(&items, &winner, 100, &mut rng).unwrap();

        // then
        let ids: Vec<u32> = [82, 79, 76]
            .iter()
            .map(|&i| reel.entries()[i].item.id)
            .collect();
        assert_eq!(ids, vec![2, 2, 2]);
        assert!([82, 79, 76].iter().all(|&i| !reel.entries()[i].winner));
    }

    #[test]
    fn near_miss_item__skips_the_winner_when_it_is_the_most_valuable() {
        // given
        let items = three_items();

        // then
        assert_eq!(near_miss_item(&items, &items[2]).map(|i| i.id), Some(2));
        assert_eq!(near_miss_item(&items, &items[0]).map(|i| i.id), Some(3));
        assert_eq!(near_miss_item(&[], &items[0]), None);
    }

    #[test]
    fn build_reel__skips_near_miss_slots_before_the_start() {
        // given
        let items = three_items();
        let winner = items[2].clone();
        let mut rng = StdRng::seed_from_u64(3);

        // when
        let reel = build_reel(&items, &winner, 5, &mut rng).unwrap();

        // then
        assert_eq!(reel.len(), 5);
        assert_eq!(reel.winner_index(), Some(4));
        assert_eq!(reel.entries()[1].item.id, 2);
    }

    #[test]
    fn build_reel__reuses_winner_when_it_is_the_only_item() {
        // given
        let items = vec![item(1, 1.0, 2.0)];
        let mut rng = StdRng::seed_from_u64(1);

        // when
        let reel = build_reel(&items, &items[0], 20, &mut rng).unwrap();

        // then
        assert_eq!(reel.winner_index(), Some(17));
        assert_eq!(reel.entries().iter().filter(|e| e.winner).count(), 1);
    }

    #[test]
    fn build_reel__rejects_zero_length_and_empty_items() {
        // given
        let items = three_items();
        let mut rng = StdRng::seed_from_u64(1);

        // then
        assert!(matches!(
            build_reel(&items, &items[0], 0, &mut rng),
            Err(Error::EmptyReel)
        ));
        assert!(matches!(
            build_reel(&[], &items[0], 10, &mut rng),
            Err(Error::Catalog(CatalogError::Empty))
        ));
    }

    #[test]
    fn target_index__falls_back_to_last_entry_without_winner() {
        // given
        let reel = Reel {
            entries: vec![
                ReelEntry::filler(item(1, 0.5, 1.0)),
                ReelEntry::filler(item(2, 0.5, 1.0)),
            ],
        };

        // then
        assert_eq!(reel.winner_index(), None);
        assert_eq!(reel.target_index(), 1);
    }
}
