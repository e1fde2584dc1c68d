//! Pari-mutuel payout with fixed podium shares.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{BetRow, HorseNumber, Participant, PrizeDistribution, UserId};
use crate::race::Horse;

const UNKNOWN_PLAYER: &str = "unknown player";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodiumPlace {
    /// 1-based.
    pub place: usize,
    pub horse_number: HorseNumber,
    pub horse_name: String,
    pub share_percent: f64,
    pub prize: f64,
    /// Total staked on this horse by everyone.
    pub backed_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerResult {
    pub user_id: UserId,
    pub display_name: String,
    pub total_staked: f64,
    pub total_won: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub distribution: PrizeDistribution,
    pub total_pool: f64,
    pub podium: Vec<PodiumPlace>,
    /// Ordered by profit, best first.
    pub players: Vec<PlayerResult>,
}

impl Settlement {
    pub fn payout_for(&self, user: UserId) -> f64 {
        self.players
            .iter()
            .find(|player| player.user_id == user)
            .map_or(0.0, |player| player.total_won)
    }

    /// Sum actually handed out. Falls short of the pool when a paid place has
    /// no backers or fewer horses finished than there are places.
    pub fn distributed(&self) -> f64 {
        self.players.iter().map(|player| player.total_won).sum()
    }
}

/// Settles `bets` against `ranking` (best first, as produced by
/// [`Track::ranking`](crate::race::Track::ranking)). Only finished horses take
/// a podium place.
pub fn settle(
    ranking: &[Horse],
    bets: &[BetRow],
    participants: &[Participant],
    distribution: PrizeDistribution,
) -> Settlement {
    let total_pool: f64 = bets.iter().map(|bet| bet.amount).sum();

    let mut backed: BTreeMap<HorseNumber, f64> = BTreeMap::new();
    for bet in bets {
        *backed.entry(bet.horse_number).or_default() += bet.amount;
    }

    let podium: Vec<PodiumPlace> = ranking
        .iter()
        .filter(|horse| horse.is_finished())
        .zip(distribution.percentages())
        .enumerate()
        .map(|(index, (horse, share))| PodiumPlace {
            place: index + 1,
            horse_number: horse.number,
            horse_name: horse.name.to_string(),
            share_percent: *share,
            prize: total_pool * share / 100.0,
            backed_amount: backed.get(&horse.number).copied().unwrap_or(0.0),
        })
        .collect();

    // Participants in join order, then anyone who staked without a
    // participant row.
    let mut order: Vec<UserId> = Vec::new();
    let mut names: BTreeMap<UserId, String> = BTreeMap::new();
    for participant in participants {
        if names
            .insert(participant.user_id, participant.display_name.clone())
            .is_none()
        {
            order.push(participant.user_id);
        }
    }
    for bet in bets {
        if !names.contains_key(&bet.user_id) {
            names.insert(bet.user_id, UNKNOWN_PLAYER.to_string());
            order.push(bet.user_id);
        }
    }

    let mut players: Vec<PlayerResult> = order
        .into_iter()
        .map(|user_id| {
            let own = bets.iter().filter(|bet| bet.user_id == user_id);
            let total_staked: f64 = own.clone().map(|bet| bet.amount).sum();
            let total_won: f64 = podium
                .iter()
                .filter(|place| place.backed_amount > 0.0)
                .map(|place| {
                    let stake: f64 = own
                        .clone()
                        .filter(|bet| bet.horse_number == place.horse_number)
                        .map(|bet| bet.amount)
                        .sum();
                    place.prize * stake / place.backed_amount
                })
                .sum();
            PlayerResult {
                display_name: names
                    .remove(&user_id)
                    .unwrap_or_else(|| UNKNOWN_PLAYER.to_string()),
                user_id,
                total_staked,
                total_won,
                profit: total_won - total_staked,
            }
        })
        .collect();
    players.sort_by(|a, b| b.profit.total_cmp(&a.profit));

    Settlement {
        distribution,
        total_pool,
        podium,
        players,
    }
}
