use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UnknownVariant;

pub const MIN_HORSES: u8 = 4;
pub const MAX_HORSES: u8 = 8;
pub const MIN_PLAYERS: u8 = 2;
pub const MAX_PLAYERS: u8 = 10;
pub const MIN_CHIP_PRICE: f64 = 0.10;
pub const MIN_MAX_STAKE: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrizeDistribution {
    #[serde(rename = "winner-takes-all")]
    WinnerTakesAll,
    #[serde(rename = "top-2")]
    Top2,
    #[serde(rename = "top-3")]
    Top3,
}

impl PrizeDistribution {
    pub fn as_str(self) -> &'static str {
        match self {
            PrizeDistribution::WinnerTakesAll => "winner-takes-all",
            PrizeDistribution::Top2 => "top-2",
            PrizeDistribution::Top3 => "top-3",
        }
    }

    /// Share of the pool paid to each podium position, in percent.
    pub fn percentages(self) -> &'static [f64] {
        match self {
            PrizeDistribution::WinnerTakesAll => &[100.0],
            PrizeDistribution::Top2 => &[60.0, 40.0],
            PrizeDistribution::Top3 => &[50.0, 30.0, 20.0],
        }
    }

    pub fn paid_positions(self) -> usize {
        self.percentages().len()
    }

    pub fn min_horses(self) -> u8 {
        match self {
            PrizeDistribution::WinnerTakesAll => MIN_HORSES,
            PrizeDistribution::Top2 => 5,
            PrizeDistribution::Top3 => 8,
        }
    }
}

impl fmt::Display for PrizeDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrizeDistribution {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "winner-takes-all" => Ok(PrizeDistribution::WinnerTakesAll),
            "top-2" => Ok(PrizeDistribution::Top2),
            "top-3" => Ok(PrizeDistribution::Top3),
            other => Err(UnknownVariant {
                kind: "prize distribution",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("horse count must be between {min} and {max}, got {0}", min = MIN_HORSES, max = MAX_HORSES)]
    HorseCount(u8),
    #[error("max players must be between {min} and {max}, got {0}", min = MIN_PLAYERS, max = MAX_PLAYERS)]
    MaxPlayers(u8),
    #[error("initial chip price must be at least {min:.2}, got {0}", min = MIN_CHIP_PRICE)]
    ChipPrice(f64),
    #[error("max stake per window must be at least {min:.2}, got {0}", min = MIN_MAX_STAKE)]
    MaxStake(f64),
    #[error("{distribution} needs at least {required} horses, game has {horses}")]
    PrizeNeedsHorses {
        distribution: PrizeDistribution,
        required: u8,
        horses: u8,
    },
}

/// Room options chosen by the creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub horse_count: u8,
    pub max_players: u8,
    pub initial_chip_price: f64,
    pub max_stake: f64,
    pub prize_distribution: PrizeDistribution,
    pub entry_fee: u32,
    pub is_private: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            horse_count: 4,
            max_players: 3,
            initial_chip_price: 0.20,
            max_stake: 2.00,
            prize_distribution: PrizeDistribution::WinnerTakesAll,
            entry_fee: 0,
            is_private: false,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_HORSES..=MAX_HORSES).contains(&self.horse_count) {
            return Err(ConfigError::HorseCount(self.horse_count));
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(ConfigError::MaxPlayers(self.max_players));
        }
        // NaN fails both comparisons.
        if !(self.initial_chip_price >= MIN_CHIP_PRICE) {
            return Err(ConfigError::ChipPrice(self.initial_chip_price));
        }
        if !(self.max_stake >= MIN_MAX_STAKE) {
            return Err(ConfigError::MaxStake(self.max_stake));
        }
        let required = self.prize_distribution.min_horses();
        if self.horse_count < required {
            return Err(ConfigError::PrizeNeedsHorses {
                distribution: self.prize_distribution,
                required,
                horses: self.horse_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(f: impl FnOnce(&mut GameConfig)) -> GameConfig {
        let mut config = GameConfig::default();
        f(&mut config);
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(GameConfig::default().validate(), Ok(()));
    }

    #[test]
    fn validation_matrix() {
        let cases: Vec<(GameConfig, Result<(), ConfigError>)> = vec![
            (with(|c| c.horse_count = 3), Err(ConfigError::HorseCount(3))),
            (with(|c| c.horse_count = 9), Err(ConfigError::HorseCount(9))),
            (with(|c| c.horse_count = 8), Ok(())),
            (with(|c| c.max_players = 1), Err(ConfigError::MaxPlayers(1))),
            (with(|c| c.max_players = 11), Err(ConfigError::MaxPlayers(11))),
            (with(|c| c.max_players = 10), Ok(())),
            (
                with(|c| c.initial_chip_price = 0.05),
                Err(ConfigError::ChipPrice(0.05)),
            ),
            (with(|c| c.initial_chip_price = 0.10), Ok(())),
            (with(|c| c.max_stake = 0.25), Err(ConfigError::MaxStake(0.25))),
            (with(|c| c.max_stake = 0.50), Ok(())),
            (
                with(|c| c.prize_distribution = PrizeDistribution::Top2),
                Err(ConfigError::PrizeNeedsHorses {
                    distribution: PrizeDistribution::Top2,
                    required: 5,
                    horses: 4,
                }),
            ),
            (
                with(|c| {
                    c.prize_distribution = PrizeDistribution::Top2;
                    c.horse_count = 5;
                }),
                Ok(()),
            ),
            (
                with(|c| {
                    c.prize_distribution = PrizeDistribution::Top3;
                    c.horse_count = 7;
                }),
                Err(ConfigError::PrizeNeedsHorses {
                    distribution: PrizeDistribution::Top3,
                    required: 8,
                    horses: 7,
                }),
            ),
            (
                with(|c| {
                    c.prize_distribution = PrizeDistribution::Top3;
                    c.horse_count = 8;
                }),
                Ok(()),
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(config.validate(), expected, "config: {config:?}");
        }
    }

    #[test]
    fn nan_prices_are_rejected() {
        let config = with(|c| c.initial_chip_price = f64::NAN);
        assert!(matches!(config.validate(), Err(ConfigError::ChipPrice(_))));
    }

    #[test]
    fn prize_shares_sum_to_one_hundred() {
        for distribution in [
            PrizeDistribution::WinnerTakesAll,
            PrizeDistribution::Top2,
            PrizeDistribution::Top3,
        ] {
            let total: f64 = distribution.percentages().iter().sum();
            assert!((total - 100.0).abs() < f64::EPSILON);
            assert_eq!(distribution.as_str().parse(), Ok(distribution));
        }
    }

    #[test]
    fn prize_distribution_uses_hyphenated_labels() {
        let json = serde_json::to_string(&PrizeDistribution::Top3).unwrap();
        assert_eq!(json, "\"top-3\"");
    }
}
