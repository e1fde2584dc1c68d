//! SeaORM entities for the shared Postgres schema (`schema/derby.sql`).
//!
//! Column names follow the tables the realtime feed publishes, so the same
//! models decode both query results and change payloads.

pub mod bets;
pub mod game_participants;
pub mod games;
pub mod player_states;
