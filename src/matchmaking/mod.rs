//! Ad-hoc matchmaking

pub mod lobby;

pub use lobby::{LobbyError, MatchmakeOutcome, MatchmakingLobby};
