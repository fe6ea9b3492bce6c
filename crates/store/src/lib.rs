pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, DbPool};
pub use repositories::{
    CheckpointLog, ControlOverlayStore, DedupLedger, InMemoryCheckpointLog, InMemoryControlOverlay,
    InMemoryDedupLedger, InMemoryMessageLog, InMemorySessionStore, MessageLog, RepositoryError,
    SessionStore, SqlCheckpointLog, SqlControlOverlay, SqlDedupLedger, SqlMessageLog,
    SqlSessionStore,
};
