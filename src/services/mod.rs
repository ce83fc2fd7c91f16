// Service exports
pub mod directory;
pub mod memory;
pub mod postgres;

pub use directory::{
    DriverDirectory, MatchStore, RideHistory, SubscriptionDirectory, VehicleDirectory,
};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
