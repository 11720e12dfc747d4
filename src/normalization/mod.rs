pub mod extract;
pub mod nhl;
