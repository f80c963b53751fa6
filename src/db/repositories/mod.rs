pub mod token_repository;

pub use self::token_repository::{TokenPair, TokenRepository};
