pub mod access_token;
pub mod refresh_token;
pub mod user;

use crate::db::persistence::record::{Record, TableSchema};

pub use self::access_token::AccessToken;
pub use self::refresh_token::RefreshToken;
pub use self::user::User;

/// Auth tables in foreign-key order.
pub fn all_schemas() -> Vec<&'static TableSchema> {
    vec![User::schema(), AccessToken::schema(), RefreshToken::schema()]
}
