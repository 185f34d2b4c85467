use serde::{Deserialize, Serialize};
use uuid::Uuid;

// the token is held for the lifetime of the process only
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub license_id: String,
    pub driving_experience: i32,
    pub rating: f64,
    pub email: String,
    pub password: String,
}
