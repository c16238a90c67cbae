mod health;
mod online_users;

pub use health::{health_check, readiness_check};
pub use online_users::{get_online_users_handler, OnlineUserStatus, OnlineUsersQuery};
