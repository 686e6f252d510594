pub mod avatar;
pub mod index;
pub mod player_info;
pub mod status;
