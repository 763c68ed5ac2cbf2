pub mod ids;
pub mod token;
pub mod wei;

pub use ids::{ListenerId, PollerId};
pub use token::{Address, TokenRef};
pub use wei::Wei;
