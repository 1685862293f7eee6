pub mod acquisition;
pub mod fred;
pub mod http;
pub mod normalize;
pub mod store;
pub mod yahoo;

pub use acquisition::Acquirer;
pub use fred::FredSource;
pub use http::with_retry;
pub use normalize::{normalize, week_label};
pub use store::{persist, read_panel};
pub use yahoo::YahooSource;
