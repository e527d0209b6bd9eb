mod block_state;
mod definition;
mod emission;
mod id;
mod state;
mod value_map;

pub use block_state::BlockCurrencyState;
pub use definition::{CurrencyDefinition, CurrencyRegistry};
pub use id::CurrencyId;
pub use state::CurrencyState;
pub use value_map::ValueMap;
