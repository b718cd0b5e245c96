pub mod builder;
pub mod chain_type;
pub mod error;
pub mod mock;
pub mod ton;

pub use builder::ChainBuilder;
pub use chain_type::ChainType;
pub use mock::MockChain;
pub use ton::TonAdapter;
