mod nft_ops;
mod wallet_ops;

pub use nft_ops::*;
pub use wallet_ops::*;
