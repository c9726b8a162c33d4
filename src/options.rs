use structopt::StructOpt;
use wallet_sync_lib::error::SyncError;
use wallet_sync_lib::eth::parse_address;
use web3::types::{Address, U256};

#[derive(Debug, StructOpt)]
pub struct AddressOptions {
    #[structopt(help = "Wallet address (0x followed by 40 hex characters)")]
    pub address: String,
}

#[derive(Debug, StructOpt)]
pub struct NftOptions {
    #[structopt(help = "Wallet address")]
    pub address: String,

    #[structopt(long = "force", help = "Rescan Transfer events from genesis")]
    pub force: bool,
}

#[derive(Debug, StructOpt)]
pub struct TransferNftOptions {
    #[structopt(long = "to", help = "Receiver address")]
    pub to: String,

    #[structopt(long = "token-id", help = "Token id (decimal)")]
    pub token_id: String,
}

#[derive(Debug, StructOpt)]
pub struct ServeOptions {
    #[structopt(long = "port", default_value = "8080")]
    pub port: u16,

    #[structopt(long = "host", default_value = "127.0.0.1")]
    pub host: String,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "wallet_sync",
    about = "Cached wallet balance, transaction history and NFT ownership"
)]
pub enum CliOptions {
    /// Refresh balance, transactions and balance history of an address
    #[structopt(name = "wallet")]
    Wallet(AddressOptions),
    /// Resolve the NFTs owned by an address
    #[structopt(name = "nfts")]
    Nfts(NftOptions),
    /// Print stored snapshots and the calculated balance history
    #[structopt(name = "history")]
    History(AddressOptions),
    /// Remove all stored data of an address
    #[structopt(name = "clear")]
    Clear(AddressOptions),
    /// Transfer an NFT owned by ETH_PRIVATE_KEY
    #[structopt(name = "transfer-nft")]
    TransferNft(TransferNftOptions),
    /// Run the HTTP API
    #[structopt(name = "serve")]
    Serve(ServeOptions),
}

pub enum Command {
    Wallet(Address),
    Nfts { address: Address, force: bool },
    History(Address),
    Clear(Address),
    TransferNft { to: Address, token_id: U256 },
    Serve { host: String, port: u16 },
}

/// Parses the command line, rejecting malformed addresses before anything touches the network.
pub fn validated_cli() -> Result<Command, SyncError> {
    let opt: CliOptions = CliOptions::from_args();
    let command = match opt {
        CliOptions::Wallet(o) => Command::Wallet(parse_address(&o.address)?),
        CliOptions::Nfts(o) => Command::Nfts {
            address: parse_address(&o.address)?,
            force: o.force,
        },
        CliOptions::History(o) => Command::History(parse_address(&o.address)?),
        CliOptions::Clear(o) => Command::Clear(parse_address(&o.address)?),
        CliOptions::TransferNft(o) => Command::TransferNft {
            to: parse_address(&o.to)?,
            token_id: U256::from_dec_str(&o.token_id).map_err(|_| {
                SyncError::InvalidInput(format!("Invalid token id: {}", o.token_id))
            })?,
        },
        CliOptions::Serve(o) => Command::Serve {
            host: o.host,
            port: o.port,
        },
    };
    Ok(command)
}
