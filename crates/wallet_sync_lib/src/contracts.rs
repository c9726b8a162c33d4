use lazy_static::lazy_static;
use std::error;
use web3::contract::tokens::Tokenize;
use web3::contract::Contract;
use web3::ethabi::Token;
use web3::transports::Http;
use web3::types::{Address, H256, U256};
use web3::{Transport, Web3};

lazy_static! {
    pub static ref DUMMY_RPC_PROVIDER: Web3<Http> = {
        let transport = web3::transports::Http::new("http://noconn").unwrap();
        Web3::new(transport)
    };
    pub static ref ERC721_CONTRACT_TEMPLATE: Contract<Http> =
        { prepare_contract_template(include_bytes!("../contracts/ierc721.json")).unwrap() };
    pub static ref ERC721_TRANSFER_TOPIC: H256 = ERC721_CONTRACT_TEMPLATE
        .abi()
        .event("Transfer")
        .map(|event| event.signature())
        .unwrap();
}

pub fn prepare_contract_template(json_abi: &[u8]) -> Result<Contract<Http>, Box<dyn error::Error>> {
    let contract = Contract::from_json(DUMMY_RPC_PROVIDER.eth(), Address::zero(), json_abi)?;

    Ok(contract)
}

pub fn contract_encode<P, T>(
    contract: &Contract<T>,
    func: &str,
    params: P,
) -> Result<Vec<u8>, web3::ethabi::Error>
where
    P: Tokenize,
    T: Transport,
{
    contract
        .abi()
        .function(func)
        .and_then(|function| function.encode_input(&params.into_tokens()))
}

pub fn contract_decode<T>(
    contract: &Contract<T>,
    func: &str,
    output: &[u8],
) -> Result<Vec<Token>, web3::ethabi::Error>
where
    T: Transport,
{
    contract
        .abi()
        .function(func)
        .and_then(|function| function.decode_output(output))
}

pub fn encode_erc721_balance_of(owner: Address) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(&ERC721_CONTRACT_TEMPLATE, "balanceOf", (owner,))
}

pub fn encode_erc721_owner_of(token_id: U256) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(&ERC721_CONTRACT_TEMPLATE, "ownerOf", (token_id,))
}

pub fn encode_erc721_token_uri(token_id: U256) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(&ERC721_CONTRACT_TEMPLATE, "tokenURI", (token_id,))
}

pub fn encode_erc721_transfer_from(
    from: Address,
    to: Address,
    token_id: U256,
) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(&ERC721_CONTRACT_TEMPLATE, "transferFrom", (from, to, token_id))
}

fn single_output(func: &str, output: &[u8]) -> Result<Token, web3::ethabi::Error> {
    contract_decode(&ERC721_CONTRACT_TEMPLATE, func, output)?
        .into_iter()
        .next()
        .ok_or(web3::ethabi::Error::InvalidData)
}

pub fn decode_erc721_balance_of(output: &[u8]) -> Result<U256, web3::ethabi::Error> {
    single_output("balanceOf", output)?
        .into_uint()
        .ok_or(web3::ethabi::Error::InvalidData)
}

pub fn decode_erc721_owner_of(output: &[u8]) -> Result<Address, web3::ethabi::Error> {
    single_output("ownerOf", output)?
        .into_address()
        .ok_or(web3::ethabi::Error::InvalidData)
}

pub fn decode_erc721_token_uri(output: &[u8]) -> Result<String, web3::ethabi::Error> {
    single_output("tokenURI", output)?
        .into_string()
        .ok_or(web3::ethabi::Error::InvalidData)
}

/// Topic form of an address (left padded to 32 bytes) for indexed log filters.
pub fn address_to_topic(address: Address) -> H256 {
    H256::from(address)
}

pub fn topic_to_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transfer_topic() {
        assert_eq!(
            format!("{:#x}", *ERC721_TRANSFER_TOPIC),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_encode_owner_of() {
        let data = encode_erc721_owner_of(U256::from(5)).unwrap();
        assert_eq!(hex::encode(&data[..4]), "6352211e");
        assert_eq!(data.len(), 4 + 32);
    }

    #[test]
    fn test_decode_owner_of() {
        let owner = Address::from_str("7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
        let encoded = web3::ethabi::encode(&[Token::Address(owner)]);
        assert_eq!(decode_erc721_owner_of(&encoded).unwrap(), owner);
        assert_eq!(topic_to_address(&address_to_topic(owner)), owner);
    }
}
